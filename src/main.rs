use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::info;
use webnav::agent::{AgentLoop, LoopOptions, RunOutcome};
use webnav::browser::ChromeBrowser;
use webnav::config::{
    Config, OpenAIConfig, OpenRouterConfig, DEFAULT_OPENAI_MODEL, DEFAULT_OPENROUTER_MODEL,
};
use webnav::llm::{ChatCompletionsProvider, HumanProvider, ModelProvider};
use webnav::trajectory::RunWriter;

#[derive(Parser)]
#[command(name = "webnav", version, about = "Vision-model web navigation agent")]
struct Cli {
    /// Task instruction; prompted for interactively when omitted.
    task: Option<String>,

    /// Step budget for this run.
    #[arg(long)]
    max_steps: Option<u32>,

    /// Page to open before the first step.
    #[arg(long)]
    start_url: Option<String>,

    /// Where to write the run trajectory.
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Provider to use: openrouter, openai or openai_compatible.
    #[arg(long)]
    provider: Option<String>,

    /// Read actions from stdin instead of calling a model.
    #[arg(long)]
    interactive: bool,

    /// Show the browser window.
    #[arg(long)]
    headed: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    match run().await {
        Ok(RunOutcome::Finished) => ExitCode::SUCCESS,
        Ok(RunOutcome::StepLimitReached) => ExitCode::from(2),
        Ok(RunOutcome::FatalError { reason }) => {
            eprintln!("Run failed: {}", reason);
            ExitCode::from(1)
        }
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::from(1)
        }
    }
}

async fn run() -> Result<RunOutcome> {
    let cli = Cli::parse();
    let config = Config::load().context("failed to load config")?;

    let task = match cli.task {
        Some(task) => task,
        None => prompt_for_task()?,
    };
    if task.trim().is_empty() {
        return Err(anyhow!("task must not be empty"));
    }

    let model: Box<dyn ModelProvider> = if cli.interactive {
        Box::new(HumanProvider)
    } else {
        let provider_name = cli
            .provider
            .unwrap_or_else(|| config.general.default_provider.clone());
        build_provider(&config, &provider_name)?
    };

    let start_url = cli
        .start_url
        .unwrap_or_else(|| config.general.start_url.clone());
    let output_dir = cli
        .output_dir
        .unwrap_or_else(|| PathBuf::from(&config.general.output_dir));
    let options = LoopOptions {
        max_steps: cli.max_steps.unwrap_or(config.general.max_steps),
        max_images: config.general.max_images,
        max_capture_retries: config.general.max_capture_retries,
    };

    let mut writer = RunWriter::create(&output_dir, &task)
        .context("failed to create results directory")?;
    info!("Recording run to {}", writer.run_dir().display());

    let mut browser = ChromeBrowser::launch(
        config.general.headless && !cli.headed,
        config.general.viewport_width,
        config.general.viewport_height,
        &start_url,
    )
    .await
    .context("failed to launch browser")?;

    let outcome = AgentLoop::new(&mut browser, model.as_ref(), &mut writer, options)
        .run(&task)
        .await;

    browser.close().await;
    println!("Results saved to {}", writer.run_dir().display());
    Ok(outcome)
}

fn build_provider(config: &Config, name: &str) -> Result<Box<dyn ModelProvider>> {
    match name {
        "openrouter" => {
            let section = config
                .providers
                .openrouter
                .clone()
                .unwrap_or(OpenRouterConfig {
                    api_key: None,
                    model: DEFAULT_OPENROUTER_MODEL.to_string(),
                });
            let key = section.resolved_key().context(
                "no OpenRouter API key: set OPENROUTER_API_KEY or [providers.openrouter] api_key",
            )?;
            Ok(Box::new(ChatCompletionsProvider::openrouter(
                key,
                section.model,
            )))
        }
        "openai" => {
            let section = config.providers.openai.clone().unwrap_or(OpenAIConfig {
                api_key: None,
                model: DEFAULT_OPENAI_MODEL.to_string(),
            });
            let key = section.resolved_key().context(
                "no OpenAI API key: set OPENAI_API_KEY or [providers.openai] api_key",
            )?;
            Ok(Box::new(ChatCompletionsProvider::openai(key, section.model)))
        }
        "openai_compatible" => {
            let section = config
                .providers
                .openai_compatible
                .clone()
                .ok_or_else(|| anyhow!("[providers.openai_compatible] is not configured"))?;
            Ok(Box::new(ChatCompletionsProvider::compatible(
                section.base_url,
                section.api_key,
                section.model,
            )))
        }
        other => Err(anyhow!(
            "unknown provider '{}' (expected openrouter, openai or openai_compatible)",
            other
        )),
    }
}

fn prompt_for_task() -> Result<String> {
    print!("Task: ");
    std::io::stdout().flush()?;
    let mut line = String::new();
    std::io::stdin().read_line(&mut line)?;
    Ok(line.trim().to_string())
}
