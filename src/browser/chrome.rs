use super::{Browser, BrowserError, ExecutionError, Screenshot};
use crate::agent::action::Action;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use chromiumoxide::browser::{Browser as CdpBrowser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::input::{
    DispatchKeyEventParams, DispatchKeyEventType, DispatchMouseEventParams,
    DispatchMouseEventType, MouseButton,
};
use chromiumoxide::cdp::browser_protocol::page::CaptureScreenshotFormat;
use chromiumoxide::page::{Page, ScreenshotParams};
use futures::StreamExt;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const CLICK_PRESS_RELEASE_GAP_MS: u64 = 40;
const POST_ACTION_SETTLE_MS: u64 = 500;

/// Headless-Chromium implementation of the [`Browser`] port via the Chrome
/// DevTools Protocol. One page, fixed viewport for the whole session.
pub struct ChromeBrowser {
    browser: CdpBrowser,
    page: Page,
    handler_task: JoinHandle<()>,
    width: u32,
    height: u32,
}

impl ChromeBrowser {
    pub async fn launch(
        headless: bool,
        width: u32,
        height: u32,
        start_url: &str,
    ) -> Result<Self, BrowserError> {
        info!("Launching Chromium ({}x{}, headless={})", width, height, headless);

        let mut builder = BrowserConfig::builder()
            .no_sandbox()
            .arg("--disable-gpu")
            .arg("--disable-dev-shm-usage")
            .window_size(width, height);
        if !headless {
            builder = builder.with_head();
        }
        let config = builder.build().map_err(BrowserError::Launch)?;

        let (browser, mut handler) = CdpBrowser::launch(config)
            .await
            .map_err(|e| BrowserError::Launch(e.to_string()))?;

        // The handler task pumps CDP messages; when it ends the session is gone.
        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    debug!("CDP handler loop ended");
                    break;
                }
            }
        });

        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| BrowserError::Launch(e.to_string()))?;

        let mut chrome = Self {
            browser,
            page,
            handler_task,
            width,
            height,
        };
        chrome.goto(start_url).await?;
        Ok(chrome)
    }

    pub async fn goto(&mut self, url: &str) -> Result<(), BrowserError> {
        self.page
            .goto(url)
            .await
            .map_err(|e| BrowserError::Navigation {
                url: url.to_string(),
                reason: e.to_string(),
            })?;
        if let Err(e) = self.page.wait_for_navigation().await {
            debug!("wait_for_navigation after '{}': {}", url, e);
        }
        Ok(())
    }

    pub async fn close(mut self) {
        if let Err(e) = self.browser.close().await {
            warn!("Error closing browser: {}", e);
        }
        self.handler_task.abort();
    }

    /// Distinguish a dead session from a recoverable dispatch failure by
    /// probing the page after the error.
    async fn classify(&self, err: chromiumoxide::error::CdpError) -> ExecutionError {
        if self.page.url().await.is_err() {
            ExecutionError::SessionClosed(err.to_string())
        } else {
            ExecutionError::Failed(err.to_string())
        }
    }

    async fn click(&mut self, x: u32, y: u32) -> Result<(), ExecutionError> {
        if x >= self.width || y >= self.height {
            return Err(ExecutionError::Failed(format!(
                "click ({}, {}) is outside the {}x{} viewport",
                x, y, self.width, self.height
            )));
        }

        let (fx, fy) = (f64::from(x), f64::from(y));

        let move_params = DispatchMouseEventParams::builder()
            .r#type(DispatchMouseEventType::MouseMoved)
            .x(fx)
            .y(fy)
            .build()
            .map_err(ExecutionError::Failed)?;
        if let Err(e) = self.page.execute(move_params).await {
            return Err(self.classify(e).await);
        }

        let down_params = DispatchMouseEventParams::builder()
            .r#type(DispatchMouseEventType::MousePressed)
            .x(fx)
            .y(fy)
            .button(MouseButton::Left)
            .click_count(1)
            .build()
            .map_err(ExecutionError::Failed)?;
        if let Err(e) = self.page.execute(down_params).await {
            return Err(self.classify(e).await);
        }

        tokio::time::sleep(Duration::from_millis(CLICK_PRESS_RELEASE_GAP_MS)).await;

        let up_params = DispatchMouseEventParams::builder()
            .r#type(DispatchMouseEventType::MouseReleased)
            .x(fx)
            .y(fy)
            .button(MouseButton::Left)
            .click_count(1)
            .build()
            .map_err(ExecutionError::Failed)?;
        if let Err(e) = self.page.execute(up_params).await {
            return Err(self.classify(e).await);
        }
        Ok(())
    }

    async fn type_text(&mut self, text: &str) -> Result<(), ExecutionError> {
        for ch in text.chars() {
            let params = DispatchKeyEventParams::builder()
                .r#type(DispatchKeyEventType::Char)
                .text(ch.to_string())
                .build()
                .map_err(ExecutionError::Failed)?;
            if let Err(e) = self.page.execute(params).await {
                return Err(self.classify(e).await);
            }
        }
        Ok(())
    }

    async fn press_key(&mut self, key: &str) -> Result<(), ExecutionError> {
        // Key names follow the DOM convention the models are prompted with.
        let (code, text, virtual_key) = match key {
            "Enter" => ("Enter", Some("\r"), Some(13)),
            "Tab" => ("Tab", Some("\t"), Some(9)),
            "Escape" => ("Escape", None, Some(27)),
            "Backspace" => ("Backspace", None, Some(8)),
            "Delete" => ("Delete", None, Some(46)),
            "ArrowUp" => ("ArrowUp", None, Some(38)),
            "ArrowDown" => ("ArrowDown", None, Some(40)),
            "ArrowLeft" => ("ArrowLeft", None, Some(37)),
            "ArrowRight" => ("ArrowRight", None, Some(39)),
            "Home" => ("Home", None, Some(36)),
            "End" => ("End", None, Some(35)),
            "PageUp" => ("PageUp", None, Some(33)),
            "PageDown" => ("PageDown", None, Some(34)),
            other => (other, None, None),
        };

        let mut down = DispatchKeyEventParams::builder()
            .r#type(DispatchKeyEventType::KeyDown)
            .key(key.to_string())
            .code(code.to_string());
        if let Some(vk) = virtual_key {
            down = down.windows_virtual_key_code(vk).native_virtual_key_code(vk);
        }
        let down_params = down.build().map_err(ExecutionError::Failed)?;
        if let Err(e) = self.page.execute(down_params).await {
            return Err(self.classify(e).await);
        }

        if let Some(text) = text {
            let char_params = DispatchKeyEventParams::builder()
                .r#type(DispatchKeyEventType::Char)
                .key(key.to_string())
                .code(code.to_string())
                .text(text.to_string())
                .build()
                .map_err(ExecutionError::Failed)?;
            if let Err(e) = self.page.execute(char_params).await {
                return Err(self.classify(e).await);
            }
        }

        let mut up = DispatchKeyEventParams::builder()
            .r#type(DispatchKeyEventType::KeyUp)
            .key(key.to_string())
            .code(code.to_string());
        if let Some(vk) = virtual_key {
            up = up.windows_virtual_key_code(vk).native_virtual_key_code(vk);
        }
        let up_params = up.build().map_err(ExecutionError::Failed)?;
        if let Err(e) = self.page.execute(up_params).await {
            return Err(self.classify(e).await);
        }
        Ok(())
    }

    async fn scroll(&mut self, dx: i32, dy: i32) -> Result<(), ExecutionError> {
        // Wheel events need a position; the viewport center is a safe target.
        let params = DispatchMouseEventParams::builder()
            .r#type(DispatchMouseEventType::MouseWheel)
            .x(f64::from(self.width) / 2.0)
            .y(f64::from(self.height) / 2.0)
            .delta_x(f64::from(dx))
            .delta_y(f64::from(dy))
            .build()
            .map_err(ExecutionError::Failed)?;
        if let Err(e) = self.page.execute(params).await {
            return Err(self.classify(e).await);
        }
        Ok(())
    }
}

#[async_trait]
impl Browser for ChromeBrowser {
    async fn capture(&mut self) -> Result<Screenshot, BrowserError> {
        let bytes = self
            .page
            .screenshot(
                ScreenshotParams::builder()
                    .format(CaptureScreenshotFormat::Png)
                    .full_page(false)
                    .build(),
            )
            .await
            .map_err(|e| BrowserError::Capture(e.to_string()))?;

        let url = self
            .page
            .url()
            .await
            .map_err(|e| BrowserError::Capture(e.to_string()))?
            .unwrap_or_else(|| "about:blank".to_string());

        Ok(Screenshot {
            base64: STANDARD.encode(&bytes),
            width: self.width,
            height: self.height,
            url,
        })
    }

    async fn execute(&mut self, action: &Action) -> Result<(), ExecutionError> {
        debug!("Executing {}", action.keyword());
        match action {
            Action::Click { x, y } => self.click(*x, *y).await?,
            Action::Type { text } => self.type_text(text).await?,
            Action::Press { key } => self.press_key(key).await?,
            Action::Scroll { dx, dy } => self.scroll(*dx, *dy).await?,
            // Terminal signal; the orchestrator stops before dispatching it.
            Action::Finished => return Ok(()),
        }
        // Let the page react before the next capture.
        tokio::time::sleep(Duration::from_millis(POST_ACTION_SETTLE_MS)).await;
        Ok(())
    }
}
