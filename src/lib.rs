pub mod agent;
pub mod browser;
pub mod config;
pub mod llm;
pub mod trajectory;
