pub mod browser;
pub mod config;
pub mod css;
pub mod error;
pub mod extract;
pub mod runner;

pub use config::{BrowserOptions, Config, Device};
pub use error::{Error, Result};
pub use runner::{run, PageFailure, RunReport};

/// Extract the above-the-fold CSS for a set of pages.
/// This is the primary entry point for critcss-core.
pub async fn extract_critical(config: Config) -> Result<RunReport> {
    runner::run(config).await
}
