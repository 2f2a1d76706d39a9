//! Headless Chrome plumbing behind the [`Engine`] and [`Tab`] seams.
//!
//! The runner only ever talks to the traits, so tests can script page
//! behavior without a browser; [`ChromeEngine`] is the real implementation
//! on top of chromiumoxide.

use std::path::Path;
use std::time::Duration;

use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::emulation::SetScriptExecutionDisabledParams;
use chromiumoxide::cdp::browser_protocol::network::{SetBlockedUrLsParams, SetCacheDisabledParams};
use chromiumoxide::cdp::browser_protocol::page::CaptureScreenshotFormat;
use chromiumoxide::cdp::js_protocol::runtime::EventConsoleApiCalled;
use chromiumoxide::handler::viewport::Viewport;
use chromiumoxide::page::{Page, ScreenshotParams};
use futures::StreamExt;
use log::{debug, info};
use tokio::task::JoinHandle;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::extract;

/// Where a measurement tab should go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NavigationTarget {
    /// Navigate to an address.
    Url(String),
    /// Load markup directly, used for local files.
    Content(String),
}

/// A browser that can hand out measurement tabs.
#[allow(async_fn_in_trait)]
pub trait Engine {
    type Tab: Tab;

    async fn new_page(&self) -> Result<Self::Tab>;

    async fn close(self) -> Result<()>;
}

/// One page under measurement.
#[allow(async_fn_in_trait)]
pub trait Tab {
    /// Apply per-tab settings before the first navigation.
    async fn prepare(&mut self, config: &Config) -> Result<()>;

    async fn navigate(&mut self, target: &NavigationTarget, timeout: Duration) -> Result<()>;

    /// Ask the page which probe selectors match above the fold.
    async fn measure(&mut self, probes: &[String], load_timeout_ms: u64) -> Result<Vec<bool>>;

    /// Harvest the CSS text of every stylesheet the page loaded.
    async fn collect_css(&mut self) -> Result<String>;

    async fn screenshot(&mut self, path: &Path) -> Result<()>;

    async fn close(self) -> Result<()>;
}

/// Chrome instance shared by all tabs of a run.
pub struct ChromeEngine {
    browser: Browser,
    handler_task: JoinHandle<()>,
}

impl ChromeEngine {
    /// Launch Chrome with the run's viewport and window settings.
    pub async fn launch(config: &Config) -> Result<Self> {
        let mut builder = BrowserConfig::builder()
            .viewport(Viewport {
                width: config.device.width,
                height: config.device.height,
                device_scale_factor: Some(config.device.scale_factor),
                emulating_mobile: config.device.is_mobile,
                has_touch: config.device.has_touch,
                is_landscape: config.device.is_landscape,
            })
            .window_size(config.device.width, config.device.height);
        if !config.browser.headless {
            builder = builder.with_head();
        }
        if let Some(path) = &config.browser.chrome_path {
            builder = builder.chrome_executable(path);
        }
        let browser_config = builder.build().map_err(Error::Setup)?;

        let (browser, mut handler) = Browser::launch(browser_config)
            .await
            .map_err(|e| Error::Setup(e.to_string()))?;
        let handler_task = tokio::task::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(error) = event {
                    debug!("browser event error: {error}");
                }
            }
        });

        Ok(Self {
            browser,
            handler_task,
        })
    }
}

impl Engine for ChromeEngine {
    type Tab = ChromeTab;

    async fn new_page(&self) -> Result<Self::Tab> {
        let page = self
            .browser
            .new_page("about:blank")
            .await
            .map_err(|e| Error::PageAcquisition(e.to_string()))?;
        Ok(ChromeTab {
            page,
            console_task: None,
        })
    }

    async fn close(mut self) -> Result<()> {
        self.browser
            .close()
            .await
            .map_err(|e| Error::Setup(e.to_string()))?;
        if let Err(error) = self.browser.wait().await {
            debug!("browser did not exit cleanly: {error}");
        }
        self.handler_task.abort();
        Ok(())
    }
}

/// A chromiumoxide page plus its console forwarding task.
pub struct ChromeTab {
    page: Page,
    console_task: Option<JoinHandle<()>>,
}

impl Tab for ChromeTab {
    async fn prepare(&mut self, config: &Config) -> Result<()> {
        self.page
            .set_user_agent(config.browser.user_agent.clone())
            .await
            .map_err(|e| Error::PageAcquisition(e.to_string()))?;
        if !config.browser.js_enabled {
            self.page
                .execute(SetScriptExecutionDisabledParams::new(true))
                .await
                .map_err(|e| Error::PageAcquisition(e.to_string()))?;
        }
        if !config.browser.cache_enabled {
            self.page
                .execute(SetCacheDisabledParams::new(true))
                .await
                .map_err(|e| Error::PageAcquisition(e.to_string()))?;
        }
        if !config.block_requests.is_empty() {
            let patterns: Vec<String> = config
                .block_requests
                .iter()
                .map(|pattern| format!("*{pattern}*"))
                .collect();
            self.page
                .execute(SetBlockedUrLsParams::new(patterns))
                .await
                .map_err(|e| Error::PageAcquisition(e.to_string()))?;
        }
        if config.browser.print_console {
            let mut events = self
                .page
                .event_listener::<EventConsoleApiCalled>()
                .await
                .map_err(|e| Error::PageAcquisition(e.to_string()))?;
            self.console_task = Some(tokio::task::spawn(async move {
                while let Some(event) = events.next().await {
                    let text = event
                        .args
                        .iter()
                        .filter_map(|arg| arg.value.as_ref())
                        .map(|value| value.to_string())
                        .collect::<Vec<_>>()
                        .join(" ");
                    info!("page console [{:?}]: {text}", event.r#type);
                }
            }));
        }
        Ok(())
    }

    async fn navigate(&mut self, target: &NavigationTarget, timeout: Duration) -> Result<()> {
        let outcome = tokio::time::timeout(timeout, async {
            match target {
                NavigationTarget::Url(url) => {
                    self.page.goto(url.as_str()).await?;
                    self.page.wait_for_navigation().await?;
                }
                NavigationTarget::Content(html) => {
                    self.page.set_content(html.as_str()).await?;
                }
            }
            Ok::<(), chromiumoxide::error::CdpError>(())
        })
        .await;
        match outcome {
            Ok(Ok(())) => Ok(()),
            Ok(Err(error)) => Err(Error::Navigation(error.to_string())),
            Err(_) => Err(Error::Navigation(format!(
                "timed out after {}ms",
                timeout.as_millis()
            ))),
        }
    }

    async fn measure(&mut self, probes: &[String], load_timeout_ms: u64) -> Result<Vec<bool>> {
        let script = extract::measure_script(probes, load_timeout_ms)?;
        let result = self
            .page
            .evaluate(script)
            .await
            .map_err(|e| Error::Evaluation(e.to_string()))?;
        result
            .into_value::<Vec<bool>>()
            .map_err(|e| Error::Evaluation(e.to_string()))
    }

    async fn collect_css(&mut self) -> Result<String> {
        let result = self
            .page
            .evaluate(format!("({COLLECT_CSS_JS})()"))
            .await
            .map_err(|e| Error::Evaluation(e.to_string()))?;
        result
            .into_value::<String>()
            .map_err(|e| Error::Evaluation(e.to_string()))
    }

    async fn screenshot(&mut self, path: &Path) -> Result<()> {
        self.page
            .save_screenshot(
                ScreenshotParams::builder()
                    .format(CaptureScreenshotFormat::Png)
                    .build(),
                path,
            )
            .await
            .map_err(|e| Error::Evaluation(e.to_string()))?;
        Ok(())
    }

    async fn close(self) -> Result<()> {
        if let Some(task) = self.console_task {
            task.abort();
        }
        self.page
            .close()
            .await
            .map_err(|e| Error::PageAcquisition(e.to_string()))?;
        Ok(())
    }
}

/// Collects `cssText` from every same-origin stylesheet on the page.
/// Cross-origin sheets throw on `cssRules` access and are skipped.
const COLLECT_CSS_JS: &str = r#"() => {
    const chunks = [];
    for (const sheet of document.styleSheets) {
        try {
            for (const rule of sheet.cssRules) {
                chunks.push(rule.cssText);
            }
        } catch (e) {
            continue;
        }
    }
    return chunks.join('\n');
}"#;
