//! Run configuration and validation.

use std::path::PathBuf;

use serde::Deserialize;

use crate::error::{Error, Result};

/// Viewport emulation for the measurement pages.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Device {
    /// Viewport width in pixels.
    pub width: u32,
    /// Viewport height in pixels; everything above this line is critical.
    pub height: u32,
    /// Device scale factor.
    pub scale_factor: f64,
    /// Emulate a mobile device.
    pub is_mobile: bool,
    /// Emulate touch support.
    pub has_touch: bool,
    /// Emulate landscape orientation.
    pub is_landscape: bool,
}

impl Default for Device {
    fn default() -> Self {
        Self {
            width: 1200,
            height: 1080,
            scale_factor: 1.0,
            is_mobile: false,
            has_touch: false,
            is_landscape: false,
        }
    }
}

/// Browser-level knobs shared by all tabs of a run.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BrowserOptions {
    /// User-Agent sent with every request.
    pub user_agent: String,
    /// Keep the browser cache enabled.
    pub cache_enabled: bool,
    /// Keep JavaScript enabled while pages load.
    pub js_enabled: bool,
    /// How many tabs measure pages at the same time.
    pub concurrent_tabs: usize,
    /// Run the browser without a visible window.
    pub headless: bool,
    /// Explicit Chrome/Chromium binary instead of the auto-detected one.
    pub chrome_path: Option<PathBuf>,
    /// Forward in-page console messages to the log.
    pub print_console: bool,
}

impl Default for BrowserOptions {
    fn default() -> Self {
        Self {
            user_agent: format!("critcss {}", env!("CARGO_PKG_VERSION")),
            cache_enabled: true,
            js_enabled: true,
            concurrent_tabs: 10,
            headless: true,
            chrome_path: None,
            print_console: false,
        }
    }
}

/// Configuration for one critical CSS run.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// CSS to extract from: inline text, or a path ending in `.css`.
    /// When absent, the stylesheets of the first URL are harvested.
    pub css: Option<String>,
    /// Pages to measure. Plain paths and `file://` URLs load local files.
    pub urls: Vec<String>,
    /// Overall budget per page, navigation included, in milliseconds.
    pub timeout_ms: u64,
    /// How long a page may keep loading subresources before it is stopped.
    pub page_load_timeout_ms: u64,
    /// Settle time between navigation and measurement, in milliseconds.
    pub page_render_timeout_ms: u64,
    /// Viewport emulation.
    pub device: Device,
    /// Browser-level options.
    pub browser: BrowserOptions,
    /// Selectors (literal or `%` wildcard) forced into the critical CSS.
    pub keep_selectors: Vec<String>,
    /// Selectors (literal or `%` wildcard) never treated as critical.
    pub remove_selectors: Vec<String>,
    /// Drop `@keyframes` blocks from both outputs.
    pub drop_keyframes: bool,
    /// Produce the non-critical remainder alongside the critical CSS.
    pub output_remaining_css: bool,
    /// URL fragments whose requests the browser refuses to load.
    pub block_requests: Vec<String>,
    /// Save a screenshot of every measured page.
    pub take_screenshots: bool,
    /// Directory the screenshots go to.
    pub screenshot_path: Option<PathBuf>,
    /// Override for deriving a screenshot file stem from a URL.
    #[serde(skip)]
    pub screenshot_name_generator: Option<fn(&str) -> String>,
    /// Base directory for resolving relative local page paths.
    pub project_root: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            css: None,
            urls: Vec::new(),
            timeout_ms: 30_000,
            page_load_timeout_ms: 2_000,
            page_render_timeout_ms: 300,
            device: Device::default(),
            browser: BrowserOptions::default(),
            keep_selectors: Vec::new(),
            remove_selectors: Vec::new(),
            drop_keyframes: true,
            output_remaining_css: true,
            block_requests: default_blocked_requests(),
            take_screenshots: false,
            screenshot_path: None,
            screenshot_name_generator: None,
            project_root: None,
        }
    }
}

impl Config {
    /// Check the configuration before a run starts, reporting every
    /// problem at once.
    pub fn validate(&self) -> Result<()> {
        let mut issues = Vec::new();
        if self.urls.is_empty() {
            issues.push("at least one url is required".to_string());
        }
        if self.device.width == 0 || self.device.height == 0 {
            issues.push("device dimensions must be non-zero".to_string());
        }
        if self.browser.concurrent_tabs == 0 {
            issues.push("concurrent_tabs must be at least 1".to_string());
        }
        if self.take_screenshots && self.screenshot_path.is_none() {
            issues.push("take_screenshots requires screenshot_path".to_string());
        }
        if issues.is_empty() {
            Ok(())
        } else {
            Err(Error::Config(issues.join("; ")))
        }
    }
}

/// Hosts of trackers and map/ad embeds that slow page loads down without
/// affecting layout.
pub fn default_blocked_requests() -> Vec<String> {
    [
        "maps.gstatic.com",
        "maps.googleapis.com",
        "googletagmanager.com",
        "google-analytics.com",
        "google.",
        "googleadservices.com",
        "generaltracking.de",
        "bing.com",
        "doubleclick.net",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn defaults_match_the_documented_ones() {
        let config = Config::default();
        assert_eq!(config.timeout_ms, 30_000);
        assert_eq!(config.page_load_timeout_ms, 2_000);
        assert_eq!(config.page_render_timeout_ms, 300);
        assert_eq!(config.device.width, 1200);
        assert_eq!(config.device.height, 1080);
        assert_eq!(config.browser.concurrent_tabs, 10);
        assert!(config.browser.headless);
        assert!(config.drop_keyframes);
        assert!(config.output_remaining_css);
        assert!(config.block_requests.contains(&"doubleclick.net".to_string()));
    }

    #[test]
    fn partial_json_configs_keep_defaults_for_the_rest() {
        let config: Config =
            serde_json::from_str(r#"{ "urls": ["https://example.com"], "timeout_ms": 5000 }"#)
                .unwrap();
        assert_eq!(config.urls, ["https://example.com".to_string()]);
        assert_eq!(config.timeout_ms, 5000);
        assert_eq!(config.browser.concurrent_tabs, 10);
    }

    #[test]
    fn validation_collects_every_issue() {
        let config = Config {
            urls: Vec::new(),
            take_screenshots: true,
            browser: BrowserOptions {
                concurrent_tabs: 0,
                ..BrowserOptions::default()
            },
            ..Config::default()
        };
        let error = config.validate().unwrap_err().to_string();
        assert!(error.contains("at least one url"));
        assert!(error.contains("concurrent_tabs"));
        assert!(error.contains("screenshot_path"));
    }

    #[test]
    fn valid_configs_pass() {
        let config = Config {
            urls: vec!["https://example.com".to_string()],
            ..Config::default()
        };
        assert!(config.validate().is_ok());
    }
}
