use std::path::{Path, PathBuf};

use clap::Parser;
use critcss_core::{extract_critical, Config};
use log::info;

#[derive(Parser)]
#[command(
    name = "critcss",
    about = "Extract above-the-fold critical CSS for a set of pages"
)]
struct Cli {
    /// Page to measure (repeatable)
    #[arg(long = "url", value_name = "URL")]
    urls: Vec<String>,

    /// CSS source: a .css file or inline CSS (default: harvest from the first page)
    #[arg(long)]
    css: Option<String>,

    /// JSON configuration file; command line flags override its values
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Write the critical CSS here instead of stdout
    #[arg(long, value_name = "FILE")]
    out: Option<PathBuf>,

    /// Write the remaining CSS here
    #[arg(long, value_name = "FILE")]
    rest_out: Option<PathBuf>,

    /// Viewport size as WxH (default: 1200x1080)
    #[arg(long)]
    viewport: Option<String>,

    /// Selector always kept in the critical CSS, % acts as a wildcard (repeatable)
    #[arg(long = "keep", value_name = "SELECTOR")]
    keep: Vec<String>,

    /// Selector never treated as critical, % acts as a wildcard (repeatable)
    #[arg(long = "remove", value_name = "SELECTOR")]
    remove: Vec<String>,

    /// How many tabs measure pages at once
    #[arg(long)]
    concurrency: Option<usize>,

    /// Per-page budget in milliseconds, navigation included
    #[arg(long)]
    timeout: Option<u64>,

    /// Keep @keyframes blocks instead of dropping them
    #[arg(long)]
    keep_keyframes: bool,

    /// Skip producing the remaining CSS
    #[arg(long)]
    no_rest: bool,

    /// Save a screenshot of every measured page into this directory
    #[arg(long, value_name = "DIR")]
    screenshot_dir: Option<PathBuf>,

    /// Chrome/Chromium binary to launch
    #[arg(long, value_name = "PATH")]
    chrome: Option<PathBuf>,

    /// Show the browser window while measuring
    #[arg(long)]
    headful: bool,

    /// Forward in-page console messages to the log
    #[arg(long)]
    print_console: bool,
}

fn parse_viewport(s: &str) -> (u32, u32) {
    let parts: Vec<&str> = s.split('x').collect();
    if parts.len() == 2 {
        let w = parts[0].parse().unwrap_or(1200);
        let h = parts[1].parse().unwrap_or(1080);
        (w, h)
    } else {
        (1200, 1080)
    }
}

fn build_config(cli: &Cli) -> Config {
    let mut config = match &cli.config {
        Some(path) => {
            let text = std::fs::read_to_string(path).expect("Failed to read config file");
            serde_json::from_str(&text).expect("Failed to parse config file")
        }
        None => Config::default(),
    };

    if !cli.urls.is_empty() {
        config.urls = cli.urls.clone();
    }
    if let Some(css) = &cli.css {
        config.css = Some(css.clone());
    }
    if let Some(viewport) = &cli.viewport {
        let (width, height) = parse_viewport(viewport);
        config.device.width = width;
        config.device.height = height;
    }
    if !cli.keep.is_empty() {
        config.keep_selectors = cli.keep.clone();
    }
    if !cli.remove.is_empty() {
        config.remove_selectors = cli.remove.clone();
    }
    if let Some(concurrency) = cli.concurrency {
        config.browser.concurrent_tabs = concurrency;
    }
    if let Some(timeout) = cli.timeout {
        config.timeout_ms = timeout;
    }
    if cli.keep_keyframes {
        config.drop_keyframes = false;
    }
    if cli.no_rest {
        config.output_remaining_css = false;
    }
    if let Some(dir) = &cli.screenshot_dir {
        config.take_screenshots = true;
        config.screenshot_path = Some(dir.clone());
    }
    if let Some(chrome) = &cli.chrome {
        config.browser.chrome_path = Some(chrome.clone());
    }
    if cli.headful {
        config.browser.headless = false;
    }
    if cli.print_console {
        config.browser.print_console = true;
    }
    config
}

#[tokio::main]
async fn main() {
    env_logger::init();

    let cli = Cli::parse();
    let config = build_config(&cli);
    let page_count = config.urls.len();

    match extract_critical(config).await {
        Ok(report) => {
            for failure in &report.failures {
                eprintln!("warning: skipped {}: {}", failure.url, failure.error);
            }
            info!(
                "{} of {page_count} pages measured",
                page_count - report.failures.len()
            );
            match cli.out.as_deref() {
                Some(path) => write_file(path, &report.critical),
                None => println!("{}", report.critical),
            }
            if let Some(path) = cli.rest_out.as_deref() {
                write_file(path, &report.rest);
            }
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}

fn write_file(path: &Path, text: &str) {
    if let Err(e) = std::fs::write(path, text) {
        eprintln!("Error: could not write {}: {}", path.display(), e);
        std::process::exit(1);
    }
}
