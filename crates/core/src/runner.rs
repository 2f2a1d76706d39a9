//! The run orchestrator: source CSS acquisition, concurrent page
//! measurement, aggregation and final output.

use std::path::PathBuf;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use log::{debug, info, warn};

use crate::browser::{ChromeEngine, Engine, NavigationTarget, Tab};
use crate::config::Config;
use crate::css::rule_map::RuleMap;
use crate::css::{media_sort, minify, transform, Stylesheet};
use crate::error::{Error, Result};
use crate::extract::{ExtractionPlan, SelectorFilter};

/// Opening a tab occasionally fails on a busy browser; try a few times.
const PAGE_OPEN_ATTEMPTS: u32 = 3;

/// Outcome of a run: the minified critical CSS, the remainder, and the
/// pages that dropped out along the way.
#[derive(Debug)]
pub struct RunReport {
    pub critical: String,
    pub rest: String,
    pub failures: Vec<PageFailure>,
}

/// A page that could not be measured, with the reason.
#[derive(Debug)]
pub struct PageFailure {
    pub url: String,
    pub error: Error,
}

/// Launch a browser, measure every configured page and aggregate the
/// critical CSS across them.
pub async fn run(config: Config) -> Result<RunReport> {
    config.validate()?;
    let engine = ChromeEngine::launch(&config).await?;
    let report = run_with_engine(&engine, &config).await;
    if let Err(error) = engine.close().await {
        debug!("browser shutdown failed: {error}");
    }
    report
}

/// Run against an already launched engine. Pages are measured with up to
/// `concurrent_tabs` tabs at once; results are folded in configuration
/// order, so the output does not depend on which page finishes first.
pub async fn run_with_engine<E: Engine>(engine: &E, config: &Config) -> Result<RunReport> {
    let css = load_css_source(engine, config).await?;
    let source = match transform::parse(&css, config.drop_keyframes) {
        Ok(sheet) => sheet,
        Err(error) => {
            warn!("source css did not parse, continuing with an empty sheet: {error}");
            Stylesheet::default()
        }
    };
    let keep = SelectorFilter::new(&config.keep_selectors);
    let remove = SelectorFilter::new(&config.remove_selectors);
    let plan = ExtractionPlan::build(&source, &keep, &remove);

    let concurrency = config.browser.concurrent_tabs.max(1);
    let plan_ref = &plan;
    let source_ref = &source;
    let mut outcomes: Vec<_> = stream::iter(config.urls.iter().enumerate())
        .map(|(index, url)| async move {
            let outcome = evaluate_url(engine, config, source_ref, plan_ref, url).await;
            (index, outcome)
        })
        .buffer_unordered(concurrency)
        .collect()
        .await;
    outcomes.sort_by_key(|(index, _)| *index);

    let mut critical_map = RuleMap::new();
    let mut rest_map = RuleMap::new();
    let mut failures = Vec::new();
    let mut succeeded = 0usize;
    for ((_, outcome), url) in outcomes.into_iter().zip(&config.urls) {
        match outcome {
            Ok((critical, rest)) => {
                succeeded += 1;
                critical_map.insert_stylesheet(&critical);
                if config.output_remaining_css {
                    rest_map.insert_stylesheet(&rest);
                }
            }
            Err(error) => {
                warn!("skipping {url}: {error}");
                failures.push(PageFailure {
                    url: url.clone(),
                    error,
                });
            }
        }
    }
    if succeeded == 0 {
        return Err(Error::NoCriticalCss(format!(
            "all {} pages failed",
            config.urls.len()
        )));
    }

    rest_map.subtract(&critical_map);

    let mut critical_sheet = critical_map.to_stylesheet()?;
    media_sort::sort_media_queries(&mut critical_sheet);
    let critical = minify::minify(&transform::serialize(&critical_sheet))?;
    if critical.trim().is_empty() {
        return Err(Error::NoCriticalCss(
            "no rules were found above the fold".to_string(),
        ));
    }

    let rest = if config.output_remaining_css {
        let mut rest_sheet = rest_map.to_stylesheet()?;
        media_sort::sort_media_queries(&mut rest_sheet);
        minify::minify(&transform::serialize(&rest_sheet))?
    } else {
        String::new()
    };

    info!(
        "critical css: {} bytes, rest: {} bytes, {succeeded} of {} pages measured",
        critical.len(),
        rest.len(),
        config.urls.len()
    );
    Ok(RunReport {
        critical,
        rest,
        failures,
    })
}

/// Source CSS for the run: the inline text or `.css` file from the
/// configuration, or the stylesheets harvested from the first page.
async fn load_css_source<E: Engine>(engine: &E, config: &Config) -> Result<String> {
    if let Some(css) = &config.css {
        if css.ends_with(".css") {
            let path = resolve_local(css, config);
            let text = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| Error::Setup(format!("could not read {}: {e}", path.display())))?;
            if text.trim().is_empty() {
                return Err(Error::Setup(format!("no css content in {}", path.display())));
            }
            return Ok(text);
        }
        if css.trim().is_empty() {
            return Err(Error::Setup("css option is empty".to_string()));
        }
        return Ok(css.clone());
    }

    let Some(url) = config.urls.first() else {
        return Err(Error::Setup("no urls to harvest css from".to_string()));
    };
    info!("no css supplied, harvesting stylesheets from {url}");
    let target = resolve_target(url, config).await?;
    let mut tab = retry(PAGE_OPEN_ATTEMPTS, || engine.new_page()).await?;
    let outcome = harvest_css(&mut tab, &target, config).await;
    if let Err(error) = tab.close().await {
        debug!("tab shutdown failed: {error}");
    }
    let css = outcome?;
    if css.trim().is_empty() {
        return Err(Error::Setup(format!("no stylesheets found on {url}")));
    }
    Ok(css)
}

async fn harvest_css<T: Tab>(
    tab: &mut T,
    target: &NavigationTarget,
    config: &Config,
) -> Result<String> {
    tab.prepare(config).await?;
    tab.navigate(target, Duration::from_millis(config.timeout_ms))
        .await?;
    tab.collect_css().await
}

/// Measure one page on a fresh tab and partition the source stylesheet
/// with what it reports.
async fn evaluate_url<E: Engine>(
    engine: &E,
    config: &Config,
    source: &Stylesheet,
    plan: &ExtractionPlan,
    url: &str,
) -> Result<(Stylesheet, Stylesheet)> {
    let target = resolve_target(url, config).await?;
    let mut tab = retry(PAGE_OPEN_ATTEMPTS, || engine.new_page()).await?;
    let outcome = evaluate_on_tab(&mut tab, config, source, plan, url, &target).await;
    if let Err(error) = tab.close().await {
        debug!("tab shutdown failed for {url}: {error}");
    }
    outcome
}

async fn evaluate_on_tab<T: Tab>(
    tab: &mut T,
    config: &Config,
    source: &Stylesheet,
    plan: &ExtractionPlan,
    url: &str,
    target: &NavigationTarget,
) -> Result<(Stylesheet, Stylesheet)> {
    tab.prepare(config).await?;
    tab.navigate(target, Duration::from_millis(config.timeout_ms))
        .await?;
    if config.page_render_timeout_ms > 0 {
        tokio::time::sleep(Duration::from_millis(config.page_render_timeout_ms)).await;
    }
    if config.take_screenshots {
        if let Some(dir) = &config.screenshot_path {
            let file = dir.join(format!("{}.png", screenshot_stem(config, url)));
            if let Err(error) = tab.screenshot(&file).await {
                warn!("screenshot of {url} failed: {error}");
            }
        }
    }
    let results = tab
        .measure(plan.probes(), config.page_load_timeout_ms)
        .await?;
    let map = plan.resolve(&results)?;
    debug!("{url}: {} critical rule keys", map.len());
    Ok(transform::filter_by_map(source, &map))
}

/// Decide how a configured page address is loaded. Network addresses
/// navigate directly; `file://` URLs and existing local paths are read and
/// pushed into the tab as markup.
async fn resolve_target(url: &str, config: &Config) -> Result<NavigationTarget> {
    if url.starts_with("http://") || url.starts_with("https://") {
        return Ok(NavigationTarget::Url(url.to_string()));
    }
    let path_part = url.strip_prefix("file://").unwrap_or(url);
    let trimmed = path_part.split(['?', '#']).next().unwrap_or(path_part);
    let path = resolve_local(trimmed, config);
    if path.exists() {
        let html = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| Error::Navigation(format!("could not read {}: {e}", path.display())))?;
        Ok(NavigationTarget::Content(html))
    } else if url.starts_with("file://") {
        Err(Error::Navigation(format!(
            "local file {} does not exist",
            path.display()
        )))
    } else {
        Ok(NavigationTarget::Url(url.to_string()))
    }
}

fn resolve_local(path: &str, config: &Config) -> PathBuf {
    let path = PathBuf::from(path);
    if path.is_relative() {
        if let Some(root) = &config.project_root {
            return root.join(path);
        }
    }
    path
}

fn screenshot_stem(config: &Config, url: &str) -> String {
    match config.screenshot_name_generator {
        Some(generator) => generator(url),
        None => url
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect(),
    }
}

/// Retry an async operation a fixed number of times, keeping the last
/// error.
async fn retry<T, F, Fut>(attempts: u32, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let mut last = None;
    for attempt in 1..=attempts {
        match op().await {
            Ok(value) => return Ok(value),
            Err(error) => {
                debug!("attempt {attempt} of {attempts} failed: {error}");
                last = Some(error);
            }
        }
    }
    Err(last.unwrap_or_else(|| Error::Setup("retry with zero attempts".to_string())))
}
