//! Error taxonomy for a critical-CSS run.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Everything that can go wrong during a run.
///
/// `Config`, `Setup`, `Parse` and `Aggregation` fail the run outright.
/// `PageAcquisition`, `Navigation` and `Evaluation` are per-page: the runner
/// recovers them, logs a warning and reports them in
/// [`RunReport::failures`](crate::runner::RunReport); the run itself only
/// fails when no page succeeded.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid run configuration, detected before any browser is launched.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Loading the CSS source or launching the browser failed.
    #[error("setup failed: {0}")]
    Setup(String),

    /// A fresh tab could not be obtained from the browser.
    #[error("could not open page: {0}")]
    PageAcquisition(String),

    /// Navigation failed or timed out.
    #[error("navigation failed: {0}")]
    Navigation(String),

    /// The in-page measurement script failed or returned garbage.
    #[error("page evaluation failed: {0}")]
    Evaluation(String),

    /// The CSS source could not be parsed.
    #[error("css parse error: {0}")]
    Parse(String),

    /// A rule-map invariant broke while folding or materializing rules.
    #[error("aggregation error: {0}")]
    Aggregation(String),

    /// The run finished without producing any critical CSS.
    #[error("critical css extraction failed: {0}")]
    NoCriticalCss(String),
}
