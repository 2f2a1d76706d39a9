//! Selector classification and the per-page measurement plan.
//!
//! The stylesheet walk happens host-side: each selector is either force
//! excluded, force included, pure pseudo (critical by definition), or turned
//! into a DOM probe. Only the cleaned probe selectors cross into the page,
//! which answers with one boolean per probe; [`ExtractionPlan::resolve`]
//! folds the answers back into a [`CriticalSelectorMap`].

use std::collections::HashMap;

use log::{debug, warn};
use regex::Regex;

use crate::css::rule::{child_group_prefix, rule_key};
use crate::css::{Rule, Stylesheet};
use crate::error::{Error, Result};

/// Pseudo parts stripped from selectors before probing the DOM.
const CLEANED_PSEUDOS: &[&str] = &[
    "after",
    "before",
    "first-line",
    "first-letter",
    "selection",
    "visited",
];

/// Pseudo parts that disqualify a selector from pure-pseudo treatment.
const EXCLUDED_PSEUDOS: &[&str] = &["root"];

/// Matches selectors against literal strings or `%` wildcard patterns.
/// Patterns are anchored at both ends; `%` stands for any run of characters
/// and every other character matches literally.
#[derive(Debug, Default)]
pub struct SelectorFilter {
    patterns: Vec<FilterPattern>,
}

#[derive(Debug)]
struct FilterPattern {
    raw: String,
    regex: Option<Regex>,
}

impl SelectorFilter {
    pub fn new(patterns: &[String]) -> Self {
        let patterns = patterns
            .iter()
            .map(|raw| {
                let anchored = format!("^{}$", regex::escape(raw).replace('%', ".*"));
                let regex = match Regex::new(&anchored) {
                    Ok(regex) => Some(regex),
                    Err(error) => {
                        warn!("unusable selector pattern {raw:?}: {error}");
                        None
                    }
                };
                FilterPattern {
                    raw: raw.clone(),
                    regex,
                }
            })
            .collect();
        Self { patterns }
    }

    pub fn matches(&self, selector: &str) -> bool {
        self.patterns.iter().any(|pattern| {
            pattern.raw == selector
                || pattern
                    .regex
                    .as_ref()
                    .is_some_and(|regex| regex.is_match(selector))
        })
    }
}

/// Remove `:name` / `::name` occurrences for the given pseudo names.
fn strip_pseudo_names(selector: &str, names: &[&str]) -> String {
    let mut out = String::with_capacity(selector.len());
    let mut rest = selector;
    while let Some(pos) = rest.find(':') {
        out.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];
        let body = after.strip_prefix(':').unwrap_or(after);
        if let Some(name) = names.iter().find(|name| body.starts_with(**name)) {
            rest = &body[name.len()..];
        } else {
            out.push(':');
            rest = after;
        }
    }
    out.push_str(rest);
    out
}

/// Remove vendor pseudo suffixes (`:-moz-...`, `::-webkit-...`).
fn strip_browser_pseudos(selector: &str) -> String {
    let mut out = String::with_capacity(selector.len());
    let mut rest = selector;
    while let Some(pos) = rest.find(':') {
        out.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];
        let body = after.strip_prefix(':').unwrap_or(after);
        if let Some(tail) = body.strip_prefix('-') {
            let end = tail
                .find(|c: char| !(c.is_ascii_lowercase() || c == '-'))
                .unwrap_or(tail.len());
            rest = &tail[end..];
        } else {
            out.push(':');
            rest = after;
        }
    }
    out.push_str(rest);
    out
}

/// Strip the pseudo parts that would make `querySelectorAll` miss elements
/// that still get the rule's styling (`:after`, `:visited`, vendor pseudos).
pub fn clean_selector(selector: &str) -> String {
    let cleaned = strip_pseudo_names(selector, CLEANED_PSEUDOS);
    let cleaned = strip_browser_pseudos(&cleaned);
    strip_pseudo_names(&cleaned, EXCLUDED_PSEUDOS)
}

/// A selector consisting only of pseudo parts (starts with `:`). These
/// cannot be matched against DOM nodes and are conservatively critical,
/// except for the excluded pseudos such as `:root`.
pub fn is_pure_pseudo(selector: &str) -> bool {
    selector.starts_with(':') && !selector.contains(":root")
}

/// Insertion-ordered map from rule key to the selectors found critical on a
/// page. Produced by [`ExtractionPlan::resolve`], consumed by the partition.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CriticalSelectorMap {
    keys: Vec<String>,
    entries: HashMap<String, Vec<String>>,
}

impl CriticalSelectorMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Record `selector` as critical under `key`, deduplicating on insert.
    pub fn add(&mut self, key: &str, selector: &str) {
        if !self.entries.contains_key(key) {
            self.keys.push(key.to_string());
        }
        let bucket = self.entries.entry(key.to_string()).or_default();
        if !bucket.iter().any(|existing| existing == selector) {
            bucket.push(selector.to_string());
        }
    }

    pub fn selectors(&self, key: &str) -> Option<&[String]> {
        self.entries.get(key).map(Vec::as_slice)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.keys.iter().map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq)]
enum SelectorAction {
    Critical,
    Probe(usize),
}

#[derive(Debug, Clone)]
struct PlanStep {
    key: String,
    selector: String,
    action: SelectorAction,
}

/// One walk over the source stylesheet, shared by every page of a run.
///
/// Selectors are classified in order: force-exclude wins over force-include,
/// force-include wins over the visibility probe, pure pseudos are critical
/// without probing. Probes are deduplicated so the page answers each cleaned
/// selector once.
#[derive(Debug, Default)]
pub struct ExtractionPlan {
    probes: Vec<String>,
    steps: Vec<PlanStep>,
}

impl ExtractionPlan {
    pub fn build(source: &Stylesheet, keep: &SelectorFilter, remove: &SelectorFilter) -> Self {
        let mut plan = ExtractionPlan::default();
        let mut probe_index = HashMap::new();
        plan.walk(&source.rules, "", keep, remove, &mut probe_index);
        plan
    }

    fn walk(
        &mut self,
        rules: &[Rule],
        prefix: &str,
        keep: &SelectorFilter,
        remove: &SelectorFilter,
        probe_index: &mut HashMap<String, usize>,
    ) {
        for rule in rules {
            match rule {
                Rule::Media(media) => {
                    if let Some(child) = child_group_prefix(prefix, rule) {
                        self.walk(&media.rules, &child, keep, remove, probe_index);
                    }
                }
                Rule::Supports(supports) => {
                    if let Some(child) = child_group_prefix(prefix, rule) {
                        self.walk(&supports.rules, &child, keep, remove, probe_index);
                    }
                }
                Rule::Style(style) => {
                    let Some(key) = rule_key(rule, prefix) else {
                        continue;
                    };
                    for selector in &style.selectors {
                        if remove.matches(selector) {
                            continue;
                        }
                        let action = if keep.matches(selector) || is_pure_pseudo(selector) {
                            SelectorAction::Critical
                        } else {
                            let cleaned = clean_selector(selector);
                            let next = self.probes.len();
                            let index = *probe_index.entry(cleaned.clone()).or_insert(next);
                            if index == next {
                                self.probes.push(cleaned);
                            }
                            SelectorAction::Probe(index)
                        };
                        self.steps.push(PlanStep {
                            key: key.clone(),
                            selector: selector.clone(),
                            action,
                        });
                    }
                }
                other => {
                    debug!("unprocessed rule type in extraction walk: {}", other.type_name());
                }
            }
        }
    }

    /// Cleaned selectors the page must be asked about, in first-need order.
    pub fn probes(&self) -> &[String] {
        &self.probes
    }

    /// Fold per-probe verdicts back into the critical-selector map.
    /// `results[i]` answers `probes()[i]`.
    pub fn resolve(&self, results: &[bool]) -> Result<CriticalSelectorMap> {
        if results.len() != self.probes.len() {
            return Err(Error::Aggregation(format!(
                "expected {} probe results, got {}",
                self.probes.len(),
                results.len()
            )));
        }
        let mut map = CriticalSelectorMap::new();
        for step in &self.steps {
            let critical = match step.action {
                SelectorAction::Critical => true,
                SelectorAction::Probe(index) => results.get(index).copied().unwrap_or(false),
            };
            if critical {
                map.add(&step.key, &step.selector);
            }
        }
        Ok(map)
    }
}

/// In-page probe routine. For each selector: invalid selectors report false
/// instead of throwing, otherwise any matching element whose bounding box
/// starts above the viewport height makes it critical. Elements measured
/// critical once are memoized across probes, and a watchdog halts further
/// page loading once the load timeout elapses.
const MEASURE_JS: &str = r#"(args) => {
    const probes = args.probes;
    const loadTimeout = args.loadTimeout;
    const height = window.innerHeight;
    const criticalNodes = new Set();

    const stopPageLoadAfterTimeout = (start, timeout) => {
        window.requestAnimationFrame(() => {
            const timePassed = Date.now() - start;
            if (timePassed >= timeout) {
                window.stop();
            } else {
                stopPageLoadAfterTimeout(start, timeout);
            }
        });
    };
    stopPageLoadAfterTimeout(Date.now(), loadTimeout);

    const isElementAboveTheFold = element => {
        if (criticalNodes.has(element)) return true;
        const isAboveTheFold = element.getBoundingClientRect().top < height;
        if (isAboveTheFold) {
            criticalNodes.add(element);
            return true;
        }
        return false;
    };

    return probes.map(selector => {
        let elements;
        try {
            elements = document.querySelectorAll(selector);
        } catch (e) {
            return false;
        }
        for (const element of elements) {
            if (isElementAboveTheFold(element)) return true;
        }
        return false;
    });
}"#;

/// Build the `evaluate()` expression for one measurement call.
pub fn measure_script(probes: &[String], load_timeout_ms: u64) -> Result<String> {
    let args = serde_json::json!({ "probes": probes, "loadTimeout": load_timeout_ms });
    let payload = serde_json::to_string(&args).map_err(|e| Error::Evaluation(e.to_string()))?;
    Ok(format!("({MEASURE_JS})({payload})"))
}
