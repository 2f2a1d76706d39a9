//! Host-side extraction flow without a browser: parse the source CSS,
//! build a plan, answer the probes by hand, partition per page and
//! aggregate across pages the way a run does.

use critcss_core::css::rule::content_hash;
use critcss_core::css::rule_map::RuleMap;
use critcss_core::css::{minify, transform, Stylesheet};
use critcss_core::extract::{CriticalSelectorMap, ExtractionPlan, SelectorFilter};

const TWO_PAGE_CSS: &str = "\
.a { margin-top: 1px; }\n\
.b { margin-top: 2px; }\n\
@media (min-width: 800px) {\n  .a { margin-top: 3px; }\n}\n";

fn no_filter() -> SelectorFilter {
    SelectorFilter::new(&[])
}

fn filter(patterns: &[&str]) -> SelectorFilter {
    let owned: Vec<String> = patterns.iter().map(|p| p.to_string()).collect();
    SelectorFilter::new(&owned)
}

/// Answer every probe of `plan` with "was it in the visible set".
fn resolve_with(plan: &ExtractionPlan, visible: &[&str]) -> CriticalSelectorMap {
    let results: Vec<bool> = plan
        .probes()
        .iter()
        .map(|probe| visible.contains(&probe.as_str()))
        .collect();
    plan.resolve(&results).unwrap()
}

/// Fold per-page partitions the way the runner does and return the
/// serialized (critical, rest) pair.
fn aggregate(source: &Stylesheet, maps: &[CriticalSelectorMap]) -> (String, String) {
    let mut critical = RuleMap::new();
    let mut rest = RuleMap::new();
    for map in maps {
        let (page_critical, page_rest) = transform::filter_by_map(source, map);
        critical.insert_stylesheet(&page_critical);
        rest.insert_stylesheet(&page_rest);
    }
    rest.subtract(&critical);
    (
        transform::serialize(&critical.to_stylesheet().unwrap()),
        transform::serialize(&rest.to_stylesheet().unwrap()),
    )
}

#[test]
fn two_pages_union_their_critical_rules() {
    let source = transform::parse(TWO_PAGE_CSS, true).unwrap();

    // Page one saw .a above the fold, page two saw .b; the media block
    // was critical on neither.
    let mut page_one = CriticalSelectorMap::new();
    page_one.add(".a", ".a");
    let mut page_two = CriticalSelectorMap::new();
    page_two.add(".b", ".b");

    let (critical, rest) = aggregate(&source, &[page_one, page_two]);

    assert_eq!(
        minify::minify(&critical).unwrap(),
        ".a{margin-top:1px}.b{margin-top:2px}"
    );
    let rest_min = minify::minify(&rest).unwrap();
    assert!(rest_min.contains("@media"), "rest should keep the media block: {rest_min}");
    assert!(rest_min.contains("min-width:800px"));
    assert!(rest_min.contains("margin-top:3px"));
    assert!(!rest_min.contains("margin-top:1px"), "critical rules must leave the rest: {rest_min}");
    assert!(!rest_min.contains("margin-top:2px"));
}

#[test]
fn measuring_the_same_page_twice_changes_nothing() {
    let source = transform::parse(TWO_PAGE_CSS, true).unwrap();
    let plan = ExtractionPlan::build(&source, &no_filter(), &no_filter());
    let map = resolve_with(&plan, &[".a"]);

    let once = aggregate(&source, &[map.clone()]);
    let twice = aggregate(&source, &[map.clone(), map]);
    assert_eq!(once, twice);
}

#[test]
fn page_order_does_not_change_the_rule_set() {
    let source = transform::parse(TWO_PAGE_CSS, true).unwrap();
    let plan = ExtractionPlan::build(&source, &no_filter(), &no_filter());
    let map_a = resolve_with(&plan, &[".a"]);
    let map_b = resolve_with(&plan, &[".b"]);

    let sheets = |maps: &[CriticalSelectorMap]| {
        let mut rules = RuleMap::new();
        for map in maps {
            let (critical, _) = transform::filter_by_map(&source, map);
            rules.insert_stylesheet(&critical);
        }
        let mut hashes: Vec<u64> = rules
            .to_stylesheet()
            .unwrap()
            .rules
            .iter()
            .map(content_hash)
            .collect();
        hashes.sort_unstable();
        hashes
    };

    assert_eq!(
        sheets(&[map_a.clone(), map_b.clone()]),
        sheets(&[map_b, map_a])
    );
}

#[test]
fn nested_group_conditions_join_in_the_rule_key() {
    let css = "@media (min-width: 800px) {\
                   @supports (display: grid) { .grid { display: grid; } }\
               }";
    let source = transform::parse(css, true).unwrap();
    let plan = ExtractionPlan::build(&source, &no_filter(), &no_filter());

    assert_eq!(plan.probes(), [".grid".to_string()]);
    let map = plan.resolve(&[true]).unwrap();
    assert!(map.contains_key("media(min-width: 800px)-##-supports(display: grid).grid"));

    let (critical, rest) = transform::filter_by_map(&source, &map);
    assert_eq!(critical.rules.len(), 1);
    assert!(rest.is_empty());
    let css_out = transform::serialize(&critical);
    assert!(css_out.contains("@media (min-width: 800px)"));
    assert!(css_out.contains("@supports (display: grid)"));
    assert!(css_out.contains(".grid"));
}

#[test]
fn forced_selectors_override_the_probe_verdicts() {
    let css = ".hero-banner { margin: 0; } .tracker { margin: 0; } .plain { margin: 0; }";
    let source = transform::parse(css, true).unwrap();
    let keep = filter(&[".hero%"]);
    let remove = filter(&[".tracker"]);
    let plan = ExtractionPlan::build(&source, &keep, &remove);

    // Only .tracker and .plain would probe; say everything is visible.
    let results = vec![true; plan.probes().len()];
    let map = plan.resolve(&results).unwrap();

    let (critical, rest) = transform::filter_by_map(&source, &map);
    let css_out = transform::serialize(&critical);
    assert!(css_out.contains(".hero-banner"), "kept by wildcard: {css_out}");
    assert!(css_out.contains(".plain"));
    assert!(!css_out.contains(".tracker"), "removed despite being visible: {css_out}");

    // Excluded from the critical side only; the rule itself is still valid
    // CSS and stays available below the fold.
    assert!(transform::serialize(&rest).contains(".tracker"));
}

#[test]
fn charset_and_vendor_prefixes_survive_to_the_minified_output() {
    let css = "@charset \"utf-8\";\n\
               .v { -webkit-transform: scale(1); }\n\
               @font-face { font-family: Roboto; src: url(\"/r.woff2\"); }\n";
    let source = transform::parse(css, true).unwrap();
    let mut map = CriticalSelectorMap::new();
    map.add(".v", ".v");

    let (critical, rest) = aggregate(&source, &[map]);

    let critical_min = minify::minify(&critical).unwrap();
    assert!(critical_min.starts_with("@charset \"utf-8\";"));
    assert!(critical_min.contains("-webkit-transform"));
    assert!(critical_min.contains("@font-face"));

    // The support rules were claimed by the critical side; nothing is left.
    assert_eq!(minify::minify(&rest).unwrap(), "");
}

#[test]
fn keyframes_only_ever_reach_the_rest_output() {
    let css = ".a { margin: 0; } @keyframes spin { to { opacity: 1; } }";
    let source = transform::parse(css, false).unwrap();
    let mut map = CriticalSelectorMap::new();
    map.add(".a", ".a");

    let (critical, rest) = aggregate(&source, &[map]);
    assert!(!critical.contains("@keyframes"));
    assert!(rest.contains("@keyframes spin"));

    let dropped = transform::parse(css, true).unwrap();
    let body: Vec<_> = dropped.rules.iter().filter(|r| r.is_keyframes()).collect();
    assert!(body.is_empty());
}
