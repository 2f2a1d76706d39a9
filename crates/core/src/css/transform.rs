//! Bridge between raw CSS text and the owned rule model, plus the
//! operations that rearrange stylesheets: the critical/rest partition,
//! duplicate-aware merging and selector removal.
//!
//! Parsing goes through lightningcss with error recovery enabled, so a
//! broken rule in page CSS degrades to a skipped rule instead of failing
//! the whole run.

use lightningcss::rules::CssRule;
use lightningcss::stylesheet::{ParserOptions, PrinterOptions, StyleSheet};
use lightningcss::traits::ToCss;
use lightningcss::vendor_prefix::VendorPrefix;
use log::debug;

use crate::css::rule::{child_group_prefix, is_matching_media, is_rule_duplicate, rule_key};
use crate::css::{
    CharsetRule, Declaration, FontFaceRule, Keyframe, KeyframesRule, MediaRule, Rule, StyleRule,
    Stylesheet, SupportsRule,
};
use crate::error::{Error, Result};
use crate::extract::{CriticalSelectorMap, SelectorFilter};

/// Parse CSS text into the owned rule model.
///
/// `@charset` is captured up front because lightningcss does not surface
/// it as a rule. With `drop_keyframes` set, `@keyframes` blocks are
/// discarded during conversion; animations hardly ever matter for the
/// first paint and they bloat the output.
pub fn parse(css: &str, drop_keyframes: bool) -> Result<Stylesheet> {
    let charset = leading_charset(css);
    let options = ParserOptions {
        error_recovery: true,
        ..ParserOptions::default()
    };
    let sheet = StyleSheet::parse(css, options).map_err(|e| Error::Parse(e.to_string()))?;

    let mut rules = Vec::new();
    if let Some(charset) = charset {
        rules.push(Rule::Charset(CharsetRule { charset }));
    }
    convert_rules(&sheet.rules.0, drop_keyframes, &mut rules);
    Ok(Stylesheet { rules })
}

/// Render the rule model back to CSS text.
pub fn serialize(sheet: &Stylesheet) -> String {
    sheet.to_css_string()
}

/// `@charset` must be the first thing in a stylesheet; grab it before the
/// parser swallows it.
fn leading_charset(css: &str) -> Option<String> {
    let trimmed = css.trim_start_matches('\u{feff}').trim_start();
    let rest = trimmed.strip_prefix("@charset")?;
    let rest = rest.trim_start().strip_prefix('"')?;
    let (charset, _) = rest.split_once('"')?;
    Some(charset.to_string())
}

fn convert_rules(rules: &[CssRule], drop_keyframes: bool, out: &mut Vec<Rule>) {
    for rule in rules {
        match rule {
            CssRule::Style(style) => {
                let mut selectors = Vec::new();
                for selector in &style.selectors.0 {
                    match selector.to_css_string(PrinterOptions::default()) {
                        Ok(text) => selectors.push(text),
                        Err(error) => debug!("skipping unprintable selector: {error}"),
                    }
                }
                if selectors.is_empty() {
                    continue;
                }
                let mut declarations = Vec::new();
                for property in &style.declarations.declarations {
                    append_declaration(property, false, &mut declarations);
                }
                for property in &style.declarations.important_declarations {
                    append_declaration(property, true, &mut declarations);
                }
                out.push(Rule::Style(StyleRule {
                    selectors,
                    declarations,
                }));
            }
            CssRule::Media(media) => match media.query.to_css_string(PrinterOptions::default()) {
                Ok(condition) => {
                    let mut inner = Vec::new();
                    convert_rules(&media.rules.0, drop_keyframes, &mut inner);
                    out.push(Rule::Media(MediaRule {
                        condition,
                        rules: inner,
                    }));
                }
                Err(error) => debug!("skipping unprintable media query: {error}"),
            },
            CssRule::Supports(supports) => {
                match supports.condition.to_css_string(PrinterOptions::default()) {
                    Ok(condition) => {
                        let mut inner = Vec::new();
                        convert_rules(&supports.rules.0, drop_keyframes, &mut inner);
                        out.push(Rule::Supports(SupportsRule {
                            condition,
                            rules: inner,
                        }));
                    }
                    Err(error) => debug!("skipping unprintable supports condition: {error}"),
                }
            }
            CssRule::FontFace(font_face) => {
                let mut declarations = Vec::new();
                for property in &font_face.properties {
                    match property.to_css_string(PrinterOptions::default()) {
                        Ok(text) => {
                            if let Some(declaration) = split_declaration(&text) {
                                declarations.push(declaration);
                            }
                        }
                        Err(error) => debug!("skipping unprintable font-face property: {error}"),
                    }
                }
                out.push(Rule::FontFace(FontFaceRule { declarations }));
            }
            CssRule::Keyframes(keyframes) => {
                if drop_keyframes {
                    debug!("dropping @keyframes block");
                    continue;
                }
                let name = match keyframes.name.to_css_string(PrinterOptions::default()) {
                    Ok(name) => name,
                    Err(error) => {
                        debug!("skipping unprintable keyframes name: {error}");
                        continue;
                    }
                };
                let mut frames = Vec::new();
                for keyframe in &keyframes.keyframes {
                    let mut selectors = Vec::new();
                    for selector in &keyframe.selectors {
                        match selector.to_css_string(PrinterOptions::default()) {
                            Ok(text) => selectors.push(text),
                            Err(error) => debug!("skipping unprintable keyframe selector: {error}"),
                        }
                    }
                    let mut declarations = Vec::new();
                    for property in &keyframe.declarations.declarations {
                        append_declaration(property, false, &mut declarations);
                    }
                    for property in &keyframe.declarations.important_declarations {
                        append_declaration(property, true, &mut declarations);
                    }
                    frames.push(Keyframe {
                        selectors,
                        declarations,
                    });
                }
                out.push(Rule::Keyframes(KeyframesRule {
                    prefix: vendor_prefix_name(keyframes.vendor_prefix).to_string(),
                    name,
                    frames,
                }));
            }
            CssRule::Ignored => {}
            _ => debug!("dropping unsupported at-rule"),
        }
    }
}

/// Serialize a declaration through the full-property printer so vendor
/// prefixes survive; `property_id().name()` would normalize them away.
fn append_declaration(
    property: &lightningcss::properties::Property<'_>,
    important: bool,
    out: &mut Vec<Declaration>,
) {
    match property.to_css_string(important, PrinterOptions::default()) {
        Ok(text) => {
            if let Some(declaration) = split_declaration(&text) {
                out.push(declaration);
            }
        }
        Err(error) => debug!("skipping unprintable declaration: {error}"),
    }
}

fn split_declaration(text: &str) -> Option<Declaration> {
    let (property, value) = text.split_once(':')?;
    Some(Declaration {
        property: property.trim().to_string(),
        value: value.trim().to_string(),
    })
}

fn vendor_prefix_name(prefix: VendorPrefix) -> &'static str {
    if prefix.contains(VendorPrefix::WebKit) {
        "-webkit-"
    } else if prefix.contains(VendorPrefix::Moz) {
        "-moz-"
    } else if prefix.contains(VendorPrefix::Ms) {
        "-ms-"
    } else if prefix.contains(VendorPrefix::O) {
        "-o-"
    } else {
        ""
    }
}

/// Split `source` into the rules covered by `map` and everything else.
///
/// Style rules keep only the selectors recorded under their key, in source
/// order; leftover selectors go to the rest sheet with the same
/// declarations. Group rules recurse and disappear from a side once empty,
/// so neither output ever contains an empty rule. Font faces and the
/// charset land on both sides (the rule-map subtraction removes the rest
/// copy later), keyframes only ever reach the rest side.
pub fn filter_by_map(source: &Stylesheet, map: &CriticalSelectorMap) -> (Stylesheet, Stylesheet) {
    let (critical, rest) = partition_rules(&source.rules, "", map);
    (Stylesheet { rules: critical }, Stylesheet { rules: rest })
}

fn partition_rules(
    rules: &[Rule],
    prefix: &str,
    map: &CriticalSelectorMap,
) -> (Vec<Rule>, Vec<Rule>) {
    let mut critical = Vec::new();
    let mut rest = Vec::new();
    for rule in rules {
        match rule {
            Rule::Style(style) => {
                let kept: Vec<String> = match rule_key(rule, prefix)
                    .as_deref()
                    .and_then(|key| map.selectors(key))
                {
                    Some(found) => style
                        .selectors
                        .iter()
                        .filter(|selector| found.iter().any(|kept| kept == *selector))
                        .cloned()
                        .collect(),
                    None => Vec::new(),
                };
                if style.declarations.is_empty() {
                    continue;
                }
                let leftover: Vec<String> = style
                    .selectors
                    .iter()
                    .filter(|selector| !kept.iter().any(|k| k == *selector))
                    .cloned()
                    .collect();
                if !kept.is_empty() {
                    critical.push(Rule::Style(StyleRule {
                        selectors: kept,
                        declarations: style.declarations.clone(),
                    }));
                }
                if !leftover.is_empty() {
                    rest.push(Rule::Style(StyleRule {
                        selectors: leftover,
                        declarations: style.declarations.clone(),
                    }));
                }
            }
            Rule::Media(media) => {
                let Some(child) = child_group_prefix(prefix, rule) else {
                    continue;
                };
                let (inner_critical, inner_rest) = partition_rules(&media.rules, &child, map);
                if !inner_critical.is_empty() {
                    critical.push(Rule::Media(MediaRule {
                        condition: media.condition.clone(),
                        rules: inner_critical,
                    }));
                }
                if !inner_rest.is_empty() {
                    rest.push(Rule::Media(MediaRule {
                        condition: media.condition.clone(),
                        rules: inner_rest,
                    }));
                }
            }
            Rule::Supports(supports) => {
                let Some(child) = child_group_prefix(prefix, rule) else {
                    continue;
                };
                let (inner_critical, inner_rest) = partition_rules(&supports.rules, &child, map);
                if !inner_critical.is_empty() {
                    critical.push(Rule::Supports(SupportsRule {
                        condition: supports.condition.clone(),
                        rules: inner_critical,
                    }));
                }
                if !inner_rest.is_empty() {
                    rest.push(Rule::Supports(SupportsRule {
                        condition: supports.condition.clone(),
                        rules: inner_rest,
                    }));
                }
            }
            Rule::FontFace(_) | Rule::Charset(_) => {
                critical.push(rule.clone());
                rest.push(rule.clone());
            }
            Rule::Keyframes(_) => rest.push(rule.clone()),
            Rule::Comment => {}
        }
    }
    (critical, rest)
}

/// Merge `source` into `target`, skipping rules already present.
///
/// Media blocks with equivalent conditions are folded into one bucket and
/// merged recursively; every other rule kind is appended unless
/// [`is_rule_duplicate`] already finds it in the target.
pub fn merge(target: &mut Stylesheet, source: &Stylesheet) {
    for rule in &source.rules {
        merge_rule(&mut target.rules, rule);
    }
}

fn merge_rule(target: &mut Vec<Rule>, rule: &Rule) {
    if let Rule::Media(incoming) = rule {
        for existing in target.iter_mut() {
            if let Rule::Media(bucket) = existing {
                if is_matching_media(&bucket.condition, &incoming.condition) {
                    for inner in &incoming.rules {
                        merge_rule(&mut bucket.rules, inner);
                    }
                    return;
                }
            }
        }
        target.push(rule.clone());
        return;
    }
    if target.iter().any(|existing| is_rule_duplicate(existing, rule)) {
        return;
    }
    target.push(rule.clone());
}

/// Drop every selector matched by `remove`. Rules and group blocks emptied
/// by the removal disappear entirely.
pub fn filter_selectors(sheet: &Stylesheet, remove: &SelectorFilter) -> Stylesheet {
    Stylesheet {
        rules: filter_rules(&sheet.rules, remove),
    }
}

fn filter_rules(rules: &[Rule], remove: &SelectorFilter) -> Vec<Rule> {
    let mut out = Vec::new();
    for rule in rules {
        match rule {
            Rule::Style(style) => {
                let selectors: Vec<String> = style
                    .selectors
                    .iter()
                    .filter(|selector| !remove.matches(selector))
                    .cloned()
                    .collect();
                if !selectors.is_empty() {
                    out.push(Rule::Style(StyleRule {
                        selectors,
                        declarations: style.declarations.clone(),
                    }));
                }
            }
            Rule::Media(media) => {
                let inner = filter_rules(&media.rules, remove);
                if !inner.is_empty() {
                    out.push(Rule::Media(MediaRule {
                        condition: media.condition.clone(),
                        rules: inner,
                    }));
                }
            }
            Rule::Supports(supports) => {
                let inner = filter_rules(&supports.rules, remove);
                if !inner.is_empty() {
                    out.push(Rule::Supports(SupportsRule {
                        condition: supports.condition.clone(),
                        rules: inner,
                    }));
                }
            }
            other => out.push(other.clone()),
        }
    }
    out
}
