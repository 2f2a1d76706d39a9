//! Per-rule identities and comparisons: type predicates, rule keys, content
//! hashing, duplicate detection and media-condition equivalence.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use crate::css::{Declaration, Rule};

/// Marker prepended to rule-map keys of `@media` buckets.
pub const MEDIA_PREFIX: &str = "@media ";

/// Marker prepended to rule-map keys of `@supports` buckets.
pub const SUPPORTS_PREFIX: &str = "@supports ";

/// Joins nested group conditions inside extraction keys.
pub const GROUP_SEPARATOR: &str = "-##-";

impl Rule {
    pub fn is_style(&self) -> bool {
        matches!(self, Rule::Style(_))
    }

    pub fn is_media(&self) -> bool {
        matches!(self, Rule::Media(_))
    }

    pub fn is_supports(&self) -> bool {
        matches!(self, Rule::Supports(_))
    }

    pub fn is_font_face(&self) -> bool {
        matches!(self, Rule::FontFace(_))
    }

    pub fn is_keyframes(&self) -> bool {
        matches!(self, Rule::Keyframes(_))
    }

    pub fn is_charset(&self) -> bool {
        matches!(self, Rule::Charset(_))
    }

    pub fn is_comment(&self) -> bool {
        matches!(self, Rule::Comment)
    }

    /// Short tag used in log lines.
    pub fn type_name(&self) -> &'static str {
        match self {
            Rule::Style(_) => "rule",
            Rule::Media(_) => "media",
            Rule::Supports(_) => "supports",
            Rule::FontFace(_) => "font-face",
            Rule::Keyframes(_) => "keyframes",
            Rule::Charset(_) => "charset",
            Rule::Comment => "comment",
        }
    }
}

/// Strip the implicit "all and " prefix from a media condition.
/// `@media all and (min-width: 800px)` and `@media (min-width: 800px)`
/// select identically.
pub fn normalize_media(condition: &str) -> &str {
    condition.strip_prefix("all and ").unwrap_or(condition)
}

/// Whether two media conditions select the same media: textually identical,
/// or differing only by a leading "all and ". Symmetric.
pub fn is_matching_media(a: &str, b: &str) -> bool {
    a == b || normalize_media(a) == normalize_media(b)
}

/// The deduplication/lookup identity of a rule.
///
/// For style rules this is `prefix` + the comma-joined selector list, where
/// `prefix` encodes the enclosing group context ("" at top level). Group and
/// at-rules have fixed key forms. Returns `None` for rules that cannot carry
/// a key (comments, selector-less style rules); callers must treat that as
/// "exclude from the map".
pub fn rule_key(rule: &Rule, prefix: &str) -> Option<String> {
    match rule {
        Rule::Style(style) if style.selectors.is_empty() => None,
        Rule::Style(style) => Some(format!("{prefix}{}", style.selectors.join(","))),
        Rule::Media(media) => Some(format!("{MEDIA_PREFIX}{}", normalize_media(&media.condition))),
        Rule::Supports(supports) => Some(format!("{SUPPORTS_PREFIX}{}", supports.condition)),
        Rule::FontFace(_) => Some("@font-face".to_string()),
        Rule::Charset(charset) => Some(format!("@charset \"{}\"", charset.charset)),
        Rule::Keyframes(keyframes) => Some(format!(
            "@{}keyframes {}",
            keyframes.prefix, keyframes.name
        )),
        Rule::Comment => None,
    }
}

/// Group identity of a media/supports rule, as used in extraction keys:
/// the type tag followed by the condition text, e.g.
/// `media(min-width: 800px)`.
pub fn group_prefix(rule: &Rule) -> Option<String> {
    match rule {
        Rule::Media(media) => Some(format!("media{}", normalize_media(&media.condition))),
        Rule::Supports(supports) => Some(format!("supports{}", supports.condition)),
        _ => None,
    }
}

/// Group prefix for rules nested under `parent`'s prefix chain.
pub fn child_group_prefix(parent: &str, rule: &Rule) -> Option<String> {
    let own = group_prefix(rule)?;
    if parent.is_empty() {
        Some(own)
    } else {
        Some(format!("{parent}{GROUP_SEPARATOR}{own}"))
    }
}

/// Stable structural hash of a rule's content (selectors + declarations).
/// The owned model carries no source positions, so hashing the whole value
/// is already position-independent. Stable within one process, which is all
/// rule maps need; hashes are never persisted.
pub fn content_hash(rule: &Rule) -> u64 {
    let mut hasher = DefaultHasher::new();
    rule.hash(&mut hasher);
    hasher.finish()
}

/// Structural duplicate check.
///
/// Style rules compare selector lists in order but declarations as an
/// unordered collection: equal counts and every `property: value` pair of
/// one present in the other. Media rules match on condition equivalence plus
/// inner-rule equality; every other variant compares structurally.
pub fn is_rule_duplicate(a: &Rule, b: &Rule) -> bool {
    match (a, b) {
        (Rule::Style(x), Rule::Style(y)) => {
            x.selectors == y.selectors && declarations_match(&x.declarations, &y.declarations)
        }
        (Rule::Media(x), Rule::Media(y)) => {
            is_matching_media(&x.condition, &y.condition) && x.rules == y.rules
        }
        _ => a == b,
    }
}

fn declarations_match(a: &[Declaration], b: &[Declaration]) -> bool {
    a.len() == b.len() && a.iter().all(|declaration| b.contains(declaration))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::css::{MediaRule, StyleRule};

    fn style(selectors: &[&str], declarations: &[(&str, &str)]) -> Rule {
        Rule::Style(StyleRule {
            selectors: selectors.iter().map(|s| s.to_string()).collect(),
            declarations: declarations
                .iter()
                .map(|(p, v)| Declaration {
                    property: p.to_string(),
                    value: v.to_string(),
                })
                .collect(),
        })
    }

    #[test]
    fn media_equivalence() {
        assert!(is_matching_media("screen", "all and screen"));
        assert!(is_matching_media("all and screen", "screen"));
        assert!(is_matching_media("screen", "screen"));
        assert!(!is_matching_media("screen", "print"));
        assert!(!is_matching_media("all and screen", "all and print"));
    }

    #[test]
    fn style_rule_keys_join_selectors() {
        let rule = style(&[".a", ".b"], &[("color", "red")]);
        assert_eq!(rule_key(&rule, "").as_deref(), Some(".a,.b"));
        assert_eq!(
            rule_key(&rule, "media(min-width: 800px)").as_deref(),
            Some("media(min-width: 800px).a,.b")
        );
    }

    #[test]
    fn media_keys_normalize_the_condition() {
        let rule = Rule::Media(MediaRule {
            condition: "all and (min-width: 800px)".into(),
            rules: vec![],
        });
        assert_eq!(
            rule_key(&rule, "").as_deref(),
            Some("@media (min-width: 800px)")
        );
    }

    #[test]
    fn keyless_rules_return_none() {
        assert_eq!(rule_key(&Rule::Comment, ""), None);
        assert_eq!(rule_key(&style(&[], &[("color", "red")]), ""), None);
    }

    #[test]
    fn nested_group_prefixes_are_joined() {
        let media = Rule::Media(MediaRule {
            condition: "(min-width: 800px)".into(),
            rules: vec![],
        });
        assert_eq!(
            child_group_prefix("", &media).as_deref(),
            Some("media(min-width: 800px)")
        );
        assert_eq!(
            child_group_prefix("supports(display: grid)", &media).as_deref(),
            Some("supports(display: grid)-##-media(min-width: 800px)")
        );
    }

    #[test]
    fn content_hash_tracks_structure() {
        let a = style(&[".a"], &[("color", "red")]);
        let b = style(&[".a"], &[("color", "red")]);
        let c = style(&[".a"], &[("color", "blue")]);
        assert_eq!(content_hash(&a), content_hash(&b));
        assert_ne!(content_hash(&a), content_hash(&c));
    }

    #[test]
    fn duplicate_detection_ignores_declaration_order() {
        let a = style(&[".a"], &[("color", "red"), ("margin", "0")]);
        let b = style(&[".a"], &[("margin", "0"), ("color", "red")]);
        let c = style(&[".a"], &[("margin", "0")]);
        let d = style(&[".b"], &[("color", "red"), ("margin", "0")]);
        assert!(is_rule_duplicate(&a, &b));
        assert!(!is_rule_duplicate(&a, &c));
        assert!(!is_rule_duplicate(&a, &d));
    }

    #[test]
    fn media_rules_are_duplicates_across_all_and() {
        let inner = style(&[".a"], &[("color", "red")]);
        let x = Rule::Media(MediaRule {
            condition: "(min-width: 800px)".into(),
            rules: vec![inner.clone()],
        });
        let y = Rule::Media(MediaRule {
            condition: "all and (min-width: 800px)".into(),
            rules: vec![inner],
        });
        assert!(is_rule_duplicate(&x, &y));
    }
}
