//! Insertion-ordered rule map: the multi-page aggregation structure.
//!
//! Folding is content-hash based, which makes it idempotent and insensitive
//! to the order pages finish in. Merging the same rules twice, or in a
//! different order, yields the same map.

use std::collections::HashMap;

use log::debug;

use crate::css::rule::{content_hash, rule_key, MEDIA_PREFIX, SUPPORTS_PREFIX};
use crate::css::{MediaRule, Rule, Stylesheet, SupportsRule};
use crate::error::{Error, Result};

/// A rule plus its structural content hash.
#[derive(Debug, Clone)]
pub struct HashedRule {
    pub hash: u64,
    pub rule: Rule,
}

/// Mapping from rule key to the distinct (by content hash) rules sharing
/// that key. Key insertion order is preserved and determines output order.
#[derive(Debug, Default, Clone)]
pub struct RuleMap {
    keys: Vec<String>,
    entries: HashMap<String, Vec<HashedRule>>,
}

impl RuleMap {
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

    pub fn get(&self, key: &str) -> Option<&[HashedRule]> {
        self.entries.get(key).map(Vec::as_slice)
    }

    /// Keys in insertion order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.keys.iter().map(String::as_str)
    }

    /// Entries in key insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[HashedRule])> {
        self.keys
            .iter()
            .filter_map(|key| self.entries.get(key).map(|bucket| (key.as_str(), bucket.as_slice())))
    }

    /// Fold a stylesheet into the map.
    ///
    /// This is the multi-page merge primitive: call it once per page result
    /// on the same accumulating map. Rules whose content hash already exists
    /// under their key are skipped, comments are dropped, and media/supports
    /// blocks bucket their inner rules under the group's key.
    pub fn insert_stylesheet(&mut self, sheet: &Stylesheet) {
        for rule in &sheet.rules {
            self.insert_rule(rule);
        }
    }

    fn insert_rule(&mut self, rule: &Rule) {
        match rule {
            Rule::Comment => {}
            Rule::Media(media) => {
                if let Some(key) = rule_key(rule, "") {
                    for inner in &media.rules {
                        self.push_hashed(&key, inner);
                    }
                }
            }
            Rule::Supports(supports) => {
                if let Some(key) = rule_key(rule, "") {
                    for inner in &supports.rules {
                        self.push_hashed(&key, inner);
                    }
                }
            }
            other => match rule_key(other, "") {
                Some(key) => self.push_hashed(&key, other),
                None => debug!("rule without key excluded from map: {}", other.type_name()),
            },
        }
    }

    fn push_hashed(&mut self, key: &str, rule: &Rule) {
        if rule.is_comment() {
            return;
        }
        let hash = content_hash(rule);
        if !self.entries.contains_key(key) {
            self.keys.push(key.to_string());
        }
        let bucket = self.entries.entry(key.to_string()).or_default();
        if bucket.iter().all(|entry| entry.hash != hash) {
            bucket.push(HashedRule {
                hash,
                rule: rule.clone(),
            });
        }
    }

    /// Materialize the map back into a stylesheet, in key insertion order.
    ///
    /// Media and supports keys re-expand into group rules wrapping their
    /// bucket; everything else is appended flat. Style rules left with no
    /// selectors or no declarations are skipped so no invalid CSS is
    /// emitted.
    pub fn to_stylesheet(&self) -> Result<Stylesheet> {
        let mut rules = Vec::new();
        for key in &self.keys {
            let bucket = self.entries.get(key).ok_or_else(|| {
                Error::Aggregation(format!("rule map key {key:?} lost its entries"))
            })?;
            if let Some(condition) = key.strip_prefix(MEDIA_PREFIX) {
                let inner = materialize_bucket(bucket);
                if !inner.is_empty() {
                    rules.push(Rule::Media(MediaRule {
                        condition: condition.to_string(),
                        rules: inner,
                    }));
                }
            } else if let Some(condition) = key.strip_prefix(SUPPORTS_PREFIX) {
                let inner = materialize_bucket(bucket);
                if !inner.is_empty() {
                    rules.push(Rule::Supports(SupportsRule {
                        condition: condition.to_string(),
                        rules: inner,
                    }));
                }
            } else {
                rules.extend(materialize_bucket(bucket));
            }
        }
        Ok(Stylesheet { rules })
    }

    /// Remove every entry whose content hash also appears under the same key
    /// in `other`; keys emptied this way are dropped entirely. Used to strip
    /// the critical rules out of the rest map.
    pub fn subtract(&mut self, other: &RuleMap) {
        for (key, other_bucket) in other.iter() {
            if let Some(bucket) = self.entries.get_mut(key) {
                bucket.retain(|entry| other_bucket.iter().all(|o| o.hash != entry.hash));
                if bucket.is_empty() {
                    self.entries.remove(key);
                }
            }
        }
        let entries = &self.entries;
        self.keys.retain(|key| entries.contains_key(key));
    }
}

fn materialize_bucket(bucket: &[HashedRule]) -> Vec<Rule> {
    let mut out = Vec::with_capacity(bucket.len());
    for entry in bucket {
        if let Rule::Style(style) = &entry.rule {
            if style.selectors.is_empty() || style.declarations.is_empty() {
                debug!("skipping malformed style rule during materialization");
                continue;
            }
        }
        out.push(entry.rule.clone());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::css::{Declaration, StyleRule};
    use pretty_assertions::assert_eq;

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

    fn sheet(rules: Vec<Rule>) -> Stylesheet {
        Stylesheet { rules }
    }

    #[test]
    fn refolding_the_same_sheet_changes_nothing() {
        let source = sheet(vec![
            style(&[".a"], &[("color", "red")]),
            style(&[".b"], &[("color", "blue")]),
        ]);
        let mut map = RuleMap::new();
        map.insert_stylesheet(&source);
        let first_len = map.len();
        map.insert_stylesheet(&source);
        assert_eq!(map.len(), first_len);
        assert_eq!(map.get(".a").map(<[_]>::len), Some(1));
        assert_eq!(map.get(".b").map(<[_]>::len), Some(1));
    }

    #[test]
    fn distinct_rules_with_identical_selectors_both_survive() {
        let mut map = RuleMap::new();
        map.insert_stylesheet(&sheet(vec![style(&[".a"], &[("color", "red")])]));
        map.insert_stylesheet(&sheet(vec![style(&[".a"], &[("color", "blue")])]));
        assert_eq!(map.len(), 1);
        assert_eq!(map.get(".a").map(<[_]>::len), Some(2));
    }

    #[test]
    fn equivalent_media_conditions_share_one_bucket() {
        let mut map = RuleMap::new();
        map.insert_stylesheet(&sheet(vec![Rule::Media(MediaRule {
            condition: "(min-width: 800px)".into(),
            rules: vec![style(&[".a"], &[("color", "red")])],
        })]));
        map.insert_stylesheet(&sheet(vec![Rule::Media(MediaRule {
            condition: "all and (min-width: 800px)".into(),
            rules: vec![style(&[".b"], &[("color", "blue")])],
        })]));

        assert_eq!(map.len(), 1);
        let bucket = map.get("@media (min-width: 800px)");
        assert_eq!(bucket.map(<[_]>::len), Some(2));

        let out = map.to_stylesheet().unwrap();
        assert_eq!(out.rules.len(), 1);
        match &out.rules[0] {
            Rule::Media(media) => {
                assert_eq!(media.condition, "(min-width: 800px)");
                assert_eq!(media.rules.len(), 2);
            }
            other => panic!("expected a media rule, got {}", other.type_name()),
        }
    }

    #[test]
    fn page_arrival_order_does_not_change_the_rule_set() {
        let page_a = sheet(vec![style(&[".a"], &[("color", "red")])]);
        let page_b = sheet(vec![style(&[".b"], &[("color", "blue")])]);

        let mut forward = RuleMap::new();
        forward.insert_stylesheet(&page_a);
        forward.insert_stylesheet(&page_b);

        let mut backward = RuleMap::new();
        backward.insert_stylesheet(&page_b);
        backward.insert_stylesheet(&page_a);

        let mut forward_keys: Vec<_> = forward.keys().collect();
        let mut backward_keys: Vec<_> = backward.keys().collect();
        forward_keys.sort_unstable();
        backward_keys.sort_unstable();
        assert_eq!(forward_keys, backward_keys);

        for key in forward_keys {
            let f: Vec<_> = forward.get(key).unwrap().iter().map(|h| h.hash).collect();
            let b: Vec<_> = backward.get(key).unwrap().iter().map(|h| h.hash).collect();
            assert_eq!(f, b, "bucket for {key} differs");
        }
    }

    #[test]
    fn key_order_follows_first_insertion() {
        let mut map = RuleMap::new();
        map.insert_stylesheet(&sheet(vec![
            style(&[".z"], &[("color", "red")]),
            style(&[".a"], &[("color", "blue")]),
        ]));
        let keys: Vec<_> = map.keys().collect();
        assert_eq!(keys, vec![".z", ".a"]);
    }

    #[test]
    fn comments_and_keyless_rules_are_excluded() {
        let mut map = RuleMap::new();
        map.insert_stylesheet(&sheet(vec![
            Rule::Comment,
            style(&[], &[("color", "red")]),
            style(&[".a"], &[("color", "red")]),
        ]));
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn malformed_entries_never_materialize() {
        let mut map = RuleMap::new();
        map.insert_stylesheet(&sheet(vec![Rule::Media(MediaRule {
            condition: "(min-width: 800px)".into(),
            rules: vec![style(&[".a"], &[])],
        })]));
        let out = map.to_stylesheet().unwrap();
        assert!(out.rules.is_empty(), "empty-declaration rule must not survive");
    }

    #[test]
    fn subtract_drops_shared_hashes_and_emptied_keys() {
        let source = sheet(vec![
            style(&[".a"], &[("color", "red")]),
            style(&[".b"], &[("color", "blue")]),
        ]);
        let critical = sheet(vec![style(&[".a"], &[("color", "red")])]);

        let mut rest_map = RuleMap::new();
        rest_map.insert_stylesheet(&source);
        let mut critical_map = RuleMap::new();
        critical_map.insert_stylesheet(&critical);

        rest_map.subtract(&critical_map);
        assert!(!rest_map.contains_key(".a"));
        assert!(rest_map.contains_key(".b"));
        assert_eq!(rest_map.len(), 1);
    }

    #[test]
    fn subtracting_an_identical_map_leaves_nothing() {
        let source = sheet(vec![
            style(&[".a"], &[("color", "red")]),
            style(&[".b"], &[("color", "blue")]),
        ]);
        let mut rest_map = RuleMap::new();
        rest_map.insert_stylesheet(&source);
        let mut critical_map = RuleMap::new();
        critical_map.insert_stylesheet(&source);

        assert!(!rest_map.is_empty());
        rest_map.subtract(&critical_map);
        assert!(rest_map.is_empty());
    }
}
