//! Mobile-first ordering of `@media` blocks in an output stylesheet.

use std::cmp::Ordering;

use crate::css::{Rule, Stylesheet};

/// Reorder the top-level `@media` blocks of `sheet` mobile-first:
/// `min-width`/`min-height` queries ascending, then `max-width`/
/// `max-height` descending, then everything else in source order.
/// Non-media rules keep their positions, so a leading `@charset` or
/// font-face block stays where it is.
pub fn sort_media_queries(sheet: &mut Stylesheet) {
    let slots: Vec<usize> = sheet
        .rules
        .iter()
        .enumerate()
        .filter(|(_, rule)| rule.is_media())
        .map(|(index, _)| index)
        .collect();
    if slots.len() < 2 {
        return;
    }
    let mut blocks: Vec<Rule> = slots.iter().map(|&index| sheet.rules[index].clone()).collect();
    blocks.sort_by(compare_media);
    for (slot, block) in slots.into_iter().zip(blocks) {
        sheet.rules[slot] = block;
    }
}

fn compare_media(a: &Rule, b: &Rule) -> Ordering {
    let (class_a, value_a) = media_weight(a);
    let (class_b, value_b) = media_weight(b);
    class_a.cmp(&class_b).then(value_a.total_cmp(&value_b))
}

fn media_weight(rule: &Rule) -> (u8, f32) {
    let Rule::Media(media) = rule else {
        return (2, 0.0);
    };
    let condition = media.condition.as_str();
    if let Some(value) =
        feature_value(condition, "min-width").or_else(|| feature_value(condition, "min-height"))
    {
        (0, value)
    } else if let Some(value) =
        feature_value(condition, "max-width").or_else(|| feature_value(condition, "max-height"))
    {
        (1, -value)
    } else {
        (2, 0.0)
    }
}

/// Numeric value of `(name: <value>)` in a media condition, normalized to
/// pixels with `em`/`rem` taken at 16px. None when the feature is absent.
fn feature_value(condition: &str, name: &str) -> Option<f32> {
    let start = condition.find(&format!("({name}"))?;
    let rest = &condition[start..];
    let colon = rest.find(':')?;
    let value = rest[colon + 1..].trim_start();
    let digits_end = value
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(value.len());
    let number: f32 = value[..digits_end].parse().ok()?;
    let unit = &value[digits_end..];
    if unit.starts_with("em") || unit.starts_with("rem") {
        Some(number * 16.0)
    } else {
        Some(number)
    }
}
