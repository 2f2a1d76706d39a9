//! Owned CSS rule model and text writer.
//!
//! Stylesheets are converted into this representation right after parsing;
//! every later stage (rule maps, partitioning, serialization) works on these
//! types, never on borrowed parser output.

pub mod media_sort;
pub mod minify;
pub mod rule;
pub mod rule_map;
pub mod transform;

/// A parsed stylesheet: an ordered list of rules.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Stylesheet {
    pub rules: Vec<Rule>,
}

/// A single `property: value` declaration.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Declaration {
    pub property: String,
    pub value: String,
}

/// One CSS rule.
///
/// The closed set of variants this engine models. Anything else a parser may
/// produce (`@import`, `@page`, ...) is skipped at conversion time with a
/// debug log.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Rule {
    Style(StyleRule),
    Media(MediaRule),
    Supports(SupportsRule),
    FontFace(FontFaceRule),
    Keyframes(KeyframesRule),
    Charset(CharsetRule),
    Comment,
}

/// Selector group with its declaration block.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StyleRule {
    /// Source order, never sorted.
    pub selectors: Vec<String>,
    pub declarations: Vec<Declaration>,
}

/// `@media` block. `condition` holds the raw condition text.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MediaRule {
    pub condition: String,
    pub rules: Vec<Rule>,
}

/// `@supports` block.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SupportsRule {
    pub condition: String,
    pub rules: Vec<Rule>,
}

/// `@font-face` block.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FontFaceRule {
    pub declarations: Vec<Declaration>,
}

/// `@keyframes` with its frames. `prefix` is a vendor prefix such as
/// `-webkit-`, or empty for the standard form.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KeyframesRule {
    pub prefix: String,
    pub name: String,
    pub frames: Vec<Keyframe>,
}

/// One frame of a keyframes rule (`from`, `to`, percentages).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Keyframe {
    pub selectors: Vec<String>,
    pub declarations: Vec<Declaration>,
}

/// `@charset` marker, captured separately since CSS parsers routinely drop
/// it. Kept so the charset survives into the critical output.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CharsetRule {
    pub charset: String,
}

impl Stylesheet {
    /// Serialize back to CSS text. Output is valid, non-minified CSS;
    /// minification is a separate pass.
    pub fn to_css_string(&self) -> String {
        let mut out = String::new();
        for rule in &self.rules {
            write_rule(&mut out, rule, 0);
        }
        out
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

fn indent(out: &mut String, depth: usize) {
    for _ in 0..depth {
        out.push_str("  ");
    }
}

fn write_rule(out: &mut String, rule: &Rule, depth: usize) {
    match rule {
        Rule::Style(style) => write_style(out, &style.selectors, &style.declarations, depth),
        Rule::Media(media) => write_group(out, "@media", &media.condition, &media.rules, depth),
        Rule::Supports(supports) => {
            write_group(out, "@supports", &supports.condition, &supports.rules, depth)
        }
        Rule::FontFace(font_face) => {
            indent(out, depth);
            out.push_str("@font-face {\n");
            write_declarations(out, &font_face.declarations, depth + 1);
            indent(out, depth);
            out.push_str("}\n");
        }
        Rule::Keyframes(keyframes) => {
            indent(out, depth);
            out.push('@');
            out.push_str(&keyframes.prefix);
            out.push_str("keyframes ");
            out.push_str(&keyframes.name);
            out.push_str(" {\n");
            for frame in &keyframes.frames {
                write_style(out, &frame.selectors, &frame.declarations, depth + 1);
            }
            indent(out, depth);
            out.push_str("}\n");
        }
        Rule::Charset(charset) => {
            out.push_str("@charset \"");
            out.push_str(&charset.charset);
            out.push_str("\";\n");
        }
        Rule::Comment => {}
    }
}

fn write_style(out: &mut String, selectors: &[String], declarations: &[Declaration], depth: usize) {
    indent(out, depth);
    out.push_str(&selectors.join(", "));
    out.push_str(" {\n");
    write_declarations(out, declarations, depth + 1);
    indent(out, depth);
    out.push_str("}\n");
}

fn write_declarations(out: &mut String, declarations: &[Declaration], depth: usize) {
    for declaration in declarations {
        indent(out, depth);
        out.push_str(&declaration.property);
        out.push_str(": ");
        out.push_str(&declaration.value);
        out.push_str(";\n");
    }
}

fn write_group(out: &mut String, at_name: &str, condition: &str, rules: &[Rule], depth: usize) {
    indent(out, depth);
    out.push_str(at_name);
    out.push(' ');
    out.push_str(condition);
    out.push_str(" {\n");
    for rule in rules {
        write_rule(out, rule, depth + 1);
    }
    indent(out, depth);
    out.push_str("}\n");
}
