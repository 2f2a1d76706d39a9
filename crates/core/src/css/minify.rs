//! Final-output minification via lightningcss.

use lightningcss::stylesheet::{MinifyOptions, ParserOptions, PrinterOptions, StyleSheet};

use crate::error::{Error, Result};

/// Minify serialized CSS down to its compact form.
///
/// A leading `@charset` statement is carried around the minifier and
/// re-attached, since lightningcss drops it. Empty input minifies to an
/// empty string without touching the parser.
pub fn minify(css: &str) -> Result<String> {
    if css.trim().is_empty() {
        return Ok(String::new());
    }
    let (charset, body) = split_charset(css);
    let options = ParserOptions {
        error_recovery: true,
        ..ParserOptions::default()
    };
    let mut sheet = StyleSheet::parse(body, options).map_err(|e| Error::Parse(e.to_string()))?;
    sheet
        .minify(MinifyOptions::default())
        .map_err(|e| Error::Aggregation(e.to_string()))?;
    let output = sheet
        .to_css(PrinterOptions {
            minify: true,
            ..PrinterOptions::default()
        })
        .map_err(|e| Error::Aggregation(e.to_string()))?;

    match charset {
        Some(charset) => Ok(format!("{charset}{}", output.code)),
        None => Ok(output.code),
    }
}

fn split_charset(css: &str) -> (Option<String>, &str) {
    let trimmed = css.trim_start_matches('\u{feff}').trim_start();
    if !trimmed.starts_with("@charset") {
        return (None, css);
    }
    match trimmed.find(';') {
        Some(end) => (Some(trimmed[..=end].to_string()), &trimmed[end + 1..]),
        None => (None, css),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compacts_whitespace_and_separators() {
        const INPUT: &str = ".foo {\n  display: block;\n  margin-top: 10px;\n}\n";
        let result = minify(INPUT).unwrap();
        assert!(result.contains(".foo"));
        assert!(result.contains("display:block"));
        assert!(result.len() < INPUT.len());
    }

    #[test]
    fn empty_input_stays_empty() {
        assert_eq!(minify("").unwrap(), "");
        assert_eq!(minify("  \n ").unwrap(), "");
    }

    #[test]
    fn charset_survives_minification() {
        let result = minify("@charset \"utf-8\";\n.a { display: block; }").unwrap();
        assert!(result.starts_with("@charset \"utf-8\";"));
        assert!(result.contains(".a"));
    }
}
