//! Text conventions for primitive values.

use crate::error::{Result, XmlError};

/// Converts a Rust boolean to its string representation for XML.
pub fn bool_to_string(b: bool) -> &'static str {
    if b { "true" } else { "false" }
}

/// Parses an XML boolean. Lenient parsing also accepts `1`/`0` and ignores case.
pub fn parse_bool(text: &str, strict: bool) -> Result<bool> {
    let text = text.trim();
    match text {
        "true" => return Ok(true),
        "false" => return Ok(false),
        _ if strict => {}
        "1" => return Ok(true),
        "0" => return Ok(false),
        _ if text.eq_ignore_ascii_case("true") => return Ok(true),
        _ if text.eq_ignore_ascii_case("false") => return Ok(false),
        _ => {}
    }
    Err(XmlError::InvalidValue {
        expected: "boolean",
        value: text.to_string(),
    })
}

/// Formats a float the way `xs:double` spells special values.
pub fn format_float(value: f64) -> String {
    if value.is_nan() {
        "NaN".to_string()
    } else if value.is_infinite() {
        if value > 0.0 { "INF" } else { "-INF" }.to_string()
    } else {
        value.to_string()
    }
}

pub fn parse_float(text: &str) -> Result<f64> {
    match text.trim() {
        "INF" | "+INF" => Ok(f64::INFINITY),
        "-INF" => Ok(f64::NEG_INFINITY),
        "NaN" => Ok(f64::NAN),
        other => other.parse::<f64>().map_err(|_| XmlError::InvalidValue {
            expected: "floating point",
            value: other.to_string(),
        }),
    }
}

/// Whitespace separated tokens of an `xs:list` style value.
pub fn split_tokens(text: &str) -> impl Iterator<Item = &str> {
    text.split_whitespace()
}

/// Parses a `{namespace}local` or plain `local` key used for collected attributes.
pub fn parse_clark_name(key: &str) -> (String, String) {
    if let Some(rest) = key.strip_prefix('{') {
        if let Some((namespace, local)) = rest.split_once('}') {
            return (namespace.to_string(), local.to_string());
        }
    }
    (String::new(), key.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bool_to_string() {
        assert_eq!(bool_to_string(true), "true");
        assert_eq!(bool_to_string(false), "false");
    }

    #[test]
    fn test_parse_bool_strictness() {
        assert!(parse_bool("true", true).unwrap());
        assert!(parse_bool("1", false).unwrap());
        assert!(!parse_bool("FALSE", false).unwrap());
        assert!(parse_bool("1", true).is_err());
        assert!(parse_bool("yes", false).is_err());
    }

    #[test]
    fn test_float_special_values() {
        assert_eq!(format_float(f64::INFINITY), "INF");
        assert_eq!(format_float(f64::NEG_INFINITY), "-INF");
        assert_eq!(format_float(1.5), "1.5");
        assert!(parse_float("NaN").unwrap().is_nan());
        assert_eq!(parse_float("-INF").unwrap(), f64::NEG_INFINITY);
        assert_eq!(parse_float(" 2.25 ").unwrap(), 2.25);
        assert!(parse_float("abc").is_err());
    }

    #[test]
    fn test_parse_clark_name() {
        assert_eq!(
            parse_clark_name("{urn:x}lang"),
            ("urn:x".to_string(), "lang".to_string())
        );
        assert_eq!(parse_clark_name("id"), (String::new(), "id".to_string()));
    }
}
