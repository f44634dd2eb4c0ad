//! Cache key construction and key pattern matching
//!
//! Keys are built from a resource name and a filter object. Filter fields are
//! emitted in lexicographic order and array values are sorted, so two logically
//! identical queries always map to the same key:
//!
//! ```rust
//! use self_healing_cache::keys::make_key;
//! use serde_json::json;
//!
//! let a = make_key("trades", &json!({"userId": "u1", "accountIds": ["b", "a"]}));
//! let b = make_key("trades", &json!({"accountIds": ["a", "b"], "userId": "u1"}));
//! assert_eq!(a, b);
//! assert_eq!(a, r#"trades_{"accountIds":["a","b"],"userId":"u1"}"#);
//! ```

use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Separator between the resource name and the serialized filters
pub const KEY_SEPARATOR: char = '_';

/// Build a deterministic cache key for `resource` filtered by `filters`
///
/// `filters` is normally a JSON object. `null` and empty objects produce the bare
/// resource name (no separator). Any other value is serialized as-is.
#[must_use]
pub fn make_key(resource: &str, filters: &Value) -> String {
    match filters {
        Value::Null => resource.to_string(),
        Value::Object(map) if map.is_empty() => resource.to_string(),
        Value::Object(map) => {
            let canonical: BTreeMap<&str, Value> = map
                .iter()
                .map(|(field, value)| (field.as_str(), canonical_value(value)))
                .collect();
            format!("{resource}{KEY_SEPARATOR}{}", to_canonical_string(&canonical))
        }
        other => format!("{resource}{KEY_SEPARATOR}{}", to_canonical_string(other)),
    }
}

fn canonical_value(value: &Value) -> Value {
    match value {
        Value::Array(items) => {
            let mut items: Vec<(String, Value)> = items
                .iter()
                .map(|item| (to_canonical_string(item), item.clone()))
                .collect();
            items.sort_by(|a, b| a.0.cmp(&b.0));
            Value::Array(items.into_iter().map(|(_, item)| item).collect())
        }
        other => other.clone(),
    }
}

// serde_json's default map is ordered, so nested objects serialize with sorted keys too
fn to_canonical_string<T: serde::Serialize + ?Sized>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_default()
}

/// A pattern matched against cache keys
///
/// Parsed from a string where `*` is a wildcard:
///
/// | pattern   | meaning                          |
/// |-----------|----------------------------------|
/// | `abc`     | key contains `abc`               |
/// | `abc*`    | key starts with `abc`            |
/// | `*abc`    | key ends with `abc`              |
/// | `*abc*`   | key contains `abc`               |
/// | `a*b*c`   | anchored glob with inner wildcards |
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyPattern {
    Substring(String),
    Prefix(String),
    Suffix(String),
    Contains(String),
    /// Literal segments between wildcards; first is anchored at the start, last at the end
    Glob(Vec<String>),
}

impl KeyPattern {
    /// Parse a pattern string
    #[must_use]
    pub fn parse(pattern: &str) -> Self {
        let stars = pattern.matches('*').count();
        if stars == 0 {
            return Self::Substring(pattern.to_string());
        }

        let leading = pattern.starts_with('*');
        let trailing = pattern.ends_with('*');
        let inner = pattern.trim_matches('*');

        if !inner.contains('*') {
            match (leading, trailing) {
                (true, true) => return Self::Contains(inner.to_string()),
                (false, true) => return Self::Prefix(inner.to_string()),
                (true, false) => return Self::Suffix(inner.to_string()),
                (false, false) => {}
            }
        }

        Self::Glob(pattern.split('*').map(str::to_string).collect())
    }

    /// Whether `key` matches this pattern
    #[must_use]
    pub fn matches(&self, key: &str) -> bool {
        match self {
            Self::Substring(needle) | Self::Contains(needle) => key.contains(needle.as_str()),
            Self::Prefix(prefix) => key.starts_with(prefix.as_str()),
            Self::Suffix(suffix) => key.ends_with(suffix.as_str()),
            Self::Glob(parts) => glob_matches(parts, key),
        }
    }

    /// Whether the pattern contains a wildcard
    #[must_use]
    pub fn is_wildcard(&self) -> bool {
        !matches!(self, Self::Substring(_))
    }
}

fn glob_matches(parts: &[String], key: &str) -> bool {
    let Some((first, tail)) = parts.split_first() else {
        return key.is_empty();
    };
    let Some(mut rest) = key.strip_prefix(first.as_str()) else {
        return false;
    };
    let Some((last, middle)) = tail.split_last() else {
        return rest.is_empty();
    };

    for part in middle {
        match rest.split_once(part.as_str()) {
            Some((_, after)) => rest = after,
            None => return false,
        }
    }

    rest.ends_with(last.as_str())
}

impl fmt::Display for KeyPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Substring(s) => write!(f, "{s}"),
            Self::Prefix(s) => write!(f, "{s}*"),
            Self::Suffix(s) => write!(f, "*{s}"),
            Self::Contains(s) => write!(f, "*{s}*"),
            Self::Glob(parts) => write!(f, "{}", parts.join("*")),
        }
    }
}

impl From<&str> for KeyPattern {
    fn from(pattern: &str) -> Self {
        Self::parse(pattern)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_key_is_independent_of_field_and_array_order() {
        let a = make_key("trades", &json!({"userId": "u1", "accountIds": ["b", "a"]}));
        let b = make_key("trades", &json!({"accountIds": ["a", "b"], "userId": "u1"}));
        assert_eq!(a, b);
    }

    #[test]
    fn test_key_without_filters_has_no_separator() {
        assert_eq!(make_key("profiles", &Value::Null), "profiles");
        assert_eq!(make_key("profiles", &json!({})), "profiles");
    }

    #[test]
    fn test_different_filters_give_different_keys() {
        let a = make_key("trades", &json!({"userId": "u1"}));
        let b = make_key("trades", &json!({"userId": "u10"}));
        assert_ne!(a, b);
    }

    #[test]
    fn test_numeric_arrays_are_sorted() {
        let a = make_key("accounts", &json!({"ids": [3, 1, 2]}));
        assert_eq!(a, r#"accounts_{"ids":[1,2,3]}"#);
    }

    #[test]
    fn test_pattern_parsing() {
        assert_eq!(KeyPattern::parse("trades"), KeyPattern::Substring("trades".into()));
        assert_eq!(KeyPattern::parse("trades_*"), KeyPattern::Prefix("trades_".into()));
        assert_eq!(KeyPattern::parse("*_u1"), KeyPattern::Suffix("_u1".into()));
        assert_eq!(KeyPattern::parse("*u1*"), KeyPattern::Contains("u1".into()));
        assert_eq!(
            KeyPattern::parse("trades_*u1*"),
            KeyPattern::Glob(vec!["trades_".into(), "u1".into(), String::new()])
        );
    }

    #[test]
    fn test_pattern_matching_forms() {
        let keys = ["trades_u1", "trading_accounts_u1", "profiles_u2"];

        let prefix = KeyPattern::parse("trades_*");
        let matched: Vec<_> = keys.iter().filter(|k| prefix.matches(k)).collect();
        assert_eq!(matched, vec![&"trades_u1"]);

        let contains = KeyPattern::parse("*u1*");
        let matched: Vec<_> = keys.iter().filter(|k| contains.matches(k)).collect();
        assert_eq!(matched, vec![&"trades_u1", &"trading_accounts_u1"]);

        assert!(KeyPattern::parse("*_u2").matches("profiles_u2"));
        assert!(!KeyPattern::parse("*_u2").matches("profiles_u21"));
        assert!(KeyPattern::parse("accounts").matches("trading_accounts_u1"));
    }

    #[test]
    fn test_glob_is_anchored_at_both_ends() {
        let pattern = KeyPattern::parse(r#"trades_*"u1"*"#);
        assert!(pattern.matches(r#"trades_{"userId":"u1"}"#));
        assert!(!pattern.matches(r#"trades_{"userId":"u10"}"#));
        assert!(!pattern.matches(r#"old_trades_{"userId":"u1"}"#));

        let anchored = KeyPattern::parse("a*c");
        assert!(anchored.matches("abc"));
        assert!(anchored.matches("ac"));
        assert!(!anchored.matches("abcd"));
    }

    #[test]
    fn test_pattern_display_round_trips() {
        for raw in ["abc", "abc*", "*abc", "*abc*", "a*b*c"] {
            assert_eq!(KeyPattern::parse(raw).to_string(), raw);
        }
    }
}
