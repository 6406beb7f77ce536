//! Numbers that older Gerrit releases send as strings.

use serde::{Deserialize, Deserializer, de::Error as _};
use serde_json::Value;

/// Accept `1`, `"1"`, `null` or a missing field.
pub fn number<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n
            .as_i64()
            .map(Some)
            .ok_or_else(|| D::Error::custom(format!("number out of range: {n}"))),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(Value::String(s)) => s
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| D::Error::custom(format!("expected a number, got {s:?}"))),
        Some(other) => Err(D::Error::custom(format!("expected a number, got {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;

    use super::*;

    #[derive(Deserialize)]
    struct Holder {
        #[serde(default, deserialize_with = "number")]
        value: Option<i64>,
    }

    fn parse(json: &str) -> Result<Option<i64>, serde_json::Error> {
        serde_json::from_str::<Holder>(json).map(|h| h.value)
    }

    #[test]
    fn test_accepts_numbers_and_numeric_strings() {
        assert_eq!(parse(r#"{"value":2}"#).unwrap(), Some(2));
        assert_eq!(parse(r#"{"value":"-1"}"#).unwrap(), Some(-1));
        assert_eq!(parse(r#"{"value":" 3 "}"#).unwrap(), Some(3));
        assert_eq!(parse(r#"{"value":null}"#).unwrap(), None);
        assert_eq!(parse(r#"{"value":""}"#).unwrap(), None);
        assert_eq!(parse("{}").unwrap(), None);
    }

    #[test]
    fn test_rejects_non_numbers() {
        assert!(parse(r#"{"value":"two"}"#).is_err());
        assert!(parse(r#"{"value":true}"#).is_err());
        assert!(parse(r#"{"value":1.5}"#).is_err());
    }
}
