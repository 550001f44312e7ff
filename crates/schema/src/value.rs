//! Captured field values.
//!
//! Form values arrive from an untyped capture surface: text inputs produce
//! strings, multi-selects produce string arrays, and date/month pickers
//! produce a JSON-encoded composite carrying the ISO value and its
//! resolution. [`FieldValue`] is the typed boundary for all of them, with a
//! tolerant deserializer for the scalar forms an upstream client may send
//! (numbers, booleans, null).

use chrono::NaiveDate;
use serde::de::{self, Deserializer, SeqAccess, Visitor};
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;

/// A captured value for a single field: scalar text or a list of selected
/// options.
///
/// Dates and months are carried as `Text` holding the JSON composite produced
/// by the picker (see [`DateValue`]).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FieldValue {
    Text(String),
    List(Vec<String>),
}

impl FieldValue {
    /// Empty scalar value, used to represent an emptied field.
    ///
    /// An emptied field is never removed from the value map; it is written
    /// back as the type's falsy value.
    pub fn empty_text() -> Self {
        FieldValue::Text(String::new())
    }

    /// Empty list value, the falsy value for multi-selects.
    pub fn empty_list() -> Self {
        FieldValue::List(Vec::new())
    }

    /// Returns the scalar text, if this value is scalar.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            FieldValue::List(_) => None,
        }
    }

    /// Returns the selected options, if this value is a list.
    pub fn as_list(&self) -> Option<&[String]> {
        match self {
            FieldValue::Text(_) => None,
            FieldValue::List(items) => Some(items),
        }
    }

    /// Whether the value is blank: an empty (after trimming) string or an
    /// empty list.
    ///
    /// This is the presence notion used by the `notEmpty` field validator;
    /// the aggregate required/mutex checks and the conditional evaluator use
    /// the broader [`FieldValue::is_falsy`].
    pub fn is_blank(&self) -> bool {
        match self {
            FieldValue::Text(s) => s.trim().is_empty(),
            FieldValue::List(items) => items.is_empty(),
        }
    }

    /// Whether the value counts as unfilled.
    ///
    /// Falsy values are: empty/whitespace string, empty list, the literal
    /// `null`, numeric zero and NaN. A field holding a falsy value is treated
    /// the same as an absent field everywhere except `notdefined` conditions.
    pub fn is_falsy(&self) -> bool {
        match self {
            FieldValue::List(items) => items.is_empty(),
            FieldValue::Text(s) => {
                let trimmed = s.trim();
                if trimmed.is_empty() || trimmed == "null" {
                    return true;
                }
                match trimmed.parse::<f64>() {
                    Ok(n) => n == 0.0 || n.is_nan(),
                    Err(_) => false,
                }
            }
        }
    }

    /// Numeric reading of a scalar value, when it parses.
    pub fn as_number(&self) -> Option<f64> {
        self.as_text().and_then(|s| s.trim().parse::<f64>().ok())
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Text(value.to_owned())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Text(value)
    }
}

impl From<Vec<String>> for FieldValue {
    fn from(items: Vec<String>) -> Self {
        FieldValue::List(items)
    }
}

impl Serialize for FieldValue {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            FieldValue::Text(s) => serializer.serialize_str(s),
            FieldValue::List(items) => items.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for FieldValue {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct FieldValueVisitor;

        impl<'de> Visitor<'de> for FieldValueVisitor {
            type Value = FieldValue;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a string, number, boolean, null, or array of strings")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<FieldValue, E> {
                Ok(FieldValue::Text(v.to_owned()))
            }

            fn visit_string<E: de::Error>(self, v: String) -> Result<FieldValue, E> {
                Ok(FieldValue::Text(v))
            }

            fn visit_bool<E: de::Error>(self, v: bool) -> Result<FieldValue, E> {
                Ok(FieldValue::Text(v.to_string()))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<FieldValue, E> {
                Ok(FieldValue::Text(v.to_string()))
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<FieldValue, E> {
                Ok(FieldValue::Text(v.to_string()))
            }

            fn visit_f64<E: de::Error>(self, v: f64) -> Result<FieldValue, E> {
                Ok(FieldValue::Text(v.to_string()))
            }

            fn visit_unit<E: de::Error>(self) -> Result<FieldValue, E> {
                Ok(FieldValue::empty_text())
            }

            fn visit_none<E: de::Error>(self) -> Result<FieldValue, E> {
                Ok(FieldValue::empty_text())
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<FieldValue, A::Error> {
                let mut items = Vec::new();
                while let Some(item) = seq.next_element::<String>()? {
                    items.push(item);
                }
                Ok(FieldValue::List(items))
            }
        }

        deserializer.deserialize_any(FieldValueVisitor)
    }
}

/// Resolution of a captured date composite.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DateResolution {
    Day,
    Month,
}

/// The JSON composite produced by date and month pickers.
///
/// Wire form: `{"value": "2024-03-01", "resolution": "day"}`. Month-resolution
/// values carry `YYYY-MM`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DateValue {
    pub value: String,
    pub resolution: DateResolution,
}

impl DateValue {
    /// Parses a raw field value as a date composite and verifies the ISO
    /// value is a real calendar date.
    pub fn parse(raw: &str) -> Result<Self, String> {
        let parsed: DateValue =
            serde_json::from_str(raw).map_err(|e| format!("not a date composite: {e}"))?;

        match parsed.resolution {
            DateResolution::Day => {
                NaiveDate::parse_from_str(&parsed.value, "%Y-%m-%d")
                    .map_err(|_| format!("'{}' is not a valid calendar date", parsed.value))?;
            }
            DateResolution::Month => {
                // A month is valid iff its first day is.
                NaiveDate::parse_from_str(&format!("{}-01", parsed.value), "%Y-%m-%d")
                    .map_err(|_| format!("'{}' is not a valid calendar month", parsed.value))?;
            }
        }

        Ok(parsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_detection() {
        assert!(FieldValue::empty_text().is_blank());
        assert!(FieldValue::Text("   ".into()).is_blank());
        assert!(FieldValue::empty_list().is_blank());
        assert!(!FieldValue::Text("0".into()).is_blank());
        assert!(!FieldValue::List(vec!["a".into()]).is_blank());
    }

    #[test]
    fn test_falsy_includes_zero_and_null() {
        assert!(FieldValue::Text("0".into()).is_falsy());
        assert!(FieldValue::Text("0.0".into()).is_falsy());
        assert!(FieldValue::Text("null".into()).is_falsy());
        assert!(FieldValue::Text(String::new()).is_falsy());
        assert!(FieldValue::empty_list().is_falsy());

        assert!(!FieldValue::Text("18".into()).is_falsy());
        assert!(!FieldValue::Text("false".into()).is_falsy());
        assert!(!FieldValue::List(vec!["x".into()]).is_falsy());
    }

    #[test]
    fn test_deserialize_tolerates_scalar_forms() {
        let v: FieldValue = serde_json::from_str("18").unwrap();
        assert_eq!(v, FieldValue::Text("18".into()));

        let v: FieldValue = serde_json::from_str("true").unwrap();
        assert_eq!(v, FieldValue::Text("true".into()));

        let v: FieldValue = serde_json::from_str("null").unwrap();
        assert_eq!(v, FieldValue::empty_text());

        let v: FieldValue = serde_json::from_str("[\"a\",\"b\"]").unwrap();
        assert_eq!(v, FieldValue::List(vec!["a".into(), "b".into()]));
    }

    #[test]
    fn test_serialize_round_trip() {
        let v = FieldValue::List(vec!["a".into()]);
        let json = serde_json::to_string(&v).unwrap();
        assert_eq!(json, "[\"a\"]");

        let v = FieldValue::Text("hello".into());
        assert_eq!(serde_json::to_string(&v).unwrap(), "\"hello\"");
    }

    #[test]
    fn test_date_value_parses_day_resolution() {
        let raw = r#"{"value":"2024-02-29","resolution":"day"}"#;
        let parsed = DateValue::parse(raw).expect("leap day is valid");
        assert_eq!(parsed.resolution, DateResolution::Day);
    }

    #[test]
    fn test_date_value_rejects_impossible_date() {
        let raw = r#"{"value":"2023-02-29","resolution":"day"}"#;
        assert!(DateValue::parse(raw).is_err());
    }

    #[test]
    fn test_date_value_parses_month_resolution() {
        let raw = r#"{"value":"2024-11","resolution":"month"}"#;
        assert!(DateValue::parse(raw).is_ok());

        let raw = r#"{"value":"2024-13","resolution":"month"}"#;
        assert!(DateValue::parse(raw).is_err());
    }

    #[test]
    fn test_date_value_rejects_unknown_fields() {
        let raw = r#"{"value":"2024-01-01","resolution":"day","extra":1}"#;
        assert!(DateValue::parse(raw).is_err());
    }
}
