//! Enabling-condition mini-language.
//!
//! Schema documents express a field's enabling conditions as ordered strings
//! of the form `"<fieldName> <operator> <jsonOrLiteralValue>"`. They are
//! parsed exactly once, at schema load, into structured [`Condition`] records
//! and evaluated against the current value map on every edit.
//!
//! All conditions attached to a field are ANDed: the field is enabled iff
//! every condition is satisfied. A referenced field that is absent from the
//! value map (or holds a falsy value) satisfies no condition except
//! `notdefined`.

use crate::value::FieldValue;
use crate::{SchemaError, SchemaResult};
use casebook_types::FieldName;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;

/// Comparison operator of an enabling condition.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConditionOp {
    Eq,
    Neq,
    Lt,
    Gt,
    /// Greater-or-equal; written `min` or `gte` in condition strings.
    Gte,
    /// Less-or-equal; written `max` or `lte` in condition strings.
    Lte,
    In,
    Nin,
    Any,
    Defined,
    NotDefined,
}

impl ConditionOp {
    fn parse(token: &str) -> Option<Self> {
        Some(match token {
            "eq" => Self::Eq,
            "neq" => Self::Neq,
            "lt" => Self::Lt,
            "gt" => Self::Gt,
            "min" | "gte" => Self::Gte,
            "max" | "lte" => Self::Lte,
            "in" => Self::In,
            "nin" => Self::Nin,
            "any" => Self::Any,
            "defined" => Self::Defined,
            "notdefined" => Self::NotDefined,
            _ => return None,
        })
    }

    /// Canonical token used when writing a condition back out.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Eq => "eq",
            Self::Neq => "neq",
            Self::Lt => "lt",
            Self::Gt => "gt",
            Self::Gte => "gte",
            Self::Lte => "lte",
            Self::In => "in",
            Self::Nin => "nin",
            Self::Any => "any",
            Self::Defined => "defined",
            Self::NotDefined => "notdefined",
        }
    }

    /// Whether this operator takes a right-hand value.
    fn takes_value(&self) -> bool {
        !matches!(self, Self::Defined | Self::NotDefined)
    }
}

/// A single parsed enabling condition.
#[derive(Clone, Debug, PartialEq)]
pub struct Condition {
    pub field: FieldName,
    pub op: ConditionOp,
    /// Right-hand literal. `Null` for `defined`/`notdefined`.
    pub value: serde_json::Value,
}

impl Condition {
    /// Parses a condition string of the form `"<field> <op> <value>"`.
    ///
    /// The value part is parsed as JSON when possible (`true`, `18`,
    /// `["a","b"]`); anything that is not valid JSON is kept as a bare string
    /// literal, matching how schema authors write unquoted words.
    pub fn parse(raw: &str) -> SchemaResult<Self> {
        let invalid = |reason: &str| SchemaError::InvalidCondition {
            raw: raw.to_owned(),
            reason: reason.to_owned(),
        };

        let trimmed = raw.trim();
        let (field_part, rest) = trimmed
            .split_once(char::is_whitespace)
            .ok_or_else(|| invalid("expected '<field> <operator> [<value>]'"))?;

        let field = FieldName::new(field_part)
            .map_err(|e| invalid(&format!("invalid field name: {e}")))?;

        let rest = rest.trim_start();
        let (op_part, value_part) = match rest.split_once(char::is_whitespace) {
            Some((op, value)) => (op, Some(value.trim())),
            None => (rest, None),
        };

        let op = ConditionOp::parse(op_part)
            .ok_or_else(|| invalid(&format!("unknown operator '{op_part}'")))?;

        let value = match (op.takes_value(), value_part) {
            (false, None) => serde_json::Value::Null,
            (false, Some(_)) => {
                return Err(invalid(&format!(
                    "operator '{}' takes no value",
                    op.as_str()
                )))
            }
            (true, None) => {
                return Err(invalid(&format!(
                    "operator '{}' requires a value",
                    op.as_str()
                )))
            }
            (true, Some(v)) => serde_json::from_str(v)
                .unwrap_or_else(|_| serde_json::Value::String(v.to_owned())),
        };

        Ok(Self { field, op, value })
    }

    /// Evaluates this condition against the current field values.
    pub fn is_satisfied(&self, values: &BTreeMap<FieldName, FieldValue>) -> bool {
        let current = values.get(&self.field).filter(|v| !v.is_falsy());

        match self.op {
            ConditionOp::Defined => current.is_some(),
            ConditionOp::NotDefined => current.is_none(),
            _ => match current {
                None => false,
                Some(value) => self.compare(value),
            },
        }
    }

    fn compare(&self, current: &FieldValue) -> bool {
        match self.op {
            ConditionOp::Eq => match current.as_text() {
                Some(text) => scalar_eq(text, &self.value),
                None => false,
            },
            ConditionOp::Neq => match current.as_text() {
                Some(text) => !scalar_eq(text, &self.value),
                None => true,
            },
            ConditionOp::Lt | ConditionOp::Gt | ConditionOp::Gte | ConditionOp::Lte => {
                let Some(text) = current.as_text() else {
                    return false;
                };
                ordered_compare(self.op, text, &self.value)
            }
            ConditionOp::In => match current.as_text() {
                Some(text) => set_contains(&self.value, text),
                // Membership of an array in a set is not meaningful.
                None => false,
            },
            ConditionOp::Nin => match current.as_text() {
                Some(text) => !set_contains(&self.value, text),
                None => false,
            },
            ConditionOp::Any => match current {
                FieldValue::Text(text) => set_contains(&self.value, text),
                FieldValue::List(items) => {
                    items.iter().any(|item| set_contains(&self.value, item))
                }
            },
            ConditionOp::Defined | ConditionOp::NotDefined => unreachable!("handled by caller"),
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.op.takes_value() {
            write!(f, "{} {} {}", self.field, self.op.as_str(), self.value)
        } else {
            write!(f, "{} {}", self.field, self.op.as_str())
        }
    }
}

impl Serialize for Condition {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Condition {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// Returns the names of fields whose enabling conditions are not all
/// satisfied by the current values.
pub fn disabled_fields<'a, I>(
    widgets: I,
    values: &BTreeMap<FieldName, FieldValue>,
) -> std::collections::BTreeSet<FieldName>
where
    I: IntoIterator<Item = &'a crate::field::FieldDefinition>,
{
    widgets
        .into_iter()
        .filter(|widget| !widget.is_enabled(values))
        .map(|widget| widget.name.clone())
        .collect()
}

/// Scalar equality against a JSON literal.
///
/// Both sides are normalized to their literal string form so that a captured
/// `"true"` matches the condition literal `true` and `"18"` matches `18`.
fn scalar_eq(current: &str, literal: &serde_json::Value) -> bool {
    match literal {
        serde_json::Value::String(s) => current == s,
        serde_json::Value::Bool(b) => current == b.to_string(),
        serde_json::Value::Number(n) => match current.trim().parse::<f64>() {
            Ok(c) => n.as_f64().is_some_and(|lit| c == lit),
            Err(_) => current == n.to_string(),
        },
        serde_json::Value::Null => false,
        _ => false,
    }
}

fn ordered_compare(op: ConditionOp, current: &str, literal: &serde_json::Value) -> bool {
    let literal_text = json_literal_text(literal);

    // Numeric comparison when both sides parse as numbers, lexical otherwise.
    let literal_str: &str = literal_text.as_ref();
    let ordering = match (current.trim().parse::<f64>(), literal_str.trim().parse::<f64>()) {
        (Ok(a), Ok(b)) => a.partial_cmp(&b),
        _ => Some(current.cmp(&literal_str)),
    };

    let Some(ordering) = ordering else {
        return false;
    };

    match op {
        ConditionOp::Lt => ordering.is_lt(),
        ConditionOp::Gt => ordering.is_gt(),
        ConditionOp::Gte => ordering.is_ge(),
        ConditionOp::Lte => ordering.is_le(),
        _ => false,
    }
}

fn set_contains(literal: &serde_json::Value, current: &str) -> bool {
    match literal {
        serde_json::Value::Array(items) => items
            .iter()
            .any(|item| scalar_eq(current, item)),
        // A scalar right-hand side acts as a single-element set.
        other => scalar_eq(current, other),
    }
}

fn json_literal_text(literal: &serde_json::Value) -> std::borrow::Cow<'_, str> {
    match literal {
        serde_json::Value::String(s) => std::borrow::Cow::Borrowed(s),
        other => std::borrow::Cow::Owned(other.to_string()),
    }
}
