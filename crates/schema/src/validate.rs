//! Field and aggregate validation.
//!
//! Each field definition yields an ordered chain of stateless checks built
//! once per form load (compiling any regex at build time). Checks run in a
//! fixed order (required, numeric, integer, min, max, regex, date) and the
//! first failure's message is the one surfaced.
//!
//! Aggregate form validity is `required AND mutex`: every enabled required
//! field must hold a non-falsy value, and when a mutex set is declared,
//! exactly one of its members may be filled.

use crate::field::{FieldDefinition, FieldType};
use crate::value::{DateValue, FieldValue};
use crate::{SchemaError, SchemaResult};
use casebook_types::FieldName;
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};

/// One compiled check in a field's validator chain.
enum Check {
    NotEmpty,
    Numeric,
    Integer,
    Min(f64),
    Max(f64),
    Pattern { regex: Regex, message: String },
    Date,
}

impl Check {
    /// Runs this check against a present, non-blank value.
    ///
    /// List values are exempt from every type check; only `NotEmpty`
    /// inspects them (and a non-blank list always passes it).
    fn run(&self, value: &FieldValue) -> Result<(), String> {
        let text = match value {
            FieldValue::Text(s) => s.trim(),
            FieldValue::List(_) => return Ok(()),
        };

        match self {
            Check::NotEmpty => Ok(()),
            Check::Numeric => match text.parse::<f64>() {
                Ok(n) if !n.is_nan() => Ok(()),
                _ => Err("must be a number".to_owned()),
            },
            Check::Integer => {
                let digits = text.strip_prefix('-').unwrap_or(text);
                if !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) {
                    Ok(())
                } else {
                    Err("must be a whole number".to_owned())
                }
            }
            Check::Min(limit) => match text.parse::<f64>() {
                Ok(n) if n >= *limit => Ok(()),
                Ok(_) => Err(format!("must be at least {limit}")),
                Err(_) => Err("must be a number".to_owned()),
            },
            Check::Max(limit) => match text.parse::<f64>() {
                Ok(n) if n <= *limit => Ok(()),
                Ok(_) => Err(format!("must be at most {limit}")),
                Err(_) => Err("must be a number".to_owned()),
            },
            Check::Pattern { regex, message } => {
                if regex.is_match(text) {
                    Ok(())
                } else {
                    Err(message.clone())
                }
            }
            Check::Date => DateValue::parse(text).map(|_| ()),
        }
    }
}

/// The compiled validator chain for one field.
pub struct FieldValidators {
    field: FieldName,
    required: bool,
    checks: Vec<Check>,
}

impl FieldValidators {
    /// Builds the validator chain for a field from its definition.
    ///
    /// Regex patterns are compiled here, once per form load, so evaluation
    /// never re-parses schema text.
    pub fn build(definition: &FieldDefinition, required: bool) -> SchemaResult<Self> {
        let mut checks = Vec::new();

        if required {
            checks.push(Check::NotEmpty);
        }

        match definition.field_type {
            FieldType::Number => checks.push(Check::Numeric),
            FieldType::Integer => checks.push(Check::Integer),
            _ => {}
        }

        if let Some(limit) = definition.min_value {
            checks.push(Check::Min(limit));
        }
        if let Some(limit) = definition.max_value {
            checks.push(Check::Max(limit));
        }

        if let Some(rule) = &definition.regex {
            let regex = Regex::new(&rule.pattern).map_err(|source| SchemaError::InvalidPattern {
                field: definition.name.clone(),
                source,
            })?;
            let message = rule
                .message
                .clone()
                .unwrap_or_else(|| "does not match the expected format".to_owned());
            checks.push(Check::Pattern { regex, message });
        }

        if matches!(definition.field_type, FieldType::Date | FieldType::Month) {
            checks.push(Check::Date);
        }

        Ok(Self {
            field: definition.name.clone(),
            required,
            checks,
        })
    }

    /// The field this chain validates.
    pub fn field(&self) -> &FieldName {
        &self.field
    }

    /// Runs the chain against the current value and returns the first
    /// failure's message, if any.
    ///
    /// A blank or absent value fails only the required check; all other
    /// checks apply to present values.
    pub fn check(&self, value: Option<&FieldValue>) -> Result<(), String> {
        match value {
            Some(value) if !value.is_blank() => {
                for check in &self.checks {
                    check.run(value)?;
                }
                Ok(())
            }
            _ if self.required => Err("value is required".to_owned()),
            _ => Ok(()),
        }
    }
}

/// Returns the required fields that are not filled.
///
/// Fields currently disabled by their own enabling conditions are excluded
/// from enforcement; "filled" means holding a non-falsy value.
pub fn missing_required_fields(
    required: &BTreeSet<FieldName>,
    disabled: &BTreeSet<FieldName>,
    values: &BTreeMap<FieldName, FieldValue>,
) -> Vec<FieldName> {
    required
        .iter()
        .filter(|name| !disabled.contains(*name))
        .filter(|name| values.get(*name).map(FieldValue::is_falsy).unwrap_or(true))
        .cloned()
        .collect()
}

/// Returns the mutex violation, if any.
///
/// A non-empty mutex set is valid iff exactly one of its members is filled;
/// zero or more than one filled member returns the whole set as the
/// offending group.
pub fn mutex_violation(
    mutex: &BTreeSet<FieldName>,
    values: &BTreeMap<FieldName, FieldValue>,
) -> Option<Vec<FieldName>> {
    if mutex.is_empty() {
        return None;
    }

    let filled = mutex
        .iter()
        .filter(|name| {
            values
                .get(*name)
                .map(|v| !v.is_falsy())
                .unwrap_or(false)
        })
        .count();

    if filled == 1 {
        None
    } else {
        Some(mutex.iter().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::{FieldComponent, Localized, PatternRule};

    fn definition(name: &str, field_type: FieldType) -> FieldDefinition {
        FieldDefinition {
            name: FieldName::new(name).unwrap(),
            component: FieldComponent::TextInput,
            field_type,
            label: Localized::Plain(name.to_owned()),
            description: None,
            regex: None,
            min_value: None,
            max_value: None,
            options: Vec::new(),
            enabling_conditions: Vec::new(),
            is_id: false,
        }
    }

    fn names(raw: &[&str]) -> BTreeSet<FieldName> {
        raw.iter().map(|n| FieldName::new(n).unwrap()).collect()
    }

    fn values(entries: &[(&str, FieldValue)]) -> BTreeMap<FieldName, FieldValue> {
        entries
            .iter()
            .map(|(n, v)| (FieldName::new(n).unwrap(), v.clone()))
            .collect()
    }

    #[test]
    fn test_required_check_fails_on_blank() {
        let v = FieldValidators::build(&definition("name", FieldType::Text), true).unwrap();
        assert!(v.check(None).is_err());
        assert!(v.check(Some(&FieldValue::Text("  ".into()))).is_err());
        assert!(v.check(Some(&FieldValue::Text("x".into()))).is_ok());
    }

    #[test]
    fn test_optional_blank_passes_type_checks() {
        let v = FieldValidators::build(&definition("age", FieldType::Number), false).unwrap();
        assert!(v.check(None).is_ok());
        assert!(v.check(Some(&FieldValue::empty_text())).is_ok());
    }

    #[test]
    fn test_number_rejects_non_numeric() {
        let v = FieldValidators::build(&definition("age", FieldType::Number), false).unwrap();
        assert!(v.check(Some(&FieldValue::Text("abc".into()))).is_err());
        assert!(v.check(Some(&FieldValue::Text("1.5".into()))).is_ok());
        assert!(v.check(Some(&FieldValue::Text("-3".into()))).is_ok());
    }

    #[test]
    fn test_integer_rejects_decimal_point() {
        let v = FieldValidators::build(&definition("count", FieldType::Integer), false).unwrap();
        assert!(v.check(Some(&FieldValue::Text("1.5".into()))).is_err());
        assert!(v.check(Some(&FieldValue::Text("-".into()))).is_err());
        assert!(v.check(Some(&FieldValue::Text("-12".into()))).is_ok());
        assert!(v.check(Some(&FieldValue::Text("12".into()))).is_ok());
    }

    #[test]
    fn test_min_max_bounds() {
        let mut d = definition("age", FieldType::Number);
        d.min_value = Some(0.0);
        d.max_value = Some(120.0);
        let v = FieldValidators::build(&d, false).unwrap();

        assert!(v.check(Some(&FieldValue::Text("50".into()))).is_ok());
        let err = v.check(Some(&FieldValue::Text("-1".into()))).unwrap_err();
        assert!(err.contains("at least"));
        let err = v.check(Some(&FieldValue::Text("121".into()))).unwrap_err();
        assert!(err.contains("at most"));
    }

    #[test]
    fn test_pattern_uses_configured_message() {
        let mut d = definition("nhs_number", FieldType::Text);
        d.regex = Some(PatternRule {
            pattern: "^[0-9]{10}$".to_owned(),
            message: Some("must be a 10-digit NHS number".to_owned()),
        });
        let v = FieldValidators::build(&d, false).unwrap();

        assert!(v.check(Some(&FieldValue::Text("1234567890".into()))).is_ok());
        let err = v.check(Some(&FieldValue::Text("12345".into()))).unwrap_err();
        assert_eq!(err, "must be a 10-digit NHS number");
    }

    #[test]
    fn test_invalid_pattern_surfaces_at_build() {
        let mut d = definition("x", FieldType::Text);
        d.regex = Some(PatternRule {
            pattern: "([unclosed".to_owned(),
            message: None,
        });
        assert!(matches!(
            FieldValidators::build(&d, false),
            Err(SchemaError::InvalidPattern { .. })
        ));
    }

    #[test]
    fn test_date_check_validates_composite() {
        let v = FieldValidators::build(&definition("dob", FieldType::Date), false).unwrap();
        let good = FieldValue::Text(r#"{"value":"1980-06-15","resolution":"day"}"#.into());
        assert!(v.check(Some(&good)).is_ok());

        let bad = FieldValue::Text(r#"{"value":"1980-15-06","resolution":"day"}"#.into());
        assert!(v.check(Some(&bad)).is_err());

        let not_json = FieldValue::Text("1980-06-15".into());
        assert!(v.check(Some(&not_json)).is_err());
    }

    #[test]
    fn test_lists_exempt_from_type_checks() {
        let mut d = definition("symptoms", FieldType::Number);
        d.regex = Some(PatternRule {
            pattern: "^x$".to_owned(),
            message: None,
        });
        let v = FieldValidators::build(&d, true).unwrap();
        let list = FieldValue::List(vec!["cough".into()]);
        assert!(v.check(Some(&list)).is_ok());
    }

    #[test]
    fn test_check_order_required_before_type() {
        let v = FieldValidators::build(&definition("age", FieldType::Number), true).unwrap();
        let err = v.check(Some(&FieldValue::empty_text())).unwrap_err();
        assert_eq!(err, "value is required");
    }

    #[test]
    fn test_missing_required_excludes_disabled() {
        let required = names(&["name", "pack_years"]);
        let disabled = names(&["pack_years"]);
        let vals = values(&[("name", "x".into())]);

        assert!(missing_required_fields(&required, &disabled, &vals).is_empty());

        let missing = missing_required_fields(&required, &BTreeSet::new(), &vals);
        assert_eq!(missing, vec![FieldName::new("pack_years").unwrap()]);
    }

    #[test]
    fn test_missing_required_treats_falsy_as_unfilled() {
        let required = names(&["count"]);
        let vals = values(&[("count", "0".into())]);
        assert_eq!(
            missing_required_fields(&required, &BTreeSet::new(), &vals).len(),
            1
        );
    }

    #[test]
    fn test_mutex_exactly_one_filled_is_valid() {
        let mutex = names(&["date_of_death", "alive_as_of"]);

        let one = values(&[("date_of_death", "x".into())]);
        assert!(mutex_violation(&mutex, &one).is_none());

        let none = values(&[]);
        assert!(mutex_violation(&mutex, &none).is_some());

        let both = values(&[("date_of_death", "x".into()), ("alive_as_of", "y".into())]);
        assert!(mutex_violation(&mutex, &both).is_some());
    }

    #[test]
    fn test_empty_mutex_set_never_violates() {
        assert!(mutex_violation(&BTreeSet::new(), &values(&[])).is_none());
    }
}
