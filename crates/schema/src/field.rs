//! Field definitions and context-keyed schema text.
//!
//! A [`FieldDefinition`] is the declarative description of a single capture
//! widget: its display component, value type, validation constraints and the
//! parsed enabling conditions that gate its visibility. Labels, descriptions
//! and the form-level required/mutex sets may be keyed by study context with
//! a `default` fallback.

use crate::condition::Condition;
use crate::value::FieldValue;
use casebook_types::FieldName;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Key used by context-keyed mappings when no study-specific entry applies.
pub const DEFAULT_CONTEXT_KEY: &str = "default";

/// Display component of a field.
///
/// This enum is deliberately closed: the capture surface supplies one widget
/// implementation per variant, and unknown components are a schema error.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FieldComponent {
    TextInput,
    #[serde(rename = "textarea")]
    TextArea,
    SingleSelect,
    MultiSelect,
    DatePicker,
    MonthPicker,
}

impl FieldComponent {
    /// Whether this component captures a list of options rather than a scalar.
    pub fn captures_list(&self) -> bool {
        matches!(self, FieldComponent::MultiSelect)
    }

    /// Whether this component requires configured options.
    pub fn requires_options(&self) -> bool {
        matches!(self, FieldComponent::SingleSelect | FieldComponent::MultiSelect)
    }
}

/// Value type of a field, driving which validators apply.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Text,
    Number,
    Integer,
    Date,
    Month,
    Multiple,
}

/// Schema text that is either plain or keyed by study context.
///
/// Context-keyed text falls back to the `default` entry when the current
/// study has no entry or no study is set.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Localized {
    Plain(String),
    ByStudy(BTreeMap<String, String>),
}

impl Localized {
    /// Resolves the text for the given study context.
    pub fn resolve(&self, study: Option<&str>) -> Option<&str> {
        match self {
            Localized::Plain(text) => Some(text),
            Localized::ByStudy(map) => study
                .and_then(|key| map.get(key))
                .or_else(|| map.get(DEFAULT_CONTEXT_KEY))
                .map(String::as_str),
        }
    }
}

/// A value that is either flat or keyed by study context with a `default`
/// fallback. Used for form-level required/mutex field sets.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StudyKeyed<T> {
    Flat(T),
    ByStudy(BTreeMap<String, T>),
}

impl<T> StudyKeyed<T> {
    /// Resolves the value for the given study context.
    pub fn resolve(&self, study: Option<&str>) -> Option<&T> {
        match self {
            StudyKeyed::Flat(value) => Some(value),
            StudyKeyed::ByStudy(map) => study
                .and_then(|key| map.get(key))
                .or_else(|| map.get(DEFAULT_CONTEXT_KEY)),
        }
    }
}

impl<T: Default> Default for StudyKeyed<T> {
    fn default() -> Self {
        StudyKeyed::Flat(T::default())
    }
}

/// A regex constraint with its user-facing failure message.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PatternRule {
    pub pattern: String,
    #[serde(default)]
    pub message: Option<String>,
}

/// Declarative description of a single form field.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FieldDefinition {
    /// Field name, unique within its form.
    pub name: FieldName,

    /// Display component kind.
    pub component: FieldComponent,

    /// Value type.
    #[serde(rename = "type")]
    pub field_type: FieldType,

    /// Label, plain or per-study.
    pub label: Localized,

    /// Optional longer description, same shape as the label.
    #[serde(default)]
    pub description: Option<Localized>,

    /// Optional regex constraint.
    #[serde(default)]
    pub regex: Option<PatternRule>,

    /// Inclusive lower bound for numeric fields.
    #[serde(default)]
    pub min_value: Option<f64>,

    /// Inclusive upper bound for numeric fields.
    #[serde(default)]
    pub max_value: Option<f64>,

    /// Enumerated values for select components.
    #[serde(default)]
    pub options: Vec<String>,

    /// Conditions gating this field's visibility, parsed at load time and
    /// ANDed at evaluation.
    #[serde(default)]
    pub enabling_conditions: Vec<Condition>,

    /// Whether this field participates in identifier composition.
    #[serde(default)]
    pub is_id: bool,
}

impl FieldDefinition {
    /// Resolves the label for the given study context.
    pub fn label_for(&self, study: Option<&str>) -> Option<&str> {
        self.label.resolve(study)
    }

    /// Resolves the description for the given study context.
    pub fn description_for(&self, study: Option<&str>) -> Option<&str> {
        self.description.as_ref().and_then(|d| d.resolve(study))
    }

    /// Whether this field is enabled under the current values.
    ///
    /// A field with no enabling conditions is always enabled; otherwise every
    /// condition must be satisfied.
    pub fn is_enabled(&self, values: &BTreeMap<FieldName, FieldValue>) -> bool {
        self.enabling_conditions
            .iter()
            .all(|condition| condition.is_satisfied(values))
    }

    /// The falsy value an emptied field of this type is written back as.
    pub fn empty_value(&self) -> FieldValue {
        if self.component.captures_list() {
            FieldValue::empty_list()
        } else {
            FieldValue::empty_text()
        }
    }
}
