//! Form-level schema.
//!
//! A [`Form`] describes one capture form: its identity fields, the
//! study-keyed required/mutex sets and the reference rules that tie a
//! non-root form into the record graph.

use crate::field::StudyKeyed;
use casebook_types::{FieldName, FormId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// A reference from this form to another form's primary identifier.
///
/// The referencing form carries the referenced form's identifier fields by
/// name; `max_count` bounds how many records of this form may attach to one
/// record of the referenced form (`None` = unlimited).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReferenceRule {
    pub form: FormId,
    #[serde(default)]
    pub max_count: Option<u32>,
}

/// Declarative description of one capture form.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Form {
    /// Opaque form identifier.
    pub form_id: FormId,

    /// Human-readable form name.
    pub name: String,

    /// Ordering hint among sibling forms.
    #[serde(default)]
    pub weight: i32,

    /// Studies this form applies to; empty means all.
    #[serde(default)]
    pub studies: BTreeSet<String>,

    /// Names of fields composing the record's external identity.
    #[serde(default)]
    pub id_fields: Vec<FieldName>,

    /// Required field names, flat or per-study.
    #[serde(default)]
    pub required_fields: StudyKeyed<Vec<FieldName>>,

    /// Mutually exclusive field names, flat or per-study.
    #[serde(default)]
    pub mutex_fields: StudyKeyed<Vec<FieldName>>,

    /// Maximum number of records of this form per root record
    /// (`None` = unlimited).
    #[serde(default)]
    pub max_records: Option<u32>,

    /// References to other forms' identifiers carried by this form.
    #[serde(default)]
    pub references: Vec<ReferenceRule>,
}

impl Form {
    /// Whether this form applies to the given study context.
    ///
    /// A form with an empty `studies` set applies everywhere; an unset study
    /// matches any form.
    pub fn applies_to(&self, study: Option<&str>) -> bool {
        match study {
            None => true,
            Some(key) => self.studies.is_empty() || self.studies.contains(key),
        }
    }

    /// Resolves the required field set for the given study context.
    pub fn required_for(&self, study: Option<&str>) -> BTreeSet<FieldName> {
        self.required_fields
            .resolve(study)
            .map(|names| names.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Resolves the mutually exclusive field set for the given study context.
    pub fn mutex_for(&self, study: Option<&str>) -> BTreeSet<FieldName> {
        self.mutex_fields
            .resolve(study)
            .map(|names| names.iter().cloned().collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn form(yaml: &str) -> Form {
        serde_yaml::from_str(yaml).expect("valid form")
    }

    #[test]
    fn test_deserialize_minimal_form() {
        let f = form(
            r#"
form_id: demographics
name: Demographics
"#,
        );
        assert_eq!(f.form_id.as_str(), "demographics");
        assert!(f.required_for(None).is_empty());
        assert!(f.max_records.is_none());
    }

    #[test]
    fn test_required_fields_by_study() {
        let f = form(
            r#"
form_id: visit
name: Visit
required_fields:
  default: [visit_date]
  lung-study: [visit_date, fev1]
"#,
        );
        assert_eq!(f.required_for(Some("lung-study")).len(), 2);
        assert_eq!(f.required_for(Some("heart-study")).len(), 1);
        assert_eq!(f.required_for(None).len(), 1);
    }

    #[test]
    fn test_applies_to_studies() {
        let f = form(
            r#"
form_id: visit
name: Visit
studies: [lung-study]
"#,
        );
        assert!(f.applies_to(Some("lung-study")));
        assert!(!f.applies_to(Some("heart-study")));
        assert!(f.applies_to(None));

        let open = form(
            r#"
form_id: notes
name: Notes
"#,
        );
        assert!(open.applies_to(Some("anything")));
    }

    #[test]
    fn test_reference_rules() {
        let f = form(
            r#"
form_id: sample
name: Sample
references:
  - form: visit
    max_count: 2
  - form: demographics
"#,
        );
        assert_eq!(f.references.len(), 2);
        assert_eq!(f.references[0].max_count, Some(2));
        assert_eq!(f.references[1].max_count, None);
    }
}
