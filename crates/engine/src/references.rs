//! Reference bundles and cardinality checks.
//!
//! A non-root form ties into the record graph through three kinds of fields:
//! its own primary identifiers, foreign keys carrying another form's
//! identifiers, and the inherited global identity shared by the whole
//! record. Before a submission is allowed, the filled foreign keys are
//! grouped into one bundle per referenced form and the existence and
//! cardinality rules are checked against current record counts.
//!
//! All checks are read-then-decide: two concurrent sessions can both pass
//! and both write. The store offers no transactional guarantee, so these
//! checks are best effort.

use crate::store::{CardinalityCounts, IdProjection, RecordWhere};
use casebook_schema::{FieldValue, Form};
use casebook_types::{FieldName, FormId};
use std::collections::BTreeMap;

/// The identifier values of one referenced form, as currently entered.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReferenceBundle {
    pub form: FormId,
    /// Referenced identifier field → entered value.
    pub keys: BTreeMap<FieldName, String>,
    /// Configured cardinality of this reference (`None` = unlimited).
    pub max_count: Option<u32>,
}

impl ReferenceBundle {
    pub fn to_where(&self) -> RecordWhere {
        RecordWhere {
            form: self.form.clone(),
            keys: self.keys.clone(),
        }
    }
}

/// A submission rejected by an existence or cardinality rule.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum CardinalityRejection {
    #[error("a record with this identifier already exists")]
    AlreadyExists,

    #[error("the limit of {limit} records per patient record has been reached")]
    RootLimitReached { limit: u32 },

    #[error("the limit of {limit} records referencing '{form}' has been reached")]
    ReferenceLimitReached { form: FormId, limit: u32 },
}

/// The scalar identifier value of a field, when it is filled.
///
/// Only non-falsy scalar values can compose an identity; lists never do.
fn key_value(values: &BTreeMap<FieldName, FieldValue>, field: &FieldName) -> Option<String> {
    values
        .get(field)
        .filter(|v| !v.is_falsy())
        .and_then(FieldValue::as_text)
        .map(str::to_owned)
}

/// Groups the filled foreign-key fields into one bundle per referenced form.
///
/// A referenced form contributes a bundle only when every one of its
/// identifier fields is filled on the current form; partially filled
/// bundles are dropped.
pub fn collect_reference_bundles(
    form: &Form,
    projections: &[IdProjection],
    values: &BTreeMap<FieldName, FieldValue>,
) -> Vec<ReferenceBundle> {
    form.references
        .iter()
        .filter_map(|rule| {
            let projection = projections.iter().find(|p| p.form_id == rule.form)?;
            if projection.id_fields.is_empty() {
                return None;
            }

            let mut keys = BTreeMap::new();
            for id_field in &projection.id_fields {
                keys.insert(id_field.name.clone(), key_value(values, &id_field.name)?);
            }

            Some(ReferenceBundle {
                form: rule.form.clone(),
                keys,
                max_count: rule.max_count,
            })
        })
        .collect()
}

/// The primary-key predicate of the prospective record itself.
///
/// Composes the form's own identifier fields (from current values) with the
/// inherited global identity keys.
pub fn self_where(
    form: &Form,
    global_identity: &BTreeMap<FieldName, String>,
    values: &BTreeMap<FieldName, FieldValue>,
) -> RecordWhere {
    let mut keys = global_identity.clone();
    for field in &form.id_fields {
        if let Some(value) = key_value(values, field) {
            keys.insert(field.clone(), value);
        }
    }

    RecordWhere {
        form: form.form_id.clone(),
        keys,
    }
}

/// Applies the existence and cardinality rules to fetched counts.
///
/// Root forms are subject only to the existence check; non-root forms are
/// additionally bounded by the form's per-root cardinality and by each
/// reference's configured cardinality.
pub fn check_cardinality(
    form: &Form,
    is_root: bool,
    bundles: &[ReferenceBundle],
    counts: &CardinalityCounts,
) -> Result<(), CardinalityRejection> {
    if counts.existing_self > 0 {
        return Err(CardinalityRejection::AlreadyExists);
    }

    if is_root {
        return Ok(());
    }

    if let Some(limit) = form.max_records {
        if counts.children_of_root >= u64::from(limit) {
            return Err(CardinalityRejection::RootLimitReached { limit });
        }
    }

    for bundle in bundles {
        let Some(limit) = bundle.max_count else {
            continue;
        };
        let count = counts
            .per_reference
            .get(&bundle.form)
            .copied()
            .unwrap_or(0);
        if count >= u64::from(limit) {
            return Err(CardinalityRejection::ReferenceLimitReached {
                form: bundle.form.clone(),
                limit,
            });
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use casebook_schema::{FieldComponent, FieldDefinition, FieldType, Localized, ReferenceRule};

    fn name(raw: &str) -> FieldName {
        FieldName::new(raw).unwrap()
    }

    fn id_field(raw: &str) -> FieldDefinition {
        FieldDefinition {
            name: name(raw),
            component: FieldComponent::TextInput,
            field_type: FieldType::Text,
            label: Localized::Plain(raw.to_owned()),
            description: None,
            regex: None,
            min_value: None,
            max_value: None,
            options: Vec::new(),
            enabling_conditions: Vec::new(),
            is_id: true,
        }
    }

    fn sample_form() -> Form {
        Form {
            form_id: FormId::new("sample").unwrap(),
            name: "Sample".to_owned(),
            weight: 0,
            studies: Default::default(),
            id_fields: vec![name("sample_id")],
            required_fields: Default::default(),
            mutex_fields: Default::default(),
            max_records: Some(2),
            references: vec![ReferenceRule {
                form: FormId::new("visit").unwrap(),
                max_count: Some(1),
            }],
        }
    }

    fn visit_projection() -> IdProjection {
        IdProjection {
            form_id: FormId::new("visit").unwrap(),
            branch_fields: Vec::new(),
            id_fields: vec![id_field("visit_id"), id_field("visit_date")],
        }
    }

    fn values(entries: &[(&str, &str)]) -> BTreeMap<FieldName, FieldValue> {
        entries
            .iter()
            .map(|(n, v)| (name(n), FieldValue::Text((*v).to_owned())))
            .collect()
    }

    #[test]
    fn test_complete_bundle_is_collected() {
        let bundles = collect_reference_bundles(
            &sample_form(),
            &[visit_projection()],
            &values(&[("visit_id", "v-1"), ("visit_date", "2026-01-01")]),
        );

        assert_eq!(bundles.len(), 1);
        assert_eq!(bundles[0].form.as_str(), "visit");
        assert_eq!(bundles[0].keys.len(), 2);
        assert_eq!(bundles[0].max_count, Some(1));
    }

    #[test]
    fn test_partial_bundle_is_dropped() {
        let bundles = collect_reference_bundles(
            &sample_form(),
            &[visit_projection()],
            &values(&[("visit_id", "v-1")]),
        );
        assert!(bundles.is_empty());
    }

    #[test]
    fn test_falsy_key_does_not_fill_a_bundle() {
        let bundles = collect_reference_bundles(
            &sample_form(),
            &[visit_projection()],
            &values(&[("visit_id", "v-1"), ("visit_date", "")]),
        );
        assert!(bundles.is_empty());
    }

    #[test]
    fn test_self_where_composes_global_identity_and_own_ids() {
        let global: BTreeMap<FieldName, String> =
            [(name("patient_id"), "p-1".to_owned())].into();
        let predicate = self_where(
            &sample_form(),
            &global,
            &values(&[("sample_id", "s-1")]),
        );

        assert_eq!(predicate.form.as_str(), "sample");
        assert_eq!(predicate.keys.get(&name("patient_id")).unwrap(), "p-1");
        assert_eq!(predicate.keys.get(&name("sample_id")).unwrap(), "s-1");
    }

    #[test]
    fn test_existing_record_is_rejected() {
        let counts = CardinalityCounts {
            existing_self: 1,
            ..Default::default()
        };
        assert_eq!(
            check_cardinality(&sample_form(), false, &[], &counts),
            Err(CardinalityRejection::AlreadyExists)
        );
    }

    #[test]
    fn test_root_form_skips_cardinality_checks() {
        let counts = CardinalityCounts {
            existing_self: 0,
            children_of_root: 100,
            ..Default::default()
        };
        assert!(check_cardinality(&sample_form(), true, &[], &counts).is_ok());
    }

    #[test]
    fn test_root_limit_rejected_at_capacity() {
        let counts = CardinalityCounts {
            children_of_root: 2,
            ..Default::default()
        };
        assert_eq!(
            check_cardinality(&sample_form(), false, &[], &counts),
            Err(CardinalityRejection::RootLimitReached { limit: 2 })
        );

        let under = CardinalityCounts {
            children_of_root: 1,
            ..Default::default()
        };
        assert!(check_cardinality(&sample_form(), false, &[], &under).is_ok());
    }

    #[test]
    fn test_reference_limit_rejected_at_capacity() {
        let bundle = ReferenceBundle {
            form: FormId::new("visit").unwrap(),
            keys: [(name("visit_id"), "v-1".to_owned())].into(),
            max_count: Some(1),
        };
        let counts = CardinalityCounts {
            per_reference: [(FormId::new("visit").unwrap(), 1)].into(),
            ..Default::default()
        };

        assert_eq!(
            check_cardinality(&sample_form(), false, &[bundle.clone()], &counts),
            Err(CardinalityRejection::ReferenceLimitReached {
                form: FormId::new("visit").unwrap(),
                limit: 1
            })
        );

        let unlimited = ReferenceBundle {
            max_count: None,
            ..bundle
        };
        assert!(check_cardinality(&sample_form(), false, &[unlimited], &counts).is_ok());
    }
}
