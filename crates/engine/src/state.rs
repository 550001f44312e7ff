//! Form state and its named transitions.
//!
//! [`FormState`] is the single mutable record of an active form instance. It
//! is only ever changed by applying a [`Transition`] through [`reduce`], a
//! pure old-state → new-state function with no access to any other
//! subsystem. The session layer owns the state and decides which transitions
//! to apply; nothing here performs I/O.

use casebook_schema::{FieldDefinition, FieldValue};
use casebook_types::FieldName;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use uuid::Uuid;

/// Kind of an aggregate validation failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationKind {
    Required,
    Mutex,
}

/// One aggregate validation failure surfaced to the caller.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationError {
    pub field: FieldName,
    pub kind: ValidationKind,
}

/// The mutable state of one mounted form instance.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FormState {
    /// Field definitions currently loaded, in display order.
    pub field_widgets: Vec<FieldDefinition>,

    /// Current values. A field appears here once touched and is never
    /// removed; emptying writes the type's falsy value back.
    pub field_values: BTreeMap<FieldName, FieldValue>,

    /// Required field names for the active study context.
    pub required_fields: BTreeSet<FieldName>,

    /// Mutually exclusive field names for the active study context.
    pub mutex_fields: BTreeSet<FieldName>,

    /// Id of the persisted draft for this instance, if any.
    pub draft_id: Option<Uuid>,

    /// When the draft was last written.
    pub draft_saved_at: Option<DateTime<Utc>>,

    /// Aggregate validation failures from the last validation pass.
    pub validation_errors: Vec<ValidationError>,
}

impl FormState {
    /// Name set of the loaded widgets.
    pub fn widget_names(&self) -> BTreeSet<FieldName> {
        self.field_widgets.iter().map(|w| w.name.clone()).collect()
    }

    /// Whether any field currently holds a non-falsy value.
    pub fn has_content(&self) -> bool {
        self.field_values.values().any(|v| !v.is_falsy())
    }
}

/// Named transitions over [`FormState`].
#[derive(Clone, Debug, PartialEq)]
pub enum Transition {
    /// Merge a partial value update into the value map.
    UpdateFieldValues(BTreeMap<FieldName, FieldValue>),
    /// Replace the value map wholesale (draft/template/table-row load).
    FillForm(BTreeMap<FieldName, FieldValue>),
    /// Reset values, draft bookkeeping and validation errors; keep loaded
    /// widgets and required/mutex sets.
    ClearForm,
    UpdateDraftId(Option<Uuid>),
    UpdateDraftDate(DateTime<Utc>),
    ClearDraftDate,
    UpdateWidgets(Vec<FieldDefinition>),
    UpdateRequiredFields(BTreeSet<FieldName>),
    UpdateExclusiveFields(BTreeSet<FieldName>),
    UpdateValidationErrors(Vec<ValidationError>),
}

/// Applies a transition, producing the next state.
pub fn reduce(state: &FormState, transition: Transition) -> FormState {
    let mut next = state.clone();

    match transition {
        Transition::UpdateFieldValues(partial) => {
            next.field_values.extend(partial);
        }
        Transition::FillForm(values) => {
            next.field_values = values;
        }
        Transition::ClearForm => {
            next.field_values.clear();
            next.draft_id = None;
            next.draft_saved_at = None;
            next.validation_errors.clear();
        }
        Transition::UpdateDraftId(id) => {
            next.draft_id = id;
        }
        Transition::UpdateDraftDate(at) => {
            next.draft_saved_at = Some(at);
        }
        Transition::ClearDraftDate => {
            next.draft_saved_at = None;
        }
        Transition::UpdateWidgets(widgets) => {
            next.field_widgets = widgets;
        }
        Transition::UpdateRequiredFields(names) => {
            next.required_fields = names;
        }
        Transition::UpdateExclusiveFields(names) => {
            next.mutex_fields = names;
        }
        Transition::UpdateValidationErrors(errors) => {
            next.validation_errors = errors;
        }
    }

    next
}
