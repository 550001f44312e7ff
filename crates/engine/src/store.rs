//! Persistence collaborator contract.
//!
//! The engine never talks to a database directly; every read and write goes
//! through the [`FormStore`] trait. Implementations translate these logical
//! operations onto whatever backend a deployment uses. The in-memory
//! implementation in [`crate::memory`] backs tests and the demo runner.

use async_trait::async_trait;
use casebook_schema::{FieldDefinition, Form};
use casebook_types::{FieldName, FormId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Errors surfaced by a persistence backend.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("failed to serialize record data: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("backend error: {0}")]
    Backend(String),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// The global identity a record hangs off: a mapping from identifier field
/// names to their captured values (for example the patient identity fields
/// of the root form).
///
/// Serialized deterministically (ordered keys), so a serialized identity is a
/// stable draft key.
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordIdentity(pub BTreeMap<FieldName, String>);

impl RecordIdentity {
    /// Builds an identity from (field, value) pairs.
    pub fn from_pairs<I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (FieldName, String)>,
    {
        Self(pairs.into_iter().collect())
    }

    /// Stable JSON form used as a draft key component.
    pub fn to_key(&self) -> String {
        // BTreeMap keys serialize in order, so this is deterministic.
        serde_json::to_string(&self.0).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// An auto-saved, mutable snapshot of in-progress field values, scoped to one
/// (form, record identity) pair.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Draft {
    pub id: Uuid,
    pub form: FormId,
    pub identity: RecordIdentity,
    /// JSON snapshot of the value map.
    pub data: String,
    pub last_update: DateTime<Utc>,
}

/// An explicitly saved, reusable value snapshot not tied to a record
/// identity.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Template {
    pub id: Uuid,
    pub form: FormId,
    pub name: String,
    /// JSON snapshot of the value map.
    pub data: String,
    pub created_at: DateTime<Utc>,
}

/// One key/value pair of a finalized submission.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionField {
    pub key: FieldName,
    /// Scalar values verbatim; list values as a JSON array string.
    pub value: String,
}

/// A finalized, immutable record of field values.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Submission {
    pub id: Uuid,
    pub form: FormId,
    pub identity: RecordIdentity,
    pub fields: Vec<SubmissionField>,
    pub created_at: DateTime<Utc>,
}

impl Submission {
    /// Looks up a submitted value by field name.
    pub fn value_of(&self, field: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|f| f.key.as_str() == field)
            .map(|f| f.value.as_str())
    }
}

/// Identifier projection of a form: which fields compose its identity and
/// which of its fields branch toward other forms.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IdProjection {
    pub form_id: FormId,
    /// Names of fields on this form that reference other forms' identifiers.
    pub branch_fields: Vec<FieldName>,
    /// This form's own identifier field definitions.
    pub id_fields: Vec<FieldDefinition>,
}

/// A record predicate: submissions of `form` whose fields match every
/// `(field, value)` pair in `keys`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordWhere {
    pub form: FormId,
    pub keys: BTreeMap<FieldName, String>,
}

/// Counts returned by the cardinality/existence query.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CardinalityCounts {
    /// Records matching the submitting form's own primary-key composition.
    pub existing_self: u64,
    /// Records of the submitting form already attached to the root record.
    pub children_of_root: u64,
    /// Records of the submitting form referencing each bundle, keyed by the
    /// referenced form.
    pub per_reference: BTreeMap<FormId, u64>,
}

/// Logical operations the engine requires from the schema/persistence
/// collaborator.
///
/// All checks composed from these reads are read-then-decide: the store
/// offers no transactional guarantee against concurrent writers.
#[async_trait]
pub trait FormStore: Send + Sync {
    /// The root form applicable to a study.
    async fn root_form(&self, study: Option<&str>) -> StoreResult<Form>;

    /// A form by id.
    async fn form(&self, form: &FormId) -> StoreResult<Form>;

    /// Ordered field definitions of a form, filtered to the study context.
    async fn form_fields(&self, form: &FormId, study: Option<&str>)
        -> StoreResult<Vec<FieldDefinition>>;

    /// Identifier projection of a form.
    async fn form_id_fields(&self, form: &FormId) -> StoreResult<IdProjection>;

    /// The draft for a (form, identity) key, if one exists.
    async fn find_draft(&self, form: &FormId, identity: &RecordIdentity)
        -> StoreResult<Option<Draft>>;

    /// Creates or overwrites the draft for a (form, identity) key and
    /// returns its id.
    async fn upsert_draft(
        &self,
        form: &FormId,
        identity: &RecordIdentity,
        data: &str,
    ) -> StoreResult<Uuid>;

    /// Deletes a draft by id.
    async fn delete_draft(&self, draft: Uuid) -> StoreResult<()>;

    /// Creates a named template and returns its id.
    async fn create_template(&self, form: &FormId, name: &str, data: &str) -> StoreResult<Uuid>;

    /// Lists templates for a form.
    async fn find_templates(&self, form: &FormId) -> StoreResult<Vec<Template>>;

    /// Deletes a template by id.
    async fn delete_template(&self, template: Uuid) -> StoreResult<()>;

    /// Creates a submission and returns its id.
    async fn create_submission(
        &self,
        form: &FormId,
        identity: &RecordIdentity,
        fields: Vec<SubmissionField>,
    ) -> StoreResult<Uuid>;

    /// Deletes a submission by id.
    async fn delete_submission(&self, submission: Uuid) -> StoreResult<()>;

    /// Associates the acting user with a submission.
    async fn link_user_to_submission(&self, user: &str, submission: Uuid) -> StoreResult<()>;

    /// Submissions of a form matching an identity.
    async fn find_submissions(
        &self,
        form: &FormId,
        identity: &RecordIdentity,
    ) -> StoreResult<Vec<Submission>>;

    /// Existence/cardinality counts for a prospective submission.
    async fn record_counts(
        &self,
        self_where: &RecordWhere,
        root_where: Option<&RecordWhere>,
        references: &[RecordWhere],
    ) -> StoreResult<CardinalityCounts>;
}
