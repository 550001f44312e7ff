//! In-memory persistence backend.
//!
//! [`MemoryStore`] implements [`FormStore`] over a catalog loaded at
//! construction plus in-process record collections. It backs the test suite,
//! the CLI and the demo runner, and enforces the same invariants a real
//! backend must: exactly one draft per (form, identity) key, and
//! count-by-predicate semantics for the cardinality query.

use crate::store::{
    CardinalityCounts, Draft, FormStore, IdProjection, RecordIdentity, RecordWhere, StoreError,
    StoreResult, Submission, SubmissionField, Template,
};
use async_trait::async_trait;
use casebook_schema::{FieldDefinition, Form, FormCatalog};
use casebook_types::{FieldName, FormId};
use chrono::Utc;
use std::collections::BTreeMap;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
struct Records {
    /// Keyed by (form, serialized identity); upsert overwrites.
    drafts: BTreeMap<(FormId, String), Draft>,
    templates: BTreeMap<Uuid, Template>,
    submissions: Vec<Submission>,
    user_links: Vec<(String, Uuid)>,
}

/// In-memory [`FormStore`] seeded from a [`FormCatalog`].
pub struct MemoryStore {
    catalog: FormCatalog,
    records: RwLock<Records>,
}

impl MemoryStore {
    pub fn new(catalog: FormCatalog) -> Self {
        Self {
            catalog,
            records: RwLock::new(Records::default()),
        }
    }

    /// Users linked to a submission (test/demo introspection).
    pub async fn linked_users(&self, submission: Uuid) -> Vec<String> {
        self.records
            .read()
            .await
            .user_links
            .iter()
            .filter(|(_, id)| *id == submission)
            .map(|(user, _)| user.clone())
            .collect()
    }

    /// Number of stored drafts (test/demo introspection).
    pub async fn draft_count(&self) -> usize {
        self.records.read().await.drafts.len()
    }

    fn catalog_form(&self, form: &FormId) -> StoreResult<&casebook_schema::CatalogForm> {
        self.catalog
            .form(form.as_str())
            .ok_or_else(|| StoreError::NotFound(format!("form '{form}'")))
    }

    fn matches(submission: &Submission, predicate: &RecordWhere) -> bool {
        if submission.form != predicate.form {
            return false;
        }
        predicate.keys.iter().all(|(field, expected)| {
            submission
                .value_of(field.as_str())
                .map(|v| v == expected)
                .or_else(|| {
                    submission
                        .identity
                        .0
                        .get(field)
                        .map(|v| v == expected)
                })
                .unwrap_or(false)
        })
    }
}

#[async_trait]
impl FormStore for MemoryStore {
    async fn root_form(&self, study: Option<&str>) -> StoreResult<Form> {
        self.catalog
            .root_form(study)
            .map(|entry| entry.form.clone())
            .ok_or_else(|| {
                StoreError::NotFound(format!(
                    "root form for study '{}'",
                    study.unwrap_or("<none>")
                ))
            })
    }

    async fn form(&self, form: &FormId) -> StoreResult<Form> {
        Ok(self.catalog_form(form)?.form.clone())
    }

    async fn form_fields(
        &self,
        form: &FormId,
        study: Option<&str>,
    ) -> StoreResult<Vec<FieldDefinition>> {
        let entry = self.catalog_form(form)?;
        if !entry.form.applies_to(study) {
            return Err(StoreError::NotFound(format!(
                "form '{form}' is not available in study '{}'",
                study.unwrap_or("<none>")
            )));
        }
        Ok(entry.fields.clone())
    }

    async fn form_id_fields(&self, form: &FormId) -> StoreResult<IdProjection> {
        let entry = self.catalog_form(form)?;

        // Branch fields: names on this form that belong to the identifier
        // composition of a form it references.
        let mut branch_fields: Vec<FieldName> = Vec::new();
        for rule in &entry.form.references {
            if let Ok(target) = self.catalog_form(&rule.form) {
                for name in &target.form.id_fields {
                    if entry.fields.iter().any(|f| &f.name == name) {
                        branch_fields.push(name.clone());
                    }
                }
            }
        }

        Ok(IdProjection {
            form_id: entry.form.form_id.clone(),
            branch_fields,
            id_fields: entry
                .id_field_definitions()
                .into_iter()
                .cloned()
                .collect(),
        })
    }

    async fn find_draft(
        &self,
        form: &FormId,
        identity: &RecordIdentity,
    ) -> StoreResult<Option<Draft>> {
        let key = (form.clone(), identity.to_key());
        Ok(self.records.read().await.drafts.get(&key).cloned())
    }

    async fn upsert_draft(
        &self,
        form: &FormId,
        identity: &RecordIdentity,
        data: &str,
    ) -> StoreResult<Uuid> {
        let key = (form.clone(), identity.to_key());
        let mut records = self.records.write().await;

        // One draft per key: an existing draft keeps its id and is
        // overwritten in place.
        let id = records
            .drafts
            .get(&key)
            .map(|existing| existing.id)
            .unwrap_or_else(Uuid::new_v4);

        records.drafts.insert(
            key,
            Draft {
                id,
                form: form.clone(),
                identity: identity.clone(),
                data: data.to_owned(),
                last_update: Utc::now(),
            },
        );

        Ok(id)
    }

    async fn delete_draft(&self, draft: Uuid) -> StoreResult<()> {
        let mut records = self.records.write().await;
        let key = records
            .drafts
            .iter()
            .find(|(_, d)| d.id == draft)
            .map(|(key, _)| key.clone());

        match key {
            Some(key) => {
                records.drafts.remove(&key);
                Ok(())
            }
            None => Err(StoreError::NotFound(format!("draft '{draft}'"))),
        }
    }

    async fn create_template(&self, form: &FormId, name: &str, data: &str) -> StoreResult<Uuid> {
        self.catalog_form(form)?;
        let id = Uuid::new_v4();
        self.records.write().await.templates.insert(
            id,
            Template {
                id,
                form: form.clone(),
                name: name.to_owned(),
                data: data.to_owned(),
                created_at: Utc::now(),
            },
        );
        Ok(id)
    }

    async fn find_templates(&self, form: &FormId) -> StoreResult<Vec<Template>> {
        Ok(self
            .records
            .read()
            .await
            .templates
            .values()
            .filter(|t| &t.form == form)
            .cloned()
            .collect())
    }

    async fn delete_template(&self, template: Uuid) -> StoreResult<()> {
        match self.records.write().await.templates.remove(&template) {
            Some(_) => Ok(()),
            None => Err(StoreError::NotFound(format!("template '{template}'"))),
        }
    }

    async fn create_submission(
        &self,
        form: &FormId,
        identity: &RecordIdentity,
        fields: Vec<SubmissionField>,
    ) -> StoreResult<Uuid> {
        self.catalog_form(form)?;
        let id = Uuid::new_v4();
        self.records.write().await.submissions.push(Submission {
            id,
            form: form.clone(),
            identity: identity.clone(),
            fields,
            created_at: Utc::now(),
        });
        Ok(id)
    }

    async fn delete_submission(&self, submission: Uuid) -> StoreResult<()> {
        let mut records = self.records.write().await;
        let before = records.submissions.len();
        records.submissions.retain(|s| s.id != submission);
        if records.submissions.len() == before {
            return Err(StoreError::NotFound(format!("submission '{submission}'")));
        }
        records.user_links.retain(|(_, id)| *id != submission);
        Ok(())
    }

    async fn link_user_to_submission(&self, user: &str, submission: Uuid) -> StoreResult<()> {
        let mut records = self.records.write().await;
        if !records.submissions.iter().any(|s| s.id == submission) {
            return Err(StoreError::NotFound(format!("submission '{submission}'")));
        }
        records.user_links.push((user.to_owned(), submission));
        Ok(())
    }

    async fn find_submissions(
        &self,
        form: &FormId,
        identity: &RecordIdentity,
    ) -> StoreResult<Vec<Submission>> {
        let predicate = RecordWhere {
            form: form.clone(),
            keys: identity.0.clone(),
        };
        Ok(self
            .records
            .read()
            .await
            .submissions
            .iter()
            .filter(|s| Self::matches(s, &predicate))
            .cloned()
            .collect())
    }

    async fn record_counts(
        &self,
        self_where: &RecordWhere,
        root_where: Option<&RecordWhere>,
        references: &[RecordWhere],
    ) -> StoreResult<CardinalityCounts> {
        let records = self.records.read().await;

        let count = |predicate: &RecordWhere| {
            records
                .submissions
                .iter()
                .filter(|s| Self::matches(s, predicate))
                .count() as u64
        };

        let existing_self = count(self_where);

        // Children of the root: records of the submitting form attached to
        // the root record's identity.
        let children_of_root = root_where
            .map(|root| {
                count(&RecordWhere {
                    form: self_where.form.clone(),
                    keys: root.keys.clone(),
                })
            })
            .unwrap_or(0);

        let per_reference = references
            .iter()
            .map(|reference| {
                let n = count(&RecordWhere {
                    form: self_where.form.clone(),
                    keys: reference.keys.clone(),
                });
                (reference.form.clone(), n)
            })
            .collect();

        Ok(CardinalityCounts {
            existing_self,
            children_of_root,
            per_reference,
        })
    }
}
