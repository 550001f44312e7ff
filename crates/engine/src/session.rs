//! Form session orchestration.
//!
//! A [`FormSession`] owns everything one mounted form instance needs: the
//! [`FormState`], the lifecycle machine, the compiled validators and a handle
//! to the persistence store. The patient identity, study context and acting
//! user are injected at construction; the engine never reads ambient
//! globals.
//!
//! Lifecycle protocol: construct, then `initialize().await`. Edits go
//! through [`FormSession::edit`]; a periodic [`FormSession::autosave_tick`]
//! persists drafts after ten quiet seconds; [`FormSession::submit`] runs the
//! validity guard, the existence/cardinality checks and the submission
//! write, then clears the form.

use crate::machine::{
    Advance, Clock, EntryAction, FailureNotice, LifecycleEvent, LifecycleMachine, LifecycleState,
    SystemClock,
};
use crate::references::{
    check_cardinality, collect_reference_bundles, self_where, CardinalityRejection,
    ReferenceBundle,
};
use crate::state::{reduce, FormState, Transition, ValidationError, ValidationKind};
use crate::store::{
    FormStore, IdProjection, RecordIdentity, RecordWhere, StoreError, Submission, SubmissionField,
    Template,
};
use crate::{EngineError, EngineResult};
use casebook_schema::condition::disabled_fields;
use casebook_schema::validate::{missing_required_fields, mutex_violation};
use casebook_schema::{FieldDefinition, FieldValidators, FieldValue, Form};
use casebook_types::{FieldName, FormId};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use uuid::Uuid;

/// Per-session configuration, resolved by the caller and injected once.
#[derive(Clone, Debug, Default)]
pub struct SessionConfig {
    /// Active study context, if any.
    pub study: Option<String>,

    /// The record's inherited global identity (for example the patient
    /// identifier fields).
    pub identity: RecordIdentity,

    /// Acting user, linked to successful submissions.
    pub user: String,

    /// Field names excluded from the widget list at load time.
    pub excluded_fields: Vec<FieldName>,
}

/// Result of a submit attempt.
#[derive(Clone, Debug, PartialEq)]
pub enum SubmitOutcome {
    /// The submission was created; the form has been cleared.
    Submitted { submission: Uuid },
    /// The validity guard failed; errors are in the form state.
    Invalid(Vec<ValidationError>),
    /// An existence or cardinality rule rejected the submission.
    Rejected(CardinalityRejection),
    /// A store write failed; the machine is in `Failure`.
    Failed(FailureNotice),
}

/// One mounted form instance.
pub struct FormSession {
    store: Arc<dyn FormStore>,
    config: SessionConfig,
    form_id: FormId,
    form: Option<Form>,
    root: Option<Form>,
    validators: Vec<FieldValidators>,
    state: FormState,
    machine: LifecycleMachine,
    /// Bumped on every (re)initialize; results of an abandoned load are
    /// discarded when the epochs no longer match.
    epoch: u64,
}

impl FormSession {
    /// Creates a session with the wall clock. The session starts in
    /// `Loading`; call [`FormSession::initialize`] next.
    pub fn new(store: Arc<dyn FormStore>, form_id: FormId, config: SessionConfig) -> Self {
        Self::with_clock(store, form_id, config, Arc::new(SystemClock))
    }

    /// Creates a session with an explicit time source (used by tests to
    /// simulate autosave timing).
    pub fn with_clock(
        store: Arc<dyn FormStore>,
        form_id: FormId,
        config: SessionConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            config,
            form_id,
            form: None,
            root: None,
            validators: Vec::new(),
            state: FormState::default(),
            machine: LifecycleMachine::new(clock),
            epoch: 0,
        }
    }

    /// Current form state, for rendering.
    pub fn state(&self) -> &FormState {
        &self.state
    }

    /// Current symbolic lifecycle state.
    pub fn lifecycle(&self) -> LifecycleState {
        self.machine.state()
    }

    /// The failure notice while in `Failure`.
    pub fn failure(&self) -> Option<&FailureNotice> {
        self.machine.failure()
    }

    /// The loaded form, once initialized.
    pub fn form(&self) -> Option<&Form> {
        self.form.as_ref()
    }

    /// Whether the loaded form is the record root.
    pub fn is_root(&self) -> bool {
        match (&self.form, &self.root) {
            (Some(form), Some(root)) => form.form_id == root.form_id,
            _ => false,
        }
    }

    /// Fields currently disabled by their enabling conditions.
    pub fn disabled_fields(&self) -> BTreeSet<FieldName> {
        disabled_fields(&self.state.field_widgets, &self.state.field_values)
    }

    /// First failing validator message for a field, if any.
    ///
    /// Disabled fields report no message regardless of their value.
    pub fn field_message(&self, field: &FieldName) -> Option<String> {
        if self.disabled_fields().contains(field) {
            return None;
        }
        self.validators
            .iter()
            .find(|v| v.field() == field)
            .and_then(|v| v.check(self.state.field_values.get(field)).err())
    }

    /// Loads form metadata, widgets and any existing draft.
    ///
    /// Root-form and form metadata failures are fatal (the machine enters
    /// `Error`); individual widget fetch failures are logged and merely omit
    /// their fields.
    pub async fn initialize(&mut self) -> EngineResult<()> {
        self.epoch += 1;
        let epoch = self.epoch;
        let study = self.config.study.clone();

        let root = match self.store.root_form(study.as_deref()).await {
            Ok(root) => root,
            Err(e) => return self.fail_load(e),
        };

        let is_root = root.form_id == self.form_id;
        let form = if is_root {
            root.clone()
        } else {
            match self.store.form(&self.form_id).await {
                Ok(form) => form,
                Err(e) => return self.fail_load(e),
            }
        };

        // Widget fetches run concurrently; a failed fetch degrades the
        // loaded field set instead of failing the whole form.
        let (root_projection, current_fields) = tokio::join!(
            async {
                if is_root {
                    None
                } else {
                    match self.store.form_id_fields(&root.form_id).await {
                        Ok(projection) => Some(projection),
                        Err(e) => {
                            tracing::warn!(form = %root.form_id, "failed to fetch root id fields: {e}");
                            None
                        }
                    }
                }
            },
            async {
                match self.store.form_fields(&self.form_id, study.as_deref()).await {
                    Ok(fields) => fields,
                    Err(e) => {
                        tracing::warn!(form = %self.form_id, "failed to fetch form fields: {e}");
                        Vec::new()
                    }
                }
            }
        );

        if self.epoch != epoch {
            tracing::warn!(form = %self.form_id, "discarding stale initialize result");
            return Ok(());
        }

        let mut widgets: Vec<FieldDefinition> = Vec::new();
        let mut seen: BTreeSet<FieldName> = BTreeSet::new();
        let excluded: BTreeSet<&FieldName> = self.config.excluded_fields.iter().collect();

        let root_id_fields = root_projection
            .map(|projection| projection.id_fields)
            .unwrap_or_default();
        for field in root_id_fields.into_iter().chain(current_fields) {
            if excluded.contains(&field.name) || !seen.insert(field.name.clone()) {
                continue;
            }
            widgets.push(field);
        }

        let required = form.required_for(study.as_deref());
        let mutex = form.mutex_for(study.as_deref());

        // Compile validator chains once per load; a broken pattern is a
        // metadata failure.
        let mut validators = Vec::with_capacity(widgets.len());
        for widget in &widgets {
            let required_here = required.contains(&widget.name);
            match FieldValidators::build(widget, required_here) {
                Ok(chain) => validators.push(chain),
                Err(e) => {
                    self.machine.handle(LifecycleEvent::LoadFailed)?;
                    return Err(EngineError::Schema(e));
                }
            }
        }

        self.apply(Transition::UpdateWidgets(widgets));
        self.apply(Transition::UpdateRequiredFields(required));
        self.apply(Transition::UpdateExclusiveFields(mutex));
        self.validators = validators;
        self.form = Some(form);
        self.root = Some(root);

        // Resume from an existing draft, when one exists for this identity.
        match self
            .store
            .find_draft(&self.form_id, &self.config.identity)
            .await
        {
            Ok(Some(draft)) => match serde_json::from_str(&draft.data) {
                Ok(values) => {
                    self.apply(Transition::FillForm(values));
                    self.apply(Transition::UpdateDraftId(Some(draft.id)));
                    self.apply(Transition::UpdateDraftDate(draft.last_update));
                }
                Err(e) => {
                    tracing::warn!(draft = %draft.id, "failed to decode draft data: {e}");
                }
            },
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(form = %self.form_id, "draft lookup failed: {e}");
            }
        }

        let advance = self.machine.handle(LifecycleEvent::Done)?;
        self.run_entry_actions(&advance);
        Ok(())
    }

    /// Merges a partial value update, restarting the autosave countdown.
    pub fn edit(&mut self, values: BTreeMap<FieldName, FieldValue>) -> EngineResult<()> {
        self.machine.handle(LifecycleEvent::Edited)?;
        self.apply(Transition::UpdateFieldValues(values));
        Ok(())
    }

    /// Computes the aggregate validation errors under the current values.
    pub fn validation_errors(&self) -> Vec<ValidationError> {
        let disabled = self.disabled_fields();
        let mut errors: Vec<ValidationError> = missing_required_fields(
            &self.state.required_fields,
            &disabled,
            &self.state.field_values,
        )
        .into_iter()
        .map(|field| ValidationError {
            field,
            kind: ValidationKind::Required,
        })
        .collect();

        if let Some(group) = mutex_violation(&self.state.mutex_fields, &self.state.field_values) {
            errors.extend(group.into_iter().map(|field| ValidationError {
                field,
                kind: ValidationKind::Mutex,
            }));
        }

        errors
    }

    /// Attempts submission: validity guard, existence/cardinality checks,
    /// then the submission write and post-write cleanup.
    pub async fn submit(&mut self) -> EngineResult<SubmitOutcome> {
        let errors = self.validation_errors();
        let valid = errors.is_empty();
        let advance = self.machine.handle(LifecycleEvent::Submit { valid })?;
        self.run_entry_actions(&advance);

        if !valid {
            self.apply(Transition::UpdateValidationErrors(errors.clone()));
            return Ok(SubmitOutcome::Invalid(errors));
        }

        self.perform_submit().await
    }

    /// Re-attempts submission from `Failure`.
    pub async fn retry(&mut self) -> EngineResult<SubmitOutcome> {
        self.machine.handle(LifecycleEvent::Retry)?;
        self.perform_submit().await
    }

    /// Returns to editing from `Failure`.
    pub fn cancel_failure(&mut self) -> EngineResult<()> {
        let advance = self.machine.handle(LifecycleEvent::Cancel)?;
        self.run_entry_actions(&advance);
        Ok(())
    }

    /// Forces a reset of values, draft bookkeeping and validation errors.
    pub fn clear(&mut self) -> EngineResult<()> {
        let advance = self.machine.handle(LifecycleEvent::Clear)?;
        self.run_entry_actions(&advance);
        Ok(())
    }

    /// Re-runs loading.
    pub async fn reload(&mut self) -> EngineResult<()> {
        self.machine.handle(LifecycleEvent::Reload)?;
        self.initialize().await
    }

    /// Periodic autosave poll. Persists a draft when the form has been quiet
    /// for the idle window and holds content worth saving. Returns whether a
    /// draft was written.
    pub async fn autosave_tick(&mut self) -> EngineResult<bool> {
        let can_save = self.state.has_content();
        let advance = self
            .machine
            .handle(LifecycleEvent::AutosaveTick { can_save })?;
        if advance.to != LifecycleState::Saving {
            return Ok(false);
        }

        let data = serde_json::to_string(&self.state.field_values)?;
        match self
            .store
            .upsert_draft(&self.form_id, &self.config.identity, &data)
            .await
        {
            Ok(draft_id) => {
                let saved_at = self.machine.now();
                self.apply(Transition::UpdateDraftId(Some(draft_id)));
                self.apply(Transition::UpdateDraftDate(saved_at));
                let advance = self.machine.handle(LifecycleEvent::SaveDone)?;
                self.run_entry_actions(&advance);
                tracing::debug!(form = %self.form_id, draft = %draft_id, "draft saved");
                Ok(true)
            }
            Err(e) => {
                let notice =
                    FailureNotice::new("Draft save failed", format!("The draft could not be saved: {e}"));
                let advance = self.machine.handle(LifecycleEvent::SaveFailed(notice))?;
                self.run_entry_actions(&advance);
                Ok(false)
            }
        }
    }

    /// Saves the current values as a named template.
    pub async fn save_template(&mut self, name: &str) -> EngineResult<Uuid> {
        let data = serde_json::to_string(&self.state.field_values)?;
        Ok(self
            .store
            .create_template(&self.form_id, name, &data)
            .await?)
    }

    /// Lists templates for this form.
    pub async fn templates(&self) -> EngineResult<Vec<Template>> {
        Ok(self.store.find_templates(&self.form_id).await?)
    }

    /// Deletes a template.
    pub async fn delete_template(&self, template: Uuid) -> EngineResult<()> {
        Ok(self.store.delete_template(template).await?)
    }

    /// Replaces the current values with a template's snapshot.
    pub async fn apply_template(&mut self, template: Uuid) -> EngineResult<()> {
        self.machine.handle(LifecycleEvent::Edited)?;
        let templates = self.store.find_templates(&self.form_id).await?;
        let template = templates
            .into_iter()
            .find(|t| t.id == template)
            .ok_or_else(|| EngineError::Store(StoreError::NotFound("template".to_owned())))?;
        let values: BTreeMap<FieldName, FieldValue> = serde_json::from_str(&template.data)?;
        self.apply(Transition::FillForm(values));
        Ok(())
    }

    /// Replaces the current values with a prior submission's fields, for
    /// correction workflows.
    pub fn fill_from_submission(&mut self, submission: &Submission) -> EngineResult<()> {
        self.machine.handle(LifecycleEvent::Edited)?;
        let values = submission
            .fields
            .iter()
            .map(|field| {
                // List values were flattened to JSON array strings on
                // submission; anything else is scalar text.
                let value = serde_json::from_str::<Vec<String>>(&field.value)
                    .map(FieldValue::List)
                    .unwrap_or_else(|_| FieldValue::Text(field.value.clone()));
                (field.key.clone(), value)
            })
            .collect();
        self.apply(Transition::FillForm(values));
        Ok(())
    }

    async fn perform_submit(&mut self) -> EngineResult<SubmitOutcome> {
        let (form, root) = match (&self.form, &self.root) {
            (Some(form), Some(root)) => (form.clone(), root.clone()),
            _ => return Err(EngineError::NotInitialized),
        };
        let is_root = form.form_id == root.form_id;

        // Resolve reference bundles from the filled foreign keys.
        let bundles = if is_root || form.references.is_empty() {
            Vec::new()
        } else {
            let projections = self.fetch_reference_projections(&form).await;
            collect_reference_bundles(&form, &projections, &self.state.field_values)
        };

        let self_predicate = self_where(&form, &self.config.identity.0, &self.state.field_values);
        let root_predicate = (!is_root).then(|| RecordWhere {
            form: root.form_id.clone(),
            keys: self.config.identity.0.clone(),
        });
        let reference_predicates: Vec<RecordWhere> =
            bundles.iter().map(ReferenceBundle::to_where).collect();

        let counts = match self
            .store
            .record_counts(
                &self_predicate,
                root_predicate.as_ref(),
                &reference_predicates,
            )
            .await
        {
            Ok(counts) => counts,
            Err(e) => {
                return self.fail_submit(FailureNotice::new(
                    "Submission failed",
                    format!("Could not verify the record's uniqueness: {e}"),
                ))
            }
        };

        if let Err(rejection) = check_cardinality(&form, is_root, &bundles, &counts) {
            let advance = self.machine.handle(LifecycleEvent::SubmitFailed(
                FailureNotice::new("Submission rejected", rejection.to_string()),
            ))?;
            self.run_entry_actions(&advance);
            return Ok(SubmitOutcome::Rejected(rejection));
        }

        // Build the payload from all non-falsy current values.
        let mut fields = Vec::new();
        for (name, value) in &self.state.field_values {
            if value.is_falsy() {
                continue;
            }
            let rendered = match value {
                FieldValue::Text(s) => s.clone(),
                FieldValue::List(items) => serde_json::to_string(items)?,
            };
            fields.push(SubmissionField {
                key: name.clone(),
                value: rendered,
            });
        }

        let submission = match self
            .store
            .create_submission(&self.form_id, &self.config.identity, fields)
            .await
        {
            Ok(id) => id,
            Err(e) => {
                return self.fail_submit(FailureNotice::new(
                    "Submission failed",
                    format!("The record could not be created: {e}"),
                ))
            }
        };

        // Post-create cleanup runs concurrently; neither failure rolls the
        // submission back.
        let draft_id = self.state.draft_id;
        let (draft_result, link_result) = tokio::join!(
            async {
                match draft_id {
                    Some(id) => self.store.delete_draft(id).await,
                    None => Ok(()),
                }
            },
            self.store
                .link_user_to_submission(&self.config.user, submission)
        );
        if let Err(e) = draft_result {
            tracing::warn!(submission = %submission, "failed to delete draft after submission: {e}");
        }
        if let Err(e) = link_result {
            tracing::warn!(submission = %submission, "failed to link user to submission: {e}");
        }

        let advance = self.machine.handle(LifecycleEvent::SubmitDone)?;
        self.run_entry_actions(&advance);
        tracing::info!(form = %self.form_id, submission = %submission, "submission created");
        Ok(SubmitOutcome::Submitted { submission })
    }

    /// Identifier projections of every referenced form; failed fetches are
    /// logged and their references skipped.
    async fn fetch_reference_projections(&self, form: &Form) -> Vec<IdProjection> {
        let mut projections = Vec::with_capacity(form.references.len());
        for rule in &form.references {
            match self.store.form_id_fields(&rule.form).await {
                Ok(projection) => projections.push(projection),
                Err(e) => {
                    tracing::warn!(form = %rule.form, "failed to fetch reference id fields: {e}");
                }
            }
        }
        projections
    }

    fn apply(&mut self, transition: Transition) {
        self.state = reduce(&self.state, transition);
    }

    fn run_entry_actions(&mut self, advance: &Advance) {
        for action in &advance.actions {
            match action {
                EntryAction::ResetForm => self.apply(Transition::ClearForm),
                EntryAction::SurfaceValidationErrors => {}
                EntryAction::ShowFailure(notice) => {
                    tracing::warn!(title = %notice.title, "{}", notice.content);
                }
            }
        }
    }

    fn fail_load(&mut self, error: StoreError) -> EngineResult<()> {
        tracing::error!(form = %self.form_id, "form metadata load failed: {error}");
        self.machine.handle(LifecycleEvent::LoadFailed)?;
        Err(EngineError::Load(error))
    }

    fn fail_submit(&mut self, notice: FailureNotice) -> EngineResult<SubmitOutcome> {
        let advance = self
            .machine
            .handle(LifecycleEvent::SubmitFailed(notice.clone()))?;
        self.run_entry_actions(&advance);
        Ok(SubmitOutcome::Failed(notice))
    }
}
