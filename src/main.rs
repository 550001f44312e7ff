use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use casebook_engine::{
    FormSession, FormStore, MemoryStore, RecordIdentity, SessionConfig, SubmitOutcome,
};
use casebook_schema::{FieldValue, FormCatalog};
use casebook_types::{FieldName, FormId};

/// Demo runner for the casebook capture engine.
///
/// Loads a form catalog, opens a capture session for the root form against
/// the in-memory store, and walks the full lifecycle from initialize through
/// submit, followed by a child-form session showing the
/// duplicate-identifier rejection. Every lifecycle transition is visible via
/// `RUST_LOG=casebook=debug`.
///
/// # Environment Variables
/// - `CASEBOOK_CATALOG`: catalog file path (default: "demos/catalog.yaml")
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("casebook=info".parse()?),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let catalog_path = PathBuf::from(
        std::env::var("CASEBOOK_CATALOG").unwrap_or_else(|_| "demos/catalog.yaml".into()),
    );
    tracing::info!("++ Loading form catalog from {}", catalog_path.display());
    let catalog = FormCatalog::load(&catalog_path)?;

    let store = Arc::new(MemoryStore::new(catalog.clone()));
    let identity = RecordIdentity::from_pairs([(
        FieldName::new("patient_id")?,
        "p-0001".to_owned(),
    )]);
    let config = SessionConfig {
        study: None,
        identity: identity.clone(),
        user: "demo".to_owned(),
        excluded_fields: Vec::new(),
    };

    // Capture the root form first; it anchors the record.
    let root = catalog
        .root_form(None)
        .ok_or_else(|| anyhow::anyhow!("catalog has no root form"))?
        .form
        .form_id
        .clone();
    tracing::info!("++ Capturing root form '{root}'");

    let mut session = FormSession::new(store.clone(), root.clone(), config.clone());
    session.initialize().await?;

    session.edit(values(&[
        ("patient_id", "p-0001"),
        ("family_name", "Okafor"),
        ("given_name", "Amara"),
        (
            "date_of_birth",
            r#"{"value":"1984-09-12","resolution":"day"}"#,
        ),
    ]))?;
    report_submit(session.submit().await?);

    // A child form referencing the record; submitting the same identifier
    // twice demonstrates the existence check.
    let visit = FormId::new("visit")?;
    tracing::info!("++ Capturing child form '{visit}'");
    let mut session = FormSession::new(store.clone(), visit.clone(), config.clone());
    session.initialize().await?;

    let visit_values = values(&[
        ("visit_id", "v-0001"),
        (
            "visit_date",
            r#"{"value":"2026-08-01","resolution":"day"}"#,
        ),
        ("smoker", "false"),
    ]);
    session.edit(visit_values.clone())?;
    report_submit(session.submit().await?);

    let mut duplicate = FormSession::new(store.clone(), visit, config);
    duplicate.initialize().await?;
    duplicate.edit(visit_values)?;
    report_submit(duplicate.submit().await?);

    let submissions = store
        .find_submissions(&root, &identity)
        .await?
        .len();
    tracing::info!("++ Store now holds {submissions} root submission(s)");

    Ok(())
}

fn values(entries: &[(&str, &str)]) -> BTreeMap<FieldName, FieldValue> {
    entries
        .iter()
        .filter_map(|(name, value)| {
            Some((FieldName::new(name).ok()?, FieldValue::Text((*value).to_owned())))
        })
        .collect()
}

fn report_submit(outcome: SubmitOutcome) {
    match outcome {
        SubmitOutcome::Submitted { submission } => {
            tracing::info!("submitted: {submission}");
        }
        SubmitOutcome::Invalid(errors) => {
            for error in errors {
                tracing::warn!("invalid: {} ({:?})", error.field, error.kind);
            }
        }
        SubmitOutcome::Rejected(rejection) => {
            tracing::warn!("rejected: {rejection}");
        }
        SubmitOutcome::Failed(notice) => {
            tracing::error!("{}: {}", notice.title, notice.content);
        }
    }
}
