use clap::{Parser, Subcommand};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use casebook_engine::{FormSession, MemoryStore, RecordIdentity, SessionConfig, SubmitOutcome};
use casebook_schema::{FieldValue, FormCatalog};
use casebook_types::{FieldName, FormId};

#[derive(Parser)]
#[command(name = "casebook")]
#[command(about = "Casebook clinical data capture CLI")]
struct Cli {
    /// Path to the form catalog YAML file
    #[arg(long, default_value = "demos/catalog.yaml")]
    catalog: PathBuf,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// List the forms in the catalog
    Forms,
    /// Show the resolved field widgets of a form
    Fields {
        /// Form identifier
        form: String,
        /// Study context for label/required resolution
        #[arg(long)]
        study: Option<String>,
    },
    /// Validate a JSON values file against a form
    Validate {
        /// Form identifier
        form: String,
        /// Path to a JSON file of field values
        values: PathBuf,
        /// Study context
        #[arg(long)]
        study: Option<String>,
        /// Patient identity entries, as field=value (repeatable)
        #[arg(long = "id")]
        identity: Vec<String>,
    },
    /// Run a full capture session and submit a JSON values file
    Submit {
        /// Form identifier
        form: String,
        /// Path to a JSON file of field values
        values: PathBuf,
        /// Study context
        #[arg(long)]
        study: Option<String>,
        /// Patient identity entries, as field=value (repeatable)
        #[arg(long = "id")]
        identity: Vec<String>,
        /// Acting user linked to the submission
        #[arg(long, default_value = "cli")]
        user: String,
    },
}

fn parse_identity(entries: &[String]) -> anyhow::Result<RecordIdentity> {
    let mut pairs = Vec::new();
    for entry in entries {
        let (field, value) = entry
            .split_once('=')
            .ok_or_else(|| anyhow::anyhow!("identity entry '{entry}' is not field=value"))?;
        pairs.push((FieldName::new(field)?, value.to_owned()));
    }
    Ok(RecordIdentity::from_pairs(pairs))
}

fn read_values(path: &PathBuf) -> anyhow::Result<BTreeMap<FieldName, FieldValue>> {
    let raw = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}

async fn open_session(
    catalog: FormCatalog,
    form: &str,
    study: Option<String>,
    identity: RecordIdentity,
    user: String,
) -> anyhow::Result<FormSession> {
    let store = Arc::new(MemoryStore::new(catalog));
    let mut session = FormSession::new(
        store,
        FormId::new(form)?,
        SessionConfig {
            study,
            identity,
            user,
            excluded_fields: Vec::new(),
        },
    );
    session.initialize().await?;
    Ok(session)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let catalog = FormCatalog::load(&cli.catalog)?;

    match cli.command {
        Some(Commands::Forms) => {
            for entry in &catalog.forms {
                let marker = if entry.root { " (root)" } else { "" };
                println!(
                    "{}: {}{} ({} fields)",
                    entry.form.form_id,
                    entry.form.name,
                    marker,
                    entry.fields.len()
                );
            }
        }
        Some(Commands::Fields { form, study }) => {
            let session = open_session(
                catalog,
                &form,
                study.clone(),
                RecordIdentity::default(),
                "cli".to_owned(),
            )
            .await?;

            for widget in &session.state().field_widgets {
                let required = session.state().required_fields.contains(&widget.name);
                println!(
                    "{:<24} {:<12} required={} label={}",
                    widget.name,
                    format!("{:?}", widget.field_type).to_lowercase(),
                    required,
                    widget.label_for(study.as_deref()).unwrap_or("<none>")
                );
            }
        }
        Some(Commands::Validate {
            form,
            values,
            study,
            identity,
        }) => {
            let mut session = open_session(
                catalog,
                &form,
                study,
                parse_identity(&identity)?,
                "cli".to_owned(),
            )
            .await?;
            session.edit(read_values(&values)?)?;

            let disabled = session.disabled_fields();
            if !disabled.is_empty() {
                let names: Vec<&str> = disabled.iter().map(|n| n.as_str()).collect();
                println!("Disabled fields: {}", names.join(", "));
            }

            let mut clean = true;
            for widget in &session.state().field_widgets {
                if let Some(message) = session.field_message(&widget.name) {
                    println!("{}: {}", widget.name, message);
                    clean = false;
                }
            }
            for error in session.validation_errors() {
                println!("{}: {:?}", error.field, error.kind);
                clean = false;
            }

            if clean {
                println!("Valid.");
            } else {
                std::process::exit(1);
            }
        }
        Some(Commands::Submit {
            form,
            values,
            study,
            identity,
            user,
        }) => {
            let mut session =
                open_session(catalog, &form, study, parse_identity(&identity)?, user).await?;
            session.edit(read_values(&values)?)?;

            match session.submit().await? {
                SubmitOutcome::Submitted { submission } => {
                    println!("Created submission {submission}");
                }
                SubmitOutcome::Invalid(errors) => {
                    for error in errors {
                        eprintln!("{}: {:?}", error.field, error.kind);
                    }
                    std::process::exit(1);
                }
                SubmitOutcome::Rejected(rejection) => {
                    eprintln!("Rejected: {rejection}");
                    std::process::exit(1);
                }
                SubmitOutcome::Failed(notice) => {
                    eprintln!("{}: {}", notice.title, notice.content);
                    std::process::exit(1);
                }
            }
        }
        None => {
            println!("Use 'casebook --help' for commands");
        }
    }

    Ok(())
}
