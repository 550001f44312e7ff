//! Declarative form schema support.
//!
//! This crate is responsible for the abstract description of a capture form:
//! field definitions, context-keyed labels and required/mutex sets, the
//! enabling-condition mini-language and the per-field validation rules. It
//! also loads that description from YAML catalog documents.
//!
//! Runtime concerns (form state, lifecycle, persistence) live in
//! `casebook-engine`. This crate is purely declarative: everything here is a
//! read-only projection over externally supplied schema data.

pub mod catalog;
pub mod condition;
pub mod field;
pub mod form;
pub mod validate;
pub mod value;

pub use catalog::{CatalogForm, FormCatalog};
pub use condition::{Condition, ConditionOp};
pub use field::{FieldComponent, FieldDefinition, FieldType, Localized, PatternRule, StudyKeyed};
pub use form::{Form, ReferenceRule};
pub use validate::FieldValidators;
pub use value::{DateResolution, DateValue, FieldValue};

use casebook_types::FieldName;

/// Errors returned by the schema crate.
#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    #[error("invalid identifier: {0}")]
    InvalidIdentifier(#[from] casebook_types::IdentError),

    #[error("failed to parse enabling condition '{raw}': {reason}")]
    InvalidCondition { raw: String, reason: String },

    #[error("failed to compile regex for field '{field}': {source}")]
    InvalidPattern {
        field: FieldName,
        #[source]
        source: regex::Error,
    },

    #[error("invalid catalog YAML: {0}")]
    InvalidYaml(#[from] serde_yaml::Error),

    #[error("failed to read catalog file: {0}")]
    CatalogRead(std::io::Error),

    #[error("form '{form}' references unknown field '{field}' in {context}")]
    UnknownField {
        form: casebook_types::FormId,
        field: FieldName,
        context: &'static str,
    },

    #[error("form '{form}' declares select field '{field}' without options")]
    MissingOptions {
        form: casebook_types::FormId,
        field: FieldName,
    },

    #[error("catalog contains duplicate form id '{0}'")]
    DuplicateForm(casebook_types::FormId),

    #[error("catalog contains no root form")]
    MissingRootForm,
}

pub type SchemaResult<T> = std::result::Result<T, SchemaError>;
