//! YAML form-catalog loading.
//!
//! A catalog document describes every form of a deployment in one YAML file:
//! the form-level schema, its field definitions and which form anchors the
//! record. Catalogs are the boundary between externally authored schema data
//! and the typed model, so deserialization is strict and a structural
//! validation pass runs before a catalog is accepted.

use crate::field::FieldDefinition;
use crate::form::Form;
use crate::{SchemaError, SchemaResult};
use casebook_types::FieldName;
use std::collections::BTreeSet;
use std::path::Path;

/// One form and its field definitions within a catalog.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CatalogForm {
    pub form: Form,

    /// Whether this form anchors a record (at most one root per study).
    #[serde(default)]
    pub root: bool,

    /// Ordered field definitions.
    pub fields: Vec<FieldDefinition>,
}

impl CatalogForm {
    /// Name set of this form's fields.
    pub fn field_names(&self) -> BTreeSet<&FieldName> {
        self.fields.iter().map(|f| &f.name).collect()
    }

    /// This form's identifier field definitions.
    pub fn id_field_definitions(&self) -> Vec<&FieldDefinition> {
        self.fields.iter().filter(|f| f.is_id).collect()
    }
}

/// A full deployment catalog.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FormCatalog {
    pub forms: Vec<CatalogForm>,
}

impl FormCatalog {
    /// Parses a catalog from YAML and validates its structure.
    pub fn from_yaml(yaml: &str) -> SchemaResult<Self> {
        let catalog: FormCatalog = serde_yaml::from_str(yaml)?;
        catalog.validate()?;
        tracing::debug!(forms = catalog.forms.len(), "loaded form catalog");
        Ok(catalog)
    }

    /// Reads and parses a catalog file.
    pub fn load(path: &Path) -> SchemaResult<Self> {
        let yaml = std::fs::read_to_string(path).map_err(SchemaError::CatalogRead)?;
        Self::from_yaml(&yaml)
    }

    /// Looks up a catalog form by id.
    pub fn form(&self, form_id: &str) -> Option<&CatalogForm> {
        self.forms.iter().find(|f| f.form.form_id.as_str() == form_id)
    }

    /// The root form applicable to the given study, lowest weight first.
    pub fn root_form(&self, study: Option<&str>) -> Option<&CatalogForm> {
        self.forms
            .iter()
            .filter(|f| f.root && f.form.applies_to(study))
            .min_by_key(|f| f.form.weight)
    }

    /// Structural validation of the catalog.
    ///
    /// Checks that form ids are unique, that at least one root form exists,
    /// that id/required/mutex sets and condition references name declared
    /// fields, and that select components carry options. Referenced fields in
    /// conditions may also live on the root form (root identifier fields are
    /// merged into every widget list at load time).
    pub fn validate(&self) -> SchemaResult<()> {
        let mut seen = BTreeSet::new();
        for entry in &self.forms {
            if !seen.insert(&entry.form.form_id) {
                return Err(SchemaError::DuplicateForm(entry.form.form_id.clone()));
            }
        }

        if !self.forms.iter().any(|f| f.root) {
            return Err(SchemaError::MissingRootForm);
        }

        let root_fields: BTreeSet<FieldName> = self
            .forms
            .iter()
            .filter(|f| f.root)
            .flat_map(|f| f.fields.iter().map(|d| d.name.clone()))
            .collect();

        for entry in &self.forms {
            let own: BTreeSet<&FieldName> = entry.field_names();
            let known = |name: &FieldName| own.contains(name) || root_fields.contains(name);

            for name in &entry.form.id_fields {
                if !known(name) {
                    return Err(self.unknown_field(entry, name, "id_fields"));
                }
            }

            for name in flattened(&entry.form.required_fields) {
                if !known(name) {
                    return Err(self.unknown_field(entry, name, "required_fields"));
                }
            }

            for name in flattened(&entry.form.mutex_fields) {
                if !known(name) {
                    return Err(self.unknown_field(entry, name, "mutex_fields"));
                }
            }

            for field in &entry.fields {
                if field.component.requires_options() && field.options.is_empty() {
                    return Err(SchemaError::MissingOptions {
                        form: entry.form.form_id.clone(),
                        field: field.name.clone(),
                    });
                }

                for condition in &field.enabling_conditions {
                    if !known(&condition.field) {
                        return Err(self.unknown_field(entry, &condition.field, "enabling_conditions"));
                    }
                }
            }
        }

        Ok(())
    }

    fn unknown_field(
        &self,
        entry: &CatalogForm,
        field: &FieldName,
        context: &'static str,
    ) -> SchemaError {
        SchemaError::UnknownField {
            form: entry.form.form_id.clone(),
            field: field.clone(),
            context,
        }
    }
}

fn flattened(keyed: &crate::field::StudyKeyed<Vec<FieldName>>) -> Vec<&FieldName> {
    match keyed {
        crate::field::StudyKeyed::Flat(names) => names.iter().collect(),
        crate::field::StudyKeyed::ByStudy(map) => map.values().flatten().collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CATALOG: &str = r#"
forms:
  - form:
      form_id: demographics
      name: Demographics
      weight: 0
      id_fields: [patient_id]
      required_fields: [patient_id, family_name]
    root: true
    fields:
      - name: patient_id
        component: text-input
        type: text
        label: Patient ID
        is_id: true
      - name: family_name
        component: text-input
        type: text
        label: Family name
  - form:
      form_id: visit
      name: Visit
      weight: 1
      id_fields: [visit_id]
      required_fields:
        default: [visit_id, visit_date]
      max_records: 4
      references:
        - form: demographics
    fields:
      - name: visit_id
        component: text-input
        type: text
        label: Visit ID
        is_id: true
      - name: visit_date
        component: date-picker
        type: date
        label: Visit date
      - name: smoker
        component: single-select
        type: text
        label: Smoker
        options: ["true", "false"]
      - name: pack_years
        component: text-input
        type: number
        label: Pack years
        enabling_conditions:
          - smoker eq true
"#;

    #[test]
    fn test_catalog_parses_and_validates() {
        let catalog = FormCatalog::from_yaml(CATALOG).expect("valid catalog");
        assert_eq!(catalog.forms.len(), 2);
        assert_eq!(
            catalog.root_form(None).unwrap().form.form_id.as_str(),
            "demographics"
        );
        assert!(catalog.form("visit").is_some());
        assert!(catalog.form("missing").is_none());
    }

    #[test]
    fn test_catalog_rejects_unknown_required_field() {
        let yaml = r#"
forms:
  - form:
      form_id: a
      name: A
      required_fields: [ghost]
    root: true
    fields:
      - name: x
        component: text-input
        type: text
        label: X
"#;
        assert!(matches!(
            FormCatalog::from_yaml(yaml),
            Err(SchemaError::UnknownField { context: "required_fields", .. })
        ));
    }

    #[test]
    fn test_catalog_rejects_select_without_options() {
        let yaml = r#"
forms:
  - form:
      form_id: a
      name: A
    root: true
    fields:
      - name: choice
        component: single-select
        type: text
        label: Choice
"#;
        assert!(matches!(
            FormCatalog::from_yaml(yaml),
            Err(SchemaError::MissingOptions { .. })
        ));
    }

    #[test]
    fn test_catalog_rejects_duplicate_form_ids() {
        let yaml = r#"
forms:
  - form:
      form_id: a
      name: A
    root: true
    fields:
      - name: x
        component: text-input
        type: text
        label: X
  - form:
      form_id: a
      name: A again
    fields:
      - name: y
        component: text-input
        type: text
        label: Y
"#;
        assert!(matches!(
            FormCatalog::from_yaml(yaml),
            Err(SchemaError::DuplicateForm(_))
        ));
    }

    #[test]
    fn test_catalog_requires_a_root_form() {
        let yaml = r#"
forms:
  - form:
      form_id: a
      name: A
    fields:
      - name: x
        component: text-input
        type: text
        label: X
"#;
        assert!(matches!(
            FormCatalog::from_yaml(yaml),
            Err(SchemaError::MissingRootForm)
        ));
    }

    #[test]
    fn test_condition_may_reference_root_field() {
        let yaml = r#"
forms:
  - form:
      form_id: root
      name: Root
      id_fields: [pid]
    root: true
    fields:
      - name: pid
        component: text-input
        type: text
        label: PID
        is_id: true
  - form:
      form_id: child
      name: Child
    fields:
      - name: extra
        component: text-input
        type: text
        label: Extra
        enabling_conditions:
          - pid defined
"#;
        assert!(FormCatalog::from_yaml(yaml).is_ok());
    }

    #[test]
    fn test_catalog_rejects_unknown_top_level_keys() {
        let yaml = "forms: []\nextra: true\n";
        assert!(matches!(
            FormCatalog::from_yaml(yaml),
            Err(SchemaError::InvalidYaml(_))
        ));
    }

    #[test]
    fn test_load_catalog_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("catalog.yaml");
        std::fs::write(&path, CATALOG).unwrap();

        let catalog = FormCatalog::load(&path).expect("load succeeds");
        assert_eq!(catalog.forms.len(), 2);

        let missing = dir.path().join("absent.yaml");
        assert!(matches!(
            FormCatalog::load(&missing),
            Err(SchemaError::CatalogRead(_))
        ));
    }
}
