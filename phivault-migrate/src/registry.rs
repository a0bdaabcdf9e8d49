//! Which plaintext columns of which models get encrypted, and into what.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::MigrationError;

/// One plaintext column and the ciphertext column it migrates into.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldMapping {
    pub source: String,
    pub target: String,
}

impl FieldMapping {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
        }
    }

    /// `email_encrypted` -> `email_hash`. Written only if the store has it.
    pub fn hash_column(&self) -> String {
        format!("{}_hash", self.target.replace("_encrypted", ""))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSpec {
    pub name: String,
    pub fields: Vec<FieldMapping>,
}

/// Ordered list of models and their PHI columns.
///
/// JSON form (`--mapping`):
///
/// ```text
/// {"models": [{"name": "Contact",
///              "fields": [{"source": "email", "target": "email_encrypted"}]}]}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelRegistry {
    models: Vec<ModelSpec>,
}

/// Columns that every person-like model carries.
const PERSON_FIELDS: &[&str] = &[
    "first_name",
    "last_name",
    "email",
    "phone",
    "address_line1",
    "address_line2",
    "city",
    "state",
    "zip",
    "country",
];

const TRAVEL_DOC_FIELDS: &[&str] = &[
    "date_of_birth",
    "nationality",
    "passport_number",
    "passport_expiration_date",
];

impl ModelRegistry {
    pub fn new(models: Vec<ModelSpec>) -> Result<Self, MigrationError> {
        let registry = Self { models };
        registry.validate()?;
        Ok(registry)
    }

    /// PHI columns of the operations backend.
    pub fn phi_defaults() -> Self {
        fn spec(name: &str, sources: &[&str]) -> ModelSpec {
            ModelSpec {
                name: name.to_string(),
                fields: sources
                    .iter()
                    .map(|s| FieldMapping::new(*s, format!("{}_encrypted", s)))
                    .collect(),
            }
        }

        let contact: Vec<&str> = PERSON_FIELDS
            .iter()
            .chain(&["nationality", "date_of_birth", "passport_number", "passport_expiration_date"])
            .copied()
            .collect();
        let patient: Vec<&str> = TRAVEL_DOC_FIELDS
            .iter()
            .chain(&["special_instructions"])
            .copied()
            .collect();
        let passenger: Vec<&str> = TRAVEL_DOC_FIELDS
            .iter()
            .chain(&["contact_number", "notes"])
            .copied()
            .collect();

        Self {
            models: vec![
                spec("UserProfile", PERSON_FIELDS),
                spec("Contact", &contact),
                spec("Patient", &patient),
                spec("Passenger", &passenger),
                spec("Quote", &["quote_pdf_email", "medical_team"]),
                spec("Trip", &["email_chain", "notes"]),
                spec("Agreement", &["destination_email"]),
                spec("Contract", &["signer_email", "signer_name", "notes"]),
            ],
        }
    }

    pub fn from_json(json: &str) -> Result<Self, MigrationError> {
        let registry: Self =
            serde_json::from_str(json).map_err(|e| MigrationError::Mapping(e.to_string()))?;
        registry.validate()?;
        Ok(registry)
    }

    pub fn from_json_file(path: &Path) -> Result<Self, MigrationError> {
        let json = std::fs::read_to_string(path)
            .map_err(|e| MigrationError::Mapping(format!("{}: {}", path.display(), e)))?;
        Self::from_json(&json)
    }

    pub fn models(&self) -> &[ModelSpec] {
        &self.models
    }

    pub fn model_names(&self) -> Vec<&str> {
        self.models.iter().map(|m| m.name.as_str()).collect()
    }

    pub fn get(&self, name: &str) -> Option<&ModelSpec> {
        self.models.iter().find(|m| m.name == name)
    }

    /// Look up `name`, failing with the list of known models.
    pub fn require(&self, name: &str) -> Result<&ModelSpec, MigrationError> {
        self.get(name).ok_or_else(|| MigrationError::UnknownModel {
            name: name.to_string(),
            available: self.model_names().join(", "),
        })
    }

    fn validate(&self) -> Result<(), MigrationError> {
        for (i, model) in self.models.iter().enumerate() {
            if model.name.is_empty() {
                return Err(MigrationError::Mapping("model with empty name".into()));
            }
            if self.models[..i].iter().any(|m| m.name == model.name) {
                return Err(MigrationError::Mapping(format!(
                    "model {} listed twice",
                    model.name
                )));
            }
            for field in &model.fields {
                if field.source.is_empty() || field.target.is_empty() {
                    return Err(MigrationError::Mapping(format!(
                        "{}: empty column name",
                        model.name
                    )));
                }
                if field.source == field.target {
                    return Err(MigrationError::Mapping(format!(
                        "{}.{}: source and target are the same column",
                        model.name, field.source
                    )));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_cover_phi_models_in_order() {
        let registry = ModelRegistry::phi_defaults();
        assert_eq!(
            registry.model_names(),
            vec![
                "UserProfile",
                "Contact",
                "Patient",
                "Passenger",
                "Quote",
                "Trip",
                "Agreement",
                "Contract",
            ]
        );
        assert_eq!(registry.get("UserProfile").unwrap().fields.len(), 10);
        assert_eq!(registry.get("Contact").unwrap().fields.len(), 14);
        assert_eq!(registry.get("Patient").unwrap().fields.len(), 5);
        assert_eq!(registry.get("Passenger").unwrap().fields.len(), 6);

        let contract = registry.get("Contract").unwrap();
        assert_eq!(contract.fields[0], FieldMapping::new("signer_email", "signer_email_encrypted"));
    }

    #[test]
    fn hash_column_name() {
        assert_eq!(FieldMapping::new("email", "email_encrypted").hash_column(), "email_hash");
        assert_eq!(FieldMapping::new("phone", "phone_ct").hash_column(), "phone_ct_hash");
    }

    #[test]
    fn unknown_model_lists_available() {
        let err = ModelRegistry::phi_defaults().require("Invoice").unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("Invoice"));
        assert!(msg.contains("Contact"));
    }

    #[test]
    fn json_mapping() {
        let registry = ModelRegistry::from_json(
            r#"{"models":[{"name":"Crew","fields":[{"source":"license","target":"license_encrypted"}]}]}"#,
        )
        .unwrap();
        assert_eq!(registry.model_names(), vec!["Crew"]);

        assert!(ModelRegistry::from_json("{}").is_err());
        assert!(ModelRegistry::from_json(
            r#"{"models":[{"name":"A","fields":[]},{"name":"A","fields":[]}]}"#
        )
        .is_err());
        assert!(ModelRegistry::from_json(
            r#"{"models":[{"name":"A","fields":[{"source":"x","target":"x"}]}]}"#
        )
        .is_err());
    }
}
