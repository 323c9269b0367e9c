//! Structural validation of the user configuration document.
//!
//! The schema is a draft 7 JSON Schema (kept as YAML on disk); YAML documents are
//! converted to JSON values before they are checked.

use jsonschema::{JSONSchema, ValidationError};
use serde_yaml::Value;

use crate::error::UsageError;

/// A compiled validation schema.
pub struct Schema {
    validator: JSONSchema,
}

impl Schema {
    pub fn from_value(value: &Value) -> Result<Self, UsageError> {
        let schema = serde_json::to_value(value).map_err(|err| {
            UsageError::configuration(format!("Validation schema is not JSON compatible: {err}"))
        })?;
        let validator = JSONSchema::compile(&schema).map_err(|err| {
            UsageError::configuration(format!("Invalid validation schema: {}", describe(&err)))
        })?;
        Ok(Self { validator })
    }

    /// Every violation, rendered as `<instance path>: <message>`.
    pub fn validate(&self, document: &Value) -> Result<(), Vec<String>> {
        let instance = serde_json::to_value(document)
            .map_err(|err| vec![format!("/: document is not JSON compatible: {err}")])?;
        if let Err(errors) = self.validator.validate(&instance) {
            return Err(errors.map(|error| describe(&error)).collect());
        }
        Ok(())
    }
}

fn describe(error: &ValidationError<'_>) -> String {
    let path = error.instance_path.to_string();
    let path = if path.is_empty() { "/" } else { path.as_str() };
    format!("{path}: {error}")
}
