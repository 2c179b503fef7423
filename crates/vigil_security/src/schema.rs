//! Per-tool JSON-schema validation, backed by the `jsonschema` crate.

use crate::error::SecurityError;
use jsonschema::Validator;
use serde_json::Value;
use std::collections::HashMap;

/// Compiles and caches one [`Validator`] per registered tool schema.
pub struct SchemaValidator {
    compiled: HashMap<String, Validator>,
}

impl SchemaValidator {
    pub fn new() -> Self {
        Self {
            compiled: HashMap::new(),
        }
    }

    /// Compile and register `schema` under `tool_name`. Returns an error if
    /// the schema itself is not valid JSON-schema.
    pub fn register(&mut self, tool_name: impl Into<String>, schema: &Value) -> Result<(), SecurityError> {
        let validator = jsonschema::validator_for(schema)
            .map_err(|e| SecurityError::SchemaMismatch {
                tool: "<registration>".into(),
                reason: e.to_string(),
            })?;
        self.compiled.insert(tool_name.into(), validator);
        Ok(())
    }

    /// Validate `params` against the tool's registered schema.
    pub fn validate(&self, tool_name: &str, params: &Value) -> Result<(), SecurityError> {
        let validator = self
            .compiled
            .get(tool_name)
            .ok_or_else(|| SecurityError::UnknownTool(tool_name.to_string()))?;

        if let Err(first_error) = validator.validate(params) {
            return Err(SecurityError::SchemaMismatch {
                tool: tool_name.to_string(),
                reason: first_error.to_string(),
            });
        }
        Ok(())
    }
}

impl Default for SchemaValidator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn validates_params_matching_schema() {
        let mut validator = SchemaValidator::new();
        let schema = json!({
            "type": "object",
            "properties": { "indices": { "type": "array" } },
            "required": ["indices"]
        });
        validator.register("query_events", &schema).unwrap();

        assert!(validator
            .validate("query_events", &json!({ "indices": ["honeypot-*"] }))
            .is_ok());
    }

    #[test]
    fn rejects_params_violating_schema() {
        let mut validator = SchemaValidator::new();
        let schema = json!({
            "type": "object",
            "properties": { "indices": { "type": "array" } },
            "required": ["indices"]
        });
        validator.register("query_events", &schema).unwrap();

        assert!(validator.validate("query_events", &json!({})).is_err());
    }

    #[test]
    fn unknown_tool_is_an_error() {
        let validator = SchemaValidator::new();
        assert!(matches!(
            validator.validate("nonexistent", &json!({})),
            Err(SecurityError::UnknownTool(_))
        ));
    }
}
