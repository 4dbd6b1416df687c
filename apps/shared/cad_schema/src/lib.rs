use schemars::JsonSchema;
use serde::Deserialize;
use std::fs;
use std::path::Path;

pub mod error;

pub use error::{Result, SchemaError};

/// Types loaded from JSON and checked against their own generated schema
///
/// Loading is three steps: parse into a `serde_json::Value`, validate that
/// value against `schema_for!(Self)`, then deserialize. Every schema
/// violation is reported, not only the first one. Implementors can add
/// cross-field rules in [`Validatable::check`], which runs last.
pub trait Validatable: JsonSchema + for<'de> Deserialize<'de> {
    /// Load and validate from JSON file
    fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .map_err(|e| SchemaError::IoError(path.display().to_string(), e))?;

        Self::from_json_str(&content)
    }

    /// Load and validate from JSON string
    fn from_json_str(json: &str) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_str(json)?;
        Self::from_json_value(value)
    }

    /// Validate an already parsed value and deserialize it
    fn from_json_value(value: serde_json::Value) -> Result<Self> {
        validate_value::<Self>(&value)?;
        let parsed: Self = serde_json::from_value(value)?;
        parsed.check()?;
        Ok(parsed)
    }

    /// Extra semantic checks the schema cannot express
    fn check(&self) -> Result<()> {
        Ok(())
    }

    /// Generate JSON Schema for this type
    fn generate_schema() -> schemars::schema::RootSchema {
        schemars::schema_for!(Self)
    }

    /// Generate JSON Schema as JSON string
    fn schema_json() -> Result<String> {
        let schema = Self::generate_schema();
        Ok(serde_json::to_string_pretty(&schema)?)
    }
}

/// Validate `value` against the schema of `T`, collecting every violation
pub fn validate_value<T: JsonSchema>(value: &serde_json::Value) -> Result<()> {
    let schema = serde_json::to_value(schemars::schema_for!(T))?;
    let validator = jsonschema::validator_for(&schema)
        .map_err(|e| SchemaError::ValidationError(vec![e.to_string()]))?;

    let errors: Vec<String> = validator
        .iter_errors(value)
        .map(|e| {
            let path = e.instance_path.to_string();
            if path.is_empty() {
                e.to_string()
            } else {
                format!("{}: {}", path, e)
            }
        })
        .collect();

    if errors.is_empty() {
        Ok(())
    } else {
        Err(SchemaError::ValidationError(errors))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Serialize;

    #[derive(Debug, Serialize, Deserialize, JsonSchema, PartialEq)]
    #[serde(deny_unknown_fields)]
    struct Window {
        #[schemars(range(min = 1, max = 100))]
        width: u32,
        #[schemars(range(min = 1, max = 100))]
        height: u32,
        #[serde(default)]
        title: String,
    }

    impl Validatable for Window {
        fn check(&self) -> Result<()> {
            if self.width < self.height {
                return Err(SchemaError::InvalidValue {
                    field: "width".into(),
                    reason: "must not be smaller than height".into(),
                });
            }
            Ok(())
        }
    }

    #[test]
    fn test_valid_document_loads() {
        let w = Window::from_json_str(r#"{"width": 10, "height": 5}"#).unwrap();
        assert_eq!(w, Window { width: 10, height: 5, title: String::new() });
    }

    #[test]
    fn test_all_violations_reported() {
        let err = Window::from_json_str(r#"{"width": 0, "height": 500}"#).unwrap_err();
        match err {
            SchemaError::ValidationError(errors) => assert_eq!(errors.len(), 2),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_semantic_check_runs_after_schema() {
        let err = Window::from_json_str(r#"{"width": 2, "height": 5}"#).unwrap_err();
        assert!(matches!(err, SchemaError::InvalidValue { .. }));
    }

    #[test]
    fn test_parse_error() {
        assert!(matches!(Window::from_json_str("{"), Err(SchemaError::ParseError(_))));
    }

    #[test]
    fn test_missing_file() {
        let err = Window::from_json_file("/nonexistent/cadence.json").unwrap_err();
        assert!(matches!(err, SchemaError::IoError(..)));
    }

    #[test]
    fn test_schema_json_mentions_fields() {
        let schema = Window::schema_json().unwrap();
        assert!(schema.contains("\"width\""));
        assert!(schema.contains("\"title\""));
    }
}
