//! Structural checks on embedded payloads (spec §4.4: "structural checks
//! on embedded payloads (YAML shape, schema against a provider-supplied
//! JSON schema)").

use async_trait::async_trait;
use corestate_api::context::RequestContext;
use corestate_api::validator::Validator;
use corestate_types::error::CoreError;
use corestate_types::resource::Resource;
use corestate_types::Result;

fn parse_yaml_payload(res: &Resource) -> Result<serde_json::Value> {
    serde_yaml::from_slice(&res.payload)
        .map_err(|e| CoreError::validation(format!("payload on {} is not valid YAML: {e}", res.ptr)))
}

/// Rejects a payload that does not parse as a YAML mapping at the top
/// level.
pub struct YamlShapeValidator {
    kind: String,
}

impl YamlShapeValidator {
    /// Builds a validator for `kind`.
    pub fn new(kind: impl Into<String>) -> Self {
        Self { kind: kind.into() }
    }
}

#[async_trait]
impl Validator for YamlShapeValidator {
    fn kind(&self) -> &str {
        &self.kind
    }

    async fn validate_create(&self, new: &Resource, _ctx: &RequestContext) -> Result<()> {
        match parse_yaml_payload(new)? {
            serde_json::Value::Object(_) => Ok(()),
            _ => Err(CoreError::validation(format!("payload on {} must be a mapping", new.ptr))),
        }
    }

    async fn validate_update(&self, _old: &Resource, new: &Resource, ctx: &RequestContext) -> Result<()> {
        self.validate_create(new, ctx).await
    }
}

/// Validates the YAML-encoded payload against a provider-supplied JSON
/// schema (compiled once, reused for every call).
pub struct JsonSchemaValidator {
    kind: String,
    schema: jsonschema::JSONSchema,
}

impl JsonSchemaValidator {
    /// Compiles `schema` for `kind`. Returns `None` if `schema` itself is
    /// not a valid JSON Schema document — a programmer error the caller
    /// should surface at startup, not per-request.
    pub fn new(kind: impl Into<String>, schema: &serde_json::Value) -> Option<Self> {
        let compiled = jsonschema::JSONSchema::compile(schema).ok()?;
        Some(Self { kind: kind.into(), schema: compiled })
    }
}

#[async_trait]
impl Validator for JsonSchemaValidator {
    fn kind(&self) -> &str {
        &self.kind
    }

    async fn validate_create(&self, new: &Resource, _ctx: &RequestContext) -> Result<()> {
        let value = parse_yaml_payload(new)?;
        let result = self.schema.validate(&value);
        match result {
            Ok(()) => Ok(()),
            Err(errors) => Err(CoreError::Validation(
                errors.map(|e| format!("{} on {}: {e}", self.kind, new.ptr)).collect(),
            )),
        }
    }

    async fn validate_update(&self, _old: &Resource, new: &Resource, ctx: &RequestContext) -> Result<()> {
        self.validate_create(new, ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use corestate_types::resource::ResourcePointer;
    use serde_json::json;

    fn ctx() -> RequestContext {
        RequestContext::internal("t")
    }

    fn res(yaml: &str) -> Resource {
        Resource::new(ResourcePointer::new("default", "MachineSet", "ms1"), yaml.as_bytes().to_vec())
    }

    #[tokio::test]
    async fn rejects_non_mapping_yaml() {
        let v = YamlShapeValidator::new("MachineSet");
        let err = v.validate_create(&res("- a\n- b\n"), &ctx()).await.unwrap_err();
        assert!(err.is_validation());
    }

    #[tokio::test]
    async fn accepts_mapping_yaml() {
        let v = YamlShapeValidator::new("MachineSet");
        v.validate_create(&res("count: 3\n"), &ctx()).await.unwrap();
    }

    #[tokio::test]
    async fn enforces_json_schema() {
        let schema = json!({
            "type": "object",
            "required": ["count"],
            "properties": { "count": { "type": "integer", "minimum": 1 } },
        });
        let v = JsonSchemaValidator::new("MachineSet", &schema).unwrap();
        v.validate_create(&res("count: 3\n"), &ctx()).await.unwrap();
        let err = v.validate_create(&res("count: 0\n"), &ctx()).await.unwrap_err();
        assert!(err.is_validation());
    }
}
