//! JSON schema helpers for tool definitions
//!
//! Builders produce the parameter schemas shown to the model; `validate`
//! checks model-emitted arguments against the same schemas. The validator
//! understands the subset the builders emit: `type`, `properties`,
//! `required`, `items`, `enum` and `default`.

use serde_json::{json, Map, Value};

use crate::error::ValidationError;

/// Build a JSON schema object
pub fn object_schema() -> SchemaBuilder {
    SchemaBuilder::new("object")
}

/// Build a string property
pub fn string_prop(description: &str) -> Value {
    json!({
        "type": "string",
        "description": description
    })
}

/// Build an integer property
pub fn integer_prop(description: &str) -> Value {
    json!({
        "type": "integer",
        "description": description
    })
}

/// Build a boolean property
pub fn boolean_prop(description: &str) -> Value {
    json!({
        "type": "boolean",
        "description": description
    })
}

/// Build a string property restricted to a fixed set of values
pub fn enum_prop(description: &str, values: &[&str]) -> Value {
    json!({
        "type": "string",
        "description": description,
        "enum": values
    })
}

/// Build an array property
pub fn array_prop(description: &str, items: Value) -> Value {
    json!({
        "type": "array",
        "description": description,
        "items": items
    })
}

/// Build a free-form object property (any keys accepted)
pub fn free_object_prop(description: &str) -> Value {
    json!({
        "type": "object",
        "description": description
    })
}

/// Attach a default value, filled in when the argument is omitted
pub fn with_default(mut prop: Value, default: Value) -> Value {
    if let Some(obj) = prop.as_object_mut() {
        obj.insert("default".to_string(), default);
    }
    prop
}

/// Schema builder for tool definitions
pub struct SchemaBuilder {
    schema_type: String,
    description: Option<String>,
    properties: Map<String, Value>,
    required: Vec<String>,
}

impl SchemaBuilder {
    pub fn new(schema_type: &str) -> Self {
        Self {
            schema_type: schema_type.to_string(),
            description: None,
            properties: Map::new(),
            required: Vec::new(),
        }
    }

    /// Describe the object (used for nested object properties)
    pub fn description(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }

    /// Add a property to the schema
    pub fn property(mut self, name: &str, schema: Value, required: bool) -> Self {
        self.properties.insert(name.to_string(), schema);
        if required {
            self.required.push(name.to_string());
        }
        self
    }

    /// Build the final schema
    pub fn build(self) -> Value {
        let mut schema = json!({
            "type": self.schema_type,
            "properties": self.properties,
            "required": self.required
        });
        if let (Some(description), Some(obj)) = (self.description, schema.as_object_mut()) {
            obj.insert("description".to_string(), Value::String(description));
        }
        schema
    }
}

// =============================================================================
// Validation
// =============================================================================

/// Validate `value` against `schema`, returning a normalized copy
///
/// Normalization drops explicit `null`s for optional properties, fills in
/// declared defaults and turns integral floats into integers.
pub fn validate(schema: &Value, value: &Value) -> Result<Value, ValidationError> {
    validate_at(schema, value, "")
}

fn join(path: &str, key: &str) -> String {
    if path.is_empty() {
        key.to_string()
    } else {
        format!("{}.{}", path, key)
    }
}

fn display_path(path: &str) -> String {
    if path.is_empty() {
        "arguments".to_string()
    } else {
        path.to_string()
    }
}

fn mismatch(path: &str, expected: &str) -> ValidationError {
    ValidationError::TypeMismatch {
        path: display_path(path),
        expected: expected.to_string(),
    }
}

fn validate_at(schema: &Value, value: &Value, path: &str) -> Result<Value, ValidationError> {
    let validated = match schema.get("type").and_then(Value::as_str) {
        Some("object") => validate_object(schema, value, path)?,
        Some("array") => validate_array(schema, value, path)?,
        Some("string") => match value {
            Value::String(_) => value.clone(),
            _ => return Err(mismatch(path, "a string")),
        },
        Some("integer") => match value {
            Value::Number(n) if n.is_i64() || n.is_u64() => value.clone(),
            Value::Number(n) => match n.as_f64() {
                Some(f) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => json!(f as i64),
                _ => return Err(mismatch(path, "an integer")),
            },
            _ => return Err(mismatch(path, "an integer")),
        },
        Some("number") => match value {
            Value::Number(_) => value.clone(),
            _ => return Err(mismatch(path, "a number")),
        },
        Some("boolean") => match value {
            Value::Bool(_) => value.clone(),
            _ => return Err(mismatch(path, "a boolean")),
        },
        _ => value.clone(),
    };

    if let Some(allowed) = schema.get("enum").and_then(Value::as_array) {
        if !allowed.contains(&validated) {
            let allowed = allowed
                .iter()
                .map(|v| v.as_str().map(str::to_string).unwrap_or_else(|| v.to_string()))
                .collect::<Vec<_>>()
                .join(", ");
            return Err(ValidationError::NotInEnum {
                path: display_path(path),
                allowed,
            });
        }
    }

    Ok(validated)
}

fn validate_object(schema: &Value, value: &Value, path: &str) -> Result<Value, ValidationError> {
    let input = value.as_object().ok_or_else(|| mismatch(path, "an object"))?;

    // Objects without declared properties are free-form
    let Some(properties) = schema.get("properties").and_then(Value::as_object) else {
        return Ok(value.clone());
    };

    let mut output = Map::new();
    for (key, item) in input {
        let prop_path = join(path, key);
        let prop_schema = properties
            .get(key)
            .ok_or_else(|| ValidationError::UnknownParameter(prop_path.clone()))?;
        if item.is_null() {
            continue;
        }
        output.insert(key.clone(), validate_at(prop_schema, item, &prop_path)?);
    }

    let required = schema
        .get("required")
        .and_then(Value::as_array)
        .map(|r| r.iter().filter_map(Value::as_str).collect::<Vec<_>>())
        .unwrap_or_default();
    for name in required {
        if !output.contains_key(name) {
            return Err(ValidationError::MissingRequired(join(path, name)));
        }
    }

    for (key, prop_schema) in properties {
        if output.contains_key(key) {
            continue;
        }
        if let Some(default) = prop_schema.get("default") {
            output.insert(key.clone(), default.clone());
        }
    }

    Ok(Value::Object(output))
}

fn validate_array(schema: &Value, value: &Value, path: &str) -> Result<Value, ValidationError> {
    let items = value.as_array().ok_or_else(|| mismatch(path, "an array"))?;
    let Some(item_schema) = schema.get("items") else {
        return Ok(value.clone());
    };
    let validated = items
        .iter()
        .enumerate()
        .map(|(i, item)| validate_at(item_schema, item, &format!("{}[{}]", display_path(path), i)))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Value::Array(validated))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn server_schema() -> Value {
        object_schema()
            .property(
                "ip",
                object_schema()
                    .property("addr", string_prop("Address"), true)
                    .property(
                        "type",
                        with_default(enum_prop("Address family", &["V4", "V6"]), json!("V4")),
                        false,
                    )
                    .build(),
                true,
            )
            .property("port", integer_prop("Port"), false)
            .property("enabled", with_default(boolean_prop("Enabled"), json!(true)), false)
            .build()
    }

    fn pool_schema() -> Value {
        object_schema()
            .property("name", string_prop("Pool name"), true)
            .property("servers", array_prop("Servers", server_schema()), false)
            .property(
                "default_server_port",
                with_default(integer_prop("Port"), json!(80)),
                false,
            )
            .property("body", free_object_prop("Anything"), false)
            .build()
    }

    #[test]
    fn test_builder_output() {
        let schema = object_schema()
            .property("uuid", string_prop("UUID"), true)
            .property("fields", string_prop("Fields"), false)
            .build();
        assert_eq!(schema["type"], "object");
        assert_eq!(schema["required"], json!(["uuid"]));
        assert!(schema["properties"]["fields"].is_object());
    }

    #[test]
    fn test_fills_defaults_recursively() {
        let args = json!({
            "name": "web-pool",
            "servers": [{"ip": {"addr": "10.0.0.1"}, "port": 80}]
        });
        let validated = validate(&pool_schema(), &args).unwrap();
        assert_eq!(
            validated,
            json!({
                "name": "web-pool",
                "servers": [{"ip": {"addr": "10.0.0.1", "type": "V4"}, "port": 80, "enabled": true}],
                "default_server_port": 80
            })
        );
    }

    #[test]
    fn test_missing_required() {
        let err = validate(&pool_schema(), &json!({"servers": []})).unwrap_err();
        assert_eq!(err, ValidationError::MissingRequired("name".into()));

        let err = validate(
            &pool_schema(),
            &json!({"name": "p", "servers": [{"ip": {}}]}),
        )
        .unwrap_err();
        assert_eq!(err, ValidationError::MissingRequired("servers[0].ip.addr".into()));
    }

    #[test]
    fn test_rejects_unknown_keys() {
        let err = validate(&pool_schema(), &json!({"name": "p", "colour": "red"})).unwrap_err();
        assert_eq!(err, ValidationError::UnknownParameter("colour".into()));
    }

    #[test]
    fn test_free_form_object_accepts_any_keys() {
        let validated =
            validate(&pool_schema(), &json!({"name": "p", "body": {"x": 1, "y": [true]}})).unwrap();
        assert_eq!(validated["body"], json!({"x": 1, "y": [true]}));
    }

    #[test]
    fn test_type_mismatch() {
        let err = validate(&pool_schema(), &json!({"name": 7})).unwrap_err();
        assert_eq!(
            err,
            ValidationError::TypeMismatch {
                path: "name".into(),
                expected: "a string".into()
            }
        );

        let err = validate(&pool_schema(), &json!("not an object")).unwrap_err();
        assert_eq!(
            err,
            ValidationError::TypeMismatch {
                path: "arguments".into(),
                expected: "an object".into()
            }
        );
    }

    #[test]
    fn test_integer_accepts_integral_float() {
        let validated =
            validate(&pool_schema(), &json!({"name": "p", "default_server_port": 8080.0})).unwrap();
        assert_eq!(validated["default_server_port"], json!(8080));

        let err =
            validate(&pool_schema(), &json!({"name": "p", "default_server_port": 80.5})).unwrap_err();
        assert!(matches!(err, ValidationError::TypeMismatch { .. }));
    }

    #[test]
    fn test_enum_violation() {
        let err = validate(
            &pool_schema(),
            &json!({"name": "p", "servers": [{"ip": {"addr": "::1", "type": "V5"}}]}),
        )
        .unwrap_err();
        assert_eq!(
            err,
            ValidationError::NotInEnum {
                path: "servers[0].ip.type".into(),
                allowed: "V4, V6".into()
            }
        );
    }

    #[test]
    fn test_null_optional_is_dropped() {
        let validated = validate(&pool_schema(), &json!({"name": "p", "servers": null})).unwrap();
        assert!(validated.get("servers").is_none());
    }
}
