//! Tool registry
//!
//! Tools are pure data: a name, a description for the model and a parameter
//! schema. Execution happens by decoding validated arguments into an
//! [`AviOperation`] and handing the resulting request to the controller.

mod catalog;
mod dispatch;
pub mod schema;

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::config::ToolAccess;
use crate::error::ValidationError;

pub use catalog::{catalog, names};
pub use dispatch::{AviOperation, Method, ResourceKind, ServerRef};

/// Declaration of a callable tool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Value,
    /// Tools that never change controller state
    #[serde(skip)]
    pub read_only: bool,
}

impl ToolDefinition {
    pub fn new(name: &str, description: &str, parameters: Value) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            parameters,
            read_only: false,
        }
    }

    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }
}

/// Lookup of a name the registry does not declare
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("tool `{0}` is not declared")]
pub struct NotFound(pub String);

/// Registry of available tools
///
/// Order is insertion order and is stable; it is the order the model sees
/// the catalog in.
#[derive(Debug, Clone)]
pub struct ToolRegistry {
    tools: Vec<Arc<ToolDefinition>>,
    index: HashMap<String, usize>,
}

impl ToolRegistry {
    /// Create a full registry with every controller tool
    pub fn new() -> Self {
        let mut registry = Self::empty();
        for tool in catalog() {
            registry.register(tool);
        }
        registry
    }

    /// Tools that only read controller state
    pub fn read_only() -> Self {
        let mut registry = Self::empty();
        for tool in catalog().into_iter().filter(|t| t.read_only) {
            registry.register(tool);
        }
        registry
    }

    pub fn empty() -> Self {
        Self {
            tools: Vec::new(),
            index: HashMap::new(),
        }
    }

    pub fn for_access(access: ToolAccess) -> Self {
        match access {
            ToolAccess::Full => Self::new(),
            ToolAccess::ReadOnly => Self::read_only(),
            ToolAccess::None => Self::empty(),
        }
    }

    /// Register a tool, replacing any earlier one with the same name in place
    pub fn register(&mut self, tool: ToolDefinition) {
        match self.index.get(&tool.name) {
            Some(&i) => self.tools[i] = Arc::new(tool),
            None => {
                self.index.insert(tool.name.clone(), self.tools.len());
                self.tools.push(Arc::new(tool));
            }
        }
    }

    pub fn list(&self) -> Vec<&ToolDefinition> {
        self.tools.iter().map(|t| t.as_ref()).collect()
    }

    pub fn lookup(&self, name: &str) -> Result<&ToolDefinition, NotFound> {
        self.index
            .get(name)
            .map(|&i| self.tools[i].as_ref())
            .ok_or_else(|| NotFound(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Check model-emitted arguments against the tool's schema
    ///
    /// A `null` argument set is treated as `{}`; some models omit arguments
    /// entirely for parameterless tools.
    pub fn validate_arguments(&self, name: &str, arguments: &Value) -> Result<Value, ValidationError> {
        let tool = self
            .lookup(name)
            .map_err(|NotFound(name)| ValidationError::UnknownTool(name))?;
        let empty = Value::Object(Default::default());
        let arguments = if arguments.is_null() { &empty } else { arguments };
        schema::validate(&tool.parameters, arguments)
    }

    /// Validate and decode a call into the operation it names
    pub fn decode(&self, name: &str, arguments: &Value) -> Result<AviOperation, ValidationError> {
        let validated = self.validate_arguments(name, arguments)?;
        AviOperation::decode(name, validated)
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_list_order_is_stable() {
        let registry = ToolRegistry::new();
        let names: Vec<_> = registry.list().iter().map(|t| t.name.clone()).collect();
        assert_eq!(names.len(), 18);
        assert_eq!(names[0], names::LIST_VIRTUAL_SERVICES);
        assert_eq!(names[7], names::CREATE_POOL);
        assert_eq!(names[17], names::EXECUTE_GENERIC_OPERATION);
        assert_eq!(
            names,
            ToolRegistry::new()
                .list()
                .iter()
                .map(|t| t.name.clone())
                .collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_lookup_not_found() {
        let registry = ToolRegistry::new();
        assert!(registry.lookup(names::GET_POOL).is_ok());
        assert_eq!(
            registry.lookup("deletePool2").unwrap_err(),
            NotFound("deletePool2".into())
        );
    }

    #[test]
    fn test_validate_unknown_tool() {
        let registry = ToolRegistry::new();
        let err = registry.validate_arguments("deletePool2", &json!({})).unwrap_err();
        assert_eq!(err, ValidationError::UnknownTool("deletePool2".into()));
    }

    #[test]
    fn test_validate_null_arguments() {
        let registry = ToolRegistry::new();
        let validated = registry
            .validate_arguments(names::LIST_POOLS, &Value::Null)
            .unwrap();
        assert!(validated.is_object());
    }

    #[test]
    fn test_validate_create_pool_defaults() {
        let registry = ToolRegistry::new();
        let validated = registry
            .validate_arguments(
                names::CREATE_POOL,
                &json!({
                    "name": "web-pool",
                    "servers": [{"ip": {"addr": "10.0.0.1"}, "port": 80}]
                }),
            )
            .unwrap();
        assert_eq!(validated["default_server_port"], json!(80));
        assert_eq!(validated["lb_algorithm"], json!("LB_ALGORITHM_LEAST_CONNECTIONS"));
        assert_eq!(validated["servers"][0]["ip"]["type"], json!("V4"));
        assert_eq!(validated["servers"][0]["enabled"], json!(true));
    }

    #[test]
    fn test_read_only_registry_excludes_mutations() {
        let registry = ToolRegistry::read_only();
        assert!(registry.contains(names::LIST_POOLS));
        assert!(registry.contains(names::GET_ANALYTICS));
        assert!(!registry.contains(names::CREATE_POOL));
        assert!(!registry.contains(names::DELETE_VIRTUAL_SERVICE));
        assert!(!registry.contains(names::EXECUTE_GENERIC_OPERATION));
        assert!(registry.list().iter().all(|t| t.read_only));
    }

    #[test]
    fn test_for_access_none_is_empty() {
        assert!(ToolRegistry::for_access(ToolAccess::None).is_empty());
        assert_eq!(ToolRegistry::for_access(ToolAccess::Full).len(), 18);
    }

    #[test]
    fn test_register_replaces_in_place() {
        let mut registry = ToolRegistry::new();
        registry.register(ToolDefinition::new(
            names::LIST_VIRTUAL_SERVICES,
            "replaced",
            json!({"type": "object", "properties": {}, "required": []}),
        ));
        assert_eq!(registry.len(), 18);
        assert_eq!(registry.list()[0].description, "replaced");
    }
}
