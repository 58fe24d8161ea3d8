//! Tool registry and the [`Tool`] trait.
//!
//! Defines the contract every tool implementation satisfies and the
//! [`ToolRegistry`] that stores registered tools, renders their JSON-Schema
//! descriptors for the LLM, and validates arguments before dispatch. Tool
//! implementations live in the `openvia-tools` crate; this module only
//! defines the contract and infrastructure.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};

use openvia_types::ToolSchema;

use crate::executor::ExecContext;

/// Error type for tool execution.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    /// The arguments provided to the tool are invalid.
    #[error("invalid arguments: {0}")]
    InvalidArgs(String),

    /// The tool execution failed at runtime.
    #[error("execution failed: {0}")]
    ExecutionFailed(String),

    /// A file or resource the tool needs was not found.
    #[error("not found: {0}")]
    FileNotFound(String),

    /// A filesystem path is invalid or escapes the workspace.
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// The tool execution exceeded its time limit.
    #[error("timeout after {0}s")]
    Timeout(u64),
}

// ---------------------------------------------------------------------------
// Input schema
// ---------------------------------------------------------------------------

/// JSON type of a tool input field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    /// A UTF-8 string.
    String,
    /// Any number.
    Number,
    /// An integer.
    Integer,
    /// A boolean.
    Boolean,
    /// A JSON object.
    Object,
    /// A JSON array.
    Array,
}

impl FieldType {
    /// JSON Schema type name.
    fn json_name(self) -> &'static str {
        match self {
            FieldType::String => "string",
            FieldType::Number => "number",
            FieldType::Integer => "integer",
            FieldType::Boolean => "boolean",
            FieldType::Object => "object",
            FieldType::Array => "array",
        }
    }

    /// Whether a JSON value satisfies this type.
    fn accepts(self, value: &Value) -> bool {
        match self {
            FieldType::String => value.is_string(),
            FieldType::Number => value.is_number(),
            FieldType::Integer => value.is_i64() || value.is_u64(),
            FieldType::Boolean => value.is_boolean(),
            FieldType::Object => value.is_object(),
            FieldType::Array => value.is_array(),
        }
    }
}

/// One declared input field.
#[derive(Debug, Clone)]
pub struct ToolField {
    /// Field name.
    pub name: String,
    /// Field type.
    pub ty: FieldType,
    /// Human-readable description.
    pub description: String,
    /// Whether the field must be present. Optional, defaulted, and
    /// nullable fields are all declared with `required = false` so they
    /// never leak into the schema's `required` list.
    pub required: bool,
}

/// The typed input schema a tool declares.
///
/// Built with the [`required`](ToolInputSchema::required) /
/// [`optional`](ToolInputSchema::optional) chain and projected to JSON
/// Schema for the LLM.
#[derive(Debug, Clone, Default)]
pub struct ToolInputSchema {
    fields: Vec<ToolField>,
}

impl ToolInputSchema {
    /// An empty schema (tool takes no arguments).
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a required field.
    pub fn required(
        mut self,
        name: impl Into<String>,
        ty: FieldType,
        description: impl Into<String>,
    ) -> Self {
        self.fields.push(ToolField {
            name: name.into(),
            ty,
            description: description.into(),
            required: true,
        });
        self
    }

    /// Add an optional field.
    pub fn optional(
        mut self,
        name: impl Into<String>,
        ty: FieldType,
        description: impl Into<String>,
    ) -> Self {
        self.fields.push(ToolField {
            name: name.into(),
            ty,
            description: description.into(),
            required: false,
        });
        self
    }

    /// The declared fields.
    pub fn fields(&self) -> &[ToolField] {
        &self.fields
    }

    /// Project into a standard JSON Schema object.
    pub fn to_json_schema(&self) -> Value {
        let mut properties = serde_json::Map::new();
        let mut required = Vec::new();
        for field in &self.fields {
            properties.insert(
                field.name.clone(),
                serde_json::json!({
                    "type": field.ty.json_name(),
                    "description": field.description,
                }),
            );
            if field.required {
                required.push(Value::String(field.name.clone()));
            }
        }
        serde_json::json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }

    /// Validate an argument object against this schema.
    ///
    /// `Null` is treated as an empty object. Unknown fields pass; missing
    /// required fields and type mismatches on declared fields fail.
    pub fn validate(&self, args: &Value) -> Result<(), ToolError> {
        let empty = serde_json::Map::new();
        let object = match args {
            Value::Null => &empty,
            Value::Object(map) => map,
            other => {
                return Err(ToolError::InvalidArgs(format!(
                    "expected an object, got {other}"
                )));
            }
        };

        for field in &self.fields {
            match object.get(&field.name) {
                None | Some(Value::Null) => {
                    if field.required {
                        return Err(ToolError::InvalidArgs(format!(
                            "missing required field: {}",
                            field.name
                        )));
                    }
                }
                Some(value) => {
                    if !field.ty.accepts(value) {
                        return Err(ToolError::InvalidArgs(format!(
                            "field '{}' must be of type {}",
                            field.name,
                            field.ty.json_name()
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tool trait and registry
// ---------------------------------------------------------------------------

/// A tool that can be invoked by the agent loop.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique tool name (used in LLM function calling).
    fn name(&self) -> &str;

    /// Human-readable description of what this tool does.
    fn description(&self) -> &str;

    /// The typed input schema for this tool's arguments.
    fn input_schema(&self) -> ToolInputSchema;

    /// Capability tags used by operators writing policy rules.
    fn permission_tags(&self) -> Vec<String> {
        Vec::new()
    }

    /// Execute the tool with validated arguments in the given context.
    async fn execute(&self, args: Value, ctx: &ExecContext) -> Result<Value, ToolError>;
}

/// Registry of available tools, indexed by name.
///
/// Effectively immutable after startup: the gateway registers its tool set
/// once and the registry is then shared read-only across concurrent turns.
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. A tool with the same name is replaced.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        if self.tools.contains_key(&name) {
            warn!(tool = %name, "re-registering tool, replacing previous definition");
        } else {
            debug!(tool = %name, "registering tool");
        }
        self.tools.insert(name, tool);
    }

    /// Register a batch of tools.
    pub fn register_all(&mut self, tools: Vec<Arc<dyn Tool>>) {
        for tool in tools {
            self.register(tool);
        }
    }

    /// Look up a tool by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// All registered tool names, sorted.
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    /// Wire schemas for the LLM, sorted by tool name for deterministic
    /// request bodies.
    pub fn schemas(&self) -> Vec<ToolSchema> {
        let mut schemas: Vec<ToolSchema> = self
            .tools
            .values()
            .map(|tool| ToolSchema {
                name: tool.name().to_string(),
                description: tool.description().to_string(),
                input_schema: tool.input_schema().to_json_schema(),
            })
            .collect();
        schemas.sort_by(|a, b| a.name.cmp(&b.name));
        schemas
    }

    /// Validate arguments for a named tool against its declared schema.
    pub fn validate_args(&self, name: &str, args: &Value) -> Result<(), ToolError> {
        match self.tools.get(name) {
            Some(tool) => tool.input_schema().validate(args),
            None => Err(ToolError::ExecutionFailed(format!(
                "tool not found: {name}"
            ))),
        }
    }

    /// Number of registered tools.
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// True when no tools are registered.
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}
