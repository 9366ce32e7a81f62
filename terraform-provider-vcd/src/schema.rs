//! Schema builders for vCD resources and the JSON-RPC envelope exchanged with Terraform
//!
//! Resource modules describe their attributes with the builders here;
//! `force_new` is kept on our side and drives replacement during plan.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// JSON-RPC error codes returned by the dispatcher
pub const PARSE_ERROR: i32 = -32700;
pub const METHOD_NOT_FOUND: i32 = -32601;
pub const INTERNAL_ERROR: i32 = -32603;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeType {
    String,
    Number,
    Bool,
    List(Box<AttributeType>),
    /// Fixed-shape element, e.g. one row of `vcd_vapp_networks.networks`
    Object(HashMap<String, AttributeType>),
}

/// One attribute of a resource, data source or the provider block
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaAttribute {
    #[serde(rename = "type")]
    pub attr_type: AttributeType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub optional: bool,
    #[serde(default)]
    pub computed: bool,
    #[serde(default)]
    pub sensitive: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<serde_json::Value>,
    /// Changing the value replaces the resource
    #[serde(default, skip_serializing)]
    pub force_new: bool,
}

impl SchemaAttribute {
    fn of(attr_type: AttributeType) -> Self {
        Self {
            attr_type,
            description: None,
            required: false,
            optional: false,
            computed: false,
            sensitive: false,
            default: None,
            force_new: false,
        }
    }

    pub fn string() -> Self {
        Self::of(AttributeType::String)
    }

    pub fn number() -> Self {
        Self::of(AttributeType::Number)
    }

    pub fn bool() -> Self {
        Self::of(AttributeType::Bool)
    }

    pub fn list(element_type: AttributeType) -> Self {
        Self::of(AttributeType::List(Box::new(element_type)))
    }

    pub fn with_description(mut self, desc: &str) -> Self {
        self.description = Some(desc.to_string());
        self
    }

    /// Required and optional are exclusive; the last call wins
    pub fn required(mut self) -> Self {
        self.required = true;
        self.optional = false;
        self
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self.required = false;
        self
    }

    pub fn computed(mut self) -> Self {
        self.computed = true;
        self
    }

    pub fn sensitive(mut self) -> Self {
        self.sensitive = true;
        self
    }

    pub fn with_default(mut self, value: serde_json::Value) -> Self {
        self.default = Some(value);
        self
    }

    pub fn force_new(mut self) -> Self {
        self.force_new = true;
        self
    }
}

/// Attributes plus nested blocks such as `rule` or `filter`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchemaBlock {
    pub attributes: HashMap<String, SchemaAttribute>,
    #[serde(skip_serializing_if = "HashMap::is_empty", default)]
    pub blocks: HashMap<String, NestedBlock>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl SchemaBlock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_attribute(mut self, name: &str, attr: SchemaAttribute) -> Self {
        self.attributes.insert(name.to_string(), attr);
        self
    }

    pub fn with_block(mut self, name: &str, block: NestedBlock) -> Self {
        self.blocks.insert(name.to_string(), block);
        self
    }

    pub fn with_description(mut self, desc: &str) -> Self {
        self.description = Some(desc.to_string());
        self
    }

    /// Sorted names of the attributes whose change forces replacement
    pub fn force_new_attributes(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .attributes
            .iter()
            .filter(|(_, attr)| attr.force_new)
            .map(|(name, _)| name.as_str())
            .collect();
        names.sort_unstable();
        names
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NestingMode {
    Single,
    List,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NestedBlock {
    pub nesting_mode: NestingMode,
    pub block: SchemaBlock,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_items: Option<i64>,
}

impl NestedBlock {
    /// Ordered, repeatable block; rule lists keep their configured order
    pub fn list(block: SchemaBlock) -> Self {
        Self {
            nesting_mode: NestingMode::List,
            block,
            max_items: None,
        }
    }

    pub fn single(block: SchemaBlock) -> Self {
        Self {
            nesting_mode: NestingMode::Single,
            block,
            max_items: Some(1),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceSchema {
    pub version: i64,
    pub block: SchemaBlock,
}

impl ResourceSchema {
    pub fn new(version: i64, block: SchemaBlock) -> Self {
        Self { version, block }
    }
}

/// Everything returned by `GetProviderSchema`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderSchema {
    pub provider: SchemaBlock,
    pub resource_schemas: HashMap<String, ResourceSchema>,
    pub data_source_schemas: HashMap<String, ResourceSchema>,
}

impl ProviderSchema {
    pub fn new(provider: SchemaBlock) -> Self {
        Self {
            provider,
            resource_schemas: HashMap::new(),
            data_source_schemas: HashMap::new(),
        }
    }

    pub fn with_resource(mut self, name: &str, schema: ResourceSchema) -> Self {
        self.resource_schemas.insert(name.to_string(), schema);
        self
    }

    pub fn with_data_source(mut self, name: &str, schema: ResourceSchema) -> Self {
        self.data_source_schemas.insert(name.to_string(), schema);
        self
    }
}

// ============================================================================
// JSON-RPC envelope
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct RpcRequest {
    #[allow(dead_code)]
    pub jsonrpc: String,
    pub id: i64,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

#[derive(Debug, Serialize)]
pub struct RpcResponse {
    pub jsonrpc: String,
    pub id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

/// Protocol-level failure; resource failures travel as diagnostics instead
#[derive(Debug, Serialize)]
pub struct RpcError {
    pub code: i32,
    pub message: String,
}

impl RpcResponse {
    pub fn success(id: i64, result: serde_json::Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: i64, code: i32, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: None,
            error: Some(RpcError {
                code,
                message: message.into(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DiagnosticSeverity {
    Error,
    Warning,
}

/// Message shown to the user by Terraform, e.g. a failed vCD call or an import listing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Diagnostic {
    pub severity: DiagnosticSeverity,
    pub summary: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl Diagnostic {
    fn new(severity: DiagnosticSeverity, summary: &str) -> Self {
        Self {
            severity,
            summary: summary.to_string(),
            detail: None,
        }
    }

    pub fn error(summary: &str) -> Self {
        Self::new(DiagnosticSeverity::Error, summary)
    }

    pub fn warning(summary: &str) -> Self {
        Self::new(DiagnosticSeverity::Warning, summary)
    }

    pub fn with_detail(mut self, detail: &str) -> Self {
        self.detail = Some(detail.to_string());
        self
    }
}
