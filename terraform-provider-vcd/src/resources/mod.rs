//! Terraform resources and data sources for VMware Cloud Director
//!
//! Every operation receives the [`VcdContext`] built by `ConfigureProvider`
//! and reports failures as [`ProviderError`].

mod catalog_item;
mod firewall_rules;
mod nat_rules;
mod vapp_networks;

pub use catalog_item::{CatalogItemDataSource, CatalogItemResource};
pub use firewall_rules::{FirewallRulesConfig, VappFirewallRulesResource};
pub use nat_rules::{NatRulesConfig, VappNatRulesResource};
pub use vapp_networks::VappNetworksDataSource;

use crate::config::VcdContext;
use crate::error::{ProviderError, Result};
use crate::import::ImportedVappNetwork;
use crate::schema::{ResourceSchema, SchemaAttribute, SchemaBlock};
use crate::types::VApp;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Result type for resource operations
pub type ResourceResult<T> = std::result::Result<T, ProviderError>;

/// Resource state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceState {
    pub values: HashMap<String, Value>,
}

impl ResourceState {
    pub fn new() -> Self {
        Self {
            values: HashMap::new(),
        }
    }

    /// Build from a JSON object; `None` for null or non-object values
    pub fn from_value(value: &Value) -> Option<Self> {
        value.as_object().map(|obj| Self {
            values: obj.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
        })
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn get_string(&self, key: &str) -> Option<String> {
        self.values.get(key).and_then(|v| v.as_str()).map(String::from)
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.values.get(key).and_then(|v| v.as_i64())
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.values.get(key).and_then(|v| v.as_bool())
    }

    pub fn set(&mut self, key: &str, value: Value) {
        self.values.insert(key.to_string(), value);
    }

    /// Deserialize into a typed configuration. Nulls are dropped first so
    /// that unset attributes take their serde defaults.
    pub fn to_typed<T: DeserializeOwned>(&self) -> Result<T> {
        let object = self
            .values
            .iter()
            .filter(|(_, v)| !v.is_null())
            .map(|(k, v)| (k.clone(), strip_nulls(v.clone())))
            .collect::<serde_json::Map<_, _>>();
        serde_json::from_value(Value::Object(object))
            .map_err(|e| ProviderError::validation(format!("invalid configuration: {}", e)))
    }

    /// Merge the fields of a typed value into this state
    pub fn merge_typed<T: Serialize>(&mut self, typed: &T) -> Result<()> {
        match serde_json::to_value(typed) {
            Ok(Value::Object(obj)) => {
                self.values.extend(obj);
                Ok(())
            }
            Ok(_) => Err(ProviderError::validation("state must be an object")),
            Err(e) => Err(ProviderError::validation(format!("unable to encode state: {}", e))),
        }
    }
}

impl Default for ResourceState {
    fn default() -> Self {
        Self::new()
    }
}

fn strip_nulls(value: Value) -> Value {
    match value {
        Value::Object(obj) => Value::Object(
            obj.into_iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| (k, strip_nulls(v)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.into_iter().map(strip_nulls).collect()),
        other => other,
    }
}

/// Resource trait
#[async_trait]
pub trait Resource: Send + Sync {
    /// Resource type name
    fn type_name(&self) -> &str;

    /// Get the schema for this resource
    fn schema(&self) -> ResourceSchema;

    /// Static checks on a configuration, no remote calls
    fn validate(&self, config: &ResourceState) -> ResourceResult<()> {
        let _ = config;
        Ok(())
    }

    async fn create(&self, ctx: &VcdContext, planned: &ResourceState)
        -> ResourceResult<ResourceState>;

    /// `Ok(None)` when the remote object no longer exists
    async fn read(
        &self,
        ctx: &VcdContext,
        current: &ResourceState,
    ) -> ResourceResult<Option<ResourceState>>;

    async fn update(
        &self,
        ctx: &VcdContext,
        current: &ResourceState,
        planned: &ResourceState,
    ) -> ResourceResult<ResourceState>;

    async fn delete(&self, ctx: &VcdContext, current: &ResourceState) -> ResourceResult<()>;

    /// Turn an import string into a state that `read` can complete
    async fn import(&self, ctx: &VcdContext, id: &str) -> ResourceResult<ResourceState>;

    /// Plan changes
    fn plan_change(
        &self,
        current: Option<&ResourceState>,
        proposed: &ResourceState,
    ) -> ResourceResult<ResourceState> {
        let _ = current;
        Ok(proposed.clone())
    }
}

/// Read-only lookup
#[async_trait]
pub trait DataSource: Send + Sync {
    fn type_name(&self) -> &str;

    fn schema(&self) -> ResourceSchema;

    async fn read(&self, ctx: &VcdContext, config: &ResourceState) -> ResourceResult<ResourceState>;
}

/// Get all available resources
pub fn get_all_resources() -> Vec<Box<dyn Resource>> {
    vec![
        Box::new(CatalogItemResource::new()),
        Box::new(VappFirewallRulesResource::new()),
        Box::new(VappNatRulesResource::new()),
    ]
}

/// Get all available data sources
pub fn get_all_data_sources() -> Vec<Box<dyn DataSource>> {
    vec![
        Box::new(CatalogItemDataSource::new()),
        Box::new(VappNetworksDataSource::new()),
    ]
}

/// `org`/`vdc`/`vapp_id`/`network_id` coordinates shared by the rule resources
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VappNetworkScope {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub org: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub vdc: String,
    pub vapp_id: String,
    pub network_id: String,
}

impl VappNetworkScope {
    fn validate(&self) -> Result<()> {
        if self.vapp_id.is_empty() {
            return Err(ProviderError::validation("vapp_id is required"));
        }
        if self.network_id.is_empty() {
            return Err(ProviderError::validation("network_id is required"));
        }
        Ok(())
    }

    /// Resolve the vApp, falling back to provider-level org and vdc
    async fn fetch_vapp(&self, ctx: &VcdContext) -> Result<VApp> {
        let org = ctx.org_name(Some(&self.org))?;
        let vdc_name = ctx.vdc_name(Some(&self.vdc))?;
        let vdc = ctx
            .api
            .get_vdc(&org, &vdc_name)
            .await
            .map_err(|e| ProviderError::remote("error retrieving Org and VDC", e))?;
        ctx.api
            .get_vapp_by_name_or_id(&vdc, &self.vapp_id)
            .await
            .map_err(|e| ProviderError::remote("error finding vApp", e))
    }
}

/// Coordinates of a vApp network; changing any of them replaces the resource
fn scope_attributes(block: SchemaBlock) -> SchemaBlock {
    block
        .with_attribute("id", SchemaAttribute::string().computed())
        .with_attribute(
            "org",
            SchemaAttribute::string()
                .with_description(
                    "The name of organization to use, optional if defined at provider level",
                )
                .optional()
                .force_new(),
        )
        .with_attribute(
            "vdc",
            SchemaAttribute::string()
                .with_description("The name of VDC to use, optional if defined at provider level")
                .optional()
                .force_new(),
        )
        .with_attribute(
            "vapp_id",
            SchemaAttribute::string()
                .with_description("vApp identifier")
                .required()
                .force_new(),
        )
        .with_attribute(
            "network_id",
            SchemaAttribute::string()
                .with_description("vApp network identifier")
                .required()
                .force_new(),
        )
}

fn optional_string(value: Option<String>) -> Value {
    value.map(Value::String).unwrap_or(Value::Null)
}

impl From<ImportedVappNetwork> for ResourceState {
    fn from(imported: ImportedVappNetwork) -> Self {
        let mut state = ResourceState::new();
        state.set("id", Value::String(imported.id));
        state.set("org", optional_string(imported.org));
        state.set("vdc", optional_string(imported.vdc));
        state.set("vapp_id", Value::String(imported.vapp_id));
        state.set("network_id", Value::String(imported.network_id));
        state
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_state() {
        let mut state = ResourceState::new();
        state.set("name", serde_json::json!("photon-os"));
        state.set("upload_piece_size", serde_json::json!(4));
        state.set("enabled", serde_json::json!(true));

        assert_eq!(state.get_string("name"), Some("photon-os".to_string()));
        assert_eq!(state.get_i64("upload_piece_size"), Some(4));
        assert_eq!(state.get_bool("enabled"), Some(true));
    }

    #[test]
    fn test_to_typed_ignores_nulls() {
        let state = ResourceState::from_value(&serde_json::json!({
            "vapp_id": "web",
            "network_id": "net1",
            "org": null,
            "rule": [{"name": "ssh", "policy": "allow", "enabled": null, "protocol": null}]
        }))
        .unwrap();

        let config: FirewallRulesConfig = state.to_typed().unwrap();
        assert_eq!(config.scope.org, "");
        assert_eq!(config.scope.vapp_id, "web");
        assert!(config.rule[0].enabled);
        assert_eq!(config.rule[0].protocol, "any");
    }

    #[test]
    fn test_merge_typed_overwrites_fields() {
        let mut state = ResourceState::new();
        state.set("id", serde_json::json!("old"));
        state
            .merge_typed(&VappNetworkScope {
                vapp_id: "urn:vcloud:vapp:1".to_string(),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(state.get_string("vapp_id").as_deref(), Some("urn:vcloud:vapp:1"));
        assert_eq!(state.get_string("id").as_deref(), Some("old"));
    }

    #[test]
    fn test_imported_network_state_omits_default_org() {
        let state = ResourceState::from(ImportedVappNetwork {
            id: "urn:vcloud:network:1".to_string(),
            org: None,
            vdc: Some("vdc2".to_string()),
            vapp_id: "urn:vcloud:vapp:1".to_string(),
            network_id: "urn:vcloud:network:1".to_string(),
        });
        assert_eq!(state.get("org"), Some(&Value::Null));
        assert_eq!(state.get_string("vdc").as_deref(), Some("vdc2"));
        assert_eq!(state.get_string("network_id"), state.get_string("id"));
    }

    #[test]
    fn test_registries_have_unique_names() {
        let resources = get_all_resources();
        let mut names: Vec<_> = resources.iter().map(|r| r.type_name().to_string()).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), 3);
        assert!(names.contains(&"vcd_vapp_firewall_rules".to_string()));

        let data_sources = get_all_data_sources();
        assert!(data_sources.iter().any(|d| d.type_name() == "vcd_catalog_item"));
        assert!(data_sources.iter().any(|d| d.type_name() == "vcd_vapp_networks"));
    }
}
