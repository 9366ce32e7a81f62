//! `vcd_vapp_firewall_rules`: the complete firewall rule list of one vApp network

use super::{scope_attributes, Resource, ResourceResult, ResourceState, VappNetworkScope};
use crate::config::VcdContext;
use crate::error::ProviderError;
use crate::import::import_vapp_network_rules;
use crate::lock::vapp_lock_key;
use crate::rules::{collapse_firewall_rules, expand_firewall_rules, FirewallRuleConfig};
use crate::schema::{NestedBlock, ResourceSchema, SchemaAttribute, SchemaBlock};
use crate::types::FirewallService;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

const DEFAULT_ACTIONS: &[&str] = &["allow", "drop"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FirewallRulesConfig {
    pub id: String,
    #[serde(flatten)]
    pub scope: VappNetworkScope,
    pub enabled: bool,
    pub default_action: String,
    pub log_default_action: bool,
    pub rule: Vec<FirewallRuleConfig>,
}

impl Default for FirewallRulesConfig {
    fn default() -> Self {
        Self {
            id: String::new(),
            scope: VappNetworkScope::default(),
            enabled: true,
            default_action: String::new(),
            log_default_action: false,
            rule: Vec::new(),
        }
    }
}

impl FirewallRulesConfig {
    pub fn validate(&self) -> ResourceResult<()> {
        self.scope.validate()?;
        if !DEFAULT_ACTIONS.contains(&self.default_action.as_str()) {
            return Err(ProviderError::validation(format!(
                "expected default_action to be one of {:?}, got {}",
                DEFAULT_ACTIONS, self.default_action
            )));
        }
        for (index, rule) in self.rule.iter().enumerate() {
            rule.validate()
                .map_err(|e| ProviderError::validation(format!("rule {}: {}", index, e)))?;
        }
        Ok(())
    }
}

pub struct VappFirewallRulesResource;

impl VappFirewallRulesResource {
    pub fn new() -> Self {
        Self
    }

    /// Create and update are the same full replacement
    async fn apply(&self, ctx: &VcdContext, planned: &ResourceState) -> ResourceResult<ResourceState> {
        let config: FirewallRulesConfig = planned.to_typed()?;
        config.validate()?;

        let vapp = config.scope.fetch_vapp(ctx).await?;
        let _guard = ctx.locks.lock(&vapp_lock_key(&vapp.id)).await;

        let rules = expand_firewall_rules(ctx.api.as_ref(), &vapp, &config.rule).await?;
        let service = FirewallService {
            is_enabled: config.enabled,
            default_action: config.default_action.clone(),
            log_default_action: config.log_default_action,
            firewall_rule: rules,
        };

        let network = ctx
            .api
            .update_network_firewall_rules(&vapp, &config.scope.network_id, service)
            .await
            .map_err(|e| ProviderError::remote("error setting firewall rules", e))?;
        tracing::info!(
            vapp = %vapp.name,
            network = %network.name,
            rules = config.rule.len(),
            "firewall rules updated"
        );

        let mut state = planned.clone();
        state.set("id", serde_json::json!(network.id));

        self.read(ctx, &state)
            .await?
            .ok_or_else(|| ProviderError::not_found("vApp network", config.scope.network_id))
    }
}

impl Default for VappFirewallRulesResource {
    fn default() -> Self {
        Self::new()
    }
}

fn rule_block() -> SchemaBlock {
    SchemaBlock::new()
        .with_attribute("name", SchemaAttribute::string().with_description("Rule name").optional())
        .with_attribute(
            "enabled",
            SchemaAttribute::bool()
                .with_description("'true' value will enable firewall rule")
                .optional()
                .with_default(serde_json::json!(true)),
        )
        .with_attribute(
            "policy",
            SchemaAttribute::string()
                .with_description("One of: `drop` or `allow`")
                .optional(),
        )
        .with_attribute(
            "protocol",
            SchemaAttribute::string()
                .with_description("One of: `any`, `icmp`, `tcp`, `udp`, `tcp&udp`")
                .optional()
                .with_default(serde_json::json!("any")),
        )
        .with_attribute("destination_port", SchemaAttribute::string().optional())
        .with_attribute(
            "destination_ip",
            SchemaAttribute::string()
                .with_description("A value of `Any` matches any IP address")
                .optional(),
        )
        .with_attribute("destination_vm_id", SchemaAttribute::string().optional())
        .with_attribute(
            "destination_vm_ip_type",
            SchemaAttribute::string()
                .with_description("`assigned` or `NAT`")
                .optional(),
        )
        .with_attribute("destination_vm_nic_id", SchemaAttribute::number().optional())
        .with_attribute("source_port", SchemaAttribute::string().optional())
        .with_attribute("source_ip", SchemaAttribute::string().optional())
        .with_attribute("source_vm_id", SchemaAttribute::string().optional())
        .with_attribute("source_vm_ip_type", SchemaAttribute::string().optional())
        .with_attribute("source_vm_nic_id", SchemaAttribute::number().optional())
        .with_attribute(
            "enable_logging",
            SchemaAttribute::bool()
                .optional()
                .with_default(serde_json::json!(false)),
        )
}

#[async_trait]
impl Resource for VappFirewallRulesResource {
    fn type_name(&self) -> &str {
        "vcd_vapp_firewall_rules"
    }

    fn schema(&self) -> ResourceSchema {
        let block = scope_attributes(SchemaBlock::new())
            .with_attribute(
                "enabled",
                SchemaAttribute::bool()
                    .with_description("Enable or disable firewall service")
                    .optional()
                    .with_default(serde_json::json!(true)),
            )
            .with_attribute(
                "default_action",
                SchemaAttribute::string()
                    .with_description("What to do should none of the rules match: `allow` or `drop`")
                    .required(),
            )
            .with_attribute(
                "log_default_action",
                SchemaAttribute::bool()
                    .optional()
                    .with_default(serde_json::json!(false)),
            )
            .with_block("rule", NestedBlock::list(rule_block()))
            .with_description("Manages the firewall rules of a vApp network");

        ResourceSchema::new(0, block)
    }

    fn validate(&self, config: &ResourceState) -> ResourceResult<()> {
        config.to_typed::<FirewallRulesConfig>()?.validate()
    }

    async fn create(
        &self,
        ctx: &VcdContext,
        planned: &ResourceState,
    ) -> ResourceResult<ResourceState> {
        self.apply(ctx, planned).await
    }

    async fn read(
        &self,
        ctx: &VcdContext,
        current: &ResourceState,
    ) -> ResourceResult<Option<ResourceState>> {
        let config: FirewallRulesConfig = current.to_typed()?;
        let vapp = config.scope.fetch_vapp(ctx).await?;

        let network = match ctx
            .api
            .get_vapp_network_by_name_or_id(&vapp, &config.scope.network_id)
            .await
        {
            Ok(network) => network,
            Err(e) if e.is_not_found() => {
                tracing::info!(network = %config.scope.network_id, "vApp network not found, removing from state");
                return Ok(None);
            }
            Err(e) => return Err(ProviderError::remote("error finding vApp network", e)),
        };

        let remote = network.firewall_service().cloned().unwrap_or_default();
        let observed = FirewallRulesConfig {
            id: network.id.clone(),
            scope: config.scope,
            enabled: remote.is_enabled,
            default_action: remote.default_action.clone(),
            log_default_action: remote.log_default_action,
            rule: collapse_firewall_rules(&vapp, &remote.firewall_rule),
        };

        let mut state = current.clone();
        state.merge_typed(&observed)?;
        Ok(Some(state))
    }

    async fn update(
        &self,
        ctx: &VcdContext,
        _current: &ResourceState,
        planned: &ResourceState,
    ) -> ResourceResult<ResourceState> {
        self.apply(ctx, planned).await
    }

    async fn delete(&self, ctx: &VcdContext, current: &ResourceState) -> ResourceResult<()> {
        let config: FirewallRulesConfig = current.to_typed()?;
        let vapp = config.scope.fetch_vapp(ctx).await?;
        let _guard = ctx.locks.lock(&vapp_lock_key(&vapp.id)).await;

        ctx.api
            .remove_all_network_firewall_rules(&vapp, &config.scope.network_id)
            .await
            .map_err(|e| ProviderError::remote("error removing firewall rules", e))?;
        tracing::info!(vapp = %vapp.name, network = %config.scope.network_id, "firewall rules removed");
        Ok(())
    }

    async fn import(&self, ctx: &VcdContext, id: &str) -> ResourceResult<ResourceState> {
        let imported = import_vapp_network_rules(ctx, id, self.type_name()).await?;
        Ok(ResourceState::from(imported))
    }
}
