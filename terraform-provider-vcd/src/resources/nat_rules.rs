//! `vcd_vapp_nat_rules`: the complete NAT rule list of one vApp network

use super::{scope_attributes, Resource, ResourceResult, ResourceState, VappNetworkScope};
use crate::config::VcdContext;
use crate::error::ProviderError;
use crate::import::import_vapp_network_rules;
use crate::lock::vapp_lock_key;
use crate::rules::nat::ip_masquerade_from_service;
use crate::rules::{collapse_nat_rules, expand_nat_rules, NatRuleConfig, NatType};
use crate::schema::{NestedBlock, ResourceSchema, SchemaAttribute, SchemaBlock};
use crate::types::{NatService, VAppNetwork};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NatRulesConfig {
    pub id: String,
    #[serde(flatten)]
    pub scope: VappNetworkScope,
    pub enabled: bool,
    pub nat_type: String,
    pub enable_ip_masquerade: bool,
    pub rule: Vec<NatRuleConfig>,
}

impl Default for NatRulesConfig {
    fn default() -> Self {
        Self {
            id: String::new(),
            scope: VappNetworkScope::default(),
            enabled: true,
            nat_type: String::new(),
            enable_ip_masquerade: false,
            rule: Vec::new(),
        }
    }
}

impl NatRulesConfig {
    pub fn validate(&self) -> ResourceResult<NatType> {
        self.scope.validate()?;
        let nat_type = NatType::parse(&self.nat_type)?;
        for (index, rule) in self.rule.iter().enumerate() {
            rule.validate()
                .map_err(|e| ProviderError::validation(format!("rule {}: {}", index, e)))?;
        }
        Ok(nat_type)
    }
}

fn warn_if_firewall_disabled(network: &VAppNetwork, nat_enabled: bool) {
    if let Some(firewall) = network.firewall_service() {
        if !firewall.is_enabled && nat_enabled {
            tracing::warn!(
                network = %network.name,
                "for NAT rules to work, firewall has to be enabled. It can be enabled using vcd_vapp_firewall_rules"
            );
        }
    }
}

pub struct VappNatRulesResource;

impl VappNatRulesResource {
    pub fn new() -> Self {
        Self
    }

    async fn apply(&self, ctx: &VcdContext, planned: &ResourceState) -> ResourceResult<ResourceState> {
        let config: NatRulesConfig = planned.to_typed()?;
        let nat_type = config.validate()?;

        let vapp = config.scope.fetch_vapp(ctx).await?;
        let _guard = ctx.locks.lock(&vapp_lock_key(&vapp.id)).await;

        let rules = expand_nat_rules(ctx.api.as_ref(), &vapp, nat_type, &config.rule).await?;
        let service = NatService {
            is_enabled: config.enabled,
            nat_type: nat_type.as_str().to_string(),
            policy: nat_type.policy(config.enable_ip_masquerade).to_string(),
            nat_rule: rules,
        };

        let network = ctx
            .api
            .update_network_nat_rules(&vapp, &config.scope.network_id, service)
            .await
            .map_err(|e| ProviderError::remote("error setting NAT rules", e))?;
        tracing::info!(
            vapp = %vapp.name,
            network = %network.name,
            nat_type = nat_type.as_str(),
            rules = config.rule.len(),
            "NAT rules updated"
        );
        warn_if_firewall_disabled(&network, config.enabled);

        let mut state = planned.clone();
        state.set("id", serde_json::json!(network.id));

        self.read(ctx, &state)
            .await?
            .ok_or_else(|| ProviderError::not_found("vApp network", config.scope.network_id))
    }
}

impl Default for VappNatRulesResource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Resource for VappNatRulesResource {
    fn type_name(&self) -> &str {
        "vcd_vapp_nat_rules"
    }

    fn schema(&self) -> ResourceSchema {
        let rule = SchemaBlock::new()
            .with_attribute(
                "id",
                SchemaAttribute::string()
                    .with_description("ID of the NAT rule")
                    .computed(),
            )
            .with_attribute(
                "mapping_mode",
                SchemaAttribute::string()
                    .with_description("Mapping mode: `automatic` or `manual`")
                    .optional(),
            )
            .with_attribute(
                "vm_id",
                SchemaAttribute::string()
                    .with_description("VM to which this rule applies")
                    .required(),
            )
            .with_attribute(
                "vm_nic_id",
                SchemaAttribute::number()
                    .with_description("VM NIC ID to which this rule applies")
                    .required(),
            )
            .with_attribute(
                "external_ip",
                SchemaAttribute::string()
                    .with_description("External IP address to forward to or the NAT IP for manual mapping")
                    .optional(),
            )
            .with_attribute("external_port", SchemaAttribute::number().optional())
            .with_attribute(
                "forward_to_port",
                SchemaAttribute::number()
                    .with_description("Internal port to forward to")
                    .optional(),
            )
            .with_attribute(
                "protocol",
                SchemaAttribute::string()
                    .with_description("Protocol: `TCP`, `UDP` or `TCP_UDP`")
                    .optional(),
            );

        let block = scope_attributes(SchemaBlock::new())
            .with_attribute(
                "enabled",
                SchemaAttribute::bool()
                    .with_description("Enable or disable NAT service")
                    .optional()
                    .with_default(serde_json::json!(true)),
            )
            .with_attribute(
                "nat_type",
                SchemaAttribute::string()
                    .with_description("One of: `ipTranslation`, `portForwarding`")
                    .required(),
            )
            .with_attribute(
                "enable_ip_masquerade",
                SchemaAttribute::bool()
                    .with_description(
                        "Translate a VM's private IP address to a public one for outbound traffic",
                    )
                    .optional()
                    .with_default(serde_json::json!(false)),
            )
            .with_block("rule", NestedBlock::list(rule))
            .with_description("Manages the NAT rules of a vApp network");

        ResourceSchema::new(0, block)
    }

    fn validate(&self, config: &ResourceState) -> ResourceResult<()> {
        config.to_typed::<NatRulesConfig>()?.validate().map(|_| ())
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
        let config: NatRulesConfig = current.to_typed()?;
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

        let mut state = current.clone();
        match network.nat_service() {
            Some(service) => {
                let observed = NatRulesConfig {
                    id: network.id.clone(),
                    scope: config.scope.clone(),
                    enabled: service.is_enabled,
                    nat_type: service.nat_type.clone(),
                    enable_ip_masquerade: ip_masquerade_from_service(service)
                        .unwrap_or(config.enable_ip_masquerade),
                    rule: collapse_nat_rules(&vapp, service),
                };
                state.merge_typed(&observed)?;
                warn_if_firewall_disabled(&network, service.is_enabled);
            }
            None => {
                tracing::debug!(network = %network.name, "no NAT service configured");
                state.set("id", serde_json::json!(network.id));
                state.set("enabled", serde_json::json!(false));
                state.set("rule", serde_json::json!([]));
            }
        }
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
        let config: NatRulesConfig = current.to_typed()?;
        let vapp = config.scope.fetch_vapp(ctx).await?;
        let _guard = ctx.locks.lock(&vapp_lock_key(&vapp.id)).await;

        ctx.api
            .remove_all_network_nat_rules(&vapp, &config.scope.network_id)
            .await
            .map_err(|e| ProviderError::remote("error deleting NAT rules", e))?;
        tracing::info!(vapp = %vapp.name, network = %config.scope.network_id, "NAT rules removed");
        Ok(())
    }

    async fn import(&self, ctx: &VcdContext, id: &str) -> ResourceResult<ResourceState> {
        let imported = import_vapp_network_rules(ctx, id, self.type_name()).await?;
        Ok(ResourceState::from(imported))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(nat_type: &str) -> NatRulesConfig {
        NatRulesConfig {
            scope: VappNetworkScope {
                vapp_id: "web".to_string(),
                network_id: "net1".to_string(),
                ..Default::default()
            },
            nat_type: nat_type.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_validate_returns_nat_type() {
        assert_eq!(config("ipTranslation").validate().unwrap(), NatType::IpTranslation);
        assert!(config("masquerade").validate().is_err());
    }

    #[test]
    fn test_validate_checks_rules() {
        let mut cfg = config("portForwarding");
        cfg.rule.push(NatRuleConfig {
            protocol: "TCP".to_string(),
            ..Default::default()
        });
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("rule 0"));
    }

    #[test]
    fn test_config_defaults() {
        let cfg: NatRulesConfig = serde_json::from_value(serde_json::json!({
            "vapp_id": "web",
            "network_id": "net1",
            "nat_type": "portForwarding"
        }))
        .unwrap();
        assert!(cfg.enabled);
        assert!(!cfg.enable_ip_masquerade);
        assert!(cfg.rule.is_empty());
    }

    #[test]
    fn test_schema_requires_vm_id_per_rule() {
        let schema = VappNatRulesResource::new().schema();
        let rule = &schema.block.blocks["rule"].block;
        assert!(rule.attributes["vm_id"].required);
        assert!(rule.attributes["id"].computed);
        assert!(schema.block.attributes["nat_type"].required);
    }
}
