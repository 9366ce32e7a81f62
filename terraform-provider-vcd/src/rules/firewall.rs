//! vApp network firewall rules

use super::{check_one_of, resolve_vm_scoped_id, vm_id_from_scoped_id};
use crate::api::VcdApi;
use crate::error::{ProviderError, Result};
use crate::types::{FirewallRule, FirewallRuleProtocols, VApp, VmSelection};
use serde::{Deserialize, Serialize};

const POLICIES: &[&str] = &["drop", "allow"];
const VM_IP_TYPES: &[&str] = &["assigned", "NAT"];

/// Protocol selector of a firewall rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FirewallProtocol {
    #[default]
    Any,
    Icmp,
    Tcp,
    Udp,
    TcpUdp,
}

impl FirewallProtocol {
    /// Case-insensitive; anything unrecognized is `Any`
    pub fn parse(raw: &str) -> Self {
        match raw.to_ascii_lowercase().as_str() {
            "tcp" => Self::Tcp,
            "udp" => Self::Udp,
            "icmp" => Self::Icmp,
            "tcp&udp" => Self::TcpUdp,
            _ => Self::Any,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Any => "any",
            Self::Icmp => "icmp",
            Self::Tcp => "tcp",
            Self::Udp => "udp",
            Self::TcpUdp => "tcp&udp",
        }
    }

    pub fn to_remote(self) -> FirewallRuleProtocols {
        let mut protocols = FirewallRuleProtocols::default();
        match self {
            Self::Any => protocols.any = true,
            Self::Icmp => protocols.icmp = true,
            Self::Tcp => protocols.tcp = true,
            Self::Udp => protocols.udp = true,
            Self::TcpUdp => {
                protocols.tcp = true;
                protocols.udp = true;
            }
        }
        protocols
    }

    pub fn from_remote(protocols: Option<&FirewallRuleProtocols>) -> Self {
        match protocols {
            Some(p) if p.tcp && p.udp => Self::TcpUdp,
            Some(p) if p.tcp => Self::Tcp,
            Some(p) if p.udp => Self::Udp,
            Some(p) if p.icmp => Self::Icmp,
            _ => Self::Any,
        }
    }
}

/// One `rule` block of `vcd_vapp_firewall_rules`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FirewallRuleConfig {
    pub name: String,
    pub enabled: bool,
    pub policy: String,
    pub protocol: String,
    pub destination_port: String,
    pub destination_ip: String,
    pub destination_vm_id: String,
    pub destination_vm_ip_type: String,
    pub destination_vm_nic_id: i64,
    pub source_port: String,
    pub source_ip: String,
    pub source_vm_id: String,
    pub source_vm_ip_type: String,
    pub source_vm_nic_id: i64,
    pub enable_logging: bool,
}

impl Default for FirewallRuleConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            enabled: true,
            policy: String::new(),
            protocol: FirewallProtocol::Any.as_str().to_string(),
            destination_port: String::new(),
            destination_ip: String::new(),
            destination_vm_id: String::new(),
            destination_vm_ip_type: String::new(),
            destination_vm_nic_id: 0,
            source_port: String::new(),
            source_ip: String::new(),
            source_vm_id: String::new(),
            source_vm_ip_type: String::new(),
            source_vm_nic_id: 0,
            enable_logging: false,
        }
    }
}

impl FirewallRuleConfig {
    /// Protocol is deliberately not validated: unknown values become `any`.
    pub fn validate(&self) -> Result<()> {
        check_one_of("policy", &self.policy, POLICIES)?;
        check_one_of("destination_vm_ip_type", &self.destination_vm_ip_type, VM_IP_TYPES)?;
        check_one_of("source_vm_ip_type", &self.source_vm_ip_type, VM_IP_TYPES)?;
        Ok(())
    }
}

async fn vm_selection(
    api: &dyn VcdApi,
    vapp: &VApp,
    vm_id: &str,
    nic_id: i64,
    ip_type: &str,
) -> Result<Option<VmSelection>> {
    if vm_id.is_empty() {
        return Ok(None);
    }
    let scoped = resolve_vm_scoped_id(api, vapp, vm_id).await?;
    Ok(Some(VmSelection {
        vapp_scoped_vm_id: scoped,
        vm_nic_id: nic_id,
        ip_type: ip_type.to_string(),
    }))
}

/// Configuration -> vCD rules, in the same order. Any unresolvable VM
/// aborts the whole expansion.
pub async fn expand_firewall_rules(
    api: &dyn VcdApi,
    vapp: &VApp,
    rules: &[FirewallRuleConfig],
) -> Result<Vec<FirewallRule>> {
    let mut expanded = Vec::with_capacity(rules.len());

    for (index, configured) in rules.iter().enumerate() {
        configured
            .validate()
            .map_err(|e| ProviderError::validation(format!("rule {}: {}", index, e)))?;

        let destination_vm = vm_selection(
            api,
            vapp,
            &configured.destination_vm_id,
            configured.destination_vm_nic_id,
            &configured.destination_vm_ip_type,
        )
        .await?;
        let source_vm = vm_selection(
            api,
            vapp,
            &configured.source_vm_id,
            configured.source_vm_nic_id,
            &configured.source_vm_ip_type,
        )
        .await?;

        expanded.push(FirewallRule {
            id: None,
            is_enabled: configured.enabled,
            match_on_translate: false,
            description: configured.name.clone(),
            policy: configured.policy.clone(),
            protocols: Some(FirewallProtocol::parse(&configured.protocol).to_remote()),
            destination_port_range: configured.destination_port.to_lowercase(),
            destination_ip: configured.destination_ip.to_lowercase(),
            destination_vm,
            source_port_range: configured.source_port.to_lowercase(),
            source_ip: configured.source_ip.to_lowercase(),
            source_vm,
            enable_logging: configured.enable_logging,
        });
    }

    Ok(expanded)
}

/// vCD rules -> configuration. Stale VM references collapse to an empty ID.
pub fn collapse_firewall_rules(vapp: &VApp, rules: &[FirewallRule]) -> Vec<FirewallRuleConfig> {
    rules
        .iter()
        .map(|rule| {
            let mut collapsed = FirewallRuleConfig {
                name: rule.description.clone(),
                enabled: rule.is_enabled,
                policy: rule.policy.clone(),
                protocol: FirewallProtocol::from_remote(rule.protocols.as_ref())
                    .as_str()
                    .to_string(),
                destination_port: rule.destination_port_range.to_lowercase(),
                destination_ip: rule.destination_ip.to_lowercase(),
                source_port: rule.source_port_range.to_lowercase(),
                source_ip: rule.source_ip.to_lowercase(),
                enable_logging: rule.enable_logging,
                ..Default::default()
            };
            if let Some(vm) = &rule.destination_vm {
                collapsed.destination_vm_id = vm_id_from_scoped_id(vapp, &vm.vapp_scoped_vm_id);
                collapsed.destination_vm_nic_id = vm.vm_nic_id;
                collapsed.destination_vm_ip_type = vm.ip_type.clone();
            }
            if let Some(vm) = &rule.source_vm {
                collapsed.source_vm_id = vm_id_from_scoped_id(vapp, &vm.vapp_scoped_vm_id);
                collapsed.source_vm_nic_id = vm.vm_nic_id;
                collapsed.source_vm_ip_type = vm.ip_type.clone();
            }
            collapsed
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{VAppChildren, Vm};

    #[test]
    fn test_protocol_parse_is_case_insensitive() {
        assert_eq!(FirewallProtocol::parse("TCP"), FirewallProtocol::Tcp);
        assert_eq!(FirewallProtocol::parse("Tcp&Udp"), FirewallProtocol::TcpUdp);
        assert_eq!(FirewallProtocol::parse("icmp"), FirewallProtocol::Icmp);
    }

    #[test]
    fn test_unknown_protocol_defaults_to_any() {
        assert_eq!(FirewallProtocol::parse("gre"), FirewallProtocol::Any);
        assert_eq!(FirewallProtocol::parse(""), FirewallProtocol::Any);
        assert!(FirewallProtocol::parse("sctp").to_remote().any);
    }

    #[test]
    fn test_protocol_remote_mapping() {
        for protocol in [
            FirewallProtocol::Any,
            FirewallProtocol::Icmp,
            FirewallProtocol::Tcp,
            FirewallProtocol::Udp,
            FirewallProtocol::TcpUdp,
        ] {
            let remote = protocol.to_remote();
            assert_eq!(FirewallProtocol::from_remote(Some(&remote)), protocol);
        }
        assert_eq!(FirewallProtocol::from_remote(None), FirewallProtocol::Any);
    }

    #[test]
    fn test_rule_config_defaults_from_sparse_json() {
        let rule: FirewallRuleConfig =
            serde_json::from_value(serde_json::json!({"name": "ssh", "policy": "allow"})).unwrap();
        assert!(rule.enabled);
        assert_eq!(rule.protocol, "any");
        assert!(!rule.enable_logging);
    }

    #[test]
    fn test_validate_rejects_bad_policy() {
        let rule = FirewallRuleConfig {
            policy: "reject".to_string(),
            ..Default::default()
        };
        assert!(rule.validate().is_err());

        let rule = FirewallRuleConfig {
            source_vm_ip_type: "nat".to_string(),
            ..Default::default()
        };
        assert!(rule.validate().is_err());
    }

    #[test]
    fn test_collapse_maps_scoped_vm_back() {
        let vapp = VApp {
            children: VAppChildren {
                vm: vec![Vm {
                    id: "urn:vcloud:vm:web".to_string(),
                    name: "web".to_string(),
                    href: String::new(),
                    vapp_scoped_local_id: "local-web".to_string(),
                }],
            },
            ..Default::default()
        };
        let remote = vec![
            FirewallRule {
                description: "to-web".to_string(),
                is_enabled: true,
                policy: "allow".to_string(),
                protocols: Some(FirewallProtocol::Tcp.to_remote()),
                destination_ip: "Any".to_string(),
                destination_port_range: "443".to_string(),
                destination_vm: Some(VmSelection {
                    vapp_scoped_vm_id: "local-web".to_string(),
                    vm_nic_id: 1,
                    ip_type: "assigned".to_string(),
                }),
                ..Default::default()
            },
            FirewallRule {
                description: "stale".to_string(),
                source_vm: Some(VmSelection {
                    vapp_scoped_vm_id: "local-deleted".to_string(),
                    vm_nic_id: 0,
                    ip_type: "NAT".to_string(),
                }),
                ..Default::default()
            },
        ];

        let collapsed = collapse_firewall_rules(&vapp, &remote);
        assert_eq!(collapsed.len(), 2);
        assert_eq!(collapsed[0].name, "to-web");
        assert_eq!(collapsed[0].protocol, "tcp");
        assert_eq!(collapsed[0].destination_ip, "any");
        assert_eq!(collapsed[0].destination_vm_id, "urn:vcloud:vm:web");
        assert_eq!(collapsed[0].destination_vm_nic_id, 1);
        assert_eq!(collapsed[1].name, "stale");
        assert_eq!(collapsed[1].source_vm_id, "");
        assert_eq!(collapsed[1].source_vm_ip_type, "NAT");
        assert_eq!(collapsed[1].protocol, "any");
    }
}
