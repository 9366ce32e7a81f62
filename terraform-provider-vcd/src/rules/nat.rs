//! vApp network NAT rules

use super::{check_one_of, resolve_vm_scoped_id, vm_id_from_scoped_id};
use crate::api::VcdApi;
use crate::error::{ProviderError, Result};
use crate::types::{
    NatOneToOneVmRule, NatRule, NatService, NatVmRule, VApp, NAT_POLICY_ALLOW_TRAFFIC,
    NAT_POLICY_ALLOW_TRAFFIC_IN, NAT_TYPE_IP_TRANSLATION, NAT_TYPE_PORT_FORWARDING,
};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;

const MAPPING_MODES: &[&str] = &["automatic", "manual"];
const PROTOCOLS: &[&str] = &["TCP", "UDP", "TCP_UDP"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NatType {
    PortForwarding,
    IpTranslation,
}

impl NatType {
    pub fn parse(raw: &str) -> Result<Self> {
        match raw {
            NAT_TYPE_PORT_FORWARDING => Ok(Self::PortForwarding),
            NAT_TYPE_IP_TRANSLATION => Ok(Self::IpTranslation),
            other => Err(ProviderError::validation(format!(
                "expected nat_type to be one of [\"{}\", \"{}\"], got {}",
                NAT_TYPE_PORT_FORWARDING, NAT_TYPE_IP_TRANSLATION, other
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PortForwarding => NAT_TYPE_PORT_FORWARDING,
            Self::IpTranslation => NAT_TYPE_IP_TRANSLATION,
        }
    }

    /// Service policy to submit. Masquerading only applies to port forwarding.
    pub fn policy(&self, enable_ip_masquerade: bool) -> &'static str {
        if enable_ip_masquerade && *self == Self::PortForwarding {
            NAT_POLICY_ALLOW_TRAFFIC
        } else {
            NAT_POLICY_ALLOW_TRAFFIC_IN
        }
    }
}

/// Masquerade flag as observed remotely; `None` when it does not apply
pub fn ip_masquerade_from_service(service: &NatService) -> Option<bool> {
    if service.nat_type != NAT_TYPE_PORT_FORWARDING {
        return None;
    }
    match service.policy.as_str() {
        NAT_POLICY_ALLOW_TRAFFIC => Some(true),
        NAT_POLICY_ALLOW_TRAFFIC_IN => Some(false),
        _ => None,
    }
}

/// One `rule` block of `vcd_vapp_nat_rules`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NatRuleConfig {
    /// Computed by vCD
    pub id: String,
    pub mapping_mode: String,
    pub vm_id: String,
    pub vm_nic_id: i64,
    pub external_ip: String,
    pub external_port: i64,
    pub forward_to_port: i64,
    pub protocol: String,
}

impl NatRuleConfig {
    pub fn validate(&self) -> Result<()> {
        if self.vm_id.is_empty() {
            return Err(ProviderError::validation("vm_id is required"));
        }
        check_one_of("mapping_mode", &self.mapping_mode, MAPPING_MODES)?;
        check_one_of("protocol", &self.protocol, PROTOCOLS)?;
        if !self.external_ip.is_empty() && self.external_ip.parse::<IpAddr>().is_err() {
            return Err(ProviderError::validation(format!(
                "expected external_ip to contain a valid IP, got: {}",
                self.external_ip
            )));
        }
        Ok(())
    }
}

/// Configuration -> vCD rules, in the same order
pub async fn expand_nat_rules(
    api: &dyn VcdApi,
    vapp: &VApp,
    nat_type: NatType,
    rules: &[NatRuleConfig],
) -> Result<Vec<NatRule>> {
    let mut expanded = Vec::with_capacity(rules.len());

    for (index, configured) in rules.iter().enumerate() {
        configured
            .validate()
            .map_err(|e| ProviderError::validation(format!("rule {}: {}", index, e)))?;
        let scoped_vm_id = resolve_vm_scoped_id(api, vapp, &configured.vm_id).await?;

        let rule = match nat_type {
            NatType::PortForwarding => NatRule {
                id: None,
                vm_rule: Some(NatVmRule {
                    external_ip_address: None,
                    external_port: configured.external_port,
                    vapp_scoped_vm_id: scoped_vm_id,
                    vm_nic_id: configured.vm_nic_id,
                    internal_port: configured.forward_to_port,
                    protocol: configured.protocol.clone(),
                }),
                one_to_one_vm_rule: None,
            },
            NatType::IpTranslation => NatRule {
                id: None,
                vm_rule: None,
                one_to_one_vm_rule: Some(NatOneToOneVmRule {
                    mapping_mode: configured.mapping_mode.clone(),
                    external_ip_address: (!configured.external_ip.is_empty())
                        .then(|| configured.external_ip.clone()),
                    vapp_scoped_vm_id: scoped_vm_id,
                    vm_nic_id: configured.vm_nic_id,
                }),
            },
        };
        expanded.push(rule);
    }

    Ok(expanded)
}

/// vCD rules -> configuration, interpreted according to the service's NAT type
pub fn collapse_nat_rules(vapp: &VApp, service: &NatService) -> Vec<NatRuleConfig> {
    service
        .nat_rule
        .iter()
        .map(|rule| {
            let mut collapsed = NatRuleConfig {
                id: rule.id.clone().unwrap_or_default(),
                ..Default::default()
            };
            match service.nat_type.as_str() {
                NAT_TYPE_PORT_FORWARDING => {
                    if let Some(vm_rule) = &rule.vm_rule {
                        collapsed.external_port = vm_rule.external_port;
                        collapsed.vm_nic_id = vm_rule.vm_nic_id;
                        collapsed.forward_to_port = vm_rule.internal_port;
                        collapsed.protocol = vm_rule.protocol.clone();
                        collapsed.vm_id = vm_id_from_scoped_id(vapp, &vm_rule.vapp_scoped_vm_id);
                    }
                }
                NAT_TYPE_IP_TRANSLATION => {
                    if let Some(one_to_one) = &rule.one_to_one_vm_rule {
                        collapsed.vm_nic_id = one_to_one.vm_nic_id;
                        collapsed.external_ip =
                            one_to_one.external_ip_address.clone().unwrap_or_default();
                        collapsed.mapping_mode = one_to_one.mapping_mode.clone();
                        collapsed.vm_id =
                            vm_id_from_scoped_id(vapp, &one_to_one.vapp_scoped_vm_id);
                    }
                }
                _ => {}
            }
            collapsed
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{VAppChildren, Vm};

    fn vapp() -> VApp {
        VApp {
            children: VAppChildren {
                vm: vec![Vm {
                    id: "urn:vcloud:vm:db".to_string(),
                    name: "db".to_string(),
                    href: String::new(),
                    vapp_scoped_local_id: "local-db".to_string(),
                }],
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_nat_type_parse() {
        assert_eq!(NatType::parse("portForwarding").unwrap(), NatType::PortForwarding);
        assert_eq!(NatType::parse("ipTranslation").unwrap(), NatType::IpTranslation);
        assert!(NatType::parse("PortForwarding").is_err());
    }

    #[test]
    fn test_policy_selection() {
        assert_eq!(NatType::PortForwarding.policy(true), NAT_POLICY_ALLOW_TRAFFIC);
        assert_eq!(NatType::PortForwarding.policy(false), NAT_POLICY_ALLOW_TRAFFIC_IN);
        assert_eq!(NatType::IpTranslation.policy(true), NAT_POLICY_ALLOW_TRAFFIC_IN);
    }

    #[test]
    fn test_ip_masquerade_from_service() {
        let mut service = NatService {
            nat_type: NAT_TYPE_PORT_FORWARDING.to_string(),
            policy: NAT_POLICY_ALLOW_TRAFFIC.to_string(),
            ..Default::default()
        };
        assert_eq!(ip_masquerade_from_service(&service), Some(true));
        service.policy = NAT_POLICY_ALLOW_TRAFFIC_IN.to_string();
        assert_eq!(ip_masquerade_from_service(&service), Some(false));
        service.nat_type = NAT_TYPE_IP_TRANSLATION.to_string();
        assert_eq!(ip_masquerade_from_service(&service), None);
    }

    #[test]
    fn test_validate() {
        let rule = NatRuleConfig {
            vm_id: "urn:vcloud:vm:db".to_string(),
            external_ip: "10.0.0.5".to_string(),
            protocol: "TCP".to_string(),
            ..Default::default()
        };
        assert!(rule.validate().is_ok());

        let missing_vm = NatRuleConfig::default();
        assert!(missing_vm.validate().is_err());

        let bad_ip = NatRuleConfig {
            external_ip: "10.0.0.300".to_string(),
            ..rule.clone()
        };
        assert!(bad_ip.validate().is_err());

        let bad_protocol = NatRuleConfig {
            protocol: "tcp".to_string(),
            ..rule
        };
        assert!(bad_protocol.validate().is_err());
    }

    #[test]
    fn test_collapse_port_forwarding() {
        let service = NatService {
            is_enabled: true,
            nat_type: NAT_TYPE_PORT_FORWARDING.to_string(),
            policy: NAT_POLICY_ALLOW_TRAFFIC_IN.to_string(),
            nat_rule: vec![NatRule {
                id: Some("65537".to_string()),
                vm_rule: Some(NatVmRule {
                    external_ip_address: None,
                    external_port: 2222,
                    vapp_scoped_vm_id: "local-db".to_string(),
                    vm_nic_id: 0,
                    internal_port: 22,
                    protocol: "TCP".to_string(),
                }),
                one_to_one_vm_rule: None,
            }],
        };

        let collapsed = collapse_nat_rules(&vapp(), &service);
        assert_eq!(collapsed.len(), 1);
        assert_eq!(collapsed[0].id, "65537");
        assert_eq!(collapsed[0].vm_id, "urn:vcloud:vm:db");
        assert_eq!(collapsed[0].external_port, 2222);
        assert_eq!(collapsed[0].forward_to_port, 22);
    }

    #[test]
    fn test_collapse_ip_translation_with_stale_vm() {
        let service = NatService {
            is_enabled: true,
            nat_type: NAT_TYPE_IP_TRANSLATION.to_string(),
            nat_rule: vec![NatRule {
                id: Some("65538".to_string()),
                vm_rule: None,
                one_to_one_vm_rule: Some(NatOneToOneVmRule {
                    mapping_mode: "manual".to_string(),
                    external_ip_address: Some("192.168.1.10".to_string()),
                    vapp_scoped_vm_id: "local-removed".to_string(),
                    vm_nic_id: 1,
                }),
            }],
            ..Default::default()
        };

        let collapsed = collapse_nat_rules(&vapp(), &service);
        assert_eq!(collapsed[0].vm_id, "");
        assert_eq!(collapsed[0].external_ip, "192.168.1.10");
        assert_eq!(collapsed[0].mapping_mode, "manual");
    }
}
