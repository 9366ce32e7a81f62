//! Rule expansion and collapse
//!
//! Terraform holds rules as an ordered list of flat records; vCD holds them
//! inside the vApp network's feature set. Expansion turns the former into the
//! latter and collapse goes back. Order is never changed: firewall rules are
//! first-match on the vCD side.
//!
//! VMs are referenced by their global ID in configuration but vCD only
//! accepts the vApp-scoped local ID inside rules. The mapping is looked up on
//! every pass and never cached; it changes whenever VMs move.

pub mod firewall;
pub mod nat;

use crate::api::VcdApi;
use crate::error::{ProviderError, Result};
use crate::types::VApp;

pub use firewall::{collapse_firewall_rules, expand_firewall_rules, FirewallProtocol, FirewallRuleConfig};
pub use nat::{collapse_nat_rules, expand_nat_rules, NatRuleConfig, NatType};

/// Global VM ID -> vApp-scoped local ID. A VM that is not a child of the
/// vApp is a hard error.
pub async fn resolve_vm_scoped_id(api: &dyn VcdApi, vapp: &VApp, vm_id: &str) -> Result<String> {
    match api.get_vapp_vm_by_id(vapp, vm_id).await {
        Ok(vm) => Ok(vm.vapp_scoped_local_id),
        Err(e) if e.is_not_found() => Err(ProviderError::not_found(
            "VM",
            format!("{} in vApp {}", vm_id, vapp.name),
        )),
        Err(e) => Err(ProviderError::remote("error fetching VM", e)),
    }
}

/// vApp-scoped local ID -> global VM ID, or empty when no child matches
pub fn vm_id_from_scoped_id(vapp: &VApp, scoped_id: &str) -> String {
    vapp.vms()
        .iter()
        .find(|vm| vm.vapp_scoped_local_id == scoped_id)
        .map(|vm| vm.id.clone())
        .unwrap_or_default()
}

/// Checks an optional enumerated field; empty means unset
pub(crate) fn check_one_of(field: &str, value: &str, allowed: &[&str]) -> Result<()> {
    if value.is_empty() || allowed.contains(&value) {
        Ok(())
    } else {
        Err(ProviderError::validation(format!(
            "expected {} to be one of {:?}, got {}",
            field, allowed, value
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{VAppChildren, Vm};

    #[test]
    fn test_vm_id_from_scoped_id() {
        let vapp = VApp {
            children: VAppChildren {
                vm: vec![Vm {
                    id: "urn:vcloud:vm:1".to_string(),
                    name: "web".to_string(),
                    href: String::new(),
                    vapp_scoped_local_id: "web-1".to_string(),
                }],
            },
            ..Default::default()
        };
        assert_eq!(vm_id_from_scoped_id(&vapp, "web-1"), "urn:vcloud:vm:1");
        assert_eq!(vm_id_from_scoped_id(&vapp, "gone"), "");
    }

    #[test]
    fn test_check_one_of() {
        assert!(check_one_of("policy", "", &["allow", "drop"]).is_ok());
        assert!(check_one_of("policy", "drop", &["allow", "drop"]).is_ok());
        let err = check_one_of("policy", "DROP", &["allow", "drop"]).unwrap_err();
        assert!(err.to_string().contains("policy"));
    }
}
