//! vcd_vapp_nat_rules against the in-memory vCD

mod common;

use common::{network_urn, vm, MockVcd};
use serde_json::json;
use terraform_provider_vcd::resources::{Resource, ResourceState, VappNatRulesResource};
use terraform_provider_vcd::types::{NAT_POLICY_ALLOW_TRAFFIC, NAT_POLICY_ALLOW_TRAFFIC_IN};

fn state(value: serde_json::Value) -> ResourceState {
    ResourceState::from_value(&value).unwrap()
}

fn setup() -> std::sync::Arc<MockVcd> {
    let mock = MockVcd::new();
    mock.add_vapp(10, "web", vec![vm(11, "frontend"), vm(12, "backend")], &["net1"]);
    mock
}

#[tokio::test]
async fn test_port_forwarding_with_masquerade() {
    let mock = setup();
    let ctx = mock.context();
    let planned = state(json!({
        "vapp_id": "web",
        "network_id": "net1",
        "nat_type": "portForwarding",
        "enable_ip_masquerade": true,
        "rule": [
            {"vm_id": vm(11, "frontend").id, "vm_nic_id": 0, "external_port": 8080, "forward_to_port": 80, "protocol": "TCP"},
            {"vm_id": vm(12, "backend").id, "vm_nic_id": 1, "external_port": 5432, "forward_to_port": 5432, "protocol": "TCP_UDP"}
        ]
    }));

    let created = VappNatRulesResource::new().create(&ctx, &planned).await.unwrap();

    let service = mock.network("web", "net1").unwrap().nat_service().cloned().unwrap();
    assert_eq!(service.policy, NAT_POLICY_ALLOW_TRAFFIC);
    assert_eq!(service.nat_type, "portForwarding");
    let forwarded = service.nat_rule[1].vm_rule.as_ref().unwrap();
    assert_eq!(forwarded.vapp_scoped_vm_id, "backend-local");
    assert_eq!(forwarded.internal_port, 5432);
    assert!(service.nat_rule[0].one_to_one_vm_rule.is_none());

    assert_eq!(created.get_string("id"), Some(network_urn(100)));
    assert_eq!(created.get_bool("enable_ip_masquerade"), Some(true));
    let rules = created.get("rule").unwrap();
    assert_eq!(rules[0]["id"], "65537");
    assert_eq!(rules[0]["external_port"], 8080);
    assert_eq!(rules[0]["forward_to_port"], 80);
    assert_eq!(rules[1]["vm_id"], json!(vm(12, "backend").id));
    assert_eq!(rules[1]["protocol"], "TCP_UDP");
}

#[tokio::test]
async fn test_ip_translation_ignores_masquerade() {
    let mock = setup();
    let ctx = mock.context();
    let planned = state(json!({
        "vapp_id": "web",
        "network_id": "net1",
        "nat_type": "ipTranslation",
        "enable_ip_masquerade": true,
        "rule": [
            {"vm_id": vm(11, "frontend").id, "vm_nic_id": 0, "mapping_mode": "manual", "external_ip": "192.0.2.10"},
            {"vm_id": vm(12, "backend").id, "vm_nic_id": 0, "mapping_mode": "automatic"}
        ]
    }));

    let created = VappNatRulesResource::new().create(&ctx, &planned).await.unwrap();

    let service = mock.network("web", "net1").unwrap().nat_service().cloned().unwrap();
    assert_eq!(service.policy, NAT_POLICY_ALLOW_TRAFFIC_IN);
    let manual = service.nat_rule[0].one_to_one_vm_rule.as_ref().unwrap();
    assert_eq!(manual.external_ip_address.as_deref(), Some("192.0.2.10"));
    assert!(service.nat_rule[1].one_to_one_vm_rule.as_ref().unwrap().external_ip_address.is_none());

    // masquerade does not apply to ipTranslation; the configured value is kept
    assert_eq!(created.get_bool("enable_ip_masquerade"), Some(true));
    let rules = created.get("rule").unwrap();
    assert_eq!(rules[0]["mapping_mode"], "manual");
    assert_eq!(rules[0]["external_ip"], "192.0.2.10");
    assert_eq!(rules[1]["external_ip"], "");
    assert_eq!(rules[1]["vm_id"], json!(vm(12, "backend").id));
}

#[tokio::test]
async fn test_unknown_vm_fails_without_update() {
    let mock = setup();
    let ctx = mock.context();
    let planned = state(json!({
        "vapp_id": "web",
        "network_id": "net1",
        "nat_type": "portForwarding",
        "rule": [{"vm_id": "urn:vcloud:vm:00000000-0000-0000-0000-000000000077", "vm_nic_id": 0}]
    }));

    let err = VappNatRulesResource::new().create(&ctx, &planned).await.unwrap_err();
    assert!(err.is_not_found());
    assert_eq!(mock.mutations(), 0);
}

#[tokio::test]
async fn test_invalid_nat_type_fails_without_remote_calls() {
    let mock = setup();
    let ctx = mock.context();
    let planned = state(json!({"vapp_id": "web", "network_id": "net1", "nat_type": "masquerade"}));

    let err = VappNatRulesResource::new().create(&ctx, &planned).await.unwrap_err();
    assert!(err.to_string().contains("nat_type"));
    assert_eq!(mock.mutations(), 0);
}

#[tokio::test]
async fn test_read_without_nat_service() {
    let mock = setup();
    let ctx = mock.context();
    let current = state(json!({"vapp_id": "web", "network_id": "net1", "nat_type": "portForwarding"}));

    let read = VappNatRulesResource::new().read(&ctx, &current).await.unwrap().unwrap();
    assert_eq!(read.get_bool("enabled"), Some(false));
    assert_eq!(read.get("rule"), Some(&json!([])));
    assert_eq!(read.get_string("id"), Some(network_urn(100)));
}

#[tokio::test]
async fn test_update_replaces_whole_list_and_delete_empties_it() {
    let mock = setup();
    let ctx = mock.context();
    let resource = VappNatRulesResource::new();
    let first = state(json!({
        "vapp_id": "web",
        "network_id": "net1",
        "nat_type": "portForwarding",
        "rule": [
            {"vm_id": vm(11, "frontend").id, "vm_nic_id": 0, "external_port": 80, "forward_to_port": 80, "protocol": "TCP"},
            {"vm_id": vm(12, "backend").id, "vm_nic_id": 0, "external_port": 81, "forward_to_port": 81, "protocol": "TCP"}
        ]
    }));
    let created = resource.create(&ctx, &first).await.unwrap();

    let mut second = first.clone();
    second.set(
        "rule",
        json!([{"vm_id": vm(12, "backend").id, "vm_nic_id": 0, "external_port": 443, "forward_to_port": 443, "protocol": "TCP"}]),
    );
    let updated = resource.update(&ctx, &created, &second).await.unwrap();
    let rules = updated.get("rule").unwrap().as_array().unwrap();
    assert_eq!(rules.len(), 1);
    assert_eq!(rules[0]["external_port"], 443);

    resource.delete(&ctx, &updated).await.unwrap();
    let service = mock.network("web", "net1").unwrap().nat_service().cloned().unwrap();
    assert!(service.nat_rule.is_empty());
    assert_eq!(mock.mutations(), 3);
}
