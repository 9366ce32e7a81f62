//! In-memory vCD used by the integration tests
//!
//! Holds one org (`org1`) with one VDC (`vdc1`) and one catalog (`cat1`).
//! Every mutating call bumps a counter so tests can assert that a failed
//! operation never reached the remote side.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use terraform_provider_vcd::api::VcdApi;
use terraform_provider_vcd::client::{uuid_from_href, uuid_from_id, ClientError, Result};
use terraform_provider_vcd::config::{ProviderDefaults, VcdContext};
use terraform_provider_vcd::types::{
    Catalog, CatalogItem, CatalogItemRecord, FirewallService, Link, Metadata, MetadataEntry,
    MetadataValue, NatService, NetworkConfigSection, NetworkFeatures, Task, UploadSession,
    UploadVAppTemplateParams, VApp, VAppChildren, VAppNetwork, VAppNetworkConfig, Vdc, Vm,
};

pub const ORG: &str = "org1";
pub const VDC: &str = "vdc1";
pub const CATALOG: &str = "cat1";

/// Deterministic UUIDs: `00000000-0000-0000-0000-<n>`
pub fn uuid(n: u64) -> String {
    format!("00000000-0000-0000-0000-{:012}", n)
}

pub fn vm(n: u64, name: &str) -> Vm {
    Vm {
        id: format!("urn:vcloud:vm:{}", uuid(n)),
        name: name.to_string(),
        href: format!("https://vcd.example.com/api/vApp/vm-{}", uuid(n)),
        vapp_scoped_local_id: format!("{}-local", name),
    }
}

pub fn network_urn(n: u64) -> String {
    format!("urn:vcloud:network:{}", uuid(n))
}

struct StoredItem {
    item: CatalogItem,
    metadata: Metadata,
}

#[derive(Default)]
struct State {
    vapps: Vec<VApp>,
    items: Vec<StoredItem>,
    next_id: u64,
}

/// Upload piece as seen by the mock: (offset, total, length)
pub type UploadedPiece = (u64, u64, usize);

#[derive(Default)]
pub struct MockVcd {
    state: Mutex<State>,
    mutations: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    write_delay_ms: AtomicUsize,
    /// When set, deleting a catalog item reports success but keeps it
    sticky_delete: AtomicBool,
    /// When set, upload_chunk fails on this piece index (1-based)
    fail_upload_at: AtomicUsize,
    cancelled: AtomicUsize,
    uploads: Mutex<Vec<UploadedPiece>>,
}

impl MockVcd {
    pub fn new() -> Arc<Self> {
        let mock = Self::default();
        mock.state.lock().unwrap().next_id = 1000;
        Arc::new(mock)
    }

    pub fn context(self: &Arc<Self>) -> VcdContext {
        let api: Arc<dyn VcdApi> = self.clone();
        VcdContext::new(
            api,
            ProviderDefaults {
                org: Some(ORG.to_string()),
                vdc: Some(VDC.to_string()),
                import_separator: ".".to_string(),
            },
        )
    }

    /// Add a vApp with VMs and named networks; network `i` gets UUID `100 + i`
    pub fn add_vapp(&self, n: u64, name: &str, vms: Vec<Vm>, networks: &[&str]) -> VApp {
        let network_config = networks
            .iter()
            .enumerate()
            .map(|(i, net)| VAppNetworkConfig {
                network_name: net.to_string(),
                link: Some(Link {
                    href: format!("https://vcd.example.com/api/admin/network/{}", uuid(100 + i as u64)),
                    ..Default::default()
                }),
                ..Default::default()
            })
            .collect();
        let vapp = VApp {
            id: format!("urn:vcloud:vapp:{}", uuid(n)),
            name: name.to_string(),
            href: format!("https://vcd.example.com/api/vApp/vapp-{}", uuid(n)),
            children: VAppChildren { vm: vms },
            network_config_section: Some(NetworkConfigSection { network_config }),
        };
        self.state.lock().unwrap().vapps.push(vapp.clone());
        vapp
    }

    pub fn remove_vm(&self, vapp_name: &str, vm_id: &str) {
        let mut state = self.state.lock().unwrap();
        if let Some(vapp) = state.vapps.iter_mut().find(|v| v.name == vapp_name) {
            vapp.children.vm.retain(|vm| vm.id != vm_id);
        }
    }

    /// Add a catalog item created on 2021-03-`day`
    pub fn add_catalog_item(&self, n: u64, name: &str, day: u32, metadata: &[(&str, &str)]) -> CatalogItem {
        let item = CatalogItem {
            id: format!("urn:vcloud:catalogitem:{}", uuid(n)),
            name: name.to_string(),
            href: format!("https://vcd.example.com/api/catalogItem/{}", uuid(n)),
            description: String::new(),
            date_created: Utc.with_ymd_and_hms(2021, 3, day, 12, 0, 0).single(),
            entity: None,
        };
        let metadata = Metadata {
            metadata_entry: metadata
                .iter()
                .map(|(k, v)| MetadataEntry {
                    key: k.to_string(),
                    typed_value: MetadataValue {
                        value: v.to_string(),
                    },
                })
                .collect(),
        };
        self.state.lock().unwrap().items.push(StoredItem {
            item: item.clone(),
            metadata,
        });
        item
    }

    pub fn catalog_item(&self, name: &str) -> Option<CatalogItem> {
        let state = self.state.lock().unwrap();
        state.items.iter().find(|s| s.item.name == name).map(|s| s.item.clone())
    }

    pub fn network(&self, vapp_name: &str, network_name: &str) -> Option<VAppNetwork> {
        let state = self.state.lock().unwrap();
        let vapp = state.vapps.iter().find(|v| v.name == vapp_name)?;
        find_network(vapp, network_name)
    }

    /// Replace a network's firewall service without counting a mutation
    pub fn seed_firewall(&self, vapp_name: &str, network_name: &str, service: FirewallService) {
        self.with_network(vapp_name, network_name, |features| {
            features.firewall_service = Some(service)
        })
        .unwrap();
    }

    pub fn mutations(&self) -> usize {
        self.mutations.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn cancelled_tasks(&self) -> usize {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn uploads(&self) -> Vec<UploadedPiece> {
        self.uploads.lock().unwrap().clone()
    }

    pub fn set_write_delay(&self, delay: Duration) {
        self.write_delay_ms
            .store(delay.as_millis() as usize, Ordering::SeqCst);
    }

    pub fn set_sticky_delete(&self, sticky: bool) {
        self.sticky_delete.store(sticky, Ordering::SeqCst);
    }

    pub fn fail_upload_at(&self, piece: usize) {
        self.fail_upload_at.store(piece, Ordering::SeqCst);
    }

    fn with_network<F>(&self, vapp_name_or_id: &str, network: &str, f: F) -> Result<VAppNetwork>
    where
        F: FnOnce(&mut NetworkFeatures),
    {
        let mut state = self.state.lock().unwrap();
        let vapp = state
            .vapps
            .iter_mut()
            .find(|v| v.name == vapp_name_or_id || v.id == vapp_name_or_id)
            .ok_or_else(|| ClientError::NotFound(vapp_name_or_id.to_string()))?;
        let config = vapp
            .network_config_section
            .as_mut()
            .and_then(|s| s.network_config.iter_mut().find(|c| network_matches(c, network)))
            .ok_or_else(|| ClientError::NotFound(network.to_string()))?;
        f(config.configuration.features.get_or_insert_with(Default::default));
        Ok(to_network(config))
    }

    /// Track overlapping writes, optionally holding the write open for a while
    async fn write<T>(&self, f: impl FnOnce() -> Result<T>) -> Result<T> {
        self.mutations.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let delay = self.write_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay as u64)).await;
        }
        let result = f();

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

fn network_matches(config: &VAppNetworkConfig, identifier: &str) -> bool {
    if config.network_name == identifier {
        return true;
    }
    let href_uuid = config.link.as_ref().and_then(|l| uuid_from_href(&l.href).ok());
    matches!((uuid_from_id(identifier).ok(), href_uuid), (Some(a), Some(b)) if a == b)
}

fn to_network(config: &VAppNetworkConfig) -> VAppNetwork {
    let uuid = config
        .link
        .as_ref()
        .and_then(|l| uuid_from_href(&l.href).ok())
        .unwrap_or_default();
    VAppNetwork {
        id: format!("urn:vcloud:network:{}", uuid),
        name: config.network_name.clone(),
        configuration: config.configuration.clone(),
    }
}

fn find_network(vapp: &VApp, identifier: &str) -> Option<VAppNetwork> {
    vapp.network_config_section
        .as_ref()?
        .network_config
        .iter()
        .find(|c| network_matches(c, identifier))
        .map(to_network)
}

fn record_of(item: &CatalogItem) -> CatalogItemRecord {
    CatalogItemRecord {
        name: item.name.clone(),
        href: item.href.clone(),
        creation_date: item.date_created,
        entity_type: Some("vapptemplate".to_string()),
    }
}

#[async_trait]
impl VcdApi for MockVcd {
    fn is_sys_admin(&self) -> bool {
        false
    }

    async fn get_vdc(&self, org: &str, vdc: &str) -> Result<Vdc> {
        if org != ORG || vdc != VDC {
            return Err(ClientError::NotFound(format!("{}/{}", org, vdc)));
        }
        Ok(Vdc {
            id: format!("urn:vcloud:vdc:{}", uuid(1)),
            name: VDC.to_string(),
            href: format!("https://vcd.example.com/api/vdc/{}", uuid(1)),
            org_name: ORG.to_string(),
        })
    }

    async fn get_catalog_by_name(&self, org: &str, name: &str) -> Result<Catalog> {
        if org != ORG || name != CATALOG {
            return Err(ClientError::NotFound(format!("{}/{}", org, name)));
        }
        Ok(Catalog {
            id: format!("urn:vcloud:catalog:{}", uuid(2)),
            name: CATALOG.to_string(),
            href: format!("https://vcd.example.com/api/catalog/{}", uuid(2)),
            org_name: ORG.to_string(),
        })
    }

    async fn list_catalog_items(&self, _catalog: &Catalog) -> Result<Vec<CatalogItemRecord>> {
        let state = self.state.lock().unwrap();
        Ok(state.items.iter().map(|s| record_of(&s.item)).collect())
    }

    async fn get_catalog_item_by_name_or_id(
        &self,
        _catalog: &Catalog,
        identifier: &str,
    ) -> Result<CatalogItem> {
        let state = self.state.lock().unwrap();
        state
            .items
            .iter()
            .find(|s| s.item.id == identifier || s.item.name == identifier)
            .map(|s| s.item.clone())
            .ok_or_else(|| ClientError::NotFound(identifier.to_string()))
    }

    async fn get_catalog_item_metadata(&self, item_href: &str) -> Result<Metadata> {
        let state = self.state.lock().unwrap();
        state
            .items
            .iter()
            .find(|s| s.item.href == item_href)
            .map(|s| s.metadata.clone())
            .ok_or_else(|| ClientError::NotFound(item_href.to_string()))
    }

    async fn delete_catalog_item(&self, item: &CatalogItem) -> Result<()> {
        let sticky = self.sticky_delete.load(Ordering::SeqCst);
        self.write(|| {
            if !sticky {
                self.state.lock().unwrap().items.retain(|s| s.item.id != item.id);
            }
            Ok(())
        })
        .await
    }

    async fn update_catalog_item_description(
        &self,
        item: &CatalogItem,
        description: &str,
    ) -> Result<CatalogItem> {
        self.write(|| {
            let mut state = self.state.lock().unwrap();
            let stored = state
                .items
                .iter_mut()
                .find(|s| s.item.id == item.id)
                .ok_or_else(|| ClientError::NotFound(item.id.clone()))?;
            stored.item.description = description.to_string();
            Ok(stored.item.clone())
        })
        .await
    }

    async fn begin_catalog_upload(
        &self,
        _catalog: &Catalog,
        params: &UploadVAppTemplateParams,
    ) -> Result<UploadSession> {
        self.write(|| {
            let mut state = self.state.lock().unwrap();
            state.next_id += 1;
            let n = state.next_id;
            drop(state);
            let item = self.add_catalog_item(n, &params.name, 20, &[]);
            self.state
                .lock()
                .unwrap()
                .items
                .iter_mut()
                .filter(|s| s.item.id == item.id)
                .for_each(|s| s.item.description = params.description.clone());
            Ok(UploadSession {
                item: CatalogItem {
                    description: params.description.clone(),
                    ..item
                },
                upload_href: format!("https://vcd.example.com/transfer/{}/descriptor.ovf", uuid(n)),
                task: Task {
                    href: format!("https://vcd.example.com/api/task/{}", uuid(n)),
                    status: "running".to_string(),
                    ..Default::default()
                },
            })
        })
        .await
    }

    async fn upload_chunk(
        &self,
        _upload_href: &str,
        offset: u64,
        total: u64,
        chunk: Vec<u8>,
    ) -> Result<()> {
        let mut uploads = self.uploads.lock().unwrap();
        uploads.push((offset, total, chunk.len()));
        let fail_at = self.fail_upload_at.load(Ordering::SeqCst);
        if fail_at > 0 && uploads.len() == fail_at {
            return Err(ClientError::Api {
                status: 500,
                message: "transfer interrupted".to_string(),
            });
        }
        Ok(())
    }

    async fn wait_for_task(&self, task: Task) -> Result<Task> {
        Ok(Task {
            status: "success".to_string(),
            ..task
        })
    }

    async fn cancel_task(&self, _task: &Task) -> Result<()> {
        self.cancelled.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn get_vapp_by_name_or_id(&self, _vdc: &Vdc, identifier: &str) -> Result<VApp> {
        let state = self.state.lock().unwrap();
        state
            .vapps
            .iter()
            .find(|v| v.name == identifier || v.id == identifier)
            .cloned()
            .ok_or_else(|| ClientError::NotFound(identifier.to_string()))
    }

    async fn get_vapp_vm_by_id(&self, vapp: &VApp, vm_id: &str) -> Result<Vm> {
        let state = self.state.lock().unwrap();
        state
            .vapps
            .iter()
            .find(|v| v.id == vapp.id)
            .and_then(|v| v.vms().iter().find(|vm| vm.id == vm_id).cloned())
            .ok_or_else(|| ClientError::NotFound(vm_id.to_string()))
    }

    async fn get_vapp_network_by_name_or_id(
        &self,
        vapp: &VApp,
        identifier: &str,
    ) -> Result<VAppNetwork> {
        let state = self.state.lock().unwrap();
        state
            .vapps
            .iter()
            .find(|v| v.id == vapp.id)
            .and_then(|v| find_network(v, identifier))
            .ok_or_else(|| ClientError::NotFound(identifier.to_string()))
    }

    async fn update_network_firewall_rules(
        &self,
        vapp: &VApp,
        network_id: &str,
        mut service: FirewallService,
    ) -> Result<VAppNetwork> {
        for (index, rule) in service.firewall_rule.iter_mut().enumerate() {
            rule.id = Some((index + 1).to_string());
        }
        self.write(|| {
            self.with_network(&vapp.id, network_id, |features| {
                features.firewall_service = Some(service)
            })
        })
        .await
    }

    async fn remove_all_network_firewall_rules(&self, vapp: &VApp, network_id: &str) -> Result<()> {
        self.write(|| {
            self.with_network(&vapp.id, network_id, |features| {
                if let Some(service) = features.firewall_service.as_mut() {
                    service.firewall_rule.clear();
                }
            })
            .map(|_| ())
        })
        .await
    }

    async fn update_network_nat_rules(
        &self,
        vapp: &VApp,
        network_id: &str,
        mut service: NatService,
    ) -> Result<VAppNetwork> {
        for (index, rule) in service.nat_rule.iter_mut().enumerate() {
            rule.id = Some((65537 + index).to_string());
        }
        self.write(|| {
            self.with_network(&vapp.id, network_id, |features| {
                features.nat_service = Some(service)
            })
        })
        .await
    }

    async fn remove_all_network_nat_rules(&self, vapp: &VApp, network_id: &str) -> Result<()> {
        self.write(|| {
            self.with_network(&vapp.id, network_id, |features| {
                if let Some(service) = features.nat_service.as_mut() {
                    service.nat_rule.clear();
                }
            })
            .map(|_| ())
        })
        .await
    }
}
