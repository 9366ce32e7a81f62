//! Remote API contract
//!
//! Resources only talk to vCD through this trait. [`crate::client::VcdClient`]
//! is the HTTP implementation; tests substitute an in-memory one.

use crate::client::Result;
use crate::types::{
    Catalog, CatalogItem, CatalogItemRecord, FirewallService, Metadata, NatService, Task,
    UploadSession, UploadVAppTemplateParams, VApp, VAppNetwork, Vdc, Vm,
};
use async_trait::async_trait;

#[async_trait]
pub trait VcdApi: Send + Sync {
    /// True when the session belongs to the System organization
    fn is_sys_admin(&self) -> bool;

    // Tenancy
    async fn get_vdc(&self, org: &str, vdc: &str) -> Result<Vdc>;

    // Catalogs
    async fn get_catalog_by_name(&self, org: &str, name: &str) -> Result<Catalog>;

    async fn list_catalog_items(&self, catalog: &Catalog) -> Result<Vec<CatalogItemRecord>>;

    async fn get_catalog_item_by_name_or_id(
        &self,
        catalog: &Catalog,
        identifier: &str,
    ) -> Result<CatalogItem>;

    async fn get_catalog_item_metadata(&self, item_href: &str) -> Result<Metadata>;

    async fn delete_catalog_item(&self, item: &CatalogItem) -> Result<()>;

    async fn update_catalog_item_description(
        &self,
        item: &CatalogItem,
        description: &str,
    ) -> Result<CatalogItem>;

    async fn begin_catalog_upload(
        &self,
        catalog: &Catalog,
        params: &UploadVAppTemplateParams,
    ) -> Result<UploadSession>;

    /// PUT one piece of an upload; `offset` and `total` are in bytes
    async fn upload_chunk(
        &self,
        upload_href: &str,
        offset: u64,
        total: u64,
        chunk: Vec<u8>,
    ) -> Result<()>;

    /// Block until the task succeeds; failed or aborted tasks are errors
    async fn wait_for_task(&self, task: Task) -> Result<Task>;

    async fn cancel_task(&self, task: &Task) -> Result<()>;

    // vApps
    async fn get_vapp_by_name_or_id(&self, vdc: &Vdc, identifier: &str) -> Result<VApp>;

    /// Looks the VM up among the vApp's current children
    async fn get_vapp_vm_by_id(&self, vapp: &VApp, vm_id: &str) -> Result<Vm>;

    async fn get_vapp_network_by_name_or_id(
        &self,
        vapp: &VApp,
        identifier: &str,
    ) -> Result<VAppNetwork>;

    // Rule lists: every call replaces the whole list
    async fn update_network_firewall_rules(
        &self,
        vapp: &VApp,
        network_id: &str,
        service: FirewallService,
    ) -> Result<VAppNetwork>;

    async fn remove_all_network_firewall_rules(&self, vapp: &VApp, network_id: &str)
        -> Result<()>;

    async fn update_network_nat_rules(
        &self,
        vapp: &VApp,
        network_id: &str,
        service: NatService,
    ) -> Result<VAppNetwork>;

    async fn remove_all_network_nat_rules(&self, vapp: &VApp, network_id: &str) -> Result<()>;
}
