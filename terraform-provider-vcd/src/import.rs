//! Import path parsing and vApp network listing
//!
//! `terraform import` hands the provider a single string. It is split on the
//! configured separator (default `.`) into coordinates:
//!
//! - `org.vdc.vapp.network` resolves one vApp network (names or IDs);
//! - `org.catalog.item` resolves one catalog item;
//! - `list@org.vdc.vapp` enumerates the vApp's networks instead.

use crate::config::VcdContext;
use crate::error::{ProviderError, Result};
use crate::types::{VApp, VAppNetwork};
use serde::{Deserialize, Serialize};

pub const LIST_MARKER: &str = "list@";

pub const VAPP_NETWORK_RULES_USAGE: &str = "resource id must be specified in one of these formats:\n\
'org-name.vdc-name.vapp-name.network_name', 'org.vdc-name.vapp-id.network-id' or \n\
'list@org-name.vdc-name.vapp-name' to get a list of vapp networks with their IDs";

pub const CATALOG_ITEM_USAGE: &str =
    "resource id must be specified as 'org-name.catalog-name.catalog-item-name' or 'org-name.catalog-name.catalog-item-id'";

/// Parsed import string
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportPath {
    Resolve {
        org: String,
        container: String,
        parent: String,
        resource: Option<String>,
    },
    List {
        org: String,
        container: String,
        parent: String,
    },
}

impl ImportPath {
    /// Split `raw` on `separator`. Any shape other than the three accepted
    /// forms is a validation error carrying `usage`.
    pub fn parse(raw: &str, separator: &str, usage: &str) -> Result<Self> {
        let segments: Vec<&str> = raw.split(separator).collect();
        let invalid = || ProviderError::validation(usage);

        if raw.contains(LIST_MARKER) {
            let [command, container, parent] = segments.as_slice() else {
                return Err(invalid());
            };
            let org = match command.split('@').collect::<Vec<_>>().as_slice() {
                ["list", org] if !org.is_empty() => org.to_string(),
                _ => return Err(invalid()),
            };
            return Ok(ImportPath::List {
                org,
                container: container.to_string(),
                parent: parent.to_string(),
            });
        }

        match segments.as_slice() {
            [org, container, parent] => Ok(ImportPath::Resolve {
                org: org.to_string(),
                container: container.to_string(),
                parent: parent.to_string(),
                resource: None,
            }),
            [org, container, parent, resource] => Ok(ImportPath::Resolve {
                org: org.to_string(),
                container: container.to_string(),
                parent: parent.to_string(),
                resource: Some(resource.to_string()),
            }),
            _ => Err(invalid()),
        }
    }
}

/// One row of the vApp network listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VappNetworkListing {
    pub index: usize,
    pub vapp_id: String,
    pub id: String,
    pub name: String,
}

/// State fields set by a successful vApp network import
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportedVappNetwork {
    pub id: String,
    pub org: Option<String>,
    pub vdc: Option<String>,
    pub vapp_id: String,
    pub network_id: String,
}

/// Enumerate the networks of a vApp as structured records
pub fn vapp_network_listing(vapp: &VApp) -> Result<Vec<VappNetworkListing>> {
    let Some(section) = vapp.network_config_section.as_ref() else {
        return Ok(Vec::new());
    };

    section
        .network_config
        .iter()
        .enumerate()
        .map(|(index, config)| {
            let href = config.link.as_ref().map(|l| l.href.as_str()).unwrap_or_default();
            let uuid = crate::client::uuid_from_href(href).map_err(|e| {
                ProviderError::validation(format!("unable to parse vApp network ID: {}", e))
            })?;
            Ok(VappNetworkListing {
                index: index + 1,
                vapp_id: vapp.id.clone(),
                id: uuid,
                name: config.network_name.clone(),
            })
        })
        .collect()
}

/// Render the listing as a tab-separated table
pub fn format_listing(rows: &[VappNetworkListing]) -> String {
    let mut out = String::from("Retrieving all vApp networks by name\n");
    out.push_str("No\tvApp ID\tID\tName\t\n");
    out.push_str("--\t-------\t--\t----\t\n");
    for row in rows {
        out.push_str(&format!(
            "{}\t{}\t{}\t{}\n",
            row.index, row.vapp_id, row.id, row.name
        ));
    }
    out
}

/// Look up the vApp named by list coordinates and return its networks
pub async fn list_vapp_networks(
    ctx: &VcdContext,
    org: &str,
    vdc: &str,
    vapp: &str,
) -> Result<Vec<VappNetworkListing>> {
    let vdc = ctx.api.get_vdc(org, vdc).await.map_err(|e| {
        ProviderError::remote(
            format!("[vapp network rules import, network list] unable to find VDC {}", vdc),
            e,
        )
    })?;
    let vapp = ctx
        .api
        .get_vapp_by_name_or_id(&vdc, vapp)
        .await
        .map_err(|e| ProviderError::remote("unable to retrieve vApp by name", e))?;

    vapp_network_listing(&vapp)
}

/// Import entry point shared by the firewall and NAT rule resources
pub async fn import_vapp_network_rules(
    ctx: &VcdContext,
    raw: &str,
    resource_type: &str,
) -> Result<ImportedVappNetwork> {
    tracing::debug!(resource_type, id = raw, "importing resource");

    match ImportPath::parse(raw, ctx.import_separator(), VAPP_NETWORK_RULES_USAGE)? {
        ImportPath::List {
            org,
            container,
            parent,
        } => {
            let rows = list_vapp_networks(ctx, &org, &container, &parent).await?;
            Err(ProviderError::ImportListing {
                usage: VAPP_NETWORK_RULES_USAGE.to_string(),
                listing: format_listing(&rows),
            })
        }
        ImportPath::Resolve {
            org,
            container,
            parent,
            resource: Some(network),
        } => {
            let (vapp, network) = resolve_vapp_network(ctx, &org, &container, &parent, &network).await?;
            Ok(ImportedVappNetwork {
                id: network.id.clone(),
                org: (ctx.defaults.org.as_deref() != Some(org.as_str())).then_some(org),
                vdc: (ctx.defaults.vdc.as_deref() != Some(container.as_str())).then_some(container),
                vapp_id: vapp.id,
                network_id: network.id,
            })
        }
        ImportPath::Resolve { resource: None, .. } => {
            Err(ProviderError::validation(VAPP_NETWORK_RULES_USAGE))
        }
    }
}

async fn resolve_vapp_network(
    ctx: &VcdContext,
    org: &str,
    vdc: &str,
    vapp: &str,
    network: &str,
) -> Result<(VApp, VAppNetwork)> {
    let vdc = ctx
        .api
        .get_vdc(org, vdc)
        .await
        .map_err(|e| ProviderError::remote("error retrieving Org and VDC", e))?;
    let vapp = ctx
        .api
        .get_vapp_by_name_or_id(&vdc, vapp)
        .await
        .map_err(|e| ProviderError::remote(format!("error retrieving vApp {}", vapp), e))?;
    let network = ctx
        .api
        .get_vapp_network_by_name_or_id(&vapp, network)
        .await
        .map_err(|e| ProviderError::remote(format!("error retrieving vApp network {}", network), e))?;
    Ok((vapp, network))
}
