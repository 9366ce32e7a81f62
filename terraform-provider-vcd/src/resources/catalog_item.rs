//! `vcd_catalog_item` resource and data source
//!
//! The resource uploads an OVA as a vApp template into a catalog. The data
//! source looks an existing item up by name or by filter.

use super::{DataSource, Resource, ResourceResult, ResourceState};
use crate::config::VcdContext;
use crate::error::ProviderError;
use crate::import::{ImportPath, CATALOG_ITEM_USAGE};
use crate::resolve::{find_catalog_item, CatalogItemFilter, CatalogItemLookup, Origin};
use crate::schema::{NestedBlock, ResourceSchema, SchemaAttribute, SchemaBlock};
use crate::types::{CatalogItem, UploadSession, UploadVAppTemplateParams};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncReadExt;

const MEBIBYTE: u64 = 1024 * 1024;
/// Largest accepted `upload_piece_size`, in MiB
const MAX_UPLOAD_PIECE_SIZE: i64 = 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogItemConfig {
    pub id: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub org: String,
    pub catalog: String,
    pub name: String,
    pub description: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub ova_path: String,
    /// Upload chunk size in MiB
    pub upload_piece_size: i64,
    pub created: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter: Option<CatalogItemFilter>,
}

impl Default for CatalogItemConfig {
    fn default() -> Self {
        Self {
            id: String::new(),
            org: String::new(),
            catalog: String::new(),
            name: String::new(),
            description: String::new(),
            ova_path: String::new(),
            upload_piece_size: 1,
            created: String::new(),
            filter: None,
        }
    }
}

impl CatalogItemConfig {
    fn validate(&self) -> ResourceResult<()> {
        if self.catalog.is_empty() {
            return Err(ProviderError::validation("catalog is required"));
        }
        if self.name.is_empty() {
            return Err(ProviderError::validation("name is required"));
        }
        if !(1..=MAX_UPLOAD_PIECE_SIZE).contains(&self.upload_piece_size) {
            return Err(ProviderError::validation(format!(
                "upload_piece_size must be between 1 and {}, got {}",
                MAX_UPLOAD_PIECE_SIZE, self.upload_piece_size
            )));
        }
        Ok(())
    }

    /// Piece size in bytes
    fn piece_bytes(&self) -> ResourceResult<u64> {
        u64::try_from(self.upload_piece_size)
            .ok()
            .and_then(|mib| mib.checked_mul(MEBIBYTE))
            .ok_or_else(|| {
                ProviderError::validation(format!(
                    "invalid upload_piece_size {}",
                    self.upload_piece_size
                ))
            })
    }

    fn lookup(&self) -> CatalogItemLookup<'_> {
        CatalogItemLookup {
            org: Some(&self.org),
            catalog: &self.catalog,
            id: &self.id,
            name: &self.name,
            filter: self.filter.as_ref(),
        }
    }
}

/// Copy the observed item into `state`
fn set_item_fields(state: &mut ResourceState, item: &CatalogItem) {
    state.set("id", serde_json::json!(item.id));
    state.set("name", serde_json::json!(item.name));
    state.set("description", serde_json::json!(item.description));
    state.set(
        "created",
        serde_json::json!(item.date_created.map(|d| d.to_rfc3339()).unwrap_or_default()),
    );
}

/// Stream the OVA in `piece_size` slices; the first failure aborts
async fn upload_payload(
    ctx: &VcdContext,
    session: &UploadSession,
    mut file: tokio::fs::File,
    total: u64,
    piece_size: u64,
) -> ResourceResult<()> {
    let mut offset = 0u64;
    while offset < total {
        let len = piece_size.min(total - offset);
        let mut piece = vec![0u8; len as usize];
        file.read_exact(&mut piece).await.map_err(|e| {
            ProviderError::validation(format!("error reading OVA at offset {}: {}", offset, e))
        })?;

        tracing::debug!(offset, total, "uploading vApp template piece");
        ctx.api
            .upload_chunk(&session.upload_href, offset, total, piece)
            .await
            .map_err(|e| ProviderError::remote("error uploading vApp template", e))?;
        offset += len;
    }
    Ok(())
}

pub struct CatalogItemResource;

impl CatalogItemResource {
    pub fn new() -> Self {
        Self
    }
}

impl Default for CatalogItemResource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Resource for CatalogItemResource {
    fn type_name(&self) -> &str {
        "vcd_catalog_item"
    }

    fn schema(&self) -> ResourceSchema {
        let block = SchemaBlock::new()
            .with_attribute("id", SchemaAttribute::string().computed())
            .with_attribute(
                "org",
                SchemaAttribute::string()
                    .with_description("The name of organization to use, optional if defined at provider level")
                    .optional()
                    .force_new(),
            )
            .with_attribute(
                "catalog",
                SchemaAttribute::string()
                    .with_description("Catalog name where upload the OVA file")
                    .required()
                    .force_new(),
            )
            .with_attribute(
                "name",
                SchemaAttribute::string()
                    .with_description("Catalog item name")
                    .required()
                    .force_new(),
            )
            .with_attribute("description", SchemaAttribute::string().optional())
            .with_attribute(
                "ova_path",
                SchemaAttribute::string()
                    .with_description("Absolute or relative path to the OVA file")
                    .optional()
                    .force_new(),
            )
            .with_attribute(
                "upload_piece_size",
                SchemaAttribute::number()
                    .with_description("Size in MB for splitting upload size")
                    .optional()
                    .with_default(serde_json::json!(1)),
            )
            .with_attribute(
                "created",
                SchemaAttribute::string()
                    .with_description("Time stamp of when the item was created")
                    .computed(),
            )
            .with_description("Uploads an OVA as a vApp template into a catalog");

        ResourceSchema::new(0, block)
    }

    fn validate(&self, config: &ResourceState) -> ResourceResult<()> {
        config.to_typed::<CatalogItemConfig>()?.validate()
    }

    async fn create(
        &self,
        ctx: &VcdContext,
        planned: &ResourceState,
    ) -> ResourceResult<ResourceState> {
        let config: CatalogItemConfig = planned.to_typed()?;
        config.validate()?;
        if config.ova_path.is_empty() {
            return Err(ProviderError::validation("ova_path is required to create a catalog item"));
        }

        let piece_size = config.piece_bytes()?;
        let unreadable = |e: std::io::Error| {
            ProviderError::validation(format!("unable to read OVA file {}: {}", config.ova_path, e))
        };
        let file = tokio::fs::File::open(&config.ova_path).await.map_err(unreadable)?;
        let total = file.metadata().await.map_err(unreadable)?.len();
        if total == 0 {
            return Err(ProviderError::validation(format!("OVA file {} is empty", config.ova_path)));
        }

        let org = ctx.org_name(Some(&config.org))?;
        let catalog = ctx
            .api
            .get_catalog_by_name(&org, &config.catalog)
            .await
            .map_err(|e| ProviderError::remote("unable to find catalog", e))?;

        let params = UploadVAppTemplateParams {
            name: config.name.clone(),
            description: config.description.clone(),
            manifest_required: false,
        };
        let session = ctx
            .api
            .begin_catalog_upload(&catalog, &params)
            .await
            .map_err(|e| ProviderError::remote("error starting vApp template upload", e))?;
        tracing::info!(catalog = %catalog.name, item = %config.name, bytes = total, "uploading vApp template");

        if let Err(e) = upload_payload(ctx, &session, file, total, piece_size).await {
            if let Err(cancel_err) = ctx.api.cancel_task(&session.task).await {
                tracing::debug!(error = %cancel_err, "error cancelling upload task");
            }
            return Err(e);
        }

        ctx.api
            .wait_for_task(session.task.clone())
            .await
            .map_err(|e| ProviderError::remote("error waiting for vApp template upload", e))?;
        tracing::info!(id = %session.item.id, "vApp template uploaded");

        let mut state = planned.clone();
        state.set("id", serde_json::json!(session.item.id));
        self.read(ctx, &state)
            .await?
            .ok_or_else(|| ProviderError::not_found("catalog item", config.name))
    }

    async fn read(
        &self,
        ctx: &VcdContext,
        current: &ResourceState,
    ) -> ResourceResult<Option<ResourceState>> {
        let config: CatalogItemConfig = current.to_typed()?;
        let Some(resolved) = find_catalog_item(ctx, &config.lookup(), Origin::Resource).await? else {
            return Ok(None);
        };

        let mut state = current.clone();
        set_item_fields(&mut state, &resolved.item);
        Ok(Some(state))
    }

    async fn update(
        &self,
        ctx: &VcdContext,
        current: &ResourceState,
        planned: &ResourceState,
    ) -> ResourceResult<ResourceState> {
        let prior: CatalogItemConfig = current.to_typed()?;
        let config: CatalogItemConfig = planned.to_typed()?;
        config.validate()?;

        let resolved = find_catalog_item(ctx, &prior.lookup(), Origin::Resource)
            .await?
            .ok_or_else(|| ProviderError::not_found("catalog item", prior.name.clone()))?;

        if resolved.item.description != config.description {
            ctx.api
                .update_catalog_item_description(&resolved.item, &config.description)
                .await
                .map_err(|e| ProviderError::remote("error updating catalog item", e))?;
            tracing::info!(id = %resolved.item.id, "catalog item description updated");
        }

        let mut state = planned.clone();
        state.set("id", serde_json::json!(resolved.item.id));
        self.read(ctx, &state)
            .await?
            .ok_or_else(|| ProviderError::not_found("catalog item", config.name))
    }

    async fn delete(&self, ctx: &VcdContext, current: &ResourceState) -> ResourceResult<()> {
        let config: CatalogItemConfig = current.to_typed()?;
        let org = ctx.org_name(Some(&config.org))?;

        let catalog = ctx
            .api
            .get_catalog_by_name(&org, &config.catalog)
            .await
            .map_err(|e| ProviderError::remote("unable to find catalog", e))?;
        let item = ctx
            .api
            .get_catalog_item_by_name_or_id(&catalog, &config.name)
            .await
            .map_err(|e| ProviderError::remote(format!("unable to find catalog item {}", config.name), e))?;

        ctx.api.delete_catalog_item(&item).await.map_err(|e| {
            ProviderError::remote(format!("error removing catalog item {}", item.name), e)
        })?;

        match ctx.api.get_catalog_item_by_name_or_id(&catalog, &config.name).await {
            Ok(_) => Err(ProviderError::Consistency(format!(
                "catalog item {} still found after deletion",
                config.name
            ))),
            Err(e) if e.is_not_found() => {
                tracing::info!(name = %config.name, "catalog item deleted");
                Ok(())
            }
            Err(e) => Err(ProviderError::remote("unable to verify catalog item deletion", e)),
        }
    }

    async fn import(&self, ctx: &VcdContext, id: &str) -> ResourceResult<ResourceState> {
        let (org, catalog_name, identifier) =
            match ImportPath::parse(id, ctx.import_separator(), CATALOG_ITEM_USAGE)? {
                ImportPath::Resolve {
                    org,
                    container,
                    parent,
                    resource: None,
                } => (org, container, parent),
                _ => return Err(ProviderError::validation(CATALOG_ITEM_USAGE)),
            };

        let catalog = ctx
            .api
            .get_catalog_by_name(&org, &catalog_name)
            .await
            .map_err(|e| ProviderError::remote("unable to find catalog", e))?;
        let item = ctx
            .api
            .get_catalog_item_by_name_or_id(&catalog, &identifier)
            .await
            .map_err(|e| ProviderError::remote(format!("unable to find catalog item {}", identifier), e))?;

        let mut state = ResourceState::new();
        if ctx.defaults.org.as_deref() != Some(org.as_str()) {
            state.set("org", serde_json::json!(org));
        }
        state.set("catalog", serde_json::json!(catalog_name));
        state.set("upload_piece_size", serde_json::json!(1));
        set_item_fields(&mut state, &item);
        Ok(state)
    }
}

pub struct CatalogItemDataSource;

impl CatalogItemDataSource {
    pub fn new() -> Self {
        Self
    }
}

impl Default for CatalogItemDataSource {
    fn default() -> Self {
        Self::new()
    }
}

fn filter_block() -> SchemaBlock {
    let metadata = SchemaBlock::new()
        .with_attribute("key", SchemaAttribute::string().required())
        .with_attribute(
            "value",
            SchemaAttribute::string()
                .with_description("Regular expression matched against the metadata value")
                .required(),
        );

    SchemaBlock::new()
        .with_attribute(
            "name_regex",
            SchemaAttribute::string()
                .with_description("Search by name with a regular expression")
                .optional(),
        )
        .with_attribute(
            "date",
            SchemaAttribute::string()
                .with_description("Search by creation date, e.g. '>= 2021-03-01'")
                .optional(),
        )
        .with_attribute(
            "latest",
            SchemaAttribute::bool()
                .with_description("Retrieve the latest item among several matches")
                .optional(),
        )
        .with_attribute(
            "earliest",
            SchemaAttribute::bool()
                .with_description("Retrieve the earliest item among several matches")
                .optional(),
        )
        .with_block("metadata", NestedBlock::list(metadata))
}

#[async_trait]
impl DataSource for CatalogItemDataSource {
    fn type_name(&self) -> &str {
        "vcd_catalog_item"
    }

    fn schema(&self) -> ResourceSchema {
        let block = SchemaBlock::new()
            .with_attribute("id", SchemaAttribute::string().computed())
            .with_attribute("org", SchemaAttribute::string().optional())
            .with_attribute("catalog", SchemaAttribute::string().required())
            .with_attribute(
                "name",
                SchemaAttribute::string()
                    .with_description("Catalog item name, required unless a filter is given")
                    .optional()
                    .computed(),
            )
            .with_attribute("description", SchemaAttribute::string().computed())
            .with_attribute("created", SchemaAttribute::string().computed())
            .with_block("filter", NestedBlock::single(filter_block()))
            .with_description("Looks up a catalog item by name or filter");

        ResourceSchema::new(0, block)
    }

    async fn read(&self, ctx: &VcdContext, config: &ResourceState) -> ResourceResult<ResourceState> {
        let typed: CatalogItemConfig = config.to_typed()?;
        let lookup = CatalogItemLookup {
            id: "",
            ..typed.lookup()
        };

        let resolved = find_catalog_item(ctx, &lookup, Origin::DataSource)
            .await?
            .ok_or_else(|| ProviderError::not_found("catalog item", typed.name.clone()))?;

        let mut state = config.clone();
        set_item_fields(&mut state, &resolved.item);
        Ok(state)
    }
}
