//! `vcd_vapp_networks`: the networks of a vApp as structured records

use super::{DataSource, ResourceResult, ResourceState};
use crate::config::VcdContext;
use crate::error::ProviderError;
use crate::import::list_vapp_networks;
use crate::schema::{AttributeType, ResourceSchema, SchemaAttribute, SchemaBlock};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct VappNetworksConfig {
    org: String,
    vdc: String,
    vapp_id: String,
}

pub struct VappNetworksDataSource;

impl VappNetworksDataSource {
    pub fn new() -> Self {
        Self
    }
}

impl Default for VappNetworksDataSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DataSource for VappNetworksDataSource {
    fn type_name(&self) -> &str {
        "vcd_vapp_networks"
    }

    fn schema(&self) -> ResourceSchema {
        let network = HashMap::from([
            ("index".to_string(), AttributeType::Number),
            ("vapp_id".to_string(), AttributeType::String),
            ("id".to_string(), AttributeType::String),
            ("name".to_string(), AttributeType::String),
        ]);

        let block = SchemaBlock::new()
            .with_attribute("id", SchemaAttribute::string().computed())
            .with_attribute("org", SchemaAttribute::string().optional())
            .with_attribute("vdc", SchemaAttribute::string().optional())
            .with_attribute(
                "vapp_id",
                SchemaAttribute::string()
                    .with_description("vApp name or ID")
                    .required(),
            )
            .with_attribute(
                "networks",
                SchemaAttribute::list(AttributeType::Object(network))
                    .with_description("Networks of the vApp, in configuration order")
                    .computed(),
            )
            .with_description("Lists the networks of a vApp with their IDs");

        ResourceSchema::new(0, block)
    }

    async fn read(&self, ctx: &VcdContext, config: &ResourceState) -> ResourceResult<ResourceState> {
        let typed: VappNetworksConfig = config.to_typed()?;
        if typed.vapp_id.is_empty() {
            return Err(ProviderError::validation("vapp_id is required"));
        }
        let org = ctx.org_name(Some(&typed.org))?;
        let vdc = ctx.vdc_name(Some(&typed.vdc))?;

        let rows = list_vapp_networks(ctx, &org, &vdc, &typed.vapp_id).await?;
        tracing::debug!(vapp = %typed.vapp_id, count = rows.len(), "listed vApp networks");

        let mut state = config.clone();
        state.set(
            "id",
            serde_json::json!(rows.first().map(|r| r.vapp_id.clone()).unwrap_or(typed.vapp_id)),
        );
        state.set("networks", serde_json::json!(rows));
        Ok(state)
    }
}
