//! Plugin protocol dispatch
//!
//! Each request line is decoded into an [`RpcRequest`] and routed to the
//! matching resource or data source. Failures are reported as diagnostics
//! inside a successful response; JSON-RPC errors are reserved for malformed
//! requests and unknown methods.

use crate::client::VcdClient;
use crate::config::{Credentials, ProviderConfig, VcdContext};
use crate::error::ProviderError;
use crate::resources::{get_all_data_sources, get_all_resources, DataSource, Resource, ResourceState};
use crate::schema::{
    Diagnostic, ProviderSchema, RpcRequest, RpcResponse, SchemaAttribute, SchemaBlock,
    INTERNAL_ERROR, METHOD_NOT_FOUND, PARSE_ERROR,
};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// VMware Cloud Director Terraform provider
pub struct VcdProvider {
    context: RwLock<Option<Arc<VcdContext>>>,
    resources: HashMap<String, Box<dyn Resource>>,
    data_sources: HashMap<String, Box<dyn DataSource>>,
}

fn diagnostics_response(id: i64, diagnostics: Vec<Diagnostic>) -> RpcResponse {
    RpcResponse::success(id, serde_json::json!({ "diagnostics": diagnostics }))
}

fn unknown_type(id: i64, kind: &str, type_name: &str) -> RpcResponse {
    diagnostics_response(
        id,
        vec![Diagnostic::error(&format!("Unknown {} type: {}", kind, type_name))],
    )
}

fn state_param(params: &Value, key: &str) -> Option<ResourceState> {
    params.get(key).and_then(ResourceState::from_value)
}

fn type_name(params: &Value) -> &str {
    params
        .get("type_name")
        .and_then(|v| v.as_str())
        .unwrap_or("")
}

impl VcdProvider {
    /// Create a new provider
    pub fn new() -> Self {
        let resources: HashMap<String, Box<dyn Resource>> = get_all_resources()
            .into_iter()
            .map(|r| (r.type_name().to_string(), r))
            .collect();
        let data_sources: HashMap<String, Box<dyn DataSource>> = get_all_data_sources()
            .into_iter()
            .map(|d| (d.type_name().to_string(), d))
            .collect();

        Self {
            context: RwLock::new(None),
            resources,
            data_sources,
        }
    }

    /// Install an already built context, bypassing `ConfigureProvider`
    pub fn with_context(self, context: VcdContext) -> Self {
        *self.context.write().unwrap_or_else(|e| e.into_inner()) = Some(Arc::new(context));
        self
    }

    /// Get provider schema
    fn get_schema(&self) -> ProviderSchema {
        let provider_block = SchemaBlock::new()
            .with_attribute(
                "url",
                SchemaAttribute::string()
                    .with_description("The vCD url for vCD API operations (VCD_URL)")
                    .optional(),
            )
            .with_attribute(
                "user",
                SchemaAttribute::string()
                    .with_description("The user name for vCD API operations (VCD_USER)")
                    .optional(),
            )
            .with_attribute(
                "password",
                SchemaAttribute::string()
                    .with_description("The user password for vCD API operations (VCD_PASSWORD)")
                    .optional()
                    .sensitive(),
            )
            .with_attribute(
                "api_token",
                SchemaAttribute::string()
                    .with_description("The API token used instead of user and password (VCD_API_TOKEN)")
                    .optional()
                    .sensitive(),
            )
            .with_attribute(
                "org",
                SchemaAttribute::string()
                    .with_description("The vCD org for API operations (VCD_ORG)")
                    .optional(),
            )
            .with_attribute(
                "vdc",
                SchemaAttribute::string()
                    .with_description("The VDC for API operations (VCD_VDC)")
                    .optional(),
            )
            .with_attribute(
                "sysorg",
                SchemaAttribute::string()
                    .with_description("The vCD org for user authentication (VCD_SYS_ORG)")
                    .optional(),
            )
            .with_attribute(
                "allow_unverified_ssl",
                SchemaAttribute::bool()
                    .with_description("If set, the client accepts self-signed certificates")
                    .optional()
                    .with_default(serde_json::json!(false)),
            )
            .with_attribute(
                "import_separator",
                SchemaAttribute::string()
                    .with_description("Separator for import paths (VCD_IMPORT_SEPARATOR)")
                    .optional(),
            )
            .with_description("VMware Cloud Director provider");

        let mut schema = ProviderSchema::new(provider_block);
        for (name, resource) in &self.resources {
            schema = schema.with_resource(name, resource.schema());
        }
        for (name, data_source) in &self.data_sources {
            schema = schema.with_data_source(name, data_source.schema());
        }
        schema
    }

    /// Validate the provider block, open a session and build the context
    async fn configure(&self, config: ProviderConfig) -> Result<Vec<Diagnostic>, ProviderError> {
        let settings = config
            .with_env_fallback(|name| std::env::var(name).ok())
            .validate()?;

        let mut client = VcdClient::new(&settings.url, settings.allow_unverified_ssl)
            .map_err(|e| ProviderError::remote("unable to build HTTP client", e))?;
        match &settings.credentials {
            Credentials::ApiToken(token) => client
                .authenticate_with_api_token(&settings.auth_org, token)
                .await
                .map_err(|e| ProviderError::remote("authentication failed", e))?,
            Credentials::Password { user, password } => client
                .authenticate(&settings.auth_org, user, password)
                .await
                .map_err(|e| ProviderError::remote("authentication failed", e))?,
        };
        tracing::info!(url = %settings.url, org = %settings.auth_org, "connected to vCD");

        let mut diagnostics = Vec::new();
        if settings.allow_unverified_ssl {
            diagnostics.push(
                Diagnostic::warning("TLS certificate verification is disabled")
                    .with_detail("allow_unverified_ssl is set; do not use this in production"),
            );
        }

        let context = VcdContext::new(Arc::new(client), settings.defaults);
        *self.context.write().unwrap_or_else(|e| e.into_inner()) = Some(Arc::new(context));
        Ok(diagnostics)
    }

    /// Get the configured context
    fn get_context(&self) -> Result<Arc<VcdContext>, ProviderError> {
        self.context
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .ok_or(ProviderError::NotConfigured)
    }

    /// Handle an RPC request
    pub async fn handle_request(&self, input: &str) -> String {
        let request: RpcRequest = match serde_json::from_str(input) {
            Ok(r) => r,
            Err(e) => {
                return serde_json::to_string(&RpcResponse::error(
                    0,
                    PARSE_ERROR,
                    format!("Parse error: {}", e),
                ))
                .unwrap_or_default();
            }
        };
        tracing::debug!(id = request.id, method = %request.method, "handling request");

        let response = match request.method.as_str() {
            "GetProviderSchema" => self.handle_get_schema(request.id),
            "ConfigureProvider" => self.handle_configure(request.id, &request.params).await,
            "ValidateResourceConfig" => self.handle_validate_resource(request.id, &request.params),
            "PlanResourceChange" => self.handle_plan_resource(request.id, &request.params),
            "ApplyResourceChange" => self.handle_apply_resource(request.id, &request.params).await,
            "ReadResource" => self.handle_read_resource(request.id, &request.params).await,
            "ImportResourceState" => self.handle_import_resource(request.id, &request.params).await,
            "ReadDataSource" => self.handle_read_data_source(request.id, &request.params).await,
            "StopProvider" => RpcResponse::success(request.id, serde_json::json!({})),
            _ => RpcResponse::error(
                request.id,
                METHOD_NOT_FOUND,
                format!("Method not found: {}", request.method),
            ),
        };

        serde_json::to_string(&response).unwrap_or_else(|e| {
            serde_json::to_string(&RpcResponse::error(
                request.id,
                INTERNAL_ERROR,
                format!("Serialization error: {}", e),
            ))
            .unwrap_or_default()
        })
    }

    fn handle_get_schema(&self, id: i64) -> RpcResponse {
        let schema = self.get_schema();
        RpcResponse::success(id, serde_json::to_value(schema).unwrap_or_default())
    }

    async fn handle_configure(&self, id: i64, params: &Value) -> RpcResponse {
        let config: ProviderConfig = match params.get("config").filter(|c| !c.is_null()) {
            Some(c) => match ResourceState::from_value(c).map(|s| s.to_typed::<ProviderConfig>()) {
                Some(Ok(config)) => config,
                Some(Err(e)) => return diagnostics_response(id, e.into()),
                None => ProviderConfig::default(),
            },
            None => ProviderConfig::default(),
        };

        match self.configure(config).await {
            Ok(diagnostics) => diagnostics_response(id, diagnostics),
            Err(e) => diagnostics_response(id, e.into()),
        }
    }

    fn handle_validate_resource(&self, id: i64, params: &Value) -> RpcResponse {
        let type_name = type_name(params);
        let Some(resource) = self.resources.get(type_name) else {
            return unknown_type(id, "resource", type_name);
        };

        let config = state_param(params, "config").unwrap_or_default();
        match resource.validate(&config) {
            Ok(()) => diagnostics_response(id, Vec::new()),
            Err(e) => diagnostics_response(id, e.into()),
        }
    }

    fn handle_plan_resource(&self, id: i64, params: &Value) -> RpcResponse {
        let type_name = type_name(params);
        let Some(resource) = self.resources.get(type_name) else {
            return unknown_type(id, "resource", type_name);
        };

        let Some(proposed) = state_param(params, "proposed_new_state") else {
            return RpcResponse::success(
                id,
                serde_json::json!({ "planned_state": null, "diagnostics": [] }),
            );
        };
        let prior = state_param(params, "prior_state");

        let planned = match resource.plan_change(prior.as_ref(), &proposed) {
            Ok(planned) => planned,
            Err(e) => return diagnostics_response(id, e.into()),
        };

        let schema = resource.schema();
        let requires_replace: Vec<Vec<&str>> = match &prior {
            Some(prior) => schema
                .block
                .force_new_attributes()
                .into_iter()
                .filter(|name| {
                    let before = prior.get(name).filter(|v| !v.is_null());
                    let after = planned.get(name).filter(|v| !v.is_null());
                    before != after
                })
                .map(|name| vec![name])
                .collect(),
            None => Vec::new(),
        };

        RpcResponse::success(
            id,
            serde_json::json!({
                "planned_state": planned.values,
                "requires_replace": requires_replace,
                "diagnostics": []
            }),
        )
    }

    async fn handle_apply_resource(&self, id: i64, params: &Value) -> RpcResponse {
        let type_name = type_name(params);
        let Some(resource) = self.resources.get(type_name) else {
            return unknown_type(id, "resource", type_name);
        };
        let ctx = match self.get_context() {
            Ok(ctx) => ctx,
            Err(e) => return diagnostics_response(id, e.into()),
        };

        let planned_state = state_param(params, "planned_state");
        let prior_state = state_param(params, "prior_state");

        let result = match (prior_state, planned_state) {
            (Some(prior), None) => resource.delete(&ctx, &prior).await.map(|_| None),
            (None, None) => Ok(None),
            (None, Some(planned)) => resource.create(&ctx, &planned).await.map(Some),
            (Some(prior), Some(planned)) => resource.update(&ctx, &prior, &planned).await.map(Some),
        };

        match result {
            Ok(new_state) => RpcResponse::success(
                id,
                serde_json::json!({
                    "new_state": new_state.map(|s| s.values),
                    "diagnostics": []
                }),
            ),
            Err(e) => {
                tracing::error!(type_name, error = %e, "apply failed");
                diagnostics_response(id, e.into())
            }
        }
    }

    async fn handle_read_resource(&self, id: i64, params: &Value) -> RpcResponse {
        let type_name = type_name(params);
        let Some(resource) = self.resources.get(type_name) else {
            return unknown_type(id, "resource", type_name);
        };
        let ctx = match self.get_context() {
            Ok(ctx) => ctx,
            Err(e) => return diagnostics_response(id, e.into()),
        };

        let current_state = state_param(params, "current_state").unwrap_or_default();

        match resource.read(&ctx, &current_state).await {
            Ok(state) => RpcResponse::success(
                id,
                serde_json::json!({
                    "new_state": state.map(|s| s.values),
                    "diagnostics": []
                }),
            ),
            Err(e) => diagnostics_response(id, e.into()),
        }
    }

    async fn handle_import_resource(&self, id: i64, params: &Value) -> RpcResponse {
        let type_name = type_name(params);
        let resource_id = params.get("id").and_then(|v| v.as_str()).unwrap_or("");
        let Some(resource) = self.resources.get(type_name) else {
            return unknown_type(id, "resource", type_name);
        };
        let ctx = match self.get_context() {
            Ok(ctx) => ctx,
            Err(e) => return diagnostics_response(id, e.into()),
        };

        let imported = match resource.import(&ctx, resource_id).await {
            Ok(state) => state,
            Err(e) => return diagnostics_response(id, e.into()),
        };

        match resource.read(&ctx, &imported).await {
            Ok(Some(state)) => RpcResponse::success(
                id,
                serde_json::json!({
                    "imported_resources": [{
                        "type_name": type_name,
                        "state": state.values
                    }],
                    "diagnostics": []
                }),
            ),
            Ok(None) => diagnostics_response(
                id,
                vec![Diagnostic::error(&format!("Resource {} not found", resource_id))],
            ),
            Err(e) => diagnostics_response(id, e.into()),
        }
    }

    async fn handle_read_data_source(&self, id: i64, params: &Value) -> RpcResponse {
        let type_name = type_name(params);
        let Some(data_source) = self.data_sources.get(type_name) else {
            return unknown_type(id, "data source", type_name);
        };
        let ctx = match self.get_context() {
            Ok(ctx) => ctx,
            Err(e) => return diagnostics_response(id, e.into()),
        };

        let config = state_param(params, "config").unwrap_or_default();
        match data_source.read(&ctx, &config).await {
            Ok(state) => RpcResponse::success(
                id,
                serde_json::json!({
                    "state": state.values,
                    "diagnostics": []
                }),
            ),
            Err(e) => diagnostics_response(id, e.into()),
        }
    }
}

impl Default for VcdProvider {
    fn default() -> Self {
        Self::new()
    }
}
