//! vCloud Director API Client for Terraform Provider

use crate::api::VcdApi;
use crate::types::{
    Catalog, CatalogItem, CatalogItemRecord, EntityRecord, FirewallService, Link, Metadata,
    NatService, NetworkConfigSection, NetworkFeatures, QueryResult, Task, TaskStatus,
    UploadSession, UploadVAppTemplateParams, VApp, VAppNetwork, VAppNetworkConfig, Vdc, Vm,
};
use async_trait::async_trait;
use base64::Engine;
use reqwest::header::{
    HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_RANGE, CONTENT_TYPE,
};
use reqwest::Method;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// vCD API version requested on every call
pub const API_VERSION: &str = "36.0";

const SYSTEM_ORG: &str = "System";
const ACCESS_TOKEN_HEADER: &str = "x-vmware-vcloud-access-token";
const NETWORK_CONFIG_SECTION_TYPE: &str = "application/vnd.vmware.vcloud.networkConfigSection+json";
const QUERY_PAGE_SIZE: usize = 128;

/// Client errors
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },
    #[error("Authentication failed")]
    AuthFailed,
    #[error("Resource not found: {0}")]
    NotFound(String),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("task failed: {0}")]
    Task(String),
    #[error("invalid reference: {0}")]
    InvalidHref(String),
}

impl ClientError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ClientError::NotFound(_))
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;

// ============================================================================
// Identifier helpers
// ============================================================================

/// True for canonical vCD identifiers such as `urn:vcloud:vapp:<uuid>`
pub fn is_urn(identifier: &str) -> bool {
    identifier.starts_with("urn:vcloud:") && uuid_from_id(identifier).is_ok()
}

/// Extracts the UUID from a `urn:vcloud:<type>:<uuid>` identifier
pub fn uuid_from_id(identifier: &str) -> Result<String> {
    let tail = identifier.rsplit(':').next().unwrap_or_default();
    parse_uuid(tail).ok_or_else(|| ClientError::InvalidHref(identifier.to_string()))
}

/// Extracts the UUID from an entity href, e.g. `.../api/vApp/vapp-<uuid>`
pub fn uuid_from_href(href: &str) -> Result<String> {
    let segment = href
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or_default();
    // Entity hrefs may carry a type prefix: vapp-, vm-, vappTemplate-
    let candidate = segment
        .len()
        .checked_sub(36)
        .and_then(|start| segment.get(start..))
        .unwrap_or(segment);
    parse_uuid(candidate).ok_or_else(|| ClientError::InvalidHref(href.to_string()))
}

/// Escapes FIQL reserved characters in a filter value
fn fiql_escape(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '\\' | ',' | ';' | '(' | ')' | '=' | '!' | '<' | '>') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

fn parse_uuid(raw: &str) -> Option<String> {
    uuid::Uuid::parse_str(raw)
        .ok()
        .map(|u| u.hyphenated().to_string())
}

fn network_uuid(config: &VAppNetworkConfig) -> Option<String> {
    config
        .link
        .as_ref()
        .and_then(|l| uuid_from_href(&l.href).ok())
}

fn matches_network(config: &VAppNetworkConfig, identifier: &str) -> bool {
    let wanted = uuid_from_id(identifier).ok();
    match (wanted, network_uuid(config)) {
        (Some(wanted), Some(actual)) if wanted == actual => true,
        _ => config.network_name == identifier,
    }
}

// ============================================================================
// Client
// ============================================================================

/// vCloud Director API Client
#[derive(Clone)]
pub struct VcdClient {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
    sys_admin: bool,
    task_poll_interval: Duration,
}

impl VcdClient {
    /// Create a new client. `base_url` may include the trailing `/api`.
    pub fn new(base_url: &str, allow_unverified_ssl: bool) -> Result<Self> {
        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(allow_unverified_ssl)
            .build()?;

        Ok(Self {
            client,
            base_url: base_url
                .trim_end_matches('/')
                .trim_end_matches("/api")
                .to_string(),
            token: None,
            sys_admin: false,
            task_poll_interval: Duration::from_secs(1),
        })
    }

    /// Set authentication token
    pub fn with_token(mut self, token: &str) -> Self {
        self.token = Some(token.to_string());
        self
    }

    pub fn with_task_poll_interval(mut self, interval: Duration) -> Self {
        self.task_poll_interval = interval;
        self
    }

    /// Open a session with user name and password
    pub async fn authenticate(&mut self, org: &str, user: &str, password: &str) -> Result<String> {
        let path = if org.eq_ignore_ascii_case(SYSTEM_ORG) {
            "/cloudapi/1.0.0/sessions/provider"
        } else {
            "/cloudapi/1.0.0/sessions"
        };
        let credentials = base64::engine::general_purpose::STANDARD
            .encode(format!("{}@{}:{}", user, org, password));

        let response = self
            .client
            .post(self.url(path))
            .header(ACCEPT, format!("application/json;version={}", API_VERSION))
            .header(AUTHORIZATION, format!("Basic {}", credentials))
            .send()
            .await?;

        if response.status().as_u16() == 401 {
            return Err(ClientError::AuthFailed);
        }
        if !response.status().is_success() {
            return Err(Self::api_error(response).await);
        }

        let token = response
            .headers()
            .get(ACCESS_TOKEN_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(String::from)
            .ok_or(ClientError::AuthFailed)?;

        self.token = Some(token.clone());
        self.sys_admin = org.eq_ignore_ascii_case(SYSTEM_ORG);
        Ok(token)
    }

    /// Exchange an API (refresh) token for an access token
    pub async fn authenticate_with_api_token(&mut self, org: &str, api_token: &str) -> Result<String> {
        #[derive(Deserialize)]
        struct TokenResponse {
            access_token: String,
        }

        let path = if org.eq_ignore_ascii_case(SYSTEM_ORG) {
            "/oauth/provider/token".to_string()
        } else {
            format!("/oauth/tenant/{}/token", urlencoding::encode(org))
        };
        let body = format!(
            "grant_type=refresh_token&refresh_token={}",
            urlencoding::encode(api_token)
        );

        let response = self
            .client
            .post(self.url(&path))
            .header(ACCEPT, "application/json")
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(body)
            .send()
            .await?;

        if response.status().as_u16() == 401 || response.status().as_u16() == 400 {
            return Err(ClientError::AuthFailed);
        }
        let token: TokenResponse = Self::handle_response(response).await?;

        self.token = Some(token.access_token.clone());
        self.sys_admin = org.eq_ignore_ascii_case(SYSTEM_ORG);
        Ok(token.access_token)
    }

    /// Accepts both API paths and absolute hrefs returned by vCD
    fn url(&self, path_or_href: &str) -> String {
        if path_or_href.starts_with("http://") || path_or_href.starts_with("https://") {
            path_or_href.to_string()
        } else {
            format!("{}{}", self.base_url, path_or_href)
        }
    }

    /// Build headers for requests
    fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Ok(value) = HeaderValue::from_str(&format!("application/*+json;version={}", API_VERSION)) {
            headers.insert(ACCEPT, value);
        }

        if let Some(token) = &self.token {
            if let Ok(value) = HeaderValue::from_str(&format!("Bearer {}", token)) {
                headers.insert(AUTHORIZATION, value);
            }
        }

        headers
    }

    /// GET request
    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let response = self
            .client
            .get(self.url(path))
            .headers(self.headers())
            .send()
            .await?;

        Self::handle_response(response).await
    }

    /// Request with a JSON body and an explicit media type
    async fn send_json<T: DeserializeOwned, B: Serialize>(
        &self,
        method: Method,
        path: &str,
        body: &B,
        content_type: &str,
    ) -> Result<T> {
        let response = self
            .client
            .request(method, self.url(path))
            .headers(self.headers())
            .header(CONTENT_TYPE, content_type)
            .body(serde_json::to_vec(body)?)
            .send()
            .await?;

        Self::handle_response(response).await
    }

    /// DELETE request, returning the task vCD spawned
    async fn delete(&self, path: &str) -> Result<Task> {
        let response = self
            .client
            .delete(self.url(path))
            .headers(self.headers())
            .send()
            .await?;

        Self::handle_response(response).await
    }

    /// Handle API response
    async fn handle_response<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
        let status = response.status();

        if status.is_success() {
            let body = response.text().await?;
            Ok(serde_json::from_str(&body)?)
        } else if status.as_u16() == 401 {
            Err(ClientError::AuthFailed)
        } else if status.as_u16() == 404 {
            let url = response.url().to_string();
            Err(ClientError::NotFound(url))
        } else {
            Err(Self::api_error(response).await)
        }
    }

    async fn api_error(response: reqwest::Response) -> ClientError {
        #[derive(Deserialize)]
        struct VcdError {
            message: String,
            #[serde(rename = "minorErrorCode", default)]
            minor_error_code: String,
        }

        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        match serde_json::from_str::<VcdError>(&body) {
            // vCD reports missing entities the caller cannot see as 403
            Ok(err) if status == 403 && err.minor_error_code == "ACCESS_TO_RESOURCE_IS_FORBIDDEN" => {
                ClientError::NotFound(err.message)
            }
            Ok(err) => ClientError::Api {
                status,
                message: err.message,
            },
            Err(_) => ClientError::Api {
                status,
                message: body,
            },
        }
    }

    /// Run a query-service lookup and return its records, following pages
    async fn query<T: DeserializeOwned>(&self, query_type: &str, filter: &str) -> Result<Vec<T>> {
        let mut records = Vec::new();
        let mut page = 1;
        loop {
            let path = format!(
                "/api/query?type={}&format=records&page={}&pageSize={}&filter={}",
                query_type,
                page,
                QUERY_PAGE_SIZE,
                urlencoding::encode(filter)
            );
            let result: QueryResult<T> = self.get(&path).await?;
            let fetched = result.record.len();
            records.extend(result.record);

            let total = result.total.unwrap_or(0).max(0) as usize;
            if fetched == 0 || records.len() >= total {
                return Ok(records);
            }
            page += 1;
        }
    }

    /// Poll until the task leaves the running state
    pub async fn poll_task(&self, task: Task) -> Result<Task> {
        let mut current = task;
        loop {
            match current.state() {
                TaskStatus::Success => return Ok(current),
                TaskStatus::Error => {
                    let message = current
                        .error
                        .as_ref()
                        .map(|e| e.message.clone())
                        .unwrap_or_else(|| "unknown error".to_string());
                    return Err(ClientError::Task(message));
                }
                TaskStatus::Aborted => {
                    return Err(ClientError::Task(format!("task {} aborted", current.href)))
                }
                TaskStatus::Running => {
                    tokio::time::sleep(self.task_poll_interval).await;
                    current = self.get(&current.href).await?;
                }
            }
        }
    }

    /// GET a vApp together with its network config section
    async fn fetch_vapp(&self, href: &str) -> Result<VApp> {
        let mut vapp: VApp = self.get(href).await?;
        if vapp.network_config_section.is_none() {
            vapp.network_config_section = Some(self.get_network_config_section(&vapp).await?);
        }
        Ok(vapp)
    }

    async fn get_network_config_section(&self, vapp: &VApp) -> Result<NetworkConfigSection> {
        self.get(&format!("{}/networkConfigSection/", vapp.href.trim_end_matches('/')))
            .await
    }

    /// Read-modify-write of one network's features inside the vApp's network
    /// config section. The whole section is submitted back.
    async fn modify_network_features<F>(
        &self,
        vapp: &VApp,
        network_id: &str,
        modify: F,
    ) -> Result<VAppNetwork>
    where
        F: FnOnce(&mut NetworkFeatures) + Send,
    {
        let mut section = self.get_network_config_section(vapp).await?;
        let config = section
            .network_config
            .iter_mut()
            .find(|c| matches_network(c, network_id))
            .ok_or_else(|| ClientError::NotFound(format!("vApp network {}", network_id)))?;

        let features = config
            .configuration
            .features
            .get_or_insert_with(NetworkFeatures::default);
        modify(features);

        let task: Task = self
            .send_json(
                Method::PUT,
                &format!("{}/networkConfigSection/", vapp.href.trim_end_matches('/')),
                &section,
                NETWORK_CONFIG_SECTION_TYPE,
            )
            .await?;
        self.poll_task(task).await?;

        self.get_vapp_network_by_name_or_id(vapp, network_id).await
    }
}

// ============================================================================
// API Methods
// ============================================================================

/// vApp template view used to discover the upload link and pending task
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct VAppTemplateUploadView {
    #[serde(default)]
    files: Option<FileList>,
    #[serde(default)]
    tasks: Option<TaskList>,
}

#[derive(Deserialize)]
struct FileList {
    #[serde(default)]
    file: Vec<FileEntry>,
}

#[derive(Deserialize)]
struct FileEntry {
    #[serde(default)]
    link: Vec<Link>,
}

#[derive(Deserialize)]
struct TaskList {
    #[serde(default)]
    task: Vec<Task>,
}

#[async_trait]
impl VcdApi for VcdClient {
    fn is_sys_admin(&self) -> bool {
        self.sys_admin
    }

    async fn get_vdc(&self, org: &str, vdc: &str) -> Result<Vdc> {
        let records: Vec<EntityRecord> = self
            .query("orgVdc", &format!("(name=={};orgName=={})", fiql_escape(vdc), fiql_escape(org)))
            .await?;
        let record = records
            .into_iter()
            .next()
            .ok_or_else(|| ClientError::NotFound(format!("VDC {} in org {}", vdc, org)))?;

        Ok(Vdc {
            id: format!("urn:vcloud:vdc:{}", uuid_from_href(&record.href)?),
            name: record.name,
            href: record.href,
            org_name: org.to_string(),
        })
    }

    async fn get_catalog_by_name(&self, org: &str, name: &str) -> Result<Catalog> {
        let query_type = if self.sys_admin { "adminCatalog" } else { "catalog" };
        let records: Vec<EntityRecord> = self
            .query(query_type, &format!("(name=={};orgName=={})", fiql_escape(name), fiql_escape(org)))
            .await?;
        let record = records
            .into_iter()
            .next()
            .ok_or_else(|| ClientError::NotFound(format!("catalog {} in org {}", name, org)))?;

        Ok(Catalog {
            id: format!("urn:vcloud:catalog:{}", uuid_from_href(&record.href)?),
            name: record.name,
            href: record.href,
            org_name: org.to_string(),
        })
    }

    async fn list_catalog_items(&self, catalog: &Catalog) -> Result<Vec<CatalogItemRecord>> {
        let query_type = if self.sys_admin {
            "adminCatalogItem"
        } else {
            "catalogItem"
        };
        self.query(query_type, &format!("catalog=={}", fiql_escape(&catalog.href)))
            .await
    }

    async fn get_catalog_item_by_name_or_id(
        &self,
        catalog: &Catalog,
        identifier: &str,
    ) -> Result<CatalogItem> {
        if is_urn(identifier) {
            return self
                .get(&format!("/api/catalogItem/{}", uuid_from_id(identifier)?))
                .await;
        }

        let record = self
            .list_catalog_items(catalog)
            .await?
            .into_iter()
            .find(|r| r.name == identifier)
            .ok_or_else(|| {
                ClientError::NotFound(format!("catalog item {} in {}", identifier, catalog.name))
            })?;
        self.get(&record.href).await
    }

    async fn get_catalog_item_metadata(&self, item_href: &str) -> Result<Metadata> {
        self.get(&format!("{}/metadata", item_href.trim_end_matches('/')))
            .await
    }

    async fn delete_catalog_item(&self, item: &CatalogItem) -> Result<()> {
        let task = self.delete(&item.href).await?;
        self.poll_task(task).await.map(|_| ())
    }

    async fn update_catalog_item_description(
        &self,
        item: &CatalogItem,
        description: &str,
    ) -> Result<CatalogItem> {
        let mut updated = item.clone();
        updated.description = description.to_string();
        self.send_json(
            Method::PUT,
            &item.href,
            &updated,
            "application/vnd.vmware.vcloud.catalogItem+json",
        )
        .await
    }

    async fn begin_catalog_upload(
        &self,
        catalog: &Catalog,
        params: &UploadVAppTemplateParams,
    ) -> Result<UploadSession> {
        let item: CatalogItem = self
            .send_json(
                Method::POST,
                &format!("{}/action/upload", catalog.href.trim_end_matches('/')),
                params,
                "application/vnd.vmware.vcloud.uploadVAppTemplateParams+json",
            )
            .await?;

        let template_href = item
            .entity
            .as_ref()
            .map(|e| e.href.clone())
            .ok_or_else(|| ClientError::InvalidHref(format!("catalog item {} has no entity", item.name)))?;
        let view: VAppTemplateUploadView = self.get(&template_href).await?;

        let upload_href = view
            .files
            .iter()
            .flat_map(|f| f.file.iter())
            .flat_map(|f| f.link.iter())
            .find(|l| l.rel.as_deref() == Some("upload:default"))
            .map(|l| l.href.clone())
            .ok_or_else(|| ClientError::InvalidHref(format!("no upload link for {}", item.name)))?;
        let task = view
            .tasks
            .and_then(|t| t.task.into_iter().next())
            .ok_or_else(|| ClientError::Task(format!("no upload task for {}", item.name)))?;

        Ok(UploadSession {
            item,
            upload_href,
            task,
        })
    }

    async fn upload_chunk(
        &self,
        upload_href: &str,
        offset: u64,
        total: u64,
        chunk: Vec<u8>,
    ) -> Result<()> {
        let end = offset + chunk.len() as u64;
        let response = self
            .client
            .put(self.url(upload_href))
            .headers(self.headers())
            .header(CONTENT_TYPE, "application/octet-stream")
            .header(
                CONTENT_RANGE,
                format!("bytes {}-{}/{}", offset, end.saturating_sub(1), total),
            )
            .body(chunk)
            .send()
            .await?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(Self::api_error(response).await)
        }
    }

    async fn wait_for_task(&self, task: Task) -> Result<Task> {
        self.poll_task(task).await
    }

    async fn cancel_task(&self, task: &Task) -> Result<()> {
        let response = self
            .client
            .post(self.url(&format!("{}/action/cancel", task.href.trim_end_matches('/'))))
            .headers(self.headers())
            .send()
            .await?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(Self::api_error(response).await)
        }
    }

    async fn get_vapp_by_name_or_id(&self, vdc: &Vdc, identifier: &str) -> Result<VApp> {
        if is_urn(identifier) {
            return self
                .fetch_vapp(&format!("/api/vApp/vapp-{}", uuid_from_id(identifier)?))
                .await;
        }

        let records: Vec<EntityRecord> = self
            .query("vApp", &format!("(name=={};vdc=={})", fiql_escape(identifier), fiql_escape(&vdc.href)))
            .await?;
        let record = records
            .into_iter()
            .next()
            .ok_or_else(|| ClientError::NotFound(format!("vApp {} in VDC {}", identifier, vdc.name)))?;
        self.fetch_vapp(&record.href).await
    }

    async fn get_vapp_vm_by_id(&self, vapp: &VApp, vm_id: &str) -> Result<Vm> {
        let current: VApp = self.get(&vapp.href).await?;
        current
            .children
            .vm
            .into_iter()
            .find(|vm| vm.id == vm_id)
            .ok_or_else(|| ClientError::NotFound(format!("VM {} in vApp {}", vm_id, vapp.name)))
    }

    async fn get_vapp_network_by_name_or_id(
        &self,
        vapp: &VApp,
        identifier: &str,
    ) -> Result<VAppNetwork> {
        let section = self.get_network_config_section(vapp).await?;
        let config = section
            .network_config
            .into_iter()
            .find(|c| matches_network(c, identifier))
            .ok_or_else(|| {
                ClientError::NotFound(format!("vApp network {} in vApp {}", identifier, vapp.name))
            })?;

        let uuid = network_uuid(&config).ok_or_else(|| {
            ClientError::InvalidHref(format!("vApp network {} has no link", config.network_name))
        })?;
        Ok(VAppNetwork {
            id: format!("urn:vcloud:network:{}", uuid),
            name: config.network_name,
            configuration: config.configuration,
        })
    }

    async fn update_network_firewall_rules(
        &self,
        vapp: &VApp,
        network_id: &str,
        service: FirewallService,
    ) -> Result<VAppNetwork> {
        self.modify_network_features(vapp, network_id, move |features| {
            features.firewall_service = Some(service);
        })
        .await
    }

    async fn remove_all_network_firewall_rules(&self, vapp: &VApp, network_id: &str) -> Result<()> {
        self.modify_network_features(vapp, network_id, |features| {
            if let Some(firewall) = features.firewall_service.as_mut() {
                firewall.firewall_rule.clear();
            }
        })
        .await
        .map(|_| ())
    }

    async fn update_network_nat_rules(
        &self,
        vapp: &VApp,
        network_id: &str,
        service: NatService,
    ) -> Result<VAppNetwork> {
        self.modify_network_features(vapp, network_id, move |features| {
            features.nat_service = Some(service);
        })
        .await
    }

    async fn remove_all_network_nat_rules(&self, vapp: &VApp, network_id: &str) -> Result<()> {
        self.modify_network_features(vapp, network_id, |features| {
            if let Some(nat) = features.nat_service.as_mut() {
                nat.nat_rule.clear();
            }
        })
        .await
        .map(|_| ())
    }
}
