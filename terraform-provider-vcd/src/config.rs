//! Provider configuration and the per-operation context
//!
//! Terraform sends the provider block once through `ConfigureProvider`.
//! Unset attributes fall back to `VCD_*` environment variables; the result is
//! validated once and turned into a [`VcdContext`] that every resource
//! operation receives explicitly.

use crate::api::VcdApi;
use crate::error::{ProviderError, Result};
use crate::lock::ParentLocks;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub const DEFAULT_IMPORT_SEPARATOR: &str = ".";
pub const IMPORT_SEPARATOR_ENV: &str = "VCD_IMPORT_SEPARATOR";

/// Provider block as received from Terraform
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub url: Option<String>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub api_token: Option<String>,
    pub org: Option<String>,
    pub vdc: Option<String>,
    /// Organization used for authentication; defaults to `org`
    pub sysorg: Option<String>,
    pub allow_unverified_ssl: Option<bool>,
    pub import_separator: Option<String>,
}

/// Credentials selected from the configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credentials {
    ApiToken(String),
    Password { user: String, password: String },
}

/// Validated provider settings
#[derive(Debug, Clone)]
pub struct ProviderSettings {
    pub url: String,
    pub credentials: Credentials,
    /// Organization the session is opened in
    pub auth_org: String,
    pub defaults: ProviderDefaults,
    pub allow_unverified_ssl: bool,
}

/// Values resources fall back to when their own attributes are unset
#[derive(Debug, Clone, Default)]
pub struct ProviderDefaults {
    pub org: Option<String>,
    pub vdc: Option<String>,
    pub import_separator: String,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

impl ProviderConfig {
    /// Fill unset attributes from `lookup`, which maps `VCD_*` names to values
    pub fn with_env_fallback<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let fill = |current: Option<String>, name: &str| non_empty(current).or_else(|| non_empty(lookup(name)));

        self.url = fill(self.url, "VCD_URL");
        self.user = fill(self.user, "VCD_USER");
        self.password = fill(self.password, "VCD_PASSWORD");
        self.api_token = fill(self.api_token, "VCD_API_TOKEN");
        self.org = fill(self.org, "VCD_ORG");
        self.vdc = fill(self.vdc, "VCD_VDC");
        self.sysorg = fill(self.sysorg, "VCD_SYS_ORG");
        if self.allow_unverified_ssl.is_none() {
            self.allow_unverified_ssl = lookup("VCD_ALLOW_UNVERIFIED_SSL")
                .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes"));
        }
        // The environment wins over the provider attribute for the separator
        self.import_separator =
            non_empty(lookup(IMPORT_SEPARATOR_ENV)).or_else(|| non_empty(self.import_separator));
        self
    }

    /// Validate once and produce typed settings
    pub fn validate(self) -> Result<ProviderSettings> {
        let url = self
            .url
            .ok_or_else(|| ProviderError::validation("url is required"))?;

        let credentials = match (self.api_token, self.user, self.password) {
            (Some(token), _, _) => Credentials::ApiToken(token),
            (None, Some(user), Some(password)) => Credentials::Password { user, password },
            _ => {
                return Err(ProviderError::validation(
                    "Either api_token or user/password must be provided",
                ))
            }
        };

        let auth_org = self
            .sysorg
            .clone()
            .or_else(|| self.org.clone())
            .ok_or_else(|| ProviderError::validation("one of org or sysorg is required"))?;

        Ok(ProviderSettings {
            url,
            credentials,
            auth_org,
            defaults: ProviderDefaults {
                org: self.org,
                vdc: self.vdc,
                import_separator: self
                    .import_separator
                    .unwrap_or_else(|| DEFAULT_IMPORT_SEPARATOR.to_string()),
            },
            allow_unverified_ssl: self.allow_unverified_ssl.unwrap_or(false),
        })
    }
}

/// Handle passed to every resource operation
pub struct VcdContext {
    pub api: Arc<dyn VcdApi>,
    pub defaults: ProviderDefaults,
    pub locks: Arc<ParentLocks>,
}

impl VcdContext {
    pub fn new(api: Arc<dyn VcdApi>, defaults: ProviderDefaults) -> Self {
        Self {
            api,
            defaults,
            locks: Arc::new(ParentLocks::new()),
        }
    }

    /// Resource-level org, else the provider default
    pub fn org_name(&self, org: Option<&str>) -> Result<String> {
        org.filter(|o| !o.is_empty())
            .map(String::from)
            .or_else(|| self.defaults.org.clone())
            .ok_or_else(|| {
                ProviderError::validation(
                    "empty org name: set `org` on the resource or in the provider block",
                )
            })
    }

    /// Resource-level vdc, else the provider default
    pub fn vdc_name(&self, vdc: Option<&str>) -> Result<String> {
        vdc.filter(|v| !v.is_empty())
            .map(String::from)
            .or_else(|| self.defaults.vdc.clone())
            .ok_or_else(|| {
                ProviderError::validation(
                    "empty VDC name: set `vdc` on the resource or in the provider block",
                )
            })
    }

    pub fn import_separator(&self) -> &str {
        &self.defaults.import_separator
    }
}
