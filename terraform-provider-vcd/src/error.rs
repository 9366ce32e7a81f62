//! Provider error types
//!
//! Every failure a resource operation can produce ends up here and is
//! reported to Terraform as a diagnostic. Nothing is retried.

use crate::client::ClientError;
use crate::schema::Diagnostic;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProviderError {
    /// Container, resource or referenced VM is absent
    #[error("{kind} {name} not found")]
    NotFound { kind: &'static str, name: String },

    /// A filter matched zero or several candidates
    #[error("{0}")]
    AmbiguousMatch(String),

    /// Malformed import path or invalid field value
    #[error("{0}")]
    Validation(String),

    /// Network, API or task failure while talking to vCD
    #[error("{context}: {source}")]
    Remote {
        context: String,
        #[source]
        source: ClientError,
    },

    /// The remote object is still present after it was deleted
    #[error("{0}")]
    Consistency(String),

    /// Import was invoked in list mode; the payload is the formatted listing
    #[error("resource was not imported! {usage}\n{listing}")]
    ImportListing { usage: String, listing: String },

    #[error("provider not configured")]
    NotConfigured,
}

pub type Result<T> = std::result::Result<T, ProviderError>;

impl ProviderError {
    pub fn not_found(kind: &'static str, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            name: name.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn remote(context: impl Into<String>, source: ClientError) -> Self {
        Self::Remote {
            context: context.into(),
            source,
        }
    }

    /// True for both provider- and client-level not-found conditions
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound { .. } => true,
            Self::Remote { source, .. } => source.is_not_found(),
            _ => false,
        }
    }
}

impl From<ProviderError> for Diagnostic {
    fn from(err: ProviderError) -> Self {
        match &err {
            ProviderError::ImportListing { usage, listing } => {
                Diagnostic::error(&format!("resource was not imported! {}", usage))
                    .with_detail(listing)
            }
            ProviderError::Remote { context, source } => {
                Diagnostic::error(context).with_detail(&source.to_string())
            }
            _ => Diagnostic::error(&err.to_string()),
        }
    }
}

impl From<ProviderError> for Vec<Diagnostic> {
    fn from(err: ProviderError) -> Self {
        vec![err.into()]
    }
}
