//! Kagami collaborator API.
//!
//! This crate defines the traits the browsing core depends on: the remote catalog query
//! service and the asset loader. Transports live outside; tests and the CLI use the mocks.

#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};

use kagami_core::{EntityKind, FilterDefaults, FilterState, QueryResponse};

mod cancel;
mod mock;

pub use cancel::{guard, CancelToken, TokenSlot};
pub use mock::{AssetBehavior, MockApi, MockAssets};

/// API errors suitable for transport over RPC later.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
pub enum ApiError {
    /// The caller superseded the request. Never shown to the user.
    #[error("cancelled")]
    Cancelled,
    #[error("network: {0}")]
    Network(String),
    #[error("remote {status}: {message}")]
    Remote { status: u16, message: String },
    #[error("timeout")]
    Timeout,
    #[error("decode: {0}")]
    Decode(String),
}

impl ApiError {
    pub fn is_cancellation(&self) -> bool {
        matches!(self, ApiError::Cancelled)
    }

    /// Message suitable for an error banner.
    pub fn user_message(&self) -> String {
        match self {
            ApiError::Cancelled => String::new(),
            ApiError::Network(_) | ApiError::Timeout => {
                "Could not reach the catalog. Check your connection and retry.".to_string()
            }
            ApiError::Remote { status, .. } if *status >= 500 => {
                "The catalog is having trouble right now. Please retry.".to_string()
            }
            ApiError::Remote { message, .. } => message.clone(),
            ApiError::Decode(_) => "Received an unexpected response from the catalog.".to_string(),
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

/// Outcome of a single asset preload. Failure is a settled state, not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AssetReadiness {
    Ready,
    Failed,
}

/// A resolved display name for an entity id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityName {
    pub kind: EntityKind,
    pub id: String,
    pub name: String,
}

/// Remote catalog query surface.
#[async_trait::async_trait]
pub trait CatalogApi: Send + Sync {
    /// Run one catalog query. Implementations must observe `token` and return
    /// [`ApiError::Cancelled`] once it fires.
    async fn query(
        &self,
        state: &FilterState,
        defaults: &FilterDefaults,
        token: &CancelToken,
    ) -> ApiResult<QueryResponse>;

    /// Batched display-name lookup for entity ids. Unknown ids are omitted.
    async fn resolve_names(&self, ids: &[(EntityKind, String)]) -> ApiResult<Vec<EntityName>>;

    /// Cheap aggregate: total catalog size.
    async fn catalog_total(&self) -> ApiResult<u64>;
}

/// Asset preloading surface (image fetch + decode on a real host).
#[async_trait::async_trait]
pub trait AssetLoader: Send + Sync {
    async fn preload(&self, url: &str) -> AssetReadiness;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancellation_is_not_user_facing() {
        assert!(ApiError::Cancelled.is_cancellation());
        assert!(ApiError::Cancelled.user_message().is_empty());
        let e = ApiError::Remote { status: 503, message: "upstream".into() };
        assert!(!e.is_cancellation());
        assert!(e.user_message().contains("retry"));
    }

    #[test]
    fn error_serializes_for_transport() {
        let e = ApiError::Remote { status: 400, message: "bad filter".into() };
        let json = serde_json::to_string(&e).unwrap();
        let back: ApiError = serde_json::from_str(&json).unwrap();
        assert_eq!(back, e);
    }
}
