//! # custody-gateway
//!
//! Client side of the remote content-addressable blob store.
//!
//! The engine only sees the [`ContentStore`] trait. [`PinningGateway`] is the
//! HTTP implementation that talks to a pinning service: uploads go to the
//! pinning API, downloads go through a public read gateway.

mod pinning;

pub use pinning::{GatewayOptions, PinningCredentials, PinningGateway};

use async_trait::async_trait;
use thiserror::Error;

/// Errors returned by a content store
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ContentStoreError {
    #[error("Content store request timed out")]
    Timeout,

    #[error("Content not found: {address}")]
    NotFound { address: String },

    #[error("Content store rejected credentials: {0}")]
    AuthError(String),

    #[error("Content store transport error: {0}")]
    Transport(String),
}

impl ContentStoreError {
    /// Whether another attempt may succeed. Credential and lookup failures
    /// will not change on retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout | Self::Transport(_))
    }
}

pub type Result<T> = std::result::Result<T, ContentStoreError>;

/// Remote content-addressable blob store.
///
/// Implementations must be safe to retry: putting the same bytes twice may
/// yield two addresses, but both must resolve to identical content.
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Store an opaque blob and return its content address.
    async fn put(&self, data: &[u8]) -> Result<String>;

    /// Fetch a blob by content address.
    async fn get(&self, address: &str) -> Result<Vec<u8>>;

    /// Release the remote copy. Unknown addresses are not an error.
    async fn unpin(&self, address: &str) -> Result<()>;
}
