//! Remote-debugging transport seam.
//!
//! The pool only needs connect / list / probe / close; everything else about
//! the wire protocol stays behind these traits. [`cdp`] is the Chrome DevTools
//! Protocol implementation used against Electron-based editors.

pub mod cdp;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub use cdp::{CdpHandle, CdpTransport};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("connect failed: {0}")]
    Connect(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("connection closed")]
    Closed,

    #[error("no usable page target")]
    NoTarget,
}

/// A browser context (window group) exposed by a remote-debugging endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextInfo {
    /// Empty for the default context
    pub id: String,
    pub page_count: usize,
}

/// A page target inside a context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageInfo {
    pub target_id: String,
    pub context_id: String,
    pub title: String,
    pub url: String,
}

/// Opens transport sessions. Implementations must honor `timeout` themselves
/// or return promptly; the pool wraps calls in its own timeout as well.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn connect(
        &self,
        host: &str,
        port: u16,
        timeout: Duration,
    ) -> Result<Arc<dyn TransportHandle>, TransportError>;
}

/// One live transport session. Owned by exactly one pooled connection.
#[async_trait]
pub trait TransportHandle: Send + Sync {
    async fn list_contexts(&self) -> Result<Vec<ContextInfo>, TransportError>;

    async fn list_active_pages(
        &self,
        context: &ContextInfo,
    ) -> Result<Vec<PageInfo>, TransportError>;

    /// Cheap liveness check against `page`.
    async fn probe(&self, page: &PageInfo) -> Result<(), TransportError>;

    /// Evaluate a JavaScript expression in `page` and return its value.
    async fn evaluate(
        &self,
        page: &PageInfo,
        expression: &str,
    ) -> Result<serde_json::Value, TransportError>;

    /// Release the underlying session. Must be safe to call more than once.
    async fn close(&self);
}

/// First page of the first context that has one.
pub async fn first_active_page(
    handle: &dyn TransportHandle,
) -> Result<PageInfo, TransportError> {
    let contexts = handle.list_contexts().await?;
    for context in &contexts {
        let pages = handle.list_active_pages(context).await?;
        if let Some(page) = pages.into_iter().next() {
            return Ok(page);
        }
    }
    Err(TransportError::NoTarget)
}
