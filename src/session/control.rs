use crate::error::Result;
use crate::pool::{Connection, ConnectionPool};
use std::sync::Arc;

/// The session layer's only door into the pool.
#[derive(Clone)]
pub struct BrowserControl {
    pool: ConnectionPool,
}

impl BrowserControl {
    pub fn new(pool: ConnectionPool) -> Self {
        Self { pool }
    }

    pub fn endpoint_url(&self, port: u16) -> String {
        format!("http://{}:{}", self.pool.config().host, port)
    }

    pub async fn connection(&self, port: u16) -> Result<Arc<Connection>> {
        self.pool.acquire(port).await
    }

    pub async fn evaluate(&self, port: u16, expression: &str) -> Result<serde_json::Value> {
        let conn = self.connection(port).await?;
        Ok(conn.evaluate(expression).await?)
    }

    /// Window title of the active page, falling back to the title seen when
    /// the page was selected.
    pub async fn page_title(&self, port: u16) -> Result<String> {
        let conn = self.connection(port).await?;
        match conn.evaluate("document.title").await {
            Ok(serde_json::Value::String(title)) => Ok(title),
            Ok(_) => Ok(conn.page().title),
            Err(e) => {
                tracing::debug!("document.title on port {} failed: {}", port, e);
                Ok(conn.page().title)
            }
        }
    }

    pub async fn release(&self, port: u16) {
        self.pool.close_connection(port).await;
    }
}
