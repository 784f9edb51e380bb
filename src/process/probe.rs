use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Which editor build answered on a debug port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProductType {
    Cursor,
    Vscode,
    Chromium,
    Unknown,
}

impl ProductType {
    /// Classify from the `User-Agent` reported by `/json/version`.
    pub fn from_user_agent(user_agent: &str) -> Self {
        if user_agent.contains("Cursor/") {
            ProductType::Cursor
        } else if user_agent.contains("Code/") || user_agent.contains("Code - Insiders/") {
            ProductType::Vscode
        } else if user_agent.contains("Chrome/") {
            ProductType::Chromium
        } else {
            ProductType::Unknown
        }
    }
}

/// Identity reported by a remote-debugging endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductInfo {
    pub browser: String,
    pub user_agent: String,
    pub product_type: ProductType,
}

impl ProductInfo {
    pub fn from_version(version: &serde_json::Value) -> Self {
        let field = |name: &str| {
            version
                .get(name)
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string()
        };
        let user_agent = field("User-Agent");
        Self {
            browser: field("Browser"),
            product_type: ProductType::from_user_agent(&user_agent),
            user_agent,
        }
    }
}

#[async_trait]
pub trait PortProbe: Send + Sync {
    async fn is_reachable(&self, port: u16) -> bool;

    async fn identify(&self, port: u16) -> Option<ProductInfo>;
}

/// Probes `http://host:port/json/version`.
#[derive(Clone)]
pub struct HttpPortProbe {
    http: reqwest::Client,
    host: String,
    timeout: Duration,
}

impl HttpPortProbe {
    pub fn new(host: impl Into<String>, timeout: Duration) -> Self {
        Self {
            http: reqwest::Client::new(),
            host: host.into(),
            timeout,
        }
    }

    async fn version(&self, port: u16) -> Option<serde_json::Value> {
        let url = format!("http://{}:{}/json/version", self.host, port);
        match self.http.get(&url).timeout(self.timeout).send().await {
            Ok(response) if response.status().is_success() => response.json().await.ok(),
            Ok(response) => {
                tracing::trace!("Port {} answered HTTP {}", port, response.status());
                None
            }
            Err(_) => None,
        }
    }
}

#[async_trait]
impl PortProbe for HttpPortProbe {
    async fn is_reachable(&self, port: u16) -> bool {
        self.version(port).await.is_some()
    }

    async fn identify(&self, port: u16) -> Option<ProductInfo> {
        self.version(port)
            .await
            .map(|version| ProductInfo::from_version(&version))
    }
}
