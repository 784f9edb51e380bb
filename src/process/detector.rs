use crate::error::{FleetError, Result};
use crate::process::probe::{PortProbe, ProductType};
use crate::session::InstanceStatus;
use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::ops::RangeInclusive;
use std::sync::Arc;

/// How many ports are probed concurrently during a scan
const SCAN_CONCURRENCY: usize = 16;

/// One instance reported by discovery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveredInstance {
    pub port: u16,
    pub status: InstanceStatus,
    pub url: String,
    pub product_type: ProductType,
}

#[async_trait]
pub trait Detector: Send + Sync {
    /// Instances currently answering, in port order.
    async fn discover(&self) -> Vec<DiscoveredInstance>;

    /// First port in range that nothing answers on, is bindable, and is not
    /// in `exclude`.
    async fn next_free_port(&self, exclude: &[u16]) -> Result<u16>;
}

/// Scans a port range with a [`PortProbe`].
pub struct PortScanDetector {
    probe: Arc<dyn PortProbe>,
    host: String,
    ports: RangeInclusive<u16>,
}

impl PortScanDetector {
    pub fn new(probe: Arc<dyn PortProbe>, host: impl Into<String>, ports: RangeInclusive<u16>) -> Self {
        Self {
            probe,
            host: host.into(),
            ports,
        }
    }

    async fn is_bindable(&self, port: u16) -> bool {
        tokio::net::TcpListener::bind((self.host.as_str(), port))
            .await
            .is_ok()
    }
}

#[async_trait]
impl Detector for PortScanDetector {
    async fn discover(&self) -> Vec<DiscoveredInstance> {
        let found: Vec<DiscoveredInstance> = futures::stream::iter(self.ports.clone())
            .map(|port| async move {
                self.probe
                    .identify(port)
                    .await
                    .map(|info| DiscoveredInstance {
                        port,
                        status: InstanceStatus::Running,
                        url: format!("http://{}:{}", self.host, port),
                        product_type: info.product_type,
                    })
            })
            .buffered(SCAN_CONCURRENCY)
            .filter_map(|found| async move { found })
            .collect()
            .await;

        tracing::debug!(
            "Discovery on {:?} found ports {:?}",
            self.ports,
            found.iter().map(|i| i.port).collect::<Vec<_>>()
        );
        found
    }

    async fn next_free_port(&self, exclude: &[u16]) -> Result<u16> {
        for port in self.ports.clone() {
            if exclude.contains(&port) {
                continue;
            }
            if self.probe.is_reachable(port).await {
                continue;
            }
            if self.is_bindable(port).await {
                return Ok(port);
            }
        }
        Err(FleetError::Process(format!(
            "No free debug port in {}-{}",
            self.ports.start(),
            self.ports.end()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::probe::ProductInfo;

    struct ListedProbe(Vec<u16>);

    #[async_trait]
    impl PortProbe for ListedProbe {
        async fn is_reachable(&self, port: u16) -> bool {
            self.0.contains(&port)
        }

        async fn identify(&self, port: u16) -> Option<ProductInfo> {
            self.0.contains(&port).then(|| ProductInfo {
                browser: "Chrome/128".to_string(),
                user_agent: "Cursor/0.45 Chrome/128".to_string(),
                product_type: ProductType::Cursor,
            })
        }
    }

    fn free_range(len: u16) -> RangeInclusive<u16> {
        // Find a run of bindable ports to keep the test hermetic.
        'outer: for start in (40_000u16..60_000).step_by(97) {
            for port in start..start + len {
                if std::net::TcpListener::bind(("127.0.0.1", port)).is_err() {
                    continue 'outer;
                }
            }
            return start..=start + len - 1;
        }
        panic!("no free port range");
    }

    #[tokio::test]
    async fn test_discover_reports_answering_ports_in_order() {
        let range = free_range(6);
        let first = *range.start();
        let probe = Arc::new(ListedProbe(vec![first + 4, first + 1]));
        let detector = PortScanDetector::new(probe, "127.0.0.1", range);

        let found = detector.discover().await;
        let ports: Vec<u16> = found.iter().map(|i| i.port).collect();
        assert_eq!(ports, vec![first + 1, first + 4]);
        assert!(found.iter().all(|i| i.status == InstanceStatus::Running));
        assert_eq!(found[0].url, format!("http://127.0.0.1:{}", first + 1));
    }

    #[tokio::test]
    async fn test_next_free_port_skips_reachable_and_excluded() {
        let range = free_range(4);
        let first = *range.start();
        let probe = Arc::new(ListedProbe(vec![first]));
        let detector = PortScanDetector::new(probe, "127.0.0.1", range);

        let port = detector.next_free_port(&[first + 1]).await.unwrap();
        assert_eq!(port, first + 2);
    }

    #[tokio::test]
    async fn test_next_free_port_exhausted() {
        let range = free_range(2);
        let first = *range.start();
        let probe = Arc::new(ListedProbe(vec![first, first + 1]));
        let detector = PortScanDetector::new(probe, "127.0.0.1", range);

        assert!(detector.next_free_port(&[]).await.is_err());
    }
}
