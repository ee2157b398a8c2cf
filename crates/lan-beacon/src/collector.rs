// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! One-shot peer collection.
//!
//! Listen for a fixed time and return every distinct announced address in
//! the order it was first seen.

use crate::config::DiscoveryConfig;
use crate::error::DiscoveryError;
use crate::service::DiscoveryService;
use crate::socket::SocketFactory;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};

/// Collect peer addresses announced on `service` during `timeout`.
///
/// Starts the listen loop if needed and stops it before returning. An empty
/// list is a valid result.
pub async fn collect_peers<F: SocketFactory>(
    service: &DiscoveryService<F>,
    timeout: Duration,
) -> Result<Vec<String>, DiscoveryError> {
    let mut events = service.subscribe();
    service.start_listening()?;

    let mut peers: Vec<String> = Vec::new();
    let deadline = tokio::time::sleep(timeout);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = &mut deadline => break,
            event = events.recv() => match event {
                Ok(host) => {
                    if !peers.contains(&host.address) {
                        debug!("[discovery] collected peer {}", host.address);
                        peers.push(host.address);
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!("[discovery] collector lagged, {} announcements skipped", skipped);
                }
                Err(RecvError::Closed) => break,
            },
        }
    }

    service.stop_listening();
    Ok(peers)
}

/// Collect peer addresses for `timeout` on a fresh UDP service built from
/// `config`.
pub async fn discover_hosts(
    config: &DiscoveryConfig,
    timeout: Duration,
) -> Result<Vec<String>, DiscoveryError> {
    let service = DiscoveryService::udp(config)?;
    let peers = collect_peers(&service, timeout).await;
    service.dispose();
    peers
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::socket::memory::MemoryNetwork;
    use std::net::{Ipv4Addr, SocketAddr};

    const PORT: u16 = 15001;

    fn source(last: u8) -> SocketAddr {
        SocketAddr::from((Ipv4Addr::new(10, 0, 0, last), 40000))
    }

    #[tokio::test]
    async fn test_collect_nothing() {
        let network = MemoryNetwork::new();
        let service = DiscoveryService::broadcast(network.factory(), PORT);

        let peers = collect_peers(&service, Duration::from_millis(200))
            .await
            .unwrap();

        assert!(peers.is_empty());
        assert!(!service.is_listening());
        assert_eq!(network.stats().closes, 1);
    }

    #[tokio::test]
    async fn test_collect_dedupes_in_arrival_order() {
        let network = MemoryNetwork::new();
        let service = DiscoveryService::broadcast(network.factory(), PORT);

        let feeder = {
            let network = network.clone();
            tokio::spawn(async move {
                while network.listener_count(PORT) == 0 {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
                for (payload, last) in [("b", 2), ("a", 1), ("b", 2), ("c", 3), ("a", 1)] {
                    network.deliver(PORT, payload.as_bytes(), source(last));
                }
            })
        };

        let peers = collect_peers(&service, Duration::from_millis(300))
            .await
            .unwrap();
        feeder.await.unwrap();

        assert_eq!(peers, vec!["b", "a", "c"]);
    }

    #[tokio::test]
    async fn test_collect_on_disposed_service() {
        let network = MemoryNetwork::new();
        let service = DiscoveryService::broadcast(network.factory(), PORT);
        service.dispose();

        let result = collect_peers(&service, Duration::from_millis(10)).await;
        assert_eq!(result, Err(DiscoveryError::Disposed));
    }

    #[tokio::test]
    async fn test_discover_hosts_rejects_invalid_config() {
        let config = DiscoveryConfig {
            announce_interval_ms: 0,
            ..Default::default()
        };
        let result = discover_hosts(&config, Duration::from_millis(10)).await;
        assert!(matches!(result, Err(DiscoveryError::Config(_))));
    }
}
