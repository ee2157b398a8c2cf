// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # lan-beacon
//!
//! Zero-configuration peer discovery on a local network.
//!
//! A process announces its address (for example a hub URL) by sending it as a
//! raw UDP datagram to the subnet broadcast address or a multicast group every
//! few seconds. Other processes listen on the same port and are notified of
//! every announcement they receive.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use lan_beacon::{DiscoveryConfig, DiscoveryService};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), lan_beacon::DiscoveryError> {
//! let config = DiscoveryConfig::default();
//!
//! // Hub side
//! let hub = DiscoveryService::udp(&config)?;
//! hub.broadcast_presence("http://10.0.0.5:5000/hub")?;
//!
//! // Client side
//! let peers = lan_beacon::discover_hosts(&config, Duration::from_secs(6)).await?;
//! println!("found {:?}", peers);
//! # Ok(())
//! # }
//! ```
//!
//! ## Wire format
//!
//! The whole datagram payload is the UTF-8 encoded address. No framing, no
//! version, no checksum. Announcements repeat every interval, so loss is
//! tolerated; duplicates are expected and consumers dedupe by address.
//!
//! ## Modules
//!
//! - [`service`]: announce and listen loops
//! - [`collector`]: collect distinct peers for a fixed time
//! - [`socket`]: datagram socket seam, real UDP and an in-memory network
//!   for tests ([`socket::memory`])
//! - [`config`]: JSON-loadable configuration

pub mod collector;
pub mod config;
pub mod error;
pub mod service;
pub mod socket;

pub use collector::{collect_peers, discover_hosts};
pub use config::{
    ConfigError, DiscoveryConfig, DiscoveryMode, DEFAULT_ANNOUNCE_INTERVAL,
    DEFAULT_DISCOVERY_PORT, DEFAULT_MULTICAST_GROUP, MAX_EVENT_CAPACITY,
};
pub use error::DiscoveryError;
pub use service::{Addressing, DiscoveredHost, DiscoveryService, LoopPhase, MAX_ADDRESS_LEN};
pub use socket::{DatagramSocket, SocketError, SocketFactory, UdpSocketFactory};
