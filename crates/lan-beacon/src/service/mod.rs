// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Discovery protocol engine.
//!
//! A [`DiscoveryService`] runs up to two independent background tasks:
//!
//! - the **announce loop** sends the peer address every interval to the
//!   broadcast address or the multicast group
//! - the **listen loop** receives announcements on the discovery port and
//!   publishes each one as a [`DiscoveredHost`] event
//!
//! ```text
//!  Process A                                    Process B
//!  broadcast_presence("http://10.0.0.5:5000/hub")
//!     |                                          start_listening()
//!     |  every 5s: UDP payload = address bytes      |
//!     +-------> 239.0.0.1:5001 / 255.255.255.255:5001 ---> recv_from()
//!                                                   |
//!                                                   v
//!                                          subscribe() -> DiscoveredHost
//! ```
//!
//! Starting an already running loop is a no-op. Stopping is safe at any
//! time. After [`dispose`](DiscoveryService::dispose), every start fails with
//! [`DiscoveryError::Disposed`].
//!
//! Failures to bind or join the group are logged and leave the service
//! without a listen loop; transient send/receive errors are logged and the
//! loops keep going.

mod announce;
mod listen;
mod state;

pub use state::LoopPhase;

use crate::config::{DiscoveryConfig, DiscoveryMode, DEFAULT_ANNOUNCE_INTERVAL};
use crate::error::DiscoveryError;
use crate::socket::{DatagramSocket, SocketError, SocketFactory, UdpSocketFactory};
use announce::Announcer;
use listen::{Listener, ListenerSlot};
use state::LoopControl;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tracing::{debug, info, trace, warn};

/// Largest peer address that fits in one IPv4 UDP datagram on Ethernet.
pub const MAX_ADDRESS_LEN: usize = 1472;

/// Default capacity of the discovered-host channel.
pub const DEFAULT_EVENT_CAPACITY: usize = 64;

/// A peer announcement received by the listen loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredHost {
    /// The announced peer address.
    pub address: String,
    /// Endpoint the announcement came from.
    pub source: SocketAddr,
}

/// Destination of announcements and group membership of listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Addressing {
    /// Limited broadcast, no group membership.
    Broadcast,
    /// Multicast group, joined by listeners.
    Multicast { group: Ipv4Addr },
}

impl Addressing {
    /// Build from a configured mode.
    pub fn from_mode(mode: DiscoveryMode, group: Ipv4Addr) -> Self {
        match mode {
            DiscoveryMode::Broadcast => Self::Broadcast,
            DiscoveryMode::Multicast => Self::Multicast { group },
        }
    }

    /// Mode of this addressing.
    pub fn mode(&self) -> DiscoveryMode {
        match self {
            Self::Broadcast => DiscoveryMode::Broadcast,
            Self::Multicast { .. } => DiscoveryMode::Multicast,
        }
    }

    /// Destination of announcements on `port`.
    pub fn destination(&self, port: u16) -> SocketAddr {
        match self {
            Self::Broadcast => SocketAddr::from((Ipv4Addr::BROADCAST, port)),
            Self::Multicast { group } => SocketAddr::from((*group, port)),
        }
    }

    /// Multicast group listeners must join, if any.
    pub fn group(&self) -> Option<Ipv4Addr> {
        match self {
            Self::Broadcast => None,
            Self::Multicast { group } => Some(*group),
        }
    }
}

/// Zero-configuration discovery over UDP broadcast or multicast.
pub struct DiscoveryService<F: SocketFactory> {
    factory: F,
    addressing: Addressing,
    port: u16,
    announce_interval: Duration,
    announcer: Arc<LoopControl>,
    announce_turn: Arc<tokio::sync::Mutex<()>>,
    listener: Arc<LoopControl>,
    listener_slot: Arc<ListenerSlot<F::Socket>>,
    events: broadcast::Sender<DiscoveredHost>,
    disposed: AtomicBool,
}

impl DiscoveryService<UdpSocketFactory> {
    /// Create a service on real UDP sockets from a configuration.
    pub fn udp(config: &DiscoveryConfig) -> Result<Self, DiscoveryError> {
        Self::from_config(UdpSocketFactory::from_config(config), config)
    }
}

impl<F: SocketFactory> DiscoveryService<F> {
    /// Create a service.
    pub fn new(factory: F, port: u16, addressing: Addressing) -> Self {
        Self::build(
            factory,
            port,
            addressing,
            DEFAULT_ANNOUNCE_INTERVAL,
            DEFAULT_EVENT_CAPACITY,
        )
    }

    /// Create a service announcing to the subnet broadcast address.
    pub fn broadcast(factory: F, port: u16) -> Self {
        Self::new(factory, port, Addressing::Broadcast)
    }

    /// Create a service announcing to a multicast group.
    pub fn multicast(factory: F, port: u16, group: Ipv4Addr) -> Self {
        Self::new(factory, port, Addressing::Multicast { group })
    }

    /// Create a service from a validated configuration.
    pub fn from_config(factory: F, config: &DiscoveryConfig) -> Result<Self, DiscoveryError> {
        config.validate()?;
        Ok(Self::build(
            factory,
            config.port,
            Addressing::from_mode(config.mode, config.multicast_group),
            config.announce_interval(),
            config.event_capacity,
        ))
    }

    fn build(
        factory: F,
        port: u16,
        addressing: Addressing,
        announce_interval: Duration,
        event_capacity: usize,
    ) -> Self {
        let (events, _) = broadcast::channel(event_capacity.max(1));
        Self {
            factory,
            addressing,
            port,
            announce_interval,
            announcer: Arc::new(LoopControl::new()),
            announce_turn: Arc::new(tokio::sync::Mutex::new(())),
            listener: Arc::new(LoopControl::new()),
            listener_slot: Arc::new(ListenerSlot::new(addressing.group())),
            events,
            disposed: AtomicBool::new(false),
        }
    }

    /// Override the interval between announcements (default: 5s).
    pub fn with_announce_interval(mut self, interval: Duration) -> Self {
        self.announce_interval = interval.max(Duration::from_millis(1));
        self
    }

    /// Register an observer of discovered hosts.
    ///
    /// Possible at any point of the lifecycle; dropping the receiver
    /// deregisters it. Each observer sees every announcement received while it
    /// is registered, unless it falls more than the channel capacity behind.
    pub fn subscribe(&self) -> broadcast::Receiver<DiscoveredHost> {
        self.events.subscribe()
    }

    /// Start announcing `address` periodically.
    ///
    /// No-op while an announce loop is already running, even for a different
    /// address. A failure to create the sender socket is logged.
    pub fn broadcast_presence(&self, address: &str) -> Result<(), DiscoveryError> {
        self.ensure_not_disposed()?;
        validate_address(address)?;
        let runtime = Handle::try_current().map_err(|_| DiscoveryError::NoRuntime)?;

        let Some(generation) = self.announcer.try_begin() else {
            trace!("[discovery] already announcing, ignoring start");
            return Ok(());
        };

        let sender = match self.factory.create_sender() {
            Ok(sender) => sender,
            Err(e) => {
                warn!("[discovery] failed to create sender socket: {}", e);
                self.announcer.abort(generation);
                return Ok(());
            }
        };

        let Some(cancel) = self.announcer.commit(generation) else {
            debug!("[discovery] announce stopped while starting");
            return Ok(());
        };

        if self.disposed.load(Ordering::SeqCst) {
            self.announcer.stop(|| {});
            return Err(DiscoveryError::Disposed);
        }

        let destination = self.destination();
        runtime.spawn(
            Announcer {
                sender,
                payload: address.as_bytes().to_vec(),
                destination,
                interval: self.announce_interval,
                cancel,
                control: self.announcer.clone(),
                generation,
                turn: self.announce_turn.clone(),
            }
            .run(),
        );

        info!(
            "[discovery] announcing {} to {} every {:?}",
            address, destination, self.announce_interval
        );
        Ok(())
    }

    /// Stop the announce loop after its current send.
    ///
    /// Returns immediately. A send in flight still completes, and an announce
    /// loop started meanwhile sends only once the stopped one has exited.
    pub fn stop_broadcasting(&self) {
        if self.announcer.stop(|| {}) {
            info!("[discovery] stopped announcing on port {}", self.port);
        }
    }

    /// Start listening for announcements.
    ///
    /// No-op while a listen loop is already running. If the listener cannot
    /// be bound, or the multicast group cannot be joined, the error is logged
    /// and no loop is started; calling again later retries.
    pub fn start_listening(&self) -> Result<(), DiscoveryError> {
        self.ensure_not_disposed()?;
        let runtime = Handle::try_current().map_err(|_| DiscoveryError::NoRuntime)?;

        let Some(generation) = self.listener.try_begin() else {
            trace!("[discovery] already listening, ignoring start");
            return Ok(());
        };

        let socket = match self.open_listener() {
            Ok(socket) => Arc::new(socket),
            Err(e) => {
                warn!(
                    "[discovery] failed to initialize listener on port {}: {}",
                    self.port, e
                );
                self.listener.abort(generation);
                return Ok(());
            }
        };

        self.listener_slot.store(socket.clone());
        let Some(cancel) = self.listener.commit(generation) else {
            debug!("[discovery] listen stopped while starting");
            self.listener_slot.release();
            return Ok(());
        };

        if self.disposed.load(Ordering::SeqCst) {
            self.stop_listening();
            return Err(DiscoveryError::Disposed);
        }

        runtime.spawn(
            Listener {
                socket,
                slot: self.listener_slot.clone(),
                events: self.events.clone(),
                cancel,
                control: self.listener.clone(),
                generation,
            }
            .run(),
        );

        info!(
            "[discovery] listening for {} announcements on port {}",
            self.addressing.mode(),
            self.port
        );
        Ok(())
    }

    fn open_listener(&self) -> Result<F::Socket, SocketError> {
        let socket = self.factory.create_listener(self.port)?;
        if let Some(group) = self.addressing.group() {
            socket.join_multicast(group)?;
            debug!(
                "[discovery] joined multicast group {} on port {}",
                group, self.port
            );
        }
        Ok(socket)
    }

    /// Stop the listen loop, leaving the group and closing the listener
    /// socket to release a pending receive.
    pub fn stop_listening(&self) {
        let slot = &self.listener_slot;
        if self.listener.stop(|| slot.release()) {
            info!("[discovery] stopped listening on port {}", self.port);
        }
    }

    /// Stop both loops.
    pub fn stop(&self) {
        self.stop_listening();
        self.stop_broadcasting();
    }

    /// Stop both loops and make the service permanently unusable.
    ///
    /// Idempotent. Also runs on drop.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.stop();
        debug!("[discovery] service on port {} disposed", self.port);
    }

    /// Check if an announce loop is running.
    pub fn is_broadcasting(&self) -> bool {
        self.announcer.phase() == LoopPhase::Running
    }

    /// Check if a listen loop is running.
    pub fn is_listening(&self) -> bool {
        self.listener.phase() == LoopPhase::Running
    }

    /// Check if the service was disposed.
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    /// Lifecycle phase of the announce loop.
    pub fn announce_phase(&self) -> LoopPhase {
        self.announcer.phase()
    }

    /// Lifecycle phase of the listen loop.
    pub fn listen_phase(&self) -> LoopPhase {
        self.listener.phase()
    }

    /// Discovery port.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Addressing variant.
    pub fn addressing(&self) -> Addressing {
        self.addressing
    }

    /// Broadcast or multicast.
    pub fn mode(&self) -> DiscoveryMode {
        self.addressing.mode()
    }

    /// Where announcements are sent.
    pub fn destination(&self) -> SocketAddr {
        self.addressing.destination(self.port)
    }

    /// Interval between announcements.
    pub fn announce_interval(&self) -> Duration {
        self.announce_interval
    }

    fn ensure_not_disposed(&self) -> Result<(), DiscoveryError> {
        if self.disposed.load(Ordering::SeqCst) {
            Err(DiscoveryError::Disposed)
        } else {
            Ok(())
        }
    }
}

impl<F: SocketFactory> Drop for DiscoveryService<F> {
    fn drop(&mut self) {
        self.dispose();
    }
}

fn validate_address(address: &str) -> Result<(), DiscoveryError> {
    if address.is_empty() {
        return Err(DiscoveryError::InvalidAddress("address is empty".into()));
    }
    if address.len() > MAX_ADDRESS_LEN {
        return Err(DiscoveryError::InvalidAddress(format!(
            "{} bytes exceeds the {} byte datagram limit",
            address.len(),
            MAX_ADDRESS_LEN
        )));
    }
    Ok(())
}
