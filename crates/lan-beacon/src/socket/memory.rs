// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! In-process datagram network.
//!
//! [`MemoryNetwork`] stands in for the LAN in tests: sockets created by its
//! [`MemorySocketFactory`] exchange datagrams through tokio channels, every
//! socket operation is counted in [`MemoryStats`], and individual operations
//! can be made to fail.
//!
//! Routing follows UDP semantics closely enough for discovery:
//!
//! | Destination | Delivered to |
//! |-------------|--------------|
//! | multicast group | open listeners on the port that joined the group |
//! | anything else   | open listeners on the port |
//!
//! # Example
//!
//! ```rust,ignore
//! let network = MemoryNetwork::new();
//! let service = DiscoveryService::multicast(network.factory(), 15001, group);
//! service.start_listening()?;
//! network.deliver(15001, b"http://10.0.0.5:5000/hub", source);
//! ```

use super::{Datagram, DatagramSocket, SocketError, SocketFactory};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::future::Future;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// First port handed out to sockets that do not bind an explicit one.
const EPHEMERAL_PORT_BASE: u16 = 49152;

type Inbound = Result<Datagram, SocketError>;

/// Counters for every operation performed on sockets of a [`MemoryNetwork`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryStats {
    /// Sender sockets created.
    pub senders_created: usize,
    /// Listener sockets created.
    pub listeners_created: usize,
    /// Successful sends, in order: payload and destination.
    pub sent: Vec<(Vec<u8>, SocketAddr)>,
    /// Send attempts that failed.
    pub send_failures: usize,
    /// Highest number of sends in flight at the same time.
    pub max_concurrent_sends: usize,
    /// `recv_from` calls issued.
    pub receives_issued: usize,
    /// Multicast joins.
    pub joins: usize,
    /// Multicast leaves.
    pub leaves: usize,
    /// `close` calls.
    pub closes: usize,
    /// Sender sockets dropped.
    pub sender_releases: usize,
    /// Listener sockets dropped.
    pub listener_releases: usize,
}

impl MemoryStats {
    /// Number of successful sends to `target`.
    pub fn sends_to(&self, target: SocketAddr) -> usize {
        self.sent.iter().filter(|(_, to)| *to == target).count()
    }
}

#[derive(Debug, Default)]
struct Faults {
    binds: bool,
    senders: bool,
    joins: bool,
    leaves: bool,
    pending_send_failures: usize,
    send_delay: Duration,
}

#[derive(Default)]
struct NetworkState {
    next_port: u16,
    endpoints: Vec<Weak<Endpoint>>,
    faults: Faults,
    stats: MemoryStats,
    sends_in_flight: usize,
}

impl NetworkState {
    fn allocate_port(&mut self) -> u16 {
        let port = EPHEMERAL_PORT_BASE.wrapping_add(self.next_port);
        self.next_port = self.next_port.wrapping_add(1);
        port
    }

    fn open_listeners(&mut self, port: u16) -> Vec<Arc<Endpoint>> {
        self.endpoints.retain(|e| e.strong_count() > 0);
        self.endpoints
            .iter()
            .filter_map(Weak::upgrade)
            .filter(|e| e.listener && e.local_addr.port() == port && !e.closed.is_cancelled())
            .collect()
    }
}

struct Endpoint {
    local_addr: SocketAddr,
    listener: bool,
    groups: Mutex<HashSet<Ipv4Addr>>,
    closed: CancellationToken,
    tx: mpsc::UnboundedSender<Inbound>,
}

impl Endpoint {
    fn accepts(&self, target: SocketAddr) -> bool {
        match target {
            SocketAddr::V4(v4) if v4.ip().is_multicast() => self.groups.lock().contains(v4.ip()),
            _ => true,
        }
    }
}

/// Shared in-process network.
///
/// Cloning yields another handle to the same network.
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    state: Arc<Mutex<NetworkState>>,
}

impl MemoryNetwork {
    /// Create an empty network.
    pub fn new() -> Self {
        Self::default()
    }

    /// Socket factory attached to this network.
    pub fn factory(&self) -> MemorySocketFactory {
        MemorySocketFactory {
            network: self.clone(),
        }
    }

    /// Snapshot of the operation counters.
    pub fn stats(&self) -> MemoryStats {
        self.state.lock().stats.clone()
    }

    /// Make `create_listener` fail with [`SocketError::Bind`].
    pub fn fail_binds(&self, fail: bool) {
        self.state.lock().faults.binds = fail;
    }

    /// Make `create_sender` fail.
    pub fn fail_sender_creation(&self, fail: bool) {
        self.state.lock().faults.senders = fail;
    }

    /// Make `join_multicast` fail.
    pub fn fail_joins(&self, fail: bool) {
        self.state.lock().faults.joins = fail;
    }

    /// Make `leave_multicast` fail.
    pub fn fail_leaves(&self, fail: bool) {
        self.state.lock().faults.leaves = fail;
    }

    /// Make the next `count` sends fail with an I/O error.
    pub fn fail_next_sends(&self, count: usize) {
        self.state.lock().faults.pending_send_failures = count;
    }

    /// Make every send take `delay` before the datagram goes out.
    pub fn delay_sends(&self, delay: Duration) {
        self.state.lock().faults.send_delay = delay;
    }

    /// Number of open listeners bound to `port`.
    pub fn listener_count(&self, port: u16) -> usize {
        self.state.lock().open_listeners(port).len()
    }

    /// Deliver a datagram to every open listener on `port`, regardless of
    /// group membership. Returns the number of listeners reached.
    pub fn deliver(&self, port: u16, payload: &[u8], source: SocketAddr) -> usize {
        let listeners = self.state.lock().open_listeners(port);
        listeners
            .iter()
            .filter(|e| {
                e.tx.send(Ok(Datagram {
                    payload: payload.to_vec(),
                    source,
                }))
                .is_ok()
            })
            .count()
    }

    /// Make the next pending receive of every listener on `port` fail with
    /// `error`. Returns the number of listeners reached.
    pub fn inject_receive_error(&self, port: u16, error: SocketError) -> usize {
        let listeners = self.state.lock().open_listeners(port);
        listeners
            .iter()
            .filter(|e| e.tx.send(Err(error.clone())).is_ok())
            .count()
    }

    fn record(&self, f: impl FnOnce(&mut MemoryStats)) {
        f(&mut self.state.lock().stats);
    }

    fn open(&self, port: Option<u16>) -> Result<MemorySocket, SocketError> {
        let mut state = self.state.lock();
        let listener = port.is_some();

        if listener && state.faults.binds {
            return Err(SocketError::Bind(format!(
                "port {}: address already in use",
                port.unwrap_or_default()
            )));
        }
        if !listener && state.faults.senders {
            return Err(SocketError::Io("no buffer space available".into()));
        }

        let port = match port {
            Some(0) | None => state.allocate_port(),
            Some(p) => p,
        };
        let (tx, rx) = mpsc::unbounded_channel();
        let endpoint = Arc::new(Endpoint {
            local_addr: SocketAddr::from((Ipv4Addr::LOCALHOST, port)),
            listener,
            groups: Mutex::new(HashSet::new()),
            closed: CancellationToken::new(),
            tx,
        });
        state.endpoints.push(Arc::downgrade(&endpoint));

        if listener {
            state.stats.listeners_created += 1;
        } else {
            state.stats.senders_created += 1;
        }

        Ok(MemorySocket {
            endpoint,
            inbox: tokio::sync::Mutex::new(rx),
            network: self.clone(),
        })
    }
}

/// [`SocketFactory`] backed by a [`MemoryNetwork`].
#[derive(Clone)]
pub struct MemorySocketFactory {
    network: MemoryNetwork,
}

impl MemorySocketFactory {
    /// The network this factory creates sockets on.
    pub fn network(&self) -> &MemoryNetwork {
        &self.network
    }
}

impl SocketFactory for MemorySocketFactory {
    type Socket = MemorySocket;

    fn create_sender(&self) -> Result<MemorySocket, SocketError> {
        self.network.open(None)
    }

    fn create_listener(&self, port: u16) -> Result<MemorySocket, SocketError> {
        self.network.open(Some(port))
    }
}

/// Socket on a [`MemoryNetwork`].
pub struct MemorySocket {
    endpoint: Arc<Endpoint>,
    inbox: tokio::sync::Mutex<mpsc::UnboundedReceiver<Inbound>>,
    network: MemoryNetwork,
}

impl MemorySocket {
    /// Address assigned to this socket.
    pub fn local_addr(&self) -> SocketAddr {
        self.endpoint.local_addr
    }

    fn check_open(&self) -> Result<(), SocketError> {
        if self.endpoint.closed.is_cancelled() {
            Err(SocketError::Closed)
        } else {
            Ok(())
        }
    }
}

impl DatagramSocket for MemorySocket {
    fn send_to(
        &self,
        payload: &[u8],
        target: SocketAddr,
    ) -> impl Future<Output = Result<usize, SocketError>> + Send {
        async move {
            self.check_open()?;

            let delay = {
                let mut state = self.network.state.lock();
                state.sends_in_flight += 1;
                state.stats.max_concurrent_sends =
                    state.stats.max_concurrent_sends.max(state.sends_in_flight);
                state.faults.send_delay
            };
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            self.network.state.lock().sends_in_flight -= 1;

            let receivers = {
                let mut state = self.network.state.lock();
                if state.faults.pending_send_failures > 0 {
                    state.faults.pending_send_failures -= 1;
                    state.stats.send_failures += 1;
                    return Err(SocketError::Io("network is unreachable".into()));
                }
                state.stats.sent.push((payload.to_vec(), target));
                state.open_listeners(target.port())
            };

            for endpoint in receivers.iter().filter(|e| e.accepts(target)) {
                let _ = endpoint.tx.send(Ok(Datagram {
                    payload: payload.to_vec(),
                    source: self.endpoint.local_addr,
                }));
            }
            Ok(payload.len())
        }
    }

    fn recv_from(&self) -> impl Future<Output = Result<Datagram, SocketError>> + Send {
        async move {
            self.network.record(|s| s.receives_issued += 1);
            self.check_open()?;

            let mut inbox = self.inbox.lock().await;
            tokio::select! {
                biased;
                _ = self.endpoint.closed.cancelled() => Err(SocketError::Closed),
                item = inbox.recv() => item.unwrap_or(Err(SocketError::Closed)),
            }
        }
    }

    fn join_multicast(&self, group: Ipv4Addr) -> Result<(), SocketError> {
        self.check_open()?;
        let mut state = self.network.state.lock();
        state.stats.joins += 1;
        if state.faults.joins {
            return Err(SocketError::Membership(format!(
                "join {}: no such device",
                group
            )));
        }
        self.endpoint.groups.lock().insert(group);
        Ok(())
    }

    fn leave_multicast(&self, group: Ipv4Addr) -> Result<(), SocketError> {
        self.check_open()?;
        let mut state = self.network.state.lock();
        state.stats.leaves += 1;
        if state.faults.leaves {
            return Err(SocketError::Membership(format!(
                "leave {}: address not available",
                group
            )));
        }
        self.endpoint.groups.lock().remove(&group);
        Ok(())
    }

    fn close(&self) -> Result<(), SocketError> {
        self.network.record(|s| s.closes += 1);
        self.endpoint.closed.cancel();
        Ok(())
    }
}

impl Drop for MemorySocket {
    fn drop(&mut self) {
        let listener = self.endpoint.listener;
        self.network.record(|s| {
            if listener {
                s.listener_releases += 1;
            } else {
                s.sender_releases += 1;
            }
        });
    }
}
