// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Datagram socket abstraction.
//!
//! The discovery engine never touches the network directly. It asks a
//! [`SocketFactory`] for two kinds of handles:
//!
//! - a **sender**, owned by one announce loop for its whole lifetime
//! - a **listener**, bound to the discovery port, owned by the engine between
//!   `start_listening` and `stop_listening`
//!
//! Both are [`DatagramSocket`]s. Closing a socket makes any pending
//! [`DatagramSocket::recv_from`] fail with [`SocketError::Closed`], which is how
//! a blocked listen loop is released on shutdown.
//!
//! ```text
//! SocketFactory
//! +-- UdpSocketFactory     (socket2 + tokio, real network)
//! +-- MemorySocketFactory  (in-process network for tests)
//! ```

use std::future::Future;
use std::net::{Ipv4Addr, SocketAddr};

pub mod memory;
pub mod udp;

pub use udp::{UdpDatagramSocket, UdpSocketFactory, UdpSocketOptions};

/// Largest UDP payload over IPv4.
pub const MAX_DATAGRAM_SIZE: usize = 65_507;

/// A received datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Datagram {
    /// Raw payload bytes.
    pub payload: Vec<u8>,
    /// Endpoint the datagram came from.
    pub source: SocketAddr,
}

/// Minimal capability set of a UDP socket as used by discovery.
///
/// Dropping the socket releases it.
pub trait DatagramSocket: Send + Sync + 'static {
    /// Send `payload` to `target`, returning the number of bytes sent.
    fn send_to(
        &self,
        payload: &[u8],
        target: SocketAddr,
    ) -> impl Future<Output = Result<usize, SocketError>> + Send;

    /// Wait for the next datagram.
    ///
    /// Fails with [`SocketError::Closed`] once [`close`](Self::close) has been
    /// called, including when the call was already pending.
    fn recv_from(&self) -> impl Future<Output = Result<Datagram, SocketError>> + Send;

    /// Join an IPv4 multicast group.
    fn join_multicast(&self, group: Ipv4Addr) -> Result<(), SocketError>;

    /// Leave an IPv4 multicast group.
    fn leave_multicast(&self, group: Ipv4Addr) -> Result<(), SocketError>;

    /// Close the socket. Subsequent operations fail with [`SocketError::Closed`].
    fn close(&self) -> Result<(), SocketError>;
}

/// Creates the sockets used by a discovery engine.
pub trait SocketFactory: Send + Sync + 'static {
    /// Concrete socket type produced by this factory.
    type Socket: DatagramSocket;

    /// Create an unbound socket suitable for sending announcements.
    fn create_sender(&self) -> Result<Self::Socket, SocketError>;

    /// Create a socket bound to `port` for receiving announcements.
    ///
    /// A port that cannot be bound is reported as [`SocketError::Bind`].
    fn create_listener(&self, port: u16) -> Result<Self::Socket, SocketError>;
}

/// Socket error types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketError {
    /// The socket was closed locally.
    Closed,
    /// Binding the socket failed.
    Bind(String),
    /// Joining or leaving a multicast group failed.
    Membership(String),
    /// Any other I/O failure.
    Io(String),
}

impl SocketError {
    /// True when the error signals a deliberate local close.
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }
}

impl std::fmt::Display for SocketError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "Socket closed"),
            Self::Bind(s) => write!(f, "Bind error: {}", s),
            Self::Membership(s) => write!(f, "Multicast membership error: {}", s),
            Self::Io(s) => write!(f, "I/O error: {}", s),
        }
    }
}

impl std::error::Error for SocketError {}

impl From<std::io::Error> for SocketError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}
