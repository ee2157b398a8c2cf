// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Real UDP sockets for discovery.
//!
//! Sockets are built with `socket2` so that broadcast, address reuse and the
//! multicast options can be set before binding, then handed to tokio.

use super::{Datagram, DatagramSocket, SocketError, SocketFactory, MAX_DATAGRAM_SIZE};
use crate::config::DiscoveryConfig;
use parking_lot::Mutex;
use socket2::{Domain, Protocol, Socket, Type};
use std::future::Future;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Socket options applied by [`UdpSocketFactory`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UdpSocketOptions {
    /// Set SO_REUSEADDR on listeners so several processes can share the port.
    pub reuse_address: bool,
    /// Multicast TTL for announcements (1 = stay on the local link).
    pub multicast_ttl: u32,
    /// Deliver our own multicast announcements to local listeners.
    pub multicast_loop: bool,
    /// Interface used for multicast membership and multicast sends.
    pub interface: Ipv4Addr,
}

impl Default for UdpSocketOptions {
    fn default() -> Self {
        Self {
            reuse_address: true,
            multicast_ttl: 1,
            multicast_loop: true,
            interface: Ipv4Addr::UNSPECIFIED,
        }
    }
}

/// Factory for [`UdpDatagramSocket`]s.
///
/// Must be used from within a tokio runtime.
#[derive(Debug, Clone, Default)]
pub struct UdpSocketFactory {
    options: UdpSocketOptions,
}

impl UdpSocketFactory {
    /// Create a factory with default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a factory with explicit options.
    pub fn with_options(options: UdpSocketOptions) -> Self {
        Self { options }
    }

    /// Create a factory from the socket related part of a discovery config.
    pub fn from_config(config: &DiscoveryConfig) -> Self {
        Self::with_options(UdpSocketOptions {
            reuse_address: config.reuse_address,
            multicast_ttl: config.multicast_ttl,
            multicast_loop: config.multicast_loop,
            interface: config.interface,
        })
    }

    /// Options applied to new sockets.
    pub fn options(&self) -> &UdpSocketOptions {
        &self.options
    }
}

fn new_ipv4_socket() -> std::io::Result<Socket> {
    Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))
}

impl SocketFactory for UdpSocketFactory {
    type Socket = UdpDatagramSocket;

    fn create_sender(&self) -> Result<UdpDatagramSocket, SocketError> {
        let socket = new_ipv4_socket()?;
        socket.set_broadcast(true)?;
        socket.set_multicast_ttl_v4(self.options.multicast_ttl)?;
        socket.set_multicast_loop_v4(self.options.multicast_loop)?;
        if !self.options.interface.is_unspecified() {
            socket.set_multicast_if_v4(&self.options.interface)?;
        }

        let bind_addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0);
        socket
            .bind(&bind_addr.into())
            .map_err(|e| SocketError::Bind(format!("{}: {}", bind_addr, e)))?;

        let sender = UdpDatagramSocket::from_socket2(socket, self.options.interface)?;
        debug!("[UDP] sender socket bound to {}", sender.local_addr());
        Ok(sender)
    }

    fn create_listener(&self, port: u16) -> Result<UdpDatagramSocket, SocketError> {
        let socket = new_ipv4_socket()?;
        if self.options.reuse_address {
            socket.set_reuse_address(true)?;
        }

        let bind_addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port);
        socket
            .bind(&bind_addr.into())
            .map_err(|e| SocketError::Bind(format!("{}: {}", bind_addr, e)))?;

        let listener = UdpDatagramSocket::from_socket2(socket, self.options.interface)?;
        debug!("[UDP] listener socket bound to {}", listener.local_addr());
        Ok(listener)
    }
}

/// A tokio UDP socket that can be closed from any thread.
pub struct UdpDatagramSocket {
    socket: Mutex<Option<Arc<UdpSocket>>>,
    closed: CancellationToken,
    local_addr: SocketAddr,
    interface: Ipv4Addr,
}

impl UdpDatagramSocket {
    fn from_socket2(socket: Socket, interface: Ipv4Addr) -> Result<Self, SocketError> {
        socket.set_nonblocking(true)?;
        let std_socket: std::net::UdpSocket = socket.into();
        let socket = UdpSocket::from_std(std_socket)?;
        let local_addr = socket.local_addr()?;

        Ok(Self {
            socket: Mutex::new(Some(Arc::new(socket))),
            closed: CancellationToken::new(),
            local_addr,
            interface,
        })
    }

    /// Local address the socket is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Check if the socket has been closed.
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    fn handle(&self) -> Result<Arc<UdpSocket>, SocketError> {
        if self.closed.is_cancelled() {
            return Err(SocketError::Closed);
        }
        self.socket.lock().clone().ok_or(SocketError::Closed)
    }
}

impl DatagramSocket for UdpDatagramSocket {
    fn send_to(
        &self,
        payload: &[u8],
        target: SocketAddr,
    ) -> impl Future<Output = Result<usize, SocketError>> + Send {
        async move {
            let socket = self.handle()?;
            Ok(socket.send_to(payload, target).await?)
        }
    }

    fn recv_from(&self) -> impl Future<Output = Result<Datagram, SocketError>> + Send {
        async move {
            let socket = self.handle()?;
            let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];

            let received = tokio::select! {
                biased;
                _ = self.closed.cancelled() => return Err(SocketError::Closed),
                result = socket.recv_from(&mut buf) => result,
            };

            let (len, source) = received?;
            buf.truncate(len);
            Ok(Datagram {
                payload: buf,
                source,
            })
        }
    }

    fn join_multicast(&self, group: Ipv4Addr) -> Result<(), SocketError> {
        self.handle()?
            .join_multicast_v4(group, self.interface)
            .map_err(|e| SocketError::Membership(format!("join {}: {}", group, e)))
    }

    fn leave_multicast(&self, group: Ipv4Addr) -> Result<(), SocketError> {
        self.handle()?
            .leave_multicast_v4(group, self.interface)
            .map_err(|e| SocketError::Membership(format!("leave {}: {}", group, e)))
    }

    fn close(&self) -> Result<(), SocketError> {
        self.closed.cancel();
        // Pending receives hold their own handle until they observe the token.
        self.socket.lock().take();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn loopback(port: u16) -> SocketAddr {
        SocketAddr::from((Ipv4Addr::LOCALHOST, port))
    }

    #[tokio::test]
    async fn test_listener_receives_from_sender() {
        let factory = UdpSocketFactory::new();
        let listener = factory.create_listener(0).unwrap();
        let sender = factory.create_sender().unwrap();

        let port = listener.local_addr().port();
        let sent = sender.send_to(b"hello", loopback(port)).await.unwrap();
        assert_eq!(sent, 5);

        let datagram = tokio::time::timeout(Duration::from_secs(2), listener.recv_from())
            .await
            .expect("receive timed out")
            .unwrap();
        assert_eq!(datagram.payload, b"hello");
        assert_eq!(datagram.source.port(), sender.local_addr().port());
    }

    #[tokio::test]
    async fn test_close_unblocks_pending_receive() {
        let factory = UdpSocketFactory::new();
        let listener = Arc::new(factory.create_listener(0).unwrap());

        let pending = {
            let listener = listener.clone();
            tokio::spawn(async move { listener.recv_from().await })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        listener.close().unwrap();

        let result = tokio::time::timeout(Duration::from_secs(2), pending)
            .await
            .expect("receive was not unblocked")
            .unwrap();
        assert_eq!(result, Err(SocketError::Closed));
        assert!(listener.is_closed());
    }

    #[tokio::test]
    async fn test_operations_after_close() {
        let factory = UdpSocketFactory::new();
        let socket = factory.create_sender().unwrap();
        socket.close().unwrap();
        socket.close().unwrap();

        assert_eq!(socket.recv_from().await, Err(SocketError::Closed));
        assert_eq!(
            socket.send_to(b"x", loopback(9)).await,
            Err(SocketError::Closed)
        );
        assert_eq!(
            socket.join_multicast(Ipv4Addr::new(239, 0, 0, 1)),
            Err(SocketError::Closed)
        );
    }

    #[tokio::test]
    async fn test_bind_conflict_is_reported() {
        let occupied = std::net::UdpSocket::bind("0.0.0.0:0").unwrap();
        let port = occupied.local_addr().unwrap().port();

        let factory = UdpSocketFactory::with_options(UdpSocketOptions {
            reuse_address: false,
            ..Default::default()
        });

        match factory.create_listener(port) {
            Err(SocketError::Bind(msg)) => assert!(msg.contains(&port.to_string())),
            Err(other) => panic!("unexpected error: {}", other),
            Ok(_) => panic!("bind should fail on an occupied port"),
        }
    }

    #[test]
    fn test_factory_from_config() {
        let config = DiscoveryConfig {
            reuse_address: false,
            multicast_ttl: 4,
            ..Default::default()
        };
        let factory = UdpSocketFactory::from_config(&config);
        assert!(!factory.options().reuse_address);
        assert_eq!(factory.options().multicast_ttl, 4);
        assert!(factory.options().multicast_loop);
    }
}
