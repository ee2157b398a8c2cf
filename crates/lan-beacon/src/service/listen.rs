// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Listen loop and ownership of the listener socket.

use super::state::LoopControl;
use super::DiscoveredHost;
use crate::socket::{DatagramSocket, SocketError};
use parking_lot::Mutex;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Pause after a failed receive before trying again.
const RECEIVE_ERROR_BACKOFF: Duration = Duration::from_millis(50);

/// The listener socket, shared by the service and its listen loop.
pub(super) struct ListenerSlot<S: DatagramSocket> {
    socket: Mutex<Option<Arc<S>>>,
    group: Option<Ipv4Addr>,
}

impl<S: DatagramSocket> ListenerSlot<S> {
    pub(super) fn new(group: Option<Ipv4Addr>) -> Self {
        Self {
            socket: Mutex::new(None),
            group,
        }
    }

    pub(super) fn store(&self, socket: Arc<S>) {
        *self.socket.lock() = Some(socket);
    }

    #[cfg(test)]
    pub(super) fn is_occupied(&self) -> bool {
        self.socket.lock().is_some()
    }

    /// Leave the group, close and release the stored socket, if any.
    pub(super) fn release(&self) {
        let socket = self.socket.lock().take();
        if let Some(socket) = socket {
            self.teardown(&socket);
        }
    }

    /// Like [`release`](Self::release), but only if the stored socket is `socket`.
    fn release_if(&self, socket: &Arc<S>) {
        let owned = {
            let mut slot = self.socket.lock();
            match slot.as_ref() {
                Some(current) if Arc::ptr_eq(current, socket) => slot.take(),
                _ => None,
            }
        };
        if let Some(socket) = owned {
            self.teardown(&socket);
        }
    }

    // Each step runs even if the previous one failed.
    fn teardown(&self, socket: &S) {
        if let Some(group) = self.group {
            match socket.leave_multicast(group) {
                Ok(()) => debug!("[discovery] left multicast group {}", group),
                Err(e) => warn!("[discovery] error leaving multicast group {}: {}", group, e),
            }
        }
        match socket.close() {
            Ok(()) => debug!("[discovery] closed listener socket"),
            Err(e) => warn!("[discovery] error closing listener socket: {}", e),
        }
    }
}

/// One run of the listen loop.
pub(super) struct Listener<S: DatagramSocket> {
    pub(super) socket: Arc<S>,
    pub(super) slot: Arc<ListenerSlot<S>>,
    pub(super) events: broadcast::Sender<DiscoveredHost>,
    pub(super) cancel: CancellationToken,
    pub(super) control: Arc<LoopControl>,
    pub(super) generation: u64,
}

impl<S: DatagramSocket> Listener<S> {
    /// Publish every received announcement until cancelled or closed.
    pub(super) async fn run(self) {
        let Self {
            socket,
            slot,
            events,
            cancel,
            control,
            generation,
        } = self;

        loop {
            let received = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                result = socket.recv_from() => result,
            };

            match received {
                Ok(datagram) => {
                    let address = String::from_utf8_lossy(&datagram.payload).into_owned();
                    debug!(
                        "[discovery] host {} announced from {}",
                        address, datagram.source
                    );
                    // Err only means nobody is subscribed right now.
                    let _ = events.send(DiscoveredHost {
                        address,
                        source: datagram.source,
                    });
                }
                Err(SocketError::Closed) => {
                    debug!("[discovery] listener socket closed");
                    break;
                }
                Err(e) => {
                    warn!("[discovery] error receiving announcement: {}", e);
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(RECEIVE_ERROR_BACKOFF) => {}
                    }
                }
            }
        }

        control.finish(generation, || slot.release_if(&socket));
        drop(socket);
        debug!("[discovery] stopped listening");
    }
}
