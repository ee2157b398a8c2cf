// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Announce loop.

use super::state::LoopControl;
use crate::socket::DatagramSocket;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

/// One run of the announce loop. Owns its sender socket.
pub(super) struct Announcer<S: DatagramSocket> {
    pub(super) sender: S,
    pub(super) payload: Vec<u8>,
    pub(super) destination: SocketAddr,
    pub(super) interval: Duration,
    pub(super) cancel: CancellationToken,
    pub(super) control: Arc<LoopControl>,
    pub(super) generation: u64,
    /// Held for the whole run. At most one run of an engine sends at a time.
    pub(super) turn: Arc<Mutex<()>>,
}

impl<S: DatagramSocket> Announcer<S> {
    /// Send the payload every `interval` until cancelled.
    ///
    /// A send in flight is never interrupted; cancellation is observed
    /// between sends. Send errors are logged and the loop keeps going.
    /// A run started right after a stop waits for the previous run to exit
    /// before its first send.
    pub(super) async fn run(self) {
        let Self {
            sender,
            payload,
            destination,
            interval,
            cancel,
            control,
            generation,
            turn,
        } = self;

        let guard = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            guard = turn.lock() => Some(guard),
        };

        if guard.is_some() {
            while !cancel.is_cancelled() {
                match sender.send_to(&payload, destination).await {
                    Ok(sent) => trace!("[discovery] announced {} bytes to {}", sent, destination),
                    Err(e) => warn!("[discovery] error announcing presence to {}: {}", destination, e),
                }

                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                }
            }
        }

        drop(sender);
        control.finish(generation, || {});
        drop(guard);
        debug!("[discovery] stopped announcing to {}", destination);
    }
}
