// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Lifecycle state machine for one background loop.
//!
//! ```text
//!           try_begin             commit
//!   Idle -------------> Starting ----------> Running
//!    ^                     |                    |
//!    |    abort / stop     |    stop / finish   |
//!    +---------------------+                    v
//!    +--------------------------------------- Stopping
//! ```
//!
//! Phase and generation are packed into one `AtomicU64` so every transition
//! is a single compare-and-swap. Each start gets a new generation; a loop
//! that exits late can only reset the state it was started with.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio_util::sync::CancellationToken;

const PHASE_BITS: u32 = 2;
const PHASE_MASK: u64 = (1 << PHASE_BITS) - 1;
const GENERATION_MASK: u64 = u64::MAX >> PHASE_BITS;

/// Phase of a background loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopPhase {
    Idle,
    Starting,
    Running,
    Stopping,
}

impl LoopPhase {
    fn bits(self) -> u64 {
        match self {
            Self::Idle => 0,
            Self::Starting => 1,
            Self::Running => 2,
            Self::Stopping => 3,
        }
    }

    fn from_bits(bits: u64) -> Self {
        match bits & PHASE_MASK {
            0 => Self::Idle,
            1 => Self::Starting,
            2 => Self::Running,
            _ => Self::Stopping,
        }
    }
}

fn pack(generation: u64, phase: LoopPhase) -> u64 {
    ((generation & GENERATION_MASK) << PHASE_BITS) | phase.bits()
}

fn unpack(state: u64) -> (u64, LoopPhase) {
    (state >> PHASE_BITS, LoopPhase::from_bits(state))
}

/// Start/stop coordination for one loop.
pub(crate) struct LoopControl {
    state: AtomicU64,
    cancel: Mutex<Option<(u64, CancellationToken)>>,
}

impl LoopControl {
    pub(crate) fn new() -> Self {
        Self {
            state: AtomicU64::new(pack(0, LoopPhase::Idle)),
            cancel: Mutex::new(None),
        }
    }

    pub(crate) fn phase(&self) -> LoopPhase {
        unpack(self.state.load(Ordering::SeqCst)).1
    }

    #[cfg(test)]
    pub(crate) fn generation(&self) -> u64 {
        unpack(self.state.load(Ordering::SeqCst)).0
    }

    /// `Idle -> Starting`. Returns the generation of the new run, or `None`
    /// if a loop is already starting, running or stopping.
    pub(crate) fn try_begin(&self) -> Option<u64> {
        let current = self.state.load(Ordering::SeqCst);
        let (generation, phase) = unpack(current);
        if phase != LoopPhase::Idle {
            return None;
        }

        let next = generation.wrapping_add(1) & GENERATION_MASK;
        self.state
            .compare_exchange(
                current,
                pack(next, LoopPhase::Starting),
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .ok()
            .map(|_| next)
    }

    /// `Starting -> Running`. Returns the cancellation token of the run, or
    /// `None` if a stop arrived while starting (the state is then `Idle`).
    pub(crate) fn commit(&self, generation: u64) -> Option<CancellationToken> {
        let mut slot = self.cancel.lock();
        let committed = self.state.compare_exchange(
            pack(generation, LoopPhase::Starting),
            pack(generation, LoopPhase::Running),
            Ordering::SeqCst,
            Ordering::SeqCst,
        );

        match committed {
            Ok(_) => {
                let token = CancellationToken::new();
                *slot = Some((generation, token.clone()));
                Some(token)
            }
            Err(_) => {
                self.abort(generation);
                None
            }
        }
    }

    /// Give up a start whose setup failed or was stopped: back to `Idle`.
    pub(crate) fn abort(&self, generation: u64) {
        for phase in [LoopPhase::Starting, LoopPhase::Stopping] {
            if self
                .state
                .compare_exchange(
                    pack(generation, phase),
                    pack(generation, LoopPhase::Idle),
                    Ordering::SeqCst,
                    Ordering::SeqCst,
                )
                .is_ok()
            {
                return;
            }
        }
    }

    /// Stop the current run.
    ///
    /// A running loop is cancelled, `teardown` runs while the state is
    /// `Stopping`, then the state returns to `Idle`. A start in progress is
    /// marked `Stopping` and the starter cleans up on `commit`. Returns false
    /// when nothing was running.
    pub(crate) fn stop(&self, teardown: impl FnOnce()) -> bool {
        loop {
            let current = self.state.load(Ordering::SeqCst);
            let (generation, phase) = unpack(current);
            let stopping = pack(generation, LoopPhase::Stopping);

            match phase {
                LoopPhase::Running => {
                    if self
                        .state
                        .compare_exchange(current, stopping, Ordering::SeqCst, Ordering::SeqCst)
                        .is_err()
                    {
                        continue;
                    }

                    if let Some((run, token)) = self.cancel.lock().take() {
                        if run == generation {
                            token.cancel();
                        }
                    }
                    teardown();
                    self.state
                        .store(pack(generation, LoopPhase::Idle), Ordering::SeqCst);
                    return true;
                }
                LoopPhase::Starting => {
                    if self
                        .state
                        .compare_exchange(current, stopping, Ordering::SeqCst, Ordering::SeqCst)
                        .is_ok()
                    {
                        return true;
                    }
                }
                LoopPhase::Idle | LoopPhase::Stopping => return false,
            }
        }
    }

    /// The loop of `generation` exited on its own.
    ///
    /// Same as [`stop`](Self::stop) but only for that generation: a loop that
    /// outlived its run cannot touch the state of a newer one.
    pub(crate) fn finish(&self, generation: u64, teardown: impl FnOnce()) -> bool {
        if self
            .state
            .compare_exchange(
                pack(generation, LoopPhase::Running),
                pack(generation, LoopPhase::Stopping),
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_err()
        {
            return false;
        }

        {
            let mut slot = self.cancel.lock();
            if matches!(*slot, Some((run, _)) if run == generation) {
                *slot = None;
            }
        }
        teardown();
        self.state
            .store(pack(generation, LoopPhase::Idle), Ordering::SeqCst);
        true
    }
}
