//! Usage: FIFO turn-taking for callers replaying after a shared credential refresh.
//!
//! Waking queued tasks in order does not make them run in order on a
//! multi-threaded runtime, so each replaying caller holds a `ReplayTurn` and
//! hands its retry to the transport only after every earlier position has
//! released its turn. Wire order is up to the transport.

use std::sync::Arc;
use tokio::sync::watch;

#[derive(Debug)]
struct ReplayProgress {
    released: Vec<bool>,
    next: usize,
}

#[derive(Debug)]
pub(crate) struct ReplayGate {
    progress: watch::Sender<ReplayProgress>,
}

impl ReplayGate {
    pub(crate) fn new(positions: usize) -> Arc<Self> {
        let (progress, _) = watch::channel(ReplayProgress {
            released: vec![false; positions],
            next: 0,
        });
        Arc::new(Self { progress })
    }

    pub(crate) fn turn(self: &Arc<Self>, position: usize) -> ReplayTurn {
        ReplayTurn {
            gate: Arc::clone(self),
            position,
        }
    }

    fn release(&self, position: usize) {
        self.progress.send_modify(|p| {
            if let Some(slot) = p.released.get_mut(position) {
                *slot = true;
            }
            while p.next < p.released.len() && p.released[p.next] {
                p.next += 1;
            }
        });
    }
}

/// A place in the replay order. Dropping it releases the place, so a caller
/// that gave up never blocks the ones queued behind it.
#[derive(Debug)]
pub struct ReplayTurn {
    gate: Arc<ReplayGate>,
    position: usize,
}

impl ReplayTurn {
    pub fn position(&self) -> usize {
        self.position
    }

    /// Resolves once every earlier position has been released.
    pub(crate) async fn ready(&self) {
        let mut rx = self.gate.progress.subscribe();
        let position = self.position;
        // The sender lives in `self.gate`, so the channel cannot close here.
        let _ = rx.wait_for(|p| p.next >= position).await;
    }
}

impl Drop for ReplayTurn {
    fn drop(&mut self) {
        self.gate.release(self.position);
    }
}
