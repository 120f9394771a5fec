//! Hand-off point between a client's network callbacks and its tick loop.

use crate::synchronizer::SyncSample;
use parking_lot::Mutex;
use std::sync::Arc;
use tidenet_core::{Snapshot, SyncResult};

#[derive(Debug, Default)]
struct Pending {
    snapshot: Option<Snapshot>,
    samples: Vec<SyncSample>,
    disconnected: bool,
}

/// Cloneable handle the transport writes into and the client drains once
/// per tick.
///
/// Only the newest snapshot is kept; older ones arriving late are dropped.
#[derive(Debug, Clone, Default)]
pub struct ClientInbox {
    pending: Arc<Mutex<Pending>>,
}

/// Everything received since the last drain.
#[derive(Debug, Default)]
pub struct Drained {
    /// Newest snapshot, if any arrived.
    pub snapshot: Option<Snapshot>,
    /// Time sync samples in arrival order.
    pub samples: Vec<SyncSample>,
    /// Whether the server dropped us.
    pub disconnected: bool,
}

impl ClientInbox {
    /// Empty inbox.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Decodes and stores a snapshot payload.
    ///
    /// # Errors
    ///
    /// Fails if the payload is malformed; nothing is stored then.
    pub fn on_snapshot(&self, payload: &[u8]) -> SyncResult<()> {
        let snapshot = Snapshot::decode(payload)?;
        self.push_snapshot(snapshot);
        Ok(())
    }

    /// Stores `snapshot` unless a newer one is already waiting.
    pub fn push_snapshot(&self, snapshot: Snapshot) {
        let mut pending = self.pending.lock();
        if pending.snapshot.as_ref().map_or(true, |current| current.tick < snapshot.tick) {
            pending.snapshot = Some(snapshot);
        }
    }

    /// Queues a time sync sample.
    pub fn on_sync_sample(&self, sample: SyncSample) {
        self.pending.lock().samples.push(sample);
    }

    /// Flags that the connection is gone.
    pub fn on_disconnected(&self) {
        self.pending.lock().disconnected = true;
    }

    /// Takes everything received so far.
    pub fn drain(&self) -> Drained {
        let mut pending = self.pending.lock();
        Drained {
            snapshot: pending.snapshot.take(),
            samples: std::mem::take(&mut pending.samples),
            disconnected: pending.disconnected,
        }
    }
}
