//! Worker handles
//!
//! A worker is the task driving one or more transactions. The registry only
//! needs three things from it: a stable identity, a liveness probe, and a
//! best-effort signal path for expiry notifications. Workers that die without
//! deregistering stay in the index until their records expire.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::mpsc;

use crate::transaction::TransactionRef;

static NEXT_WORKER_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique worker identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WorkerId(u64);

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "worker-{}", self.0)
    }
}

/// Out-of-band notifications delivered to a worker by the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerSignal {
    /// The record the worker was driving hit its expiry time and was removed.
    /// The worker is expected to unwind whatever it was doing for it.
    TransactionExpired(TransactionRef),
}

/// Handle to a worker task.
///
/// Cloneable; equality is by worker id, so a record can be found again from
/// any clone of the handle that registered it.
#[derive(Debug, Clone)]
pub struct WorkerHandle {
    id: WorkerId,
    sender: mpsc::UnboundedSender<WorkerSignal>,
}

impl WorkerHandle {
    /// Mint a fresh worker identity and its signal receiver.
    ///
    /// The worker task keeps the receiver; dropping it is what makes the
    /// liveness probe report dead.
    pub fn register() -> (Self, mpsc::UnboundedReceiver<WorkerSignal>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let id = WorkerId(NEXT_WORKER_ID.fetch_add(1, Ordering::Relaxed));
        (Self { id, sender }, receiver)
    }

    pub fn id(&self) -> WorkerId {
        self.id
    }

    /// Liveness probe. A worker is alive as long as it still holds its
    /// receiver; the probe never blocks.
    pub fn is_alive(&self) -> bool {
        !self.sender.is_closed()
    }

    /// Best-effort signal delivery. Sending to a dead worker is not an error.
    pub fn signal(&self, signal: WorkerSignal) {
        let _ = self.sender.send(signal);
    }
}

impl PartialEq for WorkerHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for WorkerHandle {}

impl fmt::Display for WorkerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.id.fmt(f)
    }
}
