//! Transaction records
//!
//! One record per live client or server transaction. The match key encodes
//! both the transaction kind and its protocol identity; the `id` field is a
//! separate process-unique token that stays stable while the record is
//! mutated in place.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::sip::messages::{AckId2543, ServerTransactionId};
use crate::worker::WorkerHandle;

static NEXT_REF: AtomicU64 = AtomicU64::new(1);

/// Stable identity of a record across in-place updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransactionRef(u64);

impl TransactionRef {
    pub(crate) fn next() -> Self {
        Self(NEXT_REF.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for TransactionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionKind {
    Client,
    Server,
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TransactionKind::Client => "client",
            TransactionKind::Server => "server",
        })
    }
}

/// Primary match key. No two records in an index share one.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TransactionKey {
    Client { branch: String, method: String },
    Server(ServerTransactionId),
}

impl TransactionKey {
    pub fn kind(&self) -> TransactionKind {
        match self {
            TransactionKey::Client { .. } => TransactionKind::Client,
            TransactionKey::Server(_) => TransactionKind::Server,
        }
    }
}

/// State tracked for one transaction. `D` is whatever the owning worker
/// wants to remember alongside it.
#[derive(Debug, Clone)]
pub struct TransactionRecord<D> {
    pub id: TransactionRef,
    pub key: TransactionKey,
    /// RFC 2543 ACK correlation key; only set on server INVITE transactions.
    pub ack_id: Option<AckId2543>,
    /// Driving worker, if any. None after a detach.
    pub worker: Option<WorkerHandle>,
    pub appdata: Option<D>,
    /// To-tag of the response this transaction sent, for 2543 ACK matching.
    pub response_to_tag: Option<String>,
    /// `(branch, method)` pairs of stateless responses forwarded through
    /// this transaction. Set semantics, stored in arrival order.
    pub stateless_response_branches: Vec<(String, String)>,
    /// Absolute expiry in seconds; 0 means never.
    pub expire: u64,
}

impl<D> TransactionRecord<D> {
    pub(crate) fn new(
        key: TransactionKey,
        ack_id: Option<AckId2543>,
        worker: WorkerHandle,
    ) -> Self {
        Self {
            id: TransactionRef::next(),
            key,
            ack_id,
            worker: Some(worker),
            appdata: None,
            response_to_tag: None,
            stateless_response_branches: Vec::new(),
            expire: 0,
        }
    }

    pub fn kind(&self) -> TransactionKind {
        self.key.kind()
    }

    pub fn is_expired_at(&self, now: u64) -> bool {
        self.expire > 0 && self.expire <= now
    }

    pub fn has_stateless_branch(&self, branch: &str, method: &str) -> bool {
        self.stateless_response_branches
            .iter()
            .any(|(b, m)| b == branch && m == method)
    }
}


/// Kani formal verification proofs
#[cfg(kani)]
mod kani_proofs {
    #[kani::proof]
    fn expiry_predicate_sound() {
        let expire: u64 = kani::any();
        let now: u64 = kani::any();
        let expired = expire > 0 && expire <= now;
        // Mirrors TransactionRecord::is_expired_at: zero never expires.
        if expire == 0 {
            kani::assert(!expired, "expire 0 must mean never");
        }
        if expired {
            kani::assert(expire <= now, "expired records lie in the past");
        }
    }
}
