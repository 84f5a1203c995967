//! Transaction state index
//!
//! In-memory registry of live client and server transactions, owned by a
//! single dispatcher. Matching follows RFC 3261 §17 with the RFC 2543 ACK
//! fallback kept for interoperability. The index is small and short-lived
//! per entry, so storage is an insertion-ordered vector and every lookup is
//! a linear scan returning the first hit.
//!
//! Mutators never fail outward: the callers are protocol handlers that must
//! stay live, so problems are logged and the index is left usable.

use std::fmt::Write as _;
use std::time::{SystemTime, UNIX_EPOCH};

use thiserror::Error;
use tracing::{debug, error, warn};

use crate::sip::messages::{
    self, Request, Response, MessageError, ServerIdOutcome, ServerTransactionId,
};
use crate::worker::{WorkerHandle, WorkerId, WorkerSignal};

use super::record::{TransactionKey, TransactionRecord, TransactionRef};

/// A worker was expected to drive exactly one transaction but drives more.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("worker {worker} is driving {count} transactions, expected one")]
pub struct AmbiguousWorker {
    pub worker: WorkerId,
    pub count: usize,
}

#[derive(Debug)]
pub struct TransactionIndex<D = ()> {
    records: Vec<TransactionRecord<D>>,
}

impl<D> Default for TransactionIndex<D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D> TransactionIndex<D> {
    pub fn new() -> Self {
        Self {
            records: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Register a client transaction keyed on `(branch, method)`.
    ///
    /// A duplicate key leaves the index unchanged and returns None.
    pub fn add_client_transaction(
        &mut self,
        method: &str,
        branch: &str,
        worker: WorkerHandle,
    ) -> Option<TransactionRef> {
        let key = TransactionKey::Client {
            branch: branch.to_string(),
            method: method.to_string(),
        };
        self.insert(key, None, worker)
    }

    /// Register a server transaction for an incoming request.
    ///
    /// INVITE transactions additionally store the RFC 2543 ACK correlation
    /// key. Requests the parser cannot derive an id for leave the index
    /// unchanged.
    pub fn add_server_transaction(
        &mut self,
        request: &Request,
        worker: WorkerHandle,
    ) -> Option<TransactionRef> {
        let server_id = match messages::server_transaction_id(request) {
            Ok(ServerIdOutcome::Id(id)) => id,
            Ok(ServerIdOutcome::Is2543Ack) => {
                warn!(
                    "not creating a server transaction from a 2543 ACK ({})",
                    request.uri
                );
                return None;
            }
            Err(e) => {
                warn!(
                    "cannot derive server transaction id for {} {}: {}",
                    request.method, request.uri, e
                );
                return None;
            }
        };

        let ack_id = if request.method == "INVITE" {
            match messages::server_transaction_ack_id_2543(request) {
                Ok(id) => Some(id),
                Err(e) => {
                    warn!(
                        "cannot derive 2543 ack id for INVITE {}: {}",
                        request.uri, e
                    );
                    return None;
                }
            }
        } else {
            None
        };

        self.insert(TransactionKey::Server(server_id), ack_id, worker)
    }

    fn insert(
        &mut self,
        key: TransactionKey,
        ack_id: Option<messages::AckId2543>,
        worker: WorkerHandle,
    ) -> Option<TransactionRef> {
        if self.find_by_key(&key).is_some() {
            warn!("transaction already registered, ignoring duplicate: {:?}", key);
            return None;
        }
        let record = TransactionRecord::new(key, ack_id, worker);
        let id = record.id;
        self.records.push(record);
        Some(id)
    }

    fn find_by_key(&self, key: &TransactionKey) -> Option<&TransactionRecord<D>> {
        self.records.iter().find(|r| &r.key == key)
    }

    pub fn get(&self, id: TransactionRef) -> Option<&TransactionRecord<D>> {
        self.records.iter().find(|r| r.id == id)
    }

    pub fn get_client_transaction(
        &self,
        method: &str,
        branch: &str,
    ) -> Option<&TransactionRecord<D>> {
        self.records.iter().find(|r| {
            matches!(&r.key, TransactionKey::Client { branch: b, method: m }
                if b == branch && m == method)
        })
    }

    /// Match an incoming request to its server transaction.
    ///
    /// RFC 3261 ids are looked up directly. ACKs fall back to RFC 2543
    /// matching both when the parser tags them as pre-3261 and when the
    /// direct lookup misses, which happens when an intermediate 3261 proxy
    /// regenerated the branch.
    pub fn get_server_transaction_for_request(
        &self,
        request: &Request,
    ) -> Result<Option<&TransactionRecord<D>>, MessageError> {
        let server_id = match messages::server_transaction_id(request) {
            Ok(ServerIdOutcome::Id(id)) => id,
            Ok(ServerIdOutcome::Is2543Ack) => return self.match_2543_ack(request),
            Err(e) => {
                warn!(
                    "cannot derive server transaction id for {} {}: {}",
                    request.method, request.uri, e
                );
                return Err(e);
            }
        };

        match self.find_by_key(&TransactionKey::Server(server_id)) {
            Some(record) => Ok(Some(record)),
            None if request.method == "ACK" => self.match_2543_ack(request),
            None => Ok(None),
        }
    }

    fn match_2543_ack(
        &self,
        request: &Request,
    ) -> Result<Option<&TransactionRecord<D>>, MessageError> {
        let ack_id = match messages::server_transaction_ack_id_2543(request) {
            Ok(id) => id,
            Err(e) => {
                warn!("cannot derive 2543 ack id for ACK {}: {}", request.uri, e);
                return Err(e);
            }
        };
        let to_tag = request.header("to").and_then(messages::get_tag);

        for record in &self.records {
            if record.ack_id.as_ref() == Some(&ack_id) {
                if record.response_to_tag == to_tag {
                    return Ok(Some(record));
                }
                debug!(
                    "2543 ack id matches {} but To-tag differs ({:?} vs {:?}), skipping",
                    record.id, to_tag, record.response_to_tag
                );
            }
        }
        Ok(None)
    }

    /// Match an outbound response to the server transaction that should own
    /// it, by rebuilding the id from the response's top Via and CSeq. This is
    /// how a stateless server finds out it actually has state for a response.
    pub fn get_server_transaction_for_response(
        &self,
        response: &Response,
    ) -> Result<Option<&TransactionRecord<D>>, MessageError> {
        let (branch, method) = match messages::client_transaction_id(response) {
            Ok(id) => id,
            Err(e) => {
                warn!(
                    "cannot derive transaction id for response {}: {}",
                    response.status, e
                );
                return Err(e);
            }
        };
        Ok(self.find_by_key(&TransactionKey::Server(ServerTransactionId::Rfc3261 {
            branch,
            method,
        })))
    }

    /// First record through which a stateless response with this
    /// `(branch, method)` was forwarded.
    pub fn get_server_transaction_for_stateless_response_branch(
        &self,
        branch: &str,
        method: &str,
    ) -> Option<&TransactionRecord<D>> {
        self.records
            .iter()
            .find(|r| r.has_stateless_branch(branch, method))
    }

    /// All records driven by this worker, in insertion order.
    pub fn get_by_worker(&self, worker: &WorkerHandle) -> Vec<&TransactionRecord<D>> {
        self.records
            .iter()
            .filter(|r| r.worker.as_ref() == Some(worker))
            .collect()
    }

    /// The single record driven by this worker, if any. Errors when the
    /// worker turns out to drive several.
    pub fn get_unique_by_worker(
        &self,
        worker: &WorkerHandle,
    ) -> Result<Option<&TransactionRecord<D>>, AmbiguousWorker> {
        let found = self.get_by_worker(worker);
        match found.len() {
            0 => Ok(None),
            1 => Ok(Some(found[0])),
            count => Err(AmbiguousWorker {
                worker: worker.id(),
                count,
            }),
        }
    }

    pub fn set_worker(&mut self, id: TransactionRef, worker: Option<WorkerHandle>) -> bool {
        self.mutate(id, "set_worker", |r| r.worker = worker)
    }

    pub fn set_appdata(&mut self, id: TransactionRef, appdata: Option<D>) -> bool {
        self.mutate(id, "set_appdata", |r| r.appdata = appdata)
    }

    pub fn set_response_to_tag(&mut self, id: TransactionRef, tag: Option<String>) -> bool {
        self.mutate(id, "set_response_to_tag", |r| r.response_to_tag = tag)
    }

    /// Record a stateless response branch on a transaction. Appending a pair
    /// that is already present changes nothing.
    pub fn append_response_branch(
        &mut self,
        id: TransactionRef,
        branch: &str,
        method: &str,
    ) -> bool {
        self.mutate(id, "append_response_branch", |r| {
            if !r.has_stateless_branch(branch, method) {
                r.stateless_response_branches
                    .push((branch.to_string(), method.to_string()));
            }
        })
    }

    fn mutate<F>(&mut self, id: TransactionRef, op: &str, apply: F) -> bool
    where
        F: FnOnce(&mut TransactionRecord<D>),
    {
        match self.records.iter_mut().find(|r| r.id == id) {
            Some(record) => {
                apply(record);
                true
            }
            None => {
                warn!("{} on unknown transaction {}, ignoring", op, id);
                false
            }
        }
    }

    /// Replace a whole record, located by its stable ref.
    ///
    /// An unknown ref means the caller is working from a stale record; all
    /// state is dropped rather than continuing alongside a caller with a
    /// logic bug.
    pub fn update(&mut self, record: TransactionRecord<D>) {
        match self.records.iter_mut().find(|r| r.id == record.id) {
            Some(existing) => *existing = record,
            None => {
                error!(
                    "update of unknown transaction {}, discarding all transaction state",
                    record.id
                );
                self.records.clear();
            }
        }
    }

    /// Drop every record driven by this worker. Returns how many went.
    pub fn delete_by_worker(&mut self, worker: &WorkerHandle) -> usize {
        let before = self.records.len();
        self.records
            .retain(|r| r.worker.as_ref() != Some(worker));
        let deleted = before - self.records.len();
        if deleted > 0 {
            debug!("deleted {} transactions of {}", deleted, worker);
        }
        deleted
    }

    /// Drop expired records, notifying live workers so they can unwind.
    pub fn delete_expired(&mut self) -> usize {
        self.delete_expired_at(unix_now())
    }

    /// Testable sweep with an explicit clock.
    pub fn delete_expired_at(&mut self, now: u64) -> usize {
        let mut kept = Vec::with_capacity(self.records.len());
        let mut deleted = 0;
        for record in self.records.drain(..) {
            if record.is_expired_at(now) {
                debug!("transaction {} expired, removing", record.id);
                if let Some(worker) = &record.worker {
                    if worker.is_alive() {
                        worker.signal(WorkerSignal::TransactionExpired(record.id));
                    }
                }
                deleted += 1;
            } else {
                kept.push(record);
            }
        }
        self.records = kept;
        deleted
    }

    /// Immutable one-line-per-record snapshot for logging.
    pub fn debug_format(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "transactions: {}", self.records.len());
        for record in &self.records {
            let _ = writeln!(
                out,
                "  {} {} key={:?} worker={} to_tag={:?} branches={} expire={}",
                record.id,
                record.kind(),
                record.key,
                record
                    .worker
                    .as_ref()
                    .map(|w| w.to_string())
                    .unwrap_or_else(|| "-".to_string()),
                record.response_to_tag,
                record.stateless_response_branches.len(),
                record.expire,
            );
        }
        out
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
