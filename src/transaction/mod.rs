//! Transaction state registry
//!
//! Tracks live SIP client and server transactions and matches incoming
//! requests and responses to them per RFC 3261 §17, including the RFC 2543
//! ACK compatibility path. The [`index::TransactionIndex`] is the data
//! structure; [`dispatcher`] wraps it in the long-lived actor that owns it.

pub mod dispatcher;
pub mod index;
pub mod record;

#[cfg(test)]
mod model;

pub use dispatcher::{DispatcherGone, DispatcherHandle};
pub use index::{AmbiguousWorker, TransactionIndex};
pub use record::{TransactionKey, TransactionKind, TransactionRecord, TransactionRef};
