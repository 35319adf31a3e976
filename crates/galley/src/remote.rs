//! The remote authority boundary.
//!
//! The engine never talks to a concrete backend; it consumes per-id ordered
//! listener events and submits transactions through this trait. Events for
//! one id are strictly ordered and are the only source of revision
//! advancement. Read subscriptions are re-established with backoff by the
//! pair layer when a listener channel closes. Write submissions are *not*
//! retried automatically: a blind retry of a non-idempotent patch such as
//! `insert` could double-apply.

use std::future::Future;
use std::time::Duration;

use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::mutation::{MutationError, Transaction};

/// One event on a per-document listener channel.
#[derive(Debug, Clone)]
pub enum ListenerEvent {
    /// Subscription primer: the current authoritative state of the id.
    /// `None` means the document does not exist.
    Snapshot { id: String, document: Option<Value> },
    /// An authoritative transaction touching the subscribed id, with
    /// `previous_rev`/`result_rev` filled in for that id.
    Mutation(Transaction),
    /// The authority hints that the channel was re-established and a fresh
    /// snapshot follows.
    Reconnect,
}

#[derive(Debug, Error, Clone)]
pub enum RemoteError {
    /// The authority rejected the transaction (validation, revision
    /// conflicts, missing documents). Not retryable as-is.
    #[error("transaction rejected: {0}")]
    Rejected(#[from] MutationError),
    /// The transaction may or may not have been applied; the caller must
    /// reconcile through the listener before retrying.
    #[error("transport failure: {0}")]
    Transport(String),
}

/// An ordered, per-id event source plus an atomic submission endpoint.
pub trait RemoteAuthority: Send + Sync + 'static {
    /// Subscribe to one document id. The returned channel yields a
    /// `Snapshot` primer followed by ordered `Mutation` events. Dropping
    /// the receiver unsubscribes.
    fn listen(&self, id: &str) -> mpsc::UnboundedReceiver<ListenerEvent>;

    /// Submit one transaction, applied atomically as a unit.
    fn submit(
        &self,
        transaction: Transaction,
    ) -> impl Future<Output = Result<(), RemoteError>> + Send;
}

/// Exponential backoff for re-establishing read subscriptions.
pub(crate) fn backoff_delay(attempt: u32) -> Duration {
    let base = Duration::from_millis(250);
    let capped = attempt.min(7); // 250ms .. 32s
    base * 2u32.saturating_pow(capped)
}
