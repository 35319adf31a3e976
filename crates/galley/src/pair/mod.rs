//! Draft/published document pairs.
//!
//! One logical document exists as a pair of ids: a mutable draft under the
//! reserved prefix and a publish-gated bare id. Checking out a pair
//! subscribes to both ids' listener streams, maintains a
//! [`BufferedDocument`] per id, and exposes the operations API: each
//! operation inspects the current optimistic state, reports whether it is
//! enabled, and on execution encodes one transaction that the remote
//! authority applies atomically. Operations never mutate pair state
//! directly beyond the optimistic staging; authoritative state only
//! advances through listener events.

use std::sync::{Arc, Mutex};

use serde_json::{json, Value};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::warn;

use galley_json_match::Path;

use crate::document::{BufferedDocument, DocumentEvent};
use crate::meta;
use crate::mutation::{Mutation, MutationError, Transaction};
use crate::patch::Patch;
use crate::remote::{backoff_delay, ListenerEvent, RemoteAuthority, RemoteError};
use crate::util::lock;

/// Reserved prefix marking draft ids.
pub const DRAFTS_PREFIX: &str = "drafts.";

/// The linked draft/published identity of one logical document.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IdPair {
    pub draft_id: String,
    pub published_id: String,
}

impl IdPair {
    /// Derive the pair from a base id. Ids already carrying the draft
    /// prefix normalize to the same pair.
    pub fn from_base(id: &str) -> Self {
        let base = id.strip_prefix(DRAFTS_PREFIX).unwrap_or(id);
        Self {
            draft_id: format!("{DRAFTS_PREFIX}{base}"),
            published_id: base.to_string(),
        }
    }

    pub fn is_draft_id(id: &str) -> bool {
        id.starts_with(DRAFTS_PREFIX)
    }

    pub fn base(&self) -> &str {
        &self.published_id
    }
}

/// Pair state derived from the presence of the two optimistic snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairState {
    Empty,
    DraftOnly,
    PublishedOnly,
    Both,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentVariant {
    Draft,
    Published,
}

/// Events surfaced to pair consumers.
#[derive(Debug, Clone)]
pub enum PairEvent {
    Document {
        variant: DocumentVariant,
        event: DocumentEvent,
    },
    /// A listener channel was re-established; a fresh snapshot follows.
    Reconnect { variant: DocumentVariant },
    /// A write submission failed and its optimistic effect was rolled back.
    SubmissionFailed {
        transaction_id: String,
        error: RemoteError,
    },
}

#[derive(Debug, Clone)]
pub struct PairConfig {
    /// The `_type` given to documents this pair creates.
    pub document_type: String,
    /// Live-edit types commit straight to the published id; no draft is
    /// ever created.
    pub live_edit: bool,
}

impl PairConfig {
    pub fn new(document_type: impl Into<String>) -> Self {
        Self { document_type: document_type.into(), live_edit: false }
    }

    pub fn live_edit(document_type: impl Into<String>) -> Self {
        Self { document_type: document_type.into(), live_edit: true }
    }
}

#[derive(Debug, Error)]
pub enum OperationError {
    #[error("operation `{operation}` is disabled: {reason}")]
    Disabled {
        operation: &'static str,
        reason: &'static str,
    },
    #[error(transparent)]
    Mutation(#[from] MutationError),
    #[error(transparent)]
    Remote(#[from] RemoteError),
}

// ── Inner state shared with listener tasks ───────────────────────────────

struct PairInner {
    draft: BufferedDocument,
    published: BufferedDocument,
    config: PairConfig,
    events_tx: mpsc::UnboundedSender<PairEvent>,
}

impl PairInner {
    fn state(&self) -> PairState {
        match (self.draft.edge().is_some(), self.published.edge().is_some()) {
            (false, false) => PairState::Empty,
            (true, false) => PairState::DraftOnly,
            (false, true) => PairState::PublishedOnly,
            (true, true) => PairState::Both,
        }
    }

    fn doc_mut(&mut self, variant: DocumentVariant) -> &mut BufferedDocument {
        match variant {
            DocumentVariant::Draft => &mut self.draft,
            DocumentVariant::Published => &mut self.published,
        }
    }

    fn emit(&self, variant: DocumentVariant, events: Vec<DocumentEvent>) {
        for event in events {
            let _ = self.events_tx.send(PairEvent::Document { variant, event });
        }
    }

    /// Stage a transaction into every buffered document it touches.
    /// Dry-runs both documents first so a late failure cannot leave one of
    /// them staged.
    fn stage_all(&mut self, transaction: &Transaction) -> Result<(), MutationError> {
        let touches_draft = transaction.touches(self.draft.id());
        let touches_published = transaction.touches(self.published.id());
        if touches_draft {
            transaction.apply_to(self.draft.id(), self.draft.edge())?;
        }
        if touches_published {
            transaction.apply_to(self.published.id(), self.published.edge())?;
        }
        if touches_draft {
            let events = self.draft.stage(transaction.clone())?;
            self.emit(DocumentVariant::Draft, events);
        }
        if touches_published {
            let events = self.published.stage(transaction.clone())?;
            self.emit(DocumentVariant::Published, events);
        }
        Ok(())
    }

    fn settle_submission(&mut self, transaction: &Transaction, success: bool) {
        let id = transaction.transaction_id.clone();
        if transaction.touches(self.draft.id()) {
            let events = if success {
                self.draft.submission_succeeded(&id)
            } else {
                self.draft.submission_failed(&id)
            };
            self.emit(DocumentVariant::Draft, events);
        }
        if transaction.touches(self.published.id()) {
            let events = if success {
                self.published.submission_succeeded(&id)
            } else {
                self.published.submission_failed(&id)
            };
            self.emit(DocumentVariant::Published, events);
        }
    }

    // ── Transaction planning ─────────────────────────────────────────────

    fn new_document_stub(&self, id: &str) -> Value {
        json!({
            "_id": id,
            "_type": self.config.document_type,
        })
    }

    fn plan_commit(&self, patches: Vec<Patch>) -> Option<Transaction> {
        if patches.is_empty() {
            return None;
        }
        if self.config.live_edit {
            let mut mutations = Vec::new();
            if self.published.edge().is_none() {
                let stub = self.new_document_stub(self.published.id());
                mutations.push(Mutation::CreateIfNotExists(stub));
            }
            mutations.push(Mutation::patch(self.published.id(), patches));
            return Some(Transaction::new(mutations));
        }

        let mut mutations = Vec::new();
        if self.draft.edge().is_none() {
            // Seed the draft from the published document when one exists.
            let seed = match self.published.edge() {
                Some(published) => meta::with_id(published, self.draft.id()),
                None => self.new_document_stub(self.draft.id()),
            };
            mutations.push(Mutation::CreateIfNotExists(seed));
        }
        mutations.push(Mutation::patch(self.draft.id(), patches));
        Some(Transaction::new(mutations))
    }

    fn plan_publish(&self) -> Option<Transaction> {
        let draft = self.draft.edge()?;
        let mut mutations = Vec::new();
        match self.published.edge() {
            None => {
                let body = meta::with_id(draft, self.published.id());
                mutations.push(Mutation::CreateIfNotExists(body));
            }
            Some(published) => {
                let patches = mirror_patches(published, draft);
                let mutation = match meta::revision(published) {
                    Some(rev) => Mutation::patch_if_revision(self.published.id(), patches, rev),
                    None => Mutation::patch(self.published.id(), patches),
                };
                mutations.push(mutation);
            }
        }
        mutations.push(Mutation::delete(self.draft.id()));
        Some(Transaction::new(mutations))
    }

    fn plan_unpublish(&self) -> Option<Transaction> {
        let published = self.published.edge()?;
        let mut mutations = Vec::new();
        if self.draft.edge().is_none() {
            let body = meta::with_id(published, self.draft.id());
            mutations.push(Mutation::CreateIfNotExists(body));
        }
        let deletion = match meta::revision(published) {
            Some(rev) => Mutation::delete_if_revision(self.published.id(), rev),
            None => Mutation::delete(self.published.id()),
        };
        mutations.push(deletion);
        Some(Transaction::new(mutations))
    }

    fn plan_discard(&self) -> Option<Transaction> {
        self.draft.edge()?;
        Some(Transaction::new(vec![Mutation::delete(self.draft.id())]))
    }

    fn plan_delete(&self) -> Option<Transaction> {
        let mut mutations = Vec::new();
        if self.published.edge().is_some() {
            mutations.push(Mutation::delete(self.published.id()));
        }
        if self.draft.edge().is_some() {
            mutations.push(Mutation::delete(self.draft.id()));
        }
        if mutations.is_empty() {
            return None;
        }
        Some(Transaction::new(mutations))
    }

    fn plan_restore(&self, value: &Value) -> Option<Transaction> {
        let body = meta::with_id(value, self.draft.id());
        let mut mutations = vec![Mutation::CreateIfNotExists(body.clone())];
        if let Some(current) = self.draft.edge() {
            let patches = mirror_patches(current, &body);
            if !patches.is_empty() {
                mutations.push(Mutation::patch(self.draft.id(), patches));
            }
        }
        Some(Transaction::new(mutations))
    }
}

/// Patches that make `current`'s top-level attributes mirror `desired`'s,
/// leaving the engine-managed fields alone.
fn mirror_patches(current: &Value, desired: &Value) -> Vec<Patch> {
    let mut patches = Vec::new();
    let (Some(current), Some(desired)) = (current.as_object(), desired.as_object()) else {
        return patches;
    };
    for (key, value) in desired {
        if meta::RESERVED_FIELDS.contains(&key.as_str()) {
            continue;
        }
        if current.get(key) != Some(value) {
            patches.push(Patch::Set { path: Path::attribute(key), value: value.clone() });
        }
    }
    for key in current.keys() {
        if meta::RESERVED_FIELDS.contains(&key.as_str()) {
            continue;
        }
        if !desired.contains_key(key) {
            patches.push(Patch::Unset { path: Path::attribute(key) });
        }
    }
    patches
}

// ── Checkout ─────────────────────────────────────────────────────────────

/// Check out the pair for `base_id`: subscribe to both ids and return the
/// handle carrying the operations API. Must be called within a tokio
/// runtime.
pub fn checkout_pair<R: RemoteAuthority>(
    remote: Arc<R>,
    base_id: &str,
    config: PairConfig,
) -> DocumentPair<R> {
    let ids = IdPair::from_base(base_id);
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let inner = Arc::new(Mutex::new(PairInner {
        draft: BufferedDocument::new(&ids.draft_id, None),
        published: BufferedDocument::new(&ids.published_id, None),
        config,
        events_tx,
    }));
    let listeners = vec![
        spawn_listener(remote.clone(), ids.draft_id.clone(), DocumentVariant::Draft, inner.clone()),
        spawn_listener(
            remote.clone(),
            ids.published_id.clone(),
            DocumentVariant::Published,
            inner.clone(),
        ),
    ];
    DocumentPair { ids, inner, remote, events_rx: Some(events_rx), listeners }
}

fn spawn_listener<R: RemoteAuthority>(
    remote: Arc<R>,
    id: String,
    variant: DocumentVariant,
    inner: Arc<Mutex<PairInner>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut attempt: u32 = 0;
        loop {
            let mut rx = remote.listen(&id);
            while let Some(event) = rx.recv().await {
                attempt = 0;
                let mut guard = lock(&inner);
                match event {
                    ListenerEvent::Snapshot { document, .. } => {
                        let events = guard.doc_mut(variant).reset(document);
                        guard.emit(variant, events);
                    }
                    ListenerEvent::Mutation(transaction) => {
                        let events = guard.doc_mut(variant).arrive(transaction);
                        guard.emit(variant, events);
                    }
                    ListenerEvent::Reconnect => {
                        let _ = guard.events_tx.send(PairEvent::Reconnect { variant });
                    }
                }
            }
            // Channel closed without unsubscribe: back off and resubscribe.
            attempt += 1;
            let delay = backoff_delay(attempt);
            warn!(doc = %id, ?delay, "listener channel closed, resubscribing");
            {
                let guard = lock(&inner);
                let _ = guard.events_tx.send(PairEvent::Reconnect { variant });
            }
            tokio::time::sleep(delay).await;
        }
    })
}

// ── The pair handle ──────────────────────────────────────────────────────

pub struct DocumentPair<R: RemoteAuthority> {
    ids: IdPair,
    inner: Arc<Mutex<PairInner>>,
    remote: Arc<R>,
    events_rx: Option<mpsc::UnboundedReceiver<PairEvent>>,
    listeners: Vec<JoinHandle<()>>,
}

impl<R: RemoteAuthority> DocumentPair<R> {
    pub fn ids(&self) -> &IdPair {
        &self.ids
    }

    pub fn state(&self) -> PairState {
        lock(&self.inner).state()
    }

    /// Optimistic draft snapshot.
    pub fn draft(&self) -> Option<Value> {
        lock(&self.inner).draft.edge().cloned()
    }

    /// Optimistic published snapshot.
    pub fn published(&self) -> Option<Value> {
        lock(&self.inner).published.edge().cloned()
    }

    pub fn is_consistent(&self) -> bool {
        let guard = lock(&self.inner);
        guard.draft.is_consistent() && guard.published.is_consistent()
    }

    /// Take the event receiver. Yields `None` on subsequent calls.
    pub fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<PairEvent>> {
        self.events_rx.take()
    }

    /// Take the event receiver as a stream.
    pub fn event_stream(&mut self) -> Option<UnboundedReceiverStream<PairEvent>> {
        self.take_events().map(UnboundedReceiverStream::new)
    }

    /// Apply edits. Targets the draft (creating it from the published
    /// snapshot if needed), or the published document directly for
    /// live-edit types. Enabled in every state.
    pub fn commit(&self, patches: Vec<Patch>) -> Operation<R> {
        let guard = lock(&self.inner);
        let transaction = guard.plan_commit(patches);
        drop(guard);
        self.operation("commit", true, "always enabled", transaction)
    }

    /// Copy the draft onto the published id and delete the draft.
    pub fn publish(&self) -> Operation<R> {
        let guard = lock(&self.inner);
        let enabled = matches!(guard.state(), PairState::DraftOnly | PairState::Both);
        let transaction = if enabled { guard.plan_publish() } else { None };
        drop(guard);
        self.operation("publish", enabled, "there is no draft to publish", transaction)
    }

    /// Move the published document back to a draft and delete the
    /// published id.
    pub fn unpublish(&self) -> Operation<R> {
        let guard = lock(&self.inner);
        let enabled = matches!(guard.state(), PairState::PublishedOnly | PairState::Both);
        let transaction = if enabled { guard.plan_unpublish() } else { None };
        drop(guard);
        self.operation("unpublish", enabled, "there is no published document", transaction)
    }

    /// Delete the draft, leaving the published document unchanged.
    pub fn discard_changes(&self) -> Operation<R> {
        let guard = lock(&self.inner);
        let enabled = guard.state() == PairState::Both;
        let transaction = if enabled { guard.plan_discard() } else { None };
        drop(guard);
        self.operation(
            "discardChanges",
            enabled,
            "requires both a draft and a published document",
            transaction,
        )
    }

    /// Remove whichever of draft and published exist.
    pub fn delete(&self) -> Operation<R> {
        let guard = lock(&self.inner);
        let enabled = guard.state() != PairState::Empty;
        let transaction = if enabled { guard.plan_delete() } else { None };
        drop(guard);
        self.operation("delete", enabled, "the document does not exist", transaction)
    }

    /// Re-create the draft from an externally sourced historical value.
    pub fn restore(&self, value: &Value) -> Operation<R> {
        let guard = lock(&self.inner);
        let transaction = guard.plan_restore(value);
        drop(guard);
        self.operation("restore", true, "always enabled", transaction)
    }

    /// Unsubscribe both listener streams and discard all pending local
    /// state without emitting further events.
    pub fn dispose(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        for handle in self.listeners.drain(..) {
            handle.abort();
        }
    }

    fn operation(
        &self,
        name: &'static str,
        enabled: bool,
        disabled_reason: &'static str,
        transaction: Option<Transaction>,
    ) -> Operation<R> {
        Operation {
            name,
            enabled,
            disabled_reason,
            transaction,
            inner: self.inner.clone(),
            remote: self.remote.clone(),
        }
    }
}

impl<R: RemoteAuthority> Drop for DocumentPair<R> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

// ── Operations ───────────────────────────────────────────────────────────

/// A guarded, executable pair operation. The guard reflects the state at
/// the moment the operation was requested.
pub struct Operation<R: RemoteAuthority> {
    name: &'static str,
    enabled: bool,
    disabled_reason: &'static str,
    transaction: Option<Transaction>,
    inner: Arc<Mutex<PairInner>>,
    remote: Arc<R>,
}

impl<R: RemoteAuthority> Operation<R> {
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn disabled_reason(&self) -> Option<&'static str> {
        (!self.enabled).then_some(self.disabled_reason)
    }

    /// Stage the planned transaction optimistically and submit it. The
    /// local application is synchronous; only the remote round-trip is
    /// awaited, and reads from other tasks proceed meanwhile.
    pub async fn execute(self) -> Result<(), OperationError> {
        if !self.enabled {
            return Err(OperationError::Disabled {
                operation: self.name,
                reason: self.disabled_reason,
            });
        }
        let Some(transaction) = self.transaction else {
            // Nothing to do (e.g. an empty commit).
            return Ok(());
        };

        {
            let mut guard = lock(&self.inner);
            guard.stage_all(&transaction)?;
        }

        match self.remote.submit(transaction.clone()).await {
            Ok(()) => {
                let mut guard = lock(&self.inner);
                guard.settle_submission(&transaction, true);
                Ok(())
            }
            Err(error) => {
                let mut guard = lock(&self.inner);
                guard.settle_submission(&transaction, false);
                let _ = guard.events_tx.send(PairEvent::SubmissionFailed {
                    transaction_id: transaction.transaction_id.clone(),
                    error: error.clone(),
                });
                Err(error.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn id_pair_derivation() {
        let pair = IdPair::from_base("article-1");
        assert_eq!(pair.draft_id, "drafts.article-1");
        assert_eq!(pair.published_id, "article-1");
        // A draft id normalizes to the same pair.
        assert_eq!(IdPair::from_base("drafts.article-1"), pair);
        assert!(IdPair::is_draft_id("drafts.article-1"));
        assert!(!IdPair::is_draft_id("article-1"));
    }

    #[test]
    fn mirror_patches_set_changed_and_unset_removed() {
        let current = json!({"_id": "a", "_rev": "r1", "title": "old", "gone": 1, "same": true});
        let desired = json!({"_id": "drafts.a", "title": "new", "same": true, "fresh": 2});
        let patches = mirror_patches(&current, &desired);
        assert_eq!(
            patches,
            vec![
                Patch::Set { path: Path::attribute("title"), value: json!("new") },
                Patch::Set { path: Path::attribute("fresh"), value: json!(2) },
                Patch::Unset { path: Path::attribute("gone") },
            ]
        );
    }
}
