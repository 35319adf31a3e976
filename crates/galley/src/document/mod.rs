//! Buffered document: one document id, reconciled between local optimism
//! and the authoritative event stream.
//!
//! Two values are maintained. `HEAD` is the last state confirmed by the
//! authority's ordered events. `EDGE` is the optimistic state consumers
//! see: `HEAD` plus every locally staged transaction that has not been
//! confirmed yet. Local transactions move through two queues, `pending`
//! (submission in flight) and `submitted` (accepted, not yet seen on the
//! return channel), and a third queue buffers `incoming` remote
//! transactions that cannot be applied yet because an intermediate event
//! has not arrived. When confirmations arrive out of the predicted order,
//! `EDGE` is rebased: recomputed from `HEAD` with every unresolved
//! transaction replayed on top. A replay that no longer applies drops the
//! transaction and reports it as stale rather than failing the document.

use std::collections::VecDeque;

use serde_json::Value;
use tracing::{debug, warn};

use crate::meta;
use crate::mutation::{MutationError, Transaction};

/// A locally staged transaction, tagged with its local sequence number.
#[derive(Debug, Clone)]
pub struct PendingMutation {
    pub seq: u64,
    pub transaction: Transaction,
}

/// State transition notifications, returned by the mutating methods and
/// forwarded to consumers by the pair layer.
#[derive(Debug, Clone)]
pub enum DocumentEvent {
    /// A transaction was applied in the normal order of things. `remote`
    /// distinguishes foreign mutations from locally staged ones.
    Mutation {
        transaction_id: String,
        document: Option<Value>,
        remote: bool,
    },
    /// The optimistic value was recomputed because the order of mutations
    /// changed relative to the optimistic prediction.
    Rebase { document: Option<Value> },
    /// A staged transaction could not be replayed on the new authoritative
    /// state and was discarded. Non-fatal.
    StalePatch {
        transaction_id: String,
        error: MutationError,
    },
    /// The consistency flag flipped. Consistent means no unresolved local
    /// or unapplicable remote transactions remain.
    Consistency { consistent: bool },
}

#[derive(Debug)]
pub struct BufferedDocument {
    id: String,
    head: Option<Value>,
    edge: Option<Value>,
    incoming: Vec<Transaction>,
    submitted: VecDeque<Transaction>,
    pending: VecDeque<PendingMutation>,
    next_seq: u64,
    consistent: bool,
}

impl BufferedDocument {
    pub fn new(id: impl Into<String>, snapshot: Option<Value>) -> Self {
        Self {
            id: id.into(),
            head: snapshot.clone(),
            edge: snapshot,
            incoming: Vec::new(),
            submitted: VecDeque::new(),
            pending: VecDeque::new(),
            next_seq: 0,
            consistent: true,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Last authoritative state.
    pub fn head(&self) -> Option<&Value> {
        self.head.as_ref()
    }

    /// Optimistic state shown to consumers.
    pub fn edge(&self) -> Option<&Value> {
        self.edge.as_ref()
    }

    pub fn is_consistent(&self) -> bool {
        self.consistent
    }

    pub fn has_unresolved(&self) -> bool {
        !self.submitted.is_empty() || !self.pending.is_empty()
    }

    /// Replace all state with a fresh authoritative snapshot, discarding
    /// every queued transaction. Used on subscription (re)start.
    pub fn reset(&mut self, snapshot: Option<Value>) -> Vec<DocumentEvent> {
        let mut events = Vec::new();
        let changed = !equal_ignoring_rev(&self.edge, &snapshot);
        self.incoming.clear();
        self.submitted.clear();
        self.pending.clear();
        self.head = snapshot.clone();
        self.edge = snapshot;
        if changed {
            events.push(DocumentEvent::Rebase { document: self.edge.clone() });
        }
        self.update_consistency(&mut events);
        events
    }

    /// Feed one authoritative transaction event from the listener.
    pub fn arrive(&mut self, transaction: Transaction) -> Vec<DocumentEvent> {
        let mut events = Vec::new();
        self.incoming.push(transaction);
        self.consider_incoming(&mut events);
        self.update_consistency(&mut events);
        events
    }

    /// Optimistically apply a local transaction and queue it for
    /// confirmation. Rejects without staging anything if the transaction
    /// does not apply to the current optimistic state.
    pub fn stage(&mut self, transaction: Transaction) -> Result<Vec<DocumentEvent>, MutationError> {
        let next_edge = transaction.apply_to(&self.id, self.edge.as_ref())?;
        let transaction_id = transaction.transaction_id.clone();
        debug!(txn = %transaction_id, doc = %self.id, "staging local transaction");

        self.edge = next_edge;
        let seq = self.next_seq;
        self.next_seq += 1;
        self.pending.push_back(PendingMutation { seq, transaction });

        let mut events = vec![DocumentEvent::Mutation {
            transaction_id,
            document: self.edge.clone(),
            remote: false,
        }];
        self.update_consistency(&mut events);
        Ok(events)
    }

    /// The submission for `transaction_id` was accepted by the authority;
    /// promote it from `pending` to `submitted`.
    pub fn submission_succeeded(&mut self, transaction_id: &str) -> Vec<DocumentEvent> {
        let mut events = Vec::new();
        if self.pending.is_empty() {
            // Probably already confirmed through the listener.
            self.update_consistency(&mut events);
            return events;
        }
        let in_order = self
            .pending
            .front()
            .is_some_and(|p| p.transaction.transaction_id == transaction_id);
        if in_order {
            if let Some(first) = self.pending.pop_front() {
                self.submitted.push_back(first.transaction);
            }
        } else {
            // Accepted out of order; the authority may serialize it after
            // transactions we predicted it before, so recompute EDGE.
            debug!(txn = %transaction_id, doc = %self.id, "submission accepted out of order");
            if let Some(position) = self
                .pending
                .iter()
                .position(|p| p.transaction.transaction_id == transaction_id)
            {
                if let Some(entry) = self.pending.remove(position) {
                    self.submitted.push_back(entry.transaction);
                }
            }
            self.rebase(&mut events);
        }
        self.update_consistency(&mut events);
        events
    }

    /// The submission for `transaction_id` was rejected; roll the
    /// optimistic state back.
    pub fn submission_failed(&mut self, transaction_id: &str) -> Vec<DocumentEvent> {
        warn!(txn = %transaction_id, doc = %self.id, "submission failed, reverting optimistic state");
        let mut events = Vec::new();
        self.pending.retain(|p| p.transaction.transaction_id != transaction_id);
        self.rebase(&mut events);
        self.update_consistency(&mut events);
        events
    }

    // ── Internals ────────────────────────────────────────────────────────

    /// Apply every incoming transaction that lines up with HEAD, in event
    /// order, rebasing afterwards if anything arrived out of the predicted
    /// order.
    fn consider_incoming(&mut self, events: &mut Vec<DocumentEvent>) {
        // Events older than the snapshot they arrive against are echoes of
        // state the snapshot already contains.
        if let Some(updated_at) = self.head.as_ref().and_then(meta::updated_at) {
            let updated_at = updated_at.to_string();
            self.incoming.retain(|txn| match txn.timestamp.as_deref() {
                Some(ts) => ts >= updated_at.as_str(),
                None => true,
            });
        }

        let mut must_rebase = false;
        let mut protect = 0;
        loop {
            let position = match self.head.as_ref() {
                Some(head) => {
                    let rev = meta::revision(head);
                    self.incoming
                        .iter()
                        .position(|txn| txn.previous_rev.as_deref() == rev)
                }
                None => self
                    .incoming
                    .iter()
                    .position(Transaction::applies_to_missing_document),
            };
            let Some(position) = position else { break };
            let transaction = self.incoming.remove(position);
            must_rebase |= self.apply_incoming(transaction, events);

            protect += 1;
            if protect > 10 {
                warn!(doc = %self.id, "stuck flushing incoming transactions");
                break;
            }
        }

        if !self.incoming.is_empty() {
            debug!(
                doc = %self.id,
                count = self.incoming.len(),
                "incoming transactions buffered awaiting an intermediate event"
            );
        }

        if must_rebase {
            self.rebase(events);
        }
    }

    /// Apply one prequalified incoming transaction to HEAD. Returns true if
    /// a rebase is required.
    fn apply_incoming(&mut self, transaction: Transaction, events: &mut Vec<DocumentEvent>) -> bool {
        debug!(
            txn = %transaction.transaction_id,
            doc = %self.id,
            prev = ?transaction.previous_rev,
            result = ?transaction.result_rev,
            "applying remote transaction"
        );
        match transaction.apply_to(&self.id, self.head.as_ref()) {
            Ok(next) => self.head = next,
            Err(error) => {
                // The authority is the source of truth; an inapplicable
                // authoritative event means our HEAD diverged. Skip it and
                // let the next snapshot reset recover.
                warn!(
                    txn = %transaction.transaction_id,
                    doc = %self.id,
                    %error,
                    "authoritative transaction failed to apply, skipping"
                );
                return false;
            }
        }

        if self.has_unresolved() {
            return self.consume_unresolved(&transaction.transaction_id);
        }

        self.edge = self.head.clone();
        events.push(DocumentEvent::Mutation {
            transaction_id: transaction.transaction_id,
            document: self.edge.clone(),
            remote: true,
        });
        false
    }

    /// Remove the confirmed transaction from the unresolved queues. Returns
    /// true when it was not the next expected confirmation, meaning our
    /// optimistic ordering was wrong and EDGE must be rebased.
    fn consume_unresolved(&mut self, transaction_id: &str) -> bool {
        if let Some(first) = self.submitted.front() {
            if first.transaction_id == transaction_id {
                self.submitted.pop_front();
                return false;
            }
        } else if let Some(first) = self.pending.front() {
            if first.transaction.transaction_id == transaction_id {
                self.pending.pop_front();
                return false;
            }
        }
        debug!(
            txn = %transaction_id,
            doc = %self.id,
            pending = self.pending.len(),
            submitted = self.submitted.len(),
            "confirmation out of order, scrubbing queues"
        );
        self.submitted.retain(|t| t.transaction_id != transaction_id);
        self.pending.retain(|p| p.transaction.transaction_id != transaction_id);
        true
    }

    /// Recompute EDGE from HEAD plus every unresolved transaction, dropping
    /// the ones that no longer apply.
    fn rebase(&mut self, events: &mut Vec<DocumentEvent>) {
        let old_edge = self.edge.clone();
        let mut next = self.head.clone();

        let mut submitted = VecDeque::new();
        for transaction in std::mem::take(&mut self.submitted) {
            match transaction.apply_to(&self.id, next.as_ref()) {
                Ok(value) => {
                    next = value;
                    submitted.push_back(transaction);
                }
                Err(error) => {
                    warn!(
                        txn = %transaction.transaction_id,
                        doc = %self.id,
                        %error,
                        "submitted transaction no longer applies, dropping"
                    );
                    events.push(DocumentEvent::StalePatch {
                        transaction_id: transaction.transaction_id,
                        error,
                    });
                }
            }
        }
        self.submitted = submitted;

        let mut pending = VecDeque::new();
        for entry in std::mem::take(&mut self.pending) {
            match entry.transaction.apply_to(&self.id, next.as_ref()) {
                Ok(value) => {
                    next = value;
                    pending.push_back(entry);
                }
                Err(error) => {
                    warn!(
                        txn = %entry.transaction.transaction_id,
                        doc = %self.id,
                        %error,
                        "pending transaction no longer applies, dropping"
                    );
                    events.push(DocumentEvent::StalePatch {
                        transaction_id: entry.transaction.transaction_id,
                        error,
                    });
                }
            }
        }
        self.pending = pending;

        self.edge = next;
        if !equal_ignoring_rev(&old_edge, &self.edge) {
            events.push(DocumentEvent::Rebase { document: self.edge.clone() });
        }
    }

    fn update_consistency(&mut self, events: &mut Vec<DocumentEvent>) {
        let consistent =
            self.pending.is_empty() && self.submitted.is_empty() && self.incoming.is_empty();
        if consistent != self.consistent {
            debug!(doc = %self.id, consistent, "consistency changed");
            self.consistent = consistent;
            events.push(DocumentEvent::Consistency { consistent });
        }
    }
}

/// Value equality that ignores the `_rev` bookkeeping field: rebases care
/// about content, not about which revision token happens to be stamped.
fn equal_ignoring_rev(a: &Option<Value>, b: &Option<Value>) -> bool {
    fn strip(value: &Option<Value>) -> Option<Value> {
        let mut copy = value.clone();
        if let Some(object) = copy.as_mut().and_then(Value::as_object_mut) {
            object.remove(meta::REV_FIELD);
        }
        copy
    }
    strip(a) == strip(b)
}
