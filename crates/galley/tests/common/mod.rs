//! Shared test support: an in-memory remote authority with per-id listener
//! channels and serialized, atomically-applied transactions.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::mpsc;

use galley::meta;
use galley::mutation::Transaction;
use galley::remote::{ListenerEvent, RemoteAuthority, RemoteError};

#[derive(Default)]
struct Store {
    documents: HashMap<String, Value>,
    listeners: HashMap<String, Vec<mpsc::UnboundedSender<ListenerEvent>>>,
}

/// A remote authority living in process memory. Transactions are applied
/// atomically under one lock; every touched id gets a per-id event carrying
/// that document's previous and new revision.
#[derive(Default)]
pub struct MemoryAuthority {
    store: Mutex<Store>,
    rev_counter: AtomicU64,
}

impl MemoryAuthority {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn next_rev(&self) -> String {
        format!("r{}", self.rev_counter.fetch_add(1, Ordering::SeqCst) + 1)
    }

    /// Put a document into the store directly, stamping a revision. No
    /// events are emitted; seed before checking out.
    pub fn seed(&self, mut document: Value) {
        let rev = self.next_rev();
        meta::set_revision(&mut document, &rev);
        let id = meta::document_id(&document).expect("seed document needs an _id").to_string();
        self.store.lock().unwrap().documents.insert(id, document);
    }

    pub fn document(&self, id: &str) -> Option<Value> {
        self.store.lock().unwrap().documents.get(id).cloned()
    }

    fn apply_transaction(&self, transaction: Transaction) -> Result<(), RemoteError> {
        let mut store = self.store.lock().unwrap();

        // Validate and compute every document's next state before touching
        // the store: the batch applies atomically or not at all.
        let mut next_states: Vec<(String, Option<Value>)> = Vec::new();
        for id in transaction.document_ids() {
            let current = store.documents.get(id);
            let next = transaction.apply_to(id, current)?;
            next_states.push((id.to_string(), next));
        }
        for mutation in &transaction.mutations {
            mutation.validate()?;
        }

        let result_rev = self.next_rev();
        for (id, next) in next_states {
            let previous_rev = store.documents.get(&id).and_then(meta::revision).map(String::from);
            match next {
                Some(mut document) => {
                    meta::set_revision(&mut document, &result_rev);
                    store.documents.insert(id.clone(), document);
                }
                None => {
                    if previous_rev.is_none() {
                        // Deleting what never existed is invisible; emitting
                        // an event for it would wedge subscribers that hold
                        // no snapshot.
                        continue;
                    }
                    store.documents.remove(&id);
                }
            }

            let event = Transaction {
                transaction_id: transaction.transaction_id.clone(),
                previous_rev,
                result_rev: Some(result_rev.clone()),
                timestamp: transaction.timestamp.clone(),
                mutations: transaction
                    .mutations
                    .iter()
                    .filter(|m| m.document_id() == Some(id.as_str()))
                    .cloned()
                    .collect(),
            };
            if let Some(subscribers) = store.listeners.get_mut(&id) {
                subscribers.retain(|tx| tx.send(ListenerEvent::Mutation(event.clone())).is_ok());
            }
        }
        Ok(())
    }
}

impl RemoteAuthority for MemoryAuthority {
    fn listen(&self, id: &str) -> mpsc::UnboundedReceiver<ListenerEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut store = self.store.lock().unwrap();
        let _ = tx.send(ListenerEvent::Snapshot {
            id: id.to_string(),
            document: store.documents.get(id).cloned(),
        });
        store.listeners.entry(id.to_string()).or_default().push(tx);
        rx
    }

    async fn submit(&self, transaction: Transaction) -> Result<(), RemoteError> {
        self.apply_transaction(transaction)
    }
}

/// Wraps a [`MemoryAuthority`] and fails submissions with a transport error
/// while the switch is on. Listening always delegates.
pub struct FlakyAuthority {
    pub inner: Arc<MemoryAuthority>,
    pub failing: AtomicBool,
}

impl FlakyAuthority {
    pub fn new(inner: Arc<MemoryAuthority>) -> Arc<Self> {
        Arc::new(Self { inner, failing: AtomicBool::new(false) })
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

impl RemoteAuthority for FlakyAuthority {
    fn listen(&self, id: &str) -> mpsc::UnboundedReceiver<ListenerEvent> {
        self.inner.listen(id)
    }

    async fn submit(&self, transaction: Transaction) -> Result<(), RemoteError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(RemoteError::Transport("injected failure".to_string()));
        }
        self.inner.submit(transaction).await
    }
}

/// Install a test-writer subscriber so engine traces show up in failing
/// test output. Safe to call from every test; only the first wins.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// Poll `condition` until it holds or the timeout expires.
pub async fn settle(description: &str, mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("timed out waiting for: {description}");
}
