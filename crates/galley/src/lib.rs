//! galley: structured mutation and draft/published synchronization for
//! JSON documents.
//!
//! Many independent clients describe edits as small composable patch
//! operations addressed by declarative path expressions (the
//! `galley-json-match` crate). Patches wrap into document-level mutations
//! with optimistic concurrency guards, and a document-pair layer keeps a
//! mutable draft and a publish-gated published version synchronized against
//! a remote authority under live reconciliation.
//!
//! Layering, leaves first:
//!
//! - [`patch`]: the operation set and the all-or-nothing applier
//! - [`mutation`]: mutation kinds, transactions, store semantics
//! - [`document`]: per-id optimistic buffering and rebase
//! - [`pair`]: draft/published pairs and the operations API
//! - [`remote`]: the authority boundary (listen + submit)

pub mod document;
pub mod meta;
pub mod mutation;
pub mod pair;
pub mod patch;
pub mod remote;
pub mod util;

pub use document::{BufferedDocument, DocumentEvent, PendingMutation};
pub use mutation::{Mutation, MutationError, MutationOptions, Transaction};
pub use pair::{
    checkout_pair, DocumentPair, DocumentVariant, IdPair, Operation, OperationError, PairConfig,
    PairEvent, PairState, DRAFTS_PREFIX,
};
pub use patch::{apply_patch, apply_patches, InsertPosition, Patch, PatchError};
pub use remote::{ListenerEvent, RemoteAuthority, RemoteError};

pub use galley_json_match as json_match;
pub use galley_json_match::{Path, PathSyntaxError, Segment};
