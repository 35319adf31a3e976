//! Document-level mutations.
//!
//! A [`Mutation`] wraps a patch list (or an initial document body) into one
//! of the store's change kinds; a [`Transaction`] is the ordered batch the
//! remote authority applies atomically, and the unit the listener reports
//! back. `apply`/`apply_to` model the authority's semantics locally so the
//! same code drives both optimistic application and test authorities.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::meta;
use crate::patch::{apply_patches, Patch, PatchError};
use crate::util;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum MutationError {
    #[error("document `{id}` already exists")]
    AlreadyExists { id: String },
    #[error("create mutation document is missing `_id`")]
    MissingId,
    #[error("patch mutation targets missing document `{id}`")]
    MissingDocument { id: String },
    #[error("revision conflict on `{id}`: expected `{expected}`, found {actual:?}")]
    RevisionConflict { id: String, expected: String, actual: Option<String> },
    #[error(transparent)]
    Patch(#[from] PatchError),
}

/// Optimistic-concurrency options carried by `patch`/`delete`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MutationOptions {
    #[serde(rename = "ifRevision", default, skip_serializing_if = "Option::is_none")]
    pub if_revision: Option<String>,
}

impl MutationOptions {
    pub fn if_revision(rev: impl Into<String>) -> Self {
        Self { if_revision: Some(rev.into()) }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatchMutation {
    pub id: String,
    pub patches: Vec<Patch>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<MutationOptions>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeleteMutation {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<MutationOptions>,
}

/// One document-level change request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Mutation {
    /// Create; fails if the document already exists.
    Create(Value),
    /// Create unless the document exists, in which case it is a no-op.
    CreateIfNotExists(Value),
    /// Create or overwrite unconditionally.
    CreateOrReplace(Value),
    /// Apply a patch list, optionally guarded by `ifRevision`.
    Patch(PatchMutation),
    /// Remove the document, optionally guarded by `ifRevision`.
    Delete(DeleteMutation),
}

impl Mutation {
    pub fn patch(id: impl Into<String>, patches: Vec<Patch>) -> Self {
        Mutation::Patch(PatchMutation { id: id.into(), patches, options: None })
    }

    pub fn patch_if_revision(
        id: impl Into<String>,
        patches: Vec<Patch>,
        rev: impl Into<String>,
    ) -> Self {
        Mutation::Patch(PatchMutation {
            id: id.into(),
            patches,
            options: Some(MutationOptions::if_revision(rev)),
        })
    }

    pub fn delete(id: impl Into<String>) -> Self {
        Mutation::Delete(DeleteMutation { id: id.into(), options: None })
    }

    pub fn delete_if_revision(id: impl Into<String>, rev: impl Into<String>) -> Self {
        Mutation::Delete(DeleteMutation {
            id: id.into(),
            options: Some(MutationOptions::if_revision(rev)),
        })
    }

    /// The id of the document this mutation addresses. `None` for create
    /// bodies that lack an `_id` (rejected by [`Mutation::validate`]).
    pub fn document_id(&self) -> Option<&str> {
        match self {
            Mutation::Create(doc)
            | Mutation::CreateIfNotExists(doc)
            | Mutation::CreateOrReplace(doc) => meta::document_id(doc),
            Mutation::Patch(p) => Some(&p.id),
            Mutation::Delete(d) => Some(&d.id),
        }
    }

    pub fn is_create(&self) -> bool {
        matches!(
            self,
            Mutation::Create(_) | Mutation::CreateIfNotExists(_) | Mutation::CreateOrReplace(_)
        )
    }

    /// Structural checks a submission endpoint performs before applying.
    pub fn validate(&self) -> Result<(), MutationError> {
        if self.document_id().is_none() {
            return Err(MutationError::MissingId);
        }
        Ok(())
    }

    /// Model the store's application semantics: given the current snapshot
    /// of the addressed document, produce the next one. `None` means the
    /// document does not exist.
    pub fn apply(&self, current: Option<&Value>) -> Result<Option<Value>, MutationError> {
        match self {
            Mutation::Create(doc) => match current {
                Some(_) => Err(MutationError::AlreadyExists {
                    id: self.document_id().unwrap_or_default().to_string(),
                }),
                None => Ok(Some(doc.clone())),
            },
            Mutation::CreateIfNotExists(doc) => match current {
                Some(existing) => Ok(Some(existing.clone())),
                None => Ok(Some(doc.clone())),
            },
            Mutation::CreateOrReplace(doc) => Ok(Some(doc.clone())),
            Mutation::Patch(p) => {
                let existing = current.ok_or_else(|| MutationError::MissingDocument {
                    id: p.id.clone(),
                })?;
                check_revision(&p.id, &p.options, existing)?;
                Ok(Some(apply_patches(existing, &p.patches)?))
            }
            Mutation::Delete(d) => {
                if let Some(existing) = current {
                    check_revision(&d.id, &d.options, existing)?;
                }
                Ok(None)
            }
        }
    }
}

fn check_revision(
    id: &str,
    options: &Option<MutationOptions>,
    current: &Value,
) -> Result<(), MutationError> {
    let Some(expected) = options.as_ref().and_then(|o| o.if_revision.as_deref()) else {
        return Ok(());
    };
    let actual = meta::revision(current);
    if actual != Some(expected) {
        return Err(MutationError::RevisionConflict {
            id: id.to_string(),
            expected: expected.to_string(),
            actual: actual.map(str::to_string),
        });
    }
    Ok(())
}

/// An ordered mutation batch, applied atomically by the remote authority.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub transaction_id: String,
    /// Revision of the addressed document before this transaction, set by
    /// the authority on listener events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_rev: Option<String>,
    /// Revision after this transaction, set by the authority.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_rev: Option<String>,
    /// Authority timestamp (RFC 3339), used to discard events older than
    /// the snapshot they arrive against.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    pub mutations: Vec<Mutation>,
}

impl Transaction {
    pub fn new(mutations: Vec<Mutation>) -> Self {
        Self {
            transaction_id: util::transaction_id(),
            previous_rev: None,
            result_rev: None,
            timestamp: None,
            mutations,
        }
    }

    /// Distinct document ids this transaction touches, in first-seen order.
    pub fn document_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = Vec::new();
        for mutation in &self.mutations {
            if let Some(id) = mutation.document_id() {
                if !ids.contains(&id) {
                    ids.push(id);
                }
            }
        }
        ids
    }

    pub fn touches(&self, id: &str) -> bool {
        self.mutations.iter().any(|m| m.document_id() == Some(id))
    }

    /// True when this transaction can start from a nonexistent document,
    /// i.e. its first mutation is a create variant.
    pub fn applies_to_missing_document(&self) -> bool {
        self.mutations.first().is_some_and(Mutation::is_create)
    }

    /// Apply the mutations addressing `id` to that document's snapshot,
    /// stamping the result with `result_rev` when the authority assigned
    /// one.
    pub fn apply_to(
        &self,
        id: &str,
        current: Option<&Value>,
    ) -> Result<Option<Value>, MutationError> {
        let mut state = current.cloned();
        let mut touched = false;
        for mutation in &self.mutations {
            if mutation.document_id() != Some(id) {
                continue;
            }
            touched = true;
            state = mutation.apply(state.as_ref())?;
        }
        if touched {
            if let (Some(doc), Some(rev)) = (state.as_mut(), self.result_rev.as_deref()) {
                meta::set_revision(doc, rev);
            }
        }
        Ok(state)
    }
}
