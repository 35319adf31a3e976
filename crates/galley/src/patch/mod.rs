//! The patch operation set: declarative edits addressed by path
//! expressions, applied all-or-nothing per mutation.

pub mod apply;
mod codec;
pub mod text_patch;
pub mod types;

pub use apply::{apply_patch, apply_patches};
pub use types::{InsertPosition, Patch, PatchError};
