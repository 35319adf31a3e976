//! galley-json-match: declarative path expressions for JSON documents.
//!
//! Parses expressions such as `a.b[2]`, `items[_key=="x"].title` and
//! `..[p=="Y"].a` into segment lists, and resolves them against a
//! `serde_json::Value` to a set of concrete attribute or index targets.
//! Resolution is read-only; applying operations to the resolved targets is
//! the job of the `galley` crate.

pub mod parser;
pub mod resolve;
pub mod types;
pub mod util;

pub use parser::{PathParser, PathSyntaxError};
pub use resolve::{locate, resolve, ResolveError, Step, Target, Trace};
pub use types::{Path, Segment, KEY_FIELD};
