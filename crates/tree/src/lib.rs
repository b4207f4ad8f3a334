//! Owned instance-tree type and its core operations: `parse`, `merge`,
//! `diff`, `validate`, and `walk`. Every other crate in the workspace
//! treats this tree as its shared in-memory representation of YANG-modeled
//! configuration and operational data.

pub mod diff;
pub mod merge;
pub mod node;
pub mod ptr;
pub mod schema;
pub mod ser;
pub mod validate;
pub mod value;
pub mod walker;

pub use diff::{diff, Anchor, DiffEntry, DiffOp};
pub use merge::{merge, MergeError, Op, OpMap};
pub use node::{Children, Node, Tree};
pub use ptr::{ParseError, Pointer, Token};
pub use schema::{ModuleSchema, NodeKind, SchemaContext, SchemaNode};
pub use ser::{from_flat_values, parse, serialize, to_flat_values, SerError};
pub use validate::{validate, ValidationError};
pub use value::{FlatValue, Value};
pub use walker::{walk, walk_leaves};
