//! The intermediate representation: a hash-consed, arena-allocated node
//! graph with structural sharing.
//!
//! Pipeline position:
//! ```text
//! source → syntax (placeholders) → bind → infer → lower_tailcalls → spv
//! ```
//! Each pass reads one arena and builds into a fresh one; the node graph is
//! an acyclic DAG apart from continuation names, which the binder resolves.

pub mod arena;
pub mod build;
pub mod node;
pub mod print;
pub mod ty;

pub use arena::{ArenaConfig, IrArena, NodeList, StrId, StrList};
pub use node::{Node, NodeData, NodeKind};
