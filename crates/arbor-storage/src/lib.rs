//! arbor storage engine.
//!
//! This crate provides:
//! - A seekable byte stream abstraction with slot-array framing
//! - Inner and leaf node records with change-mask dirty tracking
//! - Write-back of dirty nodes on cache eviction
//! - The B+ tree engine: search, insert with splits, lazy faulting,
//!   forward/reverse cursors, and compaction

mod compact;
mod cursor;
mod flush;
mod node;
mod stream;
mod tree;

pub use cursor::{Cursor, RevCursor};
pub use flush::NodeFlusher;
pub use node::{InnerNode, LeafNode, Node, SLOT_COUNT};
pub use stream::{FixedWidth, NodeStream};
pub use tree::BPlusTree;
