//! Dirty-node write-back on cache eviction.

use crate::node::Node;
use crate::stream::{FixedWidth, NodeStream};
use arbor_cache::EvictionObserver;
use std::cell::RefCell;
use std::io::{Read, Seek, Write};
use std::rc::Rc;
use tracing::error;

/// Writes evicted nodes back to the stream.
///
/// The flusher shares the tree's stream handle and acts as the node
/// cache's eviction observer: every dirty evictee is written to its
/// offset before its memory is released. Eviction happens inside cache
/// operations that cannot themselves return an error, so the first
/// failed write is latched here and surfaced by the next tree operation,
/// poisoning the tree.
///
/// Disarming the flusher turns write-back off; `clear` uses this to drop
/// resident state without persisting it.
pub struct NodeFlusher<S> {
    stream: Rc<RefCell<NodeStream<S>>>,
    armed: bool,
    error: Option<String>,
}

impl<S: Read + Write + Seek> NodeFlusher<S> {
    pub fn new(stream: Rc<RefCell<NodeStream<S>>>) -> Self {
        Self {
            stream,
            armed: true,
            error: None,
        }
    }

    pub fn set_armed(&mut self, armed: bool) {
        self.armed = armed;
    }

    /// Returns the latched failure of an earlier eviction write, if any.
    pub fn check(&self) -> arbor_common::Result<()> {
        match &self.error {
            Some(message) => Err(arbor_common::ArborError::FlushFailed(message.clone())),
            None => Ok(()),
        }
    }
}

impl<K, V, S> EvictionObserver<u64, Node<K, V>> for NodeFlusher<S>
where
    K: FixedWidth + Ord,
    V: FixedWidth,
    S: Read + Write + Seek,
{
    fn evicted(&mut self, offset: &u64, mut node: Node<K, V>) {
        if !self.armed || self.error.is_some() {
            return;
        }
        let mut stream = self.stream.borrow_mut();
        if let Err(e) = node.save_to(&mut stream, *offset) {
            error!(offset, error = %e, "failed to flush evicted node");
            self.error = Some(e.to_string());
        }
    }
}
