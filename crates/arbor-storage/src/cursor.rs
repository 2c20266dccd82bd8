//! Cursors over the leaf chain.
//!
//! A cursor names a slot as `(leaf offset, slot index)`; the end cursor
//! has a zero leaf offset. Moving a cursor walks the sibling links,
//! faulting leaves in as needed, so every cursor operation can touch the
//! stream and therefore returns `Result`. A cursor borrows the tree
//! mutably for its lifetime; any other mutation of the tree first drops
//! the cursor, which is the invalidation rule the borrow checker
//! enforces at compile time.

use crate::stream::FixedWidth;
use crate::tree::BPlusTree;
use arbor_common::Result;
use std::io::{Read, Seek, Write};

fn step_next<K, V, S>(
    tree: &mut BPlusTree<K, V, S>,
    leaf: u64,
    slot: u8,
) -> Result<(u64, u8)>
where
    K: FixedWidth + Ord,
    V: FixedWidth,
    S: Read + Write + Seek,
{
    let (used, next) = {
        let node = tree.leaf_mut(leaf)?;
        (node.used, node.next)
    };
    if slot + 1 < used {
        return Ok((leaf, slot + 1));
    }
    if next == 0 {
        return Ok((0, 0));
    }
    tree.ensure_resident(next, 0)?;
    Ok((next, 0))
}

fn step_prev<K, V, S>(
    tree: &mut BPlusTree<K, V, S>,
    leaf: u64,
    slot: u8,
) -> Result<(u64, u8)>
where
    K: FixedWidth + Ord,
    V: FixedWidth,
    S: Read + Write + Seek,
{
    if slot > 0 {
        return Ok((leaf, slot - 1));
    }
    let prev = tree.leaf_mut(leaf)?.prev;
    if prev == 0 {
        return Ok((0, 0));
    }
    let used = tree.leaf_mut(prev)?.used;
    Ok((prev, used - 1))
}

/// Forward cursor, ascending key order.
pub struct Cursor<'t, K, V, S>
where
    K: FixedWidth + Ord,
    V: FixedWidth,
    S: Read + Write + Seek,
{
    tree: &'t mut BPlusTree<K, V, S>,
    leaf: u64,
    slot: u8,
}

impl<'t, K, V, S> Cursor<'t, K, V, S>
where
    K: FixedWidth + Ord,
    V: FixedWidth,
    S: Read + Write + Seek,
{
    pub(crate) fn new(tree: &'t mut BPlusTree<K, V, S>, leaf: u64, slot: u8) -> Self {
        Self { tree, leaf, slot }
    }

    pub(crate) fn end(tree: &'t mut BPlusTree<K, V, S>) -> Self {
        Self {
            tree,
            leaf: 0,
            slot: 0,
        }
    }

    /// Returns true when the cursor is past the last slot.
    pub fn is_end(&self) -> bool {
        self.leaf == 0
    }

    /// Key at the cursor. Must not be called on the end cursor.
    pub fn key(&mut self) -> Result<K> {
        debug_assert!(!self.is_end());
        let slot = self.slot as usize;
        Ok(self.tree.leaf_mut(self.leaf)?.keys[slot])
    }

    /// Value at the cursor. Must not be called on the end cursor.
    pub fn value(&mut self) -> Result<V> {
        debug_assert!(!self.is_end());
        let slot = self.slot as usize;
        Ok(self.tree.leaf_mut(self.leaf)?.data[slot])
    }

    /// Assigns the value at the cursor, marking the slot dirty.
    pub fn set(&mut self, value: V) -> Result<()> {
        debug_assert!(!self.is_end());
        let slot = self.slot as usize;
        let leaf = self.tree.leaf_mut(self.leaf)?;
        leaf.data[slot] = value;
        leaf.data_changes |= 1 << slot;
        Ok(())
    }

    /// Moves to the next key. Returns false once the end is reached.
    pub fn advance(&mut self) -> Result<bool> {
        if self.is_end() {
            return Ok(false);
        }
        let (leaf, slot) = step_next(self.tree, self.leaf, self.slot)?;
        self.leaf = leaf;
        self.slot = slot;
        Ok(!self.is_end())
    }

    /// Moves to the previous key. Returns false once the front is passed.
    pub fn retreat(&mut self) -> Result<bool> {
        if self.is_end() {
            return Ok(false);
        }
        let (leaf, slot) = step_prev(self.tree, self.leaf, self.slot)?;
        self.leaf = leaf;
        self.slot = slot;
        Ok(!self.is_end())
    }
}

/// Reverse cursor, descending key order.
pub struct RevCursor<'t, K, V, S>
where
    K: FixedWidth + Ord,
    V: FixedWidth,
    S: Read + Write + Seek,
{
    tree: &'t mut BPlusTree<K, V, S>,
    leaf: u64,
    slot: u8,
}

impl<'t, K, V, S> RevCursor<'t, K, V, S>
where
    K: FixedWidth + Ord,
    V: FixedWidth,
    S: Read + Write + Seek,
{
    pub(crate) fn new(tree: &'t mut BPlusTree<K, V, S>, leaf: u64, slot: u8) -> Self {
        Self { tree, leaf, slot }
    }

    pub(crate) fn end(tree: &'t mut BPlusTree<K, V, S>) -> Self {
        Self {
            tree,
            leaf: 0,
            slot: 0,
        }
    }

    /// Returns true when the cursor is past the first slot.
    pub fn is_end(&self) -> bool {
        self.leaf == 0
    }

    /// Key at the cursor. Must not be called on the end cursor.
    pub fn key(&mut self) -> Result<K> {
        debug_assert!(!self.is_end());
        let slot = self.slot as usize;
        Ok(self.tree.leaf_mut(self.leaf)?.keys[slot])
    }

    /// Value at the cursor. Must not be called on the end cursor.
    pub fn value(&mut self) -> Result<V> {
        debug_assert!(!self.is_end());
        let slot = self.slot as usize;
        Ok(self.tree.leaf_mut(self.leaf)?.data[slot])
    }

    /// Moves to the next smaller key. Returns false at the end.
    pub fn advance(&mut self) -> Result<bool> {
        if self.is_end() {
            return Ok(false);
        }
        let (leaf, slot) = step_prev(self.tree, self.leaf, self.slot)?;
        self.leaf = leaf;
        self.slot = slot;
        Ok(!self.is_end())
    }

    /// Moves back toward larger keys. Returns false at the end.
    pub fn retreat(&mut self) -> Result<bool> {
        if self.is_end() {
            return Ok(false);
        }
        let (leaf, slot) = step_next(self.tree, self.leaf, self.slot)?;
        self.leaf = leaf;
        self.slot = slot;
        Ok(!self.is_end())
    }
}
