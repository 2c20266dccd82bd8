//! On-disk B+ tree engine.
//!
//! The tree owns a byte stream and an LRU cache of resident nodes keyed
//! by stream offset. Inner nodes reference children by offset only; a
//! referenced node is either resident in the cache or faulted in from
//! the stream on first touch. The root, head, and tail nodes are pinned
//! in the cache for the lifetime of the tree. Modifications set change
//! masks on resident nodes; dirty nodes are written back when the cache
//! evicts them and when the tree closes.
//!
//! The engine is strictly single-threaded: every operation takes
//! `&mut self` and runs to completion on the caller's thread. Even
//! lookups mutate observable state (recency, faults), which is why there
//! are no `&self` accessors over the node set.

use crate::cursor::{Cursor, RevCursor};
use crate::flush::NodeFlusher;
use crate::node::{InnerNode, LeafNode, Node, SIBLING_NEXT, SIBLING_PREV, SLOT_COUNT};
use crate::stream::{FixedWidth, NodeStream};
use arbor_cache::{Counters, LruCache};
use arbor_common::{ArborError, Result, TreeConfig};
use std::cell::RefCell;
use std::io::{Read, Seek, Write};
use std::rc::Rc;
use tracing::{debug, trace};

pub(crate) const SIGNATURE: [u8; 2] = *b"B+";
pub(crate) const FLAG_COMPACT: u8 = 1;

const COUNT_OFFSET: u64 = 2;
const ROOT_LEVEL_OFFSET: u64 = 11;
const ROOT_OFFSET: u64 = 12;
const HEAD_OFFSET: u64 = 20;
const TAIL_OFFSET: u64 = 28;

/// First byte past the file header; node records start here.
pub(crate) const ITEMS_OFFSET: u64 = 36;

const CHANGED_COUNT: u8 = 1;
const CHANGED_ROOT: u8 = 2;
const CHANGED_HEAD: u8 = 4;
const CHANGED_TAIL: u8 = 8;
const CHANGED_ALL: u8 = CHANGED_COUNT | CHANGED_ROOT | CHANGED_HEAD | CHANGED_TAIL;

/// Result of one insertion descent.
struct Descent<K> {
    /// Leaf holding the key after the descent.
    leaf: u64,
    /// Slot of the key within that leaf.
    slot: u8,
    /// False when the key already existed.
    inserted: bool,
    /// Separator and new right node when the visited node split.
    split: Option<(K, u64)>,
}

/// Ordered key→value index over a seekable byte stream.
pub struct BPlusTree<K, V, S>
where
    K: FixedWidth + Ord,
    V: FixedWidth,
    S: Read + Write + Seek,
{
    pub(crate) stream: Rc<RefCell<NodeStream<S>>>,
    pub(crate) cache: LruCache<u64, Node<K, V>, NodeFlusher<S>>,
    /// Offset of the root node, 0 when the tree is empty.
    pub(crate) root: u64,
    /// Offset of the leftmost leaf.
    pub(crate) head: u64,
    /// Offset of the rightmost leaf.
    pub(crate) tail: u64,
    pub(crate) root_level: u8,
    /// Next allocation offset; monotone, never reclaimed.
    pub(crate) eof: u64,
    pub(crate) item_count: u64,
    /// Header fields that differ from the on-disk header.
    change_flags: u8,
    closed: bool,
}

impl<K, V, S> std::fmt::Debug for BPlusTree<K, V, S>
where
    K: FixedWidth + Ord,
    V: FixedWidth,
    S: Read + Write + Seek,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BPlusTree")
            .field("root", &self.root)
            .field("head", &self.head)
            .field("tail", &self.tail)
            .field("root_level", &self.root_level)
            .field("eof", &self.eof)
            .field("item_count", &self.item_count)
            .field("closed", &self.closed)
            .finish()
    }
}

impl<K, V, S> BPlusTree<K, V, S>
where
    K: FixedWidth + Ord,
    V: FixedWidth,
    S: Read + Write + Seek,
{
    /// Opens an index over `io`.
    ///
    /// `end_offset` is the current length of the stream; passing 0
    /// initializes a fresh index file. Fails with `BadSignature` when an
    /// existing file does not carry the index header, or with
    /// `Corruption` when header offsets are out of bounds.
    pub fn open(io: S, end_offset: u64, config: TreeConfig) -> Result<Self> {
        config.validate()?;
        let stream = Rc::new(RefCell::new(NodeStream::new(io)));
        let flusher = NodeFlusher::new(Rc::clone(&stream));
        let cache = LruCache::with_observer(config.cache_capacity, flusher);
        let mut tree = Self {
            stream,
            cache,
            root: 0,
            head: 0,
            tail: 0,
            root_level: 0,
            eof: ITEMS_OFFSET,
            item_count: 0,
            change_flags: CHANGED_ALL,
            closed: false,
        };
        if end_offset == 0 {
            tree.init_fresh()?;
        } else {
            tree.load_existing(end_offset)?;
        }
        Ok(tree)
    }

    fn init_fresh(&mut self) -> Result<()> {
        let mut stream = self.stream.borrow_mut();
        stream.seek(0)?;
        stream.write_all(&SIGNATURE)?;
        stream.write_u64(0)?; // item count
        stream.write_u8(0)?; // flags
        stream.write_u8(0)?; // root level
        stream.write_u64(0)?; // root offset
        stream.write_u64(0)?; // head offset
        stream.write_u64(0)?; // tail offset
        drop(stream);
        self.eof = ITEMS_OFFSET;
        self.change_flags = CHANGED_ALL;
        debug!("initialized fresh index file");
        Ok(())
    }

    fn load_existing(&mut self, end_offset: u64) -> Result<()> {
        self.eof = end_offset;

        let mut stream = self.stream.borrow_mut();
        stream.seek(0)?;
        let mut signature = [0u8; 2];
        stream.read_exact(&mut signature)?;
        if signature != SIGNATURE {
            return Err(ArborError::BadSignature);
        }
        let item_count = stream.read_u64()?;
        if item_count == 0 {
            drop(stream);
            self.change_flags = 0;
            debug!("opened empty index");
            return Ok(());
        }
        let flags = stream.read_u8()?;
        stream.set_compact(flags & FLAG_COMPACT != 0);
        let root_level = stream.read_u8()?;
        let root = stream.read_u64()?;
        if root == 0 || root >= end_offset {
            return Err(ArborError::corrupt(ROOT_OFFSET, "root offset out of bounds"));
        }
        let (head, tail) = if item_count > SLOT_COUNT as u64 {
            if root_level == 0 {
                return Err(ArborError::corrupt(
                    ROOT_LEVEL_OFFSET,
                    "multi-leaf index requires an inner root",
                ));
            }
            let head = stream.read_u64()?;
            let tail = stream.read_u64()?;
            if head == 0 || head >= end_offset || tail == 0 || tail >= end_offset {
                return Err(ArborError::corrupt(
                    HEAD_OFFSET,
                    "leaf chain offsets out of bounds",
                ));
            }
            (head, tail)
        } else {
            (root, root)
        };
        drop(stream);

        self.item_count = item_count;
        self.root = root;
        self.head = head;
        self.tail = tail;
        self.root_level = if item_count > SLOT_COUNT as u64 {
            root_level
        } else {
            0
        };
        self.change_flags = 0;

        self.ensure_resident(root, self.root_level)?;
        self.cache.lock(root);
        if head != root {
            self.ensure_resident(head, 0)?;
            self.cache.lock(head);
            self.ensure_resident(tail, 0)?;
            self.cache.lock(tail);
        }
        debug!(item_count, depth = self.depth(), "opened index");
        Ok(())
    }

    /// Number of keys in the index.
    pub fn len(&self) -> u64 {
        self.item_count
    }

    /// Returns true when the index holds no keys.
    pub fn is_empty(&self) -> bool {
        self.item_count == 0
    }

    /// Number of node levels, 0 for an empty tree and 1 for a single leaf.
    pub fn depth(&self) -> usize {
        if self.root == 0 {
            0
        } else {
            self.root_level as usize + 1
        }
    }

    /// Node cache access statistics.
    pub fn cache_stats(&self) -> &Counters {
        self.cache.stats()
    }

    /// Inserts `key` if absent and returns a cursor to its slot.
    ///
    /// Inserting a key that already exists returns a cursor to the
    /// existing slot without changing `len`. The value of a fresh slot
    /// is default-initialized; assign through [`Cursor::set`].
    pub fn insert(&mut self, key: K) -> Result<Cursor<'_, K, V, S>> {
        self.flush_check()?;
        debug_assert!(
            !self.stream.borrow().is_compact(),
            "compact index files are read-only"
        );

        if self.root == 0 {
            let offset = self.allocate(LeafNode::<K, V>::disk_size())?;
            let mut leaf = LeafNode::new();
            leaf.insert_at(0, key, V::default());
            self.install(offset, Node::Leaf(leaf))?;
            self.cache.lock(offset);
            self.root = offset;
            self.head = offset;
            self.tail = offset;
            self.root_level = 0;
            self.item_count = 1;
            self.change_flags = CHANGED_ALL;
            return Ok(Cursor::new(self, offset, 0));
        }

        let mut outcome = self.insert_descend(self.root, self.root_level, key)?;
        if let Some((separator, right)) = outcome.split.take() {
            self.grow_root(separator, right)?;
        }
        if outcome.inserted {
            self.item_count += 1;
            self.change_flags |= CHANGED_COUNT;
        }
        Ok(Cursor::new(self, outcome.leaf, outcome.slot))
    }

    /// Returns a cursor at the first slot in the reached leaf whose key
    /// is not less than `key`; the end cursor when the lower bound falls
    /// past that leaf's last slot.
    pub fn find(&mut self, key: K) -> Result<Cursor<'_, K, V, S>> {
        self.flush_check()?;
        match self.find_slot(key)? {
            Some((leaf, slot)) => Ok(Cursor::new(self, leaf, slot)),
            None => Ok(Cursor::end(self)),
        }
    }

    /// Looks up the value stored under exactly `key`.
    pub fn get(&mut self, key: K) -> Result<Option<V>> {
        self.flush_check()?;
        match self.find_slot(key)? {
            Some((offset, slot)) => {
                let leaf = self.leaf_mut(offset)?;
                if leaf.keys[slot as usize] == key {
                    Ok(Some(leaf.data[slot as usize]))
                } else {
                    Ok(None)
                }
            }
            None => Ok(None),
        }
    }

    /// Cursor at the smallest key.
    pub fn first(&mut self) -> Result<Cursor<'_, K, V, S>> {
        self.flush_check()?;
        if self.head == 0 {
            return Ok(Cursor::end(self));
        }
        let head = self.head;
        Ok(Cursor::new(self, head, 0))
    }

    /// Reverse cursor at the greatest key.
    pub fn last(&mut self) -> Result<RevCursor<'_, K, V, S>> {
        self.flush_check()?;
        if self.tail == 0 {
            return Ok(RevCursor::end(self));
        }
        let tail = self.tail;
        let slot = self.leaf_mut(tail)?.used - 1;
        Ok(RevCursor::new(self, tail, slot))
    }

    /// Removes `key`.
    pub fn erase(&mut self, _key: K) -> Result<()> {
        Err(ArborError::NotImplemented("erase"))
    }

    /// Removes every key in `[_from, _to)`.
    pub fn erase_range(&mut self, _from: K, _to: K) -> Result<()> {
        Err(ArborError::NotImplemented("erase_range"))
    }

    /// Drops all resident state and resets the index to empty.
    ///
    /// Nothing is flushed; the header item count is rewritten so the
    /// stream immediately reflects the empty index.
    pub fn clear(&mut self) -> Result<()> {
        if self.root != 0 {
            self.cache.observer_mut().set_armed(false);
            self.cache.reset();
            self.cache.observer_mut().set_armed(true);
            self.root = 0;
            self.head = 0;
            self.tail = 0;
            self.root_level = 0;
            self.eof = ITEMS_OFFSET;
        }
        self.item_count = 0;
        self.change_flags |= CHANGED_COUNT;
        let mut stream = self.stream.borrow_mut();
        stream.seek(COUNT_OFFSET)?;
        stream.write_u64(0)?;
        drop(stream);
        debug!("cleared index");
        Ok(())
    }

    /// Flushes every resident node and rewrites changed header fields.
    pub fn close(mut self) -> Result<()> {
        let result = self.close_mut();
        self.closed = true;
        result
    }

    fn close_mut(&mut self) -> Result<()> {
        self.cache.clear();
        self.flush_check()?;
        let mut stream = self.stream.borrow_mut();
        if self.change_flags & CHANGED_COUNT != 0 {
            stream.seek(COUNT_OFFSET)?;
            stream.write_u64(self.item_count)?;
        }
        if self.item_count > 0 {
            if self.change_flags & CHANGED_ROOT != 0 {
                stream.seek(ROOT_LEVEL_OFFSET)?;
                stream.write_u8(self.root_level)?;
                stream.seek(ROOT_OFFSET)?;
                stream.write_u64(self.root)?;
            }
            if self.change_flags & CHANGED_HEAD != 0 {
                stream.seek(HEAD_OFFSET)?;
                stream.write_u64(self.head)?;
            }
            if self.change_flags & CHANGED_TAIL != 0 {
                stream.seek(TAIL_OFFSET)?;
                stream.write_u64(self.tail)?;
            }
        }
        drop(stream);
        self.change_flags = 0;
        debug!(item_count = self.item_count, "closed index");
        Ok(())
    }

    /// Writes an indented rendering of the tree.
    ///
    /// Each inner node stays pinned while its subtree is walked, so the
    /// cache must have room for one node per level beyond the three
    /// permanent pins.
    pub fn dump<W: std::io::Write>(&mut self, out: &mut W) -> Result<()> {
        self.flush_check()?;
        if self.root != 0 {
            self.dump_node(out, self.root, self.root_level, 0)?;
        }
        Ok(())
    }

    fn dump_node<W: std::io::Write>(
        &mut self,
        out: &mut W,
        offset: u64,
        level: u8,
        indent: usize,
    ) -> Result<()> {
        let pad = " ".repeat(indent);
        if level == 0 {
            let keys = {
                let leaf = self.leaf_mut(offset)?;
                leaf.keys[..leaf.used as usize].to_vec()
            };
            writeln!(out, "{}leaf @{} keys {:?}", pad, offset, keys)?;
            return Ok(());
        }
        let (keys, children) = {
            let inner = self.inner_mut(offset, level)?;
            (
                inner.keys[..inner.used as usize].to_vec(),
                inner.children[..inner.used as usize + 1].to_vec(),
            )
        };
        writeln!(out, "{}inner @{} level {} keys {:?}", pad, offset, level, keys)?;
        self.cache.lock(offset);
        let mut result = Ok(());
        for child in children {
            result = self.dump_node(out, child, level - 1, indent + 4);
            if result.is_err() {
                break;
            }
        }
        self.cache.unlock(offset);
        result
    }

    // ---- descent ---------------------------------------------------------

    fn find_slot(&mut self, key: K) -> Result<Option<(u64, u8)>> {
        if self.root == 0 {
            return Ok(None);
        }
        let mut offset = self.root;
        let mut level = self.root_level;
        while level > 0 {
            let child = {
                let inner = self.inner_mut(offset, level)?;
                inner.children[inner.find_child(&key)]
            };
            self.check_child(offset, child)?;
            offset = child;
            level -= 1;
        }
        let leaf = self.leaf_mut(offset)?;
        let pos = leaf.find_lower(&key);
        if pos == leaf.used as usize {
            Ok(None)
        } else {
            Ok(Some((offset, pos as u8)))
        }
    }

    fn insert_descend(&mut self, offset: u64, level: u8, key: K) -> Result<Descent<K>> {
        if level == 0 {
            return self.insert_into_leaf(offset, key);
        }
        let (child, child_level) = {
            let inner = self.inner_mut(offset, level)?;
            (inner.children[inner.find_child(&key)], level - 1)
        };
        self.check_child(offset, child)?;
        let mut outcome = self.insert_descend(child, child_level, key)?;
        if let Some((separator, new_child)) = outcome.split.take() {
            let full = self.inner_mut(offset, level)?.is_full();
            if full {
                outcome.split = Some(self.split_inner(offset, level, separator, new_child)?);
            } else {
                self.inner_mut(offset, level)?
                    .insert_child(separator, new_child);
            }
        }
        Ok(outcome)
    }

    fn insert_into_leaf(&mut self, offset: u64, key: K) -> Result<Descent<K>> {
        let (pos, duplicate, full) = {
            let leaf = self.leaf_mut(offset)?;
            let pos = leaf.find_lower(&key);
            let duplicate = pos < leaf.used as usize && leaf.keys[pos] == key;
            (pos, duplicate, leaf.is_full())
        };
        if duplicate {
            return Ok(Descent {
                leaf: offset,
                slot: pos as u8,
                inserted: false,
                split: None,
            });
        }
        if !full {
            self.leaf_mut(offset)?.insert_at(pos, key, V::default());
            return Ok(Descent {
                leaf: offset,
                slot: pos as u8,
                inserted: true,
                split: None,
            });
        }
        self.split_leaf(offset, pos, key)
    }

    /// Splits a full leaf around the insertion of `key` at `pos`.
    ///
    /// The 64 logical entries divide evenly; the first key of the new
    /// right leaf becomes the separator handed to the parent.
    fn split_leaf(&mut self, offset: u64, pos: usize, key: K) -> Result<Descent<K>> {
        const MID: usize = (SLOT_COUNT + 1) / 2;
        let new_offset = self.allocate(LeafNode::<K, V>::disk_size())?;

        let (right, old_next, separator) = {
            let leaf = self.leaf_mut(offset)?;
            debug_assert!(leaf.is_full());

            let mut merged_keys = [K::default(); SLOT_COUNT + 1];
            let mut merged_data = [V::default(); SLOT_COUNT + 1];
            merged_keys[..pos].copy_from_slice(&leaf.keys[..pos]);
            merged_data[..pos].copy_from_slice(&leaf.data[..pos]);
            merged_keys[pos] = key;
            merged_keys[pos + 1..].copy_from_slice(&leaf.keys[pos..]);
            merged_data[pos + 1..].copy_from_slice(&leaf.data[pos..]);

            leaf.keys[..MID].copy_from_slice(&merged_keys[..MID]);
            leaf.data[..MID].copy_from_slice(&merged_data[..MID]);
            leaf.used = MID as u8;
            leaf.key_changes = !0;
            leaf.data_changes = !0;

            let mut right: LeafNode<K, V> = LeafNode::new();
            right.keys[..SLOT_COUNT + 1 - MID].copy_from_slice(&merged_keys[MID..]);
            right.data[..SLOT_COUNT + 1 - MID].copy_from_slice(&merged_data[MID..]);
            right.used = (SLOT_COUNT + 1 - MID) as u8;

            let old_next = leaf.next;
            leaf.next = new_offset;
            leaf.sibling_changes |= SIBLING_NEXT;
            right.prev = offset;
            right.next = old_next;

            let separator = right.keys[0];
            (right, old_next, separator)
        };
        self.install(new_offset, Node::Leaf(right))?;

        if old_next != 0 {
            let next_leaf = self.leaf_mut(old_next)?;
            next_leaf.prev = new_offset;
            next_leaf.sibling_changes |= SIBLING_PREV;
        }

        if self.tail == offset {
            let old_tail = self.tail;
            self.tail = new_offset;
            self.ensure_resident(new_offset, 0)?;
            self.cache.lock(new_offset);
            self.sync_pin(old_tail);
            self.change_flags |= CHANGED_TAIL;
        }
        trace!(left = offset, right = new_offset, "split leaf");

        let (leaf, slot) = if pos < MID {
            (offset, pos)
        } else {
            (new_offset, pos - MID)
        };
        Ok(Descent {
            leaf,
            slot: slot as u8,
            inserted: true,
            split: Some((separator, new_offset)),
        })
    }

    /// Splits a full inner node around the insertion of `key`.
    ///
    /// One key is promoted to the parent and retained in neither half;
    /// the child array partitions with its keys.
    fn split_inner(
        &mut self,
        offset: u64,
        level: u8,
        key: K,
        new_child: u64,
    ) -> Result<(K, u64)> {
        const MID: usize = (SLOT_COUNT + 1) / 2;
        let new_offset = self.allocate(InnerNode::<K>::disk_size())?;

        let (right, promoted) = {
            let inner = self.inner_mut(offset, level)?;
            debug_assert!(inner.is_full());
            let pos = inner.find_lower(&key);

            let mut merged_keys = [K::default(); SLOT_COUNT + 1];
            let mut merged_children = [0u64; SLOT_COUNT + 2];
            merged_keys[..pos].copy_from_slice(&inner.keys[..pos]);
            merged_keys[pos] = key;
            merged_keys[pos + 1..].copy_from_slice(&inner.keys[pos..]);
            merged_children[..=pos].copy_from_slice(&inner.children[..=pos]);
            merged_children[pos + 1] = new_child;
            merged_children[pos + 2..].copy_from_slice(&inner.children[pos + 1..]);

            inner.keys[..MID].copy_from_slice(&merged_keys[..MID]);
            inner.children[..=MID].copy_from_slice(&merged_children[..=MID]);
            inner.used = MID as u8;
            inner.key_changes = !0;

            let promoted = merged_keys[MID];
            let right_used = SLOT_COUNT - MID;
            let mut right: InnerNode<K> = InnerNode::new(level);
            right.keys[..right_used].copy_from_slice(&merged_keys[MID + 1..]);
            right.children[..=right_used].copy_from_slice(&merged_children[MID + 1..]);
            right.used = right_used as u8;
            (right, promoted)
        };
        self.install(new_offset, Node::Inner(right))?;
        trace!(left = offset, right = new_offset, level, "split inner node");
        Ok((promoted, new_offset))
    }

    /// Replaces the root with a new inner node adopting the old root and
    /// its split sibling.
    fn grow_root(&mut self, separator: K, right: u64) -> Result<()> {
        let offset = self.allocate(InnerNode::<K>::disk_size())?;
        let mut new_root = InnerNode::new(self.root_level + 1);
        new_root.keys[0] = separator;
        new_root.children[0] = self.root;
        new_root.children[1] = right;
        new_root.used = 1;
        self.install(offset, Node::Inner(new_root))?;

        let old_root = self.root;
        self.root = offset;
        self.root_level += 1;
        self.cache.lock(offset);
        self.sync_pin(old_root);
        self.change_flags |= CHANGED_ROOT;
        trace!(root = offset, level = self.root_level, "grew root");
        Ok(())
    }

    // ---- residency -------------------------------------------------------

    /// Faults `offset` in if necessary and touches it in the cache.
    pub(crate) fn ensure_resident(&mut self, offset: u64, level: u8) -> Result<()> {
        if self.cache.contains(offset) {
            self.cache.touch(offset);
            Ok(())
        } else {
            self.fault(offset, level)
        }
    }

    /// Mutable access to the resident node at `offset`.
    pub(crate) fn node_mut(&mut self, offset: u64, level: u8) -> Result<&mut Node<K, V>> {
        if !self.cache.contains(offset) {
            self.fault(offset, level)?;
        }
        match self.cache.find(offset, true) {
            Some(node) => Ok(node),
            None => Err(ArborError::corrupt(offset, "resident node vanished")),
        }
    }

    pub(crate) fn inner_mut(&mut self, offset: u64, level: u8) -> Result<&mut InnerNode<K>> {
        match self.node_mut(offset, level)?.as_inner_mut() {
            Some(inner) => Ok(inner),
            None => Err(ArborError::corrupt(offset, "expected an inner node")),
        }
    }

    pub(crate) fn leaf_mut(&mut self, offset: u64) -> Result<&mut LeafNode<K, V>> {
        match self.node_mut(offset, 0)?.as_leaf_mut() {
            Some(leaf) => Ok(leaf),
            None => Err(ArborError::corrupt(offset, "expected a leaf node")),
        }
    }

    fn fault(&mut self, offset: u64, level: u8) -> Result<()> {
        trace!(offset, level, "faulting node from stream");
        let node = {
            let mut stream = self.stream.borrow_mut();
            if level == 0 {
                let mut leaf = LeafNode::new();
                leaf.load_from(&mut stream, offset)?;
                Node::Leaf(leaf)
            } else {
                let mut inner = InnerNode::new(level);
                inner.load_from(&mut stream, offset)?;
                Node::Inner(inner)
            }
        };
        self.install(offset, node)
    }

    /// Puts a node into the cache under `offset`, evicting as needed.
    fn install(&mut self, offset: u64, node: Node<K, V>) -> Result<()> {
        let (slot, existed) = self.cache.get(offset)?;
        if !existed {
            *slot = node;
        }
        self.flush_check()
    }

    /// Extends the stream by `size` zero bytes and returns their offset.
    fn allocate(&mut self, size: u64) -> Result<u64> {
        let offset = self.eof;
        {
            let mut stream = self.stream.borrow_mut();
            stream.seek(offset)?;
            stream.write_zeros(size)?;
        }
        self.eof += size;
        Ok(offset)
    }

    fn check_child(&self, parent: u64, child: u64) -> Result<()> {
        if child == 0 || child >= self.eof {
            return Err(ArborError::corrupt(
                parent,
                format!("child offset {} out of bounds", child),
            ));
        }
        Ok(())
    }

    /// Unpins `offset` unless it is still one of root, head, or tail.
    fn sync_pin(&mut self, offset: u64) {
        if offset != self.root && offset != self.head && offset != self.tail {
            self.cache.unlock(offset);
        }
    }

    /// Surfaces the first eviction-write failure, poisoning the tree.
    pub(crate) fn flush_check(&mut self) -> Result<()> {
        self.cache.observer().check()
    }
}

impl<K, V, S> Drop for BPlusTree<K, V, S>
where
    K: FixedWidth + Ord,
    V: FixedWidth,
    S: Read + Write + Seek,
{
    fn drop(&mut self) {
        if !self.closed {
            let _ = self.close_mut();
        }
    }
}
