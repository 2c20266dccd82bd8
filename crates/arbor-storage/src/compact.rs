//! Compaction: rewriting the tree into a tightly packed stream.
//!
//! In the default framing every node record spans its full slot-count
//! footprint, so a file accumulates dead padding as it grows. Compaction
//! produces a fresh file in compact framing: records carry only their
//! used slots, nodes are laid out contiguously, and every offset is
//! rewritten consistently. The source tree is a pure producer; nothing
//! in it changes logically (cache recency aside).

use crate::stream::{FixedWidth, NodeStream};
use crate::tree::{BPlusTree, FLAG_COMPACT, ITEMS_OFFSET, SIGNATURE};
use arbor_common::{ArborError, Result};
use std::collections::BTreeMap;
use std::io::{Read, Seek, Write};
use tracing::debug;

/// Relocation record for one node.
struct Remap {
    size: u64,
    new_offset: u64,
}

impl<K, V, S> BPlusTree<K, V, S>
where
    K: FixedWidth + Ord,
    V: FixedWidth,
    S: Read + Write + Seek,
{
    /// Writes a compact copy of the index to `out` and returns it.
    ///
    /// Works for any tree, including a single-leaf or empty one; the
    /// produced file always carries the compact-layout flag. Output
    /// layout is deterministic: new offsets are assigned in ascending
    /// old-offset order, so compacting the same tree twice produces
    /// byte-identical files.
    pub fn compact_to<T: Read + Write + Seek>(&mut self, out: T) -> Result<T> {
        self.flush_check()?;
        let mut out = NodeStream::new(out);

        let mut map: BTreeMap<u64, Remap> = BTreeMap::new();
        if self.root != 0 {
            self.compact_analyse(self.root, self.root_level, &mut map)?;
        }
        let mut next = ITEMS_OFFSET;
        for info in map.values_mut() {
            info.new_offset = next;
            next += info.size;
        }

        out.seek(0)?;
        out.write_all(&SIGNATURE)?;
        out.write_u64(self.item_count)?;
        out.write_u8(FLAG_COMPACT)?;
        out.write_u8(self.root_level)?;
        out.write_u64(translate(&map, self.root)?)?;
        out.write_u64(translate(&map, self.head)?)?;
        out.write_u64(translate(&map, self.tail)?)?;

        out.set_compact(true);
        if self.root != 0 {
            self.compact_write(self.root, self.root_level, &map, &mut out)?;
        }
        debug!(nodes = map.len(), bytes = next, "compacted index");
        Ok(out.into_inner())
    }

    /// Records every live node's compact footprint, keyed by old offset.
    fn compact_analyse(
        &mut self,
        offset: u64,
        level: u8,
        map: &mut BTreeMap<u64, Remap>,
    ) -> Result<()> {
        if level == 0 {
            let size = self.leaf_mut(offset)?.actual_disk_size();
            map.insert(
                offset,
                Remap {
                    size,
                    new_offset: 0,
                },
            );
            return Ok(());
        }
        let (size, children) = {
            let inner = self.inner_mut(offset, level)?;
            (
                inner.actual_disk_size(),
                inner.children[..inner.used as usize + 1].to_vec(),
            )
        };
        map.insert(
            offset,
            Remap {
                size,
                new_offset: 0,
            },
        );
        for child in children {
            self.compact_analyse(child, level - 1, map)?;
        }
        Ok(())
    }

    /// Writes translated copies of every live node at its new offset.
    fn compact_write<T: Read + Write + Seek>(
        &mut self,
        offset: u64,
        level: u8,
        map: &BTreeMap<u64, Remap>,
        out: &mut NodeStream<T>,
    ) -> Result<()> {
        let new_offset = lookup(map, offset)?;
        if level == 0 {
            let mut copy = self.leaf_mut(offset)?.clone();
            copy.next = translate(map, copy.next)?;
            copy.prev = translate(map, copy.prev)?;
            copy.key_changes = !0;
            copy.data_changes = !0;
            copy.sibling_changes = !0;
            out.seek(new_offset)?;
            copy.raw_save(out)?;
            return Ok(());
        }

        let (mut copy, children) = {
            let inner = self.inner_mut(offset, level)?;
            (
                inner.clone(),
                inner.children[..inner.used as usize + 1].to_vec(),
            )
        };
        for slot in copy.children[..copy.used as usize + 1].iter_mut() {
            *slot = lookup(map, *slot)?;
        }
        copy.key_changes = !0;
        out.seek(new_offset)?;
        copy.raw_save(out)?;

        for child in children {
            self.compact_write(child, level - 1, map, out)?;
        }
        Ok(())
    }
}

/// Maps an old offset to its new offset, passing zero through.
fn translate(map: &BTreeMap<u64, Remap>, offset: u64) -> Result<u64> {
    if offset == 0 {
        return Ok(0);
    }
    lookup(map, offset)
}

fn lookup(map: &BTreeMap<u64, Remap>, offset: u64) -> Result<u64> {
    match map.get(&offset) {
        Some(info) => Ok(info.new_offset),
        None => Err(ArborError::corrupt(
            offset,
            "node missing from compaction map",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbor_common::TreeConfig;
    use std::io::Cursor as MemStream;

    type Tree = BPlusTree<u64, u64, MemStream<Vec<u8>>>;

    fn tree_with(count: u64) -> Tree {
        let mut tree = Tree::open(MemStream::new(Vec::new()), 0, TreeConfig::default()).unwrap();
        for k in 0..count {
            tree.insert(k).unwrap().set(k + 7).unwrap();
        }
        tree
    }

    fn reopen(data: Vec<u8>) -> Tree {
        let len = data.len() as u64;
        Tree::open(MemStream::new(data), len, TreeConfig::default()).unwrap()
    }

    fn collect_forward(tree: &mut Tree) -> Vec<(u64, u64)> {
        let mut out = Vec::new();
        let mut cur = tree.first().unwrap();
        while !cur.is_end() {
            out.push((cur.key().unwrap(), cur.value().unwrap()));
            cur.advance().unwrap();
        }
        out
    }

    #[test]
    fn test_compact_multi_level_tree() {
        let mut tree = tree_with(500);
        let out = tree
            .compact_to(MemStream::new(Vec::new()))
            .unwrap()
            .into_inner();

        // Compact flag set in the header.
        assert_eq!(out[10] & FLAG_COMPACT, FLAG_COMPACT);

        let mut compacted = reopen(out);
        assert_eq!(compacted.len(), 500);
        let entries = collect_forward(&mut compacted);
        assert_eq!(entries.len(), 500);
        assert_eq!(entries[0], (0, 7));
        assert_eq!(entries[499], (499, 506));
    }

    #[test]
    fn test_compact_single_leaf_tree() {
        let mut tree = tree_with(9);
        let out = tree
            .compact_to(MemStream::new(Vec::new()))
            .unwrap()
            .into_inner();

        let mut compacted = reopen(out);
        assert_eq!(compacted.len(), 9);
        assert_eq!(
            collect_forward(&mut compacted),
            (0..9).map(|k| (k, k + 7)).collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_compact_empty_tree() {
        let mut tree = tree_with(0);
        let out = tree
            .compact_to(MemStream::new(Vec::new()))
            .unwrap()
            .into_inner();
        assert_eq!(out.len() as u64, ITEMS_OFFSET);

        let compacted = reopen(out);
        assert_eq!(compacted.len(), 0);
    }

    #[test]
    fn test_compact_is_deterministic() {
        let mut tree = tree_with(300);
        let a = tree
            .compact_to(MemStream::new(Vec::new()))
            .unwrap()
            .into_inner();
        let b = tree
            .compact_to(MemStream::new(Vec::new()))
            .unwrap()
            .into_inner();
        assert_eq!(a, b);
    }

    #[test]
    fn test_compact_is_smaller() {
        let mut tree = tree_with(500);
        let original_len = tree.eof;
        let out = tree
            .compact_to(MemStream::new(Vec::new()))
            .unwrap()
            .into_inner();
        assert!((out.len() as u64) <= original_len);
    }

    #[test]
    fn test_compact_does_not_disturb_source() {
        let mut tree = tree_with(200);
        tree.compact_to(MemStream::new(Vec::new())).unwrap();

        assert_eq!(tree.len(), 200);
        let entries = collect_forward(&mut tree);
        assert_eq!(entries.len(), 200);
        // The source stream keeps its padded framing.
        assert!(!tree.stream.borrow().is_compact());
    }

    #[test]
    fn test_reverse_iteration_over_compacted_file() {
        let mut tree = tree_with(300);
        let out = tree
            .compact_to(MemStream::new(Vec::new()))
            .unwrap()
            .into_inner();

        let mut compacted = reopen(out);
        let mut cur = compacted.last().unwrap();
        let mut seen = Vec::new();
        while !cur.is_end() {
            seen.push(cur.key().unwrap());
            cur.advance().unwrap();
        }
        assert_eq!(seen, (0..300).rev().collect::<Vec<_>>());
    }
}
