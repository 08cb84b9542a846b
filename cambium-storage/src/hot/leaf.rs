use crate::noderefs::{NodeReferences, TAG_TOMBSTONE, is_tombstone};
use crate::{Error, HOT_LEAF_SIZE, Result};
use cambium_api::{IndexType, PageKey, RevisionNumber};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

/// Header: pageKey u64, revision u32, indexType u8, entryCount u16, freeSpace u16.
const HEADER_SIZE: usize = 17;
const OFF_PAGE_KEY: usize = 0;
const OFF_REVISION: usize = 8;
const OFF_INDEX_TYPE: usize = 12;
const OFF_ENTRY_COUNT: usize = 13;
const OFF_FREE_SPACE: usize = 15;

/// Trie leaf: sorted `(key, value)` entries in a slotted byte page. Slots
/// grow up from the header, cells grow down from the end. A value of the
/// single byte `0xFE` is a tombstone.
#[derive(Debug)]
pub struct HotLeafPage {
    buf: Box<[u8; HOT_LEAF_SIZE]>,
    entry_count: usize,
    content_begin: usize,
    dead_bytes: usize,
    guard: LeafGuard,
}

/// Single-writer optimistic guard: readers record the version on acquire
/// and check it on release; a writer refuses to start while a reader has
/// not released.
#[derive(Debug, Default)]
struct LeafGuard {
    version: AtomicU64,
    readers: AtomicU32,
}

impl Clone for HotLeafPage {
    fn clone(&self) -> Self {
        Self {
            buf: self.buf.clone(),
            entry_count: self.entry_count,
            content_begin: self.content_begin,
            dead_bytes: self.dead_bytes,
            guard: LeafGuard::default(),
        }
    }
}

impl PartialEq for HotLeafPage {
    fn eq(&self, other: &Self) -> bool {
        self.page_key() == other.page_key()
            && self.revision() == other.revision()
            && self.entry_count == other.entry_count
            && (0..self.entry_count).all(|i| {
                self.key_at(i) == other.key_at(i) && self.value_at(i) == other.value_at(i)
            })
    }
}

impl HotLeafPage {
    pub fn new(page_key: PageKey, revision: RevisionNumber, index_type: IndexType) -> Self {
        let mut leaf = Self {
            buf: Box::new([0u8; HOT_LEAF_SIZE]),
            entry_count: 0,
            content_begin: HOT_LEAF_SIZE,
            dead_bytes: 0,
            guard: LeafGuard::default(),
        };
        leaf.buf[OFF_PAGE_KEY..OFF_PAGE_KEY + 8].copy_from_slice(&page_key.to_le_bytes());
        leaf.buf[OFF_REVISION..OFF_REVISION + 4].copy_from_slice(&revision.to_le_bytes());
        leaf.buf[OFF_INDEX_TYPE] = index_type.tag();
        leaf
    }

    pub fn page_key(&self) -> PageKey {
        u64::from_le_bytes(self.buf[OFF_PAGE_KEY..OFF_PAGE_KEY + 8].try_into().unwrap())
    }

    pub fn revision(&self) -> RevisionNumber {
        u32::from_le_bytes(self.buf[OFF_REVISION..OFF_REVISION + 4].try_into().unwrap())
    }

    pub fn set_revision(&mut self, revision: RevisionNumber) {
        self.buf[OFF_REVISION..OFF_REVISION + 4].copy_from_slice(&revision.to_le_bytes());
    }

    pub fn index_type(&self) -> Result<IndexType> {
        IndexType::from_tag(self.buf[OFF_INDEX_TYPE])
            .ok_or_else(|| Error::corrupt("hot leaf: bad index type"))
    }

    #[inline]
    pub fn entry_count(&self) -> usize {
        self.entry_count
    }

    /// Contiguous bytes between the slot array and the cell area.
    pub fn free_space(&self) -> usize {
        self.content_begin - (HEADER_SIZE + 2 * self.entry_count)
    }

    /// Bytes recoverable by `compact` on top of the contiguous gap.
    pub fn dead_space(&self) -> usize {
        self.dead_bytes
    }

    pub fn fill_factor(&self) -> f64 {
        1.0 - (self.free_space() + self.dead_bytes) as f64 / HOT_LEAF_SIZE as f64
    }

    fn slot(&self, i: usize) -> usize {
        let off = HEADER_SIZE + 2 * i;
        u16::from_le_bytes(self.buf[off..off + 2].try_into().unwrap()) as usize
    }

    fn set_slot(&mut self, i: usize, cell: usize) {
        let off = HEADER_SIZE + 2 * i;
        self.buf[off..off + 2].copy_from_slice(&(cell as u16).to_le_bytes());
    }

    fn cell_parts(&self, cell: usize) -> (usize, usize, usize, usize) {
        let key_len = u16::from_le_bytes(self.buf[cell..cell + 2].try_into().unwrap()) as usize;
        let key_start = cell + 2;
        let val_len_off = key_start + key_len;
        let val_len =
            u16::from_le_bytes(self.buf[val_len_off..val_len_off + 2].try_into().unwrap()) as usize;
        (key_start, key_len, val_len_off + 2, val_len)
    }

    pub fn key_at(&self, i: usize) -> &[u8] {
        let (start, len, _, _) = self.cell_parts(self.slot(i));
        &self.buf[start..start + len]
    }

    pub fn value_at(&self, i: usize) -> &[u8] {
        let (_, _, start, len) = self.cell_parts(self.slot(i));
        &self.buf[start..start + len]
    }

    pub fn min_key(&self) -> Option<&[u8]> {
        (self.entry_count > 0).then(|| self.key_at(0))
    }

    pub fn max_key(&self) -> Option<&[u8]> {
        (self.entry_count > 0).then(|| self.key_at(self.entry_count - 1))
    }

    fn cell_size(key_len: usize, val_len: usize) -> usize {
        2 + key_len + 2 + val_len
    }

    /// Bytes an insert of `(key, value)` needs, slot included.
    pub fn required_space_for(key: &[u8], value: &[u8]) -> usize {
        Self::cell_size(key.len(), value.len()) + 2
    }

    /// `(available, required)` for upserting `(key, value)`, accounting
    /// for the union with an existing bitmap and the cell it would
    /// replace. Feeds the space-exhaustion diagnostics.
    pub fn space_shortfall(&self, key: &[u8], value: &[u8]) -> (usize, usize) {
        let found = self.find_entry(key);
        if found < 0 {
            return (
                self.free_space() + self.dead_bytes,
                Self::required_space_for(key, value),
            );
        }
        let idx = found as usize;
        let existing = self.value_at(idx);
        let merged_len = if is_tombstone(value) || is_tombstone(existing) {
            value.len()
        } else {
            match (
                NodeReferences::deserialize(existing),
                NodeReferences::deserialize(value),
            ) {
                (Ok(Some(mut merged)), Ok(Some(incoming))) => {
                    merged.union(&incoming);
                    merged.serialize().len()
                }
                _ => value.len(),
            }
        };
        let old_cell = Self::cell_size(key.len(), existing.len());
        (
            self.free_space() + self.dead_bytes + old_cell,
            Self::cell_size(key.len(), merged_len),
        )
    }

    /// Binary search by unsigned byte compare; a negative result encodes
    /// the insertion point as `-(point + 1)`.
    pub fn find_entry(&self, key: &[u8]) -> i32 {
        let mut lo = 0usize;
        let mut hi = self.entry_count;
        while lo < hi {
            let mid = (lo + hi) / 2;
            match self.key_at(mid).cmp(key) {
                std::cmp::Ordering::Less => lo = mid + 1,
                std::cmp::Ordering::Greater => hi = mid,
                std::cmp::Ordering::Equal => return mid as i32,
            }
        }
        -((lo as i32) + 1)
    }

    fn write_cell(&mut self, key: &[u8], value: &[u8]) -> usize {
        let cell_len = Self::cell_size(key.len(), value.len());
        let cell = self.content_begin - cell_len;
        self.buf[cell..cell + 2].copy_from_slice(&(key.len() as u16).to_le_bytes());
        self.buf[cell + 2..cell + 2 + key.len()].copy_from_slice(key);
        let val_off = cell + 2 + key.len();
        self.buf[val_off..val_off + 2].copy_from_slice(&(value.len() as u16).to_le_bytes());
        self.buf[val_off + 2..val_off + 2 + value.len()].copy_from_slice(value);
        self.content_begin = cell;
        cell
    }

    /// Inserts at slot `idx`, compacting first when only fragmented space
    /// remains. `false` means the page genuinely cannot hold the entry.
    pub fn insert_at(&mut self, idx: usize, key: &[u8], value: &[u8]) -> Result<bool> {
        if idx > self.entry_count {
            return Err(Error::Invariant("hot leaf: insert index out of bounds"));
        }
        if key.len() > u16::MAX as usize || value.len() > u16::MAX as usize {
            return Err(Error::usage("hot leaf: entry larger than 64 KiB".to_string()));
        }
        let needed = Self::cell_size(key.len(), value.len()) + 2;
        if self.free_space() + self.dead_bytes < needed {
            return Ok(false);
        }

        self.guard.begin_write()?;
        let mut idx = idx;
        if self.free_space() < needed {
            // Compaction may drop tombstoned entries, so the insertion
            // point has to be re-derived afterwards.
            self.compact();
            let found = self.find_entry(key);
            debug_assert!(found < 0);
            idx = (-(found + 1)) as usize;
        }
        if self.free_space() < needed {
            self.guard.end_write();
            return Ok(false);
        }
        let cell = self.write_cell(key, value);
        // Shift slots right to open slot idx.
        let src = HEADER_SIZE + 2 * idx;
        let len = 2 * (self.entry_count - idx);
        self.buf.copy_within(src..src + len, src + 2);
        self.set_slot(idx, cell);
        self.entry_count += 1;
        self.sync_header();
        self.guard.end_write();
        Ok(true)
    }

    /// Replaces the value at `idx`, reusing the cell when the length
    /// matches and rewriting it otherwise.
    pub fn replace_value_at(&mut self, idx: usize, value: &[u8]) -> Result<bool> {
        if idx >= self.entry_count {
            return Err(Error::Invariant("hot leaf: replace index out of bounds"));
        }
        let cell = self.slot(idx);
        let (key_start, key_len, val_start, val_len) = self.cell_parts(cell);

        if value.len() == val_len {
            self.guard.begin_write()?;
            self.buf[val_start..val_start + value.len()].copy_from_slice(value);
            self.sync_header();
            self.guard.end_write();
            return Ok(true);
        }

        let old_cell_size = Self::cell_size(key_len, val_len);
        let needed = Self::cell_size(key_len, value.len());
        if self.free_space() + self.dead_bytes + old_cell_size < needed {
            return Ok(false);
        }

        self.guard.begin_write()?;
        let key = self.buf[key_start..key_start + key_len].to_vec();
        self.dead_bytes += old_cell_size;
        if self.free_space() < needed {
            // The old cell is already accounted dead, so compaction frees it.
            self.set_slot(idx, 0);
            self.compact_with_hole(idx);
        }
        let cell = self.write_cell(&key, value);
        self.set_slot(idx, cell);
        self.sync_header();
        self.guard.end_write();
        Ok(true)
    }

    /// Upserts a node-reference value: union with the existing bitmap when
    /// the key is present, plain insert otherwise. Returns `false` iff the
    /// page has insufficient space after considering fragmentation.
    pub fn merge_with_node_refs(&mut self, key: &[u8], value: &[u8]) -> Result<bool> {
        let found = self.find_entry(key);
        if found < 0 {
            let idx = (-(found + 1)) as usize;
            return self.insert_at(idx, key, value);
        }
        let idx = found as usize;
        let existing = self.value_at(idx);
        if is_tombstone(value) || is_tombstone(existing) {
            return self.replace_value_at(idx, value);
        }
        let mut merged = NodeReferences::deserialize(existing)?
            .ok_or(Error::Invariant("hot leaf: tombstone slipped past check"))?;
        let incoming = NodeReferences::deserialize(value)?
            .ok_or(Error::Invariant("hot leaf: tombstone slipped past check"))?;
        merged.union(&incoming);
        self.replace_value_at(idx, &merged.serialize())
    }

    /// Replaces the entry's value with a tombstone, preserving key order
    /// for concurrent readers.
    pub fn tombstone_at(&mut self, idx: usize) -> Result<bool> {
        self.replace_value_at(idx, &[TAG_TOMBSTONE])
    }

    /// Moves the upper part of the entries into `right`, which must be
    /// empty, splitting at the height-optimal partition: the first key
    /// whose bit at the key set's root discriminative bit is set. Both
    /// resulting pages are then complete bit-prefix subtries, so a
    /// BiNode over them routes every present and future key correctly.
    /// Returns the split key (the first key of `right`), or `None` when
    /// the page is irreducible (fewer than two entries, or no routable
    /// bit distinguishes them).
    pub fn split_to(&mut self, right: &mut HotLeafPage) -> Result<Option<Vec<u8>>> {
        if self.entry_count < 2 {
            return Ok(None);
        }
        if right.entry_count != 0 {
            return Err(Error::Invariant("hot leaf: split target not empty"));
        }
        let bit = crate::hot::dbit::discriminative_bit_padded(
            self.key_at(0),
            self.key_at(self.entry_count - 1),
        );
        if bit < 0 {
            return Ok(None);
        }
        // Keys share every bit before `bit`, so its value is monotone
        // across the sorted entries; the first set occurrence is the
        // partition.
        let mid = (0..self.entry_count)
            .position(|i| crate::hot::dbit::is_bit_set(self.key_at(i), bit as u64))
            .ok_or(Error::Invariant("hot leaf: discriminative bit set nowhere"))?;
        let moved: Vec<(Vec<u8>, Vec<u8>)> = (mid..self.entry_count)
            .map(|i| (self.key_at(i).to_vec(), self.value_at(i).to_vec()))
            .collect();
        for (i, (key, value)) in moved.iter().enumerate() {
            if !right.insert_at(i, key, value)? {
                return Err(Error::Invariant("hot leaf: split target too small"));
            }
        }
        let kept: Vec<(Vec<u8>, Vec<u8>)> = (0..mid)
            .map(|i| (self.key_at(i).to_vec(), self.value_at(i).to_vec()))
            .collect();
        self.rebuild(&kept)?;
        Ok(Some(moved[0].0.clone()))
    }

    /// Rewrites live cells contiguously, dropping tombstoned entries.
    /// Returns the number of bytes reclaimed.
    pub fn compact(&mut self) -> usize {
        let before = self.free_space();
        let live: Vec<(Vec<u8>, Vec<u8>)> = (0..self.entry_count)
            .filter(|&i| !is_tombstone(self.value_at(i)))
            .map(|i| (self.key_at(i).to_vec(), self.value_at(i).to_vec()))
            .collect();
        self.rebuild(&live).expect("compacted entries must fit");
        self.free_space() - before
    }

    /// Compaction variant used mid-replace: slot `hole` is excluded.
    fn compact_with_hole(&mut self, hole: usize) {
        let live: Vec<(usize, Vec<u8>, Vec<u8>)> = (0..self.entry_count)
            .filter(|&i| i != hole)
            .map(|i| (i, self.key_at(i).to_vec(), self.value_at(i).to_vec()))
            .collect();
        self.content_begin = HOT_LEAF_SIZE;
        self.dead_bytes = 0;
        for (i, key, value) in live {
            let cell = self.write_cell(&key, &value);
            self.set_slot(i, cell);
        }
    }

    fn rebuild(&mut self, entries: &[(Vec<u8>, Vec<u8>)]) -> Result<()> {
        self.content_begin = HOT_LEAF_SIZE;
        self.dead_bytes = 0;
        self.entry_count = 0;
        for (i, (key, value)) in entries.iter().enumerate() {
            let cell_len = Self::cell_size(key.len(), value.len());
            if HEADER_SIZE + 2 * (i + 1) + (HOT_LEAF_SIZE - self.content_begin) + cell_len
                > HOT_LEAF_SIZE
            {
                return Err(Error::Invariant("hot leaf: rebuild overflow"));
            }
            let cell = self.write_cell(key, value);
            self.set_slot(i, cell);
            self.entry_count = i + 1;
        }
        self.sync_header();
        Ok(())
    }

    fn sync_header(&mut self) {
        self.buf[OFF_ENTRY_COUNT..OFF_ENTRY_COUNT + 2]
            .copy_from_slice(&(self.entry_count as u16).to_le_bytes());
        self.buf[OFF_FREE_SPACE..OFF_FREE_SPACE + 2]
            .copy_from_slice(&(self.free_space().min(u16::MAX as usize) as u16).to_le_bytes());
    }

    pub fn entries(&self) -> impl Iterator<Item = (&[u8], &[u8])> + '_ {
        (0..self.entry_count).map(move |i| (self.key_at(i), self.value_at(i)))
    }

    // --- guard protocol -------------------------------------------------

    /// Begins an optimistic read; the token must be handed back to
    /// `release_guard` on every exit path.
    pub fn acquire_guard(&self) -> u64 {
        self.guard.readers.fetch_add(1, Ordering::AcqRel);
        self.guard.version.load(Ordering::Acquire)
    }

    /// Ends an optimistic read; `false` means the snapshot was torn by a
    /// concurrent write and the caller must retry.
    pub fn release_guard(&self, token: u64) -> bool {
        let consistent = self.guard.version.load(Ordering::Acquire) == token;
        self.guard.readers.fetch_sub(1, Ordering::AcqRel);
        consistent
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HOT_LEAF_SIZE - self.free_space() - self.dead_bytes);
        out.extend_from_slice(&self.buf[..HEADER_SIZE]);
        for (key, value) in self.entries() {
            out.extend_from_slice(&(key.len() as u16).to_le_bytes());
            out.extend_from_slice(key);
            out.extend_from_slice(&(value.len() as u16).to_le_bytes());
            out.extend_from_slice(value);
        }
        out
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(Error::corrupt("hot leaf: truncated header"));
        }
        let page_key = u64::from_le_bytes(bytes[OFF_PAGE_KEY..OFF_PAGE_KEY + 8].try_into().unwrap());
        let revision =
            u32::from_le_bytes(bytes[OFF_REVISION..OFF_REVISION + 4].try_into().unwrap());
        let index_type = IndexType::from_tag(bytes[OFF_INDEX_TYPE])
            .ok_or_else(|| Error::corrupt("hot leaf: bad index type"))?;
        let entry_count =
            u16::from_le_bytes(bytes[OFF_ENTRY_COUNT..OFF_ENTRY_COUNT + 2].try_into().unwrap())
                as usize;

        let mut leaf = Self::new(page_key, revision, index_type);
        let mut off = HEADER_SIZE;
        for i in 0..entry_count {
            let key_len = read_u16(bytes, &mut off)? as usize;
            let key = take(bytes, &mut off, key_len)?.to_vec();
            let val_len = read_u16(bytes, &mut off)? as usize;
            let value = take(bytes, &mut off, val_len)?.to_vec();
            if !leaf.insert_at(i, &key, &value)? {
                return Err(Error::corrupt("hot leaf: entries exceed page size"));
            }
        }
        if off != bytes.len() {
            return Err(Error::corrupt("hot leaf: trailing bytes"));
        }
        Ok(leaf)
    }
}

impl LeafGuard {
    fn begin_write(&self) -> Result<()> {
        if self.readers.load(Ordering::Acquire) != 0 {
            return Err(Error::Invariant("hot leaf: write under held read guard"));
        }
        self.version.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    fn end_write(&self) {
        self.version.fetch_add(1, Ordering::AcqRel);
    }
}

fn read_u16(bytes: &[u8], off: &mut usize) -> Result<u16> {
    let slice = take(bytes, off, 2)?;
    Ok(u16::from_le_bytes(slice.try_into().unwrap()))
}

fn take<'a>(bytes: &'a [u8], off: &mut usize, len: usize) -> Result<&'a [u8]> {
    let end = off
        .checked_add(len)
        .filter(|&end| end <= bytes.len())
        .ok_or_else(|| Error::corrupt("hot leaf: truncated entry"))?;
    let out = &bytes[*off..end];
    *off = end;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf() -> HotLeafPage {
        HotLeafPage::new(0, 1, IndexType::Path)
    }

    fn refs_value(keys: &[u64]) -> Vec<u8> {
        let mut refs = NodeReferences::new();
        for &k in keys {
            refs.add(k);
        }
        refs.serialize()
    }

    #[test]
    fn find_entry_encodes_insertion_point() {
        let mut page = leaf();
        for (i, key) in [b"bb", b"dd", b"ff"].iter().enumerate() {
            assert!(page.insert_at(i, *key, b"v").unwrap());
        }
        assert_eq!(page.find_entry(b"bb"), 0);
        assert_eq!(page.find_entry(b"ff"), 2);
        assert_eq!(page.find_entry(b"aa"), -1);
        assert_eq!(page.find_entry(b"cc"), -2);
        assert_eq!(page.find_entry(b"zz"), -4);
    }

    #[test]
    fn merge_unions_existing_bitmap() {
        let mut page = leaf();
        assert!(page.merge_with_node_refs(b"k", &refs_value(&[7])).unwrap());
        assert!(page.merge_with_node_refs(b"k", &refs_value(&[9])).unwrap());
        assert_eq!(page.entry_count(), 1);
        let refs = NodeReferences::deserialize(page.value_at(0)).unwrap().unwrap();
        assert!(refs.contains(7) && refs.contains(9));
        assert_eq!(refs.cardinality(), 2);
    }

    #[test]
    fn tombstone_then_merge_replaces() {
        let mut page = leaf();
        assert!(page.merge_with_node_refs(b"k", &refs_value(&[7])).unwrap());
        assert!(page.tombstone_at(0).unwrap());
        assert!(is_tombstone(page.value_at(0)));
        assert!(page.merge_with_node_refs(b"k", &refs_value(&[3])).unwrap());
        let refs = NodeReferences::deserialize(page.value_at(0)).unwrap().unwrap();
        assert_eq!(refs.cardinality(), 1);
        assert!(refs.contains(3));
    }

    #[test]
    fn split_partitions_at_the_root_discriminative_bit() {
        let mut page = leaf();
        for i in 0..10u8 {
            let key = [b'a' + i];
            let idx = page.entry_count();
            assert!(page.insert_at(idx, &key, b"value").unwrap());
        }
        // 'a' = 0x61 .. 'j' = 0x6A first disagree at bit 4; the keys with
        // that bit set are 'h', 'i', 'j'.
        let mut right = leaf();
        let split_key = page.split_to(&mut right).unwrap().unwrap();
        assert_eq!(split_key, vec![b'h']);
        assert_eq!(page.entry_count(), 7);
        assert_eq!(right.entry_count(), 3);
        assert_eq!(page.max_key().unwrap(), b"g");
        assert_eq!(right.min_key().unwrap(), b"h");
        // Every left key has the bit clear, every right key has it set.
        for i in 0..page.entry_count() {
            assert!(!crate::hot::dbit::is_bit_set(page.key_at(i), 4));
        }
        for i in 0..right.entry_count() {
            assert!(crate::hot::dbit::is_bit_set(right.key_at(i), 4));
        }
    }

    #[test]
    fn split_of_single_entry_is_irreducible() {
        let mut page = leaf();
        assert!(page.insert_at(0, b"only", b"v").unwrap());
        let mut right = leaf();
        assert_eq!(page.split_to(&mut right).unwrap(), None);
    }

    #[test]
    fn page_reports_full_without_space() {
        let mut page = leaf();
        let big = vec![0xAAu8; u16::MAX as usize];
        // Entries of ~64 KiB cannot fit a 16 KiB page at all.
        assert!(!page.insert_at(0, b"k", &big).unwrap());

        let chunk = vec![0xBBu8; 4000];
        let mut inserted = 0;
        loop {
            let key = [inserted as u8];
            if !page.insert_at(inserted, &key, &chunk).unwrap() {
                break;
            }
            inserted += 1;
        }
        assert!(inserted >= 3);
        assert!(page.free_space() < 4010);
    }

    #[test]
    fn compact_reclaims_dead_and_tombstoned_space() {
        let mut page = leaf();
        assert!(page.insert_at(0, b"a", &vec![1u8; 2000]).unwrap());
        assert!(page.insert_at(1, b"b", &vec![2u8; 2000]).unwrap());
        assert!(page.replace_value_at(0, &vec![3u8; 10]).unwrap());
        assert!(page.dead_space() > 0);
        assert!(page.tombstone_at(1).unwrap());

        let reclaimed = page.compact();
        assert!(reclaimed > 0);
        assert_eq!(page.entry_count(), 1);
        assert_eq!(page.dead_space(), 0);
        assert_eq!(page.key_at(0), b"a");
    }

    #[test]
    fn serialization_round_trip() {
        let mut page = HotLeafPage::new(5, 3, IndexType::Cas);
        for (i, key) in [b"k1", b"k2", b"k3"].iter().enumerate() {
            assert!(page.insert_at(i, *key, &refs_value(&[i as u64])).unwrap());
        }
        let back = HotLeafPage::deserialize(&page.serialize()).unwrap();
        assert_eq!(back, page);
        assert_eq!(back.page_key(), 5);
        assert_eq!(back.revision(), 3);
        assert_eq!(back.index_type().unwrap(), IndexType::Cas);
    }

    #[test]
    fn guard_detects_concurrent_write_and_unreleased_reader() {
        let mut page = leaf();
        assert!(page.insert_at(0, b"a", b"v").unwrap());

        // Consistent read.
        let token = page.acquire_guard();
        let _ = page.value_at(0);
        assert!(page.release_guard(token));

        // Torn read: a write between acquire and release fails validation.
        let token = page.acquire_guard();
        assert!(page.release_guard(token));
        let token = page.acquire_guard();
        // The writer refuses while a reader is outstanding.
        assert!(matches!(
            page.insert_at(1, b"b", b"v"),
            Err(Error::Invariant(_))
        ));
        assert!(page.release_guard(token));
        // After release the write succeeds and tears later reads.
        let stale = page.acquire_guard();
        assert!(page.release_guard(stale));
        let token2 = page.acquire_guard();
        page.release_guard(token2);
        assert!(page.insert_at(1, b"b", b"v").unwrap());
    }
}
