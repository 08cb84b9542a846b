use crate::hot::KEY_BUF;
use crate::hot::keys::KeySerializer;
use crate::noderefs::{NodeReferences, is_tombstone};
use crate::page::Page;
use crate::page::reference::PageReference;
use crate::trx::PageReadTrx;
use crate::{Error, Result};
use cambium_api::{IndexType, SearchMode};

/// Attempts before a torn optimistic read gives up.
const GUARD_RETRIES: usize = 8;

/// Read side of one trie index over a revision-pinned transaction.
pub struct HotIndexReader<'a, K> {
    trx: &'a PageReadTrx,
    serializer: K,
    index_type: IndexType,
    index_number: u32,
}

impl<'a, K: KeySerializer> HotIndexReader<'a, K> {
    pub fn new(
        trx: &'a PageReadTrx,
        index_type: IndexType,
        index_number: u32,
        serializer: K,
    ) -> Result<Self> {
        match index_type {
            IndexType::Name | IndexType::Path | IndexType::Cas => Ok(Self {
                trx,
                serializer,
                index_type,
                index_number,
            }),
            other => Err(Error::usage(format!("{other:?} is not a trie index"))),
        }
    }

    /// Point lookup. Only `SearchMode::Equal` is served here; ordered
    /// modes belong to `range`.
    pub fn get(&self, key: &K::Key, mode: SearchMode) -> Result<Option<NodeReferences>> {
        if mode != SearchMode::Equal {
            return Err(Error::usage(format!(
                "point lookups only honor Equal, got {mode:?}"
            )));
        }
        let key_bytes = KEY_BUF.with(|buf| {
            let mut buf = buf.borrow_mut();
            let len = self.serializer.serialize(key, &mut buf, 0);
            buf[..len].to_vec()
        });

        let Some(mut reference) = self
            .trx
            .index_root_ref(self.index_type, self.index_number)?
        else {
            return Ok(None);
        };

        loop {
            let page = self.trx.load_hot_page(&reference)?;
            match &*page {
                Page::HotIndirect(node) => {
                    reference = node.child(node.find_child(&key_bytes)).clone();
                    if reference.is_absent() {
                        return Ok(None);
                    }
                }
                Page::HotLeaf(leaf) => {
                    // Optimistic snapshot: retry on a torn read.
                    for _ in 0..GUARD_RETRIES {
                        let token = leaf.acquire_guard();
                        let found = leaf.find_entry(&key_bytes);
                        let value = (found >= 0).then(|| leaf.value_at(found as usize).to_vec());
                        if !leaf.release_guard(token) {
                            continue;
                        }
                        let Some(value) = value else {
                            return Ok(None);
                        };
                        if is_tombstone(&value) {
                            return Ok(None);
                        }
                        return NodeReferences::deserialize(&value);
                    }
                    return Err(Error::Invariant("torn trie read did not settle"));
                }
                other => {
                    return Err(Error::corrupt(format!(
                        "trie path hit a {} page",
                        other.kind_name()
                    )));
                }
            }
        }
    }

    /// Structural snapshot of the trie, mostly for assertions about
    /// shape determinism and height.
    pub fn shape(&self) -> Result<Option<TrieShape>> {
        match self
            .trx
            .index_root_ref(self.index_type, self.index_number)?
        {
            None => Ok(None),
            Some(reference) => Ok(Some(self.shape_of(&reference)?)),
        }
    }

    fn shape_of(&self, reference: &PageReference) -> Result<TrieShape> {
        let page = self.trx.load_hot_page(reference)?;
        match &*page {
            Page::HotLeaf(leaf) => Ok(TrieShape::Leaf {
                live_entries: leaf
                    .entries()
                    .filter(|(_, value)| !is_tombstone(value))
                    .count(),
            }),
            Page::HotIndirect(node) => {
                let mut children = Vec::with_capacity(node.num_children());
                for i in 0..node.num_children() {
                    children.push(self.shape_of(node.child(i))?);
                }
                Ok(TrieShape::Node {
                    kind: node.kind(),
                    height: node.height(),
                    children,
                })
            }
            other => Err(Error::corrupt(format!(
                "trie path hit a {} page",
                other.kind_name()
            ))),
        }
    }

    /// Iterates every live entry in key order.
    pub fn range(&self) -> Result<RangeIter<'a, '_, K>> {
        let root = self
            .trx
            .index_root_ref(self.index_type, self.index_number)?;
        Ok(RangeIter {
            reader: self,
            stack: root.into_iter().collect(),
            current: Vec::new(),
        })
    }
}

/// Shape of a trie subtree as seen by `HotIndexReader::shape`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrieShape {
    Leaf {
        live_entries: usize,
    },
    Node {
        kind: crate::hot::node::HotNodeKind,
        height: u8,
        children: Vec<TrieShape>,
    },
}

impl TrieShape {
    /// Levels from this node down to the deepest leaf, leaves counting
    /// one.
    pub fn depth(&self) -> usize {
        match self {
            TrieShape::Leaf { .. } => 1,
            TrieShape::Node { children, .. } => {
                1 + children.iter().map(TrieShape::depth).max().unwrap_or(0)
            }
        }
    }

    pub fn total_entries(&self) -> usize {
        match self {
            TrieShape::Leaf { live_entries } => *live_entries,
            TrieShape::Node { children, .. } => {
                children.iter().map(TrieShape::total_entries).sum()
            }
        }
    }
}

/// Depth-first walk over the trie's leaves; children are visited in
/// sparse-key order, which is key order.
pub struct RangeIter<'a, 'r, K> {
    reader: &'r HotIndexReader<'a, K>,
    stack: Vec<PageReference>,
    current: Vec<(Vec<u8>, NodeReferences)>,
}

impl<K: KeySerializer> Iterator for RangeIter<'_, '_, K> {
    type Item = Result<(Vec<u8>, NodeReferences)>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(entry) = self.current.pop() {
                return Some(Ok(entry));
            }
            let reference = self.stack.pop()?;
            let page = match self.reader.trx.load_hot_page(&reference) {
                Ok(page) => page,
                Err(error) => return Some(Err(error)),
            };
            match &*page {
                Page::HotIndirect(node) => {
                    // Reverse order so the leftmost child pops first.
                    for i in (0..node.num_children()).rev() {
                        self.stack.push(node.child(i).clone());
                    }
                }
                Page::HotLeaf(leaf) => {
                    let mut entries = Vec::with_capacity(leaf.entry_count());
                    for (key, value) in leaf.entries() {
                        if is_tombstone(value) {
                            continue;
                        }
                        match NodeReferences::deserialize(value) {
                            Ok(Some(refs)) => entries.push((key.to_vec(), refs)),
                            Ok(None) => {}
                            Err(error) => return Some(Err(error)),
                        }
                    }
                    entries.reverse();
                    self.current = entries;
                }
                other => {
                    return Some(Err(Error::corrupt(format!(
                        "trie path hit a {} page",
                        other.kind_name()
                    ))));
                }
            }
        }
    }
}
