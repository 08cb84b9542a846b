use crate::page::reference::PageReference;
use crate::{Error, Result};

/// Root directory of one secondary-index family (PATH or CAS): the trie
/// root of every index, keyed by index number.
#[derive(Debug, Clone, Default)]
pub struct IndexRootsPage {
    roots: Vec<(u32, PageReference)>,
}

impl IndexRootsPage {
    pub fn root(&self, index_number: u32) -> Option<&PageReference> {
        self.roots
            .iter()
            .find(|(n, _)| *n == index_number)
            .map(|(_, r)| r)
    }

    pub fn root_mut(&mut self, index_number: u32) -> &mut PageReference {
        if let Some(pos) = self.roots.iter().position(|(n, _)| *n == index_number) {
            return &mut self.roots[pos].1;
        }
        let pos = self
            .roots
            .iter()
            .position(|(n, _)| *n > index_number)
            .unwrap_or(self.roots.len());
        self.roots.insert(pos, (index_number, PageReference::absent()));
        &mut self.roots[pos].1
    }

    pub fn index_numbers(&self) -> impl Iterator<Item = u32> + '_ {
        self.roots.iter().map(|(n, _)| *n)
    }

    pub fn references_mut(&mut self) -> impl Iterator<Item = &mut PageReference> {
        self.roots.iter_mut().map(|(_, r)| r)
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(4 + self.roots.len() * 13);
        out.extend_from_slice(&(self.roots.len() as u32).to_le_bytes());
        for (index_number, reference) in &self.roots {
            out.extend_from_slice(&index_number.to_le_bytes());
            reference.serialize_into(&mut out);
        }
        out
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < 4 {
            return Err(Error::corrupt("index roots: truncated"));
        }
        let count = u32::from_le_bytes(bytes[0..4].try_into().unwrap()) as usize;
        let mut off = 4;
        let mut roots = Vec::with_capacity(count);
        for _ in 0..count {
            if off + 4 > bytes.len() {
                return Err(Error::corrupt("index roots: truncated entry"));
            }
            let index_number = u32::from_le_bytes(bytes[off..off + 4].try_into().unwrap());
            off += 4;
            roots.push((
                index_number,
                PageReference::deserialize_from(bytes, &mut off)?,
            ));
        }
        if off != bytes.len() {
            return Err(Error::corrupt("index roots: trailing bytes"));
        }
        Ok(Self { roots })
    }
}

/// Root of the path summary tree: a record index like the document tree,
/// with its own key space.
#[derive(Debug, Clone)]
pub struct PathSummaryPage {
    pub tree_ref: PageReference,
    pub height: u8,
    pub max_path_node_key: u64,
}

impl Default for PathSummaryPage {
    fn default() -> Self {
        Self {
            tree_ref: PageReference::absent(),
            height: 1,
            max_path_node_key: 0,
        }
    }
}

impl PathSummaryPage {
    pub fn next_path_node_key(&mut self) -> u64 {
        self.max_path_node_key += 1;
        self.max_path_node_key
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(32);
        out.push(self.height);
        out.extend_from_slice(&self.max_path_node_key.to_le_bytes());
        self.tree_ref.serialize_into(&mut out);
        out
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < 9 {
            return Err(Error::corrupt("path summary page: truncated"));
        }
        let height = bytes[0];
        let max_path_node_key = u64::from_le_bytes(bytes[1..9].try_into().unwrap());
        let mut off = 9;
        let tree_ref = PageReference::deserialize_from(bytes, &mut off)?;
        if off != bytes.len() {
            return Err(Error::corrupt("path summary page: trailing bytes"));
        }
        Ok(Self {
            tree_ref,
            height,
            max_path_node_key,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roots_are_kept_sorted_by_index_number() {
        let mut page = IndexRootsPage::default();
        *page.root_mut(5) = PageReference::to_committed(50);
        *page.root_mut(1) = PageReference::to_committed(10);
        *page.root_mut(3) = PageReference::to_committed(30);
        let numbers: Vec<u32> = page.index_numbers().collect();
        assert_eq!(numbers, vec![1, 3, 5]);
        assert_eq!(page.root(3).unwrap().key, 30);
        assert!(page.root(2).is_none());
    }

    #[test]
    fn index_roots_round_trip() {
        let mut page = IndexRootsPage::default();
        *page.root_mut(0) = PageReference::to_committed(700);
        *page.root_mut(7) = PageReference {
            key: 900,
            fragments: vec![800],
            ..PageReference::absent()
        };
        let back = IndexRootsPage::deserialize(&page.serialize()).unwrap();
        assert_eq!(back.root(0).unwrap().key, 700);
        assert_eq!(back.root(7).unwrap().fragments, vec![800]);
    }

    #[test]
    fn path_summary_page_round_trip() {
        let mut page = PathSummaryPage::default();
        assert_eq!(page.next_path_node_key(), 1);
        page.tree_ref = PageReference::to_committed(4000);
        page.height = 2;
        let back = PathSummaryPage::deserialize(&page.serialize()).unwrap();
        assert_eq!(back.max_path_node_key, 1);
        assert_eq!(back.height, 2);
        assert_eq!(back.tree_ref.key, 4000);
    }
}
