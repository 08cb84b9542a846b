use crate::page::reference::PageReference;
use crate::{Error, FANOUT_BITS, INDIRECT_FANOUT, Result};
use cambium_api::PageKey;

/// Fixed-fanout interior node of a record index tree. A chain of these
/// maps a page key to its leaf, ten address bits per level.
#[derive(Debug, Clone)]
pub struct IndirectPage {
    refs: Vec<PageReference>,
}

impl Default for IndirectPage {
    fn default() -> Self {
        Self::new()
    }
}

impl IndirectPage {
    pub fn new() -> Self {
        Self {
            refs: vec![PageReference::absent(); INDIRECT_FANOUT],
        }
    }

    /// Child slot of `page_key` at `level` below a tree of `height`
    /// indirect levels; level 0 is the root.
    pub fn child_index(page_key: PageKey, level: u8, height: u8) -> usize {
        debug_assert!(level < height);
        let shift = FANOUT_BITS * (height - 1 - level) as u32;
        ((page_key >> shift) & (INDIRECT_FANOUT as u64 - 1)) as usize
    }

    /// Number of indirect levels needed to address `page_key`.
    pub fn required_height(page_key: PageKey) -> u8 {
        let mut height = 1u8;
        while height < 6 && page_key >= 1u64 << (FANOUT_BITS * height as u32) {
            height += 1;
        }
        height
    }

    pub fn reference(&self, i: usize) -> &PageReference {
        &self.refs[i]
    }

    pub fn reference_mut(&mut self, i: usize) -> &mut PageReference {
        &mut self.refs[i]
    }

    pub fn references_mut(&mut self) -> &mut [PageReference] {
        &mut self.refs
    }

    pub fn present_count(&self) -> usize {
        self.refs.iter().filter(|r| !r.is_absent()).count()
    }

    /// Presence bitmap followed by the present references in slot order.
    pub fn serialize(&self) -> Vec<u8> {
        let mut bitmap = vec![0u8; INDIRECT_FANOUT / 8];
        for (i, reference) in self.refs.iter().enumerate() {
            if !reference.is_absent() {
                bitmap[i / 8] |= 1 << (i % 8);
            }
        }
        let mut out = Vec::with_capacity(bitmap.len() + self.present_count() * 9);
        out.extend_from_slice(&bitmap);
        for reference in &self.refs {
            if !reference.is_absent() {
                reference.serialize_into(&mut out);
            }
        }
        out
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        let bitmap_len = INDIRECT_FANOUT / 8;
        if bytes.len() < bitmap_len {
            return Err(Error::corrupt("indirect page: truncated bitmap"));
        }
        let mut page = Self::new();
        let mut off = bitmap_len;
        for i in 0..INDIRECT_FANOUT {
            if bytes[i / 8] & (1 << (i % 8)) != 0 {
                page.refs[i] = PageReference::deserialize_from(bytes, &mut off)?;
            }
        }
        if off != bytes.len() {
            return Err(Error::corrupt("indirect page: trailing bytes"));
        }
        Ok(page)
    }
}
