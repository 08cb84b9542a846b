use crate::page::reference::PageReference;
use crate::{Error, Result};
use cambium_api::RevisionNumber;

/// Persistent resource header. Every commit appends a new uber page and
/// re-anchors the store's uber slot to it; `past_roots[r]` keeps the
/// block offset of revision `r`'s root so any revision stays readable.
#[derive(Debug, Clone, Default)]
pub struct UberPage {
    pub revision_root_ref: PageReference,
    pub revision: RevisionNumber,
    pub past_roots: Vec<u64>,
}

impl UberPage {
    pub fn bootstrap() -> Self {
        Self::default()
    }

    /// Root offset of `revision`, if it was ever committed.
    pub fn root_offset_for(&self, revision: RevisionNumber) -> Option<u64> {
        self.past_roots.get(revision as usize).copied()
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(16 + self.past_roots.len() * 8);
        out.extend_from_slice(&self.revision.to_le_bytes());
        out.extend_from_slice(&(self.past_roots.len() as u32).to_le_bytes());
        for offset in &self.past_roots {
            out.extend_from_slice(&offset.to_le_bytes());
        }
        self.revision_root_ref.serialize_into(&mut out);
        out
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < 8 {
            return Err(Error::corrupt("uber page: truncated"));
        }
        let revision = u32::from_le_bytes(bytes[0..4].try_into().unwrap());
        let count = u32::from_le_bytes(bytes[4..8].try_into().unwrap()) as usize;
        let mut off = 8;
        let mut past_roots = Vec::with_capacity(count);
        for _ in 0..count {
            if off + 8 > bytes.len() {
                return Err(Error::corrupt("uber page: truncated root history"));
            }
            past_roots.push(u64::from_le_bytes(bytes[off..off + 8].try_into().unwrap()));
            off += 8;
        }
        let revision_root_ref = PageReference::deserialize_from(bytes, &mut off)?;
        if off != bytes.len() {
            return Err(Error::corrupt("uber page: trailing bytes"));
        }
        Ok(Self {
            revision_root_ref,
            revision,
            past_roots,
        })
    }
}
