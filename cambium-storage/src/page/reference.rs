use crate::page::Page;
use crate::{Error, NO_KEY, Result};
use std::sync::Arc;

/// Pointer to one logical page of one revision.
///
/// At least one of `{key, log_key, page, fragments}` is populated for a
/// reachable page. `key` is the committed block offset; `log_key`
/// addresses the intent log while a write transaction has the page
/// dirty; `page` is an optional swizzled in-memory handle; `fragments`
/// lists prior-revision fragment offsets, newest first, for the
/// versioning algorithms.
#[derive(Debug, Clone, Default)]
pub struct PageReference {
    pub key: i64,
    pub log_key: i64,
    pub page: Option<Arc<Page>>,
    pub fragments: Vec<u64>,
}

impl PageReference {
    pub fn absent() -> Self {
        Self {
            key: NO_KEY,
            log_key: NO_KEY,
            page: None,
            fragments: Vec::new(),
        }
    }

    pub fn to_committed(key: u64) -> Self {
        Self {
            key: key as i64,
            ..Self::absent()
        }
    }

    #[inline]
    pub fn is_absent(&self) -> bool {
        self.key == NO_KEY && self.log_key == NO_KEY && self.page.is_none()
    }

    #[inline]
    pub fn is_dirty(&self) -> bool {
        self.log_key != NO_KEY
    }

    /// Committed block offset; errors when the page was never persisted.
    pub fn committed_key(&self) -> Result<u64> {
        if self.key < 0 {
            return Err(Error::Invariant("page reference has no committed key"));
        }
        Ok(self.key as u64)
    }

    /// Persisted form: committed key plus the fragment chain. The log key
    /// and any swizzled handle are runtime-only.
    pub fn serialize_into(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.key.to_le_bytes());
        out.push(self.fragments.len() as u8);
        for fragment in &self.fragments {
            out.extend_from_slice(&fragment.to_le_bytes());
        }
    }

    pub fn deserialize_from(bytes: &[u8], off: &mut usize) -> Result<Self> {
        let key_end = *off + 8;
        if key_end + 1 > bytes.len() {
            return Err(Error::corrupt("page reference: truncated"));
        }
        let key = i64::from_le_bytes(bytes[*off..key_end].try_into().unwrap());
        let count = bytes[key_end] as usize;
        let mut at = key_end + 1;
        let mut fragments = Vec::with_capacity(count);
        for _ in 0..count {
            if at + 8 > bytes.len() {
                return Err(Error::corrupt("page reference: truncated fragment list"));
            }
            fragments.push(u64::from_le_bytes(bytes[at..at + 8].try_into().unwrap()));
            at += 8;
        }
        *off = at;
        Ok(Self {
            key,
            log_key: NO_KEY,
            page: None,
            fragments,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_reference_round_trips() {
        let mut out = Vec::new();
        PageReference::absent().serialize_into(&mut out);
        let mut off = 0;
        let back = PageReference::deserialize_from(&out, &mut off).unwrap();
        assert!(back.is_absent());
        assert_eq!(off, out.len());
    }

    #[test]
    fn fragments_round_trip() {
        let reference = PageReference {
            key: 4096,
            log_key: 7, // runtime-only, must not survive
            page: None,
            fragments: vec![2048, 1024],
        };
        let mut out = Vec::new();
        reference.serialize_into(&mut out);
        let mut off = 0;
        let back = PageReference::deserialize_from(&out, &mut off).unwrap();
        assert_eq!(back.key, 4096);
        assert_eq!(back.log_key, NO_KEY);
        assert_eq!(back.fragments, vec![2048, 1024]);
    }
}
