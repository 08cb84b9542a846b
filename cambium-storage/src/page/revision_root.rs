use crate::page::reference::PageReference;
use crate::{Error, Result};
use cambium_api::{NodeKey, RevisionNumber};

/// Child-reference slots, in `references_mut` order.
pub const REF_DOCUMENT: usize = 0;
pub const REF_NAME: usize = 1;
pub const REF_PATH: usize = 2;
pub const REF_CAS: usize = 3;
pub const REF_PATH_SUMMARY: usize = 4;

/// Root of one revision: entry points of the document indirection tree
/// and the per-index subtree pages, plus the revision's counters and
/// commit metadata.
#[derive(Debug, Clone, Default)]
pub struct RevisionRootPage {
    pub revision: RevisionNumber,
    pub max_node_key: NodeKey,
    pub document_ref: PageReference,
    pub document_height: u8,
    pub name_page_ref: PageReference,
    pub path_page_ref: PageReference,
    pub cas_page_ref: PageReference,
    pub path_summary_ref: PageReference,
    pub commit_timestamp_millis: i64,
    pub commit_message: Option<String>,
}

impl RevisionRootPage {
    pub fn bootstrap() -> Self {
        Self {
            document_height: 1,
            ..Self::default()
        }
    }

    /// Working copy for the next revision; commit metadata does not carry
    /// over.
    pub fn derive_next(&self) -> Self {
        let mut next = self.clone();
        next.revision = self.revision + 1;
        next.commit_timestamp_millis = 0;
        next.commit_message = None;
        next
    }

    pub fn next_node_key(&mut self) -> NodeKey {
        self.max_node_key += 1;
        self.max_node_key
    }

    pub fn references_mut(&mut self) -> [&mut PageReference; 5] {
        [
            &mut self.document_ref,
            &mut self.name_page_ref,
            &mut self.path_page_ref,
            &mut self.cas_page_ref,
            &mut self.path_summary_ref,
        ]
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(128);
        out.extend_from_slice(&self.revision.to_le_bytes());
        out.extend_from_slice(&self.max_node_key.to_le_bytes());
        out.push(self.document_height);
        out.extend_from_slice(&self.commit_timestamp_millis.to_le_bytes());
        match &self.commit_message {
            Some(message) => {
                out.extend_from_slice(&(message.len() as u32).to_le_bytes());
                out.extend_from_slice(message.as_bytes());
            }
            None => out.extend_from_slice(&u32::MAX.to_le_bytes()),
        }
        self.document_ref.serialize_into(&mut out);
        self.name_page_ref.serialize_into(&mut out);
        self.path_page_ref.serialize_into(&mut out);
        self.cas_page_ref.serialize_into(&mut out);
        self.path_summary_ref.serialize_into(&mut out);
        out
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < 25 {
            return Err(Error::corrupt("revision root: truncated"));
        }
        let revision = u32::from_le_bytes(bytes[0..4].try_into().unwrap());
        let max_node_key = u64::from_le_bytes(bytes[4..12].try_into().unwrap());
        let document_height = bytes[12];
        let commit_timestamp_millis = i64::from_le_bytes(bytes[13..21].try_into().unwrap());
        let message_len = u32::from_le_bytes(bytes[21..25].try_into().unwrap());
        let mut off: usize = 25;
        let commit_message = if message_len == u32::MAX {
            None
        } else {
            let len = message_len as usize;
            let end = off
                .checked_add(len)
                .filter(|&end| end <= bytes.len())
                .ok_or_else(|| Error::corrupt("revision root: truncated message"))?;
            let message = std::str::from_utf8(&bytes[off..end])
                .map_err(|_| Error::corrupt("revision root: invalid message"))?
                .to_string();
            off = end;
            Some(message)
        };
        let document_ref = PageReference::deserialize_from(bytes, &mut off)?;
        let name_page_ref = PageReference::deserialize_from(bytes, &mut off)?;
        let path_page_ref = PageReference::deserialize_from(bytes, &mut off)?;
        let cas_page_ref = PageReference::deserialize_from(bytes, &mut off)?;
        let path_summary_ref = PageReference::deserialize_from(bytes, &mut off)?;
        if off != bytes.len() {
            return Err(Error::corrupt("revision root: trailing bytes"));
        }
        Ok(Self {
            revision,
            max_node_key,
            document_ref,
            document_height,
            name_page_ref,
            path_page_ref,
            cas_page_ref,
            path_summary_ref,
            commit_timestamp_millis,
            commit_message,
        })
    }
}
