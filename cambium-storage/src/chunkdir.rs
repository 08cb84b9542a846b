use crate::{Error, Result};
use cambium_api::{PageKey, RevisionNumber};

/// One prior-revision fragment a chunk still depends on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FragmentPointer {
    pub revision: RevisionNumber,
    pub key: u64,
    pub database_id: u16,
    pub resource_id: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkEntry {
    pub chunk_index: u32,
    pub page_key: PageKey,
    pub fragments: Vec<FragmentPointer>,
}

/// Serialized index of the chunks backing one oversized value.
///
/// An empty directory (`chunk_count == 0`) is the tombstone form.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChunkDirectory {
    pub chunks: Vec<ChunkEntry>,
}

impl ChunkDirectory {
    pub fn is_tombstone(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(4 + self.chunks.len() * 16);
        out.extend_from_slice(&(self.chunks.len() as u32).to_le_bytes());
        for chunk in &self.chunks {
            out.extend_from_slice(&chunk.chunk_index.to_le_bytes());
            out.extend_from_slice(&chunk.page_key.to_le_bytes());
            out.extend_from_slice(&(chunk.fragments.len() as u32).to_le_bytes());
            for frag in &chunk.fragments {
                out.extend_from_slice(&frag.revision.to_le_bytes());
                out.extend_from_slice(&frag.key.to_le_bytes());
                out.extend_from_slice(&frag.database_id.to_le_bytes());
                out.extend_from_slice(&frag.resource_id.to_le_bytes());
            }
        }
        out
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        let mut cursor = Cursor { bytes, off: 0 };
        let chunk_count = cursor.read_u32()? as usize;
        let mut chunks = Vec::with_capacity(chunk_count.min(1024));
        for _ in 0..chunk_count {
            let chunk_index = cursor.read_u32()?;
            let page_key = cursor.read_u64()?;
            let fragment_count = cursor.read_u32()? as usize;
            let mut fragments = Vec::with_capacity(fragment_count.min(1024));
            for _ in 0..fragment_count {
                fragments.push(FragmentPointer {
                    revision: cursor.read_u32()?,
                    key: cursor.read_u64()?,
                    database_id: cursor.read_u16()?,
                    resource_id: cursor.read_u16()?,
                });
            }
            chunks.push(ChunkEntry {
                chunk_index,
                page_key,
                fragments,
            });
        }
        if cursor.off != bytes.len() {
            return Err(Error::corrupt("chunk directory: trailing bytes"));
        }
        Ok(Self { chunks })
    }
}

struct Cursor<'a> {
    bytes: &'a [u8],
    off: usize,
}

impl Cursor<'_> {
    fn take(&mut self, n: usize) -> Result<&[u8]> {
        let end = self
            .off
            .checked_add(n)
            .filter(|&end| end <= self.bytes.len())
            .ok_or_else(|| Error::corrupt("chunk directory: truncated"))?;
        let out = &self.bytes[self.off..end];
        self.off = end;
        Ok(out)
    }

    fn read_u16(&mut self) -> Result<u16> {
        Ok(u16::from_le_bytes(self.take(2)?.try_into().unwrap()))
    }

    fn read_u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn read_u64(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }
}
