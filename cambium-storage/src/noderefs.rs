use crate::{Error, Result};
use cambium_api::NodeKey;
use croaring::{Bitmap, Portable};
use std::collections::BTreeMap;

/// Serialization tag for the packed small-set format.
const TAG_PACKED: u8 = 0x00;
/// Serialization tag for the roaring-compressed format.
const TAG_ROARING: u8 = 0xFF;
/// A value consisting of this single byte marks a deleted entry.
pub const TAG_TOMBSTONE: u8 = 0xFE;

/// Sets with at most this many keys are written in the packed format.
const PACKED_LIMIT: u64 = 64;

/// Compressed set of node keys referenced by one secondary-index entry.
///
/// Keys are 64-bit, so the set is bucketed by the high 32 bits with one
/// roaring bitmap of low words per bucket.
#[derive(Debug, Clone, Default)]
pub struct NodeReferences {
    buckets: BTreeMap<u32, Bitmap>,
}

impl PartialEq for NodeReferences {
    fn eq(&self, other: &Self) -> bool {
        self.cardinality() == other.cardinality()
            && self.iter().zip(other.iter()).all(|(a, b)| a == b)
    }
}

#[inline]
fn split(key: NodeKey) -> (u32, u32) {
    ((key >> 32) as u32, key as u32)
}

impl NodeReferences {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_key(key: NodeKey) -> Self {
        let mut refs = Self::new();
        refs.add(key);
        refs
    }

    pub fn add(&mut self, key: NodeKey) {
        let (high, low) = split(key);
        self.buckets.entry(high).or_insert_with(Bitmap::new).add(low);
    }

    pub fn remove(&mut self, key: NodeKey) {
        let (high, low) = split(key);
        if let Some(bucket) = self.buckets.get_mut(&high) {
            bucket.remove(low);
            if bucket.is_empty() {
                self.buckets.remove(&high);
            }
        }
    }

    pub fn contains(&self, key: NodeKey) -> bool {
        let (high, low) = split(key);
        self.buckets
            .get(&high)
            .is_some_and(|bucket| bucket.contains(low))
    }

    pub fn cardinality(&self) -> u64 {
        self.buckets.values().map(Bitmap::cardinality).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Union `other` into `self`.
    pub fn union(&mut self, other: &NodeReferences) {
        for (&high, bucket) in &other.buckets {
            self.buckets
                .entry(high)
                .or_insert_with(Bitmap::new)
                .or_inplace(bucket);
        }
    }

    /// Ascending key order.
    pub fn iter(&self) -> impl Iterator<Item = NodeKey> + '_ {
        self.buckets.iter().flat_map(|(&high, bucket)| {
            bucket
                .iter()
                .map(move |low| ((high as u64) << 32) | low as u64)
        })
    }

    /// Wire format: `[0x00][count:u8][key:u64 LE × count]` up to 64 keys,
    /// `[0xFF][roaring buckets]` above, `[0xFE]` for the empty set.
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.serialize_into(&mut out);
        out
    }

    /// Appends the wire form to `out`, growing it as needed.
    pub fn serialize_into(&self, out: &mut Vec<u8>) {
        let card = self.cardinality();
        if card == 0 {
            out.push(TAG_TOMBSTONE);
            return;
        }
        if card <= PACKED_LIMIT {
            out.reserve(2 + card as usize * 8);
            out.push(TAG_PACKED);
            out.push(card as u8);
            for key in self.iter() {
                out.extend_from_slice(&key.to_le_bytes());
            }
            return;
        }
        out.push(TAG_ROARING);
        out.extend_from_slice(&(self.buckets.len() as u32).to_le_bytes());
        for (&high, bucket) in &self.buckets {
            let bytes = bucket.serialize::<Portable>();
            out.reserve(8 + bytes.len());
            out.extend_from_slice(&high.to_le_bytes());
            out.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
            out.extend_from_slice(&bytes);
        }
    }

    /// Returns `None` for a tombstone.
    pub fn deserialize(bytes: &[u8]) -> Result<Option<Self>> {
        let Some(&tag) = bytes.first() else {
            return Err(Error::corrupt("node references: empty value"));
        };
        match tag {
            TAG_TOMBSTONE => Ok(None),
            TAG_PACKED => {
                let Some(&count) = bytes.get(1) else {
                    return Err(Error::corrupt("node references: truncated packed header"));
                };
                let count = count as usize;
                let payload = &bytes[2..];
                if payload.len() != count * 8 {
                    return Err(Error::corrupt("node references: bad packed length"));
                }
                let mut refs = Self::new();
                for chunk in payload.chunks_exact(8) {
                    refs.add(u64::from_le_bytes(chunk.try_into().unwrap()));
                }
                Ok(Some(refs))
            }
            TAG_ROARING => {
                let mut off = 1usize;
                let bucket_count = read_u32(bytes, &mut off)? as usize;
                let mut refs = Self::new();
                for _ in 0..bucket_count {
                    let high = read_u32(bytes, &mut off)?;
                    let len = read_u32(bytes, &mut off)? as usize;
                    let end = off
                        .checked_add(len)
                        .filter(|&end| end <= bytes.len())
                        .ok_or_else(|| Error::corrupt("node references: truncated bucket"))?;
                    let bucket = Bitmap::deserialize::<Portable>(&bytes[off..end]);
                    off = end;
                    if bucket.is_empty() {
                        return Err(Error::corrupt("node references: empty roaring bucket"));
                    }
                    refs.buckets.insert(high, bucket);
                }
                if off != bytes.len() {
                    return Err(Error::corrupt("node references: trailing bytes"));
                }
                Ok(Some(refs))
            }
            other => Err(Error::corrupt(format!(
                "node references: unknown tag {other:#04x}"
            ))),
        }
    }
}

fn read_u32(bytes: &[u8], off: &mut usize) -> Result<u32> {
    let end = *off + 4;
    if end > bytes.len() {
        return Err(Error::corrupt("node references: truncated"));
    }
    let v = u32::from_le_bytes(bytes[*off..end].try_into().unwrap());
    *off = end;
    Ok(v)
}

pub fn is_tombstone(value: &[u8]) -> bool {
    value == [TAG_TOMBSTONE]
}
