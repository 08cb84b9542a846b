use crate::{Error, Result};
use cambium_api::PathNodeKey;
use ordered_float::OrderedFloat;

/// Order-preserving key codec for one index kind.
///
/// `a < b` iff the serialized forms compare below zero under unsigned
/// byte compare. The trie depends on this, so every implementation is
/// covered by an ordering property test.
pub trait KeySerializer {
    type Key;

    /// Writes the key at `dst[off..]`, growing `dst` as needed, and
    /// returns the number of bytes written.
    fn serialize(&self, key: &Self::Key, dst: &mut Vec<u8>, off: usize) -> usize;

    fn deserialize(&self, bytes: &[u8], off: usize, len: usize) -> Result<Self::Key>;
}

/// PATH index keys: signed 64-bit path class keys. The sign bit is
/// flipped before the big-endian write so signed order maps to unsigned
/// byte order.
#[derive(Debug, Clone, Copy, Default)]
pub struct LongKeySerializer;

impl KeySerializer for LongKeySerializer {
    type Key = i64;

    fn serialize(&self, key: &Self::Key, dst: &mut Vec<u8>, off: usize) -> usize {
        let flipped = (*key as u64) ^ (1 << 63);
        ensure_len(dst, off + 8);
        dst[off..off + 8].copy_from_slice(&flipped.to_be_bytes());
        8
    }

    fn deserialize(&self, bytes: &[u8], off: usize, len: usize) -> Result<Self::Key> {
        if len != 8 || off + 8 > bytes.len() {
            return Err(Error::corrupt("long key: bad length"));
        }
        let flipped = u64::from_be_bytes(bytes[off..off + 8].try_into().unwrap());
        Ok((flipped ^ (1 << 63)) as i64)
    }
}

/// Qualified name: UTF-8 prefix, NUL, UTF-8 local name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct QNm {
    pub prefix: String,
    pub local: String,
}

impl QNm {
    pub fn new(prefix: impl Into<String>, local: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            local: local.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct QnmKeySerializer;

impl KeySerializer for QnmKeySerializer {
    type Key = QNm;

    fn serialize(&self, key: &Self::Key, dst: &mut Vec<u8>, off: usize) -> usize {
        let len = key.prefix.len() + 1 + key.local.len();
        ensure_len(dst, off + len);
        let mut at = off;
        dst[at..at + key.prefix.len()].copy_from_slice(key.prefix.as_bytes());
        at += key.prefix.len();
        dst[at] = 0;
        at += 1;
        dst[at..at + key.local.len()].copy_from_slice(key.local.as_bytes());
        len
    }

    fn deserialize(&self, bytes: &[u8], off: usize, len: usize) -> Result<Self::Key> {
        let slice = bytes
            .get(off..off + len)
            .ok_or_else(|| Error::corrupt("qname key: out of range"))?;
        let nul = slice
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| Error::corrupt("qname key: missing separator"))?;
        let prefix = std::str::from_utf8(&slice[..nul])
            .map_err(|_| Error::corrupt("qname key: invalid prefix"))?;
        let local = std::str::from_utf8(&slice[nul + 1..])
            .map_err(|_| Error::corrupt("qname key: invalid local name"))?;
        Ok(QNm::new(prefix, local))
    }
}

/// Typed CAS value. Variant order is the type-tag order and therefore
/// the cross-type sort order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CasValue {
    Bool(bool),
    Int(i64),
    Double(OrderedFloat<f64>),
    Timestamp(i64),
    String(String),
}

const TAG_BOOL: u8 = 1;
const TAG_INT: u8 = 2;
const TAG_DOUBLE: u8 = 3;
const TAG_TIMESTAMP: u8 = 4;
const TAG_STRING: u8 = 5;

/// Composite CAS keys: type tag, order-preserving value encoding, then
/// the owning path class as a big-endian suffix.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CasKey {
    pub value: CasValue,
    pub path_node_key: PathNodeKey,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CasKeySerializer;

impl KeySerializer for CasKeySerializer {
    type Key = CasKey;

    fn serialize(&self, key: &Self::Key, dst: &mut Vec<u8>, off: usize) -> usize {
        let mut buf = Vec::with_capacity(18);
        match &key.value {
            CasValue::Bool(b) => {
                buf.push(TAG_BOOL);
                buf.push(*b as u8);
            }
            CasValue::Int(i) => {
                buf.push(TAG_INT);
                buf.extend_from_slice(&((*i as u64) ^ (1 << 63)).to_be_bytes());
            }
            CasValue::Double(d) => {
                buf.push(TAG_DOUBLE);
                buf.extend_from_slice(&order_f64(d.into_inner()).to_be_bytes());
            }
            CasValue::Timestamp(millis) => {
                buf.push(TAG_TIMESTAMP);
                buf.extend_from_slice(&((*millis as u64) ^ (1 << 63)).to_be_bytes());
            }
            CasValue::String(s) => {
                buf.push(TAG_STRING);
                buf.extend_from_slice(s.as_bytes());
                buf.push(0);
            }
        }
        buf.extend_from_slice(&key.path_node_key.to_be_bytes());

        ensure_len(dst, off + buf.len());
        dst[off..off + buf.len()].copy_from_slice(&buf);
        buf.len()
    }

    fn deserialize(&self, bytes: &[u8], off: usize, len: usize) -> Result<Self::Key> {
        let slice = bytes
            .get(off..off + len)
            .ok_or_else(|| Error::corrupt("cas key: out of range"))?;
        if slice.len() < 9 {
            return Err(Error::corrupt("cas key: too short"));
        }
        let (head, path_bytes) = slice.split_at(slice.len() - 8);
        let path_node_key = u64::from_be_bytes(path_bytes.try_into().unwrap());
        let tag = head[0];
        let payload = &head[1..];
        let value = match tag {
            TAG_BOOL => {
                if payload.len() != 1 {
                    return Err(Error::corrupt("cas key: bad bool"));
                }
                CasValue::Bool(payload[0] != 0)
            }
            TAG_INT | TAG_TIMESTAMP => {
                if payload.len() != 8 {
                    return Err(Error::corrupt("cas key: bad integer"));
                }
                let raw = u64::from_be_bytes(payload.try_into().unwrap()) ^ (1 << 63);
                if tag == TAG_INT {
                    CasValue::Int(raw as i64)
                } else {
                    CasValue::Timestamp(raw as i64)
                }
            }
            TAG_DOUBLE => {
                if payload.len() != 8 {
                    return Err(Error::corrupt("cas key: bad double"));
                }
                let bits = u64::from_be_bytes(payload.try_into().unwrap());
                CasValue::Double(OrderedFloat(unorder_f64(bits)))
            }
            TAG_STRING => {
                let Some((&0, text)) = payload.split_last() else {
                    return Err(Error::corrupt("cas key: unterminated string"));
                };
                let s = std::str::from_utf8(text)
                    .map_err(|_| Error::corrupt("cas key: invalid utf8"))?;
                CasValue::String(s.to_string())
            }
            _ => return Err(Error::corrupt("cas key: unknown type tag")),
        };
        Ok(CasKey {
            value,
            path_node_key,
        })
    }
}

/// Maps f64 bits onto unsigned integers so that the total order of
/// `OrderedFloat` equals unsigned integer order: positive numbers get the
/// sign bit set, negatives are bitwise inverted.
fn order_f64(f: f64) -> u64 {
    let bits = f.to_bits();
    if bits & (1 << 63) == 0 {
        bits | (1 << 63)
    } else {
        !bits
    }
}

fn unorder_f64(ordered: u64) -> f64 {
    let bits = if ordered & (1 << 63) != 0 {
        ordered & !(1 << 63)
    } else {
        !ordered
    };
    f64::from_bits(bits)
}

fn ensure_len(dst: &mut Vec<u8>, len: usize) {
    if dst.len() < len {
        dst.resize(len, 0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn encode<S: KeySerializer>(serializer: &S, key: &S::Key) -> Vec<u8> {
        let mut buf = Vec::new();
        let len = serializer.serialize(key, &mut buf, 0);
        buf.truncate(len);
        buf
    }

    #[test]
    fn long_keys_round_trip_and_sort() {
        let s = LongKeySerializer;
        for key in [i64::MIN, -7, -1, 0, 1, 42, i64::MAX] {
            let bytes = encode(&s, &key);
            assert_eq!(s.deserialize(&bytes, 0, bytes.len()).unwrap(), key);
        }
        assert!(encode(&s, &-5) < encode(&s, &3));
        assert!(encode(&s, &i64::MIN) < encode(&s, &i64::MAX));
    }

    #[test]
    fn qnm_round_trip() {
        let s = QnmKeySerializer;
        let key = QNm::new("ns", "price");
        let bytes = encode(&s, &key);
        assert_eq!(s.deserialize(&bytes, 0, bytes.len()).unwrap(), key);

        let empty_prefix = QNm::new("", "local");
        let bytes = encode(&s, &empty_prefix);
        assert_eq!(bytes[0], 0);
        assert_eq!(s.deserialize(&bytes, 0, bytes.len()).unwrap(), empty_prefix);
    }

    #[test]
    fn cas_type_tags_order_across_types() {
        let s = CasKeySerializer;
        let bool_key = CasKey {
            value: CasValue::Bool(true),
            path_node_key: 1,
        };
        let int_key = CasKey {
            value: CasValue::Int(i64::MIN),
            path_node_key: 1,
        };
        let string_key = CasKey {
            value: CasValue::String("a".into()),
            path_node_key: 1,
        };
        assert!(encode(&s, &bool_key) < encode(&s, &int_key));
        assert!(encode(&s, &int_key) < encode(&s, &string_key));
    }

    #[test]
    fn double_encoding_orders_negatives_and_positives() {
        let s = CasKeySerializer;
        let values = [-1e300, -1.5, -0.0, 0.0, 1e-10, 2.5, 1e300];
        let keys: Vec<Vec<u8>> = values
            .iter()
            .map(|&v| {
                encode(
                    &s,
                    &CasKey {
                        value: CasValue::Double(OrderedFloat(v)),
                        path_node_key: 0,
                    },
                )
            })
            .collect();
        for pair in keys.windows(2) {
            assert!(pair[0] <= pair[1]);
        }
    }

    #[test]
    fn serialize_grows_destination_at_offset() {
        let s = LongKeySerializer;
        let mut buf = vec![0u8; 3];
        let len = s.serialize(&7, &mut buf, 100);
        assert_eq!(len, 8);
        assert_eq!(buf.len(), 108);
        assert_eq!(s.deserialize(&buf, 100, 8).unwrap(), 7);
    }

    proptest! {
        #[test]
        fn long_order_preservation(a in any::<i64>(), b in any::<i64>()) {
            let s = LongKeySerializer;
            let (ba, bb) = (encode(&s, &a), encode(&s, &b));
            prop_assert_eq!(a.cmp(&b), ba.cmp(&bb));
        }

        #[test]
        fn qnm_order_preservation(
            p1 in "[a-z]{0,4}", l1 in "[a-z]{1,6}",
            p2 in "[a-z]{0,4}", l2 in "[a-z]{1,6}",
        ) {
            let s = QnmKeySerializer;
            let a = QNm::new(p1, l1);
            let b = QNm::new(p2, l2);
            let (ba, bb) = (encode(&s, &a), encode(&s, &b));
            prop_assert_eq!(a.cmp(&b), ba.cmp(&bb));
        }

        #[test]
        fn cas_int_order_preservation(
            a in any::<i64>(), b in any::<i64>(),
            pa in any::<u64>(), pb in any::<u64>(),
        ) {
            let s = CasKeySerializer;
            let ka = CasKey { value: CasValue::Int(a), path_node_key: pa };
            let kb = CasKey { value: CasValue::Int(b), path_node_key: pb };
            let (ba, bb) = (encode(&s, &ka), encode(&s, &kb));
            prop_assert_eq!(ka.cmp(&kb), ba.cmp(&bb));
        }

        #[test]
        fn cas_round_trip(v in any::<i64>(), path in any::<u64>()) {
            let s = CasKeySerializer;
            let key = CasKey { value: CasValue::Int(v), path_node_key: path };
            let bytes = encode(&s, &key);
            prop_assert_eq!(s.deserialize(&bytes, 0, bytes.len()).unwrap(), key);
        }
    }
}
