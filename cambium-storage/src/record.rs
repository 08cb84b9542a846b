use crate::dewey::DeweyId;
use crate::{Error, NO_KEY, Result};
use cambium_api::{NameKey, NodeKey, RevisionNumber};

/// On-disk record kind tags; never reorder.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordKind {
    Element = 0,
    Attribute = 1,
    Namespace = 2,
    Text = 3,
    Comment = 4,
    ProcessingInstruction = 5,
    ObjectNode = 6,
    ArrayNode = 7,
    ObjectKey = 8,
    PathNode = 9,
    NameCount = 10,
}

impl RecordKind {
    pub fn from_tag(tag: u8) -> Option<Self> {
        use RecordKind::*;
        match tag {
            0 => Some(Element),
            1 => Some(Attribute),
            2 => Some(Namespace),
            3 => Some(Text),
            4 => Some(Comment),
            5 => Some(ProcessingInstruction),
            6 => Some(ObjectNode),
            7 => Some(ArrayNode),
            8 => Some(ObjectKey),
            9 => Some(PathNode),
            10 => Some(NameCount),
            _ => None,
        }
    }
}

/// Identity and revision bookkeeping common to every record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeDelegate {
    pub node_key: NodeKey,
    pub parent_key: i64,
    pub previous_revision: RevisionNumber,
    pub last_modified_revision: RevisionNumber,
    pub hash: u64,
    pub dewey_id: Option<DeweyId>,
}

impl NodeDelegate {
    pub fn new(node_key: NodeKey, parent_key: i64, revision: RevisionNumber) -> Self {
        Self {
            node_key,
            parent_key,
            previous_revision: revision.wrapping_sub(1),
            last_modified_revision: revision,
            hash: 0,
            dewey_id: None,
        }
    }
}

/// Sibling and child links for structural records. Links are node keys,
/// never references; `NO_KEY` means absent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructDelegate {
    pub left_sibling: i64,
    pub right_sibling: i64,
    pub first_child: i64,
    pub last_child: i64,
    pub child_count: u64,
    pub descendant_count: u64,
}

impl Default for StructDelegate {
    fn default() -> Self {
        Self {
            left_sibling: NO_KEY,
            right_sibling: NO_KEY,
            first_child: NO_KEY,
            last_child: NO_KEY,
            child_count: 0,
            descendant_count: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record {
    Element {
        node: NodeDelegate,
        structure: StructDelegate,
        name_key: NameKey,
        uri_key: NameKey,
        path_node_key: i64,
    },
    Attribute {
        node: NodeDelegate,
        name_key: NameKey,
        uri_key: NameKey,
        path_node_key: i64,
        value: Vec<u8>,
    },
    Namespace {
        node: NodeDelegate,
        prefix_key: NameKey,
        uri_key: NameKey,
        path_node_key: i64,
    },
    Text {
        node: NodeDelegate,
        structure: StructDelegate,
        value: Vec<u8>,
    },
    Comment {
        node: NodeDelegate,
        structure: StructDelegate,
        value: Vec<u8>,
    },
    ProcessingInstruction {
        node: NodeDelegate,
        structure: StructDelegate,
        name_key: NameKey,
        path_node_key: i64,
        value: Vec<u8>,
    },
    ObjectNode {
        node: NodeDelegate,
        structure: StructDelegate,
    },
    ArrayNode {
        node: NodeDelegate,
        structure: StructDelegate,
        path_node_key: i64,
    },
    ObjectKey {
        node: NodeDelegate,
        structure: StructDelegate,
        name_key: NameKey,
        path_node_key: i64,
    },
    PathNode {
        node: NodeDelegate,
        structure: StructDelegate,
        name_key: NameKey,
        uri_key: NameKey,
        level: u32,
        kind: u8,
        references: u64,
    },
    NameCount {
        node: NodeDelegate,
        count: u64,
    },
}

impl Record {
    pub fn kind(&self) -> RecordKind {
        match self {
            Record::Element { .. } => RecordKind::Element,
            Record::Attribute { .. } => RecordKind::Attribute,
            Record::Namespace { .. } => RecordKind::Namespace,
            Record::Text { .. } => RecordKind::Text,
            Record::Comment { .. } => RecordKind::Comment,
            Record::ProcessingInstruction { .. } => RecordKind::ProcessingInstruction,
            Record::ObjectNode { .. } => RecordKind::ObjectNode,
            Record::ArrayNode { .. } => RecordKind::ArrayNode,
            Record::ObjectKey { .. } => RecordKind::ObjectKey,
            Record::PathNode { .. } => RecordKind::PathNode,
            Record::NameCount { .. } => RecordKind::NameCount,
        }
    }

    pub fn delegate(&self) -> &NodeDelegate {
        match self {
            Record::Element { node, .. }
            | Record::Attribute { node, .. }
            | Record::Namespace { node, .. }
            | Record::Text { node, .. }
            | Record::Comment { node, .. }
            | Record::ProcessingInstruction { node, .. }
            | Record::ObjectNode { node, .. }
            | Record::ArrayNode { node, .. }
            | Record::ObjectKey { node, .. }
            | Record::PathNode { node, .. }
            | Record::NameCount { node, .. } => node,
        }
    }

    pub fn delegate_mut(&mut self) -> &mut NodeDelegate {
        match self {
            Record::Element { node, .. }
            | Record::Attribute { node, .. }
            | Record::Namespace { node, .. }
            | Record::Text { node, .. }
            | Record::Comment { node, .. }
            | Record::ProcessingInstruction { node, .. }
            | Record::ObjectNode { node, .. }
            | Record::ArrayNode { node, .. }
            | Record::ObjectKey { node, .. }
            | Record::PathNode { node, .. }
            | Record::NameCount { node, .. } => node,
        }
    }

    pub fn structure(&self) -> Option<&StructDelegate> {
        match self {
            Record::Element { structure, .. }
            | Record::Text { structure, .. }
            | Record::Comment { structure, .. }
            | Record::ProcessingInstruction { structure, .. }
            | Record::ObjectNode { structure, .. }
            | Record::ArrayNode { structure, .. }
            | Record::ObjectKey { structure, .. }
            | Record::PathNode { structure, .. } => Some(structure),
            Record::Attribute { .. } | Record::Namespace { .. } | Record::NameCount { .. } => None,
        }
    }

    pub fn structure_mut(&mut self) -> Option<&mut StructDelegate> {
        match self {
            Record::Element { structure, .. }
            | Record::Text { structure, .. }
            | Record::Comment { structure, .. }
            | Record::ProcessingInstruction { structure, .. }
            | Record::ObjectNode { structure, .. }
            | Record::ArrayNode { structure, .. }
            | Record::ObjectKey { structure, .. }
            | Record::PathNode { structure, .. } => Some(structure),
            Record::Attribute { .. } | Record::Namespace { .. } | Record::NameCount { .. } => None,
        }
    }

    pub fn node_key(&self) -> NodeKey {
        self.delegate().node_key
    }

    /// Raw value for value-bearing kinds.
    pub fn value(&self) -> Option<&[u8]> {
        match self {
            Record::Attribute { value, .. }
            | Record::Text { value, .. }
            | Record::Comment { value, .. }
            | Record::ProcessingInstruction { value, .. } => Some(value),
            _ => None,
        }
    }

    pub fn set_value(&mut self, new_value: Vec<u8>) -> Result<()> {
        match self {
            Record::Attribute { value, .. }
            | Record::Text { value, .. }
            | Record::Comment { value, .. }
            | Record::ProcessingInstruction { value, .. } => {
                *value = new_value;
                Ok(())
            }
            other => Err(Error::usage(format!(
                "record kind {:?} carries no raw value",
                other.kind()
            ))),
        }
    }

    /// Stable 64-bit hash of the kind-specific payload, excluding revision
    /// bookkeeping so that an untouched record hashes identically across
    /// revisions.
    pub fn payload_hash(&self) -> u64 {
        let mut bytes = Vec::with_capacity(64);
        self.write_payload(&mut bytes);
        bytes.push(self.kind() as u8);
        fnv1a64(&bytes)
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(96);
        out.push(self.kind() as u8);
        write_delegate(&mut out, self.delegate());
        if let Some(structure) = self.structure() {
            write_structure(&mut out, structure);
        }
        self.write_payload(&mut out);
        out
    }

    fn write_payload(&self, out: &mut Vec<u8>) {
        match self {
            Record::Element {
                name_key,
                uri_key,
                path_node_key,
                ..
            } => {
                out.extend_from_slice(&name_key.to_le_bytes());
                out.extend_from_slice(&uri_key.to_le_bytes());
                out.extend_from_slice(&path_node_key.to_le_bytes());
            }
            Record::Attribute {
                name_key,
                uri_key,
                path_node_key,
                value,
                ..
            } => {
                out.extend_from_slice(&name_key.to_le_bytes());
                out.extend_from_slice(&uri_key.to_le_bytes());
                out.extend_from_slice(&path_node_key.to_le_bytes());
                write_bytes(out, value);
            }
            Record::Namespace {
                prefix_key,
                uri_key,
                path_node_key,
                ..
            } => {
                out.extend_from_slice(&prefix_key.to_le_bytes());
                out.extend_from_slice(&uri_key.to_le_bytes());
                out.extend_from_slice(&path_node_key.to_le_bytes());
            }
            Record::Text { value, .. } | Record::Comment { value, .. } => {
                write_bytes(out, value);
            }
            Record::ProcessingInstruction {
                name_key,
                path_node_key,
                value,
                ..
            } => {
                out.extend_from_slice(&name_key.to_le_bytes());
                out.extend_from_slice(&path_node_key.to_le_bytes());
                write_bytes(out, value);
            }
            Record::ObjectNode { .. } => {}
            Record::ArrayNode { path_node_key, .. } => {
                out.extend_from_slice(&path_node_key.to_le_bytes());
            }
            Record::ObjectKey {
                name_key,
                path_node_key,
                ..
            } => {
                out.extend_from_slice(&name_key.to_le_bytes());
                out.extend_from_slice(&path_node_key.to_le_bytes());
            }
            Record::PathNode {
                name_key,
                uri_key,
                level,
                kind,
                references,
                ..
            } => {
                out.extend_from_slice(&name_key.to_le_bytes());
                out.extend_from_slice(&uri_key.to_le_bytes());
                out.extend_from_slice(&level.to_le_bytes());
                out.push(*kind);
                out.extend_from_slice(&references.to_le_bytes());
            }
            Record::NameCount { count, .. } => {
                out.extend_from_slice(&count.to_le_bytes());
            }
        }
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        let mut r = Reader { bytes, off: 0 };
        let tag = r.read_u8()?;
        let kind =
            RecordKind::from_tag(tag).ok_or_else(|| Error::corrupt("record: unknown kind tag"))?;
        let node = read_delegate(&mut r)?;
        let record = match kind {
            RecordKind::Element => Record::Element {
                node,
                structure: read_structure(&mut r)?,
                name_key: r.read_i32()?,
                uri_key: r.read_i32()?,
                path_node_key: r.read_i64()?,
            },
            RecordKind::Attribute => Record::Attribute {
                node,
                name_key: r.read_i32()?,
                uri_key: r.read_i32()?,
                path_node_key: r.read_i64()?,
                value: r.read_bytes()?,
            },
            RecordKind::Namespace => Record::Namespace {
                node,
                prefix_key: r.read_i32()?,
                uri_key: r.read_i32()?,
                path_node_key: r.read_i64()?,
            },
            RecordKind::Text => Record::Text {
                node,
                structure: read_structure(&mut r)?,
                value: r.read_bytes()?,
            },
            RecordKind::Comment => Record::Comment {
                node,
                structure: read_structure(&mut r)?,
                value: r.read_bytes()?,
            },
            RecordKind::ProcessingInstruction => Record::ProcessingInstruction {
                node,
                structure: read_structure(&mut r)?,
                name_key: r.read_i32()?,
                path_node_key: r.read_i64()?,
                value: r.read_bytes()?,
            },
            RecordKind::ObjectNode => Record::ObjectNode {
                node,
                structure: read_structure(&mut r)?,
            },
            RecordKind::ArrayNode => Record::ArrayNode {
                node,
                structure: read_structure(&mut r)?,
                path_node_key: r.read_i64()?,
            },
            RecordKind::ObjectKey => Record::ObjectKey {
                node,
                structure: read_structure(&mut r)?,
                name_key: r.read_i32()?,
                path_node_key: r.read_i64()?,
            },
            RecordKind::PathNode => Record::PathNode {
                node,
                structure: read_structure(&mut r)?,
                name_key: r.read_i32()?,
                uri_key: r.read_i32()?,
                level: r.read_u32()?,
                kind: r.read_u8()?,
                references: r.read_u64()?,
            },
            RecordKind::NameCount => Record::NameCount {
                node,
                count: r.read_u64()?,
            },
        };
        if r.off != bytes.len() {
            return Err(Error::corrupt("record: trailing bytes"));
        }
        Ok(record)
    }
}

fn write_delegate(out: &mut Vec<u8>, node: &NodeDelegate) {
    out.extend_from_slice(&node.node_key.to_le_bytes());
    out.extend_from_slice(&node.parent_key.to_le_bytes());
    out.extend_from_slice(&node.previous_revision.to_le_bytes());
    out.extend_from_slice(&node.last_modified_revision.to_le_bytes());
    out.extend_from_slice(&node.hash.to_le_bytes());
    match &node.dewey_id {
        Some(id) => {
            let bytes = id.to_bytes();
            out.extend_from_slice(&(bytes.len() as u16).to_le_bytes());
            out.extend_from_slice(&bytes);
        }
        None => out.extend_from_slice(&0u16.to_le_bytes()),
    }
}

fn read_delegate(r: &mut Reader) -> Result<NodeDelegate> {
    let node_key = r.read_u64()?;
    let parent_key = r.read_i64()?;
    let previous_revision = r.read_u32()?;
    let last_modified_revision = r.read_u32()?;
    let hash = r.read_u64()?;
    let dewey_len = r.read_u16()? as usize;
    let dewey_id = if dewey_len == 0 {
        None
    } else {
        Some(DeweyId::from_bytes(r.take(dewey_len)?)?)
    };
    Ok(NodeDelegate {
        node_key,
        parent_key,
        previous_revision,
        last_modified_revision,
        hash,
        dewey_id,
    })
}

fn write_structure(out: &mut Vec<u8>, s: &StructDelegate) {
    out.extend_from_slice(&s.left_sibling.to_le_bytes());
    out.extend_from_slice(&s.right_sibling.to_le_bytes());
    out.extend_from_slice(&s.first_child.to_le_bytes());
    out.extend_from_slice(&s.last_child.to_le_bytes());
    out.extend_from_slice(&s.child_count.to_le_bytes());
    out.extend_from_slice(&s.descendant_count.to_le_bytes());
}

fn read_structure(r: &mut Reader) -> Result<StructDelegate> {
    Ok(StructDelegate {
        left_sibling: r.read_i64()?,
        right_sibling: r.read_i64()?,
        first_child: r.read_i64()?,
        last_child: r.read_i64()?,
        child_count: r.read_u64()?,
        descendant_count: r.read_u64()?,
    })
}

fn write_bytes(out: &mut Vec<u8>, bytes: &[u8]) {
    out.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
    out.extend_from_slice(bytes);
}

/// FNV-1a, 64 bit. The constants are part of the on-disk format.
fn fnv1a64(bytes: &[u8]) -> u64 {
    let mut hash = 0xcbf2_9ce4_8422_2325u64;
    for &b in bytes {
        hash ^= b as u64;
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

struct Reader<'a> {
    bytes: &'a [u8],
    off: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self
            .off
            .checked_add(n)
            .filter(|&end| end <= self.bytes.len())
            .ok_or_else(|| Error::corrupt("record: truncated"))?;
        let out = &self.bytes[self.off..end];
        self.off = end;
        Ok(out)
    }

    fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn read_u16(&mut self) -> Result<u16> {
        Ok(u16::from_le_bytes(self.take(2)?.try_into().unwrap()))
    }

    fn read_u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn read_i32(&mut self) -> Result<i32> {
        Ok(i32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn read_u64(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    fn read_i64(&mut self) -> Result<i64> {
        Ok(i64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    fn read_bytes(&mut self) -> Result<Vec<u8>> {
        let len = self.read_u32()? as usize;
        Ok(self.take(len)?.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn element(node_key: NodeKey) -> Record {
        Record::Element {
            node: NodeDelegate::new(node_key, 0, 1),
            structure: StructDelegate::default(),
            name_key: 17,
            uri_key: -1,
            path_node_key: 3,
        }
    }

    #[test]
    fn element_round_trip() {
        let record = element(42);
        let back = Record::deserialize(&record.serialize()).unwrap();
        assert_eq!(back, record);
        assert_eq!(back.kind(), RecordKind::Element);
    }

    #[test]
    fn text_round_trip_with_dewey_id() {
        let mut node = NodeDelegate::new(9, 2, 4);
        node.dewey_id = Some(DeweyId::root().new_child());
        let record = Record::Text {
            node,
            structure: StructDelegate {
                left_sibling: 7,
                right_sibling: NO_KEY,
                ..StructDelegate::default()
            },
            value: b"hello".to_vec(),
        };
        let back = Record::deserialize(&record.serialize()).unwrap();
        assert_eq!(back, record);
        assert_eq!(back.value(), Some(&b"hello"[..]));
    }

    #[test]
    fn payload_hash_ignores_revision_bookkeeping() {
        let a = element(1);
        let mut b = element(1);
        b.delegate_mut().last_modified_revision = 99;
        b.delegate_mut().previous_revision = 98;
        assert_eq!(a.payload_hash(), b.payload_hash());

        let Record::Element { name_key, .. } = &mut b else {
            unreachable!()
        };
        *name_key = 18;
        assert_ne!(a.payload_hash(), b.payload_hash());
    }

    #[test]
    fn set_value_rejects_structural_kinds() {
        let mut record = element(5);
        assert!(record.set_value(b"x".to_vec()).is_err());
    }

    #[test]
    fn truncated_input_is_corruption() {
        let bytes = element(1).serialize();
        assert!(Record::deserialize(&bytes[..bytes.len() - 1]).is_err());
        assert!(matches!(
            Record::deserialize(&bytes[..10]),
            Err(Error::Corruption(_))
        ));
    }
}
