use serde::{Deserialize, Serialize};

/// Record identifier, unique within a resource's document index.
pub type NodeKey = u64;
/// Leaf page address within one index tree.
pub type PageKey = u64;
/// Monotonically increasing commit counter, one per revision.
pub type RevisionNumber = u32;
/// Interned qualified-name key; `NO_NAME_KEY` means absent.
pub type NameKey = i32;
/// Key into the path summary tree.
pub type PathNodeKey = u64;

pub const NO_NAME_KEY: NameKey = -1;

/// The index trees a resource maintains. The discriminant doubles as the
/// on-disk tag, so variants must never be reordered.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IndexType {
    Document = 0,
    Name = 1,
    Path = 2,
    Cas = 3,
    PathSummary = 4,
}

impl IndexType {
    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(IndexType::Document),
            1 => Some(IndexType::Name),
            2 => Some(IndexType::Path),
            3 => Some(IndexType::Cas),
            4 => Some(IndexType::PathSummary),
            _ => None,
        }
    }

    #[inline]
    pub fn tag(self) -> u8 {
        self as u8
    }
}

/// Lookup mode for point queries against a secondary index.
///
/// Only `Equal` is served by `get`; the ordered variants exist for the
/// range cursor and are rejected elsewhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchMode {
    Equal,
    Greater,
    GreaterOrEqual,
    Lower,
    LowerOrEqual,
}

/// Shape of the documents a database stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TreeKind {
    #[serde(rename = "XML")]
    Xml,
    #[serde(rename = "JSON")]
    Json,
}

/// Structural operation reported to the path summary when a node changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathOp {
    SetName,
    Moved,
    MovedOnSameLevel,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_type_tags_round_trip() {
        for t in [
            IndexType::Document,
            IndexType::Name,
            IndexType::Path,
            IndexType::Cas,
            IndexType::PathSummary,
        ] {
            assert_eq!(IndexType::from_tag(t.tag()), Some(t));
        }
        assert_eq!(IndexType::from_tag(200), None);
    }

    #[test]
    fn tree_kind_uses_legacy_config_spelling() {
        assert_eq!(serde_json::to_string(&TreeKind::Json).unwrap(), "\"JSON\"");
        assert_eq!(
            serde_json::from_str::<TreeKind>("\"XML\"").unwrap(),
            TreeKind::Xml
        );
    }
}
