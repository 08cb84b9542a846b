pub mod index_roots;
pub mod indirect;
pub mod kv_leaf;
pub mod name_page;
pub mod reference;
pub mod revision_root;
pub mod uber;

use crate::hot::leaf::HotLeafPage;
use crate::hot::node::HotIndirectPage;
use crate::page::index_roots::{IndexRootsPage, PathSummaryPage};
use crate::page::indirect::IndirectPage;
use crate::page::kv_leaf::KeyValueLeafPage;
use crate::page::name_page::NamePage;
use crate::page::reference::PageReference;
use crate::page::revision_root::RevisionRootPage;
use crate::page::uber::UberPage;
use crate::{Error, Result};

/// On-disk page kind tags; never reorder.
const TAG_UBER: u8 = 1;
const TAG_REVISION_ROOT: u8 = 2;
const TAG_INDIRECT: u8 = 3;
const TAG_KV_LEAF: u8 = 4;
const TAG_NAME: u8 = 5;
const TAG_PATH: u8 = 6;
const TAG_CAS: u8 = 7;
const TAG_PATH_SUMMARY: u8 = 8;
const TAG_HOT_LEAF: u8 = 9;
const TAG_HOT_INDIRECT: u8 = 10;

/// Tagged union over every page variant the store persists.
#[derive(Debug, Clone)]
pub enum Page {
    Uber(UberPage),
    RevisionRoot(RevisionRootPage),
    Indirect(IndirectPage),
    KeyValueLeaf(KeyValueLeafPage),
    Name(NamePage),
    Path(IndexRootsPage),
    Cas(IndexRootsPage),
    PathSummary(PathSummaryPage),
    HotLeaf(HotLeafPage),
    HotIndirect(HotIndirectPage),
}

impl Page {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Page::Uber(_) => "uber",
            Page::RevisionRoot(_) => "revision-root",
            Page::Indirect(_) => "indirect",
            Page::KeyValueLeaf(_) => "kv-leaf",
            Page::Name(_) => "name",
            Page::Path(_) => "path",
            Page::Cas(_) => "cas",
            Page::PathSummary(_) => "path-summary",
            Page::HotLeaf(_) => "hot-leaf",
            Page::HotIndirect(_) => "hot-indirect",
        }
    }

    /// Every child reference this page owns, in a stable order.
    pub fn references_mut(&mut self) -> Vec<&mut PageReference> {
        match self {
            Page::Uber(p) => vec![&mut p.revision_root_ref],
            Page::RevisionRoot(p) => p.references_mut().into_iter().collect(),
            Page::Indirect(p) => p.references_mut().iter_mut().collect(),
            Page::KeyValueLeaf(_) | Page::HotLeaf(_) => Vec::new(),
            Page::Name(p) => p.references_mut().collect(),
            Page::Path(p) | Page::Cas(p) => p.references_mut().collect(),
            Page::PathSummary(p) => vec![&mut p.tree_ref],
            Page::HotIndirect(p) => p.children_mut().iter_mut().collect(),
        }
    }

    /// Rough in-memory footprint for buffer accounting.
    pub fn estimated_size(&self) -> usize {
        match self {
            Page::Uber(p) => 64 + p.past_roots.len() * 8,
            Page::RevisionRoot(_) => 256,
            Page::Indirect(p) => {
                crate::INDIRECT_FANOUT / 8 + 48 + p.present_count() * 48
            }
            Page::KeyValueLeaf(p) => 64 + p.entry_count() * 160,
            Page::Name(p) => 128 + p.serialize().len(),
            Page::Path(p) | Page::Cas(p) => 64 + p.serialize().len(),
            Page::PathSummary(_) => 64,
            Page::HotLeaf(_) => crate::HOT_LEAF_SIZE,
            Page::HotIndirect(p) => 96 + p.num_children() * 56,
        }
    }

    pub fn serialize(&self) -> Vec<u8> {
        let (tag, body) = match self {
            Page::Uber(p) => (TAG_UBER, p.serialize()),
            Page::RevisionRoot(p) => (TAG_REVISION_ROOT, p.serialize()),
            Page::Indirect(p) => (TAG_INDIRECT, p.serialize()),
            Page::KeyValueLeaf(p) => (TAG_KV_LEAF, p.serialize()),
            Page::Name(p) => (TAG_NAME, p.serialize()),
            Page::Path(p) => (TAG_PATH, p.serialize()),
            Page::Cas(p) => (TAG_CAS, p.serialize()),
            Page::PathSummary(p) => (TAG_PATH_SUMMARY, p.serialize()),
            Page::HotLeaf(p) => (TAG_HOT_LEAF, p.serialize()),
            Page::HotIndirect(p) => (TAG_HOT_INDIRECT, p.serialize()),
        };
        let mut out = Vec::with_capacity(1 + body.len());
        out.push(tag);
        out.extend_from_slice(&body);
        out
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        let Some((&tag, body)) = bytes.split_first() else {
            return Err(Error::corrupt("page: empty block"));
        };
        Ok(match tag {
            TAG_UBER => Page::Uber(UberPage::deserialize(body)?),
            TAG_REVISION_ROOT => Page::RevisionRoot(RevisionRootPage::deserialize(body)?),
            TAG_INDIRECT => Page::Indirect(IndirectPage::deserialize(body)?),
            TAG_KV_LEAF => Page::KeyValueLeaf(KeyValueLeafPage::deserialize(body)?),
            TAG_NAME => Page::Name(NamePage::deserialize(body)?),
            TAG_PATH => Page::Path(IndexRootsPage::deserialize(body)?),
            TAG_CAS => Page::Cas(IndexRootsPage::deserialize(body)?),
            TAG_PATH_SUMMARY => Page::PathSummary(PathSummaryPage::deserialize(body)?),
            TAG_HOT_LEAF => Page::HotLeaf(HotLeafPage::deserialize(body)?),
            TAG_HOT_INDIRECT => Page::HotIndirect(HotIndirectPage::deserialize(body)?),
            other => {
                return Err(Error::corrupt(format!("page: unknown tag {other}")));
            }
        })
    }

    pub fn as_uber(&self) -> Result<&UberPage> {
        match self {
            Page::Uber(p) => Ok(p),
            other => Err(Error::corrupt(format!("expected uber page, found {}", other.kind_name()))),
        }
    }

    pub fn as_revision_root(&self) -> Result<&RevisionRootPage> {
        match self {
            Page::RevisionRoot(p) => Ok(p),
            other => Err(Error::corrupt(format!(
                "expected revision root, found {}",
                other.kind_name()
            ))),
        }
    }

    pub fn as_indirect(&self) -> Result<&IndirectPage> {
        match self {
            Page::Indirect(p) => Ok(p),
            other => Err(Error::corrupt(format!(
                "expected indirect page, found {}",
                other.kind_name()
            ))),
        }
    }

    pub fn as_indirect_mut(&mut self) -> Result<&mut IndirectPage> {
        match self {
            Page::Indirect(p) => Ok(p),
            other => Err(Error::corrupt(format!(
                "expected indirect page, found {}",
                other.kind_name()
            ))),
        }
    }

    pub fn as_kv_leaf(&self) -> Result<&KeyValueLeafPage> {
        match self {
            Page::KeyValueLeaf(p) => Ok(p),
            other => Err(Error::corrupt(format!(
                "expected kv leaf, found {}",
                other.kind_name()
            ))),
        }
    }

    pub fn as_kv_leaf_mut(&mut self) -> Result<&mut KeyValueLeafPage> {
        match self {
            Page::KeyValueLeaf(p) => Ok(p),
            other => Err(Error::corrupt(format!(
                "expected kv leaf, found {}",
                other.kind_name()
            ))),
        }
    }

    pub fn as_name(&self) -> Result<&NamePage> {
        match self {
            Page::Name(p) => Ok(p),
            other => Err(Error::corrupt(format!(
                "expected name page, found {}",
                other.kind_name()
            ))),
        }
    }

    pub fn as_name_mut(&mut self) -> Result<&mut NamePage> {
        match self {
            Page::Name(p) => Ok(p),
            other => Err(Error::corrupt(format!(
                "expected name page, found {}",
                other.kind_name()
            ))),
        }
    }

    pub fn as_index_roots(&self) -> Result<&IndexRootsPage> {
        match self {
            Page::Path(p) | Page::Cas(p) => Ok(p),
            other => Err(Error::corrupt(format!(
                "expected index roots page, found {}",
                other.kind_name()
            ))),
        }
    }

    pub fn as_index_roots_mut(&mut self) -> Result<&mut IndexRootsPage> {
        match self {
            Page::Path(p) | Page::Cas(p) => Ok(p),
            other => Err(Error::corrupt(format!(
                "expected index roots page, found {}",
                other.kind_name()
            ))),
        }
    }

    pub fn as_path_summary(&self) -> Result<&PathSummaryPage> {
        match self {
            Page::PathSummary(p) => Ok(p),
            other => Err(Error::corrupt(format!(
                "expected path summary page, found {}",
                other.kind_name()
            ))),
        }
    }

    pub fn as_path_summary_mut(&mut self) -> Result<&mut PathSummaryPage> {
        match self {
            Page::PathSummary(p) => Ok(p),
            other => Err(Error::corrupt(format!(
                "expected path summary page, found {}",
                other.kind_name()
            ))),
        }
    }

    pub fn as_hot_leaf(&self) -> Result<&HotLeafPage> {
        match self {
            Page::HotLeaf(p) => Ok(p),
            other => Err(Error::corrupt(format!(
                "expected hot leaf, found {}",
                other.kind_name()
            ))),
        }
    }

    pub fn as_hot_leaf_mut(&mut self) -> Result<&mut HotLeafPage> {
        match self {
            Page::HotLeaf(p) => Ok(p),
            other => Err(Error::corrupt(format!(
                "expected hot leaf, found {}",
                other.kind_name()
            ))),
        }
    }

    pub fn as_hot_indirect(&self) -> Result<&HotIndirectPage> {
        match self {
            Page::HotIndirect(p) => Ok(p),
            other => Err(Error::corrupt(format!(
                "expected hot indirect, found {}",
                other.kind_name()
            ))),
        }
    }

    pub fn as_hot_indirect_mut(&mut self) -> Result<&mut HotIndirectPage> {
        match self {
            Page::HotIndirect(p) => Ok(p),
            other => Err(Error::corrupt(format!(
                "expected hot indirect, found {}",
                other.kind_name()
            ))),
        }
    }
}
