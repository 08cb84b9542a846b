use crate::page::Page;
use crate::page::indirect::IndirectPage;
use crate::page::kv_leaf::KeyValueLeafPage;
use crate::page::name_page::NameKind;
use crate::page::reference::PageReference;
use crate::page::revision_root::RevisionRootPage;
use crate::page::uber::UberPage;
use crate::record::Record;
use crate::store::StorageReader;
use crate::trx::{TrxContext, load_assembled_leaf, load_page};
use crate::{Error, Result};
use cambium_api::{IndexType, NameKey, NodeKey, PathNodeKey, RevisionNumber};
use std::sync::Arc;

/// Revision-pinned read transaction. Lock-free over committed state: it
/// captures the uber anchor once and navigates immutable pages from
/// there, so a commit at revision `r + 1` is invisible to a transaction
/// pinned at `r`.
pub struct PageReadTrx {
    ctx: TrxContext,
    uber: UberPage,
    root: RevisionRootPage,
}

impl PageReadTrx {
    /// Opens a transaction pinned to `revision`, or to the latest
    /// committed revision when `None`.
    pub fn open(ctx: TrxContext, revision: Option<RevisionNumber>) -> Result<Self> {
        let anchor = {
            let store = ctx.store.read().unwrap();
            store.read_uber_ref()?
        }
        .ok_or_else(|| Error::usage("resource has no committed revision"))?;

        let uber = load_page(&ctx, anchor.offset)?.as_uber()?.clone();

        let root_offset = match revision {
            None => uber.revision_root_ref.committed_key()?,
            Some(rev) if rev == uber.revision => uber.revision_root_ref.committed_key()?,
            Some(rev) => uber.root_offset_for(rev).ok_or_else(|| {
                Error::usage(format!(
                    "revision {rev} does not exist (latest is {})",
                    uber.revision
                ))
            })?,
        };
        let root = load_page(&ctx, root_offset)?.as_revision_root()?.clone();
        Ok(Self { ctx, uber, root })
    }

    #[inline]
    pub fn revision(&self) -> RevisionNumber {
        self.root.revision
    }

    /// Latest committed revision at the time this transaction opened;
    /// equal to `revision()` unless the transaction is pinned backwards.
    #[inline]
    pub fn latest_revision(&self) -> RevisionNumber {
        self.uber.revision
    }

    #[inline]
    pub fn max_node_key(&self) -> NodeKey {
        self.root.max_node_key
    }

    pub fn commit_timestamp_millis(&self) -> i64 {
        self.root.commit_timestamp_millis
    }

    pub fn commit_message(&self) -> Option<&str> {
        self.root.commit_message.as_deref()
    }

    pub(crate) fn context(&self) -> &TrxContext {
        &self.ctx
    }

    pub(crate) fn revision_root(&self) -> &RevisionRootPage {
        &self.root
    }

    /// Record lookup in the document index or the path summary.
    pub fn get_record(
        &self,
        key: NodeKey,
        index_type: IndexType,
    ) -> Result<Option<Record>> {
        let leaf = match index_type {
            IndexType::Document => self.document_leaf(KeyValueLeafPage::page_key_of(key))?,
            IndexType::PathSummary => self.path_summary_leaf(KeyValueLeafPage::page_key_of(key))?,
            other => {
                return Err(Error::usage(format!(
                    "record reads are not defined for {other:?} indexes"
                )));
            }
        };
        Ok(leaf.and_then(|leaf| leaf.get_record(KeyValueLeafPage::slot_of(key)).cloned()))
    }

    pub fn get_path_record(&self, key: PathNodeKey) -> Result<Option<Record>> {
        self.get_record(key, IndexType::PathSummary)
    }

    fn document_leaf(&self, page_key: u64) -> Result<Option<KeyValueLeafPage>> {
        self.walk_tree(&self.root.document_ref, self.root.document_height, page_key)
    }

    fn path_summary_leaf(&self, page_key: u64) -> Result<Option<KeyValueLeafPage>> {
        if self.root.path_summary_ref.is_absent() {
            return Ok(None);
        }
        let summary = load_page(&self.ctx, self.root.path_summary_ref.committed_key()?)?;
        let summary = summary.as_path_summary()?;
        self.walk_tree(&summary.tree_ref, summary.height, page_key)
    }

    /// Descends the indirection tree to a leaf and assembles it from its
    /// fragment chain.
    fn walk_tree(
        &self,
        root_ref: &PageReference,
        height: u8,
        page_key: u64,
    ) -> Result<Option<KeyValueLeafPage>> {
        if root_ref.is_absent() {
            return Ok(None);
        }
        if IndirectPage::required_height(page_key) > height {
            return Ok(None);
        }
        let mut reference = root_ref.clone();
        for level in 0..height {
            let page = load_page(&self.ctx, reference.committed_key()?)?;
            let indirect = page.as_indirect()?;
            let child = indirect.reference(IndirectPage::child_index(page_key, level, height));
            if child.is_absent() {
                return Ok(None);
            }
            reference = child.clone();
        }
        Ok(Some(load_assembled_leaf(&self.ctx, &reference)?))
    }

    /// Length of the fragment chain backing a record leaf: the page
    /// itself plus its prior-revision fragments. Bounds the page-assembly
    /// path the versioning algorithms walk.
    pub fn leaf_fragment_count(
        &self,
        index_type: IndexType,
        page_key: u64,
    ) -> Result<Option<usize>> {
        let (root_ref, height) = match index_type {
            IndexType::Document => (self.root.document_ref.clone(), self.root.document_height),
            IndexType::PathSummary => {
                if self.root.path_summary_ref.is_absent() {
                    return Ok(None);
                }
                let page = load_page(&self.ctx, self.root.path_summary_ref.committed_key()?)?;
                let page = page.as_path_summary()?;
                (page.tree_ref.clone(), page.height)
            }
            other => {
                return Err(Error::usage(format!(
                    "record reads are not defined for {other:?} indexes"
                )));
            }
        };
        if root_ref.is_absent() || IndirectPage::required_height(page_key) > height {
            return Ok(None);
        }
        let mut reference = root_ref;
        for level in 0..height {
            let page = load_page(&self.ctx, reference.committed_key()?)?;
            let child = page
                .as_indirect()?
                .reference(IndirectPage::child_index(page_key, level, height))
                .clone();
            if child.is_absent() {
                return Ok(None);
            }
            reference = child;
        }
        Ok(Some(1 + reference.fragments.len()))
    }

    /// Resolves an interned name.
    pub fn get_name(&self, key: NameKey, kind: NameKind) -> Result<Option<String>> {
        if self.root.name_page_ref.is_absent() {
            return Ok(None);
        }
        let page = load_page(&self.ctx, self.root.name_page_ref.committed_key()?)?;
        Ok(page.as_name()?.get_name(key, kind).map(str::to_string))
    }

    pub fn get_name_key(&self, name: &str, kind: NameKind) -> Result<NameKey> {
        if self.root.name_page_ref.is_absent() {
            return Ok(cambium_api::NO_NAME_KEY);
        }
        let page = load_page(&self.ctx, self.root.name_page_ref.committed_key()?)?;
        Ok(page.as_name()?.get_name_key(name, kind))
    }

    /// Root reference of a secondary index trie, if the index exists in
    /// this revision.
    pub(crate) fn index_root_ref(
        &self,
        index_type: IndexType,
        index_number: u32,
    ) -> Result<Option<PageReference>> {
        let family_ref = match index_type {
            IndexType::Name => &self.root.name_page_ref,
            IndexType::Path => &self.root.path_page_ref,
            IndexType::Cas => &self.root.cas_page_ref,
            other => {
                return Err(Error::usage(format!("{other:?} is not a trie index")));
            }
        };
        if family_ref.is_absent() {
            return Ok(None);
        }
        let page = load_page(&self.ctx, family_ref.committed_key()?)?;
        let root = match (&*page, index_type) {
            (Page::Name(name_page), _) => name_page.index_root(index_number).cloned(),
            (_, _) => page.as_index_roots()?.root(index_number).cloned(),
        };
        Ok(root.filter(|r| !r.is_absent()))
    }

    pub(crate) fn load_hot_page(&self, reference: &PageReference) -> Result<Arc<Page>> {
        load_page(&self.ctx, reference.committed_key()?)
    }

    /// Read transactions are implicitly cancelled by dropping; `close`
    /// exists for symmetry with the write side.
    pub fn close(self) {}
}
