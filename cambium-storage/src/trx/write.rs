use crate::config::HashKind;
use crate::page::Page;
use crate::page::index_roots::{IndexRootsPage, PathSummaryPage};
use crate::page::indirect::IndirectPage;
use crate::page::kv_leaf::KeyValueLeafPage;
use crate::page::name_page::{NameKind, NamePage};
use crate::page::reference::PageReference;
use crate::page::revision_root::{
    REF_CAS, REF_DOCUMENT, REF_NAME, REF_PATH, REF_PATH_SUMMARY, RevisionRootPage,
};
use crate::page::uber::UberPage;
use crate::record::Record;
use crate::store::{FileStore, StorageReader, StorageWriter, UberRef};
use crate::til::{IntentLog, PageContainer};
use crate::trx::{TrxContext, load_leaf_chain, load_page};
use crate::versioning::{self, Versioning};
use crate::{Error, NO_KEY, Result};
use cambium_api::{IndexType, NameKey, NodeKey, RevisionNumber};
use chrono::Utc;
use std::sync::MutexGuard;
use std::time::{Duration, Instant};

/// Auto-commit policy: commit after `max_node_count` record operations
/// or once `after_commit_delay` has elapsed, whichever fires first.
#[derive(Debug, Clone, Copy, Default)]
pub struct AutoCommit {
    pub max_node_count: u64,
    pub after_commit_delay: Option<Duration>,
}

/// Addresses one child-reference slot inside a page held in the intent
/// log.
#[derive(Debug, Clone, Copy)]
pub(crate) enum SlotId {
    /// Named child of the revision root (`REF_*` constants).
    Fixed(usize),
    IndirectChild(usize),
    NameIndexRoot(u32),
    IndexRoot(u32),
    HotChild(usize),
    PathSummaryTree,
}

fn locate_mut<'p>(page: &'p mut Page, slot: SlotId) -> Result<&'p mut PageReference> {
    match slot {
        SlotId::Fixed(which) => match page {
            Page::RevisionRoot(root) => Ok(match which {
                REF_DOCUMENT => &mut root.document_ref,
                REF_NAME => &mut root.name_page_ref,
                REF_PATH => &mut root.path_page_ref,
                REF_CAS => &mut root.cas_page_ref,
                REF_PATH_SUMMARY => &mut root.path_summary_ref,
                _ => return Err(Error::Invariant("unknown revision root slot")),
            }),
            _ => Err(Error::Invariant("fixed slots live on the revision root")),
        },
        SlotId::IndirectChild(i) => Ok(page.as_indirect_mut()?.reference_mut(i)),
        SlotId::NameIndexRoot(n) => Ok(page.as_name_mut()?.index_root_mut(n)),
        SlotId::IndexRoot(n) => Ok(page.as_index_roots_mut()?.root_mut(n)),
        SlotId::HotChild(i) => Ok(page.as_hot_indirect_mut()?.child_mut(i)),
        SlotId::PathSummaryTree => Ok(&mut page.as_path_summary_mut()?.tree_ref),
    }
}

/// The single writer of a resource. Holds the resource write lock for
/// its whole lifetime, stages copy-on-write pages in the intent log and
/// publishes them atomically at commit.
pub struct PageWriteTrx<'a> {
    ctx: TrxContext,
    _guard: MutexGuard<'a, ()>,
    til: IntentLog,
    uber: UberPage,
    committed_root: RevisionRootPage,
    root_log: i64,
    revision: RevisionNumber,
    auto: Option<AutoCommit>,
    ops_since_commit: u64,
    last_commit: Instant,
}

impl<'a> PageWriteTrx<'a> {
    pub(crate) fn begin(
        ctx: TrxContext,
        guard: MutexGuard<'a, ()>,
        auto: Option<AutoCommit>,
    ) -> Result<Self> {
        let anchor = {
            let store = ctx.store.read().unwrap();
            store.read_uber_ref()?
        }
        .ok_or(Error::Invariant("resource was never bootstrapped"))?;

        let uber = load_page(&ctx, anchor.offset)?.as_uber()?.clone();
        let committed_root = load_page(&ctx, uber.revision_root_ref.committed_key()?)?
            .as_revision_root()?
            .clone();

        let mut til = IntentLog::new(&ctx.log_dir, ctx.til_budget);
        let working = committed_root.derive_next();
        let revision = working.revision;
        let root_log = til.insert(PageContainer::fresh(Page::RevisionRoot(working)))?;

        Ok(Self {
            ctx,
            _guard: guard,
            til,
            uber,
            committed_root,
            root_log,
            revision,
            auto,
            ops_since_commit: 0,
            last_commit: Instant::now(),
        })
    }

    #[inline]
    pub fn revision(&self) -> RevisionNumber {
        self.revision
    }

    pub(crate) fn context(&self) -> &TrxContext {
        &self.ctx
    }

    pub(crate) fn intent_log(&mut self) -> &mut IntentLog {
        &mut self.til
    }

    fn root_page(&mut self) -> Result<&RevisionRootPage> {
        self.til.get_mut(self.root_log)?.modified.as_revision_root()
    }

    fn root_page_mut(&mut self) -> Result<&mut RevisionRootPage> {
        match &mut self.til.get_mut(self.root_log)?.modified {
            Page::RevisionRoot(root) => Ok(root),
            _ => Err(Error::Invariant("root log entry is not a revision root")),
        }
    }

    pub fn max_node_key(&mut self) -> Result<NodeKey> {
        Ok(self.root_page()?.max_node_key)
    }

    // --- copy-on-write preparation --------------------------------------

    /// Ensures the page behind `(parent_log, slot)` is staged in the
    /// intent log and returns its log key. Preparing the same slot twice
    /// is a no-op; a missing page is materialized from `default_page`.
    pub(crate) fn prepare_ref_slot(
        &mut self,
        parent_log: i64,
        slot: SlotId,
        default_page: Option<Page>,
    ) -> Result<i64> {
        let existing = {
            let parent = self.til.get_mut(parent_log)?;
            locate_mut(&mut parent.modified, slot)?.clone()
        };
        if existing.log_key != NO_KEY {
            return Ok(existing.log_key);
        }

        let container = if existing.is_absent() {
            let page =
                default_page.ok_or(Error::Invariant("absent page without a default"))?;
            PageContainer::fresh(page)
        } else {
            self.cow_container(&existing)?
        };
        let log_key = self.til.insert(container)?;

        let parent = self.til.get_mut(parent_log)?;
        let reference = locate_mut(&mut parent.modified, slot)?;
        reference.log_key = log_key;
        reference.page = None;
        Ok(log_key)
    }

    fn cow_container(&mut self, reference: &PageReference) -> Result<PageContainer> {
        let committed = load_page(&self.ctx, reference.committed_key()?)?;
        match &*committed {
            Page::KeyValueLeaf(_) => {
                let chain = load_leaf_chain(&self.ctx, reference)?;
                let vss = versioning::versions_since_snapshot(self.ctx.versioning, &chain);
                let assembled = versioning::assemble(chain.clone())?;
                let mut modified = KeyValueLeafPage::new(
                    assembled.page_key(),
                    self.revision,
                    assembled.index_type(),
                );
                if self.ctx.versioning == Versioning::Differential
                    && !reference.fragments.is_empty()
                {
                    // A differential diff carries everything changed since
                    // the base snapshot, so it starts from the prior diff.
                    modified.apply(&chain[0]);
                    modified.set_revision(self.revision);
                }
                Ok(PageContainer::cow(
                    Page::KeyValueLeaf(assembled),
                    Page::KeyValueLeaf(modified),
                    reference.key,
                    reference.fragments.clone(),
                    vss,
                ))
            }
            page => {
                let complete = page.clone();
                let mut modified = page.clone();
                if let Page::HotLeaf(leaf) = &mut modified {
                    leaf.set_revision(self.revision);
                }
                Ok(PageContainer::cow(
                    complete,
                    modified,
                    reference.key,
                    reference.fragments.clone(),
                    0,
                ))
            }
        }
    }

    fn grow_tree(
        &mut self,
        page_key: u64,
        get: fn(&RevisionRootPage) -> (PageReference, u8),
        set: fn(&mut RevisionRootPage, PageReference, u8),
    ) -> Result<()> {
        let needed = IndirectPage::required_height(page_key);
        loop {
            let (old_ref, current) = {
                let root = self.root_page()?;
                let (r, h) = get(root);
                (r, h)
            };
            if current >= needed {
                return Ok(());
            }
            let mut wrapper = IndirectPage::new();
            *wrapper.reference_mut(0) = old_ref;
            let log = self
                .til
                .insert(PageContainer::fresh(Page::Indirect(wrapper)))?;
            let root = self.root_page_mut()?;
            set(
                root,
                PageReference {
                    log_key: log,
                    ..PageReference::absent()
                },
                current + 1,
            );
        }
    }

    fn prepare_document_leaf(&mut self, page_key: u64) -> Result<i64> {
        self.grow_tree(
            page_key,
            |root| (root.document_ref.clone(), root.document_height),
            |root, reference, height| {
                root.document_ref = reference;
                root.document_height = height;
            },
        )?;
        let height = self.root_page()?.document_height;
        let mut log = self.prepare_ref_slot(
            self.root_log,
            SlotId::Fixed(REF_DOCUMENT),
            Some(Page::Indirect(IndirectPage::new())),
        )?;
        for level in 0..height {
            let idx = IndirectPage::child_index(page_key, level, height);
            let default = if level + 1 < height {
                Page::Indirect(IndirectPage::new())
            } else {
                Page::KeyValueLeaf(KeyValueLeafPage::new(
                    page_key,
                    self.revision,
                    IndexType::Document,
                ))
            };
            log = self.prepare_ref_slot(log, SlotId::IndirectChild(idx), Some(default))?;
        }
        Ok(log)
    }

    fn prepare_path_summary_page(&mut self) -> Result<i64> {
        self.prepare_ref_slot(
            self.root_log,
            SlotId::Fixed(REF_PATH_SUMMARY),
            Some(Page::PathSummary(PathSummaryPage::default())),
        )
    }

    fn prepare_path_summary_leaf(&mut self, page_key: u64) -> Result<i64> {
        let summary_log = self.prepare_path_summary_page()?;
        // Height growth, mirroring the document tree.
        let needed = IndirectPage::required_height(page_key);
        loop {
            let (old_ref, current) = {
                let page = self.til.get_mut(summary_log)?.modified.as_path_summary()?;
                (page.tree_ref.clone(), page.height)
            };
            if current >= needed {
                break;
            }
            let mut wrapper = IndirectPage::new();
            *wrapper.reference_mut(0) = old_ref;
            let log = self
                .til
                .insert(PageContainer::fresh(Page::Indirect(wrapper)))?;
            let page = self.til.get_mut(summary_log)?.modified.as_path_summary_mut()?;
            page.tree_ref = PageReference {
                log_key: log,
                ..PageReference::absent()
            };
            page.height = current + 1;
        }

        let height = self
            .til
            .get_mut(summary_log)?
            .modified
            .as_path_summary()?
            .height;
        let mut log = self.prepare_ref_slot(
            summary_log,
            SlotId::PathSummaryTree,
            Some(Page::Indirect(IndirectPage::new())),
        )?;
        for level in 0..height {
            let idx = IndirectPage::child_index(page_key, level, height);
            let default = if level + 1 < height {
                Page::Indirect(IndirectPage::new())
            } else {
                Page::KeyValueLeaf(KeyValueLeafPage::new(
                    page_key,
                    self.revision,
                    IndexType::PathSummary,
                ))
            };
            log = self.prepare_ref_slot(log, SlotId::IndirectChild(idx), Some(default))?;
        }
        Ok(log)
    }

    fn prepare_record_leaf(&mut self, index_type: IndexType, page_key: u64) -> Result<i64> {
        match index_type {
            IndexType::Document => self.prepare_document_leaf(page_key),
            IndexType::PathSummary => self.prepare_path_summary_leaf(page_key),
            other => Err(Error::usage(format!(
                "{other:?} indexes hold trie entries, not records"
            ))),
        }
    }

    /// Family page of a trie index: the name page or the PATH/CAS root
    /// directory.
    pub(crate) fn prepare_index_family(&mut self, index_type: IndexType) -> Result<i64> {
        match index_type {
            IndexType::Name => self.prepare_ref_slot(
                self.root_log,
                SlotId::Fixed(REF_NAME),
                Some(Page::Name(NamePage::default())),
            ),
            IndexType::Path => self.prepare_ref_slot(
                self.root_log,
                SlotId::Fixed(REF_PATH),
                Some(Page::Path(IndexRootsPage::default())),
            ),
            IndexType::Cas => self.prepare_ref_slot(
                self.root_log,
                SlotId::Fixed(REF_CAS),
                Some(Page::Cas(IndexRootsPage::default())),
            ),
            other => Err(Error::usage(format!("{other:?} is not a trie index"))),
        }
    }

    pub(crate) fn index_root_slot(index_type: IndexType, index_number: u32) -> SlotId {
        match index_type {
            IndexType::Name => SlotId::NameIndexRoot(index_number),
            _ => SlotId::IndexRoot(index_number),
        }
    }

    // --- record operations ----------------------------------------------

    /// Stores a fresh record, assigning the next node key of the target
    /// index and stamping the revision bookkeeping. Returns the stored
    /// instance.
    pub fn create_record(
        &mut self,
        mut record: Record,
        index_type: IndexType,
        _index_number: u32,
    ) -> Result<Record> {
        let node_key = match index_type {
            IndexType::Document => self.root_page_mut()?.next_node_key(),
            IndexType::PathSummary => {
                let summary_log = self.prepare_path_summary_page()?;
                self.til
                    .get_mut(summary_log)?
                    .modified
                    .as_path_summary_mut()?
                    .next_path_node_key()
            }
            other => {
                return Err(Error::usage(format!(
                    "{other:?} indexes hold trie entries, not records"
                )));
            }
        };

        {
            let delegate = record.delegate_mut();
            delegate.node_key = node_key;
            delegate.last_modified_revision = self.revision;
            delegate.previous_revision = self.revision.saturating_sub(1);
        }
        if self.ctx.hash_kind != HashKind::None {
            let hash = record.payload_hash();
            record.delegate_mut().hash = hash;
        }

        let page_key = KeyValueLeafPage::page_key_of(node_key);
        let leaf_log = self.prepare_record_leaf(index_type, page_key)?;
        self.til
            .get_mut(leaf_log)?
            .modified
            .as_kv_leaf_mut()?
            .set_record(record.clone())?;

        self.note_op()?;
        Ok(record)
    }

    /// Mutable handle to a record in its COW-cloned leaf. Repeated calls
    /// for the same node key return the same staged instance.
    pub fn prepare_record_for_modification(
        &mut self,
        node_key: NodeKey,
        index_type: IndexType,
        _index_number: u32,
    ) -> Result<&mut Record> {
        let page_key = KeyValueLeafPage::page_key_of(node_key);
        let slot = KeyValueLeafPage::slot_of(node_key);
        let leaf_log = self.prepare_record_leaf(index_type, page_key)?;
        let revision = self.revision;

        let container = self.til.get_mut(leaf_log)?;
        let PageContainer {
            complete, modified, ..
        } = container;
        let complete = complete.as_kv_leaf()?;
        let modified = modified.as_kv_leaf_mut()?;

        // Differential diffs pre-seed `modified` with records staged by
        // earlier revisions; those need their bookkeeping re-stamped, in
        // contrast to records already prepared within this transaction.
        let staged_stale = match modified.entry(slot) {
            Some(Some(record)) => Some(record.delegate().last_modified_revision < revision),
            Some(None) => {
                return Err(Error::usage(format!(
                    "record {node_key} was removed in this transaction"
                )));
            }
            None => None,
        };
        match staged_stale {
            Some(false) => {}
            Some(true) => {
                let delegate = modified
                    .get_record_mut(slot)
                    .expect("checked staged just above")
                    .delegate_mut();
                delegate.previous_revision = delegate.last_modified_revision;
                delegate.last_modified_revision = revision;
            }
            None => {
                let mut record = complete
                    .get_record(slot)
                    .cloned()
                    .ok_or_else(|| Error::usage(format!("no record with key {node_key}")))?;
                let delegate = record.delegate_mut();
                delegate.previous_revision = delegate.last_modified_revision;
                delegate.last_modified_revision = revision;
                modified.set_record(record)?;
            }
        }
        Ok(modified
            .get_record_mut(slot)
            .expect("record staged just above"))
    }

    /// Marks the record absent in the staged leaf.
    pub fn remove_record(
        &mut self,
        node_key: NodeKey,
        index_type: IndexType,
        _index_number: u32,
    ) -> Result<()> {
        let page_key = KeyValueLeafPage::page_key_of(node_key);
        let slot = KeyValueLeafPage::slot_of(node_key);
        let leaf_log = self.prepare_record_leaf(index_type, page_key)?;

        let container = self.til.get_mut(leaf_log)?;
        let exists = match container.modified.as_kv_leaf()?.entry(slot) {
            Some(Some(_)) => true,
            Some(None) => false,
            None => container.complete.as_kv_leaf()?.get_record(slot).is_some(),
        };
        if !exists {
            return Err(Error::usage(format!("no record with key {node_key}")));
        }
        container.modified.as_kv_leaf_mut()?.mark_removed(slot);
        self.note_op()?;
        Ok(())
    }

    /// Snapshot-consistent read inside the transaction: staged changes
    /// win, otherwise the committed state of the pinned base revision.
    pub fn get_record(
        &mut self,
        node_key: NodeKey,
        index_type: IndexType,
    ) -> Result<Option<Record>> {
        let page_key = KeyValueLeafPage::page_key_of(node_key);
        let slot = KeyValueLeafPage::slot_of(node_key);
        match self.resolve_record_leaf(index_type, page_key)? {
            LeafView::Absent => Ok(None),
            LeafView::Committed(leaf) => Ok(leaf.get_record(slot).cloned()),
            LeafView::Staged(log_key) => {
                let container = self.til.get_mut(log_key)?;
                match container.modified.as_kv_leaf()?.entry(slot) {
                    Some(Some(record)) => Ok(Some(record.clone())),
                    Some(None) => Ok(None),
                    None => Ok(container.complete.as_kv_leaf()?.get_record(slot).cloned()),
                }
            }
        }
    }

    fn resolve_record_leaf(&mut self, index_type: IndexType, page_key: u64) -> Result<LeafView> {
        let (mut reference, height) = match index_type {
            IndexType::Document => {
                let root = self.root_page()?;
                (root.document_ref.clone(), root.document_height)
            }
            IndexType::PathSummary => {
                let root = self.root_page()?;
                let summary_ref = root.path_summary_ref.clone();
                if summary_ref.log_key != NO_KEY {
                    let page = self.til.get_mut(summary_ref.log_key)?.modified.as_path_summary()?;
                    (page.tree_ref.clone(), page.height)
                } else if summary_ref.is_absent() {
                    return Ok(LeafView::Absent);
                } else {
                    let page = load_page(&self.ctx, summary_ref.committed_key()?)?;
                    let page = page.as_path_summary()?;
                    (page.tree_ref.clone(), page.height)
                }
            }
            other => {
                return Err(Error::usage(format!(
                    "{other:?} indexes hold trie entries, not records"
                )));
            }
        };

        if IndirectPage::required_height(page_key) > height {
            return Ok(LeafView::Absent);
        }

        for level in 0..height {
            if reference.is_absent() {
                return Ok(LeafView::Absent);
            }
            let idx = IndirectPage::child_index(page_key, level, height);
            reference = if reference.log_key != NO_KEY {
                self.til
                    .get_mut(reference.log_key)?
                    .modified
                    .as_indirect()?
                    .reference(idx)
                    .clone()
            } else {
                load_page(&self.ctx, reference.committed_key()?)?
                    .as_indirect()?
                    .reference(idx)
                    .clone()
            };
        }

        if reference.log_key != NO_KEY {
            Ok(LeafView::Staged(reference.log_key))
        } else if reference.is_absent() {
            Ok(LeafView::Absent)
        } else {
            Ok(LeafView::Committed(crate::trx::load_assembled_leaf(
                &self.ctx, &reference,
            )?))
        }
    }

    // --- name interning -------------------------------------------------

    /// Interns `name` in the name page; re-interning returns the same key
    /// and raises its reference count.
    pub fn create_name_key(&mut self, name: &str, kind: NameKind) -> Result<NameKey> {
        let log = self.prepare_index_family(IndexType::Name)?;
        let page = self.til.get_mut(log)?.modified.as_name_mut()?;
        Ok(page.create_name_key(name, kind))
    }

    pub fn remove_name(&mut self, key: NameKey, kind: NameKind) -> Result<()> {
        let log = self.prepare_index_family(IndexType::Name)?;
        let page = self.til.get_mut(log)?.modified.as_name_mut()?;
        page.remove_name(key, kind);
        Ok(())
    }

    pub fn get_name(&mut self, key: NameKey, kind: NameKind) -> Result<Option<String>> {
        let name_ref = self.root_page()?.name_page_ref.clone();
        if name_ref.log_key != NO_KEY {
            let page = self.til.get_mut(name_ref.log_key)?.modified.as_name()?;
            return Ok(page.get_name(key, kind).map(str::to_string));
        }
        if name_ref.is_absent() {
            return Ok(None);
        }
        let page = load_page(&self.ctx, name_ref.committed_key()?)?;
        Ok(page.as_name()?.get_name(key, kind).map(str::to_string))
    }

    // --- commit and rollback --------------------------------------------

    /// Persists every staged page, then atomically re-anchors the uber
    /// reference. Any failure before the anchor update aborts: the intent
    /// log is discarded and the previous revision stays current.
    pub fn commit(&mut self, message: Option<&str>) -> Result<UberRef> {
        match self.commit_inner(message) {
            Ok(anchor) => Ok(anchor),
            Err(error) => {
                log::warn!("commit of revision {} failed: {error}", self.revision);
                self.rollback()?;
                Err(error)
            }
        }
    }

    fn commit_inner(&mut self, message: Option<&str>) -> Result<UberRef> {
        let revision = self.revision;
        {
            let root = self.root_page_mut()?;
            root.commit_timestamp_millis = Utc::now().timestamp_millis();
            root.commit_message = message.map(str::to_string);
        }

        let mut root_ref = PageReference {
            log_key: self.root_log,
            ..PageReference::absent()
        };
        let mut uber = self.uber.clone();

        let anchor = {
            let mut store = self.ctx.store.write().unwrap();
            commit_reference(&mut *store, &self.ctx, &mut self.til, &mut root_ref)?;
            let root_offset = root_ref.committed_key()?;

            uber.revision = revision;
            uber.past_roots.push(root_offset);
            uber.revision_root_ref = root_ref;
            let encoded = self
                .ctx
                .pipeline
                .encode(Page::Uber(uber.clone()).serialize())?;
            let uber_offset = store.append_block(&encoded)?;
            store.sync()?;

            let anchor = UberRef {
                offset: uber_offset,
                revision,
            };
            // The atomicity point: after this slot write the revision is
            // durable; before it, the previous revision is what recovery
            // sees.
            store.write_uber_ref(anchor)?;
            anchor
        };

        log::info!(
            "resource {}: committed revision {revision} at offset {}",
            self.ctx.resource_id,
            anchor.offset
        );

        self.uber = uber;
        self.committed_root = load_page(&self.ctx, self.uber.revision_root_ref.committed_key()?)?
            .as_revision_root()?
            .clone();
        self.til.clear()?;
        self.revision = revision + 1;
        let working = self.committed_root.derive_next();
        self.root_log = self
            .til
            .insert(PageContainer::fresh(Page::RevisionRoot(working)))?;
        self.ops_since_commit = 0;
        self.last_commit = Instant::now();
        Ok(anchor)
    }

    /// Discards all staged changes; the uber reference is untouched.
    pub fn rollback(&mut self) -> Result<()> {
        self.til.clear()?;
        self.revision = self.committed_root.revision + 1;
        let working = self.committed_root.derive_next();
        self.root_log = self
            .til
            .insert(PageContainer::fresh(Page::RevisionRoot(working)))?;
        self.ops_since_commit = 0;
        Ok(())
    }

    fn note_op(&mut self) -> Result<()> {
        self.ops_since_commit += 1;
        let Some(auto) = self.auto else {
            return Ok(());
        };
        let count_due = auto.max_node_count > 0 && self.ops_since_commit >= auto.max_node_count;
        let delay_due = auto
            .after_commit_delay
            .is_some_and(|delay| self.last_commit.elapsed() >= delay);
        if count_due || delay_due {
            self.commit(None)?;
        }
        Ok(())
    }
}

enum LeafView {
    Absent,
    Committed(KeyValueLeafPage),
    Staged(i64),
}

/// Depth-first commit of one dirty reference: children are persisted
/// first so their new block offsets can be patched into this page before
/// it is serialized.
fn commit_reference(
    store: &mut FileStore,
    ctx: &TrxContext,
    til: &mut IntentLog,
    reference: &mut PageReference,
) -> Result<()> {
    if reference.log_key == NO_KEY {
        return Ok(());
    }
    let mut container = til.take(reference.log_key)?;

    if ctx.hash_kind != HashKind::None {
        if let Page::KeyValueLeaf(leaf) = &mut container.modified {
            for record in leaf.iter_records_mut() {
                let hash = record.payload_hash();
                record.delegate_mut().hash = hash;
            }
        }
    }

    let (mut page, fragments) =
        versioning::plan_write(ctx.versioning, ctx.revisions_to_restore, container)?;
    for child in page.references_mut() {
        commit_reference(store, ctx, til, child)?;
    }

    let encoded = ctx.pipeline.encode(page.serialize())?;
    let offset = store.append_block(&encoded)?;
    reference.key = offset as i64;
    reference.log_key = NO_KEY;
    reference.fragments = fragments;
    reference.page = None;
    Ok(())
}
