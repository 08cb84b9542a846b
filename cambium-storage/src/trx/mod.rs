pub mod read;
pub mod write;

pub use read::PageReadTrx;
pub use write::{AutoCommit, PageWriteTrx};

use crate::buffer::BufferManager;
use crate::codec::BytePipeline;
use crate::config::HashKind;
use crate::page::Page;
use crate::page::kv_leaf::KeyValueLeafPage;
use crate::page::reference::PageReference;
use crate::store::{FileStore, StorageReader};
use crate::versioning::{self, Versioning};
use crate::Result;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

/// Everything a page transaction needs from its resource session.
#[derive(Clone)]
pub struct TrxContext {
    pub store: Arc<RwLock<FileStore>>,
    pub pipeline: Arc<BytePipeline>,
    pub buffer: Arc<BufferManager>,
    pub resource_id: u32,
    pub versioning: Versioning,
    pub revisions_to_restore: u32,
    pub hash_kind: HashKind,
    pub log_dir: PathBuf,
    pub til_budget: usize,
}

/// Committed page by block offset, through the buffer manager.
pub(crate) fn load_page(ctx: &TrxContext, offset: u64) -> Result<Arc<Page>> {
    ctx.buffer.get_or_load(ctx.resource_id, offset, || {
        let raw = {
            let store = ctx.store.read().unwrap();
            store.read_page_at(offset)?
        };
        let decoded = ctx.pipeline.decode(raw)?;
        Page::deserialize(&decoded)
    })
}

/// Raw fragment chain of a committed leaf reference, newest first.
pub(crate) fn load_leaf_chain(
    ctx: &TrxContext,
    reference: &PageReference,
) -> Result<Vec<KeyValueLeafPage>> {
    let mut chain = Vec::with_capacity(1 + reference.fragments.len());
    let newest = load_page(ctx, reference.committed_key()?)?;
    chain.push(newest.as_kv_leaf()?.clone());
    for &fragment in &reference.fragments {
        let page = load_page(ctx, fragment)?;
        chain.push(page.as_kv_leaf()?.clone());
    }
    Ok(chain)
}

/// Versioning-assembled view of a committed leaf reference.
pub(crate) fn load_assembled_leaf(
    ctx: &TrxContext,
    reference: &PageReference,
) -> Result<KeyValueLeafPage> {
    versioning::assemble(load_leaf_chain(ctx, reference)?)
}
