use crate::page::Page;
use crate::page::kv_leaf::KeyValueLeafPage;
use crate::til::PageContainer;
use crate::{Error, Result};

/// Page-versioning algorithm of a resource, configured via
/// `revisioning.revisioningClass`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Versioning {
    /// Every write persists the complete leaf; no fragments.
    Full,
    /// Diffs since the last full snapshot; a full snapshot every
    /// `revisions_to_restore` fragments bounds the restore chain.
    Incremental,
    /// One diff against the full snapshot the leaf chain started from.
    Differential,
    /// Window of the last `revisions_to_restore` fragments with a full
    /// snapshot closing each window.
    SlidingSnapshot,
}

impl Versioning {
    pub fn from_class_name(name: &str) -> Result<Self> {
        match name {
            "FullVersioning" => Ok(Versioning::Full),
            "IncrementalVersioning" => Ok(Versioning::Incremental),
            "DifferentialVersioning" => Ok(Versioning::Differential),
            "SlidingSnapshot" => Ok(Versioning::SlidingSnapshot),
            other => Err(Error::Config(format!("unknown revisioning class: {other}"))),
        }
    }

    pub fn class_name(&self) -> &'static str {
        match self {
            Versioning::Full => "FullVersioning",
            Versioning::Incremental => "IncrementalVersioning",
            Versioning::Differential => "DifferentialVersioning",
            Versioning::SlidingSnapshot => "SlidingSnapshot",
        }
    }
}

/// Reconstructs the logical leaf from its fragment chain, newest first.
/// The oldest fragment is the base snapshot; every newer fragment is
/// overlaid in commit order, tombstones erasing their slots. The result
/// holds only live records.
pub fn assemble(mut fragments: Vec<KeyValueLeafPage>) -> Result<KeyValueLeafPage> {
    let Some(newest_meta) = fragments.first().map(|f| (f.page_key(), f.revision())) else {
        return Err(Error::Invariant("versioning: empty fragment chain"));
    };
    fragments.reverse();
    let mut iter = fragments.into_iter();
    let base = iter.next().unwrap();
    let mut assembled = KeyValueLeafPage::new(newest_meta.0, base.revision(), base.index_type());
    assembled.apply(&base);
    for fragment in iter {
        if fragment.page_key() != newest_meta.0 {
            return Err(Error::corrupt("versioning: fragment from foreign leaf"));
        }
        assembled.apply(&fragment);
    }
    // Full view: tombstones collapse to absence.
    let assembled = {
        let mut clean = KeyValueLeafPage::new(newest_meta.0, newest_meta.1, assembled.index_type());
        for (_, record) in assembled.iter_records() {
            clean.set_record(record.clone())?;
        }
        clean
    };
    Ok(assembled)
}

/// What a dirty leaf persists at commit: the page to serialize and the
/// fragment chain the new page reference must carry.
pub struct LeafWritePlan {
    pub page: KeyValueLeafPage,
    pub fragments: Vec<u64>,
}

pub fn plan_leaf_write(
    versioning: Versioning,
    revisions_to_restore: u32,
    container: &PageContainer,
) -> Result<LeafWritePlan> {
    let complete = container.complete.as_kv_leaf()?;
    let modified = container.modified.as_kv_leaf()?;

    let full = || -> Result<LeafWritePlan> {
        let mut page = complete.clone();
        page.apply(modified);
        // A full snapshot defines absence; drop tombstones.
        let mut clean = KeyValueLeafPage::new(page.page_key(), modified.revision(), page.index_type());
        for (_, record) in page.iter_records() {
            clean.set_record(record.clone())?;
        }
        Ok(LeafWritePlan {
            page: clean,
            fragments: Vec::new(),
        })
    };

    if versioning == Versioning::Full || container.prior_key < 0 {
        return full();
    }

    let window = revisions_to_restore.max(1);
    if container.versions_since_snapshot >= window {
        return full();
    }

    let fragments = match versioning {
        Versioning::Differential => {
            // One diff pointing at the base snapshot.
            let base = container
                .prior_fragments
                .last()
                .copied()
                .unwrap_or(container.prior_key as u64);
            vec![base]
        }
        _ => {
            let mut chain = Vec::with_capacity(1 + container.prior_fragments.len());
            chain.push(container.prior_key as u64);
            chain.extend_from_slice(&container.prior_fragments);
            chain.truncate(window as usize - 1);
            chain
        }
    };

    Ok(LeafWritePlan {
        page: modified.clone(),
        fragments,
    })
}

/// How many fragments the next write of this leaf will have accumulated
/// since the last full snapshot, given the chain it was loaded from.
pub fn versions_since_snapshot(versioning: Versioning, chain: &[KeyValueLeafPage]) -> u32 {
    match versioning {
        Versioning::Full => 0,
        Versioning::Differential => {
            // Diff chains have length ≤ 2; revisions elapsed since the
            // base snapshot is what bounds them.
            match (chain.first(), chain.last()) {
                (Some(newest), Some(base)) => newest.revision().saturating_sub(base.revision()) + 1,
                _ => 0,
            }
        }
        _ => chain.len() as u32,
    }
}

/// Page to persist plus fragments, for any page kind. Non-leaf pages are
/// always written whole.
pub fn plan_write(
    versioning: Versioning,
    revisions_to_restore: u32,
    container: PageContainer,
) -> Result<(Page, Vec<u64>)> {
    match &container.modified {
        Page::KeyValueLeaf(_) => {
            let plan = plan_leaf_write(versioning, revisions_to_restore, &container)?;
            Ok((Page::KeyValueLeaf(plan.page), plan.fragments))
        }
        _ => Ok((container.modified, Vec::new())),
    }
}
