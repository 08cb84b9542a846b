use crate::hot::keys::KeySerializer;
use crate::hot::leaf::HotLeafPage;
use crate::hot::node::{HotIndirectPage, HotNodeKind, MAX_ENTRIES_PER_NODE};
use crate::hot::split::HeightOptimalSplitter;
use crate::hot::{KEY_BUF, MAX_INSERT_RETRIES, VALUE_BUF};
use crate::noderefs::{NodeReferences, is_tombstone};
use crate::page::Page;
use crate::page::reference::PageReference;
use crate::til::PageContainer;
use crate::trx::write::{PageWriteTrx, SlotId};
use crate::{Error, Result};
use cambium_api::{IndexType, NodeKey};

/// Leaf fill factor below which a delete attempts a sibling merge.
const MERGE_FILL_FACTOR: f64 = 0.25;

/// Write side of one trie index, parametric over the key serializer.
/// Operates inside the surrounding page write transaction: every page on
/// the navigated path is copy-on-write cloned into the intent log.
pub struct HotIndexWriter<'a, 't, K> {
    trx: &'a mut PageWriteTrx<'t>,
    serializer: K,
    index_type: IndexType,
    index_number: u32,
}

struct NavStep {
    node_log: i64,
    child_idx: usize,
}

struct NavPath {
    steps: Vec<NavStep>,
    leaf_log: i64,
}

impl<'a, 't, K: KeySerializer> HotIndexWriter<'a, 't, K> {
    pub fn new(
        trx: &'a mut PageWriteTrx<'t>,
        index_type: IndexType,
        index_number: u32,
        serializer: K,
    ) -> Result<Self> {
        match index_type {
            IndexType::Name | IndexType::Path | IndexType::Cas => Ok(Self {
                trx,
                serializer,
                index_type,
                index_number,
            }),
            other => Err(Error::usage(format!("{other:?} is not a trie index"))),
        }
    }

    fn serialize_key(&self, key: &K::Key) -> Vec<u8> {
        KEY_BUF.with(|buf| {
            let mut buf = buf.borrow_mut();
            let len = self.serializer.serialize(key, &mut buf, 0);
            buf[..len].to_vec()
        })
    }

    fn serialize_value(refs: &NodeReferences) -> Vec<u8> {
        VALUE_BUF.with(|buf| {
            let mut buf = buf.borrow_mut();
            buf.clear();
            refs.serialize_into(&mut buf);
            buf.clone()
        })
    }

    /// Adds `node_key` to the bitmap stored under `key`, creating the
    /// entry when absent. Splits, compaction and node upgrades happen as
    /// needed; an irreducible page raises `SpaceExhausted`.
    pub fn insert(&mut self, key: &K::Key, node_key: NodeKey) -> Result<()> {
        let key_bytes = self.serialize_key(key);
        let value_bytes = Self::serialize_value(&NodeReferences::with_key(node_key));

        for attempt in 0..=MAX_INSERT_RETRIES {
            let path = self.navigate(&key_bytes)?;
            let (merged, entry_count) = {
                let leaf = self
                    .trx
                    .intent_log()
                    .get_mut(path.leaf_log)?
                    .modified
                    .as_hot_leaf_mut()?;
                (
                    leaf.merge_with_node_refs(&key_bytes, &value_bytes)?,
                    leaf.entry_count(),
                )
            };
            if merged {
                return Ok(());
            }
            if attempt == MAX_INSERT_RETRIES {
                break;
            }
            if entry_count >= 2 {
                self.split_leaf(&path)?;
            } else {
                // A one-entry page cannot be split; compaction is the
                // only remaining move.
                let reclaimed = self
                    .trx
                    .intent_log()
                    .get_mut(path.leaf_log)?
                    .modified
                    .as_hot_leaf_mut()?
                    .compact();
                if reclaimed == 0 {
                    break;
                }
            }
        }

        let path = self.navigate(&key_bytes)?;
        let leaf = self
            .trx
            .intent_log()
            .get_mut(path.leaf_log)?
            .modified
            .as_hot_leaf_mut()?;
        let (remaining_space, required_space) = leaf.space_shortfall(&key_bytes, &value_bytes);
        Err(Error::SpaceExhausted {
            index_type: self.index_type,
            entry_count: leaf.entry_count() as u16,
            remaining_space,
            required_space,
        })
    }

    /// Removes `node_key` from the bitmap under `key`; an emptied bitmap
    /// becomes a tombstone so key order stays stable for readers.
    /// Underfilled leaves try a sibling merge and downgrades cascade
    /// upward.
    pub fn remove(&mut self, key: &K::Key, node_key: NodeKey) -> Result<()> {
        let key_bytes = self.serialize_key(key);
        let path = self.navigate(&key_bytes)?;

        let underfilled = {
            let leaf = self
                .trx
                .intent_log()
                .get_mut(path.leaf_log)?
                .modified
                .as_hot_leaf_mut()?;
            let found = leaf.find_entry(&key_bytes);
            if found < 0 {
                return Ok(());
            }
            let idx = found as usize;
            let value = leaf.value_at(idx).to_vec();
            if is_tombstone(&value) {
                return Ok(());
            }
            let mut refs = NodeReferences::deserialize(&value)?
                .ok_or(Error::Invariant("tombstone slipped past check"))?;
            refs.remove(node_key);
            if refs.is_empty() {
                leaf.tombstone_at(idx)?;
            } else if !leaf.replace_value_at(idx, &Self::serialize_value(&refs))? {
                return Err(Error::Invariant("shrinking a value must not need space"));
            }
            leaf.fill_factor() < MERGE_FILL_FACTOR
        };

        if underfilled {
            self.try_merge_leaf(&path)?;
        }
        Ok(())
    }

    /// Walks from the index root to the target leaf, COW-cloning every
    /// page encountered and capturing the path of intent-log keys and
    /// child indices.
    fn navigate(&mut self, key_bytes: &[u8]) -> Result<NavPath> {
        let family_log = self.trx.prepare_index_family(self.index_type)?;
        let root_slot = PageWriteTrx::index_root_slot(self.index_type, self.index_number);
        let empty_leaf = Page::HotLeaf(HotLeafPage::new(
            self.index_number as u64,
            self.trx.revision(),
            self.index_type,
        ));
        let mut log = self
            .trx
            .prepare_ref_slot(family_log, root_slot, Some(empty_leaf))?;

        let mut steps = Vec::new();
        loop {
            let next_child = {
                match &self.trx.intent_log().get_mut(log)?.modified {
                    Page::HotLeaf(_) => None,
                    Page::HotIndirect(node) => Some(node.find_child(key_bytes)),
                    other => {
                        return Err(Error::corrupt(format!(
                            "trie path hit a {} page",
                            other.kind_name()
                        )));
                    }
                }
            };
            match next_child {
                None => return Ok(NavPath {
                    steps,
                    leaf_log: log,
                }),
                Some(child_idx) => {
                    let child_log =
                        self.trx
                            .prepare_ref_slot(log, SlotId::HotChild(child_idx), None)?;
                    steps.push(NavStep {
                        node_log: log,
                        child_idx,
                    });
                    log = child_log;
                }
            }
        }
    }

    fn split_leaf(&mut self, path: &NavPath) -> Result<()> {
        let revision = self.trx.revision();
        let mut right = HotLeafPage::new(self.index_number as u64, revision, self.index_type);
        let plan = {
            let leaf = self
                .trx
                .intent_log()
                .get_mut(path.leaf_log)?
                .modified
                .as_hot_leaf_mut()?;
            HeightOptimalSplitter::split_leaf(leaf, &mut right)?
        };
        let Some(plan) = plan else {
            return Ok(());
        };
        log::debug!(
            "splitting trie leaf of index {:?}/{} at bit {}",
            self.index_type,
            self.index_number,
            plan.discriminative_bit
        );

        let right_log = self
            .trx
            .intent_log()
            .insert(PageContainer::fresh(Page::HotLeaf(right)))?;
        let left_ref = PageReference {
            log_key: path.leaf_log,
            ..PageReference::absent()
        };
        let right_ref = PageReference {
            log_key: right_log,
            ..PageReference::absent()
        };
        let (zero_child, one_child) = if plan.set_side_is_right {
            (left_ref, right_ref)
        } else {
            (right_ref, left_ref)
        };

        match path.steps.last() {
            Some(step) => {
                let can_embed = self
                    .trx
                    .intent_log()
                    .get_mut(step.node_log)?
                    .modified
                    .as_hot_indirect()?
                    .can_embed(plan.discriminative_bit);
                if can_embed {
                    self.trx
                        .intent_log()
                        .get_mut(step.node_log)?
                        .modified
                        .as_hot_indirect_mut()?
                        .embed_split(step.child_idx, plan.discriminative_bit, zero_child, one_child)?;
                } else {
                    let bi =
                        HotIndirectPage::new_bi(plan.discriminative_bit, zero_child, one_child, 1);
                    let bi_log = self
                        .trx
                        .intent_log()
                        .insert(PageContainer::fresh(Page::HotIndirect(bi)))?;
                    *self
                        .trx
                        .intent_log()
                        .get_mut(step.node_log)?
                        .modified
                        .as_hot_indirect_mut()?
                        .child_mut(step.child_idx) = PageReference {
                        log_key: bi_log,
                        ..PageReference::absent()
                    };
                }
            }
            None => {
                // The leaf was the index root; a BiNode takes its place.
                let bi = HotIndirectPage::new_bi(plan.discriminative_bit, zero_child, one_child, 1);
                let bi_log = self
                    .trx
                    .intent_log()
                    .insert(PageContainer::fresh(Page::HotIndirect(bi)))?;
                self.set_index_root(PageReference {
                    log_key: bi_log,
                    ..PageReference::absent()
                })?;
            }
        }
        Ok(())
    }

    fn set_index_root(&mut self, reference: PageReference) -> Result<()> {
        let family_log = self.trx.prepare_index_family(self.index_type)?;
        let container = self.trx.intent_log().get_mut(family_log)?;
        match &mut container.modified {
            Page::Name(page) => *page.index_root_mut(self.index_number) = reference,
            page => *page.as_index_roots_mut()?.root_mut(self.index_number) = reference,
        }
        Ok(())
    }

    /// Merges the underfilled leaf with an adjacent sibling leaf when the
    /// combined entries fit one page, then cascades downgrades upward.
    fn try_merge_leaf(&mut self, path: &NavPath) -> Result<()> {
        let Some(step) = path.steps.last() else {
            return Ok(());
        };

        let sibling_idx = {
            let parent = self
                .trx
                .intent_log()
                .get_mut(step.node_log)?
                .modified
                .as_hot_indirect()?;
            if step.child_idx + 1 < parent.num_children() {
                step.child_idx + 1
            } else if step.child_idx > 0 {
                step.child_idx - 1
            } else {
                return Ok(());
            }
        };
        let sibling_log = self
            .trx
            .prepare_ref_slot(step.node_log, SlotId::HotChild(sibling_idx), None)?;

        // Only leaf/leaf merges happen here; node/node merges are the
        // cascade's job.
        let sibling_entries: Vec<(Vec<u8>, Vec<u8>)> = {
            match &self.trx.intent_log().get_mut(sibling_log)?.modified {
                Page::HotLeaf(sibling) => sibling
                    .entries()
                    .map(|(k, v)| (k.to_vec(), v.to_vec()))
                    .collect(),
                _ => return Ok(()),
            }
        };

        {
            let leaf = self
                .trx
                .intent_log()
                .get_mut(path.leaf_log)?
                .modified
                .as_hot_leaf_mut()?;
            let needed: usize = sibling_entries
                .iter()
                .map(|(k, v)| HotLeafPage::required_space_for(k, v))
                .sum();
            if leaf.free_space() + leaf.dead_space() < needed {
                return Ok(());
            }
            for (key, value) in &sibling_entries {
                if !leaf.merge_with_node_refs(key, value)? {
                    return Err(Error::Invariant("sized sibling merge ran out of space"));
                }
            }
        }

        {
            let parent = self
                .trx
                .intent_log()
                .get_mut(step.node_log)?
                .modified
                .as_hot_indirect_mut()?;
            parent.merge_child_into(step.child_idx, sibling_idx);
        }

        self.cascade_downgrades(path)?;
        Ok(())
    }

    /// Walks the captured path bottom-up collapsing single-child nodes
    /// and merging BiNode children, until a node is not underfilled.
    fn cascade_downgrades(&mut self, path: &NavPath) -> Result<()> {
        for depth in (0..path.steps.len()).rev() {
            let node_log = path.steps[depth].node_log;
            let child_count = self
                .trx
                .intent_log()
                .get_mut(node_log)?
                .modified
                .as_hot_indirect()?
                .num_children();

            if child_count == 1 {
                let only = self
                    .trx
                    .intent_log()
                    .get_mut(node_log)?
                    .modified
                    .as_hot_indirect_mut()?
                    .collapse_single_child()
                    .ok_or(Error::Invariant("single-child node failed to collapse"))?;
                self.replace_step_slot(path, depth, only)?;
                continue;
            }

            if child_count == 2 {
                self.try_merge_node_children(path, depth)?;
            }
            break;
        }
        Ok(())
    }

    /// When a BiNode's two children are tries of equal height whose
    /// combined fan-out fits one node, fuse them and splice the merged
    /// node into the BiNode's place.
    fn try_merge_node_children(&mut self, path: &NavPath, depth: usize) -> Result<()> {
        let node_log = path.steps[depth].node_log;
        let parent_bit = {
            let node = self
                .trx
                .intent_log()
                .get_mut(node_log)?
                .modified
                .as_hot_indirect()?;
            if node.kind() != HotNodeKind::BiNode {
                return Ok(());
            }
            node.discriminative_bits()[0]
        };

        let left_log = self.trx.prepare_ref_slot(node_log, SlotId::HotChild(0), None)?;
        let right_log = self.trx.prepare_ref_slot(node_log, SlotId::HotChild(1), None)?;

        let right_node = {
            match &self.trx.intent_log().get_mut(right_log)?.modified {
                Page::HotIndirect(node) => node.clone(),
                _ => return Ok(()),
            }
        };
        {
            let left = match &mut self.trx.intent_log().get_mut(left_log)?.modified {
                Page::HotIndirect(node) => node,
                _ => return Ok(()),
            };
            if left.height() != right_node.height()
                || left.num_children() + right_node.num_children() > MAX_ENTRIES_PER_NODE
            {
                return Ok(());
            }
            if left.merge_with(&right_node, parent_bit).is_err() {
                // Over the bit budget; keep the BiNode.
                return Ok(());
            }
        }
        log::debug!(
            "merged sibling trie nodes below bit {parent_bit} in index {:?}/{}",
            self.index_type,
            self.index_number
        );
        self.replace_step_slot(
            path,
            depth,
            PageReference {
                log_key: left_log,
                ..PageReference::absent()
            },
        )?;
        Ok(())
    }

    /// Replaces the slot that leads to `path.steps[depth]`'s node with
    /// `reference`: in the grandparent node, or at the index root when
    /// the node is the root.
    fn replace_step_slot(
        &mut self,
        path: &NavPath,
        depth: usize,
        reference: PageReference,
    ) -> Result<()> {
        if depth == 0 {
            self.set_index_root(reference)
        } else {
            let above = &path.steps[depth - 1];
            *self
                .trx
                .intent_log()
                .get_mut(above.node_log)?
                .modified
                .as_hot_indirect_mut()?
                .child_mut(above.child_idx) = reference;
            Ok(())
        }
    }
}

impl<K> std::fmt::Debug for HotIndexWriter<'_, '_, K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HotIndexWriter")
            .field("index_type", &self.index_type)
            .field("index_number", &self.index_number)
            .finish_non_exhaustive()
    }
}
