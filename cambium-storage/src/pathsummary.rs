use crate::record::{NodeDelegate, Record, StructDelegate};
use crate::trx::{PageReadTrx, PageWriteTrx};
use crate::{Error, NO_KEY, Result};
use cambium_api::{IndexType, NameKey, PathNodeKey, PathOp};

/// Path summary: one tree of path classes per resource, each class
/// counting the document nodes that instantiate it. Stored as `PathNode`
/// records in the path-summary record index; structure lives in the
/// records' sibling and child links, never in references.
pub struct PathSummaryWriter<'a, 't> {
    trx: &'a mut PageWriteTrx<'t>,
}

impl<'a, 't> PathSummaryWriter<'a, 't> {
    pub fn new(trx: &'a mut PageWriteTrx<'t>) -> Self {
        Self { trx }
    }

    fn path_node(&mut self, key: PathNodeKey) -> Result<Record> {
        self.trx
            .get_record(key, IndexType::PathSummary)?
            .ok_or_else(|| Error::usage(format!("no path node with key {key}")))
    }

    /// Root path class; created on first use.
    pub fn ensure_root(&mut self) -> Result<PathNodeKey> {
        if self.trx.get_record(1, IndexType::PathSummary)?.is_some() {
            return Ok(1);
        }
        let root = Record::PathNode {
            node: NodeDelegate::new(0, NO_KEY, self.trx.revision()),
            structure: StructDelegate::default(),
            name_key: -1,
            uri_key: -1,
            level: 0,
            kind: 0,
            references: 1,
        };
        let stored = self
            .trx
            .create_record(root, IndexType::PathSummary, 0)?;
        debug_assert_eq!(stored.node_key(), 1);
        Ok(stored.node_key())
    }

    /// Child path class of `parent` matching `(name_key, kind)`.
    pub fn get_path_node_key(
        &mut self,
        parent: PathNodeKey,
        name_key: NameKey,
        kind: u8,
    ) -> Result<Option<PathNodeKey>> {
        let parent_record = self.path_node(parent)?;
        let mut child = parent_record
            .structure()
            .ok_or(Error::Invariant("path node without structure"))?
            .first_child;
        while child != NO_KEY {
            let record = self.path_node(child as PathNodeKey)?;
            let Record::PathNode {
                name_key: child_name,
                kind: child_kind,
                structure,
                ..
            } = &record
            else {
                return Err(Error::corrupt("path summary holds a non-path record"));
            };
            if *child_name == name_key && *child_kind == kind {
                return Ok(Some(record.node_key()));
            }
            child = structure.right_sibling;
        }
        Ok(None)
    }

    /// Finds or creates the child class, bumping its instance count.
    pub fn ensure_path_node(
        &mut self,
        parent: PathNodeKey,
        name_key: NameKey,
        uri_key: NameKey,
        kind: u8,
    ) -> Result<PathNodeKey> {
        if let Some(existing) = self.get_path_node_key(parent, name_key, kind)? {
            let record = self
                .trx
                .prepare_record_for_modification(existing, IndexType::PathSummary, 0)?;
            let Record::PathNode { references, .. } = record else {
                return Err(Error::corrupt("path summary holds a non-path record"));
            };
            *references += 1;
            return Ok(existing);
        }

        let parent_record = self.path_node(parent)?;
        let parent_level = match &parent_record {
            Record::PathNode { level, .. } => *level,
            _ => return Err(Error::corrupt("path summary holds a non-path record")),
        };
        let old_first = parent_record
            .structure()
            .ok_or(Error::Invariant("path node without structure"))?
            .first_child;

        let fresh = Record::PathNode {
            node: NodeDelegate::new(0, parent as i64, self.trx.revision()),
            structure: StructDelegate {
                right_sibling: old_first,
                ..StructDelegate::default()
            },
            name_key,
            uri_key,
            level: parent_level + 1,
            kind,
            references: 1,
        };
        let stored = self.trx.create_record(fresh, IndexType::PathSummary, 0)?;
        let new_key = stored.node_key();

        // Link in at the head of the parent's child chain.
        if old_first != NO_KEY {
            let sibling = self.trx.prepare_record_for_modification(
                old_first as PathNodeKey,
                IndexType::PathSummary,
                0,
            )?;
            sibling
                .structure_mut()
                .ok_or(Error::Invariant("path node without structure"))?
                .left_sibling = new_key as i64;
        }
        let parent_record =
            self.trx
                .prepare_record_for_modification(parent, IndexType::PathSummary, 0)?;
        let structure = parent_record
            .structure_mut()
            .ok_or(Error::Invariant("path node without structure"))?;
        structure.first_child = new_key as i64;
        if structure.last_child == NO_KEY {
            structure.last_child = new_key as i64;
        }
        structure.child_count += 1;
        Ok(new_key)
    }

    /// Re-homes one instance of a path class after its node changed:
    /// `SetName` and `MovedOnSameLevel` stay under the same parent with
    /// the new name, `Moved` lands under `new_parent`. Returns the path
    /// class now counting the node.
    pub fn adapt_path_for_changed_node(
        &mut self,
        path_node_key: PathNodeKey,
        new_parent: Option<PathNodeKey>,
        name_key: NameKey,
        uri_key: NameKey,
        kind: u8,
        op: PathOp,
    ) -> Result<PathNodeKey> {
        let old = self.path_node(path_node_key)?;
        let old_parent = old.delegate().parent_key;
        let target_parent = match op {
            PathOp::SetName | PathOp::MovedOnSameLevel => {
                if old_parent == NO_KEY {
                    return Err(Error::usage("the root path class cannot be renamed"));
                }
                old_parent as PathNodeKey
            }
            PathOp::Moved => new_parent
                .ok_or_else(|| Error::usage("Moved requires the new parent path class".into()))?,
        };

        let new_key = self.ensure_path_node(target_parent, name_key, uri_key, kind)?;
        if new_key != path_node_key {
            self.release_path_node(path_node_key)?;
        } else {
            // ensure_path_node bumped the count; the same class keeps a
            // net count of zero for a rename onto itself.
            let record = self.trx.prepare_record_for_modification(
                path_node_key,
                IndexType::PathSummary,
                0,
            )?;
            if let Record::PathNode { references, .. } = record {
                *references -= 1;
            }
        }
        Ok(new_key)
    }

    /// Drops one instance from a path class, unlinking and deleting the
    /// record when the count reaches zero.
    pub fn release_path_node(&mut self, key: PathNodeKey) -> Result<()> {
        let (remaining, parent, left, right) = {
            let record =
                self.trx
                    .prepare_record_for_modification(key, IndexType::PathSummary, 0)?;
            let Record::PathNode {
                references,
                node,
                structure,
                ..
            } = record
            else {
                return Err(Error::corrupt("path summary holds a non-path record"));
            };
            *references = references.saturating_sub(1);
            (
                *references,
                node.parent_key,
                structure.left_sibling,
                structure.right_sibling,
            )
        };
        if remaining > 0 {
            return Ok(());
        }

        // Unlink from the sibling chain, then delete.
        if left != NO_KEY {
            let sibling = self.trx.prepare_record_for_modification(
                left as PathNodeKey,
                IndexType::PathSummary,
                0,
            )?;
            sibling.structure_mut().unwrap().right_sibling = right;
        }
        if right != NO_KEY {
            let sibling = self.trx.prepare_record_for_modification(
                right as PathNodeKey,
                IndexType::PathSummary,
                0,
            )?;
            sibling.structure_mut().unwrap().left_sibling = left;
        }
        if parent != NO_KEY {
            let parent_record = self.trx.prepare_record_for_modification(
                parent as PathNodeKey,
                IndexType::PathSummary,
                0,
            )?;
            let structure = parent_record.structure_mut().unwrap();
            if structure.first_child == key as i64 {
                structure.first_child = right;
            }
            if structure.last_child == key as i64 {
                structure.last_child = left;
            }
            structure.child_count = structure.child_count.saturating_sub(1);
        }
        self.trx.remove_record(key, IndexType::PathSummary, 0)?;
        Ok(())
    }
}

/// Read-only path summary lookups over a pinned revision.
pub struct PathSummaryReader<'a> {
    trx: &'a PageReadTrx,
}

impl<'a> PathSummaryReader<'a> {
    pub fn new(trx: &'a PageReadTrx) -> Self {
        Self { trx }
    }

    pub fn path_node(&self, key: PathNodeKey) -> Result<Option<Record>> {
        self.trx.get_path_record(key)
    }

    pub fn get_path_node_key(
        &self,
        parent: PathNodeKey,
        name_key: NameKey,
        kind: u8,
    ) -> Result<Option<PathNodeKey>> {
        let Some(parent_record) = self.trx.get_path_record(parent)? else {
            return Ok(None);
        };
        let mut child = parent_record
            .structure()
            .ok_or(Error::Invariant("path node without structure"))?
            .first_child;
        while child != NO_KEY {
            let Some(record) = self.trx.get_path_record(child as PathNodeKey)? else {
                return Err(Error::corrupt("dangling path sibling link"));
            };
            let Record::PathNode {
                name_key: child_name,
                kind: child_kind,
                structure,
                ..
            } = &record
            else {
                return Err(Error::corrupt("path summary holds a non-path record"));
            };
            if *child_name == name_key && *child_kind == kind {
                return Ok(Some(record.node_key()));
            }
            child = structure.right_sibling;
        }
        Ok(None)
    }

    /// Number of document nodes instantiating the class.
    pub fn references(&self, key: PathNodeKey) -> Result<u64> {
        match self.trx.get_path_record(key)? {
            Some(Record::PathNode { references, .. }) => Ok(references),
            Some(_) => Err(Error::corrupt("path summary holds a non-path record")),
            None => Ok(0),
        }
    }
}
