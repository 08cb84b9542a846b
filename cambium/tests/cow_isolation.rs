use cambium::{
    Database, IndexType, NodeDelegate, Record, ResourceConfig, StructDelegate, TreeKind,
};
use tempfile::tempdir;

fn text(value: &[u8]) -> Record {
    Record::Text {
        node: NodeDelegate::new(0, 0, 0),
        structure: StructDelegate::default(),
        value: value.to_vec(),
    }
}

#[test]
fn uncommitted_changes_are_invisible_to_pinned_readers() {
    let dir = tempdir().unwrap();
    let mut db = Database::create(dir.path().join("db"), TreeKind::Json).unwrap();
    let resource = db
        .create_resource("docs", ResourceConfig::default())
        .unwrap();

    {
        let mut wtx = resource.begin_write().unwrap();
        for value in [&b"one"[..], b"two", b"three"] {
            wtx.create_record(text(value), IndexType::Document, 0)
                .unwrap();
        }
        wtx.commit(None).unwrap();
    }

    // Reader pinned before the modification.
    let pinned = resource.begin_read(Some(1)).unwrap();

    let mut wtx = resource.begin_write().unwrap();
    wtx.prepare_record_for_modification(2, IndexType::Document, 0)
        .unwrap()
        .set_value(b"abc".to_vec())
        .unwrap();

    // The writer sees its own change; the pinned reader does not.
    assert_eq!(
        wtx.get_record(2, IndexType::Document).unwrap().unwrap().value(),
        Some(&b"abc"[..])
    );
    assert_eq!(
        pinned.get_record(2, IndexType::Document).unwrap().unwrap().value(),
        Some(&b"two"[..])
    );

    wtx.commit(None).unwrap();
    drop(wtx);

    // Still the old value at revision 1, the new one at revision 2.
    assert_eq!(
        pinned.get_record(2, IndexType::Document).unwrap().unwrap().value(),
        Some(&b"two"[..])
    );
    let fresh = resource.begin_read(Some(2)).unwrap();
    assert_eq!(
        fresh.get_record(2, IndexType::Document).unwrap().unwrap().value(),
        Some(&b"abc"[..])
    );
    assert_eq!(
        fresh.get_record(2, IndexType::Document).unwrap().unwrap()
            .delegate()
            .last_modified_revision,
        2
    );
}

#[test]
fn repeated_prepare_returns_the_same_staged_instance() {
    let dir = tempdir().unwrap();
    let mut db = Database::create(dir.path().join("db"), TreeKind::Json).unwrap();
    let resource = db
        .create_resource("docs", ResourceConfig::default())
        .unwrap();

    {
        let mut wtx = resource.begin_write().unwrap();
        wtx.create_record(text(b"start"), IndexType::Document, 0)
            .unwrap();
        wtx.commit(None).unwrap();
    }

    let mut wtx = resource.begin_write().unwrap();
    wtx.prepare_record_for_modification(1, IndexType::Document, 0)
        .unwrap()
        .set_value(b"first".to_vec())
        .unwrap();
    // The second prepare must hand back the staged record, edits intact.
    let record = wtx
        .prepare_record_for_modification(1, IndexType::Document, 0)
        .unwrap();
    assert_eq!(record.value(), Some(&b"first"[..]));
    record.set_value(b"second".to_vec()).unwrap();
    wtx.commit(None).unwrap();
    drop(wtx);

    let rtx = resource.begin_read(None).unwrap();
    assert_eq!(
        rtx.get_record(1, IndexType::Document).unwrap().unwrap().value(),
        Some(&b"second"[..])
    );
}

#[test]
fn rollback_discards_staged_changes() {
    let dir = tempdir().unwrap();
    let mut db = Database::create(dir.path().join("db"), TreeKind::Json).unwrap();
    let resource = db
        .create_resource("docs", ResourceConfig::default())
        .unwrap();

    {
        let mut wtx = resource.begin_write().unwrap();
        wtx.create_record(text(b"keep"), IndexType::Document, 0)
            .unwrap();
        wtx.commit(None).unwrap();
    }

    let mut wtx = resource.begin_write().unwrap();
    wtx.create_record(text(b"drop me"), IndexType::Document, 0)
        .unwrap();
    wtx.prepare_record_for_modification(1, IndexType::Document, 0)
        .unwrap()
        .set_value(b"mutated".to_vec())
        .unwrap();
    wtx.rollback().unwrap();

    // Nothing leaked into the transaction's view or the committed state.
    assert!(wtx.get_record(2, IndexType::Document).unwrap().is_none());
    assert_eq!(
        wtx.get_record(1, IndexType::Document).unwrap().unwrap().value(),
        Some(&b"keep"[..])
    );
    drop(wtx);

    assert_eq!(resource.latest_revision().unwrap(), Some(1));
    let rtx = resource.begin_read(None).unwrap();
    assert_eq!(rtx.max_node_key(), 1);
    assert!(rtx.get_record(2, IndexType::Document).unwrap().is_none());
}

#[test]
fn removed_records_stay_visible_to_older_revisions() {
    let dir = tempdir().unwrap();
    let mut db = Database::create(dir.path().join("db"), TreeKind::Json).unwrap();
    let resource = db
        .create_resource("docs", ResourceConfig::default())
        .unwrap();

    {
        let mut wtx = resource.begin_write().unwrap();
        wtx.create_record(text(b"ephemeral"), IndexType::Document, 0)
            .unwrap();
        wtx.commit(None).unwrap();
    }
    {
        let mut wtx = resource.begin_write().unwrap();
        wtx.remove_record(1, IndexType::Document, 0).unwrap();
        wtx.commit(None).unwrap();
    }

    let old = resource.begin_read(Some(1)).unwrap();
    assert!(old.get_record(1, IndexType::Document).unwrap().is_some());
    let new = resource.begin_read(Some(2)).unwrap();
    assert!(new.get_record(1, IndexType::Document).unwrap().is_none());

    // Monotonic node keys: removal does not recycle key space.
    let mut wtx = resource.begin_write().unwrap();
    let record = wtx
        .create_record(text(b"later"), IndexType::Document, 0)
        .unwrap();
    assert_eq!(record.node_key(), 2);
    wtx.commit(None).unwrap();
}
