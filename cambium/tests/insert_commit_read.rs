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
fn insert_commit_read() {
    let dir = tempdir().unwrap();
    let mut db = Database::create(dir.path().join("db"), TreeKind::Json).unwrap();
    let resource = db
        .create_resource("docs", ResourceConfig::default())
        .unwrap();

    let mut wtx = resource.begin_write().unwrap();
    for value in [&b"a"[..], b"b", b"c"] {
        wtx.create_record(text(value), IndexType::Document, 0)
            .unwrap();
    }
    let anchor = wtx.commit(Some("first three")).unwrap();
    assert_eq!(anchor.revision, 1);
    drop(wtx);

    let rtx = resource.begin_read(Some(1)).unwrap();
    assert_eq!(rtx.revision(), 1);
    assert_eq!(rtx.max_node_key(), 3);
    assert_eq!(rtx.commit_message(), Some("first three"));
    assert!(rtx.commit_timestamp_millis() > 0);

    for (key, value) in [(1u64, &b"a"[..]), (2, b"b"), (3, b"c")] {
        let record = rtx.get_record(key, IndexType::Document).unwrap().unwrap();
        assert_eq!(record.node_key(), key);
        assert_eq!(record.value(), Some(value));
        assert_eq!(record.delegate().last_modified_revision, 1);
        assert!(record.delegate().previous_revision < 1);
    }
    assert!(rtx.get_record(4, IndexType::Document).unwrap().is_none());
}

#[test]
fn committed_state_survives_reopen() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("db");
    {
        let mut db = Database::create(&db_path, TreeKind::Json).unwrap();
        let resource = db
            .create_resource("docs", ResourceConfig::default())
            .unwrap();
        let mut wtx = resource.begin_write().unwrap();
        wtx.create_record(text(b"durable"), IndexType::Document, 0)
            .unwrap();
        wtx.commit(None).unwrap();
    }

    let db = Database::open(&db_path).unwrap();
    let resource = db.open_resource("docs").unwrap();
    assert_eq!(resource.latest_revision().unwrap(), Some(1));
    let rtx = resource.begin_read(None).unwrap();
    let record = rtx.get_record(1, IndexType::Document).unwrap().unwrap();
    assert_eq!(record.value(), Some(&b"durable"[..]));
}

#[test]
fn node_keys_span_leaf_boundaries() {
    let dir = tempdir().unwrap();
    let mut db = Database::create(dir.path().join("db"), TreeKind::Json).unwrap();
    let resource = db
        .create_resource("docs", ResourceConfig::default())
        .unwrap();

    // Enough records to cross into a second leaf (capacity 512).
    let mut wtx = resource.begin_write().unwrap();
    for i in 0..600u64 {
        wtx.create_record(text(format!("v{i}").as_bytes()), IndexType::Document, 0)
            .unwrap();
    }
    wtx.commit(None).unwrap();
    drop(wtx);

    let rtx = resource.begin_read(None).unwrap();
    assert_eq!(rtx.max_node_key(), 600);
    for key in [1u64, 511, 512, 513, 600] {
        let record = rtx.get_record(key, IndexType::Document).unwrap().unwrap();
        assert_eq!(record.value(), Some(format!("v{}", key - 1).as_bytes()));
    }
}
