use cambium::{
    Database, Error, HotIndexReader, HotIndexWriter, HotNodeKind, IndexType, LongKeySerializer,
    Resource, ResourceConfig, SearchMode, TreeKind, TrieShape,
};
use tempfile::tempdir;

fn path_resource(dir: &std::path::Path) -> Resource {
    let mut db = Database::create(dir.join("db"), TreeKind::Json).unwrap();
    db.create_resource("indexed", ResourceConfig::default())
        .unwrap()
}

#[test]
fn thousand_inserts_split_into_a_binode() {
    let dir = tempdir().unwrap();
    let resource = path_resource(dir.path());

    let mut wtx = resource.begin_write().unwrap();
    {
        let mut writer =
            HotIndexWriter::new(&mut wtx, IndexType::Path, 0, LongKeySerializer).unwrap();
        for i in 1..=1000i64 {
            writer.insert(&i, i as u64).unwrap();
        }
    }
    wtx.commit(None).unwrap();
    drop(wtx);

    let rtx = resource.begin_read(None).unwrap();
    let reader = HotIndexReader::new(&rtx, IndexType::Path, 0, LongKeySerializer).unwrap();

    for i in 1..=1000i64 {
        let refs = reader.get(&i, SearchMode::Equal).unwrap().unwrap();
        assert_eq!(refs.cardinality(), 1, "key {i}");
        assert!(refs.contains(i as u64));
    }
    assert!(
        reader.get(&1001, SearchMode::Equal).unwrap().is_none(),
        "absent key must miss"
    );

    let shape = reader.shape().unwrap().unwrap();
    assert_eq!(shape.total_entries(), 1000);
    assert_eq!(shape.depth(), 2);
    let TrieShape::Node { kind, children, .. } = &shape else {
        panic!("root must be an indirect node, got {shape:?}");
    };
    assert_eq!(*kind, HotNodeKind::BiNode);
    assert_eq!(children.len(), 2);
    for child in children {
        let TrieShape::Leaf { live_entries } = child else {
            panic!("children of the first split must be leaves");
        };
        assert!(*live_entries >= 300, "unbalanced split: {live_entries}");
    }
}

#[test]
fn insertion_order_does_not_change_lookup_results() {
    let dir = tempdir().unwrap();
    let resource = path_resource(dir.path());

    // A fixed pseudo-random permutation of 1..=1000.
    let mut keys: Vec<i64> = (1..=1000).collect();
    let mut state = 0x2545_F491_4F6C_DD1Du64;
    for i in (1..keys.len()).rev() {
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        keys.swap(i, (state % (i as u64 + 1)) as usize);
    }

    let mut wtx = resource.begin_write().unwrap();
    {
        let mut writer =
            HotIndexWriter::new(&mut wtx, IndexType::Path, 0, LongKeySerializer).unwrap();
        for &key in &keys {
            writer.insert(&key, key as u64).unwrap();
        }
    }
    wtx.commit(None).unwrap();
    drop(wtx);

    let rtx = resource.begin_read(None).unwrap();
    let reader = HotIndexReader::new(&rtx, IndexType::Path, 0, LongKeySerializer).unwrap();
    for i in 1..=1000i64 {
        let refs = reader.get(&i, SearchMode::Equal).unwrap().unwrap();
        assert!(refs.contains(i as u64));
    }

    // The range cursor yields keys in serialized (= numeric) order.
    let entries: Vec<_> = reader
        .range()
        .unwrap()
        .collect::<cambium::Result<Vec<_>>>()
        .unwrap();
    assert_eq!(entries.len(), 1000);
    for pair in entries.windows(2) {
        assert!(pair[0].0 < pair[1].0);
    }
}

#[test]
fn merge_and_remove_semantics() {
    let dir = tempdir().unwrap();
    let resource = path_resource(dir.path());

    let mut wtx = resource.begin_write().unwrap();
    {
        let mut writer =
            HotIndexWriter::new(&mut wtx, IndexType::Path, 0, LongKeySerializer).unwrap();
        writer.insert(&42, 7).unwrap();
        writer.insert(&42, 9).unwrap();
    }
    wtx.commit(None).unwrap();

    {
        let rtx = resource.begin_read(None).unwrap();
        let reader =
            HotIndexReader::new(&rtx, IndexType::Path, 0, LongKeySerializer).unwrap();
        let refs = reader.get(&42, SearchMode::Equal).unwrap().unwrap();
        assert_eq!(refs.cardinality(), 2);
        assert!(refs.contains(7) && refs.contains(9));
    }

    {
        let mut writer =
            HotIndexWriter::new(&mut wtx, IndexType::Path, 0, LongKeySerializer).unwrap();
        writer.remove(&42, 7).unwrap();
    }
    wtx.commit(None).unwrap();
    {
        let rtx = resource.begin_read(None).unwrap();
        let reader =
            HotIndexReader::new(&rtx, IndexType::Path, 0, LongKeySerializer).unwrap();
        let refs = reader.get(&42, SearchMode::Equal).unwrap().unwrap();
        assert_eq!(refs.cardinality(), 1);
        assert!(refs.contains(9));
    }

    {
        let mut writer =
            HotIndexWriter::new(&mut wtx, IndexType::Path, 0, LongKeySerializer).unwrap();
        writer.remove(&42, 9).unwrap();
    }
    wtx.commit(None).unwrap();
    drop(wtx);
    let rtx = resource.begin_read(None).unwrap();
    let reader = HotIndexReader::new(&rtx, IndexType::Path, 0, LongKeySerializer).unwrap();
    assert!(reader.get(&42, SearchMode::Equal).unwrap().is_none());

    // Older revisions still see the pre-removal bitmaps.
    let rtx1 = resource.begin_read(Some(1)).unwrap();
    let reader1 = HotIndexReader::new(&rtx1, IndexType::Path, 0, LongKeySerializer).unwrap();
    let refs = reader1.get(&42, SearchMode::Equal).unwrap().unwrap();
    assert_eq!(refs.cardinality(), 2);
}

#[test]
fn point_lookups_reject_ordered_search_modes() {
    let dir = tempdir().unwrap();
    let resource = path_resource(dir.path());
    let rtx = resource.begin_read(None).unwrap();
    let reader = HotIndexReader::new(&rtx, IndexType::Path, 0, LongKeySerializer).unwrap();
    assert!(matches!(
        reader.get(&1, SearchMode::GreaterOrEqual),
        Err(Error::Usage(_))
    ));
}

#[test]
fn irreducible_single_entry_page_reports_space_exhausted() {
    let dir = tempdir().unwrap();
    let resource = path_resource(dir.path());

    let mut wtx = resource.begin_write().unwrap();
    let mut writer = HotIndexWriter::new(&mut wtx, IndexType::Path, 0, LongKeySerializer).unwrap();

    // One key whose bitmap grows until it fills the page: spreading node
    // keys across distinct high-32-bit buckets defeats compression.
    let mut last = Ok(());
    for i in 0..4000u64 {
        last = writer.insert(&42, i << 32);
        if last.is_err() {
            break;
        }
    }
    match last {
        Err(Error::SpaceExhausted {
            index_type,
            entry_count,
            remaining_space,
            required_space,
        }) => {
            assert_eq!(index_type, IndexType::Path);
            assert_eq!(entry_count, 1);
            assert!(required_space > remaining_space);
        }
        other => panic!("expected SpaceExhausted, got {other:?}"),
    }
}
