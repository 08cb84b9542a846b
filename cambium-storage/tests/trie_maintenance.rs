use cambium_api::{IndexType, SearchMode, TreeKind};
use cambium_storage::config::ResourceConfig;
use cambium_storage::database::Database;
use cambium_storage::hot::keys::LongKeySerializer;
use cambium_storage::hot::{HotIndexReader, HotIndexWriter};
use cambium_storage::resource::Resource;
use tempfile::tempdir;

fn path_resource(dir: &std::path::Path) -> Resource {
    let mut db = Database::create(dir.join("db"), TreeKind::Json).unwrap();
    db.create_resource("trie", ResourceConfig::default())
        .unwrap()
}

#[test]
fn mass_removal_then_reinsert() {
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

    // Remove everything; removing an absent key is a no-op.
    {
        let mut writer =
            HotIndexWriter::new(&mut wtx, IndexType::Path, 0, LongKeySerializer).unwrap();
        for i in 1..=1000i64 {
            writer.remove(&i, i as u64).unwrap();
        }
        writer.remove(&5000, 5000).unwrap();
    }
    wtx.commit(None).unwrap();

    {
        let rtx = resource.begin_read(None).unwrap();
        let reader =
            HotIndexReader::new(&rtx, IndexType::Path, 0, LongKeySerializer).unwrap();
        for i in [1i64, 250, 500, 750, 1000] {
            assert!(reader.get(&i, SearchMode::Equal).unwrap().is_none());
        }
        let live: Vec<_> = reader
            .range()
            .unwrap()
            .collect::<cambium_storage::Result<Vec<_>>>()
            .unwrap();
        assert!(live.is_empty());
    }

    // Tombstoned keys accept fresh inserts.
    {
        let mut writer =
            HotIndexWriter::new(&mut wtx, IndexType::Path, 0, LongKeySerializer).unwrap();
        for i in [1i64, 500, 1000] {
            writer.insert(&i, 9_000 + i as u64).unwrap();
        }
    }
    wtx.commit(None).unwrap();
    drop(wtx);

    let rtx = resource.begin_read(None).unwrap();
    let reader = HotIndexReader::new(&rtx, IndexType::Path, 0, LongKeySerializer).unwrap();
    for i in [1i64, 500, 1000] {
        let refs = reader.get(&i, SearchMode::Equal).unwrap().unwrap();
        assert_eq!(refs.cardinality(), 1);
        assert!(refs.contains(9_000 + i as u64));
    }
    assert!(reader.get(&2, SearchMode::Equal).unwrap().is_none());

    // Historic revisions keep the full index.
    let rtx1 = resource.begin_read(Some(1)).unwrap();
    let reader1 = HotIndexReader::new(&rtx1, IndexType::Path, 0, LongKeySerializer).unwrap();
    assert!(reader1.get(&777, SearchMode::Equal).unwrap().is_some());
}

#[test]
fn independent_indexes_do_not_interfere() {
    let dir = tempdir().unwrap();
    let resource = path_resource(dir.path());

    let mut wtx = resource.begin_write().unwrap();
    {
        let mut zero =
            HotIndexWriter::new(&mut wtx, IndexType::Path, 0, LongKeySerializer).unwrap();
        zero.insert(&1, 10).unwrap();
    }
    {
        let mut one =
            HotIndexWriter::new(&mut wtx, IndexType::Path, 1, LongKeySerializer).unwrap();
        one.insert(&1, 20).unwrap();
    }
    wtx.commit(None).unwrap();
    drop(wtx);

    let rtx = resource.begin_read(None).unwrap();
    let zero = HotIndexReader::new(&rtx, IndexType::Path, 0, LongKeySerializer).unwrap();
    let one = HotIndexReader::new(&rtx, IndexType::Path, 1, LongKeySerializer).unwrap();
    let refs0 = zero.get(&1, SearchMode::Equal).unwrap().unwrap();
    let refs1 = one.get(&1, SearchMode::Equal).unwrap().unwrap();
    assert!(refs0.contains(10) && !refs0.contains(20));
    assert!(refs1.contains(20) && !refs1.contains(10));
}
