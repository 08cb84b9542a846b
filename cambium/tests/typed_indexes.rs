use cambium::{
    CasKey, CasKeySerializer, CasValue, Database, HotIndexReader, HotIndexWriter, IndexDef,
    IndexType, NodeDelegate, QNm, QnmKeySerializer, Record, ResourceConfig, SearchMode,
    StructDelegate, TreeKind,
};
use ordered_float::OrderedFloat;
use tempfile::tempdir;

#[test]
fn cas_index_orders_typed_values() {
    let dir = tempdir().unwrap();
    let mut db = Database::create(dir.path().join("db"), TreeKind::Json).unwrap();
    let resource = db
        .create_resource("typed", ResourceConfig::default())
        .unwrap();
    resource
        .register_index(IndexDef {
            index_number: 0,
            index_type: IndexType::Cas,
            key_kind: "CasValue".into(),
        })
        .unwrap();

    let keys = [
        CasKey {
            value: CasValue::Bool(true),
            path_node_key: 3,
        },
        CasKey {
            value: CasValue::Int(-5),
            path_node_key: 3,
        },
        CasKey {
            value: CasValue::Int(99),
            path_node_key: 3,
        },
        CasKey {
            value: CasValue::Double(OrderedFloat(2.5)),
            path_node_key: 3,
        },
        CasKey {
            value: CasValue::String("zebra".into()),
            path_node_key: 3,
        },
    ];

    let mut wtx = resource.begin_write().unwrap();
    {
        let mut writer =
            HotIndexWriter::new(&mut wtx, IndexType::Cas, 0, CasKeySerializer).unwrap();
        for (i, key) in keys.iter().enumerate() {
            writer.insert(key, 100 + i as u64).unwrap();
        }
    }
    wtx.commit(None).unwrap();
    drop(wtx);

    let rtx = resource.begin_read(None).unwrap();
    let reader = HotIndexReader::new(&rtx, IndexType::Cas, 0, CasKeySerializer).unwrap();
    for (i, key) in keys.iter().enumerate() {
        let refs = reader.get(key, SearchMode::Equal).unwrap().unwrap();
        assert!(refs.contains(100 + i as u64));
    }

    // Range order is tag order: bool, ints, double, string.
    let entries: Vec<_> = reader
        .range()
        .unwrap()
        .collect::<cambium::Result<Vec<_>>>()
        .unwrap();
    assert_eq!(entries.len(), keys.len());
    let order: Vec<u64> = entries
        .iter()
        .map(|(_, refs)| refs.iter().next().unwrap())
        .collect();
    assert_eq!(order, vec![100, 101, 102, 103, 104]);
}

#[test]
fn name_index_maps_qualified_names() {
    let dir = tempdir().unwrap();
    let mut db = Database::create(dir.path().join("db"), TreeKind::Xml).unwrap();
    let resource = db
        .create_resource("qnames", ResourceConfig::default())
        .unwrap();

    let para = QNm::new("tei", "p");
    let div = QNm::new("tei", "div");
    let plain = QNm::new("", "p");

    let mut wtx = resource.begin_write().unwrap();
    {
        let mut writer =
            HotIndexWriter::new(&mut wtx, IndexType::Name, 0, QnmKeySerializer).unwrap();
        writer.insert(&para, 11).unwrap();
        writer.insert(&para, 12).unwrap();
        writer.insert(&div, 20).unwrap();
        writer.insert(&plain, 30).unwrap();
    }
    wtx.commit(None).unwrap();
    drop(wtx);

    let rtx = resource.begin_read(None).unwrap();
    let reader = HotIndexReader::new(&rtx, IndexType::Name, 0, QnmKeySerializer).unwrap();

    let refs = reader.get(&para, SearchMode::Equal).unwrap().unwrap();
    assert_eq!(refs.cardinality(), 2);
    assert!(refs.contains(11) && refs.contains(12));

    // The prefix participates in identity: "p" with and without a
    // namespace prefix are different keys.
    let refs = reader.get(&plain, SearchMode::Equal).unwrap().unwrap();
    assert_eq!(refs.cardinality(), 1);
    assert!(refs.contains(30));
    assert!(
        reader
            .get(&QNm::new("other", "p"), SearchMode::Equal)
            .unwrap()
            .is_none()
    );
}

#[test]
fn encrypted_compressed_resource_round_trips() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("db");
    let config = ResourceConfig {
        byte_handler_classes: vec![
            "DeflateCompressor".into(),
            "AesGcmCipher".into(),
            "Checksummer".into(),
        ],
        ..ResourceConfig::default()
    };

    {
        let mut db = Database::create(&db_path, TreeKind::Json).unwrap();
        let resource = db.create_resource("secret", config).unwrap();
        let mut wtx = resource.begin_write().unwrap();
        wtx.create_record(
            Record::Text {
                node: NodeDelegate::new(0, 0, 0),
                structure: StructDelegate::default(),
                value: b"classified growth ring".to_vec(),
            },
            IndexType::Document,
            0,
        )
        .unwrap();
        wtx.commit(None).unwrap();
    }

    // Key material persists under keyselector/, so a fresh process can
    // still decode the pages.
    assert!(db_path.join("keyselector").join("secret.key").exists());
    let db = Database::open(&db_path).unwrap();
    let resource = db.open_resource("secret").unwrap();
    let rtx = resource.begin_read(None).unwrap();
    let record = rtx.get_record(1, IndexType::Document).unwrap().unwrap();
    assert_eq!(record.value(), Some(&b"classified growth ring"[..]));
}
