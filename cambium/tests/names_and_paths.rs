use cambium::{
    Database, NameKind, PathOp, PathSummaryReader, PathSummaryWriter, ResourceConfig, TreeKind,
};
use tempfile::tempdir;

fn resource(dir: &std::path::Path) -> cambium::Resource {
    let mut db = Database::create(dir.join("db"), TreeKind::Xml).unwrap();
    db.create_resource("named", ResourceConfig::default())
        .unwrap()
}

#[test]
fn name_interning_survives_commit() {
    let dir = tempdir().unwrap();
    let resource = resource(dir.path());

    let mut wtx = resource.begin_write().unwrap();
    let first = wtx.create_name_key("price", NameKind::Element).unwrap();
    let again = wtx.create_name_key("price", NameKind::Element).unwrap();
    assert_eq!(first, again);
    let attr = wtx.create_name_key("price", NameKind::Attribute).unwrap();
    assert_eq!(
        wtx.get_name(attr, NameKind::Attribute).unwrap().as_deref(),
        Some("price")
    );
    wtx.commit(None).unwrap();
    drop(wtx);

    let rtx = resource.begin_read(None).unwrap();
    assert_eq!(
        rtx.get_name(first, NameKind::Element).unwrap().as_deref(),
        Some("price")
    );
    assert_eq!(rtx.get_name_key("price", NameKind::Element).unwrap(), first);
    assert_eq!(
        rtx.get_name_key("missing", NameKind::Element).unwrap(),
        cambium::NO_NAME_KEY
    );
}

#[test]
fn name_release_drops_at_zero_references() {
    let dir = tempdir().unwrap();
    let resource = resource(dir.path());

    let mut wtx = resource.begin_write().unwrap();
    let key = wtx.create_name_key("temp", NameKind::ObjectKey).unwrap();
    wtx.create_name_key("temp", NameKind::ObjectKey).unwrap();
    wtx.remove_name(key, NameKind::ObjectKey).unwrap();
    assert!(wtx.get_name(key, NameKind::ObjectKey).unwrap().is_some());
    wtx.remove_name(key, NameKind::ObjectKey).unwrap();
    assert!(wtx.get_name(key, NameKind::ObjectKey).unwrap().is_none());
}

#[test]
fn path_summary_builds_and_adapts() {
    let dir = tempdir().unwrap();
    let resource = resource(dir.path());

    let mut wtx = resource.begin_write().unwrap();
    let (book, title, author) = {
        let name_book = wtx.create_name_key("book", NameKind::Element).unwrap();
        let name_title = wtx.create_name_key("title", NameKind::Element).unwrap();
        let name_author = wtx.create_name_key("author", NameKind::Element).unwrap();

        let mut summary = PathSummaryWriter::new(&mut wtx);
        let root = summary.ensure_root().unwrap();
        let book = summary.ensure_path_node(root, name_book, -1, 0).unwrap();
        let title = summary.ensure_path_node(book, name_title, -1, 0).unwrap();
        let author = summary.ensure_path_node(book, name_author, -1, 0).unwrap();
        // A second /book/title instance bumps the class count.
        let again = summary.ensure_path_node(book, name_title, -1, 0).unwrap();
        assert_eq!(again, title);
        (book, title, author)
    };
    wtx.commit(None).unwrap();
    drop(wtx);

    let rtx = resource.begin_read(None).unwrap();
    let name_title = rtx.get_name_key("title", NameKind::Element).unwrap();
    let name_author = rtx.get_name_key("author", NameKind::Element).unwrap();
    let summary = PathSummaryReader::new(&rtx);
    assert_eq!(
        summary.get_path_node_key(book, name_title, 0).unwrap(),
        Some(title)
    );
    assert_eq!(
        summary.get_path_node_key(book, name_author, 0).unwrap(),
        Some(author)
    );
    assert_eq!(summary.references(title).unwrap(), 2);
    assert_eq!(summary.references(author).unwrap(), 1);

    // Rename one title instance to subtitle: a new class appears, the
    // old one keeps its remaining instance.
    let mut wtx = resource.begin_write().unwrap();
    let subtitle_key = {
        let name_subtitle = wtx.create_name_key("subtitle", NameKind::Element).unwrap();
        let mut summary = PathSummaryWriter::new(&mut wtx);
        summary
            .adapt_path_for_changed_node(title, None, name_subtitle, -1, 0, PathOp::SetName)
            .unwrap()
    };
    wtx.commit(None).unwrap();
    drop(wtx);

    let rtx = resource.begin_read(None).unwrap();
    let summary = PathSummaryReader::new(&rtx);
    assert_ne!(subtitle_key, title);
    assert_eq!(summary.references(title).unwrap(), 1);
    assert_eq!(summary.references(subtitle_key).unwrap(), 1);

    // Releasing the last instance removes the class entirely.
    let mut wtx = resource.begin_write().unwrap();
    {
        let mut summary = PathSummaryWriter::new(&mut wtx);
        summary.release_path_node(subtitle_key).unwrap();
    }
    wtx.commit(None).unwrap();
    drop(wtx);

    let rtx = resource.begin_read(None).unwrap();
    let summary = PathSummaryReader::new(&rtx);
    assert_eq!(summary.references(subtitle_key).unwrap(), 0);
    assert!(summary.path_node(subtitle_key).unwrap().is_none());
}
