//! # Cambium
//!
//! **A versioned, copy-on-write document store. Every commit is a
//! readable growth ring.**
//!
//! Cambium keeps a sequence of immutable revisions of a tree of records.
//! A write transaction never overwrites committed bytes: it clones the
//! pages it touches, appends them to a log-structured store and flips a
//! single anchor at commit. Old revisions stay readable forever.
//!
//! ## Quickstart
//!
//! ```rust,no_run
//! use cambium::{Database, ResourceConfig, TreeKind, Result};
//!
//! fn main() -> Result<()> {
//!     let mut db = Database::create("books.cam", TreeKind::Json)?;
//!     let resource = db.create_resource("library", ResourceConfig::default())?;
//!
//!     let mut wtx = resource.begin_write()?;
//!     // ... create records via wtx.create_record(...)
//!     wtx.commit(Some("initial import"))?;
//!
//!     // Readers pin a revision and never block the writer.
//!     let rtx = resource.begin_read(None)?;
//!     assert_eq!(rtx.revision(), 1);
//!     let _at_bootstrap = resource.begin_read(Some(0))?;
//!     Ok(())
//! }
//! ```
//!
//! ## Core concepts
//!
//! - [`Database`]: a locked directory of resources sharing one buffer
//!   manager.
//! - [`Resource`]: one versioned store; at most one writer, any number
//!   of revision-pinned readers.
//! - [`PageWriteTrx`] / [`PageReadTrx`]: the page-level transaction pair.
//! - [`HotIndexWriter`] / [`HotIndexReader`]: Height-Optimized Trie
//!   secondary indexes (PATH, CAS, NAME) mapping byte keys to
//!   node-reference bitmaps.

pub use cambium_api::{
    IndexType, NameKey, NodeKey, PageKey, PathNodeKey, PathOp, RevisionNumber, SearchMode,
    TreeKind, NO_NAME_KEY,
};
pub use cambium_storage::{Error, Result};

pub use cambium_storage::buffer::BufferManager;
pub use cambium_storage::config::{DatabaseConfig, HashKind, ResourceConfig, RevisioningConfig};
pub use cambium_storage::database::Database;
pub use cambium_storage::dewey::DeweyId;
pub use cambium_storage::hot::keys::{
    CasKey, CasKeySerializer, CasValue, KeySerializer, LongKeySerializer, QNm, QnmKeySerializer,
};
pub use cambium_storage::hot::node::HotNodeKind;
pub use cambium_storage::hot::reader::TrieShape;
pub use cambium_storage::hot::{HotIndexReader, HotIndexWriter};
pub use cambium_storage::noderefs::NodeReferences;
pub use cambium_storage::page::name_page::NameKind;
pub use cambium_storage::pathsummary::{PathSummaryReader, PathSummaryWriter};
pub use cambium_storage::record::{NodeDelegate, Record, RecordKind, StructDelegate};
pub use cambium_storage::resource::{IndexDef, Resource};
pub use cambium_storage::trx::{AutoCommit, PageReadTrx, PageWriteTrx};
pub use cambium_storage::versioning::Versioning;
