use crate::buffer::BufferManager;
use crate::codec::{AesGcmCipher, BytePipeline, ByteHandler, Checksummer, DeflateCompressor};
use crate::config::ResourceConfig;
use crate::page::Page;
use crate::page::revision_root::RevisionRootPage;
use crate::page::uber::UberPage;
use crate::store::{FileStore, StorageWriter, UberRef};
use crate::til::DEFAULT_TIL_BUDGET;
use crate::trx::{AutoCommit, PageReadTrx, PageWriteTrx, TrxContext};
use crate::{Error, Result};
use cambium_api::{IndexType, RevisionNumber};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};

/// Persisted definition of one secondary index, kept under `indexes/`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDef {
    #[serde(rename = "indexNumber")]
    pub index_number: u32,
    #[serde(rename = "indexType")]
    pub index_type: IndexType,
    #[serde(rename = "keyKind")]
    pub key_kind: String,
}

/// Directory layout of one resource.
#[derive(Debug, Clone)]
pub struct ResourcePaths {
    base: PathBuf,
}

impl ResourcePaths {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    pub fn data_dir(&self) -> PathBuf {
        self.base.join("data")
    }

    pub fn data_file(&self) -> PathBuf {
        self.data_dir().join("revisions.cam")
    }

    pub fn log_dir(&self) -> PathBuf {
        self.base.join("log")
    }

    pub fn settings_file(&self) -> PathBuf {
        self.base.join("ressetting.obj")
    }

    pub fn indexes_dir(&self) -> PathBuf {
        self.base.join("indexes")
    }

    fn index_defs_file(&self) -> PathBuf {
        self.indexes_dir().join("indexes.json")
    }
}

pub(crate) struct ResourceInner {
    config: ResourceConfig,
    paths: ResourcePaths,
    store: Arc<RwLock<FileStore>>,
    pipeline: Arc<BytePipeline>,
    buffer: Arc<BufferManager>,
    write_lock: Mutex<()>,
}

/// One versioned resource: a session handle over its page store. At most
/// one write transaction at a time; reads pin committed revisions and
/// run concurrently with the writer.
#[derive(Clone)]
pub struct Resource {
    inner: Arc<ResourceInner>,
}

impl Resource {
    /// Creates the directory layout, persists the configuration and
    /// commits the empty bootstrap revision 0.
    pub fn create(
        base: impl Into<PathBuf>,
        config: ResourceConfig,
        buffer: Arc<BufferManager>,
        key_dir: Option<&Path>,
    ) -> Result<Self> {
        let paths = ResourcePaths::new(base);
        if paths.settings_file().exists() {
            return Err(Error::usage(format!(
                "resource already exists at {}",
                paths.base().display()
            )));
        }
        std::fs::create_dir_all(paths.data_dir())?;
        std::fs::create_dir_all(paths.log_dir())?;
        std::fs::create_dir_all(paths.indexes_dir())?;
        config.save(&paths.settings_file())?;

        let pipeline = Arc::new(build_pipeline(&config, key_dir)?);
        let mut store = FileStore::open(paths.data_file())?;
        bootstrap(&mut store, &pipeline)?;
        log::info!(
            "created resource {} at {}",
            config.resource_id,
            paths.base().display()
        );

        Ok(Self {
            inner: Arc::new(ResourceInner {
                config,
                paths,
                store: Arc::new(RwLock::new(store)),
                pipeline,
                buffer,
                write_lock: Mutex::new(()),
            }),
        })
    }

    pub fn open(
        base: impl Into<PathBuf>,
        buffer: Arc<BufferManager>,
        key_dir: Option<&Path>,
    ) -> Result<Self> {
        let paths = ResourcePaths::new(base);
        let config = ResourceConfig::load(&paths.settings_file())?;
        let pipeline = Arc::new(build_pipeline(&config, key_dir)?);
        let store = FileStore::open(paths.data_file())?;
        Ok(Self {
            inner: Arc::new(ResourceInner {
                config,
                paths,
                store: Arc::new(RwLock::new(store)),
                pipeline,
                buffer,
                write_lock: Mutex::new(()),
            }),
        })
    }

    pub fn config(&self) -> &ResourceConfig {
        &self.inner.config
    }

    pub fn paths(&self) -> &ResourcePaths {
        &self.inner.paths
    }

    fn trx_context(&self) -> Result<TrxContext> {
        let inner = &self.inner;
        Ok(TrxContext {
            store: inner.store.clone(),
            pipeline: inner.pipeline.clone(),
            buffer: inner.buffer.clone(),
            resource_id: inner.config.resource_id,
            versioning: inner.config.versioning()?,
            revisions_to_restore: inner.config.revisioning.revisions_to_restore,
            hash_kind: inner.config.hash_kind,
            log_dir: inner.paths.log_dir(),
            til_budget: DEFAULT_TIL_BUDGET,
        })
    }

    /// Read transaction pinned to `revision`, or to the latest commit.
    pub fn begin_read(&self, revision: Option<RevisionNumber>) -> Result<PageReadTrx> {
        PageReadTrx::open(self.trx_context()?, revision)
    }

    /// Write transaction; blocks until the resource's writer slot frees.
    pub fn begin_write(&self) -> Result<PageWriteTrx<'_>> {
        let guard = self.inner.write_lock.lock().unwrap();
        PageWriteTrx::begin(self.trx_context()?, guard, None)
    }

    /// Write transaction with auto-commit.
    pub fn begin_write_with(&self, auto: AutoCommit) -> Result<PageWriteTrx<'_>> {
        let guard = self.inner.write_lock.lock().unwrap();
        PageWriteTrx::begin(self.trx_context()?, guard, Some(auto))
    }

    /// Non-blocking variant: a second concurrent writer is a `Conflict`.
    pub fn try_begin_write(&self) -> Result<PageWriteTrx<'_>> {
        let guard = self
            .inner
            .write_lock
            .try_lock()
            .map_err(|_| Error::Conflict("resource already has a write transaction"))?;
        PageWriteTrx::begin(self.trx_context()?, guard, None)
    }

    pub fn latest_revision(&self) -> Result<Option<RevisionNumber>> {
        use crate::store::StorageReader;
        let store = self.inner.store.read().unwrap();
        Ok(store.read_uber_ref()?.map(|anchor| anchor.revision))
    }

    /// Registers a secondary index definition under `indexes/`.
    pub fn register_index(&self, def: IndexDef) -> Result<()> {
        let mut defs = self.index_defs()?;
        if defs.iter().any(|d| d.index_number == def.index_number) {
            return Err(Error::usage(format!(
                "index {} already registered",
                def.index_number
            )));
        }
        defs.push(def);
        let json = serde_json::to_string_pretty(&defs)
            .map_err(|e| Error::Config(format!("index definitions encode: {e}")))?;
        std::fs::write(self.inner.paths.index_defs_file(), json)?;
        Ok(())
    }

    pub fn index_defs(&self) -> Result<Vec<IndexDef>> {
        let path = self.inner.paths.index_defs_file();
        if !path.exists() {
            return Ok(Vec::new());
        }
        let json = std::fs::read_to_string(path)?;
        serde_json::from_str(&json).map_err(|e| Error::Config(format!("index definitions: {e}")))
    }
}

/// Commits the empty revision 0 so that every resource has a readable
/// baseline and the first user commit becomes revision 1.
fn bootstrap(store: &mut FileStore, pipeline: &BytePipeline) -> Result<()> {
    let root = RevisionRootPage::bootstrap();
    let root_bytes = pipeline.encode(Page::RevisionRoot(root).serialize())?;
    let root_offset = store.append_block(&root_bytes)?;

    let uber = UberPage {
        revision_root_ref: crate::page::reference::PageReference::to_committed(root_offset),
        revision: 0,
        past_roots: vec![root_offset],
    };
    let uber_bytes = pipeline.encode(Page::Uber(uber).serialize())?;
    let uber_offset = store.append_block(&uber_bytes)?;
    store.sync()?;
    store.write_uber_ref(UberRef {
        offset: uber_offset,
        revision: 0,
    })
}

const KEY_FILE: &str = "secret.key";

fn build_pipeline(config: &ResourceConfig, key_dir: Option<&Path>) -> Result<BytePipeline> {
    let mut handlers: Vec<Box<dyn ByteHandler>> = Vec::new();
    for class in &config.byte_handler_classes {
        match class.as_str() {
            "DeflateCompressor" => {
                if config.compression {
                    handlers.push(Box::new(DeflateCompressor));
                }
            }
            "AesGcmCipher" => {
                let dir = key_dir.ok_or_else(|| {
                    Error::Config("encryption configured without a keyselector folder".into())
                })?;
                handlers.push(Box::new(AesGcmCipher::new(&load_or_create_key(dir)?)));
            }
            "Checksummer" => handlers.push(Box::new(Checksummer)),
            other => {
                return Err(Error::Config(format!("unknown byte handler: {other}")));
            }
        }
    }
    Ok(BytePipeline::new(handlers))
}

fn load_or_create_key(dir: &Path) -> Result<[u8; 32]> {
    let path = dir.join(KEY_FILE);
    if path.exists() {
        let bytes = std::fs::read(&path)?;
        let key: [u8; 32] = bytes
            .try_into()
            .map_err(|_| Error::Config("key material must be 32 bytes".into()))?;
        return Ok(key);
    }
    std::fs::create_dir_all(dir)?;
    use aes_gcm::aead::{KeyInit, OsRng};
    let generated = aes_gcm::Aes256Gcm::generate_key(&mut OsRng);
    std::fs::write(&path, generated.as_slice())?;
    let mut key = [0u8; 32];
    key.copy_from_slice(generated.as_slice());
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn open_test_resource(dir: &Path) -> Resource {
        let buffer = Arc::new(BufferManager::new(64 * 1024 * 1024));
        Resource::create(
            dir.join("res"),
            ResourceConfig::default(),
            buffer,
            None,
        )
        .unwrap()
    }

    #[test]
    fn create_bootstraps_revision_zero() {
        let dir = tempdir().unwrap();
        let resource = open_test_resource(dir.path());
        assert_eq!(resource.latest_revision().unwrap(), Some(0));
        let rtx = resource.begin_read(None).unwrap();
        assert_eq!(rtx.revision(), 0);
        assert_eq!(rtx.max_node_key(), 0);
    }

    #[test]
    fn double_create_is_a_usage_error() {
        let dir = tempdir().unwrap();
        let _resource = open_test_resource(dir.path());
        let buffer = Arc::new(BufferManager::new(64 * 1024 * 1024));
        assert!(matches!(
            Resource::create(
                dir.path().join("res"),
                ResourceConfig::default(),
                buffer,
                None
            ),
            Err(Error::Usage(_))
        ));
    }

    #[test]
    fn second_writer_conflicts_until_first_drops() {
        let dir = tempdir().unwrap();
        let resource = open_test_resource(dir.path());
        let wtx = resource.begin_write().unwrap();
        assert!(matches!(
            resource.try_begin_write().err(),
            Some(Error::Conflict(_))
        ));
        drop(wtx);
        assert!(resource.try_begin_write().is_ok());
    }

    #[test]
    fn index_definitions_persist() {
        let dir = tempdir().unwrap();
        let resource = open_test_resource(dir.path());
        resource
            .register_index(IndexDef {
                index_number: 0,
                index_type: IndexType::Path,
                key_kind: "Long".into(),
            })
            .unwrap();
        assert!(matches!(
            resource.register_index(IndexDef {
                index_number: 0,
                index_type: IndexType::Cas,
                key_kind: "CasValue".into(),
            }),
            Err(Error::Usage(_))
        ));
        let defs = resource.index_defs().unwrap();
        assert_eq!(defs.len(), 1);
        assert_eq!(defs[0].index_type, IndexType::Path);
    }
}
