use crate::buffer::{BufferManager, validate_budget};
use crate::config::{DatabaseConfig, ResourceConfig};
use crate::resource::Resource;
use crate::{Error, Result};
use cambium_api::TreeKind;
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;

const SETTINGS_FILE: &str = "dbsetting.obj";
const LOCK_FILE: &str = ".lock";
const RESOURCES_DIR: &str = "resources";
const KEYSELECTOR_DIR: &str = "keyselector";

/// A database: a directory of resources sharing one buffer manager and
/// guarded by an exclusive lock file.
pub struct Database {
    path: PathBuf,
    config: DatabaseConfig,
    buffer: Arc<BufferManager>,
    lock: File,
}

impl Database {
    pub fn create(path: impl Into<PathBuf>, database_type: TreeKind) -> Result<Self> {
        let path = path.into();
        if path.join(SETTINGS_FILE).exists() {
            return Err(Error::usage(format!(
                "database already exists at {}",
                path.display()
            )));
        }
        std::fs::create_dir_all(path.join(RESOURCES_DIR))?;
        let config = DatabaseConfig::new(path.clone(), database_type);
        config.save(&path.join(SETTINGS_FILE))?;
        Self::open(path)
    }

    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let config = DatabaseConfig::load(&path.join(SETTINGS_FILE))?;

        let lock = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(path.join(LOCK_FILE))?;
        lock.try_lock_exclusive()
            .map_err(|_| Error::Conflict("database is locked by another process"))?;

        let budget = validate_budget(config.effective_allocation_budget() as usize)?;
        let buffer = Arc::new(BufferManager::new(budget));
        log::info!(
            "opened database {} ({:?}, buffer budget {budget} bytes)",
            path.display(),
            config.database_type
        );
        Ok(Self {
            path,
            config,
            buffer,
            lock,
        })
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn buffer_manager(&self) -> Arc<BufferManager> {
        self.buffer.clone()
    }

    fn resource_dir(&self, name: &str) -> PathBuf {
        self.path.join(RESOURCES_DIR).join(name)
    }

    fn keyselector_dir(&self) -> PathBuf {
        self.path.join(KEYSELECTOR_DIR)
    }

    /// Creates a resource, assigning it the next resource id and
    /// persisting the updated database configuration.
    pub fn create_resource(&mut self, name: &str, mut config: ResourceConfig) -> Result<Resource> {
        validate_resource_name(name)?;
        self.config.max_resource_id += 1;
        config.resource_id = self.config.max_resource_id as u32;
        let key_dir = self.keyselector_dir();
        let needs_keys = config
            .byte_handler_classes
            .iter()
            .any(|class| class == "AesGcmCipher");
        let resource = Resource::create(
            self.resource_dir(name),
            config,
            self.buffer.clone(),
            needs_keys.then_some(key_dir.as_path()),
        )?;
        self.config.save(&self.path.join(SETTINGS_FILE))?;
        Ok(resource)
    }

    pub fn open_resource(&self, name: &str) -> Result<Resource> {
        validate_resource_name(name)?;
        let dir = self.resource_dir(name);
        if !dir.join("ressetting.obj").exists() {
            return Err(Error::usage(format!("no resource named {name}")));
        }
        let key_dir = self.keyselector_dir();
        let key_dir = key_dir.exists().then_some(key_dir.as_path());
        Resource::open(dir, self.buffer.clone(), key_dir)
    }

    pub fn resource_exists(&self, name: &str) -> bool {
        self.resource_dir(name).join("ressetting.obj").exists()
    }

    pub fn list_resources(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in std::fs::read_dir(self.path.join(RESOURCES_DIR))? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();
        Ok(names)
    }

    /// Removes a resource and everything it stores.
    pub fn remove_resource(&self, name: &str) -> Result<()> {
        validate_resource_name(name)?;
        let dir = self.resource_dir(name);
        if !dir.exists() {
            return Err(Error::usage(format!("no resource named {name}")));
        }
        std::fs::remove_dir_all(dir)?;
        Ok(())
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        let _ = fs2::FileExt::unlock(&self.lock);
    }
}

fn validate_resource_name(name: &str) -> Result<()> {
    if name.is_empty()
        || name
            .chars()
            .any(|c| !(c.is_ascii_alphanumeric() || c == '-' || c == '_'))
    {
        return Err(Error::usage(format!("invalid resource name: {name:?}")));
    }
    Ok(())
}
