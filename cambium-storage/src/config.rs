use crate::versioning::Versioning;
use crate::{DEFAULT_REVISIONS_TO_RESTORE, Error, Result};
use cambium_api::TreeKind;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Environment override for the allocator / buffer budget, taking
/// precedence over `maxSegmentAllocationSize`.
pub const ALLOCATOR_MAX_SIZE_ENV: &str = "CAMBIUM_ALLOCATOR_MAX_SIZE";

pub const DEFAULT_MAX_SEGMENT_ALLOCATION: u64 = 16 * 1024 * 1024 * 1024;

/// How record hashes are maintained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HashKind {
    None,
    Rolling,
    Postorder,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevisioningConfig {
    #[serde(rename = "revisioningClass")]
    pub revisioning_class: String,
    #[serde(rename = "numbersOfRevisiontoRestore")]
    pub revisions_to_restore: u32,
}

/// Per-resource configuration, persisted as `ressetting.obj`. Field
/// names are part of the stored format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceConfig {
    pub revisioning: RevisioningConfig,
    #[serde(rename = "byteHandlerClasses")]
    pub byte_handler_classes: Vec<String>,
    #[serde(rename = "storageKind")]
    pub storage_kind: String,
    #[serde(rename = "hashKind")]
    pub hash_kind: HashKind,
    pub compression: bool,
    #[serde(rename = "pathSummary")]
    pub path_summary: bool,
    #[serde(rename = "resourceID")]
    pub resource_id: u32,
    #[serde(rename = "deweyIDsStored")]
    pub dewey_ids_stored: bool,
    pub persistenter: String,
}

impl Default for ResourceConfig {
    fn default() -> Self {
        Self {
            revisioning: RevisioningConfig {
                revisioning_class: Versioning::SlidingSnapshot.class_name().to_string(),
                revisions_to_restore: DEFAULT_REVISIONS_TO_RESTORE,
            },
            byte_handler_classes: vec!["DeflateCompressor".into(), "Checksummer".into()],
            storage_kind: "File".into(),
            hash_kind: HashKind::Rolling,
            compression: true,
            path_summary: true,
            resource_id: 0,
            dewey_ids_stored: false,
            persistenter: "RecordPersister".into(),
        }
    }
}

impl ResourceConfig {
    pub fn versioning(&self) -> Result<Versioning> {
        Versioning::from_class_name(&self.revisioning.revisioning_class)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("resource config encode: {e}")))?;
        std::fs::write(path, json)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        serde_json::from_str(&json).map_err(|e| Error::Config(format!("resource config: {e}")))
    }
}

/// Database-wide configuration, persisted as `dbsetting.obj`. Field
/// order is preserved for backward compatibility; `databaseId` is
/// missing from older files.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub file: PathBuf,
    #[serde(rename = "ID")]
    pub max_resource_id: u64,
    #[serde(
        rename = "databaseId",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub database_id: Option<Uuid>,
    #[serde(rename = "databaseType")]
    pub database_type: TreeKind,
    #[serde(
        rename = "maxSegmentAllocationSize",
        serialize_with = "serialize_size",
        deserialize_with = "deserialize_size",
        default = "default_allocation"
    )]
    pub max_segment_allocation_size: u64,
}

fn default_allocation() -> u64 {
    DEFAULT_MAX_SEGMENT_ALLOCATION
}

impl DatabaseConfig {
    pub fn new(file: PathBuf, database_type: TreeKind) -> Self {
        Self {
            file,
            max_resource_id: 0,
            database_id: Some(Uuid::new_v4()),
            database_type,
            max_segment_allocation_size: DEFAULT_MAX_SEGMENT_ALLOCATION,
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("database config encode: {e}")))?;
        std::fs::write(path, json)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        serde_json::from_str(&json).map_err(|e| Error::Config(format!("database config: {e}")))
    }

    /// Allocation budget with the environment override applied.
    pub fn effective_allocation_budget(&self) -> u64 {
        match std::env::var(ALLOCATOR_MAX_SIZE_ENV) {
            Ok(raw) => match parse_size(&raw) {
                Ok(bytes) => bytes,
                Err(_) => {
                    log::warn!("ignoring unparsable {ALLOCATOR_MAX_SIZE_ENV}={raw}");
                    self.max_segment_allocation_size
                }
            },
            Err(_) => self.max_segment_allocation_size,
        }
    }
}

/// Parses `16G`, `512MB`, `64k`, or a plain byte count; suffixes are
/// case-insensitive.
pub fn parse_size(raw: &str) -> Result<u64> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(Error::Config("empty size".into()));
    }
    let upper = trimmed.to_ascii_uppercase();
    let (digits, multiplier) = if let Some(head) = upper.strip_suffix("KB") {
        (head, 1024u64)
    } else if let Some(head) = upper.strip_suffix("MB") {
        (head, 1024 * 1024)
    } else if let Some(head) = upper.strip_suffix("GB") {
        (head, 1024 * 1024 * 1024)
    } else if let Some(head) = upper.strip_suffix('K') {
        (head, 1024)
    } else if let Some(head) = upper.strip_suffix('M') {
        (head, 1024 * 1024)
    } else if let Some(head) = upper.strip_suffix('G') {
        (head, 1024 * 1024 * 1024)
    } else {
        (upper.as_str(), 1)
    };
    let value: u64 = digits
        .trim()
        .parse()
        .map_err(|_| Error::Config(format!("bad size literal: {raw}")))?;
    value
        .checked_mul(multiplier)
        .ok_or_else(|| Error::Config(format!("size overflows u64: {raw}")))
}

fn serialize_size<S: Serializer>(size: &u64, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_u64(*size)
}

fn deserialize_size<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<u64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Bytes(u64),
        Text(String),
    }
    match Raw::deserialize(deserializer)? {
        Raw::Bytes(bytes) => Ok(bytes),
        Raw::Text(text) => parse_size(&text).map_err(serde::de::Error::custom),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_suffixes_parse_case_insensitively() {
        assert_eq!(parse_size("1024").unwrap(), 1024);
        assert_eq!(parse_size("64k").unwrap(), 64 * 1024);
        assert_eq!(parse_size("64KB").unwrap(), 64 * 1024);
        assert_eq!(parse_size("3M").unwrap(), 3 * 1024 * 1024);
        assert_eq!(parse_size("16g").unwrap(), 16 * 1024 * 1024 * 1024);
        assert_eq!(parse_size("2 GB").unwrap(), 2 * 1024 * 1024 * 1024);
        assert!(parse_size("lots").is_err());
        assert!(parse_size("").is_err());
    }

    #[test]
    fn database_config_round_trips_through_json() {
        let config = DatabaseConfig::new(PathBuf::from("/data/db"), TreeKind::Json);
        let json = serde_json::to_string(&config).unwrap();
        let back: DatabaseConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.database_id, config.database_id);
        assert_eq!(back.database_type, TreeKind::Json);
        assert_eq!(back.max_segment_allocation_size, DEFAULT_MAX_SEGMENT_ALLOCATION);
    }

    #[test]
    fn older_files_without_database_id_still_load() {
        let json = r#"{
            "file": "/data/old",
            "ID": 3,
            "databaseType": "XML",
            "maxSegmentAllocationSize": "512M"
        }"#;
        let config: DatabaseConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.database_id, None);
        assert_eq!(config.max_resource_id, 3);
        assert_eq!(config.max_segment_allocation_size, 512 * 1024 * 1024);
    }

    #[test]
    fn resource_config_round_trips_with_stored_field_names() {
        let config = ResourceConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("revisioningClass"));
        assert!(json.contains("numbersOfRevisiontoRestore"));
        assert!(json.contains("byteHandlerClasses"));
        assert!(json.contains("deweyIDsStored"));
        let back: ResourceConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.versioning().unwrap(), Versioning::SlidingSnapshot);
        assert_eq!(back.hash_kind, HashKind::Rolling);
    }
}
