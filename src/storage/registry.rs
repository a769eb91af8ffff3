//! Registry of named entities (databases, views, snapshots)
//!
//! Each manager keeps an `index.json` listing `{Id, Name}` pairs next to the
//! per-entity directories.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::storage::error::{StorageError, StorageResult};
use crate::storage::fs::{read_json_or_default, write_json};

/// Registry file name inside a manager's root directory
pub const REGISTRY_FILE: &str = "index.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct EntityRecord {
    pub id: String,
    pub name: String,
}

/// Generate a fresh entity id
pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Whether `id` may be used as a directory name and registry key
pub fn is_legal_id(id: &str) -> bool {
    !id.is_empty()
        && id != "."
        && id != ".."
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '@'))
}

/// Check a caller-supplied id, or generate one
pub fn resolve_id(custom_id: Option<&str>) -> StorageResult<String> {
    match custom_id {
        Some(id) if is_legal_id(id) => Ok(id.to_string()),
        Some(id) => Err(StorageError::InvalidArgument(format!(
            "'{}' is not a valid identifier (letters, digits, '-', '_', '.', '@')",
            id
        ))),
        None => Ok(new_id()),
    }
}

#[derive(Debug, Clone, Default)]
pub struct EntityRegistry {
    records: Vec<EntityRecord>,
}

impl EntityRegistry {
    /// Load from JSON file
    pub fn load(path: &Path) -> StorageResult<Self> {
        let records: Vec<EntityRecord> = read_json_or_default(path)?;
        Ok(Self { records })
    }

    /// Save to JSON file
    pub fn save(&self, path: &Path) -> StorageResult<()> {
        write_json(path, &self.records)
    }

    pub fn insert(&mut self, id: impl Into<String>, name: impl Into<String>) {
        self.records.push(EntityRecord {
            id: id.into(),
            name: name.into(),
        });
    }

    pub fn remove(&mut self, id: &str) -> Option<EntityRecord> {
        let pos = self.records.iter().position(|r| r.id == id)?;
        Some(self.records.remove(pos))
    }

    pub fn rename(&mut self, id: &str, name: impl Into<String>) -> bool {
        match self.records.iter_mut().find(|r| r.id == id) {
            Some(record) => {
                record.name = name.into();
                true
            }
            None => false,
        }
    }

    pub fn get(&self, id: &str) -> Option<&EntityRecord> {
        self.records.iter().find(|r| r.id == id)
    }

    pub fn contains_id(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    /// Find by name, optionally ignoring case
    pub fn find_by_name(&self, name: &str, ignore_case: bool) -> Option<&EntityRecord> {
        self.records.iter().find(|r| {
            if ignore_case {
                r.name.eq_ignore_ascii_case(name)
            } else {
                r.name == name
            }
        })
    }

    pub fn all(&self) -> &[EntityRecord] {
        &self.records
    }
}
