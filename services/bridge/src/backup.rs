//! WebConfig backup store: JSON-file snapshots of the parameters a
//! transaction is about to touch, taken before the transaction applies so a
//! failed atomic transaction can roll back to real prior values rather than
//! a placeholder (open question resolved in DESIGN.md).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupEntry {
    pub value: String,
    pub data_type: u8,
}

#[derive(Debug, Serialize, Deserialize)]
struct BackupFile {
    transaction_id: String,
    created_at: chrono::DateTime<chrono::Utc>,
    parameters: HashMap<String, BackupEntry>,
}

pub struct BackupStore {
    backup_dir: PathBuf,
}

impl BackupStore {
    #[must_use]
    pub fn new(backup_dir: impl Into<PathBuf>) -> Self {
        BackupStore {
            backup_dir: backup_dir.into(),
        }
    }

    fn path_for(&self, name: &str) -> PathBuf {
        self.backup_dir.join(format!("{}.backup", name))
    }

    /// Write a real pre-transaction snapshot of the given parameters.
    pub fn create_backup(
        &self,
        name: &str,
        parameters: &HashMap<String, (String, u8)>,
    ) -> Result<(), BackupError> {
        std::fs::create_dir_all(&self.backup_dir).map_err(|e| BackupError::Io(e.to_string()))?;
        let file = BackupFile {
            transaction_id: name.to_owned(),
            created_at: chrono::Utc::now(),
            parameters: parameters
                .iter()
                .map(|(k, (v, t))| {
                    (
                        k.clone(),
                        BackupEntry {
                            value: v.clone(),
                            data_type: *t,
                        },
                    )
                })
                .collect(),
        };
        let json =
            serde_json::to_string_pretty(&file).map_err(|e| BackupError::Serialization(e.to_string()))?;
        std::fs::write(self.path_for(name), json).map_err(|e| BackupError::Io(e.to_string()))
    }

    /// Load a previously written backup, returning the parameter snapshot.
    pub fn restore_backup(&self, name: &str) -> Result<HashMap<String, BackupEntry>, BackupError> {
        let path = self.path_for(name);
        let json = std::fs::read_to_string(&path).map_err(|e| BackupError::Io(e.to_string()))?;
        let file: BackupFile =
            serde_json::from_str(&json).map_err(|e| BackupError::Serialization(e.to_string()))?;
        Ok(file.parameters)
    }

    pub fn delete_backup(&self, name: &str) -> Result<(), BackupError> {
        let path = self.path_for(name);
        if path.exists() {
            std::fs::remove_file(&path).map_err(|e| BackupError::Io(e.to_string()))?;
        }
        Ok(())
    }

    #[must_use]
    pub fn backup_path(&self, name: &str) -> PathBuf {
        self.path_for(name)
    }
}

#[must_use]
pub fn default_backup_dir() -> &'static Path {
    Path::new("/var/lib/rdkb-bridge/webconfig_backups")
}

#[derive(Debug)]
pub enum BackupError {
    Io(String),
    Serialization(String),
}

impl std::fmt::Display for BackupError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackupError::Io(s) => write!(f, "backup I/O error: {}", s),
            BackupError::Serialization(s) => write!(f, "backup serialization error: {}", s),
        }
    }
}

impl std::error::Error for BackupError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_then_restore_backup_round_trips_real_values() {
        let dir = tempfile::tempdir().unwrap();
        let store = BackupStore::new(dir.path());
        let mut params = HashMap::new();
        params.insert("Device.X".to_owned(), ("1".to_owned(), 1u8));

        store.create_backup("txn-1", &params).unwrap();
        let restored = store.restore_backup("txn-1").unwrap();
        assert_eq!(restored["Device.X"].value, "1");
        assert_eq!(restored["Device.X"].data_type, 1);
    }

    #[test]
    fn restoring_missing_backup_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = BackupStore::new(dir.path());
        assert!(matches!(store.restore_backup("missing"), Err(BackupError::Io(_))));
    }

    #[test]
    fn delete_backup_removes_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = BackupStore::new(dir.path());
        let params = HashMap::new();
        store.create_backup("txn-1", &params).unwrap();
        assert!(store.backup_path("txn-1").exists());
        store.delete_backup("txn-1").unwrap();
        assert!(!store.backup_path("txn-1").exists());
    }
}
