//! Generic keyed JSON document store.
//!
//! One namespace = one `<name>.json` file holding a string-keyed map of
//! records. Writes serialize the whole map to `<name>.json.tmp` and
//! rename it over the live file, so readers only ever see a complete
//! document. A corrupt or unreadable file is tolerated by starting
//! empty with a warning; the records it held are re-derived from
//! exchange state on the next cycle.

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::PersistenceResult;

/// Keyed JSON store for one record type.
pub struct JsonStore<T> {
    path: PathBuf,
    records: Mutex<HashMap<String, T>>,
}

impl<T> JsonStore<T>
where
    T: Serialize + DeserializeOwned + Clone,
{
    /// Open (or create) the `<name>.json` namespace under `base_dir`.
    pub fn open(base_dir: impl AsRef<Path>, name: &str) -> PersistenceResult<Self> {
        let base_dir = base_dir.as_ref();
        fs::create_dir_all(base_dir)?;
        let path = base_dir.join(format!("{name}.json"));

        let records = match fs::read_to_string(&path) {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(records) => records,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Corrupt state file, starting empty");
                    HashMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(e.into()),
        };

        info!(
            path = %path.display(),
            records = records.len(),
            "Opened state store"
        );

        Ok(Self {
            path,
            records: Mutex::new(records),
        })
    }

    /// Get one record by key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<T> {
        self.records.lock().get(key).cloned()
    }

    /// All records, keyed.
    #[must_use]
    pub fn load_all(&self) -> HashMap<String, T> {
        self.records.lock().clone()
    }

    /// Insert or replace one record, then persist the namespace.
    pub fn save(&self, key: impl Into<String>, record: T) -> PersistenceResult<()> {
        let snapshot = {
            let mut records = self.records.lock();
            records.insert(key.into(), record);
            records.clone()
        };
        self.write_snapshot(&snapshot)
    }

    /// Remove one record, then persist the namespace.
    ///
    /// Removing an absent key is a no-op.
    pub fn delete(&self, key: &str) -> PersistenceResult<()> {
        let snapshot = {
            let mut records = self.records.lock();
            if records.remove(key).is_none() {
                return Ok(());
            }
            records.clone()
        };
        self.write_snapshot(&snapshot)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    fn write_snapshot(&self, snapshot: &HashMap<String, T>) -> PersistenceResult<()> {
        let tmp_path = self.path.with_extension("json.tmp");
        {
            let mut file = fs::File::create(&tmp_path)?;
            serde_json::to_writer_pretty(&mut file, snapshot)?;
            file.flush()?;
        }
        fs::rename(&tmp_path, &self.path)?;
        debug!(
            path = %self.path.display(),
            records = snapshot.len(),
            "Persisted state snapshot"
        );
        Ok(())
    }
}
