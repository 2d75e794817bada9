use anyhow::{anyhow, Context, Result};
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::fs;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::domain::index::IndexEntry;

/// Persistent digest -> stored file table.
///
/// All mutations go through one async mutex and rewrite the whole table on
/// disk (temp file + rename) before the lock is released, so concurrent
/// uploads cannot lose each other's updates.
#[derive(Clone)]
pub struct DuplicateIndex {
    table: Arc<Mutex<IndexTable>>,
    claims: Arc<StdMutex<HashMap<String, Arc<Mutex<()>>>>>,
}

struct IndexTable {
    path: PathBuf,
    entries: HashMap<String, IndexEntry>,
}

impl DuplicateIndex {
    /// Reads the persisted table. A missing file starts an empty index;
    /// a file that exists but does not parse is an error.
    pub async fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let entries = match fs::read(&path).await {
            Ok(raw) if raw.iter().all(u8::is_ascii_whitespace) => HashMap::new(),
            Ok(raw) => serde_json::from_slice::<HashMap<String, IndexEntry>>(&raw)
                .with_context(|| format!("corrupt duplicate index at {}", path.display()))?,
            Err(err) if err.kind() == io::ErrorKind::NotFound => HashMap::new(),
            Err(err) => {
                return Err(anyhow!(err).context(format!(
                    "failed to read duplicate index at {}",
                    path.display()
                )))
            }
        };

        tracing::info!(entries = entries.len(), path = %path.display(), "duplicate index loaded");

        Ok(Self {
            table: Arc::new(Mutex::new(IndexTable { path, entries })),
            claims: Arc::new(StdMutex::new(HashMap::new())),
        })
    }

    pub async fn lookup(&self, hash: &str) -> Option<IndexEntry> {
        self.table.lock().await.entries.get(hash).cloned()
    }

    pub async fn len(&self) -> usize {
        self.table.lock().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Inserts or replaces the entry for `entry.hash` and persists the table.
    /// On a failed write the in-memory table is rolled back.
    pub async fn upsert(&self, entry: IndexEntry) -> io::Result<()> {
        let mut table = self.table.lock().await;
        let hash = entry.hash.clone();
        let previous = table.entries.insert(hash.clone(), entry);
        if let Err(err) = table.persist().await {
            match previous {
                Some(previous) => table.entries.insert(hash, previous),
                None => table.entries.remove(&hash),
            };
            return Err(err);
        }
        Ok(())
    }

    /// Removes the first entry pointing at `filename` and persists the table.
    pub async fn remove_by_filename(&self, filename: &str) -> io::Result<Option<IndexEntry>> {
        let mut table = self.table.lock().await;
        let hash = table
            .entries
            .iter()
            .find(|(_, entry)| entry.filename == filename)
            .map(|(hash, _)| hash.clone());
        let Some(hash) = hash else {
            return Ok(None);
        };
        let removed = table.entries.remove(&hash);
        if let Err(err) = table.persist().await {
            if let Some(entry) = removed {
                table.entries.insert(hash, entry);
            }
            return Err(err);
        }
        Ok(removed)
    }

    pub async fn remove_by_hash(&self, hash: &str) -> io::Result<Option<IndexEntry>> {
        let mut table = self.table.lock().await;
        let removed = table.entries.remove(hash);
        if removed.is_none() {
            return Ok(None);
        }
        if let Err(err) = table.persist().await {
            if let Some(entry) = removed {
                table.entries.insert(hash.to_string(), entry);
            }
            return Err(err);
        }
        Ok(removed)
    }

    /// Serializes ingestion of one digest. Held from the dedup check until the
    /// entry is indexed, so identical uploads racing each other see one winner.
    pub async fn claim(&self, hash: &str) -> HashClaim {
        let lock = {
            let mut claims = self.claims.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            claims
                .entry(hash.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        let guard = lock.lock_owned().await;
        HashClaim {
            hash: hash.to_string(),
            claims: self.claims.clone(),
            guard: Some(guard),
        }
    }
}

impl IndexTable {
    async fn persist(&self) -> io::Result<()> {
        let serialized = serde_json::to_vec_pretty(&self.entries)
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }
        let staged = staging_path(&self.path);
        fs::write(&staged, serialized).await?;
        if let Err(err) = fs::rename(&staged, &self.path).await {
            if let Err(cleanup) = fs::remove_file(&staged).await {
                tracing::warn!(error = ?cleanup, path = %staged.display(), "failed to remove staged index file");
            }
            return Err(err);
        }
        Ok(())
    }
}

fn staging_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

pub struct HashClaim {
    hash: String,
    claims: Arc<StdMutex<HashMap<String, Arc<Mutex<()>>>>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for HashClaim {
    fn drop(&mut self) {
        let mut claims = self.claims.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        // One reference in the map and one inside our guard means nobody is waiting.
        let idle = claims
            .get(&self.hash)
            .map(|lock| Arc::strong_count(lock) <= 2)
            .unwrap_or(false);
        if idle {
            claims.remove(&self.hash);
        }
        self.guard.take();
    }
}
