//! Schema cache
//!
//! Owns the published [`SchemaSnapshot`]. Readers clone an `Arc` out of a
//! short read lock and keep using that snapshot for the rest of their
//! request. `invalidate` rebuilds under a separate mutex so at most one
//! rebuild (and one write of the persisted copy) is in flight at a time, and
//! only swaps the published pointer once the rebuild fully succeeded.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use sqlrest_common::config::CacheConfig;
use sqlrest_common::error::Result;

use crate::introspect::introspect;
use crate::schema::SchemaSnapshot;
use crate::store::Store;

pub struct SchemaCache {
    store: Arc<dyn Store>,
    current: RwLock<Arc<SchemaSnapshot>>,
    rebuild: Mutex<()>,
    config: CacheConfig,
    last_refresh: RwLock<Option<DateTime<Utc>>>,
}

impl SchemaCache {
    /// Open the cache, preferring a readable persisted snapshot and falling
    /// back to introspecting the store.
    pub fn open(store: Arc<dyn Store>, config: CacheConfig) -> Result<Self> {
        let restored = if config.persist {
            match load_snapshot(&config.snapshot_path) {
                Ok(snapshot) => snapshot,
                Err(e) => {
                    warn!(
                        path = %config.snapshot_path.display(),
                        error = %e,
                        "Discarding unreadable schema snapshot"
                    );
                    None
                }
            }
        } else {
            None
        };

        let snapshot = match restored {
            Some(snapshot) => {
                info!(
                    path = %config.snapshot_path.display(),
                    tables = snapshot.table_count(),
                    "Restored persisted schema snapshot"
                );
                snapshot
            }
            None => {
                let snapshot = introspect(store.as_ref())?;
                if config.persist {
                    persist_snapshot(&config.snapshot_path, &snapshot)?;
                }
                info!(tables = snapshot.table_count(), "Introspected schema snapshot");
                snapshot
            }
        };

        Ok(Self {
            store,
            current: RwLock::new(Arc::new(snapshot)),
            rebuild: Mutex::new(()),
            config,
            last_refresh: RwLock::new(Some(Utc::now())),
        })
    }

    /// The currently published snapshot. Never blocks on a rebuild.
    #[must_use]
    pub fn get(&self) -> Arc<SchemaSnapshot> {
        Arc::clone(&self.current.read())
    }

    /// Rebuild from the live store, persist, then publish.
    ///
    /// On any failure the previously published snapshot stays in place and
    /// the error is returned.
    pub fn invalidate(&self) -> Result<Arc<SchemaSnapshot>> {
        let _guard = self.rebuild.lock();
        debug!("Rebuilding schema snapshot");

        let snapshot = Arc::new(introspect(self.store.as_ref())?);
        if self.config.persist {
            persist_snapshot(&self.config.snapshot_path, &snapshot)?;
        }

        *self.current.write() = Arc::clone(&snapshot);
        *self.last_refresh.write() = Some(Utc::now());

        info!(tables = snapshot.table_count(), "Schema cache invalidated");
        Ok(snapshot)
    }

    /// When the published snapshot was last built or restored
    #[must_use]
    pub fn last_refresh(&self) -> Option<DateTime<Utc>> {
        *self.last_refresh.read()
    }

    #[must_use]
    pub fn snapshot_path(&self) -> &Path {
        &self.config.snapshot_path
    }
}

/// Read a persisted snapshot. A missing file is `Ok(None)`.
pub fn load_snapshot(path: &Path) -> Result<Option<SchemaSnapshot>> {
    match fs::read(path) {
        Ok(bytes) => SchemaSnapshot::decode(&bytes).map(Some),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Write a snapshot next to `path` and rename it into place.
pub fn persist_snapshot(path: &Path, snapshot: &SchemaSnapshot) -> Result<()> {
    let bytes = snapshot.encode()?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    let tmp = temp_path(path);
    if let Err(e) = write_synced(&tmp, &bytes).and_then(|()| fs::rename(&tmp, path)) {
        match fs::remove_file(&tmp) {
            Ok(()) => {}
            Err(cleanup) if cleanup.kind() == io::ErrorKind::NotFound => {}
            Err(cleanup) => {
                warn!(path = %tmp.display(), error = %cleanup, "Failed to remove partial snapshot");
            }
        }
        return Err(e.into());
    }

    debug!(path = %path.display(), bytes = bytes.len(), "Persisted schema snapshot");
    Ok(())
}

fn write_synced(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut file = fs::File::create(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, RawSchema};
    use sqlrest_common::error::Error;

    fn raw() -> RawSchema {
        RawSchema::default()
            .column("users", "id", "INTEGER", 1)
            .column("users", "name", "TEXT", 0)
    }

    fn config(dir: &Path) -> CacheConfig {
        CacheConfig {
            snapshot_path: dir.join("data").join("schema.bin"),
            persist: true,
        }
    }

    #[test]
    fn test_open_introspects_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::new(raw()));
        let cache = SchemaCache::open(store, config(dir.path())).unwrap();

        assert!(cache.get().has_table("users"));
        assert!(cache.last_refresh().is_some());
        let persisted = load_snapshot(cache.snapshot_path()).unwrap().unwrap();
        assert_eq!(&persisted, cache.get().as_ref());
    }

    #[test]
    fn test_open_prefers_persisted_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::new(raw()));
        SchemaCache::open(store.clone(), config(dir.path())).unwrap();

        store.set_schema(RawSchema::default().column("cars", "id", "INTEGER", 1));
        let cache = SchemaCache::open(store, config(dir.path())).unwrap();
        assert!(cache.get().has_table("users"));
        assert!(!cache.get().has_table("cars"));
    }

    #[test]
    fn test_unreadable_snapshot_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        fs::create_dir_all(config.snapshot_path.parent().unwrap()).unwrap();
        fs::write(&config.snapshot_path, b"not a snapshot").unwrap();

        let store = Arc::new(MemoryStore::new(raw()));
        let cache = SchemaCache::open(store, config).unwrap();
        assert!(cache.get().has_table("users"));
        assert!(load_snapshot(cache.snapshot_path()).unwrap().is_some());
    }

    #[test]
    fn test_invalidate_publishes_new_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::new(raw()));
        let cache = SchemaCache::open(store.clone(), config(dir.path())).unwrap();
        let before = cache.get();

        store.set_schema(raw().column("cars", "id", "INTEGER", 1));
        cache.invalidate().unwrap();

        assert!(!before.has_table("cars"));
        assert!(cache.get().has_table("cars"));
        let persisted = load_snapshot(cache.snapshot_path()).unwrap().unwrap();
        assert!(persisted.has_table("cars"));
    }

    #[test]
    fn test_failed_invalidation_keeps_previous_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::new(raw()));
        let cache = SchemaCache::open(store.clone(), config(dir.path())).unwrap();

        store.set_schema(raw().column("cars", "id", "INTEGER", 1));
        store.fail_next_introspection("database is locked");

        assert!(matches!(cache.invalidate(), Err(Error::StoreExecution(_))));
        assert!(!cache.get().has_table("cars"));
        let persisted = load_snapshot(cache.snapshot_path()).unwrap().unwrap();
        assert!(!persisted.has_table("cars"));
    }

    #[test]
    fn test_concurrent_invalidations_and_reads() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::new(raw()));
        let cache = SchemaCache::open(store, config(dir.path())).unwrap();

        std::thread::scope(|s| {
            for _ in 0..4 {
                s.spawn(|| cache.invalidate().unwrap());
                s.spawn(|| {
                    for _ in 0..50 {
                        assert!(cache.get().has_table("users"));
                    }
                });
            }
        });

        assert!(load_snapshot(cache.snapshot_path()).unwrap().is_some());
    }

    #[test]
    fn test_failed_persist_leaves_no_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("schema.bin");
        // a directory in the way makes the final rename fail
        fs::create_dir_all(path.join("occupied")).unwrap();

        let snapshot = SchemaSnapshot::builder()
            .table("users", &[("id", "INTEGER")])
            .build()
            .unwrap();
        assert!(matches!(persist_snapshot(&path, &snapshot), Err(Error::IoError(_))));
        assert!(!temp_path(&path).exists());
        assert!(path.is_dir());
    }

    #[test]
    fn test_persistence_disabled() {
        let dir = tempfile::tempdir().unwrap();
        let config = CacheConfig {
            persist: false,
            ..config(dir.path())
        };
        let store = Arc::new(MemoryStore::new(raw()));
        let cache = SchemaCache::open(store, config).unwrap();
        cache.invalidate().unwrap();
        assert!(load_snapshot(cache.snapshot_path()).unwrap().is_none());
    }
}
