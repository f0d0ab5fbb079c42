use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, warn};
use xorlist_config::Store;
use xorlist_contracts::{Identifier, SnapshotLocation};
use xorlist_kernel::{decode_snapshot, encode_snapshot};

use crate::error::StoreError;

/// Durable home of one whitelist snapshot: a set of decimal strings under a
/// fixed namespace/key. Clones share the same backend.
#[derive(Clone)]
pub struct PersistentStore {
    backend: Arc<Mutex<StoreBackend>>,
    location: SnapshotLocation,
}

enum StoreBackend {
    Memory(MemoryStore),
    Sqlite(SqliteStore),
}

#[derive(Default)]
struct MemoryStore {
    snapshots: HashMap<String, BTreeSet<String>>,
}

struct SqliteStore {
    conn: Connection,
}

impl PersistentStore {
    pub fn memory(location: SnapshotLocation) -> Self {
        Self::with_backend(StoreBackend::Memory(MemoryStore::default()), location)
    }

    pub fn sqlite(path: &str, location: SnapshotLocation) -> Result<Self, StoreError> {
        Ok(Self::with_backend(
            StoreBackend::Sqlite(SqliteStore::new(path)?),
            location,
        ))
    }

    pub fn from_config(cfg: &Store) -> Result<Self, StoreError> {
        let location = SnapshotLocation {
            namespace: cfg.namespace.clone(),
            key: cfg.key.clone(),
        };
        match (cfg.kind.as_str(), cfg.sqlite_path.as_deref()) {
            ("sqlite", Some(path)) => Self::sqlite(path, location),
            _ => Ok(Self::memory(location)),
        }
    }

    fn with_backend(backend: StoreBackend, location: SnapshotLocation) -> Self {
        Self {
            backend: Arc::new(Mutex::new(backend)),
            location,
        }
    }

    pub fn location(&self) -> &SnapshotLocation {
        &self.location
    }

    /// Best-effort read. Entries that are not decimal i64 are skipped, a
    /// missing snapshot or a backend failure yields an empty whitelist.
    pub fn load(&self) -> Vec<Identifier> {
        let entries = match self.read_entries() {
            Ok(Some(entries)) => entries,
            Ok(None) => return Vec::new(),
            Err(e) => {
                warn!(target: "xorlist::store", error = %e, "whitelist snapshot unreadable, starting empty");
                return Vec::new();
            }
        };
        let decoded = decode_snapshot(&entries);
        if !decoded.skipped.is_empty() {
            warn!(
                target: "xorlist::store",
                skipped = ?decoded.skipped,
                "ignoring malformed whitelist entries"
            );
        }
        debug!(target: "xorlist::store", count = decoded.ids.len(), "whitelist snapshot loaded");
        decoded.ids
    }

    pub fn save(&self, whitelist: &[Identifier]) -> Result<(), StoreError> {
        self.write_entries(&encode_snapshot(whitelist))
    }

    pub fn read_entries(&self) -> Result<Option<BTreeSet<String>>, StoreError> {
        let backend = self.backend.lock().map_err(|_| StoreError::Poisoned)?;
        match &*backend {
            StoreBackend::Memory(store) => {
                Ok(store.snapshots.get(&memory_key(&self.location)).cloned())
            }
            StoreBackend::Sqlite(store) => store.read_entries(&self.location),
        }
    }

    pub fn write_entries(&self, entries: &BTreeSet<String>) -> Result<(), StoreError> {
        let mut backend = self.backend.lock().map_err(|_| StoreError::Poisoned)?;
        match &mut *backend {
            StoreBackend::Memory(store) => {
                store
                    .snapshots
                    .insert(memory_key(&self.location), entries.clone());
                Ok(())
            }
            StoreBackend::Sqlite(store) => store.write_entries(&self.location, entries),
        }
    }
}

fn memory_key(location: &SnapshotLocation) -> String {
    format!("{}:{}", location.namespace, location.key)
}

impl SqliteStore {
    fn new(path: &str) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS snapshots (
                namespace TEXT NOT NULL,
                key TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (namespace, key)
            );
            CREATE TABLE IF NOT EXISTS snapshot_entries (
                namespace TEXT NOT NULL,
                key TEXT NOT NULL,
                entry TEXT NOT NULL,
                PRIMARY KEY (namespace, key, entry)
            );
            ",
        )?;
        Ok(Self { conn })
    }

    fn read_entries(
        &self,
        location: &SnapshotLocation,
    ) -> Result<Option<BTreeSet<String>>, StoreError> {
        let updated_at: Option<String> = self
            .conn
            .query_row(
                "SELECT updated_at FROM snapshots WHERE namespace = ?1 AND key = ?2",
                params![location.namespace, location.key],
                |row| row.get(0),
            )
            .optional()?;
        if updated_at.is_none() {
            return Ok(None);
        }

        let mut stmt = self
            .conn
            .prepare("SELECT entry FROM snapshot_entries WHERE namespace = ?1 AND key = ?2")?;
        let rows = stmt.query_map(params![location.namespace, location.key], |row| {
            row.get::<_, String>(0)
        })?;
        let mut entries = BTreeSet::new();
        for row in rows {
            entries.insert(row?);
        }
        Ok(Some(entries))
    }

    fn write_entries(
        &mut self,
        location: &SnapshotLocation,
        entries: &BTreeSet<String>,
    ) -> Result<(), StoreError> {
        let tx = self.conn.transaction()?;
        tx.execute(
            "DELETE FROM snapshot_entries WHERE namespace = ?1 AND key = ?2",
            params![location.namespace, location.key],
        )?;
        {
            let mut insert = tx.prepare(
                "INSERT OR IGNORE INTO snapshot_entries (namespace, key, entry) VALUES (?1, ?2, ?3)",
            )?;
            for entry in entries {
                insert.execute(params![location.namespace, location.key, entry])?;
            }
        }
        tx.execute(
            "
            INSERT INTO snapshots (namespace, key, updated_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(namespace, key) DO UPDATE SET updated_at = excluded.updated_at
            ",
            params![location.namespace, location.key, Utc::now().to_rfc3339()],
        )?;
        tx.commit()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn temp_db() -> String {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system time before unix epoch")
            .as_nanos();
        std::env::temp_dir()
            .join(format!("xorlist-store-test-{nanos}.db"))
            .to_string_lossy()
            .to_string()
    }

    fn set(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn empty_store_loads_nothing() {
        let store = PersistentStore::memory(SnapshotLocation::default());
        assert!(store.load().is_empty());
        assert_eq!(store.read_entries().unwrap(), None);
    }

    #[test]
    fn memory_round_trip_collapses_duplicates() {
        let store = PersistentStore::memory(SnapshotLocation::default());
        store.save(&[3, 1, 3, -7]).unwrap();
        assert_eq!(store.load(), vec![-7, 1, 3]);
        assert_eq!(store.read_entries().unwrap(), Some(set(&["-7", "1", "3"])));
    }

    #[test]
    fn malformed_entry_is_skipped() {
        let store = PersistentStore::memory(SnapshotLocation::default());
        store.write_entries(&set(&["5", "five", "6"])).unwrap();
        assert_eq!(store.load(), vec![5, 6]);
    }

    #[test]
    fn clones_share_the_backend() {
        let store = PersistentStore::memory(SnapshotLocation::default());
        let other = store.clone();
        store.save(&[9]).unwrap();
        assert_eq!(other.load(), vec![9]);
    }

    #[test]
    fn sqlite_round_trip_survives_reopen() {
        let path = temp_db();
        {
            let store = PersistentStore::sqlite(&path, SnapshotLocation::default()).unwrap();
            store.save(&[1, 2, 3]).unwrap();
        }
        let reopened = PersistentStore::sqlite(&path, SnapshotLocation::default()).unwrap();
        assert_eq!(reopened.load(), vec![1, 2, 3]);
    }

    #[test]
    fn sqlite_save_replaces_previous_snapshot() {
        let store = PersistentStore::sqlite(&temp_db(), SnapshotLocation::default()).unwrap();
        store.save(&[1, 2, 3]).unwrap();
        store.save(&[4]).unwrap();
        assert_eq!(store.read_entries().unwrap(), Some(set(&["4"])));
    }

    #[test]
    fn sqlite_empty_save_is_distinct_from_never_saved() {
        let store = PersistentStore::sqlite(&temp_db(), SnapshotLocation::default()).unwrap();
        assert_eq!(store.read_entries().unwrap(), None);
        store.save(&[]).unwrap();
        assert_eq!(store.read_entries().unwrap(), Some(BTreeSet::new()));
    }

    #[test]
    fn locations_do_not_collide() {
        let path = temp_db();
        let a = PersistentStore::sqlite(&path, SnapshotLocation::default()).unwrap();
        let b = PersistentStore::sqlite(
            &path,
            SnapshotLocation {
                namespace: "other".to_string(),
                key: "whitelisted_chats".to_string(),
            },
        )
        .unwrap();
        a.save(&[1]).unwrap();
        b.save(&[2]).unwrap();
        assert_eq!(a.load(), vec![1]);
        assert_eq!(b.load(), vec![2]);
    }
}
