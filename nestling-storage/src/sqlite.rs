//! SQLite-backed store.
//!
//! Every entity is one row keyed by `(kind, id)` holding its JSON form, with
//! `profile_id` pulled out for cascading deletes. Inserts and deletes are
//! staged in memory and written in a single transaction by `save()`, so a
//! failed save leaves the database untouched and the staged changes intact.

use crate::{LocalStore, StorageError, StorageResult};
use nestling_model::{Entity, EntityKey, EntityKind};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};
use uuid::Uuid;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS entities (
    kind        TEXT NOT NULL,
    id          TEXT NOT NULL,
    profile_id  TEXT NOT NULL,
    updated_at  TEXT NOT NULL,
    data        TEXT NOT NULL,
    PRIMARY KEY (kind, id)
);
CREATE INDEX IF NOT EXISTS idx_entities_profile ON entities(profile_id);
";

#[derive(Debug, Clone)]
enum Staged {
    Upsert(Entity),
    Delete,
}

struct Inner {
    conn: Connection,
    staged: BTreeMap<EntityKey, Staged>,
}

/// Persistent store over a single SQLite database.
pub struct SqliteStore {
    inner: Mutex<Inner>,
}

impl SqliteStore {
    /// Opens (or creates) a database file.
    pub fn open(path: &Path) -> StorageResult<Self> {
        let conn = Connection::open(path)?;
        info!("Opened local store at {}", path.display());
        Self::with_connection(conn)
    }

    /// Opens a private in-memory database.
    pub fn open_in_memory() -> StorageResult<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> StorageResult<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            inner: Mutex::new(Inner {
                conn,
                staged: BTreeMap::new(),
            }),
        })
    }

    /// Number of staged changes not yet saved.
    pub fn pending_changes(&self) -> usize {
        self.inner.lock().map(|i| i.staged.len()).unwrap_or(0)
    }

    fn lock(&self) -> StorageResult<MutexGuard<'_, Inner>> {
        self.inner.lock().map_err(|_| StorageError::LockPoisoned)
    }
}

fn load_kind(conn: &Connection, kind: EntityKind) -> StorageResult<BTreeMap<EntityKey, Entity>> {
    let mut stmt = conn.prepare("SELECT data FROM entities WHERE kind = ?1")?;
    let rows = stmt.query_map(params![kind.as_str()], |row| row.get::<_, String>(0))?;

    let mut out = BTreeMap::new();
    for row in rows {
        let entity: Entity = serde_json::from_str(&row?)?;
        if entity.kind() != kind {
            return Err(StorageError::InvalidData(format!(
                "row of kind {kind} holds a {}",
                entity.kind()
            )));
        }
        out.insert(entity.key(), entity);
    }
    Ok(out)
}

fn load_one(conn: &Connection, key: EntityKey) -> StorageResult<Option<Entity>> {
    let data: Option<String> = conn
        .query_row(
            "SELECT data FROM entities WHERE kind = ?1 AND id = ?2",
            params![key.kind.as_str(), key.id.to_string()],
            |row| row.get(0),
        )
        .optional()?;
    let Some(data) = data else {
        return Ok(None);
    };

    let entity: Entity = serde_json::from_str(&data)?;
    if entity.key() != key {
        return Err(StorageError::InvalidData(format!(
            "row {key} holds {}",
            entity.key()
        )));
    }
    Ok(Some(entity))
}

fn dependent_keys(conn: &Connection, profile_id: Uuid) -> StorageResult<Vec<EntityKey>> {
    let mut stmt =
        conn.prepare("SELECT kind, id FROM entities WHERE profile_id = ?1 AND kind != ?2")?;
    let rows = stmt.query_map(
        params![profile_id.to_string(), EntityKind::Profile.as_str()],
        |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
    )?;

    let mut keys = Vec::new();
    for row in rows {
        let (kind, id) = row?;
        let kind = EntityKind::from_name(&kind)
            .ok_or_else(|| StorageError::InvalidData(format!("unknown kind {kind}")))?;
        let id = Uuid::parse_str(&id)
            .map_err(|e| StorageError::InvalidData(format!("bad id {id}: {e}")))?;
        keys.push(EntityKey::new(kind, id));
    }
    Ok(keys)
}

impl LocalStore for SqliteStore {
    fn insert(&self, entity: Entity) -> StorageResult<()> {
        let mut inner = self.lock()?;
        inner.staged.insert(entity.key(), Staged::Upsert(entity));
        Ok(())
    }

    fn delete(&self, key: EntityKey) -> StorageResult<()> {
        let mut inner = self.lock()?;
        if key.kind == EntityKind::Profile {
            let mut cascade = dependent_keys(&inner.conn, key.id)?;
            cascade.extend(inner.staged.iter().filter_map(|(k, s)| match s {
                Staged::Upsert(e)
                    if k.kind != EntityKind::Profile && e.profile_id().as_uuid() == key.id =>
                {
                    Some(*k)
                }
                _ => None,
            }));
            debug!("Cascading delete of profile {} to {} entries", key.id, cascade.len());
            for dep in cascade {
                inner.staged.insert(dep, Staged::Delete);
            }
        }
        inner.staged.insert(key, Staged::Delete);
        Ok(())
    }

    fn save(&self) -> StorageResult<()> {
        let mut inner = self.lock()?;
        if inner.staged.is_empty() {
            return Ok(());
        }
        let staged = std::mem::take(&mut inner.staged);

        let result = (|| -> StorageResult<()> {
            let tx = inner.conn.transaction()?;
            for (key, change) in &staged {
                match change {
                    Staged::Upsert(entity) => {
                        tx.execute(
                            "INSERT OR REPLACE INTO entities (kind, id, profile_id, updated_at, data)
                             VALUES (?1, ?2, ?3, ?4, ?5)",
                            params![
                                key.kind.as_str(),
                                key.id.to_string(),
                                entity.profile_id().to_string(),
                                entity.updated_at().to_rfc3339(),
                                serde_json::to_string(entity)?,
                            ],
                        )?;
                    }
                    Staged::Delete => {
                        tx.execute(
                            "DELETE FROM entities WHERE kind = ?1 AND id = ?2",
                            params![key.kind.as_str(), key.id.to_string()],
                        )?;
                    }
                }
            }
            tx.commit()?;
            Ok(())
        })();

        match result {
            Ok(()) => {
                debug!("Saved {} staged changes", staged.len());
                Ok(())
            }
            Err(e) => {
                // Put the changes back so a later save can retry them.
                for (key, change) in staged {
                    inner.staged.entry(key).or_insert(change);
                }
                Err(StorageError::SaveFailed(e.to_string()))
            }
        }
    }

    fn get(&self, key: EntityKey) -> StorageResult<Option<Entity>> {
        let inner = self.lock()?;
        match inner.staged.get(&key) {
            Some(Staged::Upsert(entity)) => Ok(Some(entity.clone())),
            Some(Staged::Delete) => Ok(None),
            None => load_one(&inner.conn, key),
        }
    }

    fn fetch(
        &self,
        kind: EntityKind,
        predicate: &dyn Fn(&Entity) -> bool,
    ) -> StorageResult<Vec<Entity>> {
        let inner = self.lock()?;
        let mut merged = load_kind(&inner.conn, kind)?;
        for (key, change) in inner.staged.range(
            EntityKey::new(kind, Uuid::nil())..=EntityKey::new(kind, Uuid::max()),
        ) {
            match change {
                Staged::Upsert(entity) => {
                    merged.insert(*key, entity.clone());
                }
                Staged::Delete => {
                    merged.remove(key);
                }
            }
        }
        Ok(merged.into_values().filter(|e| predicate(e)).collect())
    }
}
