use crate::{LocalStore, StorageError, StorageResult};
use nestling_model::{Entity, EntityKey, EntityKind};
use std::collections::BTreeMap;
use std::sync::Mutex;

#[derive(Default)]
struct Inner {
    entities: BTreeMap<EntityKey, Entity>,
    unsaved_changes: usize,
    save_count: usize,
    fail_saves: bool,
}

/// In-memory store. `save()` only counts, unless told to fail.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent `save()` fail until reset.
    pub fn set_fail_saves(&self, fail: bool) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.fail_saves = fail;
        }
    }

    /// Number of successful saves so far.
    pub fn save_count(&self) -> usize {
        self.inner.lock().map(|i| i.save_count).unwrap_or(0)
    }

    /// Changes made since the last successful save.
    pub fn unsaved_changes(&self) -> usize {
        self.inner.lock().map(|i| i.unsaved_changes).unwrap_or(0)
    }

    fn lock(&self) -> StorageResult<std::sync::MutexGuard<'_, Inner>> {
        self.inner.lock().map_err(|_| StorageError::LockPoisoned)
    }
}

impl LocalStore for MemoryStore {
    fn insert(&self, entity: Entity) -> StorageResult<()> {
        let mut inner = self.lock()?;
        inner.entities.insert(entity.key(), entity);
        inner.unsaved_changes += 1;
        Ok(())
    }

    fn delete(&self, key: EntityKey) -> StorageResult<()> {
        let mut inner = self.lock()?;
        let Some(removed) = inner.entities.remove(&key) else {
            return Ok(());
        };
        if key.kind == EntityKind::Profile {
            let owner = removed.profile_id();
            inner
                .entities
                .retain(|k, e| k.kind == EntityKind::Profile || e.profile_id() != owner);
        }
        inner.unsaved_changes += 1;
        Ok(())
    }

    fn save(&self) -> StorageResult<()> {
        let mut inner = self.lock()?;
        if inner.fail_saves {
            return Err(StorageError::SaveFailed("injected failure".into()));
        }
        inner.unsaved_changes = 0;
        inner.save_count += 1;
        Ok(())
    }

    fn get(&self, key: EntityKey) -> StorageResult<Option<Entity>> {
        Ok(self.lock()?.entities.get(&key).cloned())
    }

    fn fetch(
        &self,
        kind: EntityKind,
        predicate: &dyn Fn(&Entity) -> bool,
    ) -> StorageResult<Vec<Entity>> {
        let inner = self.lock()?;
        Ok(inner
            .entities
            .iter()
            .filter(|(k, e)| k.kind == kind && predicate(e))
            .map(|(_, e)| e.clone())
            .collect())
    }
}
