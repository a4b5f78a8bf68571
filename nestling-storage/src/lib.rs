//! Local entity store for Nestling.
//!
//! The sync engine consumes the store as a plain object graph: insert (or
//! replace) an entity, delete one, fetch by predicate, and `save()` to make
//! staged changes durable. Two implementations ship here:
//!
//! - [`MemoryStore`]: everything in a `BTreeMap`; used in tests, with an
//!   injectable save failure
//! - [`SqliteStore`]: entities as JSON rows in SQLite; changes are staged
//!   in memory and committed in one transaction by `save()`
//!
//! Deleting a profile cascades to every entry that references it.

mod error;
mod memory;
mod sqlite;

pub use error::{StorageError, StorageResult};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use nestling_model::{Entity, EntityKey, EntityKind, Profile};
use nestling_types::ProfileId;

/// The persistent store collaborator.
///
/// Changes made through `insert` and `delete` are visible to `fetch`
/// immediately; `save` makes them durable. Implementations must be callable
/// from any thread but the engine only mutates a store from the task that
/// owns it.
pub trait LocalStore: Send + Sync {
    /// Inserts an entity, replacing any existing one with the same key.
    fn insert(&self, entity: Entity) -> StorageResult<()>;

    /// Deletes an entity. Deleting a profile also deletes its entries.
    /// Deleting a missing key is not an error.
    fn delete(&self, key: EntityKey) -> StorageResult<()>;

    /// Makes every staged change durable.
    fn save(&self) -> StorageResult<()>;

    /// Looks up a single entity by key, staged changes included.
    fn get(&self, key: EntityKey) -> StorageResult<Option<Entity>>;

    /// Returns all entities of `kind` matching `predicate`, ordered by key.
    fn fetch(
        &self,
        kind: EntityKind,
        predicate: &dyn Fn(&Entity) -> bool,
    ) -> StorageResult<Vec<Entity>>;
}

/// Typed conveniences over [`LocalStore::get`] and [`LocalStore::fetch`].
pub trait LocalStoreExt: LocalStore {
    fn profile(&self, id: ProfileId) -> StorageResult<Option<Profile>> {
        Ok(self
            .get(EntityKey::new(EntityKind::Profile, id.as_uuid()))?
            .and_then(Entity::into_profile))
    }

    fn profiles(&self) -> StorageResult<Vec<Profile>> {
        Ok(self
            .fetch(EntityKind::Profile, &|_: &Entity| true)?
            .into_iter()
            .filter_map(Entity::into_profile)
            .collect())
    }

    /// Profiles whose local state says they are shared.
    fn shared_profiles(&self) -> StorageResult<Vec<Profile>> {
        Ok(self
            .profiles()?
            .into_iter()
            .filter(|p| p.is_shared)
            .collect())
    }

    /// Every entry of every dependent kind owned by `profile_id`.
    fn dependents_of(&self, profile_id: ProfileId) -> StorageResult<Vec<Entity>> {
        let mut out = Vec::new();
        for kind in EntityKind::DEPENDENTS {
            out.extend(self.fetch(kind, &|e: &Entity| e.profile_id() == profile_id)?);
        }
        Ok(out)
    }

    fn count(&self, kind: EntityKind) -> StorageResult<usize> {
        Ok(self.fetch(kind, &|_: &Entity| true)?.len())
    }
}

impl<T: LocalStore + ?Sized> LocalStoreExt for T {}
