//! The handle every catalog operation runs through.

use patchline_events::EventLog;
use patchline_storage::StorageBackend;
use patchline_store::{Catalog, CatalogStore, StoreError, transact};
use patchline_types::{CatalogEvent, EventType};

/// Commit attempts before a revision conflict is surfaced.
pub const MAX_COMMIT_ATTEMPTS: u32 = 5;

/// Binds a catalog store and a file storage to the user acting on them.
///
/// Every operation buffers the events it produces; callers drain them with
/// [`Session::take_events`] and persist them wherever they like.
pub struct Session<'a> {
    store: &'a dyn CatalogStore,
    storage: &'a dyn StorageBackend,
    actor: String,
    events: EventLog,
}

impl<'a> Session<'a> {
    pub fn new(
        store: &'a dyn CatalogStore,
        storage: &'a dyn StorageBackend,
        actor: impl Into<String>,
    ) -> Self {
        Self {
            store,
            storage,
            actor: actor.into(),
            events: EventLog::new(),
        }
    }

    pub fn store(&self) -> &'a dyn CatalogStore {
        self.store
    }

    pub fn storage(&self) -> &'a dyn StorageBackend {
        self.storage
    }

    pub fn actor(&self) -> &str {
        &self.actor
    }

    /// A consistent copy of the catalog for read-only queries.
    pub fn snapshot(&self) -> Result<Catalog, StoreError> {
        self.store.snapshot()
    }

    pub fn events(&self) -> &EventLog {
        &self.events
    }

    pub fn take_events(&mut self) -> EventLog {
        std::mem::take(&mut self.events)
    }

    pub(crate) fn emit(&mut self, subject: impl Into<String>, event_type: EventType) {
        self.events.record(CatalogEvent::now(subject, event_type));
    }

    pub(crate) fn transact<T, E, F>(&self, f: F) -> Result<T, E>
    where
        E: From<StoreError>,
        F: FnMut(&mut Catalog) -> Result<T, E>,
    {
        transact(self.store, MAX_COMMIT_ATTEMPTS, f)
    }
}

impl std::fmt::Debug for Session<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("store", &self.store.location())
            .field("actor", &self.actor)
            .field("pending_events", &self.events.len())
            .finish()
    }
}
