//! Synchronous facade over [`Session`].

use crate::error::SessionResult;
use crate::mapping::{Entity, Shared};
use crate::query::Page;
use crate::session::{FlushReport, Session};
use couchmap_store::{FullTextQuery, ViewQuery};
use serde::de::DeserializeOwned;
use std::fmt;
use std::future::Future;
use tokio::runtime::Handle;

/// A session facade whose methods block the calling thread.
///
/// Each method drives the corresponding async [`Session`] operation to
/// completion on the supplied runtime handle. Errors come through exactly as
/// the async path produces them: a single underlying failure is never
/// wrapped, so matching on the error type works the same on both paths.
///
/// # Threading
///
/// Methods must be called from outside the runtime - typically a dedicated
/// worker thread. Calling them from within an async context panics, as
/// [`Handle::block_on`] does.
pub struct BlockingSession {
    session: Session,
    handle: Handle,
}

impl BlockingSession {
    /// Wraps a session with a runtime handle.
    #[must_use]
    pub fn new(session: Session, handle: Handle) -> Self {
        Self { session, handle }
    }

    /// Blocking [`Session::save`].
    pub fn save<T: Entity>(&self, entity: &Shared<T>) -> SessionResult<()> {
        self.block_on(self.session.save(entity))
    }

    /// Blocking [`Session::delete`].
    pub fn delete<T: Entity>(&self, entity: &Shared<T>) -> SessionResult<()> {
        self.block_on(self.session.delete(entity))
    }

    /// Blocking [`Session::load`].
    pub fn load<T: Entity>(&self, id: &str) -> SessionResult<Option<Shared<T>>> {
        self.block_on(self.session.load(id))
    }

    /// Blocking [`Session::query`].
    pub fn query<T: Entity>(&self, query: &ViewQuery) -> SessionResult<Page<Shared<T>>> {
        self.block_on(self.session.query(query))
    }

    /// Blocking [`Session::query_values`].
    pub fn query_values<T: DeserializeOwned>(&self, query: &ViewQuery) -> SessionResult<Page<T>> {
        self.block_on(self.session.query_values(query))
    }

    /// Blocking [`Session::query_fulltext`].
    pub fn query_fulltext<T: Entity>(
        &self,
        query: &FullTextQuery,
    ) -> SessionResult<Page<Shared<T>>> {
        self.block_on(self.session.query_fulltext(query))
    }

    /// Blocking [`Session::save_changes`].
    pub fn save_changes(&self) -> SessionResult<FlushReport> {
        self.block_on(self.session.save_changes())
    }

    /// Blocking [`Session::clear`].
    pub fn clear(&self) {
        self.block_on(self.session.clear());
    }

    /// Returns the wrapped async session.
    #[must_use]
    pub fn session(&self) -> &Session {
        &self.session
    }

    fn block_on<F: Future>(&self, future: F) -> F::Output {
        self.handle.block_on(future)
    }
}

impl fmt::Debug for BlockingSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockingSession")
            .field("session", &self.session)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use crate::mapping::{shared, EntityConfig, Mapping};
    use crate::session::SessionFactory;
    use couchmap_store::{MemoryStore, Revision};
    use serde::{Deserialize, Serialize};
    use std::sync::Arc;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct TestUser {
        id: String,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        revision: Option<Revision>,
        name: String,
    }

    fn factory() -> SessionFactory {
        let mapping = Mapping::builder()
            .entity(
                EntityConfig::new(
                    "user",
                    |u: &TestUser| u.id.clone(),
                    |u: &mut TestUser, id| u.id = id,
                )
                .revision(|u: &TestUser| u.revision.clone(), |u, rev| {
                    u.revision = Some(rev)
                }),
            )
            .build()
            .unwrap();
        SessionFactory::new(Arc::new(MemoryStore::new()), Arc::new(mapping))
    }

    #[test]
    fn blocking_lifecycle() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let factory = factory();
        let session = factory.open_blocking_session(runtime.handle().clone());

        let alice = shared(TestUser {
            id: "1".to_string(),
            revision: None,
            name: "Alice".to_string(),
        });

        session.save(&alice).unwrap();
        assert!(alice.read().revision.is_some());

        // Same reference back, no round trip.
        let loaded = session.load::<TestUser>("1").unwrap().unwrap();
        assert!(Arc::ptr_eq(&alice, &loaded));

        alice.write().name = "Alicia".to_string();
        let report = session.save_changes().unwrap();
        assert_eq!(report.submitted, 1);
        assert!(report.unacknowledged.is_empty());

        session.delete(&alice).unwrap();
        assert!(session.load::<TestUser>("1").unwrap().is_none());
    }
}
