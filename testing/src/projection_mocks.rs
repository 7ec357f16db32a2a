//! In-memory read-model testing utilities
//!
//! Provides fast, deterministic testing infrastructure for projections:
//! - [`InMemoryReadModelStore`]: HashMap-based entity storage with fault injection
//! - [`ProjectionTestHarness`]: Given-When-Then API over a projector's fold

use foldline_core::event::RecordedEvent;
use foldline_core::projection::{
    Projector, ProjectorError, ReadModel, ReadModelError, ReadModelStore,
};
use foldline_core::stream::AggregateId;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

/// In-memory read-model store for fast, deterministic testing.
///
/// Cheap to clone; clones share the same entities. [`fail_next`](Self::fail_next)
/// makes the next N calls fail with [`ReadModelError::Unavailable`].
///
/// # Example
///
/// ```ignore
/// let store = InMemoryReadModelStore::<Temperature>::new();
/// store.save(entity).await?;
/// assert_eq!(store.len(), 1);
/// ```
#[derive(Debug)]
pub struct InMemoryReadModelStore<E> {
    entities: Arc<RwLock<HashMap<AggregateId, E>>>,
    injected_failures: Arc<AtomicUsize>,
    writes: Arc<AtomicUsize>,
}

impl<E> Clone for InMemoryReadModelStore<E> {
    fn clone(&self) -> Self {
        Self {
            entities: Arc::clone(&self.entities),
            injected_failures: Arc::clone(&self.injected_failures),
            writes: Arc::clone(&self.writes),
        }
    }
}

impl<E> Default for InMemoryReadModelStore<E> {
    fn default() -> Self {
        Self {
            entities: Arc::new(RwLock::new(HashMap::new())),
            injected_failures: Arc::new(AtomicUsize::new(0)),
            writes: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl<E: ReadModel> InMemoryReadModelStore<E> {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` calls fail with `Unavailable`.
    pub fn fail_next(&self, count: usize) {
        self.injected_failures.store(count, Ordering::Release);
    }

    /// Synchronous lookup for assertions.
    #[must_use]
    pub fn get(&self, id: &AggregateId) -> Option<E> {
        self.entities
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    /// Insert without going through the async API or fault injection.
    pub fn insert(&self, entity: E) {
        self.entities
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(entity.id().clone(), entity);
    }

    /// Number of stored entities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entities
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Check if the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Ids of all stored entities, sorted.
    #[must_use]
    pub fn ids(&self) -> Vec<AggregateId> {
        let mut ids: Vec<_> = self
            .entities
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        ids.sort();
        ids
    }

    /// Number of successful `save` calls.
    #[must_use]
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::Acquire)
    }

    fn check_failure(&self) -> Result<(), ReadModelError> {
        if self
            .injected_failures
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(ReadModelError::Unavailable("injected failure".to_string()));
        }
        Ok(())
    }
}

impl<E: ReadModel> ReadModelStore<E> for InMemoryReadModelStore<E> {
    fn find<'a>(
        &'a self,
        id: &'a AggregateId,
    ) -> Pin<Box<dyn Future<Output = Result<Option<E>, ReadModelError>> + Send + 'a>> {
        Box::pin(async move {
            self.check_failure()?;
            Ok(self.get(id))
        })
    }

    fn save(&self, entity: E) -> Pin<Box<dyn Future<Output = Result<(), ReadModelError>> + Send + '_>> {
        Box::pin(async move {
            self.check_failure()?;
            self.insert(entity);
            self.writes.fetch_add(1, Ordering::AcqRel);
            Ok(())
        })
    }

    fn find_all(&self) -> Pin<Box<dyn Future<Output = Result<Vec<E>, ReadModelError>> + Send + '_>> {
        Box::pin(async move {
            self.check_failure()?;
            let entities = self.entities.read().unwrap_or_else(PoisonError::into_inner);
            let mut all: Vec<E> = entities.values().cloned().collect();
            all.sort_by(|a, b| a.id().cmp(b.id()));
            Ok(all)
        })
    }

    fn remove<'a>(
        &'a self,
        id: &'a AggregateId,
    ) -> Pin<Box<dyn Future<Output = Result<(), ReadModelError>> + Send + 'a>> {
        Box::pin(async move {
            self.check_failure()?;
            self.entities
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(id);
            Ok(())
        })
    }

    fn clear(&self) -> Pin<Box<dyn Future<Output = Result<(), ReadModelError>> + Send + '_>> {
        Box::pin(async move {
            self.check_failure()?;
            self.entities
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .clear();
            Ok(())
        })
    }
}

/// Test harness for a projector's fold.
///
/// Applies recorded events straight through [`Projector::project`] and the
/// version bookkeeping, without the projection engine's locking, gating or
/// store retries. Events of other aggregate types are skipped. Unknown event
/// types only advance the entity version.
///
/// # Example
///
/// ```ignore
/// let mut harness = ProjectionTestHarness::new(TemperatureReadProjector);
///
/// harness
///     .given_events(&history(&stream, &[created, reported]))?
///     .then_entity(&id, |entity| assert_eq!(entity.history.len(), 1));
/// ```
pub struct ProjectionTestHarness<P: Projector> {
    projector: P,
    store: InMemoryReadModelStore<P::Entity>,
}

impl<P: Projector> ProjectionTestHarness<P> {
    /// Create a harness with an empty store.
    #[must_use]
    pub fn new(projector: P) -> Self {
        Self {
            projector,
            store: InMemoryReadModelStore::new(),
        }
    }

    /// Apply a series of recorded events in order.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectorError`] if the projector rejects an event, or if a
    /// known event type cannot be decoded.
    pub fn given_events(&mut self, events: &[RecordedEvent]) -> Result<&mut Self, ProjectorError> {
        for recorded in events {
            if recorded.aggregate_type().as_str() != P::AGGREGATE_TYPE {
                continue;
            }
            let id = recorded.aggregate_id();
            let entity = self
                .store
                .get(id)
                .unwrap_or_else(|| self.projector.new_entity(id));

            let decoded = recorded.decode::<P::Event>().map_err(|e| ProjectorError {
                projector: P::PROJECTOR_TYPE.to_string(),
                event_type: recorded.event_type().to_string(),
                reason: e.to_string(),
            })?;
            let mut entity = match decoded {
                Some(event) => self.projector.project(&event, recorded, entity)?,
                None => entity,
            };
            entity.set_version(recorded.version);
            self.store.insert(entity);
        }
        Ok(self)
    }

    /// Assert on the entity with `id`.
    ///
    /// # Panics
    ///
    /// Panics if no entity with `id` exists, or if the assertion panics.
    #[allow(clippy::panic)] // Intentional panic for test assertions
    pub fn then_entity<F>(&self, id: &AggregateId, assertion: F) -> &Self
    where
        F: FnOnce(&P::Entity),
    {
        let Some(entity) = self.store.get(id) else {
            panic!("Expected read model entity '{id}', but it was not found");
        };
        assertion(&entity);
        self
    }

    /// Assert that no entity with `id` exists.
    ///
    /// # Panics
    ///
    /// Panics if the entity exists.
    #[allow(clippy::panic)] // Intentional panic for test assertions
    pub fn then_absent(&self, id: &AggregateId) -> &Self {
        assert!(
            self.store.get(id).is_none(),
            "Expected no read model entity '{id}', but one was found"
        );
        self
    }

    /// The backing store.
    #[must_use]
    pub const fn store(&self) -> &InMemoryReadModelStore<P::Entity> {
        &self.store
    }

    /// The projector under test.
    #[must_use]
    pub const fn projector(&self) -> &P {
        &self.projector
    }
}
