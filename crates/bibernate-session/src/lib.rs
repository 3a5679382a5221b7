//! Session and persistence context for Bibernate.
//!
//! `bibernate-session` is the **unit-of-work layer**. A [`Session`] owns one
//! connection, one [`PersistenceContext`] and one [`ActionQueue`]:
//!
//! - **Identity map**: at most one tracked instance per entity type and id.
//! - **Dirty checking**: tracked instances are compared against snapshots
//!   taken when they entered the session.
//! - **Write-behind**: inserts, updates and deletes are queued and run on
//!   [`Session::flush`], inserts first and deletes last.
//! - **Lazy associations**: proxies load through the session that produced
//!   them and join its identity map.
//!
//! # Closing discards unflushed work
//!
//! [`Session::close`] dirty-checks and queues updates like `flush`, but then
//! drops the queue without running it. Changes that were never flushed are
//! lost, including pending deletes.
//!
//! # Example
//!
//! ```ignore
//! let session = factory.open_session()?;
//! let tx = session.transaction();
//! tx.begin()?;
//!
//! let person = entity_ref(Person::new("Ann", "Smith"));
//! session.persist(&person)?;
//! person.write().last_name = "Jones".into();
//!
//! session.flush()?;
//! tx.commit()?;
//! session.close()?;
//! ```

pub mod action;
pub mod config;
pub mod context;
pub mod dao;
pub mod factory;
pub mod transaction;

#[cfg(test)]
mod test_support;

pub use action::{Action, ActionQueue, DeleteAction, InsertAction, UpdateAction};
pub use config::SessionConfig;
pub use context::PersistenceContext;
pub use dao::{GenericDao, SQL_TARGET};
pub use factory::SessionFactory;
pub use transaction::{Transaction, TransactionStatus};

use bibernate_core::{
    AssociationLoader, AssociationQuery, Connection, Entity, EntityKey, EntityPropertySnapshot,
    EntityRef, EntityType, Error, ManagedEntity, Result, Value, downcast_entity, erase_entity,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

struct SessionCore {
    dao: Arc<GenericDao>,
    context: Arc<PersistenceContext>,
    actions: Mutex<ActionQueue>,
    open: Arc<AtomicBool>,
    loader: Arc<dyn AssociationLoader>,
}

/// Loader handed to lazy proxies. Holds the session weakly so that proxies
/// outliving their session fail instead of keeping it alive.
struct SessionLoader {
    core: Weak<SessionCore>,
}

impl SessionLoader {
    fn core(&self) -> Result<Arc<SessionCore>> {
        self.core
            .upgrade()
            .ok_or_else(|| Error::illegal_state("Session is closed"))
    }
}

impl AssociationLoader for SessionLoader {
    fn load_one(&self, target: EntityType, id: &Value) -> Result<Option<Arc<dyn ManagedEntity>>> {
        self.core()?.find(target, id)
    }

    fn load_many(&self, query: &AssociationQuery) -> Result<Vec<Arc<dyn ManagedEntity>>> {
        self.core()?.load_many(query)
    }
}

impl SessionCore {
    fn ensure_open(&self) -> Result<()> {
        if self.open.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(Error::illegal_state("Session is closed"))
        }
    }

    /// Cache-first lookup; a loaded instance is tracked before it is returned.
    fn find(&self, entity_type: EntityType, id: &Value) -> Result<Option<Arc<dyn ManagedEntity>>> {
        self.ensure_open()?;
        let metadata = entity_type.metadata()?;
        let key = EntityKey::new(entity_type, id.cast_to(metadata.id_field().sql_type())?);
        if let Some(cached) = self.context.get_managed(&key) {
            tracing::debug!(key = %key, "Cache hit");
            return Ok(Some(cached));
        }
        tracing::debug!(key = %key, "Cache miss");
        match self.dao.find_by_id(entity_type, key.id(), &self.loader)? {
            Some(loaded) => Ok(Some(self.track(&key, loaded)?)),
            None => Ok(None),
        }
    }

    fn load_many(&self, query: &AssociationQuery) -> Result<Vec<Arc<dyn ManagedEntity>>> {
        self.ensure_open()?;
        let loaded = self.dao.find_associated(query, &self.loader)?;
        loaded
            .into_iter()
            .map(|entity| {
                let key = entity.key()?;
                self.track(&key, entity)
            })
            .collect()
    }

    /// Put a freshly loaded instance, preferring one already tracked under
    /// the same key.
    fn track(
        &self,
        key: &EntityKey,
        loaded: Arc<dyn ManagedEntity>,
    ) -> Result<Arc<dyn ManagedEntity>> {
        if let Some(cached) = self.context.get_managed(key) {
            return Ok(cached);
        }
        self.context.put(Arc::clone(&loaded))?;
        Ok(self.context.get_managed(key).unwrap_or(loaded))
    }

    /// Dirty-check every tracked instance and queue an update for each
    /// changed one. Returns the number queued.
    fn schedule_updates(&self) -> Result<usize> {
        let dirty = self.context.dirty_entities()?;
        let count = dirty.len();
        for (key, entity) in dirty {
            let mut columns = entity.property_snapshots()?;
            columns.extend(
                entity
                    .relation_snapshots()?
                    .into_iter()
                    .map(|r| EntityPropertySnapshot::new(r.column(), r.value().clone())),
            );
            let action = UpdateAction::new(
                Arc::clone(&self.dao),
                Arc::clone(&self.context),
                key,
                columns,
            );
            self.actions.lock().push(Box::new(action));
        }
        Ok(count)
    }
}

/// A unit of work over one connection.
pub struct Session {
    core: Arc<SessionCore>,
    transaction: Mutex<Option<Transaction>>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("open", &self.is_open())
            .field("tracked", &self.core.context.len())
            .field("pending_actions", &self.pending_actions())
            .finish()
    }
}

impl Session {
    /// Open a session over `connection`.
    pub fn new(connection: Arc<dyn Connection>, config: &SessionConfig) -> Self {
        let core = Arc::new_cyclic(|weak: &Weak<SessionCore>| SessionCore {
            dao: Arc::new(GenericDao::new(connection, config.show_sql)),
            context: Arc::new(PersistenceContext::new()),
            actions: Mutex::new(ActionQueue::new()),
            open: Arc::new(AtomicBool::new(true)),
            loader: Arc::new(SessionLoader { core: weak.clone() }),
        });
        Self {
            core,
            transaction: Mutex::new(None),
        }
    }

    pub fn is_open(&self) -> bool {
        self.core.open.load(Ordering::Acquire)
    }

    /// The instance of `E` with identifier `id`.
    ///
    /// Answered from the identity map when possible, otherwise loaded and
    /// tracked. Returns `None` when no row matches.
    #[tracing::instrument(level = "debug", skip(self, id), fields(entity = EntityType::of::<E>().name()))]
    pub fn find_by_id<E: Entity>(&self, id: impl Into<Value>) -> Result<Option<EntityRef<E>>> {
        let entity_type = EntityType::of::<E>();
        match self.core.find(entity_type, &id.into())? {
            Some(found) => downcast_entity::<E>(found).map(Some).ok_or_else(|| {
                Error::entity_query(entity_type.name(), "tracked instance has an unexpected type")
            }),
            None => Ok(None),
        }
    }

    /// Make `entity` persistent.
    ///
    /// With an assigned identifier the insert is queued until the next flush.
    /// With a NULL identifier it runs now, since the key comes from the
    /// database. Either way the entity is tracked immediately, so
    /// [`find_by_id`](Session::find_by_id) sees it before any flush.
    #[tracing::instrument(level = "debug", skip(self, entity), fields(entity = EntityType::of::<E>().name()))]
    pub fn persist<E: Entity>(&self, entity: &EntityRef<E>) -> Result<()> {
        self.core.ensure_open()?;
        let managed = erase_entity(Arc::clone(entity));
        let id = managed.id()?;
        if id.is_null() {
            self.core.dao.save(managed.as_ref())?;
            self.core.context.put(managed)?;
            return Ok(());
        }

        let key = EntityKey::new(managed.entity_type(), id);
        if self.core.context.contains_key(&key) {
            tracing::debug!(key = %key, "Entity already persistent");
            return Ok(());
        }
        self.core.actions.lock().push(Box::new(InsertAction::new(
            Arc::clone(&self.core.dao),
            Arc::clone(&managed),
        )));
        self.core.context.put(managed)?;
        Ok(())
    }

    /// Queue deletion of `entity` and stop tracking it.
    #[tracing::instrument(level = "debug", skip(self, entity), fields(entity = EntityType::of::<E>().name()))]
    pub fn delete<E: Entity>(&self, entity: &EntityRef<E>) -> Result<()> {
        self.core.ensure_open()?;
        let managed = erase_entity(Arc::clone(entity));
        let key = managed.key()?;
        if key.id().is_null() {
            return Err(Error::entity_query(
                key.entity_type().name(),
                "cannot delete an entity without an identifier",
            ));
        }
        self.core.actions.lock().push(Box::new(DeleteAction::new(
            Arc::clone(&self.core.dao),
            key.clone(),
        )));
        self.core.context.remove(&key);
        Ok(())
    }

    /// Whether an instance with the same key as `entity` is tracked.
    pub fn contains<E: Entity>(&self, entity: &EntityRef<E>) -> Result<bool> {
        self.core.context.contains(&**entity)
    }

    /// Whether the tracked instance for `entity`'s key differs from its
    /// snapshot.
    pub fn is_dirty<E: Entity>(&self, entity: &EntityRef<E>) -> Result<bool> {
        let managed: &dyn ManagedEntity = &**entity;
        self.core.context.is_dirty(&managed.key()?)
    }

    /// Number of queued actions.
    pub fn pending_actions(&self) -> usize {
        self.core.actions.lock().len()
    }

    /// Queue updates for changed entities, then run all queued actions.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn flush(&self) -> Result<()> {
        self.core.ensure_open()?;
        let updates = self.core.schedule_updates()?;
        let mut queue = std::mem::take(&mut *self.core.actions.lock());
        let executed = queue.drain()?;
        tracing::debug!(updates, executed, "Flushed session");
        Ok(())
    }

    /// Close the session.
    ///
    /// Changed entities are detected and their updates queued, but the queue
    /// is discarded without running: nothing that was not flushed reaches the
    /// database. The context is cleared and the connection closed. Closing
    /// a closed session does nothing.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn close(&self) -> Result<()> {
        if !self.core.open.swap(false, Ordering::AcqRel) {
            return Ok(());
        }
        let scheduled = self.core.schedule_updates();
        let discarded = self.core.actions.lock().discard();
        if discarded > 0 {
            tracing::warn!(discarded, "Session closed with unflushed actions, discarding them");
        }
        self.core.context.clear();
        let closed = self
            .core
            .dao
            .connection()
            .close()
            .map_err(|e| Error::wrap("Could not close connection", e));
        scheduled.map(|_| ()).and(closed)
    }

    /// The session's current transaction, or a new one if there is none or
    /// the current one has committed or rolled back.
    pub fn transaction(&self) -> Transaction {
        let mut current = self.transaction.lock();
        match current.as_ref() {
            Some(tx) if !tx.status().is_terminal() => tx.clone(),
            _ => {
                let tx = Transaction::new(
                    Arc::clone(self.core.dao.connection()),
                    Arc::clone(&self.core.open),
                );
                *current = Some(tx.clone());
                tx
            }
        }
    }
}
