//! Deferred write actions and the priority queue that runs them.
//!
//! Within one drain, inserts run before updates and updates before deletes.
//! Actions of the same kind run in no particular order.

use crate::context::PersistenceContext;
use crate::dao::GenericDao;
use bibernate_core::{EntityKey, EntityPropertySnapshot, ManagedEntity, Result};
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::fmt;
use std::sync::Arc;

/// A write deferred until the next flush.
pub trait Action: Send {
    /// Run the write against the database.
    fn execute(&self) -> Result<()>;

    /// Lower runs first.
    fn priority(&self) -> u8;

    /// Short description for logs.
    fn describe(&self) -> String;
}

/// Insert a new entity.
pub struct InsertAction {
    dao: Arc<GenericDao>,
    entity: Arc<dyn ManagedEntity>,
}

impl InsertAction {
    pub const PRIORITY: u8 = 1;

    pub fn new(dao: Arc<GenericDao>, entity: Arc<dyn ManagedEntity>) -> Self {
        Self { dao, entity }
    }
}

impl Action for InsertAction {
    fn execute(&self) -> Result<()> {
        self.dao.save(self.entity.as_ref())
    }

    fn priority(&self) -> u8 {
        Self::PRIORITY
    }

    fn describe(&self) -> String {
        format!("insert {}", self.entity.entity_type())
    }
}

/// Write changed columns of a tracked entity, then make the written state
/// its new dirty-checking baseline.
pub struct UpdateAction {
    dao: Arc<GenericDao>,
    context: Arc<PersistenceContext>,
    key: EntityKey,
    columns: Vec<EntityPropertySnapshot>,
}

impl UpdateAction {
    pub const PRIORITY: u8 = 2;

    pub fn new(
        dao: Arc<GenericDao>,
        context: Arc<PersistenceContext>,
        key: EntityKey,
        columns: Vec<EntityPropertySnapshot>,
    ) -> Self {
        Self {
            dao,
            context,
            key,
            columns,
        }
    }

    pub fn key(&self) -> &EntityKey {
        &self.key
    }
}

impl Action for UpdateAction {
    fn execute(&self) -> Result<()> {
        self.dao.execute_update(&self.key, &self.columns)?;
        self.context.refresh_snapshot(&self.key)
    }

    fn priority(&self) -> u8 {
        Self::PRIORITY
    }

    fn describe(&self) -> String {
        format!("update {}", self.key)
    }
}

/// Delete an entity's row.
pub struct DeleteAction {
    dao: Arc<GenericDao>,
    key: EntityKey,
}

impl DeleteAction {
    pub const PRIORITY: u8 = 3;

    pub fn new(dao: Arc<GenericDao>, key: EntityKey) -> Self {
        Self { dao, key }
    }
}

impl Action for DeleteAction {
    fn execute(&self) -> Result<()> {
        self.dao.delete_by_key(&self.key).map(|_| ())
    }

    fn priority(&self) -> u8 {
        Self::PRIORITY
    }

    fn describe(&self) -> String {
        format!("delete {}", self.key)
    }
}

struct Queued(Box<dyn Action>);

impl PartialEq for Queued {
    fn eq(&self, other: &Self) -> bool {
        self.0.priority() == other.0.priority()
    }
}

impl Eq for Queued {}

impl PartialOrd for Queued {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Queued {
    // BinaryHeap pops the greatest element; reversed so the lowest priority
    // value comes out first.
    fn cmp(&self, other: &Self) -> Ordering {
        other.0.priority().cmp(&self.0.priority())
    }
}

/// Pending actions, ordered by priority only.
#[derive(Default)]
pub struct ActionQueue {
    heap: BinaryHeap<Queued>,
}

impl fmt::Debug for ActionQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionQueue")
            .field("pending", &self.heap.len())
            .finish()
    }
}

impl ActionQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, action: Box<dyn Action>) {
        tracing::debug!(
            action = %action.describe(),
            priority = action.priority(),
            "Queued action"
        );
        self.heap.push(Queued(action));
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Remove the next action to run.
    pub fn pop(&mut self) -> Option<Box<dyn Action>> {
        self.heap.pop().map(|queued| queued.0)
    }

    /// Drop all pending actions without running them. Returns how many.
    pub fn discard(&mut self) -> usize {
        let count = self.heap.len();
        self.heap.clear();
        count
    }

    /// Run every pending action in priority order. The first failure stops
    /// the drain, discards what is left and is returned.
    pub fn drain(&mut self) -> Result<usize> {
        let mut executed = 0;
        while let Some(action) = self.pop() {
            tracing::debug!(
                action = %action.describe(),
                priority = action.priority(),
                "Executing action"
            );
            if let Err(e) = action.execute() {
                let dropped = self.discard();
                tracing::warn!(
                    action = %action.describe(),
                    executed,
                    dropped,
                    error = %e,
                    "Action failed, remaining actions discarded"
                );
                return Err(e);
            }
            executed += 1;
        }
        Ok(executed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{MockConnection, Pet};
    use bibernate_core::{Error, ToOne, Value, entity_ref, erase_entity};
    use parking_lot::Mutex;

    struct Recorded {
        name: &'static str,
        priority: u8,
        log: Arc<Mutex<Vec<&'static str>>>,
        fail: bool,
    }

    impl Action for Recorded {
        fn execute(&self) -> Result<()> {
            self.log.lock().push(self.name);
            if self.fail {
                Err(Error::illegal_state("boom"))
            } else {
                Ok(())
            }
        }

        fn priority(&self) -> u8 {
            self.priority
        }

        fn describe(&self) -> String {
            self.name.to_string()
        }
    }

    fn recorded(
        name: &'static str,
        priority: u8,
        log: &Arc<Mutex<Vec<&'static str>>>,
    ) -> Box<dyn Action> {
        Box::new(Recorded {
            name,
            priority,
            log: Arc::clone(log),
            fail: false,
        })
    }

    #[test]
    fn drains_insert_update_delete_in_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut queue = ActionQueue::new();
        queue.push(recorded("delete", DeleteAction::PRIORITY, &log));
        queue.push(recorded("insert", InsertAction::PRIORITY, &log));
        queue.push(recorded("update", UpdateAction::PRIORITY, &log));

        assert_eq!(queue.drain().unwrap(), 3);
        assert_eq!(*log.lock(), vec!["insert", "update", "delete"]);
        assert!(queue.is_empty());
    }

    #[test]
    fn failure_aborts_remaining_actions() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut queue = ActionQueue::new();
        queue.push(Box::new(Recorded {
            name: "update",
            priority: UpdateAction::PRIORITY,
            log: Arc::clone(&log),
            fail: true,
        }));
        queue.push(recorded("insert", InsertAction::PRIORITY, &log));
        queue.push(recorded("delete", DeleteAction::PRIORITY, &log));

        assert!(queue.drain().is_err());
        assert_eq!(*log.lock(), vec!["insert", "update"]);
        assert!(queue.is_empty());
    }

    #[test]
    fn real_actions_issue_sql_by_priority() {
        let conn = MockConnection::new();
        conn.state.lock().generated_keys.push_back(Value::BigInt(1));
        let dao = Arc::new(GenericDao::new(Arc::new(conn.clone()), false));
        let context = Arc::new(PersistenceContext::new());

        let tracked = entity_ref(Pet {
            id: Some(2),
            name: "Tom".into(),
            owner: ToOne::empty(),
        });
        let key = EntityKey::of::<Pet>(2_i64).unwrap();
        context.put(erase_entity(Arc::clone(&tracked))).unwrap();
        tracked.write().name = "Tommy".into();
        assert!(context.is_dirty(&key).unwrap());

        let mut queue = ActionQueue::new();
        queue.push(Box::new(DeleteAction::new(
            Arc::clone(&dao),
            EntityKey::of::<Pet>(3_i64).unwrap(),
        )));
        queue.push(Box::new(UpdateAction::new(
            Arc::clone(&dao),
            Arc::clone(&context),
            key.clone(),
            vec![EntityPropertySnapshot::new("name", Value::from("Tommy"))],
        )));
        queue.push(Box::new(InsertAction::new(
            Arc::clone(&dao),
            erase_entity(entity_ref(Pet::default())),
        )));
        queue.drain().unwrap();

        let statements = conn.state.lock().statements();
        assert!(statements[0].starts_with("INSERT INTO pets"));
        assert!(statements[1].starts_with("UPDATE pets"));
        assert!(statements[2].starts_with("DELETE FROM pets"));
        assert!(!context.is_dirty(&key).unwrap());
    }
}
