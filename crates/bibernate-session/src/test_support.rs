//! Test entities and a scripted in-memory connection.

use bibernate_core::error::{QueryError, QueryErrorKind};
use bibernate_core::{
    AssociationBinding, Connection, Entity, EntityMapping, Error, FieldMapping, InsertResult,
    InstantiationError, LazyList, Result, Row, SqlType, ToOne, Value,
};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

#[derive(Debug, Default)]
pub struct Owner {
    pub id: Option<i64>,
    pub name: String,
    pub pets: LazyList<Pet>,
}

impl Entity for Owner {
    fn mapping() -> EntityMapping {
        EntityMapping::entity()
            .table("owners")
            .field(FieldMapping::new("id", SqlType::BigInt).id())
            .field(FieldMapping::new("name", SqlType::Text))
            .field(FieldMapping::one_to_many::<Pet>("pets", "owner"))
    }

    fn instantiate() -> std::result::Result<Self, InstantiationError> {
        Ok(Self::default())
    }

    fn get_field(&self, field: &str) -> Result<Value> {
        match field {
            "id" => Ok(self.id.into()),
            "name" => Ok(self.name.clone().into()),
            _ => Err(Error::unknown_field("Owner", field)),
        }
    }

    fn set_field(&mut self, field: &str, value: Value) -> Result<()> {
        match field {
            "id" => self.id = value.try_into()?,
            "name" => self.name = value.try_into()?,
            _ => return Err(Error::unknown_field("Owner", field)),
        }
        Ok(())
    }

    fn bind_association(&mut self, field: &str, binding: AssociationBinding) -> Result<()> {
        match field {
            "pets" => self.pets = binding.into_list()?,
            _ => return Err(Error::unknown_field("Owner", field)),
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct Pet {
    pub id: Option<i64>,
    pub name: String,
    pub owner: ToOne<Owner>,
}

impl Entity for Pet {
    fn mapping() -> EntityMapping {
        EntityMapping::entity()
            .table("pets")
            .field(FieldMapping::new("id", SqlType::BigInt).id())
            .field(FieldMapping::new("name", SqlType::Text))
            .field(FieldMapping::many_to_one::<Owner>("owner"))
    }

    fn instantiate() -> std::result::Result<Self, InstantiationError> {
        Ok(Self::default())
    }

    fn get_field(&self, field: &str) -> Result<Value> {
        match field {
            "id" => Ok(self.id.into()),
            "name" => Ok(self.name.clone().into()),
            "owner" => self.owner.foreign_key(),
            _ => Err(Error::unknown_field("Pet", field)),
        }
    }

    fn set_field(&mut self, field: &str, value: Value) -> Result<()> {
        match field {
            "id" => self.id = value.try_into()?,
            "name" => self.name = value.try_into()?,
            _ => return Err(Error::unknown_field("Pet", field)),
        }
        Ok(())
    }

    fn bind_association(&mut self, field: &str, binding: AssociationBinding) -> Result<()> {
        match field {
            "owner" => self.owner = binding.into_to_one()?,
            _ => return Err(Error::unknown_field("Pet", field)),
        }
        Ok(())
    }
}

pub fn pet_row(id: i64, name: &str, owner_id: Option<i64>) -> Row {
    Row::new(
        vec!["id".into(), "name".into(), "owner_id".into()],
        vec![Value::BigInt(id), Value::from(name), Value::from(owner_id)],
    )
}

pub fn owner_row(id: i64, name: &str) -> Row {
    Row::new(
        vec!["id".into(), "name".into()],
        vec![Value::BigInt(id), Value::from(name)],
    )
}

#[derive(Debug)]
pub struct MockState {
    /// Every statement run, in order
    pub executed: Vec<(String, Vec<Value>)>,
    /// Result sets handed out to queries, front first
    pub query_results: VecDeque<Vec<Row>>,
    /// Row counts for execute/insert, front first; 1 when exhausted
    pub rows_affected: VecDeque<u64>,
    /// Keys reported by inserts, front first
    pub generated_keys: VecDeque<Value>,
    /// Statements containing this text fail
    pub fail_on: Option<String>,
    pub fail_commit: bool,
    pub fail_rollback: bool,
    pub fail_disable_auto_commit: bool,
    pub auto_commit: bool,
    pub auto_commit_calls: Vec<bool>,
    pub commits: usize,
    pub rollbacks: usize,
    pub closed: bool,
}

impl Default for MockState {
    fn default() -> Self {
        Self {
            executed: Vec::new(),
            query_results: VecDeque::new(),
            rows_affected: VecDeque::new(),
            generated_keys: VecDeque::new(),
            fail_on: None,
            fail_commit: false,
            fail_rollback: false,
            fail_disable_auto_commit: false,
            auto_commit: true,
            auto_commit_calls: Vec::new(),
            commits: 0,
            rollbacks: 0,
            closed: false,
        }
    }
}

impl MockState {
    pub fn statements(&self) -> Vec<String> {
        self.executed.iter().map(|(sql, _)| sql.clone()).collect()
    }
}

#[derive(Debug, Clone, Default)]
pub struct MockConnection {
    pub state: Arc<Mutex<MockState>>,
}

impl MockConnection {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, sql: &str, params: &[Value]) -> Result<()> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(mock_error(QueryErrorKind::Closed, sql, "connection is closed"));
        }
        state.executed.push((sql.to_string(), params.to_vec()));
        if state.fail_on.as_deref().is_some_and(|needle| sql.contains(needle)) {
            return Err(mock_error(QueryErrorKind::Database, sql, "scripted failure"));
        }
        Ok(())
    }
}

fn mock_error(kind: QueryErrorKind, sql: &str, message: &str) -> Error {
    Error::Query(QueryError {
        kind,
        sql: Some(sql.to_string()),
        message: message.to_string(),
        source: None,
    })
}

impl Connection for MockConnection {
    fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        self.record(sql, params)?;
        Ok(self.state.lock().query_results.pop_front().unwrap_or_default())
    }

    fn execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
        self.record(sql, params)?;
        Ok(self.state.lock().rows_affected.pop_front().unwrap_or(1))
    }

    fn insert(&self, sql: &str, params: &[Value]) -> Result<InsertResult> {
        self.record(sql, params)?;
        let mut state = self.state.lock();
        let rows = state.rows_affected.pop_front().unwrap_or(1);
        let keys = state.generated_keys.pop_front().into_iter().collect();
        Ok(InsertResult::new(rows, keys))
    }

    fn auto_commit(&self) -> Result<bool> {
        Ok(self.state.lock().auto_commit)
    }

    fn set_auto_commit(&self, enabled: bool) -> Result<()> {
        let mut state = self.state.lock();
        state.auto_commit_calls.push(enabled);
        if !enabled && state.fail_disable_auto_commit {
            return Err(mock_error(QueryErrorKind::Busy, "BEGIN", "database is locked"));
        }
        state.auto_commit = enabled;
        Ok(())
    }

    fn commit(&self) -> Result<()> {
        let mut state = self.state.lock();
        if state.fail_commit {
            return Err(mock_error(QueryErrorKind::Busy, "COMMIT", "database is locked"));
        }
        state.commits += 1;
        Ok(())
    }

    fn rollback(&self) -> Result<()> {
        let mut state = self.state.lock();
        if state.fail_rollback {
            return Err(mock_error(QueryErrorKind::Database, "ROLLBACK", "rollback failed"));
        }
        state.rollbacks += 1;
        Ok(())
    }

    fn close(&self) -> Result<()> {
        self.state.lock().closed = true;
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.state.lock().closed
    }
}
