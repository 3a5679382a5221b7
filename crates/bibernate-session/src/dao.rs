//! Generic data access: SQL generation and execution for any entity type.
//!
//! Statements are built from resolved metadata and executed on the session's
//! connection. Result rows are mapped through the entity type's hydrate
//! function, with lazy associations wired to the loader passed in.

use bibernate_core::error::EntityQueryError;
use bibernate_core::{
    AssociationLoader, AssociationQuery, AssociationSource, Connection, EntityKey,
    EntityMetadata, EntityPropertySnapshot, EntityType, Error, ManagedEntity, Result, Value,
};
use std::sync::Arc;

/// Log target for generated SQL.
pub const SQL_TARGET: &str = "bibernate::sql";

/// Runs entity-level statements on one connection.
pub struct GenericDao {
    connection: Arc<dyn Connection>,
    show_sql: bool,
}

impl std::fmt::Debug for GenericDao {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GenericDao")
            .field("show_sql", &self.show_sql)
            .finish_non_exhaustive()
    }
}

fn query_error(
    metadata: &EntityMetadata,
    message: impl Into<String>,
    sql: &str,
    id: Option<&Value>,
) -> EntityQueryError {
    let err = EntityQueryError {
        entity: metadata.entity_type().name().to_string(),
        id: None,
        sql: None,
        message: message.into(),
        source: None,
    }
    .with_sql(sql);
    match id {
        Some(id) => err.with_id(id),
        None => err,
    }
}

impl GenericDao {
    pub fn new(connection: Arc<dyn Connection>, show_sql: bool) -> Self {
        Self {
            connection,
            show_sql,
        }
    }

    pub fn connection(&self) -> &Arc<dyn Connection> {
        &self.connection
    }

    fn log_sql(&self, sql: &str, params: &[Value]) {
        if self.show_sql {
            tracing::info!(target: SQL_TARGET, sql, params = ?params, "Executing SQL");
        } else {
            tracing::debug!(target: SQL_TARGET, sql, params = ?params, "Executing SQL");
        }
    }

    /// Load the instance of `entity_type` with identifier `id`.
    ///
    /// Returns `None` when no row matches.
    pub fn find_by_id(
        &self,
        entity_type: EntityType,
        id: &Value,
        loader: &Arc<dyn AssociationLoader>,
    ) -> Result<Option<Arc<dyn ManagedEntity>>> {
        let metadata = entity_type.metadata()?;
        let sql = format!(
            "SELECT {} FROM {} WHERE {} = ?",
            metadata.column_names().join(", "),
            metadata.table_name(),
            metadata.id_field().column_name()
        );
        let params = [id.clone()];
        self.log_sql(&sql, &params);
        let rows = self.connection.query(&sql, &params).map_err(|e| {
            query_error(&metadata, "failed to load entity", &sql, Some(id)).with_source(e)
        })?;
        match rows.first() {
            Some(row) => entity_type.hydrate(row, loader).map(Some),
            None => Ok(None),
        }
    }

    /// Load every instance of `entity_type` whose `column` equals `value`.
    pub fn find_all_by(
        &self,
        entity_type: EntityType,
        column: &str,
        value: &Value,
        loader: &Arc<dyn AssociationLoader>,
    ) -> Result<Vec<Arc<dyn ManagedEntity>>> {
        let metadata = entity_type.metadata()?;
        let sql = format!(
            "SELECT {} FROM {} WHERE {} = ?",
            metadata.column_names().join(", "),
            metadata.table_name(),
            column
        );
        self.run_select(&metadata, &sql, value, loader)
    }

    /// Load every instance of `entity_type` linked to `owner_id` through a
    /// join table.
    pub fn find_all_by_join_table(
        &self,
        entity_type: EntityType,
        join_table: &str,
        join_column: &str,
        inverse_join_column: &str,
        owner_id: &Value,
        loader: &Arc<dyn AssociationLoader>,
    ) -> Result<Vec<Arc<dyn ManagedEntity>>> {
        let metadata = entity_type.metadata()?;
        let columns: Vec<String> = metadata
            .column_names()
            .iter()
            .map(|c| format!("t.{}", c))
            .collect();
        let sql = format!(
            "SELECT {} FROM {} t INNER JOIN {} j ON t.{} = j.{} WHERE j.{} = ?",
            columns.join(", "),
            metadata.table_name(),
            join_table,
            metadata.id_field().column_name(),
            inverse_join_column,
            join_column
        );
        self.run_select(&metadata, &sql, owner_id, loader)
    }

    /// Load the targets selected by an association query.
    pub fn find_associated(
        &self,
        query: &AssociationQuery,
        loader: &Arc<dyn AssociationLoader>,
    ) -> Result<Vec<Arc<dyn ManagedEntity>>> {
        match query.source() {
            AssociationSource::ForeignKey { column } => {
                self.find_all_by(query.target(), column, query.owner_id(), loader)
            }
            AssociationSource::JoinTable {
                table,
                join_column,
                inverse_join_column,
            } => self.find_all_by_join_table(
                query.target(),
                table,
                join_column,
                inverse_join_column,
                query.owner_id(),
                loader,
            ),
        }
    }

    fn run_select(
        &self,
        metadata: &EntityMetadata,
        sql: &str,
        param: &Value,
        loader: &Arc<dyn AssociationLoader>,
    ) -> Result<Vec<Arc<dyn ManagedEntity>>> {
        let params = [param.clone()];
        self.log_sql(sql, &params);
        let rows = self
            .connection
            .query(sql, &params)
            .map_err(|e| query_error(metadata, "failed to load entities", sql, None).with_source(e))?;
        rows.iter()
            .map(|row| metadata.entity_type().hydrate(row, loader))
            .collect()
    }

    /// Insert `entity`.
    ///
    /// With a NULL identifier the id column is left to the database, and the
    /// generated key is cast to the id field's type and written back into the
    /// entity. With an assigned identifier the id column is inserted as is.
    pub fn save(&self, entity: &dyn ManagedEntity) -> Result<()> {
        let metadata = entity.metadata()?;
        let id_field = metadata.id_field();
        let id = entity.id()?;
        let generate_id = id.is_null();

        let fields: Vec<_> = if generate_id {
            metadata.non_id_fields().collect()
        } else {
            metadata.fields().iter().collect()
        };
        let columns: Vec<&str> = fields.iter().map(|f| f.column_name()).collect();
        let names: Vec<&str> = fields.iter().map(|f| f.name()).collect();
        let mut params = entity.get_fields(&names)?;
        for (value, field) in params.iter_mut().zip(&fields) {
            if field.is_to_one() {
                *value = value.cast_to(field.sql_type())?;
            }
        }

        let placeholders = vec!["?"; columns.len()].join(", ");
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            metadata.table_name(),
            columns.join(", "),
            placeholders
        );
        self.log_sql(&sql, &params);

        let result = self
            .connection
            .insert(&sql, &params)
            .map_err(|e| query_error(&metadata, "failed to insert entity", &sql, None).with_source(e))?;
        if result.rows_affected != 1 {
            return Err(query_error(
                &metadata,
                format!(
                    "insert affected {} rows, expected exactly 1",
                    result.rows_affected
                ),
                &sql,
                None,
            )
            .into());
        }
        if !generate_id {
            return Ok(());
        }

        let key = result.generated_key().ok_or_else(|| {
            Error::from(query_error(
                &metadata,
                "database did not return a generated key",
                &sql,
                None,
            ))
        })?;
        let id = key.cast_to(id_field.sql_type()).map_err(|e| {
            query_error(
                &metadata,
                format!("generated key {} does not fit identifier field", key),
                &sql,
                None,
            )
            .with_source(e)
        })?;
        entity.set_field(id_field.name(), id.clone()).map_err(|e| {
            query_error(&metadata, "cannot write generated identifier", &sql, Some(&id))
                .with_source(e)
        })?;
        tracing::debug!(entity = metadata.entity_type().name(), id = %id, "Inserted entity");
        Ok(())
    }

    /// Update `columns` of the row identified by `key`. Returns the affected
    /// row count.
    pub fn execute_update(
        &self,
        key: &EntityKey,
        columns: &[EntityPropertySnapshot],
    ) -> Result<u64> {
        if columns.is_empty() {
            return Ok(0);
        }
        let metadata = key.entity_type().metadata()?;
        let assignments: Vec<String> = columns
            .iter()
            .map(|c| format!("{} = ?", c.column()))
            .collect();
        let sql = format!(
            "UPDATE {} SET {} WHERE {} = ?;",
            metadata.table_name(),
            assignments.join(", "),
            metadata.id_field().column_name()
        );
        let mut params: Vec<Value> = columns.iter().map(|c| c.value().clone()).collect();
        params.push(key.id().clone());
        self.log_sql(&sql, &params);

        self.connection.execute(&sql, &params).map_err(|e| {
            query_error(&metadata, "failed to update entity", &sql, Some(key.id()))
                .with_source(e)
                .into()
        })
    }

    /// Delete the row of `entity`.
    pub fn delete(&self, entity: &dyn ManagedEntity) -> Result<u64> {
        self.delete_by_key(&entity.key()?)
    }

    /// Delete the row identified by `key`. Returns the affected row count.
    pub fn delete_by_key(&self, key: &EntityKey) -> Result<u64> {
        let metadata = key.entity_type().metadata()?;
        let sql = format!(
            "DELETE FROM {} WHERE {} = ?",
            metadata.table_name(),
            metadata.id_field().column_name()
        );
        let params = [key.id().clone()];
        self.log_sql(&sql, &params);
        self.connection.execute(&sql, &params).map_err(|e| {
            query_error(&metadata, "failed to delete entity", &sql, Some(key.id()))
                .with_source(e)
                .into()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{MockConnection, Owner, Pet, owner_row, pet_row};
    use bibernate_core::{
        AssociationQuery, ErrorKind, ToOne, downcast_entity, entity_ref, erase_entity,
    };

    struct NoLoader;

    impl AssociationLoader for NoLoader {
        fn load_one(
            &self,
            _target: EntityType,
            _id: &Value,
        ) -> Result<Option<Arc<dyn ManagedEntity>>> {
            Ok(None)
        }

        fn load_many(&self, _query: &AssociationQuery) -> Result<Vec<Arc<dyn ManagedEntity>>> {
            Ok(Vec::new())
        }
    }

    fn setup() -> (MockConnection, GenericDao, Arc<dyn AssociationLoader>) {
        let conn = MockConnection::new();
        let dao = GenericDao::new(Arc::new(conn.clone()), false);
        (conn, dao, Arc::new(NoLoader))
    }

    #[test]
    fn find_by_id_builds_select() {
        let (conn, dao, loader) = setup();
        conn.state
            .lock()
            .query_results
            .push_back(vec![pet_row(1, "Rex", Some(7))]);

        let found = dao
            .find_by_id(EntityType::of::<Pet>(), &Value::BigInt(1), &loader)
            .unwrap()
            .unwrap();
        let pet = downcast_entity::<Pet>(found).unwrap();
        assert_eq!(pet.read().name, "Rex");
        assert_eq!(pet.read().owner.foreign_key().unwrap(), Value::BigInt(7));
        assert!(!pet.read().owner.is_loaded());

        let state = conn.state.lock();
        assert_eq!(
            state.executed[0],
            (
                "SELECT id, name, owner_id FROM pets WHERE id = ?".to_string(),
                vec![Value::BigInt(1)]
            )
        );
    }

    #[test]
    fn find_by_id_missing_row_is_none() {
        let (_conn, dao, loader) = setup();
        let found = dao
            .find_by_id(EntityType::of::<Pet>(), &Value::BigInt(42), &loader)
            .unwrap();
        assert!(found.is_none());
    }

    #[test]
    fn find_by_id_failure_names_entity_and_id() {
        let (conn, dao, loader) = setup();
        conn.state.lock().fail_on = Some("SELECT".to_string());
        let Err(err) = dao.find_by_id(EntityType::of::<Pet>(), &Value::BigInt(3), &loader) else {
            panic!("expected failure");
        };
        assert_eq!(err.kind(), ErrorKind::EntityQuery);
        let text = err.to_string();
        assert!(text.contains("Pet with id 3"));
        assert!(text.contains("FROM pets"));
    }

    #[test]
    fn save_writes_back_generated_key() {
        let (conn, dao, _loader) = setup();
        conn.state.lock().generated_keys.push_back(Value::BigInt(12));
        let pet = entity_ref(Pet {
            id: None,
            name: "Rex".into(),
            owner: ToOne::empty(),
        });

        dao.save(&*erase_entity(Arc::clone(&pet))).unwrap();
        assert_eq!(pet.read().id, Some(12));

        let state = conn.state.lock();
        assert_eq!(
            state.executed[0],
            (
                "INSERT INTO pets (name, owner_id) VALUES (?, ?)".to_string(),
                vec![Value::from("Rex"), Value::Null]
            )
        );
    }

    #[test]
    fn save_with_assigned_id_inserts_id_column() {
        let (conn, dao, _loader) = setup();
        let owner = entity_ref(Owner {
            id: Some(5),
            name: "Ann".into(),
            pets: Default::default(),
        });
        dao.save(&*erase_entity(owner)).unwrap();
        assert_eq!(
            conn.state.lock().statements(),
            vec!["INSERT INTO owners (id, name) VALUES (?, ?)".to_string()]
        );
    }

    #[test]
    fn save_rejects_unexpected_row_count() {
        for rows in [0, 2] {
            let (conn, dao, _loader) = setup();
            conn.state.lock().rows_affected.push_back(rows);
            let pet = erase_entity(entity_ref(Pet::default()));
            let err = dao.save(&*pet).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::EntityQuery);
            assert!(err.to_string().contains(&format!("affected {} rows", rows)));
        }
    }

    #[test]
    fn save_rejects_uncastable_key() {
        let (conn, dao, _loader) = setup();
        conn.state
            .lock()
            .generated_keys
            .push_back(Value::from("not-a-number"));
        let pet = erase_entity(entity_ref(Pet::default()));
        let err = dao.save(&*pet).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::EntityQuery);
        assert!(err.to_string().contains("does not fit identifier field"));
    }

    #[test]
    fn execute_update_binds_id_last() {
        let (conn, dao, _loader) = setup();
        let key = EntityKey::of::<Pet>(4_i64).unwrap();
        let rows = dao
            .execute_update(
                &key,
                &[
                    EntityPropertySnapshot::new("name", Value::from("Max")),
                    EntityPropertySnapshot::new("owner_id", Value::BigInt(2)),
                ],
            )
            .unwrap();
        assert_eq!(rows, 1);
        let state = conn.state.lock();
        assert_eq!(
            state.executed[0],
            (
                "UPDATE pets SET name = ?, owner_id = ? WHERE id = ?;".to_string(),
                vec![Value::from("Max"), Value::BigInt(2), Value::BigInt(4)]
            )
        );
    }

    #[test]
    fn delete_by_id() {
        let (conn, dao, _loader) = setup();
        let owner = erase_entity(entity_ref(Owner {
            id: Some(9),
            ..Default::default()
        }));
        dao.delete(&*owner).unwrap();
        assert_eq!(
            conn.state.lock().executed[0],
            (
                "DELETE FROM owners WHERE id = ?".to_string(),
                vec![Value::BigInt(9)]
            )
        );
    }

    #[test]
    fn associated_rows_load_by_join_column() {
        let (conn, dao, loader) = setup();
        conn.state
            .lock()
            .query_results
            .push_back(vec![pet_row(1, "Rex", Some(3)), pet_row(2, "Tom", Some(3))]);
        let owner = EntityMetadata::of::<Owner>().unwrap();
        let query = AssociationQuery::new(
            EntityType::of::<Pet>(),
            owner.associations()[0].source().clone(),
            Value::BigInt(3),
        );
        let pets = dao.find_associated(&query, &loader).unwrap();
        assert_eq!(pets.len(), 2);
        assert_eq!(
            conn.state.lock().statements(),
            vec!["SELECT id, name, owner_id FROM pets WHERE owner_id = ?".to_string()]
        );
    }

    #[test]
    fn join_table_select_shape() {
        let (conn, dao, loader) = setup();
        conn.state
            .lock()
            .query_results
            .push_back(vec![owner_row(1, "Ann")]);
        let owners = dao
            .find_all_by_join_table(
                EntityType::of::<Owner>(),
                "pet_owners",
                "pet_id",
                "owner_id",
                &Value::BigInt(8),
                &loader,
            )
            .unwrap();
        assert_eq!(owners.len(), 1);
        assert_eq!(
            conn.state.lock().statements(),
            vec![
                "SELECT t.id, t.name FROM owners t INNER JOIN pet_owners j ON t.id = j.owner_id WHERE j.pet_id = ?"
                    .to_string()
            ]
        );
    }
}
