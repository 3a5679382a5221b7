//! Bibernate: a lightweight ORM session core for Rust.
//!
//! Bibernate maps plain structs to tables through hand-written [`Entity`]
//! descriptors and manages them in a [`Session`] that provides an identity
//! map, snapshot-based dirty checking and write-behind flushing.
//!
//! # Quick Start
//!
//! ```ignore
//! use bibernate::prelude::*;
//!
//! #[derive(Debug, Default)]
//! struct Person {
//!     id: Option<i64>,
//!     first_name: String,
//! }
//!
//! impl Entity for Person {
//!     fn mapping() -> EntityMapping {
//!         EntityMapping::entity()
//!             .table("persons")
//!             .field(FieldMapping::new("id", SqlType::BigInt).id())
//!             .field(FieldMapping::new("first_name", SqlType::Text))
//!     }
//!
//!     fn instantiate() -> Result<Self, InstantiationError> {
//!         Ok(Self::default())
//!     }
//!
//!     fn get_field(&self, field: &str) -> bibernate::Result<Value> {
//!         match field {
//!             "id" => Ok(self.id.into()),
//!             "first_name" => Ok(self.first_name.clone().into()),
//!             _ => Err(Error::unknown_field("Person", field)),
//!         }
//!     }
//!
//!     fn set_field(&mut self, field: &str, value: Value) -> bibernate::Result<()> {
//!         match field {
//!             "id" => self.id = value.try_into()?,
//!             "first_name" => self.first_name = value.try_into()?,
//!             _ => return Err(Error::unknown_field("Person", field)),
//!         }
//!         Ok(())
//!     }
//! }
//!
//! let provider = SqliteConnectionProvider::new(SqliteConfig::file("app.db"));
//! let factory = SessionFactory::new(Arc::new(provider), SessionConfig::default());
//! factory.register::<Person>()?;
//!
//! let session = factory.open_session()?;
//! let ann = entity_ref(Person { id: None, first_name: "Ann".into() });
//! session.persist(&ann)?;
//! ann.write().first_name = "Anna".into();
//! session.flush()?;
//! session.close()?;
//! ```
//!
//! # Crates
//!
//! - `bibernate-core`: values, rows, errors, connections, entity mapping
//!   and metadata, lazy association types
//! - `bibernate-session`: persistence context, DAO, action queue, session
//!   and transaction
//! - `bibernate-sqlite` (feature `sqlite`, on by default): SQLite driver

pub use bibernate_core::{
    AssociationBinding, AssociationError, AssociationErrorKind, AssociationKind,
    AssociationLoader, AssociationMetadata, AssociationSource, CollectionKind, Column,
    ColumnOptions, Connection, ConnectionProvider, Entity, EntityKey, EntityMapping,
    EntityMetadata, EntityPropertySnapshot, EntityRef, EntityRelationSnapshot, EntityType, Error,
    ErrorKind, FieldKind, FieldMapping, FieldMetadata, ForeignKey, InsertResult,
    InstantiationError, JoinTable, LazyList, LazySet, ManagedEntity, MetadataRegistry,
    QueryError, QueryErrorKind, Result, Row, SqlType, Table, ToOne, Value, downcast_entity,
    entity_ref, erase_entity,
};

pub use bibernate_session::{
    Action, ActionQueue, DeleteAction, GenericDao, InsertAction, PersistenceContext, SQL_TARGET,
    Session, SessionConfig, SessionFactory, Transaction, TransactionStatus, UpdateAction,
};

#[cfg(feature = "sqlite")]
pub use bibernate_sqlite::{OpenFlags, SqliteConfig, SqliteConnection, SqliteConnectionProvider};

/// Commonly used types.
///
/// ```ignore
/// use bibernate::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{
        // Mapping
        CollectionKind,
        Entity,
        EntityMapping,
        EntityRef,
        Error,
        FieldMapping,
        InstantiationError,
        JoinTable,
        // Associations
        LazyList,
        LazySet,
        SqlType,
        ToOne,
        Value,
        entity_ref,
        // Sessions
        Session,
        SessionConfig,
        SessionFactory,
        Transaction,
        TransactionStatus,
    };

    #[cfg(feature = "sqlite")]
    pub use crate::{SqliteConfig, SqliteConnectionProvider};

    pub use std::sync::Arc;
}
