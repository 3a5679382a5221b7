//! Core types and traits for Bibernate.
//!
//! This crate provides the foundations the session layer builds on:
//!
//! - `Value`, `SqlType` and `Row` for moving data in and out of the database
//! - `Connection` and `ConnectionProvider` for synchronous database access
//! - `Entity` descriptors and the declarative `EntityMapping`
//! - resolved `EntityMetadata` with table, column and foreign-key descriptors
//! - `EntityKey` and the snapshots used for dirty checking
//! - lazy association values (`ToOne`, `LazyList`, `LazySet`)

pub mod connection;
pub mod entity;
pub mod error;
pub mod key;
pub mod lazy;
pub mod mapping;
pub mod metadata;
pub mod row;
pub mod types;
pub mod value;

pub use connection::{Connection, ConnectionProvider, InsertResult};
pub use entity::{
    Entity, EntityRef, EntityType, InstantiationError, ManagedEntity, downcast_entity, entity_ref,
    erase_entity, hydrate,
};
pub use error::{
    AssociationError, AssociationErrorKind, Error, ErrorKind, QueryError, QueryErrorKind, Result,
};
pub use key::{EntityKey, EntityPropertySnapshot, EntityRelationSnapshot, same_relations};
pub use lazy::{AssociationBinding, AssociationLoader, AssociationQuery, LazyList, LazySet, ToOne};
pub use mapping::{
    AssociationKind, AssociationMapping, CollectionKind, ColumnOptions, EntityMapping,
    FieldMapping, JoinTable,
};
pub use metadata::{
    AssociationMetadata, AssociationSource, Column, EntityMetadata, FieldKind, FieldMetadata,
    ForeignKey, MetadataRegistry, Table,
};
pub use row::{ColumnInfo, FromValue, Row};
pub use types::SqlType;
pub use value::Value;
