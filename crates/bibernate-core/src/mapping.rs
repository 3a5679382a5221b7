//! Declarative entity mapping.
//!
//! Each entity type describes itself with an [`EntityMapping`]: an entity
//! marker, an optional table name, and its fields in declaration order. The
//! metadata resolver turns a mapping into table, column and foreign-key
//! descriptors, applying the defaulting rules (table name from the type name,
//! column name from the field name, `_id` suffix for join columns).
//!
//! ```ignore
//! fn mapping() -> EntityMapping {
//!     EntityMapping::entity()
//!         .table("persons")
//!         .field(FieldMapping::new("id", SqlType::BigInt).id())
//!         .field(FieldMapping::new("first_name", SqlType::Text).length(100))
//!         .field(FieldMapping::many_to_one::<Address>("address"))
//!         .field(FieldMapping::one_to_many::<Note>("notes", "person"))
//! }
//! ```

use crate::entity::{Entity, EntityType};
use crate::types::SqlType;

/// Mapping configuration for one entity type.
#[derive(Debug, Clone)]
pub struct EntityMapping {
    /// Whether the type carries the entity marker
    pub entity: bool,
    /// Explicit table name override
    pub table: Option<&'static str>,
    /// Fields in declaration order
    pub fields: Vec<FieldMapping>,
}

impl EntityMapping {
    /// Start a mapping for a type marked as an entity.
    pub fn entity() -> Self {
        Self {
            entity: true,
            table: None,
            fields: Vec::new(),
        }
    }

    /// Start a mapping for a type without the entity marker.
    ///
    /// Resolution of such a type always fails; this exists so that plain
    /// value types can share the accessor machinery.
    pub fn unmarked() -> Self {
        Self {
            entity: false,
            table: None,
            fields: Vec::new(),
        }
    }

    /// Override the table name.
    pub fn table(mut self, name: &'static str) -> Self {
        self.table = Some(name);
        self
    }

    /// Append a field.
    pub fn field(mut self, field: FieldMapping) -> Self {
        self.fields.push(field);
        self
    }
}

/// Column options for a mapped field.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ColumnOptions {
    /// Explicit column name override
    pub name: Option<&'static str>,
    /// Whether the column accepts NULL
    pub nullable: bool,
    /// Whether the column has a unique constraint
    pub unique: bool,
    /// Maximum length for character columns
    pub length: Option<u32>,
    /// Precision for DECIMAL columns (total digits)
    pub precision: Option<u8>,
    /// Scale for DECIMAL columns (digits after the decimal point)
    pub scale: Option<u8>,
}

/// Mapping for a single field.
#[derive(Debug, Clone)]
pub struct FieldMapping {
    /// Rust field name
    pub name: &'static str,
    /// Declared SQL type (ignored for to-one fields, which take the target's id type)
    pub sql_type: SqlType,
    /// Whether this field carries the identifier marker
    pub id: bool,
    /// Column options
    pub column: ColumnOptions,
    /// Association marker, if any
    pub association: Option<AssociationMapping>,
}

impl FieldMapping {
    /// Create a simple (non-association) field mapping.
    pub const fn new(name: &'static str, sql_type: SqlType) -> Self {
        Self {
            name,
            sql_type,
            id: false,
            column: ColumnOptions {
                name: None,
                nullable: true,
                unique: false,
                length: None,
                precision: None,
                scale: None,
            },
            association: None,
        }
    }

    /// Mark this field as the identifier.
    pub const fn id(mut self) -> Self {
        self.id = true;
        self
    }

    /// Override the column name.
    pub const fn column(mut self, name: &'static str) -> Self {
        self.column.name = Some(name);
        self
    }

    /// Set whether the column accepts NULL.
    pub const fn nullable(mut self, nullable: bool) -> Self {
        self.column.nullable = nullable;
        self
    }

    /// Add a unique constraint.
    pub const fn unique(mut self) -> Self {
        self.column.unique = true;
        self
    }

    /// Set the maximum length.
    pub const fn length(mut self, length: u32) -> Self {
        self.column.length = Some(length);
        self
    }

    /// Set precision and scale for DECIMAL columns.
    pub const fn decimal(mut self, precision: u8, scale: u8) -> Self {
        self.column.precision = Some(precision);
        self.column.scale = Some(scale);
        self
    }

    /// A many-to-one association; owns a join column named `<field>_id`.
    pub fn many_to_one<T: Entity>(name: &'static str) -> Self {
        Self::association(name, AssociationMapping::new(AssociationKind::ManyToOne, EntityType::of::<T>()))
    }

    /// A one-to-one association; owns a join column unless `mapped_by` is set.
    pub fn one_to_one<T: Entity>(name: &'static str) -> Self {
        Self::association(name, AssociationMapping::new(AssociationKind::OneToOne, EntityType::of::<T>()))
    }

    /// A one-to-many collection, loaded through the target's `mapped_by` field.
    pub fn one_to_many<T: Entity>(name: &'static str, mapped_by: &'static str) -> Self {
        Self::association(name, AssociationMapping::new(AssociationKind::OneToMany, EntityType::of::<T>()))
            .mapped_by(mapped_by)
    }

    /// A many-to-many collection, loaded through `join_table`.
    pub fn many_to_many<T: Entity>(name: &'static str, join_table: JoinTable) -> Self {
        let mut field = Self::association(
            name,
            AssociationMapping::new(AssociationKind::ManyToMany, EntityType::of::<T>()),
        );
        if let Some(association) = field.association.as_mut() {
            association.join_table = Some(join_table);
        }
        field
    }

    /// The inverse side of a many-to-many declared on the target's `mapped_by` field.
    pub fn many_to_many_inverse<T: Entity>(name: &'static str, mapped_by: &'static str) -> Self {
        Self::association(
            name,
            AssociationMapping::new(AssociationKind::ManyToMany, EntityType::of::<T>()),
        )
        .mapped_by(mapped_by)
    }

    fn association(name: &'static str, association: AssociationMapping) -> Self {
        let mut field = Self::new(name, SqlType::BigInt);
        field.association = Some(association);
        field
    }

    /// Override the join column name of an owning to-one association.
    pub const fn join_column(self, name: &'static str) -> Self {
        self.column(name)
    }

    /// Declare the association as the inverse side of the target's `field`.
    pub fn mapped_by(mut self, field: &'static str) -> Self {
        if let Some(association) = self.association.as_mut() {
            association.mapped_by = Some(field);
        }
        self
    }

    /// Declare the container shape of a collection association.
    pub fn collection(mut self, kind: CollectionKind) -> Self {
        if let Some(association) = self.association.as_mut() {
            association.collection = kind;
        }
        self
    }

    /// Whether this field carries no association marker.
    pub fn is_simple(&self) -> bool {
        self.association.is_none()
    }
}

/// Kind of association between two entities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AssociationKind {
    OneToOne,
    ManyToOne,
    OneToMany,
    ManyToMany,
}

impl AssociationKind {
    /// Whether the association refers to at most one target.
    pub const fn is_to_one(self) -> bool {
        matches!(self, AssociationKind::OneToOne | AssociationKind::ManyToOne)
    }

    /// Whether the association is collection-valued.
    pub const fn is_collection(self) -> bool {
        !self.is_to_one()
    }
}

/// Container shape of a collection-valued association field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionKind {
    /// Ordered, duplicates allowed
    List,
    /// Unordered, each entity at most once
    Set,
    /// Any other container; named for diagnostics and rejected at load time
    Other(&'static str),
}

/// Link table backing a many-to-many association.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JoinTable {
    /// Link table name
    pub name: &'static str,
    /// Column referencing the owning side
    pub join_column: &'static str,
    /// Column referencing the target side
    pub inverse_join_column: &'static str,
}

impl JoinTable {
    pub const fn new(
        name: &'static str,
        join_column: &'static str,
        inverse_join_column: &'static str,
    ) -> Self {
        Self {
            name,
            join_column,
            inverse_join_column,
        }
    }
}

/// Association marker on a field.
#[derive(Debug, Clone)]
pub struct AssociationMapping {
    pub kind: AssociationKind,
    pub target: EntityType,
    pub mapped_by: Option<&'static str>,
    pub collection: CollectionKind,
    pub join_table: Option<JoinTable>,
}

impl AssociationMapping {
    pub fn new(kind: AssociationKind, target: EntityType) -> Self {
        Self {
            kind,
            target,
            mapped_by: None,
            collection: CollectionKind::List,
            join_table: None,
        }
    }

    /// Whether this side owns a join column.
    pub fn is_owning_to_one(&self) -> bool {
        self.kind.is_to_one() && self.mapped_by.is_none()
    }
}
