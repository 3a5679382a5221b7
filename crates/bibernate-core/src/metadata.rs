//! Entity metadata resolution.
//!
//! Turns an [`EntityMapping`] into resolved column names, the identifier
//! field, table/column/foreign-key descriptors and association descriptors.
//! Resolved metadata is cached process-wide per entity type.
//!
//! Defaulting rules:
//! - table name: explicit override, else the type's simple name
//! - column name: explicit override, else the field name
//! - join column of an owning to-one: explicit override, else `<field>_id`,
//!   typed like the referenced entity's identifier

use crate::Result;
use crate::entity::{Entity, EntityType};
use crate::error::Error;
use crate::mapping::{
    AssociationKind, AssociationMapping, CollectionKind, EntityMapping, FieldMapping,
};
use crate::types::SqlType;
use parking_lot::RwLock;
use rand::{Rng, distributions::Alphanumeric, thread_rng};
use regex::Regex;
use std::any::TypeId;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, OnceLock};

/// How a persistent field is stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// The identifier column
    Id,
    /// A plain column
    Simple,
    /// Join column of an owning to-one association to the given type
    ToOne(EntityType),
}

/// A persistent (column-backed) field.
#[derive(Debug, Clone)]
pub struct FieldMetadata {
    name: &'static str,
    column_name: String,
    sql_type: SqlType,
    kind: FieldKind,
}

impl FieldMetadata {
    /// Field name on the entity.
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn column_name(&self) -> &str {
        &self.column_name
    }

    /// Declared type; for a join column, the referenced identifier's type.
    pub fn sql_type(&self) -> SqlType {
        self.sql_type
    }

    pub fn kind(&self) -> FieldKind {
        self.kind
    }

    pub fn is_to_one(&self) -> bool {
        matches!(self.kind, FieldKind::ToOne(_))
    }
}

/// Where the rows of a non-owning association live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssociationSource {
    /// Target rows whose `column` references the owner's id.
    ForeignKey { column: String },
    /// Target rows linked through a join table.
    JoinTable {
        table: String,
        join_column: String,
        inverse_join_column: String,
    },
}

/// A collection-valued or inverse one-to-one association. These fields have
/// no column on the owner's table.
#[derive(Debug, Clone)]
pub struct AssociationMetadata {
    field: &'static str,
    kind: AssociationKind,
    target: EntityType,
    collection: CollectionKind,
    source: AssociationSource,
}

impl AssociationMetadata {
    pub fn field(&self) -> &'static str {
        self.field
    }

    pub fn kind(&self) -> AssociationKind {
        self.kind
    }

    pub fn target(&self) -> EntityType {
        self.target
    }

    pub fn collection(&self) -> CollectionKind {
        self.collection
    }

    pub fn source(&self) -> &AssociationSource {
        &self.source
    }
}

/// Column descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    /// Field name this column is derived from
    pub logical_name: String,
    pub name: String,
    pub sql_type_name: String,
    pub nullable: bool,
    pub unique: bool,
    pub length: Option<u32>,
    pub precision: Option<u8>,
    pub scale: Option<u8>,
    pub primary_key: bool,
}

/// Foreign key descriptor for an owning to-one join column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKey {
    pub table: String,
    pub column: String,
    pub referenced_table: String,
    /// Constraint identifier, `FK_` followed by 16 random alphanumerics
    pub constraint: String,
}

/// Table descriptor: columns and foreign keys, keyed by logical (field) name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Table {
    pub name: String,
    pub columns: Vec<Column>,
    pub foreign_keys: Vec<(String, ForeignKey)>,
}

impl Table {
    /// Column derived from field `logical_name`.
    pub fn column(&self, logical_name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.logical_name == logical_name)
    }

    /// Foreign key derived from field `logical_name`.
    pub fn foreign_key(&self, logical_name: &str) -> Option<&ForeignKey> {
        self.foreign_keys
            .iter()
            .find(|(name, _)| name == logical_name)
            .map(|(_, fk)| fk)
    }
}

/// Fully resolved metadata for one entity type.
#[derive(Debug, Clone)]
pub struct EntityMetadata {
    entity_type: EntityType,
    table: Table,
    fields: Vec<FieldMetadata>,
    id_index: usize,
    associations: Vec<AssociationMetadata>,
}

impl EntityMetadata {
    /// Resolved metadata for `E`, from the process-wide cache.
    pub fn of<E: Entity>() -> Result<Arc<EntityMetadata>> {
        resolve(EntityType::of::<E>())
    }

    pub fn entity_type(&self) -> EntityType {
        self.entity_type
    }

    pub fn table(&self) -> &Table {
        &self.table
    }

    pub fn table_name(&self) -> &str {
        &self.table.name
    }

    /// Persistent fields in declaration order, identifier included.
    pub fn fields(&self) -> &[FieldMetadata] {
        &self.fields
    }

    pub fn id_field(&self) -> &FieldMetadata {
        &self.fields[self.id_index]
    }

    /// Persistent fields other than the identifier.
    pub fn non_id_fields(&self) -> impl Iterator<Item = &FieldMetadata> {
        let id_index = self.id_index;
        self.fields
            .iter()
            .enumerate()
            .filter(move |(i, _)| *i != id_index)
            .map(|(_, f)| f)
    }

    /// Whether the type owns any to-one associations.
    pub fn has_to_one(&self) -> bool {
        self.fields.iter().any(FieldMetadata::is_to_one)
    }

    /// Collection-valued and inverse one-to-one associations.
    pub fn associations(&self) -> &[AssociationMetadata] {
        &self.associations
    }

    /// Column list for SELECT statements, in field order.
    pub fn column_names(&self) -> Vec<&str> {
        self.fields.iter().map(FieldMetadata::column_name).collect()
    }
}

type MetadataCache = RwLock<HashMap<TypeId, Arc<EntityMetadata>>>;

fn cache() -> &'static MetadataCache {
    static CACHE: OnceLock<MetadataCache> = OnceLock::new();
    CACHE.get_or_init(|| RwLock::new(HashMap::new()))
}

/// Resolve metadata for `entity_type`, consulting the process-wide cache.
///
/// Failed resolutions are not cached, so every request for a broken mapping
/// reports the same error.
pub fn resolve(entity_type: EntityType) -> Result<Arc<EntityMetadata>> {
    if let Some(found) = cache().read().get(&entity_type.type_id()) {
        return Ok(Arc::clone(found));
    }
    let resolved = Arc::new(build(entity_type)?);
    let mut cache = cache().write();
    let entry = cache
        .entry(entity_type.type_id())
        .or_insert_with(|| {
            tracing::debug!(
                entity = entity_type.name(),
                table = %resolved.table.name,
                columns = resolved.fields.len(),
                "Resolved entity metadata"
            );
            Arc::clone(&resolved)
        });
    Ok(Arc::clone(entry))
}

fn build(entity_type: EntityType) -> Result<EntityMetadata> {
    let entity = entity_type.name();
    let mapping = entity_type.mapping();
    if !mapping.entity {
        return Err(Error::entity_parse(
            entity,
            "type is not marked as an entity",
        ));
    }

    let table_name = table_name_of(entity_type, &mapping);
    validate_identifier(entity, "table", table_name)?;

    let id_fields: Vec<&FieldMapping> = mapping.fields.iter().filter(|f| f.id).collect();
    match id_fields.as_slice() {
        [] => return Err(Error::entity_parse(entity, "no identifier field declared")),
        [id] if !id.is_simple() => {
            return Err(Error::entity_parse(
                entity,
                format!("identifier field '{}' cannot be an association", id.name),
            ));
        }
        [_] => {}
        many => {
            let names: Vec<&str> = many.iter().map(|f| f.name).collect();
            return Err(Error::entity_parse(
                entity,
                format!("more than one identifier field declared: {}", names.join(", ")),
            ));
        }
    }

    let mut fields = Vec::new();
    let mut associations = Vec::new();
    let mut columns = Vec::new();
    let mut foreign_keys = Vec::new();
    let mut seen_fields = HashSet::new();
    let mut seen_columns = HashSet::new();
    let mut id_index = 0;

    for field in &mapping.fields {
        if !seen_fields.insert(field.name) {
            return Err(Error::entity_parse(
                entity,
                format!("field '{}' declared twice", field.name),
            ));
        }
        match &field.association {
            None => {
                let column_name = field.column.name.unwrap_or(field.name);
                validate_identifier(entity, "column", column_name)?;
                if field.id {
                    id_index = fields.len();
                }
                fields.push(FieldMetadata {
                    name: field.name,
                    column_name: column_name.to_string(),
                    sql_type: field.sql_type,
                    kind: if field.id { FieldKind::Id } else { FieldKind::Simple },
                });
                columns.push(Column {
                    logical_name: field.name.to_string(),
                    name: column_name.to_string(),
                    sql_type_name: field.sql_type.sql_name().to_string(),
                    nullable: field.column.nullable && !field.id,
                    unique: field.column.unique,
                    length: field.column.length,
                    precision: field.column.precision,
                    scale: field.column.scale,
                    primary_key: field.id,
                });
            }
            Some(association) if association.is_owning_to_one() => {
                let column_name = join_column_name(field);
                validate_identifier(entity, "join column", &column_name)?;
                let target = association.target;
                let target_mapping = target.mapping();
                let id_type = target_id_type(entity, field, target, &target_mapping)?;
                fields.push(FieldMetadata {
                    name: field.name,
                    column_name: column_name.clone(),
                    sql_type: id_type,
                    kind: FieldKind::ToOne(target),
                });
                columns.push(Column {
                    logical_name: field.name.to_string(),
                    name: column_name.clone(),
                    sql_type_name: id_type.sql_name().to_string(),
                    nullable: field.column.nullable,
                    unique: field.column.unique || association.kind == AssociationKind::OneToOne,
                    length: None,
                    precision: None,
                    scale: None,
                    primary_key: false,
                });
                foreign_keys.push((
                    field.name.to_string(),
                    ForeignKey {
                        table: table_name.to_string(),
                        column: column_name,
                        referenced_table: table_name_of(target, &target_mapping).to_string(),
                        constraint: constraint_name(),
                    },
                ));
            }
            Some(association) => {
                associations.push(resolve_association(entity_type, field, association)?);
            }
        }
    }

    for column in &columns {
        if !seen_columns.insert(column.name.to_ascii_lowercase()) {
            return Err(Error::entity_parse(
                entity,
                format!("column '{}' is mapped more than once", column.name),
            ));
        }
    }

    Ok(EntityMetadata {
        entity_type,
        table: Table {
            name: table_name.to_string(),
            columns,
            foreign_keys,
        },
        fields,
        id_index,
        associations,
    })
}

fn table_name_of(entity_type: EntityType, mapping: &EntityMapping) -> &'static str {
    mapping.table.unwrap_or(entity_type.name())
}

fn join_column_name(field: &FieldMapping) -> String {
    match field.column.name {
        Some(name) => name.to_string(),
        None => format!("{}_id", field.name),
    }
}

fn target_id_type(
    entity: &str,
    field: &FieldMapping,
    target: EntityType,
    target_mapping: &EntityMapping,
) -> Result<SqlType> {
    if !target_mapping.entity {
        return Err(Error::entity_parse(
            entity,
            format!(
                "association '{}' targets {}, which is not marked as an entity",
                field.name, target
            ),
        ));
    }
    target_mapping
        .fields
        .iter()
        .find(|f| f.id)
        .map(|f| f.sql_type)
        .ok_or_else(|| {
            Error::entity_parse(
                entity,
                format!(
                    "association '{}' targets {}, which declares no identifier",
                    field.name, target
                ),
            )
        })
}

fn resolve_association(
    owner: EntityType,
    field: &FieldMapping,
    association: &AssociationMapping,
) -> Result<AssociationMetadata> {
    let entity = owner.name();
    let target = association.target;
    let target_mapping = target.mapping();
    let collection = if association.kind.is_to_one() {
        CollectionKind::List
    } else {
        association.collection
    };

    let source = match (association.kind, association.mapped_by, association.join_table) {
        (AssociationKind::ManyToMany, None, Some(join_table)) => AssociationSource::JoinTable {
            table: join_table.name.to_string(),
            join_column: join_table.join_column.to_string(),
            inverse_join_column: join_table.inverse_join_column.to_string(),
        },
        (AssociationKind::ManyToMany, Some(mapped_by), _) => {
            let owning = inverse_side(entity, field, target, &target_mapping, mapped_by)?;
            let join_table = owning
                .association
                .as_ref()
                .filter(|a| a.kind == AssociationKind::ManyToMany && a.mapped_by.is_none())
                .and_then(|a| a.join_table);
            let Some(join_table) = join_table else {
                return Err(Error::entity_parse(
                    entity,
                    format!(
                        "association '{}' is mapped by {}.{}, which declares no join table",
                        field.name, target, mapped_by
                    ),
                ));
            };
            // the owning side's join column references it, so swap
            AssociationSource::JoinTable {
                table: join_table.name.to_string(),
                join_column: join_table.inverse_join_column.to_string(),
                inverse_join_column: join_table.join_column.to_string(),
            }
        }
        (AssociationKind::ManyToMany, None, None) => {
            return Err(Error::entity_parse(
                entity,
                format!("many-to-many association '{}' declares no join table", field.name),
            ));
        }
        (_, Some(mapped_by), _) => {
            let owning = inverse_side(entity, field, target, &target_mapping, mapped_by)?;
            let owns_column = owning
                .association
                .as_ref()
                .is_some_and(|a| a.is_owning_to_one() && a.target == owner);
            if !owns_column {
                return Err(Error::entity_parse(
                    entity,
                    format!(
                        "association '{}' is mapped by {}.{}, which is not a to-one reference to {}",
                        field.name, target, mapped_by, entity
                    ),
                ));
            }
            AssociationSource::ForeignKey {
                column: join_column_name(owning),
            }
        }
        (_, None, _) => {
            return Err(Error::entity_parse(
                entity,
                format!("one-to-many association '{}' declares no mapped_by field", field.name),
            ));
        }
    };

    if let AssociationSource::JoinTable {
        table,
        join_column,
        inverse_join_column,
    } = &source
    {
        validate_identifier(entity, "join table", table)?;
        validate_identifier(entity, "join column", join_column)?;
        validate_identifier(entity, "join column", inverse_join_column)?;
    }

    Ok(AssociationMetadata {
        field: field.name,
        kind: association.kind,
        target,
        collection,
        source,
    })
}

fn inverse_side<'m>(
    entity: &str,
    field: &FieldMapping,
    target: EntityType,
    target_mapping: &'m EntityMapping,
    mapped_by: &str,
) -> Result<&'m FieldMapping> {
    target_mapping
        .fields
        .iter()
        .find(|f| f.name == mapped_by)
        .ok_or_else(|| {
            Error::entity_parse(
                entity,
                format!(
                    "association '{}' is mapped by unknown field {}.{}",
                    field.name, target, mapped_by
                ),
            )
        })
}

fn constraint_name() -> String {
    let suffix: String = thread_rng()
        .sample_iter(&Alphanumeric)
        .take(16)
        .map(char::from)
        .collect();
    format!("FK_{}", suffix)
}

fn identifier_pattern() -> std::result::Result<&'static Regex, &'static regex::Error> {
    static PATTERN: OnceLock<std::result::Result<Regex, regex::Error>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$"))
        .as_ref()
}

fn validate_identifier(entity: &str, what: &str, name: &str) -> Result<()> {
    let pattern = identifier_pattern()
        .map_err(|e| Error::entity_parse(entity, format!("identifier pattern: {}", e)))?;
    if pattern.is_match(name) {
        Ok(())
    } else {
        Err(Error::entity_parse(
            entity,
            format!("{} name '{}' is not a valid SQL identifier", what, name),
        ))
    }
}

/// Eagerly resolved metadata for a known set of entity types.
#[derive(Debug, Default)]
pub struct MetadataRegistry {
    entities: RwLock<HashMap<TypeId, Arc<EntityMetadata>>>,
}

impl MetadataRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve and remember `E`. Mapping errors surface here.
    pub fn register<E: Entity>(&self) -> Result<Arc<EntityMetadata>> {
        self.register_type(EntityType::of::<E>())
    }

    pub fn register_type(&self, entity_type: EntityType) -> Result<Arc<EntityMetadata>> {
        let metadata = resolve(entity_type)?;
        self.entities
            .write()
            .insert(entity_type.type_id(), Arc::clone(&metadata));
        Ok(metadata)
    }

    pub fn get(&self, entity_type: EntityType) -> Option<Arc<EntityMetadata>> {
        self.entities.read().get(&entity_type.type_id()).cloned()
    }

    pub fn contains(&self, entity_type: EntityType) -> bool {
        self.entities.read().contains_key(&entity_type.type_id())
    }

    pub fn len(&self) -> usize {
        self.entities.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.read().is_empty()
    }

    /// Table descriptors of all registered types, ordered by table name.
    pub fn tables(&self) -> Vec<Table> {
        let mut tables: Vec<Table> = self
            .entities
            .read()
            .values()
            .map(|m| m.table.clone())
            .collect();
        tables.sort_by(|a, b| a.name.cmp(&b.name));
        tables
    }
}
