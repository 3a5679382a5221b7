//! Entity descriptors and type-erased entity handles.
//!
//! An [`Entity`] exposes its mapping plus typed accessors by field name; the
//! session core never touches entity structs any other way. Live instances
//! are shared as [`EntityRef`] so the application and the persistence
//! context observe the same state.

use crate::Result;
use crate::error::{AssociationErrorKind, Error};
use crate::key::{EntityKey, EntityPropertySnapshot, EntityRelationSnapshot};
use crate::lazy::{AssociationBinding, AssociationLoader};
use crate::mapping::EntityMapping;
use crate::metadata::{self, EntityMetadata, FieldKind};
use crate::row::Row;
use crate::value::Value;
use parking_lot::RwLock;
use std::any::{Any, TypeId};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Shared, lockable handle to a live entity instance.
pub type EntityRef<E> = Arc<RwLock<E>>;

/// Wrap an entity so it can be handed to a session.
pub fn entity_ref<E: Entity>(entity: E) -> EntityRef<E> {
    Arc::new(RwLock::new(entity))
}

/// Why an entity type could not be instantiated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstantiationError {
    /// The type declares no no-argument constructor
    MissingConstructor,
    /// The type is abstract
    Abstract,
    /// The no-argument constructor failed
    ConstructorFailed(String),
}

impl fmt::Display for InstantiationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstantiationError::MissingConstructor => {
                write!(f, "type does not declare a no-argument constructor")
            }
            InstantiationError::Abstract => write!(f, "type is abstract"),
            InstantiationError::ConstructorFailed(msg) => {
                write!(f, "no-argument constructor failed: {}", msg)
            }
        }
    }
}

impl InstantiationError {
    /// The association error kind used when a lazy proxy cannot be built.
    pub fn association_kind(&self) -> AssociationErrorKind {
        match self {
            InstantiationError::MissingConstructor => AssociationErrorKind::MissingConstructor,
            InstantiationError::Abstract => AssociationErrorKind::AbstractType,
            InstantiationError::ConstructorFailed(_) => AssociationErrorKind::ConstructorFailed,
        }
    }
}

/// A persistent type.
///
/// Implementations are hand-written descriptors: the mapping declares table,
/// columns and associations, and the accessors move field state in and out
/// as [`Value`]s.
pub trait Entity: Send + Sync + Sized + 'static {
    /// Declarative mapping for this type.
    fn mapping() -> EntityMapping;

    /// The no-argument constructor used when mapping rows.
    fn instantiate() -> std::result::Result<Self, InstantiationError> {
        Err(InstantiationError::MissingConstructor)
    }

    /// Read a simple field or the identifier. For a to-one association field,
    /// return the foreign key (the referenced entity's id, or NULL).
    fn get_field(&self, field: &str) -> Result<Value>;

    /// Write a simple field or the identifier.
    fn set_field(&mut self, field: &str, value: Value) -> Result<()>;

    /// Install a lazy proxy into an association field.
    fn bind_association(&mut self, field: &str, binding: AssociationBinding) -> Result<()> {
        let _ = binding;
        Err(Error::unknown_field(EntityType::of::<Self>().name(), field))
    }
}

/// Copyable handle to an entity type, usable without naming the type.
#[derive(Clone, Copy)]
pub struct EntityType {
    type_id: TypeId,
    name: &'static str,
    mapping: fn() -> EntityMapping,
    probe: fn() -> std::result::Result<(), InstantiationError>,
    hydrate: fn(&Row, &Arc<dyn AssociationLoader>) -> Result<Arc<dyn ManagedEntity>>,
}

impl EntityType {
    /// The handle for `E`.
    pub fn of<E: Entity>() -> Self {
        Self {
            type_id: TypeId::of::<E>(),
            name: simple_type_name::<E>(),
            mapping: E::mapping,
            probe: probe_instantiate::<E>,
            hydrate: hydrate_erased::<E>,
        }
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    /// Simple (unqualified) type name.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// The declarative mapping.
    pub fn mapping(&self) -> EntityMapping {
        (self.mapping)()
    }

    /// Resolved metadata, cached per type.
    pub fn metadata(&self) -> Result<Arc<EntityMetadata>> {
        metadata::resolve(*self)
    }

    /// Check that the type can be instantiated without building an instance
    /// that escapes.
    pub fn check_instantiable(&self) -> std::result::Result<(), InstantiationError> {
        (self.probe)()
    }

    /// Map a result row to a new, untracked instance.
    pub fn hydrate(
        &self,
        row: &Row,
        loader: &Arc<dyn AssociationLoader>,
    ) -> Result<Arc<dyn ManagedEntity>> {
        (self.hydrate)(row, loader)
    }

    pub fn is<E: Entity>(&self) -> bool {
        self.type_id == TypeId::of::<E>()
    }
}

impl PartialEq for EntityType {
    fn eq(&self, other: &Self) -> bool {
        self.type_id == other.type_id
    }
}

impl Eq for EntityType {}

impl Hash for EntityType {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.type_id.hash(state);
    }
}

impl fmt::Debug for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

fn simple_type_name<E>() -> &'static str {
    let full = std::any::type_name::<E>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

fn probe_instantiate<E: Entity>() -> std::result::Result<(), InstantiationError> {
    E::instantiate().map(|_| ())
}

fn hydrate_erased<E: Entity>(
    row: &Row,
    loader: &Arc<dyn AssociationLoader>,
) -> Result<Arc<dyn ManagedEntity>> {
    let entity: E = hydrate(row, loader)?;
    Ok(entity_ref(entity))
}

/// Map a result row into a fresh `E`.
///
/// Simple columns are read by name, falling back to select-list position,
/// and cast to the declared field type. Association fields receive lazy
/// bindings that load through `loader` on first access.
pub fn hydrate<E: Entity>(row: &Row, loader: &Arc<dyn AssociationLoader>) -> Result<E> {
    let metadata = EntityMetadata::of::<E>()?;
    let entity_name = metadata.entity_type().name();
    let mut entity = E::instantiate().map_err(|e| {
        Error::entity_query(entity_name, format!("cannot instantiate entity: {}", e))
    })?;

    let mut owner_id = Value::Null;
    for (position, field) in metadata.fields().iter().enumerate() {
        let raw = row
            .get_named_or_at(field.column_name(), position)
            .cloned()
            .ok_or_else(|| {
                Error::entity_query(
                    entity_name,
                    format!("result set has no column '{}'", field.column_name()),
                )
            })?;
        match field.kind() {
            FieldKind::Id | FieldKind::Simple => {
                let value = raw.cast_to(field.sql_type()).map_err(|e| {
                    mapping_error(entity_name, field.name(), e)
                })?;
                if field.kind() == FieldKind::Id {
                    owner_id = value.clone();
                }
                entity
                    .set_field(field.name(), value)
                    .map_err(|e| mapping_error(entity_name, field.name(), e))?;
            }
            FieldKind::ToOne(target) => {
                let foreign_key = raw.cast_to(field.sql_type()).map_err(|e| {
                    mapping_error(entity_name, field.name(), e)
                })?;
                let binding = AssociationBinding::foreign_key(
                    metadata.entity_type(),
                    field.name(),
                    target,
                    foreign_key,
                    Arc::clone(loader),
                );
                entity.bind_association(field.name(), binding)?;
            }
        }
    }

    for association in metadata.associations() {
        let binding = AssociationBinding::inverse(
            metadata.entity_type(),
            association,
            owner_id.clone(),
            Arc::clone(loader),
        )?;
        entity.bind_association(association.field(), binding)?;
    }

    Ok(entity)
}

fn mapping_error(entity: &str, field: &str, cause: Error) -> Error {
    crate::error::EntityQueryError {
        entity: entity.to_string(),
        id: None,
        sql: None,
        message: format!("cannot map column into field '{}'", field),
        source: None,
    }
    .with_source(cause)
    .into()
}

/// Object-safe view of a live entity, used where the concrete type is not
/// known statically (the persistence context, action execution, lazy loading).
pub trait ManagedEntity: Send + Sync {
    /// The entity's type handle.
    fn entity_type(&self) -> EntityType;

    /// Read one field.
    fn get_field(&self, field: &str) -> Result<Value>;

    /// Read several fields under a single lock acquisition.
    fn get_fields(&self, fields: &[&str]) -> Result<Vec<Value>>;

    /// Write one field.
    fn set_field(&self, field: &str, value: Value) -> Result<()>;

    /// Convert into `Arc<dyn Any>` for downcasting back to `EntityRef<E>`.
    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;

    /// Resolved metadata for this entity's type.
    fn metadata(&self) -> Result<Arc<EntityMetadata>> {
        self.entity_type().metadata()
    }

    /// Current identifier value, normalized to the id field's declared type.
    fn id(&self) -> Result<Value> {
        let metadata = self.metadata()?;
        let id_field = metadata.id_field();
        self.get_field(id_field.name())?.cast_to(id_field.sql_type())
    }

    /// Identity-map key for this entity.
    fn key(&self) -> Result<EntityKey> {
        Ok(EntityKey::new(self.entity_type(), self.id()?))
    }

    /// Current values of all simple (non-association) columns, in declared order.
    fn property_snapshots(&self) -> Result<Vec<EntityPropertySnapshot>> {
        let metadata = self.metadata()?;
        let fields: Vec<_> = metadata
            .fields()
            .iter()
            .filter(|f| f.kind() != FieldKind::Id && !f.is_to_one())
            .collect();
        let names: Vec<&str> = fields.iter().map(|f| f.name()).collect();
        let values = self.get_fields(&names)?;
        Ok(fields
            .iter()
            .zip(values)
            .map(|(f, v)| EntityPropertySnapshot::new(f.column_name(), v))
            .collect())
    }

    /// Current foreign-key values of all owning to-one associations.
    fn relation_snapshots(&self) -> Result<Vec<EntityRelationSnapshot>> {
        let metadata = self.metadata()?;
        let mut snapshots = Vec::new();
        for field in metadata.fields() {
            if let FieldKind::ToOne(target) = field.kind() {
                let value = self.get_field(field.name())?.cast_to(field.sql_type())?;
                snapshots.push(EntityRelationSnapshot::new(target, field.column_name(), value));
            }
        }
        Ok(snapshots)
    }
}

impl<E: Entity> ManagedEntity for RwLock<E> {
    fn entity_type(&self) -> EntityType {
        EntityType::of::<E>()
    }

    fn get_field(&self, field: &str) -> Result<Value> {
        self.read_recursive().get_field(field)
    }

    fn get_fields(&self, fields: &[&str]) -> Result<Vec<Value>> {
        let guard = self.read_recursive();
        fields.iter().map(|f| guard.get_field(f)).collect()
    }

    fn set_field(&self, field: &str, value: Value) -> Result<()> {
        self.write().set_field(field, value)
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

/// Recover the typed handle from an erased one.
pub fn downcast_entity<E: Entity>(managed: Arc<dyn ManagedEntity>) -> Option<EntityRef<E>> {
    managed.into_any().downcast::<RwLock<E>>().ok()
}

/// Erase a typed handle.
pub fn erase_entity<E: Entity>(entity: EntityRef<E>) -> Arc<dyn ManagedEntity> {
    entity
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::FieldMapping;
    use crate::types::SqlType;

    #[derive(Debug, Default)]
    struct Gadget {
        id: Option<i64>,
        label: String,
    }

    impl Entity for Gadget {
        fn mapping() -> EntityMapping {
            EntityMapping::entity()
                .field(FieldMapping::new("id", SqlType::BigInt).id())
                .field(FieldMapping::new("label", SqlType::Text))
        }

        fn instantiate() -> std::result::Result<Self, InstantiationError> {
            Ok(Self::default())
        }

        fn get_field(&self, field: &str) -> Result<Value> {
            match field {
                "id" => Ok(self.id.into()),
                "label" => Ok(self.label.clone().into()),
                _ => Err(Error::unknown_field("Gadget", field)),
            }
        }

        fn set_field(&mut self, field: &str, value: Value) -> Result<()> {
            match field {
                "id" => self.id = value.try_into()?,
                "label" => self.label = value.try_into()?,
                _ => return Err(Error::unknown_field("Gadget", field)),
            }
            Ok(())
        }
    }

    struct Sealed;

    impl Entity for Sealed {
        fn mapping() -> EntityMapping {
            EntityMapping::entity().field(FieldMapping::new("id", SqlType::BigInt).id())
        }

        fn get_field(&self, field: &str) -> Result<Value> {
            Err(Error::unknown_field("Sealed", field))
        }

        fn set_field(&mut self, field: &str, _value: Value) -> Result<()> {
            Err(Error::unknown_field("Sealed", field))
        }
    }

    #[test]
    fn entity_type_uses_simple_name() {
        let ty = EntityType::of::<Gadget>();
        assert_eq!(ty.name(), "Gadget");
        assert!(ty.is::<Gadget>());
        assert!(!ty.is::<Sealed>());
        assert_eq!(ty, EntityType::of::<Gadget>());
    }

    #[test]
    fn default_instantiate_reports_missing_constructor() {
        let ty = EntityType::of::<Sealed>();
        assert_eq!(
            ty.check_instantiable(),
            Err(InstantiationError::MissingConstructor)
        );
        assert!(EntityType::of::<Gadget>().check_instantiable().is_ok());
    }

    #[test]
    fn managed_entity_roundtrip_through_any() {
        let gadget = entity_ref(Gadget {
            id: Some(3),
            label: "lamp".into(),
        });
        let managed = erase_entity(Arc::clone(&gadget));
        assert_eq!(managed.id().unwrap(), Value::BigInt(3));
        managed.set_field("label", Value::from("desk")).unwrap();
        assert_eq!(gadget.read().label, "desk");

        let back = downcast_entity::<Gadget>(managed).unwrap();
        assert!(Arc::ptr_eq(&back, &gadget));
    }

    #[test]
    fn downcast_to_wrong_type_fails() {
        let managed = erase_entity(entity_ref(Gadget::default()));
        assert!(downcast_entity::<Sealed>(managed).is_none());
    }

    #[test]
    fn property_snapshots_skip_identifier() {
        let managed = erase_entity(entity_ref(Gadget {
            id: Some(1),
            label: "lamp".into(),
        }));
        let snapshots = managed.property_snapshots().unwrap();
        assert_eq!(
            snapshots,
            vec![EntityPropertySnapshot::new("label", Value::from("lamp"))]
        );
        assert!(managed.relation_snapshots().unwrap().is_empty());
    }

    #[test]
    fn unknown_field_names_entity() {
        let sealed = Sealed;
        let err = sealed.get_field("id").unwrap_err();
        assert!(err.to_string().contains("Sealed.id"));
    }
}
