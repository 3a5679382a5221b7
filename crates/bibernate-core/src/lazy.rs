//! Lazy association values.
//!
//! Association fields hold either already-loaded targets or a supplier that
//! produces them on first access. [`ToOne`] covers many-to-one and one-to-one
//! fields; [`LazyList`] and [`LazySet`] cover collection fields. Suppliers run
//! at most once per value: concurrent first accesses wait for the same call,
//! and a failed call leaves the value unloaded so the next access retries.
//!
//! Suppliers are created by [`AssociationBinding`], which the row mapper
//! hands to [`Entity::bind_association`](crate::Entity::bind_association).

use crate::Result;
use crate::entity::{
    Entity, EntityRef, EntityType, InstantiationError, ManagedEntity, downcast_entity,
};
use crate::error::{AssociationErrorKind, Error};
use crate::mapping::{AssociationKind, CollectionKind};
use crate::metadata::{AssociationMetadata, AssociationSource};
use crate::value::Value;
use once_cell::sync::OnceCell;
use std::fmt;
use std::sync::Arc;

type Supplier<T> = Arc<dyn Fn() -> Result<T> + Send + Sync>;

/// Loads association targets on behalf of lazy values.
///
/// Implemented by the session so that lazily loaded targets join the
/// session's identity map.
pub trait AssociationLoader: Send + Sync {
    /// Load the `target` instance with identifier `id`, or `None` if absent.
    fn load_one(&self, target: EntityType, id: &Value) -> Result<Option<Arc<dyn ManagedEntity>>>;

    /// Load all instances selected by `query`.
    fn load_many(&self, query: &AssociationQuery) -> Result<Vec<Arc<dyn ManagedEntity>>>;
}

/// Selection of the targets of a non-owning association for one owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssociationQuery {
    target: EntityType,
    source: AssociationSource,
    owner_id: Value,
}

impl AssociationQuery {
    pub fn new(target: EntityType, source: AssociationSource, owner_id: Value) -> Self {
        Self {
            target,
            source,
            owner_id,
        }
    }

    pub fn target(&self) -> EntityType {
        self.target
    }

    pub fn source(&self) -> &AssociationSource {
        &self.source
    }

    pub fn owner_id(&self) -> &Value {
        &self.owner_id
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BindingShape {
    ToOne,
    Collection(CollectionKind),
}

enum BindingSource {
    ForeignKey(Value),
    Query(AssociationQuery),
}

/// Everything needed to build the lazy value of one association field.
pub struct AssociationBinding {
    owner: EntityType,
    field: &'static str,
    target: EntityType,
    shape: BindingShape,
    source: BindingSource,
    loader: Arc<dyn AssociationLoader>,
}

impl fmt::Debug for AssociationBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AssociationBinding")
            .field("owner", &self.owner)
            .field("field", &self.field)
            .field("target", &self.target)
            .field("shape", &self.shape)
            .finish_non_exhaustive()
    }
}

impl AssociationBinding {
    /// Binding for an owning to-one field whose join column holds `foreign_key`.
    pub fn foreign_key(
        owner: EntityType,
        field: &'static str,
        target: EntityType,
        foreign_key: Value,
        loader: Arc<dyn AssociationLoader>,
    ) -> Self {
        Self {
            owner,
            field,
            target,
            shape: BindingShape::ToOne,
            source: BindingSource::ForeignKey(foreign_key),
            loader,
        }
    }

    /// Binding for a collection or inverse one-to-one field of the owner
    /// identified by `owner_id`.
    pub fn inverse(
        owner: EntityType,
        association: &AssociationMetadata,
        owner_id: Value,
        loader: Arc<dyn AssociationLoader>,
    ) -> Result<Self> {
        let shape = match association.kind() {
            AssociationKind::OneToOne | AssociationKind::ManyToOne => BindingShape::ToOne,
            AssociationKind::OneToMany | AssociationKind::ManyToMany => {
                match association.collection() {
                    CollectionKind::Other(name) => {
                        return Err(Error::association(
                            AssociationErrorKind::UnsupportedCollection,
                            owner.name(),
                            Some(association.field()),
                            format!(
                                "collection type {} is not supported, use a list or a set",
                                name
                            ),
                        ));
                    }
                    kind => BindingShape::Collection(kind),
                }
            }
        };
        Ok(Self {
            owner,
            field: association.field(),
            target: association.target(),
            shape,
            source: BindingSource::Query(AssociationQuery::new(
                association.target(),
                association.source().clone(),
                owner_id,
            )),
            loader,
        })
    }

    pub fn owner(&self) -> EntityType {
        self.owner
    }

    pub fn field(&self) -> &'static str {
        self.field
    }

    pub fn target(&self) -> EntityType {
        self.target
    }

    fn error(&self, kind: AssociationErrorKind, message: impl Into<String>) -> Error {
        Error::association(kind, self.owner.name(), Some(self.field), message)
    }

    fn check_target<T: Entity>(&self) -> Result<()> {
        if self.target.is::<T>() {
            Ok(())
        } else {
            Err(self.error(
                AssociationErrorKind::TargetMismatch,
                format!(
                    "association targets {}, not {}",
                    self.target,
                    EntityType::of::<T>()
                ),
            ))
        }
    }

    /// Build the lazy value of a to-one field.
    ///
    /// Fails if the target type cannot be instantiated: no no-argument
    /// constructor, abstract type, or a failing constructor.
    pub fn into_to_one<T: Entity>(self) -> Result<ToOne<T>> {
        self.check_target::<T>()?;
        if self.shape != BindingShape::ToOne {
            return Err(self.error(
                AssociationErrorKind::Mapping,
                "collection association cannot be bound to a single reference",
            ));
        }
        if let Err(e) = T::instantiate() {
            let message = match &e {
                InstantiationError::MissingConstructor => format!(
                    "cannot create lazy proxy: {} does not declare a no-argument constructor",
                    self.target
                ),
                InstantiationError::Abstract => format!(
                    "cannot create lazy proxy: {} is abstract",
                    self.target
                ),
                InstantiationError::ConstructorFailed(cause) => format!(
                    "cannot create lazy proxy: no-argument constructor of {} failed: {}",
                    self.target, cause
                ),
            };
            return Err(self.error(e.association_kind(), message));
        }

        let Self {
            owner,
            field,
            source,
            loader,
            ..
        } = self;
        match source {
            BindingSource::ForeignKey(foreign_key) if foreign_key.is_null() => Ok(ToOne::empty()),
            BindingSource::ForeignKey(foreign_key) => {
                let id = foreign_key.clone();
                let supplier: Supplier<Option<EntityRef<T>>> = Arc::new(move || {
                    tracing::debug!(
                        entity = owner.name(),
                        field,
                        id = %id,
                        "Loading lazy reference"
                    );
                    let loaded = loader
                        .load_one(EntityType::of::<T>(), &id)
                        .map_err(|e| load_error(owner, field, e))?;
                    loaded.map(|m| downcast_or_mismatch::<T>(owner, field, m)).transpose()
                });
                Ok(ToOne::lazy(foreign_key, supplier))
            }
            BindingSource::Query(query) => {
                let supplier: Supplier<Option<EntityRef<T>>> = Arc::new(move || {
                    tracing::debug!(
                        entity = owner.name(),
                        field,
                        owner_id = %query.owner_id(),
                        "Loading lazy inverse reference"
                    );
                    let loaded = loader
                        .load_many(&query)
                        .map_err(|e| load_error(owner, field, e))?;
                    loaded
                        .into_iter()
                        .next()
                        .map(|m| downcast_or_mismatch::<T>(owner, field, m))
                        .transpose()
                });
                Ok(ToOne::lazy(Value::Null, supplier))
            }
        }
    }

    /// Build the lazy value of a list-shaped collection field.
    pub fn into_list<T: Entity>(self) -> Result<LazyList<T>> {
        let supplier = self.collection_supplier::<T>(CollectionKind::List)?;
        Ok(LazyList::lazy(supplier))
    }

    /// Build the lazy value of a set-shaped collection field.
    pub fn into_set<T: Entity>(self) -> Result<LazySet<T>> {
        let supplier = self.collection_supplier::<T>(CollectionKind::Set)?;
        Ok(LazySet::lazy(supplier))
    }

    fn collection_supplier<T: Entity>(
        self,
        expected: CollectionKind,
    ) -> Result<Supplier<Vec<EntityRef<T>>>> {
        self.check_target::<T>()?;
        match self.shape {
            BindingShape::Collection(kind) if kind == expected => {}
            BindingShape::Collection(kind) => {
                return Err(self.error(
                    AssociationErrorKind::Mapping,
                    format!("association is declared as {:?}, not {:?}", kind, expected),
                ));
            }
            BindingShape::ToOne => {
                return Err(self.error(
                    AssociationErrorKind::Mapping,
                    "single reference cannot be bound to a collection",
                ));
            }
        }
        let Self {
            owner,
            field,
            source,
            loader,
            ..
        } = self;
        let BindingSource::Query(query) = source else {
            return Err(Error::association(
                AssociationErrorKind::Mapping,
                owner.name(),
                Some(field),
                "collection association has no owner query",
            ));
        };
        Ok(Arc::new(move || {
            tracing::debug!(
                entity = owner.name(),
                field,
                owner_id = %query.owner_id(),
                "Loading lazy collection"
            );
            loader
                .load_many(&query)
                .map_err(|e| load_error(owner, field, e))?
                .into_iter()
                .map(|m| downcast_or_mismatch::<T>(owner, field, m))
                .collect()
        }))
    }
}

fn load_error(owner: EntityType, field: &str, cause: Error) -> Error {
    // lifecycle failures keep their kind so callers can tell a closed session apart
    if matches!(cause, Error::IllegalState(_)) {
        return cause;
    }
    crate::error::AssociationError {
        kind: AssociationErrorKind::Load,
        entity: owner.name().to_string(),
        field: Some(field.to_string()),
        message: "failed to load association".to_string(),
        source: None,
    }
    .with_source(cause)
    .into()
}

fn downcast_or_mismatch<T: Entity>(
    owner: EntityType,
    field: &str,
    managed: Arc<dyn ManagedEntity>,
) -> Result<EntityRef<T>> {
    let actual = managed.entity_type();
    downcast_entity::<T>(managed).ok_or_else(|| {
        Error::association(
            AssociationErrorKind::TargetMismatch,
            owner.name(),
            Some(field),
            format!("loader returned {}, expected {}", actual, EntityType::of::<T>()),
        )
    })
}

fn id_of<T: Entity>(entity: &EntityRef<T>) -> Result<Value> {
    let managed: &dyn ManagedEntity = &**entity;
    managed.id()
}

enum ToOneState<T: Entity> {
    Empty,
    Loaded(EntityRef<T>),
    Unloaded {
        foreign_key: Value,
        cache: OnceCell<Option<EntityRef<T>>>,
        supplier: Supplier<Option<EntityRef<T>>>,
    },
}

/// A many-to-one or one-to-one association value.
///
/// The state moves one way from unloaded to loaded; [`set`](ToOne::set)
/// replaces it with a loaded value.
pub struct ToOne<T: Entity> {
    state: ToOneState<T>,
}

impl<T: Entity> ToOne<T> {
    /// A reference to nothing.
    pub fn empty() -> Self {
        Self {
            state: ToOneState::Empty,
        }
    }

    /// An already loaded reference.
    pub fn new(entity: EntityRef<T>) -> Self {
        Self {
            state: ToOneState::Loaded(entity),
        }
    }

    /// An unloaded reference to the target identified by `foreign_key`.
    pub fn lazy(
        foreign_key: Value,
        supplier: Arc<dyn Fn() -> Result<Option<EntityRef<T>>> + Send + Sync>,
    ) -> Self {
        Self {
            state: ToOneState::Unloaded {
                foreign_key,
                cache: OnceCell::new(),
                supplier,
            },
        }
    }

    /// The target, loading it on first call.
    pub fn resolve(&self) -> Result<Option<EntityRef<T>>> {
        match &self.state {
            ToOneState::Empty => Ok(None),
            ToOneState::Loaded(entity) => Ok(Some(Arc::clone(entity))),
            ToOneState::Unloaded {
                cache, supplier, ..
            } => cache.get_or_try_init(|| supplier()).cloned(),
        }
    }

    /// The target if it is already available, without loading.
    pub fn get(&self) -> Option<EntityRef<T>> {
        match &self.state {
            ToOneState::Empty => None,
            ToOneState::Loaded(entity) => Some(Arc::clone(entity)),
            ToOneState::Unloaded { cache, .. } => cache.get().cloned().flatten(),
        }
    }

    pub fn is_loaded(&self) -> bool {
        match &self.state {
            ToOneState::Empty | ToOneState::Loaded(_) => true,
            ToOneState::Unloaded { cache, .. } => cache.get().is_some(),
        }
    }

    /// Replace the reference.
    pub fn set(&mut self, entity: Option<EntityRef<T>>) {
        self.state = match entity {
            Some(entity) => ToOneState::Loaded(entity),
            None => ToOneState::Empty,
        };
    }

    /// Foreign-key value for the join column: the target's current id, or
    /// NULL when there is no target. Never triggers a load.
    pub fn foreign_key(&self) -> Result<Value> {
        match &self.state {
            ToOneState::Empty => Ok(Value::Null),
            ToOneState::Loaded(entity) => id_of(entity),
            ToOneState::Unloaded {
                foreign_key, cache, ..
            } => match cache.get() {
                Some(Some(entity)) => id_of(entity),
                Some(None) => Ok(Value::Null),
                None => Ok(foreign_key.clone()),
            },
        }
    }
}

impl<T: Entity> Default for ToOne<T> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<T: Entity> Clone for ToOne<T> {
    fn clone(&self) -> Self {
        let state = match &self.state {
            ToOneState::Empty => ToOneState::Empty,
            ToOneState::Loaded(entity) => ToOneState::Loaded(Arc::clone(entity)),
            ToOneState::Unloaded {
                foreign_key,
                cache,
                supplier,
            } => ToOneState::Unloaded {
                foreign_key: foreign_key.clone(),
                cache: cache.clone(),
                supplier: Arc::clone(supplier),
            },
        };
        Self { state }
    }
}

impl<T: Entity> fmt::Debug for ToOne<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.state {
            ToOneState::Empty => write!(f, "ToOne::Empty"),
            ToOneState::Loaded(_) => write!(f, "ToOne::Loaded({})", EntityType::of::<T>()),
            ToOneState::Unloaded { foreign_key, .. } => {
                write!(f, "ToOne::Unloaded({}#{})", EntityType::of::<T>(), foreign_key)
            }
        }
    }
}

/// Collection state. The supplier result is shared between clones, so
/// clones of an unloaded collection run the query at most once between them.
/// The first mutation gives a clone its own copy of the elements.
struct LazyItems<T: Entity> {
    fetched: Arc<OnceCell<Vec<EntityRef<T>>>>,
    owned: Option<Vec<EntityRef<T>>>,
    supplier: Option<Supplier<Vec<EntityRef<T>>>>,
    distinct: bool,
}

impl<T: Entity> LazyItems<T> {
    fn loaded(mut items: Vec<EntityRef<T>>, distinct: bool) -> Self {
        if distinct {
            dedup_by_identity(&mut items);
        }
        Self {
            fetched: Arc::new(OnceCell::new()),
            owned: Some(items),
            supplier: None,
            distinct,
        }
    }

    fn lazy(supplier: Supplier<Vec<EntityRef<T>>>, distinct: bool) -> Self {
        Self {
            fetched: Arc::new(OnceCell::new()),
            owned: None,
            supplier: Some(supplier),
            distinct,
        }
    }

    fn load(&self) -> Result<&Vec<EntityRef<T>>> {
        if let Some(items) = &self.owned {
            return Ok(items);
        }
        self.fetched.get_or_try_init(|| -> Result<Vec<EntityRef<T>>> {
            let mut items = match &self.supplier {
                Some(supplier) => supplier()?,
                None => Vec::new(),
            };
            if self.distinct {
                dedup_by_identity(&mut items);
            }
            Ok(items)
        })
    }

    fn load_mut(&mut self) -> Result<&mut Vec<EntityRef<T>>> {
        if self.owned.is_none() {
            let items = self.load()?.clone();
            self.owned = Some(items);
        }
        self.owned
            .as_mut()
            .ok_or_else(|| Error::illegal_state("lazy collection lost its contents"))
    }

    fn current(&self) -> Option<&Vec<EntityRef<T>>> {
        self.owned.as_ref().or_else(|| self.fetched.get())
    }

    fn is_loaded(&self) -> bool {
        self.current().is_some()
    }
}

impl<T: Entity> Clone for LazyItems<T> {
    fn clone(&self) -> Self {
        Self {
            fetched: Arc::clone(&self.fetched),
            owned: self.owned.clone(),
            supplier: self.supplier.clone(),
            distinct: self.distinct,
        }
    }
}

fn dedup_by_identity<T: Entity>(items: &mut Vec<EntityRef<T>>) {
    let mut kept: Vec<EntityRef<T>> = Vec::with_capacity(items.len());
    for item in items.drain(..) {
        if !kept.iter().any(|k| Arc::ptr_eq(k, &item)) {
            kept.push(item);
        }
    }
    *items = kept;
}

macro_rules! lazy_collection_common {
    ($ty:ident) => {
        impl<T: Entity> $ty<T> {
            /// A loaded collection with the given elements.
            pub fn new(items: Vec<EntityRef<T>>) -> Self {
                Self {
                    inner: LazyItems::loaded(items, Self::DISTINCT),
                }
            }

            /// An unloaded collection filled by `supplier` on first access.
            pub fn lazy(
                supplier: Arc<dyn Fn() -> Result<Vec<EntityRef<T>>> + Send + Sync>,
            ) -> Self {
                Self {
                    inner: LazyItems::lazy(supplier, Self::DISTINCT),
                }
            }

            pub fn is_loaded(&self) -> bool {
                self.inner.is_loaded()
            }

            /// Elements, loading them on first call.
            pub fn load(&self) -> Result<&[EntityRef<T>]> {
                self.inner.load().map(Vec::as_slice)
            }

            pub fn len(&self) -> Result<usize> {
                Ok(self.load()?.len())
            }

            pub fn is_empty(&self) -> Result<bool> {
                Ok(self.load()?.is_empty())
            }

            /// Whether this exact instance is an element.
            pub fn contains(&self, entity: &EntityRef<T>) -> Result<bool> {
                Ok(self.load()?.iter().any(|e| Arc::ptr_eq(e, entity)))
            }

            pub fn iter(&self) -> Result<std::slice::Iter<'_, EntityRef<T>>> {
                Ok(self.load()?.iter())
            }

            pub fn to_vec(&self) -> Result<Vec<EntityRef<T>>> {
                Ok(self.load()?.to_vec())
            }

            /// Remove this exact instance. Returns whether it was present.
            pub fn remove(&mut self, entity: &EntityRef<T>) -> Result<bool> {
                let items = self.inner.load_mut()?;
                match items.iter().position(|e| Arc::ptr_eq(e, entity)) {
                    Some(index) => {
                        items.remove(index);
                        Ok(true)
                    }
                    None => Ok(false),
                }
            }

            pub fn retain(&mut self, mut keep: impl FnMut(&EntityRef<T>) -> bool) -> Result<()> {
                self.inner.load_mut()?.retain(|e| keep(e));
                Ok(())
            }

            pub fn clear(&mut self) -> Result<()> {
                self.inner.load_mut()?.clear();
                Ok(())
            }
        }

        impl<T: Entity> Default for $ty<T> {
            fn default() -> Self {
                Self::new(Vec::new())
            }
        }

        impl<T: Entity> Clone for $ty<T> {
            fn clone(&self) -> Self {
                Self {
                    inner: self.inner.clone(),
                }
            }
        }

        impl<T: Entity> fmt::Debug for $ty<T> {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                match self.inner.current() {
                    Some(items) => write!(
                        f,
                        "{}<{}>[{} loaded]",
                        stringify!($ty),
                        EntityType::of::<T>(),
                        items.len()
                    ),
                    None => write!(
                        f,
                        "{}<{}>[unloaded]",
                        stringify!($ty),
                        EntityType::of::<T>()
                    ),
                }
            }
        }
    };
}

/// An ordered collection association; duplicates allowed.
pub struct LazyList<T: Entity> {
    inner: LazyItems<T>,
}

impl<T: Entity> LazyList<T> {
    const DISTINCT: bool = false;

    pub fn get(&self, index: usize) -> Result<Option<EntityRef<T>>> {
        Ok(self.load()?.get(index).cloned())
    }

    pub fn push(&mut self, entity: EntityRef<T>) -> Result<()> {
        self.inner.load_mut()?.push(entity);
        Ok(())
    }
}

lazy_collection_common!(LazyList);

/// An unordered collection association; each instance at most once.
pub struct LazySet<T: Entity> {
    inner: LazyItems<T>,
}

impl<T: Entity> LazySet<T> {
    const DISTINCT: bool = true;

    /// Add an instance. Returns false if it was already an element.
    pub fn insert(&mut self, entity: EntityRef<T>) -> Result<bool> {
        let items = self.inner.load_mut()?;
        if items.iter().any(|e| Arc::ptr_eq(e, &entity)) {
            return Ok(false);
        }
        items.push(entity);
        Ok(true)
    }
}

lazy_collection_common!(LazySet);
