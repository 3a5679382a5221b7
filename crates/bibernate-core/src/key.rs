//! Identity-map keys and dirty-checking snapshots.

use crate::entity::EntityType;
use crate::value::Value;
use std::fmt;

/// Identity of a persistent instance within one session: entity type plus id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EntityKey {
    entity_type: EntityType,
    id: Value,
}

impl EntityKey {
    pub fn new(entity_type: EntityType, id: Value) -> Self {
        Self { entity_type, id }
    }

    /// Key for `E` with the given id, normalized to the id field's declared type.
    pub fn of<E: crate::Entity>(id: impl Into<Value>) -> crate::Result<Self> {
        let entity_type = EntityType::of::<E>();
        let metadata = entity_type.metadata()?;
        let id = id.into().cast_to(metadata.id_field().sql_type())?;
        Ok(Self::new(entity_type, id))
    }

    pub fn entity_type(&self) -> EntityType {
        self.entity_type
    }

    pub fn id(&self) -> &Value {
        &self.id
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.entity_type, self.id)
    }
}

/// Value of one simple column captured at a point in time.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EntityPropertySnapshot {
    column: String,
    value: Value,
}

impl EntityPropertySnapshot {
    pub fn new(column: impl Into<String>, value: Value) -> Self {
        Self {
            column: column.into(),
            value,
        }
    }

    pub fn column(&self) -> &str {
        &self.column
    }

    pub fn value(&self) -> &Value {
        &self.value
    }
}

/// Foreign-key value of one to-one association captured at a point in time.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EntityRelationSnapshot {
    relation_type: EntityType,
    column: String,
    value: Value,
}

impl EntityRelationSnapshot {
    pub fn new(relation_type: EntityType, column: impl Into<String>, value: Value) -> Self {
        Self {
            relation_type,
            column: column.into(),
            value,
        }
    }

    /// The referenced entity type.
    pub fn relation_type(&self) -> EntityType {
        self.relation_type
    }

    pub fn column(&self) -> &str {
        &self.column
    }

    pub fn value(&self) -> &Value {
        &self.value
    }
}

/// Compare two relation snapshot lists as unordered multisets.
pub fn same_relations(a: &[EntityRelationSnapshot], b: &[EntityRelationSnapshot]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut remaining: Vec<&EntityRelationSnapshot> = b.iter().collect();
    for snapshot in a {
        match remaining.iter().position(|other| *other == snapshot) {
            Some(index) => {
                remaining.swap_remove(index);
            }
            None => return false,
        }
    }
    true
}
