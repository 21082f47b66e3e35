//! Domain entities that tasks refer to through `entity_type`/`entity_id` fields.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

/// A domain object a task can be about.
pub trait Entity: fmt::Debug + Send + Sync {
    /// Type name stored in the `entity_type` field.
    fn entity_type(&self) -> &str;

    /// Identifier stored in the `entity_id` field.
    fn identifier(&self) -> String;
}

/// Looks up entities of one type by identifier.
#[async_trait]
pub trait EntityFinder: Send + Sync {
    /// Returns the first entity with the given identifier, if any.
    async fn first_by_identifier(&self, identifier: &str) -> anyhow::Result<Option<Arc<dyn Entity>>>;
}

/// A reference to an entity by type and identifier.
///
/// Built from a live entity or from raw identifiers, so finders can filter
/// without loading the entity.
///
/// # Examples
///
/// ```
/// use hivework::EntityRef;
///
/// let by_id = EntityRef::new("RainbowLoom", "12");
/// assert_eq!(by_id.entity_type, "RainbowLoom");
/// assert_eq!(by_id.entity_id, "12");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EntityRef {
    /// Entity type name.
    pub entity_type: String,
    /// Entity identifier.
    pub entity_id: String,
}

impl EntityRef {
    /// Creates a reference from raw parts.
    pub fn new(entity_type: impl Into<String>, entity_id: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            entity_id: entity_id.into(),
        }
    }
}

impl From<&dyn Entity> for EntityRef {
    fn from(entity: &dyn Entity) -> Self {
        Self::new(entity.entity_type(), entity.identifier())
    }
}

impl From<&Arc<dyn Entity>> for EntityRef {
    fn from(entity: &Arc<dyn Entity>) -> Self {
        Self::from(entity.as_ref())
    }
}

impl<T: Into<String>, U: Into<String>> From<(T, U)> for EntityRef {
    fn from((entity_type, entity_id): (T, U)) -> Self {
        Self::new(entity_type, entity_id)
    }
}

/// Entity finders keyed by entity type name.
#[derive(Clone, Default)]
pub struct EntityRegistry {
    finders: HashMap<String, Arc<dyn EntityFinder>>,
}

impl fmt::Debug for EntityRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityRegistry")
            .field("types", &self.finders.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl EntityRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the finder for an entity type, replacing any previous one.
    pub fn register(&mut self, entity_type: impl Into<String>, finder: Arc<dyn EntityFinder>) {
        self.finders.insert(entity_type.into(), finder);
    }

    /// Returns the finder for an entity type.
    pub fn finder(&self, entity_type: &str) -> Option<&Arc<dyn EntityFinder>> {
        self.finders.get(entity_type)
    }
}
