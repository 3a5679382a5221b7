//! Session factory.

use crate::{Session, SessionConfig};
use bibernate_core::{ConnectionProvider, Entity, EntityMetadata, Error, MetadataRegistry, Result};
use std::fmt;
use std::sync::Arc;

/// Opens sessions over connections from a provider.
///
/// Entity types may be registered up front so that mapping mistakes surface
/// when the factory is built rather than on first use.
pub struct SessionFactory {
    provider: Arc<dyn ConnectionProvider>,
    config: SessionConfig,
    metadata: MetadataRegistry,
}

impl fmt::Debug for SessionFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionFactory")
            .field("config", &self.config)
            .field("entities", &self.metadata.len())
            .finish()
    }
}

impl SessionFactory {
    pub fn new(provider: Arc<dyn ConnectionProvider>, config: SessionConfig) -> Self {
        Self {
            provider,
            config,
            metadata: MetadataRegistry::new(),
        }
    }

    /// Resolve and record the metadata of `E`.
    pub fn register<E: Entity>(&self) -> Result<Arc<EntityMetadata>> {
        let metadata = self.metadata.register::<E>()?;
        tracing::debug!(
            entity = metadata.entity_type().name(),
            table = metadata.table_name(),
            "Registered entity"
        );
        Ok(metadata)
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn metadata(&self) -> &MetadataRegistry {
        &self.metadata
    }

    /// Open a session on a fresh connection.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn open_session(&self) -> Result<Session> {
        let connection = self
            .provider
            .connection()
            .map_err(|e| Error::wrap("Could not open connection", e))?;
        Ok(Session::new(connection, &self.config))
    }
}
