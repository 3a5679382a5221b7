//! Session configuration.

use bibernate_core::Result;
use bibernate_core::error::{ConfigError, Error};
use serde::{Deserialize, Serialize};

/// Configuration shared by all sessions of a factory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Log generated SQL at info level on the `bibernate::sql` target
    /// instead of debug.
    pub show_sql: bool,
}

impl SessionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn show_sql(mut self, show_sql: bool) -> Self {
        self.show_sql = show_sql;
        self
    }

    /// Parse a JSON document such as `{"show_sql": true}`. Missing keys take
    /// their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| {
            Error::Config(ConfigError {
                message: format!("invalid session configuration: {}", e),
                source: Some(Box::new(e)),
            })
        })
    }
}
