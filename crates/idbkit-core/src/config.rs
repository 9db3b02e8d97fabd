//! Database configuration
//!
//! A [`DatabaseConfig`] is the whole declarative description of a database:
//! its name, the store schemas and the text shown when another context
//! upgrades the database. It deserializes from JSON so a manifest can be
//! shipped alongside the application:
//!
//! ```json
//! {
//!   "name": "app",
//!   "stores": [{"name": "users", "fields": {"1": {"email": {"index": true, "unique": true}}}}]
//! }
//! ```

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::schema::StoreSchema;

/// Notice shown when another context requests a newer database version.
pub const DEFAULT_VERSION_CHANGE_NOTICE: &str =
    "A new version of this page is ready. Please reload or close this tab!";

fn default_notice() -> String {
    DEFAULT_VERSION_CHANGE_NOTICE.to_string()
}

/// Declarative database description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub name: String,
    #[serde(default)]
    pub stores: Vec<StoreSchema>,
    #[serde(default = "default_notice")]
    pub version_change_notice: String,
}

impl DatabaseConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stores: Vec::new(),
            version_change_notice: default_notice(),
        }
    }

    pub fn store(mut self, schema: StoreSchema) -> Self {
        self.stores.push(schema);
        self
    }

    pub fn version_change_notice(mut self, notice: impl Into<String>) -> Self {
        self.version_change_notice = notice.into();
        self
    }

    /// Parse a JSON manifest.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}
