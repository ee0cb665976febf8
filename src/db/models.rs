//! Database models
//!
//! Data structures representing database tables

use crate::plugin::schema::{ConfigSchema, ConfigValues};
use crate::plugin::types::PluginState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Persisted identity, requirements and lifecycle state of a plugin
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginDescriptor {
    pub id: String,
    pub name: String,
    pub slug: String,
    /// Factory key the live instance is built from
    pub class_ref: String,
    pub version: String,
    pub description: Option<String>,
    /// Markdown documentation
    pub documentation: Option<String>,
    pub author: Option<String>,
    pub author_url: Option<String>,
    pub icon: Option<String>,
    pub config_schema: ConfigSchema,
    pub config_values: ConfigValues,
    pub default_config: ConfigValues,
    pub is_active: bool,
    pub is_installed: bool,
    /// System plugins cannot be uninstalled
    pub is_system: bool,
    pub plugin_type: String,
    pub requires_runtime: Option<String>,
    pub requires_framework: Option<String>,
    /// Slugs of plugins that must be installed and active first
    pub dependencies: Vec<String>,
    pub downloads_count: u64,
    pub last_used_at: Option<DateTime<Utc>>,
    pub installed_at: Option<DateTime<Utc>>,
    pub priority: i32,
    /// Requests per minute; `None` means unlimited
    pub rate_limit: Option<u32>,
    pub concurrent_limit: u32,
    pub metadata: Value,
    /// Ids of the sources this plugin can import from
    pub supported_sources: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl PluginDescriptor {
    /// Installed and active
    pub fn is_available(&self) -> bool {
        self.is_installed && self.is_active
    }

    pub fn state(&self) -> PluginState {
        match (self.is_installed, self.is_active) {
            (true, true) => PluginState::Active,
            (true, false) => PluginState::Installed,
            _ => PluginState::Registered,
        }
    }

    pub fn supports_source_id(&self, source_id: &str) -> bool {
        self.supported_sources.iter().any(|id| id == source_id)
    }

    /// Usage counters kept on the descriptor itself
    pub fn base_statistics(&self) -> serde_json::Map<String, Value> {
        let stats = json!({
            "downloads_count": self.downloads_count,
            "last_used_at": self.last_used_at.map(|t| t.to_rfc3339()),
            "installed_at": self.installed_at.map(|t| t.to_rfc3339()),
        });
        match stats {
            Value::Object(map) => map,
            _ => serde_json::Map::new(),
        }
    }
}

/// Fields for a new catalog entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewManga {
    pub slug: String,
    pub author: Option<String>,
    pub illustrator: Option<String>,
    pub publication_year: Option<i32>,
    pub original_language: Option<String>,
    pub status: String,
    pub manga_type: String,
    pub cover_image: Option<String>,
    pub is_active: bool,
}

/// Manga record in the database
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manga {
    pub id: String,
    pub slug: String,
    pub author: Option<String>,
    pub illustrator: Option<String>,
    pub publication_year: Option<i32>,
    pub original_language: Option<String>,
    pub status: String,
    pub manga_type: String,
    pub cover_image: Option<String>,
    pub is_active: bool,
    pub created_at: String,
}

/// Per-language title and description of a manga
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTranslation {
    pub language_code: String,
    pub title: String,
    pub description: Option<String>,
}

/// Translation record in the database
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MangaTranslation {
    pub id: String,
    pub manga_id: String,
    pub language_code: String,
    pub title: String,
    pub description: Option<String>,
}

/// Reference to a created catalog entity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityRef {
    pub id: String,
    pub slug: String,
}

/// Source site record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Source {
    pub id: String,
    pub slug: String,
    pub source_type: String,
    pub url: Option<String>,
    pub is_active: bool,
}

/// How a caller names a source
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceKey {
    Id(String),
    Slug(String),
}
