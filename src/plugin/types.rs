//! Plugin type definitions
//!
//! This module defines the capability trait every source adapter implements
//! and the data structures that cross the plugin boundary.

use super::http::HttpClient;
use super::runtime::{PluginRuntime, PluginStatistics};
use super::schema::{ConfigSchema, ConfigValues};
use crate::core::error::{MangoonError, Result};
use crate::db::models::EntityRef;
use crate::db::repository::CatalogStore;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Base plugin trait that all source adapters must implement
///
/// Configuration, lifecycle and statistics have default implementations
/// backed by [`PluginRuntime`]; adapters provide their identity and the
/// content operations.
#[async_trait::async_trait]
pub trait Plugin: Send + Sync {
    /// Identity, requirements and declared capabilities
    fn manifest(&self) -> &PluginManifest;

    /// Shared bookkeeping state
    fn runtime(&self) -> &PluginRuntime;

    fn config_schema(&self) -> ConfigSchema {
        self.runtime().schema().clone()
    }

    fn default_config(&self) -> ConfigValues {
        self.config_schema().defaults()
    }

    fn get_config(&self) -> ConfigValues {
        self.runtime().config()
    }

    /// Validate `values`, then merge them over the current configuration
    fn set_config(&self, values: ConfigValues) -> Result<()> {
        self.runtime().set_config(values)
    }

    /// Fails with `InvalidConfiguration` listing every violation
    fn validate_config(&self, values: &ConfigValues) -> Result<bool> {
        self.config_schema().validate(values).map(|_| true)
    }

    /// One-time setup; calling it again is a no-op
    async fn initialize(&self) -> Result<()> {
        if self.runtime().mark_initialized() {
            tracing::info!(plugin = %self.manifest().name, "Initializing plugin");
        }
        Ok(())
    }

    /// Reset the initialized flag and statistics before uninstall
    async fn cleanup(&self) -> Result<()> {
        tracing::info!(plugin = %self.manifest().name, "Cleaning up plugin");
        self.runtime().reset();
        Ok(())
    }

    /// Sanity check without side effects on stored data
    async fn test(&self) -> TestReport {
        match self.initialize().await {
            Ok(()) => TestReport::passed(
                "Plugin is working correctly",
                json!({
                    "name": self.manifest().name,
                    "version": self.manifest().version,
                    "initialized": self.runtime().is_initialized(),
                    "config": self.get_config(),
                }),
            ),
            Err(e) => TestReport::failed(format!("Plugin test failed: {}", e)),
        }
    }

    fn is_ready(&self) -> bool {
        self.runtime().is_ready()
    }

    /// Import the manga behind `url` into the catalog
    async fn download(&self, url: &str, options: &DownloadOptions) -> Result<OperationResult>;

    /// Metadata for `url`, or `None` when this plugin cannot handle it
    async fn parse_metadata(&self, url: &str) -> Result<Option<NormalizedMetadata>>;

    async fn search(&self, query: &str, filters: &SearchFilters) -> Result<Vec<NormalizedMetadata>>;

    /// Every chapter of the manga behind `url`, across all remote pages
    async fn get_chapters(&self, url: &str) -> Result<Vec<NormalizedChapter>>;

    /// Resolve the page list of one chapter
    async fn download_chapter(
        &self,
        chapter_url: &str,
        options: &DownloadOptions,
    ) -> Result<OperationResult>;

    /// Record an error in the bounded error log
    fn handle_error(&self, error: &MangoonError) {
        self.runtime().record_error(error.to_string(), error.code());
        tracing::error!(plugin = %self.manifest().name, error = %error, "Plugin error");
    }

    fn get_statistics(&self) -> PluginStatistics {
        self.runtime().statistics()
    }

    /// Markdown documentation stored on the descriptor
    fn documentation(&self) -> String {
        self.runtime().documentation(self.manifest())
    }
}

/// Lifecycle state of a plugin descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginState {
    /// Known to the manager, not installed
    Registered,
    /// Installed but not used for resolution
    Installed,
    /// Installed and taking part in resolution
    Active,
}

impl std::fmt::Display for PluginState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PluginState::Registered => write!(f, "registered"),
            PluginState::Installed => write!(f, "installed"),
            PluginState::Active => write!(f, "active"),
        }
    }
}

/// Plugin identity and declared capabilities
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginManifest {
    pub name: String,
    pub version: String,
    pub description: String,
    pub author: String,
    #[serde(default)]
    pub author_url: Option<String>,
    #[serde(default)]
    pub icon: Option<String>,
    /// Free-form tag, e.g. "downloader"
    pub plugin_type: String,
    /// Minimum host runtime version
    #[serde(default)]
    pub requires_runtime: Option<String>,
    /// Minimum plugin API version
    #[serde(default)]
    pub requires_framework: Option<String>,
    /// Slugs of plugins that must be installed and active
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub supported_sources: Vec<String>,
    /// Requests per minute; advisory, `None` means unlimited
    #[serde(default)]
    pub rate_limit: Option<u32>,
    /// Concurrent downloads; advisory
    pub concurrent_limit: u32,
    /// Higher runs first during URL resolution
    pub priority: i32,
}

impl PluginManifest {
    pub fn new(name: &str, version: &str, description: &str) -> Self {
        Self {
            name: name.to_string(),
            version: version.to_string(),
            description: description.to_string(),
            author: "Unknown".to_string(),
            author_url: None,
            icon: None,
            plugin_type: "downloader".to_string(),
            requires_runtime: Some("1.0".to_string()),
            requires_framework: Some("1.0".to_string()),
            dependencies: Vec::new(),
            supported_sources: Vec::new(),
            rate_limit: Some(60),
            concurrent_limit: 1,
            priority: 0,
        }
    }

    pub fn with_author(mut self, author: &str) -> Self {
        self.author = author.to_string();
        self
    }

    pub fn with_links(mut self, author_url: Option<&str>, icon: Option<&str>) -> Self {
        self.author_url = author_url.map(str::to_string);
        self.icon = icon.map(str::to_string);
        self
    }

    pub fn with_type(mut self, plugin_type: &str) -> Self {
        self.plugin_type = plugin_type.to_string();
        self
    }

    pub fn with_requirements(mut self, runtime: Option<&str>, framework: Option<&str>) -> Self {
        self.requires_runtime = runtime.map(str::to_string);
        self.requires_framework = framework.map(str::to_string);
        self
    }

    pub fn with_dependencies(mut self, dependencies: Vec<String>) -> Self {
        self.dependencies = dependencies;
        self
    }

    pub fn with_supported_sources(mut self, sources: Vec<String>) -> Self {
        self.supported_sources = sources;
        self
    }

    pub fn with_limits(mut self, rate_limit: Option<u32>, concurrent_limit: u32) -> Self {
        self.rate_limit = rate_limit;
        self.concurrent_limit = concurrent_limit;
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

/// Collaborators handed to plugin factories
#[derive(Clone)]
pub struct PluginContext {
    /// Where downloads persist new catalog entries
    pub catalog: Arc<dyn CatalogStore>,
    pub http: Arc<dyn HttpClient>,
}

/// Uniform envelope returned by mutating plugin operations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationResult {
    pub success: bool,
    pub message: String,
    pub data: Value,
    pub manga: Option<EntityRef>,
}

impl OperationResult {
    pub fn success(message: impl Into<String>, data: Value, manga: Option<EntityRef>) -> Self {
        Self {
            success: true,
            message: message.into(),
            data,
            manga,
        }
    }

    /// Failure envelope; never carries an entity
    pub fn error(message: impl Into<String>, data: Value) -> Self {
        Self {
            success: false,
            message: message.into(),
            data,
            manga: None,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self::error(message, Value::Object(Map::new()))
    }
}

/// Result of a plugin self-test
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestReport {
    pub success: bool,
    pub message: String,
    pub data: Value,
}

impl TestReport {
    pub fn passed(message: impl Into<String>, data: Value) -> Self {
        Self {
            success: true,
            message: message.into(),
            data,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            data: Value::Object(Map::new()),
        }
    }
}

/// Options for `download` and `download_chapter`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DownloadOptions {
    /// Language of the translation row; defaults to the plugin's preference
    #[serde(default)]
    pub language: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Search pagination plus adapter-specific filters
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchFilters {
    #[serde(default)]
    pub limit: Option<u32>,
    #[serde(default)]
    pub offset: Option<u32>,
    /// Passed through to the remote API unchanged
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Manga metadata in catalog terms
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedMetadata {
    pub external_id: String,
    pub title: String,
    pub slug: String,
    pub description: Option<String>,
    pub author: Option<String>,
    pub illustrator: Option<String>,
    pub cover_image: Option<String>,
    pub status: String,
    #[serde(rename = "type")]
    pub manga_type: String,
    pub original_language: Option<String>,
    pub publication_year: Option<i32>,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Language code → title
    #[serde(default)]
    pub alternative_titles: Vec<BTreeMap<String, String>>,
}

/// Chapter listing entry in catalog terms
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedChapter {
    pub id: String,
    pub chapter: Option<String>,
    pub title: Option<String>,
    pub volume: Option<String>,
    pub language: Option<String>,
    pub pages: u32,
    pub published_at: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_envelope_never_carries_entity() {
        let result = OperationResult::error("Download failed: timeout", json!({"attempt": 1}));
        assert!(!result.success);
        assert!(result.manga.is_none());
        assert_eq!(result.data["attempt"], 1);
    }

    #[test]
    fn test_envelope_shape() {
        let result = OperationResult::success(
            "Manga downloaded successfully",
            json!({"slug": "berserk"}),
            Some(EntityRef {
                id: "m1".to_string(),
                slug: "berserk".to_string(),
            }),
        );
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["success"], true);
        assert_eq!(value["manga"]["slug"], "berserk");
    }

    #[test]
    fn test_manifest_defaults() {
        let manifest = PluginManifest::new("Generic Plugin", "1.0.0", "");
        assert_eq!(manifest.plugin_type, "downloader");
        assert_eq!(manifest.rate_limit, Some(60));
        assert_eq!(manifest.concurrent_limit, 1);
        assert_eq!(manifest.priority, 0);
    }

    #[test]
    fn test_filters_pass_extra_keys_through() {
        let filters: SearchFilters =
            serde_json::from_value(json!({"limit": 5, "status[]": "ongoing"})).unwrap();
        assert_eq!(filters.limit, Some(5));
        assert_eq!(filters.offset, None);
        assert_eq!(filters.extra["status[]"], "ongoing");
    }
}
