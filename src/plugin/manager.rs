//! Plugin manager
//!
//! Owns the descriptor lifecycle (register, install, activate), the cached
//! active set, one live instance per plugin and every call into plugin
//! code. Plugin failures and panics never escape a public method; the only
//! error callers see is `InvalidConfiguration` from the config operations.

use super::registry::PluginRegistry;
use super::schema::{merge_config, ConfigValues};
use super::types::{
    DownloadOptions, NormalizedChapter, NormalizedMetadata, OperationResult, Plugin,
    PluginContext, SearchFilters, TestReport,
};
use crate::cache::CacheStore;
use crate::core::config::{Config, HostConfig};
use crate::core::error::{MangoonError, Result};
use crate::core::utils::{slugify, version_at_least};
use crate::db::models::{PluginDescriptor, SourceKey};
use crate::db::repository::{
    DescriptorStore, MangaRepository, PluginRepository, SourceLookup, SourceRepository,
};
use crate::db::DatabaseManager;
use crate::plugin::http::HttpClient;
use chrono::Utc;
use futures::FutureExt;
use serde::Serialize;
use serde_json::{json, Value};
use std::any::Any;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Cache key of the active plugin set
pub const ACTIVE_CACHE_KEY: &str = "mangoon.plugins.active";

/// Default lifetime of the cached active set
pub const DEFAULT_ACTIVE_CACHE_TTL: Duration = Duration::from_secs(3600);

/// Aggregate usage report across all plugins
#[derive(Debug, Clone, Serialize)]
pub struct ManagerStatistics {
    pub total_plugins: usize,
    pub active_plugins: usize,
    pub installed_plugins: usize,
    pub total_downloads: u64,
    /// Per-plugin counters keyed by slug
    pub plugins: BTreeMap<String, Value>,
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Run plugin code, turning a panic into an error
async fn contain<T, F>(plugin: &str, operation: &'static str, future: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match AssertUnwindSafe(future).catch_unwind().await {
        Ok(result) => result,
        Err(payload) => {
            let message = panic_message(&*payload);
            error!(plugin, operation, panic = %message, "Plugin panicked");
            Err(MangoonError::PluginExecutionError(format!("panicked: {}", message)))
        }
    }
}

/// Plugin manager
pub struct PluginManager {
    store: Arc<dyn DescriptorStore>,
    sources: Arc<dyn SourceLookup>,
    cache: Arc<dyn CacheStore>,
    registry: PluginRegistry,
    context: PluginContext,
    host: HostConfig,
    cache_ttl: Duration,
    /// Live instances keyed by slug
    instances: RwLock<HashMap<String, Arc<dyn Plugin>>>,
    /// Held across every "write state + invalidate" and every cache refill
    state_lock: Mutex<()>,
}

impl PluginManager {
    pub fn new(
        store: Arc<dyn DescriptorStore>,
        sources: Arc<dyn SourceLookup>,
        cache: Arc<dyn CacheStore>,
        registry: PluginRegistry,
        context: PluginContext,
        host: HostConfig,
    ) -> Self {
        Self {
            store,
            sources,
            cache,
            registry,
            context,
            host,
            cache_ttl: DEFAULT_ACTIVE_CACHE_TTL,
            instances: RwLock::new(HashMap::new()),
            state_lock: Mutex::new(()),
        }
    }

    /// Wire a manager to the SQLite stores described by `config`
    pub fn from_config(
        db: Arc<DatabaseManager>,
        cache: Arc<dyn CacheStore>,
        http: Arc<dyn HttpClient>,
        registry: PluginRegistry,
        config: &Config,
    ) -> Self {
        let context = PluginContext {
            catalog: Arc::new(MangaRepository::new(db.clone())),
            http,
        };

        Self::new(
            Arc::new(PluginRepository::new(db.clone())),
            Arc::new(SourceRepository::new(db)),
            cache,
            registry,
            context,
            config.host.clone(),
        )
        .with_cache_ttl(Duration::from_secs(config.plugins.active_cache_ttl))
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    pub fn registry(&self) -> &PluginRegistry {
        &self.registry
    }

    // ---- registration ----

    /// Register the plugin class `class_ref`, creating or refreshing its descriptor
    pub async fn register(&self, class_ref: &str) -> Option<PluginDescriptor> {
        match self.try_register(class_ref).await {
            Ok(descriptor) => {
                info!(plugin = %descriptor.slug, operation = "register", class_ref, "Plugin registered");
                Some(descriptor)
            }
            Err(e) => {
                error!(operation = "register", class_ref, error = %e, "Failed to register plugin");
                None
            }
        }
    }

    /// Register several classes; failures are skipped
    pub async fn register_many(&self, class_refs: &[String]) -> Vec<PluginDescriptor> {
        let mut registered = Vec::new();
        for class_ref in class_refs {
            if let Some(descriptor) = self.register(class_ref).await {
                registered.push(descriptor);
            }
        }
        registered
    }

    /// Register every class known to the factory registry
    pub async fn discover(&self) -> Vec<PluginDescriptor> {
        let class_refs = self.registry.class_refs();
        debug!(count = class_refs.len(), "Discovering plugins");
        self.register_many(&class_refs).await
    }

    async fn try_register(&self, class_ref: &str) -> Result<PluginDescriptor> {
        let prototype = self.build(class_ref, ConfigValues::new())?;
        let manifest = prototype.manifest().clone();
        let slug = slugify(&manifest.name);
        if slug.is_empty() {
            return Err(MangoonError::ValidationError(format!(
                "Plugin name '{}' does not yield a slug",
                manifest.name
            )));
        }

        // The slug must not belong to another class
        if let Some(owner) = self.store.find_by_slug(&slug).await? {
            if owner.class_ref != class_ref {
                warn!(
                    plugin = %slug,
                    operation = "register",
                    class_ref,
                    owner = %owner.class_ref,
                    "Plugin slug already registered by another class"
                );
                return Err(MangoonError::ValidationError(format!(
                    "Slug '{}' is already registered by {}",
                    slug, owner.class_ref
                )));
            }
        }

        let previous = self.store.find_by_class_ref(class_ref).await?;

        let now = Utc::now();
        let mut descriptor = match previous {
            Some(previous) => {
                if previous.slug != slug {
                    self.instances.write().await.remove(&previous.slug);
                }
                previous
            }
            None => PluginDescriptor {
                id: Uuid::new_v4().to_string(),
                name: String::new(),
                slug: String::new(),
                class_ref: String::new(),
                version: String::new(),
                description: None,
                documentation: None,
                author: None,
                author_url: None,
                icon: None,
                config_schema: Default::default(),
                config_values: ConfigValues::new(),
                default_config: ConfigValues::new(),
                is_active: false,
                is_installed: false,
                is_system: false,
                plugin_type: String::new(),
                requires_runtime: None,
                requires_framework: None,
                dependencies: Vec::new(),
                downloads_count: 0,
                last_used_at: None,
                installed_at: None,
                priority: 0,
                rate_limit: None,
                concurrent_limit: 1,
                metadata: json!({}),
                supported_sources: Vec::new(),
                created_at: now,
                updated_at: now,
                deleted_at: None,
            },
        };

        descriptor.name = manifest.name.clone();
        descriptor.slug = slug;
        descriptor.class_ref = class_ref.to_string();
        descriptor.version = manifest.version.clone();
        descriptor.description = Some(manifest.description.clone());
        descriptor.documentation = Some(prototype.documentation());
        descriptor.author = Some(manifest.author.clone());
        descriptor.author_url = manifest.author_url.clone();
        descriptor.icon = manifest.icon.clone();
        descriptor.plugin_type = manifest.plugin_type.clone();
        descriptor.config_schema = prototype.config_schema();
        descriptor.default_config = prototype.default_config();
        descriptor.requires_runtime = manifest.requires_runtime.clone();
        descriptor.requires_framework = manifest.requires_framework.clone();
        descriptor.dependencies = manifest.dependencies.clone();
        descriptor.priority = manifest.priority;
        descriptor.rate_limit = manifest.rate_limit;
        descriptor.concurrent_limit = manifest.concurrent_limit;
        descriptor.supported_sources = manifest.supported_sources.clone();
        descriptor.updated_at = now;
        descriptor.deleted_at = None;

        self.write_state(&descriptor).await?;
        Ok(descriptor)
    }

    // ---- lifecycle ----

    /// Install a registered plugin; `true` when it is installed afterwards
    pub async fn install(&self, slug: &str) -> bool {
        match self.try_install(slug).await {
            Ok(installed) => installed,
            Err(e) => {
                error!(plugin = %slug, operation = "install", error = %e, "Plugin installation failed");
                false
            }
        }
    }

    async fn try_install(&self, slug: &str) -> Result<bool> {
        let mut descriptor = self.require(slug).await?;
        if descriptor.is_installed {
            info!(plugin = %slug, operation = "install", "Plugin already installed");
            return Ok(true);
        }

        if !self.requirements_met(&descriptor).await {
            warn!(plugin = %slug, operation = "install", "Plugin requirements not met");
            return Ok(false);
        }

        let instance = self.build(&descriptor.class_ref, descriptor.config_values.clone())?;
        contain(slug, "initialize", instance.initialize()).await?;

        let now = Utc::now();
        descriptor.is_installed = true;
        descriptor.installed_at = Some(now);
        descriptor.updated_at = now;
        self.write_state(&descriptor).await?;
        self.instances.write().await.insert(slug.to_string(), instance);

        info!(plugin = %slug, operation = "install", "Plugin installed");
        Ok(true)
    }

    /// Uninstall a plugin; system plugins are refused
    pub async fn uninstall(&self, slug: &str) -> bool {
        match self.try_uninstall(slug).await {
            Ok(uninstalled) => uninstalled,
            Err(e) => {
                error!(plugin = %slug, operation = "uninstall", error = %e, "Plugin uninstallation failed");
                false
            }
        }
    }

    async fn try_uninstall(&self, slug: &str) -> Result<bool> {
        let mut descriptor = self.require(slug).await?;
        if descriptor.is_system {
            warn!(plugin = %slug, operation = "uninstall", "Cannot uninstall system plugin");
            return Ok(false);
        }

        if let Ok(instance) = self.instance_for(&descriptor).await {
            contain(slug, "cleanup", instance.cleanup()).await?;
        }

        descriptor.is_installed = false;
        descriptor.is_active = false;
        descriptor.installed_at = None;
        descriptor.updated_at = Utc::now();
        self.write_state(&descriptor).await?;
        self.instances.write().await.remove(slug);

        info!(plugin = %slug, operation = "uninstall", "Plugin uninstalled");
        Ok(true)
    }

    /// Activate an installed plugin
    pub async fn activate(&self, slug: &str) -> bool {
        self.set_active(slug, true).await
    }

    pub async fn deactivate(&self, slug: &str) -> bool {
        self.set_active(slug, false).await
    }

    async fn set_active(&self, slug: &str, active: bool) -> bool {
        let operation = if active { "activate" } else { "deactivate" };
        let result = async {
            let mut descriptor = self.require(slug).await?;
            if active && !descriptor.is_installed {
                warn!(plugin = %slug, operation, "Plugin must be installed before activation");
                return Ok(false);
            }
            descriptor.is_active = active;
            descriptor.updated_at = Utc::now();
            self.write_state(&descriptor).await?;
            Ok::<_, MangoonError>(true)
        }
        .await;

        match result {
            Ok(changed) => {
                if changed {
                    info!(plugin = %slug, operation, "Plugin state changed");
                }
                changed
            }
            Err(e) => {
                error!(plugin = %slug, operation, error = %e, "Plugin state change failed");
                false
            }
        }
    }

    /// Mark a plugin as system-protected (or lift the protection)
    pub async fn set_system(&self, slug: &str, system: bool) -> bool {
        let result = async {
            let mut descriptor = self.require(slug).await?;
            descriptor.is_system = system;
            descriptor.updated_at = Utc::now();
            self.write_state(&descriptor).await
        }
        .await;

        match result {
            Ok(()) => true,
            Err(e) => {
                error!(plugin = %slug, operation = "set_system", error = %e, "Failed to update plugin");
                false
            }
        }
    }

    /// Host versions and dependencies satisfy the descriptor's requirements
    pub async fn requirements_met(&self, descriptor: &PluginDescriptor) -> bool {
        if let Some(minimum) = &descriptor.requires_runtime {
            if !version_at_least(&self.host.runtime_version, minimum) {
                debug!(plugin = %descriptor.slug, required = %minimum, "Runtime version too old");
                return false;
            }
        }
        if let Some(minimum) = &descriptor.requires_framework {
            if !version_at_least(&self.host.framework_version, minimum) {
                debug!(plugin = %descriptor.slug, required = %minimum, "Plugin API version too old");
                return false;
            }
        }

        for dependency in &descriptor.dependencies {
            match self.store.find_by_slug(dependency).await {
                Ok(Some(found)) if found.is_available() => {}
                Ok(_) => {
                    debug!(plugin = %descriptor.slug, dependency = %dependency, "Dependency not available");
                    return false;
                }
                Err(e) => {
                    warn!(plugin = %descriptor.slug, dependency = %dependency, error = %e, "Dependency lookup failed");
                    return false;
                }
            }
        }

        true
    }

    /// Available, instantiable and reporting ready
    pub async fn is_ready(&self, slug: &str) -> bool {
        self.ready_instance(slug).await.is_ok()
    }

    // ---- active set and instances ----

    /// Installed and active descriptors, highest priority first
    pub async fn active(&self) -> Vec<PluginDescriptor> {
        if let Some(cached) = self.cache.get(ACTIVE_CACHE_KEY).await {
            match serde_json::from_value::<Vec<PluginDescriptor>>(cached) {
                Ok(active) => return active,
                Err(e) => warn!(error = %e, "Discarding unreadable active plugin cache"),
            }
        }

        let _guard = self.state_lock.lock().await;
        let mut active: Vec<PluginDescriptor> = match self.store.list().await {
            Ok(all) => all.into_iter().filter(PluginDescriptor::is_available).collect(),
            Err(e) => {
                error!(error = %e, "Failed to load active plugins");
                return Vec::new();
            }
        };
        active.sort_by(|a, b| b.priority.cmp(&a.priority));

        match serde_json::to_value(&active) {
            Ok(value) => self.cache.set(ACTIVE_CACHE_KEY, value, self.cache_ttl).await,
            Err(e) => warn!(error = %e, "Failed to cache active plugins"),
        }
        active
    }

    /// Forget the cached active set
    pub async fn clear_cache(&self) {
        let _guard = self.state_lock.lock().await;
        self.cache.forget(ACTIVE_CACHE_KEY).await;
    }

    /// Live instance for `slug`, built on first use
    pub async fn get_instance(&self, slug: &str) -> Option<Arc<dyn Plugin>> {
        let descriptor = self.find(slug).await?;
        match self.instance_for(&descriptor).await {
            Ok(instance) => Some(instance),
            Err(e) => {
                error!(plugin = %slug, error = %e, "Failed to instantiate plugin");
                None
            }
        }
    }

    async fn instance_for(&self, descriptor: &PluginDescriptor) -> Result<Arc<dyn Plugin>> {
        let cached = self.instances.read().await.get(&descriptor.slug).cloned();
        if let Some(instance) = cached {
            return Ok(instance);
        }

        let instance = self.build(&descriptor.class_ref, descriptor.config_values.clone())?;
        if descriptor.is_installed {
            contain(&descriptor.slug, "initialize", instance.initialize()).await?;
        }

        let mut instances = self.instances.write().await;
        Ok(instances
            .entry(descriptor.slug.clone())
            .or_insert(instance)
            .clone())
    }

    fn build(&self, class_ref: &str, config: ConfigValues) -> Result<Arc<dyn Plugin>> {
        std::panic::catch_unwind(AssertUnwindSafe(move || {
            self.registry.create(class_ref, &self.context, config)
        }))
        .unwrap_or_else(|payload| {
            Err(MangoonError::PluginInstantiationError(format!(
                "constructor of {} panicked: {}",
                class_ref,
                panic_message(&*payload)
            )))
        })
    }

    /// Store a descriptor and invalidate the active set in one critical section
    async fn write_state(&self, descriptor: &PluginDescriptor) -> Result<()> {
        let _guard = self.state_lock.lock().await;
        self.store.save(descriptor).await?;
        self.cache.forget(ACTIVE_CACHE_KEY).await;
        Ok(())
    }

    async fn require(&self, slug: &str) -> Result<PluginDescriptor> {
        self.store
            .find_by_slug(slug)
            .await?
            .ok_or_else(|| MangoonError::PluginNotFound(slug.to_string()))
    }

    /// Descriptor and instance of a plugin that may serve requests
    async fn ready_instance(&self, slug: &str) -> std::result::Result<(PluginDescriptor, Arc<dyn Plugin>), String> {
        let descriptor = match self.find(slug).await {
            Some(descriptor) => descriptor,
            None => return Err(format!("Plugin '{}' not found", slug)),
        };
        if !descriptor.is_available() {
            return Err(format!("Plugin '{}' is not ready", descriptor.name));
        }

        let instance = match self.instance_for(&descriptor).await {
            Ok(instance) => instance,
            Err(e) => {
                error!(plugin = %slug, error = %e, "Failed to instantiate plugin");
                return Err(format!("Failed to instantiate plugin '{}'", descriptor.name));
            }
        };
        if !instance.is_ready() {
            return Err(format!("Plugin '{}' is not ready", descriptor.name));
        }

        Ok((descriptor, instance))
    }

    // ---- content operations ----

    /// First active plugin, by priority, that can parse `url`
    pub async fn find_plugin_for_url(&self, url: &str) -> Option<PluginDescriptor> {
        for descriptor in self.active().await {
            let instance = match self.instance_for(&descriptor).await {
                Ok(instance) => instance,
                Err(e) => {
                    warn!(plugin = %descriptor.slug, error = %e, "Skipping plugin that failed to instantiate");
                    continue;
                }
            };

            match contain(&descriptor.slug, "parse_metadata", instance.parse_metadata(url)).await {
                Ok(Some(_)) => return Some(descriptor),
                Ok(None) => {}
                Err(e) => {
                    warn!(plugin = %descriptor.slug, url, error = %e, "Plugin failed to parse URL, skipping");
                }
            }
        }

        None
    }

    /// Import the manga at `url` through `plugin`, or through the best match
    pub async fn download_manga(
        &self,
        url: &str,
        plugin: Option<&str>,
        options: &DownloadOptions,
    ) -> OperationResult {
        let descriptor = match plugin {
            Some(slug) => self.find(slug).await,
            None => self.find_plugin_for_url(url).await,
        };
        let descriptor = match descriptor {
            Some(descriptor) => descriptor,
            None => return OperationResult::failure("No suitable plugin found for the URL"),
        };

        let instance = match self.ready_instance(&descriptor.slug).await {
            Ok((_, instance)) => instance,
            Err(message) => return OperationResult::failure(message),
        };

        match contain(&descriptor.slug, "download", instance.download(url, options)).await {
            Ok(result) => {
                if result.success {
                    if let Err(e) = self.store.increment_downloads(&descriptor.slug, 1).await {
                        warn!(plugin = %descriptor.slug, error = %e, "Failed to record download");
                    }
                }
                result
            }
            Err(e) => {
                error!(plugin = %descriptor.slug, operation = "download", url, error = %e, "Download failed");
                OperationResult::failure(format!("Download failed: {}", e))
            }
        }
    }

    pub async fn search(
        &self,
        slug: &str,
        query: &str,
        filters: &SearchFilters,
    ) -> Vec<NormalizedMetadata> {
        let (_, instance) = match self.ready_instance(slug).await {
            Ok(ready) => ready,
            Err(message) => {
                debug!(plugin = %slug, reason = %message, "Search skipped");
                return Vec::new();
            }
        };

        match contain(slug, "search", instance.search(query, filters)).await {
            Ok(results) => results,
            Err(e) => {
                error!(plugin = %slug, operation = "search", query, error = %e, "Search failed");
                Vec::new()
            }
        }
    }

    pub async fn get_chapters(&self, slug: &str, url: &str) -> Vec<NormalizedChapter> {
        let (_, instance) = match self.ready_instance(slug).await {
            Ok(ready) => ready,
            Err(message) => {
                debug!(plugin = %slug, reason = %message, "Chapter listing skipped");
                return Vec::new();
            }
        };

        match contain(slug, "get_chapters", instance.get_chapters(url)).await {
            Ok(chapters) => chapters,
            Err(e) => {
                error!(plugin = %slug, operation = "get_chapters", url, error = %e, "Chapter listing failed");
                Vec::new()
            }
        }
    }

    pub async fn download_chapter(
        &self,
        slug: &str,
        chapter_url: &str,
        options: &DownloadOptions,
    ) -> OperationResult {
        let (_, instance) = match self.ready_instance(slug).await {
            Ok(ready) => ready,
            Err(message) => return OperationResult::failure(message),
        };

        match contain(slug, "download_chapter", instance.download_chapter(chapter_url, options)).await {
            Ok(result) => result,
            Err(e) => {
                error!(plugin = %slug, operation = "download_chapter", error = %e, "Chapter download failed");
                OperationResult::failure(format!("Chapter download failed: {}", e))
            }
        }
    }

    /// Run a plugin's self-test
    pub async fn test(&self, slug: &str) -> TestReport {
        let instance = match self.get_instance(slug).await {
            Some(instance) => instance,
            None => return TestReport::failed("Failed to instantiate plugin"),
        };

        let report = contain(slug, "test", async { Ok(instance.test().await) }).await;
        match report {
            Ok(report) => report,
            Err(e) => TestReport::failed(format!("Plugin test failed: {}", e)),
        }
    }

    // ---- configuration ----

    /// Validate, persist and apply new configuration values
    pub async fn update_config(&self, slug: &str, values: ConfigValues) -> Result<bool> {
        let (mut descriptor, instance) = match self.checked_instance(slug, &values).await? {
            Some(found) => found,
            None => return Ok(false),
        };

        merge_config(&mut descriptor.config_values, values.clone());
        descriptor.updated_at = Utc::now();
        if let Err(e) = self.write_state(&descriptor).await {
            error!(plugin = %slug, operation = "update_config", error = %e, "Failed to save configuration");
            return Ok(false);
        }

        if let Err(e) = instance.set_config(values) {
            warn!(plugin = %slug, error = %e, "Live instance rejected configuration");
        }
        info!(plugin = %slug, operation = "update_config", "Plugin configuration updated");
        Ok(true)
    }

    /// Check values against the plugin's schema without storing them
    pub async fn validate_config(&self, slug: &str, values: &ConfigValues) -> Result<bool> {
        Ok(self.checked_instance(slug, values).await?.is_some())
    }

    async fn checked_instance(
        &self,
        slug: &str,
        values: &ConfigValues,
    ) -> Result<Option<(PluginDescriptor, Arc<dyn Plugin>)>> {
        let descriptor = match self.find(slug).await {
            Some(descriptor) => descriptor,
            None => return Ok(None),
        };
        let instance = match self.instance_for(&descriptor).await {
            Ok(instance) => instance,
            Err(e) => {
                error!(plugin = %slug, error = %e, "Failed to instantiate plugin");
                return Ok(None);
            }
        };

        match contain(slug, "validate_config", async { instance.validate_config(values) }).await {
            Ok(_) => Ok(Some((descriptor, instance))),
            Err(e @ MangoonError::InvalidConfiguration(_)) => Err(e),
            Err(e) => {
                error!(plugin = %slug, operation = "validate_config", error = %e, "Config validation failed");
                Ok(None)
            }
        }
    }

    // ---- statistics ----

    pub async fn get_statistics(&self) -> ManagerStatistics {
        let descriptors = self.all().await;

        let mut plugins = BTreeMap::new();
        for descriptor in &descriptors {
            let mut stats = descriptor.base_statistics();
            if let Ok(instance) = self.instance_for(descriptor).await {
                if let Ok(Value::Object(live)) = serde_json::to_value(instance.get_statistics()) {
                    merge_config(&mut stats, live);
                }
            }
            plugins.insert(descriptor.slug.clone(), Value::Object(stats));
        }

        ManagerStatistics {
            total_plugins: descriptors.len(),
            active_plugins: descriptors.iter().filter(|d| d.is_available()).count(),
            installed_plugins: descriptors.iter().filter(|d| d.is_installed).count(),
            total_downloads: descriptors.iter().map(|d| d.downloads_count).sum(),
            plugins,
        }
    }

    // ---- queries ----

    pub async fn all(&self) -> Vec<PluginDescriptor> {
        self.store.list().await.unwrap_or_else(|e| {
            error!(error = %e, "Failed to list plugins");
            Vec::new()
        })
    }

    pub async fn find(&self, slug: &str) -> Option<PluginDescriptor> {
        self.store.find_by_slug(slug).await.unwrap_or_else(|e| {
            error!(plugin = %slug, error = %e, "Failed to load plugin");
            None
        })
    }

    pub async fn find_by_id(&self, id: &str) -> Option<PluginDescriptor> {
        self.store.find_by_id(id).await.unwrap_or_else(|e| {
            error!(id, error = %e, "Failed to load plugin");
            None
        })
    }

    async fn resolve_source_id(&self, source: &SourceKey) -> Option<String> {
        match source {
            SourceKey::Id(id) => Some(id.clone()),
            SourceKey::Slug(slug) => match self.sources.find_source(source).await {
                Ok(found) => found.map(|s| s.id),
                Err(e) => {
                    warn!(source = %slug, error = %e, "Source lookup failed");
                    None
                }
            },
        }
    }

    /// Available plugins declaring support for `source`, highest priority first
    pub async fn find_by_source(&self, source: &SourceKey) -> Vec<PluginDescriptor> {
        let source_id = match self.resolve_source_id(source).await {
            Some(id) => id,
            None => return Vec::new(),
        };

        let mut plugins: Vec<PluginDescriptor> = self
            .all()
            .await
            .into_iter()
            .filter(|d| d.is_available() && d.supports_source_id(&source_id))
            .collect();
        plugins.sort_by(|a, b| b.priority.cmp(&a.priority));
        plugins
    }

    pub async fn best_for_source(&self, source: &SourceKey) -> Option<PluginDescriptor> {
        self.find_by_source(source).await.into_iter().next()
    }

    pub async fn has_plugin_for_source(&self, source: &SourceKey) -> bool {
        !self.find_by_source(source).await.is_empty()
    }

    /// Whether `descriptor` lists `source` among its supported sources
    pub async fn supports_source(&self, descriptor: &PluginDescriptor, source: &SourceKey) -> bool {
        match self.resolve_source_id(source).await {
            Some(id) => descriptor.supports_source_id(&id),
            None => false,
        }
    }

    /// Distinct plugin types, sorted
    pub async fn get_types(&self) -> Vec<String> {
        self.all()
            .await
            .into_iter()
            .map(|d| d.plugin_type)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    pub async fn get_by_type(&self, plugin_type: &str) -> Vec<PluginDescriptor> {
        self.all()
            .await
            .into_iter()
            .filter(|d| d.plugin_type == plugin_type)
            .collect()
    }

    // ---- maintenance ----

    /// Soft-delete a descriptor; system plugins are refused
    pub async fn remove(&self, slug: &str) -> bool {
        let descriptor = match self.find(slug).await {
            Some(descriptor) => descriptor,
            None => return false,
        };
        if descriptor.is_system {
            warn!(plugin = %slug, operation = "remove", "Cannot remove system plugin");
            return false;
        }

        let removed = {
            let _guard = self.state_lock.lock().await;
            let removed = self.store.soft_delete(slug).await;
            self.cache.forget(ACTIVE_CACHE_KEY).await;
            removed
        };
        self.instances.write().await.remove(slug);

        match removed {
            Ok(removed) => removed,
            Err(e) => {
                error!(plugin = %slug, operation = "remove", error = %e, "Failed to remove plugin");
                false
            }
        }
    }

    /// Hard-delete a descriptor, soft-deleted ones included
    pub async fn purge(&self, slug: &str) -> bool {
        let purged = {
            let _guard = self.state_lock.lock().await;
            let purged = self.store.purge(slug).await;
            self.cache.forget(ACTIVE_CACHE_KEY).await;
            purged
        };
        self.instances.write().await.remove(slug);

        match purged {
            Ok(purged) => {
                if purged {
                    info!(plugin = %slug, operation = "purge", "Plugin purged");
                }
                purged
            }
            Err(e) => {
                error!(plugin = %slug, operation = "purge", error = %e, "Failed to purge plugin");
                false
            }
        }
    }
}
