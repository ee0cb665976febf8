//! Shared plugin bookkeeping
//!
//! Every source adapter embeds a [`PluginRuntime`]. It owns the live
//! configuration, the initialized flag and the usage statistics, so an
//! adapter only has to implement its network calls and data transforms.

use super::schema::{is_truthy, merge_config, ConfigSchema, ConfigValues};
use super::types::PluginManifest;
use crate::core::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError, RwLock};

/// Maximum number of error records retained per plugin
const MAX_ERROR_RECORDS: usize = 100;

/// One entry of a plugin's error log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub message: String,
    pub code: i64,
    pub timestamp: DateTime<Utc>,
}

/// Usage counters of a live plugin instance
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PluginStatistics {
    pub downloads_count: u64,
    pub successful_downloads: u64,
    pub failed_downloads: u64,
    pub total_chapters_downloaded: u64,
    pub total_pages_downloaded: u64,
    pub last_download_at: Option<DateTime<Utc>>,
    pub errors: VecDeque<ErrorRecord>,
}

impl PluginStatistics {
    /// Record a download attempt
    pub fn record_download(&mut self, success: bool, chapters: u64, pages: u64) {
        self.downloads_count += 1;
        if success {
            self.successful_downloads += 1;
        } else {
            self.failed_downloads += 1;
        }
        self.total_chapters_downloaded += chapters;
        self.total_pages_downloaded += pages;
        self.last_download_at = Some(Utc::now());
    }

    /// Append to the error log, dropping the oldest record when full
    pub fn record_error(&mut self, message: String, code: i64) {
        if self.errors.len() >= MAX_ERROR_RECORDS {
            self.errors.pop_front();
        }
        self.errors.push_back(ErrorRecord {
            message,
            code,
            timestamp: Utc::now(),
        });
    }
}

/// Configuration, lifecycle flag and statistics of one plugin instance
pub struct PluginRuntime {
    schema: ConfigSchema,
    config: RwLock<ConfigValues>,
    initialized: AtomicBool,
    statistics: Mutex<PluginStatistics>,
}

impl PluginRuntime {
    /// Build a runtime whose config is the schema defaults overlaid with `config`
    pub fn new(schema: ConfigSchema, config: ConfigValues) -> Self {
        let mut merged = schema.defaults();
        merge_config(&mut merged, config);

        Self {
            schema,
            config: RwLock::new(merged),
            initialized: AtomicBool::new(false),
            statistics: Mutex::new(PluginStatistics::default()),
        }
    }

    pub fn schema(&self) -> &ConfigSchema {
        &self.schema
    }

    /// Snapshot of the live configuration
    pub fn config(&self) -> ConfigValues {
        self.config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn config_value(&self, key: &str) -> Option<Value> {
        self.config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    /// String option, falling back when missing or not a string
    pub fn config_str(&self, key: &str, fallback: &str) -> String {
        match self.config_value(key) {
            Some(Value::String(s)) => s,
            _ => fallback.to_string(),
        }
    }

    /// Integer option; numeric strings are accepted
    pub fn config_u64(&self, key: &str, fallback: u64) -> u64 {
        match self.config_value(key) {
            Some(Value::Number(n)) => n.as_u64().unwrap_or(fallback),
            Some(Value::String(s)) => s.trim().parse().unwrap_or(fallback),
            _ => fallback,
        }
    }

    /// Validate then merge over the current configuration
    pub fn set_config(&self, values: ConfigValues) -> Result<()> {
        self.schema.validate(&values)?;
        let mut config = self.config.write().unwrap_or_else(PoisonError::into_inner);
        merge_config(&mut config, values);
        Ok(())
    }

    /// Set the initialized flag; returns `true` only for the first call
    pub fn mark_initialized(&self) -> bool {
        !self.initialized.swap(true, Ordering::SeqCst)
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    /// Initialized and `enabled` set to a truthy value
    pub fn is_ready(&self) -> bool {
        self.is_initialized()
            && self
                .config_value("enabled")
                .map(|v| is_truthy(&v))
                .unwrap_or(false)
    }

    /// Clear the initialized flag and all statistics
    pub fn reset(&self) {
        self.initialized.store(false, Ordering::SeqCst);
        *self.stats() = PluginStatistics::default();
    }

    pub fn update_statistics(&self, success: bool, chapters: u64, pages: u64) {
        self.stats().record_download(success, chapters, pages);
    }

    pub fn record_error(&self, message: String, code: i64) {
        self.stats().record_error(message, code);
    }

    pub fn statistics(&self) -> PluginStatistics {
        self.stats().clone()
    }

    fn stats(&self) -> MutexGuard<'_, PluginStatistics> {
        self.statistics.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Markdown documentation generated from the manifest
    pub fn documentation(&self, manifest: &PluginManifest) -> String {
        let mut requirements = Vec::new();
        if let Some(runtime) = &manifest.requires_runtime {
            requirements.push(format!("Mangoon runtime {} or higher", runtime));
        }
        if let Some(framework) = &manifest.requires_framework {
            requirements.push(format!("Plugin API {} or higher", framework));
        }
        for dependency in &manifest.dependencies {
            requirements.push(format!("The `{}` plugin, installed and active", dependency));
        }
        if requirements.is_empty() {
            requirements.push("No additional requirements".to_string());
        }

        let mut options: Vec<String> = self
            .schema
            .properties
            .iter()
            .map(|(name, property)| {
                format!(
                    "- `{}` ({}, default `{}`): {}",
                    name,
                    serde_json::to_value(property.property_type)
                        .ok()
                        .and_then(|v| v.as_str().map(str::to_string))
                        .unwrap_or_default(),
                    property.default,
                    property.description
                )
            })
            .collect();
        if options.is_empty() {
            options.push("This plugin has no configuration options.".to_string());
        }

        let requirements = requirements
            .iter()
            .enumerate()
            .map(|(i, r)| format!("{}. {}", i + 1, r))
            .collect::<Vec<_>>()
            .join("\n");

        format!(
            "# {name}\n\n\
             Version: {version}\n\
             Author: {author}\n\n\
             ## Description\n\n\
             {description}\n\n\
             ## Installation\n\n\
             {requirements}\n\n\
             Register, install and activate the plugin through the Mangoon plugin manager.\n\n\
             ## Configuration\n\n\
             {options}\n\n\
             ## Troubleshooting\n\n\
             1. Check the plugin configuration\n\
             2. Verify the runtime and plugin API versions meet the requirements\n\
             3. Check the application logs for error messages\n\
             4. Run the plugin self-test\n\n\
             ## Support\n\n\
             For support, please contact: {author}\n",
            name = manifest.name,
            version = manifest.version,
            author = manifest.author,
            description = manifest.description,
            requirements = requirements,
            options = options.join("\n"),
        )
    }
}
