//! Mangoon plugin host
//!
//! This library provides the plugin system of the Mangoon manga catalog:
//! plugin lifecycle management, source adapters, the SQLite persistence
//! layer and the CBZ archive reader.

pub mod cache;
pub mod core;
pub mod db;
pub mod plugin;

// Re-export commonly used types
pub use crate::core::{ArchiveReader, Config, MangoonError};
pub use cache::{CacheStore, MemoryCache};
pub use db::DatabaseManager;
pub use plugin::{PluginManager, PluginRegistry};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Version of the plugin API plugins declare in `requires_framework`
pub const PLUGIN_API_VERSION: &str = "1.0.0";
