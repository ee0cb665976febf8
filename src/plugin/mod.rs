//! Plugin system module
//!
//! This module provides the plugin system implementation including:
//! - Plugin manager for the descriptor lifecycle and dispatch
//! - Plugin registry mapping class references to constructors
//! - Shared runtime state every adapter embeds
//! - Configuration schema validation
//! - The MangaDex source adapter

pub mod http;
pub mod manager;
pub mod mangadex;
pub mod registry;
pub mod runtime;
pub mod schema;
pub mod types;

pub use http::{HttpClient, HttpRequest, HttpResponse, ReqwestHttpClient};
pub use manager::{ManagerStatistics, PluginManager};
pub use mangadex::MangaDexPlugin;
pub use registry::{PluginFactory, PluginRegistry};
pub use runtime::{PluginRuntime, PluginStatistics};
pub use schema::{ConfigSchema, ConfigValues, PropertySchema, PropertyType};
pub use types::{
    DownloadOptions, NormalizedChapter, NormalizedMetadata, OperationResult, Plugin,
    PluginContext, PluginManifest, PluginState, SearchFilters, TestReport,
};
