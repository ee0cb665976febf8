//! Database module
//!
//! This module provides database management functionality including:
//! - Database connection pool management
//! - Repository implementations for plugins, mangas and sources
//! - Database migrations
//! - Data models

pub mod manager;
pub mod migrations;
pub mod models;
pub mod repository;

pub use manager::DatabaseManager;
pub use models::{EntityRef, Manga, PluginDescriptor, Source, SourceKey};
pub use repository::{
    CatalogStore, DescriptorStore, MangaRepository, PluginRepository, SourceLookup,
    SourceRepository,
};
