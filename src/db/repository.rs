//! Repository pattern implementation for data access layer
//!
//! The plugin core talks to storage through the traits in this module;
//! the SQLite repositories below are the production implementations.

use crate::core::error::{MangoonError, Result};
use crate::db::manager::DatabaseManager;
use crate::db::models::{
    EntityRef, Manga, MangaTranslation, NewManga, NewTranslation, PluginDescriptor, Source,
    SourceKey,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use uuid::Uuid;

/// Persistence of plugin descriptors
///
/// Soft-deleted descriptors are invisible to every lookup except
/// `find_by_class_ref`, which registration uses to restore them.
#[async_trait]
pub trait DescriptorStore: Send + Sync {
    /// All visible descriptors, highest priority first
    async fn list(&self) -> Result<Vec<PluginDescriptor>>;

    async fn find_by_slug(&self, slug: &str) -> Result<Option<PluginDescriptor>>;

    async fn find_by_id(&self, id: &str) -> Result<Option<PluginDescriptor>>;

    /// Lookup by factory key, including soft-deleted rows
    async fn find_by_class_ref(&self, class_ref: &str) -> Result<Option<PluginDescriptor>>;

    /// Insert or update by id
    async fn save(&self, descriptor: &PluginDescriptor) -> Result<()>;

    /// Add to `downloads_count` and stamp `last_used_at`
    async fn increment_downloads(&self, slug: &str, count: u64) -> Result<()>;

    async fn soft_delete(&self, slug: &str) -> Result<bool>;

    /// Hard delete, soft-deleted rows included
    async fn purge(&self, slug: &str) -> Result<bool>;
}

/// Catalog writes performed by `download`
#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// Insert a manga with its translations; nothing is kept if any insert fails
    async fn create_entry(
        &self,
        manga: NewManga,
        translations: Vec<NewTranslation>,
    ) -> Result<EntityRef>;
}

/// Source descriptor lookup
#[async_trait]
pub trait SourceLookup: Send + Sync {
    async fn find_source(&self, key: &SourceKey) -> Result<Option<Source>>;
}

fn json_column<T: DeserializeOwned>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn time_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|value| {
        DateTime::parse_from_rfc3339(&value)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
    })
    .transpose()
}

fn required_time_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    time_column(row, idx)?.ok_or(rusqlite::Error::InvalidColumnType(
        idx,
        "timestamp".to_string(),
        Type::Null,
    ))
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String> {
    Ok(serde_json::to_string(value)?)
}

const PLUGIN_COLUMNS: &str = "id, name, slug, class_ref, version, description, documentation, \
     author, author_url, icon, config_schema, config_values, default_config, is_active, \
     is_installed, is_system, type, requires_runtime, requires_framework, dependencies, \
     downloads_count, last_used_at, installed_at, priority, rate_limit, concurrent_limit, \
     metadata, supported_sources, created_at, updated_at, deleted_at";

fn descriptor_from_row(row: &Row<'_>) -> rusqlite::Result<PluginDescriptor> {
    let downloads: i64 = row.get(20)?;
    let rate_limit: Option<i64> = row.get(24)?;
    let concurrent_limit: i64 = row.get(25)?;

    Ok(PluginDescriptor {
        id: row.get(0)?,
        name: row.get(1)?,
        slug: row.get(2)?,
        class_ref: row.get(3)?,
        version: row.get(4)?,
        description: row.get(5)?,
        documentation: row.get(6)?,
        author: row.get(7)?,
        author_url: row.get(8)?,
        icon: row.get(9)?,
        config_schema: json_column(row, 10)?,
        config_values: json_column(row, 11)?,
        default_config: json_column(row, 12)?,
        is_active: row.get(13)?,
        is_installed: row.get(14)?,
        is_system: row.get(15)?,
        plugin_type: row.get(16)?,
        requires_runtime: row.get(17)?,
        requires_framework: row.get(18)?,
        dependencies: json_column(row, 19)?,
        downloads_count: downloads.max(0) as u64,
        last_used_at: time_column(row, 21)?,
        installed_at: time_column(row, 22)?,
        priority: row.get(23)?,
        rate_limit: rate_limit.map(|v| v.max(0) as u32),
        concurrent_limit: concurrent_limit.max(0) as u32,
        metadata: json_column(row, 26)?,
        supported_sources: json_column(row, 27)?,
        created_at: required_time_column(row, 28)?,
        updated_at: required_time_column(row, 29)?,
        deleted_at: time_column(row, 30)?,
    })
}

/// SQLite-backed descriptor store
pub struct PluginRepository {
    db: Arc<DatabaseManager>,
}

impl PluginRepository {
    pub fn new(db: Arc<DatabaseManager>) -> Self {
        Self { db }
    }

    async fn find_one(&self, filter: &'static str, value: &str) -> Result<Option<PluginDescriptor>> {
        let value = value.to_string();
        self.db
            .execute(move |conn| {
                conn.query_row(
                    &format!("SELECT {} FROM plugins WHERE {}", PLUGIN_COLUMNS, filter),
                    [&value],
                    descriptor_from_row,
                )
                .optional()
                .map_err(MangoonError::DatabaseError)
            })
            .await
    }
}

#[async_trait]
impl DescriptorStore for PluginRepository {
    async fn list(&self) -> Result<Vec<PluginDescriptor>> {
        self.db
            .execute(|conn| {
                let mut stmt = conn
                    .prepare(&format!(
                        "SELECT {} FROM plugins WHERE deleted_at IS NULL \
                         ORDER BY priority DESC, name ASC",
                        PLUGIN_COLUMNS
                    ))
                    .map_err(MangoonError::DatabaseError)?;

                let descriptors = stmt
                    .query_map([], descriptor_from_row)
                    .map_err(MangoonError::DatabaseError)?
                    .collect::<std::result::Result<Vec<_>, _>>()
                    .map_err(MangoonError::DatabaseError)?;

                Ok(descriptors)
            })
            .await
    }

    async fn find_by_slug(&self, slug: &str) -> Result<Option<PluginDescriptor>> {
        self.find_one("slug = ? AND deleted_at IS NULL", slug).await
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<PluginDescriptor>> {
        self.find_one("id = ? AND deleted_at IS NULL", id).await
    }

    async fn find_by_class_ref(&self, class_ref: &str) -> Result<Option<PluginDescriptor>> {
        self.find_one("class_ref = ?", class_ref).await
    }

    async fn save(&self, descriptor: &PluginDescriptor) -> Result<()> {
        let d = descriptor.clone();
        let config_schema = to_json(&d.config_schema)?;
        let config_values = to_json(&d.config_values)?;
        let default_config = to_json(&d.default_config)?;
        let dependencies = to_json(&d.dependencies)?;
        let metadata = to_json(&d.metadata)?;
        let supported_sources = to_json(&d.supported_sources)?;

        self.db
            .execute(move |conn| {
                conn.execute(
                    &format!(
                        "INSERT INTO plugins ({}) VALUES \
                         (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, \
                          ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25, ?26, ?27, ?28, ?29, ?30, ?31) \
                         ON CONFLICT(id) DO UPDATE SET \
                         name = excluded.name, slug = excluded.slug, class_ref = excluded.class_ref, \
                         version = excluded.version, description = excluded.description, \
                         documentation = excluded.documentation, author = excluded.author, \
                         author_url = excluded.author_url, icon = excluded.icon, \
                         config_schema = excluded.config_schema, config_values = excluded.config_values, \
                         default_config = excluded.default_config, is_active = excluded.is_active, \
                         is_installed = excluded.is_installed, is_system = excluded.is_system, \
                         type = excluded.type, requires_runtime = excluded.requires_runtime, \
                         requires_framework = excluded.requires_framework, \
                         dependencies = excluded.dependencies, downloads_count = excluded.downloads_count, \
                         last_used_at = excluded.last_used_at, installed_at = excluded.installed_at, \
                         priority = excluded.priority, rate_limit = excluded.rate_limit, \
                         concurrent_limit = excluded.concurrent_limit, metadata = excluded.metadata, \
                         supported_sources = excluded.supported_sources, \
                         updated_at = excluded.updated_at, deleted_at = excluded.deleted_at",
                        PLUGIN_COLUMNS
                    ),
                    params![
                        d.id,
                        d.name,
                        d.slug,
                        d.class_ref,
                        d.version,
                        d.description,
                        d.documentation,
                        d.author,
                        d.author_url,
                        d.icon,
                        config_schema,
                        config_values,
                        default_config,
                        d.is_active,
                        d.is_installed,
                        d.is_system,
                        d.plugin_type,
                        d.requires_runtime,
                        d.requires_framework,
                        dependencies,
                        d.downloads_count as i64,
                        d.last_used_at.map(|t| t.to_rfc3339()),
                        d.installed_at.map(|t| t.to_rfc3339()),
                        d.priority,
                        d.rate_limit.map(i64::from),
                        i64::from(d.concurrent_limit),
                        metadata,
                        supported_sources,
                        d.created_at.to_rfc3339(),
                        d.updated_at.to_rfc3339(),
                        d.deleted_at.map(|t| t.to_rfc3339()),
                    ],
                )
                .map_err(MangoonError::DatabaseError)?;
                Ok(())
            })
            .await
    }

    async fn increment_downloads(&self, slug: &str, count: u64) -> Result<()> {
        let slug = slug.to_string();
        let now = Utc::now().to_rfc3339();
        self.db
            .execute(move |conn| {
                conn.execute(
                    "UPDATE plugins SET downloads_count = downloads_count + ?1, \
                     last_used_at = ?2, updated_at = ?2 \
                     WHERE slug = ?3 AND deleted_at IS NULL",
                    params![count as i64, now, slug],
                )
                .map_err(MangoonError::DatabaseError)?;
                Ok(())
            })
            .await
    }

    async fn soft_delete(&self, slug: &str) -> Result<bool> {
        let slug = slug.to_string();
        let now = Utc::now().to_rfc3339();
        self.db
            .execute(move |conn| {
                let changed = conn
                    .execute(
                        "UPDATE plugins SET deleted_at = ?1, is_active = 0, updated_at = ?1 \
                         WHERE slug = ?2 AND deleted_at IS NULL",
                        params![now, slug],
                    )
                    .map_err(MangoonError::DatabaseError)?;
                Ok(changed > 0)
            })
            .await
    }

    async fn purge(&self, slug: &str) -> Result<bool> {
        let slug = slug.to_string();
        self.db
            .execute(move |conn| {
                let changed = conn
                    .execute("DELETE FROM plugins WHERE slug = ?", [&slug])
                    .map_err(MangoonError::DatabaseError)?;
                Ok(changed > 0)
            })
            .await
    }
}

/// Repository for manga catalog entries
pub struct MangaRepository {
    db: Arc<DatabaseManager>,
}

impl MangaRepository {
    pub fn new(db: Arc<DatabaseManager>) -> Self {
        Self { db }
    }

    pub async fn find_by_slug(&self, slug: &str) -> Result<Option<Manga>> {
        let slug = slug.to_string();
        self.db
            .execute(move |conn| {
                conn.query_row(
                    "SELECT id, slug, author, illustrator, publication_year, original_language, \
                     status, type, cover_image, is_active, created_at \
                     FROM mangas WHERE slug = ?",
                    [&slug],
                    |row| {
                        Ok(Manga {
                            id: row.get(0)?,
                            slug: row.get(1)?,
                            author: row.get(2)?,
                            illustrator: row.get(3)?,
                            publication_year: row.get(4)?,
                            original_language: row.get(5)?,
                            status: row.get(6)?,
                            manga_type: row.get(7)?,
                            cover_image: row.get(8)?,
                            is_active: row.get(9)?,
                            created_at: row.get(10)?,
                        })
                    },
                )
                .optional()
                .map_err(MangoonError::DatabaseError)
            })
            .await
    }

    pub async fn translations(&self, manga_id: &str) -> Result<Vec<MangaTranslation>> {
        let manga_id = manga_id.to_string();
        self.db
            .execute(move |conn| {
                let mut stmt = conn
                    .prepare(
                        "SELECT id, manga_id, language_code, title, description \
                         FROM manga_translations WHERE manga_id = ? ORDER BY language_code",
                    )
                    .map_err(MangoonError::DatabaseError)?;

                let translations = stmt
                    .query_map([&manga_id], |row| {
                        Ok(MangaTranslation {
                            id: row.get(0)?,
                            manga_id: row.get(1)?,
                            language_code: row.get(2)?,
                            title: row.get(3)?,
                            description: row.get(4)?,
                        })
                    })
                    .map_err(MangoonError::DatabaseError)?
                    .collect::<std::result::Result<Vec<_>, _>>()
                    .map_err(MangoonError::DatabaseError)?;

                Ok(translations)
            })
            .await
    }
}

fn insert_manga(conn: &Connection, id: &str, manga: &NewManga) -> Result<()> {
    conn.execute(
        "INSERT INTO mangas (id, slug, author, illustrator, publication_year, \
         original_language, status, type, cover_image, is_active, created_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        params![
            id,
            manga.slug,
            manga.author,
            manga.illustrator,
            manga.publication_year,
            manga.original_language,
            manga.status,
            manga.manga_type,
            manga.cover_image,
            manga.is_active,
            Utc::now().to_rfc3339(),
        ],
    )
    .map_err(MangoonError::DatabaseError)?;
    Ok(())
}

fn insert_translation(conn: &Connection, manga_id: &str, translation: &NewTranslation) -> Result<()> {
    conn.execute(
        "INSERT INTO manga_translations (id, manga_id, language_code, title, description) \
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            Uuid::new_v4().to_string(),
            manga_id,
            translation.language_code,
            translation.title,
            translation.description,
        ],
    )
    .map_err(MangoonError::DatabaseError)?;
    Ok(())
}

#[async_trait]
impl CatalogStore for MangaRepository {
    async fn create_entry(
        &self,
        manga: NewManga,
        translations: Vec<NewTranslation>,
    ) -> Result<EntityRef> {
        let entity = EntityRef {
            id: Uuid::new_v4().to_string(),
            slug: manga.slug.clone(),
        };
        let id = entity.id.clone();

        self.db
            .transaction(move |tx| {
                insert_manga(tx, &id, &manga)?;
                for translation in &translations {
                    insert_translation(tx, &id, translation)?;
                }
                Ok(())
            })
            .await?;

        Ok(entity)
    }
}

/// Repository for source sites
pub struct SourceRepository {
    db: Arc<DatabaseManager>,
}

impl SourceRepository {
    pub fn new(db: Arc<DatabaseManager>) -> Self {
        Self { db }
    }

    pub async fn create(&self, source: &Source) -> Result<()> {
        let source = source.clone();
        self.db
            .execute(move |conn| {
                conn.execute(
                    "INSERT INTO sources (id, slug, type, url, is_active) VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![source.id, source.slug, source.source_type, source.url, source.is_active],
                )
                .map_err(MangoonError::DatabaseError)?;
                Ok(())
            })
            .await
    }
}

#[async_trait]
impl SourceLookup for SourceRepository {
    async fn find_source(&self, key: &SourceKey) -> Result<Option<Source>> {
        let (filter, value) = match key {
            SourceKey::Id(id) => ("id", id.clone()),
            SourceKey::Slug(slug) => ("slug", slug.clone()),
        };

        self.db
            .execute(move |conn| {
                conn.query_row(
                    &format!(
                        "SELECT id, slug, type, url, is_active FROM sources \
                         WHERE {} = ? AND deleted_at IS NULL",
                        filter
                    ),
                    [&value],
                    |row| {
                        Ok(Source {
                            id: row.get(0)?,
                            slug: row.get(1)?,
                            source_type: row.get(2)?,
                            url: row.get(3)?,
                            is_active: row.get(4)?,
                        })
                    },
                )
                .optional()
                .map_err(MangoonError::DatabaseError)
            })
            .await
    }
}
