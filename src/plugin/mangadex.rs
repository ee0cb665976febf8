//! MangaDex source adapter
//!
//! Imports manga from the MangaDex v5 JSON API (api.mangadex.org):
//! metadata, paginated chapter feeds and at-home page lists.

use super::http::{HttpClient, HttpRequest};
use super::runtime::PluginRuntime;
use super::schema::{ConfigSchema, ConfigValues, PropertySchema, PropertyType};
use super::types::{
    DownloadOptions, NormalizedChapter, NormalizedMetadata, OperationResult, Plugin,
    PluginContext, PluginManifest, SearchFilters, TestReport,
};
use crate::core::error::{MangoonError, Result};
use crate::core::utils::slugify;
use crate::db::models::{EntityRef, NewManga, NewTranslation};
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::time::Duration;

const DEFAULT_API_BASE_URL: &str = "https://api.mangadex.org";
const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (compatible; Mangoon/1.0)";
/// Page size of the chapter feed
const FEED_PAGE_SIZE: usize = 100;

lazy_static! {
    static ref MANGA_ID: Regex = Regex::new(r"/title/([a-f0-9\-]+)").unwrap();
    static ref CHAPTER_ID: Regex = Regex::new(r"/chapter/([a-f0-9\-]+)").unwrap();
}

/// Manga id from a `https://mangadex.org/title/{id}[/{title}]` URL
pub fn extract_manga_id(url: &str) -> Option<String> {
    MANGA_ID.captures(url).map(|c| c[1].to_string())
}

/// Chapter id from a `https://mangadex.org/chapter/{id}` URL
pub fn extract_chapter_id(url: &str) -> Option<String> {
    CHAPTER_ID.captures(url).map(|c| c[1].to_string())
}

/// Collapse the remote publication status onto the catalog's set
fn map_status(status: &str) -> &'static str {
    match status {
        "completed" => "completed",
        "hiatus" => "hiatus",
        "cancelled" => "cancelled",
        _ => "ongoing",
    }
}

fn str_field(value: &Value, key: &str) -> Option<String> {
    value.get(key).and_then(Value::as_str).map(str::to_string)
}

/// English entry of a localized string map, else its first entry
fn localized(value: &Value) -> Option<String> {
    let map = value.as_object()?;
    map.get("en")
        .or_else(|| map.values().next())
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn transform_manga(data: &Value) -> Result<NormalizedMetadata> {
    let external_id = str_field(data, "id").ok_or_else(|| {
        MangoonError::PluginExecutionError("Invalid response from MangaDex API".to_string())
    })?;
    let attributes = data.get("attributes").cloned().unwrap_or(Value::Null);

    let title = attributes
        .get("title")
        .and_then(localized)
        .unwrap_or_else(|| "Unknown".to_string());
    let description = attributes.get("description").and_then(localized);

    let mut author = None;
    let mut illustrator = None;
    let mut cover_image = None;
    for relation in data
        .get("relationships")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
    {
        let relation_attributes = relation.get("attributes").cloned().unwrap_or(Value::Null);
        match relation.get("type").and_then(Value::as_str) {
            Some("author") => author = str_field(&relation_attributes, "name"),
            Some("artist") => illustrator = str_field(&relation_attributes, "name"),
            Some("cover_art") => cover_image = str_field(&relation_attributes, "fileName"),
            _ => {}
        }
    }

    let tags = attributes
        .get("tags")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|tag| {
            tag.pointer("/attributes/name/en")
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .collect();

    let alternative_titles = attributes
        .get("altTitles")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|entry| serde_json::from_value::<BTreeMap<String, String>>(entry.clone()).ok())
        .collect();

    Ok(NormalizedMetadata {
        external_id,
        slug: slugify(&title),
        title,
        description,
        author,
        illustrator,
        cover_image,
        status: map_status(
            attributes
                .get("status")
                .and_then(Value::as_str)
                .unwrap_or("ongoing"),
        )
        .to_string(),
        manga_type: "manga".to_string(),
        original_language: str_field(&attributes, "originalLanguage"),
        publication_year: attributes
            .get("year")
            .and_then(Value::as_i64)
            .and_then(|year| i32::try_from(year).ok()),
        tags,
        alternative_titles,
    })
}

fn transform_chapter(data: &Value) -> NormalizedChapter {
    let attributes = data.get("attributes").cloned().unwrap_or(Value::Null);
    NormalizedChapter {
        id: str_field(data, "id").unwrap_or_default(),
        chapter: str_field(&attributes, "chapter"),
        title: str_field(&attributes, "title"),
        volume: str_field(&attributes, "volume"),
        language: str_field(&attributes, "translatedLanguage"),
        pages: attributes
            .get("pages")
            .and_then(Value::as_u64)
            .and_then(|p| u32::try_from(p).ok())
            .unwrap_or(0),
        published_at: str_field(&attributes, "publishAt"),
    }
}

/// Source adapter for mangadex.org
pub struct MangaDexPlugin {
    manifest: PluginManifest,
    runtime: PluginRuntime,
    context: PluginContext,
}

impl MangaDexPlugin {
    /// Factory key under which the adapter is registered
    pub const CLASS_REF: &'static str = "mangoon::plugins::MangaDexPlugin";

    pub fn new(context: PluginContext, config: ConfigValues) -> Self {
        let manifest = PluginManifest::new(
            "MangaDex Plugin",
            "1.0.0",
            "Download manga from MangaDex - the largest open-source manga database",
        )
        .with_author("Mangoon Team")
        .with_links(
            Some("https://github.com/mangoon"),
            Some("/images/plugins/mangadex.png"),
        )
        .with_limits(Some(60), 3)
        .with_priority(100);

        Self {
            manifest,
            runtime: PluginRuntime::new(Self::schema(), config),
            context,
        }
    }

    fn schema() -> ConfigSchema {
        ConfigSchema::new()
            .property(
                "enabled",
                PropertySchema::new(PropertyType::Boolean, true, "Enable or disable this plugin"),
            )
            .property(
                "api_base_url",
                PropertySchema::new(PropertyType::String, DEFAULT_API_BASE_URL, "MangaDex API base URL"),
            )
            .property(
                "api_version",
                PropertySchema::new(PropertyType::String, "v5", "MangaDex API version"),
            )
            .property(
                "timeout",
                PropertySchema::new(PropertyType::Integer, 30, "Request timeout in seconds"),
            )
            .property(
                "user_agent",
                PropertySchema::new(
                    PropertyType::String,
                    DEFAULT_USER_AGENT,
                    "User agent string for HTTP requests",
                ),
            )
            .property(
                "preferred_language",
                PropertySchema::new(PropertyType::String, "en", "Preferred language for manga downloads"),
            )
            .property(
                "include_chapters",
                PropertySchema::new(
                    PropertyType::Boolean,
                    true,
                    "Include chapter data when downloading manga",
                ),
            )
            .property(
                "download_quality",
                PropertySchema::new(
                    PropertyType::String,
                    "data",
                    "Image quality: data (original) or data-saver (compressed)",
                ),
            )
    }

    fn api_base_url(&self) -> String {
        self.runtime
            .config_str("api_base_url", DEFAULT_API_BASE_URL)
            .trim_end_matches('/')
            .to_string()
    }

    fn preferred_language(&self) -> String {
        self.runtime.config_str("preferred_language", "en")
    }

    /// GET request against the API with the configured timeout and user agent
    fn request(&self, path: &str) -> HttpRequest {
        HttpRequest::get(format!("{}{}", self.api_base_url(), path))
            .header("User-Agent", &self.runtime.config_str("user_agent", DEFAULT_USER_AGENT))
            .timeout(Duration::from_secs(self.runtime.config_u64("timeout", 30)))
    }

    fn http(&self) -> &dyn HttpClient {
        self.context.http.as_ref()
    }

    async fn fetch_metadata(&self, url: &str) -> Result<NormalizedMetadata> {
        let manga_id = extract_manga_id(url)
            .ok_or_else(|| MangoonError::ValidationError("Invalid MangaDex URL format".to_string()))?;

        let request = self
            .request(&format!("/manga/{}", manga_id))
            .query("includes[]", "author")
            .query("includes[]", "artist")
            .query("includes[]", "cover_art");
        let response = self.http().get(request).await?;
        if !response.is_success() {
            return Err(MangoonError::NetworkError(
                "Failed to fetch manga data from MangaDex API".to_string(),
            ));
        }

        match response.json()?.get("data") {
            Some(data) if !data.is_null() => transform_manga(data),
            _ => Err(MangoonError::PluginExecutionError(
                "Invalid response from MangaDex API".to_string(),
            )),
        }
    }

    async fn fetch_search(&self, query: &str, filters: &SearchFilters) -> Result<Vec<NormalizedMetadata>> {
        let mut request = self
            .request("/manga")
            .query("title", query)
            .query("limit", filters.limit.unwrap_or(20))
            .query("offset", filters.offset.unwrap_or(0))
            .query("includes[]", "cover_art");
        for (key, value) in &filters.extra {
            let values = match value {
                Value::Array(items) => items.clone(),
                other => vec![other.clone()],
            };
            for value in values {
                request = match value {
                    Value::String(s) => request.query(key, s),
                    other => request.query(key, other),
                };
            }
        }

        let response = self.http().get(request).await?;
        if !response.is_success() {
            return Ok(Vec::new());
        }

        response
            .json()?
            .get("data")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .map(transform_manga)
            .collect()
    }

    async fn fetch_chapters(&self, url: &str) -> Result<Vec<NormalizedChapter>> {
        let manga_id = extract_manga_id(url)
            .ok_or_else(|| MangoonError::ValidationError("Invalid MangaDex URL format".to_string()))?;
        let language = self.preferred_language();

        let mut chapters = Vec::new();
        let mut offset = 0;
        loop {
            let request = self
                .request(&format!("/manga/{}/feed", manga_id))
                .query("limit", FEED_PAGE_SIZE)
                .query("offset", offset)
                .query("translatedLanguage[]", &language)
                .query("order[chapter]", "asc");
            let response = self.http().get(request).await?;
            if !response.is_success() {
                break;
            }

            let body = response.json()?;
            let page = body
                .get("data")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            if page.is_empty() {
                break;
            }

            chapters.extend(page.iter().map(transform_chapter));
            offset += FEED_PAGE_SIZE;
            if page.len() != FEED_PAGE_SIZE {
                break;
            }
        }

        tracing::debug!(manga_id = %manga_id, count = chapters.len(), "Fetched chapter feed");
        Ok(chapters)
    }

    async fn fetch_chapter(&self, chapter_url: &str) -> Result<OperationResult> {
        self.initialize().await?;

        let chapter_id = match extract_chapter_id(chapter_url) {
            Some(id) => id,
            None => return Ok(OperationResult::failure("Invalid chapter URL format")),
        };

        let chapter_response = self
            .http()
            .get(self.request(&format!("/chapter/{}", chapter_id)))
            .await?;
        if !chapter_response.is_success() {
            return Ok(OperationResult::failure("Failed to fetch chapter data"));
        }

        let at_home_response = self
            .http()
            .get(self.request(&format!("/at-home/server/{}", chapter_id)))
            .await?;
        if !at_home_response.is_success() {
            return Ok(OperationResult::failure("Failed to fetch chapter pages"));
        }

        let chapter_data = chapter_response.json()?.get("data").cloned().unwrap_or(Value::Null);
        let at_home = at_home_response.json()?;

        let base_url = at_home.get("baseUrl").and_then(Value::as_str).unwrap_or_default();
        let hash = at_home
            .pointer("/chapter/hash")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let quality = self.runtime.config_str("download_quality", "data");
        let pages: Vec<String> = at_home
            .get("chapter")
            .and_then(|chapter| chapter.get(&quality))
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter_map(Value::as_str)
            .map(|file| format!("{}/{}/{}/{}", base_url, quality, hash, file))
            .collect();

        self.runtime.update_statistics(true, 1, pages.len() as u64);

        Ok(OperationResult::success(
            "Chapter downloaded successfully",
            json!({
                "chapter_id": chapter_id,
                "page_count": pages.len(),
                "pages": pages,
                "chapter_data": transform_chapter(&chapter_data),
            }),
            None,
        ))
    }

    async fn import(&self, url: &str, options: &DownloadOptions) -> Result<OperationResult> {
        self.initialize().await?;

        if extract_manga_id(url).is_none() {
            return Ok(OperationResult::failure("Invalid MangaDex URL format"));
        }

        let metadata = match self.parse_metadata(url).await? {
            Some(metadata) => metadata,
            None => return Ok(OperationResult::failure("Failed to parse manga metadata")),
        };

        let manga = match self.create_manga(&metadata, options).await {
            Some(manga) => manga,
            None => return Ok(OperationResult::failure("Failed to create manga entry")),
        };

        self.runtime.update_statistics(true, 0, 0);
        tracing::info!(plugin = %self.manifest.name, slug = %manga.slug, "Downloaded manga");

        Ok(OperationResult::success(
            "Manga downloaded successfully",
            json!({ "manga_id": manga.id, "slug": manga.slug }),
            Some(manga),
        ))
    }

    /// Persist the catalog entry and its default translation
    async fn create_manga(
        &self,
        metadata: &NormalizedMetadata,
        options: &DownloadOptions,
    ) -> Option<EntityRef> {
        let manga = NewManga {
            slug: metadata.slug.clone(),
            author: metadata.author.clone(),
            illustrator: metadata.illustrator.clone(),
            publication_year: metadata.publication_year,
            original_language: metadata.original_language.clone(),
            status: metadata.status.clone(),
            manga_type: metadata.manga_type.clone(),
            cover_image: metadata.cover_image.clone(),
            is_active: true,
        };
        let translation = NewTranslation {
            language_code: options
                .language
                .clone()
                .unwrap_or_else(|| self.preferred_language()),
            title: metadata.title.clone(),
            description: metadata.description.clone(),
        };

        match self.context.catalog.create_entry(manga, vec![translation]).await {
            Ok(entity) => Some(entity),
            Err(e) => {
                self.handle_error(&e);
                None
            }
        }
    }
}

#[async_trait::async_trait]
impl Plugin for MangaDexPlugin {
    fn manifest(&self) -> &PluginManifest {
        &self.manifest
    }

    fn runtime(&self) -> &PluginRuntime {
        &self.runtime
    }

    async fn initialize(&self) -> Result<()> {
        if self.runtime.mark_initialized() {
            tracing::info!(
                plugin = %self.manifest.name,
                api_base_url = %self.api_base_url(),
                api_version = %self.runtime.config_str("api_version", "v5"),
                "MangaDex plugin initialized"
            );
        }
        Ok(())
    }

    /// Ping the API
    async fn test(&self) -> TestReport {
        if let Err(e) = self.initialize().await {
            self.handle_error(&e);
            return TestReport::failed(format!("Plugin test failed: {}", e));
        }

        match self.http().get(self.request("/ping")).await {
            Ok(response) if response.is_success() => TestReport::passed(
                "MangaDex API connection successful",
                json!({ "api_status": "online" }),
            ),
            Ok(response) => TestReport {
                success: false,
                message: "MangaDex API connection failed".to_string(),
                data: json!({ "status_code": response.status }),
            },
            Err(e) => {
                self.handle_error(&e);
                TestReport::failed(format!("Plugin test failed: {}", e))
            }
        }
    }

    async fn download(&self, url: &str, options: &DownloadOptions) -> Result<OperationResult> {
        match self.import(url, options).await {
            Ok(result) => Ok(result),
            Err(e) => {
                self.handle_error(&e);
                self.runtime.update_statistics(false, 0, 0);
                Ok(OperationResult::failure(format!("Download failed: {}", e)))
            }
        }
    }

    async fn parse_metadata(&self, url: &str) -> Result<Option<NormalizedMetadata>> {
        match self.fetch_metadata(url).await {
            Ok(metadata) => Ok(Some(metadata)),
            Err(e) => {
                self.handle_error(&e);
                tracing::debug!(url, error = %e, "MangaDex cannot parse URL");
                Ok(None)
            }
        }
    }

    async fn search(&self, query: &str, filters: &SearchFilters) -> Result<Vec<NormalizedMetadata>> {
        self.initialize().await?;
        match self.fetch_search(query, filters).await {
            Ok(results) => Ok(results),
            Err(e) => {
                self.handle_error(&e);
                Ok(Vec::new())
            }
        }
    }

    async fn get_chapters(&self, url: &str) -> Result<Vec<NormalizedChapter>> {
        self.initialize().await?;
        match self.fetch_chapters(url).await {
            Ok(chapters) => Ok(chapters),
            Err(e) => {
                self.handle_error(&e);
                Ok(Vec::new())
            }
        }
    }

    async fn download_chapter(
        &self,
        chapter_url: &str,
        _options: &DownloadOptions,
    ) -> Result<OperationResult> {
        match self.fetch_chapter(chapter_url).await {
            Ok(result) => Ok(result),
            Err(e) => {
                self.handle_error(&e);
                self.runtime.update_statistics(false, 0, 0);
                Ok(OperationResult::failure(format!("Chapter download failed: {}", e)))
            }
        }
    }

    fn documentation(&self) -> String {
        format!(
            "{}\n## URL Formats Supported\n\n\
             - `https://mangadex.org/title/{{manga-id}}`\n\
             - `https://mangadex.org/title/{{manga-id}}/{{manga-title}}`\n\
             - `https://mangadex.org/chapter/{{chapter-id}}`\n",
            self.runtime.documentation(&self.manifest)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repository::MangaRepository;
    use crate::db::DatabaseManager;
    use crate::plugin::http::HttpResponse;
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};

    const MANGA_ID: &str = "a1c7c817-4e59-43b7-9365-09675a149a6f";

    type Handler = Box<dyn Fn(&HttpRequest) -> HttpResponse + Send + Sync>;

    /// Routes every request through a closure and records it
    struct FakeHttp {
        handler: Handler,
        requests: Mutex<Vec<HttpRequest>>,
    }

    impl FakeHttp {
        fn new(handler: impl Fn(&HttpRequest) -> HttpResponse + Send + Sync + 'static) -> Arc<Self> {
            Arc::new(Self {
                handler: Box::new(handler),
                requests: Mutex::new(Vec::new()),
            })
        }

        fn requests(&self) -> Vec<HttpRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl HttpClient for FakeHttp {
        async fn get(&self, request: HttpRequest) -> Result<HttpResponse> {
            self.requests.lock().unwrap().push(request.clone());
            Ok((self.handler)(&request))
        }
    }

    fn ok(body: Value) -> HttpResponse {
        HttpResponse {
            status: 200,
            body: body.to_string().into_bytes(),
            ..Default::default()
        }
    }

    fn status(code: u16) -> HttpResponse {
        HttpResponse {
            status: code,
            ..Default::default()
        }
    }

    fn manga_fixture() -> Value {
        json!({
            "id": MANGA_ID,
            "attributes": {
                "title": {"en": "One Piece"},
                "altTitles": [{"ja": "ワンピース"}, {"fr": "One Piece FR"}],
                "description": {"fr": "Pirates", "en": "Pirates everywhere"},
                "status": "hiatus",
                "originalLanguage": "ja",
                "year": 1997,
                "tags": [
                    {"attributes": {"name": {"en": "Action"}}},
                    {"attributes": {"name": {"ja": "冒険"}}}
                ]
            },
            "relationships": [
                {"type": "author", "attributes": {"name": "Oda Eiichiro"}},
                {"type": "artist", "attributes": {"name": "Oda Eiichiro"}},
                {"type": "cover_art", "attributes": {"fileName": "cover.jpg"}}
            ]
        })
    }

    fn chapter_fixture(id: usize) -> Value {
        json!({
            "id": format!("ch-{}", id),
            "attributes": {
                "chapter": id.to_string(),
                "title": null,
                "volume": "1",
                "translatedLanguage": "en",
                "pages": 18,
                "publishAt": "2020-01-01T00:00:00+00:00"
            }
        })
    }

    fn plugin_with(http: Arc<FakeHttp>, config: Value) -> (MangaDexPlugin, MangaRepository) {
        let db = Arc::new(DatabaseManager::new_in_memory().unwrap());
        let context = PluginContext {
            catalog: Arc::new(MangaRepository::new(db.clone())),
            http,
        };
        let config = config.as_object().cloned().unwrap_or_default();
        (MangaDexPlugin::new(context, config), MangaRepository::new(db))
    }

    #[test]
    fn test_extract_ids() {
        assert_eq!(
            extract_manga_id(&format!("https://mangadex.org/title/{}/one-piece", MANGA_ID)),
            Some(MANGA_ID.to_string())
        );
        assert_eq!(extract_manga_id("https://example.com/series/42"), None);
        assert_eq!(
            extract_chapter_id("https://mangadex.org/chapter/0f3e-99ab"),
            Some("0f3e-99ab".to_string())
        );
    }

    #[test]
    fn test_transform_manga() {
        let metadata = transform_manga(&manga_fixture()).unwrap();
        assert_eq!(metadata.title, "One Piece");
        assert_eq!(metadata.slug, "one-piece");
        assert_eq!(metadata.description.as_deref(), Some("Pirates everywhere"));
        assert_eq!(metadata.author.as_deref(), Some("Oda Eiichiro"));
        assert_eq!(metadata.illustrator.as_deref(), Some("Oda Eiichiro"));
        assert_eq!(metadata.cover_image.as_deref(), Some("cover.jpg"));
        assert_eq!(metadata.status, "hiatus");
        assert_eq!(metadata.manga_type, "manga");
        assert_eq!(metadata.publication_year, Some(1997));
        assert_eq!(metadata.tags, vec!["Action".to_string()]);
        assert_eq!(metadata.alternative_titles.len(), 2);
        assert_eq!(metadata.alternative_titles[0]["ja"], "ワンピース");
    }

    #[test]
    fn test_transform_falls_back_for_missing_fields() {
        let metadata = transform_manga(&json!({
            "id": "x",
            "attributes": {"title": {"ja-ro": "Wan Pisu"}, "status": "unknown"}
        }))
        .unwrap();
        assert_eq!(metadata.title, "Wan Pisu");
        assert_eq!(metadata.status, "ongoing");
        assert!(metadata.description.is_none());

        let untitled = transform_manga(&json!({"id": "y", "attributes": {}})).unwrap();
        assert_eq!(untitled.title, "Unknown");
    }

    #[test]
    fn test_transform_chapter_page_counts() {
        let chapter = transform_chapter(&json!({
            "id": "c1",
            "attributes": {"chapter": "1", "translatedLanguage": "en", "pages": 24}
        }));
        assert_eq!(chapter.pages, 24);
        assert_eq!(chapter.chapter.as_deref(), Some("1"));

        // Out of range counts are unknown, not wrapped
        let oversized = transform_chapter(&json!({
            "id": "c2",
            "attributes": {"pages": 4_294_967_297u64}
        }));
        assert_eq!(oversized.pages, 0);
    }

    #[tokio::test]
    async fn test_parse_metadata_requests_relationships() {
        let http = FakeHttp::new(|_| ok(json!({"data": manga_fixture()})));
        let (plugin, _) = plugin_with(http.clone(), json!({"user_agent": "TestAgent"}));

        let metadata = plugin
            .parse_metadata(&format!("https://mangadex.org/title/{}", MANGA_ID))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(metadata.external_id, MANGA_ID);

        let requests = http.requests();
        assert_eq!(requests[0].url, format!("https://api.mangadex.org/manga/{}", MANGA_ID));
        assert_eq!(
            requests[0].query_values("includes[]"),
            vec!["author", "artist", "cover_art"]
        );
        assert!(requests[0]
            .headers
            .contains(&("User-Agent".to_string(), "TestAgent".to_string())));
    }

    #[tokio::test]
    async fn test_parse_metadata_declines_foreign_urls() {
        let http = FakeHttp::new(|_| status(404));
        let (plugin, _) = plugin_with(http.clone(), json!({}));

        assert!(plugin
            .parse_metadata("https://example.com/series/42")
            .await
            .unwrap()
            .is_none());
        assert!(http.requests().is_empty());
        assert_eq!(plugin.get_statistics().errors.len(), 1);

        assert!(plugin
            .parse_metadata(&format!("https://mangadex.org/title/{}", MANGA_ID))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_download_persists_manga_and_translation() {
        let http = FakeHttp::new(|_| ok(json!({"data": manga_fixture()})));
        let (plugin, mangas) = plugin_with(http, json!({"preferred_language": "fr"}));
        let url = format!("https://mangadex.org/title/{}", MANGA_ID);

        let result = plugin.download(&url, &DownloadOptions::default()).await.unwrap();
        assert!(result.success, "{}", result.message);
        assert_eq!(result.message, "Manga downloaded successfully");
        assert_eq!(result.data["slug"], "one-piece");
        let entity = result.manga.unwrap();

        let stored = mangas.find_by_slug("one-piece").await.unwrap().unwrap();
        assert_eq!(stored.id, entity.id);
        assert_eq!(stored.status, "hiatus");
        let translations = mangas.translations(&entity.id).await.unwrap();
        assert_eq!(translations[0].language_code, "fr");
        assert_eq!(translations[0].title, "One Piece");

        let stats = plugin.get_statistics();
        assert_eq!(stats.successful_downloads, 1);

        let again = plugin.download(&url, &DownloadOptions::default()).await.unwrap();
        assert!(!again.success);
        assert_eq!(again.message, "Failed to create manga entry");
        assert!(again.manga.is_none());
    }

    #[tokio::test]
    async fn test_download_language_option_wins() {
        let http = FakeHttp::new(|_| ok(json!({"data": manga_fixture()})));
        let (plugin, mangas) = plugin_with(http, json!({}));
        let options = DownloadOptions {
            language: Some("es".to_string()),
            ..Default::default()
        };

        let result = plugin
            .download(&format!("https://mangadex.org/title/{}", MANGA_ID), &options)
            .await
            .unwrap();
        let translations = mangas.translations(&result.manga.unwrap().id).await.unwrap();
        assert_eq!(translations[0].language_code, "es");
    }

    #[tokio::test]
    async fn test_download_failures() {
        let http = FakeHttp::new(|_| status(500));
        let (plugin, _) = plugin_with(http, json!({}));

        let invalid = plugin
            .download("https://example.com/series/1", &DownloadOptions::default())
            .await
            .unwrap();
        assert_eq!(invalid.message, "Invalid MangaDex URL format");

        let unparsed = plugin
            .download(
                &format!("https://mangadex.org/title/{}", MANGA_ID),
                &DownloadOptions::default(),
            )
            .await
            .unwrap();
        assert!(!unparsed.success);
        assert_eq!(unparsed.message, "Failed to parse manga metadata");
    }

    #[tokio::test]
    async fn test_get_chapters_walks_feed_pages() {
        let http = FakeHttp::new(|request| {
            let offset: usize = request.query_values("offset")[0].parse().unwrap();
            let count = if offset == 0 { FEED_PAGE_SIZE } else { 30 };
            let data: Vec<Value> = (0..count).map(|i| chapter_fixture(offset + i)).collect();
            ok(json!({ "data": data }))
        });
        let (plugin, _) = plugin_with(http.clone(), json!({"preferred_language": "pt-br"}));

        let chapters = plugin
            .get_chapters(&format!("https://mangadex.org/title/{}", MANGA_ID))
            .await
            .unwrap();
        assert_eq!(chapters.len(), 130);
        assert_eq!(chapters[0].chapter.as_deref(), Some("0"));
        assert_eq!(chapters[129].id, "ch-129");
        assert_eq!(chapters[0].pages, 18);

        let requests = http.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1].query_values("offset"), vec!["100"]);
        assert_eq!(requests[0].query_values("translatedLanguage[]"), vec!["pt-br"]);
        assert_eq!(requests[0].query_values("order[chapter]"), vec!["asc"]);
    }

    #[tokio::test]
    async fn test_get_chapters_stops_on_error() {
        let http = FakeHttp::new(|_| status(503));
        let (plugin, _) = plugin_with(http, json!({}));

        let chapters = plugin
            .get_chapters(&format!("https://mangadex.org/title/{}", MANGA_ID))
            .await
            .unwrap();
        assert!(chapters.is_empty());
        assert!(plugin
            .get_chapters("https://example.com/nothing")
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_download_chapter_builds_page_urls() {
        let http = FakeHttp::new(|request| {
            if request.url.contains("/at-home/server/") {
                ok(json!({
                    "baseUrl": "https://uploads.example.test",
                    "chapter": {
                        "hash": "abc123",
                        "data": ["1.png", "2.png"],
                        "data-saver": ["1.jpg", "2.jpg", "3.jpg"]
                    }
                }))
            } else {
                ok(json!({"data": chapter_fixture(7)}))
            }
        });
        let (plugin, _) = plugin_with(http, json!({"download_quality": "data-saver"}));

        let result = plugin
            .download_chapter("https://mangadex.org/chapter/ff00", &DownloadOptions::default())
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(result.data["page_count"], 3);
        assert_eq!(
            result.data["pages"][0],
            "https://uploads.example.test/data-saver/abc123/1.jpg"
        );
        assert_eq!(result.data["chapter_data"]["chapter"], "7");

        let stats = plugin.get_statistics();
        assert_eq!(stats.total_chapters_downloaded, 1);
        assert_eq!(stats.total_pages_downloaded, 3);
    }

    #[tokio::test]
    async fn test_download_chapter_failures() {
        let http = FakeHttp::new(|request| {
            if request.url.contains("/at-home/server/") {
                status(500)
            } else {
                ok(json!({"data": chapter_fixture(1)}))
            }
        });
        let (plugin, _) = plugin_with(http, json!({}));

        let invalid = plugin
            .download_chapter("https://mangadex.org/title/abc", &DownloadOptions::default())
            .await
            .unwrap();
        assert_eq!(invalid.message, "Invalid chapter URL format");

        let missing_pages = plugin
            .download_chapter("https://mangadex.org/chapter/abc", &DownloadOptions::default())
            .await
            .unwrap();
        assert!(!missing_pages.success);
        assert_eq!(missing_pages.message, "Failed to fetch chapter pages");
    }

    #[tokio::test]
    async fn test_search_passes_filters_through() {
        let http = FakeHttp::new(|_| ok(json!({"data": [manga_fixture()]})));
        let (plugin, _) = plugin_with(http.clone(), json!({}));
        let filters: SearchFilters = serde_json::from_value(json!({
            "limit": 5,
            "status[]": ["ongoing", "hiatus"]
        }))
        .unwrap();

        let results = plugin.search("one piece", &filters).await.unwrap();
        assert_eq!(results.len(), 1);

        let request = &http.requests()[0];
        assert_eq!(request.url, "https://api.mangadex.org/manga");
        assert_eq!(request.query_values("title"), vec!["one piece"]);
        assert_eq!(request.query_values("limit"), vec!["5"]);
        assert_eq!(request.query_values("offset"), vec!["0"]);
        assert_eq!(request.query_values("status[]"), vec!["ongoing", "hiatus"]);
    }

    #[tokio::test]
    async fn test_search_failure_is_empty() {
        let http = FakeHttp::new(|_| status(500));
        let (plugin, _) = plugin_with(http, json!({}));
        assert!(plugin
            .search("one piece", &SearchFilters::default())
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_self_test_pings_api() {
        let http = FakeHttp::new(|_| ok(json!({})));
        let (plugin, _) = plugin_with(http.clone(), json!({"api_base_url": "https://mirror.example.test/"}));
        let report = plugin.test().await;
        assert!(report.success);
        assert_eq!(report.data["api_status"], "online");
        assert_eq!(http.requests()[0].url, "https://mirror.example.test/ping");
        assert!(plugin.is_ready());

        let down = FakeHttp::new(|_| status(502));
        let (plugin, _) = plugin_with(down, json!({}));
        let report = plugin.test().await;
        assert!(!report.success);
        assert_eq!(report.message, "MangaDex API connection failed");
        assert_eq!(report.data["status_code"], 502);
    }

    #[test]
    fn test_manifest_and_documentation() {
        let (plugin, _) = plugin_with(FakeHttp::new(|_| status(200)), json!({}));
        let manifest = plugin.manifest();
        assert_eq!(manifest.priority, 100);
        assert_eq!(manifest.concurrent_limit, 3);
        assert_eq!(plugin.get_config()["download_quality"], "data");

        let doc = plugin.documentation();
        assert!(doc.starts_with("# MangaDex Plugin"));
        assert!(doc.contains("https://mangadex.org/title/{manga-id}"));
    }
}
