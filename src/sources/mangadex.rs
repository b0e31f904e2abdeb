use crate::config::MangaDexConfig;
use crate::error::{Result, SourceError};
use crate::helpers::{
    clamp_to_now, extract_chapter_number, now_millis, optimistic_total_pages, parse_timestamp,
    push_unique, sort_chapters, sort_latest, stamp_listing_order, with_referer,
};
use crate::http_client::{FallbackPolicy, Fetcher};
use crate::models::{Chapter, ImageRequest, Manga, MangaPage, MangaStatus, Source};
use crate::rate_limit::RateLimiter;
use crate::source::{details_or_partial, SourceAdapter, StatusFilter, TypeFilter};
use async_trait::async_trait;
use serde::{Deserialize, Deserializer};
use std::collections::HashMap;

pub const BASE_URL: &str = "https://api.mangadex.org";
pub const WEB_URL: &str = "https://mangadex.org";
const COVER_URL: &str = "https://uploads.mangadex.org/covers";
const CUBARI_URL: &str = "https://cubari.moe";
const PAGE_LIMIT: u32 = 20;
const FEED_LIMIT: u32 = 500;
const CONTENT_RATING: &str = "contentRating[]=safe&contentRating[]=suggestive";

/// Localized strings arrive as `{"en": "..."}`, or as `[]` when there are none
fn localized<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<HashMap<String, String>, D::Error> {
    Ok(match serde_json::Value::deserialize(d)? {
        serde_json::Value::Object(map) => map
            .into_iter()
            .filter_map(|(k, v)| v.as_str().map(|s| (k, s.to_string())))
            .collect(),
        _ => HashMap::new(),
    })
}

#[derive(Deserialize)]
struct MangaList {
    #[serde(default)]
    data: Vec<MangaData>,
    #[serde(default)]
    total: u32,
}

#[derive(Deserialize)]
struct MangaEntity {
    data: Option<MangaData>,
}

#[derive(Deserialize)]
struct MangaData {
    id: String,
    attributes: MangaAttributes,
    #[serde(default)]
    relationships: Vec<Relationship>,
}

#[derive(Deserialize)]
struct Relationship {
    #[serde(rename = "type")]
    rel_type: String,
    attributes: Option<serde_json::Value>,
}

impl Relationship {
    fn attr(&self, key: &str) -> Option<&str> {
        self.attributes.as_ref()?.get(key)?.as_str().filter(|s| !s.is_empty())
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct MangaAttributes {
    #[serde(default, deserialize_with = "localized")]
    title: HashMap<String, String>,
    #[serde(default, deserialize_with = "localized")]
    description: HashMap<String, String>,
    status: Option<String>,
    #[serde(default)]
    tags: Vec<Tag>,
    updated_at: Option<String>,
}

#[derive(Deserialize)]
struct Tag {
    attributes: TagAttributes,
}

#[derive(Deserialize)]
struct TagAttributes {
    #[serde(default, deserialize_with = "localized")]
    name: HashMap<String, String>,
}

#[derive(Deserialize)]
struct ChapterFeed {
    #[serde(default)]
    data: Vec<ChapterData>,
    #[serde(default)]
    total: u32,
}

#[derive(Deserialize)]
struct ChapterData {
    id: String,
    attributes: ChapterAttributes,
    #[serde(default)]
    relationships: Vec<Relationship>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChapterAttributes {
    chapter: Option<String>,
    title: Option<String>,
    translated_language: Option<String>,
    publish_at: Option<String>,
    external_url: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AtHome {
    #[serde(default)]
    base_url: String,
    chapter: AtHomeChapter,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AtHomeChapter {
    #[serde(default)]
    hash: String,
    #[serde(default)]
    data: Vec<String>,
    #[serde(default)]
    data_saver: Vec<String>,
}

/// `https://mangadex.org/title/{uuid}/slug`, `/title/{uuid}` or a bare uuid
pub fn manga_uuid(id: &str) -> String {
    let id = id.trim();
    let rest = match id.find("/title/") {
        Some(pos) => &id[pos + "/title/".len()..],
        None => id.strip_prefix(WEB_URL).unwrap_or(id),
    };
    rest.split('/')
        .find(|s| !s.is_empty())
        .unwrap_or_default()
        .to_string()
}

fn pick_localized(map: &HashMap<String, String>, language: &str) -> Option<String> {
    map.get("en")
        .or_else(|| map.get(language))
        .or_else(|| {
            // Deterministic pick among the remaining languages
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            keys.first().and_then(|k| map.get(*k))
        })
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn cover_request(manga_id: &str, relationships: &[Relationship]) -> Option<ImageRequest> {
    relationships
        .iter()
        .find(|r| r.rel_type == "cover_art")
        .and_then(|r| r.attr("fileName"))
        .map(|file| with_referer(&format!("{}/{}/{}.256.jpg", COVER_URL, manga_id, file), WEB_URL))
}

fn map_manga(data: &MangaData, language: &str) -> Manga {
    let title = pick_localized(&data.attributes.title, language).unwrap_or_else(|| "Unknown Title".into());
    Manga::new(Source::MangaDex, format!("{}/title/{}", WEB_URL, data.id), title)
        .with_thumbnail(cover_request(&data.id, &data.relationships))
}

fn parse_status(status: Option<&str>) -> MangaStatus {
    match status {
        Some("ongoing") => MangaStatus::Ongoing,
        Some("completed") => MangaStatus::Completed,
        Some("hiatus") => MangaStatus::OnHiatus,
        Some("cancelled") => MangaStatus::Cancelled,
        _ => MangaStatus::Unknown,
    }
}

/// Map a `/manga` listing; the total page count comes from the response's `total`
fn parse_manga_list(json: &str, language: &str) -> Result<(Vec<Manga>, u32)> {
    let list: MangaList = serde_json::from_str(json)?;
    let items = list.data.iter().map(|d| map_manga(d, language)).collect();
    Ok((items, list.total.div_ceil(PAGE_LIMIT)))
}

fn parse_details(json: &str, uuid: &str, language: &str, now: i64) -> Result<Manga> {
    let entity: MangaEntity = serde_json::from_str(json)?;
    let data = entity
        .data
        .ok_or_else(|| SourceError::NotFound(format!("MangaDex manga {}", uuid)))?;

    let mut manga = map_manga(&data, language);
    let attrs = &data.attributes;
    manga.description = pick_localized(&attrs.description, language).unwrap_or_default();
    manga.status = parse_status(attrs.status.as_deref());
    manga.last_update = attrs
        .updated_at
        .as_deref()
        .and_then(parse_timestamp)
        .map_or(0, |ts| clamp_to_now(ts, now));

    let person = |kind: &str| {
        data.relationships
            .iter()
            .find(|r| r.rel_type == kind)
            .and_then(|r| r.attr("name"))
            .map(str::to_string)
    };
    if let Some(author) = person("author").or_else(|| person("artist")) {
        manga.author = author;
    }
    for tag in &attrs.tags {
        if let Some(name) = tag.attributes.name.get("en") {
            push_unique(&mut manga.genres, name);
        }
    }
    Ok(manga)
}

fn settle_details(
    fetched: Result<String>,
    uuid: &str,
    language: &str,
    now: i64,
) -> Result<Manga> {
    details_or_partial(
        "MangaDex",
        uuid,
        fetched.and_then(|json| parse_details(&json, uuid, language, now)),
        || Manga::new(Source::MangaDex, format!("{}/title/{}", WEB_URL, uuid), uuid),
    )
}

/// One feed batch in the requested language, plus the feed's total size
fn parse_feed(json: &str, manga_url: &str, language: &str, now: i64) -> Result<(Vec<Chapter>, u32)> {
    let feed: ChapterFeed = serde_json::from_str(json)?;
    let chapters = feed
        .data
        .into_iter()
        .filter(|c| c.attributes.translated_language.as_deref() == Some(language))
        .map(|c| {
            let attrs = &c.attributes;
            let number_text = attrs.chapter.clone().unwrap_or_else(|| "0".to_string());
            let mut name = match attrs.title.as_deref().map(str::trim) {
                Some(title) if !title.is_empty() => format!("Chapter {}: {}", number_text, title),
                _ => format!("Chapter {}", number_text),
            };
            let group = c
                .relationships
                .iter()
                .find(|r| r.rel_type == "scanlation_group")
                .and_then(|r| r.attr("name"));
            if let Some(group) = group {
                name.push_str(&format!(" [{}]", group));
            }
            if let Some(external) = attrs.external_url.as_deref() {
                log::debug!("[MangaDex] Chapter {} is hosted externally at {}", c.id, external);
            }

            let mut chapter = Chapter::new(
                format!("{}/chapter/{}", WEB_URL, c.id),
                name,
                extract_chapter_number(&number_text),
            );
            chapter.date_upload = attrs
                .publish_at
                .as_deref()
                .and_then(parse_timestamp)
                .map_or(now, |ts| clamp_to_now(ts, now));
            chapter.manga_id = manga_url.to_string();
            chapter.id = c.id;
            chapter
        })
        .collect();
    Ok((chapters, feed.total))
}

fn parse_cubari(json: &str) -> Result<Vec<ImageRequest>> {
    let urls: Vec<String> = serde_json::from_str(json)?;
    Ok(urls
        .iter()
        .filter(|u| !u.is_empty())
        .map(|u| with_referer(u, CUBARI_URL))
        .collect())
}

fn parse_at_home(json: &str, data_saver: bool) -> Result<Vec<ImageRequest>> {
    let at_home: AtHome = serde_json::from_str(json)?;
    let chapter = at_home.chapter;
    if at_home.base_url.is_empty() || chapter.hash.is_empty() {
        return Ok(Vec::new());
    }
    let (quality, files) = if data_saver && !chapter.data_saver.is_empty() {
        ("data-saver", chapter.data_saver)
    } else {
        ("data", chapter.data)
    };
    Ok(files
        .iter()
        .map(|file| {
            with_referer(
                &format!("{}/{}/{}/{}", at_home.base_url, quality, chapter.hash, file),
                WEB_URL,
            )
            .with_header("Origin", WEB_URL)
        })
        .collect())
}

/// MangaDex - public JSON API, shared 3 req/s limit across all instances
pub struct MangaDex {
    fetcher: Fetcher,
    language: String,
    data_saver: bool,
}

impl MangaDex {
    pub fn new(fetcher: Fetcher, config: &MangaDexConfig) -> Self {
        Self {
            fetcher: fetcher.with_policy(FallbackPolicy::OnAnyError),
            language: config.language.clone(),
            data_saver: config.data_saver,
        }
    }

    async fn get_text(&self, url: &str) -> Result<String> {
        RateLimiter::mangadex().run(self.fetcher.get_text(url)).await
    }

    fn listing_url(&self, page: u32, extra: &str) -> String {
        let offset = page.saturating_sub(1) * PAGE_LIMIT;
        format!(
            "{}/manga?limit={}&offset={}&includes[]=cover_art&{}&availableTranslatedLanguage[]={}{}",
            BASE_URL, PAGE_LIMIT, offset, CONTENT_RATING, self.language, extra
        )
    }

    async fn listing(&self, url: &str) -> (Vec<Manga>, u32) {
        let json = match self.get_text(url).await {
            Ok(json) => json,
            Err(e) => {
                log::warn!("[MangaDex] Listing request failed: {}", e);
                return (Vec::new(), 0);
            }
        };
        parse_manga_list(&json, &self.language).unwrap_or_else(|e| {
            log::warn!("[MangaDex] Unexpected listing payload: {}", e);
            (Vec::new(), 0)
        })
    }

    async fn page(&self, page: u32, extra: &str) -> MangaPage {
        let (items, total) = self.listing(&self.listing_url(page, extra)).await;
        if items.is_empty() {
            return MangaPage::empty(page);
        }
        MangaPage::new(items, total.max(page))
    }

    async fn cubari_pages(&self, chapter_uuid: &str) -> Result<Vec<ImageRequest>> {
        let url = format!("{}/read/api/mangadex/chapter/{}/", CUBARI_URL, chapter_uuid);
        let json = self.get_text(&url).await?;
        parse_cubari(&json)
    }

    async fn at_home_pages(&self, chapter_uuid: &str) -> Result<Vec<ImageRequest>> {
        let url = format!("{}/at-home/server/{}", BASE_URL, chapter_uuid);
        let json = self.get_text(&url).await?;
        parse_at_home(&json, self.data_saver)
    }
}

#[async_trait]
impl SourceAdapter for MangaDex {
    fn id(&self) -> Source {
        Source::MangaDex
    }

    fn name(&self) -> &'static str {
        "MangaDex"
    }

    fn base_url(&self) -> &'static str {
        BASE_URL
    }

    fn language(&self) -> &str {
        &self.language
    }

    async fn get_popular_manga(&self, page: u32) -> Vec<Manga> {
        self.get_manga_list(page).await.items
    }

    async fn get_latest_manga(&self, page: u32) -> MangaPage {
        let mut result = self.page(page, "&order[latestUploadedChapter]=desc").await;
        stamp_listing_order(&mut result.items, now_millis());
        sort_latest(&mut result.items);
        result
    }

    async fn get_manga_list(&self, page: u32) -> MangaPage {
        self.page(page, "&order[createdAt]=desc").await
    }

    /// Only the status filter maps onto the API; formats are ignored
    async fn get_filtered_manga(
        &self,
        page: u32,
        status: StatusFilter,
        _kind: TypeFilter,
    ) -> MangaPage {
        let extra = match status {
            StatusFilter::Ongoing => "&status[]=ongoing",
            StatusFilter::Completed => "&status[]=completed",
            StatusFilter::Any => "",
        };
        self.page(page, extra).await
    }

    async fn search_manga(&self, query: &str, page: u32) -> Vec<Manga> {
        let extra = format!(
            "&title={}&order[relevance]=desc",
            urlencoding::encode(query.trim())
        );
        self.listing(&self.listing_url(page, &extra)).await.0
    }

    async fn get_manga_details(&self, id: &str) -> Result<Manga> {
        let uuid = manga_uuid(id);
        let url = format!(
            "{}/manga/{}?includes[]=author&includes[]=artist&includes[]=cover_art",
            BASE_URL, uuid
        );
        settle_details(self.get_text(&url).await, &uuid, &self.language, now_millis())
    }

    async fn get_chapter_list(&self, manga_id: &str) -> Vec<Chapter> {
        let uuid = manga_uuid(manga_id);
        let manga_url = format!("{}/title/{}", WEB_URL, uuid);
        let now = now_millis();
        let mut chapters = Vec::new();
        let mut offset = 0u32;

        loop {
            let url = format!(
                "{}/manga/{}/feed?limit={}&offset={}&translatedLanguage[]={}&order[chapter]=desc&includes[]=scanlation_group",
                BASE_URL, uuid, FEED_LIMIT, offset, self.language
            );
            let batch = match self.get_text(&url).await {
                Ok(json) => parse_feed(&json, &manga_url, &self.language, now),
                Err(e) => Err(e),
            };
            match batch {
                Ok((batch, total)) => {
                    chapters.extend(batch);
                    offset += FEED_LIMIT;
                    if offset >= total {
                        break;
                    }
                }
                Err(e) => {
                    log::warn!("[MangaDex] Feed for {} failed at offset {}: {}", uuid, offset, e);
                    break;
                }
            }
        }

        log::debug!("[MangaDex] {} chapters in {} for {}", chapters.len(), self.language, uuid);
        sort_chapters(&mut chapters);
        chapters
    }

    async fn get_page_list(&self, chapter_id: &str) -> Vec<ImageRequest> {
        let uuid = chapter_id
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .unwrap_or_default()
            .to_string();

        match self.cubari_pages(&uuid).await {
            Ok(pages) if !pages.is_empty() => return pages,
            Ok(_) => log::info!("[MangaDex] Cubari returned no pages for {}, using at-home", uuid),
            Err(e) => log::info!("[MangaDex] Cubari failed for {} ({}), using at-home", uuid, e),
        }

        self.at_home_pages(&uuid).await.unwrap_or_else(|e| {
            log::warn!("[MangaDex] at-home lookup failed for {}: {}", uuid, e);
            Vec::new()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: i64 = 1_718_000_000_000;

    const LIST: &str = r#"{"result":"ok","response":"collection","total":41,"limit":20,"offset":0,"data":[
        {"id":"a1","type":"manga","attributes":{"title":{"ja-ro":"Kimetsu","en":"Demon Slayer"},"description":[],"tags":[]},
         "relationships":[{"id":"c1","type":"cover_art","attributes":{"fileName":"cover.png"}}]},
        {"id":"b2","type":"manga","attributes":{"title":{"ko":"나혼렙","id":"Solo Leveling ID"}},"relationships":[]}
    ]}"#;

    #[test]
    fn test_listing_and_total_pages() {
        let (items, total) = parse_manga_list(LIST, "id").unwrap();
        assert_eq!(total, 3);
        assert_eq!(items[0].title, "Demon Slayer");
        assert_eq!(items[0].url, "https://mangadex.org/title/a1");
        assert_eq!(
            items[0].thumbnail.as_ref().map(|t| t.to_string()).as_deref(),
            Some("https://uploads.mangadex.org/covers/a1/cover.png.256.jpg|Referer=https://mangadex.org/")
        );
        assert_eq!(items[1].title, "Solo Leveling ID");
        assert!(items[1].thumbnail.is_none());
    }

    #[test]
    fn test_details() {
        let json = r#"{"result":"ok","data":{"id":"a1","attributes":{
            "title":{"en":"Demon Slayer"},"description":{"en":"Tanjiro fights demons."},
            "status":"hiatus","updatedAt":"2024-01-01T00:00:00+00:00",
            "tags":[{"attributes":{"name":{"en":"Action"}}},{"attributes":{"name":{"en":"Action"}}}]},
            "relationships":[{"type":"artist","attributes":{"name":"Gotouge A."}},{"type":"author","attributes":{"name":"Gotouge"}}]}}"#;
        let manga = parse_details(json, "a1", "en", NOW).unwrap();
        assert_eq!(manga.author, "Gotouge");
        assert_eq!(manga.status, MangaStatus::OnHiatus);
        assert_eq!(manga.description, "Tanjiro fights demons.");
        assert_eq!(manga.genres, vec!["Action"]);
        assert_eq!(manga.last_update, 1_704_067_200_000);
    }

    #[test]
    fn test_future_update_is_clamped() {
        let json = r#"{"data":{"id":"a1","attributes":{"title":{"en":"X"},"updatedAt":"2099-01-01T00:00:00+00:00"}}}"#;
        let manga = parse_details(json, "a1", "en", NOW).unwrap();
        assert_eq!(manga.last_update, NOW);
    }

    #[test]
    fn test_details_failure_returns_partial() {
        let manga = settle_details(Ok("<html>rate limited</html>".into()), "a1", "en", NOW).unwrap();
        assert_eq!(manga.url, "https://mangadex.org/title/a1");
        assert!(settle_details(Err(SourceError::Status(503)), "a1", "en", NOW).is_ok());
        assert!(settle_details(Err(SourceError::Status(404)), "a1", "en", NOW).unwrap_err().is_not_found());
        assert!(settle_details(Ok(r#"{"result":"error"}"#.into()), "a1", "en", NOW).unwrap_err().is_not_found());
    }

    #[test]
    fn test_feed_filters_language_and_names() {
        let json = r#"{"data":[
            {"id":"ch1","attributes":{"chapter":"10.5","title":"Finale","translatedLanguage":"id","publishAt":"2024-02-01T00:00:00+00:00"},
             "relationships":[{"type":"scanlation_group","attributes":{"name":"Team X"}}]},
            {"id":"ch2","attributes":{"chapter":"3","title":"","translatedLanguage":"id","externalUrl":"https://ext"},"relationships":[]},
            {"id":"ch3","attributes":{"chapter":"3","translatedLanguage":"en"},"relationships":[]}
        ],"total":1200}"#;
        let (chapters, total) = parse_feed(json, "https://mangadex.org/title/a1", "id", NOW).unwrap();
        assert_eq!(total, 1200);
        assert_eq!(chapters.len(), 2);
        assert_eq!(chapters[0].name, "Chapter 10.5: Finale [Team X]");
        assert_eq!(chapters[0].chapter_number, 10.5);
        assert_eq!(chapters[0].url, "https://mangadex.org/chapter/ch1");
        assert_eq!(chapters[1].name, "Chapter 3");
        assert_eq!(chapters[1].date_upload, NOW);
    }

    #[test]
    fn test_page_sources() {
        let pages = parse_cubari(r#"["https://cdn.example/1.png",""]"#).unwrap();
        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0].referer(), Some("https://cubari.moe/"));

        let json = r#"{"result":"ok","baseUrl":"https://node.example","chapter":{"hash":"h1","data":["1.png"],"dataSaver":["1s.jpg"]}}"#;
        let saver = parse_at_home(json, true).unwrap();
        assert_eq!(
            saver[0].to_string(),
            "https://node.example/data-saver/h1/1s.jpg|Referer=https://mangadex.org/&Origin=https://mangadex.org"
        );
        let full = parse_at_home(json, false).unwrap();
        assert_eq!(full[0].url, "https://node.example/data/h1/1.png");
    }

    #[test]
    fn test_manga_uuid_forms() {
        assert_eq!(manga_uuid("https://mangadex.org/title/abc-123/some-slug"), "abc-123");
        assert_eq!(manga_uuid("/title/abc-123"), "abc-123");
        assert_eq!(manga_uuid("abc-123"), "abc-123");
    }
}
