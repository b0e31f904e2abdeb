use crate::error::{Result, SourceError};
use crate::helpers::{
    normalize_epoch_millis, now_millis, optimistic_total_pages, push_unique, slug_from, sort_chapters,
    sort_latest, stamp_listing_order, title_from_slug, with_referer,
};
use crate::http_client::Fetcher;
use crate::models::{Chapter, ImageRequest, Manga, MangaPage, MangaStatus, Source};
use crate::source::{details_or_partial, SourceAdapter, StatusFilter, TypeFilter};
use crate::sources::json::{lenient_i64, lenient_string};
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::Deserialize;
use sha2::Sha256;

pub const API_URL: &str = "https://data.westmanga.me/api";
pub const WEBSITE_URL: &str = "https://westmanga.me";
const PER_PAGE: u32 = 20;

const ACCESS_KEY: &str = "WM_WEB_FRONT_END";
const SECRET_KEY: &str = "xxxoidj";
const SIGNED_MESSAGE: &[u8] = b"wm-api-request";

type HmacSha256 = Hmac<Sha256>;

/// Request signature: HMAC-SHA256 of a fixed message, keyed by
/// `{timestamp}GET{path}{access key}{secret key}`, as lowercase hex
pub fn sign_request(path: &str, timestamp: &str) -> Result<String> {
    let key = format!("{}GET{}{}{}", timestamp, path, ACCESS_KEY, SECRET_KEY);
    let mut mac = HmacSha256::new_from_slice(key.as_bytes())
        .map_err(|e| SourceError::Parse(format!("hmac key: {}", e)))?;
    mac.update(SIGNED_MESSAGE);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

fn signed_headers(url: &str, timestamp: i64) -> Result<HeaderMap> {
    let parsed = url::Url::parse(url).map_err(|e| SourceError::Parse(format!("{}: {}", url, e)))?;
    let timestamp = timestamp.to_string();
    let signature = sign_request(parsed.path(), &timestamp)?;

    let mut headers = HeaderMap::new();
    for (name, value) in [
        ("x-wm-accses-key", ACCESS_KEY.to_string()),
        ("x-wm-request-time", timestamp),
        ("x-wm-request-signature", signature),
    ] {
        let value = HeaderValue::from_str(&value).map_err(|e| SourceError::Parse(e.to_string()))?;
        headers.insert(HeaderName::from_static(name), value);
    }
    Ok(headers)
}

#[derive(Deserialize)]
struct ApiResult<T> {
    data: Option<T>,
    paginator: Option<Paginator>,
}

#[derive(Deserialize)]
struct Paginator {
    #[serde(default, deserialize_with = "lenient_i64")]
    last_page: i64,
}

#[derive(Deserialize)]
struct Content {
    #[serde(default, deserialize_with = "lenient_i64")]
    id: i64,
    title: Option<String>,
    slug: Option<String>,
    cover: Option<String>,
    status: Option<String>,
}

#[derive(Deserialize)]
struct ContentDetail {
    #[serde(flatten)]
    content: Content,
    sinopsis: Option<String>,
    author: Option<String>,
    #[serde(default)]
    genres: Vec<Genre>,
    #[serde(default)]
    chapters: Vec<WmChapter>,
}

#[derive(Deserialize)]
struct Genre {
    name: Option<String>,
}

#[derive(Deserialize)]
struct WmChapter {
    #[serde(default, deserialize_with = "lenient_i64")]
    id: i64,
    #[serde(default, deserialize_with = "lenient_string")]
    number: String,
    slug: Option<String>,
    updated_at: Option<Timestamp>,
}

#[derive(Deserialize)]
struct Timestamp {
    #[serde(default, deserialize_with = "lenient_i64")]
    time: i64,
}

#[derive(Deserialize)]
struct ChapterDetail {
    #[serde(default)]
    images: Vec<String>,
}

#[derive(Deserialize)]
struct HomeData {
    popular: Option<Popular>,
    #[serde(rename = "projectUpdate", alias = "project_update")]
    project_update: Option<Vec<Content>>,
}

#[derive(Deserialize)]
struct Popular {
    #[serde(rename = "allTime", alias = "all_time")]
    all_time: Option<Vec<Content>>,
}

fn parse_status(status: Option<&str>) -> MangaStatus {
    match status.map(str::to_lowercase).as_deref() {
        Some("ongoing") => MangaStatus::Ongoing,
        Some("completed") => MangaStatus::Completed,
        Some("hiatus") => MangaStatus::OnHiatus,
        Some("cancelled" | "dropped") => MangaStatus::Cancelled,
        _ => MangaStatus::Unknown,
    }
}

fn map_content(c: &Content) -> Manga {
    let slug = c
        .slug
        .clone()
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| c.id.to_string());
    let title = c
        .title
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| title_from_slug(&slug));
    let mut manga = Manga::new(Source::WestManga, slug, title)
        .with_thumbnail(c.cover.as_deref().map(|u| with_referer(u, WEBSITE_URL)));
    manga.status = parse_status(c.status.as_deref());
    manga
}

fn parse_contents(json: &str, page: u32) -> Result<MangaPage> {
    let result: ApiResult<Vec<Content>> = serde_json::from_str(json)?;
    let items: Vec<Manga> = result.data.unwrap_or_default().iter().map(map_content).collect();
    let total = match result.paginator {
        Some(p) if p.last_page > 0 => (p.last_page as u32).max(if items.is_empty() { 0 } else { page }),
        _ => optimistic_total_pages(page, items.len()),
    };
    Ok(MangaPage::new(items, total))
}

/// All-time popular first, then recent project updates
fn parse_home_popular(json: &str) -> Result<Vec<Manga>> {
    let result: ApiResult<HomeData> = serde_json::from_str(json)?;
    let Some(home) = result.data else { return Ok(Vec::new()) };
    let list = home
        .popular
        .and_then(|p| p.all_time)
        .filter(|l| !l.is_empty())
        .or(home.project_update)
        .unwrap_or_default();
    Ok(list.iter().map(map_content).collect())
}

fn contents_url(page: u32, extra: &str) -> String {
    format!(
        "{}/contents?{}page={}&per_page={}&type=Comic",
        API_URL, extra, page, PER_PAGE
    )
}

/// Home data only carries a single popular list, so later pages walk the
/// project listing instead of repeating it.
fn popular_url(page: u32) -> String {
    if page <= 1 {
        format!("{}/contents/home-data", API_URL)
    } else {
        contents_url(page, "project=true&")
    }
}

fn settle_details(fetched: Result<String>, slug: &str, now: i64) -> Result<Manga> {
    let result = fetched.and_then(|json| parse_detail(&json, slug, now)).map(|(manga, _)| manga);
    details_or_partial("WestManga", slug, result, || {
        Manga::new(Source::WestManga, slug, title_from_slug(slug))
    })
}

fn parse_detail(json: &str, slug: &str, now: i64) -> Result<(Manga, Vec<Chapter>)> {
    let result: ApiResult<ContentDetail> = serde_json::from_str(json)?;
    let detail = result
        .data
        .ok_or_else(|| SourceError::NotFound(format!("WestManga comic {}", slug)))?;

    let mut manga = map_content(&detail.content);
    manga.description = detail.sinopsis.unwrap_or_default().trim().to_string();
    if let Some(author) = detail.author.filter(|a| !a.trim().is_empty()) {
        manga.author = author.trim().to_string();
    }
    for g in detail.genres.iter().filter_map(|g| g.name.as_deref()) {
        push_unique(&mut manga.genres, g);
    }

    let mut chapters: Vec<Chapter> = detail
        .chapters
        .into_iter()
        .map(|ch| {
            let url = ch.slug.filter(|s| !s.is_empty()).unwrap_or_else(|| ch.id.to_string());
            let mut chapter = Chapter::new(
                url,
                format!("Chapter {}", ch.number),
                ch.number.trim().replace(',', ".").parse().unwrap_or(0.0),
            );
            chapter.id = ch.id.to_string();
            chapter.manga_id = manga.url.clone();
            chapter.date_upload = ch
                .updated_at
                .map(|t| t.time)
                .filter(|t| *t > 0)
                .map(normalize_epoch_millis)
                .unwrap_or(now);
            chapter
        })
        .collect();
    sort_chapters(&mut chapters);
    Ok((manga, chapters))
}

fn parse_pages(json: &str) -> Result<Vec<ImageRequest>> {
    let result: ApiResult<ChapterDetail> = serde_json::from_str(json)?;
    Ok(result
        .data
        .map(|d| d.images)
        .unwrap_or_default()
        .iter()
        .filter(|u| !u.is_empty())
        .map(|u| with_referer(u, WEBSITE_URL))
        .collect())
}

/// WestManga - signed JSON API behind westmanga.me
pub struct WestManga {
    fetcher: Fetcher,
}

impl WestManga {
    pub fn new(fetcher: Fetcher) -> Self {
        let fetcher = fetcher
            .with_header("Origin", WEBSITE_URL)
            .with_header("Referer", &format!("{}/", WEBSITE_URL));
        Self { fetcher }
    }

    async fn api_text(&self, url: &str) -> Result<String> {
        let headers = signed_headers(url, chrono::Utc::now().timestamp())?;
        log::debug!("[WestManga] GET {}", url);
        self.fetcher.get_text_with_headers(url, Some(headers)).await
    }

    async fn contents(&self, page: u32, extra: &str) -> MangaPage {
        let url = contents_url(page, extra);
        let result = match self.api_text(&url).await {
            Ok(json) => parse_contents(&json, page),
            Err(e) => Err(e),
        };
        result.unwrap_or_else(|e| {
            log::warn!("[WestManga] Listing {} failed: {}", url, e);
            MangaPage::empty(page)
        })
    }

    async fn comic(&self, id: &str) -> Result<(Manga, Vec<Chapter>)> {
        let slug = slug_from(id);
        let json = self.api_text(&format!("{}/comic/{}", API_URL, slug)).await?;
        parse_detail(&json, &slug, now_millis())
    }
}

#[async_trait]
impl SourceAdapter for WestManga {
    fn id(&self) -> Source {
        Source::WestManga
    }

    fn name(&self) -> &'static str {
        "WestManga"
    }

    fn base_url(&self) -> &'static str {
        WEBSITE_URL
    }

    fn language(&self) -> &str {
        "id"
    }

    async fn get_popular_manga(&self, page: u32) -> Vec<Manga> {
        if page > 1 {
            return self.get_manga_list(page).await.items;
        }
        let url = popular_url(page);
        match self.api_text(&url).await.and_then(|json| parse_home_popular(&json)) {
            Ok(items) if !items.is_empty() => return items,
            Ok(_) => log::info!("[WestManga] Home data had no popular list, using project listing"),
            Err(e) => log::warn!("[WestManga] Home data failed: {}", e),
        }
        self.get_manga_list(page).await.items
    }

    async fn get_latest_manga(&self, page: u32) -> MangaPage {
        let mut result = self.contents(page, "").await;
        stamp_listing_order(&mut result.items, now_millis());
        sort_latest(&mut result.items);
        result
    }

    async fn get_manga_list(&self, page: u32) -> MangaPage {
        self.contents(page, "project=true&").await
    }

    async fn get_filtered_manga(
        &self,
        page: u32,
        _status: StatusFilter,
        _kind: TypeFilter,
    ) -> MangaPage {
        self.get_latest_manga(page).await
    }

    async fn search_manga(&self, query: &str, page: u32) -> Vec<Manga> {
        let extra = format!("q={}&", urlencoding::encode(query.trim()));
        self.contents(page, &extra).await.items
    }

    async fn get_manga_details(&self, id: &str) -> Result<Manga> {
        let slug = slug_from(id);
        let fetched = self.api_text(&format!("{}/comic/{}", API_URL, slug)).await;
        settle_details(fetched, &slug, now_millis())
    }

    async fn get_chapter_list(&self, manga_id: &str) -> Vec<Chapter> {
        match self.comic(manga_id).await {
            Ok((_, chapters)) => chapters,
            Err(e) => {
                log::warn!("[WestManga] Chapter list for {} failed: {}", manga_id, e);
                Vec::new()
            }
        }
    }

    async fn get_page_list(&self, chapter_id: &str) -> Vec<ImageRequest> {
        let url = format!("{}/v/{}", API_URL, slug_from(chapter_id));
        let pages = match self.api_text(&url).await {
            Ok(json) => parse_pages(&json),
            Err(e) => Err(e),
        };
        pages.unwrap_or_else(|e| {
            log::warn!("[WestManga] Pages for {} failed: {}", chapter_id, e);
            Vec::new()
        })
    }
}
