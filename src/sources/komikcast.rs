use crate::error::{Result, SourceError};
use crate::helpers::{
    clamp_to_now, extract_chapter_number, format_chapter_number, now_millis, optimistic_total_pages,
    parse_timestamp, push_unique, slug_from, sort_chapters, sort_latest, title_from_slug, with_referer,
};
use crate::http_client::Fetcher;
use crate::models::{Chapter, ImageRequest, Manga, MangaPage, MangaStatus, Source};
use crate::source::{details_or_partial, SourceAdapter, StatusFilter, TypeFilter};
use crate::sources::json::{lenient_f64, lenient_i64};
use async_trait::async_trait;
use serde::Deserialize;

pub const API_URL: &str = "https://be.komikcast.fit";
pub const WEBSITE_URL: &str = "https://v1.komikcast.fit";
const PAGE_SIZE: u32 = 30;

#[derive(Deserialize)]
struct ApiResult<T> {
    data: Option<T>,
}

#[derive(Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
struct ApiList<T> {
    #[serde(default)]
    data: Vec<T>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SeriesItem {
    #[serde(default, deserialize_with = "lenient_i64")]
    id: i64,
    data: Option<SeriesData>,
    updated_at: Option<String>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct SeriesData {
    #[serde(default)]
    title: String,
    #[serde(default)]
    slug: String,
    cover_image: Option<String>,
    author: Option<String>,
    status: Option<String>,
    synopsis: Option<String>,
    #[serde(default)]
    genres: Vec<GenreItem>,
}

#[derive(Deserialize)]
struct GenreItem {
    data: Option<GenreData>,
}

#[derive(Deserialize)]
struct GenreData {
    name: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChapterItem {
    #[serde(default, deserialize_with = "lenient_i64")]
    id: i64,
    data: Option<ChapterData>,
    created_at: Option<String>,
}

#[derive(Deserialize)]
struct ChapterData {
    title: Option<String>,
    #[serde(default, deserialize_with = "lenient_f64")]
    index: f64,
    slug: Option<String>,
    #[serde(default)]
    images: Vec<String>,
}

fn parse_date(value: Option<&str>, now: i64) -> i64 {
    value
        .and_then(parse_timestamp)
        .map(|ts| clamp_to_now(ts, now))
        .unwrap_or(now)
}

fn cover(url: Option<&str>) -> Option<ImageRequest> {
    url.filter(|u| !u.is_empty())
        .map(|u| with_referer(u, WEBSITE_URL))
}

fn map_series(item: &SeriesItem, now: i64) -> Option<Manga> {
    let data = item.data.as_ref()?;
    if data.slug.is_empty() {
        return None;
    }
    let mut manga = Manga::new(
        Source::KomikCast,
        format!("{}/series/{}", WEBSITE_URL, data.slug),
        data.title.trim(),
    )
    .with_thumbnail(cover(data.cover_image.as_deref()));
    manga.last_update = parse_date(item.updated_at.as_deref(), now);
    Some(manga)
}

/// Map a `/series` listing response, newest update first
fn parse_series_list(json: &str, now: i64) -> Result<Vec<Manga>> {
    let list: ApiList<SeriesItem> = serde_json::from_str(json)?;
    let mut items: Vec<Manga> = list.data.iter().filter_map(|i| map_series(i, now)).collect();
    sort_latest(&mut items);
    Ok(items)
}

fn parse_details(json: &str, id: &str, now: i64) -> Result<Manga> {
    let result: ApiResult<SeriesItem> = serde_json::from_str(json)?;
    let item = result
        .data
        .ok_or_else(|| SourceError::NotFound(format!("KomikCast series {}", id)))?;
    let mut manga = map_series(&item, now)
        .ok_or_else(|| SourceError::NotFound(format!("KomikCast series {}", id)))?;

    let data = item.data.unwrap_or_default();
    manga.description = data.synopsis.unwrap_or_default().trim().to_string();
    if let Some(author) = data.author.filter(|a| !a.trim().is_empty()) {
        manga.author = author.trim().to_string();
    }
    for genre in data.genres.iter().filter_map(|g| g.data.as_ref()?.name.as_deref()) {
        push_unique(&mut manga.genres, genre);
    }
    manga.status = match data.status.as_deref().map(str::to_lowercase).as_deref() {
        Some("ongoing") => MangaStatus::Ongoing,
        Some("completed") => MangaStatus::Completed,
        _ => MangaStatus::Unknown,
    };
    Ok(manga)
}

/// Details from a fetched body, or a partial title for anything but NotFound
fn settle_details(fetched: Result<String>, slug: &str, now: i64) -> Result<Manga> {
    details_or_partial(
        "KomikCast",
        slug,
        fetched.and_then(|json| parse_details(&json, slug, now)),
        || Manga::new(Source::KomikCast, format!("{}/series/{}", WEBSITE_URL, slug), title_from_slug(slug)),
    )
}

fn parse_chapters(json: &str, slug: &str, now: i64) -> Result<Vec<Chapter>> {
    let list: ApiList<ChapterItem> = serde_json::from_str(json)?;
    let mut chapters: Vec<Chapter> = list
        .data
        .into_iter()
        .filter_map(|item| {
            let data = item.data?;
            let number = data.index as f32;
            let name = data
                .title
                .filter(|t| !t.trim().is_empty())
                .unwrap_or_else(|| format!("Chapter {}", format_chapter_number(number)));
            let chapter_slug = data
                .slug
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| format_chapter_number(number));

            let mut chapter = Chapter::new(
                format!("{}/series/{}/chapter/{}", WEBSITE_URL, slug, chapter_slug),
                name,
                if number > 0.0 { number } else { extract_chapter_number(&chapter_slug) },
            );
            chapter.id = item.id.to_string();
            chapter.manga_id = slug.to_string();
            chapter.date_upload = parse_date(item.created_at.as_deref(), now);
            Some(chapter)
        })
        .collect();
    sort_chapters(&mut chapters);
    Ok(chapters)
}

fn parse_pages(json: &str) -> Result<Vec<ImageRequest>> {
    let result: ApiResult<ChapterItem> = serde_json::from_str(json)?;
    Ok(result
        .data
        .and_then(|c| c.data)
        .map(|d| d.images)
        .unwrap_or_default()
        .iter()
        .filter(|u| !u.is_empty())
        .map(|u| with_referer(u, WEBSITE_URL))
        .collect())
}

/// The reader URL `{site}/series/{slug}/chapter/{n}` maps onto the API path `/series/{slug}/chapters/{n}`
fn chapter_api_url(chapter_url: &str) -> String {
    chapter_url
        .replace(WEBSITE_URL, API_URL)
        .replace("/chapter/", "/chapters/")
}

/// KomikCast - JSON API behind the v1 SPA frontend
pub struct KomikCast {
    fetcher: Fetcher,
}

impl KomikCast {
    pub fn new(fetcher: Fetcher) -> Self {
        let fetcher = fetcher
            .with_header("Origin", WEBSITE_URL)
            .with_header("Referer", &format!("{}/", WEBSITE_URL));
        Self { fetcher }
    }

    async fn series(&self, url: &str) -> Vec<Manga> {
        let json = match self.fetcher.get_text(url).await {
            Ok(json) => json,
            Err(e) => {
                log::warn!("[KomikCast] API error on {}: {}", url, e);
                return Vec::new();
            }
        };
        parse_series_list(&json, now_millis()).unwrap_or_else(|e| {
            log::warn!("[KomikCast] Unexpected listing payload from {}: {}", url, e);
            Vec::new()
        })
    }

    async fn listing(&self, page: u32, kind: &str, sort: &str) -> Vec<Manga> {
        let url = format!(
            "{}/series?type={}&page={}&take={}&sort={}",
            API_URL, kind, page, PAGE_SIZE, sort
        );
        self.series(&url).await
    }
}

#[async_trait]
impl SourceAdapter for KomikCast {
    fn id(&self) -> Source {
        Source::KomikCast
    }

    fn name(&self) -> &'static str {
        "KomikCast"
    }

    fn base_url(&self) -> &'static str {
        API_URL
    }

    fn language(&self) -> &str {
        "id"
    }

    async fn get_popular_manga(&self, page: u32) -> Vec<Manga> {
        self.listing(page, "project", "popularity").await
    }

    async fn get_latest_manga(&self, page: u32) -> MangaPage {
        let items = self.listing(page, "mirror", "latest").await;
        let total = optimistic_total_pages(page, items.len());
        MangaPage::new(items, total)
    }

    async fn get_manga_list(&self, page: u32) -> MangaPage {
        let items = self.listing(page, "project", "latest").await;
        let total = optimistic_total_pages(page, items.len());
        MangaPage::new(items, total)
    }

    async fn get_filtered_manga(
        &self,
        page: u32,
        status: StatusFilter,
        kind: TypeFilter,
    ) -> MangaPage {
        let mut url = format!("{}/series?page={}&take={}", API_URL, page, PAGE_SIZE);
        match status {
            StatusFilter::Ongoing => url.push_str("&status=ongoing"),
            StatusFilter::Completed => url.push_str("&status=completed"),
            StatusFilter::Any => {}
        }
        match kind.as_str() {
            Some(format) => url.push_str(&format!("&format={}", format)),
            None => url.push_str("&type=project"),
        }
        url.push_str("&sort=latest");

        let items = self.series(&url).await;
        let total = optimistic_total_pages(page, items.len());
        MangaPage::new(items, total)
    }

    async fn search_manga(&self, query: &str, page: u32) -> Vec<Manga> {
        let filter = format!("title=like=\"{q}\",nativeTitle=like=\"{q}\"", q = query.trim());
        let url = format!(
            "{}/series?filter={}&page={}&take={}",
            API_URL,
            urlencoding::encode(&filter),
            page,
            PAGE_SIZE
        );
        self.series(&url).await
    }

    async fn get_manga_details(&self, id: &str) -> Result<Manga> {
        let slug = slug_from(id);
        let url = format!("{}/series/{}", API_URL, slug);
        settle_details(self.fetcher.get_text(&url).await, &slug, now_millis())
    }

    async fn get_chapter_list(&self, manga_id: &str) -> Vec<Chapter> {
        let slug = slug_from(manga_id);
        let url = format!("{}/series/{}/chapters", API_URL, slug);
        match self.fetcher.get_text(&url).await {
            Ok(json) => parse_chapters(&json, &slug, now_millis()).unwrap_or_else(|e| {
                log::warn!("[KomikCast] Unexpected chapter payload for {}: {}", slug, e);
                Vec::new()
            }),
            Err(e) => {
                log::warn!("[KomikCast] Failed to fetch chapters for {}: {}", slug, e);
                Vec::new()
            }
        }
    }

    async fn get_page_list(&self, chapter_id: &str) -> Vec<ImageRequest> {
        let url = chapter_api_url(chapter_id);
        match self.fetcher.get_text(&url).await {
            Ok(json) => parse_pages(&json).unwrap_or_else(|e| {
                log::warn!("[KomikCast] Unexpected page payload for {}: {}", url, e);
                Vec::new()
            }),
            Err(e) => {
                log::warn!("[KomikCast] Error fetching pages from {}: {}", url, e);
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: i64 = 1_718_000_000_000;

    const LIST: &str = r#"{"status":200,"data":[
        {"id":1,"data":{"title":"Alpha","slug":"alpha","coverImage":"https://img/a.jpg"},"updatedAt":"2024-06-01T00:00:00Z"},
        {"id":2,"data":{"title":"Beta","slug":"beta","coverImage":""},"updatedAt":"2024-06-05T00:00:00Z"},
        {"id":3,"data":{"title":"Future","slug":"future"},"updatedAt":"2099-01-01T00:00:00Z"},
        {"id":4,"data":null}
    ]}"#;

    #[test]
    fn test_listing_sorted_and_clamped() {
        let items = parse_series_list(LIST, NOW).unwrap();
        assert_eq!(items.len(), 3);
        assert_eq!(items[0].title, "Future");
        assert_eq!(items[0].last_update, NOW);
        assert_eq!(items[1].title, "Beta");
        assert!(items[1].thumbnail.is_none());
        assert_eq!(items[2].url, "https://v1.komikcast.fit/series/alpha");
        assert_eq!(
            items[2].thumbnail.as_ref().map(|t| t.to_string()).as_deref(),
            Some("https://img/a.jpg|Referer=https://v1.komikcast.fit/")
        );
    }

    #[test]
    fn test_details_and_not_found() {
        let json = r#"{"data":{"id":9,"data":{"title":"Alpha","slug":"alpha","author":"Oda",
            "status":"Ongoing","synopsis":" Story ","genres":[{"data":{"name":"Action"}},{"data":{"name":"Action"}}]},
            "updatedAt":"2024-06-01T00:00:00Z"}}"#;
        let manga = parse_details(json, "alpha", NOW).unwrap();
        assert_eq!(manga.author, "Oda");
        assert_eq!(manga.status, MangaStatus::Ongoing);
        assert_eq!(manga.description, "Story");
        assert_eq!(manga.genres, vec!["Action"]);

        let err = parse_details(r#"{"status":404,"data":null}"#, "nope", NOW).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_details_failure_returns_partial() {
        let manga = settle_details(Ok("<html><pre>oops</pre></html>".to_string()), "solo-leveling", NOW).unwrap();
        assert_eq!(manga.title, "Solo Leveling");
        assert_eq!(manga.url, "https://v1.komikcast.fit/series/solo-leveling");

        assert!(settle_details(Err(SourceError::Status(502)), "alpha", NOW).is_ok());
        assert!(settle_details(Err(SourceError::Status(404)), "alpha", NOW).unwrap_err().is_not_found());
        assert!(settle_details(Ok(r#"{"data":null}"#.to_string()), "alpha", NOW).unwrap_err().is_not_found());
    }

    #[test]
    fn test_chapters_sorted_with_fallback_names() {
        let json = r#"{"data":[
            {"id":1,"data":{"title":"","index":1,"slug":null},"createdAt":"2024-01-01T00:00:00Z"},
            {"id":3,"data":{"title":"The End","index":"10.5","slug":"10-5"},"createdAt":"bad"},
            {"id":2,"data":{"index":2},"createdAt":"2024-01-02T00:00:00Z"}
        ]}"#;
        let chapters = parse_chapters(json, "alpha", NOW).unwrap();
        let numbers: Vec<f32> = chapters.iter().map(|c| c.chapter_number).collect();
        assert_eq!(numbers, vec![10.5, 2.0, 1.0]);
        assert_eq!(chapters[0].url, "https://v1.komikcast.fit/series/alpha/chapter/10-5");
        assert_eq!(chapters[0].date_upload, NOW);
        assert_eq!(chapters[2].name, "Chapter 1");
        assert_eq!(chapters[2].url, "https://v1.komikcast.fit/series/alpha/chapter/1");
    }

    #[test]
    fn test_page_urls() {
        assert_eq!(
            chapter_api_url("https://v1.komikcast.fit/series/alpha/chapter/3"),
            "https://be.komikcast.fit/series/alpha/chapters/3"
        );
        let pages = parse_pages(r#"{"data":{"id":1,"data":{"index":3,"images":["https://c/1.jpg","https://c/2.jpg"]}}}"#).unwrap();
        assert_eq!(pages.len(), 2);
        assert_eq!(pages[1].referer(), Some("https://v1.komikcast.fit/"));
    }
}
