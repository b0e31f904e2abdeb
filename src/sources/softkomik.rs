use crate::error::{Result, SourceError};
use crate::helpers::{
    cached_regex, format_chapter_number, now_millis, optimistic_total_pages, parse_status, parse_timestamp, push_unique,
    relative_path, sort_latest, stamp_listing_order, title_from_slug, with_referer, StatusTable,
};
use crate::http_client::Fetcher;
use crate::models::{Chapter, ImageRequest, Manga, MangaPage, MangaStatus, Source};
use crate::source::{details_or_partial, SourceAdapter, StatusFilter, TypeFilter};
use crate::sources::json::lenient_string;
use async_trait::async_trait;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::sync::OnceLock;

pub const BASE_URL: &str = "https://softkomik.com";
const COVER_BASE: &str = "https://cover.softdevices.my.id/softkomik-cover/";
const CDN_PRIMARY: &str = "https://gd1.softkomik.com/softkomik";
const CDN_INTER2: &str = "https://cd3.softkomik.com/softkomik";

const STATUS: StatusTable = &[
    ("ongoing", MangaStatus::Ongoing),
    ("completed", MangaStatus::Completed),
    ("tamat", MangaStatus::Completed),
];

#[derive(Deserialize)]
struct NextData<T> {
    props: Props<T>,
}

#[derive(Deserialize)]
struct Props<T> {
    #[serde(rename = "pageProps")]
    page_props: PageProps<T>,
}

#[derive(Deserialize)]
struct PageProps<T> {
    data: Option<T>,
}

#[derive(Deserialize)]
struct ListData {
    #[serde(default, rename = "maxPage")]
    max_page: u32,
    #[serde(default)]
    data: Vec<KomikItem>,
}

#[derive(Deserialize)]
struct KomikItem {
    title: Option<String>,
    title_slug: Option<String>,
    gambar: Option<String>,
    status: Option<String>,
    updated_at: Option<String>,
}

#[derive(Deserialize)]
struct DetailData {
    title: Option<String>,
    title_slug: Option<String>,
    sinopsis: Option<String>,
    gambar: Option<String>,
    status: Option<String>,
    author: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    latest_chapter: String,
    #[serde(default, rename = "Genre")]
    genre: Vec<String>,
}

#[derive(Deserialize)]
struct ReaderData {
    data: Option<ImagesData>,
}

#[derive(Deserialize)]
struct ImagesData {
    #[serde(default, rename = "imageSrc")]
    image_src: Vec<String>,
    #[serde(default, rename = "storageInter2")]
    storage_inter2: bool,
}

/// Pull the page payload out of a Next.js `__NEXT_DATA__` script
fn extract_next_data<T: DeserializeOwned>(html: &str) -> Result<Option<T>> {
    static NEXT_DATA: OnceLock<Option<Regex>> = OnceLock::new();
    let re = cached_regex(
        &NEXT_DATA,
        r#"(?s)<script id="__NEXT_DATA__" type="application/json"[^>]*>(.+?)</script>"#,
    )
    .ok_or_else(|| SourceError::Parse("__NEXT_DATA__ pattern".into()))?;

    let json = re
        .captures(html)
        .and_then(|c| c.get(1))
        .ok_or_else(|| SourceError::Parse("no __NEXT_DATA__ in page".into()))?
        .as_str();
    let data: NextData<T> = serde_json::from_str(json)?;
    Ok(data.props.page_props.data)
}

/// Covers may be AVIF, so they are converted to WebP through the wsrv.nl proxy
fn cover_request(path: Option<&str>) -> Option<ImageRequest> {
    let path = path.map(str::trim).filter(|p| !p.is_empty())?;
    let absolute = if path.starts_with("http") {
        path.to_string()
    } else {
        format!("{}{}", COVER_BASE, path.trim_start_matches('/'))
    };
    Some(ImageRequest::new(format!(
        "https://wsrv.nl/?url={}&output=webp&w=256&q=75",
        urlencoding::encode(&absolute)
    )))
}

/// `https://softkomik.com/one-piece`, `/one-piece` and `one-piece` all name the same series
fn slug_path(id: &str) -> String {
    let path = relative_path(id, BASE_URL);
    let path = path.split(['?', '#']).next().unwrap_or_default();
    path.trim_matches('/').to_string()
}

fn map_item(item: KomikItem, now: i64) -> Option<Manga> {
    let slug = item.title_slug.filter(|s| !s.is_empty())?;
    let title = item
        .title
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| title_from_slug(&slug));
    let mut manga = Manga::new(Source::Softkomik, slug, title)
        .with_thumbnail(cover_request(item.gambar.as_deref()));
    manga.status = parse_status(item.status.as_deref().unwrap_or_default(), STATUS);
    manga.last_update = item
        .updated_at
        .as_deref()
        .and_then(parse_timestamp)
        .map(|ts| ts.min(now))
        .unwrap_or(0);
    Some(manga)
}

fn parse_list(html: &str, page: u32, now: i64) -> Result<MangaPage> {
    let Some(list) = extract_next_data::<ListData>(html)? else {
        return Ok(MangaPage::empty(page));
    };
    let items: Vec<Manga> = list.data.into_iter().filter_map(|i| map_item(i, now)).collect();
    let total = if list.max_page > 0 {
        list.max_page.max(page)
    } else {
        optimistic_total_pages(page, items.len())
    };
    Ok(MangaPage::new(items, total))
}

fn parse_details(html: &str, slug: &str) -> Result<(Manga, String)> {
    let data = extract_next_data::<DetailData>(html)?
        .ok_or_else(|| SourceError::NotFound(format!("Softkomik series {}", slug)))?;

    let url = data.title_slug.filter(|s| !s.is_empty()).unwrap_or_else(|| slug.to_string());
    let title = data
        .title
        .filter(|t| !t.trim().is_empty())
        .unwrap_or_else(|| title_from_slug(slug));
    let mut manga = Manga::new(Source::Softkomik, url, title.trim())
        .with_thumbnail(cover_request(data.gambar.as_deref()));
    manga.description = data.sinopsis.unwrap_or_default().trim().to_string();
    if let Some(author) = data.author.filter(|a| !a.trim().is_empty()) {
        manga.author = author.trim().to_string();
    }
    manga.status = parse_status(data.status.as_deref().unwrap_or_default(), STATUS);
    for g in &data.genre {
        push_unique(&mut manga.genres, g);
    }
    Ok((manga, data.latest_chapter))
}

/// Upper bound on chapters synthesized from one latest number
const MAX_SYNTHESIZED: u32 = 5000;

fn settle_details(fetched: Result<String>, slug: &str) -> Result<Manga> {
    details_or_partial(
        "Softkomik",
        slug,
        fetched.and_then(|html| parse_details(&html, slug).map(|(manga, _)| manga)),
        || Manga::new(Source::Softkomik, slug, title_from_slug(slug)),
    )
}

/// The site only exposes the newest chapter number; every whole chapter below
/// it is assumed to exist at `/{slug}/chapter/{NNN}`. Dates are unknown, so
/// every chapter carries the fetch time.
fn synthesize_chapters(slug: &str, latest: &str, now: i64) -> Vec<Chapter> {
    let latest = latest.trim();
    let chapter = |url: String, name: String, number: f32| {
        let mut chapter = Chapter::new(url, name, number);
        chapter.manga_id = slug.to_string();
        chapter.date_upload = now;
        chapter
    };

    match latest.parse::<f32>() {
        Ok(max) if max.is_finite() && max >= 1.0 => {
            let whole = max as u32;
            let lowest = whole.saturating_sub(MAX_SYNTHESIZED - 1).max(1);
            let mut chapters = Vec::new();
            if max.fract() > 0.0 {
                chapters.push(chapter(
                    format!("{}/{}/chapter/{}", BASE_URL, slug, latest),
                    format!("Chapter {}", format_chapter_number(max)),
                    max,
                ));
            }
            chapters.extend((lowest..=whole).rev().map(|i| {
                chapter(
                    format!("{}/{}/chapter/{:03}", BASE_URL, slug, i),
                    format!("Chapter {}", i),
                    i as f32,
                )
            }));
            chapters
        }
        _ if latest.is_empty() => Vec::new(),
        _ => vec![chapter(
            format!("{}/{}/chapter/{}", BASE_URL, slug, latest),
            format!("Chapter {}", latest),
            0.0,
        )],
    }
}

fn parse_pages(html: &str) -> Result<Vec<ImageRequest>> {
    let Some(images) = extract_next_data::<ReaderData>(html)?.and_then(|r| r.data) else {
        return Ok(Vec::new());
    };
    let cdn = if images.storage_inter2 { CDN_INTER2 } else { CDN_PRIMARY };
    Ok(images
        .image_src
        .iter()
        .filter(|img| !img.is_empty())
        .map(|img| {
            if img.starts_with("http") {
                ImageRequest::new(img.as_str())
            } else {
                with_referer(&format!("{}/{}", cdn, img.trim_start_matches('/')), BASE_URL)
            }
        })
        .collect())
}

/// Softkomik - Next.js site; every page embeds its data as JSON
pub struct Softkomik {
    fetcher: Fetcher,
}

impl Softkomik {
    pub fn new(fetcher: Fetcher) -> Self {
        Self { fetcher }
    }

    fn listing_url(path: &str, page: u32) -> String {
        if page <= 1 {
            format!("{}/komik/{}", BASE_URL, path)
        } else {
            format!("{}/komik/{}?page={}", BASE_URL, path, page)
        }
    }

    async fn listing(&self, url: &str, page: u32) -> MangaPage {
        let html = self.fetcher.fetch(url).await;
        if html.is_empty() {
            return MangaPage::empty(page);
        }
        parse_list(&html, page, now_millis()).unwrap_or_else(|e| {
            log::warn!("[Softkomik] Could not read listing {}: {}", url, e);
            MangaPage::empty(page)
        })
    }

    async fn browse(&self, page: u32) -> MangaPage {
        let mut result = self.listing(&Self::listing_url("list", page), page).await;
        stamp_listing_order(&mut result.items, now_millis());
        result
    }
}

#[async_trait]
impl SourceAdapter for Softkomik {
    fn id(&self) -> Source {
        Source::Softkomik
    }

    fn name(&self) -> &'static str {
        "Softkomik"
    }

    fn base_url(&self) -> &'static str {
        BASE_URL
    }

    fn language(&self) -> &str {
        "id"
    }

    async fn get_popular_manga(&self, page: u32) -> Vec<Manga> {
        self.browse(page).await.items
    }

    async fn get_latest_manga(&self, page: u32) -> MangaPage {
        let mut result = self.listing(&Self::listing_url("update", page), page).await;
        stamp_listing_order(&mut result.items, now_millis());
        sort_latest(&mut result.items);
        result
    }

    async fn get_manga_list(&self, page: u32) -> MangaPage {
        self.browse(page).await
    }

    /// The list page has no filter parameters
    async fn get_filtered_manga(
        &self,
        page: u32,
        _status: StatusFilter,
        _kind: TypeFilter,
    ) -> MangaPage {
        self.browse(page).await
    }

    async fn search_manga(&self, query: &str, page: u32) -> Vec<Manga> {
        let mut url = format!("{}/komik/list?title={}", BASE_URL, urlencoding::encode(query.trim()));
        if page > 1 {
            url.push_str(&format!("&page={}", page));
        }
        self.listing(&url, page).await.items
    }

    async fn get_manga_details(&self, id: &str) -> Result<Manga> {
        let slug = slug_path(id);
        settle_details(self.fetcher.get_text(&format!("{}/{}", BASE_URL, slug)).await, &slug)
    }

    async fn get_chapter_list(&self, manga_id: &str) -> Vec<Chapter> {
        let slug = slug_path(manga_id);
        let html = self.fetcher.fetch(&format!("{}/{}", BASE_URL, slug)).await;
        if html.is_empty() {
            return Vec::new();
        }
        match parse_details(&html, &slug) {
            Ok((_, latest)) => synthesize_chapters(&slug, &latest, now_millis()),
            Err(e) => {
                log::warn!("[Softkomik] No chapter data for {}: {}", slug, e);
                Vec::new()
            }
        }
    }

    async fn get_page_list(&self, chapter_id: &str) -> Vec<ImageRequest> {
        let url = if chapter_id.starts_with("http") {
            chapter_id.to_string()
        } else {
            format!("{}/{}", BASE_URL, chapter_id.trim_start_matches('/'))
        };
        let html = self.fetcher.fetch(&url).await;
        parse_pages(&html).unwrap_or_else(|e| {
            log::warn!("[Softkomik] No images found for {}: {}", url, e);
            Vec::new()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: i64 = 1_718_000_000_000;

    fn page_with(json: &str) -> String {
        format!(
            r#"<html><body><div id="__next"></div><script id="__NEXT_DATA__" type="application/json">{}</script></body></html>"#,
            json
        )
    }

    #[test]
    fn test_listing_with_max_page() {
        let html = page_with(
            r#"{"props":{"pageProps":{"data":{"page":1,"maxPage":12,"data":[
                {"title":"Alpha","title_slug":"alpha","gambar":"alpha.avif","status":"ongoing","updated_at":"2024-06-01T00:00:00Z"},
                {"title":"Beta","title_slug":"beta","status":"Tamat"},
                {"title":"Broken","title_slug":""}
            ]}}}}"#,
        );
        let result = parse_list(&html, 1, NOW).unwrap();
        assert_eq!(result.total_pages, 12);
        assert_eq!(result.items.len(), 2);
        assert_eq!(result.items[0].status, MangaStatus::Ongoing);
        assert_eq!(result.items[0].last_update, 1_717_200_000_000);
        assert_eq!(result.items[1].status, MangaStatus::Completed);
        assert_eq!(
            result.items[0].thumbnail.as_ref().map(|t| t.url.as_str()),
            Some("https://wsrv.nl/?url=https%3A%2F%2Fcover.softdevices.my.id%2Fsoftkomik-cover%2Falpha.avif&output=webp&w=256&q=75")
        );
    }

    #[test]
    fn test_listing_without_max_page_is_optimistic() {
        let html = page_with(r#"{"props":{"pageProps":{"data":{"data":[{"title":"A","title_slug":"a"}]}}}}"#);
        assert_eq!(parse_list(&html, 3, NOW).unwrap().total_pages, 4);

        let empty = page_with(r#"{"props":{"pageProps":{"data":{"data":[]}}}}"#);
        assert_eq!(parse_list(&empty, 3, NOW).unwrap().total_pages, 3);

        assert!(parse_list("<html></html>", 1, NOW).is_err());
    }

    #[test]
    fn test_details_and_missing_data() {
        let html = page_with(
            r#"{"props":{"pageProps":{"data":{"_id":"x","title":"Alpha","title_slug":"alpha",
                "sinopsis":" Cerita ","author":"Budi","status":"completed","latest_chapter":"015","Genre":["Aksi","Drama"]}}}}"#,
        );
        let (manga, latest) = parse_details(&html, "alpha").unwrap();
        assert_eq!(manga.author, "Budi");
        assert_eq!(manga.description, "Cerita");
        assert_eq!(manga.genres, vec!["Aksi", "Drama"]);
        assert_eq!(latest, "015");

        let missing = page_with(r#"{"props":{"pageProps":{"data":null}}}"#);
        assert!(parse_details(&missing, "alpha").unwrap_err().is_not_found());
    }

    #[test]
    fn test_details_failure_returns_partial() {
        let manga = settle_details(Ok("<html>maintenance</html>".into()), "solo-leveling").unwrap();
        assert_eq!(manga.title, "Solo Leveling");
        assert!(settle_details(Err(SourceError::Status(500)), "alpha").is_ok());
        let missing = page_with(r#"{"props":{"pageProps":{"data":null}}}"#);
        assert!(settle_details(Ok(missing), "alpha").unwrap_err().is_not_found());
    }

    #[test]
    fn test_synthesized_chapters() {
        let chapters = synthesize_chapters("alpha", "015", NOW);
        assert_eq!(chapters.len(), 15);
        assert_eq!(chapters[0].url, "https://softkomik.com/alpha/chapter/015");
        assert_eq!(chapters[0].chapter_number, 15.0);
        assert_eq!(chapters[0].date_upload, NOW);
        assert_eq!(chapters[14].url, "https://softkomik.com/alpha/chapter/001");

        let odd = synthesize_chapters("alpha", "oneshot", NOW);
        assert_eq!(odd.len(), 1);
        assert_eq!(odd[0].name, "Chapter oneshot");
        assert_eq!(odd[0].date_upload, NOW);
        assert!(synthesize_chapters("alpha", "", NOW).is_empty());
    }

    #[test]
    fn test_fractional_latest_kept_and_count_bounded() {
        let chapters = synthesize_chapters("alpha", "12.5", NOW);
        assert_eq!(chapters.len(), 13);
        assert_eq!(chapters[0].chapter_number, 12.5);
        assert_eq!(chapters[0].url, "https://softkomik.com/alpha/chapter/12.5");
        assert_eq!(chapters[1].chapter_number, 12.0);

        let huge = synthesize_chapters("alpha", "100000", NOW);
        assert_eq!(huge.len(), MAX_SYNTHESIZED as usize);
        assert_eq!(huge[0].chapter_number, 100_000.0);
        assert_eq!(huge.last().map(|c| c.chapter_number), Some(95_001.0));
    }

    #[test]
    fn test_pages_pick_cdn() {
        let html = page_with(
            r#"{"props":{"pageProps":{"data":{"chapter":"001","data":{"imageSrc":["img/alpha/001/01.jpg","https://ext.example/2.jpg"],"storageInter2":true}}}}}"#,
        );
        let pages = parse_pages(&html).unwrap();
        assert_eq!(
            pages[0].to_string(),
            "https://cd3.softkomik.com/softkomik/img/alpha/001/01.jpg|Referer=https://softkomik.com/"
        );
        assert!(pages[1].headers.is_empty());
    }

    #[test]
    fn test_slug_forms() {
        assert_eq!(slug_path("https://softkomik.com/alpha"), "alpha");
        assert_eq!(slug_path("/alpha/"), "alpha");
        assert_eq!(slug_path("alpha"), "alpha");
    }
}
