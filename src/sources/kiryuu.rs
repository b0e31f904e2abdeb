use crate::error::{Result, SourceError};
use crate::extract::{ancestors, attr_of, image_source, select_all, select_doc, select_first, text_of};
use crate::helpers::{
    absolute_url, clamp_to_now, decode_html_entities, extract_chapter_number, now_millis,
    optimistic_total_pages, parse_timestamp, slug_from, sort_chapters, sort_latest, strip_html,
    title_from_slug, with_referer,
};
use crate::http_client::Fetcher;
use crate::models::{Chapter, ImageRequest, Manga, MangaPage, MangaStatus, Source, UNKNOWN_AUTHOR};
use crate::source::{details_or_partial, SourceAdapter, StatusFilter, TypeFilter};
use crate::sources::json::lenient_string;
use async_trait::async_trait;
use reqwest::header::HeaderMap;
use scraper::{ElementRef, Html};
use serde::Deserialize;
use std::collections::HashSet;

pub const BASE_URL: &str = "https://kiryuu03.com";

const TITLE_NODES: &[&str] = &["h1", "h3", "h4", "a[title]"];
const STAT_PIXELS: &[&str] = &["histats", "stats."];

/// Images on the envira gallery CDN are served without a referer check
fn image_request(url: &str) -> ImageRequest {
    if url.contains("envira-cdn") {
        ImageRequest::new(url)
    } else {
        with_referer(url, BASE_URL)
    }
}

fn listing_url(path: &str, page: u32) -> String {
    if page <= 1 {
        format!("{}/{}/", BASE_URL, path)
    } else {
        format!("{}/{}/?the_page={}", BASE_URL, path, page)
    }
}

fn first_title_node(card: ElementRef<'_>) -> Option<ElementRef<'_>> {
    TITLE_NODES.iter().find_map(|css| select_first(card, css))
}

fn is_manga_link(a: ElementRef<'_>) -> bool {
    attr_of(a, "href").is_some_and(|h| h.contains("/manga/"))
}

/// Link to the series page: the title node itself, a link inside it, or any `/manga/` link in the card
fn card_link<'a>(card: ElementRef<'a>, title: Option<ElementRef<'a>>) -> Option<ElementRef<'a>> {
    title
        .and_then(|t| {
            if t.value().name() == "a" {
                Some(t)
            } else {
                select_first(t, "a")
            }
        })
        .or_else(|| select_all(card, "a").into_iter().find(|a| is_manga_link(*a)))
}

fn build_card(
    link: ElementRef<'_>,
    title: Option<ElementRef<'_>>,
    img: Option<ElementRef<'_>>,
    last_update: i64,
) -> Option<Manga> {
    let href = attr_of(link, "href")?;
    let slug = slug_from(&href);
    if slug.is_empty() {
        return None;
    }
    let title = title
        .map(text_of)
        .filter(|t| !t.is_empty())
        .or_else(|| attr_of(link, "title"))
        .map(|t| decode_html_entities(&t).trim().to_string())
        .unwrap_or_default();

    let mut manga = Manga::new(Source::Kiryuu, slug, title)
        .with_thumbnail(img.and_then(image_source).map(|u| image_request(&absolute_url(&u, BASE_URL))));
    manga.last_update = last_update;
    manga.status = MangaStatus::Ongoing;
    Some(manga)
}

fn time_of(card: ElementRef<'_>, now: i64) -> i64 {
    select_first(card, "time")
        .and_then(|t| attr_of(t, "datetime"))
        .and_then(|d| parse_timestamp(&d))
        .map_or(now, |ts| clamp_to_now(ts, now))
}

/// The `/project/` grid: one card per child of `#search-results`
fn parse_project_cards(html: &str, now: i64) -> Vec<Manga> {
    let doc = Html::parse_document(html);
    let mut seen = HashSet::new();
    select_doc(&doc, "div#search-results > div")
        .into_iter()
        .filter_map(|card| {
            let title = first_title_node(card);
            let link = card_link(card, title).filter(|l| is_manga_link(*l))?;
            let img = select_first(card, "img.wp-post-image").or_else(|| select_first(card, "img"));
            let manga = build_card(link, title, img, time_of(card, now))?;
            seen.insert(manga.url.clone()).then_some(manga)
        })
        .collect()
}

/// The `/latest/` page has no stable card class, so every `<time>` is taken as
/// an anchor and its nearest ancestor holding both a title and an image is the card
fn parse_latest_cards(html: &str, now: i64) -> Vec<Manga> {
    let doc = Html::parse_document(html);
    let times = select_doc(&doc, "time");
    if times.is_empty() {
        return parse_project_cards(html, now);
    }

    let mut seen = HashSet::new();
    let mut items = Vec::new();
    for time in times {
        let last_update = attr_of(time, "datetime")
            .and_then(|d| parse_timestamp(&d))
            .map_or(now, |ts| clamp_to_now(ts, now));

        let mut found = None;
        for card in ancestors(time, 5) {
            let title = first_title_node(card).or_else(|| {
                select_all(card, "a")
                    .into_iter()
                    .find(|a| is_manga_link(*a) && !text_of(*a).is_empty())
            });
            let img = select_first(card, "img");
            found = Some((card, title, img));
            if title.is_some() && img.is_some() {
                break;
            }
        }

        let Some((card, Some(title), img)) = found else { continue };
        let Some(link) = card_link(card, Some(title)) else { continue };
        if let Some(manga) = build_card(link, Some(title), img, last_update) {
            if seen.insert(manga.url.clone()) {
                items.push(manga);
            }
        }
    }
    items
}

#[derive(Deserialize, Default)]
struct Rendered {
    #[serde(default)]
    rendered: String,
}

#[derive(Deserialize)]
struct WpManga {
    #[serde(default)]
    id: i64,
    #[serde(default)]
    slug: String,
    #[serde(default)]
    title: Rendered,
    #[serde(default)]
    content: Rendered,
    #[serde(rename = "_embedded")]
    embedded: Option<WpEmbedded>,
}

#[derive(Deserialize)]
struct WpEmbedded {
    #[serde(rename = "wp:featuredmedia", default)]
    featured_media: Vec<WpMedia>,
    #[serde(rename = "wp:term", default)]
    terms: Vec<Vec<WpTerm>>,
}

#[derive(Deserialize)]
struct WpMedia {
    source_url: Option<String>,
}

#[derive(Deserialize)]
struct WpTerm {
    #[serde(default)]
    name: String,
    #[serde(default)]
    slug: String,
    #[serde(default)]
    taxonomy: String,
}

#[derive(Deserialize)]
struct KiruChapter {
    #[serde(default)]
    id: i64,
    title: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    number: String,
    #[serde(default)]
    content: String,
    date: Option<String>,
}

fn map_wp_manga(item: WpManga) -> Manga {
    let mut manga = Manga::new(
        Source::Kiryuu,
        item.slug,
        decode_html_entities(&item.title.rendered).trim(),
    );
    manga.description = strip_html(&item.content.rendered);

    let Some(embedded) = item.embedded else { return manga };
    manga.thumbnail = embedded
        .featured_media
        .first()
        .and_then(|m| m.source_url.as_deref())
        .filter(|u| !u.is_empty())
        .map(image_request);

    let mut artists = Vec::new();
    for term in embedded.terms.into_iter().flatten() {
        let name = decode_html_entities(&term.name).trim().to_string();
        match term.taxonomy.to_lowercase().as_str() {
            "genres" | "genre" => manga.genres.push(name),
            "status" => {
                manga.status = match term.slug.to_lowercase().as_str() {
                    "ongoing" => MangaStatus::Ongoing,
                    "completed" => MangaStatus::Completed,
                    "hiatus" => MangaStatus::OnHiatus,
                    _ => MangaStatus::Unknown,
                }
            }
            "author" => manga.author = name,
            "artist" => artists.push(name),
            _ => {}
        }
    }
    for artist in artists {
        if manga.author == UNKNOWN_AUTHOR {
            manga.author = artist;
        } else {
            manga.author = format!("{}, {}", manga.author, artist);
        }
    }
    manga
}

/// WordPress reports the page count of a collection in `X-WP-TotalPages`
fn wp_total_pages(headers: &HeaderMap) -> Option<u32> {
    headers
        .get("x-wp-totalpages")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

fn parse_wp_list(json: &str) -> Result<Vec<WpManga>> {
    Ok(serde_json::from_str(json)?)
}

/// One search page; WordPress totals bound the paging when the header is present
fn parse_search(headers: &HeaderMap, json: &str, page: u32) -> Result<Vec<Manga>> {
    if wp_total_pages(headers).is_some_and(|total| page > total) {
        return Ok(Vec::new());
    }
    Ok(parse_wp_list(json)?.into_iter().map(map_wp_manga).collect())
}

/// A numeric id answers with one post, a slug with a list
fn parse_details(json: &str, id: &str) -> Result<Manga> {
    let item = if id.parse::<i64>().is_ok() {
        Some(serde_json::from_str::<WpManga>(json)?)
    } else {
        parse_wp_list(json)?.into_iter().next()
    };
    item.map(map_wp_manga)
        .ok_or_else(|| SourceError::NotFound(format!("Kiryuu manga {}", id)))
}

fn settle_details(fetched: Result<String>, id: &str) -> Result<Manga> {
    details_or_partial(
        "Kiryuu",
        id,
        fetched.and_then(|json| parse_details(&json, id)),
        || {
            let slug = slug_from(id);
            Manga::new(Source::Kiryuu, slug.clone(), title_from_slug(&slug))
        },
    )
}

fn parse_chapters(json: &str, manga_id: &str, now: i64) -> Result<Vec<Chapter>> {
    let list: Vec<KiruChapter> = serde_json::from_str(json)?;
    let mut chapters: Vec<Chapter> = list
        .into_iter()
        .map(|kc| {
            let name = kc
                .title
                .filter(|t| !t.trim().is_empty())
                .unwrap_or_else(|| format!("Chapter {}", kc.number));
            let mut chapter = Chapter::new(kc.id.to_string(), name, extract_chapter_number(&kc.number));
            chapter.id = kc.id.to_string();
            chapter.manga_id = manga_id.to_string();
            chapter.date_upload = kc
                .date
                .as_deref()
                .and_then(parse_timestamp)
                .map_or(now, |ts| clamp_to_now(ts, now));
            chapter
        })
        .collect();
    sort_chapters(&mut chapters);
    Ok(chapters)
}

fn parse_pages(json: &str) -> Result<Vec<ImageRequest>> {
    let chapter: KiruChapter = serde_json::from_str(json)?;
    let fragment = Html::parse_fragment(&chapter.content);
    Ok(select_all(fragment.root_element(), "img")
        .into_iter()
        .filter_map(|img| {
            ["data-src", "data-original", "src"]
                .iter()
                .find_map(|a| attr_of(img, a))
        })
        .filter(|src| !STAT_PIXELS.iter().any(|p| src.contains(p)))
        .map(|src| image_request(&absolute_url(&src, BASE_URL)))
        .collect())
}

/// Kiryuu - WordPress site; listings are scraped, everything else uses its REST API
pub struct Kiryuu {
    fetcher: Fetcher,
}

impl Kiryuu {
    pub fn new(fetcher: Fetcher) -> Self {
        Self { fetcher }
    }

    async fn scrape(&self, url: &str, latest: bool) -> Vec<Manga> {
        log::debug!("[Kiryuu] Scraping {}", url);
        let html = self.fetcher.fetch(url).await;
        if html.is_empty() {
            return Vec::new();
        }
        let now = now_millis();
        if latest {
            parse_latest_cards(&html, now)
        } else {
            parse_project_cards(&html, now)
        }
    }

    /// Numeric WordPress id for a slug, URL or id
    async fn resolve_id(&self, manga_id: &str) -> Option<String> {
        if manga_id.parse::<i64>().is_ok() {
            return Some(manga_id.to_string());
        }
        let url = format!("{}/wp-json/wp/v2/manga?slug={}", BASE_URL, slug_from(manga_id));
        let json = self.fetcher.get_text(&url).await.ok()?;
        parse_wp_list(&json).ok()?.first().map(|m| m.id.to_string())
    }
}

#[async_trait]
impl SourceAdapter for Kiryuu {
    fn id(&self) -> Source {
        Source::Kiryuu
    }

    fn name(&self) -> &'static str {
        "Kiryuu"
    }

    fn base_url(&self) -> &'static str {
        BASE_URL
    }

    fn language(&self) -> &str {
        "id"
    }

    async fn get_popular_manga(&self, page: u32) -> Vec<Manga> {
        self.scrape(&listing_url("project", page), false).await
    }

    async fn get_latest_manga(&self, page: u32) -> MangaPage {
        let mut items = self.scrape(&listing_url("latest", page), true).await;
        sort_latest(&mut items);
        let total = optimistic_total_pages(page, items.len());
        MangaPage::new(items, total)
    }

    async fn get_manga_list(&self, page: u32) -> MangaPage {
        let items = self.get_popular_manga(page).await;
        let total = optimistic_total_pages(page, items.len());
        MangaPage::new(items, total)
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
        let url = format!(
            "{}/wp-json/wp/v2/manga?search={}&page={}&_embed",
            BASE_URL,
            urlencoding::encode(query.trim()),
            page
        );
        // WordPress answers 400 for pages past the end
        let (headers, json) = match self.fetcher.get_text_and_headers(&url).await {
            Ok(pair) => pair,
            Err(e) => {
                log::debug!("[Kiryuu] Search {:?} page {} failed: {}", query, page, e);
                return Vec::new();
            }
        };
        parse_search(&headers, &json, page).unwrap_or_else(|e| {
            log::warn!("[Kiryuu] Unexpected search payload: {}", e);
            Vec::new()
        })
    }

    async fn get_manga_details(&self, id: &str) -> Result<Manga> {
        let numeric = id.parse::<i64>().is_ok();
        let url = if numeric {
            format!("{}/wp-json/wp/v2/manga/{}?_embed", BASE_URL, id)
        } else {
            format!("{}/wp-json/wp/v2/manga?slug={}&_embed", BASE_URL, slug_from(id))
        };

        settle_details(self.fetcher.get_text(&url).await, id)
    }

    async fn get_chapter_list(&self, manga_id: &str) -> Vec<Chapter> {
        let Some(id) = self.resolve_id(manga_id).await else {
            log::warn!("[Kiryuu] Could not resolve {} to a post id", manga_id);
            return Vec::new();
        };
        let url = format!("{}/wp-json/kiru/v1/chapter?parent_id={}&per_page=2000", BASE_URL, id);
        match self.fetcher.get_text(&url).await {
            Ok(json) => parse_chapters(&json, &id, now_millis()).unwrap_or_else(|e| {
                log::warn!("[Kiryuu] Unexpected chapter payload for {}: {}", id, e);
                Vec::new()
            }),
            Err(e) => {
                log::warn!("[Kiryuu] Failed to fetch chapters for {}: {}", id, e);
                Vec::new()
            }
        }
    }

    async fn get_page_list(&self, chapter_id: &str) -> Vec<ImageRequest> {
        let url = format!("{}/wp-json/kiru/v1/chapter?id={}", BASE_URL, slug_from(chapter_id));
        match self.fetcher.get_text(&url).await {
            Ok(json) => parse_pages(&json).unwrap_or_else(|e| {
                log::warn!("[Kiryuu] Unexpected page payload for {}: {}", chapter_id, e);
                Vec::new()
            }),
            Err(e) => {
                log::warn!("[Kiryuu] Error fetching pages for {}: {}", chapter_id, e);
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: i64 = 1_718_000_000_000;

    #[test]
    fn test_project_cards() {
        let html = r#"<div id="search-results">
            <div><a href="https://kiryuu03.com/manga/omniscient-reader/"><img class="wp-post-image" src="data:image/gif;base64,A" data-src="https://kiryuu03.com/wp-content/or.jpg"></a>
                 <h3><a href="https://kiryuu03.com/manga/omniscient-reader/">Omniscient &amp; Reader</a></h3>
                 <time datetime="2024-06-01T00:00:00+00:00"></time></div>
            <div><h3><a href="https://kiryuu03.com/manga/omniscient-reader/">Duplicate</a></h3></div>
            <div><h3><a href="https://kiryuu03.com/news/hello/">News</a></h3></div>
            <div><a title="Envira" href="/manga/envira/"><img src="https://envira-cdn.example/e.jpg"></a></div>
        </div>"#;
        let items = parse_project_cards(html, NOW);
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].url, "omniscient-reader");
        assert_eq!(items[0].title, "Omniscient & Reader");
        assert_eq!(items[0].last_update, 1_717_200_000_000);
        assert_eq!(
            items[0].thumbnail.as_ref().and_then(|t| t.referer()),
            Some("https://kiryuu03.com/")
        );
        assert_eq!(items[1].title, "Envira");
        assert!(items[1].thumbnail.as_ref().is_some_and(|t| t.headers.is_empty()));
    }

    #[test]
    fn test_latest_cards_walk_up_from_time() {
        let html = r#"<div class="grid">
            <div class="card"><img src="https://kiryuu03.com/a.jpg">
                <div class="info"><h4><a href="/manga/alpha/">Alpha</a></h4>
                    <div class="meta"><time datetime="2024-06-02T00:00:00+00:00"></time></div></div></div>
            <div class="card"><img src="https://kiryuu03.com/b.jpg">
                <a href="/manga/beta/">Beta</a><time datetime="bogus"></time></div>
            <div class="card"><img src="https://kiryuu03.com/c.jpg">
                <a href="/manga/gamma/">Gamma</a><time datetime="2031-01-01T00:00:00+00:00"></time></div>
        </div>"#;
        let items = parse_latest_cards(html, NOW);
        let titles: Vec<&str> = items.iter().map(|m| m.title.as_str()).collect();
        assert_eq!(titles, vec!["Alpha", "Beta", "Gamma"]);
        assert_eq!(items[0].last_update, 1_717_286_400_000);
        assert_eq!(items[1].last_update, NOW);
        assert_eq!(items[2].last_update, NOW);
        assert_eq!(items[0].thumbnail.as_ref().map(|t| t.url.as_str()), Some("https://kiryuu03.com/a.jpg"));
    }

    #[test]
    fn test_wp_manga_mapping() {
        let json = r#"[{"id":77,"slug":"alpha","title":{"rendered":"Alpha &#8211; Beta"},
            "content":{"rendered":"<p>First line</p><p>Second</p>"},
            "_embedded":{"wp:featuredmedia":[{"source_url":"https://kiryuu03.com/c.jpg"}],
            "wp:term":[[{"name":"Action","slug":"action","taxonomy":"genres"}],
                       [{"name":"Ongoing","slug":"ongoing","taxonomy":"status"}],
                       [{"name":"Sing","slug":"sing","taxonomy":"artist"},{"name":"Chu","slug":"chu","taxonomy":"author"}]]}}]"#;
        let manga = map_wp_manga(parse_wp_list(json).unwrap().remove(0));
        assert_eq!(manga.url, "alpha");
        assert_eq!(manga.title, "Alpha \u{2013} Beta");
        assert_eq!(manga.description, "First line\nSecond");
        assert_eq!(manga.genres, vec!["Action"]);
        assert_eq!(manga.status, MangaStatus::Ongoing);
        assert_eq!(manga.author, "Chu, Sing");
        assert!(manga.thumbnail.is_some());
    }

    #[test]
    fn test_chapters_sorted() {
        let json = r#"[
            {"id":5,"title":null,"number":"913,5","date":"2024-05-01T00:00:00"},
            {"id":6,"title":"Chapter 1160 - FIX","number":"1160 - FIX","date":"garbage"},
            {"id":4,"title":"Chapter 2","number":2}
        ]"#;
        let chapters = parse_chapters(json, "77", NOW).unwrap();
        let numbers: Vec<f32> = chapters.iter().map(|c| c.chapter_number).collect();
        assert_eq!(numbers, vec![1160.0, 913.5, 2.0]);
        assert_eq!(chapters[1].name, "Chapter 913,5");
        assert_eq!(chapters[1].url, "5");
        assert_eq!(chapters[0].date_upload, NOW);
        assert_eq!(chapters[2].manga_id, "77");
    }

    #[test]
    fn test_total_pages_header() {
        let mut headers = HeaderMap::new();
        assert_eq!(wp_total_pages(&headers), None);
        headers.insert("X-WP-TotalPages", "4".parse().unwrap());
        assert_eq!(wp_total_pages(&headers), Some(4));
    }

    #[test]
    fn test_search_bounded_by_total_pages() {
        let json = r#"[{"id":1,"slug":"alpha","title":{"rendered":"Alpha"}}]"#;
        let mut headers = HeaderMap::new();
        assert_eq!(parse_search(&headers, json, 7).unwrap().len(), 1);
        headers.insert("x-wp-totalpages", "2".parse().unwrap());
        assert_eq!(parse_search(&headers, json, 2).unwrap().len(), 1);
        assert!(parse_search(&headers, json, 3).unwrap().is_empty());
    }

    #[test]
    fn test_details_by_id_slug_and_failure() {
        let by_id = settle_details(Ok(r#"{"id":77,"slug":"alpha","title":{"rendered":"Alpha"}}"#.into()), "77");
        assert_eq!(by_id.unwrap().url, "alpha");
        let by_slug = settle_details(Ok(r#"[]"#.into()), "https://kiryuu03.com/manga/alpha/");
        assert!(by_slug.unwrap_err().is_not_found());

        let partial = settle_details(Ok("<html>cloudflare</html>".into()), "https://kiryuu03.com/manga/solo-leveling/").unwrap();
        assert_eq!(partial.url, "solo-leveling");
        assert_eq!(partial.title, "Solo Leveling");
        assert!(settle_details(Err(SourceError::Status(500)), "alpha").is_ok());
    }

    #[test]
    fn test_pages_skip_stat_pixels() {
        let json = r#"{"id":5,"content":"<p><img data-src=\"//kiryuu03.com/1.jpg\"><img src=\"https://sstatic1.histats.com/0.gif\"><img src=\"https://envira-cdn.example/2.jpg\"></p>"}"#;
        let pages = parse_pages(json).unwrap();
        assert_eq!(pages.len(), 2);
        assert_eq!(pages[0].to_string(), "https://kiryuu03.com/1.jpg|Referer=https://kiryuu03.com/");
        assert_eq!(pages[1].to_string(), "https://envira-cdn.example/2.jpg");
    }
}
