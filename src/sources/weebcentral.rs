use crate::error::{Result, SourceError};
use crate::extract::{attr_of, first_text, select_all, select_doc, select_first, text_of};
use crate::helpers::{
    absolute_url, decode_html_entities, extract_chapter_number, now_millis, optimistic_total_pages,
    parse_status, parse_timestamp, push_unique, relative_path, slug_from, sort_chapters, sort_latest,
    stamp_listing_order, title_from_slug, ENGLISH_STATUS,
};
use crate::http_client::Fetcher;
use crate::models::{Chapter, ImageRequest, Manga, MangaPage, Source};
use crate::source::{SourceAdapter, StatusFilter, TypeFilter};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue};
use scraper::{ElementRef, Html};
use std::collections::HashSet;

pub const BASE_URL: &str = "https://weebcentral.com";

const CARD_TITLE: &[&str] = &["div.truncate", "h2", "h3", "strong", "a.link-hover"];
const BRANDING: &[&str] = &["brand.png", "brand.svg", "logo"];

/// Ids are site paths without surrounding slashes: `series/01J76.../One-Piece`
fn path_id(href: &str) -> String {
    relative_path(href, BASE_URL).trim_matches('/').to_string()
}

fn page_url(id: &str) -> String {
    if id.starts_with("http") {
        id.to_string()
    } else {
        format!("{}/{}", BASE_URL, id.trim_start_matches('/'))
    }
}

/// `<source srcset>` first, then the `<img src>` inside `container`
fn cover_in(container: ElementRef<'_>) -> Option<String> {
    select_first(container, "source")
        .and_then(|s| attr_of(s, "srcset"))
        .and_then(|set| set.split([' ', ',']).find(|p| !p.is_empty()).map(str::to_string))
        .or_else(|| select_first(container, "img").and_then(|img| attr_of(img, "src")))
        .map(|u| absolute_url(&u, BASE_URL))
}

fn card_status(card: ElementRef<'_>) -> Option<String> {
    select_all(card, "strong")
        .into_iter()
        .filter(|s| text_of(*s).contains("Status"))
        .find_map(|s| {
            let parent = s.parent().and_then(ElementRef::wrap)?;
            select_first(parent, "span").map(text_of)
        })
}

/// `<article>` cards used by the search-data, home and latest-updates pages
fn parse_articles(root: ElementRef<'_>) -> Vec<Manga> {
    let mut seen = HashSet::new();
    select_all(root, "article")
        .into_iter()
        .filter_map(|card| {
            let link = select_all(card, "a")
                .into_iter()
                .find(|a| attr_of(*a, "href").is_some_and(|h| h.contains("/series/")))?;
            let id = path_id(&attr_of(link, "href")?);
            if !seen.insert(id.clone()) {
                return None;
            }

            let title = first_text(card, CARD_TITLE)
                .or_else(|| {
                    select_first(card, "img")
                        .and_then(|img| attr_of(img, "alt"))
                        .map(|alt| alt.replace(" cover", "").trim().to_string())
                })
                .map(|t| decode_html_entities(&t))
                .unwrap_or_else(|| title_from_slug(&slug_from(&id)));

            let mut manga = Manga::new(Source::Weebcentral, id, title)
                .with_thumbnail(cover_in(card).map(ImageRequest::new));
            if let Some(status) = card_status(card) {
                manga.status = parse_status(&status, ENGLISH_STATUS);
            }
            Some(manga)
        })
        .collect()
}

fn parse_listing(html: &str) -> Vec<Manga> {
    let doc = Html::parse_document(html);
    parse_articles(doc.root_element())
}

/// The home page mixes several feeds; only the update feed section is wanted
fn parse_home_feed(html: &str) -> Vec<Manga> {
    let doc = Html::parse_document(html);
    let root = select_doc(&doc, "section[x-data*=\"sub_feed_shown\"]")
        .into_iter()
        .next()
        .unwrap_or_else(|| doc.root_element());
    parse_articles(root)
}

fn parse_search(html: &str) -> Vec<Manga> {
    let doc = Html::parse_fragment(html);
    let mut seen = HashSet::new();
    select_all(doc.root_element(), "a")
        .into_iter()
        .filter_map(|a| {
            let href = attr_of(a, "href").filter(|h| h.contains("/series/"))?;
            let id = path_id(&href);
            if !seen.insert(id.clone()) {
                return None;
            }
            let title = first_text(a, &["div.flex-1"])
                .map(|t| decode_html_entities(&t))
                .unwrap_or_else(|| title_from_slug(&slug_from(&id)));
            let cover = select_first(a, "img")
                .and_then(|img| attr_of(img, "src"))
                .map(|u| ImageRequest::new(absolute_url(&u, BASE_URL)));
            Some(Manga::new(Source::Weebcentral, id, title).with_thumbnail(cover))
        })
        .collect()
}

fn is_branding(url: &str) -> bool {
    let lower = url.to_lowercase();
    BRANDING.iter().any(|b| lower.contains(b))
}

/// Series cover: the `#top` picture, then an image whose alt mentions "cover",
/// then the first non-logo image in a column section. Site branding is never a cover.
fn details_cover(doc: &Html) -> Option<String> {
    let by_top = || {
        select_doc(doc, "main div#top picture")
            .into_iter()
            .next()
            .and_then(cover_in)
    };
    let by_alt = || {
        select_doc(doc, "main img")
            .into_iter()
            .find(|img| attr_of(*img, "alt").is_some_and(|alt| alt.to_lowercase().contains("cover")))
            .and_then(|img| img.parent().and_then(ElementRef::wrap))
            .and_then(cover_in)
    };
    let by_section = || {
        select_doc(doc, "main section.flex-col img")
            .into_iter()
            .find(|img| attr_of(*img, "src").is_some_and(|src| !is_branding(&src)))
            .and_then(|img| img.parent().and_then(ElementRef::wrap))
            .and_then(cover_in)
    };

    by_top()
        .or_else(by_alt)
        .or_else(by_section)
        .filter(|url| !is_branding(url))
}

fn parse_details(html: &str, id: &str) -> Manga {
    let doc = Html::parse_document(html);
    let root = doc.root_element();
    let title = first_text(root, &["h1"])
        .map(|t| decode_html_entities(&t))
        .unwrap_or_else(|| title_from_slug(&slug_from(id)));
    let mut manga = Manga::new(Source::Weebcentral, id, title)
        .with_thumbnail(details_cover(&doc).map(ImageRequest::new));

    if let Some(author) = first_text(root, &["a[href*=\"/search?author=\"]"]) {
        manga.author = author;
    }
    if let Some(synopsis) = select_doc(&doc, "p.whitespace-pre-wrap").into_iter().next() {
        manga.description = synopsis.text().collect::<String>().trim().to_string();
    }
    for tag in select_doc(&doc, "a[href*=\"/search?included_tag=\"]") {
        push_unique(&mut manga.genres, &text_of(tag));
    }
    if let Some(status) = first_text(root, &["a[href*=\"/search?included_status=\"]"]) {
        manga.status = parse_status(&status, ENGLISH_STATUS);
    }
    manga
}

/// The series page hides older chapters behind a button; this endpoint lists them all
fn chapter_list_url(id: &str) -> String {
    let path = path_id(id);
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    match segments.as_slice() {
        ["series", series_id, ..] => format!("{}/series/{}/full-chapter-list", BASE_URL, series_id),
        _ if path.ends_with("/full-chapter-list") => page_url(&path),
        _ => format!("{}/full-chapter-list", page_url(&path).trim_end_matches('/')),
    }
}

fn parse_chapters(html: &str, manga_id: &str, now: i64) -> Vec<Chapter> {
    let doc = Html::parse_document(html);
    let mut seen = HashSet::new();
    let mut chapters: Vec<Chapter> = select_doc(&doc, "a")
        .into_iter()
        .filter_map(|a| {
            let href = attr_of(a, "href").filter(|h| h.contains("/chapters/"))?;
            let id = path_id(&href);
            if !seen.insert(id.clone()) {
                return None;
            }
            let name = select_all(a, "span")
                .into_iter()
                .map(text_of)
                .find(|t| t.contains("Chapter"))
                .or_else(|| first_text(a, &["span.truncate"]))
                .unwrap_or_else(|| text_of(a));

            let mut chapter = Chapter::new(id.clone(), name.clone(), extract_chapter_number(&name));
            chapter.id = slug_from(&id);
            chapter.manga_id = manga_id.to_string();
            chapter.date_upload = select_first(a, "time")
                .and_then(|t| attr_of(t, "datetime"))
                .and_then(|d| parse_timestamp(&d))
                .map_or(now, |ts| ts.min(now));
            Some(chapter)
        })
        .collect();
    sort_chapters(&mut chapters);
    chapters
}

/// Highest numbered button in the page-select dialog
fn page_count(doc: &Html) -> u32 {
    select_doc(doc, "dialog#page_select_modal button")
        .into_iter()
        .filter_map(|b| text_of(b).parse::<u32>().ok())
        .max()
        .unwrap_or(0)
}

/// Rebuild every page URL from the first one: `.../1174-001.png` with `count`
/// pages gives `-001` through `-{count}`, keeping the zero padding
fn expand_page_pattern(first: &str, count: u32) -> Vec<String> {
    let Some(dash) = first.rfind('-') else { return Vec::new() };
    let (prefix, rest) = first.split_at(dash + 1);
    let Some(dot) = rest.rfind('.') else { return Vec::new() };
    let extension = &rest[dot..];
    (1..=count)
        .map(|i| format!("{}{:0width$}{}", prefix, i, extension, width = dot))
        .collect()
}

fn parse_pages(html: &str) -> Vec<ImageRequest> {
    let doc = Html::parse_document(html);
    let count = page_count(&doc);
    let first = select_doc(&doc, "link[rel=\"preload\"][as=\"image\"]")
        .into_iter()
        .find_map(|l| attr_of(l, "href"))
        .or_else(|| {
            select_doc(&doc, "img")
                .into_iter()
                .filter_map(|img| attr_of(img, "src"))
                .find(|src| src.contains("/manga/"))
        });

    match first {
        Some(first) if count > 0 => expand_page_pattern(&first, count)
            .into_iter()
            .map(ImageRequest::new)
            .collect(),
        _ => Vec::new(),
    }
}

/// Weeb Central - server-rendered HTML with htmx fragments
pub struct Weebcentral {
    fetcher: Fetcher,
}

impl Weebcentral {
    pub fn new(fetcher: Fetcher) -> Self {
        Self { fetcher }
    }

    fn popular_url(page: u32) -> String {
        format!(
            "{}/search/data?sort=Popularity&order=Descending&official=Any&anime=Any&adult=Any&display_mode=Full+Display&page={}",
            BASE_URL, page
        )
    }

    async fn popular_page(&self, page: u32) -> MangaPage {
        let items = parse_listing(&self.fetcher.fetch(&Self::popular_url(page)).await);
        let total = optimistic_total_pages(page, items.len());
        MangaPage::new(items, total)
    }
}

#[async_trait]
impl SourceAdapter for Weebcentral {
    fn id(&self) -> Source {
        Source::Weebcentral
    }

    fn name(&self) -> &'static str {
        "Weebcentral"
    }

    fn base_url(&self) -> &'static str {
        BASE_URL
    }

    fn language(&self) -> &str {
        "en"
    }

    async fn get_popular_manga(&self, page: u32) -> Vec<Manga> {
        self.popular_page(page).await.items
    }

    async fn get_latest_manga(&self, page: u32) -> MangaPage {
        let mut items = if page <= 1 {
            parse_home_feed(&self.fetcher.fetch(BASE_URL).await)
        } else {
            let url = format!("{}/latest-updates/{}", BASE_URL, page);
            parse_listing(&self.fetcher.fetch(&url).await)
        };
        stamp_listing_order(&mut items, now_millis());
        sort_latest(&mut items);
        let total = optimistic_total_pages(page, items.len());
        MangaPage::new(items, total)
    }

    async fn get_manga_list(&self, page: u32) -> MangaPage {
        self.popular_page(page).await
    }

    async fn get_filtered_manga(
        &self,
        page: u32,
        _status: StatusFilter,
        _kind: TypeFilter,
    ) -> MangaPage {
        self.popular_page(page).await
    }

    /// The simple search endpoint returns a single unpaginated fragment
    async fn search_manga(&self, query: &str, page: u32) -> Vec<Manga> {
        if page > 1 || query.trim().is_empty() {
            return Vec::new();
        }
        let mut headers = HeaderMap::new();
        headers.insert("hx-request", HeaderValue::from_static("true"));

        let url = format!("{}/search/simple?location=main", BASE_URL);
        match self
            .fetcher
            .post_form(&url, &[("text", query.trim())], Some(headers))
            .await
        {
            Ok(html) => parse_search(&html),
            Err(e) => {
                log::warn!("[Weebcentral] Search {:?} failed: {}", query, e);
                Vec::new()
            }
        }
    }

    async fn get_manga_details(&self, id: &str) -> Result<Manga> {
        let series = path_id(id);
        match self.fetcher.get_text(&page_url(&series)).await {
            Ok(html) => Ok(parse_details(&html, &series)),
            Err(e) if e.is_not_found() => Err(SourceError::NotFound(format!("Weebcentral {}", series))),
            Err(e) => {
                log::warn!("[Weebcentral] Details for {} unavailable, returning partial: {}", series, e);
                Ok(Manga::new(Source::Weebcentral, series.clone(), title_from_slug(&slug_from(&series))))
            }
        }
    }

    async fn get_chapter_list(&self, manga_id: &str) -> Vec<Chapter> {
        let url = chapter_list_url(manga_id);
        let html = self.fetcher.fetch(&url).await;
        let chapters = parse_chapters(&html, &path_id(manga_id), now_millis());
        log::debug!("[Weebcentral] {} chapters from {}", chapters.len(), url);
        chapters
    }

    async fn get_page_list(&self, chapter_id: &str) -> Vec<ImageRequest> {
        let html = self.fetcher.fetch(&page_url(&path_id(chapter_id))).await;
        let pages = parse_pages(&html);
        if pages.is_empty() {
            log::warn!("[Weebcentral] Could not rebuild page list for {}", chapter_id);
        }
        pages
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MangaStatus;

    const NOW: i64 = 1_718_000_000_000;

    #[test]
    fn test_articles() {
        let html = r#"<html><body>
            <article>
                <a href="https://weebcentral.com/series/01AAA/One-Piece">
                    <picture><source srcset="https://temp.compsci88.com/cover/small/01AAA.webp 1x"><img src="/fallback.jpg" alt="One Piece cover"></picture>
                </a>
                <div class="truncate">One Piece</div>
                <div><strong>Status:</strong> <span>Ongoing</span></div>
            </article>
            <article>
                <a href="/series/01BBB/Berserk"><img src="/static/berserk.jpg" alt="Berserk cover"></a>
            </article>
            <article><a href="/news">News</a></article>
        </body></html>"#;
        let items = parse_listing(html);
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].url, "series/01AAA/One-Piece");
        assert_eq!(items[0].title, "One Piece");
        assert_eq!(items[0].status, MangaStatus::Ongoing);
        assert_eq!(
            items[0].thumbnail.as_ref().map(|t| t.url.as_str()),
            Some("https://temp.compsci88.com/cover/small/01AAA.webp")
        );
        assert_eq!(items[1].title, "Berserk");
        assert_eq!(
            items[1].thumbnail.as_ref().map(|t| t.url.as_str()),
            Some("https://weebcentral.com/static/berserk.jpg")
        );
    }

    #[test]
    fn test_home_feed_section() {
        let html = r#"<html><body>
            <section><article><a href="/series/01HOT/Hot">x</a><h2>Hot</h2></article></section>
            <section x-data="{ sub_feed_shown: false }"><article><a href="/series/01NEW/New">x</a><h2>New</h2></article></section>
        </body></html>"#;
        let items = parse_home_feed(html);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].title, "New");
    }

    #[test]
    fn test_search_fragment() {
        let html = r#"<a href="https://weebcentral.com/series/01AAA/One-Piece" class="btn">
            <img src="https://temp.compsci88.com/cover/small/01AAA.webp"><div class="flex-1">One Piece</div></a>
            <a href="https://weebcentral.com/series/01AAA/One-Piece">dup</a>"#;
        let items = parse_search(html);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].title, "One Piece");
    }

    #[test]
    fn test_details_skips_branding() {
        let html = r#"<html><body><header><img src="/static/images/brand.png"></header><main>
            <section class="flex-col"><img src="/static/images/logo.svg"></section>
            <div id="top"><picture><source srcset="https://temp.compsci88.com/cover/normal/01AAA.webp"></picture></div>
            <h1>One Piece</h1>
            <a href="/search?author=Oda">ODA Eiichiro</a>
            <a href="/search?included_tag=Action">Action</a><a href="/search?included_tag=Adventure">Adventure</a>
            <a href="/search?included_status=Ongoing">Ongoing</a>
            <p class="whitespace-pre-wrap"> Pirates. </p>
        </main></body></html>"#;
        let manga = parse_details(html, "series/01AAA/One-Piece");
        assert_eq!(manga.title, "One Piece");
        assert_eq!(manga.author, "ODA Eiichiro");
        assert_eq!(manga.genres, vec!["Action", "Adventure"]);
        assert_eq!(manga.status, MangaStatus::Ongoing);
        assert_eq!(manga.description, "Pirates.");
        assert_eq!(
            manga.thumbnail.as_ref().map(|t| t.url.as_str()),
            Some("https://temp.compsci88.com/cover/normal/01AAA.webp")
        );

        let logo_only = r#"<html><body><main><div id="top"><picture><img src="/static/images/brand.svg"></picture></div></main></body></html>"#;
        assert!(parse_details(logo_only, "series/x").thumbnail.is_none());
    }

    #[test]
    fn test_chapter_list() {
        assert_eq!(
            chapter_list_url("https://weebcentral.com/series/01AAA/One-Piece"),
            "https://weebcentral.com/series/01AAA/full-chapter-list"
        );
        assert_eq!(
            chapter_list_url("series/01AAA"),
            "https://weebcentral.com/series/01AAA/full-chapter-list"
        );

        let html = r#"<div>
            <a href="https://weebcentral.com/chapters/01C2"><span class="truncate">Chapter 1174</span><time datetime="2024-02-01T00:00:00.000Z"></time></a>
            <a href="https://weebcentral.com/chapters/01C1"><span>Chapter 1173.5</span></a>
            <a href="https://weebcentral.com/chapters/01C1"><span>Chapter 1173.5</span></a>
        </div>"#;
        let chapters = parse_chapters(html, "series/01AAA/One-Piece", NOW);
        assert_eq!(chapters.len(), 2);
        assert_eq!(chapters[0].url, "chapters/01C2");
        assert_eq!(chapters[0].id, "01C2");
        assert_eq!(chapters[0].chapter_number, 1174.0);
        assert_eq!(chapters[0].date_upload, 1_706_745_600_000);
        assert_eq!(chapters[1].chapter_number, 1173.5);
        assert_eq!(chapters[1].date_upload, NOW);
    }

    #[test]
    fn test_pages_from_pattern() {
        let html = r#"<html><head><link rel="preload" as="image" href="https://scans.example/manga/One-Piece/1174-001.png"></head>
            <body><dialog id="page_select_modal"><button>1</button><button>2</button><button>12</button><button>Close</button></dialog></body></html>"#;
        let pages = parse_pages(html);
        assert_eq!(pages.len(), 12);
        assert_eq!(pages[0].url, "https://scans.example/manga/One-Piece/1174-001.png");
        assert_eq!(pages[11].url, "https://scans.example/manga/One-Piece/1174-012.png");

        assert_eq!(expand_page_pattern("https://x/1-01.jpg", 2), vec!["https://x/1-01.jpg", "https://x/1-02.jpg"]);
        assert!(expand_page_pattern("https://x/nodash", 3).is_empty());
    }
}
