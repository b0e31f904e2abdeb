use crate::error::{Result, SourceError};
use crate::extract::{
    ancestors, attr_of, first_image, first_some, first_text, image_source, select_all, select_doc,
    select_first, text_of,
};
use crate::helpers::{
    absolute_url, cached_regex, clean_title, extract_chapter_number, now_millis, optimistic_total_pages,
    parse_relative_time, parse_status, parse_timestamp, push_unique, relative_path, slug_from,
    sort_chapters, sort_latest, stamp_listing_order, title_from_slug, INDONESIAN, INDONESIAN_STATUS,
};
use crate::http_client::Fetcher;
use crate::models::{Chapter, ImageRequest, Manga, MangaPage, MangaStatus, Source, UNKNOWN_AUTHOR};
use crate::source::{SourceAdapter, StatusFilter, TypeFilter};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use regex::Regex;
use scraper::{ElementRef, Html};
use std::collections::HashSet;
use std::sync::OnceLock;

pub const BASE_URL: &str = "https://komiku.org";
pub const API_URL: &str = "https://api.komiku.org";

const NON_TITLE_SLUGS: &[&str] = &["manga", "manhwa", "manhua", "komik"];

fn datetime(now: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(now).single().unwrap_or_else(Utc::now)
}

/// Manga ids are kept as root-relative paths (`/manga/slug/`) so that
/// `/manhwa/` and `/manhua/` prefixes survive; bare slugs are also accepted.
fn manga_url(id: &str) -> String {
    if id.starts_with("http") || id.starts_with('/') {
        absolute_url(id, BASE_URL)
    } else {
        format!("{}/manga/{}/", BASE_URL, id)
    }
}

fn manga_id(href: &str) -> String {
    let path = relative_path(&absolute_url(href, BASE_URL), BASE_URL);
    if path.starts_with('/') {
        path
    } else {
        format!("/{}", path)
    }
}

fn cover_url(raw: &str) -> String {
    // Search thumbnails are landscape crops (`?resize=450,235`); drop the query for the portrait original
    let raw = raw.split("?resize=").next().unwrap_or(raw);
    absolute_url(raw, BASE_URL)
}

/// Listing cells whose text is a genre label rather than the title
fn is_generic_title(title: &str) -> bool {
    let compact: String = title
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '\u{a0}')
        .collect::<String>()
        .to_lowercase();
    if compact.len() < 2 {
        return true;
    }
    let has_kind = ["manga", "manhwa", "manhua", "komik"].iter().any(|k| compact.contains(k));
    let has_genre = ["aksi", "romantis", "action", "romance", "fantasy", "comedy", "adventure", "slice"]
        .iter()
        .any(|g| compact.contains(g));
    (has_kind && (has_genre || compact.len() < 18)) || compact.starts_with("genre")
}

fn relative_time_phrase(text: &str) -> Option<String> {
    static PHRASE: OnceLock<Option<Regex>> = OnceLock::new();
    cached_regex(
        &PHRASE,
        r"(?i)\d+\s+(?:menit|jam|hari|minggu|bulan|tahun|detik)\s+lalu|kemarin|hari ini",
    )
    .and_then(|re| re.find(text))
    .map(|m| m.as_str().to_string())
}

/// Chapter table dates are either relative ("3 hari lalu") or `dd/MM/yyyy`
fn parse_date(text: &str, now: i64) -> i64 {
    let text = text.trim();
    if relative_time_phrase(text).is_some() {
        return parse_relative_time(text, datetime(now), &INDONESIAN);
    }
    parse_timestamp(text).unwrap_or(now)
}

/// Highest number among `a.page-numbers`, if the page has a paginator
fn explicit_total_pages(doc: &Html, page: u32) -> Option<u32> {
    select_doc(doc, "a.page-numbers")
        .into_iter()
        .filter_map(|a| text_of(a).parse::<u32>().ok())
        .max()
        .map(|max| max.max(page))
}

/// `div.bge` cards used by the API listings (latest, filtered)
fn parse_bge_cards(doc: &Html, now: i64) -> Vec<Manga> {
    let mut seen = HashSet::new();
    let mut items = Vec::new();

    for card in select_doc(doc, "div.bge") {
        let Some(link) = ["div.kan a", "div.bgei a", "a[href*='/manga/']"]
            .iter()
            .find_map(|css| select_first(card, css))
        else {
            continue;
        };
        let Some(href) = attr_of(link, "href").filter(|h| h.contains("/manga/")) else {
            continue;
        };
        let slug = slug_from(&href);
        if slug.is_empty() || !seen.insert(slug.clone()) {
            continue;
        }

        let title = first_text(card, &["div.kan h3", "h3", "h4"])
            .map(|t| clean_title(&t))
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| title_from_slug(&slug));

        let mut manga = Manga::new(Source::Komiku, manga_id(&href), title).with_thumbnail(
            first_image(card, &["div.bgei img", "img"]).map(|src| ImageRequest::new(cover_url(&src))),
        );
        if let Some(phrase) = relative_time_phrase(&text_of(card)) {
            manga.last_update = parse_relative_time(&phrase, datetime(now), &INDONESIAN);
        }
        items.push(manga);
    }
    items
}

/// Home page and library cards: any container with a manga link and an image
fn parse_generic_cards(doc: &Html) -> Vec<Manga> {
    let mut seen = HashSet::new();
    let mut items = Vec::new();

    for card in select_doc(doc, "div, article") {
        let (Some(link), Some(img)) = (select_first(card, "a[href*='/manga/']"), select_first(card, "img")) else {
            continue;
        };
        let Some(href) = attr_of(link, "href") else { continue };
        if href.contains("?tipe=") || href.contains("?orderby=") {
            continue;
        }
        let slug = slug_from(&href);
        if slug.is_empty() || NON_TITLE_SLUGS.contains(&slug.as_str()) || seen.contains(&slug) {
            continue;
        }

        let title = first_text(card, &["h4", "h3", "div.tt"])
            .or_else(|| attr_of(img, "alt"))
            .map(|t| clean_title(&t))
            .unwrap_or_default();
        if title.is_empty() {
            continue;
        }
        seen.insert(slug);

        let cover = image_source(img).map(|src| ImageRequest::new(cover_url(&src)));
        items.push(Manga::new(Source::Komiku, manga_id(&href), title).with_thumbnail(cover));
    }
    items
}

fn link_title_attr(link: &ElementRef<'_>) -> Option<String> {
    attr_of(*link, "title")
}

fn link_image_alt(link: &ElementRef<'_>) -> Option<String> {
    select_first(*link, "img").and_then(|img| attr_of(img, "alt"))
}

fn link_text(link: &ElementRef<'_>) -> Option<String> {
    Some(text_of(*link)).filter(|t| !t.is_empty())
}

fn nearby_heading(link: &ElementRef<'_>) -> Option<String> {
    ancestors(*link, 3)
        .into_iter()
        .find_map(|parent| first_text(parent, &["h3", "h4", "strong"]))
}

const LINK_TITLE: &[fn(&ElementRef<'_>) -> Option<String>] =
    &[link_title_attr, link_image_alt, link_text, nearby_heading];

/// Every distinct manga link on a page (daftar-komik listing, search results)
fn parse_manga_links(doc: &Html) -> Vec<Manga> {
    let mut seen = HashSet::new();
    let mut items = Vec::new();

    for link in select_doc(doc, "a[href*='/manga/']") {
        let Some(href) = attr_of(link, "href") else { continue };
        if href.contains('?') || href.contains('#') || href.starts_with("javascript") {
            continue;
        }
        if href.contains("/genre/") || href.contains("/pustaka/") {
            continue;
        }
        let slug = slug_from(&href);
        let lower = slug.to_lowercase();
        if slug.is_empty()
            || NON_TITLE_SLUGS.contains(&lower.as_str())
            || lower.starts_with("genre")
            || lower.starts_with("page")
            || !seen.insert(slug.clone())
        {
            continue;
        }

        let title = first_some(LINK_TITLE, &link)
            .filter(|t| !is_generic_title(t))
            .map(|t| clean_title(&t))
            .filter(|t| !is_generic_title(t))
            .unwrap_or_else(|| title_from_slug(&slug));

        let cover = std::iter::once(link)
            .chain(ancestors(link, 3))
            .find_map(|el| first_image(el, &["img"]))
            .map(|src| ImageRequest::new(cover_url(&src)));

        items.push(Manga::new(Source::Komiku, manga_id(&href), title).with_thumbnail(cover));
    }
    items
}

fn strip_label(text: &str, labels: &[&str]) -> String {
    let mut value = text.to_string();
    for label in labels {
        if value.to_lowercase().starts_with(&label.to_lowercase()) {
            value = value[label.len()..].to_string();
        }
    }
    value.replace(':', "").trim().to_string()
}

/// Second cell of the first table row whose label cell contains `label`
fn table_value(doc: &Html, label: &str) -> Option<String> {
    select_doc(doc, "tr").into_iter().find_map(|row| {
        let cells = select_all(row, "td");
        let first = cells.first().map(|c| text_of(*c))?;
        if !first.contains(label) {
            return None;
        }
        cells.get(1).map(|c| text_of(*c)).filter(|v| !v.is_empty())
    })
}

fn synopsis_after_heading(doc: &Html) -> Option<String> {
    let heading = select_doc(doc, "h3")
        .into_iter()
        .find(|h| text_of(*h).contains("Sinopsis"))?;
    heading
        .next_siblings()
        .filter_map(ElementRef::wrap)
        .find(|el| el.value().name() != "br")
        .map(text_of)
        .filter(|t| !t.is_empty())
}

fn parse_details(html: &str, id: &str) -> Manga {
    let doc = Html::parse_document(html);
    let root = doc.root_element();

    let mut manga = Manga::new(Source::Komiku, id, title_from_slug(&slug_from(id)));
    if let Some(title) = first_text(root, &["h1"]).map(|t| clean_title(&t)).filter(|t| !t.is_empty()) {
        manga.title = title;
    }

    manga.author = select_doc(&doc, "td, li, p, span")
        .into_iter()
        .map(text_of)
        .find(|t| {
            let lower = t.to_lowercase();
            lower.starts_with("pengarang") || lower.starts_with("author")
        })
        .map(|t| strip_label(&t, &["Pengarang", "Author"]))
        .filter(|a| !a.is_empty())
        .or_else(|| table_value(&doc, "Pengarang"))
        .unwrap_or_else(|| UNKNOWN_AUTHOR.to_string());

    if let Some(status) = table_value(&doc, "Status") {
        manga.status = parse_status(&status, INDONESIAN_STATUS);
    }

    manga.description = first_text(root, &["p.desc"])
        .or_else(|| synopsis_after_heading(&doc))
        .unwrap_or_default();

    manga.thumbnail = first_image(root, &["div.ims img", "div.foto img"])
        .map(|src| ImageRequest::new(absolute_url(&src, BASE_URL)));

    for genre in select_doc(&doc, "ul.genre li.genre a") {
        push_unique(&mut manga.genres, &text_of(genre));
    }
    manga
}

fn chapter_title_from_link(text: &str) -> String {
    static CHAPTER: OnceLock<Option<Regex>> = OnceLock::new();
    if let Some(caps) = cached_regex(&CHAPTER, r"(?i)chapter\s+([\d.]+)").and_then(|re| re.captures(text)) {
        return format!("Chapter {}", &caps[1]);
    }
    text.to_string()
}

fn parse_chapters(html: &str, manga_id: &str, now: i64) -> Vec<Chapter> {
    let doc = Html::parse_document(html);
    let mut seen = HashSet::new();
    let mut chapters = Vec::new();

    let mut rows = select_doc(&doc, "table#Daftar_Chapter tr");
    if rows.is_empty() {
        rows = select_doc(&doc, "table.table tr");
    }

    for row in rows {
        let Some(link) = select_first(row, "a") else { continue };
        let Some(href) = attr_of(link, "href").map(|h| absolute_url(&h, BASE_URL)) else {
            continue;
        };
        if !seen.insert(href.clone()) {
            continue;
        }
        let date_text = first_text(row, &["td.tanggalseries", "td.tpe", "td.date"])
            .or_else(|| select_all(row, "td").last().map(|td| text_of(*td)))
            .unwrap_or_default();

        let name = text_of(link);
        let number = extract_chapter_number(&name);
        let mut chapter = Chapter::new(href, name, number);
        chapter.manga_id = manga_id.to_string();
        chapter.date_upload = parse_date(&date_text, now);
        chapters.push(chapter);
    }

    // Chapters linked outside the table (newest-chapter buttons, older layouts)
    for link in select_doc(&doc, "a") {
        let Some(raw) = attr_of(link, "href") else { continue };
        if raw.contains('?') || raw.contains('#') || raw.contains("javascript") {
            continue;
        }
        let href = absolute_url(&raw, BASE_URL);
        let is_chapter = (href.contains("-chapter-") || href.contains("/ch-"))
            && !href.contains("/manga/")
            && !href.contains("/genre/")
            && !href.contains("/pustaka/");
        if !is_chapter || !seen.insert(href.clone()) {
            continue;
        }

        let name = chapter_title_from_link(&text_of(link));
        let number = match extract_chapter_number(&name) {
            n if n > 0.0 => n,
            _ => extract_chapter_number(&href.replace('-', " ")),
        };
        let mut chapter = Chapter::new(href, name, number);
        chapter.manga_id = manga_id.to_string();
        chapter.date_upload = now;
        chapters.push(chapter);
    }

    sort_chapters(&mut chapters);
    chapters
}

fn parse_pages(html: &str) -> Vec<ImageRequest> {
    let doc = Html::parse_document(html);
    select_doc(&doc, "div#Baca_Komik img, div#bacaimg img")
        .into_iter()
        .filter_map(image_source)
        .map(|src| ImageRequest::new(absolute_url(&src, BASE_URL)))
        .collect()
}

/// Komiku - HTML scraping of komiku.org and its HTMX API host
pub struct Komiku {
    fetcher: Fetcher,
}

impl Komiku {
    pub fn new(fetcher: Fetcher) -> Self {
        Self { fetcher }
    }

    fn api_listing_url(page: u32, query: &str) -> String {
        if page <= 1 {
            format!("{}/manga/?{}", API_URL, query)
        } else {
            format!("{}/manga/page/{}/?{}", API_URL, page, query)
        }
    }
}

#[async_trait]
impl SourceAdapter for Komiku {
    fn id(&self) -> Source {
        Source::Komiku
    }

    fn name(&self) -> &'static str {
        "Komiku"
    }

    fn base_url(&self) -> &'static str {
        BASE_URL
    }

    fn language(&self) -> &str {
        "id"
    }

    async fn get_popular_manga(&self, page: u32) -> Vec<Manga> {
        let url = if page <= 1 {
            BASE_URL.to_string()
        } else {
            format!("{}/pustaka/page/{}/?orderby=meta_value_num&tipe=manga", BASE_URL, page)
        };
        let html = self.fetcher.fetch(&url).await;
        let doc = Html::parse_document(&html);
        let mut items = parse_bge_cards(&doc, now_millis());
        if items.is_empty() {
            items = parse_generic_cards(&doc);
        }
        log::debug!("[Komiku] {} popular items from {}", items.len(), url);
        items
    }

    async fn get_latest_manga(&self, page: u32) -> MangaPage {
        let url = Self::api_listing_url(page, "orderby=modified&tipe=manga");
        let html = self.fetcher.fetch(&url).await;
        let now = now_millis();
        let doc = Html::parse_document(&html);

        let mut items = parse_bge_cards(&doc, now);
        if items.is_empty() {
            items = parse_generic_cards(&doc);
        }
        stamp_listing_order(&mut items, now);
        sort_latest(&mut items);

        let total = optimistic_total_pages(page, items.len());
        MangaPage::new(items, total)
    }

    async fn get_manga_list(&self, page: u32) -> MangaPage {
        let url = if page <= 1 {
            format!("{}/daftar-komik/", BASE_URL)
        } else {
            format!("{}/daftar-komik/page/{}/", BASE_URL, page)
        };
        let html = self.fetcher.fetch(&url).await;
        let doc = Html::parse_document(&html);
        let items = parse_manga_links(&doc);
        let total = explicit_total_pages(&doc, page).unwrap_or_else(|| optimistic_total_pages(page, items.len()));
        log::debug!("[Komiku] Manga list page {}: {} items, {} pages", page, items.len(), total);
        MangaPage::new(items, total)
    }

    async fn get_filtered_manga(
        &self,
        page: u32,
        status: StatusFilter,
        kind: TypeFilter,
    ) -> MangaPage {
        let mut params = Vec::new();
        match status {
            StatusFilter::Ongoing => params.push("status=ongoing".to_string()),
            StatusFilter::Completed => params.push("status=completed".to_string()),
            StatusFilter::Any => {}
        }
        if let Some(tipe) = kind.as_str() {
            params.push(format!("type={}", tipe));
        }
        let url = Self::api_listing_url(page, &params.join("&"));
        let html = self.fetcher.fetch(&url).await;
        let doc = Html::parse_document(&html);

        let mut items = parse_bge_cards(&doc, now_millis());
        let listed_status = match status {
            StatusFilter::Ongoing => MangaStatus::Ongoing,
            StatusFilter::Completed => MangaStatus::Completed,
            StatusFilter::Any => MangaStatus::Unknown,
        };
        for manga in &mut items {
            manga.status = listed_status;
        }
        let total = explicit_total_pages(&doc, page).unwrap_or_else(|| optimistic_total_pages(page, items.len()));
        MangaPage::new(items, total)
    }

    async fn search_manga(&self, query: &str, page: u32) -> Vec<Manga> {
        // The API has a single result page
        if page > 1 {
            return Vec::new();
        }
        // A leading '-' is read as an exclusion operator upstream
        let query = query.trim().trim_start_matches('-');
        let url = format!("{}/?post_type=manga&s={}", API_URL, urlencoding::encode(query));

        let html = self.fetcher.fetch(&url).await;
        let items = parse_manga_links(&Html::parse_document(&html));
        if !items.is_empty() || !self.fetcher.has_bypass() {
            return items;
        }

        log::info!("[Komiku] 0 results for '{}', retrying through the browser", query);
        match self.fetcher.fetch_via_bypass(&url).await {
            Ok(html) => parse_manga_links(&Html::parse_document(&html)),
            Err(e) => {
                log::warn!("[Komiku] Browser search fallback failed: {}", e);
                Vec::new()
            }
        }
    }

    async fn get_manga_details(&self, id: &str) -> Result<Manga> {
        let url = manga_url(id);
        match self.fetcher.get_text(&url).await {
            Ok(html) => Ok(parse_details(&html, id)),
            Err(e) if e.is_not_found() => Err(SourceError::NotFound(format!("Komiku manga {}", id))),
            Err(e) => {
                log::warn!("[Komiku] Details for {} unavailable, returning partial: {}", id, e);
                Ok(Manga::new(Source::Komiku, id, title_from_slug(&slug_from(id))))
            }
        }
    }

    async fn get_chapter_list(&self, manga_id: &str) -> Vec<Chapter> {
        let html = self.fetcher.fetch(&manga_url(manga_id)).await;
        if html.is_empty() {
            return Vec::new();
        }
        let chapters = parse_chapters(&html, manga_id, now_millis());
        log::debug!("[Komiku] {} chapters for {}", chapters.len(), manga_id);
        chapters
    }

    async fn get_page_list(&self, chapter_id: &str) -> Vec<ImageRequest> {
        let html = self.fetcher.fetch(&absolute_url(chapter_id, BASE_URL)).await;
        let pages = parse_pages(&html);
        if pages.is_empty() {
            log::warn!("[Komiku] No images found for {}", chapter_id);
        }
        pages
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: i64 = 1_718_452_800_000; // 2024-06-15T12:00:00Z

    #[test]
    fn test_manga_url_forms() {
        assert_eq!(manga_url("/manga/one-piece/"), "https://komiku.org/manga/one-piece/");
        assert_eq!(manga_url("one-piece"), "https://komiku.org/manga/one-piece/");
        assert_eq!(manga_url("https://komiku.org/manhwa/x/"), "https://komiku.org/manhwa/x/");
        assert_eq!(manga_id("https://komiku.org/manga/one-piece/"), "/manga/one-piece/");
    }

    #[test]
    fn test_bge_cards_with_relative_time() {
        let html = r#"
            <div class="bge">
                <div class="bgei"><a href="https://komiku.org/manga/alpha/"><img data-src="https://thumb.komiku.org/a.jpg" src="data:image/gif;base64,x"></a></div>
                <div class="kan"><a href="https://komiku.org/manga/alpha/"><h3>Komik Alpha</h3></a><span>2 jam lalu</span></div>
            </div>
            <div class="bge">
                <div class="kan"><a href="/manga/beta/"><h3> Beta </h3></a><span>Update 5 menit lalu</span></div>
            </div>
            <div class="bge"><div class="kan"><a href="/manga/alpha/"><h3>Alpha again</h3></a></div></div>"#;
        let doc = Html::parse_document(html);
        let mut items = parse_bge_cards(&doc, NOW);
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].title, "Alpha");
        assert_eq!(items[0].url, "/manga/alpha/");
        assert_eq!(items[0].last_update, NOW - 2 * 3_600_000);
        assert_eq!(items[0].thumbnail.as_ref().unwrap().url, "https://thumb.komiku.org/a.jpg");

        sort_latest(&mut items);
        assert_eq!(items[0].title, "Beta");
    }

    #[test]
    fn test_manga_links_filter_generic_titles() {
        let html = r#"
            <a href="/manga/">Manga</a>
            <a href="/genre/action/">Action</a>
            <div><a href="https://komiku.org/manga/solo-leveling/" title="Baca Manhwa Solo Leveling"><img src="/t/s.jpg?resize=450,235"></a></div>
            <a href="/manga/tower-of-god/">Manhwa Aksi</a>
            <a href="/manga/solo-leveling/">duplicate</a>"#;
        let items = parse_manga_links(&Html::parse_document(html));
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].title, "Solo Leveling");
        assert_eq!(items[0].thumbnail.as_ref().unwrap().url, "https://komiku.org/t/s.jpg");
        assert_eq!(items[1].title, "Tower Of God");
    }

    #[test]
    fn test_details_partial_fields() {
        let html = r#"<html><body>
            <h1>Komik One Piece</h1>
            <table class="inftable">
                <tr><td>Pengarang</td><td>Eiichiro Oda</td></tr>
                <tr><td>Status</td><td>Ongoing</td></tr>
            </table>
            <div class="ims"><img src="//thumb.komiku.org/op.jpg"></div>
            <h3>Sinopsis Lengkap</h3><br><p>Luffy sets sail.</p>
            <ul class="genre"><li class="genre"><a>Action</a></li><li class="genre"><a>Action</a></li><li class="genre"><a>Comedy</a></li></ul>
        </body></html>"#;
        let manga = parse_details(html, "/manga/one-piece/");
        assert_eq!(manga.title, "One Piece");
        assert_eq!(manga.author, "Eiichiro Oda");
        assert_eq!(manga.status, MangaStatus::Ongoing);
        assert_eq!(manga.description, "Luffy sets sail.");
        assert_eq!(manga.genres, vec!["Action", "Comedy"]);
        assert_eq!(manga.thumbnail.unwrap().url, "https://thumb.komiku.org/op.jpg");

        let empty = parse_details("<html></html>", "/manga/some-title/");
        assert_eq!(empty.title, "Some Title");
        assert_eq!(empty.author, "Unknown");
    }

    #[test]
    fn test_chapters_from_table_and_links() {
        let html = r#"<html><body>
            <table id="Daftar_Chapter">
                <tr><th>Chapter</th></tr>
                <tr><td class="judulseries"><a href="/one-piece-chapter-2/">Chapter 2</a></td><td class="tanggalseries">3 hari lalu</td></tr>
                <tr><td class="judulseries"><a href="/one-piece-chapter-1/">Chapter 1</a></td><td class="tanggalseries">02/01/2024</td></tr>
            </table>
            <a href="https://komiku.org/one-piece-chapter-3/">Chapter 3</a>
            <a href="/one-piece-chapter-1/">Chapter 1</a>
            <a href="/manga/one-piece-chapter-x/">skip</a>
        </body></html>"#;
        let chapters = parse_chapters(html, "/manga/one-piece/", NOW);
        let numbers: Vec<f32> = chapters.iter().map(|c| c.chapter_number).collect();
        assert_eq!(numbers, vec![3.0, 2.0, 1.0]);
        assert_eq!(chapters[0].date_upload, NOW);
        assert_eq!(chapters[1].date_upload, NOW - 3 * 86_400_000);
        assert_eq!(chapters[2].date_upload, 1_704_153_600_000);
        assert_eq!(chapters[2].url, "https://komiku.org/one-piece-chapter-1/");
        assert_eq!(chapters[2].manga_id, "/manga/one-piece/");
    }

    #[test]
    fn test_pages_and_pagination() {
        let html = r#"<div id="Baca_Komik"><img src="https://img.komiku.org/1.jpg"><img data-src="https://img.komiku.org/2.jpg" src="data:image/gif;base64,x"></div>"#;
        let pages = parse_pages(html);
        assert_eq!(pages.len(), 2);
        assert!(pages[1].headers.is_empty());

        let doc = Html::parse_document(r#"<a class="page-numbers">2</a><a class="page-numbers">134</a><a class="page-numbers next">Next</a>"#);
        assert_eq!(explicit_total_pages(&doc, 1), Some(134));
        assert_eq!(explicit_total_pages(&Html::parse_document("<p></p>"), 1), None);
    }

    #[test]
    fn test_generic_title_detection() {
        assert!(is_generic_title("Manhwa Aksi"));
        assert!(is_generic_title("Manga"));
        assert!(!is_generic_title("Solo Leveling"));
    }
}
