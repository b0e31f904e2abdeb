use crate::error::{Result, SourceError};
use crate::extract::{attr_of, first_text, select_doc, select_first, text_of};
use crate::helpers::{
    absolute_url, cached_regex, decode_html_entities, extract_chapter_number, now_millis,
    optimistic_total_pages, parse_status, parse_timestamp, push_unique, slug_from, sort_chapters,
    sort_latest, stamp_listing_order, title_from_slug, with_referer, ENGLISH_STATUS,
};
use crate::http_client::Fetcher;
use crate::models::{Chapter, ImageRequest, Manga, MangaPage, Source, UNKNOWN_AUTHOR};
use crate::source::{SourceAdapter, StatusFilter, TypeFilter};
use async_trait::async_trait;
use chrono::NaiveDateTime;
use regex::Regex;
use scraper::{ElementRef, Html, Node};
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::OnceLock;

pub const BASE_URL: &str = "https://www.mangabats.com";
const CHAPTER_BATCH: u32 = 3000;
const MAX_BATCHES: u32 = 50;

/// Accepts a full URL, a `/manga/slug` path or a bare slug
fn manga_url(id: &str) -> String {
    let id = id.trim();
    if id.starts_with("http") || id.starts_with('/') {
        absolute_url(id, BASE_URL)
    } else {
        format!("{}/manga/{}", BASE_URL, id)
    }
}

/// `src` unless it is missing or a lazy-load placeholder, then `data-src`
fn card_image(img: ElementRef<'_>) -> Option<String> {
    attr_of(img, "src")
        .filter(|s| !s.contains("lazy"))
        .or_else(|| attr_of(img, "data-src"))
}

/// Parse the `a.list-story-item` grid used by the hot, latest and search listings.
/// `strict` also drops entries without a cover and chapter/volume links that
/// leak into the latest grid.
fn parse_story_links(doc: &Html, strict: bool) -> Vec<Manga> {
    let mut seen = HashSet::new();
    select_doc(doc, "a.list-story-item")
        .into_iter()
        .filter_map(|node| {
            let title = decode_html_entities(attr_of(node, "title")?.trim());
            let href = attr_of(node, "href")?;
            let img = select_first(node, "img").and_then(card_image);

            if strict {
                let lower = title.to_lowercase();
                if img.is_none() || lower.contains("chapter") || lower.starts_with("vol.") {
                    return None;
                }
            }
            if !seen.insert(href.clone()) {
                return None;
            }
            Some(
                Manga::new(Source::Mangabats, absolute_url(&href, BASE_URL), title)
                    .with_thumbnail(img.map(|u| with_referer(&u, BASE_URL))),
            )
        })
        .collect()
}

/// The older search layout: `div.list-story-item` rows with a title heading
fn parse_search_rows(doc: &Html) -> Vec<Manga> {
    select_doc(doc, "div.list-story-item")
        .into_iter()
        .filter_map(|row| {
            let link = select_first(row, "div.item-right h3 a")?;
            let href = attr_of(link, "href")?;
            let img = select_first(row, "a.item-img img").and_then(card_image);
            Some(
                Manga::new(Source::Mangabats, absolute_url(&href, BASE_URL), decode_html_entities(&text_of(link)))
                    .with_thumbnail(img.map(|u| with_referer(&u, BASE_URL))),
            )
        })
        .collect()
}

fn page_param(href: &str) -> Option<u32> {
    static PAGE: OnceLock<Option<Regex>> = OnceLock::new();
    let re = cached_regex(&PAGE, r"page=(\d+)")?;
    match re.captures(href) {
        Some(caps) => caps.get(1)?.as_str().parse().ok(),
        None => href.trim_end_matches('/').rsplit('/').next()?.parse().ok(),
    }
}

/// Last-page link first, then a next-page link, then the optimistic rule
fn total_pages(doc: &Html, page: u32, found: usize) -> u32 {
    let last = ["a.page_last", "a.page-last"]
        .iter()
        .find_map(|css| select_doc(doc, css).into_iter().next())
        .or_else(|| {
            select_doc(doc, "a")
                .into_iter()
                .find(|a| text_of(*a).contains("Last"))
        });
    if let Some(last) = last {
        return attr_of(last, "href")
            .and_then(|h| page_param(&h))
            .map(|n| n.max(page))
            .unwrap_or(page);
    }

    let has_next = ["a.page_next", "a.page-next"]
        .iter()
        .any(|css| !select_doc(doc, css).is_empty())
        || select_doc(doc, "a").into_iter().any(|a| text_of(a).contains("Next"));
    if has_next {
        page + 1
    } else {
        optimistic_total_pages(page, found)
    }
}

/// Value of a labelled row: the text after `:` in the row itself, otherwise
/// the next non-empty sibling text, `<p>` or `<a>`
fn labelled_value(el: ElementRef<'_>) -> String {
    let own = text_of(el);
    if let Some((_, rest)) = own.split_once(':') {
        if !rest.trim().is_empty() {
            return rest.trim().to_string();
        }
    }
    for sibling in el.next_siblings() {
        match sibling.value() {
            Node::Text(t) if !t.trim().is_empty() => return t.trim().to_string(),
            Node::Element(e) if matches!(e.name(), "p" | "a") => {
                if let Some(sib) = ElementRef::wrap(sibling) {
                    return text_of(sib);
                }
            }
            _ => {}
        }
    }
    String::new()
}

fn description(doc: &Html) -> String {
    if let Some(content) = select_doc(doc, "div#contentBox").into_iter().next() {
        let mut text = String::new();
        for child in content.children() {
            match child.value() {
                Node::Text(t) => text.push_str(t),
                Node::Element(e) => {
                    let Some(el) = ElementRef::wrap(child) else { continue };
                    let body = el.text().collect::<String>();
                    let heading = matches!(e.name(), "h2" | "h3")
                        || (e.name() == "p" && body.to_lowercase().contains("summary"));
                    if !heading {
                        text.push_str(&body);
                    }
                }
                _ => {}
            }
        }
        return decode_html_entities(text.trim());
    }

    if let Some(desc) = select_doc(doc, "div.panel-story-info-description").into_iter().next() {
        let text = text_of(desc);
        let text = text.strip_prefix("Description :").unwrap_or(&text).trim().to_string();
        return decode_html_entities(&text);
    }

    select_doc(doc, "h2, h3, p")
        .into_iter()
        .filter(|h| {
            let t = text_of(*h);
            t.contains("Description") || t.contains("Summary")
        })
        .find_map(|h| {
            h.next_siblings().find_map(|s| match s.value() {
                Node::Text(t) if !t.trim().is_empty() => Some(t.trim().to_string()),
                Node::Element(_) => ElementRef::wrap(s).map(text_of),
                _ => None,
            })
        })
        .map(|t| decode_html_entities(&t))
        .unwrap_or_default()
}

fn parse_details(html: &str, url: &str) -> Manga {
    let doc = Html::parse_document(html);
    let title = first_text(doc.root_element(), &["h1"])
        .map(|t| decode_html_entities(&t))
        .unwrap_or_else(|| title_from_slug(&slug_from(url)));
    let cover = doc_attr(&doc, &["div.story-info-left img", "div.slide-caption img"], "src");
    let mut manga = Manga::new(Source::Mangabats, url, title)
        .with_thumbnail(cover.map(|u| with_referer(&u, BASE_URL)));

    let paragraphs = select_doc(&doc, "p");
    for p in &paragraphs {
        let text = text_of(*p).to_lowercase();
        if text.contains("author") {
            let author = labelled_value(*p);
            if !author.is_empty() {
                manga.author = author;
            }
        } else if text.contains("status") {
            manga.status = parse_status(&labelled_value(*p), ENGLISH_STATUS);
        }
    }

    let genre_links = select_doc(&doc, "div.genres-wrap a");
    if !genre_links.is_empty() {
        for g in genre_links {
            push_unique(&mut manga.genres, &text_of(g));
        }
    } else if let Some(p) = paragraphs.iter().find(|p| text_of(**p).contains("Genres")) {
        for g in labelled_value(*p).split(',') {
            push_unique(&mut manga.genres, g);
        }
    }

    if manga.author == UNKNOWN_AUTHOR {
        for row in select_doc(&doc, "table.variations-tableInfo tr") {
            let label = select_first(row, "td.table-label").map(text_of);
            let value = select_first(row, "td.table-value").map(text_of);
            if let (Some(label), Some(value)) = (label, value) {
                if label.contains("Author") && !value.is_empty() {
                    manga.author = value;
                } else if label.contains("Status") {
                    manga.status = parse_status(&value, ENGLISH_STATUS);
                }
            }
        }
    }

    manga.description = description(&doc);
    manga
}

fn doc_attr(doc: &Html, candidates: &[&str], attr: &str) -> Option<String> {
    candidates
        .iter()
        .find_map(|css| select_doc(doc, css).into_iter().find_map(|el| attr_of(el, attr)))
}

/// Comic slug the chapter API is keyed on
fn chapter_api_slug(html: &str) -> Option<String> {
    let doc = Html::parse_document(html);
    select_doc(&doc, "div#chapter-list-container")
        .into_iter()
        .find_map(|el| attr_of(el, "data-comic-slug"))
}

#[derive(Deserialize)]
struct ChapterResponse {
    data: Option<ChapterBatch>,
}

#[derive(Deserialize)]
struct ChapterBatch {
    #[serde(default)]
    chapters: Vec<ApiChapter>,
    pagination: Option<Pagination>,
}

#[derive(Deserialize)]
struct ApiChapter {
    #[serde(default)]
    chapter_name: String,
    #[serde(default)]
    chapter_slug: String,
    updated_at: Option<String>,
}

#[derive(Deserialize)]
struct Pagination {
    #[serde(default)]
    has_more: bool,
    limit: Option<u32>,
}

/// Chapters in one API batch, plus the offset of the next batch if there is one
fn parse_chapter_batch(json: &str, slug: &str, now: i64) -> Result<(Vec<Chapter>, Option<u32>)> {
    let response: ChapterResponse = serde_json::from_str(json)?;
    let batch = response
        .data
        .ok_or_else(|| SourceError::Parse("chapter batch without data".into()))?;

    let chapters = batch
        .chapters
        .into_iter()
        .filter(|c| !c.chapter_slug.is_empty())
        .map(|c| {
            let number = match extract_chapter_number(&c.chapter_name) {
                n if n > 0.0 => n,
                _ => extract_chapter_number(&c.chapter_slug),
            };
            let mut chapter = Chapter::new(
                format!("{}/manga/{}/{}", BASE_URL, slug, c.chapter_slug),
                c.chapter_name.trim(),
                number,
            );
            chapter.manga_id = slug.to_string();
            chapter.date_upload = c.updated_at.as_deref().map_or(now, |d| parse_date(d, now));
            chapter
        })
        .collect();

    let next = batch
        .pagination
        .filter(|p| p.has_more)
        .and_then(|p| p.limit);
    Ok((chapters, next))
}

/// Offset of the next chapter batch, or None once the feed stops yielding
/// new chapters or the batch cap is reached.
fn next_offset(offset: u32, round: u32, added: usize, next: Option<u32>) -> Option<u32> {
    if added == 0 || round + 1 >= MAX_BATCHES {
        return None;
    }
    match next {
        Some(step) if step > 0 => offset.checked_add(step),
        _ => None,
    }
}

/// Chapter timestamps look like `Jan 05,2024 10:12` on the old layout
fn parse_date(text: &str, now: i64) -> i64 {
    let text = text.trim();
    if text.is_empty() {
        return now;
    }
    parse_timestamp(text)
        .or_else(|| {
            NaiveDateTime::parse_from_str(text, "%b %d,%Y %H:%M")
                .ok()
                .map(|dt| dt.and_utc().timestamp_millis())
        })
        .unwrap_or(now)
}

/// Chapter rows of the old `ul.row-content-chapter` layout
fn parse_chapter_rows(html: &str, manga_id: &str, now: i64) -> Vec<Chapter> {
    let doc = Html::parse_document(html);
    let mut seen = HashSet::new();
    select_doc(&doc, "ul.row-content-chapter li")
        .into_iter()
        .filter_map(|row| {
            let link = select_first(row, "a")?;
            let url = absolute_url(&attr_of(link, "href")?, BASE_URL);
            if !url.contains("chapter") || !seen.insert(url.clone()) {
                return None;
            }
            let name = text_of(link);
            let date = select_first(row, "span.chapter-time")
                .map(|t| attr_of(t, "title").unwrap_or_else(|| text_of(t)))
                .unwrap_or_default();

            let mut chapter = Chapter::new(url, name.clone(), extract_chapter_number(&name));
            chapter.manga_id = manga_id.to_string();
            chapter.date_upload = parse_date(&date, now);
            Some(chapter)
        })
        .collect()
}

fn parse_pages(html: &str) -> Vec<ImageRequest> {
    let doc = Html::parse_document(html);
    select_doc(&doc, "div.container-chapter-reader img")
        .into_iter()
        .filter_map(card_image)
        .map(|src| with_referer(&absolute_url(&src, BASE_URL), BASE_URL))
        .collect()
}

/// Mangabats - English HTML site with a JSON chapter API
pub struct Mangabats {
    fetcher: Fetcher,
}

impl Mangabats {
    pub fn new(fetcher: Fetcher) -> Self {
        Self {
            fetcher: fetcher.with_header("Referer", &format!("{}/", BASE_URL)),
        }
    }

    fn listing_url(list: &str, page: u32) -> String {
        if page <= 1 {
            format!("{}/manga-list/{}", BASE_URL, list)
        } else {
            format!("{}/manga-list/{}?page={}", BASE_URL, list, page)
        }
    }

    async fn hot_listing(&self, page: u32) -> MangaPage {
        let html = self.fetcher.fetch(&Self::listing_url("hot-manga", page)).await;
        if html.is_empty() {
            return MangaPage::empty(page);
        }
        let doc = Html::parse_document(&html);
        let items = parse_story_links(&doc, true);
        if items.is_empty() {
            return MangaPage::empty(page);
        }
        let total = total_pages(&doc, page, items.len());
        MangaPage::new(items, total)
    }

    async fn api_chapters(&self, slug: &str) -> Vec<Chapter> {
        let mut chapters: Vec<Chapter> = Vec::new();
        let mut seen = HashSet::new();
        let mut offset = 0u32;
        let now = now_millis();

        for round in 0..MAX_BATCHES {
            let url = format!(
                "{}/api/manga/{}/chapters?offset={}&limit={}",
                BASE_URL, slug, offset, CHAPTER_BATCH
            );
            let batch = match self.fetcher.get_text(&url).await {
                Ok(json) => parse_chapter_batch(&json, slug, now),
                Err(e) => Err(e),
            };
            match batch {
                Ok((batch, next)) => {
                    let before = chapters.len();
                    chapters.extend(batch.into_iter().filter(|c| seen.insert(c.url.clone())));
                    match next_offset(offset, round, chapters.len() - before, next) {
                        Some(following) => offset = following,
                        None => break,
                    }
                }
                Err(e) => {
                    log::warn!("[Mangabats] Chapter API error for {} at offset {}: {}", slug, offset, e);
                    break;
                }
            }
        }
        chapters
    }
}

#[async_trait]
impl SourceAdapter for Mangabats {
    fn id(&self) -> Source {
        Source::Mangabats
    }

    fn name(&self) -> &'static str {
        "Mangabats"
    }

    fn base_url(&self) -> &'static str {
        BASE_URL
    }

    fn language(&self) -> &str {
        "en"
    }

    async fn get_popular_manga(&self, page: u32) -> Vec<Manga> {
        self.hot_listing(page).await.items
    }

    async fn get_latest_manga(&self, page: u32) -> MangaPage {
        let html = self.fetcher.fetch(&Self::listing_url("latest-manga", page)).await;
        let mut items = parse_story_links(&Html::parse_document(&html), true);
        stamp_listing_order(&mut items, now_millis());
        sort_latest(&mut items);
        let total = optimistic_total_pages(page, items.len());
        MangaPage::new(items, total)
    }

    async fn get_manga_list(&self, page: u32) -> MangaPage {
        self.hot_listing(page).await
    }

    /// The site has no usable filter endpoint
    async fn get_filtered_manga(
        &self,
        page: u32,
        _status: StatusFilter,
        _kind: TypeFilter,
    ) -> MangaPage {
        self.hot_listing(page).await
    }

    async fn search_manga(&self, query: &str, page: u32) -> Vec<Manga> {
        let slug = query.trim().to_lowercase().replace(' ', "_");
        if slug.is_empty() {
            return Vec::new();
        }
        let mut url = format!("{}/search/story/{}", BASE_URL, urlencoding::encode(&slug));
        if page > 1 {
            url.push_str(&format!("?page={}", page));
        }

        let html = self.fetcher.fetch(&url).await;
        let doc = Html::parse_document(&html);
        let rows = parse_search_rows(&doc);
        if !rows.is_empty() {
            return rows;
        }
        parse_story_links(&doc, false)
    }

    async fn get_manga_details(&self, id: &str) -> Result<Manga> {
        let url = manga_url(id);
        match self.fetcher.get_text(&url).await {
            Ok(html) => Ok(parse_details(&html, &url)),
            Err(e) if e.is_not_found() => Err(SourceError::NotFound(format!("Mangabats manga {}", id))),
            Err(e) => {
                log::warn!("[Mangabats] Details for {} unavailable, returning partial: {}", id, e);
                Ok(Manga::new(Source::Mangabats, url, title_from_slug(&slug_from(id))))
            }
        }
    }

    async fn get_chapter_list(&self, manga_id: &str) -> Vec<Chapter> {
        let url = manga_url(manga_id);
        let html = self.fetcher.fetch(&url).await;
        if html.is_empty() {
            return Vec::new();
        }

        let mut chapters = match chapter_api_slug(&html) {
            Some(slug) => self.api_chapters(&slug).await,
            None => Vec::new(),
        };
        if chapters.is_empty() {
            chapters = parse_chapter_rows(&html, &url, now_millis());
        }
        for c in &mut chapters {
            c.manga_id = url.clone();
        }
        sort_chapters(&mut chapters);
        chapters
    }

    async fn get_page_list(&self, chapter_id: &str) -> Vec<ImageRequest> {
        let html = self.fetcher.fetch(&absolute_url(chapter_id, BASE_URL)).await;
        let pages = parse_pages(&html);
        if pages.is_empty() {
            log::warn!("[Mangabats] No images found for {}", chapter_id);
        }
        pages
    }
}
