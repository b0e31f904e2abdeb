//! Normalization helpers shared by the source adapters
//!
//! Everything here is pure and deterministic; callers pass the fetch time in
//! explicitly so that relative dates can be tested.
//! - Source parsing
//! - URL absolutization and slug handling
//! - Title cleanup and HTML entity decoding
//! - Relative ("2 jam lalu") and absolute date parsing
//! - Status keyword tables
//! - Chapter number extraction and ordering
//!
//! # Examples
//!
//! ```
//! use manga_sources::helpers::{absolute_url, extract_chapter_number, parse_status, INDONESIAN_STATUS};
//! use manga_sources::models::MangaStatus;
//!
//! assert_eq!(absolute_url("//cdn.example/x.jpg", "https://site.com"), "https://cdn.example/x.jpg");
//! assert_eq!(extract_chapter_number("Vol.2 Chapter 7"), 7.0);
//! assert_eq!(parse_status("Sedang Berjalan", INDONESIAN_STATUS), MangaStatus::Ongoing);
//! ```

use crate::models::{Chapter, ImageRequest, Manga, MangaStatus, Source};
use chrono::{DateTime, Duration, Months, NaiveDate, NaiveDateTime, Utc};
use regex::Regex;
use std::cmp::Ordering;
use std::sync::OnceLock;

/// Compile a pattern once and keep it for the life of the process
pub(crate) fn cached_regex(cell: &'static OnceLock<Option<Regex>>, pattern: &str) -> Option<&'static Regex> {
    cell.get_or_init(|| match Regex::new(pattern) {
        Ok(re) => Some(re),
        Err(e) => {
            log::error!("Invalid regex {}: {}", pattern, e);
            None
        }
    })
    .as_ref()
}

/// Parse a source name or ID string into a Source enum
pub fn parse_source(s: &str) -> Option<Source> {
    let k = s.trim().to_lowercase();
    if let Ok(n) = k.parse::<i32>() {
        return Source::ALL.into_iter().find(|src| src.id() == n);
    }
    match k.as_str() {
        "komiku" => Some(Source::Komiku),
        "komikcast" | "komik-cast" => Some(Source::KomikCast),
        "mangadex" => Some(Source::MangaDex),
        "mangabats" => Some(Source::Mangabats),
        "kiryuu" => Some(Source::Kiryuu),
        "softkomik" => Some(Source::Softkomik),
        "weebcentral" | "weeb-central" => Some(Source::Weebcentral),
        "westmanga" | "west-manga" => Some(Source::WestManga),
        _ => None,
    }
}

pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Resolve a protocol-relative, site-relative or absolute URL against `base`
pub fn absolute_url(url: &str, base: &str) -> String {
    let url = url.trim();
    if url.is_empty() {
        return String::new();
    }
    if url.starts_with("//") {
        return format!("https:{}", url);
    }
    if url.starts_with("http://") || url.starts_with("https://") || url.starts_with("data:") {
        return url.to_string();
    }
    let base = base.trim_end_matches('/');
    if url.starts_with('/') {
        return format!("{}{}", base, url);
    }
    format!("{}/{}", base, url)
}

/// Strip a site origin from an absolute URL, leaving a root-relative path
pub fn relative_path(url: &str, base: &str) -> String {
    let trimmed = url.trim();
    let base = base.trim_end_matches('/');
    match trimmed.strip_prefix(base) {
        Some(rest) if rest.is_empty() => "/".to_string(),
        Some(rest) => rest.to_string(),
        None => trimmed.to_string(),
    }
}

/// Last non-empty path segment of a URL, path or slug, without query or fragment
pub fn slug_from(id: &str) -> String {
    let without_query = id.split(['?', '#']).next().unwrap_or_default();
    without_query
        .split('/')
        .filter(|s| !s.is_empty())
        .last()
        .unwrap_or_default()
        .to_string()
}

/// Turn `one-piece` into `One Piece`
pub fn title_from_slug(slug: &str) -> String {
    slug.split(['-', '_'])
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Decode HTML entities (`&amp;`, `&#8217;`, ...) in a text fragment
pub fn decode_html_entities(s: &str) -> String {
    if !s.contains('&') {
        return s.to_string();
    }
    // Escape angle brackets so the fragment parser only decodes entities
    let escaped = s.replace('<', "&lt;").replace('>', "&gt;");
    let fragment = scraper::Html::parse_fragment(&escaped);
    fragment.root_element().text().collect()
}

/// Remove markup from an HTML snippet, keeping line breaks for `<br>` and `</p>`
pub fn strip_html(s: &str) -> String {
    static BREAKS: OnceLock<Option<Regex>> = OnceLock::new();
    static TAGS: OnceLock<Option<Regex>> = OnceLock::new();

    let mut text = s.to_string();
    if let Some(re) = cached_regex(&BREAKS, r"(?i)<br\s*/?>|</p\s*>") {
        text = re.replace_all(&text, "\n").into_owned();
    }
    if let Some(re) = cached_regex(&TAGS, r"<[^>]*>") {
        text = re.replace_all(&text, "").into_owned();
    }

    decode_html_entities(&text)
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Collapse runs of whitespace into single spaces
pub fn normalize_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Clean up a manga title scraped from an Indonesian reader site
pub fn clean_title(title: &str) -> String {
    static BRANDING: OnceLock<Option<Regex>> = OnceLock::new();
    static PREFIX: OnceLock<Option<Regex>> = OnceLock::new();

    let mut t = decode_html_entities(title);
    if let Some(re) = cached_regex(&BRANDING, r"(?i)\bbaca\s+(manga|manhwa|manhua|komik)\b") {
        t = re.replace_all(&t, "").into_owned();
    }
    let mut t = normalize_whitespace(&t);
    if let Some(re) = cached_regex(&PREFIX, r"(?i)^(komik|manga|manhwa|manhua)\s+") {
        t = re.replace(&t, "").into_owned();
    }
    t.trim().to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeUnit {
    Second,
    Minute,
    Hour,
    Day,
    Week,
    Month,
    Year,
}

/// Words a site uses for elapsed-time phrases
#[derive(Debug, Clone, Copy)]
pub struct TimeVocabulary {
    /// Unit words, matched as prefixes of the word after the amount
    pub units: &'static [(&'static str, TimeUnit)],
    pub today: &'static [&'static str],
    pub yesterday: &'static [&'static str],
}

pub const INDONESIAN: TimeVocabulary = TimeVocabulary {
    units: &[
        ("detik", TimeUnit::Second),
        ("menit", TimeUnit::Minute),
        ("jam", TimeUnit::Hour),
        ("hari", TimeUnit::Day),
        ("minggu", TimeUnit::Week),
        ("bulan", TimeUnit::Month),
        ("tahun", TimeUnit::Year),
    ],
    today: &["hari ini", "today"],
    yesterday: &["kemarin", "yesterday"],
};

pub const ENGLISH: TimeVocabulary = TimeVocabulary {
    units: &[
        ("sec", TimeUnit::Second),
        ("min", TimeUnit::Minute),
        ("hour", TimeUnit::Hour),
        ("hr", TimeUnit::Hour),
        ("day", TimeUnit::Day),
        ("week", TimeUnit::Week),
        ("month", TimeUnit::Month),
        ("year", TimeUnit::Year),
    ],
    today: &["today", "just now"],
    yesterday: &["yesterday"],
};

fn subtract(now: DateTime<Utc>, amount: u32, unit: TimeUnit) -> DateTime<Utc> {
    let amount_i = i64::from(amount.min(100_000));
    let shifted = match unit {
        TimeUnit::Second => now.checked_sub_signed(Duration::seconds(amount_i)),
        TimeUnit::Minute => now.checked_sub_signed(Duration::minutes(amount_i)),
        TimeUnit::Hour => now.checked_sub_signed(Duration::hours(amount_i)),
        TimeUnit::Day => now.checked_sub_signed(Duration::days(amount_i)),
        TimeUnit::Week => now.checked_sub_signed(Duration::weeks(amount_i)),
        TimeUnit::Month => now.checked_sub_months(Months::new(amount)),
        TimeUnit::Year => now.checked_sub_months(Months::new(amount.saturating_mul(12))),
    };
    shifted.unwrap_or(now)
}

/// Convert an elapsed-time phrase into an absolute timestamp in milliseconds.
///
/// Unparsable input yields `now` itself.
pub fn parse_relative_time(text: &str, now: DateTime<Utc>, vocab: &TimeVocabulary) -> i64 {
    static AMOUNT_UNIT: OnceLock<Option<Regex>> = OnceLock::new();

    let lower = text.to_lowercase();
    if vocab.today.iter().any(|p| lower.contains(p)) {
        return now.timestamp_millis();
    }
    if vocab.yesterday.iter().any(|p| lower.contains(p)) {
        return subtract(now, 1, TimeUnit::Day).timestamp_millis();
    }

    let Some(re) = cached_regex(&AMOUNT_UNIT, r"(?:(\d+)|\b(an?)\b)\s*([a-z]+)") else {
        return now.timestamp_millis();
    };

    for caps in re.captures_iter(&lower) {
        let amount = match (caps.get(1), caps.get(2)) {
            (Some(n), _) => n.as_str().parse::<u32>().unwrap_or(0),
            (None, Some(_)) => 1,
            _ => continue,
        };
        let word = caps.get(3).map(|m| m.as_str()).unwrap_or_default();
        if let Some((_, unit)) = vocab.units.iter().find(|(key, _)| word.starts_with(key)) {
            return subtract(now, amount, *unit).timestamp_millis();
        }
    }

    now.timestamp_millis()
}

/// Interpret a bare epoch as seconds or milliseconds depending on its magnitude
pub fn normalize_epoch_millis(value: i64) -> i64 {
    if value.abs() < 100_000_000_000 {
        value.saturating_mul(1000)
    } else {
        value
    }
}

/// Parse the absolute date formats the supported sites emit into epoch milliseconds
pub fn parse_timestamp(text: &str) -> Option<i64> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    if let Ok(n) = text.parse::<i64>() {
        return Some(normalize_epoch_millis(n));
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.timestamp_millis());
    }

    const DATETIME_FORMATS: &[&str] = &[
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%d %H:%M",
    ];
    for fmt in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(text, fmt) {
            return Some(dt.and_utc().timestamp_millis());
        }
    }

    const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%d/%m/%Y", "%d-%m-%Y", "%B %d, %Y", "%b %d, %Y"];
    for fmt in DATE_FORMATS {
        if let Ok(d) = NaiveDate::parse_from_str(text, fmt) {
            return d.and_hms_opt(0, 0, 0).map(|dt| dt.and_utc().timestamp_millis());
        }
    }

    None
}

/// A source timestamp may never be later than the moment it was fetched
pub fn clamp_to_now(timestamp: i64, now: i64) -> i64 {
    timestamp.min(now)
}

pub type StatusTable = &'static [(&'static str, MangaStatus)];

pub const INDONESIAN_STATUS: StatusTable = &[
    ("ongoing", MangaStatus::Ongoing),
    ("berjalan", MangaStatus::Ongoing),
    ("berlangsung", MangaStatus::Ongoing),
    ("completed", MangaStatus::Completed),
    ("tamat", MangaStatus::Completed),
    ("selesai", MangaStatus::Completed),
    ("end", MangaStatus::Completed),
    ("licensed", MangaStatus::Licensed),
    ("lisensi", MangaStatus::Licensed),
    ("publishing finished", MangaStatus::PublishingFinished),
    ("finish", MangaStatus::PublishingFinished),
    ("finished", MangaStatus::PublishingFinished),
    ("cancelled", MangaStatus::Cancelled),
    ("canceled", MangaStatus::Cancelled),
    ("dibatalkan", MangaStatus::Cancelled),
    ("batal", MangaStatus::Cancelled),
    ("hiatus", MangaStatus::OnHiatus),
    ("istirahat", MangaStatus::OnHiatus),
    ("jeda", MangaStatus::OnHiatus),
];

pub const ENGLISH_STATUS: StatusTable = &[
    ("publishing finished", MangaStatus::PublishingFinished),
    ("ongoing", MangaStatus::Ongoing),
    ("releasing", MangaStatus::Ongoing),
    ("publishing", MangaStatus::Ongoing),
    ("complete", MangaStatus::Completed),
    ("completed", MangaStatus::Completed),
    ("finished", MangaStatus::Completed),
    ("ended", MangaStatus::Completed),
    ("hiatus", MangaStatus::OnHiatus),
    ("cancel", MangaStatus::Cancelled),
    ("cancelled", MangaStatus::Cancelled),
    ("canceled", MangaStatus::Cancelled),
    ("dropped", MangaStatus::Cancelled),
    ("discontinued", MangaStatus::Cancelled),
    ("licensed", MangaStatus::Licensed),
];

/// Map free-text status to the enum by case-insensitive whole-word match, first match wins
pub fn parse_status(text: &str, table: StatusTable) -> MangaStatus {
    let lower = text.to_lowercase();
    table
        .iter()
        .find(|(keyword, _)| contains_word(&lower, keyword))
        .map(|(_, status)| *status)
        .unwrap_or(MangaStatus::Unknown)
}

/// `keyword` occurs in `text` with no letter or digit on either side
fn contains_word(text: &str, keyword: &str) -> bool {
    text.match_indices(keyword).any(|(start, found)| {
        let before = text[..start].chars().next_back();
        let after = text[start + found.len()..].chars().next();
        !before.is_some_and(char::is_alphanumeric) && !after.is_some_and(char::is_alphanumeric)
    })
}

/// Rightmost decimal number in `text`, accepting `,` as the decimal separator
pub fn extract_chapter_number(text: &str) -> f32 {
    static NUMBER: OnceLock<Option<Regex>> = OnceLock::new();

    cached_regex(&NUMBER, r"\d+(?:[.,]\d+)?")
        .and_then(|re| re.find_iter(text).last())
        .and_then(|m| m.as_str().replace(',', ".").parse::<f32>().ok())
        .unwrap_or(0.0)
}

/// `12` for whole numbers, `12.5` otherwise
pub fn format_chapter_number(n: f32) -> String {
    if n.fract() == 0.0 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

/// Tag an image URL with the Referer the image CDN expects
pub fn with_referer(url: &str, origin: &str) -> ImageRequest {
    let referer = format!("{}/", origin.trim_end_matches('/'));
    ImageRequest::new(url).with_header("Referer", referer)
}

/// Total page count for listings whose upstream gives no explicit signal
pub fn optimistic_total_pages(page: u32, found: usize) -> u32 {
    if found > 0 {
        page.saturating_add(1)
    } else {
        page
    }
}

/// Most recently updated first, identifier descending on equal timestamps
pub fn sort_latest(items: &mut [Manga]) {
    items.sort_by(|a, b| {
        b.last_update
            .cmp(&a.last_update)
            .then_with(|| b.url.cmp(&a.url))
    });
}

/// Highest chapter first; equal numbers by newest upload, then URL
pub fn sort_chapters(chapters: &mut [Chapter]) {
    chapters.sort_by(|a, b| {
        b.chapter_number
            .partial_cmp(&a.chapter_number)
            .unwrap_or(Ordering::Equal)
            .then_with(|| b.date_upload.cmp(&a.date_upload))
            .then_with(|| a.url.cmp(&b.url))
    });
}

/// Give undated listing items timestamps that preserve the site's own order
pub fn stamp_listing_order(items: &mut [Manga], now: i64) {
    for (i, manga) in items.iter_mut().enumerate() {
        if manga.last_update <= 0 {
            manga.last_update = now - i as i64;
        }
    }
}

/// Append a tag unless an equal one (ignoring case) is already present
pub fn push_unique(list: &mut Vec<String>, value: &str) {
    let value = value.trim();
    if value.is_empty() {
        return;
    }
    if !list.iter().any(|v| v.eq_ignore_ascii_case(value)) {
        list.push(value.to_string());
    }
}
