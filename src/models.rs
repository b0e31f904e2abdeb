use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Source {
    Komiku = 3,
    KomikCast = 4,
    MangaDex = 5,
    Mangabats = 6,
    Kiryuu = 20,
    Softkomik = 21,
    Weebcentral = 22,
    WestManga = 23,
}

impl Source {
    pub const ALL: [Source; 8] = [
        Source::Komiku,
        Source::KomikCast,
        Source::MangaDex,
        Source::Mangabats,
        Source::Kiryuu,
        Source::Softkomik,
        Source::Weebcentral,
        Source::WestManga,
    ];

    /// Numeric id the host uses to route calls back to the owning adapter
    pub fn id(self) -> i32 {
        self as i32
    }
}

/// Publication status as reported by the upstream site
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum MangaStatus {
    #[default]
    Unknown = 0,
    Ongoing = 1,
    Completed = 2,
    Licensed = 3,
    PublishingFinished = 4,
    Cancelled = 5,
    OnHiatus = 6,
}

/// An image URL plus the headers the image loader must replay when fetching it.
///
/// Hosts that only accept bare strings can use the `Display` form,
/// `https://cdn/x.jpg|Referer=https://site/`, and split it again with [`ImageRequest::parse`].
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
pub struct ImageRequest {
    pub url: String,
    pub headers: Vec<(String, String)>,
}

impl ImageRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            headers: Vec::new(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn referer(&self) -> Option<&str> {
        self.header("Referer")
    }

    /// Parse the `url|Header=value&Header=value` string form
    pub fn parse(tagged: &str) -> Self {
        let Some((url, directives)) = tagged.split_once('|') else {
            return Self::new(tagged);
        };

        let headers = directives
            .split('&')
            .filter_map(|pair| pair.split_once('='))
            .filter(|(k, _)| !k.trim().is_empty())
            .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
            .collect();

        Self {
            url: url.to_string(),
            headers,
        }
    }
}

impl fmt::Display for ImageRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.url)?;
        for (i, (name, value)) in self.headers.iter().enumerate() {
            let sep = if i == 0 { '|' } else { '&' };
            write!(f, "{}{}={}", sep, name, value)?;
        }
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Manga {
    pub title: String,
    /// Adapter-defined identifier: absolute URL, relative path or slug
    pub url: String,
    pub thumbnail: Option<ImageRequest>,
    pub source: Source,
    pub status: MangaStatus,
    pub author: String,
    pub description: String,
    pub genres: Vec<String>,
    /// Unix epoch milliseconds, never later than the time it was fetched
    pub last_update: i64,
}

impl Manga {
    pub fn new(source: Source, url: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            url: url.into(),
            thumbnail: None,
            source,
            status: MangaStatus::Unknown,
            author: UNKNOWN_AUTHOR.to_string(),
            description: String::new(),
            genres: Vec::new(),
            last_update: 0,
        }
    }

    pub fn with_thumbnail(mut self, thumbnail: Option<ImageRequest>) -> Self {
        self.thumbnail = thumbnail.filter(|t| !t.url.is_empty());
        self
    }
}

pub const UNKNOWN_AUTHOR: &str = "Unknown";

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Chapter {
    pub id: String,
    pub manga_id: String,
    pub name: String,
    pub url: String,
    pub chapter_number: f32,
    /// Unix epoch milliseconds
    pub date_upload: i64,
}

impl Chapter {
    pub fn new(url: impl Into<String>, name: impl Into<String>, chapter_number: f32) -> Self {
        Self {
            id: String::new(),
            manga_id: String::new(),
            name: name.into(),
            url: url.into(),
            chapter_number,
            date_upload: 0,
        }
    }
}

/// One page of a listing together with the number of pages the upstream reports
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct MangaPage {
    pub items: Vec<Manga>,
    pub total_pages: u32,
}

impl MangaPage {
    pub fn new(items: Vec<Manga>, total_pages: u32) -> Self {
        Self { items, total_pages }
    }

    pub fn empty(page: u32) -> Self {
        Self {
            items: Vec::new(),
            total_pages: page,
        }
    }
}
