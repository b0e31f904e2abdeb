use crate::error::{Result, SourceError};
use crate::models::{Chapter, ImageRequest, Manga, MangaPage, Source};
use async_trait::async_trait;

/// Status filter codes used by the host: 0 = any, 1 = ongoing, 2 = completed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StatusFilter {
    #[default]
    Any,
    Ongoing,
    Completed,
}

impl StatusFilter {
    /// Unknown codes degrade to `Any`
    pub fn from_code(code: i32) -> Self {
        match code {
            1 => StatusFilter::Ongoing,
            2 => StatusFilter::Completed,
            _ => StatusFilter::Any,
        }
    }
}

/// Format filter codes: 0 = any, 1 = manga, 2 = manhwa, 3 = manhua
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TypeFilter {
    #[default]
    Any,
    Manga,
    Manhwa,
    Manhua,
}

impl TypeFilter {
    pub fn from_code(code: i32) -> Self {
        match code {
            1 => TypeFilter::Manga,
            2 => TypeFilter::Manhwa,
            3 => TypeFilter::Manhua,
            _ => TypeFilter::Any,
        }
    }

    pub fn as_str(self) -> Option<&'static str> {
        match self {
            TypeFilter::Any => None,
            TypeFilter::Manga => Some("manga"),
            TypeFilter::Manhwa => Some("manhwa"),
            TypeFilter::Manhua => Some("manhua"),
        }
    }
}

/// One website or API translated into the shared domain model.
///
/// Listing, search, chapter and page operations never fail: network and parse
/// problems are logged and produce empty (or partial) results. Only
/// [`SourceAdapter::get_manga_details`] reports an id the upstream does not know.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn id(&self) -> Source;
    fn name(&self) -> &'static str;
    fn base_url(&self) -> &'static str;
    fn language(&self) -> &str;

    /// One page of the site's popularity ordering; an empty list means no more pages
    async fn get_popular_manga(&self, page: u32) -> Vec<Manga>;

    /// Recently updated titles, newest first
    async fn get_latest_manga(&self, page: u32) -> MangaPage;

    /// The site's default browse listing
    async fn get_manga_list(&self, page: u32) -> MangaPage;

    async fn get_filtered_manga(
        &self,
        page: u32,
        status: StatusFilter,
        kind: TypeFilter,
    ) -> MangaPage;

    async fn search_manga(&self, query: &str, page: u32) -> Vec<Manga>;

    async fn get_manga_details(&self, id: &str) -> Result<Manga>;

    /// Every chapter, highest number first
    async fn get_chapter_list(&self, manga_id: &str) -> Vec<Chapter>;

    /// Page images in reading order
    async fn get_page_list(&self, chapter_id: &str) -> Vec<ImageRequest>;
}

/// Settle a details lookup at the adapter boundary: NotFound passes through,
/// every other failure becomes the `partial` title.
pub fn details_or_partial(
    adapter: &str,
    id: &str,
    result: Result<Manga>,
    partial: impl FnOnce() -> Manga,
) -> Result<Manga> {
    match result {
        Ok(manga) => Ok(manga),
        Err(e) if e.is_not_found() => Err(SourceError::NotFound(format!("{} {}", adapter, id))),
        Err(e) => {
            log::warn!("[{}] Details for {} unavailable, returning partial: {}", adapter, id, e);
            Ok(partial())
        }
    }
}
