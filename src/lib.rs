//! Source adapters that turn manga websites and APIs into one domain model.
//!
//! Every adapter implements [`source::SourceAdapter`]; the [`registry::SourceRegistry`]
//! builds them from a [`config::Config`] and hands them out as trait objects.

pub mod browser_client;
pub mod config;
pub mod error;
pub mod extract;
pub mod helpers;
pub mod http_client;
pub mod models;
pub mod rate_limit;
pub mod registry;
pub mod source;
pub mod sources;

pub use error::{Result, SourceError};
pub use models::{Chapter, ImageRequest, Manga, MangaPage, MangaStatus, Source};
pub use registry::SourceRegistry;
pub use source::{SourceAdapter, StatusFilter, TypeFilter};
