//! Live checks against the real sites. Run with `cargo test -- --ignored`.

use manga_sources::config::Config;
use manga_sources::{Source, SourceAdapter, SourceRegistry};
use std::sync::Arc;

fn adapter(source: Source) -> Arc<dyn SourceAdapter> {
    let _ = env_logger::builder().is_test(true).try_init();
    let registry = SourceRegistry::from_config(&Config::default()).expect("registry");
    registry.get(source).expect("adapter registered")
}

/// Popular, then details, chapters and pages of the first title found
async fn browse_first_title(source: Source) {
    let adapter = adapter(source);
    let popular = adapter.get_popular_manga(1).await;
    assert!(!popular.is_empty(), "{}: popular listing empty", adapter.name());

    let first = &popular[0];
    println!("{}: {} ({})", adapter.name(), first.title, first.url);
    let details = adapter.get_manga_details(&first.url).await.expect("details");
    assert!(!details.title.is_empty());

    let chapters = adapter.get_chapter_list(&first.url).await;
    assert!(!chapters.is_empty(), "{}: no chapters", adapter.name());
    for pair in chapters.windows(2) {
        assert!(pair[0].chapter_number >= pair[1].chapter_number);
    }

    let pages = adapter.get_page_list(&chapters[0].url).await;
    assert!(!pages.is_empty(), "{}: no pages for {}", adapter.name(), chapters[0].url);
}

#[tokio::test]
#[ignore]
async fn test_komiku_live() {
    browse_first_title(Source::Komiku).await;
}

#[tokio::test]
#[ignore]
async fn test_komikcast_live() {
    browse_first_title(Source::KomikCast).await;
}

#[tokio::test]
#[ignore]
async fn test_mangadex_live() {
    browse_first_title(Source::MangaDex).await;
}

#[tokio::test]
#[ignore]
async fn test_mangabats_live() {
    browse_first_title(Source::Mangabats).await;
}

#[tokio::test]
#[ignore]
async fn test_kiryuu_live() {
    browse_first_title(Source::Kiryuu).await;
}

#[tokio::test]
#[ignore]
async fn test_softkomik_live() {
    browse_first_title(Source::Softkomik).await;
}

#[tokio::test]
#[ignore]
async fn test_weebcentral_live() {
    browse_first_title(Source::Weebcentral).await;
}

#[tokio::test]
#[ignore]
async fn test_westmanga_live() {
    browse_first_title(Source::WestManga).await;
}

#[tokio::test]
#[ignore]
async fn test_unknown_id_is_not_found() {
    let adapter = adapter(Source::WestManga);
    let err = adapter
        .get_manga_details("this-title-does-not-exist-000")
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
#[ignore]
async fn test_latest_pagination_terminates() {
    let adapter = adapter(Source::Komiku);
    let page = adapter.get_latest_manga(1).await;
    assert!(page.total_pages >= 1);
    let far = adapter.get_latest_manga(9999).await;
    assert!(far.items.is_empty());
    assert!(far.total_pages <= 9999);
}
