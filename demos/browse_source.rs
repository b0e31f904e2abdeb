use manga_sources::config::Config;
use manga_sources::SourceRegistry;

/// Usage: cargo run --example browse_source -- <source> [search query]
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let mut args = std::env::args().skip(1);
    let name = args.next().unwrap_or_else(|| "komiku".to_string());
    let query: Vec<String> = args.collect();

    let registry = SourceRegistry::from_config(&Config::load())?;
    let Some(adapter) = registry.by_name(&name) else {
        eprintln!("Unknown source: {}", name);
        return Ok(());
    };

    println!("=== {} ({}) ===\n", adapter.name(), adapter.base_url());

    let titles = if query.is_empty() {
        adapter.get_popular_manga(1).await
    } else {
        adapter.search_manga(&query.join(" "), 1).await
    };
    println!("Found {} titles", titles.len());
    for manga in titles.iter().take(10) {
        println!("  {} [{:?}] {}", manga.title, manga.status, manga.url);
    }

    let Some(first) = titles.first() else { return Ok(()) };
    match adapter.get_manga_details(&first.url).await {
        Ok(details) => println!("\n{} by {}\n{}", details.title, details.author, details.genres.join(", ")),
        Err(e) => println!("\nDetails failed: {}", e),
    }

    let chapters = adapter.get_chapter_list(&first.url).await;
    println!("\n{} chapters", chapters.len());
    if let Some(latest) = chapters.first() {
        let pages = adapter.get_page_list(&latest.url).await;
        println!("{}: {} pages", latest.name, pages.len());
        if let Some(page) = pages.first() {
            println!("  {}", page);
        }
    }
    Ok(())
}
