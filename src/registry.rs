use crate::browser_client::{BypassService, HeadlessBypass};
use crate::config::Config;
use crate::error::Result;
use crate::helpers::parse_source;
use crate::http_client::{build_client, Fetcher};
use crate::models::{Manga, Source};
use crate::source::SourceAdapter;
use crate::sources::{
    kiryuu::Kiryuu, komikcast::KomikCast, komiku::Komiku, mangabats::Mangabats, mangadex::MangaDex,
    softkomik::Softkomik, weebcentral::Weebcentral, westmanga::WestManga,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;

/// Upper bound for one adapter's share of an aggregate search
const SEARCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Every adapter, built once over a shared HTTP client
pub struct SourceRegistry {
    adapters: Vec<Arc<dyn SourceAdapter>>,
}

impl SourceRegistry {
    pub fn from_config(config: &Config) -> Result<Self> {
        let client = build_client(&config.bot_detection.http_client_config())?;
        let bypass: Option<Arc<dyn BypassService>> = if config.bot_detection.enable_browser {
            log::info!("Browser bypass enabled");
            Some(Arc::new(HeadlessBypass::new(config.bot_detection.browser_config())))
        } else {
            None
        };
        let fetcher = || Fetcher::new(client.clone()).with_bypass(bypass.clone());

        let adapters: Vec<Arc<dyn SourceAdapter>> = vec![
            Arc::new(Komiku::new(fetcher())),
            Arc::new(KomikCast::new(fetcher())),
            Arc::new(MangaDex::new(fetcher(), &config.mangadex)),
            Arc::new(Mangabats::new(fetcher())),
            Arc::new(Kiryuu::new(fetcher())),
            Arc::new(Softkomik::new(fetcher())),
            Arc::new(Weebcentral::new(fetcher())),
            Arc::new(WestManga::new(fetcher())),
        ];
        Ok(Self { adapters })
    }

    pub fn get(&self, source: Source) -> Option<Arc<dyn SourceAdapter>> {
        self.adapters.iter().find(|a| a.id() == source).cloned()
    }

    /// Look up by name ("komikcast", "west-manga") or numeric id ("23")
    pub fn by_name(&self, name: &str) -> Option<Arc<dyn SourceAdapter>> {
        parse_source(name).and_then(|source| self.get(source))
    }

    pub fn all(&self) -> &[Arc<dyn SourceAdapter>] {
        &self.adapters
    }

    /// Query every adapter concurrently. Adapters that fail or time out add nothing.
    pub async fn search_all(&self, query: &str) -> Vec<Manga> {
        let mut set = JoinSet::new();
        for adapter in &self.adapters {
            let adapter = Arc::clone(adapter);
            let query = query.to_string();
            set.spawn(async move {
                let name = adapter.name();
                match tokio::time::timeout(SEARCH_TIMEOUT, adapter.search_manga(&query, 1)).await {
                    Ok(items) => {
                        log::debug!("[{}] {} results for {:?}", name, items.len(), query);
                        (adapter.id(), items)
                    }
                    Err(_) => {
                        log::warn!("[{}] Search timed out", name);
                        (adapter.id(), Vec::new())
                    }
                }
            });
        }

        let mut results: Vec<(Source, Vec<Manga>)> = Vec::new();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(found) => results.push(found),
                Err(e) => log::error!("Search task failed: {}", e),
            }
        }
        // Stable output regardless of completion order
        results.sort_by_key(|(source, _)| source.id());
        results.into_iter().flat_map(|(_, items)| items).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_lookup() {
        let registry = SourceRegistry::from_config(&Config::default()).unwrap();
        assert_eq!(registry.all().len(), Source::ALL.len());
        for source in Source::ALL {
            assert_eq!(registry.get(source).map(|a| a.id()), Some(source));
        }
        assert_eq!(registry.by_name("West-Manga").map(|a| a.id()), Some(Source::WestManga));
        assert_eq!(registry.by_name("5").map(|a| a.name()), Some("MangaDex"));
        assert!(registry.by_name("nope").is_none());
    }
}
