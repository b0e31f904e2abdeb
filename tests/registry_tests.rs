use manga_sources::config::Config;
use manga_sources::{Source, SourceRegistry};

#[test]
fn test_registry_from_toml_config() {
    let config = Config::from_toml_str(
        r#"
        [bot_detection]
        timeout_secs = 10

        [mangadex]
        language = "en"
        data_saver = false
        "#,
    )
    .unwrap();
    assert_eq!(config.bot_detection.timeout_secs, 10);
    assert!(!config.bot_detection.enable_browser);

    let registry = SourceRegistry::from_config(&config).unwrap();
    let names: Vec<&str> = registry.all().iter().map(|a| a.name()).collect();
    assert_eq!(names.len(), 8);
    assert!(names.contains(&"WestManga"));
    assert_eq!(registry.get(Source::MangaDex).map(|a| a.language().to_string()), Some("en".to_string()));
    assert_eq!(registry.by_name("komikcast").map(|a| a.id()), Some(Source::KomikCast));
}

#[test]
fn test_empty_language_is_rejected() {
    assert!(Config::from_toml_str("[mangadex]\nlanguage = \"\"\n").is_err());
}

#[tokio::test]
#[ignore] // hits every live site
async fn test_search_all_live() {
    let _ = env_logger::builder().is_test(true).try_init();
    let registry = SourceRegistry::from_config(&Config::default()).unwrap();
    let results = registry.search_all("solo leveling").await;
    assert!(!results.is_empty());
}
