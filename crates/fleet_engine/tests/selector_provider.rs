use std::collections::BTreeMap;
use std::sync::Arc;

use fleet_engine::{
    ExtractError, ListingItem, PageValidator, Partitions, ProviderEntry, ProviderRegistry,
    RegistryError, ScrapeProvider, SelectorProvider, SelectorSpec, SpecError,
};
use pretty_assertions::assert_eq;

fn games_spec() -> SelectorSpec {
    SelectorSpec {
        short_name: "games".to_string(),
        site_root: "http://www.games.test/".to_string(),
        page_marker: "Games Database".to_string(),
        partitions: Partitions::Years {
            first: 1994,
            last: 1996,
        },
        listing_url: "/browse/{partition}/offset,{offset}/".to_string(),
        page_size: Some(3),
        item_selector: "td a".to_string(),
        item_prefix: Some("/game/".to_string()),
        detail_urls: vec!["/game/{key}".to_string(), "/game/{key}/screenshots".to_string()],
        title_selectors: vec!["h1.niceHeaderTitle a".to_string(), "title".to_string()],
        tag_selector: Some("#coreGameGenre div a".to_string()),
        tag_separator: Some("/".to_string()),
        artifact_selector: "div.thumbnail a".to_string(),
        max_artifacts: Some(2),
        fields: BTreeMap::from([("released".to_string(), "#release".to_string())]),
        ..SelectorSpec::default()
    }
}

fn provider() -> SelectorProvider {
    SelectorProvider::new(games_spec()).expect("valid spec")
}

#[test]
fn partitions_and_listing_urls() {
    let provider = provider();
    assert_eq!(provider.discovery_partitions(), vec!["1994", "1995", "1996"]);
    assert_eq!(
        provider.listing_url("1995", 2),
        "http://www.games.test/browse/1995/offset,6/"
    );
    assert_eq!(
        provider.detail_urls(&ListingItem::new("doom")),
        vec![
            "http://www.games.test/game/doom",
            "http://www.games.test/game/doom/screenshots"
        ]
    );
}

#[test]
fn listing_keeps_prefixed_links_and_reports_full_pages() {
    let provider = provider();
    let body = r#"<html><table>
        <tr><td><a href="/game/doom">Doom</a></td></tr>
        <tr><td><a href="/game/heretic/">Heretic</a></td></tr>
        <tr><td><a href="/company/id">id</a></td></tr>
        <tr><td><a href="/game/hexen">Hexen</a></td></tr>
    </table></html>"#;
    let page = provider.parse_listing(body);
    assert_eq!(
        page.items,
        vec![
            ListingItem::new("doom"),
            ListingItem::new("heretic"),
            ListingItem::new("hexen")
        ]
    );
    assert!(page.full_page);

    let last = provider
        .parse_listing(r#"<table><tr><td><a href="/game/quake">Quake</a></td></tr></table>"#);
    assert_eq!(last.items.len(), 1);
    assert!(!last.full_page);
}

#[test]
fn extract_combines_detail_pages() {
    let provider = provider();
    let main = r#"<html><head><title>Doom - Games Database</title></head><body>
        <h1 class="niceHeaderTitle"><a href="/game/doom"> Doom </a></h1>
        <div id="coreGameGenre"><div><a>Action / Shooter</a><a>Action</a></div></div>
        <span id="release">1993</span>
    </body></html>"#;
    let shots = r#"<html><body>
        <div class="thumbnail"><a href="/images/doom-1.png">1</a></div>
        <div class="thumbnail"><a href="/images/doom-1.png">dup</a></div>
        <div class="thumbnail"><a href="http://cdn.games.test/doom-2.png">2</a></div>
        <div class="thumbnail"><a href="/images/doom-3.png">3</a></div>
    </body></html>"#;

    let record = provider
        .extract(&ListingItem::new("doom"), &[main.to_string(), shots.to_string()])
        .expect("extracts");
    assert_eq!(record.key, "doom");
    assert_eq!(record.title, "Doom");
    assert_eq!(record.tags, vec!["Action", "Shooter"]);
    assert_eq!(
        record.artifacts,
        vec![
            "http://www.games.test/images/doom-1.png",
            "http://cdn.games.test/doom-2.png"
        ]
    );
    assert_eq!(record.attributes.get("released").map(String::as_str), Some("1993"));
    assert!(record.is_publishable());
}

#[test]
fn extract_falls_back_to_later_title_selectors() {
    let record = provider()
        .extract(
            &ListingItem::new("hexen"),
            &["<title>Hexen</title>".to_string(), String::new()],
        )
        .expect("extracts");
    assert_eq!(record.title, "Hexen");
    assert!(record.artifacts.is_empty());
    assert!(!record.is_publishable());
}

#[test]
fn extract_errors() {
    let provider = provider();
    let item = ListingItem::new("doom");
    assert_eq!(
        provider.extract(&item, &["<p>SITE</p>".to_string()]),
        Err(ExtractError::PageCount {
            expected: 2,
            actual: 1
        })
    );
    assert_eq!(
        provider.extract(&item, &["<p></p>".to_string(), "<p></p>".to_string()]),
        Err(ExtractError::MissingField("title".to_string()))
    );
}

#[test]
fn page_validator_requires_site_marker() {
    let validator = provider().page_validator();
    assert!(validator.validate("<title>Games Database</title>").is_ok());
    let err = validator.validate("<title>Blocked</title>").unwrap_err();
    assert_eq!(err.0, "looks like the site must have been blocked");
}

#[test]
fn invalid_specs_are_rejected() {
    let bad_selector = SelectorSpec {
        item_selector: "td >".to_string(),
        ..games_spec()
    };
    assert!(matches!(
        SelectorProvider::new(bad_selector),
        Err(SpecError::Selector { .. })
    ));

    let bad_root = SelectorSpec {
        site_root: "not a url".to_string(),
        ..games_spec()
    };
    assert!(matches!(
        SelectorProvider::new(bad_root),
        Err(SpecError::SiteRoot(_))
    ));

    let no_details = SelectorSpec {
        detail_urls: Vec::new(),
        ..games_spec()
    };
    assert!(matches!(
        SelectorProvider::new(no_details),
        Err(SpecError::NoDetailPages(_))
    ));
}

#[test]
fn registry_tracks_capability_and_rejects_duplicates() {
    let mut registry = ProviderRegistry::new();
    registry
        .register(ProviderEntry::scraping("Games Database", Arc::new(provider())))
        .unwrap();
    registry
        .register(ProviderEntry::display_only("archive", "Screenshot Archive"))
        .unwrap();

    assert_eq!(registry.len(), 2);
    assert!(registry.get("games").is_some_and(ProviderEntry::can_scrape));
    assert!(!registry.get("archive").is_some_and(ProviderEntry::can_scrape));
    let scrapable: Vec<&str> = registry
        .scrapable()
        .map(|entry| entry.short_name.as_str())
        .collect();
    assert_eq!(scrapable, vec!["games"]);

    let err = registry
        .register(ProviderEntry::display_only("games", "Again"))
        .unwrap_err();
    assert_eq!(err, RegistryError::Duplicate("games".to_string()));
}
