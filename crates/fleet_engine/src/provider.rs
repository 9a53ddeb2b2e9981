use std::collections::BTreeMap;
use std::sync::Arc;

use crate::validate::PageValidator;
use crate::StagingRecord;

/// A unit of detail work discovered in the listing phase, identified by key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListingItem {
    pub key: String,
}

impl ListingItem {
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }
}

/// Items found on one listing page.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ListingPage {
    pub items: Vec<ListingItem>,
    /// The page was full, so the next page of the same partition may exist.
    pub full_page: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ListingRoute {
    Direct,
    #[default]
    Proxied,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExtractError {
    #[error("{0} not found")]
    MissingField(String),
    #[error("expected {expected} pages, got {actual}")]
    PageCount { expected: usize, actual: usize },
}

/// Site-specific collaborator: where listings live, how to read them, and how
/// to turn fetched detail pages into a record.
pub trait ScrapeProvider: Send + Sync {
    fn short_name(&self) -> &str;

    /// Confirms a fetched page came from this site.
    fn page_validator(&self) -> Arc<dyn PageValidator>;

    /// Independent slices of the discovery space (years, letters, ...).
    fn discovery_partitions(&self) -> Vec<String>;

    fn listing_route(&self) -> ListingRoute {
        ListingRoute::Proxied
    }

    fn listing_url(&self, partition: &str, page: usize) -> String;

    fn parse_listing(&self, body: &str) -> ListingPage;

    /// Pages to fetch for one item, passed to `extract` in the same order.
    fn detail_urls(&self, item: &ListingItem) -> Vec<String>;

    fn extract(&self, item: &ListingItem, pages: &[String]) -> Result<StagingRecord, ExtractError>;
}

/// A registered provider. Only entries with a scraper can be started.
#[derive(Clone)]
pub struct ProviderEntry {
    pub short_name: String,
    pub pretty_name: String,
    scraper: Option<Arc<dyn ScrapeProvider>>,
}

impl ProviderEntry {
    pub fn scraping(pretty_name: impl Into<String>, scraper: Arc<dyn ScrapeProvider>) -> Self {
        Self {
            short_name: scraper.short_name().to_string(),
            pretty_name: pretty_name.into(),
            scraper: Some(scraper),
        }
    }

    pub fn display_only(short_name: impl Into<String>, pretty_name: impl Into<String>) -> Self {
        Self {
            short_name: short_name.into(),
            pretty_name: pretty_name.into(),
            scraper: None,
        }
    }

    pub fn can_scrape(&self) -> bool {
        self.scraper.is_some()
    }

    pub fn scraper(&self) -> Option<Arc<dyn ScrapeProvider>> {
        self.scraper.clone()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("provider {0} registered twice")]
    Duplicate(String),
}

/// Providers registered at startup, keyed by short name.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    entries: BTreeMap<String, ProviderEntry>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, entry: ProviderEntry) -> Result<(), RegistryError> {
        if self.entries.contains_key(&entry.short_name) {
            return Err(RegistryError::Duplicate(entry.short_name));
        }
        self.entries.insert(entry.short_name.clone(), entry);
        Ok(())
    }

    pub fn get(&self, short_name: &str) -> Option<&ProviderEntry> {
        self.entries.get(short_name)
    }

    pub fn entries(&self) -> impl Iterator<Item = &ProviderEntry> {
        self.entries.values()
    }

    pub fn scrapable(&self) -> impl Iterator<Item = &ProviderEntry> {
        self.entries().filter(|entry| entry.can_scrape())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
