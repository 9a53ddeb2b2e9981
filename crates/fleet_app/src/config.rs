//! RON configuration for the console binary.
//!
//! Every section is optional; omitted fields keep the engine defaults.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use fleet_engine::{
    BrokerSettings, FetchSettings, ListingRoute, Partitions, PoolSettings, ProviderEntry,
    ProviderRegistry, RegistryError, ScrapeSettings, SelectorProvider, SelectorSpec, SpecError,
};
use serde::Deserialize;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[from] ron::error::SpannedError),
    #[error("provider {name}: {source}")]
    Provider {
        name: String,
        #[source]
        source: SpecError,
    },
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FleetConfig {
    /// Record stores live in `<data_dir>/<provider>`.
    pub data_dir: PathBuf,
    /// Application log plus per-provider status and error logs.
    pub log_dir: PathBuf,
    pub fetch: FetchConfig,
    pub pool: PoolConfig,
    pub broker: BrokerConfig,
    pub scrape: ScrapeConfig,
    pub providers: Vec<ProviderConfig>,
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            log_dir: PathBuf::from("logs"),
            fetch: FetchConfig::default(),
            pool: PoolConfig::default(),
            broker: BrokerConfig::default(),
            scrape: ScrapeConfig::default(),
            providers: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    pub connect_timeout_ms: u64,
    pub header_timeout_ms: u64,
    pub request_timeout_ms: u64,
    pub max_bytes: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        let defaults = FetchSettings::default();
        Self {
            connect_timeout_ms: millis(defaults.connect_timeout),
            header_timeout_ms: millis(defaults.header_timeout),
            request_timeout_ms: millis(defaults.request_timeout),
            max_bytes: defaults.max_bytes,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    pub listing_pages: Vec<String>,
    pub row_selector: String,
    pub anonymity_levels: Vec<String>,
    pub echo_url: String,
    pub retry_backoff_ms: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        let defaults = PoolSettings::default();
        Self {
            listing_pages: defaults.listing_pages,
            row_selector: defaults.row_selector,
            anonymity_levels: defaults.anonymity_levels,
            echo_url: defaults.echo_url,
            retry_backoff_ms: millis(defaults.retry_backoff),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    pub workers: usize,
    pub max_requests_per_proxy: usize,
    pub request_delay_ms: u64,
    pub max_attempts: Option<u32>,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        let defaults = BrokerSettings::default();
        Self {
            workers: defaults.workers,
            max_requests_per_proxy: defaults.max_requests_per_proxy,
            request_delay_ms: millis(defaults.request_delay),
            max_attempts: defaults.max_attempts,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScrapeConfig {
    pub detail_workers: usize,
    /// When set, `<dir>/<provider>.listings` replaces listing discovery if present.
    pub listing_cache_dir: Option<PathBuf>,
}

impl Default for ScrapeConfig {
    fn default() -> Self {
        Self {
            detail_workers: ScrapeSettings::default().detail_workers,
            listing_cache_dir: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    pub name: String,
    pub pretty_name: String,
    /// Providers without a site are listed but cannot scrape.
    #[serde(default)]
    pub site: Option<SiteConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub enum PartitionsConfig {
    #[default]
    Single,
    Years { first: i32, last: i32 },
    Named(Vec<String>),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SiteConfig {
    pub root: String,
    pub page_marker: String,
    pub partitions: PartitionsConfig,
    pub listing_url: String,
    /// Listing pages too large for web proxies are fetched directly.
    pub listing_direct: bool,
    pub page_size: Option<usize>,
    pub item_selector: String,
    pub item_attr: String,
    pub item_prefix: Option<String>,
    pub detail_urls: Vec<String>,
    pub title_selectors: Vec<String>,
    pub tag_selector: Option<String>,
    pub tag_separator: Option<String>,
    pub artifact_selector: String,
    pub artifact_attrs: Vec<String>,
    pub max_artifacts: Option<usize>,
    pub fields: BTreeMap<String, String>,
}

impl Default for SiteConfig {
    fn default() -> Self {
        let spec = SelectorSpec::default();
        Self {
            root: spec.site_root,
            page_marker: spec.page_marker,
            partitions: PartitionsConfig::Single,
            listing_url: spec.listing_url,
            listing_direct: false,
            page_size: spec.page_size,
            item_selector: spec.item_selector,
            item_attr: spec.item_attr,
            item_prefix: spec.item_prefix,
            detail_urls: spec.detail_urls,
            title_selectors: spec.title_selectors,
            tag_selector: spec.tag_selector,
            tag_separator: spec.tag_separator,
            artifact_selector: spec.artifact_selector,
            artifact_attrs: spec.artifact_attrs,
            max_artifacts: spec.max_artifacts,
            fields: spec.fields,
        }
    }
}

impl SiteConfig {
    fn to_spec(&self, short_name: &str) -> SelectorSpec {
        SelectorSpec {
            short_name: short_name.to_string(),
            site_root: self.root.clone(),
            page_marker: self.page_marker.clone(),
            partitions: match &self.partitions {
                PartitionsConfig::Single => Partitions::Single,
                PartitionsConfig::Years { first, last } => Partitions::Years {
                    first: *first,
                    last: *last,
                },
                PartitionsConfig::Named(names) => Partitions::Named(names.clone()),
            },
            listing_url: self.listing_url.clone(),
            listing_route: if self.listing_direct {
                ListingRoute::Direct
            } else {
                ListingRoute::Proxied
            },
            page_size: self.page_size,
            item_selector: self.item_selector.clone(),
            item_attr: self.item_attr.clone(),
            item_prefix: self.item_prefix.clone(),
            detail_urls: self.detail_urls.clone(),
            title_selectors: self.title_selectors.clone(),
            tag_selector: self.tag_selector.clone(),
            tag_separator: self.tag_separator.clone(),
            artifact_selector: self.artifact_selector.clone(),
            artifact_attrs: self.artifact_attrs.clone(),
            max_artifacts: self.max_artifacts,
            fields: self.fields.clone(),
        }
    }
}

impl FleetConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_ron(&text)
    }

    pub fn from_ron(text: &str) -> Result<Self, ConfigError> {
        Ok(ron::from_str(text)?)
    }

    pub fn fetch_settings(&self) -> FetchSettings {
        FetchSettings {
            connect_timeout: Duration::from_millis(self.fetch.connect_timeout_ms),
            header_timeout: Duration::from_millis(self.fetch.header_timeout_ms),
            request_timeout: Duration::from_millis(self.fetch.request_timeout_ms),
            max_bytes: self.fetch.max_bytes,
            ..FetchSettings::default()
        }
    }

    pub fn pool_settings(&self) -> PoolSettings {
        PoolSettings {
            listing_pages: self.pool.listing_pages.clone(),
            row_selector: self.pool.row_selector.clone(),
            anonymity_levels: self.pool.anonymity_levels.clone(),
            echo_url: self.pool.echo_url.clone(),
            retry_backoff: Duration::from_millis(self.pool.retry_backoff_ms),
        }
    }

    pub fn broker_settings(&self) -> BrokerSettings {
        BrokerSettings {
            workers: self.broker.workers,
            max_requests_per_proxy: self.broker.max_requests_per_proxy,
            request_delay: Duration::from_millis(self.broker.request_delay_ms),
            max_attempts: self.broker.max_attempts,
        }
    }

    pub fn scrape_settings(&self, provider: &str) -> ScrapeSettings {
        ScrapeSettings {
            detail_workers: self.scrape.detail_workers,
            listing_cache: self
                .scrape
                .listing_cache_dir
                .as_ref()
                .map(|dir| dir.join(format!("{provider}.listings"))),
        }
    }

    pub fn build_registry(&self) -> Result<ProviderRegistry, ConfigError> {
        let mut registry = ProviderRegistry::new();
        for provider in &self.providers {
            let entry = match &provider.site {
                Some(site) => {
                    let scraper = SelectorProvider::new(site.to_spec(&provider.name)).map_err(
                        |source| ConfigError::Provider {
                            name: provider.name.clone(),
                            source,
                        },
                    )?;
                    ProviderEntry::scraping(provider.pretty_name.clone(), Arc::new(scraper))
                }
                None => ProviderEntry::display_only(&provider.name, &provider.pretty_name),
            };
            registry.register(entry)?;
        }
        Ok(registry)
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
