//! Fleet engine: proxy pool, fetch broker, staging store and the scrape
//! orchestrator that ties them together.
mod broker;
mod context;
mod decode;
mod fetch;
mod orchestrator;
mod persist;
mod pool;
mod provider;
mod proxy_list;
mod selector_provider;
mod staging;
mod store;
mod types;
mod validate;

pub use broker::{BrokerError, BrokerSettings, FetchBroker, PageSource};
pub use context::ScraperContext;
pub use decode::{decode_page, DecodedPage};
pub use fetch::{FetchSettings, Fetcher, ReqwestFetcher};
pub use orchestrator::{
    Phase, Progress, ScrapeError, ScrapeHandle, ScrapeOrchestrator, ScrapeSettings,
};
pub use persist::{ensure_data_dir, AtomicFileWriter, PersistError};
pub use pool::{PoolError, PoolSettings, ProxyPool, ProxySupply};
pub use provider::{
    ExtractError, ListingItem, ListingPage, ListingRoute, ProviderEntry, ProviderRegistry,
    RegistryError, ScrapeProvider,
};
pub use proxy_list::{ProxyListParser, SelectorError, DEFAULT_ANONYMITY_LEVELS};
pub use selector_provider::{Partitions, SelectorProvider, SelectorSpec, SpecError};
pub use staging::{CommitError, CommitReport, StagingCommitter};
pub use store::{JsonFileRecordStore, MemoryRecordStore, RecordStore, StoreError};
pub use types::{
    FailureKind, FetchError, ProductionRecord, ProxyCandidate, Route, StagingRecord,
    ValidatedProxy,
};
pub use validate::{
    screen_proxied_body, AcceptAll, PageValidator, RequireMarker, ValidationError,
};
