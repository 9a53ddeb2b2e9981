use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use fleet_logging::{fleet_debug, fleet_info, fleet_warn};
use tokio::sync::{mpsc, watch, Mutex as AsyncMutex};
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;

use crate::broker::{BrokerError, PageSource};
use crate::context::ScraperContext;
use crate::provider::{ExtractError, ListingItem, ListingRoute, ScrapeProvider};
use crate::staging::{CommitError, StagingCommitter};
use crate::store::{RecordStore, StoreError};
use crate::validate::PageValidator;
use crate::FetchError;

/// Lifecycle of one scrape run.
///
/// `Idle -> ListingDiscovery -> DetailScraping -> Committing -> Done`, with
/// `Aborting` reachable from the two crawl phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    ListingDiscovery,
    DetailScraping,
    Committing,
    Aborting,
    Done,
}

impl Phase {
    pub fn label(self) -> &'static str {
        match self {
            Phase::Idle => "beginning scan",
            Phase::ListingDiscovery => "collecting listings",
            Phase::DetailScraping => "scanning",
            Phase::Committing => "committing changes",
            Phase::Aborting => "aborting",
            Phase::Done => "done",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub phase: Phase,
    /// Records written to staging so far.
    pub completed: usize,
    /// Distinct listing items discovered so far.
    pub total: usize,
}

#[derive(Debug, Clone)]
pub struct ScrapeSettings {
    /// Detail workers; far more than broker workers so the broker stays busy.
    pub detail_workers: usize,
    /// One identifier per line; replaces listing discovery when readable.
    pub listing_cache: Option<PathBuf>,
}

impl Default for ScrapeSettings {
    fn default() -> Self {
        Self {
            detail_workers: 30,
            listing_cache: None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ScrapeError {
    #[error("scrape operation aborted")]
    Aborted,
    #[error("page fetch failed: {0}")]
    Broker(#[from] BrokerError),
    #[error("direct fetch failed: {0}")]
    Fetch(#[from] FetchError),
    #[error("extraction failed for {key}: {source}")]
    Extract {
        key: String,
        #[source]
        source: ExtractError,
    },
    #[error("record store error: {0}")]
    Store(#[from] StoreError),
    #[error("commit failed: {0}")]
    Commit(#[from] CommitError),
    #[error("record store task failed: {0}")]
    StoreTask(#[from] JoinError),
}

impl ScrapeError {
    pub fn is_abort(&self) -> bool {
        matches!(self, ScrapeError::Aborted)
    }
}

/// Per-run shared state; the only state several workers mutate.
struct RunState {
    phase: Mutex<Phase>,
    cancel: CancellationToken,
    listings: Mutex<HashSet<ListingItem>>,
    staged: AtomicUsize,
}

impl RunState {
    fn new() -> Self {
        Self {
            phase: Mutex::new(Phase::Idle),
            cancel: CancellationToken::new(),
            listings: Mutex::new(HashSet::new()),
            staged: AtomicUsize::new(0),
        }
    }

    fn phase(&self) -> MutexGuard<'_, Phase> {
        self.phase.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn listings(&self) -> MutexGuard<'_, HashSet<ListingItem>> {
        self.listings.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Moves to the next crawl phase unless an abort got there first.
    fn advance(&self, next: Phase) -> bool {
        let mut phase = self.phase();
        if *phase == Phase::Aborting || self.cancel.is_cancelled() {
            return false;
        }
        *phase = next;
        true
    }

    /// Returns the items that were not known yet.
    fn insert_listings(&self, items: Vec<ListingItem>) -> Vec<ListingItem> {
        let mut listings = self.listings();
        items
            .into_iter()
            .filter(|item| listings.insert(item.clone()))
            .collect()
    }

    fn progress(&self) -> Progress {
        Progress {
            phase: *self.phase(),
            completed: self.staged.load(Ordering::SeqCst),
            total: self.listings().len(),
        }
    }
}

struct Run {
    provider: Arc<dyn ScrapeProvider>,
    pages: Arc<dyn PageSource>,
    committer: StagingCommitter,
    context: Arc<dyn ScraperContext>,
    settings: ScrapeSettings,
    validator: Arc<dyn PageValidator>,
    state: Arc<RunState>,
}

/// Drives one two-phase crawl: listing discovery, then detail scraping on a
/// bounded worker pool, then an all-or-nothing publish.
pub struct ScrapeOrchestrator {
    run: Run,
}

impl ScrapeOrchestrator {
    pub fn new(
        provider: Arc<dyn ScrapeProvider>,
        pages: Arc<dyn PageSource>,
        store: Arc<dyn RecordStore>,
        context: Arc<dyn ScraperContext>,
        settings: ScrapeSettings,
    ) -> Self {
        let validator = provider.page_validator();
        Self {
            run: Run {
                provider,
                pages,
                committer: StagingCommitter::new(store),
                context,
                settings,
                validator,
                state: Arc::new(RunState::new()),
            },
        }
    }

    /// Spawns the run on the current tokio runtime and returns immediately.
    pub fn start(self) -> ScrapeHandle {
        let state = self.run.state.clone();
        let context = self.run.context.clone();
        *state.phase() = Phase::ListingDiscovery;
        fleet_info!("starting scrape of {}", self.run.provider.short_name());

        let (finished_tx, finished) = watch::channel(false);
        let run = Arc::new(self.run);
        tokio::spawn(async move {
            run.execute().await;
            finished_tx.send_replace(true);
        });

        ScrapeHandle {
            state,
            context,
            finished,
        }
    }
}

/// Control surface of a started run.
#[derive(Clone)]
pub struct ScrapeHandle {
    state: Arc<RunState>,
    context: Arc<dyn ScraperContext>,
    finished: watch::Receiver<bool>,
}

impl ScrapeHandle {
    /// Requests cooperative cancellation. Repeated calls only log.
    pub fn abort(&self) {
        let mut phase = self.state.phase();
        match *phase {
            Phase::Aborting => {
                drop(phase);
                self.context.log("already aborting...");
                return;
            }
            Phase::Committing => {
                drop(phase);
                self.context.log("commit in progress, abort ignored");
                return;
            }
            Phase::Done => {
                drop(phase);
                self.context.log("scrape already finished");
                return;
            }
            Phase::Idle | Phase::ListingDiscovery | Phase::DetailScraping => {}
        }
        *phase = Phase::Aborting;
        drop(phase);

        self.state.cancel.cancel();
        fleet_info!("scrape abort requested");
        self.context.log("aborting...");
    }

    pub fn progress(&self) -> Progress {
        self.state.progress()
    }

    pub fn is_finished(&self) -> bool {
        *self.finished.borrow()
    }

    /// Resolves after the completion callback has fired.
    pub async fn wait(&self) {
        let mut finished = self.finished.clone();
        let _ = finished.wait_for(|done| *done).await;
    }
}

impl Run {
    async fn execute(self: Arc<Self>) {
        let result = self.drive().await;

        match &result {
            Ok(()) => self.context.log("scrape complete! shutting down..."),
            Err(err) => {
                if let Err(discard_err) = self.on_store(|committer| committer.discard()).await {
                    self.context.error("discard staging", &discard_err);
                }
                if err.is_abort() {
                    self.context.log("scrape aborted, staged records discarded");
                } else {
                    fleet_warn!("scrape of {} failed: {}", self.provider.short_name(), err);
                }
            }
        }

        self.pages.dispose().await;
        *self.state.phase() = Phase::Done;
        self.context.done(result);
    }

    async fn drive(self: &Arc<Self>) -> Result<(), ScrapeError> {
        self.on_store(|committer| committer.begin_run()).await?;

        self.context.log("collecting listings...");
        self.discover().await?;
        let total = self.state.listings().len();
        self.context.log(&format!("found {total} items!"));

        if !self.state.advance(Phase::DetailScraping) {
            return Err(ScrapeError::Aborted);
        }
        self.context.log("starting full scan...");
        self.scrape_details().await?;

        if !self.state.advance(Phase::Committing) {
            return Err(ScrapeError::Aborted);
        }
        self.context.log("committing changes...");
        let report = self.on_store(|committer| committer.commit()).await?;
        self.context.log(&format!(
            "published {} records ({} without artifacts dropped)",
            report.published, report.dropped
        ));
        Ok(())
    }

    async fn discover(self: &Arc<Self>) -> Result<(), ScrapeError> {
        if let Some(path) = &self.settings.listing_cache {
            match read_listing_cache(path) {
                Ok(items) => {
                    let added = self.state.insert_listings(items).len();
                    self.context
                        .log(&format!("loaded {added} listings from {}", path.display()));
                    return Ok(());
                }
                Err(err) if err.kind() == io::ErrorKind::NotFound => {
                    fleet_debug!("no listing cache at {}", path.display());
                }
                Err(err) => self.context.error("listing cache", &err),
            }
        }

        let mut units = JoinSet::new();
        for partition in self.provider.discovery_partitions() {
            let run = self.clone();
            units.spawn(async move {
                let result = run.discover_partition(&partition).await;
                (partition, result)
            });
        }

        // A failed partition is reported but does not stop the others.
        while let Some(joined) = units.join_next().await {
            match joined {
                Ok((_, Ok(found))) => fleet_debug!("listing partition yielded {} links", found),
                Ok((_, Err(ScrapeError::Aborted))) => {}
                Ok((partition, Err(err))) => {
                    fleet_warn!("listing partition {:?} failed: {}", partition, err);
                    self.context.error(&format!("listing {partition}"), &err);
                }
                Err(err) => self.context.error("listing discovery", &err),
            }
        }

        if self.state.cancel.is_cancelled() {
            return Err(ScrapeError::Aborted);
        }
        Ok(())
    }

    /// Walks one partition page by page while pages come back full.
    async fn discover_partition(&self, partition: &str) -> Result<usize, ScrapeError> {
        let mut found = 0;
        let mut page = 0;
        loop {
            if self.state.cancel.is_cancelled() {
                return Err(ScrapeError::Aborted);
            }
            let url = self.provider.listing_url(partition, page);
            let body = match self.provider.listing_route() {
                ListingRoute::Proxied => self.fetch_proxied(&url).await?,
                ListingRoute::Direct => tokio::select! {
                    biased;
                    _ = self.state.cancel.cancelled() => return Err(ScrapeError::Aborted),
                    body = self.pages.fetch_direct(&url) => body?,
                },
            };
            let listing = self.provider.parse_listing(&body);
            found += listing.items.len();
            for item in self.state.insert_listings(listing.items) {
                self.context.log(&format!("found '{}'", item.key));
            }
            if !listing.full_page {
                return Ok(found);
            }
            page += 1;
        }
    }

    async fn scrape_details(self: &Arc<Self>) -> Result<(), ScrapeError> {
        let items: Vec<ListingItem> = self.state.listings().iter().cloned().collect();
        let (tx, rx) = mpsc::channel::<ListingItem>(1);
        let rx = Arc::new(AsyncMutex::new(rx));

        let mut workers = JoinSet::new();
        for id in 0..self.settings.detail_workers.max(1) {
            let run = self.clone();
            let rx = rx.clone();
            workers.spawn(async move { run.detail_worker(id, rx).await });
        }

        // Remaining items are dropped rather than waited on once cancelled.
        for item in items {
            tokio::select! {
                biased;
                _ = self.state.cancel.cancelled() => break,
                sent = tx.send(item) => {
                    if sent.is_err() {
                        break;
                    }
                }
            }
        }
        drop(tx);

        while let Some(joined) = workers.join_next().await {
            if let Err(err) = joined {
                self.context.error("detail worker", &err);
            }
        }

        if self.state.cancel.is_cancelled() {
            return Err(ScrapeError::Aborted);
        }
        Ok(())
    }

    async fn detail_worker(&self, id: usize, items: Arc<AsyncMutex<mpsc::Receiver<ListingItem>>>) {
        loop {
            let item = tokio::select! {
                biased;
                _ = self.state.cancel.cancelled() => break,
                item = async { items.lock().await.recv().await } => match item {
                    Some(item) => item,
                    None => break,
                },
            };
            match self.scrape_item(&item).await {
                Ok(()) => {}
                Err(ScrapeError::Aborted) => break,
                Err(err) => {
                    fleet_warn!("item {} skipped: {}", item.key, err);
                    self.context.error(&item.key, &err);
                }
            }
        }
        fleet_debug!("detail worker {} stopped", id);
    }

    async fn scrape_item(&self, item: &ListingItem) -> Result<(), ScrapeError> {
        self.context.log(&format!("starting item: {}...", item.key));

        let mut pages = Vec::new();
        for url in self.provider.detail_urls(item) {
            pages.push(self.fetch_proxied(&url).await?);
        }
        let record = self
            .provider
            .extract(item, &pages)
            .map_err(|source| ScrapeError::Extract {
                key: item.key.clone(),
                source,
            })?;

        if self.state.cancel.is_cancelled() {
            return Err(ScrapeError::Aborted);
        }
        let completed = format!(
            "completed item: {} ({} artifacts)",
            record.title,
            record.artifacts.len()
        );
        self.on_store(move |committer| committer.stage(&record)).await?;
        self.state.staged.fetch_add(1, Ordering::SeqCst);
        self.context.log(&completed);
        Ok(())
    }

    /// Store calls may block on disk, so they run on the blocking pool.
    async fn on_store<T, E, F>(&self, op: F) -> Result<T, ScrapeError>
    where
        F: FnOnce(StagingCommitter) -> Result<T, E> + Send + 'static,
        T: Send + 'static,
        E: Send + 'static,
        ScrapeError: From<E>,
    {
        let committer = self.committer.clone();
        Ok(tokio::task::spawn_blocking(move || op(committer)).await??)
    }

    /// Waits for the broker or for cancellation, whichever comes first. The
    /// broker may still finish the request; its reply is then dropped.
    async fn fetch_proxied(&self, url: &str) -> Result<String, ScrapeError> {
        tokio::select! {
            biased;
            _ = self.state.cancel.cancelled() => Err(ScrapeError::Aborted),
            body = self.pages.fetch(url, self.validator.clone()) => Ok(body?),
        }
    }
}

fn read_listing_cache(path: &Path) -> io::Result<Vec<ListingItem>> {
    Ok(fs::read_to_string(path)?
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(ListingItem::new)
        .collect())
}
