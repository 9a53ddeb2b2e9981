use std::sync::Arc;
use std::time::Duration;

use fleet_logging::{fleet_debug, fleet_info, fleet_trace, fleet_warn};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::proxy_list::{ProxyListParser, SelectorError, DEFAULT_ANONYMITY_LEVELS};
use crate::validate::{screen_proxied_body, RequireMarker};
use crate::{FetchError, Fetcher, ProxyCandidate, Route, ValidatedProxy};

#[derive(Debug, Clone)]
pub struct PoolSettings {
    /// Public proxy-list pages, visited round-robin.
    pub listing_pages: Vec<String>,
    pub row_selector: String,
    pub anonymity_levels: Vec<String>,
    /// Echo service that returns the caller's apparent address.
    pub echo_url: String,
    /// Delay before retrying a listing page that failed to load or parse.
    pub retry_backoff: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            listing_pages: vec![
                "http://www.us-proxy.org/".to_string(),
                "http://free-proxy-list.net/anonymous-proxy.html".to_string(),
            ],
            row_selector: "#proxylisttable tr".to_string(),
            anonymity_levels: DEFAULT_ANONYMITY_LEVELS
                .iter()
                .map(|level| level.to_string())
                .collect(),
            echo_url: "http://checkip.dyndns.org/".to_string(),
            retry_backoff: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("no proxy listing pages configured")]
    NoListingPages,
    #[error(transparent)]
    Selector(#[from] SelectorError),
}

/// Consumer side of the pool's output channel, shared by broker workers.
#[derive(Debug, Clone)]
pub struct ProxySupply {
    rx: Arc<Mutex<mpsc::Receiver<ValidatedProxy>>>,
}

impl ProxySupply {
    /// Waits for the next validated proxy. `None` once the pool has shut down.
    pub async fn acquire(&self) -> Option<ValidatedProxy> {
        self.rx.lock().await.recv().await
    }
}

/// Background producer of validated proxies.
///
/// The output channel holds a single proxy, so discovery only runs as fast as
/// the broker consumes. A pool cannot be restarted once closed.
#[derive(Debug)]
pub struct ProxyPool {
    closing: CancellationToken,
    producer: JoinHandle<()>,
}

impl ProxyPool {
    /// Launches the producer task. Must be called within a tokio runtime.
    pub fn start(
        fetcher: Arc<dyn Fetcher>,
        settings: PoolSettings,
    ) -> Result<(ProxyPool, ProxySupply), PoolError> {
        if settings.listing_pages.is_empty() {
            return Err(PoolError::NoListingPages);
        }
        let parser = ProxyListParser::new(&settings.row_selector, &settings.anonymity_levels)?;
        let (tx, rx) = mpsc::channel(1);
        let closing = CancellationToken::new();

        let producer = Producer {
            fetcher,
            settings,
            parser,
            next_page: 0,
            closing: closing.clone(),
        };
        let producer = tokio::spawn(producer.run(tx));

        Ok((
            ProxyPool { closing, producer },
            ProxySupply {
                rx: Arc::new(Mutex::new(rx)),
            },
        ))
    }

    /// Signals the producer to stop. Observed between candidates and while
    /// waiting on the output channel or a listing backoff.
    pub fn close(&self) {
        self.closing.cancel();
    }

    /// Closes the pool and waits for the producer to exit.
    pub async fn shutdown(self) {
        self.close();
        if let Err(err) = self.producer.await {
            fleet_warn!("[PROXY] producer task failed: {}", err);
        }
    }
}

struct Producer {
    fetcher: Arc<dyn Fetcher>,
    settings: PoolSettings,
    parser: ProxyListParser,
    next_page: usize,
    closing: CancellationToken,
}

impl Producer {
    async fn run(mut self, tx: mpsc::Sender<ValidatedProxy>) {
        'pages: while let Some(candidates) = self.next_candidates().await {
            fleet_debug!("[PROXY] proxy list loaded, {} candidates", candidates.len());
            for candidate in candidates {
                if self.closing.is_cancelled() {
                    break 'pages;
                }
                let proxy = match self.validate(&candidate).await {
                    Ok(proxy) => proxy,
                    Err(err) => {
                        fleet_trace!("[PROXY {}] failed: {}, skipping...", candidate.name(), err);
                        continue;
                    }
                };
                tokio::select! {
                    biased;
                    _ = self.closing.cancelled() => break 'pages,
                    sent = tx.send(proxy) => {
                        if sent.is_err() {
                            fleet_debug!("[PROXY] every consumer is gone");
                            break 'pages;
                        }
                        fleet_debug!("[PROXY {}] started!", candidate.name());
                    }
                }
            }
        }
        // Dropping `tx` closes the channel; waiting consumers see `None`.
        fleet_info!("[PROXY] producer shut down!");
    }

    /// Loads and parses the next listing page, retrying the same page after a
    /// fixed backoff until it yields candidates. `None` once closing.
    async fn next_candidates(&mut self) -> Option<Vec<ProxyCandidate>> {
        loop {
            if self.closing.is_cancelled() {
                return None;
            }
            let page = &self.settings.listing_pages[self.next_page];
            match self.fetcher.fetch(page, Route::Direct).await {
                Ok(html) => {
                    let candidates = self.parser.parse(&html);
                    self.next_page = (self.next_page + 1) % self.settings.listing_pages.len();
                    if !candidates.is_empty() {
                        return Some(candidates);
                    }
                    fleet_warn!("[PROXY] no usable rows on {}, retrying...", page);
                }
                Err(err) => {
                    fleet_warn!("[PROXY] failed list download {} ({}), retrying...", page, err);
                }
            }
            tokio::select! {
                biased;
                _ = self.closing.cancelled() => return None,
                _ = tokio::time::sleep(self.settings.retry_backoff) => {}
            }
        }
    }

    /// The echoed body must contain the candidate's own address, proving the
    /// request went through it.
    async fn validate(&self, candidate: &ProxyCandidate) -> Result<ValidatedProxy, FetchError> {
        let body = self
            .fetcher
            .fetch(&self.settings.echo_url, Route::Via(candidate))
            .await?;
        let echo_check = RequireMarker::new(candidate.address.clone(), "proxy didn't do its job");
        screen_proxied_body(body, &echo_check)?;
        Ok(ValidatedProxy::new(candidate.clone()))
    }
}
