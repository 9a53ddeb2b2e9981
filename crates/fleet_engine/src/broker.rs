use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use fleet_logging::{fleet_debug, fleet_info, fleet_trace, fleet_warn};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::pool::{PoolError, PoolSettings, ProxyPool, ProxySupply};
use crate::validate::{screen_proxied_body, PageValidator};
use crate::{FetchError, Fetcher, Route, ValidatedProxy};

/// Attempts between "still retrying" warnings for a single request.
const RETRY_WARN_INTERVAL: u32 = 25;

#[derive(Debug, Clone)]
pub struct BrokerSettings {
    /// Concurrent proxies in use, one per worker.
    pub workers: usize,
    /// Requests served through one proxy before it is retired.
    pub max_requests_per_proxy: usize,
    pub request_delay: Duration,
    /// Optional per-request retry ceiling. `None` retries until a proxy succeeds.
    pub max_attempts: Option<u32>,
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            workers: 20,
            max_requests_per_proxy: 500,
            request_delay: Duration::from_millis(1),
            max_attempts: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BrokerError {
    #[error("fetch broker is shut down")]
    Closed,
    #[error("gave up after {attempts} attempts, last failure: {last}")]
    RetriesExhausted { attempts: u32, last: FetchError },
}

/// Page access used by the scrape orchestrator.
#[async_trait::async_trait]
pub trait PageSource: Send + Sync {
    /// Fetches through a rotating proxy; resolves once some proxy produced a
    /// body the validator accepts.
    async fn fetch(
        &self,
        url: &str,
        validator: Arc<dyn PageValidator>,
    ) -> Result<String, BrokerError>;

    /// Fetches without a proxy, for pages too large to route through one.
    async fn fetch_direct(&self, url: &str) -> Result<String, FetchError>;

    /// Stops all background work. Pending requests resolve with `Closed`.
    async fn dispose(&self);
}

struct PageRequest {
    url: String,
    validator: Arc<dyn PageValidator>,
    attempts: u32,
    reply: oneshot::Sender<Result<String, BrokerError>>,
}

impl PageRequest {
    /// Consumes the request, so a reply is delivered at most once.
    fn resolve(self, result: Result<String, BrokerError>) {
        // The caller may have stopped waiting; nothing to deliver to then.
        let _ = self.reply.send(result);
    }
}

struct Shared {
    fetcher: Arc<dyn Fetcher>,
    supply: ProxySupply,
    settings: BrokerSettings,
    requests_tx: mpsc::UnboundedSender<PageRequest>,
    requests_rx: Mutex<mpsc::UnboundedReceiver<PageRequest>>,
    closing: CancellationToken,
}

/// Serves page requests through validated proxies with usage-capped rotation.
///
/// Each worker holds one proxy at a time. A proxy is retired after any failure
/// or after `max_requests_per_proxy` successes, and is never reused.
pub struct FetchBroker {
    shared: Arc<Shared>,
    workers: StdMutex<Vec<JoinHandle<()>>>,
    pool: StdMutex<Option<ProxyPool>>,
}

impl FetchBroker {
    /// Starts a proxy pool and the broker workers feeding from it.
    pub fn launch(
        fetcher: Arc<dyn Fetcher>,
        pool_settings: PoolSettings,
        settings: BrokerSettings,
    ) -> Result<Self, PoolError> {
        let (pool, supply) = ProxyPool::start(fetcher.clone(), pool_settings)?;
        Ok(Self::spawn(fetcher, supply, settings, Some(pool)))
    }

    fn spawn(
        fetcher: Arc<dyn Fetcher>,
        supply: ProxySupply,
        settings: BrokerSettings,
        pool: Option<ProxyPool>,
    ) -> Self {
        let (requests_tx, requests_rx) = mpsc::unbounded_channel();
        let worker_count = settings.workers.max(1);
        let shared = Arc::new(Shared {
            fetcher,
            supply,
            settings,
            requests_tx,
            requests_rx: Mutex::new(requests_rx),
            closing: CancellationToken::new(),
        });

        let workers = (0..worker_count)
            .map(|id| tokio::spawn(run_worker(id, shared.clone())))
            .collect();

        Self {
            shared,
            workers: StdMutex::new(workers),
            pool: StdMutex::new(pool),
        }
    }

    /// Enqueues a request and waits for its single reply.
    pub async fn fetch(
        &self,
        url: &str,
        validator: Arc<dyn PageValidator>,
    ) -> Result<String, BrokerError> {
        if self.shared.closing.is_cancelled() {
            return Err(BrokerError::Closed);
        }
        let (reply, result) = oneshot::channel();
        let request = PageRequest {
            url: url.to_string(),
            validator,
            attempts: 0,
            reply,
        };
        if self.shared.requests_tx.send(request).is_err() {
            return Err(BrokerError::Closed);
        }
        result.await.unwrap_or(Err(BrokerError::Closed))
    }

    /// Broadcasts shutdown, waits for every worker, then fails whatever is
    /// still queued. Calling it again is a no-op.
    pub async fn dispose(&self) {
        fleet_info!("[PROXY] shutting down...");
        self.shared.closing.cancel();

        let pool = self.pool.lock().ok().and_then(|mut slot| slot.take());
        if let Some(pool) = pool.as_ref() {
            pool.close();
        }

        let workers: Vec<_> = match self.workers.lock() {
            Ok(mut workers) => workers.drain(..).collect(),
            Err(_) => Vec::new(),
        };
        for worker in workers {
            if let Err(err) = worker.await {
                fleet_warn!("[PROXY] worker task failed: {}", err);
            }
        }

        if let Some(pool) = pool {
            pool.shutdown().await;
        }

        let mut requests = self.shared.requests_rx.lock().await;
        requests.close();
        let mut failed = 0usize;
        while let Ok(request) = requests.try_recv() {
            request.resolve(Err(BrokerError::Closed));
            failed += 1;
        }
        if failed > 0 {
            fleet_debug!("[PROXY] {} queued requests closed", failed);
        }
        fleet_info!("[PROXY] shutdown complete!");
    }
}

#[async_trait::async_trait]
impl PageSource for FetchBroker {
    async fn fetch(
        &self,
        url: &str,
        validator: Arc<dyn PageValidator>,
    ) -> Result<String, BrokerError> {
        FetchBroker::fetch(self, url, validator).await
    }

    async fn fetch_direct(&self, url: &str) -> Result<String, FetchError> {
        self.shared.fetcher.fetch(url, Route::Direct).await
    }

    async fn dispose(&self) {
        FetchBroker::dispose(self).await
    }
}

enum ProxyOutcome {
    /// The proxy is done (failure or cap reached); acquire another.
    Retired,
    /// The broker is closing or the request queue is gone.
    Stop,
}

async fn run_worker(id: usize, shared: Arc<Shared>) {
    loop {
        let proxy = tokio::select! {
            biased;
            _ = shared.closing.cancelled() => break,
            proxy = shared.supply.acquire() => match proxy {
                Some(proxy) => proxy,
                None => {
                    fleet_debug!("[PROXY] worker {} sees no more proxies", id);
                    break;
                }
            },
        };
        match serve_through(&shared, &proxy).await {
            ProxyOutcome::Retired => continue,
            ProxyOutcome::Stop => break,
        }
    }
    fleet_debug!("[PROXY] worker {} shut down!", id);
}

async fn serve_through(shared: &Shared, proxy: &ValidatedProxy) -> ProxyOutcome {
    for _ in 0..shared.settings.max_requests_per_proxy {
        let request = tokio::select! {
            biased;
            _ = shared.closing.cancelled() => return ProxyOutcome::Stop,
            request = next_request(shared) => match request {
                Some(request) => request,
                None => return ProxyOutcome::Stop,
            },
        };

        let fetched = shared
            .fetcher
            .fetch(&request.url, Route::Via(proxy.endpoint()))
            .await
            .and_then(|body| screen_proxied_body(body, request.validator.as_ref()));

        match fetched {
            Ok(body) => {
                request.resolve(Ok(body));
                tokio::time::sleep(shared.settings.request_delay).await;
            }
            Err(err) => {
                fleet_trace!(
                    "[PROXY {}] render failed ({}), switching...",
                    proxy.name(),
                    err
                );
                requeue(shared, request, err);
                return ProxyOutcome::Retired;
            }
        }
    }
    fleet_trace!("[PROXY {}] render limit exceeded, switching...", proxy.name());
    ProxyOutcome::Retired
}

async fn next_request(shared: &Shared) -> Option<PageRequest> {
    shared.requests_rx.lock().await.recv().await
}

/// Puts a failed request back on the shared queue for another proxy.
fn requeue(shared: &Shared, mut request: PageRequest, err: FetchError) {
    request.attempts += 1;
    if let Some(max) = shared.settings.max_attempts {
        if request.attempts >= max {
            fleet_warn!("[PROXY] giving up on {} after {} attempts", request.url, request.attempts);
            let attempts = request.attempts;
            request.resolve(Err(BrokerError::RetriesExhausted {
                attempts,
                last: err,
            }));
            return;
        }
    }
    if request.attempts % RETRY_WARN_INTERVAL == 0 {
        fleet_warn!(
            "[PROXY] {} still failing after {} attempts ({})",
            request.url,
            request.attempts,
            err
        );
    }
    if let Err(mpsc::error::SendError(request)) = shared.requests_tx.send(request) {
        request.resolve(Err(BrokerError::Closed));
    }
}
