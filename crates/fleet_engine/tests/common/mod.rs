#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::error::Error;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, Once};
use std::time::Duration;

use fleet_engine::{
    FailureKind, FetchError, Fetcher, PoolSettings, Route, ScrapeError, ScraperContext,
};

static INIT: Once = Once::new();

pub fn init_logging() {
    INIT.call_once(fleet_logging::initialize_for_tests);
}

pub const LIST_URL: &str = "http://lists.test/proxies";
pub const ECHO_URL: &str = "http://echo.test/";

/// One fetch seen by [`FakeWeb`]: the url and the proxy address, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub url: String,
    pub proxy: Option<String>,
}

/// In-memory web: a proxy list that yields fresh addresses on every load, an
/// echo service, and a fixed set of site pages.
#[derive(Default)]
pub struct FakeWeb {
    rows_per_list: usize,
    list_loads: AtomicUsize,
    list_failures: AtomicUsize,
    pages: Mutex<HashMap<String, String>>,
    /// Proxies that pass neither validation nor anything else.
    liars: Mutex<HashSet<String>>,
    /// Per-proxy override for site pages.
    proxy_overrides: Mutex<HashMap<String, Result<String, FetchError>>>,
    calls: Mutex<Vec<Call>>,
}

impl FakeWeb {
    pub fn new(rows_per_list: usize) -> Self {
        Self {
            rows_per_list,
            ..Self::default()
        }
    }

    pub fn with_page(self, url: &str, body: &str) -> Self {
        self.pages
            .lock()
            .unwrap()
            .insert(url.to_string(), body.to_string());
        self
    }

    pub fn with_liar(self, address: &str) -> Self {
        self.liars.lock().unwrap().insert(address.to_string());
        self
    }

    pub fn with_proxy_override(self, address: &str, result: Result<String, FetchError>) -> Self {
        self.proxy_overrides
            .lock()
            .unwrap()
            .insert(address.to_string(), result);
        self
    }

    /// The first `count` list loads fail with a network error.
    pub fn with_list_failures(self, count: usize) -> Self {
        self.list_failures.store(count, Ordering::SeqCst);
        self
    }

    pub fn list_loads(&self) -> usize {
        self.list_loads.load(Ordering::SeqCst)
    }

    /// Site calls only; proxy-list and echo traffic is left out.
    pub fn site_calls(&self) -> Vec<Call> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|call| call.url != LIST_URL && call.url != ECHO_URL)
            .cloned()
            .collect()
    }

    fn proxy_list(&self) -> Result<String, FetchError> {
        let failures = self.list_failures.load(Ordering::SeqCst);
        if failures > 0 {
            self.list_failures.store(failures - 1, Ordering::SeqCst);
            return Err(FetchError::new(FailureKind::Network, "list unavailable"));
        }
        let pass = self.list_loads.fetch_add(1, Ordering::SeqCst);
        let mut html = String::from(
            "<html><body><table id=\"proxylisttable\"><tbody>\
             <tr><th>IP</th><th>Port</th><th>Code</th><th>Country</th><th>Anonymity</th></tr>",
        );
        for row in 1..=self.rows_per_list {
            html.push_str(&format!(
                "<tr><td>10.{}.{}.{}</td><td>8080</td><td>US</td><td>United States</td><td>elite proxy</td></tr>",
                pass / 256,
                pass % 256,
                row
            ));
        }
        html.push_str("</tbody></table></body></html>");
        Ok(html)
    }
}

#[async_trait::async_trait]
impl Fetcher for FakeWeb {
    async fn fetch(&self, url: &str, route: Route<'_>) -> Result<String, FetchError> {
        let proxy = match route {
            Route::Direct => None,
            Route::Via(candidate) => Some(candidate.address.clone()),
        };
        self.calls.lock().unwrap().push(Call {
            url: url.to_string(),
            proxy: proxy.clone(),
        });
        tokio::task::yield_now().await;

        if url == LIST_URL {
            return self.proxy_list();
        }
        if let Some(address) = &proxy {
            if self.liars.lock().unwrap().contains(address) {
                return Ok("Current IP Address: 192.0.2.1".to_string());
            }
            if url == ECHO_URL {
                return Ok(format!("Current IP Address: {address}"));
            }
            if let Some(result) = self.proxy_overrides.lock().unwrap().get(address) {
                return result.clone();
            }
        }
        self.pages
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .ok_or_else(|| FetchError::new(FailureKind::HttpStatus(404), "404 Not Found"))
    }
}

pub fn pool_settings() -> PoolSettings {
    PoolSettings {
        listing_pages: vec![LIST_URL.to_string()],
        echo_url: ECHO_URL.to_string(),
        retry_backoff: Duration::from_millis(10),
        ..PoolSettings::default()
    }
}

/// Outcome passed to `done`, reduced to something comparable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Finished {
    Ok,
    Aborted,
    Failed(String),
}

#[derive(Default)]
pub struct RecordingContext {
    logs: Mutex<Vec<String>>,
    errors: Mutex<Vec<String>>,
    done: Mutex<Vec<Finished>>,
}

impl RecordingContext {
    pub fn logs(&self) -> Vec<String> {
        self.logs.lock().unwrap().clone()
    }

    pub fn errors(&self) -> Vec<String> {
        self.errors.lock().unwrap().clone()
    }

    pub fn finished(&self) -> Vec<Finished> {
        self.done.lock().unwrap().clone()
    }
}

impl ScraperContext for RecordingContext {
    fn log(&self, message: &str) {
        self.logs.lock().unwrap().push(message.to_string());
    }

    fn error(&self, context: &str, error: &dyn Error) {
        self.errors
            .lock()
            .unwrap()
            .push(format!("{context}: {error}"));
    }

    fn done(&self, result: Result<(), ScrapeError>) {
        let finished = match result {
            Ok(()) => Finished::Ok,
            Err(ScrapeError::Aborted) => Finished::Aborted,
            Err(err) => Finished::Failed(err.to_string()),
        };
        self.done.lock().unwrap().push(finished);
    }
}
