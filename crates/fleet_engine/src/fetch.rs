use std::time::Duration;

use futures_util::StreamExt;
use reqwest::header::CONTENT_TYPE;

use crate::decode::decode_page;
use crate::{FailureKind, FetchError, Route};

#[derive(Debug, Clone)]
pub struct FetchSettings {
    pub connect_timeout: Duration,
    /// Bound on `send()`: connecting and waiting for the status line and
    /// headers both count against it, so it should not undercut
    /// `connect_timeout`.
    pub header_timeout: Duration,
    /// Overall give-up timeout for one call, body included.
    pub request_timeout: Duration,
    pub max_bytes: u64,
    pub user_agent: String,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            header_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(10),
            max_bytes: 8 * 1024 * 1024,
            user_agent: concat!("shotfleet/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// Performs a single GET and returns the decoded body.
#[async_trait::async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &str, route: Route<'_>) -> Result<String, FetchError>;
}

#[derive(Debug, Clone)]
pub struct ReqwestFetcher {
    settings: FetchSettings,
    direct: reqwest::Client,
}

impl ReqwestFetcher {
    pub fn new(settings: FetchSettings) -> Result<Self, FetchError> {
        let direct = build_client(&settings, None)?;
        Ok(Self { settings, direct })
    }
}

fn build_client(
    settings: &FetchSettings,
    proxy_url: Option<&str>,
) -> Result<reqwest::Client, FetchError> {
    let mut builder = reqwest::Client::builder()
        .connect_timeout(settings.connect_timeout)
        .timeout(settings.request_timeout)
        .user_agent(settings.user_agent.clone());

    builder = match proxy_url {
        Some(proxy_url) => {
            let proxy = reqwest::Proxy::all(proxy_url)
                .map_err(|err| FetchError::new(FailureKind::InvalidProxy, err.to_string()))?;
            builder.proxy(proxy)
        }
        None => builder.no_proxy(),
    };

    builder
        .build()
        .map_err(|err| FetchError::new(FailureKind::Network, err.to_string()))
}

#[async_trait::async_trait]
impl Fetcher for ReqwestFetcher {
    async fn fetch(&self, url: &str, route: Route<'_>) -> Result<String, FetchError> {
        let parsed = reqwest::Url::parse(url)
            .map_err(|err| FetchError::new(FailureKind::InvalidUrl, err.to_string()))?;

        // Each proxy gets its own client; the direct client is shared.
        let proxied;
        let client = match route {
            Route::Direct => &self.direct,
            Route::Via(endpoint) => {
                proxied = build_client(&self.settings, Some(&endpoint.url()))?;
                &proxied
            }
        };

        let response = tokio::time::timeout(self.settings.header_timeout, client.get(parsed).send())
            .await
            .map_err(|_| FetchError::new(FailureKind::Timeout, "response header timeout"))?
            .map_err(map_reqwest_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::new(
                FailureKind::HttpStatus(status.as_u16()),
                status.to_string(),
            ));
        }

        let max_bytes = self.settings.max_bytes;
        if let Some(content_len) = response.content_length() {
            if content_len > max_bytes {
                return Err(too_large(max_bytes, content_len));
            }
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.to_string());

        let mut bytes = Vec::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(map_reqwest_error)?;
            let next_len = bytes.len() as u64 + chunk.len() as u64;
            if next_len > max_bytes {
                return Err(too_large(max_bytes, next_len));
            }
            bytes.extend_from_slice(&chunk);
        }

        let page = decode_page(&bytes, content_type.as_deref());
        if page.had_errors {
            fleet_logging::fleet_trace!(
                "{} decoded as {} with replacement characters",
                url,
                page.encoding_label
            );
        }
        Ok(page.text)
    }
}

fn too_large(max_bytes: u64, actual: u64) -> FetchError {
    FetchError::new(
        FailureKind::TooLarge {
            max_bytes,
            actual: Some(actual),
        },
        "response too large",
    )
}

fn map_reqwest_error(err: reqwest::Error) -> FetchError {
    if err.is_timeout() {
        return FetchError::new(FailureKind::Timeout, err.to_string());
    }
    FetchError::new(FailureKind::Network, err.to_string())
}
