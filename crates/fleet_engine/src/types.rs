use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A proxy row parsed from a public proxy-list page. Not yet trusted.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProxyCandidate {
    pub address: String,
    pub port: u16,
}

impl ProxyCandidate {
    pub fn new(address: impl Into<String>, port: u16) -> Self {
        Self {
            address: address.into(),
            port,
        }
    }

    /// `address:port`, used in logs.
    pub fn name(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.name())
    }
}

/// A candidate that routed an echo request and saw its own address echoed
/// back. Only the proxy pool can mint these.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedProxy {
    endpoint: ProxyCandidate,
}

impl ValidatedProxy {
    pub(crate) fn new(endpoint: ProxyCandidate) -> Self {
        Self { endpoint }
    }

    pub fn endpoint(&self) -> &ProxyCandidate {
        &self.endpoint
    }

    pub fn name(&self) -> String {
        self.endpoint.name()
    }
}

/// How a page request reaches the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route<'a> {
    Direct,
    Via(&'a ProxyCandidate),
}

/// A scraped entity. Staged during a run and promoted verbatim to production.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct StagingRecord {
    /// Identity of the listing item this record was scraped from.
    pub key: String,
    pub title: String,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Artifact URLs (screenshots). Records without any are never published.
    #[serde(default)]
    pub artifacts: Vec<String>,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

impl StagingRecord {
    pub fn is_publishable(&self) -> bool {
        !self.artifacts.is_empty()
    }
}

pub type ProductionRecord = StagingRecord;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct FetchError {
    pub kind: FailureKind,
    pub message: String,
}

impl FetchError {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureKind {
    InvalidUrl,
    InvalidProxy,
    HttpStatus(u16),
    Timeout,
    TooLarge { max_bytes: u64, actual: Option<u64> },
    /// A web proxy answered with its own "user limit" page.
    ProxyUserLimit,
    /// The page validator rejected the body.
    Rejected,
    Network,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::InvalidUrl => write!(f, "invalid url"),
            FailureKind::InvalidProxy => write!(f, "invalid proxy"),
            FailureKind::HttpStatus(code) => write!(f, "http status {code}"),
            FailureKind::Timeout => write!(f, "timeout"),
            FailureKind::TooLarge { max_bytes, actual } => {
                write!(f, "response too large (max {max_bytes}, actual {actual:?})")
            }
            FailureKind::ProxyUserLimit => write!(f, "web proxy user limit exceeded"),
            FailureKind::Rejected => write!(f, "rejected by validator"),
            FailureKind::Network => write!(f, "network error"),
        }
    }
}
