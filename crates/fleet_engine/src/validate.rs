use crate::{FailureKind, FetchError};

/// Signature of the page a saturated web proxy serves instead of the target.
/// The misspelling is what the proxies actually send.
const PROXY_USER_LIMIT_SIGNATURE: &str = "<title>Access Denined</title>";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct ValidationError(pub String);

/// Confirms a fetched body is the page the caller expected rather than a proxy
/// error page or an access-denied interstitial.
pub trait PageValidator: Send + Sync {
    fn validate(&self, body: &str) -> Result<(), ValidationError>;
}

impl<F> PageValidator for F
where
    F: Fn(&str) -> Result<(), ValidationError> + Send + Sync,
{
    fn validate(&self, body: &str) -> Result<(), ValidationError> {
        self(body)
    }
}

/// Accepts any body.
#[derive(Debug, Default, Clone, Copy)]
pub struct AcceptAll;

impl PageValidator for AcceptAll {
    fn validate(&self, _body: &str) -> Result<(), ValidationError> {
        Ok(())
    }
}

/// Accepts bodies containing a fixed marker string.
#[derive(Debug, Clone)]
pub struct RequireMarker {
    marker: String,
    reason: String,
}

impl RequireMarker {
    pub fn new(marker: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            marker: marker.into(),
            reason: reason.into(),
        }
    }

    /// Marker check used for site pages: a missing marker usually means the
    /// site blocked the proxy.
    pub fn site_page(marker: impl Into<String>) -> Self {
        Self::new(marker, "looks like the site must have been blocked")
    }
}

impl PageValidator for RequireMarker {
    fn validate(&self, body: &str) -> Result<(), ValidationError> {
        if body.contains(&self.marker) {
            Ok(())
        } else {
            Err(ValidationError(self.reason.clone()))
        }
    }
}

/// Screens a body fetched through a proxy: user-limit pages fail first, then
/// the caller's validator runs.
pub fn screen_proxied_body(
    body: String,
    validator: &dyn PageValidator,
) -> Result<String, FetchError> {
    if body.contains(PROXY_USER_LIMIT_SIGNATURE) {
        return Err(FetchError::new(
            FailureKind::ProxyUserLimit,
            "web proxy user limit exceeded",
        ));
    }
    validator
        .validate(&body)
        .map_err(|err| FetchError::new(FailureKind::Rejected, err.0))?;
    Ok(body)
}
