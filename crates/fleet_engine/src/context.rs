use std::error::Error as StdError;

use crate::orchestrator::ScrapeError;

/// Collaborator supplied by the embedding system for one run.
///
/// `log` and `error` are append-only trace channels. `done` is called exactly
/// once per started run, with `Err(ScrapeError::Aborted)` for an aborted run.
pub trait ScraperContext: Send + Sync {
    fn log(&self, message: &str);
    fn error(&self, context: &str, error: &dyn StdError);
    fn done(&self, result: Result<(), ScrapeError>);
}
