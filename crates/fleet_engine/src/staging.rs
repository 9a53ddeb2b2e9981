use std::sync::Arc;

use fleet_logging::{fleet_debug, fleet_info};

use crate::store::{RecordStore, StoreError};
use crate::StagingRecord;

#[derive(Debug, thiserror::Error)]
pub enum CommitError {
    /// Nothing publishable was staged; production keeps its previous snapshot.
    #[error("no publishable records among {staged} staged")]
    NothingToPublish { staged: usize },
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitReport {
    pub published: usize,
    /// Staged records without artifacts, silently left out.
    pub dropped: usize,
}

/// Isolates an in-progress crawl from the live production view.
#[derive(Clone)]
pub struct StagingCommitter {
    store: Arc<dyn RecordStore>,
}

impl StagingCommitter {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }

    /// Clears leftovers of a previous, possibly crashed, run.
    pub fn begin_run(&self) -> Result<(), StoreError> {
        self.store.clear_staging()
    }

    pub fn stage(&self, record: &StagingRecord) -> Result<(), StoreError> {
        self.store.insert_staging(record)
    }

    pub fn staged_count(&self) -> Result<usize, StoreError> {
        self.store.staging_count()
    }

    /// Publishes every staged record with at least one artifact, replacing
    /// the previous production snapshot, then drops staging.
    pub fn commit(&self) -> Result<CommitReport, CommitError> {
        let staged = self.store.staging_records()?;
        let total = staged.len();
        let publishable: Vec<StagingRecord> = staged
            .into_iter()
            .filter(StagingRecord::is_publishable)
            .collect();
        let report = CommitReport {
            published: publishable.len(),
            dropped: total - publishable.len(),
        };

        if publishable.is_empty() {
            self.store.clear_staging()?;
            return Err(CommitError::NothingToPublish { staged: total });
        }

        self.store.replace_production(publishable)?;
        self.store.clear_staging()?;
        fleet_info!(
            "published {} records ({} without artifacts dropped)",
            report.published,
            report.dropped
        );
        Ok(report)
    }

    /// Drops staging after an abort or failure; production is untouched.
    pub fn discard(&self) -> Result<(), StoreError> {
        fleet_debug!("discarding staged records");
        self.store.clear_staging()
    }
}
