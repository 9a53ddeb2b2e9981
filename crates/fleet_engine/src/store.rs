use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::persist::{ensure_data_dir, AtomicFileWriter, PersistError};
use crate::{ProductionRecord, StagingRecord};

const STAGING_FILENAME: &str = "staging.jsonl";
const PRODUCTION_FILENAME: &str = "production.json";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("record encoding error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error(transparent)]
    Persist(#[from] PersistError),
    #[error("record store lock poisoned")]
    Poisoned,
}

impl<T> From<PoisonError<T>> for StoreError {
    fn from(_: PoisonError<T>) -> Self {
        StoreError::Poisoned
    }
}

/// A staging/production collection pair.
///
/// Staging is written concurrently by scrape workers; production is only
/// ever replaced wholesale.
pub trait RecordStore: Send + Sync {
    fn clear_staging(&self) -> Result<(), StoreError>;
    fn insert_staging(&self, record: &StagingRecord) -> Result<(), StoreError>;
    fn staging_count(&self) -> Result<usize, StoreError>;
    fn staging_records(&self) -> Result<Vec<StagingRecord>, StoreError>;
    /// Swaps in a new production snapshot in one step.
    fn replace_production(&self, records: Vec<ProductionRecord>) -> Result<(), StoreError>;
    fn production_records(&self) -> Result<Vec<ProductionRecord>, StoreError>;
}

/// In-process store; production is swapped by replacing the vector.
#[derive(Debug, Default)]
pub struct MemoryRecordStore {
    staging: Mutex<Vec<StagingRecord>>,
    production: Mutex<Vec<ProductionRecord>>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_production(records: Vec<ProductionRecord>) -> Self {
        Self {
            staging: Mutex::default(),
            production: Mutex::new(records),
        }
    }
}

impl RecordStore for MemoryRecordStore {
    fn clear_staging(&self) -> Result<(), StoreError> {
        self.staging.lock()?.clear();
        Ok(())
    }

    fn insert_staging(&self, record: &StagingRecord) -> Result<(), StoreError> {
        self.staging.lock()?.push(record.clone());
        Ok(())
    }

    fn staging_count(&self) -> Result<usize, StoreError> {
        Ok(self.staging.lock()?.len())
    }

    fn staging_records(&self) -> Result<Vec<StagingRecord>, StoreError> {
        Ok(self.staging.lock()?.clone())
    }

    fn replace_production(&self, records: Vec<ProductionRecord>) -> Result<(), StoreError> {
        *self.production.lock()? = records;
        Ok(())
    }

    fn production_records(&self) -> Result<Vec<ProductionRecord>, StoreError> {
        Ok(self.production.lock()?.clone())
    }
}

/// File-backed store under one data directory.
///
/// Staging is an append-only JSON-lines file; production is a single JSON
/// document replaced through [`AtomicFileWriter`].
#[derive(Debug)]
pub struct JsonFileRecordStore {
    dir: PathBuf,
    writer: AtomicFileWriter,
    /// Guards appends to the staging file and tracks its line count.
    staging: Mutex<usize>,
}

impl JsonFileRecordStore {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        ensure_data_dir(&dir)?;
        let existing = match File::open(dir.join(STAGING_FILENAME)) {
            Ok(file) => BufReader::new(file)
                .lines()
                .filter(|line| line.as_ref().map(|l| !l.trim().is_empty()).unwrap_or(true))
                .count(),
            Err(err) if err.kind() == io::ErrorKind::NotFound => 0,
            Err(err) => return Err(err.into()),
        };
        Ok(Self {
            writer: AtomicFileWriter::new(dir.clone()),
            dir,
            staging: Mutex::new(existing),
        })
    }

    fn staging_path(&self) -> PathBuf {
        self.dir.join(STAGING_FILENAME)
    }

    fn lock_staging(&self) -> Result<MutexGuard<'_, usize>, StoreError> {
        Ok(self.staging.lock()?)
    }
}

impl RecordStore for JsonFileRecordStore {
    fn clear_staging(&self) -> Result<(), StoreError> {
        let mut count = self.lock_staging()?;
        match fs::remove_file(self.staging_path()) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }
        *count = 0;
        Ok(())
    }

    fn insert_staging(&self, record: &StagingRecord) -> Result<(), StoreError> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');

        let mut count = self.lock_staging()?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.staging_path())?;
        file.write_all(&line)?;
        *count += 1;
        Ok(())
    }

    fn staging_count(&self) -> Result<usize, StoreError> {
        Ok(*self.lock_staging()?)
    }

    fn staging_records(&self) -> Result<Vec<StagingRecord>, StoreError> {
        let _guard = self.lock_staging()?;
        let file = match File::open(self.staging_path()) {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        let mut records = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            records.push(serde_json::from_str(&line)?);
        }
        Ok(records)
    }

    fn replace_production(&self, records: Vec<ProductionRecord>) -> Result<(), StoreError> {
        let content = serde_json::to_vec_pretty(&records)?;
        self.writer.write(PRODUCTION_FILENAME, &content)?;
        Ok(())
    }

    fn production_records(&self) -> Result<Vec<ProductionRecord>, StoreError> {
        match fs::read(self.dir.join(PRODUCTION_FILENAME)) {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(err) => Err(err.into()),
        }
    }
}
