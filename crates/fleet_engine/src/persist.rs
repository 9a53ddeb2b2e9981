use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("data directory {} unusable: {source}", .path.display())]
    DataDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("{} exists and is not a directory", .0.display())]
    NotADirectory(PathBuf),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

/// Creates the record store directory on first use.
pub fn ensure_data_dir(dir: &Path) -> Result<(), PersistError> {
    let data_dir_error = |source| PersistError::DataDir {
        path: dir.to_path_buf(),
        source,
    };
    match fs::metadata(dir) {
        Ok(meta) if meta.is_dir() => Ok(()),
        Ok(_) => Err(PersistError::NotADirectory(dir.to_path_buf())),
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            fs::create_dir_all(dir).map_err(data_dir_error)
        }
        Err(err) => Err(data_dir_error(err)),
    }
}

/// Replaces `{dir}/{filename}` by writing a sibling temp file and renaming it
/// over the target. Readers see the old file or the new one, never a mix.
#[derive(Debug, Clone)]
pub struct AtomicFileWriter {
    dir: PathBuf,
}

impl AtomicFileWriter {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub fn write(&self, filename: &str, content: &[u8]) -> Result<PathBuf, PersistError> {
        ensure_data_dir(&self.dir)?;
        let target = self.dir.join(filename);

        let mut staged = NamedTempFile::new_in(&self.dir)?;
        staged.write_all(content)?;
        staged.as_file().sync_all()?;

        // The old snapshot stays readable until the rename lands.
        staged
            .persist(&target)
            .map_err(|persist_err| PersistError::Io(persist_err.error))?;
        Ok(target)
    }
}
