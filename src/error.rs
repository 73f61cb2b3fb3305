use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::remote::RemoteError;

/// Errors that can abort processing of a single mbox or the whole run.
///
/// Per-sink write failures are not represented here; sinks disable
/// themselves and the run continues.
#[derive(Debug, Error)]
pub enum Error {
    #[error("input file is not mbox type: {0:?}")]
    NotAnMbox(PathBuf),

    #[error("{path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("no message separator within {limit} bytes at offset {offset}")]
    ParseOverflow { offset: u64, limit: usize },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Remote(#[from] RemoteError),
}

impl Error {
    pub fn io(path: impl AsRef<Path>, source: io::Error) -> Self {
        Error::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
