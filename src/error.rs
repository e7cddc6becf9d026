use std::io;
use std::path::PathBuf;
use thiserror::Error;

use crate::browser::BrowserError;
use crate::config::ConfigError;

#[derive(Error, Debug)]
pub enum AutomationError {
    #[error(transparent)]
    Browser(#[from] BrowserError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("file error on {path:?}: {source}")]
    File {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid JSON in {path:?}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("no responses found for {0}")]
    NoResponse(String),
}

impl AutomationError {
    pub(crate) fn file(path: impl Into<PathBuf>, source: io::Error) -> Self {
        AutomationError::File { path: path.into(), source }
    }

    pub(crate) fn json(path: impl Into<PathBuf>, source: serde_json::Error) -> Self {
        AutomationError::Json { path: path.into(), source }
    }
}
