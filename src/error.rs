use std::{io, path::PathBuf, time::Duration};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("{}", .0.join("\n"))]
    Invalid(Vec<String>),
}

#[derive(Error, Debug)]
pub enum TableError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Input file has no header row")]
    MissingHeader,

    #[error("Invalid NR '{value}' on line {line}")]
    InvalidNr { line: u64, value: String },
}

#[derive(Error, Debug)]
pub enum BackupError {
    #[error("Input file '{0}' has no file name")]
    NoFileName(PathBuf),

    #[error("Failed to create backup '{path}': {source}")]
    Create {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("LLM API call failed: {0}")]
    Api(#[from] async_openai::error::OpenAIError),

    #[error("Failed to build API request: {0}")]
    Request(String),

    #[error("LLM API call timed out after {0:?}")]
    Timeout(Duration),
}

/// A model reply that could not be read back as `{"d": [...]}`.
#[derive(Error, Debug)]
#[error(
    "JSON deserialization error ({reason}). Response might be truncated. Length: {response_len}, finish reason: {}",
    .finish_reason.as_deref().unwrap_or("unknown")
)]
pub struct DecodeError {
    pub reason: String,
    pub response_len: usize,
    pub finish_reason: Option<String>,
}

#[derive(Error, Debug)]
pub enum BatchError {
    #[error(transparent)]
    Client(#[from] ClientError),

    #[error(transparent)]
    Decode(#[from] DecodeError),
}

/// Failures that end a run before any batch is sent.
#[derive(Error, Debug)]
pub enum RunError {
    #[error(transparent)]
    Backup(#[from] BackupError),

    #[error("Failed to load '{path}': {source}")]
    Load {
        path: PathBuf,
        #[source]
        source: TableError,
    },
}
