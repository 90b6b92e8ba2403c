use std::{io, path::PathBuf};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum HibikiError {
    #[error("HTTP error: {0}")]
    HttpError(reqwest::StatusCode),

    #[error("Too many redirects: {0}")]
    TooManyRedirects(u32),

    #[error("Redirect from {0} has no usable Location header")]
    MissingLocation(String),

    #[error("Timed out waiting for response from {0}")]
    Timeout(String),

    #[error("Error reading data from {url}: {source}")]
    SourceRead {
        url: String,
        #[source]
        source: io::Error,
    },

    #[error("Error reading data from {0}: connection is absent")]
    ConnectionAbsent(String),

    /// The read was cancelled. Never retried.
    #[error("Reading source {0} is interrupted")]
    Interrupted(String),

    #[error("Error reading source {attempts} times")]
    SourceUnreadable { attempts: u32 },

    #[error("Error {operation} (cache file {}): {source}", .path.display())]
    CacheIo {
        path: PathBuf,
        operation: String,
        #[source]
        source: io::Error,
    },

    #[error("Error append cache: cache file {} is completed", .0.display())]
    CacheCompleted(PathBuf),

    #[error("Cache file {} is closed", .0.display())]
    CacheClosed(PathBuf),

    #[error("Can not read {length} bytes into a buffer of {capacity} bytes")]
    InvalidBuffer { length: usize, capacity: usize },

    #[error("Missing collaborator: {0}")]
    MissingCollaborator(&'static str),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Invalid header: {0}")]
    InvalidHeader(String),

    #[error(transparent)]
    IOError(#[from] io::Error),

    #[error(transparent)]
    UrlParseError(#[from] url::ParseError),

    #[error(transparent)]
    RequestError(#[from] reqwest::Error),
}

pub type HibikiResult<T> = Result<T, HibikiError>;

impl HibikiError {
    pub(crate) fn cache_io(
        path: impl Into<PathBuf>,
        operation: impl Into<String>,
        source: io::Error,
    ) -> Self {
        Self::CacheIo {
            path: path.into(),
            operation: operation.into(),
            source,
        }
    }

    pub fn is_interrupted(&self) -> bool {
        matches!(self, Self::Interrupted(_))
    }

    /// Connection-level faults (reset, TLS, timeout) that usually disappear
    /// once the network settles, e.g. after switching interfaces.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout(_) => true,
            Self::RequestError(e) => is_transient_request_error(e),
            Self::SourceRead { source, .. } => {
                matches!(
                    source.kind(),
                    io::ErrorKind::ConnectionReset
                        | io::ErrorKind::ConnectionAborted
                        | io::ErrorKind::NotConnected
                        | io::ErrorKind::BrokenPipe
                        | io::ErrorKind::TimedOut
                        | io::ErrorKind::UnexpectedEof
                ) || source
                    .get_ref()
                    .and_then(|e| e.downcast_ref::<reqwest::Error>())
                    .is_some_and(is_transient_request_error)
            }
            _ => false,
        }
    }

    /// Generic I/O faults. A background fetch failing with one of these is not retried.
    pub fn is_io(&self) -> bool {
        matches!(
            self,
            Self::HttpError(_)
                | Self::SourceRead { .. }
                | Self::ConnectionAbsent(_)
                | Self::CacheIo { .. }
                | Self::IOError(_)
                | Self::RequestError(_)
        )
    }
}

fn is_transient_request_error(e: &reqwest::Error) -> bool {
    e.is_connect() || e.is_timeout() || e.is_body() || e.is_decode()
}
