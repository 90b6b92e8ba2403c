use once_cell::sync::Lazy;
use regex::Regex;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

use crate::error::{HibikiError, HibikiResult};

static RANGE_HEADER_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?im)^range:[ ]?bytes=(\d*)-").unwrap());
static URL_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"GET /(.*) HTTP").unwrap());

/// Maximum size of a request head we are willing to buffer.
const MAX_REQUEST_HEAD: usize = 64 * 1024;

/// A GET request of a player, reduced to what the cache needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetRequest {
    pub uri: String,
    pub range_offset: u64,
    /// Whether the player sent a `Range` header.
    pub partial: bool,
}

impl GetRequest {
    pub fn parse(request: &str) -> HibikiResult<Self> {
        let uri = URL_PATTERN
            .captures(request)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
            .ok_or_else(|| HibikiError::InvalidRequest("missing GET request line".to_string()))?;

        let (range_offset, partial) = match RANGE_HEADER_PATTERN.captures(request) {
            Some(captures) => {
                let offset = captures.get(1).map(|m| m.as_str()).unwrap_or_default();
                let offset = offset.parse::<u64>().map_err(|_| {
                    HibikiError::InvalidRequest(format!("unsupported range: bytes={offset}-"))
                })?;
                (offset, true)
            }
            None => (0, false),
        };

        Ok(Self {
            uri,
            range_offset,
            partial,
        })
    }

    /// Reads a request head up to the first empty line and parses it.
    pub async fn read<R>(reader: &mut R) -> HibikiResult<Self>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut head = String::new();
        loop {
            let mut line = String::new();
            let read = reader.read_line(&mut line).await?;
            if read == 0 || line.trim().is_empty() {
                break;
            }
            head.push_str(&line);
            if head.len() > MAX_REQUEST_HEAD {
                return Err(HibikiError::InvalidRequest(
                    "request head is too large".to_string(),
                ));
            }
        }

        tracing::trace!("Request head: {head}");
        Self::parse(&head)
    }
}
