pub mod http;
pub mod storage;

use std::future::Future;

use crate::error::HibikiResult;

/// What is known about an upstream resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceInfo {
    pub url: String,
    /// Total size of the resource, if the server told us.
    pub length: Option<u64>,
    pub mime: Option<String>,
}

impl SourceInfo {
    pub fn new(url: impl Into<String>, length: Option<u64>, mime: Option<String>) -> Self {
        Self {
            url: url.into(),
            length,
            mime,
        }
    }
}

/// An upstream resource that can be read from an arbitrary offset.
pub trait Source: Send + Sync + 'static {
    type Reader: SourceReader;

    fn url(&self) -> &str;

    /// Total length of the resource. Resolved on first use, then remembered.
    fn length(&self) -> impl Future<Output = HibikiResult<Option<u64>>> + Send;

    fn mime(&self) -> impl Future<Output = HibikiResult<Option<String>>> + Send;

    /// Opens a byte stream positioned at `offset`.
    fn open(&self, offset: u64) -> impl Future<Output = HibikiResult<Self::Reader>> + Send;

    /// A fresh source for the same resource, sharing everything already resolved.
    fn renew(&self) -> Self
    where
        Self: Sized;
}

/// Sequential reader returned by [Source::open].
pub trait SourceReader: Send + 'static {
    /// Reads into `buffer`, returning 0 at the end of the resource.
    fn read(&mut self, buffer: &mut [u8]) -> impl Future<Output = HibikiResult<usize>> + Send;

    /// Drops the connection. Safe to call more than once.
    fn close(&mut self);
}
