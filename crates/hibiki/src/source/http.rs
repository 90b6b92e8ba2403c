use std::{io, sync::Arc, time::Duration};

use bytes::Bytes;
use futures::{stream::BoxStream, StreamExt, TryStreamExt};
use parking_lot::Mutex;
use reqwest::{
    header::{CONTENT_RANGE, CONTENT_TYPE, LOCATION, RANGE},
    Response, StatusCode, Url,
};
use tokio::io::AsyncReadExt;
use tokio_util::io::StreamReader;

use super::{storage::SourceInfoStorage, Source, SourceInfo, SourceReader};
use crate::{
    error::{HibikiError, HibikiResult},
    headers::HeaderInjector,
    util::{
        http::HttpClient,
        range::{ByteRange, ContentRange},
    },
};

pub const DEFAULT_MAX_REDIRECTS: u32 = 5;

/// A resource served over HTTP(S).
pub struct HttpUrlSource {
    client: HttpClient,
    url: String,
    state: Mutex<SourceState>,
    resolving: tokio::sync::Mutex<()>,

    storage: Arc<dyn SourceInfoStorage>,
    injector: Arc<dyn HeaderInjector>,
    timeout: Option<Duration>,
    max_redirects: u32,
}

#[derive(Clone)]
struct SourceState {
    info: SourceInfo,
    resolved: bool,
}

impl HttpUrlSource {
    pub fn new(
        client: HttpClient,
        url: impl Into<String>,
        storage: Arc<dyn SourceInfoStorage>,
        injector: Arc<dyn HeaderInjector>,
    ) -> Self {
        let url = url.into();
        let state = match storage.get(&url) {
            Some(info) => SourceState {
                info,
                resolved: true,
            },
            None => SourceState {
                info: SourceInfo::new(url.clone(), None, None),
                resolved: false,
            },
        };

        Self {
            client,
            url,
            state: Mutex::new(state),
            resolving: tokio::sync::Mutex::new(()),
            storage,
            injector,
            timeout: None,
            max_redirects: DEFAULT_MAX_REDIRECTS,
        }
    }

    /// Timeout applied to connecting, waiting for headers and every body read.
    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout.filter(|t| !t.is_zero());
        self
    }

    pub fn max_redirects(mut self, max_redirects: u32) -> Self {
        self.max_redirects = max_redirects;
        self
    }

    pub fn info(&self) -> SourceInfo {
        self.state.lock().info.clone()
    }

    fn update_info(&self, length: Option<u64>, mime: Option<String>) {
        let info = {
            let mut state = self.state.lock();
            state.info = SourceInfo::new(self.url.clone(), length, mime);
            state.resolved = true;
            state.info.clone()
        };
        self.storage.put(&self.url, info);
    }

    async fn ensure_resolved(&self) -> HibikiResult<SourceInfo> {
        let _resolving = self.resolving.lock().await;
        let state = self.state.lock().clone();
        if state.resolved {
            return Ok(state.info);
        }

        self.fetch_content_info().await?;
        Ok(self.info())
    }

    /// Resolves length and mime from the response headers, discarding the body.
    async fn fetch_content_info(&self) -> HibikiResult<()> {
        tracing::debug!("Read content info from {}", self.url);
        let response = match self.open_connection(0).await {
            Ok(response) => response,
            Err(e) => {
                tracing::error!("Error fetching info from {}: {e}", self.url);
                return Err(e);
            }
        };

        let length = response.content_length();
        let mime = content_type(&response);
        drop(response);

        self.update_info(length, mime);
        tracing::debug!("Source info fetched: {:?}", self.info());
        Ok(())
    }

    async fn open_connection(&self, offset: u64) -> HibikiResult<Response> {
        let mut url = self.url.clone();
        let mut redirect_count = 0;

        loop {
            if offset > 0 {
                tracing::debug!("Open connection with offset {offset} to {url}");
            } else {
                tracing::debug!("Open connection to {url}");
            }

            let mut request = self
                .client
                .get(url.as_str())
                .headers(self.injector.add_headers(&url));
            if offset > 0 {
                request = request.header(RANGE, ByteRange::from_offset(offset).to_http_range());
            }

            let response = match self.timeout {
                Some(timeout) => tokio::time::timeout(timeout, request.send())
                    .await
                    .map_err(|_| HibikiError::Timeout(url.clone()))??,
                None => request.send().await?,
            };

            let status = response.status();
            let redirected = matches!(
                status,
                StatusCode::MOVED_PERMANENTLY | StatusCode::FOUND | StatusCode::SEE_OTHER
            );
            if !redirected {
                if !status.is_success() {
                    return Err(HibikiError::HttpError(status));
                }
                return Ok(response);
            }

            let location = response
                .headers()
                .get(LOCATION)
                .and_then(|l| l.to_str().ok())
                .ok_or_else(|| HibikiError::MissingLocation(url.clone()))?;
            url = Url::parse(&url)?.join(location)?.to_string();
            redirect_count += 1;
            if redirect_count > self.max_redirects {
                return Err(HibikiError::TooManyRedirects(redirect_count));
            }
        }
    }
}

fn content_type(response: &Response) -> Option<String> {
    response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

impl Source for HttpUrlSource {
    type Reader = HttpSourceReader;

    fn url(&self) -> &str {
        &self.url
    }

    async fn length(&self) -> HibikiResult<Option<u64>> {
        Ok(self.ensure_resolved().await?.length)
    }

    async fn mime(&self) -> HibikiResult<Option<String>> {
        Ok(self.ensure_resolved().await?.mime)
    }

    async fn open(&self, offset: u64) -> HibikiResult<HttpSourceReader> {
        let response = self.open_connection(offset).await?;
        let status = response.status();

        let content_length = response.content_length();
        let length = match status {
            StatusCode::OK => content_length,
            StatusCode::PARTIAL_CONTENT => content_length.map(|l| l + offset).or_else(|| {
                response
                    .headers()
                    .get(CONTENT_RANGE)
                    .and_then(|v| v.to_str().ok())
                    .and_then(ContentRange::parse)
                    .map(|r| r.size)
            }),
            _ => self.state.lock().info.length,
        };
        self.update_info(length, content_type(&response));

        // The server ignored our Range header and sends the resource from byte 0.
        let skip = if offset > 0 && status == StatusCode::OK {
            tracing::warn!("{} does not support range requests", self.url);
            offset
        } else {
            0
        };

        let stream = response.bytes_stream().map_err(io::Error::other).boxed();
        Ok(HttpSourceReader {
            url: self.url.clone(),
            reader: Some(StreamReader::new(stream)),
            skip,
            timeout: self.timeout,
        })
    }

    fn renew(&self) -> Self {
        Self {
            client: self.client.clone(),
            url: self.url.clone(),
            state: Mutex::new(self.state.lock().clone()),
            resolving: tokio::sync::Mutex::new(()),
            storage: self.storage.clone(),
            injector: self.injector.clone(),
            timeout: self.timeout,
            max_redirects: self.max_redirects,
        }
    }
}

type ByteReader = StreamReader<BoxStream<'static, io::Result<Bytes>>, Bytes>;

pub struct HttpSourceReader {
    url: String,
    reader: Option<ByteReader>,
    skip: u64,
    timeout: Option<Duration>,
}

impl HttpSourceReader {
    async fn read_some(&mut self, buffer: &mut [u8]) -> HibikiResult<usize> {
        let Some(reader) = self.reader.as_mut() else {
            return Err(HibikiError::ConnectionAbsent(self.url.clone()));
        };

        let result = match self.timeout {
            Some(timeout) => tokio::time::timeout(timeout, reader.read(buffer))
                .await
                .unwrap_or_else(|_| Err(io::ErrorKind::TimedOut.into())),
            None => reader.read(buffer).await,
        };
        result.map_err(|e| match e.kind() {
            io::ErrorKind::Interrupted => HibikiError::Interrupted(self.url.clone()),
            _ => HibikiError::SourceRead {
                url: self.url.clone(),
                source: e,
            },
        })
    }
}

impl SourceReader for HttpSourceReader {
    async fn read(&mut self, buffer: &mut [u8]) -> HibikiResult<usize> {
        while self.skip > 0 {
            let limit = usize::try_from(self.skip)
                .unwrap_or(usize::MAX)
                .min(buffer.len());
            let read = self.read_some(&mut buffer[..limit]).await?;
            if read == 0 {
                return Ok(0);
            }
            self.skip -= read as u64;
        }

        self.read_some(buffer).await
    }

    fn close(&mut self) {
        if self.reader.take().is_some() {
            tracing::debug!("Connection to {} closed", self.url);
        }
    }
}
