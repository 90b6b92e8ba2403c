use std::sync::Arc;

use tokio::io::{AsyncWrite, AsyncWriteExt, BufWriter};

use crate::{
    error::HibikiResult, proxy::ProxyCache, request::GetRequest, source::Source,
    util::range::ContentRange, CacheListener,
};

/// Answers one range request of a player from a shared [ProxyCache].
///
/// A request for an offset outside the valid region restarts the background
/// fetch at that offset before streaming, instead of waiting for the running
/// fetch to get there.
pub struct RangeSession<S: Source> {
    proxy: ProxyCache<S>,
}

impl<S: Source> RangeSession<S> {
    pub fn new(proxy: ProxyCache<S>) -> Self {
        Self { proxy }
    }

    pub fn register_cache_listener(&self, listener: Arc<dyn CacheListener>) {
        self.proxy.set_listener(listener);
    }

    pub async fn process_request<W>(&self, request: &GetRequest, out: W) -> HibikiResult<()>
    where
        W: AsyncWrite + Unpin,
    {
        let mut out = BufWriter::new(out);
        let length = self.proxy.source().length().await?;
        if let Some(length) = length.filter(|&l| request.partial && request.range_offset >= l) {
            tracing::debug!(
                "Offset {} is past the end of {}",
                request.range_offset,
                self.proxy.source().url()
            );
            let headers = format!(
                "HTTP/1.1 416 REQUESTED RANGE NOT SATISFIABLE\r\n\
                 Accept-Ranges: bytes\r\n\
                 Content-Range: bytes */{length}\r\n\r\n"
            );
            out.write_all(headers.as_bytes()).await?;
            out.flush().await?;
            return Ok(());
        }

        let headers = self.new_response_headers(request).await?;
        out.write_all(headers.as_bytes()).await?;

        let offset = request.range_offset;
        let use_cache = self.is_use_cache(request).await?;
        self.proxy.cache().set_known_size(length).await;

        if use_cache {
            self.response_with_cache(&mut out, offset).await
        } else {
            self.response_without_cache(&mut out, offset).await
        }
    }

    /// Whether the request can be served by the running fetch.
    pub async fn is_use_cache(&self, request: &GetRequest) -> HibikiResult<bool> {
        let source_length_known = self.proxy.source().length().await?.is_some_and(|l| l > 0);
        Ok(!source_length_known
            || !request.partial
            || self.proxy.cache().in_range(request.range_offset).await)
    }

    pub async fn new_response_headers(&self, request: &GetRequest) -> HibikiResult<String> {
        let source = self.proxy.source();
        let cache = self.proxy.cache();

        let mime = source.mime().await?;
        let length = if cache.is_completed().await {
            Some(cache.available().await?)
        } else {
            source.length().await?
        };

        let mut headers = String::new();
        headers.push_str(if request.partial {
            "HTTP/1.1 206 PARTIAL CONTENT\r\n"
        } else {
            "HTTP/1.1 200 OK\r\n"
        });
        headers.push_str("Accept-Ranges: bytes\r\n");
        if let Some(length) = length {
            let content_length = if request.partial {
                length.saturating_sub(request.range_offset)
            } else {
                length
            };
            headers.push_str(&format!("Content-Length: {content_length}\r\n"));
            if request.partial {
                let range = ContentRange::to_end(request.range_offset, length);
                headers.push_str(&format!("Content-Range: {}\r\n", range.to_header()));
            }
        }
        if let Some(mime) = mime {
            headers.push_str(&format!("Content-Type: {mime}\r\n"));
        }
        headers.push_str("\r\n");
        Ok(headers)
    }

    async fn response_with_cache<W>(&self, out: &mut W, mut offset: u64) -> HibikiResult<()>
    where
        W: AsyncWrite + Unpin,
    {
        let mut buffer = vec![0u8; self.proxy.options().buffer_size];
        loop {
            let length = buffer.len();
            let read = self.proxy.read(&mut buffer, offset, length).await?;
            if read == 0 {
                break;
            }
            out.write_all(&buffer[..read]).await?;
            offset += read as u64;
        }
        out.flush().await?;
        Ok(())
    }

    async fn response_without_cache<W>(&self, out: &mut W, offset: u64) -> HibikiResult<()>
    where
        W: AsyncWrite + Unpin,
    {
        tracing::debug!(
            "Offset {offset} is not cached, restart reading {}",
            self.proxy.source().url()
        );
        let source = self.proxy.source().renew();

        self.proxy.stop().await;
        self.proxy.wait_until_idle().await;
        self.proxy.replace_source(source);
        self.proxy.cache().reset_to(offset).await?;
        self.proxy.resume().await;
        self.proxy.read_source_async(offset).await;

        self.response_with_cache(out, offset).await
    }
}
