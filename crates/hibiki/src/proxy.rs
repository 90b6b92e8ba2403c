use std::{
    sync::{
        atomic::{AtomicBool, AtomicI32, AtomicU32, AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use parking_lot::{Mutex, RwLock};
use tokio::{
    sync::{futures::Notified, Notify},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;

use crate::{
    cache::file::FileCache,
    error::{HibikiError, HibikiResult},
    source::{Source, SourceReader},
    CacheListener,
};

pub const DEFAULT_BUFFER_SIZE: usize = 8 * 1024;

/// Tuning of the background fetch and of readers waiting for it.
#[derive(Debug, Clone)]
pub struct FetchOptions {
    /// Failed fetch attempts tolerated before readers give up.
    pub max_read_source_attempts: u32,
    /// Longest time a reader sleeps before re-checking the cache without a signal.
    pub wait_interval: Duration,
    /// Extra pause of a reader while the last fetch attempt has failed.
    pub error_pause: Duration,
    /// Pause before a fetch restarts after a connection-level fault.
    pub transient_backoff: Duration,
    pub buffer_size: usize,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            max_read_source_attempts: 4,
            wait_interval: Duration::from_secs(1),
            error_pause: Duration::from_secs(1),
            // long enough for a switch from wi-fi to a mobile network
            transient_backoff: Duration::from_secs(10),
            buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }
}

/// Serves reads of a single resource from a [FileCache] while at most one
/// background task keeps appending the resource to it.
///
/// [ProxyCache::read] blocks until the requested bytes are cached, so a reader
/// does not care whether the data was cached before or arrived while waiting.
pub struct ProxyCache<S: Source> {
    inner: Arc<ProxyCacheInner<S>>,
}

impl<S: Source> Clone for ProxyCache<S> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

struct ProxyCacheInner<S: Source> {
    source: RwLock<Arc<S>>,
    cache: FileCache,
    options: FetchOptions,

    /// Guards appends against concurrent stop requests.
    stop_lock: tokio::sync::Mutex<()>,
    stopped: AtomicBool,
    shut_down: AtomicBool,
    /// Set once a fetch reached the end of the resource.
    exhausted: AtomicBool,

    data_available: Notify,
    read_source_errors: AtomicU32,
    percents_available: AtomicI32,

    reader_task: Mutex<Option<SourceReaderTask>>,
    fetches_started: AtomicU64,

    listener: RwLock<Option<Arc<dyn CacheListener>>>,
}

struct SourceReaderTask {
    handle: JoinHandle<()>,
    cancel: CancellationToken,
}

impl SourceReaderTask {
    fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }
}

enum FetchEnd {
    Exhausted,
    Stopped,
}

impl<S: Source> ProxyCache<S> {
    /// Creates the engine and decides whether the existing cache file can be trusted.
    ///
    /// A file is reused only when its size equals the resolved length of the
    /// source and truncated when the length is known but differs. When the
    /// length cannot be resolved the file is kept and nothing in it is trusted
    /// until a fetch overwrites it.
    pub async fn new(source: S, cache: FileCache, options: FetchOptions) -> HibikiResult<Self> {
        if options.max_read_source_attempts == 0 {
            return Err(HibikiError::InvalidConfig(
                "max_read_source_attempts must be positive".to_string(),
            ));
        }

        match source.length().await {
            Ok(Some(length)) => {
                cache.set_known_size(Some(length)).await;
                if !cache.is_completed().await {
                    cache.reset_to(0).await?;
                }
            }
            Ok(None) => {
                tracing::debug!("Length of {} is unknown, keeping cache file", source.url());
            }
            Err(e) => {
                tracing::warn!("Failed to resolve length of {}: {e}", source.url());
            }
        }

        Ok(Self {
            inner: Arc::new(ProxyCacheInner {
                source: RwLock::new(Arc::new(source)),
                cache,
                options,
                stop_lock: tokio::sync::Mutex::new(()),
                stopped: AtomicBool::new(false),
                shut_down: AtomicBool::new(false),
                exhausted: AtomicBool::new(false),
                data_available: Notify::new(),
                read_source_errors: AtomicU32::new(0),
                percents_available: AtomicI32::new(-1),
                reader_task: Mutex::new(None),
                fetches_started: AtomicU64::new(0),
                listener: RwLock::new(None),
            }),
        })
    }

    pub fn source(&self) -> Arc<S> {
        self.inner.source()
    }

    /// Replaces the source. Only call while no fetch is running.
    pub fn replace_source(&self, source: S) {
        *self.inner.source.write() = Arc::new(source);
    }

    pub fn cache(&self) -> &FileCache {
        &self.inner.cache
    }

    pub fn options(&self) -> &FetchOptions {
        &self.inner.options
    }

    pub fn set_listener(&self, listener: Arc<dyn CacheListener>) {
        *self.inner.listener.write() = Some(listener);
    }

    /// Number of background fetches actually spawned so far.
    pub fn fetches_started(&self) -> u64 {
        self.inner.fetches_started.load(Ordering::SeqCst)
    }

    pub fn percents_available(&self) -> Option<u8> {
        u8::try_from(self.inner.percents_available.load(Ordering::SeqCst)).ok()
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.is_stopped()
    }

    pub fn is_fetching(&self) -> bool {
        self.inner
            .reader_task
            .lock()
            .as_ref()
            .is_some_and(SourceReaderTask::is_running)
    }

    /// Reads `length` bytes at `offset` into `buffer`, waiting for the
    /// background fetch when they are not cached yet.
    ///
    /// Returns 0 once nothing more can be read at `offset`.
    pub async fn read(&self, buffer: &mut [u8], offset: u64, length: usize) -> HibikiResult<usize> {
        if length > buffer.len() {
            return Err(HibikiError::InvalidBuffer {
                length,
                capacity: buffer.len(),
            });
        }

        self.wait_data(offset, length as u64).await?;

        // bytes outside the valid region may be left over from an earlier run
        let region = self.inner.cache.region().await;
        if offset < region.start() {
            return Ok(0);
        }
        let valid =
            usize::try_from(region.upper_bound().saturating_sub(offset)).unwrap_or(usize::MAX);
        let length = length.min(valid);
        let read = self.inner.cache.read(&mut buffer[..length], offset).await?;
        if self.inner.cache.is_completed().await
            && self.inner.percents_available.swap(100, Ordering::SeqCst) != 100
        {
            self.inner.on_cache_percents_available_changed(100);
        }
        Ok(read)
    }

    async fn wait_data(&self, offset: u64, length: u64) -> HibikiResult<()> {
        loop {
            // registered before checking, so a signal in between is not lost
            let notified = self.inner.data_available.notified();

            let region = self.inner.cache.region().await;
            let available = region.upper_bound();
            let source_length = self.inner.source().length().await?;
            let waiting = available < offset + length
                && offset >= region.start()
                && source_length != Some(available)
                && !self.inner.exhausted.load(Ordering::SeqCst)
                && !self.inner.is_stopped();
            if !waiting {
                return Ok(());
            }

            self.read_source_async(offset).await;
            self.wait_for_source_data(notified).await;
            self.wait_read_if_needed().await;
            self.check_read_source_errors_count().await?;
        }
    }

    async fn wait_for_source_data(&self, notified: Notified<'_>) {
        let _ = tokio::time::timeout(self.inner.options.wait_interval, notified).await;
    }

    async fn wait_read_if_needed(&self) {
        if self.inner.read_source_errors.load(Ordering::SeqCst) > 0 {
            tokio::time::sleep(self.inner.options.error_pause).await;
        }
    }

    async fn check_read_source_errors_count(&self) -> HibikiResult<()> {
        let errors = self.inner.read_source_errors.load(Ordering::SeqCst);
        if errors >= self.inner.options.max_read_source_attempts {
            self.inner.read_source_errors.store(0, Ordering::SeqCst);
            self.shutdown().await;
            return Err(HibikiError::SourceUnreadable { attempts: errors });
        }
        Ok(())
    }

    /// Spawns a fetch starting at `offset` unless one is running, the engine
    /// is stopped or the cache is complete. Returns whether a fetch was spawned.
    pub async fn read_source_async(&self, offset: u64) -> bool {
        if self.inner.is_stopped() || self.inner.cache.is_completed().await {
            return false;
        }

        let mut reader_task = self.inner.reader_task.lock();
        if reader_task.as_ref().is_some_and(SourceReaderTask::is_running) {
            return false;
        }

        let cancel = CancellationToken::new();
        let inner = self.inner.clone();
        let token = cancel.clone();
        self.inner.exhausted.store(false, Ordering::SeqCst);
        self.inner.fetches_started.fetch_add(1, Ordering::SeqCst);
        let handle = tokio::spawn(async move { inner.read_source(offset, token).await });
        *reader_task = Some(SourceReaderTask { handle, cancel });
        true
    }

    /// Pauses the running fetch, if any. The cache is kept open.
    pub async fn stop(&self) {
        self.inner.stop_reading().await;
    }

    pub async fn resume(&self) {
        let _guard = self.inner.stop_lock.lock().await;
        self.inner.stopped.store(false, Ordering::SeqCst);
    }

    /// Waits until the last spawned fetch has terminated.
    pub async fn wait_until_idle(&self) {
        let task = self.inner.reader_task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.handle.await {
                tracing::warn!("Source reader task failed: {e}");
            }
        }
    }

    /// Stops fetching for good and closes the cache. Calling it again does nothing.
    pub async fn shutdown(&self) {
        if self.inner.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }

        let _guard = self.inner.stop_lock.lock().await;
        tracing::debug!("Shutdown proxy for {}", self.inner.source().url());
        self.inner.stopped.store(true, Ordering::SeqCst);
        if let Some(task) = self.inner.reader_task.lock().as_ref() {
            task.cancel.cancel();
        }
        if let Err(e) = self.inner.cache.close().await {
            self.inner.on_error(&e);
        }
    }
}

impl<S: Source> ProxyCacheInner<S> {
    fn source(&self) -> Arc<S> {
        self.source.read().clone()
    }

    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    async fn stop_reading(&self) {
        let _guard = self.stop_lock.lock().await;
        if let Some(task) = self.reader_task.lock().as_ref() {
            if task.is_running() {
                tracing::debug!("Stop reading {}", self.source().url());
                self.stopped.store(true, Ordering::SeqCst);
                task.cancel.cancel();
            }
        }
    }

    async fn read_source(self: Arc<Self>, from: u64, cancel: CancellationToken) {
        let source = self.source();
        let mut offset = from;
        let mut source_length = None;

        loop {
            let result = self
                .fetch_from(source.as_ref(), &mut offset, &mut source_length, &cancel)
                .await;
            match result {
                Ok(FetchEnd::Exhausted) => {
                    self.on_source_read(offset, source_length).await;
                    break;
                }
                Ok(FetchEnd::Stopped) => break,
                Err(e) if e.is_interrupted() => {
                    self.on_error(&e);
                    break;
                }
                Err(e) => {
                    let errors = self.read_source_errors.fetch_add(1, Ordering::SeqCst) + 1;
                    self.on_error(&e);

                    if e.is_transient()
                        && errors < self.options.max_read_source_attempts
                        && !self.is_stopped()
                    {
                        tracing::warn!(
                            "Restart reading {} from {offset} in {:?}",
                            source.url(),
                            self.options.transient_backoff
                        );
                        tokio::select! {
                            _ = cancel.cancelled() => break,
                            _ = tokio::time::sleep(self.options.transient_backoff) => continue,
                        }
                    }

                    if e.is_io() {
                        self.stop_reading().await;
                    }
                    break;
                }
            }
        }

        self.notify_new_cache_data_available(offset, source_length);
    }

    async fn fetch_from(
        &self,
        source: &S,
        offset: &mut u64,
        source_length: &mut Option<u64>,
        cancel: &CancellationToken,
    ) -> HibikiResult<FetchEnd> {
        let mut reader = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(HibikiError::Interrupted(source.url().to_string())),
            reader = source.open(*offset) => reader?,
        };
        *source_length = source.length().await?;

        let result = self
            .pump(source, &mut reader, offset, *source_length, cancel)
            .await;
        reader.close();
        result
    }

    async fn pump(
        &self,
        source: &S,
        reader: &mut S::Reader,
        offset: &mut u64,
        source_length: Option<u64>,
        cancel: &CancellationToken,
    ) -> HibikiResult<FetchEnd> {
        let mut buffer = vec![0u8; self.options.buffer_size];
        loop {
            let read = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(HibikiError::Interrupted(source.url().to_string())),
                read = reader.read(&mut buffer) => read?,
            };
            if read == 0 {
                return Ok(FetchEnd::Exhausted);
            }

            {
                let _guard = self.stop_lock.lock().await;
                if self.is_stopped() || cancel.is_cancelled() {
                    return Ok(FetchEnd::Stopped);
                }
                self.cache.append(&buffer[..read], *offset).await?;
            }
            *offset += read as u64;
            self.read_source_errors.store(0, Ordering::SeqCst);
            self.notify_new_cache_data_available(*offset, source_length);
        }
    }

    async fn on_source_read(&self, offset: u64, source_length: Option<u64>) {
        self.read_source_errors.store(0, Ordering::SeqCst);
        // size first, readers woken by exhausted must see a completed cache
        if source_length.is_none() {
            if let Err(e) = self.cache.truncate(offset).await {
                self.on_error(&e);
            }
            self.cache.set_known_size(Some(offset)).await;
        }
        self.exhausted.store(true, Ordering::SeqCst);

        // listeners always hear about the end, whatever the percentage said before
        self.percents_available.store(100, Ordering::SeqCst);
        self.on_cache_percents_available_changed(100);
    }

    fn notify_new_cache_data_available(&self, cache_available: u64, source_length: Option<u64>) {
        self.on_cache_available(cache_available, source_length);
        self.data_available.notify_waiters();
    }

    fn on_cache_available(&self, cache_available: u64, source_length: Option<u64>) {
        let Some(source_length) = source_length else {
            return;
        };
        let percents = if source_length == 0 {
            100
        } else {
            (cache_available.saturating_mul(100) / source_length).min(100) as i32
        };
        if self.percents_available.swap(percents, Ordering::SeqCst) != percents {
            self.on_cache_percents_available_changed(percents as u8);
        }
    }

    fn on_cache_percents_available_changed(&self, percents: u8) {
        let listener = self.listener.read().clone();
        if let Some(listener) = listener {
            listener.on_cache_available(self.cache.path(), self.source().url(), percents);
        }
    }

    fn on_error(&self, e: &HibikiError) {
        if e.is_interrupted() {
            tracing::debug!("ProxyCache is interrupted");
        } else {
            tracing::error!("ProxyCache error: {e}");
        }
    }
}
