use std::{path::PathBuf, sync::Arc, time::Duration};

use reqwest::{Certificate, Client};

use crate::{
    cache::{file::FileCache, FileNameGenerator, Md5FileNameGenerator},
    error::{HibikiError, HibikiResult},
    headers::{EmptyHeaderInjector, HeaderInjector},
    proxy::{FetchOptions, ProxyCache},
    source::{
        http::{HttpUrlSource, DEFAULT_MAX_REDIRECTS},
        storage::{MemorySourceInfoStorage, SourceInfoStorage},
    },
    util::http::HttpClient,
};

/// Everything needed to build a [ProxyCache] for an url.
pub struct ProxyCacheConfig {
    pub cache_root: PathBuf,
    pub file_name_generator: Arc<dyn FileNameGenerator>,
    pub source_info_storage: Arc<dyn SourceInfoStorage>,
    pub header_injector: Arc<dyn HeaderInjector>,
    pub timeout: Option<Duration>,
    pub max_redirects: u32,
    pub fetch: FetchOptions,

    client: HttpClient,
}

impl ProxyCacheConfig {
    pub fn builder() -> ProxyCacheConfigBuilder {
        ProxyCacheConfigBuilder::new()
    }

    pub fn generate_cache_file(&self, url: &str) -> PathBuf {
        self.cache_root.join(self.file_name_generator.generate(url))
    }

    pub fn client(&self) -> &HttpClient {
        &self.client
    }

    pub fn source(&self, url: impl Into<String>) -> HttpUrlSource {
        HttpUrlSource::new(
            self.client.clone(),
            url,
            self.source_info_storage.clone(),
            self.header_injector.clone(),
        )
        .timeout(self.timeout)
        .max_redirects(self.max_redirects)
    }

    pub async fn proxy_cache(&self, url: &str) -> HibikiResult<ProxyCache<HttpUrlSource>> {
        let cache = FileCache::open(self.generate_cache_file(url)).await?;
        ProxyCache::new(self.source(url), cache, self.fetch.clone()).await
    }
}

pub struct ProxyCacheConfigBuilder {
    cache_root: Option<PathBuf>,
    file_name_generator: Option<Arc<dyn FileNameGenerator>>,
    source_info_storage: Option<Arc<dyn SourceInfoStorage>>,
    header_injector: Option<Arc<dyn HeaderInjector>>,
    timeout: Option<Duration>,
    root_certificate: Option<Certificate>,
    max_redirects: u32,
    fetch: FetchOptions,
}

impl ProxyCacheConfigBuilder {
    pub fn new() -> Self {
        Self {
            cache_root: None,
            file_name_generator: None,
            source_info_storage: None,
            header_injector: None,
            timeout: None,
            root_certificate: None,
            max_redirects: DEFAULT_MAX_REDIRECTS,
            fetch: FetchOptions::default(),
        }
    }

    pub fn cache_root(mut self, cache_root: impl Into<PathBuf>) -> Self {
        self.cache_root = Some(cache_root.into());
        self
    }

    pub fn file_name_generator(mut self, generator: Arc<dyn FileNameGenerator>) -> Self {
        self.file_name_generator = Some(generator);
        self
    }

    pub fn source_info_storage(mut self, storage: Arc<dyn SourceInfoStorage>) -> Self {
        self.source_info_storage = Some(storage);
        self
    }

    pub fn header_injector(mut self, injector: Arc<dyn HeaderInjector>) -> Self {
        self.header_injector = Some(injector);
        self
    }

    /// Connect and read timeout of every upstream connection.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Extra root certificate trusted for HTTPS upstreams.
    pub fn root_certificate(mut self, certificate: Certificate) -> Self {
        self.root_certificate = Some(certificate);
        self
    }

    pub fn max_redirects(mut self, max_redirects: u32) -> Self {
        self.max_redirects = max_redirects;
        self
    }

    pub fn fetch_options(mut self, fetch: FetchOptions) -> Self {
        self.fetch = fetch;
        self
    }

    pub fn build(self) -> HibikiResult<ProxyCacheConfig> {
        let cache_root = self
            .cache_root
            .ok_or(HibikiError::MissingCollaborator("cache root"))?;
        if self.fetch.max_read_source_attempts == 0 {
            return Err(HibikiError::InvalidConfig(
                "max_read_source_attempts must be positive".to_string(),
            ));
        }
        if self.fetch.buffer_size == 0 {
            return Err(HibikiError::InvalidConfig(
                "buffer_size must be positive".to_string(),
            ));
        }

        let mut builder = Client::builder();
        if let Some(timeout) = self.timeout {
            builder = builder.connect_timeout(timeout);
        }
        if let Some(certificate) = self.root_certificate {
            builder = builder.add_root_certificate(certificate);
        }

        Ok(ProxyCacheConfig {
            cache_root,
            file_name_generator: self
                .file_name_generator
                .unwrap_or_else(|| Arc::new(Md5FileNameGenerator)),
            source_info_storage: self
                .source_info_storage
                .unwrap_or_else(|| Arc::new(MemorySourceInfoStorage::new())),
            header_injector: self
                .header_injector
                .unwrap_or_else(|| Arc::new(EmptyHeaderInjector)),
            timeout: self.timeout,
            max_redirects: self.max_redirects,
            fetch: self.fetch,
            client: HttpClient::new(builder)?,
        })
    }
}

impl Default for ProxyCacheConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
