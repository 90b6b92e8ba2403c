pub mod cache;
pub mod config;
pub mod error;
pub mod headers;
pub mod proxy;
pub mod request;
pub mod session;
pub mod source;
pub mod util;

pub use cache::{file::FileCache, range::ValidRegion};
pub use config::{ProxyCacheConfig, ProxyCacheConfigBuilder};
pub use error::{HibikiError, HibikiResult};
pub use proxy::{FetchOptions, ProxyCache};
pub use request::GetRequest;
pub use session::RangeSession;
pub use source::{http::HttpUrlSource, Source, SourceInfo, SourceReader};
pub use util::http::HttpClient;

use std::path::Path;

/// ┌──────────┐  GetRequest   ┌──────────────┐  read(offset)  ┌──────────────┐
/// │  Player  ├──────────────►│ RangeSession ├───────────────►│  ProxyCache  │
/// └──────────┘               └──────┬───────┘                └──┬────────▲──┘
///                                   │ restart on miss           │        │ append
///                                   ▼                     spawn │        │
///                            ┌──────────────┐                ┌──▼────────┴──┐
///                            │  FileCache   │◄───────────────┤ Source fetch │
///                            └──────────────┘    read_at     └──────────────┘
///
/// Receives download progress of a cached resource.
pub trait CacheListener: Send + Sync + 'static {
    fn on_cache_available(&self, cache_file: &Path, url: &str, percents_available: u8);
}

impl<F> CacheListener for F
where
    F: Fn(&Path, &str, u8) + Send + Sync + 'static,
{
    fn on_cache_available(&self, cache_file: &Path, url: &str, percents_available: u8) {
        self(cache_file, url, percents_available)
    }
}
