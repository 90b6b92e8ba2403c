use std::collections::HashMap;

use parking_lot::Mutex;

use super::SourceInfo;

/// Remembers resolved [SourceInfo] by url so it is not fetched again.
pub trait SourceInfoStorage: Send + Sync + 'static {
    fn get(&self, url: &str) -> Option<SourceInfo>;

    fn put(&self, url: &str, info: SourceInfo);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct EmptySourceInfoStorage;

impl SourceInfoStorage for EmptySourceInfoStorage {
    fn get(&self, _url: &str) -> Option<SourceInfo> {
        None
    }

    fn put(&self, _url: &str, _info: SourceInfo) {}
}

/// Keeps source info for the lifetime of the process.
#[derive(Debug, Default)]
pub struct MemorySourceInfoStorage {
    infos: Mutex<HashMap<String, SourceInfo>>,
}

impl MemorySourceInfoStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SourceInfoStorage for MemorySourceInfoStorage {
    fn get(&self, url: &str) -> Option<SourceInfo> {
        self.infos.lock().get(url).cloned()
    }

    fn put(&self, url: &str, info: SourceInfo) {
        self.infos.lock().insert(url.to_string(), info);
    }
}
