use reqwest::header::{HeaderMap, HeaderName, HeaderValue};

use crate::error::{HibikiError, HibikiResult};

/// Extra headers added to every request sent to the upstream resource.
pub trait HeaderInjector: Send + Sync + 'static {
    fn add_headers(&self, url: &str) -> HeaderMap;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct EmptyHeaderInjector;

impl HeaderInjector for EmptyHeaderInjector {
    fn add_headers(&self, _url: &str) -> HeaderMap {
        HeaderMap::new()
    }
}

/// Injects the same headers regardless of url.
#[derive(Debug, Clone, Default)]
pub struct StaticHeaderInjector {
    headers: HeaderMap,
}

impl StaticHeaderInjector {
    pub fn new(headers: HeaderMap) -> Self {
        Self { headers }
    }

    /// Parses `Name: value` lines, e.g. `User-Agent: xxxxx`.
    pub fn parse<I, S>(lines: I) -> HibikiResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut headers = HeaderMap::new();
        for line in lines {
            let line = line.as_ref();
            let (name, value) = line
                .split_once(':')
                .ok_or_else(|| HibikiError::InvalidHeader(line.to_string()))?;
            let name = HeaderName::from_bytes(name.trim().as_bytes())
                .map_err(|_| HibikiError::InvalidHeader(line.to_string()))?;
            let value = HeaderValue::from_str(value.trim())
                .map_err(|_| HibikiError::InvalidHeader(line.to_string()))?;
            headers.insert(name, value);
        }
        Ok(Self { headers })
    }

    pub fn insert(&mut self, name: HeaderName, value: HeaderValue) {
        self.headers.insert(name, value);
    }

    pub fn contains(&self, name: &HeaderName) -> bool {
        self.headers.contains_key(name)
    }
}

impl HeaderInjector for StaticHeaderInjector {
    fn add_headers(&self, _url: &str) -> HeaderMap {
        self.headers.clone()
    }
}
