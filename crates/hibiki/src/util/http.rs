use std::{ops::Deref, sync::Arc};

use reqwest::{redirect::Policy, Client, ClientBuilder};
use reqwest_cookie_store::{CookieStore, CookieStoreMutex};

use crate::error::HibikiResult;

/// A [Client] that keeps cookies between requests and never follows
/// redirects by itself. Redirects are followed by the sources so they can
/// be counted.
#[derive(Clone)]
pub struct HttpClient {
    client: Client,
    cookies_store: Arc<CookieStoreMutex>,
}

impl HttpClient {
    pub fn new(builder: ClientBuilder) -> HibikiResult<Self> {
        let cookies_store = Arc::new(CookieStoreMutex::new(CookieStore::default()));
        let client = builder
            .redirect(Policy::none())
            .cookie_provider(cookies_store.clone())
            .build()?;

        Ok(Self {
            client,
            cookies_store,
        })
    }

    pub fn cookies(&self) -> Arc<CookieStoreMutex> {
        self.cookies_store.clone()
    }
}

impl Deref for HttpClient {
    type Target = Client;

    fn deref(&self) -> &Self::Target {
        &self.client
    }
}
