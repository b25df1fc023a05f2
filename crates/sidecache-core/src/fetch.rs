//! Network seam.
//!
//! Strategies and the retry queue fetch through the `Fetch` trait so tests
//! and embedders can substitute their own transport. `HttpFetcher` is the
//! real implementation over a shared `reqwest::Client`.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use crate::error::FetchError;
use crate::http::{Method, Request, Response};

/// Client-wide request timeout in seconds.
/// Network-first applies its own much tighter bound; this is the backstop
/// for background refreshes and replays so no task hangs forever.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Headers stripped from anonymous fetches.
const CREDENTIAL_HEADERS: [&str; 2] = ["authorization", "cookie"];

/// Per-request knobs a strategy can set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchOptions {
    /// Send without credential headers. Image hosts are fetched anonymously
    /// so their responses are cacheable cross-origin.
    pub anonymous: bool,
}

impl FetchOptions {
    pub fn anonymous() -> Self {
        Self { anonymous: true }
    }
}

/// Transport used by the strategy executor and retry queue.
#[async_trait]
pub trait Fetch: Send + Sync {
    async fn fetch(
        &self,
        request: &Request,
        options: &FetchOptions,
    ) -> Result<Response, FetchError>;
}

/// Real transport over reqwest.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new() -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Fetch for HttpFetcher {
    async fn fetch(
        &self,
        request: &Request,
        options: &FetchOptions,
    ) -> Result<Response, FetchError> {
        let url = reqwest::Url::parse(&request.url)
            .map_err(|_| FetchError::InvalidUrl(request.url.clone()))?;

        let mut builder = self.client.request(to_reqwest_method(request.method), url);
        for (name, value) in &request.headers {
            if options.anonymous && CREDENTIAL_HEADERS.contains(&name.as_str()) {
                continue;
            }
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let response = builder.send().await?;

        let status = response.status().as_u16();
        let mut headers = BTreeMap::new();
        for (name, value) in response.headers() {
            if let Ok(value) = value.to_str() {
                headers.insert(name.as_str().to_string(), value.to_string());
            }
        }
        let body = response.bytes().await?.to_vec();

        Ok(Response {
            status,
            headers,
            body,
        })
    }
}

fn to_reqwest_method(method: Method) -> reqwest::Method {
    match method {
        Method::Get => reqwest::Method::GET,
        Method::Head => reqwest::Method::HEAD,
        Method::Post => reqwest::Method::POST,
        Method::Put => reqwest::Method::PUT,
        Method::Patch => reqwest::Method::PATCH,
        Method::Delete => reqwest::Method::DELETE,
        Method::Options => reqwest::Method::OPTIONS,
    }
}
