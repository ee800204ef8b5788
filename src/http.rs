use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue, USER_AGENT};
use serde_json::Value;
use tracing::debug;

use crate::error::{EcosystemError, Upstream};

const MAX_RETRIES: usize = 3;
const BASE_DELAY_MS: u64 = 200;

/// Time-bounded store of successful response bodies keyed by url.
///
/// Clones share the same entries; hand the same handle to every client that
/// should see the same cache.
#[derive(Debug, Clone)]
pub struct ResponseCache {
    ttl: Duration,
    entries: Arc<Mutex<HashMap<String, CachedBody>>>,
}

#[derive(Debug, Clone)]
struct CachedBody {
    stored_at: Instant,
    body: String,
}

impl ResponseCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn get(&self, url: &str) -> Option<String> {
        let mut entries = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        match entries.get(url) {
            Some(entry) if entry.stored_at.elapsed() < self.ttl => Some(entry.body.clone()),
            Some(_) => {
                entries.remove(url);
                None
            }
            None => None,
        }
    }

    /// Stores `body` for `url` and drops every expired entry.
    pub fn insert(&self, url: &str, body: String) {
        let mut entries = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        entries.retain(|_, entry| entry.stored_at.elapsed() < self.ttl);
        entries.insert(
            url.to_string(),
            CachedBody {
                stored_at: Instant::now(),
                body,
            },
        );
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Blocking client bound to one upstream, with retries and an optional cache.
#[derive(Clone)]
pub struct HttpClient {
    client: Client,
    upstream: Upstream,
    cache: Option<ResponseCache>,
}

impl HttpClient {
    pub fn new(
        upstream: Upstream,
        timeout: Duration,
        token: Option<&str>,
        cache: Option<ResponseCache>,
    ) -> Result<Self, EcosystemError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("ecosystem-manager/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| EcosystemError::http(upstream, err))?,
        );
        if let Some(token) = token.map(str::trim).filter(|token| !token.is_empty()) {
            let scheme = match upstream {
                Upstream::Github => "token",
                _ => "Bearer",
            };
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&format!("{scheme} {token}"))
                    .map_err(|err| EcosystemError::http(upstream, err))?,
            );
        }
        let client = Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|err| EcosystemError::http(upstream, err))?;
        Ok(Self {
            client,
            upstream,
            cache,
        })
    }

    pub fn upstream(&self) -> Upstream {
        self.upstream
    }

    pub fn cache(&self) -> Option<&ResponseCache> {
        self.cache.as_ref()
    }

    pub fn get_text(&self, url: &str) -> Result<String, EcosystemError> {
        if let Some(body) = self.cache.as_ref().and_then(|cache| cache.get(url)) {
            debug!(url, "serving from response cache");
            return Ok(body);
        }
        let response = self.send_with_retries(|| self.client.get(url))?;
        let response = self.handle_status(response)?;
        let body = response
            .text()
            .map_err(|err| EcosystemError::http(self.upstream, err))?;
        if let Some(cache) = &self.cache {
            cache.insert(url, body.clone());
        }
        Ok(body)
    }

    pub fn get_json(&self, url: &str) -> Result<Value, EcosystemError> {
        let body = self.get_text(url)?;
        serde_json::from_str(&body).map_err(|err| EcosystemError::http(self.upstream, err))
    }

    pub fn get_bytes(&self, url: &str) -> Result<Vec<u8>, EcosystemError> {
        let response = self.send_with_retries(|| self.client.get(url))?;
        let response = self.handle_status(response)?;
        let bytes = response
            .bytes()
            .map_err(|err| EcosystemError::http(self.upstream, err))?;
        Ok(bytes.to_vec())
    }

    /// Whether the url answers with a 2xx status.
    pub fn exists(&self, url: &str) -> Result<bool, EcosystemError> {
        let response = self.send_with_retries(|| self.client.get(url))?;
        Ok(response.status().is_success())
    }

    pub fn post_json(&self, url: &str, body: &Value) -> Result<Value, EcosystemError> {
        let response = self.send_with_retries(|| self.client.post(url).json(body))?;
        let response = self.handle_status(response)?;
        response
            .json()
            .map_err(|err| EcosystemError::http(self.upstream, err))
    }

    fn handle_status(&self, response: Response) -> Result<Response, EcosystemError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let message = response
            .text()
            .unwrap_or_else(|_| format!("{} request failed", self.upstream));
        Err(EcosystemError::UpstreamStatus {
            upstream: self.upstream,
            status,
            message,
        })
    }

    fn send_with_retries<F>(&self, mut make_req: F) -> Result<Response, EcosystemError>
    where
        F: FnMut() -> RequestBuilder,
    {
        let mut attempt = 0usize;
        loop {
            match make_req().send() {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    if attempt < MAX_RETRIES && is_retryable_status(status) {
                        backoff(attempt);
                        attempt += 1;
                        continue;
                    }
                    return Ok(resp);
                }
                Err(err) => {
                    if attempt < MAX_RETRIES && is_retryable_error(&err) {
                        backoff(attempt);
                        attempt += 1;
                        continue;
                    }
                    return Err(EcosystemError::http(self.upstream, err));
                }
            }
        }
    }
}

fn backoff(attempt: usize) {
    let delay = BASE_DELAY_MS * (attempt as u64 + 1);
    thread::sleep(Duration::from_millis(delay));
}

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}
