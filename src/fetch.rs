//! Network boundary
//!
//! The loader never talks to the network directly. Everything goes through a
//! [`Fetch`] implementation injected at bootstrap:
//! - [`HttpFetch`]: reqwest against an origin URL
//! - [`DirFetch`]: files under a directory, with optional remote fallback for
//!   absolute URLs (CDN packages)
//! - [`MemoryFetch`]: in-memory routes with request counters

use futures_util::FutureExt;
use futures_util::future::LocalBoxFuture;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use url::Url;

/// Errors raised by a fetch implementation before any HTTP status exists
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("IO error: {0}")]
    Io(String),
}

/// HTTP method used by a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Method {
    #[default]
    Get,
    Head,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Head => "HEAD",
        }
    }
}

/// Per-request options
#[derive(Debug, Clone, Copy, Default)]
pub struct FetchOptions {
    pub method: Method,
}

impl FetchOptions {
    pub fn get() -> Self {
        Self { method: Method::Get }
    }

    pub fn head() -> Self {
        Self {
            method: Method::Head,
        }
    }
}

/// A completed response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchResponse {
    pub status: u16,
    pub body: String,
}

impl FetchResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// True for 2xx statuses.
    pub fn ok(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn text(&self) -> &str {
        &self.body
    }

    pub fn json<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_str(&self.body)
    }
}

pub type FetchResult = Result<FetchResponse, FetchError>;

/// `fetch(url, options)` as seen by the loader.
pub trait Fetch {
    fn fetch(&self, url: &str, options: FetchOptions) -> LocalBoxFuture<'static, FetchResult>;
}

/// Fetch over HTTP. Relative URLs are joined onto `origin`.
#[derive(Debug, Clone)]
pub struct HttpFetch {
    client: reqwest::Client,
    origin: Url,
}

impl HttpFetch {
    pub fn new(origin: Url) -> Self {
        Self {
            client: reqwest::Client::new(),
            origin,
        }
    }

    pub fn origin(&self) -> &Url {
        &self.origin
    }
}

impl Fetch for HttpFetch {
    fn fetch(&self, url: &str, options: FetchOptions) -> LocalBoxFuture<'static, FetchResult> {
        let client = self.client.clone();
        let target = self.origin.join(url);
        async move {
            let target = target.map_err(|e| FetchError::InvalidUrl(e.to_string()))?;
            let request = match options.method {
                Method::Get => client.get(target),
                Method::Head => client.head(target),
            };
            let response = request
                .header("cache-control", "no-store")
                .send()
                .await
                .map_err(|e| FetchError::Network(e.to_string()))?;
            let status = response.status().as_u16();
            let body = match options.method {
                Method::Head => String::new(),
                Method::Get => response
                    .text()
                    .await
                    .map_err(|e| FetchError::Network(e.to_string()))?,
            };
            Ok(FetchResponse { status, body })
        }
        .boxed_local()
    }
}

/// Fetch files from a directory. Missing files answer 404; paths escaping the
/// root answer 403. Absolute `http(s)` URLs go to `remote` when one is set.
#[derive(Debug, Clone)]
pub struct DirFetch {
    root: PathBuf,
    remote: Option<HttpFetch>,
}

impl DirFetch {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            remote: None,
        }
    }

    pub fn with_remote(mut self, remote: HttpFetch) -> Self {
        self.remote = Some(remote);
        self
    }

    /// Map a request path onto the root, or `None` if it would escape it.
    fn local_path(&self, url: &str) -> Option<PathBuf> {
        let path = url.split(['?', '#']).next().unwrap_or_default();
        let relative = Path::new(path.trim_start_matches('/'));
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
        {
            return None;
        }
        Some(self.root.join(relative))
    }
}

fn is_remote(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

impl Fetch for DirFetch {
    fn fetch(&self, url: &str, options: FetchOptions) -> LocalBoxFuture<'static, FetchResult> {
        if is_remote(url) {
            return match &self.remote {
                Some(remote) => remote.fetch(url, options),
                None => {
                    let url = url.to_string();
                    async move {
                        Err(FetchError::Network(format!(
                            "no remote fetch configured for {}",
                            url
                        )))
                    }
                    .boxed_local()
                }
            };
        }

        let path = self.local_path(url);
        async move {
            let Some(path) = path else {
                return Ok(FetchResponse::new(403, ""));
            };
            if !tokio::fs::metadata(&path)
                .await
                .map(|m| m.is_file())
                .unwrap_or(false)
            {
                return Ok(FetchResponse::new(404, ""));
            }
            match options.method {
                Method::Head => Ok(FetchResponse::new(200, "")),
                Method::Get => {
                    let body = tokio::fs::read_to_string(&path)
                        .await
                        .map_err(|e| FetchError::Io(e.to_string()))?;
                    Ok(FetchResponse::new(200, body))
                }
            }
        }
        .boxed_local()
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    routes: HashMap<String, FetchResponse>,
    counts: HashMap<String, usize>,
    requests: Vec<(Method, String)>,
}

/// In-memory routes. Unknown URLs answer 404. Every request yields once before
/// answering so that concurrent callers genuinely overlap.
#[derive(Debug, Clone, Default)]
pub struct MemoryFetch {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryFetch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `body` with status 200 at `url`.
    pub fn insert(&self, url: &str, body: &str) {
        self.insert_response(url, FetchResponse::new(200, body));
    }

    pub fn insert_response(&self, url: &str, response: FetchResponse) {
        self.state.lock().routes.insert(url.to_string(), response);
    }

    pub fn remove(&self, url: &str) {
        self.state.lock().routes.remove(url);
    }

    /// GET requests served for `url` (HEAD probes excluded).
    pub fn fetch_count(&self, url: &str) -> usize {
        self.state.lock().counts.get(url).copied().unwrap_or(0)
    }

    pub fn requests(&self) -> Vec<(Method, String)> {
        self.state.lock().requests.clone()
    }
}

impl Fetch for MemoryFetch {
    fn fetch(&self, url: &str, options: FetchOptions) -> LocalBoxFuture<'static, FetchResult> {
        let state = Arc::clone(&self.state);
        let url = url.to_string();
        async move {
            tokio::task::yield_now().await;
            let mut state = state.lock();
            state.requests.push((options.method, url.clone()));
            if options.method == Method::Get {
                *state.counts.entry(url.clone()).or_insert(0) += 1;
            }
            let response = state
                .routes
                .get(&url)
                .cloned()
                .unwrap_or_else(|| FetchResponse::new(404, ""));
            Ok(match options.method {
                Method::Head => FetchResponse::new(response.status, ""),
                Method::Get => response,
            })
        }
        .boxed_local()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_ok_range() {
        assert!(FetchResponse::new(200, "").ok());
        assert!(FetchResponse::new(204, "").ok());
        assert!(!FetchResponse::new(304, "").ok());
        assert!(!FetchResponse::new(404, "").ok());
    }

    #[test]
    fn test_response_json() {
        let response = FetchResponse::new(200, r#"{"entry":"main.tsx"}"#);
        let value: serde_json::Value = response.json().unwrap();
        assert_eq!(value["entry"], "main.tsx");
    }

    #[tokio::test]
    async fn test_memory_fetch_counts_gets() {
        let fetch = MemoryFetch::new();
        fetch.insert("a.js", "export default 1");

        let res = fetch.fetch("a.js", FetchOptions::get()).await.unwrap();
        assert!(res.ok());
        assert_eq!(res.text(), "export default 1");

        let head = fetch.fetch("a.js", FetchOptions::head()).await.unwrap();
        assert!(head.ok());
        assert!(head.body.is_empty());

        let missing = fetch.fetch("b.js", FetchOptions::get()).await.unwrap();
        assert_eq!(missing.status, 404);

        assert_eq!(fetch.fetch_count("a.js"), 1);
        assert_eq!(fetch.requests().len(), 3);
    }

    #[tokio::test]
    async fn test_dir_fetch_serves_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        std::fs::write(dir.path().join("src/app.tsx"), "export default 1;").unwrap();

        let fetch = DirFetch::new(dir.path());
        let res = fetch.fetch("src/app.tsx", FetchOptions::get()).await.unwrap();
        assert_eq!(res.status, 200);
        assert_eq!(res.body, "export default 1;");

        let res = fetch.fetch("/src/app.tsx?v=1", FetchOptions::head()).await.unwrap();
        assert_eq!(res.status, 200);

        let res = fetch.fetch("src/missing.tsx", FetchOptions::get()).await.unwrap();
        assert_eq!(res.status, 404);

        let res = fetch.fetch("../etc/passwd", FetchOptions::get()).await.unwrap();
        assert_eq!(res.status, 403);
    }

    #[tokio::test]
    async fn test_dir_fetch_without_remote_rejects_cdn_urls() {
        let fetch = DirFetch::new(".");
        let res = fetch
            .fetch("https://unpkg.com/react", FetchOptions::get())
            .await;
        assert!(matches!(res, Err(FetchError::Network(_))));
    }
}
