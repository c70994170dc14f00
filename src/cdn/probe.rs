//! Reachability checks and classic-script loading

use serde_json::json;
use std::rc::Rc;
use std::time::Duration;

use crate::engine::ScriptEngine;
use crate::error::{LoaderError, LoaderResult};
use crate::fetch::{Fetch, FetchOptions};
use crate::logging::LogClient;

/// Retry policy for [`NetworkProbeService::probe_url`]
#[derive(Debug, Clone, Copy)]
pub struct ProbeOptions {
    pub retries: u32,
    /// Delay before the first retry; each later retry waits 1.5x longer
    pub backoff: Duration,
    /// Retry a refused HEAD (403/405) as GET
    pub allow_get_fallback: bool,
}

impl Default for ProbeOptions {
    fn default() -> Self {
        Self {
            retries: 2,
            backoff: Duration::from_millis(300),
            allow_get_fallback: true,
        }
    }
}

impl ProbeOptions {
    fn delay(&self, attempt: u32) -> Duration {
        self.backoff.mul_f64(1.5f64.powi(attempt as i32))
    }
}

/// Statuses worth another attempt: none at all, server errors and 429.
pub fn should_retry_status(status: u16) -> bool {
    status == 0 || status >= 500 || status == 429
}

pub struct NetworkProbeService {
    fetch: Option<Rc<dyn Fetch>>,
    engine: Rc<ScriptEngine>,
    options: ProbeOptions,
    log: Rc<dyn LogClient>,
}

impl NetworkProbeService {
    pub fn new(
        fetch: Option<Rc<dyn Fetch>>,
        engine: Rc<ScriptEngine>,
        options: ProbeOptions,
        log: Rc<dyn LogClient>,
    ) -> Self {
        Self {
            fetch,
            engine,
            options,
            log,
        }
    }

    pub fn engine(&self) -> &Rc<ScriptEngine> {
        &self.engine
    }

    /// Whether `url` answers with a 2xx status.
    pub async fn probe_url(&self, url: &str) -> bool {
        let mut retries = self.options.retries;
        let mut attempt = 0;

        loop {
            let Some(fetch) = &self.fetch else {
                self.log
                    .warn("probe:fail", json!({ "url": url, "error": "Fetch unavailable" }));
                return false;
            };

            match fetch.fetch(url, FetchOptions::head()).await {
                Ok(response) => {
                    if response.ok() {
                        return true;
                    }
                    let mut status = response.status;
                    if self.options.allow_get_fallback && (status == 403 || status == 405) {
                        match fetch.fetch(url, FetchOptions::get()).await {
                            Ok(response) if response.ok() => return true,
                            Ok(response) => status = response.status,
                            Err(_) => status = 0,
                        }
                    }
                    if retries > 0 && should_retry_status(status) {
                        retries -= 1;
                        tokio::time::sleep(self.options.delay(attempt)).await;
                        attempt += 1;
                        continue;
                    }
                    self.log
                        .warn("probe:fail", json!({ "url": url, "status": status }));
                    return false;
                }
                Err(e) => {
                    if retries > 0 {
                        retries -= 1;
                        tokio::time::sleep(self.options.delay(attempt)).await;
                        attempt += 1;
                        continue;
                    }
                    self.log
                        .warn("probe:fail", json!({ "url": url, "error": e.to_string() }));
                    return false;
                }
            }
        }
    }

    /// GET a body from a CDN URL.
    pub async fn fetch_source(&self, url: &str) -> LoaderResult<String> {
        let fetch = self
            .fetch
            .as_ref()
            .ok_or_else(|| LoaderError::FetchUnavailable(url.to_string()))?;
        let response = fetch
            .fetch(url, FetchOptions::get())
            .await
            .map_err(|_| LoaderError::FetchFailed {
                path: url.to_string(),
                status: 0,
            })?;
        if !response.ok() {
            return Err(LoaderError::FetchFailed {
                path: url.to_string(),
                status: response.status,
            });
        }
        Ok(response.body)
    }

    /// Fetch a classic script and evaluate it in global scope.
    pub async fn load_script(&self, url: &str) -> LoaderResult<()> {
        let result = match self.fetch_source(url).await {
            Ok(code) => self.engine.eval_script(&code, url).map(|_| ()),
            Err(e) => Err(e),
        };
        match &result {
            Ok(()) => self.log.info("loadScript:success", json!({ "url": url })),
            Err(e) => self
                .log
                .warn("loadScript:error", json!({ "url": url, "error": e.to_string() })),
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::{FetchResponse, Method, MemoryFetch};
    use crate::logging::RecordingLogClient;

    const URL: &str = "https://cdn.test/pkg.js";

    fn probe(fetch: &MemoryFetch, log: &Rc<RecordingLogClient>) -> NetworkProbeService {
        NetworkProbeService::new(
            Some(Rc::new(fetch.clone())),
            Rc::new(ScriptEngine::new().unwrap()),
            ProbeOptions {
                backoff: Duration::ZERO,
                ..Default::default()
            },
            log.clone(),
        )
    }

    #[test]
    fn test_retry_statuses() {
        assert!(should_retry_status(0));
        assert!(should_retry_status(503));
        assert!(should_retry_status(429));
        assert!(!should_retry_status(404));
        assert!(!should_retry_status(403));
    }

    #[test]
    fn test_backoff_grows() {
        let options = ProbeOptions::default();
        assert_eq!(options.delay(0), Duration::from_millis(300));
        assert_eq!(options.delay(1), Duration::from_millis(450));
    }

    #[tokio::test]
    async fn test_probe_hit_and_miss() {
        let fetch = MemoryFetch::new();
        fetch.insert(URL, "x");
        let log = Rc::new(RecordingLogClient::new());
        let probe = probe(&fetch, &log);

        assert!(probe.probe_url(URL).await);
        assert!(!probe.probe_url("https://cdn.test/missing.js").await);
        assert_eq!(log.named("probe:fail")[0].detail["status"], 404);
        // 404 is final: HEAD, HEAD
        assert_eq!(fetch.requests().len(), 2);
    }

    #[tokio::test]
    async fn test_probe_retries_server_errors() {
        let fetch = MemoryFetch::new();
        fetch.insert_response(URL, FetchResponse::new(503, ""));
        let log = Rc::new(RecordingLogClient::new());
        let probe = probe(&fetch, &log);

        assert!(!probe.probe_url(URL).await);
        assert_eq!(fetch.requests().len(), 3);
        assert_eq!(log.named("probe:fail").len(), 1);
    }

    #[tokio::test]
    async fn test_probe_falls_back_to_get() {
        let fetch = MemoryFetch::new();
        fetch.insert_response(URL, FetchResponse::new(405, ""));
        let log = Rc::new(RecordingLogClient::new());
        let probe = probe(&fetch, &log);

        assert!(!probe.probe_url(URL).await);
        let methods: Vec<Method> = fetch.requests().into_iter().map(|(m, _)| m).collect();
        assert_eq!(methods, vec![Method::Head, Method::Get]);
    }

    #[tokio::test]
    async fn test_probe_without_fetch() {
        let log = Rc::new(RecordingLogClient::new());
        let probe = NetworkProbeService::new(
            None,
            Rc::new(ScriptEngine::new().unwrap()),
            ProbeOptions::default(),
            log.clone(),
        );
        assert!(!probe.probe_url(URL).await);
        assert_eq!(log.named("probe:fail")[0].detail["error"], "Fetch unavailable");
    }

    #[tokio::test]
    async fn test_load_script_sets_global() {
        let fetch = MemoryFetch::new();
        fetch.insert(URL, "globalThis.Pkg = { version: 3 };");
        let log = Rc::new(RecordingLogClient::new());
        let probe = probe(&fetch, &log);

        probe.load_script(URL).await.unwrap();
        assert!(probe.engine().get_global("Pkg.version").is_some());
        assert!(log.has_event("loadScript:success"));

        let err = probe.load_script("https://cdn.test/none.js").await.unwrap_err();
        assert!(matches!(err, LoaderError::FetchFailed { status: 404, .. }));
        assert!(log.has_event("loadScript:error"));
    }
}
