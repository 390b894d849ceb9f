use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, RETRY_AFTER, USER_AGENT};
use reqwest::{Client, StatusCode};
use std::future::Future;
use std::time::Duration;

use crate::config::Settings;
use crate::errors::FetchError;
use crate::utils::absolute_url;

const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:121.0) Gecko/20100101 Firefox/121.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.2 Safari/605.1.15",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
];

// ── Retry policy ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Retries after the first attempt, so `max_retries + 1` attempts in total.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            max_retries: settings.fetch_max_retries,
            base_delay: settings.fetch_base_delay,
            max_delay: settings.fetch_max_delay,
        }
    }

    /// `min(base * 2^attempt, max)`, attempt counted from 0.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2f64.powi(attempt.min(30) as i32);
        let secs = self.base_delay.as_secs_f64() * factor;
        Duration::from_secs_f64(secs.min(self.max_delay.as_secs_f64()))
    }

    /// Wait before the next attempt: a server-requested wait (capped at
    /// `max_delay`) wins over the computed backoff.
    pub fn delay_for(&self, attempt: u32, err: &FetchError) -> Duration {
        match err {
            FetchError::Transient { retry_after: Some(wait), .. } => (*wait).min(self.max_delay),
            _ => self.backoff(attempt),
        }
    }
}

/// Run `op` until it succeeds, fails permanently, or the retry budget is spent.
/// Only transient errors are retried; the calling task sleeps between attempts.
pub async fn retry_with_backoff<T, F, Fut>(
    policy: &RetryPolicy,
    label: &str,
    mut op: F,
) -> Result<T, FetchError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, FetchError>>,
{
    let mut attempt = 0u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if !err.is_transient() => return Err(err),
            Err(err) if attempt >= policy.max_retries => {
                tracing::error!("{}: giving up after {} attempts: {}", label, attempt + 1, err);
                return Err(err);
            }
            Err(err) => {
                let delay = policy.delay_for(attempt, &err);
                tracing::warn!(
                    "{}: attempt {}/{} failed ({}), retrying in {:.2}s",
                    label,
                    attempt + 1,
                    policy.max_retries + 1,
                    err,
                    delay.as_secs_f64()
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

/// `Retry-After` in delta-seconds. HTTP-date values are ignored so the caller
/// falls back to backoff. Values too large for a `Duration` saturate; the
/// policy caps them at `max_delay` anyway.
fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    let raw = headers.get(RETRY_AFTER)?.to_str().ok()?;
    let secs: f64 = raw.trim().parse().ok()?;
    if !secs.is_finite() || secs < 0.0 {
        return None;
    }
    Some(Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX))
}

// ── Fetcher ──────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct Fetcher {
    client: Client,
    base_url: String,
    policy: RetryPolicy,
}

impl Fetcher {
    pub fn new(settings: &Settings) -> anyhow::Result<Self> {
        let ua = USER_AGENTS[rand::random_range(0..USER_AGENTS.len())];

        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static(ua));
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"),
        );
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));

        let client = Client::builder()
            .default_headers(headers)
            .timeout(settings.fetch_timeout)
            .build()?;

        Ok(Self {
            client,
            base_url: settings.source_base_url.clone(),
            policy: RetryPolicy::from_settings(settings),
        })
    }

    /// Absolute URL for a source path.
    pub fn url_for(&self, path: &str) -> String {
        absolute_url(&self.base_url, path)
    }

    /// One GET, no retries. Maps the response onto the fetch error taxonomy.
    async fn fetch_once(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let response = self.client.get(url).send().await.map_err(|e| FetchError::Transient {
            url: url.to_string(),
            reason: e.to_string(),
            retry_after: None,
        })?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(FetchError::Transient {
                url: url.to_string(),
                reason: "HTTP 429".to_string(),
                retry_after: parse_retry_after(response.headers()),
            });
        }
        if status == StatusCode::SERVICE_UNAVAILABLE {
            return Err(FetchError::Transient {
                url: url.to_string(),
                reason: "HTTP 503".to_string(),
                retry_after: None,
            });
        }
        if !status.is_success() {
            return Err(FetchError::Permanent {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let body = response.bytes().await.map_err(|e| FetchError::Transient {
            url: url.to_string(),
            reason: format!("body read failed: {}", e),
            retry_after: None,
        })?;
        Ok(body.to_vec())
    }

    /// GET with retry and backoff.
    pub async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        retry_with_backoff(&self.policy, url, || self.fetch_once(url)).await
    }

    /// GET and decode as (lossy) UTF-8 HTML.
    pub async fn fetch_html(&self, url: &str) -> Result<String, FetchError> {
        let bytes = self.fetch(url).await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderName, StatusCode as AxumStatus};
    use axum::routing::get;
    use axum::Router;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Instant;

    /// Serve `responses` in order on `/page`, then keep repeating the last one.
    async fn scripted_server(
        responses: Vec<(u16, Option<&'static str>, &'static str)>,
    ) -> (String, Arc<AtomicUsize>) {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let responses = Arc::new(responses);

        let app = Router::new().route(
            "/page",
            get(move || {
                let counter = counter.clone();
                let responses = responses.clone();
                async move {
                    let n = counter.fetch_add(1, Ordering::SeqCst);
                    let (code, retry_after, body) = responses[n.min(responses.len() - 1)];
                    let status = AxumStatus::from_u16(code).unwrap();
                    let mut headers = axum::http::HeaderMap::new();
                    if let Some(secs) = retry_after {
                        headers.insert(
                            HeaderName::from_static("retry-after"),
                            secs.parse().unwrap(),
                        );
                    }
                    (status, headers, body)
                }
            }),
        );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{}", addr), hits)
    }

    fn test_fetcher(base_url: &str) -> Fetcher {
        let settings = Settings {
            source_base_url: base_url.to_string(),
            fetch_base_delay: Duration::from_millis(10),
            fetch_max_delay: Duration::from_secs(5),
            fetch_timeout: Duration::from_secs(5),
            ..Settings::default()
        };
        Fetcher::new(&settings).unwrap()
    }

    #[test]
    fn test_backoff_is_exponential_and_capped() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(0), Duration::from_secs(2));
        assert_eq!(policy.backoff(1), Duration::from_secs(4));
        assert_eq!(policy.backoff(3), Duration::from_secs(16));
        assert_eq!(policy.backoff(4), Duration::from_secs(30));
        assert_eq!(policy.backoff(40), Duration::from_secs(30));
    }

    #[test]
    fn test_retry_after_is_capped_at_max_delay() {
        let policy = RetryPolicy::default();
        let err = FetchError::Transient {
            url: "u".into(),
            reason: "HTTP 429".into(),
            retry_after: Some(Duration::from_secs(120)),
        };
        assert_eq!(policy.delay_for(0, &err), Duration::from_secs(30));
    }

    #[test]
    fn test_huge_retry_after_saturates_instead_of_panicking() {
        let policy = RetryPolicy::default();
        for raw in ["1e20", "99999999999999999999"] {
            let mut headers = HeaderMap::new();
            headers.insert(RETRY_AFTER, HeaderValue::from_static(raw));
            let wait = parse_retry_after(&headers);
            assert_eq!(wait, Some(Duration::MAX));

            let err = FetchError::Transient { url: "u".into(), reason: "HTTP 429".into(), retry_after: wait };
            assert_eq!(policy.delay_for(0, &err), Duration::from_secs(30));
        }

        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, HeaderValue::from_static("-3"));
        assert_eq!(parse_retry_after(&headers), None);
    }

    #[tokio::test]
    async fn test_huge_retry_after_from_server_is_capped() {
        let (base, hits) =
            scripted_server(vec![(429, Some("1e20"), "slow down"), (200, None, "ok")]).await;
        let settings = Settings {
            source_base_url: base,
            fetch_max_delay: Duration::from_millis(50),
            ..Settings::default()
        };
        let fetcher = Fetcher::new(&settings).unwrap();

        let body = fetcher.fetch(&fetcher.url_for("/page")).await.unwrap();
        assert_eq!(body, b"ok");
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_429_with_retry_after_then_200() {
        let (base, hits) =
            scripted_server(vec![(429, Some("2"), "slow down"), (200, None, "<html>ok</html>")]).await;
        let fetcher = test_fetcher(&base);

        let started = Instant::now();
        let body = fetcher.fetch_html(&fetcher.url_for("/page")).await.unwrap();

        assert!(started.elapsed() >= Duration::from_secs(2));
        assert_eq!(body, "<html>ok</html>");
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_503_is_retried_until_success() {
        let (base, hits) = scripted_server(vec![
            (503, None, "down"),
            (503, None, "down"),
            (200, None, "up"),
        ])
        .await;
        let fetcher = test_fetcher(&base);

        let body = fetcher.fetch(&fetcher.url_for("/page")).await.unwrap();
        assert_eq!(body, b"up");
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_404_fails_fast() {
        let (base, hits) = scripted_server(vec![(404, None, "missing")]).await;
        let fetcher = test_fetcher(&base);

        let err = fetcher.fetch(&fetcher.url_for("/page")).await.unwrap_err();
        assert!(matches!(err, FetchError::Permanent { status: 404, .. }));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_gives_up_after_retry_budget() {
        let (base, hits) = scripted_server(vec![(503, None, "down")]).await;
        let fetcher = test_fetcher(&base);

        let err = fetcher.fetch(&fetcher.url_for("/page")).await.unwrap_err();
        assert!(err.is_transient());
        assert_eq!(hits.load(Ordering::SeqCst), 4);
    }
}
