use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Client;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::models::{RawListing, SearchRequest, SearchResponse};
use crate::config::{RetryPolicy, UpstreamConfig};
use crate::crawler::PageSource;

fn truncate_for_log(mut s: String, max_len: usize) -> String {
    if s.len() > max_len {
        let mut cut = max_len;
        while !s.is_char_boundary(cut) {
            cut -= 1;
        }
        s.truncate(cut);
        s.push('…');
    }
    s
}

#[derive(Error, Debug)]
pub enum UpstreamError {
    #[error("http {status}: {body}")]
    Http { status: u16, body: String },
    #[error("network: {0}")]
    Net(#[from] reqwest::Error),
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted {
        attempts: u32,
        last: Box<UpstreamError>,
    },
}

/// Run `op` up to `policy.max_attempts` times, sleeping `policy.delay_for(n)`
/// after each failed attempt except the last. `op` receives the 0-based attempt.
pub async fn with_retries<T, F, Fut>(
    policy: &RetryPolicy,
    label: &str,
    mut op: F,
) -> Result<T, UpstreamError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, UpstreamError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0u32;
    loop {
        match op(attempt).await {
            Ok(v) => return Ok(v),
            Err(err) => {
                let attempts_made = attempt + 1;
                if attempts_made >= max_attempts {
                    warn!(label, attempts = attempts_made, error = %err, "upstream retries exhausted");
                    return Err(UpstreamError::Exhausted {
                        attempts: attempts_made,
                        last: Box::new(err),
                    });
                }
                let delay = policy.delay_for(attempt);
                warn!(
                    label,
                    attempt = attempts_made,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "upstream attempt failed; backing off"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

/// Client for the marketfiyati `searchByCategories` endpoint.
///
/// The upstream rejects requests that don't look like they came from its own
/// web app, so every request carries a fixed Chrome header set.
#[derive(Debug, Clone)]
pub struct MarketFiyatiProvider {
    http: Client,
    cfg: Arc<UpstreamConfig>,
}

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";

fn browser_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    let pairs: [(&'static str, &'static str); 13] = [
        ("accept", "application/json, text/plain, */*"),
        ("accept-language", "tr-TR,tr;q=0.9,en;q=0.8"),
        ("content-type", "application/json"),
        ("origin", "https://marketfiyati.org.tr"),
        ("referer", "https://marketfiyati.org.tr/"),
        (
            "sec-ch-ua",
            "\"Google Chrome\";v=\"131\", \"Chromium\";v=\"131\", \"Not_A Brand\";v=\"24\"",
        ),
        ("sec-ch-ua-mobile", "?0"),
        ("sec-ch-ua-platform", "\"Windows\""),
        ("sec-fetch-dest", "empty"),
        ("sec-fetch-mode", "cors"),
        ("sec-fetch-site", "same-site"),
        ("user-agent", USER_AGENT),
        ("x-requested-with", "XMLHttpRequest"),
    ];
    for (name, value) in pairs {
        headers.insert(
            HeaderName::from_static(name),
            HeaderValue::from_static(value),
        );
    }
    headers
}

impl MarketFiyatiProvider {
    pub fn new(cfg: UpstreamConfig) -> anyhow::Result<Self> {
        let http = Client::builder()
            .default_headers(browser_headers())
            .timeout(cfg.request_timeout)
            .build()?;
        Ok(Self {
            http,
            cfg: Arc::new(cfg),
        })
    }

    fn request_body<'a>(&self, category: &'a str, page: u32) -> SearchRequest<'a> {
        SearchRequest {
            menu_category: true,
            keywords: category,
            pages: page,
            size: self.cfg.page_size,
            latitude: self.cfg.latitude,
            longitude: self.cfg.longitude,
            distance: self.cfg.distance,
            depots: Vec::new(),
        }
    }

    /// One request, no retry. Timeouts surface as `UpstreamError::Net`.
    async fn fetch_once(&self, category: &str, page: u32) -> Result<Vec<RawListing>, UpstreamError> {
        let t0 = Instant::now();
        let resp = self
            .http
            .post(&self.cfg.base_url)
            .json(&self.request_body(category, page))
            .send()
            .await?;
        let status = resp.status();
        let body = resp.text().await?;
        debug!(
            category,
            page,
            status = status.as_u16(),
            body_len = body.len(),
            elapsed_ms = t0.elapsed().as_millis() as u64,
            "market search response"
        );
        if !status.is_success() {
            return Err(UpstreamError::Http {
                status: status.as_u16(),
                body: truncate_for_log(body, 500),
            });
        }
        let parsed: SearchResponse = serde_json::from_str(&body)?;
        Ok(parsed.into_listings())
    }

    /// Fetch one page of `category` with bounded retry.
    pub async fn fetch_page(
        &self,
        category: &str,
        page: u32,
    ) -> Result<Vec<RawListing>, UpstreamError> {
        let label = format!("{category}#{page}");
        let items = with_retries(&self.cfg.retry, &label, |_attempt| {
            self.fetch_once(category, page)
        })
        .await?;
        info!(category, page, items = items.len(), "market page fetched");
        Ok(items)
    }
}

#[async_trait]
impl PageSource for MarketFiyatiProvider {
    async fn fetch_page(
        &self,
        category: &str,
        page: u32,
    ) -> Result<Vec<RawListing>, UpstreamError> {
        MarketFiyatiProvider::fetch_page(self, category, page).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn http_err(status: u16) -> UpstreamError {
        UpstreamError::Http {
            status,
            body: String::new(),
        }
    }

    #[tokio::test]
    async fn retries_until_success() {
        let calls = AtomicU32::new(0);
        let out = with_retries(&RetryPolicy::immediate(4), "t", |attempt| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt < 2 {
                    Err(http_err(503))
                } else {
                    Ok(attempt)
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(out, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_attempt_ceiling() {
        let calls = AtomicU32::new(0);
        let err = with_retries(&RetryPolicy::immediate(4), "t", |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>(http_err(500)) }
        })
        .await
        .unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        match err {
            UpstreamError::Exhausted { attempts, last } => {
                assert_eq!(attempts, 4);
                assert!(matches!(*last, UpstreamError::Http { status: 500, .. }));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test]
    async fn zero_attempt_policy_still_tries_once() {
        let calls = AtomicU32::new(0);
        let res = with_retries(&RetryPolicy::immediate(0), "t", |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, UpstreamError>("ok") }
        })
        .await;
        assert_eq!(res.unwrap(), "ok");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn request_body_carries_category_and_geo() {
        let provider = MarketFiyatiProvider::new(UpstreamConfig::default()).unwrap();
        let body = provider.request_body("İçecek", 3);
        assert_eq!(body.keywords, "İçecek");
        assert_eq!(body.pages, 3);
        assert_eq!(body.size, 100);
        assert_eq!(body.distance, 2000);
        assert!(body.menu_category);
        assert!(body.depots.is_empty());
    }

    #[test]
    fn headers_look_like_a_browser() {
        let h = browser_headers();
        assert!(h
            .get("user-agent")
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ua| ua.contains("Chrome/131")));
        assert_eq!(h.get("origin").unwrap(), "https://marketfiyati.org.tr");
        assert_eq!(h.len(), 13);
    }

    /// How the local upstream answers every request.
    #[derive(Clone, Copy)]
    enum Reply {
        Status(u16, &'static str),
        Ok(&'static str),
        Stall,
    }

    async fn read_request(sock: &mut tokio::net::TcpStream) -> std::io::Result<()> {
        use tokio::io::AsyncReadExt;
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            let n = sock.read(&mut chunk).await?;
            if n == 0 {
                return Ok(());
            }
            buf.extend_from_slice(&chunk[..n]);
            let Some(head_end) = buf.windows(4).position(|w| w == b"\r\n\r\n") else {
                continue;
            };
            let head = String::from_utf8_lossy(&buf[..head_end]).to_ascii_lowercase();
            let body_len = head
                .lines()
                .find_map(|l| l.strip_prefix("content-length:"))
                .and_then(|v| v.trim().parse::<usize>().ok())
                .unwrap_or(0);
            if buf.len() >= head_end + 4 + body_len {
                return Ok(());
            }
        }
    }

    /// Serve `reply` on a local port; returns the endpoint URL and a hit counter.
    async fn upstream(reply: Reply) -> (String, Arc<AtomicU32>) {
        use tokio::io::AsyncWriteExt;
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = Arc::new(AtomicU32::new(0));
        let counter = hits.clone();
        tokio::spawn(async move {
            while let Ok((mut sock, _)) = listener.accept().await {
                let counter = counter.clone();
                tokio::spawn(async move {
                    if read_request(&mut sock).await.is_err() {
                        return;
                    }
                    counter.fetch_add(1, Ordering::SeqCst);
                    let (status, body) = match reply {
                        Reply::Status(code, body) => (code, body),
                        Reply::Ok(body) => (200, body),
                        Reply::Stall => {
                            tokio::time::sleep(std::time::Duration::from_secs(30)).await;
                            return;
                        }
                    };
                    let resp = format!(
                        "HTTP/1.1 {status} X\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                        body.len()
                    );
                    let _ = sock.write_all(resp.as_bytes()).await;
                    let _ = sock.shutdown().await;
                });
            }
        });
        (format!("http://{addr}/api/v2/searchByCategories"), hits)
    }

    fn provider_for(url: String) -> MarketFiyatiProvider {
        MarketFiyatiProvider::new(UpstreamConfig {
            base_url: url,
            request_timeout: std::time::Duration::from_millis(300),
            retry: RetryPolicy::immediate(4),
            ..UpstreamConfig::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn server_errors_are_retried_to_the_ceiling() {
        let (url, hits) = upstream(Reply::Status(500, "boom")).await;
        let err = provider_for(url).fetch_page("Temel Gıda", 0).await.unwrap_err();
        assert_eq!(hits.load(Ordering::SeqCst), 4);
        match err {
            UpstreamError::Exhausted { attempts, last } => {
                assert_eq!(attempts, 4);
                assert!(matches!(*last, UpstreamError::Http { status: 500, .. }));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test]
    async fn stalled_responses_time_out_each_attempt() {
        let (url, hits) = upstream(Reply::Stall).await;
        let err = provider_for(url).fetch_page("İçecek", 2).await.unwrap_err();
        assert_eq!(hits.load(Ordering::SeqCst), 4);
        match err {
            UpstreamError::Exhausted { attempts, last } => {
                assert_eq!(attempts, 4);
                assert!(matches!(&*last, UpstreamError::Net(e) if e.is_timeout()));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_content_is_an_empty_page() {
        let (url, hits) = upstream(Reply::Ok("{}")).await;
        let items = provider_for(url).fetch_page("Meyve ve Sebze", 5).await.unwrap();
        assert!(items.is_empty());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn bad_item_on_the_wire_keeps_its_neighbours() {
        let (url, hits) = upstream(Reply::Ok(
            r#"{"content":[{"id":"ok","title":"Un","productDepotInfoList":[{"marketAdi":"BİM","depotName":"Ulus","price":"31,90"}]},{"id":"odd","title":12345},7]}"#,
        ))
        .await;
        let items = provider_for(url).fetch_page("Temel Gıda", 0).await.unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].product_id().as_deref(), Some("ok"));
        assert_eq!(items[1].title.as_deref(), Some("12345"));
    }

    #[tokio::test]
    async fn unparseable_body_counts_as_a_failed_attempt() {
        let (url, hits) = upstream(Reply::Ok("<html>maintenance</html>")).await;
        let err = provider_for(url).fetch_page("Temel Gıda", 0).await.unwrap_err();
        assert_eq!(hits.load(Ordering::SeqCst), 4);
        assert!(matches!(err, UpstreamError::Exhausted { last, .. } if matches!(*last, UpstreamError::Json(_))));
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let s = truncate_for_log("ğğğğ".to_string(), 3);
        assert_eq!(s, "ğ…");
        assert_eq!(truncate_for_log("short".into(), 10), "short");
    }
}
