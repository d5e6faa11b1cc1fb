//! Async HTTP client wrapping reqwest.
//!
//! Used for the plain-GET acquisition fallback and for every per-resource
//! fetch (stylesheets, images, external SVGs). Retries once on 5xx and
//! falls back to HTTP/1.1 when a server trips over HTTP/2.

use anyhow::{bail, Result};
use std::time::Duration;

/// Browser-like user agent; several CDNs refuse obviously non-browser clients.
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
     AppleWebKit/537.36 (KHTML, like Gecko) \
     Chrome/131.0.0.0 Safari/537.36";

/// Response from an HTTP GET request.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    /// Final URL after redirects.
    pub final_url: String,
    /// HTTP status code.
    pub status: u16,
    /// Response body.
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Body decoded as UTF-8, replacing invalid sequences.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// HTTP client shared by acquisition and resource fetches.
#[derive(Clone)]
pub struct HttpClient {
    client: reqwest::Client,
    /// HTTP/1.1-only fallback client for sites that reject HTTP/2.
    h1_client: reqwest::Client,
}

impl HttpClient {
    /// Create a client with the given user agent and default timeout.
    pub fn new(user_agent: &str, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::limited(10))
            .user_agent(user_agent)
            .build()
            .unwrap_or_default();

        let h1_client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::limited(10))
            .user_agent(user_agent)
            .http1_only()
            .build()
            .unwrap_or_default();

        Self { client, h1_client }
    }

    /// Perform a GET request. Non-2xx statuses are returned, not raised.
    pub async fn get(&self, url: &str, timeout: Duration) -> Result<HttpResponse> {
        match self.get_inner(&self.client, url, timeout).await {
            Ok(resp) => Ok(resp),
            Err(e) => {
                let err_str = format!("{e:#}");
                if err_str.contains("http2")
                    || err_str.contains("protocol")
                    || err_str.contains("connection closed")
                {
                    self.get_inner(&self.h1_client, url, timeout).await
                } else {
                    Err(e)
                }
            }
        }
    }

    /// GET a URL and fail unless the response is 2xx.
    pub async fn get_ok(&self, url: &str, timeout: Duration) -> Result<HttpResponse> {
        let resp = self.get(url, timeout).await?;
        if !resp.is_success() {
            bail!("HTTP {} for {url}", resp.status);
        }
        Ok(resp)
    }

    async fn get_inner(
        &self,
        client: &reqwest::Client,
        url: &str,
        timeout: Duration,
    ) -> Result<HttpResponse> {
        let mut retries = 0u32;
        let max_retries = 1;

        loop {
            let resp = client.get(url).timeout(timeout).send().await;

            match resp {
                Ok(r) => {
                    let status = r.status().as_u16();

                    // Retry on 5xx
                    if status >= 500 && retries < max_retries {
                        retries += 1;
                        tokio::time::sleep(Duration::from_millis(300)).await;
                        continue;
                    }

                    let final_url = r.url().to_string();
                    let body = r.bytes().await?.to_vec();

                    return Ok(HttpResponse {
                        final_url,
                        status,
                        body,
                    });
                }
                Err(e) => {
                    if retries < max_retries && !e.is_timeout() {
                        retries += 1;
                        tokio::time::sleep(Duration::from_millis(300)).await;
                        continue;
                    }
                    return Err(e.into());
                }
            }
        }
    }

    /// GET many URLs with bounded concurrency, keeping input order.
    pub async fn get_many(
        &self,
        urls: &[String],
        concurrency: usize,
        timeout: Duration,
    ) -> Vec<(String, Result<HttpResponse>)> {
        use futures::stream::{self, StreamExt};

        stream::iter(urls.iter().cloned())
            .map(|url| {
                let client = self.clone();
                async move {
                    let result = client.get_ok(&url, timeout).await;
                    (url, result)
                }
            })
            .buffered(concurrency.max(1))
            .collect()
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_http_client_creation() {
        let client = HttpClient::new(DEFAULT_USER_AGENT, Duration::from_secs(5));
        let _ = client;
    }

    #[tokio::test]
    async fn test_get_ok_rejects_404() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/missing.png"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = HttpClient::new(DEFAULT_USER_AGENT, Duration::from_secs(5));
        let url = format!("{}/missing.png", server.uri());

        let resp = client.get(&url, Duration::from_secs(5)).await.unwrap();
        assert_eq!(resp.status, 404);
        assert!(client.get_ok(&url, Duration::from_secs(5)).await.is_err());
    }

    #[tokio::test]
    async fn test_get_many_keeps_order() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/a.css"))
            .respond_with(ResponseTemplate::new(200).set_body_string("a{}"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/b.css"))
            .respond_with(ResponseTemplate::new(200).set_body_string("b{}"))
            .mount(&server)
            .await;

        let client = HttpClient::new(DEFAULT_USER_AGENT, Duration::from_secs(5));
        let urls = vec![
            format!("{}/b.css", server.uri()),
            format!("{}/a.css", server.uri()),
        ];
        let results = client.get_many(&urls, 4, Duration::from_secs(5)).await;
        assert_eq!(results.len(), 2);
        assert!(results[0].0.ends_with("/b.css"));
        assert_eq!(results[0].1.as_ref().unwrap().text(), "b{}");
        assert_eq!(results[1].1.as_ref().unwrap().text(), "a{}");
    }
}
