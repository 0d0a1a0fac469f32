//! HTTP fetcher used by detection strategies and draft creation

use std::time::Duration;

use serde_json::Value;

use crosspost_core::prelude::*;
use crosspost_core::HttpMethod;

/// Default timeout applied when a request does not carry its own
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(8);

const USER_AGENT: &str = concat!("crosspost/", env!("CARGO_PKG_VERSION"));

/// A request with credentials already attached by the caller
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
    pub timeout: Option<Duration>,
}

impl HttpRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: HttpMethod::Get,
            url: url.into(),
            headers: Vec::new(),
            body: None,
            timeout: None,
        }
    }

    pub fn post(url: impl Into<String>, body: Option<String>) -> Self {
        Self {
            method: HttpMethod::Post,
            body,
            ..Self::get(url)
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Value of the first header named `name` (case-insensitive)
    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Response after redirects were followed
#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    /// URL of the last hop
    pub final_url: String,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json(&self) -> Result<Value> {
        Ok(serde_json::from_slice(&self.body)?)
    }
}

/// Network access for detection and draft creation
#[trait_variant::make(HttpFetcher: Send)]
pub trait LocalHttpFetcher {
    /// Perform the request
    ///
    /// Non-2xx statuses are returned as responses; transport failures and
    /// timeouts are errors.
    async fn fetch(&self, request: HttpRequest) -> Result<HttpResponse>;
}

/// [`HttpFetcher`] backed by a shared reqwest client
#[derive(Debug, Clone)]
pub struct ReqwestFetcher {
    client: reqwest::Client,
    default_timeout: Duration,
}

impl ReqwestFetcher {
    pub fn new(default_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(default_timeout)
            .build()
            .map_err(|e| Error::http(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            default_timeout,
        })
    }
}

impl HttpFetcher for ReqwestFetcher {
    async fn fetch(&self, request: HttpRequest) -> Result<HttpResponse> {
        let timeout = request.timeout.unwrap_or(self.default_timeout);
        let method = match request.method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
        };

        let mut builder = self.client.request(method, &request.url).timeout(timeout);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        debug!("HTTP {} {}", request.method.as_str(), request.url);
        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                Error::timeout(&request.url, timeout)
            } else {
                Error::http(format!("{} {}: {e}", request.method.as_str(), request.url))
            }
        })?;

        let status = response.status().as_u16();
        let final_url = response.url().to_string();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response.bytes().await.map_err(|e| {
            if e.is_timeout() {
                Error::timeout(&request.url, timeout)
            } else {
                Error::http(format!("Failed to read body from {}: {e}", request.url))
            }
        })?;

        trace!("HTTP {} -> {} ({} bytes)", request.url, status, body.len());
        Ok(HttpResponse {
            status,
            final_url,
            content_type,
            body: body.to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{Duration, Error, HttpFetcher, HttpRequest, ReqwestFetcher};
    use wiremock::matchers::{body_string, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fetcher() -> ReqwestFetcher {
        ReqwestFetcher::new(Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn test_fetch_json_with_cookie_header() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/user_api/v1/user/get"))
            .and(header("Cookie", "sessionid=abc"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"err_no": 0, "data": {"user_id": "42"}})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let request = HttpRequest::get(format!("{}/user_api/v1/user/get", server.uri()))
            .header("Cookie", "sessionid=abc");
        let response = fetcher().fetch(request).await.unwrap();

        assert!(response.is_success());
        assert_eq!(response.json().unwrap()["data"]["user_id"], "42");
    }

    #[tokio::test]
    async fn test_non_success_status_is_a_response() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v4/me"))
            .respond_with(ResponseTemplate::new(401).set_body_string("unauthorized"))
            .mount(&server)
            .await;

        let response = fetcher()
            .fetch(HttpRequest::get(format!("{}/api/v4/me", server.uri())))
            .await
            .unwrap();

        assert_eq!(response.status, 401);
        assert!(!response.is_success());
        assert!(response.json().is_err());
        assert_eq!(response.text(), "unauthorized");
    }

    #[tokio::test]
    async fn test_post_sends_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/draft/create"))
            .and(body_string("{}"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"code": 0, "data": {"id": 7}})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let request = HttpRequest::post(
            format!("{}/api/v1/draft/create", server.uri()),
            Some("{}".to_string()),
        )
        .header("Content-Type", "application/json");
        let response = fetcher().fetch(request).await.unwrap();
        assert_eq!(response.json().unwrap()["data"]["id"], 7);
    }

    #[tokio::test]
    async fn test_timeout_maps_to_timeout_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(3)))
            .mount(&server)
            .await;

        let request =
            HttpRequest::get(format!("{}/slow", server.uri())).timeout(Duration::from_millis(100));
        let err = fetcher().fetch(request).await.unwrap_err();
        assert!(matches!(err, Error::Timeout { .. }), "got {err:?}");
    }

    #[tokio::test]
    async fn test_final_url_follows_redirect() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/me/stats"))
            .respond_with(
                ResponseTemplate::new(302)
                    .insert_header("Location", format!("{}/m/signin", server.uri()).as_str()),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/m/signin"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>sign in</html>"))
            .mount(&server)
            .await;

        let response = fetcher()
            .fetch(HttpRequest::get(format!("{}/me/stats", server.uri())))
            .await
            .unwrap();
        assert!(response.final_url.ends_with("/m/signin"));
    }

    #[test]
    fn test_header_value_is_case_insensitive() {
        let request = HttpRequest::get("https://x.com").header("Referer", "https://x.com/");
        assert_eq!(request.header_value("referer"), Some("https://x.com/"));
        assert_eq!(request.header_value("cookie"), None);
    }
}
