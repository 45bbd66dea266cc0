use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use reqwest::StatusCode;
use url::Url;

// ── Constants ────────────────────────────────────────────────────────────────

/// The mobile site serves the plainest markup to iPad Safari.
pub const PAGE_USER_AGENT: &str = "Mozilla/5.0 (iPad; CPU OS 11_0 like Mac OS X) \
AppleWebKit/604.1.34 (KHTML, like Gecko) Version/11.0 Mobile/15A5341f Safari/604.1 \
Edg/88.0.4324.96";

// ── Error type ───────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("{0}")]
    Transport(String),
    #[error("failed to read response body: {0}")]
    Body(String),
    #[error("image returned {0}")]
    ImageStatus(StatusCode),
    #[error("image exceeds {limit} bytes")]
    TooLarge { limit: usize },
}

// ── Public types ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct FetchSettings {
    pub timeout: Duration,
    pub connect_timeout: Duration,
    pub max_image_bytes: usize,
    pub insecure: bool,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(5),
            max_image_bytes: 8 * 1024 * 1024,
            insecure: false,
        }
    }
}

/// A page response. Any status is returned; the caller decides what a
/// non-200 means.
#[derive(Debug, Clone)]
pub struct FetchedPage {
    pub status: StatusCode,
    pub content_type: Option<String>,
    pub body: String,
}

impl FetchedPage {
    /// Status line text, e.g. "404 Not Found".
    pub fn status_text(&self) -> String {
        match self.status.canonical_reason() {
            Some(reason) => format!("{} {}", self.status.as_u16(), reason),
            None => self.status.as_u16().to_string(),
        }
    }
}

#[async_trait]
pub trait Fetch: Send + Sync {
    async fn fetch_page(&self, url: &Url) -> Result<FetchedPage, FetchError>;
    async fn fetch_image(&self, url: &str) -> Result<Bytes, FetchError>;
}

// ── HTTP implementation ──────────────────────────────────────────────────────

/// Shared, read-only HTTP client for page and image requests.
#[derive(Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    max_image_bytes: usize,
}

impl HttpFetcher {
    pub fn new(settings: &FetchSettings) -> Result<Self, FetchError> {
        let mut builder = reqwest::ClientBuilder::new()
            .connect_timeout(settings.connect_timeout)
            .timeout(settings.timeout)
            .redirect(reqwest::redirect::Policy::limited(10));

        if settings.insecure {
            builder = builder.danger_accept_invalid_certs(true);
        }

        let client = builder
            .build()
            .map_err(|e| FetchError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            max_image_bytes: settings.max_image_bytes,
        })
    }
}

#[async_trait]
impl Fetch for HttpFetcher {
    async fn fetch_page(&self, url: &Url) -> Result<FetchedPage, FetchError> {
        let response = self
            .client
            .get(url.as_str())
            .header(reqwest::header::USER_AGENT, PAGE_USER_AGENT)
            .header(
                reqwest::header::ACCEPT,
                "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
            )
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.to_lowercase());

        // The body is consumed either way so the connection goes back to the pool.
        let body = response
            .text()
            .await
            .map_err(|e| FetchError::Body(e.to_string()))?;

        Ok(FetchedPage {
            status,
            content_type,
            body,
        })
    }

    async fn fetch_image(&self, url: &str) -> Result<Bytes, FetchError> {
        let mut response = self.client.get(url).send().await.map_err(transport_error)?;

        if !response.status().is_success() {
            return Err(FetchError::ImageStatus(response.status()));
        }

        let limit = self.max_image_bytes;
        if response.content_length().is_some_and(|len| len > limit as u64) {
            return Err(FetchError::TooLarge { limit });
        }

        // Content-Length may be absent or wrong; enforce the cap while reading.
        let mut body = BytesMut::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| FetchError::Body(e.to_string()))?
        {
            if body.len() + chunk.len() > limit {
                return Err(FetchError::TooLarge { limit });
            }
            body.extend_from_slice(&chunk);
        }
        Ok(body.freeze())
    }
}

fn transport_error(e: reqwest::Error) -> FetchError {
    if e.is_timeout() {
        FetchError::Transport(format!("TimeoutError: {}", e))
    } else if e.is_connect() {
        FetchError::Transport(format!("ConnectError: {}", e))
    } else {
        FetchError::Transport(format!("RequestError: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header_regex, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fetcher() -> HttpFetcher {
        HttpFetcher::new(&FetchSettings::default()).unwrap()
    }

    #[tokio::test]
    async fn page_request_carries_mobile_user_agent() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/story.php"))
            .and(header_regex("user-agent", r"^Mozilla/5\.0 \(iPad;"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_raw("<html><body>ok</body></html>", "text/html; charset=utf-8"),
            )
            .expect(1)
            .mount(&server)
            .await;

        let url = Url::parse(&format!("{}/story.php?id=1", server.uri())).unwrap();
        let page = fetcher().fetch_page(&url).await.unwrap();

        assert_eq!(page.status, StatusCode::OK);
        assert_eq!(page.content_type.as_deref(), Some("text/html; charset=utf-8"));
        assert!(page.body.contains("ok"));
    }

    #[tokio::test]
    async fn non_success_status_is_not_a_transport_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let url = Url::parse(&format!("{}/gone", server.uri())).unwrap();
        let page = fetcher().fetch_page(&url).await.unwrap();

        assert_eq!(page.status, StatusCode::NOT_FOUND);
        assert_eq!(page.status_text(), "404 Not Found");
    }

    #[tokio::test]
    async fn unreachable_host_is_a_transport_error() {
        // Nothing listens on the discard port.
        let url = Url::parse("http://127.0.0.1:9/story.php").unwrap();
        let err = fetcher().fetch_page(&url).await.unwrap_err();
        assert!(matches!(err, FetchError::Transport(_)));
    }

    fn impatient_fetcher() -> HttpFetcher {
        HttpFetcher::new(&FetchSettings {
            timeout: Duration::from_millis(200),
            ..FetchSettings::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn slow_page_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_raw("<html></html>", "text/html")
                    .set_delay(Duration::from_secs(2)),
            )
            .mount(&server)
            .await;

        let url = Url::parse(&format!("{}/story.php", server.uri())).unwrap();
        let err = impatient_fetcher().fetch_page(&url).await.unwrap_err();
        match err {
            FetchError::Transport(msg) => assert!(msg.starts_with("TimeoutError:"), "{msg}"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn slow_image_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(vec![0xFF, 0xD8])
                    .set_delay(Duration::from_secs(2)),
            )
            .mount(&server)
            .await;

        let err = impatient_fetcher()
            .fetch_image(&format!("{}/pic.jpg", server.uri()))
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Transport(msg) if msg.starts_with("TimeoutError:")));
    }

    #[tokio::test]
    async fn image_bytes_are_returned() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/pic.jpg"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0xFF, 0xD8, 0xFF]))
            .mount(&server)
            .await;

        let bytes = fetcher()
            .fetch_image(&format!("{}/pic.jpg", server.uri()))
            .await
            .unwrap();
        assert_eq!(&bytes[..], &[0xFFu8, 0xD8, 0xFF][..]);
    }

    #[tokio::test]
    async fn image_error_status_fails() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let err = fetcher()
            .fetch_image(&format!("{}/pic.jpg", server.uri()))
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::ImageStatus(StatusCode::FORBIDDEN)));
    }

    #[tokio::test]
    async fn oversized_image_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0u8; 64]))
            .mount(&server)
            .await;

        let small = HttpFetcher::new(&FetchSettings {
            max_image_bytes: 16,
            ..FetchSettings::default()
        })
        .unwrap();
        let err = small
            .fetch_image(&format!("{}/big.jpg", server.uri()))
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::TooLarge { limit: 16 }));
    }

    #[tokio::test]
    async fn chunked_image_over_the_cap_is_rejected() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        // Chunked encoding carries no Content-Length to check up front.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = [0u8; 1024];
            let _ = socket.read(&mut request).await;
            let mut response =
                b"HTTP/1.1 200 OK\r\nContent-Type: image/jpeg\r\nTransfer-Encoding: chunked\r\n\r\n"
                    .to_vec();
            for _ in 0..4 {
                response.extend_from_slice(b"10\r\n");
                response.extend_from_slice(&[0xAB; 16]);
                response.extend_from_slice(b"\r\n");
            }
            response.extend_from_slice(b"0\r\n\r\n");
            let _ = socket.write_all(&response).await;
        });

        let small = HttpFetcher::new(&FetchSettings {
            max_image_bytes: 40,
            ..FetchSettings::default()
        })
        .unwrap();
        let err = small
            .fetch_image(&format!("http://{addr}/stream.jpg"))
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::TooLarge { limit: 40 }));
    }

    #[tokio::test]
    async fn image_at_the_cap_is_accepted() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![7u8; 16]))
            .mount(&server)
            .await;

        let exact = HttpFetcher::new(&FetchSettings {
            max_image_bytes: 16,
            ..FetchSettings::default()
        })
        .unwrap();
        let bytes = exact
            .fetch_image(&format!("{}/exact.jpg", server.uri()))
            .await
            .unwrap();
        assert_eq!(bytes.len(), 16);
    }
}
