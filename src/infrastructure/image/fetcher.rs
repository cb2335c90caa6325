//! HTTP image downloads.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::debug;

use crate::domain::ports::{CacheError, CacheResult, ImageFetcherPort};

/// Downloads image bytes over HTTP(S).
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    http_client: reqwest::Client,
}

impl HttpFetcher {
    /// Creates a fetcher. Without a timeout the transport default applies.
    ///
    /// # Errors
    /// Returns error if the HTTP client cannot be created.
    pub fn new(timeout: Option<Duration>) -> CacheResult<Self> {
        let mut builder = reqwest::Client::builder()
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")));
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }

        let http_client = builder
            .build()
            .map_err(|e| CacheError::NetworkError(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self { http_client })
    }
}

#[async_trait]
impl ImageFetcherPort for HttpFetcher {
    async fn download(&self, url: &str) -> CacheResult<Bytes> {
        debug!(url = %url, "Downloading image");

        let response = self
            .http_client
            .get(url)
            .send()
            .await
            .map_err(|e| CacheError::NetworkError(format!("Request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(CacheError::NetworkError(format!(
                "HTTP {}: {}",
                response.status().as_u16(),
                response.status().canonical_reason().unwrap_or("Unknown")
            )));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| CacheError::NetworkError(format!("Failed to read body: {e}")))?;

        debug!(url = %url, size = bytes.len(), "Downloaded image");
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serves a single canned HTTP response and returns the URL to hit.
    async fn serve_once(status_line: &'static str, body: &'static [u8]) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 4096];
            let _ = socket.read(&mut buf).await;
            let header = format!(
                "HTTP/1.1 {status_line}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                body.len()
            );
            socket.write_all(header.as_bytes()).await.unwrap();
            socket.write_all(body).await.unwrap();
            socket.shutdown().await.unwrap();
        });

        format!("http://{addr}/image.png")
    }

    #[tokio::test]
    async fn test_download_success() {
        let url = serve_once("200 OK", b"image-bytes").await;
        let fetcher = HttpFetcher::new(Some(Duration::from_secs(5))).unwrap();

        let bytes = fetcher.download(&url).await.unwrap();

        assert_eq!(&bytes[..], b"image-bytes");
    }

    #[tokio::test]
    async fn test_non_success_status_is_network_error() {
        let url = serve_once("404 Not Found", b"missing").await;
        let fetcher = HttpFetcher::new(Some(Duration::from_secs(5))).unwrap();

        let result = fetcher.download(&url).await;

        match result {
            Err(CacheError::NetworkError(msg)) => assert!(msg.contains("404")),
            other => panic!("expected network error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_connection_refused_is_network_error() {
        // Bind then drop to get a port nothing listens on.
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };
        let fetcher = HttpFetcher::new(Some(Duration::from_secs(5))).unwrap();

        let result = fetcher.download(&format!("http://127.0.0.1:{port}/x.png")).await;

        assert!(matches!(result, Err(CacheError::NetworkError(_))));
    }

    #[tokio::test]
    async fn test_invalid_url_is_network_error() {
        let fetcher = HttpFetcher::new(None).unwrap();
        let result = fetcher.download("not a url").await;
        assert!(matches!(result, Err(CacheError::NetworkError(_))));
    }
}
