//! Calls to the local server.

use std::time::Duration;

use futures_util::TryStreamExt;
use reqwest::redirect::Policy;
use url::Url;

use crate::blob::{once_stream, ByteStream};
use crate::error::{RelayError, RelayResult};
use crate::protocol::{Headers, TunneledRequest};

/// Response from the local server, body still streaming.
pub struct LocalResponse {
    pub status: u16,
    pub headers: Headers,
    pub content_length: Option<u64>,
    pub body: ByteStream,
}

impl LocalResponse {
    /// Buffered response, mostly for tests.
    pub fn buffered(status: u16, headers: Headers, body: impl Into<bytes::Bytes>) -> Self {
        let body = body.into();
        Self {
            status,
            headers,
            content_length: Some(body.len() as u64),
            body: once_stream(body),
        }
    }
}

impl std::fmt::Debug for LocalResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalResponse")
            .field("status", &self.status)
            .field("content_length", &self.content_length)
            .finish()
    }
}

/// Replays tunneled requests against `scheme://host:port`. Redirects are not
/// followed and bodies are passed through without decompression.
#[derive(Clone)]
pub struct LocalForwarder {
    client: reqwest::Client,
    base: Url,
}

impl LocalForwarder {
    pub fn new(scheme: &str, host: &str, port: u16, timeout: Duration) -> RelayResult<Self> {
        let base = Url::parse(&format!("{}://{}:{}/", scheme, host, port))
            .map_err(|e| RelayError::UpstreamFetch(format!("invalid local address: {}", e)))?;
        let client = reqwest::Client::builder()
            .redirect(Policy::none())
            .timeout(timeout)
            .build()
            .map_err(|e| RelayError::UpstreamFetch(e.to_string()))?;
        Ok(Self { client, base })
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    /// Target for a tunneled request. Only the path and query of
    /// `original_url` are taken; scheme, host and port always come from the
    /// local address.
    pub fn local_url(&self, original_url: &str) -> Url {
        let without_fragment = original_url.split('#').next().unwrap_or_default();
        let (path, query) = match without_fragment.split_once('?') {
            Some((path, query)) => (path, Some(query)),
            None => (without_fragment, None),
        };
        let mut url = self.base.clone();
        if path.starts_with('/') {
            url.set_path(path);
        } else {
            url.set_path(&format!("/{}", path));
        }
        url.set_query(query);
        url
    }

    pub async fn forward(&self, request: TunneledRequest) -> RelayResult<LocalResponse> {
        let head = request.head;
        let url = self.local_url(&head.original_url);
        let method = reqwest::Method::from_bytes(head.method.as_bytes())
            .map_err(|_| RelayError::UpstreamFetch(format!("bad method {:?}", head.method)))?;

        let mut headers = head.headers;
        headers.strip_hop_by_hop();
        headers.remove("host");
        headers.remove("content-length");
        if !head.source_ip.is_empty() && !headers.contains("x-forwarded-for") {
            headers.insert("x-forwarded-for", head.source_ip.clone());
        }

        let mut builder = self
            .client
            .request(method, url)
            .headers(headers.to_header_map());
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| RelayError::UpstreamFetch(e.to_string()))?;

        let status = response.status().as_u16();
        let headers = Headers::from_header_map(response.headers());
        let content_length = response
            .headers()
            .get(reqwest::header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok());
        let body = response
            .bytes_stream()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e));

        Ok(LocalResponse {
            status,
            headers,
            content_length,
            body: Box::pin(body),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_is_built_from_parts() {
        let forwarder = LocalForwarder::new("http", "localhost", 3000, Duration::from_secs(10)).unwrap();
        assert_eq!(forwarder.base().as_str(), "http://localhost:3000/");
        assert_eq!(
            forwarder.base().join("/a/b?c=1").unwrap().as_str(),
            "http://localhost:3000/a/b?c=1"
        );
    }

    #[test]
    fn local_url_keeps_the_local_host() {
        let forwarder = LocalForwarder::new("http", "localhost", 3000, Duration::from_secs(10)).unwrap();
        assert_eq!(
            forwarder.local_url("/a/b?c=1#frag").as_str(),
            "http://localhost:3000/a/b?c=1"
        );
        assert_eq!(
            forwarder.local_url("//other-host/x?q=1").as_str(),
            "http://localhost:3000//other-host/x?q=1"
        );
        assert_eq!(
            forwarder.local_url("http://other-host:8080/x").as_str(),
            "http://localhost:3000/http://other-host:8080/x"
        );
        assert_eq!(forwarder.local_url("").as_str(), "http://localhost:3000/");
    }

    #[tokio::test]
    async fn network_path_reaches_the_local_server() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 4096];
            let n = socket.read(&mut buf).await.unwrap();
            let request = String::from_utf8_lossy(&buf[..n]).to_string();
            let line = request.lines().next().unwrap_or_default().to_string();
            let response = format!(
                "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                line.len(),
                line
            );
            socket.write_all(response.as_bytes()).await.unwrap();
        });

        let forwarder = LocalForwarder::new("http", "127.0.0.1", port, Duration::from_secs(5)).unwrap();
        let request = TunneledRequest {
            head: crate::protocol::RequestHead {
                source_ip: String::new(),
                headers: Headers::new(),
                original_url: "//127.0.0.1:1/secret?x=1".into(),
                method: "GET".into(),
            },
            body: None,
        };
        let response = forwarder.forward(request).await.unwrap();
        assert_eq!(response.status, 200);
        let body: Vec<bytes::Bytes> = response.body.try_collect().await.unwrap();
        assert_eq!(body.concat(), b"GET //127.0.0.1:1/secret?x=1 HTTP/1.1".to_vec());
    }

    #[tokio::test]
    async fn unreachable_server_is_an_upstream_error() {
        // Port 9 (discard) is not expected to be listening on loopback.
        let forwarder = LocalForwarder::new("http", "127.0.0.1", 9, Duration::from_secs(2)).unwrap();
        let request = TunneledRequest {
            head: crate::protocol::RequestHead {
                source_ip: String::new(),
                headers: Headers::new(),
                original_url: "/".into(),
                method: "GET".into(),
            },
            body: None,
        };
        let err = forwarder.forward(request).await.unwrap_err();
        assert!(matches!(err, RelayError::UpstreamFetch(_)));
        assert_eq!(err.status_code().as_u16(), 503);
    }
}
