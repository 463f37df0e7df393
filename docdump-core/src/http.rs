//! Concrete [`crate::interfaces::HttpClient`] backed by `reqwest::blocking`.

use std::time::Duration;

use crate::interfaces::{HttpClient, HttpMethod, HttpResponse, TransportError};

/// Blocking HTTP client, one per worker thread (§4.F/§4.H). `reqwest`'s
/// blocking client keeps its own internal connection pool, so cloning it is
/// cheap and threads never share a single client instance.
pub struct ReqwestHttpClient {
    inner: reqwest::blocking::Client,
}

impl ReqwestHttpClient {
    /// `use_gzip` only controls whether callers choose to send
    /// `Accept-Encoding: gzip`; `reqwest`'s own transparent gzip decoding is
    /// always disabled here so the `Content-Encoding` header survives to the
    /// collection dumper / parallel writer, which decompress explicitly per
    /// spec.md §4.G step 4 / §4.H's writer thread.
    pub fn new(request_timeout: Duration, _use_gzip: bool) -> Result<Self, TransportError> {
        let inner = reqwest::blocking::Client::builder()
            .timeout(request_timeout)
            .gzip(false)
            .build()
            .map_err(|e| TransportError::Other(e.to_string()))?;
        Ok(Self { inner })
    }
}

struct ReqwestResponse {
    status: u16,
    headers: reqwest::header::HeaderMap,
    body: Vec<u8>,
}

impl HttpResponse for ReqwestResponse {
    fn status(&self) -> u16 {
        self.status
    }

    fn header(&self, name: &str) -> Option<String> {
        self.headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string())
    }

    fn body(&self) -> &[u8] {
        &self.body
    }
}

impl HttpClient for ReqwestHttpClient {
    fn request(
        &self,
        method: HttpMethod,
        url: &str,
        headers: &[(String, String)],
        body: Option<Vec<u8>>,
    ) -> Result<Box<dyn HttpResponse>, TransportError> {
        let method = match method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Delete => reqwest::Method::DELETE,
        };

        let mut builder = self.inner.request(method, url);
        for (name, value) in headers {
            builder = builder.header(name, value);
        }
        if let Some(body) = body {
            builder = builder.body(body);
        }

        let response = builder.send().map_err(classify_send_error)?;
        let status = response.status().as_u16();
        let response_headers = response.headers().clone();
        let body = response.bytes().map_err(classify_read_error)?.to_vec();

        Ok(Box::new(ReqwestResponse {
            status,
            headers: response_headers,
            body,
        }))
    }
}

fn classify_send_error(e: reqwest::Error) -> TransportError {
    if e.is_connect() {
        TransportError::Connect(e.to_string())
    } else if e.is_timeout() || e.is_request() {
        TransportError::Write(e.to_string())
    } else {
        TransportError::Other(e.to_string())
    }
}

fn classify_read_error(e: reqwest::Error) -> TransportError {
    if e.is_timeout() || e.is_body() || e.is_decode() {
        TransportError::Read(e.to_string())
    } else {
        TransportError::Other(e.to_string())
    }
}
