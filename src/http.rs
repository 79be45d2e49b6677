//! HTTP collaborator.
//!
//! The crate needs HTTP for two things: fetching the channel configuration
//! and uploading error logs. Both go through [`HttpClient`] so tests and
//! hosts can swap the transport. [`ReqwestClient`] is the default.

use async_trait::async_trait;
use serde::de::DeserializeOwned;

use crate::constants::{HTTP_ERROR_BODY_LIMIT, HTTP_REQUEST_TIMEOUT};
use crate::error::{ChatError, DecodeError, TransportError};

/// HTTP method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    /// `GET`
    Get,
    /// `POST`
    Post,
}

/// A request handed to the collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    /// Method.
    pub method: Method,
    /// Absolute URL.
    pub url: String,
    /// Extra headers.
    pub headers: Vec<(String, String)>,
    /// Request body.
    pub body: Option<Vec<u8>>,
}

impl HttpRequest {
    /// A `GET` without headers.
    #[must_use]
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            url: url.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    /// A `POST` with a JSON body.
    #[must_use]
    pub fn post_json(url: impl Into<String>, body: &serde_json::Value) -> Self {
        Self {
            method: Method::Post,
            url: url.into(),
            headers: vec![("Content-Type".to_string(), "application/json".to_string())],
            body: Some(body.to_string().into_bytes()),
        }
    }
}

/// Status and body of a completed request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    /// Status code.
    pub status: u16,
    /// Raw body.
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// Whether the status is 2xx.
    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Turn a non-2xx response into [`TransportError::Http`].
    pub fn error_for_status(self) -> Result<Self, TransportError> {
        if self.is_success() {
            return Ok(self);
        }
        let mut body = String::from_utf8_lossy(&self.body).into_owned();
        if body.len() > HTTP_ERROR_BODY_LIMIT {
            let mut cut = HTTP_ERROR_BODY_LIMIT;
            while !body.is_char_boundary(cut) {
                cut -= 1;
            }
            body.truncate(cut);
        }
        Err(TransportError::Http {
            status: self.status,
            body,
        })
    }

    /// Decode the body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, DecodeError> {
        serde_json::from_slice(&self.body).map_err(|e| DecodeError::Json(e.to_string()))
    }
}

/// Performs HTTP requests.
#[async_trait]
pub trait HttpClient: Send + Sync {
    /// Perform `request`. Only transport failures are errors; any status is
    /// returned as a response.
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, TransportError>;
}

/// Perform a `GET` and decode a 2xx JSON body.
pub async fn get_json<T: DeserializeOwned>(
    client: &dyn HttpClient,
    url: &str,
) -> Result<T, ChatError> {
    let response = client
        .execute(HttpRequest::get(url))
        .await?
        .error_for_status()?;
    Ok(response.json()?)
}

/// [`HttpClient`] on top of `reqwest`.
#[derive(Debug, Clone)]
pub struct ReqwestClient {
    client: reqwest::Client,
}

impl ReqwestClient {
    /// A client with the default request timeout.
    pub fn new() -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(HTTP_REQUEST_TIMEOUT)
            .user_agent(concat!("chatline/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| TransportError::Request(format!("failed to build HTTP client: {e:#}")))?;
        Ok(Self { client })
    }

    /// Wrap an existing `reqwest` client.
    #[must_use]
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl HttpClient for ReqwestClient {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let mut builder = match request.method {
            Method::Get => self.client.get(&request.url),
            Method::Post => self.client.post(&request.url),
        };
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| TransportError::Request(format!("{e:#}")))?;
        let status = response.status().as_u16();
        let body = response
            .bytes()
            .await
            .map_err(|e| TransportError::Request(format!("failed to read body: {e:#}")))?;

        Ok(HttpResponse {
            status,
            body: body.to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_non_success_becomes_http_error() {
        let response = HttpResponse {
            status: 503,
            body: b"unavailable".to_vec(),
        };
        assert_eq!(
            response.error_for_status(),
            Err(TransportError::Http {
                status: 503,
                body: "unavailable".to_string()
            })
        );
    }

    #[test]
    fn test_long_error_body_is_truncated() {
        let response = HttpResponse {
            status: 500,
            body: "é".repeat(HTTP_ERROR_BODY_LIMIT).into_bytes(),
        };
        match response.error_for_status() {
            Err(TransportError::Http { body, .. }) => assert!(body.len() <= HTTP_ERROR_BODY_LIMIT),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_success_passes_through() {
        let response = HttpResponse {
            status: 204,
            body: Vec::new(),
        };
        assert!(response.clone().error_for_status().is_ok());
        assert!(response.is_success());
    }
}
