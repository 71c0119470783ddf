//! Shared HTTP plumbing for provider clients.
//!
//! Every request goes through [`ApiClient::send`], which attaches
//! authentication, applies the timeout and turns non-2xx/3xx statuses into
//! [`ProviderError::Http`]. Bodies are kept as parsed JSON when they parse
//! and as raw text otherwise, so callers decide how strict to be.

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use crate::error::{ProviderError, ProviderResult};

/// How requests are authenticated.
#[derive(Clone)]
pub(crate) enum Auth {
    Bearer(String),
    Header(HeaderName, String),
    Basic { username: String, password: String },
}

impl std::fmt::Debug for Auth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Auth::Bearer(_) => f.write_str("Bearer(***)"),
            Auth::Header(name, _) => write!(f, "Header({name}, ***)"),
            Auth::Basic { username, .. } => write!(f, "Basic({username}, ***)"),
        }
    }
}

/// A response body.
#[derive(Debug, Clone, PartialEq)]
pub enum ApiBody {
    Json(Value),
    Raw(String),
}

impl ApiBody {
    fn from_text(text: String) -> Self {
        match serde_json::from_str(&text) {
            Ok(value) => ApiBody::Json(value),
            Err(_) => ApiBody::Raw(text),
        }
    }

    /// Deserializes the body, failing with [`ProviderError::Decode`].
    pub fn parse<T: DeserializeOwned>(self, endpoint: &str) -> ProviderResult<T> {
        match self {
            ApiBody::Json(value) => {
                T::deserialize(&value).map_err(|e| ProviderError::Decode {
                    endpoint: endpoint.to_string(),
                    body: format!("{e}: {value}"),
                })
            }
            ApiBody::Raw(text) => Err(ProviderError::Decode {
                endpoint: endpoint.to_string(),
                body: text,
            }),
        }
    }
}

/// A successful response.
#[derive(Debug)]
pub struct ApiResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: ApiBody,
}

impl ApiResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

/// Thin authenticated wrapper around a [`reqwest::Client`].
#[derive(Debug, Clone)]
pub(crate) struct ApiClient {
    client: Client,
    base_url: String,
    auth: Auth,
    archive_timeout: Duration,
}

impl ApiClient {
    pub(crate) fn new(
        base_url: String,
        auth: Auth,
        default_headers: HeaderMap,
        timeout: Duration,
        archive_timeout: Duration,
    ) -> ProviderResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("reposync/", env!("CARGO_PKG_VERSION")))
            .default_headers(default_headers)
            .build()?;
        Ok(Self {
            client,
            base_url,
            auth,
            archive_timeout,
        })
    }

    /// Absolute endpoints (pagination links, archive hosts) pass through.
    fn url(&self, endpoint: &str) -> String {
        if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
            endpoint.to_string()
        } else {
            format!("{}{}", self.base_url, endpoint)
        }
    }

    fn request(&self, method: Method, endpoint: &str) -> RequestBuilder {
        let builder = self.client.request(method, self.url(endpoint));
        match &self.auth {
            Auth::Bearer(token) => builder.bearer_auth(token),
            Auth::Header(name, value) => builder.header(name.clone(), value.as_str()),
            Auth::Basic { username, password } => builder.basic_auth(username, Some(password)),
        }
    }

    async fn dispatch(
        &self,
        method: Method,
        endpoint: &str,
        builder: RequestBuilder,
    ) -> ProviderResult<reqwest::Response> {
        debug!("{} {}", method, endpoint);
        let response = builder.send().await?;
        let status = response.status();
        if status.is_success() || status.is_redirection() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(ProviderError::Http {
            status,
            method,
            endpoint: endpoint.to_string(),
            body,
        })
    }

    /// Sends a request, letting `build` add a body or headers.
    pub(crate) async fn send(
        &self,
        method: Method,
        endpoint: &str,
        build: impl FnOnce(RequestBuilder) -> RequestBuilder,
    ) -> ProviderResult<ApiResponse> {
        let builder = build(self.request(method.clone(), endpoint));
        let response = self.dispatch(method, endpoint, builder).await?;
        let status = response.status();
        let headers = response.headers().clone();
        let text = response.text().await?;
        Ok(ApiResponse {
            status,
            headers,
            body: ApiBody::from_text(text),
        })
    }

    pub(crate) async fn get(&self, endpoint: &str) -> ProviderResult<ApiResponse> {
        self.send(Method::GET, endpoint, |b| b).await
    }

    /// GET and deserialize.
    pub(crate) async fn get_json<T: DeserializeOwned>(&self, endpoint: &str) -> ProviderResult<T> {
        self.get(endpoint).await?.body.parse(endpoint)
    }

    /// GET returning the raw body bytes. `None` on 404.
    pub(crate) async fn get_bytes(
        &self,
        endpoint: &str,
        accept: Option<&'static str>,
    ) -> ProviderResult<Option<Vec<u8>>> {
        let mut builder = self.request(Method::GET, endpoint);
        if let Some(accept) = accept {
            builder = builder.header(reqwest::header::ACCEPT, HeaderValue::from_static(accept));
        }
        match self.dispatch(Method::GET, endpoint, builder).await {
            Ok(response) => Ok(Some(response.bytes().await?.to_vec())),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Downloads a repository archive with the longer archive timeout.
    pub(crate) async fn get_archive(&self, endpoint: &str) -> ProviderResult<Vec<u8>> {
        let builder = self
            .request(Method::GET, endpoint)
            .timeout(self.archive_timeout);
        let response = self.dispatch(Method::GET, endpoint, builder).await?;
        Ok(response.bytes().await?.to_vec())
    }

    /// HEAD request. 404 means absent; any other failure is an error.
    pub(crate) async fn exists(&self, endpoint: &str) -> ProviderResult<bool> {
        let builder = self.request(Method::HEAD, endpoint);
        match self.dispatch(Method::HEAD, endpoint, builder).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }
}

/// Percent-encodes each segment of a repository path, keeping `/`.
pub(crate) fn encode_path(path: &str) -> String {
    path.split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}
