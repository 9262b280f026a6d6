//! Interactive report API client.
//!
//! This crate provides a lightweight client for the backend that executes a
//! test plan and exposes its report tree over HTTP. It focuses on:
//!
//! - Constructing an HTTP client with sensible defaults
//! - Validating the configured API root for safety
//! - Addressing plan, test, suite and testcase resources ([`ResourcePath`])
//! - Decoding node records and classifying failures ([`ApiError`])
//!
//! The viewer engine talks to the backend through the [`ReportBackend`]
//! trait; [`ReportClient`] is its HTTP implementation.
//!
//! # Example
//!
//! ```ignore
//! use iview_api::{ReportBackend, ReportClient, ResourcePath};
//!
//! async fn show() -> Result<(), iview_api::ApiError> {
//!     let client = ReportClient::new("http://localhost:8080/api/v1/interactive", std::time::Duration::from_secs(30), false)?;
//!     let plan = client.get_node(&ResourcePath::Report).await?;
//!     println!("{} is {}", plan.name, plan.status);
//!     Ok(())
//! }
//! ```

mod error;
mod resource;

use std::time::Duration;

use async_trait::async_trait;
use iview_types::{ReportNode, Status};
use reqwest::{Client, Method, RequestBuilder, StatusCode, Url, header};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

pub use error::ApiError;
pub use resource::ResourcePath;

/// Hostnames allowed to use plain http regardless of configuration.
const LOCALHOST_DOMAINS: &[&str] = &["localhost", "127.0.0.1", "::1", "[::1]"];

/// Longest response body excerpt kept in an [`ApiError::Status`].
const ERROR_BODY_LIMIT: usize = 512;

/// Body of a run-trigger request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunRequest {
    pub uid: String,
    pub status: Status,
}

impl RunRequest {
    pub fn running(uid: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            status: Status::Running,
        }
    }
}

/// Operations the viewer needs from the backend.
#[async_trait]
pub trait ReportBackend: Send + Sync {
    /// Read a single node record (shallow for groups, full for testcases).
    async fn get_node(&self, resource: &ResourcePath) -> Result<ReportNode, ApiError>;

    /// Read the ordered child records of `parent`.
    async fn list_children(&self, parent: &ResourcePath) -> Result<Vec<ReportNode>, ApiError>;

    /// Ask the backend to (re-)execute the subtree at `resource`.
    async fn trigger_run(&self, resource: &ResourcePath, request: &RunRequest) -> Result<ReportNode, ApiError>;
}

#[derive(Debug, Clone)]
/// Thin wrapper around a configured `reqwest::Client` for the interactive API.
pub struct ReportClient {
    pub base_url: String,
    pub http: Client,
    pub user_agent: String,
}

impl ReportClient {
    /// Build a client rooted at `base_url` (for example
    /// `http://localhost:8080/api/v1/interactive`).
    ///
    /// Non-localhost hosts must use HTTPS unless `allow_insecure` is set.
    pub fn new(base_url: &str, timeout: Duration, allow_insecure: bool) -> Result<Self, ApiError> {
        let base_url = base_url.trim_end_matches('/').to_string();
        validate_base_url(&base_url, allow_insecure)?;

        let mut default_headers = header::HeaderMap::new();
        default_headers.insert(header::ACCEPT, header::HeaderValue::from_static("application/json"));

        let http = Client::builder()
            .default_headers(default_headers)
            .timeout(timeout)
            .build()
            .map_err(|error| ApiError::InvalidBaseUrl {
                base: base_url.clone(),
                reason: format!("could not build http client: {error}"),
            })?;

        Ok(Self {
            base_url,
            http,
            user_agent: format!("iview/{}; {}", env!("CARGO_PKG_VERSION"), std::env::consts::OS),
        })
    }

    /// Build a `reqwest::RequestBuilder` for a method and API-relative path.
    pub fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        debug!(%method, %url, "building request");

        self.http.request(method, url).header(header::USER_AGENT, &self.user_agent)
    }

    async fn send_json<T: DeserializeOwned>(&self, resource: &str, builder: RequestBuilder) -> Result<T, ApiError> {
        let response = builder
            .send()
            .await
            .map_err(|error| ApiError::transport(resource, error.to_string()))?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|error| ApiError::transport(resource, error.to_string()))?;
        decode_response(resource, status, &text)
    }
}

/// Turn a response status and body into the expected record(s).
fn decode_response<T: DeserializeOwned>(resource: &str, status: StatusCode, text: &str) -> Result<T, ApiError> {
    if !status.is_success() {
        return Err(ApiError::Status {
            resource: resource.to_string(),
            code: status.as_u16(),
            body: truncate(text, ERROR_BODY_LIMIT),
        });
    }
    serde_json::from_str(text).map_err(|error| ApiError::malformed(resource, error.to_string()))
}

#[async_trait]
impl ReportBackend for ReportClient {
    async fn get_node(&self, resource: &ResourcePath) -> Result<ReportNode, ApiError> {
        let path = resource.url_path();
        self.send_json(&path, self.request(Method::GET, &path)).await
    }

    async fn list_children(&self, parent: &ResourcePath) -> Result<Vec<ReportNode>, ApiError> {
        let path = parent.children_url_path().ok_or_else(|| ApiError::UnsupportedDepth {
            depth: parent.depth() + 1,
            uid: parent.to_string(),
        })?;
        self.send_json(&path, self.request(Method::GET, &path)).await
    }

    async fn trigger_run(&self, resource: &ResourcePath, request: &RunRequest) -> Result<ReportNode, ApiError> {
        let path = resource.url_path();
        self.send_json(&path, self.request(Method::PUT, &path).json(request)).await
    }
}

/// Validate that a base URL is acceptable for use by the client.
///
/// Rules:
/// - the URL must parse and carry a host
/// - scheme must be http or https
/// - plain http is only accepted for loopback hosts, or when `allow_insecure` is set
pub fn validate_base_url(base: &str, allow_insecure: bool) -> Result<(), ApiError> {
    let invalid = |reason: String| ApiError::InvalidBaseUrl {
        base: base.to_string(),
        reason,
    };
    let parsed_base_url = Url::parse(base).map_err(|error| invalid(error.to_string()))?;

    let host_name = parsed_base_url
        .host_str()
        .ok_or_else(|| invalid("URL must include a host".into()))?;

    match parsed_base_url.scheme() {
        "https" => Ok(()),
        "http" => {
            let is_local = LOCALHOST_DOMAINS
                .iter()
                .any(|&allowed| host_name.eq_ignore_ascii_case(allowed));
            if is_local || allow_insecure {
                Ok(())
            } else {
                Err(invalid(format!("http is only allowed for localhost; got host '{host_name}'")))
            }
        }
        other => Err(invalid(format!("unsupported scheme '{other}://'"))),
    }
}

fn truncate(text: &str, limit: usize) -> String {
    match text.char_indices().nth(limit) {
        Some((index, _)) => format!("{}…", &text[..index]),
        None => text.to_string(),
    }
}
