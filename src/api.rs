// Gist API client: a small blocking HTTP client that creates one gist on
// GitHub's REST API. The credential, when there is one, comes from a
// `TokenSource` and is attached to every request.

use crate::auth::TokenSource;
use crate::files::FileMap;
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, USER_AGENT};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_API_URL: &str = "https://api.github.com";

/// Upper bound on the create call. Only this one request is bounded.
pub const CREATE_TIMEOUT: Duration = Duration::from_secs(5);

const USER_AGENT_VALUE: &str = concat!("gist-cli/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("building HTTP client: {0}")]
    Client(reqwest::Error),

    #[error("invalid access token: {0}")]
    Header(String),

    // reqwest already renders its own causes, so these carry no #[source].
    #[error("creating gist: {0}")]
    Transport(reqwest::Error),

    #[error("creating gist: {status} - {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("parsing gist response: {0}")]
    Decode(reqwest::Error),
}

/// Everything needed to create one gist. Consumed by a single call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GistRequest {
    pub description: Option<String>,
    pub public: bool,
    pub files: FileMap,
}

/// The created gist, as far as this program cares.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GistResult {
    pub url: String,
}

#[derive(Serialize, Debug)]
struct CreateGistBody<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<&'a str>,
    public: bool,
    files: BTreeMap<&'a str, CreateGistFile<'a>>,
}

#[derive(Serialize, Debug)]
struct CreateGistFile<'a> {
    content: &'a str,
}

#[derive(Deserialize, Debug)]
struct CreateGistResponse {
    html_url: String,
}

impl<'a> From<&'a GistRequest> for CreateGistBody<'a> {
    fn from(req: &'a GistRequest) -> Self {
        CreateGistBody {
            description: req.description.as_deref(),
            public: req.public,
            files: req
                .files
                .values()
                .map(|f| (f.filename.as_str(), CreateGistFile { content: &f.content }))
                .collect(),
        }
    }
}

/// Anything that can turn a `GistRequest` into a created gist.
pub trait GistService {
    fn create(&self, req: GistRequest) -> Result<GistResult, ApiError>;
}

/// reqwest-backed implementation talking to the GitHub REST API.
pub struct GistClient {
    client: Client,
    base_url: String,
    token: Option<Box<dyn TokenSource>>,
    timeout: Duration,
}

impl GistClient {
    /// Client that authenticates every request with `token`.
    pub fn authenticated(base_url: &str, token: Box<dyn TokenSource>) -> Result<Self, ApiError> {
        Self::build(base_url, Some(token))
    }

    /// Client that sends no credentials at all.
    pub fn anonymous(base_url: &str) -> Result<Self, ApiError> {
        Self::build(base_url, None)
    }

    fn build(base_url: &str, token: Option<Box<dyn TokenSource>>) -> Result<Self, ApiError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/vnd.github+json"),
        );
        headers.insert(USER_AGENT, HeaderValue::from_static(USER_AGENT_VALUE));

        let mut builder = Client::builder().default_headers(headers);
        if is_loopback(base_url) {
            builder = builder.no_proxy();
        }
        let client = builder.build().map_err(ApiError::Client)?;
        Ok(GistClient {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
            timeout: CREATE_TIMEOUT,
        })
    }

    /// Override the bound on the create call.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Authorization header for the current token, if this client has one.
    fn auth_headers(&self) -> Result<HeaderMap, ApiError> {
        let mut headers = HeaderMap::new();
        if let Some(source) = &self.token {
            let token = source
                .access_token()
                .map_err(|e| ApiError::Header(e.to_string()))?;
            let mut val = HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|e| ApiError::Header(e.to_string()))?;
            val.set_sensitive(true);
            headers.insert(AUTHORIZATION, val);
        }
        Ok(headers)
    }
}

fn is_loopback(base_url: &str) -> bool {
    reqwest::Url::parse(base_url)
        .ok()
        .and_then(|u| u.host_str().map(|h| matches!(h, "localhost" | "127.0.0.1" | "[::1]")))
        .unwrap_or(false)
}

impl GistService for GistClient {
    fn create(&self, req: GistRequest) -> Result<GistResult, ApiError> {
        let url = format!("{}/gists", self.base_url);
        tracing::debug!(
            %url,
            files = req.files.len(),
            public = req.public,
            authenticated = self.token.is_some(),
            "creating gist"
        );

        let res = self
            .client
            .post(&url)
            .headers(self.auth_headers()?)
            .json(&CreateGistBody::from(&req))
            .timeout(self.timeout)
            .send()
            .map_err(ApiError::Transport)?;

        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().unwrap_or_default();
            return Err(ApiError::Status { status, body });
        }
        let created: CreateGistResponse = res.json().map_err(ApiError::Decode)?;
        Ok(GistResult {
            url: created.html_url,
        })
    }
}
