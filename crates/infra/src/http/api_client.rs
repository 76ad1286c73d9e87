use std::time::Duration;

use anyhow::{Result, bail};
use reqwest::{
    Method, RequestBuilder, StatusCode,
    header::{ACCEPT, AUTHORIZATION},
};
use serde::Deserialize;
use tracing::error;
use url::Url;

const BODY_PREVIEW_LIMIT: usize = 512;

#[derive(Debug, Clone)]
pub struct ApiClientConfig {
    pub base_url: Url,
    pub token: Option<String>,
    pub timeout: Duration,
}

/// Non-2xx answer, already logged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedResponse {
    pub status: StatusCode,
    pub body: String,
}

impl FailedResponse {
    /// Human readable message from a `{message}` or `{error}` JSON body, falling back to the raw text.
    pub fn message(&self) -> String {
        #[derive(Deserialize)]
        struct ErrorBody {
            message: Option<String>,
            error: Option<String>,
        }

        serde_json::from_str::<ErrorBody>(&self.body)
            .ok()
            .and_then(|body| body.message.or(body.error))
            .filter(|message| !message.trim().is_empty())
            .unwrap_or_else(|| {
                if self.body.trim().is_empty() {
                    format!("status {}", self.status.as_u16())
                } else {
                    self.body.clone()
                }
            })
    }
}

/// Thin reqwest wrapper shared by the booking service and signing provider clients.
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: Url,
    token: Option<String>,
}

impl ApiClient {
    pub fn new(config: ApiClientConfig) -> Result<Self> {
        if config.base_url.cannot_be_a_base() {
            bail!("{} cannot be used as an API base url", config.base_url);
        }

        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()?;

        Ok(Self {
            http,
            base_url: config.base_url,
            token: config.token.filter(|token| !token.is_empty()),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Appends percent-encoded path segments to the base url.
    pub fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    pub fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let builder = self
            .http
            .request(method, url)
            .header(ACCEPT, "application/json");
        match &self.token {
            Some(token) => builder.header(AUTHORIZATION, format!("Bearer {token}")),
            None => builder,
        }
    }

    pub async fn ensure_success(
        resp: reqwest::Response,
        context: &str,
    ) -> std::result::Result<reqwest::Response, FailedResponse> {
        if resp.status().is_success() {
            return Ok(resp);
        }

        let status = resp.status();
        let url = resp.url().clone();
        let body = match resp.text().await {
            Ok(text) => text,
            Err(err) => format!("<failed to read response body: {err}>"),
        };

        error!(
            status = %status,
            url = %url,
            response_body = %preview(&body),
            context = %context,
            "api_client: request failed"
        );

        Err(FailedResponse { status, body })
    }
}

fn preview(body: &str) -> &str {
    if body.is_empty() {
        return "<empty response body>";
    }
    match body.char_indices().nth(BODY_PREVIEW_LIMIT) {
        Some((cut, _)) => &body[..cut],
        None => body,
    }
}
