//! Output Retrieval collaborator: the pull side of the stream.
//!
//! Fresh refreshes call with `include_history = false`; history expansion
//! calls with `include_history = true` and a monotonically increasing line
//! limit.

use async_trait::async_trait;
use thiserror::Error;

use crate::config::Config;
use crate::protocol::OutputSnapshot;
use crate::session::Target;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("output request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("output request returned status {0}")]
    Status(reqwest::StatusCode),
}

#[async_trait]
pub trait OutputApi: Send + Sync {
    async fn get_output(
        &self,
        target: &Target,
        include_history: bool,
        lines: Option<u32>,
    ) -> Result<OutputSnapshot, ApiError>;
}

/// REST client for `GET /api/tmux/output`.
pub struct HttpOutputApi {
    base: String,
    client: reqwest::Client,
}

impl HttpOutputApi {
    pub fn new(config: &Config) -> Self {
        Self {
            base: config.http_base(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl OutputApi for HttpOutputApi {
    async fn get_output(
        &self,
        target: &Target,
        include_history: bool,
        lines: Option<u32>,
    ) -> Result<OutputSnapshot, ApiError> {
        let mut request = self
            .client
            .get(format!("{}/api/tmux/output", self.base))
            .query(&[("target", target.as_str())]);
        if include_history {
            request = request.query(&[("include_history", "true")]);
        }
        if let Some(lines) = lines {
            request = request.query(&[("lines", lines.to_string())]);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ApiError::Status(status));
        }
        Ok(response.json::<OutputSnapshot>().await?)
    }
}
