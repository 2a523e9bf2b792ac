use crate::error::{Result, TrailError};
use async_trait::async_trait;
use std::time::Duration;

/// HTTP plumbing of the shared-log store
///
/// # Implementations
/// - [`HttpTransport`]: `reqwest` against the real store (optionally through a CORS relay)
/// - in-memory doubles in tests
#[async_trait]
pub trait Transport: Send + Sync {
    /// GET `url` and decode the body as JSON
    async fn get_json(&self, url: &str, no_cache: bool) -> Result<serde_json::Value>;

    /// POST a form-encoded body. Any 2xx status counts as success; the body
    /// is not inspected.
    async fn post_form(&self, url: &str, form: &[(&str, String)]) -> Result<()>;
}

pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Client with the configured request timeout; fails rather than
    /// falling back to a client without one
    pub fn new(timeout_secs: u64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .user_agent(concat!("trail_follow/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| TrailError::network(format!("cannot build HTTP client: {}", e)))?;

        Ok(HttpTransport { client })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn get_json(&self, url: &str, no_cache: bool) -> Result<serde_json::Value> {
        let mut request = self.client.get(url);
        if no_cache {
            request = request
                .header("Pragma", "no-cache")
                .header("Cache-Control", "no-cache");
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(TrailError::network(format!("GET {} returned {}", url, status.as_u16())));
        }

        response
            .json::<serde_json::Value>()
            .await
            .map_err(|e| TrailError::decode(format!("response is not JSON: {}", e)))
    }

    async fn post_form(&self, url: &str, form: &[(&str, String)]) -> Result<()> {
        let response = self.client.post(url).form(form).send().await?;
        let status = response.status();
        if status == 429 {
            log::warn!("Rate limited by shared-log store");
        }
        if !status.is_success() {
            return Err(TrailError::network(format!("POST {} returned {}", url, status.as_u16())));
        }
        Ok(())
    }
}
