use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use std::fmt;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::Config;

pub mod model;

pub use model::{BatchRequest, BatchResponse, HttpMethod, RequestBody};
use model::WireRequest;

const GRAPH_API_BASE: &str = "https://graph.facebook.com/";

/// Remote commerce graph batch endpoint.
#[async_trait]
pub trait GraphService: Send + Sync {
    /// Submit `requests` as one batch on behalf of `entity_id` (a catalog or
    /// product set owner). Returns one response per request, in order.
    async fn submit_batch(
        &self,
        entity_id: &str,
        access_token: &str,
        requests: &[BatchRequest],
    ) -> Result<Vec<BatchResponse>>;
}

#[derive(Clone)]
pub struct GraphClient {
    http: Client,
    base_url: Url,
    api_version: String,
}

impl fmt::Debug for GraphClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GraphClient")
            .field("base_url", &self.base_url)
            .field("api_version", &self.api_version)
            .finish_non_exhaustive()
    }
}

impl GraphClient {
    pub fn new(api_version: String) -> Result<Self> {
        let base_url = Url::parse(GRAPH_API_BASE).context("invalid default graph URL")?;
        Self::with_base_url(base_url, api_version, Duration::from_secs(60))
    }

    pub fn with_base_url(base_url: Url, api_version: String, timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .user_agent(concat!("catalog-sync/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            http,
            base_url,
            api_version,
        })
    }

    pub fn from_config(cfg: &Config) -> Result<Self> {
        let base_url = Url::parse(&cfg.graph.base_url).context("invalid graph.base_url")?;
        Self::with_base_url(
            base_url,
            cfg.graph.api_version.clone(),
            Duration::from_secs(cfg.graph.timeout_secs),
        )
    }

    pub fn build_batch_request(
        &self,
        access_token: &str,
        requests: &[BatchRequest],
    ) -> Result<reqwest::Request> {
        let endpoint = self
            .base_url
            .join(&format!("{}/", self.api_version.trim_matches('/')))
            .context("invalid graph base URL")?;
        let wire: Vec<WireRequest<'_>> = requests
            .iter()
            .map(|r| WireRequest {
                method: r.method,
                relative_url: &r.relative_url,
                body: r.body.as_ref().map(RequestBody::encode),
            })
            .collect();
        let batch = serde_json::to_string(&wire).context("failed to encode batch")?;
        self.http
            .post(endpoint)
            .form(&[
                ("access_token", access_token),
                ("include_headers", "false"),
                ("batch", batch.as_str()),
            ])
            .build()
            .context("failed to build graph batch request")
    }
}

/// Decode a batch response body. Items the remote could not complete come
/// back as `null`; they keep their position with code `0`.
pub(crate) fn parse_batch_response(body: &str) -> Result<Vec<BatchResponse>> {
    let items: Vec<Option<BatchResponse>> =
        serde_json::from_str(body).context("invalid graph batch response JSON")?;
    Ok(items
        .into_iter()
        .map(|item| {
            item.unwrap_or(BatchResponse {
                code: 0,
                body: String::new(),
            })
        })
        .collect())
}

#[async_trait]
impl GraphService for GraphClient {
    async fn submit_batch(
        &self,
        entity_id: &str,
        access_token: &str,
        requests: &[BatchRequest],
    ) -> Result<Vec<BatchResponse>> {
        let request = self.build_batch_request(access_token, requests)?;
        info!(url = %request.url(), entity_id, items = requests.len(), "submitting graph batch");

        let res = self
            .http
            .execute(request)
            .await
            .context("failed to reach graph API")?;
        let status = res.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let body = res.text().await.unwrap_or_default();
            warn!(entity_id, "rate limited by graph API: {}", body);
            return Err(anyhow!("received 429 from graph API: {}", body));
        }
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            warn!(entity_id, %status, "graph API error: {}", body);
            return Err(anyhow!("graph error {}: {}", status, body));
        }

        let body = res.text().await.context("failed to read graph response")?;
        debug!(entity_id, "graph batch response: {}", body);
        parse_batch_response(&body)
    }
}
