//! Talking to the ArcGIS FeatureServer `query` endpoint.
//!
//! Every call is bounded by a single `tokio::time::timeout` covering connect,
//! headers, and body. When it fires the in-flight future is dropped, which
//! cancels the request. There are no retries.

use reqwest::{header, Url};
use std::time::Duration;
use tracing::{info, warn};

use crate::{
    config::ProxyConfig,
    envelope::{Feature, QueryResponse},
    error::ProxyError,
};

#[derive(Clone, Debug)]
pub struct UpstreamClient {
    http: reqwest::Client,
    endpoint: Url,
    timeout: Duration,
    result_record_count: Option<u32>,
}

impl UpstreamClient {
    pub fn new(config: &ProxyConfig) -> Result<Self, ProxyError> {
        let endpoint = Url::parse(&config.upstream_url)
            .map_err(|e| ProxyError::Internal(format!("bad upstream URL: {e}")))?;

        let http = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| ProxyError::Internal(format!("cannot build HTTP client: {e}")))?;

        Ok(UpstreamClient {
            http,
            endpoint,
            timeout: config.timeout(),
            result_record_count: config.result_record_count,
        })
    }

    /// The full upstream URL for a client-supplied `where` clause. The clause
    /// is forwarded verbatim; only URL-encoding is applied.
    pub fn query_url(&self, where_clause: &str) -> Url {
        let mut url = self.endpoint.clone();

        {
            let mut q = url.query_pairs_mut();
            q.append_pair("where", where_clause)
                .append_pair("outFields", "*")
                .append_pair("f", "json")
                .append_pair("returnGeometry", "false");

            if let Some(n) = self.result_record_count {
                q.append_pair("resultRecordCount", &n.to_string());
            }
        }

        url
    }

    fn count_url(&self) -> Url {
        let mut url = self.endpoint.clone();
        url.query_pairs_mut()
            .append_pair("where", "1=1")
            .append_pair("returnCountOnly", "true")
            .append_pair("f", "json");
        url
    }

    /// Run a feature query and return the `features` array, or an empty one
    /// if the service left it out.
    pub async fn query(&self, where_clause: &str) -> Result<Vec<Feature>, ProxyError> {
        let url = self.query_url(where_clause);
        info!(%url, "forwarding query to ArcGIS");

        let response = self.fetch(url, self.timeout).await?;
        Ok(response.features.unwrap_or_default())
    }

    /// Ask the service how many records the layer holds. Used by the
    /// diagnostics endpoint.
    pub async fn record_count(&self, bound: Duration) -> Result<Option<u64>, ProxyError> {
        let response = self.fetch(self.count_url(), bound).await?;
        Ok(response.count)
    }

    async fn fetch(&self, url: Url, bound: Duration) -> Result<QueryResponse, ProxyError> {
        match tokio::time::timeout(bound, self.fetch_unbounded(url)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(?bound, "ArcGIS request timed out");
                Err(ProxyError::Timeout)
            }
        }
    }

    async fn fetch_unbounded(&self, url: Url) -> Result<QueryResponse, ProxyError> {
        let resp = self
            .http
            .get(url)
            .header(header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(ProxyError::from_transport)?;

        let status = resp.status();

        if !status.is_success() {
            return Err(ProxyError::UpstreamHttp {
                status: status.as_u16(),
                reason: status.canonical_reason().unwrap_or("Unknown").to_owned(),
            });
        }

        let body = resp.bytes().await.map_err(ProxyError::from_transport)?;
        let parsed: QueryResponse =
            serde_json::from_slice(&body).map_err(ProxyError::UpstreamUnreadable)?;

        if let Some(err) = parsed.error {
            warn!(code = ?err.code, details = ?err.details, "ArcGIS reported an error");
            return Err(ProxyError::UpstreamData(err.describe()));
        }

        Ok(parsed)
    }
}
