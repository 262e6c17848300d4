//! The proxy handler.
//!
//! Takes a method and an optional `query` parameter, forwards the query to
//! ArcGIS as a `where` clause, and turns whatever comes back into a
//! `ProxyEnvelope` plus an HTTP status. This layer knows nothing about
//! Lambda event formats; see `Reply` for the conversion to responses.

use lambda_http::{
    http::{header::CONTENT_TYPE, Method, StatusCode},
    Body, Error, Response,
};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::{
    config::{CorsPolicy, ProxyConfig},
    envelope::ProxyEnvelope,
    error::ProxyError,
    upstream::UpstreamClient,
};

/// What we send back, before it's rendered into a particular response
/// format.
#[derive(Debug)]
pub struct Reply {
    pub status: StatusCode,
    pub body: Option<ReplyBody>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum ReplyBody {
    Envelope(ProxyEnvelope),
    Report(Value),
}

impl Reply {
    /// The CORS preflight answer: 200, no body.
    pub fn preflight() -> Self {
        Reply {
            status: StatusCode::OK,
            body: None,
        }
    }

    pub fn envelope(status: StatusCode, envelope: ProxyEnvelope) -> Self {
        Reply {
            status,
            body: Some(ReplyBody::Envelope(envelope)),
        }
    }

    pub fn error(err: &ProxyError) -> Self {
        Self::envelope(err.status_code(), ProxyEnvelope::failure(err))
    }

    pub fn envelope_ref(&self) -> Option<&ProxyEnvelope> {
        match &self.body {
            Some(ReplyBody::Envelope(e)) => Some(e),
            _ => None,
        }
    }

    fn body_text(&self) -> Result<Option<String>, serde_json::Error> {
        self.body.as_ref().map(serde_json::to_string).transpose()
    }

    /// Render as an HTTP response for `lambda_http`.
    pub fn into_response(self, cors: &CorsPolicy) -> Result<Response<Body>, Error> {
        let mut builder = Response::builder().status(self.status);

        for (name, value) in cors.headers() {
            builder = builder.header(name, value);
        }

        let body = match self.body_text()? {
            Some(text) => {
                builder = builder.header(CONTENT_TYPE, "application/json");
                Body::Text(text)
            }
            None => Body::Empty,
        };

        Ok(builder.body(body)?)
    }

    /// Render as a plain JSON value in the API Gateway proxy-response shape,
    /// for the "bare" runtime.
    pub fn into_bare_json(self, cors: &CorsPolicy) -> Result<Value, Error> {
        let mut headers = serde_json::Map::new();

        for (name, value) in cors.headers() {
            headers.insert(name.to_owned(), Value::String(value));
        }

        let body = match self.body_text()? {
            Some(text) => {
                headers.insert(
                    CONTENT_TYPE.as_str().to_owned(),
                    Value::String("application/json".to_owned()),
                );
                text
            }
            None => String::new(),
        };

        Ok(json!({
            "statusCode": self.status.as_u16(),
            "headers": headers,
            "body": body,
        }))
    }
}

#[derive(Clone, Debug)]
pub struct ProxyHandler {
    upstream: UpstreamClient,
    cors: CorsPolicy,
    include_query_in_metadata: bool,
}

impl ProxyHandler {
    pub fn new(config: &ProxyConfig) -> Result<Self, ProxyError> {
        Ok(ProxyHandler {
            upstream: UpstreamClient::new(config)?,
            cors: config.cors.clone(),
            include_query_in_metadata: config.include_query_in_metadata,
        })
    }

    pub fn cors(&self) -> &CorsPolicy {
        &self.cors
    }

    pub fn upstream(&self) -> &UpstreamClient {
        &self.upstream
    }

    /// Handle one inbound request.
    pub async fn handle(&self, method: &Method, query: Option<&str>) -> Reply {
        info!(%method, query = query.unwrap_or(""), "proxy request");

        if *method == Method::OPTIONS {
            return Reply::preflight();
        }

        let result = self.forward(method, query).await;

        match result {
            Ok(envelope) => {
                let count = envelope.metadata.as_ref().map(|m| m.count).unwrap_or(0);
                info!(count, "proxy request succeeded");
                Reply::envelope(StatusCode::OK, envelope)
            }

            Err(err) => {
                let status = err.status_code();

                match &err {
                    ProxyError::Transport(e) => {
                        warn!(%status, error = %e, "proxy request failed: transport")
                    }
                    ProxyError::UpstreamUnreadable(e) => {
                        warn!(%status, error = %e, "proxy request failed: unreadable upstream body")
                    }
                    ProxyError::Internal(detail) => {
                        warn!(%status, error = %detail, "proxy request failed: internal")
                    }
                    _ => warn!(%status, error = %err, "proxy request failed"),
                }

                Reply::error(&err)
            }
        }
    }

    async fn forward(
        &self,
        method: &Method,
        query: Option<&str>,
    ) -> Result<ProxyEnvelope, ProxyError> {
        if !self.cors.allows(method) {
            return Err(ProxyError::MethodNotAllowed);
        }

        let query = match query {
            Some(q) if !q.is_empty() => q,
            _ => return Err(ProxyError::MissingQuery),
        };

        let features = self.upstream.query(query).await?;
        let echoed = self.include_query_in_metadata.then(|| query.to_owned());
        Ok(ProxyEnvelope::success(features, echoed))
    }
}
