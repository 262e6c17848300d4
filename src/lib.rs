//! The Philadelphia lead-certification lookup Lambda.
//!
//! This library crate implements a small proxy in front of the city's
//! ArcGIS FeatureServer layer of lead-safe / lead-free certifications, plus
//! the client-side lookup logic that talks to it. The common codebase is
//! compiled into three executables:
//!
//! - `lead-lookup-proxyevent`, for the actual cloud deployment behind API
//!   Gateway or a function URL;
//! - `lead-lookup-bare`, a plain JSON-in, JSON-out Lambda that's handy for
//!   local testing;
//! - `lead-lookup-oneshot`, which runs a single proxy query, account lookup,
//!   or self-test from the command line.
//!
//! The browser can't query ArcGIS directly from every deployment (CORS,
//! content-security policies), which is the whole reason the proxy exists.
//! It adds CORS headers to everything it sends, including errors.

use lambda_http::{
    http::{header::USER_AGENT, Method, StatusCode},
    Body, Error, Request, RequestExt, Response,
};
use serde::Deserialize;
use serde_json::Value;
use tracing_subscriber::EnvFilter;

pub mod config;
pub mod diagnostics;
pub mod envelope;
pub mod error;
pub mod lookup;
pub mod proxy;
pub mod upstream;

use config::ProxyConfig;
use diagnostics::RequestInfo;
use error::ProxyError;
use proxy::{ProxyHandler, Reply, ReplyBody};

/// A request, independent of which Lambda event format it arrived in.
#[derive(Debug)]
pub struct Inbound {
    pub method: Method,
    pub path: String,
    pub query: Option<String>,
    pub uri: String,
    pub user_agent: Option<String>,
}

/// Payload accepted by the "bare" runtime.
#[derive(Debug, Default, Deserialize)]
struct BareRequest {
    #[serde(default)]
    method: Option<String>,

    #[serde(default)]
    path: Option<String>,

    #[serde(default)]
    query: Option<String>,
}

pub struct Services {
    proxy: ProxyHandler,
    region: Option<String>,
}

impl Services {
    /// Set up logging and build the services from the Lambda environment.
    pub fn init() -> Result<Self, Error> {
        init_logging();
        let config = ProxyConfig::from_env()?;
        Ok(Self::new(&config)?)
    }

    /// Build the services from an explicit configuration.
    pub fn new(config: &ProxyConfig) -> Result<Self, ProxyError> {
        Ok(Services {
            proxy: ProxyHandler::new(config)?,
            region: config.region.clone(),
        })
    }

    /// Route a request. Anything whose path ends in `/test` is the self-test;
    /// everything else is the proxy.
    pub async fn respond(&self, inbound: Inbound) -> Reply {
        if !inbound.path.trim_end_matches('/').ends_with("/test") {
            return self
                .proxy
                .handle(&inbound.method, inbound.query.as_deref())
                .await;
        }

        if inbound.method == Method::OPTIONS {
            return Reply::preflight();
        }

        if !self.proxy.cors().allows(&inbound.method) {
            return Reply::error(&ProxyError::MethodNotAllowed);
        }

        let report = diagnostics::report(
            self.proxy.upstream(),
            self.region.as_deref(),
            RequestInfo {
                method: inbound.method.to_string(),
                uri: inbound.uri,
                user_agent: inbound.user_agent,
            },
        )
        .await;

        Reply {
            status: StatusCode::OK,
            body: Some(ReplyBody::Report(report)),
        }
    }

    /// Handle an API Gateway / function URL event.
    pub async fn dispatch(&self, req: Request) -> Result<Response<Body>, Error> {
        let params = req.query_string_parameters();

        let inbound = Inbound {
            method: req.method().clone(),
            path: req.uri().path().to_owned(),
            query: params.first("query").map(str::to_owned),
            uri: req.uri().to_string(),
            user_agent: req
                .headers()
                .get(USER_AGENT)
                .and_then(|v| v.to_str().ok())
                .map(str::to_owned),
        };

        self.respond(inbound)
            .await
            .into_response(self.proxy.cors())
    }

    /// Handle a "bare" JSON payload of the form
    /// `{"method": "GET", "path": "/proxy", "query": "..."}`, answering in
    /// the API Gateway proxy-response shape.
    pub async fn dispatch_bare(&self, payload: Option<Value>) -> Result<Value, Error> {
        let request: BareRequest = match payload {
            Some(v) => serde_json::from_value(v)?,
            None => BareRequest::default(),
        };

        let method = request.method.as_deref().unwrap_or("GET");

        let reply = match Method::from_bytes(method.to_ascii_uppercase().as_bytes()) {
            Ok(method) => {
                let path = request.path.unwrap_or_else(|| "/proxy".to_owned());

                self.respond(Inbound {
                    method,
                    uri: path.clone(),
                    path,
                    query: request.query,
                    user_agent: None,
                })
                .await
            }

            Err(_) => Reply::error(&ProxyError::MethodNotAllowed),
        };

        reply.into_bare_json(self.proxy.cors())
    }
}

/// Logs go to CloudWatch, which timestamps them itself. `RUST_LOG` overrides
/// the default INFO level.
fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    // A second initialization (e.g. in tests) is harmless; keep the first.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false) // don't print the module name
        .without_time()
        .try_init();
}
