//! Explicit configuration for the proxy and the lookup client.
//!
//! Nothing in the request path reads the process environment. `Services` is
//! handed a `ProxyConfig` when it's constructed, and `ProxyConfig::from_env()`
//! is the one place where Lambda environment variables are consulted.

use anyhow::{anyhow, Context, Result};
use lambda_http::http::Method;
use reqwest::Url;
use std::{env, time::Duration};

/// The public Lead Hazard & Healthy Homes certification layer.
pub const DEFAULT_UPSTREAM_URL: &str = "https://services.arcgis.com/fLeGjb7u4uXqeF9q/arcgis/rest/services/lhhp_lead_certifications/FeatureServer/0/query";

pub const DEFAULT_USER_AGENT: &str = "PhiladelphiaLeadTracker/1.0";

/// Upper bound on the proxy-to-upstream wait. Function URLs and API Gateway
/// cut us off not long after this, so there's no point in allowing more.
pub const MAX_UPSTREAM_TIMEOUT: Duration = Duration::from_secs(30);

pub const MIN_UPSTREAM_TIMEOUT: Duration = Duration::from_secs(1);

/// Client-side wait when going through the proxy.
pub const PROXIED_LOOKUP_TIMEOUT: Duration = Duration::from_secs(30);

/// Client-side wait when talking straight to an ArcGIS-compatible endpoint.
pub const DIRECT_LOOKUP_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CorsPolicy {
    pub allow_origin: String,
    pub allow_methods: Vec<Method>,
    pub allow_headers: Vec<String>,
}

impl Default for CorsPolicy {
    fn default() -> Self {
        CorsPolicy {
            allow_origin: "*".to_owned(),
            allow_methods: vec![Method::GET, Method::OPTIONS],
            allow_headers: vec!["Content-Type".to_owned()],
        }
    }
}

impl CorsPolicy {
    /// Whether an inbound method passes the method check.
    pub fn allows(&self, method: &Method) -> bool {
        self.allow_methods.contains(method)
    }

    /// The header name/value pairs attached to every response.
    pub fn headers(&self) -> [(&'static str, String); 3] {
        let methods = self
            .allow_methods
            .iter()
            .map(Method::as_str)
            .collect::<Vec<_>>()
            .join(", ");

        [
            ("Access-Control-Allow-Origin", self.allow_origin.clone()),
            ("Access-Control-Allow-Methods", methods),
            ("Access-Control-Allow-Headers", self.allow_headers.join(", ")),
        ]
    }
}

#[derive(Clone, Debug)]
pub struct ProxyConfig {
    pub upstream_url: String,
    pub(crate) timeout: Duration,
    pub result_record_count: Option<u32>,
    pub user_agent: String,
    pub include_query_in_metadata: bool,
    pub cors: CorsPolicy,
    pub region: Option<String>,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        ProxyConfig {
            upstream_url: DEFAULT_UPSTREAM_URL.to_owned(),
            timeout: MAX_UPSTREAM_TIMEOUT,
            result_record_count: None,
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            include_query_in_metadata: true,
            cors: CorsPolicy::default(),
            region: None,
        }
    }
}

impl ProxyConfig {
    /// Build a configuration pointing at a specific upstream query endpoint.
    pub fn new<S: AsRef<str>>(upstream_url: S) -> Result<Self> {
        let upstream_url = upstream_url.as_ref();
        Url::parse(upstream_url)
            .with_context(|| format!("invalid upstream URL `{upstream_url}`"))?;

        Ok(ProxyConfig {
            upstream_url: upstream_url.to_owned(),
            ..Default::default()
        })
    }

    /// Load overrides from the Lambda environment. Unset variables keep their
    /// defaults; malformed ones are a startup error.
    pub fn from_env() -> Result<Self> {
        let mut config = match env::var("LEAD_PROXY_UPSTREAM_URL") {
            Ok(url) => ProxyConfig::new(url)?,
            Err(_) => ProxyConfig::default(),
        };

        if let Ok(text) = env::var("LEAD_PROXY_TIMEOUT_SECS") {
            let secs: u64 = text
                .parse()
                .with_context(|| format!("LEAD_PROXY_TIMEOUT_SECS: bad value `{text}`"))?;
            config = config.with_timeout(Duration::from_secs(secs));
        }

        if let Ok(text) = env::var("LEAD_PROXY_RESULT_RECORD_COUNT") {
            let n: u32 = text
                .parse()
                .with_context(|| format!("LEAD_PROXY_RESULT_RECORD_COUNT: bad value `{text}`"))?;

            if n == 0 {
                return Err(anyhow!("LEAD_PROXY_RESULT_RECORD_COUNT must be positive"));
            }

            config.result_record_count = Some(n);
        }

        if let Ok(ua) = env::var("LEAD_PROXY_USER_AGENT") {
            config.user_agent = ua;
        }

        if let Ok(text) = env::var("LEAD_PROXY_INCLUDE_QUERY") {
            config.include_query_in_metadata = parse_flag(&text)
                .ok_or_else(|| anyhow!("LEAD_PROXY_INCLUDE_QUERY: bad value `{text}`"))?;
        }

        config.region = env::var("AWS_REGION").ok();
        Ok(config)
    }

    /// Set the upstream wait, clamped to the supported range.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout.clamp(MIN_UPSTREAM_TIMEOUT, MAX_UPSTREAM_TIMEOUT);
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

fn parse_flag(text: &str) -> Option<bool> {
    match text.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Where the lookup client sends its queries.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LookupTarget {
    /// The lead-lookup proxy: `?query=<where>`, answered with an envelope.
    Proxy,

    /// An ArcGIS FeatureServer `query` endpoint, answered with `{features}`.
    Direct,
}

/// Settings for the lookup client.
#[derive(Clone, Debug)]
pub struct LookupConfig {
    pub endpoint: Url,
    pub target: LookupTarget,
    pub timeout: Duration,
}

impl LookupConfig {
    /// A client that goes through the lead-lookup proxy.
    pub fn proxied<S: AsRef<str>>(proxy_url: S) -> Result<Self> {
        let proxy_url = proxy_url.as_ref();

        Ok(LookupConfig {
            endpoint: Url::parse(proxy_url)
                .with_context(|| format!("invalid proxy URL `{proxy_url}`"))?,
            target: LookupTarget::Proxy,
            timeout: PROXIED_LOOKUP_TIMEOUT,
        })
    }

    /// A client that queries an ArcGIS FeatureServer endpoint itself, with
    /// the shorter wait used for direct calls.
    pub fn direct<S: AsRef<str>>(arcgis_url: S) -> Result<Self> {
        let arcgis_url = arcgis_url.as_ref();

        Ok(LookupConfig {
            endpoint: Url::parse(arcgis_url)
                .with_context(|| format!("invalid ArcGIS URL `{arcgis_url}`"))?,
            target: LookupTarget::Direct,
            timeout: DIRECT_LOOKUP_TIMEOUT,
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}
