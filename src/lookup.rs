//! The lookup client: from a user-typed OPA account number to a
//! certification record.
//!
//! This is the logic behind the lookup form. `LookupClient` does one search;
//! `LookupSession` carries the form state (input, pending flag, outcome)
//! across searches. Rendering is someone else's problem.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use reqwest::{header, Url};
use serde_json::{Map, Value};
use std::{collections::HashMap, time::Duration};
use tracing::{info, warn};

use crate::{
    config::{LookupConfig, LookupTarget, ProxyConfig},
    envelope::{Feature, ProxyEnvelope},
    error::LookupError,
    upstream::UpstreamClient,
};

pub const MIN_ACCOUNT_DIGITS: usize = 8;
pub const MAX_ACCOUNT_DIGITS: usize = 10;

pub const NOT_FOUND_MESSAGE: &str =
    "Unknown OPA number - no property record found in the Philadelphia database";

/// Strip everything that isn't an ASCII digit.
pub fn clean_account_number(input: &str) -> String {
    input.chars().filter(|c| c.is_ascii_digit()).collect()
}

/// Returns the cleaned digits if there are 8 to 10 of them.
pub fn validate_account_number(input: &str) -> Result<String, LookupError> {
    let digits = clean_account_number(input);

    if (MIN_ACCOUNT_DIGITS..=MAX_ACCOUNT_DIGITS).contains(&digits.len()) {
        Ok(digits)
    } else {
        Err(LookupError::Validation)
    }
}

/// Build the `where` clause for an account number.
///
/// The city has published this layer with the account number under more than
/// one field name, and sometimes as a number rather than a string, so we ask
/// for all of them. Callers must pass cleaned digits: nothing here escapes
/// quotes.
pub fn build_filter_expression(digits: &str) -> String {
    format!("opa_account = '{digits}' OR opa_account_num = '{digits}' OR opa_account = {digits}")
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CertificationStatus {
    Certified,
    Exempt,
    Pending,
    Void,
    Other(String),
}

static STATUS_BY_NAME: Lazy<HashMap<&'static str, CertificationStatus>> = Lazy::new(|| {
    [
        ("certified", CertificationStatus::Certified),
        ("exempt", CertificationStatus::Exempt),
        ("pending", CertificationStatus::Pending),
        ("void", CertificationStatus::Void),
    ]
    .into_iter()
    .collect()
});

impl CertificationStatus {
    pub fn parse(text: &str) -> Self {
        STATUS_BY_NAME
            .get(text.trim().to_ascii_lowercase().as_str())
            .cloned()
            .unwrap_or_else(|| CertificationStatus::Other(text.to_owned()))
    }

    pub fn as_str(&self) -> &str {
        match self {
            CertificationStatus::Certified => "Certified",
            CertificationStatus::Exempt => "Exempt",
            CertificationStatus::Pending => "Pending",
            CertificationStatus::Void => "Void",
            CertificationStatus::Other(s) => s,
        }
    }
}

/// A typed view of one record's `attributes`.
#[derive(Clone, Debug, PartialEq)]
pub struct CertificationRecord {
    pub account_number: Option<String>,
    pub status: Option<CertificationStatus>,
    pub address: Option<String>,
    pub zip_code: Option<String>,
    pub status_type: Option<String>,
    pub cert_date: Option<DateTime<Utc>>,
    pub expiration_date: Option<DateTime<Utc>>,
    pub status_details: Option<String>,
    pub attributes: Map<String, Value>,
}

impl CertificationRecord {
    pub fn from_attributes(attributes: Map<String, Value>) -> Self {
        let text = |key: &str| attributes.get(key).and_then(scalar_text);
        let date = |key: &str| attributes.get(key).and_then(epoch_millis);

        CertificationRecord {
            account_number: text("opa_account").or_else(|| text("opa_account_num")),
            status: text("lhhp_certification_status").map(|s| CertificationStatus::parse(&s)),
            address: text("address"),
            zip_code: text("zip_code"),
            status_type: text("lhhp_status_type"),
            cert_date: date("lhhp_cert_date"),
            expiration_date: date("lhhp_cert_expiration_date"),
            status_details: text("lhhp_status_details"),
            attributes,
        }
    }

    /// Exempt properties don't need a lead certification at all.
    pub fn is_exempt(&self) -> bool {
        self.status == Some(CertificationStatus::Exempt)
    }

    /// No expiration date on file means the certification doesn't lapse.
    pub fn is_permanent(&self) -> bool {
        self.expiration_date.is_none()
    }
}

/// Strings pass through; numbers are rendered. Empty strings, nulls, and
/// anything structured count as absent.
fn scalar_text(v: &Value) -> Option<String> {
    match v {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_owned()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// ArcGIS date fields are milliseconds since the Unix epoch.
fn epoch_millis(v: &Value) -> Option<DateTime<Utc>> {
    let ms = match v {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64))?,
        _ => return None,
    };

    DateTime::from_timestamp_millis(ms)
}

#[derive(Clone, Debug, PartialEq)]
pub enum LookupOutcome {
    Found(CertificationRecord),

    /// The search worked but matched nothing. Not an error.
    NotFound,
}

#[derive(Clone, Debug)]
enum Backend {
    Proxy { http: reqwest::Client, url: Url },
    Direct(UpstreamClient),
}

#[derive(Clone, Debug)]
pub struct LookupClient {
    backend: Backend,
    timeout: Duration,
}

impl LookupClient {
    pub fn new(config: LookupConfig) -> Result<Self, LookupError> {
        let backend = match config.target {
            LookupTarget::Proxy => Backend::Proxy {
                http: reqwest::Client::builder()
                    .build()
                    .map_err(LookupError::Transport)?,
                url: config.endpoint,
            },

            LookupTarget::Direct => {
                let upstream = ProxyConfig {
                    upstream_url: config.endpoint.to_string(),
                    ..Default::default()
                }
                .with_timeout(config.timeout);
                Backend::Direct(UpstreamClient::new(&upstream)?)
            }
        };

        Ok(LookupClient {
            backend,
            timeout: config.timeout,
        })
    }

    /// Validate, query, and pick the first matching record. Invalid input
    /// fails before any network traffic.
    pub async fn lookup(&self, input: &str) -> Result<LookupOutcome, LookupError> {
        let digits = validate_account_number(input)?;
        let query = build_filter_expression(&digits);
        info!(account = %digits, %query, "looking up certification");

        let features = self.execute(&query).await?;

        // Only the first match is used; later ones are ignored.
        Ok(match features.into_iter().next() {
            Some(feature) => LookupOutcome::Found(CertificationRecord::from_attributes(
                feature.attributes,
            )),
            None => LookupOutcome::NotFound,
        })
    }

    /// Send a filter expression to the proxy (or straight to ArcGIS) and
    /// return the records.
    pub async fn execute(&self, query: &str) -> Result<Vec<Feature>, LookupError> {
        match tokio::time::timeout(self.timeout, self.execute_unbounded(query)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(timeout = ?self.timeout, "lookup timed out");
                Err(LookupError::Timeout)
            }
        }
    }

    async fn execute_unbounded(&self, query: &str) -> Result<Vec<Feature>, LookupError> {
        match &self.backend {
            Backend::Proxy { http, url } => {
                let mut url = url.clone();
                url.query_pairs_mut().append_pair("query", query);
                fetch_envelope(http, url).await
            }

            Backend::Direct(upstream) => Ok(upstream.query(query).await?),
        }
    }
}

async fn fetch_envelope(http: &reqwest::Client, url: Url) -> Result<Vec<Feature>, LookupError> {
    let resp = http
        .get(url)
        .header(header::ACCEPT, "application/json")
        .send()
        .await
        .map_err(transport)?;

    let status = resp.status();
    let body = resp.bytes().await.map_err(transport)?;
    let envelope = serde_json::from_slice::<ProxyEnvelope>(&body).ok();

    if !status.is_success() {
        let message = envelope.and_then(|e| e.error).unwrap_or_else(|| {
            format!(
                "Proxy returned {}: {}",
                status.as_u16(),
                status.canonical_reason().unwrap_or("Unknown")
            )
        });
        warn!(%status, %message, "proxy returned an error status");
        return Err(LookupError::Proxy(message));
    }

    let envelope = envelope.ok_or_else(|| {
        LookupError::Proxy("The proxy returned an unreadable response".to_owned())
    })?;

    if !envelope.success {
        return Err(LookupError::Proxy(
            envelope
                .error
                .unwrap_or_else(|| "Unknown proxy error".to_owned()),
        ));
    }

    let data = envelope.data.unwrap_or_default();
    info!(count = data.len(), "proxy returned records");
    Ok(data)
}

fn transport(e: reqwest::Error) -> LookupError {
    if e.is_timeout() {
        LookupError::Timeout
    } else {
        LookupError::Transport(e)
    }
}

#[derive(Debug, Default)]
pub enum SearchState {
    #[default]
    Idle,
    Found(CertificationRecord),
    NotFound,
    Failed(LookupError),
}

impl SearchState {
    /// The message to show in the error area, if any. "Not found" gets its
    /// own message even though it isn't a failure.
    pub fn message(&self) -> Option<String> {
        match self {
            SearchState::NotFound => Some(NOT_FOUND_MESSAGE.to_owned()),
            SearchState::Failed(e) => Some(e.to_string()),
            _ => None,
        }
    }

    pub fn record(&self) -> Option<&CertificationRecord> {
        match self {
            SearchState::Found(r) => Some(r),
            _ => None,
        }
    }
}

/// Form state for the lookup UI.
#[derive(Debug)]
pub struct LookupSession {
    client: LookupClient,
    input: String,
    loading: bool,
    state: SearchState,
}

impl LookupSession {
    pub fn new(client: LookupClient) -> Self {
        LookupSession {
            client,
            input: String::new(),
            loading: false,
            state: SearchState::Idle,
        }
    }

    pub fn input(&self) -> &str {
        &self.input
    }

    pub fn set_input<S: Into<String>>(&mut self, input: S) {
        self.input = input.into();
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    pub fn state(&self) -> &SearchState {
        &self.state
    }

    /// Whether the search trigger is enabled.
    pub fn can_search(&self) -> bool {
        !self.loading && !self.input.trim().is_empty()
    }

    /// Run a search on the current input. Taking `&mut self` means only one
    /// search can be in flight per session.
    pub async fn search(&mut self) -> &SearchState {
        self.state = SearchState::Idle;

        let digits = match validate_account_number(&self.input) {
            Ok(d) => d,
            Err(e) => {
                self.state = SearchState::Failed(e);
                return &self.state;
            }
        };

        let LookupSession {
            client,
            loading,
            state,
            ..
        } = &mut *self;
        *loading = true;
        let pending = InFlight { loading, state };

        let result = client.lookup(&digits).await;

        pending.finish(match result {
            Ok(LookupOutcome::Found(record)) => SearchState::Found(record),
            Ok(LookupOutcome::NotFound) => SearchState::NotFound,
            Err(e) => SearchState::Failed(e),
        });

        &self.state
    }

    /// Back to a blank form.
    pub fn reset(&mut self) {
        self.input.clear();
        self.state = SearchState::Idle;
    }
}

/// Holds the session's pending flag while a search is awaited. If the search
/// future is dropped first, the form is released and marked cancelled.
struct InFlight<'a> {
    loading: &'a mut bool,
    state: &'a mut SearchState,
}

impl InFlight<'_> {
    fn finish(self, outcome: SearchState) {
        *self.state = outcome;
        *self.loading = false;
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if *self.loading {
            warn!("search dropped before it finished");
            *self.loading = false;
            *self.state = SearchState::Failed(LookupError::Cancelled);
        }
    }
}
