//! The normalized response shape returned by the proxy, plus the upstream
//! ArcGIS query-response types it is built from.

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One entry of an ArcGIS `features` array.
///
/// We only care about `attributes`, but anything else the service sends
/// along (e.g. `geometry`, if someone enables it) is carried through
/// untouched so that the envelope's `data` is the upstream array verbatim.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct Feature {
    #[serde(default)]
    pub attributes: Map<String, Value>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// The subset of an ArcGIS `query` response that we look at.
#[derive(Debug, Default, Deserialize)]
pub struct QueryResponse {
    #[serde(default)]
    pub features: Option<Vec<Feature>>,

    #[serde(default)]
    pub error: Option<ArcGisError>,

    /// Only present for `returnCountOnly=true` queries.
    #[serde(default)]
    pub count: Option<u64>,
}

/// ArcGIS reports many problems (bad `where` clauses, missing layers) as an
/// HTTP 200 with one of these in the body.
///
/// Only `message` matters to us. The other fields vary in type between
/// server versions (`details` may be null, `code` a string), so they're
/// kept loose rather than allowed to sink the whole parse.
#[derive(Debug, Default, Deserialize)]
pub struct ArcGisError {
    #[serde(default)]
    pub code: Option<Value>,

    #[serde(default)]
    pub message: Option<Value>,

    #[serde(default)]
    pub details: Option<Value>,
}

impl ArcGisError {
    pub fn describe(&self) -> String {
        match &self.message {
            Some(Value::String(m)) if !m.is_empty() => m.clone(),
            Some(Value::Null | Value::String(_)) | None => "Unknown API Error".to_owned(),
            Some(other) => other.to_string(),
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Metadata {
    pub count: usize,
    pub timestamp: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
}

/// `{ success, data, metadata, error }`.
///
/// The constructors are the only way we build these, and they keep
/// `data`/`error` mutually exclusive.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct ProxyEnvelope {
    pub success: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Vec<Feature>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Metadata>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ProxyEnvelope {
    pub fn success(data: Vec<Feature>, query: Option<String>) -> Self {
        ProxyEnvelope {
            success: true,
            metadata: Some(Metadata {
                count: data.len(),
                timestamp: now_timestamp(),
                query,
            }),
            data: Some(data),
            error: None,
        }
    }

    pub fn failure<S: ToString>(error: S) -> Self {
        ProxyEnvelope {
            success: false,
            data: None,
            metadata: None,
            error: Some(error.to_string()),
        }
    }
}

/// ISO-8601 UTC with millisecond precision, e.g. `2024-05-01T12:00:00.000Z`.
pub fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn features_keep_extra_keys() {
        let raw = json!([
            { "attributes": { "opa_account": "081128700" }, "geometry": { "x": 1.0 } },
            { "attributes": { "opa_account": "081128701" } }
        ]);

        let features: Vec<Feature> = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(features.len(), 2);
        assert_eq!(features[0].attributes["opa_account"], "081128700");
        assert_eq!(serde_json::to_value(&features).unwrap(), raw);
    }

    #[test]
    fn success_shape() {
        let env = ProxyEnvelope::success(Vec::new(), Some("1=1".to_owned()));
        let v = serde_json::to_value(&env).unwrap();
        assert_eq!(v["success"], true);
        assert_eq!(v["data"], json!([]));
        assert_eq!(v["metadata"]["count"], 0);
        assert_eq!(v["metadata"]["query"], "1=1");
        assert!(v.get("error").is_none());
    }

    #[test]
    fn failure_shape() {
        let v = serde_json::to_value(ProxyEnvelope::failure("nope")).unwrap();
        assert_eq!(v, json!({ "success": false, "error": "nope" }));
    }

    #[test]
    fn timestamp_format() {
        let ts = now_timestamp();
        assert!(ts.ends_with('Z'));
        assert!(chrono::DateTime::parse_from_rfc3339(&ts).is_ok());
        // YYYY-MM-DDTHH:MM:SS.mmmZ
        assert_eq!(ts.len(), 24);
    }

    #[test]
    fn embedded_error() {
        let r: QueryResponse =
            serde_json::from_value(json!({ "error": { "code": 400, "message": "X", "details": [] } }))
                .unwrap();
        assert!(r.features.is_none());
        assert_eq!(r.error.unwrap().describe(), "X");

        let r: QueryResponse = serde_json::from_value(json!({ "error": { "code": 500 } })).unwrap();
        assert_eq!(r.error.unwrap().describe(), "Unknown API Error");
    }

    #[test]
    fn loosely_typed_error_fields() {
        let r: QueryResponse = serde_json::from_value(json!({
            "error": { "code": 400, "message": "Invalid field X", "details": null }
        }))
        .unwrap();
        assert_eq!(r.error.unwrap().describe(), "Invalid field X");

        let r: QueryResponse = serde_json::from_value(json!({
            "error": { "code": "ERR_42", "message": "Bad", "details": [{ "field": "x" }, 7] }
        }))
        .unwrap();
        let e = r.error.unwrap();
        assert_eq!(e.code, Some(json!("ERR_42")));
        assert_eq!(e.describe(), "Bad");
    }
}
