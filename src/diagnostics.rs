//! The self-test endpoint.
//!
//! Reports a bit about the runtime and checks that ArcGIS is reachable. It
//! always answers 200; failed checks show up in the report, not as errors.

use serde_json::{json, Value};
use std::time::Duration;
use tracing::info;

use crate::{envelope::now_timestamp, upstream::UpstreamClient};

const CONNECTIVITY_CHECK_TIMEOUT: Duration = Duration::from_secs(10);

/// Details of the inbound request, echoed back in the report.
#[derive(Debug, Default)]
pub struct RequestInfo {
    pub method: String,
    pub uri: String,
    pub user_agent: Option<String>,
}

pub async fn report(
    upstream: &UpstreamClient,
    region: Option<&str>,
    request: RequestInfo,
) -> Value {
    let arcgis = match upstream.record_count(CONNECTIVITY_CHECK_TIMEOUT).await {
        Ok(Some(n)) => format!("PASS - Record count: {n}"),
        Ok(None) => "PASS - Record count: unknown".to_owned(),
        Err(e) => format!("FAIL - {e}"),
    };

    info!(arcgis = %arcgis, "self-test finished");

    json!({
        "success": true,
        "message": "API is working!",
        "timestamp": now_timestamp(),
        "environment": {
            "version": env!("CARGO_PKG_VERSION"),
            "os": std::env::consts::OS,
            "arch": std::env::consts::ARCH,
            "region": region.unwrap_or("unknown"),
        },
        "request": {
            "method": request.method,
            "uri": request.uri,
            "userAgent": request.user_agent,
        },
        "tests": {
            "basicFunction": "PASS",
            "arcgisConnectivity": arcgis,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProxyConfig;
    use mockito::{Matcher, Server};

    #[tokio::test]
    async fn reports_count() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/query")
            .match_query(Matcher::UrlEncoded("returnCountOnly".into(), "true".into()))
            .with_status(200)
            .with_body(r#"{"count":12}"#)
            .create_async()
            .await;

        let upstream =
            UpstreamClient::new(&ProxyConfig::new(format!("{}/query", server.url())).unwrap())
                .unwrap();
        let r = report(
            &upstream,
            Some("us-east-1"),
            RequestInfo {
                method: "GET".to_owned(),
                uri: "/api/test".to_owned(),
                user_agent: Some("curl/8.0".to_owned()),
            },
        )
        .await;

        assert_eq!(r["success"], true);
        assert_eq!(r["environment"]["region"], "us-east-1");
        assert_eq!(r["request"]["userAgent"], "curl/8.0");
        assert_eq!(r["tests"]["basicFunction"], "PASS");
        assert_eq!(r["tests"]["arcgisConnectivity"], "PASS - Record count: 12");
    }

    #[tokio::test]
    async fn failures_are_reported_not_raised() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/query")
            .match_query(Matcher::Any)
            .with_status(500)
            .create_async()
            .await;

        let upstream =
            UpstreamClient::new(&ProxyConfig::new(format!("{}/query", server.url())).unwrap())
                .unwrap();
        let r = report(&upstream, None, RequestInfo::default()).await;

        assert_eq!(r["success"], true);
        assert_eq!(r["environment"]["region"], "unknown");
        let arcgis = r["tests"]["arcgisConnectivity"].as_str().unwrap();
        assert!(arcgis.starts_with("FAIL - "));
        assert!(arcgis.contains("500"));
    }
}
