use lambda_http::{http, Body, Request, RequestExt};
use mockito::{Matcher, Server};
use serde_json::{json, Value};
use std::collections::HashMap;

use lead_lookup_lambda::{
    config::{LookupConfig, ProxyConfig},
    lookup::{LookupClient, LookupOutcome},
    Services,
};

fn request(method: &str, path: &str, query: Option<&str>) -> Request {
    let req = http::Request::builder()
        .method(method)
        .uri(path)
        .header("user-agent", "integration-test")
        .body(Body::Empty)
        .unwrap();

    match query {
        Some(q) => req.with_query_string_parameters(HashMap::from([(
            "query".to_owned(),
            q.to_owned(),
        )])),
        None => req,
    }
}

fn body_json(resp: &http::Response<Body>) -> Value {
    match resp.body() {
        Body::Text(t) => serde_json::from_str(t).unwrap(),
        other => panic!("expected a text body, got {other:?}"),
    }
}

fn assert_cors(resp: &http::Response<Body>) {
    let h = resp.headers();
    assert_eq!(h["access-control-allow-origin"], "*");
    assert_eq!(h["access-control-allow-methods"], "GET, OPTIONS");
    assert_eq!(h["access-control-allow-headers"], "Content-Type");
}

fn services_for(url: String) -> Services {
    Services::new(&ProxyConfig::new(url).unwrap()).unwrap()
}

#[tokio::test]
async fn proxy_round_trip() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("GET", "/FeatureServer/0/query")
        .match_query(Matcher::AllOf(vec![
            Matcher::UrlEncoded("where".into(), "opa_account = '081128700'".into()),
            Matcher::UrlEncoded("outFields".into(), "*".into()),
            Matcher::UrlEncoded("returnGeometry".into(), "false".into()),
        ]))
        .with_status(200)
        .with_body(
            json!({
                "features": [
                    { "attributes": { "opa_account": "081128700", "lhhp_certification_status": "Certified" } }
                ]
            })
            .to_string(),
        )
        .create_async()
        .await;

    let svcs = services_for(format!("{}/FeatureServer/0/query", server.url()));
    let resp = svcs
        .dispatch(request("GET", "/api/proxy", Some("opa_account = '081128700'")))
        .await
        .unwrap();

    assert_eq!(resp.status(), 200);
    assert_cors(&resp);
    assert_eq!(resp.headers()["content-type"], "application/json");

    let body = body_json(&resp);
    assert_eq!(body["success"], true);
    assert_eq!(body["metadata"]["count"], 1);
    assert_eq!(body["data"][0]["attributes"]["lhhp_certification_status"], "Certified");
    assert!(body.get("error").is_none());

    mock.assert_async().await;
}

#[tokio::test]
async fn preflight_with_and_without_query() {
    let svcs = services_for("http://127.0.0.1:9/query".to_owned());

    for q in [None, Some("1=1")] {
        let resp = svcs.dispatch(request("OPTIONS", "/api/proxy", q)).await.unwrap();
        assert_eq!(resp.status(), 200);
        assert_cors(&resp);
        assert!(matches!(resp.body(), Body::Empty));
    }
}

#[tokio::test]
async fn errors_carry_cors() {
    let svcs = services_for("http://127.0.0.1:9/query".to_owned());

    let resp = svcs.dispatch(request("GET", "/api/proxy", None)).await.unwrap();
    assert_eq!(resp.status(), 400);
    assert_cors(&resp);
    assert_eq!(
        body_json(&resp),
        json!({ "success": false, "error": "Query parameter is required" })
    );

    let resp = svcs
        .dispatch(request("POST", "/api/proxy", Some("1=1")))
        .await
        .unwrap();
    assert_eq!(resp.status(), 405);
    assert_cors(&resp);
    assert_eq!(body_json(&resp)["error"], "Method not allowed");
}

#[tokio::test]
async fn self_test_route() {
    let mut server = Server::new_async().await;
    server
        .mock("GET", "/query")
        .match_query(Matcher::UrlEncoded("returnCountOnly".into(), "true".into()))
        .with_status(200)
        .with_body(r#"{"count":3}"#)
        .create_async()
        .await;

    let svcs = services_for(format!("{}/query", server.url()));
    let resp = svcs.dispatch(request("GET", "/api/test", None)).await.unwrap();

    assert_eq!(resp.status(), 200);
    assert_cors(&resp);
    let body = body_json(&resp);
    assert_eq!(body["message"], "API is working!");
    assert_eq!(body["request"]["userAgent"], "integration-test");
    assert_eq!(body["tests"]["arcgisConnectivity"], "PASS - Record count: 3");
}

#[tokio::test]
async fn bare_payloads() {
    let mut server = Server::new_async().await;
    server
        .mock("GET", "/query")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(r#"{"features":[]}"#)
        .create_async()
        .await;

    let svcs = services_for(format!("{}/query", server.url()));

    let out = svcs
        .dispatch_bare(Some(json!({ "query": "1=1" })))
        .await
        .unwrap();
    assert_eq!(out["statusCode"], 200);
    assert_eq!(out["headers"]["Access-Control-Allow-Origin"], "*");
    let body: Value = serde_json::from_str(out["body"].as_str().unwrap()).unwrap();
    assert_eq!(body["data"], json!([]));

    let out = svcs
        .dispatch_bare(Some(json!({ "method": "options" })))
        .await
        .unwrap();
    assert_eq!(out["statusCode"], 200);
    assert_eq!(out["body"], "");

    let out = svcs
        .dispatch_bare(Some(json!({ "method": "DELETE", "query": "1=1" })))
        .await
        .unwrap();
    assert_eq!(out["statusCode"], 405);

    let out = svcs.dispatch_bare(None).await.unwrap();
    assert_eq!(out["statusCode"], 400);
}

/// The lookup client pointed at a mock proxy that in turn is answered by the
/// real proxy handler: the whole path from typed input to record.
#[tokio::test]
async fn client_through_proxy() {
    let mut upstream = Server::new_async().await;
    upstream
        .mock("GET", "/query")
        .match_query(Matcher::UrlEncoded(
            "where".into(),
            "opa_account = '881234500' OR opa_account_num = '881234500' OR opa_account = 881234500"
                .into(),
        ))
        .with_status(200)
        .with_body(
            r#"{"features":[{"attributes":{"opa_account":881234500,"lhhp_certification_status":"Void"}}]}"#,
        )
        .create_async()
        .await;

    let svcs = services_for(format!("{}/query", upstream.url()));
    let where_clause =
        "opa_account = '881234500' OR opa_account_num = '881234500' OR opa_account = 881234500";
    let proxied = svcs
        .dispatch(request("GET", "/api/proxy", Some(where_clause)))
        .await
        .unwrap();
    let proxied_body = match proxied.body() {
        Body::Text(t) => t.clone(),
        other => panic!("unexpected body {other:?}"),
    };

    let mut proxy = Server::new_async().await;
    proxy
        .mock("GET", "/api/proxy")
        .match_query(Matcher::UrlEncoded("query".into(), where_clause.into()))
        .with_status(proxied.status().as_u16() as usize)
        .with_body(proxied_body)
        .create_async()
        .await;

    let client =
        LookupClient::new(LookupConfig::proxied(format!("{}/api/proxy", proxy.url())).unwrap())
            .unwrap();

    match client.lookup("88-1234-500").await.unwrap() {
        LookupOutcome::Found(record) => {
            assert_eq!(record.account_number.as_deref(), Some("881234500"));
            assert_eq!(record.status.unwrap().as_str(), "Void");
        }
        other => panic!("unexpected outcome {other:?}"),
    }
}
