//! "Oneshot" version of the lead-certification lookup tools.
//!
//! Runs one operation based on arguments given on the command line:
//!
//! - `proxy <where-clause>`: run the proxy handler and print its reply;
//! - `lookup <opa-account>`: run the lookup client against the proxy named
//!   by `LEAD_LOOKUP_PROXY_URL` (or straight against ArcGIS, at
//!   `LEAD_PROXY_UPSTREAM_URL` or the default layer, when that's unset) and
//!   print the first matching record;
//! - `test`: print the self-test report.

use lambda_http::http::Method;
use lambda_runtime::Error;
use serde_json::{json, Value};
use std::env;

use lead_lookup_lambda::{
    config::{LookupConfig, DEFAULT_UPSTREAM_URL},
    lookup::{LookupClient, LookupOutcome, NOT_FOUND_MESSAGE},
    Inbound, Services,
};

#[tokio::main]
async fn main() -> Result<(), Error> {
    let mut args = env::args();
    args.next(); // skip argv[0]

    let mode = args.next().ok_or_else(|| -> Error {
        "first argument should be the operation (proxy, lookup, test)".into()
    })?;

    let result = match mode.as_str() {
        "proxy" => {
            let query = args.next();
            let svcs = Services::init()?;
            let reply = svcs
                .respond(Inbound {
                    method: Method::GET,
                    path: "/proxy".to_owned(),
                    query,
                    uri: "/proxy".to_owned(),
                    user_agent: None,
                })
                .await;
            serde_json::to_value(&reply.body)?
        }

        "lookup" => {
            let account = args
                .next()
                .ok_or_else(|| -> Error { "second argument should be an OPA account number".into() })?;
            let config = match env::var("LEAD_LOOKUP_PROXY_URL") {
                Ok(proxy_url) => LookupConfig::proxied(proxy_url)?,
                Err(_) => LookupConfig::direct(
                    env::var("LEAD_PROXY_UPSTREAM_URL")
                        .unwrap_or_else(|_| DEFAULT_UPSTREAM_URL.to_owned()),
                )?,
            };

            let client = LookupClient::new(config)?;

            match client.lookup(&account).await? {
                LookupOutcome::Found(record) => Value::Object(record.attributes),
                LookupOutcome::NotFound => json!({ "message": NOT_FOUND_MESSAGE }),
            }
        }

        "test" => {
            let svcs = Services::init()?;
            let reply = svcs
                .respond(Inbound {
                    method: Method::GET,
                    path: "/test".to_owned(),
                    query: None,
                    uri: "/test".to_owned(),
                    user_agent: None,
                })
                .await;
            serde_json::to_value(&reply.body)?
        }

        other => return Err(format!("unknown operation `{other}`").into()),
    };

    serde_json::to_writer(std::io::stdout().lock(), &result)?;
    Ok(())
}
