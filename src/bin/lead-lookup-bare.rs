//! "Bare" version of the lead-certification lookup Lambda.
//!
//! This executable defines a server that you can easily interact with locally.
//! It takes `{"method": ..., "path": ..., "query": ...}` payloads and answers
//! with the same `{statusCode, headers, body}` object API Gateway would get.
//! For the cloud deployment, use the "proxy event" version.

use lambda_runtime::{run, service_fn, Error, LambdaEvent};
use serde_json::Value;

use lead_lookup_lambda::Services;

#[tokio::main]
async fn main() -> Result<(), Error> {
    let svcs = Services::init()?;
    let ref_svcs = &svcs;

    run(service_fn(|event: LambdaEvent<Value>| async move {
        let (payload, _context) = event.into_parts();
        ref_svcs.dispatch_bare(Some(payload)).await
    }))
    .await?;
    Ok(())
}
