//! "Proxy event" version of the lead-certification lookup Lambda.
//!
//! This executable defines a server that expects to be interacted with
//! according to AWS API Gateway's "proxy event" protocol (or a Lambda function
//! URL, which uses the same format). The "bare" version of the server is
//! simpler and is more useful for local testing.

use lambda_http::{run, service_fn, Error, Request};

use lead_lookup_lambda::Services;

#[tokio::main]
async fn main() -> Result<(), Error> {
    let svcs = Services::init()?;
    let ref_svcs = &svcs;

    run(service_fn(|req: Request| async move {
        ref_svcs.dispatch(req).await
    }))
    .await?;
    Ok(())
}
