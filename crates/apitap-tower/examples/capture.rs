//! Minimal wiring: wrap an echo service, fire one request, shut down.
//!
//! Point `base_uri` at a local collector to watch the batch arrive;
//! without one the agent logs the failed delivery and carries on.

use apitap::{AgentConfig, TelemetryAgent};
use apitap_tower::TelemetryLayer;
use bytes::Bytes;
use http::{Request, Response};
use http_body_util::{BodyExt, Full};
use std::sync::Arc;
use tower::{service_fn, BoxError, Layer, ServiceExt};

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    let config = AgentConfig::new("demo-application-id")
        .debug(true)
        .base_uri("http://localhost:8900");
    let agent = Arc::new(TelemetryAgent::start(config).await?);

    let service = TelemetryLayer::new(Arc::clone(&agent)).layer(service_fn(echo));

    let request = Request::builder()
        .method("POST")
        .uri("http://localhost/orders")
        .header("content-type", "application/json")
        .body(Full::new(Bytes::from_static(b"{\"total\":3}")))?;

    let response = service.oneshot(request).await?;
    let body = response.into_body().collect().await?.to_bytes();
    println!("response: {}", String::from_utf8_lossy(&body));

    // Give the background job a drain cycle, then cancel it.
    tokio::time::sleep(std::time::Duration::from_secs(3)).await;
    agent.stop();
    Ok(())
}

async fn echo(request: Request<Full<Bytes>>) -> Result<Response<Full<Bytes>>, BoxError> {
    let bytes = request.into_body().collect().await?.to_bytes();
    Ok(Response::builder()
        .header("content-type", "application/json")
        .body(Full::new(bytes))?)
}
