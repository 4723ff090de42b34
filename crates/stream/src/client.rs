//! Consuming a progress stream served over HTTP.

use caduceus_core::TransportError;
use tracing::debug;

use crate::consumer::{ConsumeSummary, StreamHandler, consume};

/// Feed an HTTP response body through the consumer.
///
/// A non-success status is a transport failure; the body is not read.
pub async fn consume_response<H>(
    response: reqwest::Response,
    handler: &mut H,
) -> Result<ConsumeSummary, TransportError>
where
    H: StreamHandler + ?Sized,
{
    let status = response.status();
    if !status.is_success() {
        return Err(TransportError::Read(format!(
            "progress stream returned HTTP {status}"
        )));
    }

    debug!(url = %response.url(), "Consuming progress stream");
    consume(response.bytes_stream(), handler).await
}

/// Open a progress stream with a POSTed JSON body and consume it.
pub async fn post_and_consume<H>(
    client: &reqwest::Client,
    url: &str,
    body: &serde_json::Value,
    handler: &mut H,
) -> Result<ConsumeSummary, TransportError>
where
    H: StreamHandler + ?Sized,
{
    let response = client
        .post(url)
        .header("Accept", "text/event-stream")
        .json(body)
        .send()
        .await
        .map_err(|e| TransportError::Read(e.to_string()))?;
    consume_response(response, handler).await
}
