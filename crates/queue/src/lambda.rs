//! Fire-and-forget Lambda invocation.

use aws_sdk_lambda::primitives::Blob;
use aws_sdk_lambda::types::InvocationType;
use aws_sdk_lambda::Client;
use tracing::debug;

use hourglass_core::InvokeParams;

use crate::error::QueueError;

/// Start `params.function_name` asynchronously with `payload`.
///
/// Returns once Lambda has accepted the event (HTTP 202), not when the
/// function finishes.
pub async fn invoke_event(client: &Client, params: &InvokeParams, payload: &str) -> Result<(), QueueError> {
    let resp = client
        .invoke()
        .function_name(&params.function_name)
        .set_qualifier(params.qualifier.clone())
        .invocation_type(InvocationType::Event)
        .payload(Blob::new(payload.as_bytes()))
        .send()
        .await
        .map_err(|e| QueueError::Invoke(format!("Lambda invoke of {} failed: {e:?}", params.function_name)))?;

    if let Some(err) = resp.function_error() {
        return Err(QueueError::Invoke(format!("{}: {err}", params.function_name)));
    }

    debug!(function = %params.function_name, status = resp.status_code(), "Lambda event accepted");
    Ok(())
}
