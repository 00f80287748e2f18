//! Shared request plumbing for the generation clients.

use serde::de::DeserializeOwned;
use sift_core::{Capability, CollaboratorError};

/// Send a prepared request and decode a JSON body, classifying failures.
pub(crate) async fn send_json<R: DeserializeOwned>(
    request: reqwest::RequestBuilder,
    service: &str,
) -> Result<R, CollaboratorError> {
    let response = request.send().await.map_err(|e| {
        CollaboratorError::unavailable(
            Capability::Generation,
            format!("Failed to call {}: {}", service, e),
        )
    })?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(CollaboratorError::from_status(
            Capability::Generation,
            status.as_u16(),
            &body,
        ));
    }

    response.json().await.map_err(|e| {
        CollaboratorError::malformed(
            Capability::Generation,
            format!("Failed to parse {} response: {}", service, e),
        )
    })
}

pub(crate) fn client(timeout_secs: u64) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .unwrap_or_default()
}

/// Error for a response that parsed but carried no text.
pub(crate) fn empty_response(service: &str) -> CollaboratorError {
    CollaboratorError::malformed(
        Capability::Generation,
        format!("No text content in {} response", service),
    )
}
