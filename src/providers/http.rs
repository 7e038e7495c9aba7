//! Request helpers shared by the vendor adapters.

use super::error::ProviderError;
use reqwest::{RequestBuilder, Response};
use std::future::Future;
use tokio_util::sync::CancellationToken;

/// Race a future against the caller's cancellation token
pub(crate) async fn cancellable<F, T>(cancel: &CancellationToken, fut: F) -> Result<T, ProviderError>
where
    F: Future<Output = Result<T, ProviderError>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ProviderError::Cancelled),
        result = fut => result,
    }
}

/// Send a request and turn non-2xx statuses into `ApiError`
pub(crate) async fn send_checked(
    request: RequestBuilder,
    label: &str,
    cancel: &CancellationToken,
) -> Result<Response, ProviderError> {
    cancellable(cancel, async {
        let response = request.send().await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            tracing::debug!("{} API error ({}): {}", label, status, error_text);
            return Err(ProviderError::ApiError {
                status,
                message: format!("{} API error: {}", label, error_text),
            });
        }

        Ok(response)
    })
    .await
}

/// Read the full response body, honoring cancellation
pub(crate) async fn read_body(response: Response, cancel: &CancellationToken) -> Result<String, ProviderError> {
    cancellable(cancel, async { Ok(response.text().await?) }).await
}
