//! Retry-on-timeout for service requests.
//!
//! Only timeouts are retried, immediately and without backoff. Any other
//! error is returned on the attempt that produced it.

use std::future::Future;

use crate::error::ServiceError;

/// Run `attempt` up to `max_attempts` times while it keeps timing out.
pub(crate) async fn retry_on_timeout<T, F, Fut>(
    max_attempts: u32,
    mut attempt: F,
) -> Result<T, ServiceError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ServiceError>>,
{
    let max_attempts = max_attempts.max(1);
    let mut tries = 0;

    loop {
        tries += 1;
        match attempt().await {
            Ok(value) => {
                if tries > 1 {
                    tracing::info!("Succeeded after {} retries", tries - 1);
                }
                return Ok(value);
            }
            Err(ServiceError::Timeout { .. }) if tries < max_attempts => {
                tracing::warn!(
                    "Request timed out. Retrying {} more times",
                    max_attempts - tries
                );
            }
            Err(ServiceError::Timeout { .. }) => {
                return Err(ServiceError::Timeout { attempts: tries });
            }
            Err(e) => return Err(e),
        }
    }
}
