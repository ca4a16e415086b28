use anyhow::Error;
use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// Sends a request, retrying on transport errors and 5xx responses.
///
/// # Parameters
/// - `request`: Closure sending the request
/// - `retries`: Number of retry attempts (total runs = 1 initial + retries)
/// - `delay_ms`: Milliseconds between retry attempts
///
/// # Returns
/// The first response that is not a server error (client errors included,
/// so callers can interpret e.g. 404), or the last error once attempts run out
pub async fn send_with_retry<F, Fut>(
    mut request: F,
    retries: usize,
    delay_ms: u64,
) -> Result<reqwest::Response, Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<reqwest::Response, reqwest::Error>>,
{
    let mut attempt = 1;
    loop {
        let err = match request().await {
            Ok(response) if response.status().is_server_error() => {
                anyhow::anyhow!("HTTP error: {}", response.status())
            }
            Ok(response) => return Ok(response),
            Err(err) => Error::from(err),
        };
        if attempt > retries {
            return Err(err);
        }
        debug!(
            "Attempt {}/{} failed: {}. Retrying...",
            attempt, retries, err
        );
        attempt += 1;
        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
    }
}
