use crate::error::{Error, Result};
use std::future::Future;
use std::time::Duration;

/// Runs `fut` with a deadline.
///
/// On expiry the in-flight future is dropped, so whatever it was doing is
/// abandoned before it can record a partial result.
pub async fn with_deadline<T, F>(limit: Duration, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(res) => res,
        Err(_) => {
            tracing::debug!(?limit, "deadline exceeded");
            Err(Error::DeadlineExceeded { limit })
        }
    }
}
