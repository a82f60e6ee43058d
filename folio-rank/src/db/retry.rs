//! Transient database retry
//!
//! Exponential backoff for "database is locked" errors, capped at a
//! configured attempt count. Non-lock errors surface immediately.

use std::time::Duration;

use folio_common::{Error, Result};

const INITIAL_BACKOFF_MS: u64 = 10;
const MAX_BACKOFF_MS: u64 = 1000;

/// Run `operation` until it succeeds, a non-lock error occurs, or
/// `attempts` lock failures have been consumed.
pub async fn retry_on_lock<F, Fut, T>(
    operation_name: &str,
    attempts: u32,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let mut backoff_ms = INITIAL_BACKOFF_MS;

    for attempt in 1..=attempts {
        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    tracing::debug!(
                        operation = operation_name,
                        attempt,
                        "Database operation succeeded after retry"
                    );
                }
                return Ok(result);
            }
            Err(err) if err.is_transient() && attempt < attempts => {
                tracing::warn!(
                    operation = operation_name,
                    attempt,
                    backoff_ms,
                    "Database locked, retrying after backoff"
                );
                tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                backoff_ms = (backoff_ms * 2).min(MAX_BACKOFF_MS);
            }
            Err(err) => return Err(err),
        }
    }

    Err(Error::Internal(format!(
        "{operation_name}: retry attempts exhausted"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn succeeds_first_attempt() {
        let result = retry_on_lock("test_op", 3, || async { Ok::<i32, Error>(42) }).await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn retries_lock_errors_then_succeeds() {
        let mut attempts = 0;
        let result = retry_on_lock("test_op", 3, || {
            attempts += 1;
            let fail = attempts < 3;
            async move {
                if fail {
                    Err(Error::Database(sqlx::Error::Protocol(
                        "database is locked".to_string(),
                    )))
                } else {
                    Ok(7)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(attempts, 3);
    }

    #[tokio::test]
    async fn lock_error_surfaces_after_attempt_cap() {
        let mut attempts = 0;
        let result = retry_on_lock("test_op", 3, || {
            attempts += 1;
            async {
                Err::<i32, Error>(Error::Database(sqlx::Error::Protocol(
                    "database is locked".to_string(),
                )))
            }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(attempts, 3);
    }

    #[tokio::test]
    async fn non_lock_error_fails_immediately() {
        let mut attempts = 0;
        let result = retry_on_lock("test_op", 3, || {
            attempts += 1;
            async { Err::<i32, Error>(Error::Internal("boom".to_string())) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(attempts, 1);
    }
}
