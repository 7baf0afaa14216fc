//! Timeout enforcement.
//!
//! # Responsibilities
//! - Wrap database calls with a deadline
//! - Report which operation missed its deadline and by how much time
//!
//! # Design Decisions
//! - Uses Tokio's timeout facilities
//! - Timeout errors are distinct from other errors
//! - The caller decides what to do with the abandoned resource

use std::future::Future;
use std::time::Duration;

/// An operation did not finish within its deadline.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{operation} timed out after {}ms", limit.as_millis())]
pub struct DeadlineExceeded {
    pub operation: &'static str,
    pub limit: Duration,
}

/// Run `future` under `limit`, converting a missed deadline into `E`.
pub async fn with_deadline<F, T, E>(operation: &'static str, limit: Duration, future: F) -> Result<T, E>
where
    F: Future<Output = Result<T, E>>,
    E: From<DeadlineExceeded>,
{
    match tokio::time::timeout(limit, future).await {
        Ok(result) => result,
        Err(_) => Err(DeadlineExceeded { operation, limit }.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq, thiserror::Error)]
    enum TestError {
        #[error(transparent)]
        Deadline(#[from] DeadlineExceeded),
        #[error("boom")]
        Boom,
    }

    #[tokio::test]
    async fn test_completes_in_time() {
        let result: Result<u32, TestError> =
            with_deadline("query", Duration::from_secs(1), async { Ok(7) }).await;
        assert_eq!(result, Ok(7));
    }

    #[tokio::test]
    async fn test_inner_error_passes_through() {
        let result: Result<u32, TestError> =
            with_deadline("query", Duration::from_secs(1), async { Err(TestError::Boom) }).await;
        assert_eq!(result, Err(TestError::Boom));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_exceeded() {
        let result: Result<u32, TestError> = with_deadline("query", Duration::from_millis(50), async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(1)
        })
        .await;
        let err = result.unwrap_err();
        assert_eq!(err.to_string(), "query timed out after 50ms");
    }
}
