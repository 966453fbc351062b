//! Transient-failure detection and the bounded retry policy.
//!
//! A transient failure is a distinguishable connectivity-loss class, not a
//! generic error: pool acquisition timeouts, closed pools, and socket I/O
//! failures. The policy is reconnect (the pool hands out a fresh
//! connection on the next acquire) and retry the same logical operation
//! **exactly once**; a second consecutive transient failure is surfaced as
//! fatal for the run. Constraint violations never reach this wrapper —
//! duplicate evidence is absorbed at the insert site.

use std::future::Future;

use tracing::warn;

use annodex_core::{Error, Result};

/// Whether an error belongs to the retryable connectivity-loss class.
pub fn is_transient(err: &Error) -> bool {
    match err {
        Error::Database(e) => is_transient_sqlx(e),
        Error::Io(_) => true,
        _ => false,
    }
}

fn is_transient_sqlx(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Io(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed
    )
}

/// Run a logical operation, retrying exactly once on a transient failure.
///
/// The operation closure must be safe to re-run from scratch: every caller
/// wraps one stage-transition unit whose writes either committed fully or
/// rolled back, so a redo never double-applies.
pub async fn with_transient_retry<T, F, Fut>(operation: &'static str, mut f: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    match f().await {
        Ok(value) => Ok(value),
        Err(first) if is_transient(&first) => {
            warn!(
                subsystem = "db",
                component = "retry",
                op = operation,
                error = %first,
                "Transient failure, retrying once after reconnect"
            );
            match f().await {
                Ok(value) => Ok(value),
                Err(second) if is_transient(&second) => Err(Error::TransientExhausted {
                    operation,
                    source: Box::new(second),
                }),
                Err(second) => Err(second),
            }
        }
        Err(first) => Err(first),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn transient() -> Error {
        Error::Database(sqlx::Error::PoolTimedOut)
    }

    fn permanent() -> Error {
        Error::InvalidInput("bad".to_string())
    }

    #[test]
    fn test_transient_classification() {
        assert!(is_transient(&transient()));
        assert!(is_transient(&Error::Io(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "reset",
        ))));
        assert!(!is_transient(&permanent()));
        assert!(!is_transient(&Error::Database(sqlx::Error::RowNotFound)));
    }

    #[tokio::test]
    async fn test_success_passes_through() {
        let calls = AtomicUsize::new(0);
        let result = with_transient_retry("op", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, Error>(7) }
        })
        .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_transient_then_success_retries_once() {
        let calls = AtomicUsize::new(0);
        let result = with_transient_retry("op", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Err(transient())
                } else {
                    Ok(42)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_second_transient_is_fatal() {
        let calls = AtomicUsize::new(0);
        let result: Result<()> = with_transient_retry("op", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(transient()) }
        })
        .await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        match result.unwrap_err() {
            Error::TransientExhausted { operation, .. } => assert_eq!(operation, "op"),
            other => panic!("expected TransientExhausted, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_permanent_failure_is_not_retried() {
        let calls = AtomicUsize::new(0);
        let result: Result<()> = with_transient_retry("op", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(permanent()) }
        })
        .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_permanent_failure_after_transient_is_not_wrapped() {
        let calls = AtomicUsize::new(0);
        let result: Result<()> = with_transient_retry("op", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Err(transient())
                } else {
                    Err(permanent())
                }
            }
        })
        .await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        match result.unwrap_err() {
            Error::InvalidInput(_) => {}
            other => panic!("expected InvalidInput, got {other:?}"),
        }
    }
}
