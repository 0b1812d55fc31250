//! Core business logic - framework-agnostic ledger operations.
//!
//! Every mutating operation here runs inside a single database transaction:
//! either the full set of row changes (lot adjustments, match inserts,
//! aggregate update, log append) commits, or none does. Helpers that compose
//! inside a caller's transaction are generic over `ConnectionTrait`; the
//! public entry points take `&DatabaseConnection`, own the transaction, and
//! run through [`with_retry`] so transient writer contention is retried with
//! backoff instead of surfacing raw.

use crate::errors::{Error, Result};
use std::time::Duration;

/// Lot store: acquisition lots, FIFO listing, remaining-quantity adjustment
pub mod lot;
/// Matching engine: FIFO allocation of sale lines against lots
pub mod matching;
/// Production transformer: consume input lots, emit one output lot
pub mod production;
/// Reconciliation job: aggregate cache drift detection and rebuild
pub mod reconcile;
/// Return linker: return-to-sale association and ceiling enforcement
pub mod returns;
/// Reversal engine: undo line effects on edit or delete
pub mod reversal;
/// Aggregate cache and stock log maintenance
pub mod stock;
/// Trade master and line registration
pub mod trade;

/// Maximum attempts for operations retried on writer contention.
const MAX_RETRY_ATTEMPTS: u32 = 3;

/// Runs an operation, retrying on transient writer contention.
///
/// `SQLite` serializes writers; under load a transaction can fail with a
/// busy/locked error instead of blocking forever (connections carry bounded
/// timeouts). Such errors are retried with doubling backoff up to
/// [`MAX_RETRY_ATTEMPTS`] times, after which `TransactionConflict` is
/// returned so the caller can decide whether to try again. Permanent errors
/// propagate immediately.
pub async fn with_retry<T, F, Fut>(operation: F) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut delay = Duration::from_millis(50);

    for attempt in 1..=MAX_RETRY_ATTEMPTS {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt < MAX_RETRY_ATTEMPTS => {
                tracing::warn!(attempt, error = %err, "transaction conflict, retrying");
                tokio::time::sleep(delay).await;
                delay *= 2;
            }
            Err(err) if err.is_retryable() => {
                return Err(Error::TransactionConflict {
                    attempts: MAX_RETRY_ATTEMPTS,
                });
            }
            Err(err) => return Err(err),
        }
    }

    // The loop always returns on the final attempt.
    Err(Error::TransactionConflict {
        attempts: MAX_RETRY_ATTEMPTS,
    })
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_with_retry_passes_through_success() {
        let result = with_retry(|| async { Ok::<_, Error>(42) }).await.unwrap();
        assert_eq!(result, 42);
    }

    #[tokio::test]
    async fn test_with_retry_does_not_retry_permanent_errors() {
        let calls = AtomicU32::new(0);
        let result = with_retry(|| async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(Error::LotNotFound { lot_id: 1 })
        })
        .await;

        assert!(matches!(result, Err(Error::LotNotFound { lot_id: 1 })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_with_retry_exhausts_on_persistent_conflict() {
        let calls = AtomicU32::new(0);
        let result = with_retry(|| async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(Error::TransactionConflict { attempts: 1 })
        })
        .await;

        assert!(matches!(result, Err(Error::TransactionConflict { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), MAX_RETRY_ATTEMPTS);
    }

    #[tokio::test]
    async fn test_with_retry_recovers_after_conflict() {
        let calls = AtomicU32::new(0);
        let result = with_retry(|| async {
            if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(Error::TransactionConflict { attempts: 1 })
            } else {
                Ok(7)
            }
        })
        .await
        .unwrap();

        assert_eq!(result, 7);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
