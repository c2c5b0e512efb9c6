// SPDX-FileCopyrightText: © 2025 Tunercast Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Bounded retry helper for transient upstream failures.

use std::future::Future;

/// Run `op` up to `attempts` times, returning the first success or the last
/// error. No delay is inserted between attempts; upstream fetches are paced
/// by their own timeouts.
pub async fn retry<T, E, F, Fut>(attempts: usize, mut op: F) -> std::result::Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
{
    debug_assert!(attempts > 0, "retry requires at least one attempt");
    let mut attempt = 0;
    loop {
        attempt += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(_) if attempt < attempts => {
                tracing::debug!(attempt, attempts, "retrying after transient failure");
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[tokio::test]
    async fn test_succeeds_first_try() {
        let calls = AtomicUsize::new(0);
        let result: Result<u32, &str> = retry(3, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok(7) }
        })
        .await;
        assert_eq!(result, Ok(7));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_recovers_after_two_failures() {
        let calls = AtomicUsize::new(0);
        let result: Result<u32, &str> = retry(3, || {
            let call = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if call < 2 {
                    Err("transient")
                } else {
                    Ok(42)
                }
            }
        })
        .await;
        assert_eq!(result, Ok(42));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_returns_last_error_when_exhausted() {
        let calls = AtomicUsize::new(0);
        let result: Result<u32, usize> = retry(3, || {
            let call = calls.fetch_add(1, Ordering::SeqCst);
            async move { Err(call) }
        })
        .await;
        assert_eq!(result, Err(2));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
