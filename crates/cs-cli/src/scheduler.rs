//! Fixed-interval cycle loop with cooperative shutdown.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

/// Runs `cycle` every `interval` until `token` is cancelled.
///
/// Cancellation is only observed between cycles: a running cycle always
/// finishes, so no write is abandoned halfway. Returns the number of cycles
/// that ran.
pub async fn run_every<F, Fut>(interval: Duration, token: &CancellationToken, mut cycle: F) -> usize
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ()>,
{
    let mut cycles = 0;
    while !token.is_cancelled() {
        cycle().await;
        cycles += 1;

        tokio::select! {
            () = token.cancelled() => break,
            () = tokio::time::sleep(interval) => {}
        }
    }
    tracing::info!(cycles, "scheduler stopped");
    cycles
}

/// Cancels `token` on ctrl-c, or SIGTERM on unix.
pub async fn cancel_on_shutdown(token: CancellationToken) {
    shutdown_signal().await;
    tracing::info!("shutdown requested, finishing current cycle");
    token.cancel();
}

#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(stream) => stream,
        Err(err) => {
            tracing::warn!(error = %err, "failed to install SIGTERM handler");
            if let Err(err) = tokio::signal::ctrl_c().await {
                tracing::warn!(error = %err, "failed to listen for ctrl-c");
            }
            return;
        }
    };
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(err) = result {
                tracing::warn!(error = %err, "failed to listen for ctrl-c");
            }
        }
        _ = terminate.recv() => {}
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %err, "failed to listen for ctrl-c");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use tokio::time::Instant;

    fn cancel_after(token: &CancellationToken, delay: Duration) {
        let token = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            token.cancel();
        });
    }

    #[tokio::test(start_paused = true)]
    async fn cycles_run_on_interval_until_cancelled() {
        let token = CancellationToken::new();
        cancel_after(&token, Duration::from_secs(650));

        let started = Instant::now();
        let starts = Arc::new(std::sync::Mutex::new(Vec::new()));
        let recorded = Arc::clone(&starts);
        let cycles = run_every(Duration::from_secs(300), &token, || {
            let recorded = Arc::clone(&recorded);
            async move {
                recorded.lock().unwrap().push(started.elapsed().as_secs());
            }
        })
        .await;

        assert_eq!(cycles, 3);
        assert_eq!(*starts.lock().unwrap(), vec![0, 300, 600]);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_waits_for_running_cycle() {
        let token = CancellationToken::new();
        cancel_after(&token, Duration::from_secs(5));

        let finished = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&finished);
        let cycles = run_every(Duration::from_secs(300), &token, || {
            let flag = Arc::clone(&flag);
            async move {
                tokio::time::sleep(Duration::from_secs(10)).await;
                flag.store(true, Ordering::SeqCst);
            }
        })
        .await;

        assert_eq!(cycles, 1);
        assert!(finished.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_token_runs_nothing() {
        let token = CancellationToken::new();
        token.cancel();
        let count = AtomicUsize::new(0);
        let cycles = run_every(Duration::from_secs(1), &token, || {
            count.fetch_add(1, Ordering::SeqCst);
            async {}
        })
        .await;
        assert_eq!(cycles, 0);
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }
}
