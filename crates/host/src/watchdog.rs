//! Bounded process exit for the host.
//!
//! The first trigger (a termination signal, end of input, or `shutdown`) arms a
//! hard exit after the grace period and then runs the caller's cleanup. Cleanup
//! that hangs on a dead peer cannot keep the process alive past the grace period.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use pagehost_core::Result;
use tokio::sync::Notify;
use tracing::{error, info, warn};

pub const DEFAULT_GRACE: Duration = Duration::from_millis(15_000);

/// Exit code the hard-exit backstop uses.
pub const FORCED_EXIT_CODE: i32 = 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitOutcome {
    Completed,
    CleanupFailed(String),
    TimedOut,
}

impl ExitOutcome {
    /// Failed cleanup still exits cleanly; only the forced path is nonzero.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Completed | Self::CleanupFailed(_) => 0,
            Self::TimedOut => FORCED_EXIT_CODE,
        }
    }
}

pub struct ExitWatchdog {
    grace: Duration,
    hard_exit: bool,
    triggered: AtomicBool,
    notify: Notify,
}

impl ExitWatchdog {
    pub fn new(grace: Duration) -> Arc<Self> {
        Arc::new(Self {
            grace,
            hard_exit: true,
            triggered: AtomicBool::new(false),
            notify: Notify::new(),
        })
    }

    /// A watchdog that never calls `process::exit` itself.
    pub fn without_hard_exit(grace: Duration) -> Arc<Self> {
        Arc::new(Self {
            grace,
            hard_exit: false,
            triggered: AtomicBool::new(false),
            notify: Notify::new(),
        })
    }

    pub fn grace(&self) -> Duration {
        self.grace
    }

    /// Returns true for the first trigger only.
    pub fn trigger(&self, reason: &str) -> bool {
        if self.triggered.swap(true, Ordering::SeqCst) {
            return false;
        }
        info!(reason, "Exit triggered");
        self.notify.notify_waiters();
        true
    }

    pub fn is_triggered(&self) -> bool {
        self.triggered.load(Ordering::SeqCst)
    }

    /// Resolves once `trigger` has been called, including before this call.
    pub async fn triggered(&self) {
        let notified = self.notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();
        if self.is_triggered() {
            return;
        }
        notified.await;
    }

    /// Trigger on SIGINT, SIGTERM and SIGHUP.
    #[cfg(unix)]
    pub fn install_signal_handlers(self: &Arc<Self>) -> std::io::Result<()> {
        use tokio::signal::unix::{signal, SignalKind};

        for (kind, name) in [
            (SignalKind::interrupt(), "SIGINT"),
            (SignalKind::terminate(), "SIGTERM"),
            (SignalKind::hangup(), "SIGHUP"),
        ] {
            let mut stream = signal(kind)?;
            let watchdog = self.clone();
            tokio::spawn(async move {
                if stream.recv().await.is_some() {
                    watchdog.trigger(name);
                }
            });
        }
        Ok(())
    }

    #[cfg(not(unix))]
    pub fn install_signal_handlers(self: &Arc<Self>) -> std::io::Result<()> {
        let watchdog = self.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                watchdog.trigger("ctrl-c");
            }
        });
        Ok(())
    }

    /// Exit unconditionally once the grace period passes. Runs on an OS thread
    /// so a blocked runtime cannot hold it up.
    fn arm_hard_exit(&self) {
        if !self.hard_exit {
            return;
        }
        let grace = self.grace;
        let spawned = std::thread::Builder::new()
            .name("exit-watchdog".into())
            .spawn(move || {
                std::thread::sleep(grace);
                eprintln!("Cleanup did not finish within {}ms, forcing exit", grace.as_millis());
                std::process::exit(FORCED_EXIT_CODE);
            });
        if let Err(e) = spawned {
            warn!(error = %e, "Could not arm hard exit");
        }
    }

    /// Run `cleanup` under the grace period. Triggers the watchdog if nothing did yet.
    pub async fn shutdown<F>(&self, cleanup: F) -> ExitOutcome
    where
        F: Future<Output = Result<()>>,
    {
        self.trigger("shutdown");
        self.arm_hard_exit();

        match tokio::time::timeout(self.grace, cleanup).await {
            Ok(Ok(())) => ExitOutcome::Completed,
            Ok(Err(e)) => {
                warn!(error = %e, "Cleanup failed");
                ExitOutcome::CleanupFailed(e.to_string())
            }
            Err(_) => {
                error!(grace_ms = self.grace.as_millis() as u64, "Cleanup timed out");
                ExitOutcome::TimedOut
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pagehost_core::Error;

    #[test]
    fn test_trigger_is_idempotent() {
        let wd = ExitWatchdog::without_hard_exit(DEFAULT_GRACE);
        assert!(!wd.is_triggered());
        assert!(wd.trigger("SIGTERM"));
        assert!(!wd.trigger("stdin closed"));
        assert!(wd.is_triggered());
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(ExitOutcome::Completed.exit_code(), 0);
        assert_eq!(ExitOutcome::CleanupFailed("x".into()).exit_code(), 0);
        assert_eq!(ExitOutcome::TimedOut.exit_code(), 1);
    }

    #[tokio::test]
    async fn test_triggered_resolves_for_late_and_early_waiters() {
        let wd = ExitWatchdog::without_hard_exit(DEFAULT_GRACE);
        let waiter = {
            let wd = wd.clone();
            tokio::spawn(async move { wd.triggered().await })
        };
        tokio::task::yield_now().await;
        wd.trigger("test");
        waiter.await.unwrap();
        // Already triggered: returns at once.
        wd.triggered().await;
    }

    #[tokio::test]
    async fn test_cleanup_outcomes() {
        let wd = ExitWatchdog::without_hard_exit(Duration::from_secs(1));
        assert_eq!(wd.shutdown(async { Ok(()) }).await, ExitOutcome::Completed);
        assert!(wd.is_triggered());

        let wd = ExitWatchdog::without_hard_exit(Duration::from_secs(1));
        let outcome = wd
            .shutdown(async { Err(Error::Transport("CDP connection closed".into())) })
            .await;
        assert_eq!(
            outcome,
            ExitOutcome::CleanupFailed("Transport error: CDP connection closed".into())
        );
        assert_eq!(outcome.exit_code(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_cleanup_is_bounded() {
        let wd = ExitWatchdog::without_hard_exit(DEFAULT_GRACE);
        let start = tokio::time::Instant::now();
        let outcome = wd.shutdown(std::future::pending::<Result<()>>()).await;
        assert_eq!(outcome, ExitOutcome::TimedOut);
        assert!(start.elapsed() >= DEFAULT_GRACE);
        assert!(start.elapsed() < DEFAULT_GRACE + Duration::from_millis(100));
    }
}
