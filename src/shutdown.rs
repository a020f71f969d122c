//! Per-process shutdown channel fed by OS termination signals.
//!
//! Each process (the CLI, the watchdog host) installs one
//! [`ShutdownSignal`]. SIGINT/Ctrl-C, SIGTERM, or an explicit
//! [`ShutdownSignal::trigger`] all fire the same token; whoever owns the
//! launched engine listens for it and runs its kill path once.

use tokio_util::sync::CancellationToken;

/// Shared, cloneable shutdown trigger.
#[derive(Debug, Clone, Default)]
pub struct ShutdownSignal {
    token: CancellationToken,
}

impl ShutdownSignal {
    /// Create a signal that only fires when [`trigger`](Self::trigger) is called.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a signal and route SIGINT/SIGTERM into it.
    ///
    /// Must be called from within a tokio runtime.
    pub fn install() -> Self {
        let signal = Self::new();
        let token = signal.token.clone();
        tokio::spawn(async move {
            tokio::select! {
                () = wait_for_os_signal() => token.cancel(),
                () = token.cancelled() => {}
            }
        });
        signal
    }

    /// Fire the signal. Repeated calls are no-ops.
    pub fn trigger(&self) {
        self.token.cancel();
    }

    /// Whether the signal has fired.
    pub fn is_triggered(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once the signal fires.
    pub async fn cancelled(&self) {
        self.token.cancelled().await;
    }
}

async fn wait_for_os_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    tracing::info!("Termination signal received, shutting down");
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn test_trigger_wakes_all_clones() {
        let signal = ShutdownSignal::new();
        let waiter = signal.clone();
        let handle = tokio::spawn(async move { waiter.cancelled().await });

        assert!(!signal.is_triggered());
        signal.trigger();
        signal.trigger();

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(signal.is_triggered());
    }
}
