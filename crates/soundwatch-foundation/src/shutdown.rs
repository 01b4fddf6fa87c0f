use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

/// Installs process-level shutdown plumbing: a Ctrl-C listener and a panic
/// hook that both flip the same guard. Call once from the binary, inside the
/// tokio runtime.
pub struct ShutdownHandler;

impl ShutdownHandler {
    pub fn install() -> ShutdownGuard {
        let guard = ShutdownGuard {
            notify: Arc::new(Notify::new()),
            triggered: Arc::new(AtomicBool::new(false)),
        };

        let panic_guard = guard.clone();
        let default_hook = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            tracing::error!("Panic: {}", info);
            panic_guard.trigger();
            default_hook(info);
        }));

        let signal_guard = guard.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => tracing::info!("Ctrl-C received, shutting down"),
                Err(e) => tracing::error!("Failed to listen for Ctrl-C: {}", e),
            }
            signal_guard.trigger();
        });

        guard
    }
}

#[derive(Clone)]
pub struct ShutdownGuard {
    notify: Arc<Notify>,
    triggered: Arc<AtomicBool>,
}

impl ShutdownGuard {
    pub fn trigger(&self) {
        if !self.triggered.swap(true, Ordering::SeqCst) {
            self.notify.notify_waiters();
        }
    }

    pub fn is_triggered(&self) -> bool {
        self.triggered.load(Ordering::SeqCst)
    }

    /// Resolves once shutdown has been requested. Safe to call after the
    /// fact; returns immediately if the guard already fired.
    pub async fn wait(&self) {
        let mut notified = std::pin::pin!(self.notify.notified());
        // Register before checking the flag so a trigger between the check
        // and the await cannot be missed.
        notified.as_mut().enable();
        if self.is_triggered() {
            return;
        }
        notified.await;
    }
}
