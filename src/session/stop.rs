use std::sync::Arc;

use tokio::sync::watch;

/// Requests a cooperative stop. Can be cloned into signal handlers.
#[derive(Debug, Clone)]
pub struct StopHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl StopHandle {
    pub fn request(&self) {
        self.tx.send_replace(true);
    }
}

/// Observed by the session loop once per iteration.
#[derive(Debug, Clone)]
pub struct StopSignal {
    rx: watch::Receiver<bool>,
}

pub fn stop_channel() -> (StopHandle, StopSignal) {
    let (tx, rx) = watch::channel(false);
    (StopHandle { tx: Arc::new(tx) }, StopSignal { rx })
}

impl StopSignal {
    /// A signal nobody can raise.
    pub fn never() -> Self {
        stop_channel().1
    }

    pub fn is_requested(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once a stop has been requested; pends forever if every
    /// handle is gone without requesting.
    pub async fn requested(&mut self) {
        while !*self.rx.borrow_and_update() {
            if self.rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

/// Turns SIGINT and SIGTERM into a stop request.
pub fn install_signal_handlers(handle: StopHandle) {
    tokio::spawn(async move {
        wait_for_signal().await;
        log::info!("Stop requested by signal");
        handle.request();
    });
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = term.recv() => {}
            }
        }
        Err(e) => {
            log::warn!("Cannot listen for SIGTERM: {}", e);
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn request_is_visible_to_every_clone() {
        let (handle, signal) = stop_channel();
        let mut waiter = signal.clone();
        assert!(!signal.is_requested());

        let wait = tokio::spawn(async move { waiter.requested().await });
        handle.clone().request();
        tokio::time::timeout(Duration::from_secs(1), wait)
            .await
            .unwrap()
            .unwrap();
        assert!(signal.is_requested());
    }

    #[tokio::test]
    async fn never_signal_does_not_resolve() {
        let mut signal = StopSignal::never();
        assert!(!signal.is_requested());
        let waited = tokio::time::timeout(Duration::from_millis(50), signal.requested()).await;
        assert!(waited.is_err());
    }
}
