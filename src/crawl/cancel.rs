use tokio_util::sync::CancellationToken;
use tracing::info;

/// Shared stop flag for a crawl.
///
/// Cloning hands out another handle to the same flag. The crawl only polls it
/// between units of work, so a request already on the wire always completes.
#[derive(Debug, Clone, Default)]
pub struct CancellationController {
    token: CancellationToken,
}

impl CancellationController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the crawl to stop. Later calls are no-ops.
    pub fn request_stop(&self) {
        if !self.token.is_cancelled() {
            info!("Stop requested, finishing current unit of work");
        }
        self.token.cancel();
    }

    pub fn is_stop_requested(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once a stop has been requested
    pub async fn stopped(&self) {
        self.token.cancelled().await
    }

    /// Request a stop when the process receives Ctrl-C or, on unix, SIGTERM
    pub fn stop_on_signals(&self) {
        let controller = self.clone();
        tokio::spawn(async move {
            wait_for_termination().await;
            controller.request_stop();
        });
    }
}

#[cfg(unix)]
async fn wait_for_termination() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = sigterm.recv() => {}
            }
        }
        Err(_) => {
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_termination() {
    let _ = tokio::signal::ctrl_c().await;
}
