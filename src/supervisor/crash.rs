use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::services::ProcessHandle;

pub type CrashCallback = Box<dyn FnOnce() + Send + 'static>;

/// Polls a client process and invokes the callback once if it disappears.
#[derive(Debug)]
pub struct CrashDetector {
    cancel: CancellationToken,
}

impl CrashDetector {
    pub fn spawn(
        name: impl Into<String>,
        process: Arc<dyn ProcessHandle>,
        poll: Duration,
        on_crash: CrashCallback,
    ) -> Self {
        let name = name.into();
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => return,
                    _ = tokio::time::sleep(poll) => {}
                }
                if process.is_alive().await {
                    continue;
                }
                if token.is_cancelled() {
                    return;
                }
                log::warn!("{}: client process {:?} is gone", name, process.pid());
                on_crash();
                return;
            }
        });

        Self { cancel }
    }

    /// Disarms the detector. The callback will not run afterwards.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }
}
