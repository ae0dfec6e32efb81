use async_trait::async_trait;
use std::time::Duration;

/// Source of delays for pacing and retry cooldowns. Injected into the
/// scheduler so tests can observe or skip waits.
#[async_trait]
pub trait Clock: Send + Sync + 'static {
    async fn sleep(&self, duration: Duration);
}

/// Real time, backed by the tokio timer.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioClock;

#[async_trait]
impl Clock for TokioClock {
    async fn sleep(&self, duration: Duration) {
        if !duration.is_zero() {
            tokio::time::sleep(duration).await;
        }
    }
}
