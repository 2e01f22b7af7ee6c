use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

/// Delivered when an armed renewal timer expires. The generation ties the
/// fire to the credential it was armed for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenewalDue {
    pub generation: u64,
}

/// One-shot timer with at most one pending fire.
pub trait RenewalScheduler: Send {
    /// Arms a timer, replacing any pending one.
    fn arm(&mut self, delay: Duration, due: RenewalDue);

    fn cancel(&mut self);
}

/// Sleeps on the tokio runtime and reports expiry on a channel.
#[derive(Debug)]
pub struct TokioScheduler {
    tx: mpsc::UnboundedSender<RenewalDue>,
    pending: Option<JoinHandle<()>>,
}

impl TokioScheduler {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<RenewalDue>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx, pending: None }, rx)
    }

    pub fn is_pending(&self) -> bool {
        self.pending
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }
}

impl RenewalScheduler for TokioScheduler {
    fn arm(&mut self, delay: Duration, due: RenewalDue) {
        self.cancel();
        debug!(
            generation = due.generation,
            delay_ms = delay.as_millis() as u64,
            "arming renewal timer"
        );
        let tx = self.tx.clone();
        self.pending = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if tx.send(due).is_err() {
                trace!(generation = due.generation, "renewal receiver dropped");
            }
        }));
    }

    fn cancel(&mut self) {
        if let Some(handle) = self.pending.take() {
            handle.abort();
        }
    }
}

impl Drop for TokioScheduler {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn rearming_replaces_the_pending_timer() {
        let (mut scheduler, mut rx) = TokioScheduler::channel();

        scheduler.arm(Duration::from_secs(10), RenewalDue { generation: 1 });
        scheduler.arm(Duration::from_secs(20), RenewalDue { generation: 2 });

        tokio::time::sleep(Duration::from_secs(30)).await;

        assert_eq!(rx.recv().await, Some(RenewalDue { generation: 2 }));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_prevents_the_fire() {
        let (mut scheduler, mut rx) = TokioScheduler::channel();

        scheduler.arm(Duration::from_secs(5), RenewalDue { generation: 1 });
        scheduler.cancel();
        assert!(!scheduler.is_pending());

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(rx.try_recv().is_err());
    }
}
