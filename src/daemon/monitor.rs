use std::time::Duration;

use anyhow::Result;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::utils::clock::Clock;

use super::service::ServiceMessage;

/// Drives the expiry sweep: one tick per second into the service, second
/// granularity being all the accuracy countdown minutes need.
pub struct TickMonitor {
    service: mpsc::Sender<ServiceMessage>,
    shutdown: CancellationToken,
    period: Duration,
    time_provider: Box<dyn Clock>,
}

impl TickMonitor {
    pub fn new(
        service: mpsc::Sender<ServiceMessage>,
        shutdown: CancellationToken,
        period: Duration,
        time_provider: Box<dyn Clock>,
    ) -> Self {
        Self {
            service,
            shutdown,
            period,
            time_provider,
        }
    }

    /// Executes the tick loop. Ticks are anchored to the start instant, not
    /// to when the previous sweep finished, so slow sweeps don't drift.
    pub async fn run(self) -> Result<()> {
        let mut tick_point = self.time_provider.instant();
        loop {
            tick_point += self.period;

            if self.service.send(ServiceMessage::Tick).await.is_err() {
                // Service is gone, nothing left to drive.
                debug!("Tick receiver dropped, stopping monitor");
                return Ok(());
            }

            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    return Ok(())
                }
                _ = self.time_provider.sleep_until(tick_point) => ()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use anyhow::Result;
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    use crate::{daemon::service::ServiceMessage, utils::clock::DefaultClock};

    use super::TickMonitor;

    #[tokio::test(start_paused = true)]
    async fn test_ticks_once_per_period() -> Result<()> {
        let (sender, mut receiver) = mpsc::channel(16);
        let shutdown = CancellationToken::new();
        let monitor = TickMonitor::new(
            sender,
            shutdown.clone(),
            Duration::from_secs(1),
            Box::new(DefaultClock),
        );
        let handle = tokio::spawn(monitor.run());

        for _ in 0..3 {
            assert!(matches!(
                receiver.recv().await,
                Some(ServiceMessage::Tick)
            ));
        }

        shutdown.cancel();
        handle.await??;
        Ok(())
    }

    #[tokio::test]
    async fn test_stops_when_service_is_gone() -> Result<()> {
        let (sender, receiver) = mpsc::channel(16);
        drop(receiver);
        let monitor = TickMonitor::new(
            sender,
            CancellationToken::new(),
            Duration::from_millis(1),
            Box::new(DefaultClock),
        );
        monitor.run().await?;
        Ok(())
    }
}
