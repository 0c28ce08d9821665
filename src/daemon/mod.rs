use std::{path::PathBuf, time::Duration};

use anyhow::Result;
use broadcast::Broadcaster;
use monitor::TickMonitor;
use server::SocketServer;
use service::{DesktopNotifier, ServiceMessage, TimerService};
use storage::state::StateStorage;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::error;

use crate::utils::{
    clock::{Clock, DefaultClock},
    dir::socket_path,
};

pub mod args;
pub mod broadcast;
pub mod guard;
pub mod monitor;
pub mod server;
pub mod service;
pub mod shutdown;
pub mod storage;

const TICK_PERIOD: Duration = Duration::from_secs(1);

/// Represents the starting point for the daemon
pub async fn start_daemon(dir: PathBuf, socket: Option<PathBuf>) -> Result<()> {
    std::env::set_current_dir("/")?;

    let shutdown_token = CancellationToken::new();
    let (sender, receiver) = mpsc::channel::<ServiceMessage>(32);
    let broadcaster = Broadcaster::new();

    let service = create_service(
        dir.join("state"),
        receiver,
        broadcaster.clone(),
        DefaultClock,
    )
    .await?;
    let monitor = create_monitor(sender.clone(), &shutdown_token, DefaultClock);
    let server = SocketServer::new(
        socket.unwrap_or_else(socket_path),
        sender,
        broadcaster,
        shutdown_token.clone(),
    );

    let (_, service_result, monitor_result, server_result) = tokio::join!(
        shutdown::detect_shutdown(shutdown_token),
        service.run(),
        monitor.run(),
        server.run(),
    );

    if let Err(service_result) = service_result {
        error!("Service module got an error {:?}", service_result);
    }
    if let Err(monitor_result) = monitor_result {
        error!("Monitor module got an error {:?}", monitor_result);
    }
    if let Err(server_result) = server_result {
        error!("Server module got an error {:?}", server_result);
    }

    Ok(())
}

async fn create_service(
    state_dir: PathBuf,
    receiver: mpsc::Receiver<ServiceMessage>,
    broadcaster: Broadcaster,
    clock: impl Clock,
) -> Result<TimerService> {
    let storage = StateStorage::new(state_dir)?;
    Ok(TimerService::new(
        receiver,
        storage,
        broadcaster,
        Box::new(DesktopNotifier),
        Box::new(clock),
    )
    .await)
}

fn create_monitor(
    sender: mpsc::Sender<ServiceMessage>,
    shutdown_token: &CancellationToken,
    clock: impl Clock,
) -> TickMonitor {
    TickMonitor::new(sender, shutdown_token.clone(), TICK_PERIOD, Box::new(clock))
}

#[cfg(test)]
mod daemon_tests {
    use anyhow::Result;
    use async_trait::async_trait;
    use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
    use tempfile::tempdir;
    use tokio::{
        io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
        net::UnixStream,
        sync::mpsc,
    };
    use tokio_util::sync::CancellationToken;

    use crate::{
        daemon::{
            broadcast::Broadcaster,
            server::SocketServer,
            service::{MockNotifier, ServiceMessage, TimerService},
            storage::{entities::Timer, state::StateStorage},
        },
        protocol::{Push, Request, Response},
        utils::{clock::Clock, logging::TEST_LOGGING},
    };

    use super::create_monitor;

    const TEST_START_DATE: NaiveDateTime =
        NaiveDateTime::new(NaiveDate::from_ymd_opt(2018, 7, 4).unwrap(), NaiveTime::MIN);

    #[derive(Clone)]
    struct TestClock {
        start_time: DateTime<Utc>,
        reference: tokio::time::Instant,
    }

    #[async_trait]
    impl Clock for TestClock {
        fn time(&self) -> DateTime<Utc> {
            self.start_time + self.reference.elapsed()
        }

        fn instant(&self) -> tokio::time::Instant {
            tokio::time::Instant::now()
        }

        async fn sleep_until(&self, instant: tokio::time::Instant) {
            tokio::time::sleep_until(instant).await;
        }
    }

    async fn send(
        write_half: &mut tokio::net::unix::OwnedWriteHalf,
        request: &Request,
    ) -> Result<()> {
        let mut line = serde_json::to_vec(request)?;
        line.push(b'\n');
        write_half.write_all(&line).await?;
        Ok(())
    }

    /// Smoke test of the whole daemon: a surface connects over the socket,
    /// creates and starts a one-minute timer, and sees it expire.
    #[tokio::test(start_paused = true)]
    async fn smoke_test_daemon() -> Result<()> {
        *TEST_LOGGING;
        let dir = tempdir()?;
        let socket = dir.path().join("flowdeck.sock");
        let test_clock = TestClock {
            start_time: Utc.from_utc_datetime(&TEST_START_DATE),
            reference: tokio::time::Instant::now(),
        };

        let shutdown_token = CancellationToken::new();
        let (sender, receiver) = mpsc::channel::<ServiceMessage>(32);
        let broadcaster = Broadcaster::new();

        let mut notifier = MockNotifier::new();
        notifier.expect_notify().times(1).returning(|_, _| Ok(()));

        let storage = StateStorage::new(dir.path().join("state"))?;
        let service = TimerService::new(
            receiver,
            storage,
            broadcaster.clone(),
            Box::new(notifier),
            Box::new(test_clock.clone()),
        )
        .await;
        let monitor = create_monitor(sender.clone(), &shutdown_token, test_clock.clone());
        let server = SocketServer::new(
            socket.clone(),
            sender,
            broadcaster,
            shutdown_token.clone(),
        );

        let daemon = tokio::spawn(async move {
            let (service_result, monitor_result, server_result) =
                tokio::join!(service.run(), monitor.run(), server.run());
            service_result?;
            monitor_result?;
            server_result
        });

        let stream = loop {
            match UnixStream::connect(&socket).await {
                Ok(stream) => break stream,
                Err(_) => tokio::task::yield_now().await,
            }
        };
        let (read_half, mut write_half) = stream.into_split();
        let mut lines = BufReader::new(read_half).lines();

        send(&mut write_half, &Request::AttachSurface).await?;
        let timer = Timer {
            id: 1,
            label: "Focus".into(),
            kind: "업무".into(),
            duration: 1,
            running: false,
            color: "#2ecc71".into(),
            end_time: None,
            x: None,
            y: None,
        };
        send(&mut write_half, &Request::AddTimer { timer }).await?;
        send(&mut write_half, &Request::StartTimer { id: 1 }).await?;

        // Wait for the expiry to come through as an empty visible list after
        // a non-empty one. Responses and pushes share the stream.
        let mut saw_running = false;
        loop {
            let line = lines.next_line().await?.expect("Stream ended early");
            if let Ok(Push::Timers { timers }) = serde_json::from_str::<Push>(&line) {
                if !timers.is_empty() {
                    saw_running = true;
                } else if saw_running {
                    break;
                }
            } else {
                // Request acknowledgements pass by here.
                serde_json::from_str::<Response>(&line)?;
            }
        }

        let storage = StateStorage::new(dir.path().join("state"))?;
        let stats = storage.load_stats().await?;
        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].label, "Focus");
        assert_eq!(stats[0].duration, 1);
        assert_eq!(stats[0].kind.as_deref(), Some("업무"));

        let timers = storage.load_timers().await;
        assert!(!timers[0].running);
        assert_eq!(timers[0].end_time, None);

        shutdown_token.cancel();
        drop(write_half);
        daemon.await??;
        Ok(())
    }
}
