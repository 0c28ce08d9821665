use std::path::PathBuf;

use anyhow::Result;
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{UnixListener, UnixStream},
    sync::{mpsc, oneshot},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::protocol::{Push, Request};

use super::{
    broadcast::{Broadcaster, SessionId},
    service::ServiceMessage,
};

const SESSION_QUEUE: usize = 16;

/// Control socket of the daemon. Clients connect, write one JSON request per
/// line and read one JSON response per request; a connection that attaches as
/// a surface additionally receives push lines on the same stream.
pub struct SocketServer {
    path: PathBuf,
    service: mpsc::Sender<ServiceMessage>,
    broadcaster: Broadcaster,
    shutdown: CancellationToken,
}

impl SocketServer {
    pub fn new(
        path: PathBuf,
        service: mpsc::Sender<ServiceMessage>,
        broadcaster: Broadcaster,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            path,
            service,
            broadcaster,
            shutdown,
        }
    }

    pub async fn run(self) -> Result<()> {
        // A previous daemon may have left its socket file behind.
        let _ = std::fs::remove_file(&self.path);
        let listener = UnixListener::bind(&self.path)?;
        info!("Listening on {:?}", self.path);

        let mut next_session: SessionId = 1;
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    let _ = std::fs::remove_file(&self.path);
                    return Ok(());
                }
                accepted = listener.accept() => {
                    let stream = match accepted {
                        Ok((stream, _)) => stream,
                        Err(e) => {
                            warn!("Failed to accept connection: {e}");
                            continue;
                        }
                    };
                    let session = next_session;
                    next_session += 1;
                    debug!("Session {session} connected");
                    let service = self.service.clone();
                    let broadcaster = self.broadcaster.clone();
                    let shutdown = self.shutdown.clone();
                    tokio::spawn(async move {
                        if let Err(e) =
                            handle_connection(stream, session, service, &broadcaster, shutdown).await
                        {
                            debug!("Session {session} ended: {e:?}");
                        }
                        broadcaster.unregister(session);
                    });
                }
            }
        }
    }
}

async fn handle_connection(
    stream: UnixStream,
    session: SessionId,
    service: mpsc::Sender<ServiceMessage>,
    broadcaster: &Broadcaster,
    shutdown: CancellationToken,
) -> Result<()> {
    let (read_half, mut write_half) = stream.into_split();

    // Responses and pushes funnel through one channel so their lines never
    // interleave on the stream.
    let (out_sender, mut out_receiver) = mpsc::channel::<String>(SESSION_QUEUE);
    let writer = tokio::spawn(async move {
        while let Some(mut line) = out_receiver.recv().await {
            line.push('\n');
            if write_half.write_all(line.as_bytes()).await.is_err() {
                break;
            }
        }
    });

    let mut lines = BufReader::new(read_half).lines();
    loop {
        let line = tokio::select! {
            _ = shutdown.cancelled() => break,
            line = lines.next_line() => line?,
        };
        let Some(line) = line else {
            break;
        };
        if line.trim().is_empty() {
            continue;
        }
        let request: Request = match serde_json::from_str(&line) {
            Ok(request) => request,
            Err(e) => {
                // Not worth killing the connection over.
                warn!("Session {session}: ignoring malformed request {line:?}: {e}");
                continue;
            }
        };

        if matches!(request, Request::AttachSurface) {
            broadcaster.register(session, push_bridge(out_sender.clone()));
        }

        let (respond, response) = oneshot::channel();
        let message = ServiceMessage::Request {
            request,
            session,
            respond,
        };
        if service.send(message).await.is_err() {
            break;
        }
        let Ok(response) = response.await else {
            break;
        };
        out_sender.send(serde_json::to_string(&response)?).await?;
    }

    drop(out_sender);
    let _ = writer.await;
    Ok(())
}

/// Serializes pushes onto the session's shared output channel.
fn push_bridge(out_sender: mpsc::Sender<String>) -> mpsc::Sender<Push> {
    let (push_sender, mut push_receiver) = mpsc::channel::<Push>(SESSION_QUEUE);
    tokio::spawn(async move {
        while let Some(push) = push_receiver.recv().await {
            let Ok(line) = serde_json::to_string(&push) else {
                break;
            };
            if out_sender.send(line).await.is_err() {
                break;
            }
        }
    });
    push_sender
}

#[cfg(test)]
mod tests {
    use anyhow::Result;
    use tokio::{
        io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
        net::UnixStream,
        sync::mpsc,
    };
    use tokio_util::sync::CancellationToken;

    use crate::{
        daemon::{broadcast::Broadcaster, service::ServiceMessage},
        protocol::{Push, Request, Response},
    };

    use super::SocketServer;

    /// Answers every request with an ack, like a service with no timers.
    fn stub_service() -> mpsc::Sender<ServiceMessage> {
        let (sender, mut receiver) = mpsc::channel(16);
        tokio::spawn(async move {
            while let Some(ServiceMessage::Request { respond, .. }) = receiver.recv().await {
                let _ = respond.send(Response::ok());
            }
        });
        sender
    }

    #[tokio::test]
    async fn test_request_response_and_push() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("flowdeck.sock");
        let broadcaster = Broadcaster::new();
        let shutdown = CancellationToken::new();
        let server = SocketServer::new(
            path.clone(),
            stub_service(),
            broadcaster.clone(),
            shutdown.clone(),
        );
        let server_handle = tokio::spawn(server.run());

        // The listener may not be up yet when we connect.
        let stream = loop {
            match UnixStream::connect(&path).await {
                Ok(stream) => break stream,
                Err(_) => tokio::task::yield_now().await,
            }
        };
        let (read_half, mut write_half) = stream.into_split();
        let mut lines = BufReader::new(read_half).lines();

        write_half
            .write_all(b"{\"type\":\"attachSurface\"}\n")
            .await?;
        let ack: Response = serde_json::from_str(&lines.next_line().await?.unwrap())?;
        assert_eq!(ack, Response::ok());

        broadcaster.broadcast(&[], &Default::default());
        let push: Push = serde_json::from_str(&lines.next_line().await?.unwrap())?;
        assert_eq!(push, Push::Timers { timers: vec![] });

        shutdown.cancel();
        server_handle.await??;
        assert!(!path.exists());
        Ok(())
    }

    #[tokio::test]
    async fn test_malformed_line_does_not_kill_connection() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("flowdeck.sock");
        let shutdown = CancellationToken::new();
        let server = SocketServer::new(
            path.clone(),
            stub_service(),
            Broadcaster::new(),
            shutdown.clone(),
        );
        tokio::spawn(server.run());

        let stream = loop {
            match UnixStream::connect(&path).await {
                Ok(stream) => break stream,
                Err(_) => tokio::task::yield_now().await,
            }
        };
        let (read_half, mut write_half) = stream.into_split();
        let mut lines = BufReader::new(read_half).lines();

        write_half.write_all(b"this is not json\n").await?;
        write_half
            .write_all(&[serde_json::to_vec(&Request::GetTimers)?, vec![b'\n']].concat())
            .await?;

        let response: Response = serde_json::from_str(&lines.next_line().await?.unwrap())?;
        assert_eq!(response, Response::ok());

        shutdown.cancel();
        Ok(())
    }
}
