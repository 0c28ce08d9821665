use anyhow::{bail, Context, Result};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines},
    net::{
        unix::{OwnedReadHalf, OwnedWriteHalf},
        UnixStream,
    },
};
use tracing::debug;

use crate::{
    daemon::storage::entities::{Settings, Timer},
    protocol::{Push, Request, Response},
    utils::dir::socket_path,
};

/// Request/response connection to the daemon's control socket.
pub struct DaemonClient {
    lines: Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
}

impl DaemonClient {
    pub async fn connect() -> Result<Self> {
        Self::connect_to(socket_path()).await
    }

    pub async fn connect_to(path: std::path::PathBuf) -> Result<Self> {
        let stream = UnixStream::connect(&path)
            .await
            .context("Couldn't reach the daemon. Is it running? Try `flowdeck init`.")?;
        let (read_half, writer) = stream.into_split();
        Ok(Self {
            lines: BufReader::new(read_half).lines(),
            writer,
        })
    }

    pub async fn request(&mut self, request: &Request) -> Result<Response> {
        let mut line = serde_json::to_string(request)?;
        line.push('\n');
        self.writer.write_all(line.as_bytes()).await?;

        loop {
            let Some(line) = self.lines.next_line().await? else {
                bail!("Daemon closed the connection");
            };
            // Pushes can interleave with responses on the same stream.
            if serde_json::from_str::<Push>(&line).is_ok() {
                continue;
            }
            return serde_json::from_str(&line).context("Malformed response from the daemon");
        }
    }

    /// The timer list of a response. Anything unexpected counts as an empty
    /// list; the caller shows stale or no state instead of failing.
    pub async fn timers(&mut self, request: &Request) -> Vec<Timer> {
        match self.request(request).await {
            Ok(response) => response.into_timers().unwrap_or_default(),
            Err(e) => {
                debug!("Request failed: {e:?}");
                vec![]
            }
        }
    }

    pub async fn settings(&mut self, request: &Request) -> Option<Settings> {
        match self.request(request).await {
            Ok(response) => response.into_settings(),
            Err(e) => {
                debug!("Request failed: {e:?}");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use anyhow::Result;
    use tokio::{
        io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
        net::UnixListener,
    };

    use crate::protocol::Request;

    use super::DaemonClient;

    /// A server that answers each incoming request line with the next
    /// scripted answer, which may span several lines.
    fn scripted_server(answers: Vec<&'static str>) -> Result<std::path::PathBuf> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("flowdeck.sock");
        let listener = UnixListener::bind(&path)?;
        tokio::spawn(async move {
            let _dir = dir;
            let (stream, _) = listener.accept().await.unwrap();
            let (read_half, mut write_half) = stream.into_split();
            let mut lines = BufReader::new(read_half).lines();
            let mut answers = answers.into_iter();
            while let Ok(Some(_)) = lines.next_line().await {
                let Some(answer) = answers.next() else { break };
                write_half
                    .write_all(format!("{answer}\n").as_bytes())
                    .await
                    .unwrap();
            }
        });
        Ok(path)
    }

    #[tokio::test]
    async fn test_pushes_are_skipped_before_the_response() -> Result<()> {
        // A push slips onto the stream ahead of the actual response.
        let path = scripted_server(vec![
            "{\"type\":\"timers\",\"timers\":[]}\n{\"timerData\":[]}",
        ])?;
        let mut client = DaemonClient::connect_to(path).await?;
        let response = client.request(&Request::GetTimers).await?;
        assert_eq!(response.into_timers(), Some(vec![]));
        Ok(())
    }

    #[tokio::test]
    async fn test_malformed_response_defaults_to_empty_list() -> Result<()> {
        let path = scripted_server(vec!["not json at all"])?;
        let mut client = DaemonClient::connect_to(path).await?;
        assert!(client.timers(&Request::GetTimers).await.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_closed_connection_is_an_error_not_a_response() -> Result<()> {
        let path = scripted_server(vec![])?;
        let mut client = DaemonClient::connect_to(path).await?;
        assert!(client.request(&Request::GetTimers).await.is_err());
        assert_eq!(client.settings(&Request::GetSettings).await, None);
        Ok(())
    }
}
