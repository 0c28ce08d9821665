//! Floating countdown widgets, rendered by whatever implements
//! [surface::WidgetSurface]. The session logic and the snap geometry know
//! nothing about the rendering technology.

pub mod session;
pub mod snap;
pub mod surface;
pub mod term;

use std::time::Duration;

use anyhow::{Context, Result};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::UnixStream,
    sync::mpsc,
};
use tracing::{debug, warn};

use crate::{
    protocol::{Push, Request, Response},
    utils::{clock::DefaultClock, dir::socket_path},
};

use session::WidgetSession;
use term::TermSurface;

const REDRAW_PERIOD: Duration = Duration::from_secs(1);

/// Runs a terminal widget surface against the daemon until ctrl-c.
///
/// The surface attaches, marks itself focused and then mirrors whatever the
/// daemon broadcasts, exactly like a freshly loaded page would.
pub async fn run_surface() -> Result<()> {
    let stream = UnixStream::connect(socket_path())
        .await
        .context("Couldn't reach the daemon. Is it running? Try `flowdeck init`.")?;
    let (read_half, mut write_half) = stream.into_split();

    let (outbound, mut outbound_receiver) = mpsc::channel::<Request>(16);
    let writer = tokio::spawn(async move {
        while let Some(request) = outbound_receiver.recv().await {
            let Ok(mut line) = serde_json::to_string(&request) else {
                break;
            };
            line.push('\n');
            if write_half.write_all(line.as_bytes()).await.is_err() {
                break;
            }
        }
    });

    let mut session = WidgetSession::new(
        TermSurface::stdout(),
        outbound.clone(),
        Box::new(DefaultClock),
    );

    outbound.send(Request::AttachSurface).await?;
    outbound.send(Request::SurfaceFocused).await?;
    // Bootstrap mirrors a page load: ask for settings, then for the list.
    outbound.send(Request::GetSettings).await?;

    let mut show_floating = true;
    let mut bootstrapped = false;
    let mut lines = BufReader::new(read_half).lines();
    let mut redraw = tokio::time::interval(REDRAW_PERIOD);
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = redraw.tick() => {
                session.redraw().await?;
            }
            line = lines.next_line() => {
                let Some(line) = line? else {
                    warn!("Daemon hung up");
                    break;
                };
                if let Ok(push) = serde_json::from_str::<Push>(&line) {
                    match push {
                        Push::Timers { timers } => session.apply_timers(timers)?,
                        Push::PlaySound { volume } => session.bell(volume),
                    }
                    continue;
                }
                match serde_json::from_str::<Response>(&line) {
                    Ok(Response::Settings(settings)) => {
                        show_floating = settings.show_floating;
                        outbound.send(Request::GetTimers).await?;
                    }
                    Ok(Response::Timers { timer_data }) => {
                        // Only the bootstrap list renders directly; any later
                        // state arrives through pushes.
                        if !bootstrapped {
                            bootstrapped = true;
                            let initial = if show_floating {
                                timer_data.into_iter().filter(|t| t.running).collect()
                            } else {
                                vec![]
                            };
                            session.apply_timers(initial)?;
                        }
                    }
                    Ok(Response::Ack { .. }) => {}
                    Err(e) => debug!("Ignoring unparseable line {line:?}: {e}"),
                }
            }
        }
    }

    session.shutdown()?;
    // The writer ends once every sender is gone, the session's clone
    // included.
    drop(session);
    drop(outbound);
    let _ = writer.await;
    Ok(())
}
