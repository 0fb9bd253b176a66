// Long-lived duplex channels, one per job family.
//
// Each channel is owned by a dedicated reader thread running a blocking
// tungstenite socket with a short read timeout; outbound requests are
// queued to the thread, inbound frames are forwarded to the session's
// dispatcher over a tokio channel.

use std::sync::mpsc as std_mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, warn};
use tungstenite::stream::MaybeTlsStream;
use tungstenite::Message;

use cellgrid_core::{Error, Result};

/// Closed enumeration of long-running server computation families. Each
/// family has its own duplex channel and message schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobFamily {
    DiffExp,
    Reembedding,
    Sankey,
    Leiden,
    DownloadAnndata,
}

impl JobFamily {
    pub const ALL: [JobFamily; 5] = [
        JobFamily::DiffExp,
        JobFamily::Reembedding,
        JobFamily::Sankey,
        JobFamily::Leiden,
        JobFamily::DownloadAnndata,
    ];

    /// Wire tag carried in the `cfn` field of every inbound message, and
    /// the channel's endpoint path.
    #[must_use]
    pub fn tag(&self) -> &'static str {
        match self {
            JobFamily::DiffExp => "diffexp",
            JobFamily::Reembedding => "reembedding",
            JobFamily::Sankey => "sankey",
            JobFamily::Leiden => "leiden",
            JobFamily::DownloadAnndata => "downloadAnndata",
        }
    }

    #[must_use]
    pub fn from_tag(tag: &str) -> Option<JobFamily> {
        JobFamily::ALL.iter().copied().find(|f| f.tag() == tag)
    }
}

impl std::fmt::Display for JobFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.tag())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Disconnected,
    Connecting,
    Open,
    Receiving,
    Idle,
    Closing,
}

/// Raw channel traffic forwarded to the session dispatcher.
#[derive(Debug)]
pub enum ChannelEvent {
    Frame { family: JobFamily, text: String },
    Disconnected { family: JobFamily },
}

enum OutboundCmd {
    Send(String),
    Close,
}

/// One persistent duplex channel for a job family.
pub struct JobChannel {
    family: JobFamily,
    state: Arc<RwLock<ChannelState>>,
    outbound: std_mpsc::Sender<OutboundCmd>,
}

impl JobChannel {
    /// Connect in the background and start the reader loop. Inbound frames
    /// and the eventual disconnect are delivered on `inbound`.
    #[must_use]
    pub fn connect(
        family: JobFamily,
        ws_url: String,
        inbound: UnboundedSender<ChannelEvent>,
    ) -> JobChannel {
        let state = Arc::new(RwLock::new(ChannelState::Disconnected));
        let (out_tx, out_rx) = std_mpsc::channel::<OutboundCmd>();

        let thread_state = Arc::clone(&state);
        thread::Builder::new()
            .name(format!("ws-{}", family.tag()))
            .spawn(move || {
                run_socket_loop(family, &ws_url, &thread_state, &out_rx, &inbound);
            })
            .ok();

        JobChannel {
            family,
            state,
            outbound: out_tx,
        }
    }

    #[inline]
    #[must_use]
    pub fn family(&self) -> JobFamily {
        self.family
    }

    #[must_use]
    pub fn state(&self) -> ChannelState {
        *self.state.read()
    }

    /// Queue a one-shot JSON request to the server.
    pub fn send(&self, message: &serde_json::Value) -> Result<()> {
        let text = message.to_string();
        self.outbound
            .send(OutboundCmd::Send(text))
            .map_err(|_| Error::ChannelClosed(self.family.tag().to_string()))
    }

    pub fn close(&self) {
        *self.state.write() = ChannelState::Closing;
        let _ = self.outbound.send(OutboundCmd::Close);
    }
}

fn set_read_timeout(socket: &mut tungstenite::WebSocket<MaybeTlsStream<std::net::TcpStream>>) {
    let timeout = Some(Duration::from_millis(250));
    match socket.get_mut() {
        MaybeTlsStream::Plain(stream) => {
            let _ = stream.set_read_timeout(timeout);
        }
        MaybeTlsStream::Rustls(stream) => {
            let _ = stream.sock.set_read_timeout(timeout);
        }
        _ => {}
    }
}

fn is_would_block(err: &tungstenite::Error) -> bool {
    matches!(
        err,
        tungstenite::Error::Io(io)
            if io.kind() == std::io::ErrorKind::WouldBlock
                || io.kind() == std::io::ErrorKind::TimedOut
    )
}

fn run_socket_loop(
    family: JobFamily,
    ws_url: &str,
    state: &Arc<RwLock<ChannelState>>,
    out_rx: &std_mpsc::Receiver<OutboundCmd>,
    inbound: &UnboundedSender<ChannelEvent>,
) {
    *state.write() = ChannelState::Connecting;
    let mut socket = match tungstenite::connect(ws_url) {
        Ok((socket, _response)) => socket,
        Err(err) => {
            warn!(family = %family, error = %err, "channel connect failed");
            *state.write() = ChannelState::Disconnected;
            let _ = inbound.send(ChannelEvent::Disconnected { family });
            return;
        }
    };
    set_read_timeout(&mut socket);
    *state.write() = ChannelState::Open;
    debug!(family = %family, "channel open");

    let mut closing = false;
    loop {
        while let Ok(cmd) = out_rx.try_recv() {
            match cmd {
                OutboundCmd::Send(text) => {
                    if let Err(err) = socket.send(Message::Text(text.into())) {
                        warn!(family = %family, error = %err, "channel send failed");
                        closing = true;
                    }
                }
                OutboundCmd::Close => closing = true,
            }
        }
        if closing {
            *state.write() = ChannelState::Closing;
            let _ = socket.close(None);
            break;
        }

        match socket.read() {
            Ok(Message::Text(text)) => {
                *state.write() = ChannelState::Receiving;
                let _ = inbound.send(ChannelEvent::Frame {
                    family,
                    text: text.as_str().to_string(),
                });
                *state.write() = ChannelState::Idle;
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(err) if is_would_block(&err) => {}
            Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => {
                break;
            }
            Err(err) => {
                warn!(family = %family, error = %err, "channel read failed");
                break;
            }
        }
    }

    *state.write() = ChannelState::Disconnected;
    let _ = inbound.send(ChannelEvent::Disconnected { family });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_family_tags_round_trip() {
        for family in JobFamily::ALL {
            assert_eq!(JobFamily::from_tag(family.tag()), Some(family));
        }
        assert_eq!(JobFamily::from_tag("nope"), None);
    }
}
