//! Client side of the connection transport: one long-lived websocket with
//! automatic reconnect, exponential backoff, and an application-level
//! keepalive. Sends are serialized through a single background task so a
//! text frame can never interleave with someone else's binary body.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use sync_core::ids::now_ms;
use sync_core::wire::{Frame, Message, KEEPALIVE_INTERVAL_SECS};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;

use crate::Backoff;

/// Observable connection state, polled by the engine to decide whether
/// outgoing incremental traffic may flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    /// No socket open and not currently attempting one.
    Disconnected,
    /// A connect attempt is in flight.
    Connecting,
    /// The websocket handshake completed; frames may flow.
    Open,
}

impl ConnState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Disconnected,
            1 => Self::Connecting,
            _ => Self::Open,
        }
    }

    fn to_u8(self) -> u8 {
        match self {
            Self::Disconnected => 0,
            Self::Connecting => 1,
            Self::Open => 2,
        }
    }
}

enum Outgoing {
    Text(Message),
    Binary(Vec<u8>),
}

/// A reconnecting client-side transport. Construct with [`ClientTransport::connect`];
/// drop (or call [`ClientTransport::disconnect`]) to stop the reconnect loop.
pub struct ClientTransport {
    outbound: mpsc::UnboundedSender<Outgoing>,
    state: Arc<AtomicU8>,
    want_connected: Arc<AtomicBool>,
}

impl ClientTransport {
    /// Begin the connect lifecycle against `url`. Returns the handle plus
    /// an inbound frame receiver the caller drains for every
    /// [`Frame`] (text messages and binary bodies) arriving on the socket.
    #[must_use]
    pub fn connect(url: String) -> (Self, mpsc::UnboundedReceiver<Frame>) {
        let (out_tx, out_rx) = mpsc::unbounded_channel::<Outgoing>();
        let (in_tx, in_rx) = mpsc::unbounded_channel::<Frame>();
        let state = Arc::new(AtomicU8::new(ConnState::Disconnected.to_u8()));
        let want_connected = Arc::new(AtomicBool::new(true));

        tokio::spawn(reconnect_loop(url, out_rx, in_tx, state.clone(), want_connected.clone()));

        (Self { outbound: out_tx, state, want_connected }, in_rx)
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnState {
        ConnState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Queue a text message. Always accepted: if the socket is mid-reconnect,
    /// the message waits in the outbound queue and flushes on the next open.
    pub fn send(&self, msg: Message) {
        let _ = self.outbound.send(Outgoing::Text(msg));
    }

    /// Send a binary body. Dropped (not queued) unless the socket is
    /// currently open, per the spec's `sendBinary` contract.
    pub fn send_binary(&self, bytes: Vec<u8>) -> bool {
        if self.state() != ConnState::Open {
            return false;
        }
        self.outbound.send(Outgoing::Binary(bytes)).is_ok()
    }

    /// Stop wanting to be connected: the reconnect loop exits after the
    /// current socket (if any) closes, rather than scheduling another
    /// attempt.
    pub fn disconnect(&self) {
        self.want_connected.store(false, Ordering::Release);
    }
}

async fn reconnect_loop(
    url: String,
    mut outbound: mpsc::UnboundedReceiver<Outgoing>,
    inbound: mpsc::UnboundedSender<Frame>,
    state: Arc<AtomicU8>,
    want_connected: Arc<AtomicBool>,
) {
    let mut backoff = Backoff::default();
    while want_connected.load(Ordering::Acquire) {
        state.store(ConnState::Connecting.to_u8(), Ordering::Release);
        match tokio_tungstenite::connect_async(&url).await {
            Ok((stream, _response)) => {
                tracing::info!(%url, "sync transport connected");
                backoff.reset();
                state.store(ConnState::Open.to_u8(), Ordering::Release);
                run_open_socket(stream, &mut outbound, &inbound).await;
                state.store(ConnState::Disconnected.to_u8(), Ordering::Release);
            }
            Err(err) => {
                tracing::warn!(%url, error = %err, "sync transport connect failed");
            }
        }
        if !want_connected.load(Ordering::Acquire) {
            break;
        }
        tokio::time::sleep(backoff.current()).await;
        backoff.advance();
    }
    state.store(ConnState::Disconnected.to_u8(), Ordering::Release);
}

async fn run_open_socket(
    stream: tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >,
    outbound: &mut mpsc::UnboundedReceiver<Outgoing>,
    inbound: &mpsc::UnboundedSender<Frame>,
) {
    let (mut write, mut read) = stream.split();
    let mut keepalive = tokio::time::interval(Duration::from_secs(KEEPALIVE_INTERVAL_SECS));
    keepalive.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    keepalive.tick().await; // first tick fires immediately; consume it

    loop {
        tokio::select! {
            maybe_out = outbound.recv() => {
                match maybe_out {
                    Some(Outgoing::Text(msg)) => {
                        let Ok(json) = serde_json::to_string(&msg) else { continue };
                        if write.send(WsMessage::Text(json)).await.is_err() {
                            return;
                        }
                    }
                    Some(Outgoing::Binary(bytes)) => {
                        if write.send(WsMessage::Binary(bytes)).await.is_err() {
                            return;
                        }
                    }
                    None => return,
                }
            }
            _ = keepalive.tick() => {
                let ping = Message::Ping { timestamp: now_ms() };
                let Ok(json) = serde_json::to_string(&ping) else { continue };
                if write.send(WsMessage::Text(json)).await.is_err() {
                    return;
                }
            }
            incoming = read.next() => {
                match incoming {
                    Some(Ok(WsMessage::Text(text))) => {
                        match serde_json::from_str::<Message>(&text) {
                            Ok(msg) => {
                                if inbound.send(Frame::Text(msg)).is_err() {
                                    return;
                                }
                            }
                            Err(err) => tracing::warn!(error = %err, "dropping malformed text frame"),
                        }
                    }
                    Some(Ok(WsMessage::Binary(bytes))) => {
                        if inbound.send(Frame::Binary(bytes)).is_err() {
                            return;
                        }
                    }
                    Some(Ok(WsMessage::Close(_))) | None => return,
                    Some(Ok(_)) => {} // ping/pong/frame control handled by tungstenite itself
                    Some(Err(err)) => {
                        tracing::warn!(error = %err, "sync transport read error");
                        return;
                    }
                }
            }
        }
    }
}
