//! Server side of the connection transport: websocket upgrade plumbing
//! shared by the `/sync` and `/ui` routes. The dispatcher in `sync-server`
//! owns what happens after the upgrade; this module only owns getting a
//! framed, correctly-sized, uncompressed socket and the caller's source
//! address.

use std::net::{IpAddr, SocketAddr};

use axum::extract::ws::{Message as AxumWsMessage, WebSocket};
use axum::http::HeaderMap;
use futures_util::{SinkExt, StreamExt};
use sync_core::wire::{Frame, Message, MAX_FRAME_BYTES};

/// Resolve the caller's address: the first segment of `X-Forwarded-For`
/// when present (a reverse proxy sits in front of the listener), else the
/// transport-level peer address.
#[must_use]
pub fn source_addr(headers: &HeaderMap, peer: SocketAddr) -> IpAddr {
    if let Some(xff) = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
        if let Some(first) = xff.split(',').next() {
            if let Ok(ip) = first.trim().parse::<IpAddr>() {
                return ip;
            }
        }
    }
    peer.ip()
}

/// A single accepted server-side socket, framed the same way as the
/// client transport: [`Frame::Text`] for JSON messages, [`Frame::Binary`]
/// for raw blob bodies. 256 MiB oversized frames are rejected by closing
/// the socket (enforced by the axum websocket config at upgrade time;
/// `recv` additionally checks in case a layer ever relaxes that limit).
pub struct ServerSocket {
    socket: WebSocket,
}

impl ServerSocket {
    /// Wrap an already-upgraded axum [`WebSocket`].
    #[must_use]
    pub fn new(socket: WebSocket) -> Self {
        Self { socket }
    }

    /// Receive the next frame, or `None` on a clean close / transport error.
    pub async fn recv(&mut self) -> Option<Frame> {
        loop {
            match self.socket.next().await? {
                Ok(AxumWsMessage::Text(text)) => {
                    if text.len() > MAX_FRAME_BYTES {
                        return None;
                    }
                    return match serde_json::from_str::<Message>(&text) {
                        Ok(msg) => Some(Frame::Text(msg)),
                        Err(err) => {
                            tracing::warn!(error = %err, "invalid JSON frame");
                            None
                        }
                    };
                }
                Ok(AxumWsMessage::Binary(bytes)) => {
                    if bytes.len() > MAX_FRAME_BYTES {
                        return None;
                    }
                    return Some(Frame::Binary(bytes));
                }
                Ok(AxumWsMessage::Close(_)) => return None,
                Ok(_) => continue, // ping/pong handled by axum
                Err(err) => {
                    tracing::warn!(error = %err, "websocket read error");
                    return None;
                }
            }
        }
    }

    /// Send a JSON text message.
    pub async fn send_text(&mut self, msg: &Message) -> Result<(), axum::Error> {
        let json = serde_json::to_string(msg).expect("Message always serializes");
        self.socket.send(AxumWsMessage::Text(json)).await
    }

    /// Send a raw binary body (a file blob).
    pub async fn send_binary(&mut self, bytes: Vec<u8>) -> Result<(), axum::Error> {
        self.socket.send(AxumWsMessage::Binary(bytes)).await
    }

    /// Close the socket with a protocol-defined close code (see
    /// `sync_core::wire::close_code`).
    pub async fn close_with_code(mut self, code: u16, reason: &str) {
        use axum::extract::ws::CloseFrame;
        let _ = self
            .socket
            .send(AxumWsMessage::Close(Some(CloseFrame {
                code,
                reason: reason.to_owned().into(),
            })))
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn peer() -> SocketAddr {
        "10.0.0.9:1234".parse().unwrap()
    }

    #[test]
    fn forwarded_for_takes_priority() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("203.0.113.5, 10.0.0.1"));
        assert_eq!(source_addr(&headers, peer()), "203.0.113.5".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn falls_back_to_peer_address() {
        let headers = HeaderMap::new();
        assert_eq!(source_addr(&headers, peer()), peer().ip());
    }

    #[test]
    fn malformed_forwarded_for_falls_back() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("not-an-ip"));
        assert_eq!(source_addr(&headers, peer()), peer().ip());
    }
}
