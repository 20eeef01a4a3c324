//! Inbound side: one TCP listener, one task per connection, frames handled in arrival order.

use std::net::SocketAddr;
use std::time::Duration;

use lanpost_core::events::{notification_body, notification_title};
use lanpost_core::{decode_envelope, peer_ip, FrameDecoder, Message, Role, Sender};
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

use crate::node::Node;

const READ_BUF: usize = 64 * 1024;
const ACCEPT_BACKOFF: Duration = Duration::from_millis(200);

/// The process's only listening socket. Built once in `main` and consumed by [`Listener::run`].
pub struct Listener {
    inner: TcpListener,
}

impl Listener {
    pub async fn bind(addr: SocketAddr) -> std::io::Result<Self> {
        let inner = TcpListener::bind(addr).await?;
        Ok(Self { inner })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.inner.local_addr()
    }

    /// Accept forever. Accept errors are logged and retried after a short pause.
    pub async fn run(self, node: Node) {
        if let Ok(addr) = self.inner.local_addr() {
            info!(%addr, framing = %node.config.framing, "listening");
        }
        loop {
            match self.inner.accept().await {
                Ok((stream, remote)) => {
                    let node = node.clone();
                    tokio::spawn(async move {
                        handle_connection(stream, remote, node).await;
                    });
                }
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                }
            }
        }
    }
}

/// Read until the peer closes; the connection is never closed from this side.
async fn handle_connection(mut stream: TcpStream, remote: SocketAddr, node: Node) {
    let peer = peer_ip(&remote);
    debug!(%peer, "connection accepted");
    let mut decoder = FrameDecoder::with_limit(node.config.framing, node.config.max_frame_bytes);
    let mut buf = vec![0u8; READ_BUF];
    loop {
        let n = match stream.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                debug!(%peer, error = %e, "read failed, closing");
                break;
            }
        };
        let decoded = decoder.push(&buf[..n]);
        for e in decoded.errors {
            warn!(%peer, error = %e, "framing");
        }
        for frame in decoded.frames {
            dispatch(&node, &peer, &frame).await;
        }
    }
    if decoder.buffered() > 0 {
        debug!(%peer, bytes = decoder.buffered(), "connection closed mid-frame");
    }
    debug!(%peer, "connection closed");
}

/// Decode, materialize, record and notify one frame. Failures are logged, never propagated.
async fn dispatch(node: &Node, peer: &str, frame: &[u8]) {
    let envelope = match decode_envelope(frame) {
        Ok(env) => env,
        Err(e) => {
            warn!(%peer, error = %e, len = frame.len(), "dropping malformed frame");
            return;
        }
    };
    let envelope = node
        .media
        .materialize_or_placeholder(envelope, Role::Received)
        .await;
    let message = Message::from_envelope(envelope, Sender::Other);
    let (kind, body) = (message.kind, notification_body(message.kind, &message.content));

    if let Err(e) = node.history.append(peer, message).await {
        warn!(%peer, error = %e, "could not store received message");
    }

    let contact = match node.contacts.find_by_ip(peer).await {
        Ok(c) => c,
        Err(e) => {
            warn!(%peer, error = %e, "contact lookup failed");
            None
        }
    };
    node.notifier
        .notify(&notification_title(contact.as_ref(), peer), &body);
    debug!(%peer, %kind, "message received");
}
