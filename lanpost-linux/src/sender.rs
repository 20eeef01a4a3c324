//! Outbound side: one fresh connection per message, then a local copy in history.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use lanpost_core::protocol::{self, Envelope, Message, MessageKind};
use lanpost_core::{encode_frame, normalize_peer_ip, FrameEncodeError, Role};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use crate::node::Node;

#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("no peer address given")]
    NoPeerAddress,
    #[error("connect failed: {0}")]
    Connect(#[source] std::io::Error),
    #[error("connect timed out after {0:?}")]
    Timeout(Duration),
    #[error("write failed: {0}")]
    Write(#[source] std::io::Error),
    #[error(transparent)]
    Encode(#[from] FrameEncodeError),
}

/// Delivers messages to peers on the configured port.
#[derive(Clone)]
pub struct Sender {
    node: Node,
}

impl Sender {
    pub fn new(node: Node) -> Self {
        Self { node }
    }

    /// Deliver one message to `peer_ip` and record it as ours. No retry.
    pub async fn send(&self, peer_ip: &str, envelope: Envelope) -> Result<Message, SendError> {
        self.send_via(peer_ip, envelope, |peer, port| async move {
            TcpStream::connect((peer.as_str(), port)).await
        })
        .await
    }

    /// [`Sender::send`] over whatever stream `dial` opens.
    async fn send_via<D, F, S>(
        &self,
        peer_ip: &str,
        envelope: Envelope,
        dial: D,
    ) -> Result<Message, SendError>
    where
        D: FnOnce(String, u16) -> F,
        F: Future<Output = std::io::Result<S>>,
        S: AsyncWrite + Unpin,
    {
        let peer = normalize_peer_ip(peer_ip.trim());
        if peer.is_empty() {
            return Err(SendError::NoPeerAddress);
        }
        let config = &self.node.config;
        let frame = encode_frame(&envelope, config.framing)?;

        let attempt = dial(peer.clone(), config.port);
        let mut stream = connect_within(config.connect_timeout(), attempt).await?;
        stream.write_all(&frame).await.map_err(SendError::Write)?;
        stream.flush().await.map_err(SendError::Write)?;
        debug!(%peer, kind = %envelope.kind, bytes = frame.len(), "delivered");

        let envelope = self
            .node
            .media
            .materialize_or_placeholder(envelope, Role::Sent)
            .await;
        let message = Message::from_envelope(envelope, protocol::Sender::Me);
        if let Err(e) = self.node.history.append(&peer, message.clone()).await {
            warn!(%peer, error = %e, "delivered but could not store local copy");
        }
        if let Err(e) = stream.shutdown().await {
            debug!(%peer, error = %e, "shutdown after send");
        }
        info!(%peer, kind = %message.kind, "message sent");
        Ok(message)
    }
}

/// Bound a connect attempt. The timer is dropped as soon as the attempt resolves.
async fn connect_within<S>(
    limit: Duration,
    attempt: impl Future<Output = std::io::Result<S>>,
) -> Result<S, SendError> {
    match tokio::time::timeout(limit, attempt).await {
        Ok(Ok(stream)) => Ok(stream),
        Ok(Err(e)) => Err(SendError::Connect(e)),
        Err(_) => Err(SendError::Timeout(limit)),
    }
}

/// Text ready to send: trimmed, or `None` when nothing is left.
pub fn compose_text(text: &str) -> Option<Envelope> {
    match text.trim() {
        "" => None,
        t => Some(Envelope::text(t)),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AttachmentError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{path} is {size} bytes; the limit is {max}")]
    TooLarge { path: PathBuf, size: u64, max: u64 },
    #[error("cannot tell the media kind of {0}; pass --kind")]
    UnknownKind(PathBuf),
    #[error("attachments must be image, video or audio")]
    NotMedia,
}

/// A local media file picked or recorded by the user, encoded for the wire.
#[derive(Debug, Clone)]
pub struct Attachment {
    pub kind: MessageKind,
    pub size: u64,
    pub file_name: Option<String>,
    content: String,
}

impl Attachment {
    /// Read `path`. `kind` is inferred from the extension when not given.
    pub async fn load(
        path: &Path,
        kind: Option<MessageKind>,
        max_bytes: u64,
    ) -> Result<Self, AttachmentError> {
        let kind = match kind {
            Some(MessageKind::Text) => return Err(AttachmentError::NotMedia),
            Some(k) => k,
            None => kind_from_extension(path)
                .ok_or_else(|| AttachmentError::UnknownKind(path.to_path_buf()))?,
        };
        let io_err = |source| AttachmentError::Io {
            path: path.to_path_buf(),
            source,
        };
        let size = tokio::fs::metadata(path).await.map_err(io_err)?.len();
        if size > max_bytes {
            return Err(AttachmentError::TooLarge {
                path: path.to_path_buf(),
                size,
                max: max_bytes,
            });
        }
        let bytes = tokio::fs::read(path).await.map_err(io_err)?;
        Ok(Self {
            kind,
            size,
            file_name: path.file_name().map(|n| n.to_string_lossy().into_owned()),
            content: STANDARD.encode(bytes),
        })
    }

    pub fn into_envelope(self) -> Envelope {
        Envelope {
            kind: self.kind,
            content: self.content,
            file_name: self.file_name,
        }
    }
}

fn kind_from_extension(path: &Path) -> Option<MessageKind> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "jpg" | "jpeg" | "png" | "gif" | "webp" | "heic" | "bmp" => Some(MessageKind::Image),
        "mp4" | "mov" | "mkv" | "webm" | "3gp" | "avi" => Some(MessageKind::Video),
        "mp3" | "m4a" | "aac" | "wav" | "ogg" | "opus" | "amr" => Some(MessageKind::Audio),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::node::testing;
    use lanpost_core::media::resolve_file_uri;
    use lanpost_core::{decode_envelope, FrameDecoder, Framing};
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    /// Accept one connection and return every envelope it carried.
    async fn receive_one(listener: TcpListener, framing: Framing) -> Vec<Envelope> {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut bytes = Vec::new();
        stream.read_to_end(&mut bytes).await.unwrap();
        FrameDecoder::new(framing)
            .push(&bytes)
            .frames
            .iter()
            .map(|f| decode_envelope(f).unwrap())
            .collect()
    }

    async fn sender_for(dir: &Path, port: u16, framing: Framing) -> (Sender, Node) {
        let config = Config {
            port,
            framing,
            connect_timeout_secs: 2,
            ..Config::default()
        };
        let (node, _) = testing::node(dir, config).await;
        (Sender::new(node.clone()), node)
    }

    #[tokio::test]
    async fn empty_address_fails_without_connecting() {
        let dir = tempfile::tempdir().unwrap();
        let (sender, node) = sender_for(dir.path(), 1, Framing::LengthPrefixed).await;
        let err = sender.send("   ", Envelope::text("hi")).await.unwrap_err();
        assert!(matches!(err, SendError::NoPeerAddress));
        assert!(node.history.load("").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn text_is_delivered_and_recorded_as_mine() {
        let dir = tempfile::tempdir().unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let peer = tokio::spawn(receive_one(listener, Framing::LengthPrefixed));
        let (sender, node) = sender_for(dir.path(), port, Framing::LengthPrefixed).await;

        let sent = sender.send("127.0.0.1", Envelope::text("xin chào")).await.unwrap();
        assert_eq!(sent.sender, protocol::Sender::Me);

        let got = peer.await.unwrap();
        assert_eq!(got, vec![Envelope::text("xin chào")]);
        let log = node.history.load("127.0.0.1").await.unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].content, "xin chào");
        assert_eq!(log[0].sender, protocol::Sender::Me);
    }

    #[tokio::test]
    async fn sentinel_framing_appends_terminator() {
        let dir = tempfile::tempdir().unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let peer = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut bytes = Vec::new();
            stream.read_to_end(&mut bytes).await.unwrap();
            bytes
        });
        let (sender, _) = sender_for(dir.path(), port, Framing::Sentinel).await;
        sender.send("127.0.0.1", Envelope::text("hi")).await.unwrap();
        let bytes = peer.await.unwrap();
        assert!(bytes.ends_with(b"||END_MSG||"));
    }

    #[tokio::test]
    async fn media_goes_out_inline_and_is_kept_as_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let peer = tokio::spawn(receive_one(listener, Framing::LengthPrefixed));
        let (sender, node) = sender_for(dir.path(), port, Framing::LengthPrefixed).await;

        let photo = dir.path().join("cat.PNG");
        let bytes: Vec<u8> = (0..3000u32).map(|i| (i % 256) as u8).collect();
        std::fs::write(&photo, &bytes).unwrap();
        let attachment = Attachment::load(&photo, None, 1 << 20).await.unwrap();
        assert_eq!(attachment.kind, MessageKind::Image);
        assert_eq!(attachment.size, 3000);

        let sent = sender
            .send("127.0.0.1", attachment.into_envelope())
            .await
            .unwrap();
        let wire = peer.await.unwrap();
        assert_eq!(STANDARD.decode(&wire[0].content).unwrap(), bytes);
        assert_eq!(wire[0].file_name.as_deref(), Some("cat.PNG"));

        let path = resolve_file_uri(&sent.content).unwrap();
        let name = path.file_name().unwrap().to_str().unwrap().to_string();
        assert!(name.starts_with("sent_image_"), "{name}");
        assert_eq!(std::fs::read(&path).unwrap(), bytes);
        let log = node.history.load("127.0.0.1").await.unwrap();
        assert_eq!(log[0].content, sent.content);
    }

    #[tokio::test]
    async fn refused_sends_leave_no_trace() {
        let dir = tempfile::tempdir().unwrap();
        let port = {
            let l = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            l.local_addr().unwrap().port()
        };
        let (sender, node) = sender_for(dir.path(), port, Framing::LengthPrefixed).await;
        for text in ["first", "second"] {
            let err = sender.send("127.0.0.1", Envelope::text(text)).await.unwrap_err();
            assert!(matches!(err, SendError::Connect(_) | SendError::Timeout(_)), "{err}");
        }
        assert!(node.history.load("127.0.0.1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unreachable_peer_times_out_or_fails() {
        let dir = tempfile::tempdir().unwrap();
        let (sender, node) = sender_for(dir.path(), 8888, Framing::LengthPrefixed).await;
        // TEST-NET-1 is never routed; some sandboxes reject it immediately instead of hanging.
        let err = sender.send("192.0.2.1", Envelope::text("x")).await.unwrap_err();
        assert!(matches!(err, SendError::Timeout(_) | SendError::Connect(_)), "{err}");
        assert!(node.history.load("192.0.2.1").await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_connects_fail_after_the_configured_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            connect_timeout_secs: 30,
            ..Config::default()
        };
        let (node, _) = testing::node(dir.path(), config).await;
        let sender = Sender::new(node.clone());

        for text in ["first", "second"] {
            let started = tokio::time::Instant::now();
            let err = sender
                .send_via("10.9.9.9", Envelope::text(text), |_, _| {
                    std::future::pending::<std::io::Result<TcpStream>>()
                })
                .await
                .unwrap_err();
            assert!(
                matches!(err, SendError::Timeout(d) if d == Duration::from_secs(30)),
                "{err}"
            );
            let waited = started.elapsed();
            assert!(waited >= Duration::from_secs(30) && waited < Duration::from_secs(31));
        }
        assert!(node.history.load("10.9.9.9").await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn slow_connect_within_the_limit_still_delivers() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            connect_timeout_secs: 30,
            ..Config::default()
        };
        let (node, _) = testing::node(dir.path(), config).await;
        let sender = Sender::new(node.clone());
        let (client, mut server) = tokio::io::duplex(64 * 1024);

        let sent = sender
            .send_via("10.9.9.9", Envelope::text("late"), |peer, port| async move {
                assert_eq!((peer.as_str(), port), ("10.9.9.9", 8888));
                tokio::time::sleep(Duration::from_secs(29)).await;
                Ok(client)
            })
            .await
            .unwrap();
        assert_eq!(sent.content, "late");

        let mut bytes = Vec::new();
        server.read_to_end(&mut bytes).await.unwrap();
        assert_eq!(bytes, encode_frame(&Envelope::text("late"), Framing::Sentinel).unwrap());
        assert_eq!(node.history.load("10.9.9.9").await.unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn connect_within_drops_the_timer_on_success() {
        let started = tokio::time::Instant::now();
        let got = connect_within(Duration::from_secs(30), async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok::<_, std::io::Error>(7u8)
        })
        .await
        .unwrap();
        assert_eq!(got, 7);
        assert!(started.elapsed() < Duration::from_secs(11));

        let refused = connect_within(Duration::from_secs(30), async {
            Err::<u8, _>(std::io::Error::from(std::io::ErrorKind::ConnectionRefused))
        })
        .await;
        assert!(matches!(refused, Err(SendError::Connect(_))));
    }

    #[test]
    fn compose_text_trims() {
        assert_eq!(compose_text("  hi \n"), Some(Envelope::text("hi")));
        assert_eq!(compose_text(" \t "), None);
    }

    #[tokio::test]
    async fn attachment_limits() {
        let dir = tempfile::tempdir().unwrap();
        let clip = dir.path().join("clip.mp4");
        std::fs::write(&clip, vec![0u8; 2048]).unwrap();
        assert!(matches!(
            Attachment::load(&clip, None, 1024).await,
            Err(AttachmentError::TooLarge { size: 2048, .. })
        ));
        assert!(matches!(
            Attachment::load(&clip, Some(MessageKind::Text), 4096).await,
            Err(AttachmentError::NotMedia)
        ));

        let odd = dir.path().join("notes.xyz");
        std::fs::write(&odd, b"abc").unwrap();
        assert!(matches!(
            Attachment::load(&odd, None, 4096).await,
            Err(AttachmentError::UnknownKind(_))
        ));
        let forced = Attachment::load(&odd, Some(MessageKind::Audio), 4096).await.unwrap();
        assert_eq!(forced.into_envelope().content, "YWJj");

        assert!(matches!(
            Attachment::load(&dir.path().join("gone.jpg"), None, 4096).await,
            Err(AttachmentError::Io { .. })
        ));
    }
}
