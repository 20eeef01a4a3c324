//! Media materialization: move large base64 payloads out of messages and onto disk.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::Utc;
use rand::Rng;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::error::MediaError;
use crate::protocol::{Envelope, MessageKind, DEFAULT_INLINE_THRESHOLD, FILE_URI_SCHEME};

const MAX_NAME_ATTEMPTS: usize = 8;

/// Which side of a transfer produced the file; used as the file name prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Received,
    Sent,
}

impl Role {
    fn prefix(self) -> &'static str {
        match self {
            Role::Received => "recv",
            Role::Sent => "sent",
        }
    }
}

/// Directory of materialized media files.
#[derive(Debug, Clone)]
pub struct MediaStore {
    dir: PathBuf,
    inline_threshold: usize,
}

impl MediaStore {
    /// Create the directory if needed. The path is made absolute so file URIs stay valid.
    pub async fn open(dir: impl AsRef<Path>) -> Result<Self, MediaError> {
        tokio::fs::create_dir_all(dir.as_ref()).await?;
        let dir = tokio::fs::canonicalize(dir.as_ref()).await?;
        Ok(Self {
            dir,
            inline_threshold: DEFAULT_INLINE_THRESHOLD,
        })
    }

    pub fn with_inline_threshold(mut self, threshold: usize) -> Self {
        self.inline_threshold = threshold;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Media kind, content over the inline threshold, and not already a file reference.
    pub fn needs_materialization(&self, envelope: &Envelope) -> bool {
        envelope.kind.is_media()
            && envelope.content.len() > self.inline_threshold
            && !envelope.is_file_reference()
    }

    /// Decode the payload to a fresh file and point content at it. Returns whether anything was written.
    pub async fn materialize(&self, envelope: &mut Envelope, role: Role) -> Result<bool, MediaError> {
        if !self.needs_materialization(envelope) {
            return Ok(false);
        }
        let payload = std::mem::take(&mut envelope.content);
        let (payload, decoded) = tokio::task::spawn_blocking(move || {
            let result = decode_payload(&payload);
            (payload, result)
        })
        .await
        .map_err(|e| MediaError::Io(std::io::Error::new(ErrorKind::Other, e)))?;
        let bytes = match decoded {
            Ok(bytes) => bytes,
            Err(e) => {
                envelope.content = payload;
                return Err(e.into());
            }
        };
        let path = match self.write_unique(envelope.kind, role, &bytes).await {
            Ok(path) => path,
            Err(e) => {
                envelope.content = payload;
                return Err(e);
            }
        };
        debug!(kind = %envelope.kind, path = %path.display(), bytes = bytes.len(), "media materialized");
        envelope.content = file_uri(&path);
        Ok(true)
    }

    /// Materialize, substituting a placeholder on failure. Used identically on the receive and send paths.
    pub async fn materialize_or_placeholder(&self, mut envelope: Envelope, role: Role) -> Envelope {
        if let Err(e) = self.materialize(&mut envelope, role).await {
            warn!(kind = %envelope.kind, error = %e, "could not save media payload");
            envelope.content = placeholder(envelope.kind);
        }
        envelope
    }

    async fn write_unique(&self, kind: MessageKind, role: Role, bytes: &[u8]) -> Result<PathBuf, MediaError> {
        let mut last_err = None;
        for _ in 0..MAX_NAME_ATTEMPTS {
            let path = self.dir.join(file_name(kind, role));
            let open = tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await;
            let mut file = match open {
                Ok(f) => f,
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    last_err = Some(e);
                    continue;
                }
                Err(e) => return Err(e.into()),
            };
            if let Err(e) = write_and_sync(&mut file, bytes).await {
                drop(file);
                let _ = tokio::fs::remove_file(&path).await;
                return Err(e.into());
            }
            return Ok(path);
        }
        Err(last_err
            .unwrap_or_else(|| std::io::Error::new(ErrorKind::AlreadyExists, "no free file name"))
            .into())
    }
}

async fn write_and_sync(file: &mut tokio::fs::File, bytes: &[u8]) -> std::io::Result<()> {
    file.write_all(bytes).await?;
    file.flush().await?;
    file.sync_all().await
}

/// Content stored in place of a payload that could not be saved.
pub fn placeholder(kind: MessageKind) -> String {
    format!("[{kind} could not be saved]")
}

/// `<role>_<kind>_<unix millis>_<0..1000>.<ext>`
fn file_name(kind: MessageKind, role: Role) -> String {
    let suffix: u16 = rand::thread_rng().gen_range(0..1000);
    format!(
        "{}_{}_{}_{}.{}",
        role.prefix(),
        kind,
        Utc::now().timestamp_millis(),
        suffix,
        kind.extension()
    )
}

pub fn file_uri(path: &Path) -> String {
    format!("{FILE_URI_SCHEME}{}", path.display())
}

/// Local path behind a `file://` content string.
pub fn resolve_file_uri(content: &str) -> Option<PathBuf> {
    content.strip_prefix(FILE_URI_SCHEME).map(PathBuf::from)
}

fn decode_payload(payload: &str) -> Result<Vec<u8>, base64::DecodeError> {
    if payload.bytes().any(|b| b.is_ascii_whitespace()) {
        let compact: String = payload.chars().filter(|c| !c.is_ascii_whitespace()).collect();
        return STANDARD.decode(compact);
    }
    STANDARD.decode(payload)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn media(kind: MessageKind, bytes: &[u8]) -> Envelope {
        Envelope {
            kind,
            content: STANDARD.encode(bytes),
            file_name: None,
        }
    }

    fn payload(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 31 % 251) as u8).collect()
    }

    #[tokio::test]
    async fn large_payload_becomes_file_reference() {
        let dir = tempfile::tempdir().unwrap();
        let store = MediaStore::open(dir.path()).await.unwrap();
        let bytes = payload(4096);
        let mut env = media(MessageKind::Image, &bytes);

        assert!(store.materialize(&mut env, Role::Received).await.unwrap());
        assert!(env.content.starts_with("file://"));
        let path = resolve_file_uri(&env.content).unwrap();
        assert!(path.is_absolute());
        let name = path.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("recv_image_"), "{name}");
        assert!(name.ends_with(".jpg"), "{name}");
        assert_eq!(std::fs::read(&path).unwrap(), bytes);
    }

    #[tokio::test]
    async fn extension_follows_kind_and_role() {
        let dir = tempfile::tempdir().unwrap();
        let store = MediaStore::open(dir.path()).await.unwrap();
        for (kind, ext) in [(MessageKind::Video, ".mp4"), (MessageKind::Audio, ".mp3")] {
            let mut env = media(kind, &payload(600));
            store.materialize(&mut env, Role::Sent).await.unwrap();
            let path = resolve_file_uri(&env.content).unwrap();
            let name = path.file_name().unwrap().to_str().unwrap().to_string();
            assert!(name.starts_with(&format!("sent_{kind}_")), "{name}");
            assert!(name.ends_with(ext), "{name}");
        }
    }

    #[tokio::test]
    async fn small_text_and_references_pass_through() {
        let dir = tempfile::tempdir().unwrap();
        let store = MediaStore::open(dir.path()).await.unwrap();

        let mut small = media(MessageKind::Image, &payload(30));
        let before = small.clone();
        assert!(!store.materialize(&mut small, Role::Received).await.unwrap());
        assert_eq!(small, before);

        let mut text = Envelope::text("x".repeat(1000));
        assert!(!store.materialize(&mut text, Role::Received).await.unwrap());

        let mut reference = Envelope {
            kind: MessageKind::Video,
            content: format!("file:///{}", "v".repeat(300)),
            file_name: None,
        };
        assert!(!store.materialize(&mut reference, Role::Received).await.unwrap());
        assert_eq!(std::fs::read_dir(store.dir()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn threshold_is_configurable() {
        let dir = tempfile::tempdir().unwrap();
        let store = MediaStore::open(dir.path())
            .await
            .unwrap()
            .with_inline_threshold(8);
        let mut env = media(MessageKind::Audio, &payload(30));
        assert!(store.materialize(&mut env, Role::Received).await.unwrap());
    }

    #[tokio::test]
    async fn bad_base64_keeps_content_and_errors() {
        let dir = tempfile::tempdir().unwrap();
        let store = MediaStore::open(dir.path()).await.unwrap();
        let mut env = Envelope {
            kind: MessageKind::Image,
            content: "!".repeat(400),
            file_name: None,
        };
        let err = store.materialize(&mut env, Role::Received).await.unwrap_err();
        assert!(matches!(err, MediaError::InvalidPayload(_)));
        assert_eq!(env.content, "!".repeat(400));
    }

    #[tokio::test]
    async fn failure_becomes_placeholder() {
        let dir = tempfile::tempdir().unwrap();
        let store = MediaStore::open(dir.path()).await.unwrap();
        let env = Envelope {
            kind: MessageKind::Video,
            content: "%".repeat(400),
            file_name: Some("clip.mp4".into()),
        };
        let out = store.materialize_or_placeholder(env, Role::Received).await;
        assert_eq!(out.content, "[video could not be saved]");
        assert_eq!(out.file_name.as_deref(), Some("clip.mp4"));
    }

    #[tokio::test]
    async fn missing_directory_is_an_io_failure() {
        let dir = tempfile::tempdir().unwrap();
        let store = MediaStore::open(dir.path().join("media")).await.unwrap();
        std::fs::remove_dir_all(store.dir()).unwrap();
        let mut env = media(MessageKind::Image, &payload(1000));
        let err = store.materialize(&mut env, Role::Received).await.unwrap_err();
        assert!(matches!(err, MediaError::Io(_)));
        let out = store
            .materialize_or_placeholder(media(MessageKind::Image, &payload(1000)), Role::Received)
            .await;
        assert_eq!(out.content, placeholder(MessageKind::Image));
    }

    #[test]
    fn wrapped_base64_decodes() {
        let bytes = payload(200);
        let encoded = STANDARD.encode(&bytes);
        let wrapped: String = encoded
            .as_bytes()
            .chunks(76)
            .map(|c| std::str::from_utf8(c).unwrap())
            .collect::<Vec<_>>()
            .join("\n");
        assert_eq!(decode_payload(&wrapped).unwrap(), bytes);
    }
}
