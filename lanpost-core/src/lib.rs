//! lanpost: serverless LAN messaging over direct TCP.
//! Protocol, framing and local storage; the daemon crate owns the sockets.

pub mod contacts;
pub mod events;
pub mod history;
pub mod keyed;
pub mod kv;
pub mod media;
pub mod peer;
pub mod protocol;
pub mod wire;

mod error;

pub use contacts::{ContactDirectory, CONTACTS_KEY};
pub use error::{ContactError, MediaError, StoreError};
pub use events::{ChatEvent, EventBus, Notifier};
pub use history::{history_key, HistoryStore};
pub use keyed::KeyedLocks;
pub use kv::{KvStore, MemoryKv, SqliteKv, Update};
pub use media::{MediaStore, Role};
pub use peer::{normalize_peer_ip, peer_ip};
pub use protocol::{Contact, Envelope, Message, MessageKind, Sender, DEFAULT_PORT, FILE_URI_SCHEME};
pub use wire::{
    decode_envelope, encode_frame, Decoded, EnvelopeError, FrameDecodeError, FrameDecoder,
    FrameEncodeError, Framing,
};
