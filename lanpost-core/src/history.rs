//! Per-peer message log over the KV store.

use std::sync::Arc;

use tracing::debug;

use crate::error::Result;
use crate::events::{ChatEvent, EventBus};
use crate::keyed::KeyedLocks;
use crate::kv::KvStore;
use crate::protocol::Message;

/// KV key holding the log for `peer`.
pub fn history_key(peer: &str) -> String {
    format!("@chat_{peer}")
}

/// Ordered, append-only (logically) message log per peer ip.
#[derive(Clone)]
pub struct HistoryStore {
    kv: Arc<dyn KvStore>,
    locks: KeyedLocks,
    bus: EventBus,
}

impl HistoryStore {
    pub fn new(kv: Arc<dyn KvStore>, locks: KeyedLocks, bus: EventBus) -> Self {
        Self { kv, locks, bus }
    }

    /// Full log for `peer`, oldest first. A peer with no log yields an empty vec.
    pub async fn load(&self, peer: &str) -> Result<Vec<Message>> {
        read_log(self.kv.as_ref(), &history_key(peer)).await
    }

    /// Append one message, then announce it on the bus.
    pub async fn append(&self, peer: &str, message: Message) -> Result<()> {
        let key = history_key(peer);
        let sender = message.sender;
        {
            let _guard = self.locks.lock(&key).await;
            let mut len = 0;
            self.kv
                .update(&key, &mut |blob| {
                    let mut log = parse_log(blob.as_deref())?;
                    log.push(message.clone());
                    len = log.len();
                    Ok(Some(serde_json::to_string(&log)?))
                })
                .await?;
            debug!(peer, len, "history appended");
        }
        self.bus.publish(ChatEvent::appended(peer, sender));
        Ok(())
    }

    /// Drop the whole log for `peer`. Clearing a missing log is a no-op.
    pub async fn clear(&self, peer: &str) -> Result<()> {
        let key = history_key(peer);
        {
            let _guard = self.locks.lock(&key).await;
            self.kv.remove(&key).await?;
        }
        self.bus.publish(ChatEvent::HistoryCleared {
            peer: peer.to_string(),
        });
        Ok(())
    }
}

async fn read_log(kv: &dyn KvStore, key: &str) -> Result<Vec<Message>> {
    parse_log(kv.get(key).await?.as_deref())
}

/// A missing or blank blob is an empty log.
fn parse_log(blob: Option<&str>) -> Result<Vec<Message>> {
    match blob {
        Some(blob) if !blob.trim().is_empty() => Ok(serde_json::from_str(blob)?),
        _ => Ok(Vec::new()),
    }
}
