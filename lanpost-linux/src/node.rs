//! Shared services handed to the listener, the sender and the CLI commands.

use std::sync::Arc;

use anyhow::Context;
use lanpost_core::{
    ContactDirectory, EventBus, HistoryStore, KeyedLocks, KvStore, MediaStore, Notifier, SqliteKv,
};
use tracing::debug;

use crate::config::Config;
use crate::notify;

/// One per process. Cheap to clone; every field is a handle.
#[derive(Clone)]
pub struct Node {
    pub config: Arc<Config>,
    pub history: HistoryStore,
    pub contacts: ContactDirectory,
    pub media: MediaStore,
    pub bus: EventBus,
    pub notifier: Arc<dyn Notifier>,
}

impl Node {
    /// Open the file-backed stores under the configured data dir.
    pub async fn open(config: Config) -> anyhow::Result<Self> {
        let db_path = config.db_path();
        let media_dir = config.media_dir();
        let kv = SqliteKv::open(&db_path)
            .with_context(|| format!("opening store at {}", db_path.display()))?;
        let media = MediaStore::open(&media_dir)
            .await
            .with_context(|| format!("opening media dir {}", media_dir.display()))?;
        debug!(db = %db_path.display(), media = %media.dir().display(), "stores opened");
        let notifier: Arc<dyn Notifier> = Arc::from(notify::from_command(&config.notify_command));
        Ok(Self::assemble(config, Arc::new(kv), media, notifier))
    }

    /// Wire the services together over an arbitrary store.
    pub fn assemble(
        config: Config,
        kv: Arc<dyn KvStore>,
        media: MediaStore,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let media = media.with_inline_threshold(config.inline_threshold);
        let locks = KeyedLocks::new();
        let bus = EventBus::new();
        let history = HistoryStore::new(kv.clone(), locks.clone(), bus.clone());
        let contacts = ContactDirectory::new(kv, locks, history.clone());
        Self {
            config: Arc::new(config),
            history,
            contacts,
            media,
            bus,
            notifier,
        }
    }
}
