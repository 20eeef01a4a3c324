//! Contact directory: id/name/ip records kept as one blob.

use std::net::Ipv4Addr;
use std::sync::Arc;

use tracing::info;

use crate::error::{ContactError, Result};
use crate::history::HistoryStore;
use crate::keyed::KeyedLocks;
use crate::kv::KvStore;
use crate::protocol::Contact;

/// KV key holding the whole contact list.
pub const CONTACTS_KEY: &str = "SAVED_CONTACTS";

#[derive(Clone)]
pub struct ContactDirectory {
    kv: Arc<dyn KvStore>,
    locks: KeyedLocks,
    history: HistoryStore,
}

impl ContactDirectory {
    pub fn new(kv: Arc<dyn KvStore>, locks: KeyedLocks, history: HistoryStore) -> Self {
        Self { kv, locks, history }
    }

    pub async fn list(&self) -> Result<Vec<Contact>> {
        read_contacts(self.kv.as_ref()).await
    }

    pub async fn find_by_ip(&self, ip: &str) -> Result<Option<Contact>> {
        Ok(self.list().await?.into_iter().find(|c| c.ip == ip))
    }

    /// Add a contact, or rename the existing one with the same ip. An empty name falls back to the ip.
    pub async fn add(&self, name: &str, ip: &str) -> std::result::Result<Contact, ContactError> {
        let ip = validate_ip(ip)?;
        let name = match name.trim() {
            "" => ip.clone(),
            n => n.to_string(),
        };
        Ok(self.upsert(name, ip).await?)
    }

    /// Rename the contact at `ip`, creating it if nobody has that ip yet.
    pub async fn rename(&self, ip: &str, name: &str) -> std::result::Result<Contact, ContactError> {
        let ip = validate_ip(ip)?;
        let name = name.trim();
        if name.is_empty() {
            return Err(ContactError::EmptyName);
        }
        Ok(self.upsert(name.to_string(), ip).await?)
    }

    /// Delete a contact and its history. Returns false when no contact has `id`.
    ///
    /// The contact list stays locked for the whole operation so a concurrent rename or add
    /// cannot slip in between the lookup and the removal. History goes first: an interruption
    /// between the two steps leaves a contact with an empty log, never a log nobody can reach.
    pub async fn delete(&self, id: &str) -> Result<bool> {
        let _guard = self.locks.lock(CONTACTS_KEY).await;
        let contacts = read_contacts(self.kv.as_ref()).await?;
        let Some(contact) = contacts.into_iter().find(|c| c.id == id) else {
            return Ok(false);
        };
        self.history.clear(&contact.ip).await?;

        self.kv
            .update(CONTACTS_KEY, &mut |blob| {
                let mut contacts = parse_contacts(blob.as_deref())?;
                contacts.retain(|c| c.id != id);
                Ok(Some(serde_json::to_string(&contacts)?))
            })
            .await?;
        info!(id, ip = %contact.ip, "contact deleted");
        Ok(true)
    }

    async fn upsert(&self, name: String, ip: String) -> Result<Contact> {
        let _guard = self.locks.lock(CONTACTS_KEY).await;
        let fresh = Contact {
            id: uuid::Uuid::new_v4().to_string(),
            name,
            ip,
        };
        let mut stored = fresh.clone();
        self.kv
            .update(CONTACTS_KEY, &mut |blob| {
                let mut contacts = parse_contacts(blob.as_deref())?;
                match contacts.iter_mut().find(|c| c.ip == fresh.ip) {
                    Some(existing) => {
                        existing.name = fresh.name.clone();
                        stored = existing.clone();
                    }
                    None => {
                        stored = fresh.clone();
                        contacts.push(fresh.clone());
                    }
                }
                Ok(Some(serde_json::to_string(&contacts)?))
            })
            .await?;
        Ok(stored)
    }
}

fn validate_ip(ip: &str) -> std::result::Result<String, ContactError> {
    let ip = ip.trim();
    ip.parse::<Ipv4Addr>()
        .map(|addr| addr.to_string())
        .map_err(|_| ContactError::InvalidIp(ip.to_string()))
}

async fn read_contacts(kv: &dyn KvStore) -> Result<Vec<Contact>> {
    parse_contacts(kv.get(CONTACTS_KEY).await?.as_deref())
}

fn parse_contacts(blob: Option<&str>) -> Result<Vec<Contact>> {
    match blob {
        Some(blob) if !blob.trim().is_empty() => Ok(serde_json::from_str(blob)?),
        _ => Ok(Vec::new()),
    }
}
