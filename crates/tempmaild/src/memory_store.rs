//! In-memory storage backend, used by the standalone daemon and the
//! test suite. All state lives behind a single mutex; the lock is
//! held only for the duration of each lookup or insert.
use crate::storage::{AliasEntry, MailStore, MailboxId, NewMessage, StoredMessage};
use async_trait::async_trait;
use mailextract::Attachment;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone, Copy)]
struct DomainFlags {
    active: bool,
    verified: bool,
}

impl DomainFlags {
    fn eligible(&self) -> bool {
        self.active && self.verified
    }
}

/// A message as the memory backend persists it: the metadata echoed
/// back to the dispatcher plus the full content it owns from then on.
#[derive(Debug, Clone)]
pub struct StoredRecord {
    pub message: StoredMessage,
    pub text_body: String,
    pub html_body: String,
    pub raw: Arc<Box<[u8]>>,
    pub attachments: Vec<Attachment>,
}

#[derive(Default)]
struct Inner {
    mailboxes: HashMap<String, MailboxId>,
    aliases: HashMap<String, AliasEntry>,
    system_domains: HashMap<String, DomainFlags>,
    user_domains: HashMap<String, DomainFlags>,
    messages: Vec<StoredRecord>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    /// Provision a mailbox at `address`, returning its id.
    pub fn add_mailbox(&self, address: &str) -> MailboxId {
        let id = MailboxId(uuid::Uuid::new_v4().to_string());
        self.inner
            .lock()
            .mailboxes
            .insert(address.trim().to_ascii_lowercase(), id.clone());
        id
    }

    /// Provision an alias pointing at the mailbox holding
    /// `target_address`.
    pub fn add_alias(&self, address: &str, target_address: &str, active: bool) -> anyhow::Result<()> {
        let mut inner = self.inner.lock();
        let target = inner
            .mailboxes
            .get(&target_address.trim().to_ascii_lowercase())
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("no mailbox at {target_address}"))?;
        inner.aliases.insert(
            address.trim().to_ascii_lowercase(),
            AliasEntry {
                mailbox_id: target,
                is_active: active,
            },
        );
        Ok(())
    }

    pub fn add_system_domain(&self, domain: &str) {
        self.inner.lock().system_domains.insert(
            domain.trim().to_ascii_lowercase(),
            DomainFlags {
                active: true,
                verified: true,
            },
        );
    }

    pub fn add_user_domain(&self, domain: &str) {
        self.inner.lock().user_domains.insert(
            domain.trim().to_ascii_lowercase(),
            DomainFlags {
                active: true,
                verified: true,
            },
        );
    }

    /// Add a user domain that exists but has not completed
    /// verification; it must not accept mail.
    pub fn add_unverified_user_domain(&self, domain: &str) {
        self.inner.lock().user_domains.insert(
            domain.trim().to_ascii_lowercase(),
            DomainFlags {
                active: true,
                verified: false,
            },
        );
    }

    /// Deactivate a system domain. Eligibility can lapse at any time
    /// and is re-checked per recipient.
    pub fn retire_system_domain(&self, domain: &str) {
        if let Some(flags) = self
            .inner
            .lock()
            .system_domains
            .get_mut(&domain.trim().to_ascii_lowercase())
        {
            flags.active = false;
        }
    }

    pub fn messages(&self) -> Vec<StoredRecord> {
        self.inner.lock().messages.clone()
    }
}

#[async_trait]
impl MailStore for MemoryStore {
    async fn mailbox_by_address(&self, address: &str) -> anyhow::Result<Option<MailboxId>> {
        Ok(self.inner.lock().mailboxes.get(address).cloned())
    }

    async fn alias_by_address(&self, address: &str) -> anyhow::Result<Option<AliasEntry>> {
        Ok(self.inner.lock().aliases.get(address).cloned())
    }

    async fn system_domain_is_managed(&self, domain: &str) -> anyhow::Result<bool> {
        Ok(self
            .inner
            .lock()
            .system_domains
            .get(domain)
            .map(DomainFlags::eligible)
            .unwrap_or(false))
    }

    async fn user_domain_is_managed(&self, domain: &str) -> anyhow::Result<bool> {
        Ok(self
            .inner
            .lock()
            .user_domains
            .get(domain)
            .map(DomainFlags::eligible)
            .unwrap_or(false))
    }

    async fn create_message(&self, message: NewMessage) -> anyhow::Result<StoredMessage> {
        let stored = StoredMessage {
            id: uuid::Uuid::new_v4().to_string(),
            mailbox_id: message.mailbox_id,
            sender: message.sender,
            recipient: message.recipient,
            subject: message.subject,
            unread: true,
        };
        self.inner.lock().messages.push(StoredRecord {
            message: stored.clone(),
            text_body: message.text_body,
            html_body: message.html_body,
            raw: message.raw,
            attachments: message.attachments,
        });
        Ok(stored)
    }
}
