//! The repository-style contracts this core consumes. Concrete
//! backends (in-memory, SQL, cached-hybrid) are injected as trait
//! objects and never referenced by concrete type inside the core.
use async_trait::async_trait;
use mailextract::Attachment;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Opaque identifier for a mailbox.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MailboxId(pub String);

impl std::fmt::Display for MailboxId {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> std::fmt::Result {
        fmt.write_str(&self.0)
    }
}

/// A recipient accepted during the RCPT phase: the literal envelope
/// address paired with the mailbox it resolved to. When the address
/// was an alias, `address` stays the alias address.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedRecipient {
    pub address: String,
    pub mailbox_id: MailboxId,
}

/// An alias record: the target mailbox plus whether the alias is
/// currently active. An inactive alias must be treated as nonexistent.
#[derive(Debug, Clone, PartialEq)]
pub struct AliasEntry {
    pub mailbox_id: MailboxId,
    pub is_active: bool,
}

/// One logical message to be persisted for a single mailbox.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub mailbox_id: MailboxId,
    pub sender: String,
    pub recipient: String,
    pub subject: String,
    pub text_body: String,
    pub html_body: String,
    pub raw: Arc<Box<[u8]>>,
    pub attachments: Vec<Attachment>,
}

/// What the storage backend reports back after persisting a message.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredMessage {
    pub id: String,
    pub mailbox_id: MailboxId,
    pub sender: String,
    pub recipient: String,
    pub subject: String,
    pub unread: bool,
}

#[async_trait]
pub trait MailStore: Send + Sync {
    /// Look up a primary mailbox by its exact normalized address.
    async fn mailbox_by_address(&self, address: &str) -> anyhow::Result<Option<MailboxId>>;

    /// Look up an alias by its exact normalized address.
    async fn alias_by_address(&self, address: &str) -> anyhow::Result<Option<AliasEntry>>;

    /// Whether `domain` is a system-wide managed domain that is both
    /// active and verified right now.
    async fn system_domain_is_managed(&self, domain: &str) -> anyhow::Result<bool>;

    /// Whether `domain` is a user-owned managed domain that is both
    /// active and verified right now.
    async fn user_domain_is_managed(&self, domain: &str) -> anyhow::Result<bool>;

    /// Persist one logical message together with its attachments.
    async fn create_message(&self, message: NewMessage) -> anyhow::Result<StoredMessage>;
}

#[async_trait]
pub trait Notifier: Send + Sync {
    /// Best-effort push that a new message landed in `mailbox_id`.
    /// Callers ignore errors; a failed notification never fails the
    /// SMTP transaction.
    async fn notify_new_message(
        &self,
        mailbox_id: &MailboxId,
        message: &StoredMessage,
    ) -> anyhow::Result<()>;
}

/// Default notifier for the standalone daemon: just logs.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify_new_message(
        &self,
        mailbox_id: &MailboxId,
        message: &StoredMessage,
    ) -> anyhow::Result<()> {
        tracing::info!("new message {} for mailbox {mailbox_id}", message.id);
        Ok(())
    }
}
