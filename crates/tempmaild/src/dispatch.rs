use crate::storage::{MailStore, NewMessage, Notifier, ResolvedRecipient, StoredMessage};
use mailextract::ParsedEmail;
use std::sync::Arc;
use tracing::warn;

pub struct Dispatcher {
    store: Arc<dyn MailStore>,
    notifier: Arc<dyn Notifier>,
}

/// Outcome of dispatching one transaction to its accepted recipients.
/// Partial success is possible and is never rolled back; the session
/// reports the transaction as failed when `failed > 0`.
#[derive(Debug, Default)]
pub struct DispatchOutcome {
    pub delivered: Vec<StoredMessage>,
    pub failed: usize,
}

impl Dispatcher {
    pub fn new(store: Arc<dyn MailStore>, notifier: Arc<dyn Notifier>) -> Self {
        Self { store, notifier }
    }

    /// One independent message-creation call per accepted recipient,
    /// each carrying the same parsed content but that recipient's
    /// envelope address and mailbox id. Notification is fire-and-forget.
    pub async fn dispatch(
        &self,
        sender: &str,
        recipients: &[ResolvedRecipient],
        parsed: &ParsedEmail,
        raw: &Arc<Box<[u8]>>,
    ) -> DispatchOutcome {
        let mut outcome = DispatchOutcome::default();

        for recipient in recipients {
            let message = NewMessage {
                mailbox_id: recipient.mailbox_id.clone(),
                sender: sender.to_string(),
                recipient: recipient.address.clone(),
                subject: parsed.subject.clone(),
                text_body: parsed.text_body.clone(),
                html_body: parsed.html_body.clone(),
                raw: Arc::clone(raw),
                attachments: parsed.attachments.clone(),
            };

            match self.store.create_message(message).await {
                Ok(stored) => {
                    if let Err(err) = self
                        .notifier
                        .notify_new_message(&stored.mailbox_id, &stored)
                        .await
                    {
                        warn!("notification for message {} failed: {err:#}", stored.id);
                    }
                    outcome.delivered.push(stored);
                }
                Err(err) => {
                    warn!("storing message for {} failed: {err:#}", recipient.address);
                    outcome.failed += 1;
                }
            }
        }

        outcome
    }
}
