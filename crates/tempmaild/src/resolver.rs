use crate::storage::{MailStore, ResolvedRecipient};
use std::sync::Arc;
use thiserror::Error;

/// Policy verdict for a RCPT TO address that was not accepted.
///
/// The three cases map to distinct SMTP replies and must never be
/// conflated: relay denial is the anti-abuse gate, an unknown mailbox
/// on a managed domain is a legitimate miss.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RcptRejection {
    #[error("5.1.3 invalid address syntax")]
    Malformed,
    #[error("5.7.1 relay access denied - domain not managed by this server")]
    RelayDenied,
    #[error("5.1.1 recipient mailbox not found")]
    MailboxNotFound,
}

impl RcptRejection {
    /// SMTP 3-digit response code for this rejection
    pub fn code(&self) -> u16 {
        match self {
            Self::Malformed => 501,
            Self::RelayDenied | Self::MailboxNotFound => 550,
        }
    }
}

pub struct RecipientResolver {
    store: Arc<dyn MailStore>,
}

impl RecipientResolver {
    pub fn new(store: Arc<dyn MailStore>) -> Self {
        Self { store }
    }

    /// Decide whether mail for `raw_address` is accepted here, and to
    /// which mailbox. The outer error is a collaborator failure; the
    /// inner result is the policy decision for this recipient.
    pub async fn resolve(
        &self,
        raw_address: &str,
    ) -> anyhow::Result<Result<ResolvedRecipient, RcptRejection>> {
        let address = normalize_address(raw_address);
        let Some((_local, domain)) = split_address(&address) else {
            return Ok(Err(RcptRejection::Malformed));
        };

        // The anti-relay gate comes before any mailbox lookup so that
        // probing an unmanaged domain can never reveal whether a
        // mailbox exists there. Domain eligibility can lapse at any
        // time and is re-checked on every recipient.
        if !self.store.system_domain_is_managed(domain).await?
            && !self.store.user_domain_is_managed(domain).await?
        {
            return Ok(Err(RcptRejection::RelayDenied));
        }

        if let Some(mailbox_id) = self.store.mailbox_by_address(&address).await? {
            return Ok(Ok(ResolvedRecipient {
                address,
                mailbox_id,
            }));
        }

        if let Some(alias) = self.store.alias_by_address(&address).await? {
            // An inactive alias is treated as nonexistent. The envelope
            // address stays the alias address, not the target mailbox's
            // primary address.
            if alias.is_active {
                return Ok(Ok(ResolvedRecipient {
                    address,
                    mailbox_id: alias.mailbox_id,
                }));
            }
        }

        Ok(Err(RcptRejection::MailboxNotFound))
    }
}

fn normalize_address(raw: &str) -> String {
    let trimmed = raw.trim();
    let trimmed = trimmed.strip_prefix('<').unwrap_or(trimmed);
    let trimmed = trimmed.strip_suffix('>').unwrap_or(trimmed);
    trimmed.trim().to_ascii_lowercase()
}

fn split_address(address: &str) -> Option<(&str, &str)> {
    let mut fields = address.split('@');
    let local = fields.next()?;
    let domain = fields.next()?;
    if fields.next().is_some() || local.is_empty() || domain.is_empty() {
        return None;
    }
    Some((local, domain))
}
