//! Decodes raw message bytes from untrusted senders into a simplified
//! structure: subject, sender/recipient headers, the first text/plain
//! and text/html bodies, and a flat list of attachments gathered from
//! all nesting depths of the mime tree.
mod charsets;
mod error;
mod extract;
mod headers;
mod rfc2047;
mod transfer;

pub use error::MailExtractError;
pub type Result<T> = std::result::Result<T, MailExtractError>;

pub use extract::{parse_email, Attachment, ParsedEmail};
pub use headers::{HeaderBlock, MimeParameters};
pub use rfc2047::decode_encoded_words;
