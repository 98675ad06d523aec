use crate::charsets::decode_charset;
use crate::headers::{HeaderBlock, MimeParameters};
use crate::rfc2047::decode_encoded_words;
use crate::transfer::{decode_transfer, TransferEncoding};
use crate::{MailExtractError, Result};
use serde::{Deserialize, Serialize};

/// Nested multiparts below this depth are skipped like any other
/// malformed part, bounding recursion on adversarial input.
const MAX_MULTIPART_DEPTH: usize = 10;

/// Used when neither the disposition nor the content-type carries a
/// usable filename.
pub const FALLBACK_ATTACHMENT_NAME: &str = "unnamed-attachment";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParsedEmail {
    /// Decoded from any RFC 2047 encoded words
    pub subject: String,
    pub from: String,
    pub to: String,
    /// The first text/plain body found, possibly empty
    pub text_body: String,
    /// The first text/html body found, possibly empty
    pub html_body: String,
    /// Attachments accumulated from all nesting depths, in order
    pub attachments: Vec<Attachment>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    pub id: String,
    pub file_name: String,
    pub content_type: String,
    pub size: usize,
    pub content: Vec<u8>,
}

impl Attachment {
    fn new(file_name: String, content_type: String, content: Vec<u8>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            file_name,
            content_type,
            size: content.len(),
            content,
        }
    }
}

struct Extractor {
    email: ParsedEmail,
    // first-wins: a filled slot is never overwritten, even by an
    // empty-bodied earlier part
    text_filled: bool,
    html_filled: bool,
}

/// Parse raw message bytes into a [`ParsedEmail`].
///
/// The input is expected to be size-bounded by the caller. The only
/// hard error is a multipart message that declares no boundary;
/// individually corrupt parts are skipped so that one bad attachment
/// does not lose the rest of the message.
pub fn parse_email(raw: &[u8]) -> Result<ParsedEmail> {
    let mut ex = Extractor {
        email: ParsedEmail::default(),
        text_filled: false,
        html_filled: false,
    };

    let block = match HeaderBlock::parse(raw) {
        Ok(block) => block,
        Err(_) => {
            // No usable header block: the entire input is the body
            ex.email.text_body = String::from_utf8_lossy(raw).to_string();
            return Ok(ex.email);
        }
    };

    ex.email.subject = block
        .get("Subject")
        .map(decode_encoded_words)
        .unwrap_or_default();
    ex.email.from = block
        .get("From")
        .map(decode_encoded_words)
        .unwrap_or_default();
    ex.email.to = block.get("To").map(decode_encoded_words).unwrap_or_default();

    let body = &raw[block.body_offset..];
    let content_type = block.get("Content-Type").map(MimeParameters::parse);

    match content_type {
        Some(ct) if ct.is_multipart() => {
            walk_multipart(&ct, body, &mut ex, 0)?;
        }
        ct => {
            let ct = ct.unwrap_or_else(|| MimeParameters::parse("text/plain"));
            let encoding = TransferEncoding::from_header(block.get("Content-Transfer-Encoding"));
            // A decode failure at the top level keeps the raw body verbatim
            let bytes = decode_transfer(encoding, body).unwrap_or_else(|_| body.to_vec());
            let text = decode_charset(ct.get("charset").unwrap_or(""), &bytes);
            if ct.value == "text/html" {
                ex.email.html_body = text;
            } else {
                ex.email.text_body = text;
            }
        }
    }

    Ok(ex.email)
}

fn walk_multipart(
    ct: &MimeParameters,
    body: &[u8],
    ex: &mut Extractor,
    depth: usize,
) -> Result<()> {
    let boundary = ct.get("boundary").ok_or(MailExtractError::MissingBoundary)?;
    for part in split_parts(body, boundary) {
        // One corrupt part must not lose the rest of the message
        let _skipped = handle_part(part, ex, depth);
    }
    Ok(())
}

fn handle_part(part: &[u8], ex: &mut Extractor, depth: usize) -> Result<()> {
    let block = HeaderBlock::parse(part)?;
    let body = &part[block.body_offset..];
    let ct = block
        .get("Content-Type")
        .map(MimeParameters::parse)
        .unwrap_or_else(|| MimeParameters::parse("text/plain"));

    if ct.is_multipart() {
        if depth + 1 >= MAX_MULTIPART_DEPTH {
            return Ok(());
        }
        // A nested multipart with no boundary is skipped by the caller
        // rather than failing the whole parse
        return walk_multipart(&ct, body, ex, depth + 1);
    }

    let disposition = block.get("Content-Disposition").map(MimeParameters::parse);
    let encoding = TransferEncoding::from_header(block.get("Content-Transfer-Encoding"));

    let is_attachment = match &disposition {
        Some(cd) => cd.value == "attachment" || cd.value == "inline",
        // A non-text part that doesn't say what it is still can't be
        // rendered inline
        None => !ct.is_text(),
    };

    if is_attachment {
        let file_name = disposition
            .as_ref()
            .and_then(|cd| cd.get("filename"))
            .or_else(|| ct.get("name"))
            .map(decode_encoded_words)
            .unwrap_or_else(|| FALLBACK_ATTACHMENT_NAME.to_string());
        let content = decode_transfer(encoding, body)?;
        ex.email
            .attachments
            .push(Attachment::new(file_name, ct.value.clone(), content));
        return Ok(());
    }

    let bytes = decode_transfer(encoding, body)?;
    let text = decode_charset(ct.get("charset").unwrap_or(""), &bytes);
    if ct.value == "text/html" {
        if !ex.html_filled {
            ex.email.html_body = text;
            ex.html_filled = true;
        }
    } else if !ex.text_filled {
        ex.email.text_body = text;
        ex.text_filled = true;
    }
    Ok(())
}

/// Split a multipart body into its parts. Boundary markers are only
/// honored at the start of a line; content between the final
/// `--boundary--` marker and end of input is ignored, as is any
/// preamble before the first marker.
fn split_parts<'a>(body: &'a [u8], boundary: &str) -> Vec<&'a [u8]> {
    let delimiter = format!("--{boundary}");
    let delimiter = delimiter.as_bytes();

    let mut markers: Vec<(usize, bool)> = vec![];
    for pos in memchr::memmem::find_iter(body, delimiter) {
        if pos > 0 && body[pos - 1] != b'\n' {
            continue;
        }
        let after = &body[pos + delimiter.len()..];
        let is_terminal = after.starts_with(b"--");
        // A body line that merely shares the delimiter prefix is not a
        // marker; the boundary must be followed by `--`, a line
        // ending, or end of input
        if !is_terminal && !matches!(after.first(), None | Some(b'\r') | Some(b'\n')) {
            continue;
        }
        markers.push((pos, is_terminal));
    }

    let mut parts = vec![];
    for (idx, (pos, is_terminal)) in markers.iter().enumerate() {
        if *is_terminal {
            break;
        }
        // Part content begins after the newline that ends the marker line
        let Some(start) = memchr::memchr(b'\n', &body[*pos..]).map(|p| pos + p + 1) else {
            break;
        };
        let mut end = markers
            .get(idx + 1)
            .map(|(next, _)| *next)
            .unwrap_or(body.len());
        // The newline before the next marker belongs to the marker line
        if end > start && body[end - 1] == b'\n' {
            end -= 1;
            if end > start && body[end - 1] == b'\r' {
                end -= 1;
            }
        }
        parts.push(&body[start..end.max(start)]);
    }
    parts
}
