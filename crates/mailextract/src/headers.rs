use crate::{MailExtractError, Result};

/// A single parsed header; the value has had its continuation lines
/// unfolded but is otherwise verbatim.
#[derive(Debug, Clone, PartialEq)]
pub struct Header {
    name: String,
    value: String,
}

/// The header block at the start of a message or mime part, together
/// with the offset of the first body byte.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct HeaderBlock {
    headers: Vec<Header>,
    pub body_offset: usize,
}

impl HeaderBlock {
    /// Parse the header block from the start of `data`.
    /// The block ends at the first blank line; a part that begins with
    /// a blank line simply has no headers. Header bytes are taken
    /// lossily as UTF-8 since anything beyond ASCII in the raw value
    /// is carried by RFC 2047 encoded words anyway.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut headers: Vec<Header> = vec![];
        let mut idx = 0;

        while idx < data.len() {
            let (line, next) = match memchr::memchr(b'\n', &data[idx..]) {
                Some(p) => (&data[idx..idx + p], idx + p + 1),
                None => (&data[idx..], data.len()),
            };
            let line = match line.last() {
                Some(b'\r') => &line[..line.len() - 1],
                _ => line,
            };

            if line.is_empty() {
                // Blank line terminates the header block
                idx = next;
                break;
            }

            if line[0] == b' ' || line[0] == b'\t' {
                let trailing = String::from_utf8_lossy(line);
                match headers.last_mut() {
                    Some(header) => {
                        header.value.push(' ');
                        header.value.push_str(trailing.trim());
                    }
                    None => {
                        return Err(MailExtractError::HeaderParse(
                            "header block must not start with whitespace".to_string(),
                        ));
                    }
                }
            } else {
                let colon = memchr::memchr(b':', line).ok_or_else(|| {
                    MailExtractError::HeaderParse(format!(
                        "header line has no colon: {:?}",
                        String::from_utf8_lossy(line)
                    ))
                })?;
                let name = String::from_utf8_lossy(&line[..colon]).trim().to_string();
                let value = String::from_utf8_lossy(&line[colon + 1..])
                    .trim()
                    .to_string();
                headers.push(Header { name, value });
            }

            idx = next;
        }

        Ok(Self {
            headers,
            body_offset: idx,
        })
    }

    /// The value of the first header with the given name, if any.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value.as_str())
    }
}

/// A structured header value of the `value; name=param; ...` shape
/// used by Content-Type and Content-Disposition.
#[derive(Debug, Clone, PartialEq)]
pub struct MimeParameters {
    pub value: String,
    params: Vec<(String, String)>,
}

impl MimeParameters {
    /// Tolerant parse: this must be infallible so that a basic mime
    /// structure is still extracted when the headers are a bit borked.
    pub fn parse(input: &str) -> Self {
        let mut segments = split_on_unquoted_semicolons(input).into_iter();
        let value = segments
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();

        let mut params = vec![];
        for segment in segments {
            let Some((name, raw)) = segment.split_once('=') else {
                continue;
            };
            params.push((name.trim().to_ascii_lowercase(), unquote(raw.trim())));
        }

        Self { value, params }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn is_multipart(&self) -> bool {
        self.value.starts_with("multipart/")
    }

    pub fn is_text(&self) -> bool {
        self.value.starts_with("text/")
    }
}

fn split_on_unquoted_semicolons(input: &str) -> Vec<&str> {
    let mut segments = vec![];
    let mut in_quotes = false;
    let mut escaped = false;
    let mut start = 0;

    for (idx, c) in input.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' if in_quotes => escaped = true,
            '"' => in_quotes = !in_quotes,
            ';' if !in_quotes => {
                segments.push(&input[start..idx]);
                start = idx + 1;
            }
            _ => {}
        }
    }
    segments.push(&input[start..]);
    segments
}

fn unquote(raw: &str) -> String {
    if raw.len() >= 2 && raw.starts_with('"') && raw.ends_with('"') {
        let inner = &raw[1..raw.len() - 1];
        let mut out = String::with_capacity(inner.len());
        let mut escaped = false;
        for c in inner.chars() {
            if escaped {
                out.push(c);
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else {
                out.push(c);
            }
        }
        out
    } else {
        raw.to_string()
    }
}
