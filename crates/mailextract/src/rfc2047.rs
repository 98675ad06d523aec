use crate::charsets::decode_charset;
use crate::transfer::BASE64_RFC2045;

/// Decode any RFC 2047 encoded words present in a header value,
/// leaving the surrounding plain text alone. Whitespace between two
/// adjacent encoded words is elided, which is how long encoded
/// subjects folded across multiple header lines are reassembled.
/// Malformed candidates are passed through verbatim.
pub fn decode_encoded_words(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    let mut last_was_encoded = false;

    while let Some(start) = rest.find("=?") {
        let (before, candidate) = rest.split_at(start);
        match parse_encoded_word(candidate) {
            Some((decoded, consumed)) => {
                if !(last_was_encoded && before.chars().all(char::is_whitespace)) {
                    out.push_str(before);
                }
                out.push_str(&decoded);
                rest = &candidate[consumed..];
                last_was_encoded = true;
            }
            None => {
                out.push_str(before);
                out.push_str("=?");
                rest = &candidate[2..];
                last_was_encoded = false;
            }
        }
    }
    out.push_str(rest);
    out
}

/// Attempt to parse `=?charset?B|Q?payload?=` from the start of `s`,
/// returning the decoded text and the number of bytes consumed.
fn parse_encoded_word(s: &str) -> Option<(String, usize)> {
    let inner = s.strip_prefix("=?")?;
    let charset_end = inner.find('?')?;
    let charset = &inner[..charset_end];

    let enc_start = &inner[charset_end + 1..];
    let enc_end = enc_start.find('?')?;
    let encoding = &enc_start[..enc_end];

    let payload_start = &enc_start[enc_end + 1..];
    let payload_end = payload_start.find("?=")?;
    let payload = &payload_start[..payload_end];

    let bytes = if encoding.eq_ignore_ascii_case("b") {
        BASE64_RFC2045.decode(payload.as_bytes()).ok()?
    } else if encoding.eq_ignore_ascii_case("q") {
        decode_q(payload)
    } else {
        return None;
    };

    // RFC 2231 permits a trailing *language tag on the charset
    let charset = charset.split('*').next().unwrap_or(charset);

    let consumed = 2 + charset_end + 1 + enc_end + 1 + payload_end + 2;
    Some((decode_charset(charset, &bytes), consumed))
}

fn decode_q(payload: &str) -> Vec<u8> {
    let bytes = payload.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut idx = 0;

    while idx < bytes.len() {
        match bytes[idx] {
            b'_' => {
                out.push(b' ');
                idx += 1;
            }
            b'=' if idx + 3 <= bytes.len() => {
                match (hex_val(bytes[idx + 1]), hex_val(bytes[idx + 2])) {
                    (Some(hi), Some(lo)) => {
                        out.push(hi << 4 | lo);
                        idx += 3;
                    }
                    _ => {
                        out.push(b'=');
                        idx += 1;
                    }
                }
            }
            other => {
                out.push(other);
                idx += 1;
            }
        }
    }
    out
}

fn hex_val(b: u8) -> Option<u8> {
    (b as char).to_digit(16).map(|v| v as u8)
}
