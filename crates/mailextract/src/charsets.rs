use charset::Charset;

/// Decode body bytes according to the declared character set.
/// UTF-8 and US-ASCII pass through unchanged; anything the charset
/// crate recognizes is transcoded to UTF-8; unrecognized labels fall
/// back to a lossy view of the raw bytes rather than erroring.
pub(crate) fn decode_charset(label: &str, bytes: &[u8]) -> String {
    let label = label.trim();
    if label.is_empty()
        || label.eq_ignore_ascii_case("utf-8")
        || label.eq_ignore_ascii_case("us-ascii")
        || label.eq_ignore_ascii_case("ascii")
    {
        return String::from_utf8_lossy(bytes).to_string();
    }
    match Charset::for_label_no_replacement(label.as_bytes()) {
        Some(charset) => {
            let (decoded, _malformed) = charset.decode_without_bom_handling(bytes);
            decoded.to_string()
        }
        None => String::from_utf8_lossy(bytes).to_string(),
    }
}
