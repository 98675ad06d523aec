use crate::{MailExtractError, Result};

/// Define our own because data_encoding::BASE64_MIME, despite its name,
/// is not RFC2045 compliant, and will not ignore spaces
pub(crate) const BASE64_RFC2045: data_encoding::Encoding = data_encoding_macro::new_encoding! {
    symbols: "ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/",
    padding: '=',
    ignore: " \r\n\t",
    wrap_width: 76,
    wrap_separator: "\r\n",
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TransferEncoding {
    SevenBit,
    EightBit,
    Binary,
    QuotedPrintable,
    Base64,
    /// Anything we don't recognize is passed through untouched
    Other,
}

impl TransferEncoding {
    pub fn from_header(value: Option<&str>) -> Self {
        let Some(value) = value else {
            return Self::SevenBit;
        };
        let value = value.trim();
        if value.eq_ignore_ascii_case("7bit") {
            Self::SevenBit
        } else if value.eq_ignore_ascii_case("8bit") {
            Self::EightBit
        } else if value.eq_ignore_ascii_case("binary") {
            Self::Binary
        } else if value.eq_ignore_ascii_case("quoted-printable") {
            Self::QuotedPrintable
        } else if value.eq_ignore_ascii_case("base64") {
            Self::Base64
        } else {
            Self::Other
        }
    }
}

/// Reverse the declared content-transfer-encoding.
/// 7bit/8bit/binary and unrecognized encodings pass through.
pub(crate) fn decode_transfer(encoding: TransferEncoding, raw: &[u8]) -> Result<Vec<u8>> {
    match encoding {
        TransferEncoding::Base64 => BASE64_RFC2045
            .decode(raw)
            .map_err(|err| MailExtractError::BodyDecode(format!("base64 decode: {err}"))),
        TransferEncoding::QuotedPrintable => {
            quoted_printable::decode(raw, quoted_printable::ParseMode::Robust).map_err(|err| {
                MailExtractError::BodyDecode(format!("quoted printable decode: {err}"))
            })
        }
        TransferEncoding::SevenBit
        | TransferEncoding::EightBit
        | TransferEncoding::Binary
        | TransferEncoding::Other => Ok(raw.to_vec()),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use k9::assert_equal;

    #[test]
    fn base64_ignores_folding_whitespace() {
        let decoded =
            decode_transfer(TransferEncoding::Base64, b"aGVs \r\n\tbG8K").unwrap();
        assert_equal!(decoded, b"hello\n");
    }

    #[test]
    fn bad_base64_is_an_error() {
        assert!(decode_transfer(TransferEncoding::Base64, b"not base64!").is_err());
    }

    #[test]
    fn quoted_printable() {
        let decoded =
            decode_transfer(TransferEncoding::QuotedPrintable, b"caf=C3=A9=0A").unwrap();
        assert_equal!(decoded, "café\n".as_bytes());
    }

    #[test]
    fn unknown_encoding_passes_through() {
        assert_equal!(TransferEncoding::from_header(Some("x-whatever")), TransferEncoding::Other);
        let decoded = decode_transfer(TransferEncoding::Other, b"as-is").unwrap();
        assert_equal!(decoded, b"as-is");
    }
}
