use base64::{
    Engine as _,
    alphabet,
    engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig, general_purpose::STANDARD},
};

use crate::error::ServiceError;

const LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new()
        .with_decode_allow_trailing_bits(true)
        .with_decode_padding_mode(DecodePaddingMode::RequireNone),
);

fn is_base64(c: u8) -> bool {
    c.is_ascii_alphanumeric() || c == b'+' || c == b'/'
}

/// Decodes standard base64, stopping at the first `=` or foreign character.
///
/// Never fails: a dangling sextet that cannot form a byte is dropped.
pub fn base64_decode(encoded: &str) -> Vec<u8> {
    let valid_len = encoded
        .bytes()
        .take_while(|&c| c != b'=' && is_base64(c))
        .count();
    let mut valid = &encoded[..valid_len];
    if valid.len() % 4 == 1 {
        valid = &valid[..valid.len() - 1];
    }
    LENIENT.decode(valid).unwrap_or_default()
}

pub fn base64_encode(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// Splits a `data:<mime>;base64,<payload>` URL into its media type and bytes.
pub fn decode_data_url(url: &str) -> Result<(String, Vec<u8>), ServiceError> {
    let rest = url
        .strip_prefix("data:")
        .ok_or_else(|| ServiceError::InvalidRequest("Illegal param: expected a data URL".into()))?;
    let (header, payload) = rest.split_once(',').ok_or_else(|| {
        ServiceError::InvalidRequest("Illegal param: data URL has no payload".into())
    })?;
    let mime = header.strip_suffix(";base64").ok_or_else(|| {
        ServiceError::InvalidRequest("Illegal param: only base64 data URLs are supported".into())
    })?;
    Ok((mime.to_string(), base64_decode(payload)))
}

/// Number of trailing bytes that start a multi-byte UTF-8 sequence whose
/// continuation bytes have not arrived yet.
pub fn incomplete_utf8_suffix(bytes: &[u8]) -> usize {
    let len = bytes.len();
    for i in 1..=len.min(4) {
        let c = bytes[len - i];
        let needed = if c & 0xE0 == 0xC0 {
            2
        } else if c & 0xF0 == 0xE0 {
            3
        } else if c & 0xF8 == 0xF0 {
            4
        } else if c & 0xC0 == 0x80 {
            continue;
        } else {
            return 0;
        };
        return if i < needed { i } else { 0 };
    }
    0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_round_trips_padded_and_unpadded() {
        for input in [&b""[..], b"f", b"fo", b"foo", b"foob", b"\x00\xff\x80hello"] {
            assert_eq!(base64_decode(&base64_encode(input)), input);
        }
    }

    #[test]
    fn decode_stops_at_foreign_characters() {
        assert_eq!(base64_decode("Zm9v!Zm9v"), b"foo");
        assert_eq!(base64_decode("Zm9vYg==trailing"), b"foob");
        assert_eq!(base64_decode("Zm9vY"), b"foo");
    }

    #[test]
    fn data_url_is_split() {
        let (mime, bytes) = decode_data_url("data:image/png;base64,aGk=").unwrap();
        assert_eq!(mime, "image/png");
        assert_eq!(bytes, b"hi");

        assert!(decode_data_url("https://example.com/cat.png").is_err());
        assert!(decode_data_url("data:text/plain,hi").is_err());
    }

    #[test]
    fn incomplete_utf8_tail_is_measured() {
        let euro = "€".as_bytes(); // e2 82 ac
        assert_eq!(incomplete_utf8_suffix(b"abc"), 0);
        assert_eq!(incomplete_utf8_suffix(euro), 0);
        assert_eq!(incomplete_utf8_suffix(&euro[..1]), 1);
        assert_eq!(incomplete_utf8_suffix(&euro[..2]), 2);
        assert_eq!(incomplete_utf8_suffix(&[b'a', 0xf0, 0x9f]), 2);
        assert_eq!(incomplete_utf8_suffix(&[]), 0);
    }
}
