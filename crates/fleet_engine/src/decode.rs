use chardetng::EncodingDetector;
use encoding_rs::Encoding;

/// Page text decoded from raw response bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedPage {
    pub text: String,
    pub encoding_label: &'static str,
    /// Malformed sequences were replaced with U+FFFD.
    pub had_errors: bool,
}

/// Decode raw bytes using: BOM -> Content-Type charset -> chardetng fallback.
///
/// Listing sites serve a mix of UTF-8 and legacy single-byte encodings, so a
/// decode never fails; malformed input is replaced and flagged instead.
pub fn decode_page(bytes: &[u8], content_type: Option<&str>) -> DecodedPage {
    if let Some((encoding, _)) = Encoding::for_bom(bytes) {
        return decode_with(bytes, encoding);
    }

    if let Some(enc) = content_type
        .and_then(charset_label)
        .and_then(|label| Encoding::for_label(label.as_bytes()))
    {
        return decode_with(bytes, enc);
    }

    let mut detector = EncodingDetector::new();
    detector.feed(bytes, true);
    decode_with(bytes, detector.guess(None, true))
}

fn charset_label(content_type: &str) -> Option<String> {
    content_type.split(';').find_map(|part| {
        let (key, value) = part.trim().split_once('=')?;
        key.trim()
            .eq_ignore_ascii_case("charset")
            .then(|| value.trim_matches([' ', '"', '\'']).to_string())
    })
}

fn decode_with(bytes: &[u8], enc: &'static Encoding) -> DecodedPage {
    let (text, used, had_errors) = enc.decode(bytes);
    DecodedPage {
        text: text.into_owned(),
        encoding_label: used.name(),
        had_errors,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_charset_wins_over_detection() {
        // "caffè" in ISO-8859-1.
        let bytes = b"caff\xe8";
        let page = decode_page(bytes, Some("text/html; Charset=\"ISO-8859-1\""));
        assert_eq!(page.text, "caff\u{e8}");
        assert_eq!(page.encoding_label, "windows-1252");
        assert!(!page.had_errors);
    }

    #[test]
    fn bom_is_honoured() {
        let page = decode_page(b"\xEF\xBB\xBFhello", Some("text/html; charset=iso-8859-1"));
        assert_eq!(page.text, "hello");
        assert_eq!(page.encoding_label, "UTF-8");
    }

    #[test]
    fn plain_utf8_without_header() {
        let page = decode_page("Informazione su anime".as_bytes(), None);
        assert_eq!(page.text, "Informazione su anime");
    }
}
