// ABOUTME: Charset detection and decoding for fetched documents.
// ABOUTME: Priority is HTTP header, then BOM, then in-document meta tags, then a statistical guess, then UTF-8.

use std::fmt;

use encoding_rs::Encoding;
use once_cell::sync::Lazy;
use regex::bytes::Regex;
use serde::{Deserialize, Serialize};

/// Meta tag scanning never looks past this many bytes.
pub const META_SCAN_LIMIT: usize = 2048;

pub const DEFAULT_CHARSET: &str = "utf-8";

/// Where a detected charset came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CharsetSource {
    HttpHeader,
    Bom,
    MetaHttpEquiv,
    MetaCharset,
    Detected,
    Default,
}

impl fmt::Display for CharsetSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CharsetSource::HttpHeader => "http-header",
            CharsetSource::Bom => "bom",
            CharsetSource::MetaHttpEquiv => "meta-http-equiv",
            CharsetSource::MetaCharset => "meta-charset",
            CharsetSource::Detected => "detected",
            CharsetSource::Default => "default",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharsetInfo {
    pub charset: String,
    pub source: CharsetSource,
}

impl CharsetInfo {
    fn new(charset: impl Into<String>, source: CharsetSource) -> Self {
        Self {
            charset: charset.into(),
            source,
        }
    }
}

// UTF-32 signatures come first: the UTF-32LE BOM starts with the UTF-16LE one.
const BOM_SIGNATURES: &[(&[u8], &str)] = &[
    (&[0xef, 0xbb, 0xbf], "utf-8"),
    (&[0xff, 0xfe, 0x00, 0x00], "utf-32le"),
    (&[0x00, 0x00, 0xfe, 0xff], "utf-32be"),
    (&[0xff, 0xfe], "utf-16le"),
    (&[0xfe, 0xff], "utf-16be"),
];

static CONTENT_TYPE_CHARSET_RE: Lazy<Option<regex::Regex>> =
    Lazy::new(|| regex::Regex::new(r#"(?i)charset=["']?([^"'\s;]+)"#).ok());

static HTTP_EQUIV_RE: Lazy<Option<Regex>> = Lazy::new(|| {
    Regex::new(
        r#"(?i-u)<meta[^>]{0,500}?http-equiv=["']?content-type["']?[^>]{0,500}?content=["']?[^"']*charset=([^"'\s;>]+)"#,
    )
    .ok()
});

static HTTP_EQUIV_REVERSED_RE: Lazy<Option<Regex>> = Lazy::new(|| {
    Regex::new(
        r#"(?i-u)<meta[^>]{0,500}?content=["']?[^"']*charset=([^"'\s;>]+)[^>]{0,500}?http-equiv=["']?content-type["']?"#,
    )
    .ok()
});

static META_CHARSET_RE: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r#"(?i-u)<meta\s+charset=["']?([^"'\s>/]+)"#).ok());

/// Fold common spellings into one canonical label.
pub fn normalize_charset(charset: &str) -> String {
    let lower = charset.trim().to_ascii_lowercase();
    if lower.replace(['-', '_'], "") == "utf8" {
        return DEFAULT_CHARSET.to_string();
    }
    match lower.as_str() {
        "ascii" | "us-ascii" => DEFAULT_CHARSET.to_string(),
        "cp1252" | "win-1252" | "x-cp1252" => "windows-1252".to_string(),
        "iso8859-1" | "iso88591" | "iso_8859-1" | "latin1" => "iso-8859-1".to_string(),
        _ => lower,
    }
}

/// Pull the charset parameter out of a Content-Type value.
pub fn parse_content_type_charset(content_type: &str) -> Option<String> {
    let re = CONTENT_TYPE_CHARSET_RE.as_ref()?;
    let caps = re.captures(content_type)?;
    caps.get(1).map(|m| normalize_charset(m.as_str()))
}

fn detect_bom(bytes: &[u8]) -> Option<&'static str> {
    BOM_SIGNATURES
        .iter()
        .find(|(sig, _)| bytes.starts_with(sig))
        .map(|(_, charset)| *charset)
}

fn capture_label(re: &Lazy<Option<Regex>>, window: &[u8]) -> Option<String> {
    let caps = re.as_ref()?.captures(window)?;
    let label = caps.get(1)?.as_bytes();
    Some(normalize_charset(&String::from_utf8_lossy(label)))
}

fn detect_meta(bytes: &[u8]) -> Option<CharsetInfo> {
    let window = &bytes[..bytes.len().min(META_SCAN_LIMIT)];
    if let Some(label) = capture_label(&HTTP_EQUIV_RE, window)
        .or_else(|| capture_label(&HTTP_EQUIV_REVERSED_RE, window))
    {
        return Some(CharsetInfo::new(label, CharsetSource::MetaHttpEquiv));
    }
    capture_label(&META_CHARSET_RE, window)
        .map(|label| CharsetInfo::new(label, CharsetSource::MetaCharset))
}

/// Decide which charset a response body is in.
pub fn detect_charset(bytes: &[u8], content_type: Option<&str>) -> CharsetInfo {
    if let Some(charset) = content_type.and_then(parse_content_type_charset) {
        return CharsetInfo::new(charset, CharsetSource::HttpHeader);
    }
    if let Some(charset) = detect_bom(bytes) {
        return CharsetInfo::new(charset, CharsetSource::Bom);
    }
    if let Some(info) = detect_meta(bytes) {
        return info;
    }
    if std::str::from_utf8(bytes).is_err() {
        let mut detector = chardetng::EncodingDetector::new();
        detector.feed(bytes, true);
        let guess = detector.guess(None, true);
        return CharsetInfo::new(guess.name().to_ascii_lowercase(), CharsetSource::Detected);
    }
    CharsetInfo::new(DEFAULT_CHARSET, CharsetSource::Default)
}

/// Whether `decode_html` can honor this label rather than falling back to UTF-8.
pub fn is_charset_supported(charset: &str) -> bool {
    let label = normalize_charset(charset);
    utf32_endianness(&label).is_some() || Encoding::for_label(label.as_bytes()).is_some()
}

fn utf32_endianness(label: &str) -> Option<bool> {
    match label {
        "utf-32le" | "utf32le" | "utf-32" => Some(true),
        "utf-32be" | "utf32be" => Some(false),
        _ => None,
    }
}

fn decode_utf32(bytes: &[u8], little_endian: bool) -> String {
    bytes
        .chunks_exact(4)
        .map(|chunk| {
            let raw = [chunk[0], chunk[1], chunk[2], chunk[3]];
            let code = if little_endian {
                u32::from_le_bytes(raw)
            } else {
                u32::from_be_bytes(raw)
            };
            char::from_u32(code).unwrap_or(char::REPLACEMENT_CHARACTER)
        })
        .collect()
}

fn strip_bom(s: String) -> String {
    match s.strip_prefix('\u{feff}') {
        Some(rest) => rest.to_string(),
        None => s,
    }
}

/// Decode `bytes` as `charset`, falling back to lossy UTF-8 for unknown labels.
///
/// One leading U+FEFF is always removed from the result.
pub fn decode_html(bytes: &[u8], charset: &str) -> String {
    let label = normalize_charset(charset);
    if let Some(little_endian) = utf32_endianness(&label) {
        return strip_bom(decode_utf32(bytes, little_endian));
    }
    match Encoding::for_label(label.as_bytes()) {
        Some(encoding) => {
            let (decoded, _) = encoding.decode_with_bom_removal(bytes);
            strip_bom(decoded.into_owned())
        }
        None => decode_utf8_lossy(bytes),
    }
}

/// Plain UTF-8 decoding used when charset conversion is off.
pub fn decode_utf8_lossy(bytes: &[u8]) -> String {
    strip_bom(String::from_utf8_lossy(bytes).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn normalizes_aliases() {
        assert_eq!(normalize_charset("UTF8"), "utf-8");
        assert_eq!(normalize_charset(" utf_8 "), "utf-8");
        assert_eq!(normalize_charset("us-ascii"), "utf-8");
        assert_eq!(normalize_charset("latin1"), "iso-8859-1");
        assert_eq!(normalize_charset("x-cp1252"), "windows-1252");
        assert_eq!(normalize_charset("Shift_JIS"), "shift_jis");
    }

    #[test]
    fn content_type_charset_handles_quotes() {
        assert_eq!(
            parse_content_type_charset("text/html; charset=\"ISO-8859-1\""),
            Some("iso-8859-1".to_string())
        );
        assert_eq!(
            parse_content_type_charset("text/html;charset='utf-8'"),
            Some("utf-8".to_string())
        );
        assert_eq!(parse_content_type_charset("text/html"), None);
    }

    #[test]
    fn header_wins_over_bom_and_meta() {
        let body = b"\xef\xbb\xbf<meta charset=\"shift_jis\">";
        let info = detect_charset(body, Some("text/html; charset=windows-1252"));
        assert_eq!(info, CharsetInfo::new("windows-1252", CharsetSource::HttpHeader));
    }

    #[test]
    fn bom_detection_prefers_utf32() {
        assert_eq!(detect_charset(b"\xff\xfe\x00\x00<\x00\x00\x00", None).charset, "utf-32le");
        assert_eq!(detect_charset(b"\xff\xfe<\x00", None).charset, "utf-16le");
        assert_eq!(detect_charset(b"\xfe\xff\x00<", None).charset, "utf-16be");
        assert_eq!(detect_charset(b"\x00\x00\xfe\xff", None).charset, "utf-32be");
        assert_eq!(detect_charset(b"\xef\xbb\xbfhi", None).source, CharsetSource::Bom);
    }

    #[test]
    fn meta_http_equiv_in_either_order() {
        let forward = br#"<meta http-equiv="Content-Type" content="text/html; charset=ISO-8859-1">"#;
        let reversed = br#"<meta content="text/html; charset=windows-1251" http-equiv="content-type">"#;
        assert_eq!(
            detect_charset(forward, None),
            CharsetInfo::new("iso-8859-1", CharsetSource::MetaHttpEquiv)
        );
        assert_eq!(
            detect_charset(reversed, None),
            CharsetInfo::new("windows-1251", CharsetSource::MetaHttpEquiv)
        );
    }

    #[test]
    fn meta_charset_and_scan_limit() {
        let html = br#"<html><head><meta charset="euc-jp"></head>"#;
        assert_eq!(
            detect_charset(html, None),
            CharsetInfo::new("euc-jp", CharsetSource::MetaCharset)
        );

        let mut late = vec![b' '; META_SCAN_LIMIT];
        late.extend_from_slice(br#"<meta charset="euc-jp">"#);
        assert_eq!(detect_charset(&late, None).source, CharsetSource::Default);
    }

    #[test]
    fn guesses_only_for_invalid_utf8() {
        assert_eq!(detect_charset("héllo wörld".as_bytes(), None).source, CharsetSource::Default);
        let latin1 = b"<p>Caf\xe9 cr\xe8me br\xfbl\xe9e, tr\xe8s d\xe9licieux</p>";
        assert_eq!(detect_charset(latin1, None).source, CharsetSource::Detected);
    }

    #[test]
    fn decodes_legacy_and_utf32() {
        assert_eq!(decode_html(b"caf\xe9", "iso-8859-1"), "café");
        assert_eq!(decode_html(b"\xef\xbb\xbfhi", "utf-8"), "hi");
        assert_eq!(decode_html(b"\xff\xfeh\x00i\x00", "utf-16le"), "hi");
        assert_eq!(
            decode_html(b"\xff\xfe\x00\x00h\x00\x00\x00i\x00\x00\x00", "utf-32le"),
            "hi"
        );
        assert_eq!(decode_html(b"\x00\x00\x00h\x00\x00\x00i", "utf-32be"), "hi");
    }

    #[test]
    fn unknown_label_falls_back_to_utf8() {
        assert!(!is_charset_supported("klingon-8"));
        assert!(is_charset_supported("latin1"));
        assert_eq!(decode_html("ok ✓".as_bytes(), "klingon-8"), "ok ✓");
        assert_eq!(decode_utf8_lossy(b"\xef\xbb\xbfplain"), "plain");
    }
}
