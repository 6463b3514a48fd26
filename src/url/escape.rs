//! Percent-encoding rules for URL components.
//!
//! Two character classes matter here. *Unsafe* characters can never appear
//! literally in a URL (controls, space, `"<>\^`{|}`, DEL and 8-bit bytes).
//! *Reserved* characters carry URL syntax (`;/?:@&=+$,#[]`) and are left
//! alone when re-encoding a whole URL, so its structure survives.

const HEX: &[u8; 16] = b"0123456789ABCDEF";

fn is_unsafe(b: u8) -> bool {
    b < 0x20
        || b >= 0x7f
        || matches!(b, b' ' | b'"' | b'<' | b'>' | b'\\' | b'^' | b'`' | b'{' | b'|' | b'}')
}

fn is_reserved(b: u8) -> bool {
    matches!(
        b,
        b';' | b'/' | b'?' | b':' | b'@' | b'&' | b'=' | b'+' | b'$' | b',' | b'#' | b'[' | b']'
    )
}

fn push_encoded(out: &mut String, b: u8) {
    out.push('%');
    out.push(char::from(HEX[usize::from(b >> 4)]));
    out.push(char::from(HEX[usize::from(b & 0x0f)]));
}

fn hex_value(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

fn is_escape_at(bytes: &[u8], i: usize) -> bool {
    bytes.get(i) == Some(&b'%')
        && bytes.get(i + 1).copied().and_then(hex_value).is_some()
        && bytes.get(i + 2).copied().and_then(hex_value).is_some()
}

/// Re-encodes a complete URL so every character that needs escaping is
/// escaped exactly once.
///
/// Valid `%XX` sequences are preserved, a `%` not followed by two hex
/// digits becomes `%25`, and unsafe characters are encoded. Reserved
/// characters are never touched.
#[must_use]
pub fn reencode_escapes(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = String::with_capacity(s.len());
    for (i, &b) in bytes.iter().enumerate() {
        if b == b'%' {
            if is_escape_at(bytes, i) {
                out.push('%');
            } else {
                push_encoded(&mut out, b);
            }
        } else if is_unsafe(b) && !is_reserved(b) {
            push_encoded(&mut out, b);
        } else {
            out.push(char::from(b));
        }
    }
    out
}

/// Escapes a single component: unsafe characters plus `%`.
#[must_use]
pub fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for &b in s.as_bytes() {
        if is_unsafe(b) || b == b'%' {
            push_encoded(&mut out, b);
        } else {
            out.push(char::from(b));
        }
    }
    out
}

/// Escapes user or password text, which additionally may not contain the
/// characters that delimit the authority section.
#[must_use]
pub(crate) fn escape_userinfo(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for &b in s.as_bytes() {
        if is_unsafe(b) || matches!(b, b'%' | b':' | b'@' | b'/' | b'?' | b'#') {
            push_encoded(&mut out, b);
        } else {
            out.push(char::from(b));
        }
    }
    out
}

/// Decodes `%XX` sequences. Malformed sequences are kept verbatim and
/// invalid UTF-8 is replaced rather than rejected.
#[must_use]
pub fn unescape(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if is_escape_at(bytes, i) {
            let hi = hex_value(bytes[i + 1]).unwrap_or(0);
            let lo = hex_value(bytes[i + 2]).unwrap_or(0);
            out.push((hi << 4) | lo);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}
