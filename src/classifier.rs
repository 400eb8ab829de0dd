//! Extracts an identifier scheme and value from an access log request line.
//!
//! A request line qualifies when, after form decoding, it has the shape
//! `METHOD /scheme:value VERSION`. The scheme is restricted to ASCII letters,
//! digits, `.`, `/` and `_`, and the split happens on the first colon of the
//! path, so values may themselves contain colons (`/doi:http://...`).

use crate::models::Classification;
use percent_encoding::percent_decode_str;
use std::borrow::Cow;

/// Schemes containing this are application scripts, not identifiers.
const REJECTED_SCHEME_FRAGMENT: &str = ".php";

#[derive(Debug, Default, Clone, Copy)]
pub struct RequestClassifier;

impl RequestClassifier {
    pub fn new() -> Self {
        RequestClassifier
    }

    pub fn classify(&self, request_line: &str) -> Option<Classification> {
        let decoded = decode_form(request_line);
        let path = request_path(&decoded)?;
        let (scheme, value) = split_identifier(path)?;

        let scheme = scheme.trim_matches('/').to_ascii_lowercase();
        if scheme.is_empty() || scheme.contains(REJECTED_SCHEME_FRAGMENT) {
            return None;
        }
        let value = value.trim_matches('/');
        if value.is_empty() {
            return None;
        }
        Some(Classification {
            scheme,
            value: value.to_owned(),
        })
    }
}

/// `application/x-www-form-urlencoded` decoding: `+` is a space, then percent
/// escapes are resolved. Invalid UTF-8 is replaced.
fn decode_form(raw: &str) -> Cow<'_, str> {
    if !raw.contains(&['+', '%'][..]) {
        return Cow::Borrowed(raw);
    }
    let spaced = raw.replace('+', " ");
    Cow::Owned(percent_decode_str(&spaced).decode_utf8_lossy().into_owned())
}

/// The path between the method and the protocol version. The path may contain
/// whitespace once decoded, so the method ends at the first whitespace and the
/// version starts after the last one.
fn request_path(line: &str) -> Option<&str> {
    let (method, rest) = line.split_once(char::is_whitespace)?;
    let (path, version) = rest.rsplit_once(char::is_whitespace)?;
    let path = path.trim();
    if method.is_empty() || version.is_empty() || !path.starts_with('/') {
        return None;
    }
    Some(path)
}

fn split_identifier(path: &str) -> Option<(&str, &str)> {
    let (scheme, value) = path[1..].split_once(':')?;
    let valid = scheme
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '/' | '_'));
    valid.then(|| (scheme, value))
}
