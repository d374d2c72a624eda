//! Percent-escaping rules for public ids, remote URLs and layer text.

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, percent_decode_str, utf8_percent_encode};

/// Everything except alphanumerics and `_ . - / :` is escaped.
const SMART_ESCAPE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'_')
    .remove(b'.')
    .remove(b'-')
    .remove(b'/')
    .remove(b':');

/// URI component escaping that leaves `/` and `:` readable.
const PUBLIC_ID: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')')
    .remove(b'/')
    .remove(b':');

/// [`PUBLIC_ID`] with `%` left alone, for ids whose escapes are not UTF-8.
const PUBLIC_ID_ESCAPED: &AsciiSet = &PUBLIC_ID.remove(b'%');

/// Escapes a remote URL used as a fetch source.
pub fn smart_escape(s: &str) -> String {
    utf8_percent_encode(s, SMART_ESCAPE).to_string()
}

/// Escapes a public id, first decoding any existing `%XX` sequences so that
/// already-escaped ids are not escaped twice.
///
/// When the escapes do not decode to UTF-8 the id is escaped as-is with its
/// `%XX` sequences kept.
pub fn escape_public_id(s: &str) -> String {
    match percent_decode_str(s).decode_utf8() {
        Ok(decoded) => utf8_percent_encode(&decoded, PUBLIC_ID).to_string(),
        Err(_) => utf8_percent_encode(s, PUBLIC_ID_ESCAPED).to_string(),
    }
}

/// Escapes overlay text: `,` and `/` are escaped first, then the result is
/// smart-escaped (so a comma ends up as `%252C`).
pub fn escape_layer_text(text: &str) -> String {
    smart_escape(&text.replace(',', "%2C").replace('/', "%2F"))
}

/// Replaces `//` with `/` unless it follows a `:` (as in `https://`).
pub(crate) fn collapse_double_slashes(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut prev: Option<char> = None;
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '/' && chars.peek() == Some(&'/') && prev.is_some_and(|p| p != ':') {
            out.push('/');
            chars.next();
            prev = Some('/');
            continue;
        }
        out.push(c);
        prev = Some(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn public_id_escaping() {
        assert_eq!(escape_public_id("a b"), "a%20b");
        assert_eq!(escape_public_id("a%20b"), "a%20b");
        assert_eq!(escape_public_id("folder/a(1)-b.jpg"), "folder/a(1)-b.jpg");
        assert_eq!(escape_public_id("a+b&c"), "a%2Bb%26c");
    }

    #[test]
    fn non_utf8_escapes_are_kept() {
        assert_eq!(escape_public_id("caf%E9"), "caf%E9");
        assert_eq!(escape_public_id("caf%E9 au lait"), "caf%E9%20au%20lait");
        assert_eq!(escape_public_id("caf%C3%A9"), "caf%C3%A9");
    }

    #[test]
    fn smart_escape_keeps_url_shape() {
        assert_eq!(
            smart_escape("http://example.com/a b?x=1"),
            "http://example.com/a%20b%3Fx%3D1"
        );
    }

    #[test]
    fn layer_text_is_escaped_twice() {
        assert_eq!(escape_layer_text("hello, world"), "hello%252C%20world");
        assert_eq!(escape_layer_text("a/b"), "a%252Fb");
    }

    #[test]
    fn double_slashes() {
        assert_eq!(collapse_double_slashes("a//b"), "a/b");
        assert_eq!(collapse_double_slashes("http://x//y"), "http://x/y");
        assert_eq!(collapse_double_slashes("//x"), "//x");
    }
}
