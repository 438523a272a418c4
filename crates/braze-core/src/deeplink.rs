//! Deep-link payload codec.
//!
//! A deep link is a URL that opens a conversation with the bot and delivers
//! an embedded payload as if the user had typed it. The payload travels in
//! the `start=` parameter as URL-safe base64 with padding stripped.
//!
//! [`decode`] is total: anything that is not a well-formed token comes back
//! as the empty string, never as an error. Inbound text is attacker
//! controlled, so the normalizer must be able to probe arbitrary strings.

use base64::Engine;
use base64::engine::general_purpose::{URL_SAFE, URL_SAFE_NO_PAD};

/// Prepares text for use as a deep link's `start=` value.
///
/// URL-safe base64 of the UTF-8 bytes; no padding characters are ever
/// produced.
pub fn encode(text: &str) -> String {
    URL_SAFE_NO_PAD.encode(text.as_bytes())
}

/// Extracts the original command from a deep link's `start=` value.
///
/// Returns the empty string on any malformed input: non-ASCII characters in
/// the token, invalid base64, or decoded bytes that are not UTF-8.
pub fn decode(text: &str) -> String {
    if !text.is_ascii() {
        return String::new();
    }
    // The sender may or may not have kept the padding; normalize to padded
    // form before decoding.
    let mut padded = text.trim_end_matches('=').to_owned();
    while padded.len() % 4 != 0 {
        padded.push('=');
    }
    let Ok(bytes) = URL_SAFE.decode(padded.as_bytes()) else {
        return String::new();
    };
    String::from_utf8(bytes).unwrap_or_default()
}

/// Generates a deep-link URL for the given bot username and command.
pub fn encode_url(username: &str, command: &str) -> String {
    format!("https://t.me/{username}?start={}", encode(command))
}

/// Generates an HTML fragment linking back to the bot with `command` as the
/// embedded payload.
pub fn encode_link(username: &str, command: &str, label: Option<&str>) -> String {
    format!(
        "<a href=\"{}\">{}</a>",
        escape(&encode_url(username, command)),
        escape(label.unwrap_or(command))
    )
}

/// Escapes text for use inside an HTML fragment or attribute value.
pub fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        for text in ["", "/cmd", "/cmd with args", "\u{1f916} multibyte", "a"] {
            assert_eq!(decode(&encode(text)), text);
        }
    }

    #[test]
    fn encode_never_pads() {
        for text in ["a", "ab", "abc", "abcd"] {
            assert!(!encode(text).contains('='));
        }
    }

    #[test]
    fn decode_is_total() {
        assert_eq!(decode("not!base64"), "");
        assert_eq!(decode("d\u{e9}j\u{e0}"), "");
        // Valid base64 of invalid UTF-8.
        assert_eq!(decode(&URL_SAFE_NO_PAD.encode([0xff, 0xfe])), "");
        assert_eq!(decode(""), "");
    }

    #[test]
    fn decode_accepts_padded_and_unpadded() {
        assert_eq!(decode("L2NtZA"), "/cmd");
        assert_eq!(decode("L2NtZA=="), "/cmd");
    }

    #[test]
    fn link_escapes_attribute_characters() {
        let link = encode_link("mybot", "/cmd", Some("a <b> & \"c\""));
        assert!(link.contains("a &lt;b&gt; &amp; &quot;c&quot;"));
        assert!(link.starts_with("<a href=\"https://t.me/mybot?start="));
    }
}
