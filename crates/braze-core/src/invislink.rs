//! Invisible-link metadata codec.
//!
//! Structured metadata rides inside a message without consuming visible
//! text: each payload is base64-encoded into the URL of an `<a>` element
//! whose anchor text is a zero-width space. Two reserved URL prefixes keep
//! the payload kinds apart — [`BTN_PREFIX`] carries a keyboard prefix table
//! (see [`crate::keyboard`]), [`META_PREFIX`] carries a flat string map.
//!
//! The decode side scans a message's markup entities; any link that does not
//! match a reserved prefix is ignored, and malformed payloads resolve to
//! `None` rather than an error.

use std::collections::BTreeMap;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;

use crate::model::MessageEntity;

/// Reserved URL prefix for keyboard prefix tables.
pub const BTN_PREFIX: &str = "tg://btn/";

/// Reserved URL prefix for context metadata.
pub const META_PREFIX: &str = "tg://meta/";

/// Zero-width space; the anchor text of every hidden link.
const INVISIBLE: char = '\u{200b}';

/// Encodes a scalar payload into the link-safe alphabet.
pub fn encode_text(data: &str) -> String {
    URL_SAFE_NO_PAD.encode(data.as_bytes())
}

/// Decodes a scalar payload; `None` on any malformed input.
pub fn decode_text(text: &str) -> Option<String> {
    if !text.is_ascii() {
        return None;
    }
    let bytes = URL_SAFE_NO_PAD
        .decode(text.trim_end_matches('=').as_bytes())
        .ok()?;
    String::from_utf8(bytes).ok()
}

/// Encodes a list of strings as a NUL-joined scalar.
pub fn encode_list<S: AsRef<str>>(data: &[S]) -> String {
    let joined = data
        .iter()
        .map(AsRef::as_ref)
        .collect::<Vec<_>>()
        .join("\0");
    encode_text(&joined)
}

/// Decodes a NUL-joined list; `None` when the payload is malformed or empty.
pub fn decode_list(text: &str) -> Option<Vec<String>> {
    let decoded = decode_text(text)?;
    if decoded.is_empty() {
        return None;
    }
    Some(decoded.split('\0').map(str::to_owned).collect())
}

/// Encodes a string map as a flattened `key,value,key,value` list.
pub fn encode_dict(data: &BTreeMap<String, String>) -> String {
    let mut flat = Vec::with_capacity(data.len() * 2);
    for (k, v) in data {
        flat.push(k.as_str());
        flat.push(v.as_str());
    }
    encode_list(&flat)
}

/// Decodes a flattened string map; `None` when the payload is malformed.
pub fn decode_dict(text: &str) -> Option<BTreeMap<String, String>> {
    let flat = decode_list(text)?;
    Some(
        flat.chunks_exact(2)
            .map(|pair| (pair[0].clone(), pair[1].clone()))
            .collect(),
    )
}

/// Hides a keyboard prefix table and/or a metadata map inside an HTML
/// fragment of invisible links.
///
/// Components that are absent or empty produce no link; the fragment is
/// empty when there is nothing to carry.
pub fn encode(btn: Option<&[String]>, meta: Option<&BTreeMap<String, String>>) -> String {
    let mut text = String::new();
    if let Some(prefixes) = btn
        && !prefixes.is_empty()
    {
        text.push_str(&format!(
            "<a href=\"{BTN_PREFIX}{}\">{INVISIBLE}</a>",
            encode_list(prefixes)
        ));
    }
    if let Some(map) = meta
        && !map.is_empty()
    {
        text.push_str(&format!(
            "<a href=\"{META_PREFIX}{}\">{INVISIBLE}</a>",
            encode_dict(map)
        ));
    }
    text
}

/// Extracts metadata hidden inside a message's markup entities.
///
/// Scans `text_link` entities in order, keeping the first match of each
/// reserved kind and stopping once both are found. Every other link is
/// ignored.
pub fn decode(
    entities: &[MessageEntity],
) -> (Option<Vec<String>>, Option<BTreeMap<String, String>>) {
    let mut btn = None;
    let mut meta = None;

    for entity in entities {
        if entity.kind != "text_link" {
            continue;
        }
        let Some(url) = entity.url.as_deref() else {
            continue;
        };
        if let Some(payload) = url.strip_prefix(BTN_PREFIX) {
            if btn.is_none() {
                btn = decode_list(payload);
            }
        } else if let Some(payload) = url.strip_prefix(META_PREFIX)
            && meta.is_none()
        {
            meta = decode_dict(payload);
        }
        if btn.is_some() && meta.is_some() {
            break;
        }
    }

    (btn, meta)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn link(url: &str) -> MessageEntity {
        MessageEntity {
            kind: "text_link".into(),
            url: Some(url.into()),
            ..Default::default()
        }
    }

    #[test]
    fn list_round_trip() {
        let data = vec!["alpha".to_owned(), "with\nnewline".to_owned(), "".to_owned()];
        assert_eq!(decode_list(&encode_list(&data)), Some(data));
    }

    #[test]
    fn dict_round_trip() {
        let map: BTreeMap<String, String> = [("k".to_owned(), "v".to_owned()),
            ("other".to_owned(), "value two".to_owned())]
        .into();
        assert_eq!(decode_dict(&encode_dict(&map)), Some(map));
    }

    #[test]
    fn decode_list_rejects_garbage() {
        assert_eq!(decode_list("!!"), None);
        assert_eq!(decode_list(""), None);
    }

    #[test]
    fn encode_skips_empty_components() {
        assert_eq!(encode(None, None), "");
        assert_eq!(encode(Some(&[]), Some(&BTreeMap::new())), "");
    }

    #[test]
    fn entity_scan_finds_both_kinds() {
        let prefixes = vec!["/long command ".to_owned()];
        let meta: BTreeMap<String, String> = [("origin".to_owned(), "42".to_owned())].into();
        let fragment = encode(Some(&prefixes), Some(&meta));
        // Rebuild the entities a client would report for that fragment.
        let urls: Vec<String> = fragment
            .split("href=\"")
            .skip(1)
            .map(|part| part.split('"').next().unwrap().to_owned())
            .collect();
        let entities: Vec<MessageEntity> = urls.iter().map(|u| link(u)).collect();

        let (btn, decoded_meta) = decode(&entities);
        assert_eq!(btn, Some(prefixes));
        assert_eq!(decoded_meta, Some(meta));
    }

    #[test]
    fn entity_scan_prefers_first_match_and_ignores_others() {
        let entities = vec![
            link("https://example.com/not-ours"),
            link(&format!("{BTN_PREFIX}{}", encode_list(&["first"]))),
            link(&format!("{BTN_PREFIX}{}", encode_list(&["second"]))),
            MessageEntity {
                kind: "bold".into(),
                ..Default::default()
            },
        ];
        let (btn, meta) = decode(&entities);
        assert_eq!(btn, Some(vec!["first".to_owned()]));
        assert_eq!(meta, None);
    }

    #[test]
    fn malformed_payload_resolves_to_none() {
        let entities = vec![link(&format!("{META_PREFIX}@@not base64@@"))];
        assert_eq!(decode(&entities), (None, None));
    }
}
