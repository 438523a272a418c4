//! Keyboard button payload shortening.
//!
//! Button callback payloads have a hard size limit on the wire. When a batch
//! of outgoing buttons exceeds it, the payloads are rewritten to
//! `\0<prefix-index>\0<suffix>` against a small table of shared prefixes,
//! and the table itself is hidden in the message via
//! [`crate::invislink::BTN_PREFIX`]. An incoming short code is resolved back
//! to the original payload with [`combine`] once the table has been
//! recovered from the original message's entities.
//!
//! Payloads already within the limit are deliberately left untouched even
//! though packing them too would shrink the table: an unmodified button
//! keeps working if the hidden table is ever stripped from the message.

use std::collections::HashMap;

use crate::model::InlineKeyboard;

/// The wire's callback payload size limit, in bytes.
pub const MAX_CALLBACK_DATA: usize = 64;

/// Generates a list of shared prefixes and a map of long payload → encoded
/// payload.
///
/// Lines are processed longest first so that prefixes minted from the
/// longest lines get reused by the shorter ones. A freshly minted prefix is
/// sized so the encoded remainder is exactly `max_len` bytes (backing off to
/// the nearest char boundary for multi-byte text), which leaves the longest
/// possible suffix available as a prefix candidate for other lines.
pub fn shorten_lines<S: AsRef<str>>(
    lines: &[S],
    max_len: usize,
) -> (Vec<String>, HashMap<String, String>) {
    let mut sorted: Vec<&str> = lines.iter().map(AsRef::as_ref).collect();
    sorted.sort_by_key(|line| std::cmp::Reverse(line.len()));

    let mut prefixes: Vec<String> = Vec::new();
    let mut mapping = HashMap::new();

    for line in sorted {
        if line.len() <= max_len {
            break;
        }
        let index = match prefixes.iter().position(|p| line.starts_with(p.as_str())) {
            Some(index) => index,
            None => {
                let index = prefixes.len();
                let code_len = encode_code(index, "").len();
                // Suffix budget after the \0<index>\0 code; the split backs
                // off upward so the suffix never straddles a char boundary.
                let budget = max_len.saturating_sub(code_len);
                let split = ceil_char_boundary(line, line.len().saturating_sub(budget));
                prefixes.push(line[..split].to_owned());
                index
            }
        };
        let suffix = &line[prefixes[index].len()..];
        mapping.insert(line.to_owned(), encode_code(index, suffix));
    }

    (prefixes, mapping)
}

/// Rewrites any over-length callback payloads in `keyboard` in place.
///
/// Returns `None` without mutating anything when every payload already fits,
/// otherwise the prefix table to hide in the outgoing message.
pub fn fix(keyboard: &mut InlineKeyboard, max_len: usize) -> Option<Vec<String>> {
    let broken: Vec<String> = keyboard
        .iter()
        .flatten()
        .filter_map(|button| button.callback_data.clone())
        .filter(|data| data.len() > max_len)
        .collect();
    if broken.is_empty() {
        return None;
    }

    let (prefixes, mapping) = shorten_lines(&broken, max_len);
    for button in keyboard.iter_mut().flatten() {
        if let Some(data) = &button.callback_data
            && let Some(short) = mapping.get(data)
        {
            button.callback_data = Some(short.clone());
        }
    }
    Some(prefixes)
}

/// Resolves a possibly-shortened payload against a prefix table.
///
/// Anything that does not parse as `\0<digits>\0<rest>`, including a parsed
/// index that is out of range for `prefixes`, comes back unchanged —
/// intentionally permissive, never an error.
pub fn combine(prefixes: &[String], text: &str) -> String {
    let Some((index, rest)) = decode_code(text) else {
        return text.to_owned();
    };
    match prefixes.get(index) {
        Some(prefix) => format!("{prefix}{rest}"),
        None => text.to_owned(),
    }
}

fn encode_code(index: usize, suffix: &str) -> String {
    format!("\0{index}\0{suffix}")
}

fn decode_code(text: &str) -> Option<(usize, &str)> {
    let rest = text.strip_prefix('\0')?;
    let (digits, suffix) = rest.split_once('\0')?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some((digits.parse().ok()?, suffix))
}

fn ceil_char_boundary(text: &str, mut index: usize) -> usize {
    while index < text.len() && !text.is_char_boundary(index) {
        index += 1;
    }
    index.min(text.len())
}
