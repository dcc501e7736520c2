//! Defensive recovery of `key=value` pairs from peer-written text.
//!
//! The peer occasionally concatenates updates without a separator
//! (`Shutdown=1Fileheader=0`), so keys are held to a strict identifier
//! grammar and values are cut at the next `key=` boundary. This is
//! deliberately stricter than the free-form names the variable store
//! accepts: the identifier rule is what makes boundary recovery possible.

use std::sync::OnceLock;

use regex::Regex;

const KEY_PATTERN: &str = "[A-Za-z_][A-Za-z0-9_]*";

fn key_boundary_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(&format!("{KEY_PATTERN}=")).expect("key boundary pattern is valid")
    })
}

fn full_key_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(&format!("^{KEY_PATTERN}$")).expect("key pattern is valid"))
}

/// True when `key` is a complete identifier-style key.
pub fn is_valid_key(key: &str) -> bool {
    full_key_regex().is_match(key)
}

/// Recovers ordered `(key, value)` pairs from one raw segment.
///
/// A segment with exactly one `=` and a fully valid key is split as a single
/// trusted pair. Anything else is re-scanned for `key=` boundaries: each
/// boundary opens a pair whose value runs to the next boundary or the end of
/// the segment. Text that yields no valid key produces no pairs; the caller
/// decides whether that is worth a warning.
pub fn split_pairs(segment: &str) -> Vec<(String, String)> {
    let segment = segment.trim();
    if segment.is_empty() {
        return Vec::new();
    }

    if segment.matches('=').count() == 1 {
        if let Some((key, value)) = segment.split_once('=') {
            let key = key.trim();
            if is_valid_key(key) {
                return vec![(key.to_string(), value.trim().to_string())];
            }
        }
    }

    let boundaries: Vec<regex::Match> = key_boundary_regex().find_iter(segment).collect();
    let mut pairs = Vec::with_capacity(boundaries.len());
    for (index, boundary) in boundaries.iter().enumerate() {
        let key = boundary.as_str().trim_end_matches('=');
        let value_end = boundaries
            .get(index + 1)
            .map(|next| next.start())
            .unwrap_or(segment.len());
        let value = segment[boundary.end()..value_end].trim();
        pairs.push((key.to_string(), value.to_string()));
    }
    pairs
}
