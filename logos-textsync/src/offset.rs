//! Offset conversion between buffers and shared texts.
//!
//! Buffers address text in UTF-8 bytes. Shared texts count UTF-16 code
//! units, which is what the CRDT's relative positions and change deltas
//! are measured in. Conversions walk the string, so they cost O(n).

/// Length of `s` in UTF-16 code units.
pub fn utf16_len(s: &str) -> u32 {
    s.chars().map(|c| c.len_utf16() as u32).sum()
}

/// Largest char boundary of `text` not after `byte`.
fn floor_boundary(text: &str, byte: usize) -> usize {
    let mut byte = byte.min(text.len());
    while !text.is_char_boundary(byte) {
        byte -= 1;
    }
    byte
}

/// Convert a byte offset into `text` to UTF-16 code units. Offsets past
/// the end clamp to the end; offsets inside a character round down.
pub fn byte_to_utf16(text: &str, byte: usize) -> u32 {
    utf16_len(&text[..floor_boundary(text, byte)])
}

/// Byte offset reached by walking `units` UTF-16 code units forward from
/// byte `from`. A count that ends inside a surrogate pair takes the whole
/// character. Stops at the end of `text`.
pub fn advance_utf16(text: &str, from: usize, units: u32) -> usize {
    let mut byte = floor_boundary(text, from);
    let mut remaining = units as usize;
    for c in text[byte..].chars() {
        if remaining == 0 {
            break;
        }
        remaining = remaining.saturating_sub(c.len_utf16());
        byte += c.len_utf8();
    }
    byte
}

/// Convert a UTF-16 offset into `text` to bytes.
pub fn utf16_to_byte(text: &str, units: u32) -> usize {
    advance_utf16(text, 0, units)
}
