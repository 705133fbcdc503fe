//! Unicode helpers: meta codepoints, script classification, word
//! splitting and the byte-fallback piece table.

use once_cell::sync::Lazy;
use unicode_script::{Script, UnicodeScript};

/// Meta whitespace U+2581, the internal encoding of an ASCII space.
pub const WS_CHAR: char = '\u{2581}';
/// UTF-8 bytes of [`WS_CHAR`].
pub const WS_BYTES: &[u8] = "\u{2581}".as_bytes();
/// UTF-8 string of [`WS_CHAR`].
pub const WS_STR: &str = "\u{2581}";

/// Sentinel U+2585 replacing codepoints outside the character coverage.
pub const UNK_CHAR: char = '\u{2585}';
/// UTF-8 string of [`UNK_CHAR`].
pub const UNK_STR: &str = "\u{2585}";

/// Pretokenization boundary marker; must not appear inside any piece.
pub const BOUNDARY_CHAR: char = '\u{0009}';
/// UTF-8 string of [`BOUNDARY_CHAR`].
pub const BOUNDARY_STR: &str = "\u{0009}";

/// Default surface emitted for unknown pieces when decoding.
pub const DEFAULT_UNK_SURFACE: &str = " \u{2047} ";

static BYTE_PIECES: Lazy<Vec<String>> =
    Lazy::new(|| (0u16..256).map(|b| format!("<0x{b:02X}>")).collect());

/// Returns the piece text representing a single byte, e.g. `<0x41>`.
#[inline(always)]
pub fn byte_to_piece(byte: u8) -> &'static str {
    &BYTE_PIECES[byte as usize]
}

/// Parses a byte piece of the form `<0xXX>` back into its byte.
#[inline(never)]
pub fn piece_to_byte(piece: &str) -> Option<u8> {
    let hex = piece.strip_prefix("<0x")?.strip_suffix('>')?;
    if hex.len() != 2 {
        return None;
    }
    u8::from_str_radix(hex, 16).ok()
}

/// Returns whether `c` is a decimal digit (ASCII or fullwidth).
#[inline(always)]
pub fn is_decimal_number(c: char) -> bool {
    c.is_ascii_digit() || ('\u{FF10}'..='\u{FF19}').contains(&c)
}

/// Returns the Unicode script of `c` with the segmentation merges
/// applied: Hiragana, Katakana and the long vowel mark U+30FC all count
/// as Han.
#[inline(never)]
pub fn merged_script(c: char) -> Script {
    let script = c.script();
    if script == Script::Hiragana || script == Script::Katakana || c == '\u{30FC}' {
        Script::Han
    } else {
        script
    }
}

/// Splits `text` at meta whitespace boundaries.
///
/// In prefix mode each word keeps its leading whitespace marker; with
/// `treat_whitespace_as_suffix` the marker stays attached to the
/// preceding word instead. With `allow_whitespace_only_pieces` runs of
/// whitespace markers stay together.
#[inline(never)]
pub fn split_into_words(
    text: &str, treat_whitespace_as_suffix: bool, allow_whitespace_only_pieces: bool,
) -> Vec<&str> {
    let mut result = Vec::new();
    let mut start = 0;
    if treat_whitespace_as_suffix {
        let mut prev_ws = false;
        for (index, c) in text.char_indices() {
            if prev_ws && !(allow_whitespace_only_pieces && c == WS_CHAR) {
                result.push(&text[start..index]);
                start = index;
            }
            prev_ws = c == WS_CHAR;
        }
        if start < text.len() {
            result.push(&text[start..]);
        }
    } else {
        let mut prev_ws = false;
        for (index, c) in text.char_indices() {
            let is_ws = c == WS_CHAR;
            let boundary = if allow_whitespace_only_pieces {
                is_ws != prev_ws
            } else {
                is_ws
            };
            if index > 0 && boundary {
                result.push(&text[start..index]);
                start = index;
            }
            prev_ws = is_ws;
        }
        if !text.is_empty() {
            result.push(&text[start..]);
        }
    }
    result
}
