//! Longest-prefix rewriting normalizer.
//!
//! Rewrites input according to a precompiled string-to-string rule trie
//! and produces, along with the normalized text, a byte-aligned map back
//! to the original input.

use core::fmt::Debug;

use std::collections::BTreeMap;

use crate::trie::DoubleArray;
use crate::unicode::WS_BYTES;
use crate::{Error, NormalizerSpec, Result, utf8};

/// Maximum number of shared-prefix matches a rule set may produce.
const MAX_TRIE_RESULTS: usize = 32;

const REPLACEMENT_BYTES: &[u8] = &[0xEF, 0xBF, 0xBD];

/// Compiled normalization rules: a double-array trie over source
/// sequences whose values are byte offsets into a NUL-separated pool of
/// replacement strings.
#[derive(Clone, PartialEq, Default)]
pub struct CharsMap {
    trie: DoubleArray,
    pool: Vec<u8>,
}
impl Debug for CharsMap {
    #[inline(never)]
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        f.debug_struct("CharsMap")
            .field("trie", &self.trie)
            .field("pool", &format!("Vec({})", self.pool.len()))
            .finish()
    }
}
impl CharsMap {
    /// Decodes a rule blob: a 32-bit little-endian trie image length,
    /// the trie image, then the replacement pool.
    #[inline(never)]
    pub fn from_blob(data: &[u8]) -> Result<Self> {
        if data.len() < 4 {
            return Err(Error::internal("normalization rule blob is broken"));
        }
        let size = u32::from_le_bytes([data[0], data[1], data[2], data[3]]) as usize;
        if size % 4 != 0 || data.len() < 4 + size {
            return Err(Error::internal("normalization rule blob is broken"));
        }
        let units = data[4..4 + size]
            .chunks_exact(4)
            .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect::<Vec<_>>();
        Ok(Self {
            trie: DoubleArray::from_units(units),
            pool: data[4 + size..].to_vec(),
        })
    }

    /// Encodes the rules back into a blob.
    #[inline(never)]
    pub fn to_blob(&self) -> Vec<u8> {
        let units = self.trie.units();
        let mut blob = Vec::with_capacity(4 + units.len() * 4 + self.pool.len());
        blob.extend_from_slice(&((units.len() * 4) as u32).to_le_bytes());
        for &unit in units {
            blob.extend_from_slice(&unit.to_le_bytes());
        }
        blob.extend_from_slice(&self.pool);
        blob
    }

    /// Compiles a rule list into a charsmap. Later rules win on
    /// duplicate sources.
    #[inline(never)]
    pub fn compile(rules: &[(String, String)]) -> Result<Self> {
        if rules.is_empty() {
            return Err(Error::invalid_argument("normalization rules are empty"));
        }
        let mut sources = BTreeMap::new();
        for (source, target) in rules {
            if source.is_empty() {
                return Err(Error::invalid_argument("normalization rule source is empty"));
            }
            sources.insert(source.as_str(), target.as_str());
        }
        // Identical targets share one pool entry.
        let mut offsets = BTreeMap::new();
        let mut pool = Vec::new();
        for &target in sources.values() {
            offsets.entry(target).or_insert_with(|| {
                let offset = pool.len() as u32;
                pool.extend_from_slice(target.as_bytes());
                pool.push(0);
                offset
            });
        }
        let keys = sources.keys().map(|k| k.as_bytes()).collect::<Vec<_>>();
        let values = sources.values().map(|t| offsets[t]).collect::<Vec<_>>();
        let trie = DoubleArray::build(&keys, &values)?;
        for key in &keys {
            if trie.count_prefixes(key) >= MAX_TRIE_RESULTS {
                return Err(Error::invalid_argument(
                    "normalization rules contain too many shared prefixes",
                ));
            }
        }
        Ok(Self { trie, pool })
    }

    /// Parses the rule TSV format: source codepoints, a tab, target
    /// codepoints, written as space-separated `U+XXXX` or bare hex.
    #[inline(never)]
    pub fn parse_rule_tsv(tsv: &str) -> Result<Vec<(String, String)>> {
        let parse_codepoints = |field: &str| -> Result<String> {
            let mut out = String::new();
            for token in field.split_whitespace() {
                let hex = token.strip_prefix("U+").unwrap_or(token);
                let cp = u32::from_str_radix(hex, 16).map_err(|_| {
                    Error::invalid_argument(format!("invalid codepoint {token:?} in rule tsv"))
                })?;
                out.push(char::from_u32(cp).ok_or_else(|| {
                    Error::invalid_argument(format!("invalid codepoint {token:?} in rule tsv"))
                })?);
            }
            Ok(out)
        };
        let mut rules = Vec::new();
        for line in tsv.lines() {
            let line = line.trim_end_matches('\r');
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut fields = line.split('\t');
            let source = parse_codepoints(fields.next().unwrap_or(""))?;
            let target = parse_codepoints(fields.next().unwrap_or(""))?;
            if source.is_empty() {
                return Err(Error::invalid_argument("normalization rule source is empty"));
            }
            rules.push((source, target));
        }
        Ok(rules)
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.trie.is_empty()
    }

    /// Returns the replacement and consumed length for the longest rule
    /// matching a prefix of `input`.
    #[inline(never)]
    fn transform(&self, input: &[u8]) -> Option<(&[u8], usize)> {
        let (offset, length) = self.trie.longest_match(input, MAX_TRIE_RESULTS)?;
        let offset = offset as usize;
        if offset > self.pool.len() {
            return None;
        }
        let end = memchr::memchr(0, &self.pool[offset..]).map_or(self.pool.len(), |n| offset + n);
        Some((&self.pool[offset..end], length))
    }
}

/// Normalizer applying the charsmap as a deterministic longest-prefix
/// rewriter, with whitespace handling per the configured flags.
#[derive(Debug, Clone)]
pub struct Normalizer {
    charsmap: CharsMap,

    add_dummy_prefix:           bool,
    remove_extra_whitespaces:   bool,
    escape_whitespaces:         bool,
    treat_whitespace_as_suffix: bool,
}
impl Normalizer {
    /// Creates a normalizer from the given spec.
    ///
    /// The precompiled blob takes precedence; with an empty blob a
    /// non-empty `normalization_rule_tsv` is compiled, and otherwise the
    /// rule set is the identity.
    #[inline(never)]
    pub fn new(spec: &NormalizerSpec, treat_whitespace_as_suffix: bool) -> Result<Self> {
        let charsmap = if !spec.precompiled_charsmap.is_empty() {
            CharsMap::from_blob(&spec.precompiled_charsmap)?
        } else if !spec.normalization_rule_tsv.is_empty() {
            CharsMap::compile(&CharsMap::parse_rule_tsv(&spec.normalization_rule_tsv)?)?
        } else {
            log::debug!("precompiled charsmap is empty, using identity normalization");
            CharsMap::default()
        };
        Ok(Self {
            charsmap,
            add_dummy_prefix: spec.add_dummy_prefix,
            remove_extra_whitespaces: spec.remove_extra_whitespaces,
            escape_whitespaces: spec.escape_whitespaces,
            treat_whitespace_as_suffix,
        })
    }

    /// Normalizes `input`, returning the normalized text and the map
    /// `norm_to_orig` where entry `i` is the original byte index covering
    /// normalized byte `i`. The map has length `normalized.len() + 1`.
    #[inline(never)]
    pub fn normalize(&self, input: &str) -> Result<(String, Vec<usize>)> {
        let mut bytes = input.as_bytes();
        let mut consumed = 0usize;

        // Skip leading whitespace.
        if self.remove_extra_whitespaces {
            while !bytes.is_empty() {
                let (replacement, length) = self.normalize_prefix(bytes);
                if replacement != b" " {
                    break;
                }
                bytes = &bytes[length..];
                consumed += length;
            }
        }

        if bytes.is_empty() {
            return Ok((String::new(), Vec::from([consumed])));
        }

        let mut normalized = Vec::with_capacity(input.len() * 3);
        let mut norm_to_orig = Vec::with_capacity(input.len() * 3 + 1);

        if self.add_dummy_prefix && !self.treat_whitespace_as_suffix {
            self.emit_space(&mut normalized, &mut norm_to_orig, consumed);
        }

        let mut is_prev_space = self.remove_extra_whitespaces;
        while !bytes.is_empty() {
            let (replacement, length) = self.normalize_prefix(bytes);
            let mut replacement = replacement;
            // Drop heading spaces when the previous emission ended in one.
            while is_prev_space && replacement.first() == Some(&b' ') {
                replacement = &replacement[1..];
            }
            if !replacement.is_empty() {
                for &byte in replacement {
                    if self.escape_whitespaces && byte == b' ' {
                        normalized.extend_from_slice(WS_BYTES);
                        for _ in 0..WS_BYTES.len() {
                            norm_to_orig.push(consumed);
                        }
                    } else {
                        normalized.push(byte);
                        norm_to_orig.push(consumed);
                    }
                }
                is_prev_space = replacement.last() == Some(&b' ');
            }
            consumed += length;
            bytes = &bytes[length..];
            if !self.remove_extra_whitespaces {
                is_prev_space = false;
            }
        }

        // Trim trailing whitespace.
        if self.remove_extra_whitespaces {
            let space: &[u8] = if self.escape_whitespaces { WS_BYTES } else { b" " };
            while normalized.ends_with(space) {
                let length = normalized.len() - space.len();
                consumed = norm_to_orig[length];
                normalized.truncate(length);
                norm_to_orig.truncate(length);
            }
        }

        if self.add_dummy_prefix && self.treat_whitespace_as_suffix {
            self.emit_space(&mut normalized, &mut norm_to_orig, consumed);
        }

        norm_to_orig.push(consumed);
        if norm_to_orig.len() != normalized.len() + 1 {
            return Err(Error::internal("normalization alignment is inconsistent"));
        }
        let normalized = String::from_utf8(normalized)
            .map_err(|_| Error::internal("normalized text is not valid utf-8"))?;
        Ok((normalized, norm_to_orig))
    }

    #[inline(always)]
    fn emit_space(&self, normalized: &mut Vec<u8>, norm_to_orig: &mut Vec<usize>, consumed: usize) {
        if self.escape_whitespaces {
            normalized.extend_from_slice(WS_BYTES);
            for _ in 0..WS_BYTES.len() {
                norm_to_orig.push(consumed);
            }
        } else {
            normalized.push(b' ');
            norm_to_orig.push(consumed);
        }
    }

    /// Rewrites the longest matching rule at the head of `input`, or
    /// passes one codepoint through. Invalid UTF-8 becomes U+FFFD
    /// consuming exactly one byte.
    #[inline(never)]
    fn normalize_prefix<'a>(&'a self, input: &'a [u8]) -> (&'a [u8], usize) {
        debug_assert!(!input.is_empty());
        if let Some((replacement, length)) = self.charsmap.transform(input) {
            return (replacement, length);
        }
        let (c, length) = utf8::decode_char(input);
        if c == utf8::REPLACEMENT && length == 1 {
            (REPLACEMENT_BYTES, 1)
        } else {
            (&input[..length], length)
        }
    }
}

/// Longest-prefix matcher over a fixed set of strings, used for
/// user-defined symbols and for fencing pretokenizer splits.
#[derive(Debug, Clone, Default)]
pub struct PrefixMatcher {
    trie: DoubleArray,
}
impl PrefixMatcher {
    #[inline(never)]
    pub fn new(keys: &[&str]) -> Result<Self> {
        if keys.is_empty() {
            return Ok(Self::default());
        }
        let mut sorted = keys.iter().map(|k| k.as_bytes()).collect::<Vec<_>>();
        sorted.sort();
        sorted.dedup();
        let values = (0..sorted.len() as u32).collect::<Vec<_>>();
        Ok(Self {
            trie: DoubleArray::build(&sorted, &values)?,
        })
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.trie.is_empty()
    }

    /// Returns the byte length of the longest key matching a prefix of
    /// `bytes` and whether a key matched. Without a match the length is
    /// that of the first codepoint.
    #[inline(never)]
    pub fn prefix_match(&self, bytes: &[u8]) -> (usize, bool) {
        if let Some((_, length)) = self.trie.longest_match(bytes, usize::MAX) {
            return (length, true);
        }
        let (_, length) = utf8::decode_char(bytes);
        (length.max(1).min(bytes.len()), false)
    }

    /// Replaces every occurrence of a key in `text` with `replacement`.
    #[inline(never)]
    pub fn global_replace(&self, text: &str, replacement: &str) -> String {
        if self.is_empty() {
            return text.to_owned();
        }
        let bytes = text.as_bytes();
        let mut result = String::with_capacity(text.len());
        let mut position = 0;
        while position < bytes.len() {
            let (length, found) = self.prefix_match(&bytes[position..]);
            if found {
                result.push_str(replacement);
            } else {
                result.push_str(&text[position..position + length]);
            }
            position += length;
        }
        result
    }
}
