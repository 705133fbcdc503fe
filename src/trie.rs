//! Static double-array trie with all-prefix and exact-match lookups.
//!
//! Units use the darts-clone encoding, so a trie image can be embedded
//! verbatim inside a normalization rule blob: a unit is either a node
//! (label in the low byte, terminal flag in bit 8, relative offset in
//! bits 9..31) or a value (bit 31 set, value in the low 31 bits). A
//! node's child base is `position ^ offset`, and the child for label `c`
//! lives at `base ^ c`; the terminal value occupies `base` itself.

use core::fmt::Debug;

use crate::{Error, Result};

pub(crate) trait UnitExt {
    fn value(&self) -> u32;
    fn label(&self) -> usize;
    fn offset(&self) -> usize;
    fn has_leaf(&self) -> bool;
}
impl UnitExt for u32 {
    #[inline(always)]
    fn value(&self) -> u32 {
        self & ((1 << 31) - 1)
    }

    #[inline(always)]
    fn label(&self) -> usize {
        let s = *self as usize;
        s & ((1 << 31) | 0xFF)
    }

    #[inline(always)]
    fn offset(&self) -> usize {
        let s = *self as usize;
        (s >> 10) << ((s & (1 << 9)) >> 6)
    }

    #[inline(always)]
    fn has_leaf(&self) -> bool {
        (*self >> 8) & 1 == 1
    }
}

const TERMINAL_FLAG: u32 = 1 << 31;
const HAS_LEAF_FLAG: u32 = 1 << 8;

/// Static double-array trie over NUL-free byte keys.
#[derive(Clone, PartialEq, Eq, Default)]
pub struct DoubleArray {
    units: Vec<u32>,
}
impl Debug for DoubleArray {
    #[inline(never)]
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        f.debug_struct("DoubleArray")
            .field("units", &format!("Vec({})", self.units.len()))
            .finish()
    }
}
impl DoubleArray {
    /// Builds a trie from sorted keys and their values.
    ///
    /// Keys must be non-empty, NUL-free, unique and sorted in ascending
    /// byte order; values must fit in 31 bits. Violations are reported
    /// as invalid-argument errors.
    #[inline(never)]
    pub fn build(keys: &[&[u8]], values: &[u32]) -> Result<Self> {
        if keys.len() != values.len() {
            return Err(Error::invalid_argument("trie keys and values differ in length"));
        }
        if keys.is_empty() {
            return Ok(Self::default());
        }
        for (i, key) in keys.iter().enumerate() {
            if key.is_empty() {
                return Err(Error::invalid_argument("trie keys must not be empty"));
            }
            if key.contains(&0) {
                return Err(Error::invalid_argument("trie keys must not contain NUL"));
            }
            if i > 0 && keys[i - 1] >= *key {
                return Err(Error::invalid_argument("trie keys must be unique and sorted"));
            }
            if values[i] >= TERMINAL_FLAG {
                return Err(Error::invalid_argument("trie values must fit in 31 bits"));
            }
        }
        let mut builder = Builder {
            units:        Vec::new(),
            used:         Vec::new(),
            search_start: 1,
        };
        builder.ensure(512);
        builder.used[0] = true;
        let mut stack = Vec::from([Range {
            lo:    0,
            hi:    keys.len(),
            depth: 0,
            pos:   0,
        }]);
        let mut labels = Vec::with_capacity(257);
        while let Some(node) = stack.pop() {
            labels.clear();
            let mut groups = Vec::new();
            let mut idx = node.lo;
            let mut terminal = None;
            if keys[idx].len() == node.depth {
                terminal = Some(values[idx]);
                labels.push(0u8);
                idx += 1;
            }
            while idx < node.hi {
                let c = keys[idx][node.depth];
                let start = idx;
                while idx < node.hi && keys[idx][node.depth] == c {
                    idx += 1;
                }
                labels.push(c);
                groups.push((c, start, idx));
            }
            let base = builder.find_base(node.pos, &labels)?;
            let rel = base ^ node.pos;
            builder.units[node.pos] |=
                encode_offset(rel)? | if terminal.is_some() { HAS_LEAF_FLAG } else { 0 };
            if let Some(value) = terminal {
                builder.units[base] = TERMINAL_FLAG | value;
                builder.used[base] = true;
            }
            for &(c, lo, hi) in &groups {
                let slot = base ^ c as usize;
                builder.units[slot] = c as u32;
                builder.used[slot] = true;
                stack.push(Range {
                    lo,
                    hi,
                    depth: node.depth + 1,
                    pos: slot,
                });
            }
        }
        Ok(Self {
            units: builder.units,
        })
    }

    /// Reconstructs a trie from a raw unit image.
    #[inline(always)]
    pub fn from_units(units: Vec<u32>) -> Self {
        Self { units }
    }

    /// Returns the raw unit image.
    #[inline(always)]
    pub fn units(&self) -> &[u32] {
        &self.units
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Finds all keys that are prefixes of `key`, appending up to `cap`
    /// `(value, length)` pairs to `results` in ascending length order.
    #[inline(always)]
    pub fn common_prefix_search(&self, key: &[u8], results: &mut Vec<(u32, usize)>, cap: usize) {
        DoubleArray::search_prefixes(&self.units, key, results, cap);
    }

    #[inline(never)]
    #[cfg_attr(
        feature = "multiversion",
        multiversion::multiversion(targets(
            "x86_64/x86-64-v4",
            "x86_64/x86-64-v3",
            "x86_64/x86-64-v2",
            "aarch64+neon",
        ))
    )]
    fn search_prefixes(units: &[u32], key: &[u8], results: &mut Vec<(u32, usize)>, cap: usize) {
        let Some(&root) = units.first() else {
            return;
        };
        let mut pos = root.offset();
        for (i, &c) in key.iter().enumerate() {
            if c == 0 {
                break;
            }
            let next = pos ^ c as usize;
            let Some(&unit) = units.get(next) else {
                break;
            };
            if unit.label() != c as usize {
                break;
            }
            pos = next ^ unit.offset();
            if unit.has_leaf() {
                if results.len() >= cap {
                    break;
                }
                if let Some(&value) = units.get(pos) {
                    results.push((value.value(), i + 1));
                }
            }
        }
    }

    /// Returns the longest key that is a prefix of `key` as a
    /// `(value, length)` pair, inspecting at most `cap` matches.
    #[inline(never)]
    pub fn longest_match(&self, key: &[u8], cap: usize) -> Option<(u32, usize)> {
        let Some(&root) = self.units.first() else {
            return None;
        };
        let mut longest = None;
        let mut found = 0;
        let mut pos = root.offset();
        for (i, &c) in key.iter().enumerate() {
            if c == 0 {
                break;
            }
            let next = pos ^ c as usize;
            let Some(&unit) = self.units.get(next) else {
                break;
            };
            if unit.label() != c as usize {
                break;
            }
            pos = next ^ unit.offset();
            if unit.has_leaf() {
                if found >= cap {
                    break;
                }
                found += 1;
                if let Some(&value) = self.units.get(pos) {
                    longest = Some((value.value(), i + 1));
                }
            }
        }
        longest
    }

    /// Returns the value stored for exactly `key`.
    #[inline(never)]
    pub fn exact_match(&self, key: &[u8]) -> Option<u32> {
        if key.is_empty() {
            return None;
        }
        let mut unit = *self.units.first()?;
        let mut pos = unit.offset();
        for &c in key {
            if c == 0 {
                return None;
            }
            let next = pos ^ c as usize;
            unit = *self.units.get(next)?;
            if unit.label() != c as usize {
                return None;
            }
            pos = next ^ unit.offset();
        }
        if unit.has_leaf() {
            self.units.get(pos).map(|u| u.value())
        } else {
            None
        }
    }

    /// Returns the number of keys that are prefixes of `key`.
    #[inline(never)]
    pub fn count_prefixes(&self, key: &[u8]) -> usize {
        let mut results = Vec::new();
        self.common_prefix_search(key, &mut results, usize::MAX);
        results.len()
    }
}

struct Range {
    lo:    usize,
    hi:    usize,
    depth: usize,
    pos:   usize,
}

struct Builder {
    units:        Vec<u32>,
    used:         Vec<bool>,
    search_start: usize,
}
impl Builder {
    #[inline(always)]
    fn ensure(&mut self, size: usize) {
        if self.units.len() < size {
            self.units.resize(size, 0);
            self.used.resize(size, false);
        }
    }

    /// Finds a child base so that every label slot is unoccupied and the
    /// relative offset is encodable.
    #[inline(never)]
    fn find_base(&mut self, pos: usize, labels: &[u8]) -> Result<usize> {
        debug_assert!(!labels.is_empty());
        while self.search_start < self.used.len() && self.used[self.search_start] {
            self.search_start += 1;
        }
        let first = labels[0] as usize;
        let mut slot = self.search_start.max(1);
        loop {
            let base = slot ^ first;
            self.ensure(base + 257);
            let rel = base ^ pos;
            let fits = rel < (1 << 21) || (rel & 0xFF == 0 && rel < (1 << 29));
            if fits && !labels.iter().any(|&c| self.used[base ^ c as usize]) {
                return Ok(base);
            }
            slot += 1;
            if slot >= (1 << 29) {
                return Err(Error::internal("double-array trie is full"));
            }
        }
    }
}

#[inline(always)]
fn encode_offset(rel: usize) -> Result<u32> {
    if rel < (1 << 21) {
        Ok((rel as u32) << 10)
    } else if rel & 0xFF == 0 && rel < (1 << 29) {
        Ok((((rel >> 8) as u32) << 10) | (1 << 9))
    } else {
        Err(Error::internal("double-array trie offset out of range"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build(keys: &[&str]) -> DoubleArray {
        let mut sorted = keys.iter().map(|k| k.as_bytes()).collect::<Vec<_>>();
        sorted.sort();
        let values = (0..sorted.len() as u32).collect::<Vec<_>>();
        DoubleArray::build(&sorted, &values).unwrap()
    }

    #[test]
    fn test_exact_match() {
        let keys = ["a", "ab", "abc", "b", "ba", "xyz"];
        let trie = build(&keys);
        let mut sorted = keys.to_vec();
        sorted.sort();
        for (i, key) in sorted.iter().enumerate() {
            assert_eq!(trie.exact_match(key.as_bytes()), Some(i as u32), "{key}");
        }
        assert_eq!(trie.exact_match(b"abcd"), None);
        assert_eq!(trie.exact_match(b"c"), None);
        assert_eq!(trie.exact_match(b""), None);
    }

    #[test]
    fn test_common_prefix_search() {
        let trie = build(&["a", "ab", "abc", "b", "ba", "xyz"]);
        let mut results = Vec::new();
        trie.common_prefix_search(b"abcd", &mut results, 32);
        // a < ab < abc in ascending length order.
        assert_eq!(results, vec![(0, 1), (1, 2), (2, 3)]);

        results.clear();
        trie.common_prefix_search(b"abcd", &mut results, 2);
        assert_eq!(results.len(), 2);

        results.clear();
        trie.common_prefix_search(b"zzz", &mut results, 32);
        assert!(results.is_empty());
    }

    #[test]
    fn test_multibyte_keys() {
        let keys = ["▁", "▁グ", "グ", "株式会社"];
        let trie = build(&keys);
        let mut sorted = keys.to_vec();
        sorted.sort();
        let mut results = Vec::new();
        trie.common_prefix_search("▁グーグル".as_bytes(), &mut results, 32);
        let matched = results
            .iter()
            .map(|&(v, _)| sorted[v as usize])
            .collect::<Vec<_>>();
        assert_eq!(matched, vec!["▁", "▁グ"]);
    }

    #[test]
    fn test_build_rejects_bad_keys() {
        assert!(DoubleArray::build(&[b"b".as_slice(), b"a".as_slice()], &[0, 1]).is_err());
        assert!(DoubleArray::build(&[b"a".as_slice(), b"a".as_slice()], &[0, 1]).is_err());
        assert!(DoubleArray::build(&[b"".as_slice()], &[0]).is_err());
        assert!(DoubleArray::build(&[b"a\0b".as_slice()], &[0]).is_err());
    }

    #[test]
    fn test_image_round_trip() {
        let trie = build(&["ab", "abc", "b"]);
        let image = trie.units().to_vec();
        let restored = DoubleArray::from_units(image);
        assert_eq!(restored.exact_match(b"abc"), trie.exact_match(b"abc"));
        assert_eq!(restored.exact_match(b"ab"), trie.exact_match(b"ab"));
    }

    #[test]
    fn test_dense_keys() {
        // Every two-byte combination over a small alphabet.
        let alphabet = ["a", "b", "c", "d", "e", "f", "g", "h"];
        let mut keys = Vec::new();
        for x in alphabet {
            keys.push(x.to_string());
            for y in alphabet {
                keys.push(format!("{x}{y}"));
            }
        }
        keys.sort();
        let key_refs = keys.iter().map(|k| k.as_bytes()).collect::<Vec<_>>();
        let values = (0..keys.len() as u32).collect::<Vec<_>>();
        let trie = DoubleArray::build(&key_refs, &values).unwrap();
        for (i, key) in keys.iter().enumerate() {
            assert_eq!(trie.exact_match(key.as_bytes()), Some(i as u32));
        }
        assert_eq!(trie.count_prefixes(b"abc"), 2);
    }
}
