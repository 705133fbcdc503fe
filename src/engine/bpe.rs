//! BPE engine: replays learned merges over a linked symbol list.

use core::cmp::Ordering;
use core::ops::Range;

use dary_heap::QuaternaryHeap;

use crate::engine::{EncodeResult, ModelCore, Segmenter};
use crate::model::PieceType;
use crate::{Error, Result};

/// A candidate merge of two adjacent symbols. Ordered by score with the
/// leftmost pair winning ties.
#[derive(Debug, Clone, Copy, PartialEq)]
struct SymbolPair {
    left:  u32,
    right: u32,
    score: f32,
    size:  u32,
}
impl Eq for SymbolPair {}
impl PartialOrd for SymbolPair {
    #[inline(always)]
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for SymbolPair {
    #[inline(always)]
    fn cmp(&self, other: &Self) -> Ordering {
        self.score.total_cmp(&other.score).then_with(|| other.left.cmp(&self.left))
    }
}

#[derive(Debug, Clone, Copy)]
struct Symbol {
    start: usize,
    end:   usize,
    prev:  i32,
    next:  i32,
}
impl Symbol {
    #[inline(always)]
    fn is_empty(&self) -> bool {
        self.start == self.end
    }

    #[inline(always)]
    fn len(&self) -> usize {
        self.end - self.start
    }
}

/// BPE engine.
#[derive(Debug, Default)]
pub(crate) struct BpeEngine {}
impl BpeEngine {
    #[inline(never)]
    pub fn new(core: &ModelCore) -> Result<Self> {
        if core.trie().is_empty() {
            return Err(Error::invalid_argument("bpe model has no merge pieces"));
        }
        Ok(Self {})
    }

    /// Pushes the pair `(left, right)` onto the agenda when their
    /// concatenation is a Normal piece.
    #[inline(always)]
    fn maybe_add_pair(
        core: &ModelCore, fragment: &str, symbols: &[Symbol], agenda: &mut QuaternaryHeap<SymbolPair>,
        left: i32, right: i32,
    ) {
        if left == -1 || right == -1 {
            return;
        }
        let piece = &fragment[symbols[left as usize].start..symbols[right as usize].end];
        let Some(id) = core.trie().exact_match(piece.as_bytes()) else {
            return;
        };
        if core.piece_kind(id as usize) != PieceType::Normal {
            return;
        }
        agenda.push(SymbolPair {
            left:  left as u32,
            right: right as u32,
            score: core.get_score(id as usize),
            size:  piece.len() as u32,
        });
    }
}
impl Segmenter for BpeEngine {
    #[inline(never)]
    fn segment(
        &self, core: &ModelCore, normalized: &str, range: Range<usize>, out: &mut EncodeResult,
    ) -> Result<()> {
        let fragment = &normalized[range.clone()];
        if fragment.is_empty() {
            return Ok(());
        }

        // One symbol per codepoint, linked both ways.
        let mut symbols = Vec::with_capacity(fragment.chars().count());
        for (index, c) in fragment.char_indices() {
            let next = index + c.len_utf8();
            symbols.push(Symbol {
                start: index,
                end:   next,
                prev:  symbols.len() as i32 - 1,
                next:  if next == fragment.len() {
                    -1
                } else {
                    symbols.len() as i32 + 1
                },
            });
        }

        let mut agenda = QuaternaryHeap::new();
        for i in 1..symbols.len() {
            Self::maybe_add_pair(core, fragment, &symbols, &mut agenda, i as i32 - 1, i as i32);
        }

        while let Some(top) = agenda.pop() {
            let (left, right) = (top.left as usize, top.right as usize);
            // Stale entries are dropped by re-checking the span.
            if symbols[left].is_empty()
                || symbols[right].is_empty()
                || symbols[left].len() + symbols[right].len() != top.size as usize
            {
                continue;
            }
            symbols[left].end = symbols[right].end;
            symbols[left].next = symbols[right].next;
            if symbols[right].next >= 0 {
                let next = symbols[right].next as usize;
                symbols[next].prev = left as i32;
            }
            symbols[right].start = symbols[right].end;
            Self::maybe_add_pair(core, fragment, &symbols, &mut agenda, symbols[left].prev, left as i32);
            Self::maybe_add_pair(core, fragment, &symbols, &mut agenda, left as i32, symbols[left].next);
        }

        let mut index = 0i32;
        while index != -1 {
            let symbol = symbols[index as usize];
            core.emit_piece(normalized, range.start + symbol.start..range.start + symbol.end, out);
            index = symbol.next;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Engine;
    use crate::engine::testing::{encode_pieces, model_from_pieces};
    use crate::model::ModelType;

    /// Merge-ranked pieces: score is the negated table position, so
    /// earlier pieces merge first.
    fn bpe_core(pieces: &[&str]) -> ModelCore {
        let scored = pieces
            .iter()
            .enumerate()
            .map(|(i, &p)| (p, -((i + 3) as f32)))
            .collect::<Vec<_>>();
        ModelCore::new(model_from_pieces(ModelType::Bpe, &scored)).unwrap()
    }

    #[test]
    fn test_merge_order_follows_rank() {
        let core = bpe_core(&["ab", "ra", "abra", "a", "b", "r"]);
        let engine = Engine::new(&core).unwrap();
        assert_eq!(encode_pieces(&core, &engine, "abra"), vec!["abra"]);
        assert_eq!(encode_pieces(&core, &engine, "abrab"), vec!["abra", "b"]);
    }

    #[test]
    fn test_leftmost_tie_break() {
        // Both "ab" pairs have the same rank; the leftmost merges first.
        let core = bpe_core(&["ab", "a", "b"]);
        let engine = Engine::new(&core).unwrap();
        assert_eq!(encode_pieces(&core, &engine, "abab"), vec!["ab", "ab"]);
    }

    #[test]
    fn test_unknown_symbol() {
        let core = bpe_core(&["ab", "a", "b"]);
        let engine = Engine::new(&core).unwrap();
        let result = engine.encode(&core, "aXb").unwrap();
        let ids = result.iter().map(|&(_, id)| id).collect::<Vec<_>>();
        assert_eq!(ids[1], 0);
        assert_eq!(encode_pieces(&core, &engine, "aXb"), vec!["a", "X", "b"]);
    }

    #[test]
    fn test_encode_idempotent() {
        let core = bpe_core(&["he", "ll", "hell", "hello", "h", "e", "l", "o"]);
        let engine = Engine::new(&core).unwrap();
        let first = engine.encode(&core, "hellohello").unwrap();
        let second = engine.encode(&core, "hellohello").unwrap();
        assert_eq!(first, second);
        let pieces = encode_pieces(&core, &engine, "hellohello");
        assert_eq!(pieces.concat(), "hellohello");
    }
}
