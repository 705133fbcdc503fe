//! Unigram engine: Viterbi decoding over the segmentation lattice, with
//! n-best enumeration and sampling.

use core::cell::RefCell;
use core::ops::Range;

use hashbrown::HashSet;
use rand::Rng;

use crate::engine::{EncodeResult, Engine, ModelCore, Segmenter};
use crate::lattice::Lattice;
use crate::model::PieceType;
use crate::{Error, Result};

/// Penalty below the minimum score used for unknown fallback nodes.
const UNK_PENALTY: f32 = 10.0;

/// Unigram engine. Owns the lattice arena, which makes encoding
/// single-threaded per instance by design.
#[derive(Debug, Default)]
pub(crate) struct UnigramEngine {
    lattice: RefCell<Lattice>,
}
impl UnigramEngine {
    #[inline(never)]
    pub fn new(core: &ModelCore) -> Result<Self> {
        if core.trie().is_empty() {
            return Err(Error::invalid_argument("unigram model has no scored pieces"));
        }
        Ok(Self::default())
    }

    /// Inserts every piece matching at every position, with a one-
    /// codepoint unknown fallback wherever no single-codepoint piece
    /// matches, so EOS is always reachable.
    #[inline(never)]
    pub(crate) fn populate_nodes(core: &ModelCore, lattice: &mut Lattice, unk_id: i32) {
        let sentence = lattice.sentence().to_owned();
        let len = lattice.size();
        let unk_score = core.min_score() - UNK_PENALTY;
        let mut matches = Vec::with_capacity(core.trie_results_size() + 1);
        for pos in 0..len {
            let begin = lattice.byte_offset(pos);
            let tail = &sentence.as_bytes()[begin..];
            matches.clear();
            core.trie().common_prefix_search(tail, &mut matches, core.trie_results_size());
            let mut has_single = false;
            for &(id, byte_len) in &matches {
                let char_len = sentence[begin..begin + byte_len].chars().count();
                // User-defined symbols take the maximum score so they
                // win over any competing split.
                let score = if core.piece_kind(id as usize) == PieceType::UserDefined {
                    core.max_score()
                } else {
                    core.get_score(id as usize)
                };
                lattice.insert(pos, char_len, id as i32, score);
                if char_len == 1 {
                    has_single = true;
                }
            }
            if !has_single {
                lattice.insert(pos, 1, unk_id, unk_score);
            }
        }
    }

    #[inline(never)]
    fn decode(
        core: &ModelCore, lattice: &Lattice, path: &[crate::lattice::NodeId], offset: usize,
        out: &mut EncodeResult,
    ) {
        for ranged in lattice.path_to_ranges(path) {
            let (range, id) = ranged;
            let range = range.start + offset..range.end + offset;
            if id == core.unk_id() && core.byte_fallback() {
                for position in range {
                    let byte = lattice.sentence().as_bytes()[position - offset];
                    let byte_id = core.byte_id(byte).unwrap_or(core.unk_id());
                    out.push((position..position + 1, byte_id));
                }
            } else {
                out.push((range, id));
            }
        }
    }

    /// Enumerates the `n` best paths through one regular fragment.
    #[inline(never)]
    fn nbest_fragment(
        &self, core: &ModelCore, normalized: &str, range: Range<usize>, n: usize,
    ) -> Result<Vec<(EncodeResult, f32)>> {
        let fragment = &normalized[range.clone()];
        let mut lattice = self.lattice.borrow_mut();
        lattice.set_sentence(fragment);
        Self::populate_nodes(core, &mut lattice, core.unk_id());
        let paths = lattice.nbest(n);
        let mut results = Vec::with_capacity(paths.len());
        for (path, score) in paths {
            let mut out = Vec::with_capacity(path.len());
            Self::decode(core, &lattice, &path, range.start, &mut out);
            results.push((out, score));
        }
        Ok(results)
    }

    /// Samples one path through one regular fragment and returns its
    /// score.
    #[inline(never)]
    fn sample_fragment<R: Rng>(
        &self, core: &ModelCore, normalized: &str, range: Range<usize>, theta: f32, rng: &mut R,
        out: &mut EncodeResult,
    ) -> Result<f32> {
        let fragment = &normalized[range.clone()];
        if fragment.is_empty() {
            return Ok(0.0);
        }
        let mut lattice = self.lattice.borrow_mut();
        lattice.set_sentence(fragment);
        Self::populate_nodes(core, &mut lattice, core.unk_id());
        let path = lattice.sample(theta, rng);
        let score = path.iter().map(|&id| lattice.node(id).score).sum();
        Self::decode(core, &lattice, &path, range.start, out);
        Ok(score)
    }

    /// Enumerates the `n` best segmentations.
    ///
    /// User-defined symbols are atomic fragments, so the hypotheses are
    /// the per-fragment n-best lists combined by total score; a
    /// combination using a path below rank `n` in any fragment is
    /// dominated, which keeps the combination exact.
    #[inline(never)]
    pub fn nbest(
        &self, core: &ModelCore, normalized: &str, n: usize,
    ) -> Result<Vec<(EncodeResult, f32)>> {
        if normalized.is_empty() || n == 0 {
            return Ok(Vec::new());
        }
        let mut results: Vec<(EncodeResult, f32)> = Vec::from([(Vec::new(), 0.0)]);
        for (range, user_defined) in core.split_user_defined(normalized) {
            if let Some(id) = user_defined {
                let score = core.get_score(id as usize);
                for (result, total) in results.iter_mut() {
                    result.push((range.clone(), id));
                    *total += score;
                }
                continue;
            }
            let fragment_results = self.nbest_fragment(core, normalized, range, n)?;
            let mut combined = Vec::with_capacity(results.len() * fragment_results.len());
            for (prefix, prefix_score) in &results {
                for (suffix, suffix_score) in &fragment_results {
                    let mut result = prefix.clone();
                    result.extend(suffix.iter().cloned());
                    combined.push((result, prefix_score + suffix_score));
                }
            }
            combined.sort_by(|a, b| b.1.total_cmp(&a.1));
            combined.truncate(n);
            results = combined;
        }
        Ok(results)
    }

    /// Samples one segmentation at temperature `theta`, fragment by
    /// fragment with user-defined symbols kept atomic.
    #[inline(never)]
    pub fn sample<R: Rng>(
        &self, core: &ModelCore, normalized: &str, theta: f32, rng: &mut R,
    ) -> Result<EncodeResult> {
        let mut out = Vec::new();
        if normalized.is_empty() {
            return Ok(out);
        }
        Engine::segment_fragments(core, normalized, &mut out, |range, out| {
            self.sample_fragment(core, normalized, range, theta, rng, out)
        })?;
        Ok(out)
    }

    /// Entropy of the segmentation distribution at temperature `theta`.
    /// Fragments are independent, so their entropies add; atomic
    /// user-defined symbols contribute nothing.
    #[inline(never)]
    pub fn entropy(&self, core: &ModelCore, normalized: &str, theta: f32) -> Result<f32> {
        if normalized.is_empty() {
            return Ok(0.0);
        }
        let mut total = 0.0f32;
        for (range, user_defined) in core.split_user_defined(normalized) {
            if user_defined.is_some() {
                continue;
            }
            let fragment = &normalized[range];
            let mut lattice = self.lattice.borrow_mut();
            lattice.set_sentence(fragment);
            Self::populate_nodes(core, &mut lattice, core.unk_id());
            total += lattice.calculate_entropy(theta);
        }
        Ok(total)
    }

    /// Samples up to `n` distinct segmentations without replacement by
    /// repeated fragment-wise draws.
    #[inline(never)]
    pub fn sample_wor<R: Rng>(
        &self, core: &ModelCore, normalized: &str, n: usize, theta: f32, rng: &mut R,
    ) -> Result<Vec<(EncodeResult, f32)>> {
        if normalized.is_empty() || n == 0 {
            return Ok(Vec::new());
        }
        let mut seen = HashSet::new();
        let mut results: Vec<(EncodeResult, f32)> = Vec::new();
        let attempts = 10 * n + 100;
        for _ in 0..attempts {
            let mut out = Vec::new();
            let score = Engine::segment_fragments(core, normalized, &mut out, |range, out| {
                self.sample_fragment(core, normalized, range, theta, rng, out)
            })?;
            if out.is_empty() {
                break;
            }
            let key = out.iter().map(|(range, id)| (range.start, range.end, *id)).collect::<Vec<_>>();
            if seen.insert(key) {
                results.push((out, score));
                if results.len() == n {
                    break;
                }
            }
        }
        results.sort_by(|a, b| b.1.total_cmp(&a.1));
        Ok(results)
    }
}
impl Segmenter for UnigramEngine {
    #[inline(never)]
    fn segment(
        &self, core: &ModelCore, normalized: &str, range: Range<usize>, out: &mut EncodeResult,
    ) -> Result<()> {
        let fragment = &normalized[range.clone()];
        if fragment.is_empty() {
            return Ok(());
        }
        let mut lattice = self.lattice.borrow_mut();
        lattice.set_sentence(fragment);
        Self::populate_nodes(core, &mut lattice, core.unk_id());
        let (path, _) = lattice.viterbi();
        Self::decode(core, &lattice, &path, range.start, out);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Engine;
    use crate::engine::testing::{encode_pieces, model_from_pieces};
    use crate::model::{ModelType, Piece, PieceType};
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn toy_core() -> ModelCore {
        // Matches the classic toy model: ids 3.. are a, b, c, ab, ▁.
        let model = model_from_pieces(ModelType::Unigram, &[
            ("a", 0.0),
            ("b", 0.3),
            ("c", 0.2),
            ("ab", 1.0),
            ("▁", 3.0),
        ]);
        ModelCore::new(model).unwrap()
    }

    #[test]
    fn test_viterbi_segmentation() {
        let core = toy_core();
        let engine = Engine::new(&core).unwrap();
        let result = engine.encode(&core, "▁abc").unwrap();
        let ids = result.iter().map(|&(_, id)| id).collect::<Vec<_>>();
        assert_eq!(ids, vec![7, 6, 5]);
        assert_eq!(encode_pieces(&core, &engine, "▁abc"), vec!["▁", "ab", "c"]);
    }

    #[test]
    fn test_unknown_fallback_keeps_coverage() {
        let core = toy_core();
        let engine = Engine::new(&core).unwrap();
        let result = engine.encode(&core, "aXc").unwrap();
        let pieces = result.iter().map(|(r, _)| &"aXc"[r.clone()]).collect::<Vec<_>>();
        assert_eq!(pieces, vec!["a", "X", "c"]);
        assert_eq!(result[1].1, 0);
    }

    #[test]
    fn test_nbest_descending() {
        let core = toy_core();
        let engine = Engine::new(&core).unwrap();
        let results = engine.nbest_encode(&core, "ab", 10).unwrap();
        // "ab" and "a b" are the only paths.
        assert_eq!(results.len(), 2);
        assert!(results[0].1 >= results[1].1);
        assert_eq!(results[0].0.len(), 1);
    }

    fn user_defined_core() -> ModelCore {
        let mut model = model_from_pieces(ModelType::Unigram, &[
            ("a", 0.0),
            ("b", 0.3),
            ("ab", 1.0),
        ]);
        model.pieces.push(Piece {
            piece: "aa".to_string(),
            score: 0.0,
            kind:  PieceType::UserDefined,
        });
        model.trainer_spec.vocab_size += 1;
        ModelCore::new(model).unwrap()
    }

    #[test]
    fn test_user_defined_is_atomic() {
        let core = user_defined_core();
        let engine = Engine::new(&core).unwrap();
        let result = engine.encode(&core, "aab").unwrap();
        let pieces = result.iter().map(|(r, _)| &"aab"[r.clone()]).collect::<Vec<_>>();
        assert_eq!(pieces, vec!["aa", "b"]);
    }

    #[test]
    fn test_user_defined_is_atomic_in_nbest() {
        let core = user_defined_core();
        let engine = Engine::new(&core).unwrap();
        let aa = core.piece_to_id("aa");
        // "aabab" splits into the atomic "aa" and the fragment "bab";
        // every hypothesis keeps the symbol whole.
        let results = engine.nbest_encode(&core, "aabab", 10).unwrap();
        assert_eq!(results.len(), 2);
        assert!(results[0].1 >= results[1].1);
        for (result, _) in &results {
            assert_eq!(result[0], (0..2, aa));
            assert!(result.iter().all(|(range, _)| range.start >= 2 || range.end <= 2));
        }
        let pieces = results[0]
            .0
            .iter()
            .map(|(range, _)| &"aabab"[range.clone()])
            .collect::<Vec<_>>();
        assert_eq!(pieces, vec!["aa", "b", "ab"]);
    }

    #[test]
    fn test_user_defined_is_atomic_in_sampling() {
        let core = user_defined_core();
        let engine = Engine::new(&core).unwrap();
        let aa = core.piece_to_id("aa");
        let mut rng = StdRng::seed_from_u64(11);
        for _ in 0..50 {
            let result = engine.sample_encode(&core, "aabab", 1.0, &mut rng).unwrap();
            assert_eq!(result[0], (0..2, aa));
            let covered = result
                .iter()
                .flat_map(|(range, _)| range.clone())
                .collect::<Vec<_>>();
            assert_eq!(covered, (0..5).collect::<Vec<_>>());
        }
        let samples = engine.sample_encode_wor(&core, "aabab", 2, 1.0, &mut rng).unwrap();
        assert_eq!(samples.len(), 2);
        for (result, _) in &samples {
            assert_eq!(result[0], (0..2, aa));
        }
    }

    #[test]
    fn test_user_defined_is_atomic_in_entropy() {
        let core = user_defined_core();
        let engine = Engine::new(&core).unwrap();
        // A lone user-defined symbol has a single segmentation.
        assert_eq!(engine.calculate_entropy(&core, "aa", 1.0).unwrap(), 0.0);
        // The entropy of "aabab" is all in the "bab" fragment.
        let fenced = engine.calculate_entropy(&core, "aabab", 1.0).unwrap();
        let fragment = engine.calculate_entropy(&core, "bab", 1.0).unwrap();
        assert!((fenced - fragment).abs() < 1e-5);
        assert!(fenced > 0.0);
    }
}
