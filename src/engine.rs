//! Segmentation engines mapping normalized text to piece sequences.

use core::fmt::Debug;
use core::ops::Range;

use hashbrown::HashMap;
use rand::Rng;

use crate::model::{Model, PieceType};
use crate::normalizer::PrefixMatcher;
use crate::trie::DoubleArray;
use crate::unicode;
use crate::{Error, Result};

mod bpe;
mod chars;
mod unigram;
mod word;

pub(crate) use bpe::*;
pub(crate) use chars::*;
pub(crate) use unigram::*;
pub(crate) use word::*;

/// Encoded pieces as `(byte range into the normalized text, id)` pairs.
/// The ranges tile the normalized text exactly.
pub type EncodeResult = Vec<(Range<usize>, i32)>;

/// Maximum size of the shared-prefix buffer for the piece trie.
const MAX_TRIE_RESULTS: usize = 1024;

/// Shared lookup state: the piece table with its tries and score
/// bounds. Immutable after construction and borrowed by every engine
/// operation.
pub(crate) struct ModelCore {
    model: Model,

    reserved: HashMap<String, i32>,
    trie:     DoubleArray,
    matcher:  PrefixMatcher,

    trie_results_size: usize,
    min_score:         f32,
    max_score:         f32,
    unk_id:            i32,
    byte_ids:          Option<Vec<i32>>,
}
impl Debug for ModelCore {
    #[inline(never)]
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        f.debug_struct("ModelCore")
            .field("pieces", &format!("Vec({})", self.model.pieces.len()))
            .field("reserved", &format!("HashMap({})", self.reserved.len()))
            .field("trie_results_size", &self.trie_results_size)
            .field("min_score", &self.min_score)
            .field("max_score", &self.max_score)
            .field("unk_id", &self.unk_id)
            .finish()
    }
}
impl ModelCore {
    #[inline(never)]
    pub fn new(model: Model) -> Result<Self> {
        model.validate()?;

        let mut reserved = HashMap::new();
        let mut trie_pieces = Vec::new();
        let mut user_defined = Vec::new();
        let mut min_score = f32::MAX;
        let mut max_score = f32::MIN;
        let mut unk_id = -1;
        for (id, piece) in model.pieces.iter().enumerate() {
            match piece.kind {
                PieceType::Normal | PieceType::UserDefined => {
                    trie_pieces.push((piece.piece.as_str(), id as u32));
                    if piece.kind == PieceType::UserDefined {
                        user_defined.push(piece.piece.as_str());
                    }
                }
                kind => {
                    if reserved.insert(piece.piece.clone(), id as i32).is_some() {
                        return Err(Error::invalid_argument(format!(
                            "piece {:?} is defined twice",
                            piece.piece
                        )));
                    }
                    if kind == PieceType::Unknown {
                        unk_id = id as i32;
                    }
                }
            }
            if piece.kind == PieceType::Normal {
                min_score = min_score.min(piece.score);
                max_score = max_score.max(piece.score);
            }
        }
        if min_score == f32::MAX {
            min_score = 0.0;
            max_score = 0.0;
        }

        trie_pieces.sort_by(|a, b| a.0.as_bytes().cmp(b.0.as_bytes()));
        let keys = trie_pieces.iter().map(|(k, _)| k.as_bytes()).collect::<Vec<_>>();
        let values = trie_pieces.iter().map(|&(_, v)| v).collect::<Vec<_>>();
        let trie = DoubleArray::build(&keys, &values)?;
        let mut trie_results_size = 0;
        for key in &keys {
            trie_results_size = trie_results_size.max(trie.count_prefixes(key));
        }
        let trie_results_size = trie_results_size.min(MAX_TRIE_RESULTS).max(1);

        let matcher = PrefixMatcher::new(&user_defined)?;

        let byte_ids = if model.trainer_spec.byte_fallback {
            let mut table = vec![-1i32; 256];
            for (id, piece) in model.pieces.iter().enumerate() {
                if piece.kind == PieceType::Byte {
                    if let Some(byte) = unicode::piece_to_byte(&piece.piece) {
                        table[byte as usize] = id as i32;
                    }
                }
            }
            if table.iter().any(|&id| id < 0) {
                return Err(Error::invalid_argument(
                    "byte_fallback requires all 256 byte pieces",
                ));
            }
            Some(table)
        } else {
            None
        };

        Ok(Self {
            model,
            reserved,
            trie,
            matcher,
            trie_results_size,
            min_score,
            max_score,
            unk_id,
            byte_ids,
        })
    }

    #[inline(always)]
    pub fn model(&self) -> &Model {
        &self.model
    }

    #[inline(always)]
    pub fn piece_size(&self) -> usize {
        self.model.pieces.len()
    }

    #[inline(always)]
    pub fn trie(&self) -> &DoubleArray {
        &self.trie
    }

    #[inline(always)]
    pub fn trie_results_size(&self) -> usize {
        self.trie_results_size
    }

    #[inline(always)]
    pub fn min_score(&self) -> f32 {
        self.min_score
    }

    #[inline(always)]
    pub fn max_score(&self) -> f32 {
        self.max_score
    }

    #[inline(always)]
    pub fn unk_id(&self) -> i32 {
        self.unk_id
    }

    #[inline(always)]
    pub fn byte_id(&self, byte: u8) -> Option<i32> {
        self.byte_ids.as_ref().map(|table| table[byte as usize])
    }

    #[inline(always)]
    pub fn byte_fallback(&self) -> bool {
        self.byte_ids.is_some()
    }

    /// Looks up the id of a piece, reserved pieces first, then the
    /// Normal and UserDefined trie; absent pieces map to the unknown id.
    #[inline(never)]
    pub fn piece_to_id(&self, piece: &str) -> i32 {
        if let Some(&id) = self.reserved.get(piece) {
            return id;
        }
        match self.trie.exact_match(piece.as_bytes()) {
            Some(id) => id as i32,
            None => self.unk_id,
        }
    }

    #[inline(always)]
    pub fn id_to_piece(&self, id: usize) -> &str {
        &self.model.pieces[id].piece
    }

    #[inline(always)]
    pub fn get_score(&self, id: usize) -> f32 {
        self.model.pieces[id].score
    }

    #[inline(always)]
    pub fn piece_kind(&self, id: usize) -> PieceType {
        self.model.pieces[id].kind
    }

    /// Splits `normalized` into fragments: user-defined symbols become
    /// atomic `(range, Some(id))` entries, everything between them is
    /// `(range, None)`.
    #[inline(never)]
    pub fn split_user_defined(&self, normalized: &str) -> Vec<(Range<usize>, Option<i32>)> {
        if self.matcher.is_empty() {
            return Vec::from([(0..normalized.len(), None)]);
        }
        let bytes = normalized.as_bytes();
        let mut fragments = Vec::new();
        let mut position = 0;
        let mut pending = 0;
        while position < bytes.len() {
            let (length, found) = self.matcher.prefix_match(&bytes[position..]);
            if found {
                if pending < position {
                    fragments.push((pending..position, None));
                }
                let id = self.piece_to_id(&normalized[position..position + length]);
                fragments.push((position..position + length, Some(id)));
                pending = position + length;
            }
            position += length;
        }
        if pending < bytes.len() {
            fragments.push((pending..bytes.len(), None));
        }
        fragments
    }

    /// Emits one symbol, falling back to byte pieces or the unknown id
    /// when the piece is absent from the vocabulary.
    #[inline(never)]
    pub(crate) fn emit_piece(&self, normalized: &str, range: Range<usize>, out: &mut EncodeResult) {
        let id = self.piece_to_id(&normalized[range.clone()]);
        if id != self.unk_id || !self.byte_fallback() {
            out.push((range, id));
            return;
        }
        for offset in range.clone() {
            let byte = normalized.as_bytes()[offset];
            let id = self.byte_id(byte).unwrap_or(self.unk_id);
            out.push((offset..offset + 1, id));
        }
    }
}

/// One segmentation variant working over a regular fragment.
pub(crate) trait Segmenter {
    fn segment(
        &self, core: &ModelCore, normalized: &str, range: Range<usize>, out: &mut EncodeResult,
    ) -> Result<()>;
}

/// The four segmentation variants.
#[derive(Debug)]
pub(crate) enum Engine {
    Unigram(UnigramEngine),
    Bpe(BpeEngine),
    Word(WordEngine),
    Char(CharEngine),
}
impl Engine {
    #[inline(never)]
    pub fn new(core: &ModelCore) -> Result<Self> {
        use crate::model::ModelType;
        match core.model().trainer_spec.model_type {
            ModelType::Unigram => Ok(Self::Unigram(UnigramEngine::new(core)?)),
            ModelType::Bpe => Ok(Self::Bpe(BpeEngine::new(core)?)),
            ModelType::Word => Ok(Self::Word(WordEngine::new())),
            ModelType::Char => Ok(Self::Char(CharEngine::new())),
        }
    }

    /// Runs `segment` over every regular fragment of `normalized` and
    /// splices user-defined symbols in between as atomic pieces.
    ///
    /// Returns the accumulated fragment scores plus the stored scores of
    /// the spliced user-defined pieces; callers that only segment ignore
    /// the total.
    #[inline(never)]
    pub fn segment_fragments<F>(
        core: &ModelCore, normalized: &str, out: &mut EncodeResult, mut segment: F,
    ) -> Result<f32>
    where
        F: FnMut(Range<usize>, &mut EncodeResult) -> Result<f32>,
    {
        let mut score = 0.0f32;
        for (range, user_defined) in core.split_user_defined(normalized) {
            if let Some(id) = user_defined {
                score += core.get_score(id as usize);
                out.push((range, id));
            } else {
                score += segment(range, out)?;
            }
        }
        Ok(score)
    }

    /// Encodes normalized text into pieces. The concatenation of the
    /// returned ranges reproduces the input exactly.
    #[inline(never)]
    pub fn encode(&self, core: &ModelCore, normalized: &str) -> Result<EncodeResult> {
        let mut result = Vec::with_capacity(normalized.len() / 2 + 1);
        if normalized.is_empty() {
            return Ok(result);
        }
        // The word splitter handles whole words; the other variants see
        // user-defined symbols as atomic fragments.
        if let Self::Word(engine) = self {
            engine.segment(core, normalized, 0..normalized.len(), &mut result)?;
            return Ok(result);
        }
        Self::segment_fragments(core, normalized, &mut result, |range, out| {
            match self {
                Self::Unigram(engine) => engine.segment(core, normalized, range, out)?,
                Self::Bpe(engine) => engine.segment(core, normalized, range, out)?,
                Self::Char(engine) => engine.segment(core, normalized, range, out)?,
                Self::Word(_) => unreachable!(),
            }
            Ok(0.0)
        })?;
        Ok(result)
    }

    /// Enumerates the `n` best segmentations. Only the unigram engine
    /// supports this.
    #[inline(never)]
    pub fn nbest_encode(
        &self, core: &ModelCore, normalized: &str, n: usize,
    ) -> Result<Vec<(EncodeResult, f32)>> {
        match self {
            Self::Unigram(engine) => engine.nbest(core, normalized, n),
            _ => Err(Error::unimplemented("nbest_encode is only available for the unigram model")),
        }
    }

    /// Samples one segmentation from the lattice distribution at
    /// temperature `theta`. Only the unigram engine supports this.
    #[inline(never)]
    pub fn sample_encode<R: Rng>(
        &self, core: &ModelCore, normalized: &str, theta: f32, rng: &mut R,
    ) -> Result<EncodeResult> {
        match self {
            Self::Unigram(engine) => engine.sample(core, normalized, theta, rng),
            _ => Err(Error::unimplemented("sample_encode is only available for the unigram model")),
        }
    }

    /// Entropy of the segmentation distribution at temperature `theta`.
    /// Only the unigram engine supports this.
    #[inline(never)]
    pub fn calculate_entropy(&self, core: &ModelCore, normalized: &str, theta: f32) -> Result<f32> {
        match self {
            Self::Unigram(engine) => engine.entropy(core, normalized, theta),
            _ => Err(Error::unimplemented(
                "calculate_entropy is only available for the unigram model",
            )),
        }
    }

    /// Samples up to `n` distinct segmentations without replacement.
    #[inline(never)]
    pub fn sample_encode_wor<R: Rng>(
        &self, core: &ModelCore, normalized: &str, n: usize, theta: f32, rng: &mut R,
    ) -> Result<Vec<(EncodeResult, f32)>> {
        match self {
            Self::Unigram(engine) => engine.sample_wor(core, normalized, n, theta, rng),
            _ => Err(Error::unimplemented(
                "sample_encode_wor is only available for the unigram model",
            )),
        }
    }
}
