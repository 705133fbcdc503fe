//! Processor facade: normalize, segment, post-process and detokenize.

use core::fmt::Debug;

use bstr::ByteSlice;
use rand::Rng;

use crate::engine::{EncodeResult, Engine, ModelCore};
use crate::model::{Model, PieceType};
use crate::normalizer::Normalizer;
use crate::unicode::WS_STR;
use crate::{Error, Result, unicode};

/// Extra encode/decode processing selected with a `:`-separated list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExtraOption {
    Reverse,
    Bos,
    Eos,
}

/// One encoded piece with its surface alignment to the original text.
#[derive(Clone, PartialEq)]
pub struct Span {
    /// The piece bytes from the normalized text (or the piece table for
    /// inserted control pieces).
    pub piece:   Vec<u8>,
    /// The vocabulary id.
    pub id:      i32,
    /// The original text covered by this piece.
    pub surface: String,
    /// Surface byte range in the original text.
    pub begin:   usize,
    pub end:     usize,
}
impl Debug for Span {
    #[inline(never)]
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        f.debug_struct("Span")
            .field("piece", &self.piece.as_bstr())
            .field("id", &self.id)
            .field("surface", &self.surface)
            .field("begin", &self.begin)
            .field("end", &self.end)
            .finish()
    }
}

/// The result of encoding one input.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Encoding {
    /// The original input text.
    pub text:  String,
    /// The encoded pieces in output order.
    pub spans: Vec<Span>,
    /// Path score for n-best and sampled encodings, zero otherwise.
    pub score: f32,
}
impl Encoding {
    /// The piece ids in output order.
    #[inline(always)]
    pub fn ids(&self) -> Vec<i32> {
        self.spans.iter().map(|s| s.id).collect()
    }

    /// The piece texts in output order, lossy for raw byte pieces.
    #[inline(always)]
    pub fn pieces(&self) -> Vec<String> {
        self.spans.iter().map(|s| String::from_utf8_lossy(&s.piece).into_owned()).collect()
    }
}

/// Processor orchestrating the normalizer and the segmentation engine.
///
/// Construction consumes a validated [`Model`]; a failed construction
/// leaves no half-initialized state behind. Encoding requires `&self`
/// but is not concurrency-safe per instance; the id and piece accessors
/// are pure reads.
#[derive(Debug)]
pub struct Processor {
    core:   ModelCore,
    engine: Engine,

    normalizer:   Normalizer,
    denormalizer: Option<Normalizer>,

    encode_options: Vec<ExtraOption>,
    decode_options: Vec<ExtraOption>,
}
impl Processor {
    /// Builds a processor from a model.
    #[inline(never)]
    pub fn from_model(model: Model) -> Result<Self> {
        let normalizer = Normalizer::new(
            &model.normalizer_spec,
            model.trainer_spec.treat_whitespace_as_suffix,
        )?;
        let denormalizer = match &model.denormalizer_spec {
            Some(spec) => Some(Normalizer::new(spec, false)?),
            None => None,
        };
        let core = ModelCore::new(model)?;
        let engine = Engine::new(&core)?;
        Ok(Self {
            core,
            engine,
            normalizer,
            denormalizer,
            encode_options: Vec::new(),
            decode_options: Vec::new(),
        })
    }

    /// Loads a processor from a serialized model record.
    #[inline(never)]
    pub fn from_file<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        Self::from_model(Model::from_file(path)?)
    }

    /// The model this processor was built from.
    #[inline(always)]
    pub fn model(&self) -> &Model {
        self.core.model()
    }

    /// Sets the `:`-separated extra options applied after encoding,
    /// a subset of `reverse`, `bos` and `eos`.
    #[inline(never)]
    pub fn set_encode_extra_options(&mut self, options: &str) -> Result<()> {
        self.encode_options = Self::parse_extra_options(options)?;
        Ok(())
    }

    /// Sets the `:`-separated extra options applied before decoding.
    #[inline(never)]
    pub fn set_decode_extra_options(&mut self, options: &str) -> Result<()> {
        self.decode_options = Self::parse_extra_options(options)?;
        Ok(())
    }

    #[inline(never)]
    fn parse_extra_options(options: &str) -> Result<Vec<ExtraOption>> {
        let mut parsed = Vec::new();
        for option in options.split(':') {
            match option {
                "" => {}
                "reverse" => parsed.push(ExtraOption::Reverse),
                "bos" => parsed.push(ExtraOption::Bos),
                "eos" => parsed.push(ExtraOption::Eos),
                other => {
                    return Err(Error::invalid_argument(format!(
                        "option {other:?} is not available"
                    )));
                }
            }
        }
        Ok(parsed)
    }

    /// Normalizes `input` with the model's rules.
    #[inline(always)]
    pub fn normalize(&self, input: &str) -> Result<String> {
        Ok(self.normalizer.normalize(input)?.0)
    }

    /// Encodes `input` into aligned piece spans.
    #[inline(never)]
    pub fn encode(&self, input: &str) -> Result<Encoding> {
        let (normalized, norm_to_orig) = self.normalizer.normalize(input)?;
        let result = self.engine.encode(&self.core, &normalized)?;
        self.build_encoding(input, &normalized, &norm_to_orig, result, 0.0)
    }

    /// Encodes `input` and returns only the ids.
    #[inline(always)]
    pub fn encode_ids(&self, input: &str) -> Result<Vec<i32>> {
        Ok(self.encode(input)?.ids())
    }

    /// Encodes `input` and returns only the piece texts.
    #[inline(always)]
    pub fn encode_pieces(&self, input: &str) -> Result<Vec<String>> {
        Ok(self.encode(input)?.pieces())
    }

    /// Returns the `n` best encodings in descending score order.
    /// Unigram only.
    #[inline(never)]
    pub fn nbest_encode(&self, input: &str, n: usize) -> Result<Vec<Encoding>> {
        let (normalized, norm_to_orig) = self.normalizer.normalize(input)?;
        let results = self.engine.nbest_encode(&self.core, &normalized, n)?;
        results
            .into_iter()
            .map(|(result, score)| {
                self.build_encoding(input, &normalized, &norm_to_orig, result, score)
            })
            .collect()
    }

    /// Samples one encoding.
    ///
    /// With `nbest_size > 1` the draw is a multinomial over the n-best
    /// list with weights `exp(alpha * score)`; with `nbest_size < 0` the
    /// sample is drawn from the full lattice distribution at temperature
    /// `alpha`. Unigram only.
    #[inline(never)]
    pub fn sample_encode<R: Rng>(
        &self, input: &str, nbest_size: i32, alpha: f32, rng: &mut R,
    ) -> Result<Encoding> {
        if nbest_size == 0 || nbest_size > 512 {
            return Err(Error::out_of_range(
                "nbest_size must be 0 < nbest_size <= 512 or nbest_size < 0",
            ));
        }
        let (normalized, norm_to_orig) = self.normalizer.normalize(input)?;
        if nbest_size == 1 {
            let result = self.engine.encode(&self.core, &normalized)?;
            return self.build_encoding(input, &normalized, &norm_to_orig, result, 0.0);
        }
        if nbest_size > 1 {
            let nbests = self.engine.nbest_encode(&self.core, &normalized, nbest_size as usize)?;
            if nbests.is_empty() {
                return Err(Error::internal("nbest_encode returned no results"));
            }
            let weights =
                nbests.iter().map(|(_, score)| ((alpha * score) as f64).exp()).collect::<Vec<_>>();
            let total: f64 = weights.iter().sum();
            let mut draw = rng.random::<f64>() * total;
            let mut index = nbests.len() - 1;
            for (i, weight) in weights.iter().enumerate() {
                draw -= weight;
                if draw <= 0.0 {
                    index = i;
                    break;
                }
            }
            let (result, score) = nbests.into_iter().nth(index).unwrap();
            return self.build_encoding(input, &normalized, &norm_to_orig, result, score);
        }
        let result = self.engine.sample_encode(&self.core, &normalized, alpha, rng)?;
        self.build_encoding(input, &normalized, &norm_to_orig, result, 0.0)
    }

    /// Samples up to `n` distinct encodings without replacement, for
    /// subword regularization. Unigram only.
    #[inline(never)]
    pub fn sample_encode_wor<R: Rng>(
        &self, input: &str, n: usize, theta: f32, rng: &mut R,
    ) -> Result<Vec<Encoding>> {
        let (normalized, norm_to_orig) = self.normalizer.normalize(input)?;
        let results = self.engine.sample_encode_wor(&self.core, &normalized, n, theta, rng)?;
        results
            .into_iter()
            .map(|(result, score)| {
                self.build_encoding(input, &normalized, &norm_to_orig, result, score)
            })
            .collect()
    }

    /// Materializes spans with surfaces and applies the encode extra
    /// options.
    #[inline(never)]
    fn build_encoding(
        &self, input: &str, normalized: &str, norm_to_orig: &[usize], result: EncodeResult,
        score: f32,
    ) -> Result<Encoding> {
        let mut spans: Vec<Span> = Vec::with_capacity(result.len());
        let mut consumed = 0usize;
        for (range, id) in result {
            if range.is_empty() {
                return Err(Error::internal("empty piece is not allowed"));
            }
            if range.start != consumed {
                return Err(Error::out_of_range("encode result does not tile the input"));
            }
            if self.is_control(id) {
                spans.push(Span {
                    piece:   self.core.id_to_piece(id as usize).as_bytes().to_vec(),
                    id,
                    surface: String::new(),
                    begin:   norm_to_orig[consumed],
                    end:     norm_to_orig[consumed],
                });
                continue;
            }
            if range.end >= norm_to_orig.len() {
                return Err(Error::out_of_range("consumed index is out of range"));
            }
            let orig_begin = norm_to_orig[range.start];
            let orig_end = norm_to_orig[range.end];
            if orig_begin > input.len() || orig_end > input.len() || orig_begin > orig_end {
                return Err(Error::out_of_range("original index is out of range"));
            }
            let surface = &input[orig_begin..orig_end];
            let is_unk = self.is_unknown(id);
            // Runs of unknown pieces with the same id merge into one
            // surface span.
            if is_unk && spans.last().is_some_and(|prev| prev.id == id && self.is_unknown(prev.id))
            {
                let prev = spans.last_mut().unwrap();
                prev.piece.extend_from_slice(normalized[range.clone()].as_bytes());
                prev.surface.push_str(surface);
                prev.end = orig_end;
            } else {
                spans.push(Span {
                    piece: normalized[range.clone()].as_bytes().to_vec(),
                    id,
                    surface: surface.to_string(),
                    begin: orig_begin,
                    end: orig_end,
                });
            }
            consumed = range.end;
        }
        if consumed != normalized.len() {
            return Err(Error::out_of_range("all normalized characters are not consumed"));
        }
        self.apply_extra_options(&self.encode_options, &mut spans);
        Ok(Encoding {
            text: input.to_string(),
            spans,
            score,
        })
    }

    #[inline(never)]
    fn apply_extra_options(&self, options: &[ExtraOption], spans: &mut Vec<Span>) {
        let spec = &self.core.model().trainer_spec;
        for option in options {
            match option {
                ExtraOption::Reverse => spans.reverse(),
                ExtraOption::Bos => {
                    spans.insert(0, Span {
                        piece:   spec.bos_piece.as_bytes().to_vec(),
                        id:      self.piece_to_id(&spec.bos_piece),
                        surface: String::new(),
                        begin:   0,
                        end:     0,
                    });
                }
                ExtraOption::Eos => {
                    spans.push(Span {
                        piece:   spec.eos_piece.as_bytes().to_vec(),
                        id:      self.piece_to_id(&spec.eos_piece),
                        surface: String::new(),
                        begin:   0,
                        end:     0,
                    });
                }
            }
        }
    }

    /// Entropy of the segmentation distribution of `input` at
    /// temperature `theta`. Unigram only.
    #[inline(never)]
    pub fn calculate_entropy(&self, input: &str, theta: f32) -> Result<f32> {
        let (normalized, _) = self.normalizer.normalize(input)?;
        self.engine.calculate_entropy(&self.core, &normalized, theta)
    }

    /// Decodes pieces back into text. Control pieces vanish, unknown
    /// pieces render as the configured unknown surface, byte pieces
    /// contribute raw bytes, and meta whitespace turns back into spaces.
    #[inline(never)]
    pub fn decode_pieces<S: AsRef<str>>(&self, pieces: &[S]) -> Result<String> {
        let entries = pieces
            .iter()
            .map(|piece| {
                let piece = piece.as_ref();
                (piece.to_string(), self.piece_to_id(piece))
            })
            .collect::<Vec<_>>();
        let bytes = self.decode_entries(entries)?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Decodes ids back into text.
    #[inline(never)]
    pub fn decode_ids(&self, ids: &[i32]) -> Result<String> {
        let bytes = self.decode_ids_to_bytes(ids)?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Decodes ids into raw bytes; exact for byte-fallback models whose
    /// output is not valid UTF-8.
    #[inline(never)]
    pub fn decode_ids_to_bytes(&self, ids: &[i32]) -> Result<Vec<u8>> {
        let mut entries = Vec::with_capacity(ids.len());
        for &id in ids {
            if id < 0 || id as usize >= self.piece_size() {
                return Err(Error::out_of_range(format!("invalid id {id}")));
            }
            entries.push((self.core.id_to_piece(id as usize).to_string(), id));
        }
        self.decode_entries(entries)
    }

    #[inline(never)]
    fn decode_entries(&self, mut entries: Vec<(String, i32)>) -> Result<Vec<u8>> {
        let spec = &self.core.model().trainer_spec;
        for option in &self.decode_options {
            match option {
                ExtraOption::Reverse => entries.reverse(),
                ExtraOption::Bos => {
                    entries.insert(0, (spec.bos_piece.clone(), self.piece_to_id(&spec.bos_piece)));
                }
                ExtraOption::Eos => {
                    entries.push((spec.eos_piece.clone(), self.piece_to_id(&spec.eos_piece)));
                }
            }
        }
        let mut text = Vec::new();
        for (piece, id) in entries {
            if id >= 0 && self.is_control(id) {
                continue;
            }
            if id >= 0 && self.is_byte(id) {
                if let Some(byte) = unicode::piece_to_byte(self.core.id_to_piece(id as usize)) {
                    text.push(byte);
                    continue;
                }
            }
            if id >= 0 && self.is_unknown(id) {
                if self.core.id_to_piece(id as usize) == piece {
                    text.extend_from_slice(spec.unk_surface.as_bytes());
                } else {
                    text.extend_from_slice(piece.as_bytes());
                }
                continue;
            }
            let mut piece = piece.as_str();
            if text.is_empty() {
                piece = piece.strip_prefix(WS_STR).unwrap_or(piece);
            }
            text.extend_from_slice(piece.replace(WS_STR, " ").as_bytes());
        }
        if let Some(denormalizer) = &self.denormalizer {
            let decoded = String::from_utf8_lossy(&text).into_owned();
            let (denormalized, _) = denormalizer.normalize(&decoded)?;
            return Ok(denormalized.into_bytes());
        }
        Ok(text)
    }

    #[inline(always)]
    pub fn piece_size(&self) -> usize {
        self.core.piece_size()
    }

    #[inline(always)]
    pub fn piece_to_id(&self, piece: &str) -> i32 {
        self.core.piece_to_id(piece)
    }

    #[inline(always)]
    pub fn id_to_piece(&self, id: i32) -> &str {
        self.core.id_to_piece(id as usize)
    }

    #[inline(always)]
    pub fn get_score(&self, id: i32) -> f32 {
        self.core.get_score(id as usize)
    }

    #[inline(always)]
    pub fn is_unknown(&self, id: i32) -> bool {
        self.core.piece_kind(id as usize) == PieceType::Unknown
    }

    #[inline(always)]
    pub fn is_control(&self, id: i32) -> bool {
        self.core.piece_kind(id as usize) == PieceType::Control
    }

    #[inline(always)]
    pub fn is_unused(&self, id: i32) -> bool {
        self.core.piece_kind(id as usize) == PieceType::Unused
    }

    #[inline(always)]
    pub fn is_byte(&self, id: i32) -> bool {
        self.core.piece_kind(id as usize) == PieceType::Byte
    }

    #[inline(always)]
    pub fn is_user_defined(&self, id: i32) -> bool {
        self.core.piece_kind(id as usize) == PieceType::UserDefined
    }

    #[inline(always)]
    pub fn unk_id(&self) -> i32 {
        self.core.unk_id()
    }

    #[inline(always)]
    pub fn bos_id(&self) -> i32 {
        self.core.model().trainer_spec.bos_id
    }

    #[inline(always)]
    pub fn eos_id(&self) -> i32 {
        self.core.model().trainer_spec.eos_id
    }

    #[inline(always)]
    pub fn pad_id(&self) -> i32 {
        self.core.model().trainer_spec.pad_id
    }
}
