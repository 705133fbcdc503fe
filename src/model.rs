//! Model container: the trained vocabulary together with the training
//! and normalization parameters it was produced with.

use core::fmt::{Debug, Display};

use bstr::ByteSlice;
use derive_more::{AsRef, Deref};
use hashbrown::HashSet;

use crate::{Error, Result};

/// Segmentation algorithm recorded in the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum ModelType {
    /// Viterbi-decoded unigram language model.
    #[default]
    Unigram = 1,
    /// Byte-pair-encoding merge machine.
    Bpe     = 2,
    /// Whole-word splitter.
    Word    = 3,
    /// Per-codepoint splitter.
    Char    = 4,
}
impl ModelType {
    #[inline(never)]
    pub(crate) fn from_wire(value: u64) -> Option<Self> {
        match value {
            1 => Some(Self::Unigram),
            2 => Some(Self::Bpe),
            3 => Some(Self::Word),
            4 => Some(Self::Char),
            _ => None,
        }
    }
}

/// Type of a piece in the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum PieceType {
    /// Regular piece learned from the corpus.
    #[default]
    Normal      = 1,
    /// The unknown placeholder; exactly one piece has this type.
    Unknown     = 2,
    /// Control symbol with no surface, like BOS and EOS.
    Control     = 3,
    /// User-defined symbol segmented as an atomic unit.
    UserDefined = 4,
    /// Piece disabled during training.
    Unused      = 5,
    /// Byte-fallback piece of the form `<0xXX>`.
    Byte        = 6,
}
impl PieceType {
    #[inline(never)]
    pub(crate) fn from_wire(value: u64) -> Option<Self> {
        match value {
            1 => Some(Self::Normal),
            2 => Some(Self::Unknown),
            3 => Some(Self::Control),
            4 => Some(Self::UserDefined),
            5 => Some(Self::Unused),
            6 => Some(Self::Byte),
            _ => None,
        }
    }
}

/// One entry of the piece table. The id of a piece is its index.
#[derive(Clone, PartialEq, Deref, AsRef)]
pub struct Piece {
    /// The piece text. Non-empty, structurally valid UTF-8.
    #[deref]
    #[as_ref]
    pub piece: String,
    /// Log probability for Unigram, negated merge rank for BPE, log
    /// frequency for Char. Zero for reserved pieces.
    pub score: f32,
    /// The piece type.
    pub kind:  PieceType,
}
impl Piece {
    #[inline(always)]
    pub fn normal(piece: impl Into<String>, score: f32) -> Self {
        Self {
            piece: piece.into(),
            score,
            kind: PieceType::Normal,
        }
    }

    #[inline(always)]
    pub fn reserved(piece: impl Into<String>, kind: PieceType) -> Self {
        Self {
            piece: piece.into(),
            score: 0.0,
            kind,
        }
    }
}
impl Display for Piece {
    #[inline(never)]
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        f.debug_tuple("Piece")
            .field(&self.piece.as_bytes().as_bstr())
            .field(&self.score)
            .field(&self.kind)
            .finish()
    }
}
impl Debug for Piece {
    #[inline(never)]
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        f.debug_struct("Piece")
            .field("piece", &self.piece.as_bytes().as_bstr())
            .field("score", &self.score)
            .field("kind", &self.kind)
            .finish()
    }
}

/// Training parameters, stored alongside the vocabulary.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainerSpec {
    /// Corpus paths this model was trained from. Informational; the core
    /// itself receives sentences through the API.
    pub input: Vec<String>,
    /// Corpus format, "text" (default) or "tsv" with `sentence\tfreq`.
    pub input_format: String,
    pub model_type: ModelType,
    /// Target vocabulary size including reserved pieces.
    pub vocab_size: i32,
    /// Fraction of corpus characters covered by single-codepoint pieces.
    pub character_coverage: f64,
    /// Maximum piece length in codepoints.
    pub max_piece_length: usize,
    pub num_sub_iterations: usize,
    pub num_threads: usize,
    pub shrinking_factor: f64,
    /// Sentences longer than this many bytes are skipped.
    pub max_sentence_length: usize,
    /// Cap on the number of training sentences; 0 keeps everything.
    pub input_sentence_size: u64,
    pub shuffle_input_sentence: bool,
    pub seed_piece_size: usize,
    pub self_test_sample_size: usize,
    pub split_by_unicode_script: bool,
    pub split_by_number: bool,
    pub split_by_whitespace: bool,
    pub split_digits: bool,
    pub treat_whitespace_as_suffix: bool,
    pub allow_whitespace_only_pieces: bool,
    pub hard_vocab_limit: bool,
    pub use_all_vocab: bool,
    pub byte_fallback: bool,
    /// Codepoints always kept regardless of coverage.
    pub required_chars: String,
    /// Marker fencing pretokenizer splits during training.
    pub pretokenization_delimiter: String,
    pub vocabulary_output_piece_score: bool,
    /// Reserved ids; -1 disables the piece.
    pub unk_id: i32,
    pub bos_id: i32,
    pub eos_id: i32,
    pub pad_id: i32,
    pub unk_piece: String,
    pub bos_piece: String,
    pub eos_piece: String,
    pub pad_piece: String,
    /// Surface emitted for unknown pieces when decoding.
    pub unk_surface: String,
    pub control_symbols: Vec<String>,
    pub user_defined_symbols: Vec<String>,
}
impl Default for TrainerSpec {
    fn default() -> Self {
        Self {
            input: Vec::new(),
            input_format: String::new(),
            model_type: ModelType::Unigram,
            vocab_size: 8000,
            character_coverage: 0.9995,
            max_piece_length: 16,
            num_sub_iterations: 2,
            num_threads: 16,
            shrinking_factor: 0.75,
            max_sentence_length: 4192,
            input_sentence_size: 0,
            shuffle_input_sentence: true,
            seed_piece_size: 1_000_000,
            self_test_sample_size: 0,
            split_by_unicode_script: true,
            split_by_number: true,
            split_by_whitespace: true,
            split_digits: false,
            treat_whitespace_as_suffix: false,
            allow_whitespace_only_pieces: false,
            hard_vocab_limit: true,
            use_all_vocab: false,
            byte_fallback: false,
            required_chars: String::new(),
            pretokenization_delimiter: String::new(),
            vocabulary_output_piece_score: true,
            unk_id: 0,
            bos_id: 1,
            eos_id: 2,
            pad_id: -1,
            unk_piece: "<unk>".to_string(),
            bos_piece: "<s>".to_string(),
            eos_piece: "</s>".to_string(),
            pad_piece: "<pad>".to_string(),
            unk_surface: crate::unicode::DEFAULT_UNK_SURFACE.to_string(),
            control_symbols: Vec::new(),
            user_defined_symbols: Vec::new(),
        }
    }
}
impl TrainerSpec {
    /// Validates the field ranges.
    #[inline(never)]
    pub fn verify(&self) -> Result<()> {
        if self.vocab_size <= 0 {
            return Err(Error::invalid_argument("vocab_size must be positive"));
        }
        if self.use_all_vocab
            && matches!(self.model_type, ModelType::Unigram | ModelType::Bpe)
        {
            return Err(Error::invalid_argument(
                "use_all_vocab is only valid for the word and char models",
            ));
        }
        macro_rules! check_range {
            ($field:ident, $min:expr, $max:expr) => {
                if self.$field < $min || self.$field > $max {
                    return Err(Error::invalid_argument(format!(
                        "{} must be in [{}, {}]",
                        stringify!($field),
                        $min,
                        $max
                    )));
                }
            };
        }
        check_range!(character_coverage, 0.98, 1.0);
        check_range!(max_piece_length, 1, 512);
        check_range!(num_sub_iterations, 1, 10);
        check_range!(num_threads, 1, 128);
        check_range!(shrinking_factor, 0.5, 0.95);
        check_range!(max_sentence_length, 10, 1 << 30);
        check_range!(self_test_sample_size, 0, 1000);
        if self.input_sentence_size != 0 && self.input_sentence_size <= 100 {
            return Err(Error::invalid_argument("input_sentence_size must be 0 or > 100"));
        }
        if self.unk_piece.is_empty()
            || self.bos_piece.is_empty()
            || self.eos_piece.is_empty()
            || self.pad_piece.is_empty()
        {
            return Err(Error::invalid_argument("reserved piece strings must not be empty"));
        }
        Ok(())
    }
}

/// Normalization parameters and the precompiled rule blob.
#[derive(Clone, PartialEq)]
pub struct NormalizerSpec {
    /// Name of the normalization rule set, e.g. "nmt_nfkc" or "identity".
    pub name: String,
    /// Compiled rule blob; empty means identity.
    pub precompiled_charsmap: Vec<u8>,
    pub add_dummy_prefix: bool,
    pub remove_extra_whitespaces: bool,
    pub escape_whitespaces: bool,
    /// Source rules in TSV form; compiled into the blob at training time.
    pub normalization_rule_tsv: String,
}
impl Default for NormalizerSpec {
    fn default() -> Self {
        Self {
            name: "nmt_nfkc".to_string(),
            precompiled_charsmap: Vec::new(),
            add_dummy_prefix: true,
            remove_extra_whitespaces: true,
            escape_whitespaces: true,
            normalization_rule_tsv: String::new(),
        }
    }
}
impl NormalizerSpec {
    /// Returns the identity rule set with the default flags.
    #[inline(always)]
    pub fn identity() -> Self {
        Self {
            name: "identity".to_string(),
            ..Self::default()
        }
    }
}
impl Debug for NormalizerSpec {
    #[inline(never)]
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        f.debug_struct("NormalizerSpec")
            .field("name", &self.name)
            .field("precompiled_charsmap", &format!("Vec({})", self.precompiled_charsmap.len()))
            .field("add_dummy_prefix", &self.add_dummy_prefix)
            .field("remove_extra_whitespaces", &self.remove_extra_whitespaces)
            .field("escape_whitespaces", &self.escape_whitespaces)
            .field("normalization_rule_tsv", &self.normalization_rule_tsv)
            .finish()
    }
}

/// One self-test sample stored in the model.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SelfTestSample {
    pub input:    String,
    /// Expected pieces joined with single spaces.
    pub expected: String,
}

/// Self-test data embedded in the artifact.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SelfTestData {
    pub samples: Vec<SelfTestSample>,
}

/// The model artifact: vocabulary, scores and the specs that built it.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Model {
    pub trainer_spec:      TrainerSpec,
    pub normalizer_spec:   NormalizerSpec,
    pub pieces:            Vec<Piece>,
    /// Optional decode-time normalizer.
    pub denormalizer_spec: Option<NormalizerSpec>,
    pub self_test_data:    Option<SelfTestData>,
}
impl Model {
    /// Validates the piece table invariants.
    ///
    /// Every piece must be non-empty valid UTF-8, the table must contain
    /// exactly one Unknown piece and no duplicates, and the configured
    /// reserved ids must be in range.
    #[inline(never)]
    pub fn validate(&self) -> Result<()> {
        if self.pieces.is_empty() {
            return Err(Error::invalid_argument("model contains no pieces"));
        }
        let mut unknown = 0usize;
        let mut seen = HashSet::with_capacity(self.pieces.len());
        for (id, piece) in self.pieces.iter().enumerate() {
            if piece.piece.is_empty() {
                return Err(Error::invalid_argument(format!(
                    "piece {id} is empty"
                )));
            }
            if !seen.insert(piece.piece.as_str()) {
                return Err(Error::invalid_argument(format!(
                    "piece {:?} is defined twice",
                    piece.piece
                )));
            }
            if piece.kind == PieceType::Unknown {
                unknown += 1;
            }
        }
        if unknown != 1 {
            return Err(Error::invalid_argument(format!(
                "exactly one unknown piece is required, found {unknown}"
            )));
        }
        let len = self.pieces.len() as i32;
        for (name, id) in [
            ("unk_id", self.trainer_spec.unk_id),
            ("bos_id", self.trainer_spec.bos_id),
            ("eos_id", self.trainer_spec.eos_id),
            ("pad_id", self.trainer_spec.pad_id),
        ] {
            if id >= len {
                return Err(Error::invalid_argument(format!(
                    "{name} {id} is out of range for {len} pieces"
                )));
            }
        }
        Ok(())
    }

    /// Returns the id of the single Unknown piece.
    #[inline(never)]
    pub fn unk_id(&self) -> Option<usize> {
        self.pieces.iter().position(|p| p.kind == PieceType::Unknown)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;

    fn toy_model() -> Model {
        Model {
            pieces: vec![
                Piece::reserved("<unk>", PieceType::Unknown),
                Piece::reserved("<s>", PieceType::Control),
                Piece::reserved("</s>", PieceType::Control),
                Piece::normal("a", -1.0),
            ],
            ..Model::default()
        }
    }

    #[test]
    fn test_validate_accepts_toy_model() {
        assert!(toy_model().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_duplicates() {
        let mut model = toy_model();
        model.pieces.push(Piece::normal("a", -2.0));
        assert_eq!(model.validate().unwrap_err().kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn test_validate_requires_unknown() {
        let mut model = toy_model();
        model.pieces[0].kind = PieceType::Control;
        assert_eq!(model.validate().unwrap_err().kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn test_validate_checks_reserved_ids() {
        let mut model = toy_model();
        model.trainer_spec.pad_id = 100;
        assert_eq!(model.validate().unwrap_err().kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn test_verify_spec_ranges() {
        let mut spec = TrainerSpec::default();
        assert!(spec.verify().is_ok());
        spec.character_coverage = 0.5;
        assert_eq!(spec.verify().unwrap_err().kind(), ErrorKind::InvalidArgument);
        spec = TrainerSpec {
            vocab_size: 0,
            ..TrainerSpec::default()
        };
        assert!(spec.verify().is_err());
        spec = TrainerSpec {
            use_all_vocab: true,
            ..TrainerSpec::default()
        };
        assert!(spec.verify().is_err());
        spec.model_type = ModelType::Word;
        assert!(spec.verify().is_ok());
    }
}
