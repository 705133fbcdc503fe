//! Shared training infrastructure.
//!
//! Handles corpus ingestion and normalization, character coverage,
//! reserved meta pieces, candidate piece validity and the finalization
//! of the learned vocabulary into a model artifact. The per-algorithm
//! trainers live in the submodules.

use std::collections::BTreeMap;

use hashbrown::{HashMap, HashSet};
use rayon::prelude::*;
use unicode_script::Script;

use crate::model::{Model, ModelType, NormalizerSpec, Piece, PieceType, TrainerSpec};
use crate::model::{SelfTestData, SelfTestSample};
use crate::normalizer::{CharsMap, Normalizer, PrefixMatcher};
use crate::processor::Processor;
use crate::unicode::{BOUNDARY_CHAR, BOUNDARY_STR, UNK_CHAR, UNK_STR, byte_to_piece};
use crate::util::{ReservoirSampler, sort_by_freq};
use crate::{Error, Result, unicode};

mod bpe;
mod chars;
mod unigram;
mod word;

/// Fixed seed for input shuffling and self-test sampling.
const SAMPLER_SEED: u64 = 12345678;

/// A training sentence with its corpus frequency.
pub(crate) type Sentence = (String, u64);

/// Vocabulary trainer. One instance runs one training job.
pub struct Trainer {
    pub(crate) trainer_spec:      TrainerSpec,
    pub(crate) normalizer_spec:   NormalizerSpec,
    pub(crate) denormalizer_spec: Option<NormalizerSpec>,

    pub(crate) sentences:      Vec<Sentence>,
    pub(crate) required_chars: Vec<(char, u64)>,
    pub(crate) required_freq:  HashMap<char, u64>,
    pub(crate) meta_pieces:    BTreeMap<i32, (String, PieceType)>,

    self_test_samples: Vec<String>,
    pub(crate) final_pieces: Vec<(String, f64)>,
}
impl Trainer {
    /// Creates a trainer, validating the spec and reserving the meta
    /// pieces.
    #[inline(never)]
    pub fn new(trainer_spec: TrainerSpec, normalizer_spec: NormalizerSpec) -> Result<Self> {
        trainer_spec.verify()?;
        let mut trainer = Self {
            trainer_spec,
            normalizer_spec,
            denormalizer_spec: None,
            sentences: Vec::new(),
            required_chars: Vec::new(),
            required_freq: HashMap::new(),
            meta_pieces: BTreeMap::new(),
            self_test_samples: Vec::new(),
            final_pieces: Vec::new(),
        };
        trainer.init_meta_pieces()?;
        Ok(trainer)
    }

    /// Adds an optional decode-time normalizer recorded in the model.
    #[inline(always)]
    pub fn with_denormalizer(mut self, spec: NormalizerSpec) -> Self {
        self.denormalizer_spec = Some(spec);
        self
    }

    /// Trains a model from the given corpus lines.
    ///
    /// File readers are external collaborators; the trainer only sees
    /// the line buffers.
    #[inline(never)]
    pub fn train<I>(mut self, corpus: I) -> Result<Model>
    where
        I: IntoIterator<Item = String>,
    {
        if !self.normalizer_spec.escape_whitespaces {
            return Err(Error::failed_precondition(
                "training requires escape_whitespaces normalization",
            ));
        }
        self.load_sentences(corpus)?;
        match self.trainer_spec.model_type {
            ModelType::Unigram => unigram::train(&mut self)?,
            ModelType::Bpe => bpe::train(&mut self)?,
            ModelType::Word => word::train(&mut self)?,
            ModelType::Char => chars::train(&mut self)?,
        }
        self.serialize()
    }

    /// Reserves unk/bos/eos/pad, control and user-defined symbols and
    /// the byte pieces at their ids.
    #[inline(never)]
    fn init_meta_pieces(&mut self) -> Result<()> {
        let spec = &self.trainer_spec;
        let mut has_unk = false;
        let mut meta: BTreeMap<i32, (String, PieceType)> = BTreeMap::new();

        let reserved = [
            (spec.unk_id, spec.unk_piece.clone()),
            (spec.bos_id, spec.bos_piece.clone()),
            (spec.eos_id, spec.eos_piece.clone()),
            (spec.pad_id, spec.pad_piece.clone()),
        ];
        for (id, piece) in reserved {
            if id < 0 {
                continue;
            }
            if id >= spec.vocab_size || meta.contains_key(&id) || (has_unk && piece == spec.unk_piece)
            {
                return Err(Error::invalid_argument(format!(
                    "invalid reserved id {id} for piece {piece:?}"
                )));
            }
            let kind = if piece == spec.unk_piece {
                has_unk = true;
                PieceType::Unknown
            } else {
                PieceType::Control
            };
            meta.insert(id, (piece, kind));
        }
        if !has_unk {
            return Err(Error::invalid_argument(format!(
                "{} must be defined",
                spec.unk_piece
            )));
        }

        let mut dup = HashSet::new();
        let mut next_id = 0i32;
        let mut symbols = Vec::new();
        for symbol in &spec.control_symbols {
            symbols.push((symbol.clone(), PieceType::Control));
        }
        for symbol in &spec.user_defined_symbols {
            symbols.push((symbol.clone(), PieceType::UserDefined));
        }
        if spec.byte_fallback {
            for byte in 0..=255u8 {
                symbols.push((byte_to_piece(byte).to_string(), PieceType::Byte));
            }
        }
        for (symbol, kind) in symbols {
            if !dup.insert(symbol.clone()) {
                return Err(Error::invalid_argument(format!(
                    "{symbol:?} is already defined"
                )));
            }
            if symbol == spec.unk_piece {
                return Err(Error::invalid_argument(format!(
                    "{} must not be defined as a control or user-defined symbol",
                    spec.unk_piece
                )));
            }
            // Redefinitions of bos/eos/pad retype the existing entry.
            if symbol == spec.bos_piece && spec.bos_id >= 0 {
                meta.get_mut(&spec.bos_id).unwrap().1 = kind;
            } else if symbol == spec.eos_piece && spec.eos_id >= 0 {
                meta.get_mut(&spec.eos_id).unwrap().1 = kind;
            } else if symbol == spec.pad_piece && spec.pad_id >= 0 {
                meta.get_mut(&spec.pad_id).unwrap().1 = kind;
            } else {
                while meta.contains_key(&next_id) {
                    next_id += 1;
                }
                if next_id >= spec.vocab_size {
                    return Err(Error::invalid_argument(
                        "vocab_size is too small for the reserved symbols",
                    ));
                }
                meta.insert(next_id, (symbol, kind));
            }
        }
        self.meta_pieces = meta;
        Ok(())
    }

    /// Loads, filters, samples and normalizes the corpus, then derives
    /// the required character set from the coverage quota.
    #[inline(never)]
    fn load_sentences<I>(&mut self, corpus: I) -> Result<()>
    where
        I: IntoIterator<Item = String>,
    {
        let spec = &self.trainer_spec;
        let is_tsv = match spec.input_format.as_str() {
            "" | "text" => false,
            "tsv" => true,
            other => {
                return Err(Error::invalid_argument(format!(
                    "unsupported input format {other:?}, expected \"text\" or \"tsv\""
                )));
            }
        };

        let mut sentences: Vec<Sentence> = Vec::new();
        let mut sampler = (spec.input_sentence_size > 0 && spec.shuffle_input_sentence)
            .then(|| ReservoirSampler::new(spec.input_sentence_size as usize, SAMPLER_SEED));
        let mut test_sampler =
            ReservoirSampler::new(spec.self_test_sample_size, SAMPLER_SEED);
        let mut too_long_lines = 0usize;

        for line in corpus {
            let (sentence, freq) = if is_tsv {
                let fields = line.split('\t').collect::<Vec<_>>();
                if fields.len() != 2 {
                    return Err(Error::invalid_argument(format!(
                        "tsv input must be sentence<tab>freq: {line:?}"
                    )));
                }
                let freq = fields[1].parse::<u64>().map_err(|_| {
                    Error::invalid_argument(format!(
                        "could not parse the frequency: {line:?}"
                    ))
                })?;
                if freq == 0 {
                    return Err(Error::invalid_argument("sentence frequency must be >= 1"));
                }
                (fields[0].to_string(), freq)
            } else {
                (line, 1)
            };
            if sentence.is_empty() {
                continue;
            }
            if sentence.len() > spec.max_sentence_length {
                if too_long_lines == 0 {
                    log::warn!(
                        "found a line longer than {} bytes, skipping long lines",
                        spec.max_sentence_length
                    );
                }
                too_long_lines += 1;
                continue;
            }
            if sentence.contains(UNK_STR) {
                log::info!("reserved chars found, skipped: {sentence:?}");
                continue;
            }
            test_sampler.add(sentence.clone());
            match &mut sampler {
                Some(sampler) => sampler.add((sentence, freq)),
                None => {
                    sentences.push((sentence, freq));
                    if spec.input_sentence_size > 0
                        && sentences.len() as u64 >= spec.input_sentence_size
                    {
                        break;
                    }
                }
            }
        }
        if let Some(sampler) = sampler {
            log::info!("sampled {} sentences from {}", spec.input_sentence_size, sampler.total());
            sentences = sampler.into_sampled();
        }
        if too_long_lines > 0 {
            log::info!("skipped {too_long_lines} too long sentences");
        }
        self.self_test_samples = test_sampler.into_sampled();
        if sentences.is_empty() {
            return Err(Error::invalid_argument("no trainable sentences are loaded"));
        }
        log::info!("loaded {} sentences", sentences.len());

        // Normalize everything and fence meta pieces and pretokenizer
        // splits with the boundary marker.
        let normalizer =
            Normalizer::new(&self.normalizer_spec, spec.treat_whitespace_as_suffix)?;
        let meta_strings = self.meta_pieces.values().map(|(s, _)| s.as_str()).collect::<Vec<_>>();
        let matcher = PrefixMatcher::new(&meta_strings)?;
        let delimiter = spec.pretokenization_delimiter.clone();
        let pool = self.thread_pool()?;
        let normalized = pool.install(|| {
            sentences
                .par_iter()
                .map(|(sentence, freq)| {
                    let (mut normalized, _) = normalizer.normalize(sentence)?;
                    if !delimiter.is_empty() {
                        normalized = normalized.replace(&delimiter, BOUNDARY_STR);
                    }
                    normalized = matcher.global_replace(&normalized, BOUNDARY_STR);
                    Ok((normalized, *freq))
                })
                .collect::<Result<Vec<_>>>()
        })?;
        self.sentences = normalized;
        self.sentences.retain(|(s, _)| !s.is_empty());
        for (sentence, _) in &self.sentences {
            if sentence.contains(' ') {
                return Err(Error::internal("normalized string must not include spaces"));
            }
        }

        self.compute_required_chars()?;
        Ok(())
    }

    /// Accumulates character frequencies and keeps the most frequent
    /// codepoints until the coverage quota is met; everything else is
    /// rewritten to the unknown sentinel.
    #[inline(never)]
    fn compute_required_chars(&mut self) -> Result<()> {
        let spec = &self.trainer_spec;
        let mut counts: HashMap<char, (bool, u64)> = HashMap::new();
        for c in spec.required_chars.chars() {
            if c == '\0' {
                continue;
            }
            counts.entry(c).or_default().0 = true;
        }
        let mut all_chars_count = 0u64;
        for (sentence, freq) in &self.sentences {
            for c in sentence.chars() {
                if c == '\0' {
                    continue;
                }
                if c == ' ' {
                    return Err(Error::internal("normalized string must not include spaces"));
                }
                counts.entry(c).or_default().1 += freq;
                all_chars_count += freq;
            }
        }
        log::info!("all chars count={all_chars_count}");

        let mut sorted = counts.into_iter().map(|(c, v)| (c, v)).collect::<Vec<_>>();
        sorted.sort_by(|a, b| {
            b.1.0
                .cmp(&a.1.0)
                .then_with(|| b.1.1.cmp(&a.1.1))
                .then_with(|| a.0.cmp(&b.0))
        });

        let mut accumulated = 0u64;
        self.required_chars.clear();
        self.required_freq.clear();
        for (c, (_, count)) in sorted {
            let coverage = accumulated as f64 / all_chars_count.max(1) as f64;
            if !spec.use_all_vocab && coverage >= spec.character_coverage {
                log::info!("done: {:.4}% characters are covered", 100.0 * coverage);
                break;
            }
            accumulated += count;
            if c == ' ' {
                return Err(Error::internal("normalized string must not include spaces"));
            }
            if c == BOUNDARY_CHAR {
                continue;
            }
            self.required_chars.push((c, count));
            self.required_freq.insert(c, count);
        }
        sort_by_freq(&mut self.required_chars);
        log::info!("alphabet size={}", self.required_chars.len());
        if self.required_freq.contains_key(&UNK_CHAR) {
            return Err(Error::internal("the unknown sentinel leaked into the alphabet"));
        }

        // Rewrite rare characters to the unknown sentinel.
        for (sentence, _) in &mut self.sentences {
            if sentence.chars().all(|c| self.required_freq.contains_key(&c)) {
                continue;
            }
            *sentence = sentence
                .chars()
                .map(|c| {
                    if self.required_freq.contains_key(&c) {
                        c
                    } else {
                        UNK_CHAR
                    }
                })
                .collect();
        }

        if matches!(spec.model_type, ModelType::Unigram | ModelType::Bpe)
            && self.required_chars.len() + self.meta_pieces.len() > spec.vocab_size as usize
        {
            return Err(Error::invalid_argument(format!(
                "vocab_size {} is smaller than the required chars {} plus meta pieces {}; \
                 increase vocab_size or decrease character_coverage",
                spec.vocab_size,
                self.required_chars.len(),
                self.meta_pieces.len()
            )));
        }
        Ok(())
    }

    /// Replaces the sentence list with whitespace-delimited tokens and
    /// their frequencies.
    #[inline(never)]
    pub(crate) fn split_sentences_by_whitespace(&mut self) {
        log::info!("tokenizing input sentences with whitespace: {}", self.sentences.len());
        let mut tokens: HashMap<String, u64> = HashMap::new();
        for (sentence, freq) in &self.sentences {
            for word in unicode::split_into_words(
                sentence,
                self.trainer_spec.treat_whitespace_as_suffix,
                self.trainer_spec.allow_whitespace_only_pieces,
            ) {
                *tokens.entry(word.to_string()).or_default() += freq;
            }
        }
        let mut sentences = tokens.into_iter().collect::<Vec<_>>();
        sort_by_freq(&mut sentences);
        self.sentences = sentences;
        log::info!("done: {} tokens", self.sentences.len());
    }

    /// Whether `piece` may become a vocabulary entry.
    #[inline(never)]
    pub(crate) fn is_valid_piece(&self, piece: &[char]) -> bool {
        let spec = &self.trainer_spec;
        if piece.is_empty() || piece.len() > spec.max_piece_length {
            return false;
        }
        // None marks the wildcard assigned to digits when numbers are
        // not split.
        let mut prev_script: Option<Script> = None;
        let all_whitespace = piece.iter().all(|&c| c == unicode::WS_CHAR);
        for (pos, &c) in piece.iter().enumerate() {
            if c == UNK_CHAR || c == '\0' || c == BOUNDARY_CHAR {
                return false;
            }
            if c == ' ' {
                log::warn!("space must not be included in a piece");
                return false;
            }
            if c == unicode::WS_CHAR {
                if spec.allow_whitespace_only_pieces && all_whitespace {
                    continue;
                }
                let last = pos == piece.len() - 1;
                let invalid = if spec.treat_whitespace_as_suffix {
                    (spec.split_by_whitespace && !last)
                        || (!spec.split_by_whitespace && !last && pos == 0)
                } else {
                    (spec.split_by_whitespace && pos > 0)
                        || (!spec.split_by_whitespace && pos > 0 && last)
                };
                if invalid {
                    return false;
                }
            } else {
                if spec.split_digits && unicode::is_decimal_number(c) && piece.len() > 1 {
                    return false;
                }
                let mut script = match unicode::merged_script(c) {
                    Script::Inherited => prev_script,
                    script => Some(script),
                };
                if !spec.split_by_number && unicode::is_decimal_number(c) {
                    script = None;
                }
                if spec.split_by_unicode_script
                    && script.is_some()
                    && prev_script.is_some()
                    && script != prev_script
                {
                    return false;
                }
                prev_script = script;
            }
        }
        true
    }

    /// Builds a worker pool with the configured thread count.
    #[inline(never)]
    pub(crate) fn thread_pool(&self) -> Result<rayon::ThreadPool> {
        rayon::ThreadPoolBuilder::new()
            .num_threads(self.trainer_spec.num_threads)
            .build()
            .map_err(|e| Error::internal(format!("failed to build the worker pool: {e}")))
    }

    /// Runs `worker` once per thread index and returns the results in
    /// thread order, so reductions are deterministic.
    #[inline(never)]
    pub(crate) fn run_workers<T, F>(&self, worker: F) -> Result<Vec<T>>
    where
        T: Send,
        F: Fn(usize) -> T + Sync,
    {
        let pool = self.thread_pool()?;
        let threads = self.trainer_spec.num_threads;
        Ok(pool.install(|| (0..threads).into_par_iter().map(|n| worker(n)).collect()))
    }

    /// Sentence indices owned by worker `n` under the index-modulo
    /// partition.
    #[inline(always)]
    pub(crate) fn worker_range(&self, n: usize) -> impl Iterator<Item = usize> + '_ {
        (n..self.sentences.len()).step_by(self.trainer_spec.num_threads.max(1))
    }

    /// Assembles the final model: meta pieces at their reserved ids and
    /// the learned pieces in order, with the vocabulary size checks.
    #[inline(never)]
    fn serialize(&self) -> Result<Model> {
        let spec = &self.trainer_spec;
        if let Some((&max_id, _)) = self.meta_pieces.iter().next_back() {
            if max_id >= spec.vocab_size {
                return Err(Error::invalid_argument(
                    "vocab_size is too small for the reserved symbols",
                ));
            }
        }
        let mut dup = HashSet::new();
        let mut pieces = Vec::with_capacity(spec.vocab_size as usize);
        let mut fid = 0usize;
        for id in 0..spec.vocab_size {
            if let Some((piece, kind)) = self.meta_pieces.get(&id) {
                if piece.is_empty() || !dup.insert(piece.clone()) {
                    return Err(Error::invalid_argument(format!(
                        "{piece:?} is already defined"
                    )));
                }
                pieces.push(Piece {
                    piece: piece.clone(),
                    score: 0.0,
                    kind:  *kind,
                });
            } else if fid < self.final_pieces.len() {
                let (piece, score) = &self.final_pieces[fid];
                fid += 1;
                if piece.is_empty() || !dup.insert(piece.clone()) {
                    return Err(Error::invalid_argument(format!(
                        "{piece:?} is already defined"
                    )));
                }
                pieces.push(Piece::normal(piece.clone(), *score as f32));
            }
        }
        if fid != self.final_pieces.len() {
            return Err(Error::internal("trained pieces do not fit into vocab_size"));
        }

        let mut trainer_spec = self.trainer_spec.clone();
        if !trainer_spec.hard_vocab_limit || trainer_spec.model_type == ModelType::Char {
            trainer_spec.vocab_size = pieces.len() as i32;
        } else if trainer_spec.vocab_size != pieces.len() as i32 {
            return Err(Error::invalid_argument(format!(
                "vocabulary size too high ({}); please set it to a value <= {}",
                trainer_spec.vocab_size,
                pieces.len()
            )));
        }

        let mut normalizer_spec = self.normalizer_spec.clone();
        if normalizer_spec.precompiled_charsmap.is_empty()
            && !normalizer_spec.normalization_rule_tsv.is_empty()
        {
            let rules = CharsMap::parse_rule_tsv(&normalizer_spec.normalization_rule_tsv)?;
            normalizer_spec.precompiled_charsmap = CharsMap::compile(&rules)?.to_blob();
        }

        let mut model = Model {
            trainer_spec,
            normalizer_spec,
            pieces,
            denormalizer_spec: self.denormalizer_spec.clone(),
            self_test_data: None,
        };
        model.validate()?;

        if !self.self_test_samples.is_empty() {
            let processor = Processor::from_model(model.clone())?;
            let mut samples = Vec::with_capacity(self.self_test_samples.len());
            for input in &self.self_test_samples {
                let pieces = processor.encode_pieces(input)?;
                samples.push(SelfTestSample {
                    input:    input.clone(),
                    expected: pieces.join(" "),
                });
            }
            model.self_test_data = Some(SelfTestData { samples });
        }
        Ok(model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trainer(spec: TrainerSpec) -> Trainer {
        Trainer::new(spec, NormalizerSpec::identity()).unwrap()
    }

    fn chars(piece: &str) -> Vec<char> {
        piece.chars().collect()
    }

    #[test]
    fn test_meta_pieces_layout() {
        let trainer = trainer(TrainerSpec {
            control_symbols: Vec::from(["<ctrl>".to_string()]),
            user_defined_symbols: Vec::from(["<user>".to_string()]),
            ..TrainerSpec::default()
        });
        let meta = &trainer.meta_pieces;
        assert_eq!(meta[&0], ("<unk>".to_string(), PieceType::Unknown));
        assert_eq!(meta[&1], ("<s>".to_string(), PieceType::Control));
        assert_eq!(meta[&2], ("</s>".to_string(), PieceType::Control));
        assert_eq!(meta[&3], ("<ctrl>".to_string(), PieceType::Control));
        assert_eq!(meta[&4], ("<user>".to_string(), PieceType::UserDefined));
    }

    #[test]
    fn test_meta_pieces_reject_duplicate_unknown() {
        let result = Trainer::new(
            TrainerSpec {
                control_symbols: Vec::from(["<unk>".to_string()]),
                ..TrainerSpec::default()
            },
            NormalizerSpec::identity(),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_byte_fallback_meta_pieces() {
        let trainer = trainer(TrainerSpec {
            byte_fallback: true,
            vocab_size: 400,
            ..TrainerSpec::default()
        });
        assert_eq!(trainer.meta_pieces.len(), 3 + 256);
        assert_eq!(trainer.meta_pieces[&3], ("<0x00>".to_string(), PieceType::Byte));
    }

    #[test]
    fn test_is_valid_piece_whitespace_rules() {
        let trainer = trainer(TrainerSpec::default());
        assert!(trainer.is_valid_piece(&chars("▁ab")));
        assert!(!trainer.is_valid_piece(&chars("a▁b")));
        assert!(!trainer.is_valid_piece(&chars("ab▁")));
        assert!(trainer.is_valid_piece(&chars("▁")));
        assert!(!trainer.is_valid_piece(&chars("a b")));
        assert!(!trainer.is_valid_piece(&chars("a\tb")));
        assert!(!trainer.is_valid_piece(&chars("a▅b")));
        assert!(!trainer.is_valid_piece(&chars("")));
    }

    #[test]
    fn test_is_valid_piece_infix_whitespace() {
        let trainer = trainer(TrainerSpec {
            split_by_whitespace: false,
            ..TrainerSpec::default()
        });
        // Infix is allowed when not splitting by whitespace, suffix is not.
        assert!(trainer.is_valid_piece(&chars("a▁b")));
        assert!(!trainer.is_valid_piece(&chars("ab▁")));
    }

    #[test]
    fn test_is_valid_piece_scripts() {
        let trainer = trainer(TrainerSpec::default());
        assert!(trainer.is_valid_piece(&chars("ひらがな")));
        assert!(trainer.is_valid_piece(&chars("グー")));
        assert!(trainer.is_valid_piece(&chars("食べる")));
        assert!(!trainer.is_valid_piece(&chars("aア")));
        // Digits carry the Common script, so they split off from letters
        // by default.
        assert!(!trainer.is_valid_piece(&chars("a1")));
        assert!(trainer.is_valid_piece(&chars("12")));
    }

    #[test]
    fn test_is_valid_piece_unsplit_numbers() {
        let trainer = trainer(TrainerSpec {
            split_by_number: false,
            ..TrainerSpec::default()
        });
        assert!(trainer.is_valid_piece(&chars("a1")));
        assert!(trainer.is_valid_piece(&chars("x0y")));
    }

    #[test]
    fn test_is_valid_piece_digits() {
        let trainer = trainer(TrainerSpec {
            split_digits: true,
            ..TrainerSpec::default()
        });
        assert!(trainer.is_valid_piece(&chars("1")));
        assert!(!trainer.is_valid_piece(&chars("12")));
        assert!(!trainer.is_valid_piece(&chars("a1")));
    }

    #[test]
    fn test_is_valid_piece_length_cap() {
        let trainer = trainer(TrainerSpec {
            max_piece_length: 3,
            ..TrainerSpec::default()
        });
        assert!(trainer.is_valid_piece(&chars("abc")));
        assert!(!trainer.is_valid_piece(&chars("abcd")));
    }

    #[test]
    fn test_load_sentences_and_coverage() {
        let mut trainer = trainer(TrainerSpec {
            character_coverage: 0.98,
            ..TrainerSpec::default()
        });
        trainer
            .load_sentences(
                ["hello world".to_string(), "hello there".to_string()].into_iter(),
            )
            .unwrap();
        assert_eq!(trainer.sentences.len(), 2);
        assert!(trainer.sentences[0].0.starts_with('▁'));
        assert!(!trainer.required_chars.is_empty());
        // 'l' is the most frequent letter.
        assert_eq!(trainer.required_chars[0].0, 'l');
    }

    #[test]
    fn test_load_sentences_tsv() {
        let mut trainer = trainer(TrainerSpec {
            input_format: "tsv".to_string(),
            ..TrainerSpec::default()
        });
        trainer
            .load_sentences(["hello\t3".to_string(), "world\t2".to_string()].into_iter())
            .unwrap();
        assert_eq!(trainer.sentences.iter().map(|s| s.1).collect::<Vec<_>>(), vec![3, 2]);

        let mut trainer = Trainer::new(
            TrainerSpec {
                input_format: "tsv".to_string(),
                ..TrainerSpec::default()
            },
            NormalizerSpec::identity(),
        )
        .unwrap();
        assert!(trainer.load_sentences(["bad line".to_string()].into_iter()).is_err());
    }

    #[test]
    fn test_split_sentences_by_whitespace() {
        let mut trainer = trainer(TrainerSpec::default());
        trainer
            .load_sentences(["hello world hello".to_string()].into_iter())
            .unwrap();
        trainer.split_sentences_by_whitespace();
        assert_eq!(trainer.sentences[0].0, "▁hello");
        assert_eq!(trainer.sentences[0].1, 2);
    }
}
