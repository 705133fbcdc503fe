//! Unigram trainer: suffix-array seeding, EM with Digamma smoothing and
//! the likelihood-driven pruning loop.

use hashbrown::HashSet;

use crate::lattice::Lattice;
use crate::trainer::Trainer;
use crate::trie::DoubleArray;
use crate::{Error, Result};

/// Penalty below the minimum score for unknown fallback nodes.
const UNK_PENALTY: f64 = 10.0;

/// Pieces with a smaller expected count are dropped in the M-step.
const EXPECTED_FREQUENCY_THRESHOLD: f64 = 0.5;

/// Score spacing for required characters missing from the learned set.
const MIN_SCORE_PENALTY_DELTA: f64 = 0.0001;

/// The seed-and-prune working model: scored pieces with a trie for
/// lattice population.
struct TrainerModel {
    pieces: Vec<(String, f64)>,
    trie:   DoubleArray,

    trie_results_size: usize,
    min_score:         f64,
}
impl TrainerModel {
    #[inline(never)]
    fn new(pieces: Vec<(String, f64)>) -> Result<Self> {
        if pieces.is_empty() {
            return Err(Error::internal("the unigram training model has no pieces"));
        }
        let mut sorted = pieces
            .iter()
            .enumerate()
            .map(|(id, (piece, _))| (piece.as_bytes(), id as u32))
            .collect::<Vec<_>>();
        sorted.sort_by(|a, b| a.0.cmp(b.0));
        let keys = sorted.iter().map(|&(k, _)| k).collect::<Vec<_>>();
        let values = sorted.iter().map(|&(_, v)| v).collect::<Vec<_>>();
        let trie = DoubleArray::build(&keys, &values)?;
        let mut trie_results_size = 0;
        for key in &keys {
            trie_results_size = trie_results_size.max(trie.count_prefixes(key));
        }
        let min_score =
            pieces.iter().map(|&(_, score)| score).fold(f64::INFINITY, f64::min);
        Ok(Self {
            pieces,
            trie,
            trie_results_size: trie_results_size.max(1),
            min_score,
        })
    }

    #[inline(always)]
    fn len(&self) -> usize {
        self.pieces.len()
    }

    /// Inserts all matching pieces into the lattice. Positions without
    /// a single-codepoint match get an unknown node with id -1, which
    /// keeps EOS reachable without crediting any piece.
    #[inline(never)]
    fn populate(&self, lattice: &mut Lattice) {
        let sentence = lattice.sentence().to_string();
        let len = lattice.size();
        let unk_score = (self.min_score - UNK_PENALTY) as f32;
        let mut matches = Vec::with_capacity(self.trie_results_size + 1);
        for pos in 0..len {
            let begin = lattice.byte_offset(pos);
            matches.clear();
            self.trie.common_prefix_search(
                &sentence.as_bytes()[begin..],
                &mut matches,
                self.trie_results_size,
            );
            let mut has_single = false;
            for &(id, byte_len) in &matches {
                let char_len = sentence[begin..begin + byte_len].chars().count();
                lattice.insert(pos, char_len, id as i32, self.pieces[id as usize].1 as f32);
                if char_len == 1 {
                    has_single = true;
                }
            }
            if !has_single {
                lattice.insert(pos, 1, -1, unk_score);
            }
        }
    }
}

#[inline(never)]
fn digamma(mut x: f64) -> f64 {
    let mut result = 0.0;
    while x < 7.0 {
        result -= 1.0 / x;
        x += 1.0;
    }
    x -= 0.5;
    let xx = 1.0 / x;
    let xx2 = xx * xx;
    let xx4 = xx2 * xx2;
    result += x.ln() + (1.0 / 24.0) * xx2 - (7.0 / 960.0) * xx4 + (31.0 / 8064.0) * xx4 * xx2
        - (127.0 / 30720.0) * xx4 * xx4;
    result
}

#[inline(never)]
fn to_log_prob(pieces: &mut [(String, f64)]) {
    let sum: f64 = pieces.iter().map(|&(_, score)| score).sum();
    let logsum = sum.ln();
    for (_, score) in pieces.iter_mut() {
        *score = score.ln() - logsum;
    }
}

/// Enumerates frequent substrings of the corpus with an enhanced suffix
/// array and scores them by `frequency * length`.
#[inline(never)]
fn make_seed_pieces(trainer: &Trainer) -> Result<Vec<(String, f64)>> {
    let spec = &trainer.trainer_spec;

    // One array with NUL sentence boundaries.
    let mut flat = String::new();
    for (sentence, _) in &trainer.sentences {
        flat.push_str(sentence);
        flat.push('\0');
    }

    log::info!("making the suffix array over {} characters", flat.chars().count());
    let suffix = esaxx_rs::suffix_rs(&flat)
        .map_err(|_| Error::internal("suffix array construction failed"))?;

    log::info!("extracting frequent substrings");
    let mut substrings = Vec::new();
    for (chars, freq) in suffix.iter() {
        if chars.len() <= 1 {
            continue;
        }
        if chars.contains(&'\0') {
            continue;
        }
        if !trainer.is_valid_piece(chars) {
            continue;
        }
        let score = freq as u64 * chars.len() as u64;
        substrings.push((chars.iter().collect::<String>(), score));
    }
    substrings.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

    // Required characters always seed the model.
    let mut seed = trainer
        .required_chars
        .iter()
        .map(|&(c, freq)| (c.to_string(), freq as f64))
        .collect::<Vec<_>>();
    let mut seen = seed.iter().map(|(piece, _)| piece.clone()).collect::<HashSet<_>>();
    for (piece, score) in substrings {
        if seed.len() >= spec.seed_piece_size {
            break;
        }
        if !seen.insert(piece.clone()) {
            continue;
        }
        seed.push((piece, score as f64));
    }
    to_log_prob(&mut seed);
    log::info!("initialized {} seed pieces", seed.len());
    Ok(seed)
}

/// One E-step: expected piece counts via forward-backward, fanned out
/// over the worker pool and reduced in thread order.
#[inline(never)]
fn run_e_step(trainer: &Trainer, model: &TrainerModel) -> Result<(Vec<f64>, f64, u64)> {
    let all_sentence_freq: u64 = trainer.sentences.iter().map(|&(_, freq)| freq).sum();
    let partials = trainer.run_workers(|n| {
        let mut lattice = Lattice::new();
        let mut expected = vec![0.0f64; model.len()];
        let mut objective = 0.0f64;
        let mut num_tokens = 0u64;
        let mut saw_nan = false;
        for i in trainer.worker_range(n) {
            let (sentence, freq) = &trainer.sentences[i];
            lattice.set_sentence(sentence);
            model.populate(&mut lattice);
            let z = lattice.populate_marginal(*freq as f64, &mut expected);
            saw_nan |= z.is_nan();
            objective -= z / all_sentence_freq as f64;
            num_tokens += lattice.viterbi().0.len() as u64;
        }
        (expected, objective, num_tokens, saw_nan)
    })?;

    let mut expected = vec![0.0f64; model.len()];
    let mut objective = 0.0f64;
    let mut num_tokens = 0u64;
    for (partial, partial_obj, partial_tokens, saw_nan) in partials {
        if saw_nan {
            return Err(Error::internal(
                "likelihood is NAN; the input sentence may be too long",
            ));
        }
        objective += partial_obj;
        num_tokens += partial_tokens;
        for (total, value) in expected.iter_mut().zip(partial) {
            *total += value;
        }
    }
    Ok((expected, objective, num_tokens))
}

/// One M-step: drop negligible pieces and re-score the rest with the
/// Bayesianified Digamma update, which acts as a sparse prior.
#[inline(never)]
fn run_m_step(model: &TrainerModel, expected: &[f64]) -> Result<Vec<(String, f64)>> {
    if model.len() != expected.len() {
        return Err(Error::internal("expected counts do not match the piece table"));
    }
    let mut new_pieces = Vec::with_capacity(model.len());
    let mut sum = 0.0f64;
    for ((piece, _), &freq) in model.pieces.iter().zip(expected) {
        if freq < EXPECTED_FREQUENCY_THRESHOLD {
            continue;
        }
        new_pieces.push((piece.clone(), freq));
        sum += freq;
    }
    if new_pieces.is_empty() {
        return Err(Error::internal("every piece fell below the expected count threshold"));
    }
    let logsum = digamma(sum);
    for (_, score) in new_pieces.iter_mut() {
        *score = digamma(*score) - logsum;
    }
    Ok(new_pieces)
}

/// Prunes pieces whose removal costs the least likelihood, assuming
/// each occurrence is replaced by its second-best segmentation.
#[inline(never)]
fn prune_pieces(
    trainer: &Trainer, model: &TrainerModel, desired_vocab_size: usize,
) -> Result<Vec<(String, f64)>> {
    let spec = &trainer.trainer_spec;

    // How each piece re-segments without itself.
    let mut always_keep = vec![true; model.len()];
    let mut alternatives: Vec<Vec<usize>> = vec![Vec::new(); model.len()];
    let mut lattice = Lattice::new();
    for (i, (piece, _)) in model.pieces.iter().enumerate() {
        lattice.set_sentence(piece);
        model.populate(&mut lattice);
        let nbests = lattice.nbest(2);
        if nbests.len() == 1 {
            always_keep[i] = true;
        } else if nbests[0].0.len() >= 2 {
            always_keep[i] = false;
        } else if nbests[0].0.len() == 1 {
            always_keep[i] = true;
            for &node in &nbests[1].0 {
                let id = lattice.node(node).id;
                if id >= 0 {
                    alternatives[i].push(id as usize);
                }
            }
        }
    }

    // Viterbi frequencies and the inverted piece-to-sentence index.
    let partials = trainer.run_workers(|n| {
        let mut lattice = Lattice::new();
        let mut vsum = 0.0f64;
        let mut freq = vec![0.0f64; model.len()];
        let mut inverted: Vec<Vec<u32>> = vec![Vec::new(); model.len()];
        for i in trainer.worker_range(n) {
            let (sentence, sentence_freq) = &trainer.sentences[i];
            lattice.set_sentence(sentence);
            model.populate(&mut lattice);
            vsum += *sentence_freq as f64;
            for &node in &lattice.viterbi().0 {
                let id = lattice.node(node).id;
                if id >= 0 {
                    freq[id as usize] += *sentence_freq as f64;
                    inverted[id as usize].push(i as u32);
                }
            }
        }
        (vsum, freq, inverted)
    })?;
    let mut vsum = 0.0f64;
    let mut freq = vec![0.0f64; model.len()];
    let mut inverted: Vec<Vec<u32>> = vec![Vec::new(); model.len()];
    for (partial_vsum, partial_freq, partial_inverted) in partials {
        vsum += partial_vsum;
        for (total, value) in freq.iter_mut().zip(partial_freq) {
            *total += value;
        }
        for (total, value) in inverted.iter_mut().zip(partial_inverted) {
            total.extend(value);
        }
    }

    let sum: f64 = freq.iter().sum();
    let logsum = sum.ln();
    let mut candidates = Vec::new();
    let mut new_pieces = Vec::with_capacity(desired_vocab_size);
    for i in 0..model.len() {
        if freq[i] == 0.0 || !always_keep[i] {
            continue;
        }
        if alternatives[i].is_empty() {
            new_pieces.push(model.pieces[i].clone());
            continue;
        }
        let mut piece_frequency = 0.0f64;
        for &n in &inverted[i] {
            piece_frequency += trainer.sentences[n as usize].1 as f64;
        }
        piece_frequency /= vsum;
        let logprob_piece = freq[i].ln() - logsum;
        // The removed piece's frequency is re-assigned to its
        // alternatives; the denominator grows by the alternative count.
        let logsum_alternative = (sum + freq[i] * (alternatives.len() - 1) as f64).ln();
        let mut logprob_alternative = 0.0f64;
        for &alternative in &alternatives[i] {
            logprob_alternative += (freq[alternative] + freq[i]).ln() - logsum_alternative;
        }
        let loss = piece_frequency * (logprob_piece - logprob_alternative);
        candidates.push((i, loss));
    }

    let pruned_size = desired_vocab_size
        .max((spec.shrinking_factor * model.len() as f64) as usize);
    candidates.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    for (i, _) in candidates {
        if new_pieces.len() == pruned_size {
            break;
        }
        new_pieces.push(model.pieces[i].clone());
    }
    Ok(new_pieces)
}

/// Combines the survivors with the required characters and caps the
/// table at the target size.
#[inline(never)]
fn finalize(trainer: &Trainer, model: &TrainerModel) -> Result<Vec<(String, f64)>> {
    let spec = &trainer.trainer_spec;
    let vocab_size_final = spec.vocab_size as usize - trainer.meta_pieces.len();
    if vocab_size_final == 0 {
        return Err(Error::invalid_argument("vocab_size leaves no room for trained pieces"));
    }

    let mut final_pieces: Vec<(String, f64)> = Vec::new();
    let mut seen = HashSet::new();
    let scores = model
        .pieces
        .iter()
        .map(|(piece, score)| (piece.as_str(), *score))
        .collect::<hashbrown::HashMap<_, _>>();

    // Required characters come first; absentees get a tiny descending
    // penalty below the minimum score so duplicates sort stably.
    let mut min_score_penalty = 0.0;
    for (c, _) in &trainer.required_chars {
        let piece = c.to_string();
        let score = match scores.get(piece.as_str()) {
            Some(&score) => score,
            None => {
                let score = model.min_score + min_score_penalty;
                min_score_penalty += MIN_SCORE_PENALTY_DELTA;
                score
            }
        };
        seen.insert(piece.clone());
        final_pieces.push((piece, score));
    }

    let mut by_score = model.pieces.clone();
    by_score.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    for (piece, score) in by_score {
        if final_pieces.len() >= vocab_size_final {
            break;
        }
        if !seen.insert(piece.clone()) {
            continue;
        }
        final_pieces.push((piece, score));
    }
    final_pieces.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    final_pieces.truncate(vocab_size_final);
    Ok(final_pieces)
}

/// Runs the full unigram training loop.
#[inline(never)]
pub(super) fn train(trainer: &mut Trainer) -> Result<()> {
    let seed = make_seed_pieces(trainer)?;
    let mut model = TrainerModel::new(seed)?;

    if trainer.trainer_spec.split_by_whitespace {
        trainer.split_sentences_by_whitespace();
    }
    log::info!("using {} sentences for EM training", trainer.sentences.len());

    let desired_vocab_size = (trainer.trainer_spec.vocab_size as f64 * 1.1) as usize;
    loop {
        for iteration in 0..trainer.trainer_spec.num_sub_iterations {
            let (expected, objective, num_tokens) = run_e_step(trainer, &model)?;
            let new_pieces = run_m_step(&model, &expected)?;
            model = TrainerModel::new(new_pieces)?;
            log::info!(
                "EM sub_iter={iteration} size={} obj={objective} num_tokens={num_tokens} num_tokens/piece={}",
                model.len(),
                num_tokens as f64 / model.len() as f64
            );
        }
        if model.len() <= desired_vocab_size {
            break;
        }
        let new_pieces = prune_pieces(trainer, &model, desired_vocab_size)?;
        model = TrainerModel::new(new_pieces)?;
    }

    trainer.final_pieces = finalize(trainer, &model)?;
    Ok(())
}
