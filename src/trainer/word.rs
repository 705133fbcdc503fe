//! Word trainer: whitespace-delimited tokens scored by log frequency.

use hashbrown::HashMap;

use crate::trainer::Trainer;
use crate::unicode::{UNK_STR, split_into_words};
use crate::util::sort_by_freq;
use crate::{Error, Result};

#[inline(never)]
pub(super) fn train(trainer: &mut Trainer) -> Result<()> {
    let spec = &trainer.trainer_spec;
    let mut freq: HashMap<String, u64> = HashMap::new();
    for (sentence, count) in &trainer.sentences {
        for word in split_into_words(
            sentence,
            spec.treat_whitespace_as_suffix,
            spec.allow_whitespace_only_pieces,
        ) {
            *freq.entry(word.to_string()).or_default() += count;
        }
    }

    let vocab_size = spec.vocab_size as usize;
    if vocab_size < trainer.meta_pieces.len() {
        return Err(Error::invalid_argument("vocab_size is smaller than the meta pieces"));
    }
    let vocab_size = vocab_size - trainer.meta_pieces.len();

    let sum: u64 = freq.values().sum();
    let logsum = (sum as f64).ln();

    let mut sorted = freq.into_iter().collect::<Vec<_>>();
    sort_by_freq(&mut sorted);

    let mut final_pieces = Vec::new();
    for (word, count) in sorted {
        if word.contains(UNK_STR) {
            continue;
        }
        if !spec.use_all_vocab && final_pieces.len() == vocab_size {
            break;
        }
        final_pieces.push((word, (count as f64).ln() - logsum));
    }
    if trainer.trainer_spec.use_all_vocab {
        trainer.trainer_spec.vocab_size =
            (final_pieces.len() + trainer.meta_pieces.len()) as i32;
    }
    trainer.final_pieces = final_pieces;
    Ok(())
}
