//! Char trainer: the coverage-selected alphabet scored by log frequency.

use crate::trainer::Trainer;
use crate::{Error, Result};

#[inline(never)]
pub(super) fn train(trainer: &mut Trainer) -> Result<()> {
    let spec = &trainer.trainer_spec;
    let vocab_size = spec.vocab_size as usize;
    if vocab_size < trainer.meta_pieces.len() {
        return Err(Error::invalid_argument("vocab_size is smaller than the meta pieces"));
    }
    let vocab_size = vocab_size - trainer.meta_pieces.len();

    let sum: u64 = trainer.required_chars.iter().map(|&(_, count)| count).sum();
    let logsum = (sum as f64).ln();

    let mut final_pieces = Vec::new();
    for &(c, count) in &trainer.required_chars {
        if !spec.use_all_vocab && final_pieces.len() == vocab_size {
            break;
        }
        final_pieces.push((c.to_string(), (count as f64).ln() - logsum));
    }
    if trainer.trainer_spec.use_all_vocab {
        trainer.trainer_spec.vocab_size =
            (final_pieces.len() + trainer.meta_pieces.len()) as i32;
    }
    trainer.final_pieces = final_pieces;
    Ok(())
}
