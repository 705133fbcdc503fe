//! **Subword tokenizer core.**
//!
//! Learns a vocabulary of pieces from raw text and segments new text
//! into those pieces and back.
//!
//! # Overview
//!
//! Unipiece trains and applies subword vocabularies with four
//! segmentation algorithms: a Viterbi-decoded unigram language model
//! (with n-best enumeration and sampling), a byte-pair-encoding merge
//! machine, a whole-word splitter and a per-codepoint splitter. Inputs
//! pass through a longest-prefix rewriting normalizer that keeps a
//! byte-aligned map back to the original text, and trained models
//! round-trip losslessly through a single self-describing artifact.
//!
//! See [`Processor`] for segmentation and [`Trainer`] for training.
//!
//! # Examples
//!
//! ### Encoding and decoding with a trained model
//!
//! ```
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! use unipiece::{ModelType, NormalizerSpec, Processor, Trainer, TrainerSpec};
//!
//! let trainer = Trainer::new(
//!     TrainerSpec {
//!         model_type: ModelType::Bpe,
//!         vocab_size: 12,
//!         ..TrainerSpec::default()
//!     },
//!     NormalizerSpec::identity(),
//! )?;
//! let model = trainer.train(["abcabc".to_string()])?;
//!
//! let processor = Processor::from_model(model)?;
//! let ids = processor.encode_ids("abcabc")?;
//! assert_eq!(processor.decode_ids(&ids)?, "abcabc");
//! # Ok(())
//! # }
//! ```
//!
//! ### Persisting a model
//!
//! ```
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! # use unipiece::{Model, ModelType, NormalizerSpec, Processor, Trainer, TrainerSpec};
//! # let trainer = Trainer::new(
//! #     TrainerSpec { model_type: ModelType::Bpe, vocab_size: 12, ..TrainerSpec::default() },
//! #     NormalizerSpec::identity(),
//! # )?;
//! # let model = trainer.train(["abcabc".to_string()])?;
//! let record = model.to_record();
//! let restored = Model::from_record(&record)?;
//! assert_eq!(model, restored);
//! # Ok(())
//! # }
//! ```
//!
//! # Cargo features
//!
//! - `multiversion`: Enables multiple code paths with different CPU
//!   feature utilization for the hot lookup loops. Enabled by default.

#![cfg_attr(docsrs, feature(doc_auto_cfg))]

mod engine;
mod error;
mod lattice;
mod model;
mod normalizer;
mod processor;
mod serialization;
mod trainer;
mod trie;

pub mod unicode;
pub mod utf8;

mod util;

pub use crate::error::{Error, ErrorKind, Result};
pub use crate::lattice::{Lattice, Node, NodeId, PathWithScore};
pub use crate::model::{
    Model, ModelType, NormalizerSpec, Piece, PieceType, SelfTestData, SelfTestSample, TrainerSpec,
};
pub use crate::normalizer::{CharsMap, Normalizer, PrefixMatcher};
pub use crate::processor::{Encoding, Processor, Span};
pub use crate::trainer::Trainer;
pub use crate::trie::DoubleArray;
pub use crate::util::ReservoirSampler;
