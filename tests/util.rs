#![allow(dead_code)]

use std::sync::Once;

use unipiece::{Model, ModelType, NormalizerSpec, Piece, PieceType, Processor, TrainerSpec};

pub fn init_logging() {
    static INIT_ENV: Once = Once::new();
    INIT_ENV.call_once(|| {
        simple_logger::init_with_level(log::Level::Info).ok();
    });
}

/// The classic toy unigram model: `<unk> <s> </s> a b c ab ▁` with
/// scores 0, 0, 0, 0, 0.3, 0.2, 1.0, 3.0.
pub fn toy_unigram_model() -> Model {
    let pieces = vec![
        Piece::reserved("<unk>", PieceType::Unknown),
        Piece::reserved("<s>", PieceType::Control),
        Piece::reserved("</s>", PieceType::Control),
        Piece::normal("a", 0.0),
        Piece::normal("b", 0.3),
        Piece::normal("c", 0.2),
        Piece::normal("ab", 1.0),
        Piece::normal("▁", 3.0),
    ];
    Model {
        trainer_spec: TrainerSpec {
            model_type: ModelType::Unigram,
            vocab_size: pieces.len() as i32,
            ..TrainerSpec::default()
        },
        normalizer_spec: NormalizerSpec {
            name: "identity".to_string(),
            ..NormalizerSpec::default()
        },
        pieces,
        ..Model::default()
    }
}

pub fn toy_processor() -> Processor {
    Processor::from_model(toy_unigram_model()).unwrap()
}

/// Checks that the piece concatenation of an encoding reproduces the
/// normalized input exactly.
pub fn check_lossless(processor: &Processor, input: &str) {
    let normalized = processor.normalize(input).unwrap();
    let encoding = processor.encode(input).unwrap();
    let concatenated = encoding
        .spans
        .iter()
        .flat_map(|span| span.piece.iter().copied())
        .collect::<Vec<u8>>();
    assert_eq!(
        concatenated,
        normalized.as_bytes(),
        "piece concatenation must reproduce the normalized input for {input:?}"
    );
}
