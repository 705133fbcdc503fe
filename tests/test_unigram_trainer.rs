//! End-to-end tests for the unigram trainer.

use unipiece::{Model, ModelType, NormalizerSpec, Processor, Trainer, TrainerSpec};

mod util;
use util::*;

fn corpus() -> Vec<String> {
    let words = [
        "hello", "help", "hell", "shell", "shelf", "self", "sell", "seller", "spell", "spelled",
    ];
    let mut lines = Vec::new();
    for (i, word) in words.iter().enumerate() {
        for _ in 0..(words.len() - i) * 10 {
            lines.push(word.to_string());
        }
    }
    lines
}

fn train(vocab_size: i32) -> Model {
    init_logging();
    let trainer_spec = TrainerSpec {
        model_type: ModelType::Unigram,
        vocab_size,
        control_symbols: vec!["<ctrl>".to_string()],
        ..TrainerSpec::default()
    };
    let normalizer_spec = NormalizerSpec {
        name: "identity".to_string(),
        ..NormalizerSpec::default()
    };
    Trainer::new(trainer_spec, normalizer_spec)
        .unwrap()
        .train(corpus())
        .unwrap()
}

#[test]
fn test_trained_vocab_size_is_exact() {
    let model = train(24);
    assert_eq!(model.pieces.len(), 24);
    assert_eq!(model.trainer_spec.vocab_size, 24);
}

#[test]
fn test_control_symbol_is_control() {
    let model = train(24);
    let processor = Processor::from_model(model).unwrap();
    let ctrl = processor.piece_to_id("<ctrl>");
    assert_eq!(ctrl, 3);
    assert!(processor.is_control(ctrl));
    assert!(processor.is_unknown(processor.piece_to_id("<unk>")));
}

#[test]
fn test_required_chars_are_pieces() {
    let model = train(24);
    let processor = Processor::from_model(model).unwrap();
    for c in ["h", "e", "l", "o", "p", "s", "f", "r", "d", "▁"] {
        assert_ne!(processor.piece_to_id(c), processor.unk_id(), "missing {c:?}");
    }
}

#[test]
fn test_frequent_subwords_are_learned() {
    let model = train(24);
    let pieces = model.pieces.iter().map(|p| p.piece.as_str()).collect::<Vec<_>>();
    // The corpus is dominated by these stems.
    assert!(pieces.iter().any(|p| p.contains("el")), "{pieces:?}");
}

#[test]
fn test_encode_is_lossless_after_training() {
    let model = train(24);
    let processor = Processor::from_model(model).unwrap();
    for input in ["hello shelf", "spelled", "hhhh", "shell seller hello"] {
        check_lossless(&processor, input);
    }
}

#[test]
fn test_scores_are_log_probabilities() {
    let model = train(24);
    let total: f64 = model
        .pieces
        .iter()
        .filter(|p| p.kind == unipiece::PieceType::Normal)
        .map(|p| (p.score as f64).exp())
        .sum();
    // Normal piece probabilities stay within the simplex; required
    // chars re-added with penalty scores may push slightly above one.
    assert!(total > 0.1 && total < 2.0, "{total}");
}

#[test]
fn test_save_load_round_trip() {
    let model = train(24);
    let processor = Processor::from_model(model.clone()).unwrap();
    let restored = Model::from_record(&model.to_record()).unwrap();
    assert_eq!(model, restored);
    let restored_processor = Processor::from_model(restored).unwrap();
    for input in ["hello", "shelf help", "unknown input"] {
        assert_eq!(
            processor.encode_ids(input).unwrap(),
            restored_processor.encode_ids(input).unwrap()
        );
    }
}

#[test]
fn test_vocab_tsv_has_one_line_per_piece() {
    let model = train(24);
    let tsv = model.to_vocab_tsv();
    assert_eq!(tsv.lines().count(), 24);
    assert!(tsv.lines().next().unwrap().starts_with("<unk>\t"));
}

#[test]
fn test_training_deterministic() {
    let first = train(24);
    let second = train(24);
    assert_eq!(first, second);
}
