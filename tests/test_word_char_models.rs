//! End-to-end tests for the word and char models.

use unipiece::{ModelType, NormalizerSpec, Processor, Trainer, TrainerSpec};

mod util;
use util::*;

fn train(model_type: ModelType, vocab_size: i32, use_all_vocab: bool) -> Processor {
    init_logging();
    let trainer_spec = TrainerSpec {
        model_type,
        vocab_size,
        use_all_vocab,
        ..TrainerSpec::default()
    };
    let model = Trainer::new(trainer_spec, NormalizerSpec::identity())
        .unwrap()
        .train([
            "this is a pen".to_string(),
            "this is a apple".to_string(),
            "this is it".to_string(),
        ])
        .unwrap();
    Processor::from_model(model).unwrap()
}

#[test]
fn test_word_model() {
    // 6 distinct words plus the 3 reserved pieces.
    let processor = train(ModelType::Word, 9, false);
    assert_eq!(processor.piece_size(), 9);
    let ids = processor.encode_ids("this is a pen").unwrap();
    assert_eq!(ids.len(), 4);
    assert_eq!(processor.decode_ids(&ids).unwrap(), "this is a pen");
    // Frequent words rank first after the reserved pieces.
    assert_eq!(processor.id_to_piece(3), "▁is");
    assert_eq!(processor.id_to_piece(4), "▁this");
    // Unknown words map to the unknown id.
    let ids = processor.encode_ids("this is unknownword").unwrap();
    assert_eq!(ids[2], processor.unk_id());
}

#[test]
fn test_word_model_use_all_vocab() {
    let processor = train(ModelType::Word, 100, true);
    assert_eq!(processor.piece_size(), 9);
    check_lossless(&processor, "this is a pen");
}

#[test]
fn test_char_model() {
    let processor = train(ModelType::Char, 30, false);
    // The char model shrinks the vocabulary to what the corpus holds.
    assert!(processor.piece_size() <= 30);
    let ids = processor.encode_ids("this").unwrap();
    assert_eq!(ids.len(), 5);
    assert_eq!(processor.decode_ids(&ids).unwrap(), "this");
    check_lossless(&processor, "pen apple");
    // Scores are log frequencies: more frequent chars score higher.
    let s = processor.get_score(processor.piece_to_id("s"));
    let p = processor.get_score(processor.piece_to_id("p"));
    assert!(s > p);
}

#[test]
fn test_char_model_covers_unknown_chars() {
    let processor = train(ModelType::Char, 30, false);
    let ids = processor.encode_ids("pz").unwrap();
    assert_eq!(ids[2], processor.unk_id());
}
