//! Tests for the model artifact and the normalization surface mapping.

use unipiece::{
    CharsMap, ErrorKind, Model, ModelType, NormalizerSpec, Piece, PieceType, Processor,
    TrainerSpec,
};

mod util;
use util::*;

#[test]
fn test_artifact_file_round_trip() {
    init_logging();
    let model = toy_unigram_model();
    let dir = std::env::temp_dir().join("unipiece_test_artifact");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("toy.model");
    model.to_file(&path).unwrap();
    let restored = Model::from_file(&path).unwrap();
    assert_eq!(model, restored);
    std::fs::remove_file(&path).ok();
}

#[test]
fn test_missing_file_is_not_found() {
    let error = Model::from_file("/definitely/not/here.model").unwrap_err();
    assert_eq!(error.kind(), ErrorKind::NotFound);
}

#[test]
fn test_corrupt_record_is_internal() {
    let mut record = toy_unigram_model().to_record();
    record.truncate(record.len() / 3);
    assert_eq!(Model::from_record(&record).unwrap_err().kind(), ErrorKind::Internal);
}

#[test]
fn test_processor_rejects_invalid_model() {
    // No unknown piece.
    let mut model = toy_unigram_model();
    model.pieces[0].kind = PieceType::Control;
    assert_eq!(
        Processor::from_model(model).unwrap_err().kind(),
        ErrorKind::InvalidArgument
    );
}

fn charsmap_model() -> Model {
    let rules = vec![("㍿".to_string(), "株式会社".to_string())];
    let blob = CharsMap::compile(&rules).unwrap().to_blob();
    let pieces = vec![
        Piece::reserved("<unk>", PieceType::Unknown),
        Piece::reserved("<s>", PieceType::Control),
        Piece::reserved("</s>", PieceType::Control),
        Piece::normal("▁", 0.0),
        Piece::normal("株式", 0.0),
        Piece::normal("会社", 0.0),
        Piece::normal("株", -1.0),
        Piece::normal("式", -1.0),
        Piece::normal("会", -1.0),
        Piece::normal("社", -1.0),
    ];
    Model {
        trainer_spec: TrainerSpec {
            model_type: ModelType::Unigram,
            vocab_size: pieces.len() as i32,
            ..TrainerSpec::default()
        },
        normalizer_spec: NormalizerSpec {
            name: "test".to_string(),
            precompiled_charsmap: blob,
            ..NormalizerSpec::default()
        },
        pieces,
        ..Model::default()
    }
}

#[test]
fn test_expansion_surfaces() {
    // A one-to-many rewrite at byte zero: every span begins at the
    // original byte zero and only the final one covers the input.
    let processor = Processor::from_model(charsmap_model()).unwrap();
    assert_eq!(processor.normalize("㍿").unwrap(), "▁株式会社");
    let encoding = processor.encode("㍿").unwrap();
    let pieces = encoding.spans.iter().map(|s| s.piece.clone()).collect::<Vec<_>>();
    assert_eq!(pieces, vec![
        "▁".as_bytes().to_vec(),
        "株式".as_bytes().to_vec(),
        "会社".as_bytes().to_vec(),
    ]);
    let surfaces = encoding.spans.iter().map(|s| s.surface.as_str()).collect::<Vec<_>>();
    assert_eq!(surfaces, vec!["", "", "㍿"]);
}

#[test]
fn test_charsmap_survives_serialization() {
    let model = charsmap_model();
    let restored = Model::from_record(&model.to_record()).unwrap();
    let processor = Processor::from_model(restored).unwrap();
    assert_eq!(processor.normalize("㍿と㍿").unwrap(), "▁株式会社と株式会社");
}

#[test]
fn test_rule_tsv_model() {
    // A model carrying only the rule TSV compiles it on load.
    let mut model = toy_unigram_model();
    model.normalizer_spec.normalization_rule_tsv = "41\t61\n42\t62\n".to_string();
    let processor = Processor::from_model(model).unwrap();
    assert_eq!(processor.encode_pieces("ABc").unwrap(), vec!["▁", "ab", "c"]);
}

#[test]
fn test_denormalizer_applies_at_decode() {
    let rules = vec![("a".to_string(), "A".to_string())];
    let mut model = toy_unigram_model();
    model.denormalizer_spec = Some(NormalizerSpec {
        name: "denorm".to_string(),
        precompiled_charsmap: CharsMap::compile(&rules).unwrap().to_blob(),
        add_dummy_prefix: false,
        remove_extra_whitespaces: false,
        escape_whitespaces: false,
        normalization_rule_tsv: String::new(),
    });
    let processor = Processor::from_model(model).unwrap();
    assert_eq!(processor.decode_pieces(&["ab", "c"]).unwrap(), "Abc");
}
