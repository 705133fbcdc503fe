//! Tests for byte-fallback segmentation and decoding.

use unipiece::{Model, ModelType, NormalizerSpec, Piece, PieceType, Processor, TrainerSpec};

mod util;
use util::*;

fn byte_fallback_model() -> Model {
    let mut pieces = vec![
        Piece::reserved("<unk>", PieceType::Unknown),
        Piece::reserved("<s>", PieceType::Control),
        Piece::reserved("</s>", PieceType::Control),
    ];
    for byte in 0..=255u16 {
        pieces.push(Piece {
            piece: format!("<0x{byte:02X}>"),
            score: 0.0,
            kind:  PieceType::Byte,
        });
    }
    pieces.push(Piece::normal("▁", 0.0));
    pieces.push(Piece::normal("hi", 0.0));
    Model {
        trainer_spec: TrainerSpec {
            model_type: ModelType::Unigram,
            vocab_size: pieces.len() as i32,
            byte_fallback: true,
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

#[test]
fn test_unknown_chars_become_bytes() {
    init_logging();
    let processor = Processor::from_model(byte_fallback_model()).unwrap();
    let encoding = processor.encode("hi☃").unwrap();
    // ▁, hi, then one byte piece per UTF-8 byte of the snowman.
    assert_eq!(encoding.spans.len(), 5);
    let ids = encoding.ids();
    assert!(processor.is_byte(ids[2]));
    assert!(processor.is_byte(ids[3]));
    assert!(processor.is_byte(ids[4]));
    assert_eq!(processor.id_to_piece(ids[2]), "<0xE2>");
    // The span pieces stay raw bytes so concatenation is preserved.
    check_lossless(&processor, "hi☃");
}

#[test]
fn test_byte_decode_restores_text() {
    let processor = Processor::from_model(byte_fallback_model()).unwrap();
    let ids = processor.encode_ids("hi☃hi").unwrap();
    assert_eq!(processor.decode_ids(&ids).unwrap(), "hi☃hi");
}

#[test]
fn test_missing_byte_pieces_rejected() {
    let mut model = byte_fallback_model();
    // Retype one byte piece; construction must fail.
    let index = model.pieces.iter().position(|p| p.piece == "<0x41>").unwrap();
    model.pieces[index].kind = PieceType::Unused;
    assert!(Processor::from_model(model).is_err());
}
