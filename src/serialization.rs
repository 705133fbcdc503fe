//! Reading and writing the model artifact.
//!
//! The artifact is one length-delimited binary record (a varint byte
//! length followed by the message) in the canonical Protocol Buffers
//! wire format. Loaders skip unknown fields by wire type, so records
//! written by newer revisions load losslessly minus the new fields.
//!
//! Field numbers, fixed forever:
//! - `Model`: pieces=1, trainer_spec=2, normalizer_spec=3,
//!   self_test_data=4, denormalizer_spec=5.
//! - `Piece`: piece=1, score=2, kind=3.
//! - `TrainerSpec`: input=1, input_format=2, model_type=3, vocab_size=4,
//!   character_coverage=5, max_piece_length=6, num_sub_iterations=7,
//!   num_threads=8, shrinking_factor=9, max_sentence_length=10,
//!   input_sentence_size=11, shuffle_input_sentence=12,
//!   seed_piece_size=13, self_test_sample_size=14,
//!   split_by_unicode_script=15, split_by_number=16,
//!   split_by_whitespace=17, split_digits=18,
//!   treat_whitespace_as_suffix=19, allow_whitespace_only_pieces=20,
//!   hard_vocab_limit=21, use_all_vocab=22, byte_fallback=23,
//!   required_chars=24, pretokenization_delimiter=25,
//!   vocabulary_output_piece_score=26, unk_id=27, bos_id=28, eos_id=29,
//!   pad_id=30, unk_piece=31, bos_piece=32, eos_piece=33, pad_piece=34,
//!   unk_surface=35, control_symbols=36, user_defined_symbols=37.
//! - `NormalizerSpec`: name=1, precompiled_charsmap=2,
//!   add_dummy_prefix=3, remove_extra_whitespaces=4,
//!   escape_whitespaces=5, normalization_rule_tsv=6.
//! - `SelfTestData`: samples=1 with `Sample`: input=1, expected=2.

use crate::model::{
    Model, ModelType, NormalizerSpec, Piece, PieceType, SelfTestData, SelfTestSample, TrainerSpec,
};
use crate::{Error, Result};

const WIRE_VARINT: u8 = 0;
const WIRE_FIXED64: u8 = 1;
const WIRE_LEN: u8 = 2;
const WIRE_FIXED32: u8 = 5;

#[inline(never)]
fn broken() -> Error {
    Error::internal("model record is broken")
}

#[derive(Default)]
struct Writer {
    buf: Vec<u8>,
}
impl Writer {
    #[inline(always)]
    fn put_varint(&mut self, mut value: u64) {
        loop {
            let byte = (value & 0x7F) as u8;
            value >>= 7;
            if value == 0 {
                self.buf.push(byte);
                break;
            }
            self.buf.push(byte | 0x80);
        }
    }

    #[inline(always)]
    fn put_tag(&mut self, field: u32, wire: u8) {
        self.put_varint(((field as u64) << 3) | wire as u64);
    }

    #[inline(always)]
    fn put_u64(&mut self, field: u32, value: u64) {
        self.put_tag(field, WIRE_VARINT);
        self.put_varint(value);
    }

    #[inline(always)]
    fn put_i32(&mut self, field: u32, value: i32) {
        // int32 semantics: negatives are sign-extended to ten bytes.
        self.put_u64(field, value as i64 as u64);
    }

    #[inline(always)]
    fn put_bool(&mut self, field: u32, value: bool) {
        self.put_u64(field, value as u64);
    }

    #[inline(always)]
    fn put_f32(&mut self, field: u32, value: f32) {
        self.put_tag(field, WIRE_FIXED32);
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    #[inline(always)]
    fn put_f64(&mut self, field: u32, value: f64) {
        self.put_tag(field, WIRE_FIXED64);
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    #[inline(always)]
    fn put_bytes(&mut self, field: u32, value: &[u8]) {
        self.put_tag(field, WIRE_LEN);
        self.put_varint(value.len() as u64);
        self.buf.extend_from_slice(value);
    }

    #[inline(always)]
    fn put_str(&mut self, field: u32, value: &str) {
        self.put_bytes(field, value.as_bytes());
    }

    #[inline(always)]
    fn put_message(&mut self, field: u32, message: Writer) {
        self.put_bytes(field, &message.buf);
    }
}

struct Reader<'a> {
    data: &'a [u8],
    pos:  usize,
}
impl<'a> Reader<'a> {
    #[inline(always)]
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    #[inline(always)]
    fn done(&self) -> bool {
        self.pos >= self.data.len()
    }

    #[inline(never)]
    fn read_varint(&mut self) -> Result<u64> {
        let mut value = 0u64;
        let mut shift = 0u32;
        loop {
            let &byte = self.data.get(self.pos).ok_or_else(broken)?;
            self.pos += 1;
            if shift < 64 {
                value |= ((byte & 0x7F) as u64) << shift;
            }
            if byte & 0x80 == 0 {
                return Ok(value);
            }
            shift += 7;
            if shift > 70 {
                return Err(broken());
            }
        }
    }

    #[inline(never)]
    fn read_tag(&mut self) -> Result<Option<(u32, u8)>> {
        if self.done() {
            return Ok(None);
        }
        let tag = self.read_varint()?;
        let field = (tag >> 3) as u32;
        let wire = (tag & 7) as u8;
        if field == 0 {
            return Err(broken());
        }
        Ok(Some((field, wire)))
    }

    #[inline(never)]
    fn read_bytes(&mut self) -> Result<&'a [u8]> {
        let len = self.read_varint()? as usize;
        let end = self.pos.checked_add(len).ok_or_else(broken)?;
        if end > self.data.len() {
            return Err(broken());
        }
        let bytes = &self.data[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    #[inline(never)]
    fn read_str(&mut self) -> Result<String> {
        let bytes = self.read_bytes()?;
        String::from_utf8(bytes.to_vec()).map_err(|_| broken())
    }

    #[inline(never)]
    fn read_f32(&mut self) -> Result<f32> {
        let end = self.pos.checked_add(4).ok_or_else(broken)?;
        if end > self.data.len() {
            return Err(broken());
        }
        let mut bytes = [0u8; 4];
        bytes.copy_from_slice(&self.data[self.pos..end]);
        self.pos = end;
        Ok(f32::from_le_bytes(bytes))
    }

    #[inline(never)]
    fn read_f64(&mut self) -> Result<f64> {
        let end = self.pos.checked_add(8).ok_or_else(broken)?;
        if end > self.data.len() {
            return Err(broken());
        }
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&self.data[self.pos..end]);
        self.pos = end;
        Ok(f64::from_le_bytes(bytes))
    }

    /// Skips one value of the given wire type.
    #[inline(never)]
    fn skip(&mut self, wire: u8) -> Result<()> {
        match wire {
            WIRE_VARINT => {
                self.read_varint()?;
            }
            WIRE_FIXED64 => {
                self.read_f64()?;
            }
            WIRE_LEN => {
                self.read_bytes()?;
            }
            WIRE_FIXED32 => {
                self.read_f32()?;
            }
            _ => return Err(broken()),
        }
        Ok(())
    }
}

#[inline(never)]
fn encode_piece(piece: &Piece) -> Writer {
    let mut w = Writer::default();
    w.put_str(1, &piece.piece);
    w.put_f32(2, piece.score);
    w.put_u64(3, piece.kind as u64);
    w
}

#[inline(never)]
fn decode_piece(data: &[u8]) -> Result<Piece> {
    let mut r = Reader::new(data);
    let mut piece = Piece::normal("", 0.0);
    while let Some((field, wire)) = r.read_tag()? {
        match (field, wire) {
            (1, WIRE_LEN) => piece.piece = r.read_str()?,
            (2, WIRE_FIXED32) => piece.score = r.read_f32()?,
            (3, WIRE_VARINT) => {
                piece.kind = PieceType::from_wire(r.read_varint()?).ok_or_else(broken)?;
            }
            _ => r.skip(wire)?,
        }
    }
    Ok(piece)
}

#[inline(never)]
fn encode_trainer_spec(spec: &TrainerSpec) -> Writer {
    let mut w = Writer::default();
    for input in &spec.input {
        w.put_str(1, input);
    }
    w.put_str(2, &spec.input_format);
    w.put_u64(3, spec.model_type as u64);
    w.put_i32(4, spec.vocab_size);
    w.put_f64(5, spec.character_coverage);
    w.put_u64(6, spec.max_piece_length as u64);
    w.put_u64(7, spec.num_sub_iterations as u64);
    w.put_u64(8, spec.num_threads as u64);
    w.put_f64(9, spec.shrinking_factor);
    w.put_u64(10, spec.max_sentence_length as u64);
    w.put_u64(11, spec.input_sentence_size);
    w.put_bool(12, spec.shuffle_input_sentence);
    w.put_u64(13, spec.seed_piece_size as u64);
    w.put_u64(14, spec.self_test_sample_size as u64);
    w.put_bool(15, spec.split_by_unicode_script);
    w.put_bool(16, spec.split_by_number);
    w.put_bool(17, spec.split_by_whitespace);
    w.put_bool(18, spec.split_digits);
    w.put_bool(19, spec.treat_whitespace_as_suffix);
    w.put_bool(20, spec.allow_whitespace_only_pieces);
    w.put_bool(21, spec.hard_vocab_limit);
    w.put_bool(22, spec.use_all_vocab);
    w.put_bool(23, spec.byte_fallback);
    w.put_str(24, &spec.required_chars);
    w.put_str(25, &spec.pretokenization_delimiter);
    w.put_bool(26, spec.vocabulary_output_piece_score);
    w.put_i32(27, spec.unk_id);
    w.put_i32(28, spec.bos_id);
    w.put_i32(29, spec.eos_id);
    w.put_i32(30, spec.pad_id);
    w.put_str(31, &spec.unk_piece);
    w.put_str(32, &spec.bos_piece);
    w.put_str(33, &spec.eos_piece);
    w.put_str(34, &spec.pad_piece);
    w.put_str(35, &spec.unk_surface);
    for symbol in &spec.control_symbols {
        w.put_str(36, symbol);
    }
    for symbol in &spec.user_defined_symbols {
        w.put_str(37, symbol);
    }
    w
}

#[inline(never)]
fn decode_trainer_spec(data: &[u8]) -> Result<TrainerSpec> {
    let mut r = Reader::new(data);
    let mut spec = TrainerSpec {
        input: Vec::new(),
        control_symbols: Vec::new(),
        user_defined_symbols: Vec::new(),
        ..TrainerSpec::default()
    };
    while let Some((field, wire)) = r.read_tag()? {
        match (field, wire) {
            (1, WIRE_LEN) => spec.input.push(r.read_str()?),
            (2, WIRE_LEN) => spec.input_format = r.read_str()?,
            (3, WIRE_VARINT) => {
                spec.model_type = ModelType::from_wire(r.read_varint()?).ok_or_else(broken)?;
            }
            (4, WIRE_VARINT) => spec.vocab_size = r.read_varint()? as i32,
            (5, WIRE_FIXED64) => spec.character_coverage = r.read_f64()?,
            (6, WIRE_VARINT) => spec.max_piece_length = r.read_varint()? as usize,
            (7, WIRE_VARINT) => spec.num_sub_iterations = r.read_varint()? as usize,
            (8, WIRE_VARINT) => spec.num_threads = r.read_varint()? as usize,
            (9, WIRE_FIXED64) => spec.shrinking_factor = r.read_f64()?,
            (10, WIRE_VARINT) => spec.max_sentence_length = r.read_varint()? as usize,
            (11, WIRE_VARINT) => spec.input_sentence_size = r.read_varint()?,
            (12, WIRE_VARINT) => spec.shuffle_input_sentence = r.read_varint()? != 0,
            (13, WIRE_VARINT) => spec.seed_piece_size = r.read_varint()? as usize,
            (14, WIRE_VARINT) => spec.self_test_sample_size = r.read_varint()? as usize,
            (15, WIRE_VARINT) => spec.split_by_unicode_script = r.read_varint()? != 0,
            (16, WIRE_VARINT) => spec.split_by_number = r.read_varint()? != 0,
            (17, WIRE_VARINT) => spec.split_by_whitespace = r.read_varint()? != 0,
            (18, WIRE_VARINT) => spec.split_digits = r.read_varint()? != 0,
            (19, WIRE_VARINT) => spec.treat_whitespace_as_suffix = r.read_varint()? != 0,
            (20, WIRE_VARINT) => spec.allow_whitespace_only_pieces = r.read_varint()? != 0,
            (21, WIRE_VARINT) => spec.hard_vocab_limit = r.read_varint()? != 0,
            (22, WIRE_VARINT) => spec.use_all_vocab = r.read_varint()? != 0,
            (23, WIRE_VARINT) => spec.byte_fallback = r.read_varint()? != 0,
            (24, WIRE_LEN) => spec.required_chars = r.read_str()?,
            (25, WIRE_LEN) => spec.pretokenization_delimiter = r.read_str()?,
            (26, WIRE_VARINT) => spec.vocabulary_output_piece_score = r.read_varint()? != 0,
            (27, WIRE_VARINT) => spec.unk_id = r.read_varint()? as i64 as i32,
            (28, WIRE_VARINT) => spec.bos_id = r.read_varint()? as i64 as i32,
            (29, WIRE_VARINT) => spec.eos_id = r.read_varint()? as i64 as i32,
            (30, WIRE_VARINT) => spec.pad_id = r.read_varint()? as i64 as i32,
            (31, WIRE_LEN) => spec.unk_piece = r.read_str()?,
            (32, WIRE_LEN) => spec.bos_piece = r.read_str()?,
            (33, WIRE_LEN) => spec.eos_piece = r.read_str()?,
            (34, WIRE_LEN) => spec.pad_piece = r.read_str()?,
            (35, WIRE_LEN) => spec.unk_surface = r.read_str()?,
            (36, WIRE_LEN) => spec.control_symbols.push(r.read_str()?),
            (37, WIRE_LEN) => spec.user_defined_symbols.push(r.read_str()?),
            _ => r.skip(wire)?,
        }
    }
    Ok(spec)
}

#[inline(never)]
fn encode_normalizer_spec(spec: &NormalizerSpec) -> Writer {
    let mut w = Writer::default();
    w.put_str(1, &spec.name);
    w.put_bytes(2, &spec.precompiled_charsmap);
    w.put_bool(3, spec.add_dummy_prefix);
    w.put_bool(4, spec.remove_extra_whitespaces);
    w.put_bool(5, spec.escape_whitespaces);
    w.put_str(6, &spec.normalization_rule_tsv);
    w
}

#[inline(never)]
fn decode_normalizer_spec(data: &[u8]) -> Result<NormalizerSpec> {
    let mut r = Reader::new(data);
    let mut spec = NormalizerSpec::default();
    while let Some((field, wire)) = r.read_tag()? {
        match (field, wire) {
            (1, WIRE_LEN) => spec.name = r.read_str()?,
            (2, WIRE_LEN) => spec.precompiled_charsmap = r.read_bytes()?.to_vec(),
            (3, WIRE_VARINT) => spec.add_dummy_prefix = r.read_varint()? != 0,
            (4, WIRE_VARINT) => spec.remove_extra_whitespaces = r.read_varint()? != 0,
            (5, WIRE_VARINT) => spec.escape_whitespaces = r.read_varint()? != 0,
            (6, WIRE_LEN) => spec.normalization_rule_tsv = r.read_str()?,
            _ => r.skip(wire)?,
        }
    }
    Ok(spec)
}

#[inline(never)]
fn encode_self_test_data(data: &SelfTestData) -> Writer {
    let mut w = Writer::default();
    for sample in &data.samples {
        let mut sw = Writer::default();
        sw.put_str(1, &sample.input);
        sw.put_str(2, &sample.expected);
        w.put_message(1, sw);
    }
    w
}

#[inline(never)]
fn decode_self_test_data(data: &[u8]) -> Result<SelfTestData> {
    let mut r = Reader::new(data);
    let mut result = SelfTestData::default();
    while let Some((field, wire)) = r.read_tag()? {
        match (field, wire) {
            (1, WIRE_LEN) => {
                let bytes = r.read_bytes()?;
                let mut sr = Reader::new(bytes);
                let mut sample = SelfTestSample::default();
                while let Some((sfield, swire)) = sr.read_tag()? {
                    match (sfield, swire) {
                        (1, WIRE_LEN) => sample.input = sr.read_str()?,
                        (2, WIRE_LEN) => sample.expected = sr.read_str()?,
                        _ => sr.skip(swire)?,
                    }
                }
                result.samples.push(sample);
            }
            _ => r.skip(wire)?,
        }
    }
    Ok(result)
}

impl Model {
    /// Serializes the model as one length-delimited record.
    #[inline(never)]
    pub fn to_record(&self) -> Vec<u8> {
        let mut message = Writer::default();
        for piece in &self.pieces {
            message.put_message(1, encode_piece(piece));
        }
        message.put_message(2, encode_trainer_spec(&self.trainer_spec));
        message.put_message(3, encode_normalizer_spec(&self.normalizer_spec));
        if let Some(data) = &self.self_test_data {
            message.put_message(4, encode_self_test_data(data));
        }
        if let Some(spec) = &self.denormalizer_spec {
            message.put_message(5, encode_normalizer_spec(spec));
        }
        let mut record = Writer::default();
        record.put_varint(message.buf.len() as u64);
        record.buf.extend_from_slice(&message.buf);
        record.buf
    }

    /// Deserializes a model record.
    ///
    /// Accepts the length-delimited form and, for robustness, a bare
    /// message. Unknown fields are skipped; structural damage is an
    /// internal error.
    #[inline(never)]
    pub fn from_record(data: &[u8]) -> Result<Self> {
        let mut r = Reader::new(data);
        let message = match r.read_varint() {
            Ok(len) if len as usize == data.len() - r.pos => &data[r.pos..],
            _ => data,
        };
        let mut r = Reader::new(message);
        let mut model = Model {
            pieces: Vec::new(),
            ..Model::default()
        };
        while let Some((field, wire)) = r.read_tag()? {
            match (field, wire) {
                (1, WIRE_LEN) => model.pieces.push(decode_piece(r.read_bytes()?)?),
                (2, WIRE_LEN) => model.trainer_spec = decode_trainer_spec(r.read_bytes()?)?,
                (3, WIRE_LEN) => model.normalizer_spec = decode_normalizer_spec(r.read_bytes()?)?,
                (4, WIRE_LEN) => {
                    model.self_test_data = Some(decode_self_test_data(r.read_bytes()?)?);
                }
                (5, WIRE_LEN) => {
                    model.denormalizer_spec = Some(decode_normalizer_spec(r.read_bytes()?)?);
                }
                _ => r.skip(wire)?,
            }
        }
        Ok(model)
    }

    /// Writes the model record to a file.
    #[inline(never)]
    pub fn to_file<P: AsRef<std::path::Path>>(&self, path: P) -> Result<()> {
        std::fs::write(path, self.to_record())?;
        Ok(())
    }

    /// Reads a model record from a file.
    #[inline(never)]
    pub fn from_file<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let data = std::fs::read(path)?;
        Self::from_record(&data)
    }

    /// Renders the vocabulary as TSV, one `piece\tscore` line per id.
    #[inline(never)]
    pub fn to_vocab_tsv(&self) -> String {
        let mut out = String::new();
        for piece in &self.pieces {
            out.push_str(&escape_piece(&piece.piece));
            if self.trainer_spec.vocabulary_output_piece_score {
                out.push('\t');
                out.push_str(&piece.score.to_string());
            }
            out.push('\n');
        }
        out
    }
}

/// Escapes a piece for the vocabulary file: the whitespace controls
/// become plain spaces and the remaining non-printables are escaped.
#[inline(never)]
fn escape_piece(piece: &str) -> String {
    let mut out = String::with_capacity(piece.len());
    for c in piece.chars() {
        match c {
            '\n' | '\r' | '\x0B' | '\x0C' | '\x08' => out.push(' '),
            c if c.is_control() => out.extend(c.escape_default()),
            c => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::PieceType;

    fn toy_model() -> Model {
        Model {
            trainer_spec: TrainerSpec {
                vocab_size: 4,
                model_type: ModelType::Bpe,
                pad_id: -1,
                control_symbols: Vec::from(["<ctrl>".to_string()]),
                ..TrainerSpec::default()
            },
            normalizer_spec: NormalizerSpec {
                precompiled_charsmap: Vec::from([1u8, 2, 3]),
                ..NormalizerSpec::identity()
            },
            pieces: Vec::from([
                Piece::reserved("<unk>", PieceType::Unknown),
                Piece::reserved("<s>", PieceType::Control),
                Piece::reserved("</s>", PieceType::Control),
                Piece::normal("ab", -3.0),
            ]),
            denormalizer_spec: None,
            self_test_data: Some(SelfTestData {
                samples: Vec::from([SelfTestSample {
                    input:    "ab".to_string(),
                    expected: "ab".to_string(),
                }]),
            }),
        }
    }

    #[test]
    fn test_record_round_trip() {
        let model = toy_model();
        let record = model.to_record();
        let restored = Model::from_record(&record).unwrap();
        assert_eq!(model, restored);
    }

    #[test]
    fn test_negative_ids_round_trip() {
        let model = toy_model();
        let restored = Model::from_record(&model.to_record()).unwrap();
        assert_eq!(restored.trainer_spec.pad_id, -1);
    }

    #[test]
    fn test_unknown_fields_are_skipped() {
        let model = toy_model();
        let mut record = model.to_record();
        // Append an unknown length-delimited field (number 1000) to the
        // embedded message and fix up the length prefix.
        let mut w = Writer::default();
        w.put_bytes(1000, b"future data");
        record.extend_from_slice(&w.buf);
        let message_len = {
            let mut r = Reader::new(&record);
            let _ = r.read_varint().unwrap();
            record.len() - r.pos
        };
        let mut fixed = Writer::default();
        fixed.put_varint(message_len as u64);
        let mut r = Reader::new(&record);
        let _ = r.read_varint().unwrap();
        fixed.buf.extend_from_slice(&record[r.pos..]);
        let restored = Model::from_record(&fixed.buf).unwrap();
        assert_eq!(model, restored);
    }

    #[test]
    fn test_truncated_record_is_broken() {
        let record = toy_model().to_record();
        let err = Model::from_record(&record[..record.len() / 2]).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Internal);
    }

    #[test]
    fn test_vocab_tsv() {
        let model = toy_model();
        let tsv = model.to_vocab_tsv();
        let lines = tsv.lines().collect::<Vec<_>>();
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0], "<unk>\t0");
        assert_eq!(lines[3], "ab\t-3");
    }

    #[test]
    fn test_escape_piece() {
        assert_eq!(escape_piece("a\nb"), "a b");
        assert_eq!(escape_piece("a\u{1}b"), "a\\u{1}b");
        assert_eq!(escape_piece("▁ab"), "▁ab");
    }
}
