//! Char engine: one piece per codepoint.

use core::ops::Range;

use crate::engine::{EncodeResult, ModelCore, Segmenter};
use crate::Result;

/// Char engine.
#[derive(Debug, Default)]
pub(crate) struct CharEngine {}
impl CharEngine {
    #[inline(always)]
    pub fn new() -> Self {
        Self {}
    }
}
impl Segmenter for CharEngine {
    #[inline(never)]
    fn segment(
        &self, core: &ModelCore, normalized: &str, range: Range<usize>, out: &mut EncodeResult,
    ) -> Result<()> {
        let fragment = &normalized[range.clone()];
        for (index, c) in fragment.char_indices() {
            let begin = range.start + index;
            core.emit_piece(normalized, begin..begin + c.len_utf8(), out);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Engine;
    use crate::engine::testing::{encode_pieces, model_from_pieces};
    use crate::model::ModelType;

    #[test]
    fn test_char_split() {
        let core = ModelCore::new(model_from_pieces(ModelType::Char, &[
            ("あ", -1.0),
            ("い", -2.0),
            ("a", -3.0),
        ]))
        .unwrap();
        let engine = Engine::new(&core).unwrap();
        assert_eq!(encode_pieces(&core, &engine, "あいa"), vec!["あ", "い", "a"]);
        let ids = engine
            .encode(&core, "あxい")
            .unwrap()
            .iter()
            .map(|&(_, id)| id)
            .collect::<Vec<_>>();
        assert_eq!(ids, vec![3, 0, 4]);
    }
}
