//! Word engine: whole-word lookup at meta whitespace boundaries.

use core::ops::Range;

use crate::engine::{EncodeResult, ModelCore, Segmenter};
use crate::unicode::split_into_words;
use crate::Result;

/// Word engine.
#[derive(Debug, Default)]
pub(crate) struct WordEngine {}
impl WordEngine {
    #[inline(always)]
    pub fn new() -> Self {
        Self {}
    }
}
impl Segmenter for WordEngine {
    #[inline(never)]
    fn segment(
        &self, core: &ModelCore, normalized: &str, range: Range<usize>, out: &mut EncodeResult,
    ) -> Result<()> {
        let fragment = &normalized[range.clone()];
        let spec = &core.model().trainer_spec;
        let mut offset = range.start;
        for word in split_into_words(
            fragment,
            spec.treat_whitespace_as_suffix,
            spec.allow_whitespace_only_pieces,
        ) {
            let id = core.piece_to_id(word);
            out.push((offset..offset + word.len(), id));
            offset += word.len();
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
    fn test_word_lookup() {
        let core = ModelCore::new(model_from_pieces(ModelType::Word, &[
            ("▁this", -1.0),
            ("▁is", -2.0),
            ("▁a", -3.0),
            ("▁pen", -4.0),
        ]))
        .unwrap();
        let engine = Engine::new(&core).unwrap();
        let input = "▁this▁is▁a▁pen";
        assert_eq!(encode_pieces(&core, &engine, input), vec!["▁this", "▁is", "▁a", "▁pen"]);
        let ids = engine
            .encode(&core, input)
            .unwrap()
            .iter()
            .map(|&(_, id)| id)
            .collect::<Vec<_>>();
        assert_eq!(ids, vec![3, 4, 5, 6]);
    }

    #[test]
    fn test_unknown_word() {
        let core = ModelCore::new(model_from_pieces(ModelType::Word, &[("▁this", -1.0)])).unwrap();
        let engine = Engine::new(&core).unwrap();
        let ids = engine
            .encode(&core, "▁this▁that")
            .unwrap()
            .iter()
            .map(|&(_, id)| id)
            .collect::<Vec<_>>();
        assert_eq!(ids, vec![3, 0]);
    }
}
