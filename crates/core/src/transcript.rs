use std::collections::HashMap;

use voicelink_types::{Source, TranscriptEvent};

/// Turns incremental transcription fragments into consumer-facing events.
///
/// Fragments are deltas. Each interim event carries the utterance so far and
/// replaces the previous interim one for the same source; a final event
/// carries the whole utterance and clears it.
#[derive(Debug, Default)]
pub struct TranscriptAggregator {
    pending: HashMap<Source, String>,
}

impl TranscriptAggregator {
    pub fn accept(&mut self, fragment: TranscriptEvent) -> Option<TranscriptEvent> {
        let source = fragment.source;
        if fragment.is_final {
            let mut text = self.pending.remove(&source).unwrap_or_default();
            text.push_str(&fragment.text);
            return finalize(source, text);
        }
        if fragment.text.is_empty() {
            return None;
        }
        let text = self.pending.entry(source).or_default();
        text.push_str(&fragment.text);
        Some(TranscriptEvent::interim(source, text.clone()))
    }

    /// Finalizes whatever is pending for `source`.
    pub fn flush(&mut self, source: Source) -> Option<TranscriptEvent> {
        let text = self.pending.remove(&source)?;
        finalize(source, text)
    }

    /// Finalizes both sides at a turn boundary, user first.
    pub fn finish_turn(&mut self) -> Vec<TranscriptEvent> {
        [Source::User, Source::Model]
            .into_iter()
            .filter_map(|source| self.flush(source))
            .collect()
    }
}

fn finalize(source: Source, text: String) -> Option<TranscriptEvent> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(TranscriptEvent::final_text(source, trimmed))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interim_fragments_accumulate() {
        let mut agg = TranscriptAggregator::default();
        let first = agg.accept(TranscriptEvent::interim(Source::Model, "Hello")).unwrap();
        let second = agg.accept(TranscriptEvent::interim(Source::Model, " there")).unwrap();
        assert_eq!(first.text, "Hello");
        assert_eq!(second, TranscriptEvent::interim(Source::Model, "Hello there"));
    }

    #[test]
    fn final_supersedes_pending_interim() {
        let mut agg = TranscriptAggregator::default();
        agg.accept(TranscriptEvent::interim(Source::User, "what time"));
        let done = agg.accept(TranscriptEvent::final_text(Source::User, " is it")).unwrap();
        assert_eq!(done, TranscriptEvent::final_text(Source::User, "what time is it"));
        assert!(agg.flush(Source::User).is_none());
    }

    #[test]
    fn sources_do_not_mix() {
        let mut agg = TranscriptAggregator::default();
        agg.accept(TranscriptEvent::interim(Source::User, "hi"));
        agg.accept(TranscriptEvent::interim(Source::Model, "hello"));

        let finals = agg.finish_turn();
        assert_eq!(
            finals,
            vec![
                TranscriptEvent::final_text(Source::User, "hi"),
                TranscriptEvent::final_text(Source::Model, "hello"),
            ]
        );
        assert!(agg.finish_turn().is_empty());
    }

    #[test]
    fn blank_utterances_are_dropped() {
        let mut agg = TranscriptAggregator::default();
        assert!(agg.accept(TranscriptEvent::interim(Source::User, "")).is_none());
        assert!(agg.accept(TranscriptEvent::final_text(Source::User, "  ")).is_none());
    }
}
