//! The lip-reading and audio speech-to-text models are opaque, externally
//! supplied components; this crate only depends on the [`Transcriber`]
//! interface that turns decoded media into text deltas for
//! [`crate::caption::CaptionFanOut`].

use uuid::Uuid;

use crate::models::ModelPreference;

pub struct TranscriptDelta {
    pub speaker_id: Uuid,
    pub text: String,
    pub source: ModelPreference,
}

pub trait Transcriber: Send {
    /// Called by the media ingest loop for every decoded frame/chunk.
    /// Returns `Some` when enough signal has accumulated to emit a delta.
    fn on_frame(&mut self, speaker_id: Uuid) -> Option<TranscriptDelta>;
}

/// Replays a fixed sequence of deltas, one per call to `on_frame`, then
/// returns `None` forever. Used to exercise the caption fan-out path
/// without a real inference model.
pub struct ScriptedTranscriber {
    source: ModelPreference,
    script: std::collections::VecDeque<String>,
}

impl ScriptedTranscriber {
    pub fn new(source: ModelPreference, script: Vec<String>) -> Self {
        ScriptedTranscriber {
            source,
            script: script.into(),
        }
    }
}

impl Transcriber for ScriptedTranscriber {
    fn on_frame(&mut self, speaker_id: Uuid) -> Option<TranscriptDelta> {
        self.script.pop_front().map(|text| TranscriptDelta {
            speaker_id,
            text,
            source: self.source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scripted_transcriber_replays_in_order_then_stops() {
        let mut transcriber = ScriptedTranscriber::new(
            ModelPreference::Lip,
            vec!["hello".to_string(), "world".to_string()],
        );
        let speaker = Uuid::new_v4();
        assert_eq!(transcriber.on_frame(speaker).unwrap().text, "hello");
        assert_eq!(transcriber.on_frame(speaker).unwrap().text, "world");
        assert!(transcriber.on_frame(speaker).is_none());
    }
}
