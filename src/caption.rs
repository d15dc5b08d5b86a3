//! Buffers transcript lines for one call and hands the collected
//! transcript to the repository when the call ends. The actual broadcast
//! to both participants happens in [`crate::call::CallCoordinator`],
//! which owns the connections; this type only owns the buffer.

use chrono::Utc;
use uuid::Uuid;

use crate::models::{ModelPreference, TranscriptLine};

pub struct CaptionFanOut {
    #[allow(dead_code)]
    call_id: Uuid,
    #[allow(dead_code)]
    caller_id: Uuid,
    #[allow(dead_code)]
    callee_id: Uuid,
    lines: Vec<TranscriptLine>,
}

impl CaptionFanOut {
    pub fn new(call_id: Uuid, caller_id: Uuid, callee_id: Uuid) -> Self {
        CaptionFanOut {
            call_id,
            caller_id,
            callee_id,
            lines: Vec::new(),
        }
    }

    pub fn push(&mut self, speaker_id: Uuid, text: String, source: ModelPreference) -> TranscriptLine {
        let line = TranscriptLine {
            speaker_id,
            text,
            source,
            spoken_at: Utc::now(),
        };
        self.lines.push(line.clone());
        line
    }

    pub fn transcript(&self) -> &[TranscriptLine] {
        &self.lines
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_appends_and_returns_the_same_line() {
        let mut fan_out = CaptionFanOut::new(Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let line = fan_out.push(Uuid::new_v4(), "hello".to_string(), ModelPreference::Lip);
        assert_eq!(line.text, "hello");
        assert_eq!(fan_out.transcript().len(), 1);
    }

    #[test]
    fn timestamps_are_monotonic_non_decreasing() {
        let mut fan_out = CaptionFanOut::new(Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let speaker = Uuid::new_v4();
        fan_out.push(speaker, "one".to_string(), ModelPreference::Audio);
        fan_out.push(speaker, "two".to_string(), ModelPreference::Audio);
        let transcript = fan_out.transcript();
        assert!(transcript[1].spoken_at >= transcript[0].spoken_at);
    }
}
