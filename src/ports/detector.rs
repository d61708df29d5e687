use crate::domain::audio::{PcmAudio, SpeechInterval};
use crate::error::Result;

/// Voice activity detection: given a waveform, return ordered speech regions.
#[cfg_attr(test, mockall::automock)]
pub trait SpeechDetector: Send + Sync {
    fn detect(&self, audio: &PcmAudio) -> Result<Vec<SpeechInterval>>;
}
