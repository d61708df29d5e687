//! Energy-based voice activity detection.
//!
//! Frames whose RMS exceeds a threshold are speech. Speech runs separated by
//! less than `min_silence_seconds` are bridged, and runs shorter than
//! `min_speech_seconds` are discarded.

use super::pcm::{PcmAudio, SampleSpan};
use crate::error::Result;
use crate::ports::detector::SpeechDetector;
use serde::{Deserialize, Serialize};

/// A detected speech region, in seconds from the start of the source.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpeechInterval {
    pub start: f64,
    pub end: f64,
}

impl SpeechInterval {
    pub fn new(start: f64, end: f64) -> Self {
        Self { start, end }
    }

    pub fn duration(&self) -> f64 {
        (self.end - self.start).max(0.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectorSettings {
    /// RMS threshold for speech, relative to full scale (0.0 to 1.0).
    pub threshold: f32,
    pub frame_ms: u32,
    pub min_speech_seconds: f64,
    pub min_silence_seconds: f64,
}

impl Default for DetectorSettings {
    fn default() -> Self {
        Self {
            threshold: 0.02,
            frame_ms: 10,
            min_speech_seconds: 0.25,
            min_silence_seconds: 0.2,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct EnergyDetector {
    settings: DetectorSettings,
}

impl EnergyDetector {
    pub fn new(settings: DetectorSettings) -> Self {
        Self { settings }
    }

    fn speech_spans(&self, audio: &PcmAudio) -> Vec<SampleSpan> {
        let rate = audio.sample_rate() as usize;
        let frame = (rate * self.settings.frame_ms as usize / 1000).max(1);
        let total = audio.len();

        let mut spans: Vec<SampleSpan> = Vec::new();
        let mut open: Option<usize> = None;
        let mut offset = 0;
        while offset < total {
            let end = (offset + frame).min(total);
            let speech = audio.rms(SampleSpan::new(offset, end)) > self.settings.threshold;
            match (speech, open) {
                (true, None) => open = Some(offset),
                (false, Some(start)) => {
                    spans.push(SampleSpan::new(start, offset));
                    open = None;
                }
                _ => {}
            }
            offset = end;
        }
        if let Some(start) = open {
            spans.push(SampleSpan::new(start, total));
        }

        let min_silence = audio.seconds_to_sample(self.settings.min_silence_seconds);
        let min_speech = audio.seconds_to_sample(self.settings.min_speech_seconds);

        let mut bridged: Vec<SampleSpan> = Vec::with_capacity(spans.len());
        for span in spans {
            match bridged.last_mut() {
                Some(prev) if span.start - prev.end < min_silence => prev.end = span.end,
                _ => bridged.push(span),
            }
        }
        bridged.retain(|span| span.len() >= min_speech);
        bridged
    }
}

impl SpeechDetector for EnergyDetector {
    fn detect(&self, audio: &PcmAudio) -> Result<Vec<SpeechInterval>> {
        Ok(self
            .speech_spans(audio)
            .into_iter()
            .map(|span| {
                SpeechInterval::new(
                    audio.sample_to_seconds(span.start),
                    audio.sample_to_seconds(span.end),
                )
            })
            .collect())
    }
}
