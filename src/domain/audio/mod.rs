//! Audio handling: PCM codec, speech detection, and segment planning.

pub mod convert;
pub mod pcm;
pub mod planner;
pub mod vad;

pub use pcm::{PcmAudio, SampleSpan, SegmentFormat};
pub use planner::{plan_segments, ForceSplitPolicy, SegmentPolicy, TieBreak};
pub use vad::{DetectorSettings, EnergyDetector, SpeechInterval};
