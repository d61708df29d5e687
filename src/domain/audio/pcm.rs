//! Mono PCM buffers and the WAV codec used for both decoding sources and
//! encoding segments.

use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use std::str::FromStr;

/// A half-open range of sample indices `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleSpan {
    pub start: usize,
    pub end: usize,
}

impl SampleSpan {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Encoding used for segment payloads. Both are lossless WAV.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SegmentFormat {
    #[default]
    Pcm16,
    Float32,
}

impl FromStr for SegmentFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pcm16" | "wav" => Ok(SegmentFormat::Pcm16),
            "float32" | "f32" => Ok(SegmentFormat::Float32),
            other => Err(format!("unknown segment format '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PcmAudio {
    samples: Vec<i16>,
    sample_rate: u32,
}

impl PcmAudio {
    pub fn new(samples: Vec<i16>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    /// Decode a WAV file of any channel count and integer or float sample format,
    /// downmixing to mono 16-bit.
    pub fn from_wav_bytes(bytes: &[u8]) -> Result<Self, hound::Error> {
        let mut reader = WavReader::new(Cursor::new(bytes))?;
        let spec = reader.spec();
        let channels = usize::from(spec.channels.max(1));

        let interleaved: Vec<i32> = match spec.sample_format {
            SampleFormat::Int => {
                let shift = u32::from(spec.bits_per_sample.saturating_sub(16));
                let widen = 16u32.saturating_sub(u32::from(spec.bits_per_sample));
                reader
                    .samples::<i32>()
                    .map(|s| s.map(|v| (v >> shift) << widen))
                    .collect::<Result<_, _>>()?
            }
            SampleFormat::Float => reader
                .samples::<f32>()
                .map(|s| s.map(|v| (v.clamp(-1.0, 1.0) * f32::from(i16::MAX)) as i32))
                .collect::<Result<_, _>>()?,
        };

        let samples = interleaved
            .chunks(channels)
            .map(|frame| {
                let sum: i32 = frame.iter().sum();
                (sum / frame.len() as i32).clamp(i32::from(i16::MIN), i32::from(i16::MAX)) as i16
            })
            .collect();

        Ok(Self::new(samples, spec.sample_rate))
    }

    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn duration_seconds(&self) -> f64 {
        self.sample_to_seconds(self.samples.len())
    }

    pub fn sample_to_seconds(&self, index: usize) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        index as f64 / f64::from(self.sample_rate)
    }

    /// Nearest sample index for a time offset, clamped to the buffer.
    pub fn seconds_to_sample(&self, seconds: f64) -> usize {
        if !seconds.is_finite() || seconds <= 0.0 {
            return 0;
        }
        let index = (seconds * f64::from(self.sample_rate)).round() as usize;
        index.min(self.samples.len())
    }

    /// Number of samples in `seconds`, truncated so it never exceeds the duration.
    pub fn samples_within(&self, seconds: f64) -> usize {
        if !seconds.is_finite() || seconds <= 0.0 {
            return 0;
        }
        let mut count = (seconds * f64::from(self.sample_rate)).floor() as usize;
        while count > 0 && self.sample_to_seconds(count) > seconds {
            count -= 1;
        }
        count
    }

    /// RMS of a sample range normalized to full scale (0.0 to 1.0).
    pub fn rms(&self, span: SampleSpan) -> f32 {
        let end = span.end.min(self.samples.len());
        if span.start >= end {
            return 0.0;
        }
        calculate_rms(&self.samples[span.start..end])
    }

    /// Encode a sample range as a standalone mono WAV file.
    pub fn encode_wav(&self, span: SampleSpan, format: SegmentFormat) -> Result<Vec<u8>, hound::Error> {
        let end = span.end.min(self.samples.len());
        let start = span.start.min(end);
        let slice = &self.samples[start..end];

        let spec = match format {
            SegmentFormat::Pcm16 => WavSpec {
                channels: 1,
                sample_rate: self.sample_rate,
                bits_per_sample: 16,
                sample_format: SampleFormat::Int,
            },
            SegmentFormat::Float32 => WavSpec {
                channels: 1,
                sample_rate: self.sample_rate,
                bits_per_sample: 32,
                sample_format: SampleFormat::Float,
            },
        };

        let mut cursor = Cursor::new(Vec::with_capacity(44 + slice.len() * 4));
        {
            let mut writer = WavWriter::new(&mut cursor, spec)?;
            match format {
                SegmentFormat::Pcm16 => {
                    for &sample in slice {
                        writer.write_sample(sample)?;
                    }
                }
                SegmentFormat::Float32 => {
                    for &sample in slice {
                        writer.write_sample(f32::from(sample) / 32768.0)?;
                    }
                }
            }
            writer.finalize()?;
        }
        Ok(cursor.into_inner())
    }
}

/// Cheap container sniffing: RIFF/WAVE header.
pub fn is_wav(bytes: &[u8]) -> bool {
    bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WAVE"
}

pub fn calculate_rms(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_squares: f64 = samples
        .iter()
        .map(|&s| {
            let normalized = f64::from(s) / 32768.0;
            normalized * normalized
        })
        .sum();
    (sum_squares / samples.len() as f64).sqrt() as f32
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::PcmAudio;

    pub const RATE: u32 = 16_000;

    /// Builds audio from `(seconds, is_speech)` runs: a 440 Hz tone for speech,
    /// digital silence otherwise.
    pub fn tone_and_silence(runs: &[(f64, bool)]) -> PcmAudio {
        let mut samples = Vec::new();
        for &(seconds, speech) in runs {
            let count = (seconds * f64::from(RATE)).round() as usize;
            for i in 0..count {
                let value = if speech {
                    let t = (samples.len() + i) as f64 / f64::from(RATE);
                    ((t * 440.0 * std::f64::consts::TAU).sin() * 16_000.0) as i16
                } else {
                    0
                };
                samples.push(value);
            }
        }
        PcmAudio::new(samples, RATE)
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::tone_and_silence;
    use super::*;

    #[test]
    fn test_wav_round_trip_preserves_samples() {
        let audio = tone_and_silence(&[(0.5, true), (0.25, false)]);
        let bytes = audio
            .encode_wav(SampleSpan::new(0, audio.len()), SegmentFormat::Pcm16)
            .unwrap();
        assert!(is_wav(&bytes));

        let decoded = PcmAudio::from_wav_bytes(&bytes).unwrap();
        assert_eq!(decoded.sample_rate(), 16_000);
        assert_eq!(decoded.samples(), audio.samples());
    }

    #[test]
    fn test_stereo_is_downmixed() {
        let spec = WavSpec {
            channels: 2,
            sample_rate: 8_000,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = WavWriter::new(&mut cursor, spec).unwrap();
            for _ in 0..100 {
                writer.write_sample(1000i16).unwrap();
                writer.write_sample(3000i16).unwrap();
            }
            writer.finalize().unwrap();
        }

        let audio = PcmAudio::from_wav_bytes(&cursor.into_inner()).unwrap();
        assert_eq!(audio.len(), 100);
        assert!(audio.samples().iter().all(|&s| s == 2000));
        assert_eq!(audio.sample_rate(), 8_000);
    }

    #[test]
    fn test_float_segment_encoding() {
        let audio = tone_and_silence(&[(0.1, true)]);
        let bytes = audio
            .encode_wav(SampleSpan::new(0, 800), SegmentFormat::Float32)
            .unwrap();
        let reader = WavReader::new(Cursor::new(bytes)).unwrap();
        assert_eq!(reader.spec().sample_format, SampleFormat::Float);
        assert_eq!(reader.len(), 800);
    }

    #[test]
    fn test_garbage_is_not_wav() {
        assert!(!is_wav(b"ID3\x03\x00\x00\x00"));
        assert!(PcmAudio::from_wav_bytes(b"not a wav file at all").is_err());
    }

    #[test]
    fn test_time_conversions() {
        let audio = PcmAudio::new(vec![0; 16_000 * 3], 16_000);
        assert_eq!(audio.duration_seconds(), 3.0);
        assert_eq!(audio.seconds_to_sample(20.3), 16_000 * 3);
        assert_eq!(audio.seconds_to_sample(1.5), 24_000);
        assert_eq!(audio.samples_within(30.0), 480_000);
        assert_eq!(audio.sample_to_seconds(324_800), 20.3);
    }

    #[test]
    fn test_rms_of_silence_and_tone() {
        let audio = tone_and_silence(&[(0.1, false), (0.1, true)]);
        assert_eq!(audio.rms(SampleSpan::new(0, 1600)), 0.0);
        assert!(audio.rms(SampleSpan::new(1600, 3200)) > 0.2);
    }
}
