//! Packs detected speech into bounded segments.
//!
//! Intervals are greedily accumulated into a running segment, which is closed
//! when the next interval would push it past `max_segment_seconds` or when the
//! silence before the next interval reaches `min_silence_gap_seconds`. Splits
//! only happen at silence, except for a single interval that is itself longer
//! than the ceiling: that one is cut near a local energy minimum if one can be
//! found inside the search window, otherwise exactly at the ceiling.

use super::pcm::{PcmAudio, SampleSpan};
use super::vad::SpeechInterval;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Frame length used when searching for an energy minimum.
const SEARCH_FRAME_MS: usize = 10;

/// Which candidate wins when several frames share the minimum energy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TieBreak {
    /// The candidate closest to the hard boundary (longest piece).
    #[default]
    NearestBoundary,
    /// The candidate furthest from the hard boundary.
    Earliest,
}

impl FromStr for TieBreak {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "nearest-boundary" | "nearest" | "latest" => Ok(TieBreak::NearestBoundary),
            "earliest" => Ok(TieBreak::Earliest),
            other => Err(format!("unknown tie-break rule '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ForceSplitPolicy {
    /// How far before the hard boundary to look for an energy minimum.
    pub search_window_seconds: f64,
    /// A frame counts as a minimum only if its RMS is below this fraction of
    /// the window's mean RMS.
    pub dip_ratio: f32,
    pub tie_break: TieBreak,
}

impl Default for ForceSplitPolicy {
    fn default() -> Self {
        Self {
            search_window_seconds: 1.0,
            dip_ratio: 0.5,
            tie_break: TieBreak::NearestBoundary,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SegmentPolicy {
    pub max_segment_seconds: f64,
    pub min_silence_gap_seconds: f64,
    /// Segments shorter than this are dropped. Zero keeps everything.
    pub min_segment_seconds: f64,
    pub force_split: ForceSplitPolicy,
}

impl Default for SegmentPolicy {
    fn default() -> Self {
        Self {
            max_segment_seconds: 30.0,
            min_silence_gap_seconds: 0.3,
            min_segment_seconds: 0.0,
            force_split: ForceSplitPolicy::default(),
        }
    }
}

/// Plan segment boundaries, in sample indices, for the given speech intervals.
///
/// The result is ordered, disjoint, and every span is at most
/// `max_segment_seconds` long.
pub fn plan_segments(
    intervals: &[SpeechInterval],
    audio: &PcmAudio,
    policy: &SegmentPolicy,
) -> Vec<SampleSpan> {
    let max_len = audio.samples_within(policy.max_segment_seconds);
    if max_len == 0 {
        return Vec::new();
    }
    let min_gap = audio.seconds_to_sample(policy.min_silence_gap_seconds);
    let min_len = audio.seconds_to_sample(policy.min_segment_seconds);

    let pieces: Vec<SampleSpan> = normalize(intervals, audio)
        .into_iter()
        .flat_map(|span| force_split(span, max_len, audio, &policy.force_split))
        .collect();

    let mut segments = Vec::new();
    let mut current: Option<SampleSpan> = None;
    for piece in pieces {
        current = match current {
            None => Some(piece),
            Some(open) => {
                let gap = piece.start - open.end;
                if gap >= min_gap || piece.end - open.start > max_len {
                    segments.push(open);
                    Some(piece)
                } else {
                    Some(SampleSpan::new(open.start, piece.end))
                }
            }
        };
    }
    segments.extend(current);

    segments.retain(|span| !span.is_empty() && span.len() >= min_len);
    segments
}

/// Converts to samples, clamps to the buffer, sorts, and merges overlaps.
fn normalize(intervals: &[SpeechInterval], audio: &PcmAudio) -> Vec<SampleSpan> {
    let mut spans: Vec<SampleSpan> = intervals
        .iter()
        .filter(|iv| iv.start.is_finite() && iv.end.is_finite())
        .map(|iv| SampleSpan::new(audio.seconds_to_sample(iv.start), audio.seconds_to_sample(iv.end)))
        .filter(|span| !span.is_empty())
        .collect();
    spans.sort_by_key(|span| span.start);

    let mut merged: Vec<SampleSpan> = Vec::with_capacity(spans.len());
    for span in spans {
        match merged.last_mut() {
            Some(prev) if span.start <= prev.end => prev.end = prev.end.max(span.end),
            _ => merged.push(span),
        }
    }
    merged
}

fn force_split(
    span: SampleSpan,
    max_len: usize,
    audio: &PcmAudio,
    policy: &ForceSplitPolicy,
) -> Vec<SampleSpan> {
    let mut pieces = Vec::new();
    let mut start = span.start;
    while span.end - start > max_len {
        let hard = start + max_len;
        let cut = find_cut(start, hard, audio, policy).unwrap_or(hard);
        pieces.push(SampleSpan::new(start, cut));
        start = cut;
    }
    pieces.push(SampleSpan::new(start, span.end));
    pieces
}

/// Looks for the quietest frame in `[hard - window, hard)` and returns its start.
fn find_cut(start: usize, hard: usize, audio: &PcmAudio, policy: &ForceSplitPolicy) -> Option<usize> {
    let frame = (audio.sample_rate() as usize * SEARCH_FRAME_MS / 1000).max(1);
    let window = audio.seconds_to_sample(policy.search_window_seconds);
    // Keep at least one frame in the piece being cut off.
    let lower = hard.saturating_sub(window).max(start + frame);
    if lower + frame > hard {
        return None;
    }

    let mut frames = Vec::new();
    let mut offset = lower;
    while offset + frame <= hard {
        frames.push((offset, audio.rms(SampleSpan::new(offset, offset + frame))));
        offset += frame;
    }

    let mean = frames.iter().map(|(_, rms)| *rms).sum::<f32>() / frames.len() as f32;
    let min = frames.iter().map(|(_, rms)| *rms).fold(f32::INFINITY, f32::min);
    if mean <= 0.0 || min >= mean * policy.dip_ratio {
        return None;
    }

    let mut candidates = frames.iter().filter(|(_, rms)| *rms == min).map(|(at, _)| *at);
    match policy.tie_break {
        TieBreak::NearestBoundary => candidates.last(),
        TieBreak::Earliest => candidates.next(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::audio::pcm::fixtures::{tone_and_silence, RATE};

    fn seconds(audio: &PcmAudio, spans: &[SampleSpan]) -> Vec<(f64, f64)> {
        spans
            .iter()
            .map(|s| (audio.sample_to_seconds(s.start), audio.sample_to_seconds(s.end)))
            .collect()
    }

    #[test]
    fn test_silence_gap_splits_segments() {
        let audio = tone_and_silence(&[(20.0, true), (0.3, false), (21.7, true)]);
        let intervals = [SpeechInterval::new(0.0, 20.0), SpeechInterval::new(20.3, 42.0)];
        let spans = plan_segments(&intervals, &audio, &SegmentPolicy::default());
        assert_eq!(seconds(&audio, &spans), vec![(0.0, 20.0), (20.3, 42.0)]);
    }

    #[test]
    fn test_short_gaps_are_packed_together() {
        let audio = PcmAudio::new(vec![0; RATE as usize * 20], RATE);
        let intervals = [
            SpeechInterval::new(0.0, 4.0),
            SpeechInterval::new(4.1, 9.0),
            SpeechInterval::new(9.2, 12.0),
        ];
        let spans = plan_segments(&intervals, &audio, &SegmentPolicy::default());
        assert_eq!(seconds(&audio, &spans), vec![(0.0, 12.0)]);
    }

    #[test]
    fn test_segment_closes_before_exceeding_max() {
        let audio = PcmAudio::new(vec![0; RATE as usize * 60], RATE);
        let intervals = [
            SpeechInterval::new(0.0, 12.0),
            SpeechInterval::new(12.1, 25.0),
            SpeechInterval::new(25.1, 35.0),
        ];
        let spans = plan_segments(&intervals, &audio, &SegmentPolicy::default());
        assert_eq!(seconds(&audio, &spans), vec![(0.0, 25.0), (25.1, 35.0)]);
    }

    #[test]
    fn test_continuous_speech_is_cut_at_hard_boundary() {
        let audio = tone_and_silence(&[(95.0, true)]);
        let intervals = [SpeechInterval::new(0.0, 95.0)];
        let spans = plan_segments(&intervals, &audio, &SegmentPolicy::default());

        assert_eq!(spans.len(), 4);
        assert_eq!(
            seconds(&audio, &spans),
            vec![(0.0, 30.0), (30.0, 60.0), (60.0, 90.0), (90.0, 95.0)]
        );
        for pair in spans.windows(2) {
            assert_eq!(pair[0].end, pair[1].start);
        }
    }

    #[test]
    fn test_force_split_prefers_energy_dip() {
        // A 40 ms dip (too short for the detector) at 29.5 s inside continuous speech.
        let audio = tone_and_silence(&[(29.5, true), (0.04, false), (10.46, true)]);
        let intervals = [SpeechInterval::new(0.0, 40.0)];
        let spans = plan_segments(&intervals, &audio, &SegmentPolicy::default());

        assert_eq!(spans.len(), 2);
        let cut = audio.sample_to_seconds(spans[0].end);
        assert!((29.5..29.54).contains(&cut), "cut at {cut}");
        assert_eq!(spans[0].end, spans[1].start);
    }

    #[test]
    fn test_tie_break_rule_is_configurable() {
        let audio = tone_and_silence(&[(29.5, true), (0.04, false), (10.46, true)]);
        let intervals = [SpeechInterval::new(0.0, 40.0)];
        let nearest = plan_segments(&intervals, &audio, &SegmentPolicy::default());

        let mut policy = SegmentPolicy::default();
        policy.force_split.tie_break = TieBreak::Earliest;
        let earliest = plan_segments(&intervals, &audio, &policy);

        assert!(earliest[0].end < nearest[0].end);
        assert!(audio.sample_to_seconds(earliest[0].end) >= 29.5);
    }

    #[test]
    fn test_every_segment_respects_ceiling() {
        let audio = tone_and_silence(&[(200.0, true)]);
        let policies = [7.5, 10.0, 29.99, 30.0];
        for max in policies {
            let policy = SegmentPolicy {
                max_segment_seconds: max,
                ..SegmentPolicy::default()
            };
            let intervals = [
                SpeechInterval::new(0.0, 61.3),
                SpeechInterval::new(61.4, 130.0),
                SpeechInterval::new(131.0, 200.0),
            ];
            for span in plan_segments(&intervals, &audio, &policy) {
                assert!(audio.sample_to_seconds(span.len()) <= max, "max {max}");
            }
        }
    }

    #[test]
    fn test_overlapping_and_unsorted_intervals_are_normalized() {
        let audio = PcmAudio::new(vec![0; RATE as usize * 10], RATE);
        let intervals = [
            SpeechInterval::new(5.0, 8.0),
            SpeechInterval::new(1.0, 3.0),
            SpeechInterval::new(2.0, 4.0),
            SpeechInterval::new(9.0, 15.0),
        ];
        let spans = plan_segments(&intervals, &audio, &SegmentPolicy::default());
        assert_eq!(seconds(&audio, &spans), vec![(1.0, 4.0), (5.0, 8.0), (9.0, 10.0)]);
    }

    #[test]
    fn test_min_segment_filter() {
        let audio = PcmAudio::new(vec![0; RATE as usize * 10], RATE);
        let intervals = [SpeechInterval::new(0.0, 0.5), SpeechInterval::new(2.0, 5.0)];
        let policy = SegmentPolicy {
            min_segment_seconds: 1.0,
            ..SegmentPolicy::default()
        };
        let spans = plan_segments(&intervals, &audio, &policy);
        assert_eq!(seconds(&audio, &spans), vec![(2.0, 5.0)]);
    }

    #[test]
    fn test_tie_break_parsing() {
        assert_eq!("earliest".parse::<TieBreak>(), Ok(TieBreak::Earliest));
        assert_eq!("nearest-boundary".parse::<TieBreak>(), Ok(TieBreak::NearestBoundary));
        assert!("middle".parse::<TieBreak>().is_err());
    }
}
