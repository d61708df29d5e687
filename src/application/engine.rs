use crate::domain::audio::convert::{decode_source, FfmpegConverter};
use crate::domain::audio::{plan_segments, PcmAudio, SampleSpan, SegmentFormat, SegmentPolicy};
use crate::domain::jobs::{Job, JobId};
use crate::domain::segments::{
    Segment, SegmentEntry, SegmentMetadataRecord, SinkLayout, ENGINE_VERSION,
};
use crate::error::{Error, Result};
use crate::ports::detector::SpeechDetector;
use crate::ports::processor::JobProcessor;
use crate::ports::storage::{OutputStore, SourceStore};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use tracing::{debug, info};

#[derive(Debug, Clone, Default)]
pub struct EngineSettings {
    pub policy: SegmentPolicy,
    pub format: SegmentFormat,
    pub layout: SinkLayout,
    /// Ack redeliveries of jobs whose metadata record is already in the sink
    /// instead of recomputing them.
    pub skip_completed: bool,
    pub converter: FfmpegConverter,
}

/// Downloads one source file, splits its speech into bounded segments and
/// writes them to the sink. The metadata record is written last and marks
/// the job as complete.
pub struct SegmentationEngine<S, O, D> {
    source: S,
    sink: O,
    detector: D,
    settings: EngineSettings,
}

impl<S, O, D> SegmentationEngine<S, O, D>
where
    S: SourceStore,
    O: OutputStore,
    D: SpeechDetector,
{
    pub fn new(source: S, sink: O, detector: D, settings: EngineSettings) -> Self {
        Self {
            source,
            sink,
            detector,
            settings,
        }
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    #[tracing::instrument(
        name = "segment_job",
        skip_all,
        fields(job_id = %job.job_id, key = %job.object.key, attempt = job.attempt_count)
    )]
    pub async fn process(&self, job: &Job) -> Result<SegmentMetadataRecord> {
        let layout = &self.settings.layout;
        let metadata_key = layout.metadata_key(&job.job_id);

        if self.settings.skip_completed && self.is_completed(&metadata_key).await? {
            return Err(Error::ScheduleConflict(job.job_id.to_string()));
        }

        let bytes = self.source.get(&job.object).await?;
        let extension = job.object.extension();
        let audio = decode_source(
            &job.object.key,
            &bytes,
            extension.as_deref(),
            &self.settings.converter,
        )
        .await?;
        drop(bytes);

        let intervals = self.detector.detect(&audio)?;
        let spans = plan_segments(&intervals, &audio, &self.settings.policy);
        debug!(
            intervals = intervals.len(),
            segments = spans.len(),
            duration = audio.duration_seconds(),
            "planned segments"
        );

        let mut entries = Vec::with_capacity(spans.len());
        for (index, span) in spans.into_iter().enumerate() {
            let segment = self.encode(job, &audio, index, span)?;
            let output_key = layout.segment_key(&job.job_id, index);
            self.sink
                .put_bytes(&output_key, segment.audio_payload, "audio/wav")
                .await?;
            entries.push(SegmentEntry {
                index,
                start_offset_seconds: segment.start_offset_seconds,
                duration_seconds: segment.duration_seconds,
                output_key,
            });
        }

        let record = SegmentMetadataRecord {
            job_id: job.job_id.clone(),
            source_key: job.object.key.clone(),
            collection: job.object.collection.clone(),
            total_segments: entries.len(),
            segments: entries,
            source_duration_seconds: audio.duration_seconds(),
            processing_timestamp: Utc::now(),
            engine_version: ENGINE_VERSION.to_string(),
        };
        self.sink
            .put_json(&metadata_key, &serde_json::to_value(&record)?)
            .await?;
        self.remove_stale_segments(&job.job_id, record.total_segments)
            .await?;

        info!(segments = record.total_segments, "job segmented");
        Ok(record)
    }

    fn encode(&self, job: &Job, audio: &PcmAudio, index: usize, span: SampleSpan) -> Result<Segment> {
        let payload = audio
            .encode_wav(span, self.settings.format)
            .map_err(|e| Error::sink_write(self.settings.layout.segment_key(&job.job_id, index), e))?;
        Ok(Segment {
            job_id: job.job_id.clone(),
            sequence_index: index,
            start_offset_seconds: audio.sample_to_seconds(span.start),
            duration_seconds: audio.sample_to_seconds(span.len()),
            audio_payload: Bytes::from(payload),
        })
    }

    /// Delete segments an earlier run wrote beyond the current `total`.
    async fn remove_stale_segments(&self, job_id: &JobId, total: usize) -> Result<()> {
        let layout = &self.settings.layout;
        for key in self.sink.list_keys(&layout.job_prefix(job_id)).await? {
            if layout.segment_index(job_id, &key).is_some_and(|index| index >= total) {
                debug!(key = %key, "removing stale segment");
                self.sink.delete(&key).await?;
            }
        }
        Ok(())
    }

    async fn is_completed(&self, metadata_key: &str) -> Result<bool> {
        let Some(value) = self.sink.get_json(metadata_key).await? else {
            return Ok(false);
        };
        Ok(serde_json::from_value::<SegmentMetadataRecord>(value)
            .map(|record| record.is_consistent())
            .unwrap_or(false))
    }
}

#[async_trait]
impl<S, O, D> JobProcessor for SegmentationEngine<S, O, D>
where
    S: SourceStore,
    O: OutputStore,
    D: SpeechDetector,
{
    async fn process(&self, job: &Job) -> Result<SegmentMetadataRecord> {
        SegmentationEngine::process(self, job).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::MemoryStore;
    use crate::domain::audio::pcm::fixtures::tone_and_silence;
    use crate::domain::audio::{EnergyDetector, SpeechInterval};
    use crate::domain::jobs::AudioObject;
    use crate::error::Disposition;
    use crate::ports::detector::MockSpeechDetector;
    use crate::ports::storage::MockOutputStore;

    fn wav(runs: &[(f64, bool)]) -> Vec<u8> {
        let audio = tone_and_silence(runs);
        audio
            .encode_wav(SampleSpan::new(0, audio.len()), SegmentFormat::Pcm16)
            .unwrap()
    }

    fn job(key: &str) -> Job {
        Job::new(AudioObject::from_key(key, 0, None), Utc::now())
    }

    #[tokio::test]
    async fn test_segments_then_metadata() {
        let store = MemoryStore::new();
        store.insert("amdo/file001.wav", wav(&[(20.0, true), (0.3, false), (21.7, true)]));
        let engine = SegmentationEngine::new(
            store.clone(),
            store.clone(),
            EnergyDetector::default(),
            EngineSettings::default(),
        );

        let job = job("amdo/file001.wav");
        let record = engine.process(&job).await.unwrap();
        assert_eq!(record.total_segments, 2);
        assert!(record.is_consistent());
        assert_eq!(record.collection, "amdo");
        assert!((record.segments[0].duration_seconds - 20.0).abs() < 1e-6);
        assert!((record.segments[1].start_offset_seconds - 20.3).abs() < 1e-6);

        let written = store.keys_with_prefix(&format!("{}/", job.job_id));
        assert_eq!(written.len(), 3);
        let stored = store
            .get_json(&SinkLayout::default().metadata_key(&job.job_id))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored["total_segments"], 2);
        assert_eq!(store.content_type(&record.segments[1].output_key).as_deref(), Some("audio/wav"));
    }

    #[tokio::test]
    async fn test_silent_file_still_records_completion() {
        let store = MemoryStore::new();
        store.insert("amdo/silence.wav", wav(&[(3.0, false)]));
        let engine = SegmentationEngine::new(
            store.clone(),
            store.clone(),
            EnergyDetector::default(),
            EngineSettings::default(),
        );
        let job = job("amdo/silence.wav");
        let record = engine.process(&job).await.unwrap();
        assert_eq!(record.total_segments, 0);
        assert!(store
            .get_bytes(&SinkLayout::default().metadata_key(&job.job_id))
            .is_some());
    }

    #[tokio::test]
    async fn test_rerun_with_fewer_segments_removes_the_rest() {
        let store = MemoryStore::new();
        store.insert("amdo/long.wav", wav(&[(95.0, true)]));
        let job = job("amdo/long.wav");

        let short = EngineSettings {
            policy: SegmentPolicy {
                max_segment_seconds: 10.0,
                ..SegmentPolicy::default()
            },
            ..EngineSettings::default()
        };
        let first = SegmentationEngine::new(store.clone(), store.clone(), EnergyDetector::default(), short)
            .process(&job)
            .await
            .unwrap();
        assert_eq!(first.total_segments, 10);

        let second = SegmentationEngine::new(
            store.clone(),
            store.clone(),
            EnergyDetector::default(),
            EngineSettings::default(),
        )
        .process(&job)
        .await
        .unwrap();
        assert_eq!(second.total_segments, 4);

        let layout = SinkLayout::default();
        let present: Vec<String> = store
            .keys_with_prefix(&layout.job_prefix(&job.job_id))
            .into_iter()
            .filter(|key| layout.segment_index(&job.job_id, key).is_some())
            .collect();
        let expected: Vec<String> = second.segments.iter().map(|s| s.output_key.clone()).collect();
        assert_eq!(present, expected);
    }

    #[tokio::test]
    async fn test_failed_upload_leaves_no_metadata() {
        let source = MemoryStore::new();
        source.insert("amdo/a.wav", wav(&[(2.0, true), (1.0, false), (2.0, true)]));

        let mut sink = MockOutputStore::new();
        sink.expect_put_bytes()
            .withf(|key, _, _| key.ends_with("segment_00000.wav"))
            .returning(|_, _, _| Ok(()));
        sink.expect_put_bytes()
            .returning(|key, _, _| Err(Error::sink_write(key, "503 Slow Down")));
        sink.expect_put_json().never();

        let engine = SegmentationEngine::new(source, sink, EnergyDetector::default(), EngineSettings::default());
        let err = engine.process(&job("amdo/a.wav")).await.unwrap_err();
        assert!(matches!(err, Error::SinkWrite { .. }));
        assert_eq!(err.disposition(), Disposition::Retry);
    }

    #[tokio::test]
    async fn test_detector_error_is_retryable() {
        let store = MemoryStore::new();
        store.insert("amdo/a.wav", wav(&[(1.0, true)]));
        let mut detector = MockSpeechDetector::new();
        detector
            .expect_detect()
            .returning(|_| Err(Error::Detection("model not loaded".to_string())));

        let engine = SegmentationEngine::new(store.clone(), store.clone(), detector, EngineSettings::default());
        let err = engine.process(&job("amdo/a.wav")).await.unwrap_err();
        assert_eq!(err.disposition(), Disposition::Retry);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_skip_completed_reports_conflict() {
        let store = MemoryStore::new();
        store.insert("amdo/a.wav", wav(&[(1.0, true)]));
        let mut detector = MockSpeechDetector::new();
        detector
            .expect_detect()
            .times(1)
            .returning(|_| Ok(vec![SpeechInterval::new(0.0, 1.0)]));
        let settings = EngineSettings {
            skip_completed: true,
            ..EngineSettings::default()
        };
        let engine = SegmentationEngine::new(store.clone(), store.clone(), detector, settings);

        let job = job("amdo/a.wav");
        engine.process(&job).await.unwrap();
        let err = engine.process(&job).await.unwrap_err();
        assert!(matches!(err, Error::ScheduleConflict(_)));
        assert_eq!(err.disposition(), Disposition::Complete);
    }

    #[tokio::test]
    async fn test_missing_source_is_a_fetch_error() {
        let store = MemoryStore::new();
        let engine = SegmentationEngine::new(
            store.clone(),
            store,
            EnergyDetector::default(),
            EngineSettings::default(),
        );
        let err = engine.process(&job("amdo/gone.wav")).await.unwrap_err();
        assert!(matches!(err, Error::SourceFetch { .. }));
    }
}
