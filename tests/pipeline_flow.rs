//! End-to-end pipeline tests against a scripted in-process stage client.

use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex},
    time::Duration,
};

use spritecast::{
    AudioTrack, JobRequest, JobStatus, Pipeline, PipelineConfig, SpriteMapping, StageKind,
    StageStatus,
    foundation::error::{SpritecastError, SpritecastResult},
    job::model::Job,
    stage::client::StageClient,
    stage::schema::LipsyncRequest,
};

/// Answers every remote stage with a canned-but-consistent result, records the
/// invocation order, and fails on demand.
struct MockStageClient {
    calls: Mutex<Vec<StageKind>>,
    failing: Mutex<HashSet<StageKind>>,
    confidence: f64,
}

impl MockStageClient {
    fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            failing: Mutex::new(HashSet::new()),
            confidence: 0.92,
        }
    }

    fn with_confidence(confidence: f64) -> Self {
        Self {
            confidence,
            ..Self::new()
        }
    }

    fn fail_on(&self, stage: StageKind) {
        self.failing.lock().unwrap().insert(stage);
    }

    fn recover(&self, stage: StageKind) {
        self.failing.lock().unwrap().remove(&stage);
    }

    fn calls(&self) -> Vec<StageKind> {
        self.calls.lock().unwrap().clone()
    }

    fn count(&self, stage: StageKind) -> usize {
        self.calls().iter().filter(|s| **s == stage).count()
    }
}

#[async_trait::async_trait]
impl StageClient for MockStageClient {
    async fn invoke(
        &self,
        stage: StageKind,
        payload: serde_json::Value,
        _timeout: Duration,
    ) -> SpritecastResult<serde_json::Value> {
        self.calls.lock().unwrap().push(stage);
        if self.failing.lock().unwrap().contains(&stage) {
            return Err(SpritecastError::stage(stage, "timed out after 1s"));
        }

        let value = match stage {
            StageKind::Diarization => serde_json::json!({
                "segments": [
                    {"speaker": "SPEAKER_00", "start": 0.0, "end": 0.5}
                ]
            }),
            StageKind::SpeakerId => serde_json::json!({
                "identifiedSegments": [{
                    "speakerName": "Alice",
                    "speakerId": "profile-1",
                    "start": 0.0,
                    "end": 0.5,
                    "confidence": self.confidence
                }],
                "speakerMapping": {"SPEAKER_00": "Alice"}
            }),
            StageKind::StemGeneration => serde_json::json!({
                "stems": {"Alice": "stem_alice.wav"},
                "sampleRate": 16_000,
                "duration": 0.5
            }),
            StageKind::Lipsync => {
                // Echo one span per identified segment so both modes get
                // timelines matching their input.
                let request: LipsyncRequest = serde_json::from_value(payload).unwrap();
                let spans: Vec<serde_json::Value> = request
                    .speaker_segments
                    .identified_segments
                    .iter()
                    .map(|seg| {
                        serde_json::json!({
                            "speaker": seg.speaker_name,
                            "start": seg.start,
                            "end": seg.end,
                            "keyframes": [
                                {"time": seg.start, "mouth_shape": "A"}
                            ]
                        })
                    })
                    .collect();
                serde_json::json!({"lipsyncData": spans})
            }
            StageKind::Muxing => serde_json::json!({
                "outputVideo": "outputs/final_video.mp4"
            }),
            StageKind::Rendering => {
                panic!("rendering must never reach the stage client")
            }
        };
        Ok(value)
    }
}

struct Fixture {
    pipeline: Pipeline,
    client: Arc<MockStageClient>,
    _dir: tempfile::TempDir,
}

fn fixture_with(client: MockStageClient) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let mut config = PipelineConfig::default();
    config.paths.uploads_dir = dir.path().join("uploads");
    config.paths.cache_dir = dir.path().join("cache");
    config.paths.output_dir = dir.path().join("outputs");
    config.render.fps = 10;
    config.render.resolution = "64x64".to_string();
    config.render.parallel = false;
    std::fs::create_dir_all(&config.paths.uploads_dir).unwrap();

    let client = Arc::new(client);
    Fixture {
        pipeline: Pipeline::new(config, client.clone()),
        client,
        _dir: dir,
    }
}

fn fixture() -> Fixture {
    fixture_with(MockStageClient::new())
}

fn write_audio(fixture: &Fixture, file_id: &str, bytes: &[u8]) {
    std::fs::write(fixture.pipeline.config().audio_path(file_id), bytes).unwrap();
}

fn write_wav(fixture: &Fixture, file_id: &str, seconds: u32) {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: 8_000,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let path = fixture.pipeline.config().audio_path(file_id);
    let mut writer = hound::WavWriter::create(path, spec).unwrap();
    for _ in 0..(8_000 * seconds) {
        writer.write_sample(0i16).unwrap();
    }
    writer.finalize().unwrap();
}

fn sprites_for(speakers: &[&str]) -> SpriteMapping {
    let mut map = HashMap::new();
    for speaker in speakers {
        let mut per_speaker = HashMap::new();
        per_speaker.insert("rest".to_string(), format!("{speaker}_rest.png"));
        map.insert((*speaker).to_string(), per_speaker);
    }
    SpriteMapping(map)
}

fn legacy_request(sprites: SpriteMapping) -> JobRequest {
    JobRequest {
        config_ref: "test".to_string(),
        tracks: vec![AudioTrack::mixed("episode.wav")],
        sprites,
    }
}

async fn wait_terminal(fixture: &Fixture, id: spritecast::JobId) -> Job {
    for _ in 0..200 {
        let job = fixture.pipeline.store().get(id).await.unwrap();
        if job.status.is_terminal() {
            return job;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("job {id} did not reach a terminal state");
}

#[tokio::test]
async fn legacy_job_runs_every_stage_in_order() {
    let fx = fixture();
    write_audio(&fx, "episode.wav", b"episode audio bytes");

    let ticket = fx
        .pipeline
        .submit(legacy_request(sprites_for(&["Alice"])))
        .await
        .unwrap();
    assert_eq!(ticket.status, JobStatus::Pending);

    let job = wait_terminal(&fx, ticket.id).await;
    assert_eq!(job.status, JobStatus::Completed, "error: {:?}", job.error);
    assert_eq!(job.output_video.as_deref(), Some("outputs/final_video.mp4"));
    for kind in StageKind::ALL {
        assert_eq!(
            job.stage(kind).unwrap().status,
            StageStatus::Completed,
            "stage {kind}"
        );
    }

    // Remote call order mirrors the legacy sequence; rendering stays local.
    assert_eq!(
        fx.client.calls(),
        vec![
            StageKind::Diarization,
            StageKind::SpeakerId,
            StageKind::StemGeneration,
            StageKind::Lipsync,
            StageKind::Muxing,
        ]
    );

    // Frames landed on disk: 0.5s at 10 fps.
    let frames_dir = fx.pipeline.config().frames_dir(&ticket.id.to_string());
    assert!(frames_dir.join("000000.png").exists());
    assert!(frames_dir.join("000004.png").exists());
    assert!(!frames_dir.join("000005.png").exists());
}

#[tokio::test]
async fn identical_audio_reuses_the_diarization_cache() {
    let fx = fixture();
    write_audio(&fx, "episode.wav", b"identical bytes");

    let first = fx
        .pipeline
        .submit(legacy_request(sprites_for(&["Alice"])))
        .await
        .unwrap();
    let job = wait_terminal(&fx, first.id).await;
    assert_eq!(job.status, JobStatus::Completed);
    assert!(!job.stage(StageKind::Diarization).unwrap().from_cache);

    let second = fx
        .pipeline
        .submit(legacy_request(sprites_for(&["Alice"])))
        .await
        .unwrap();
    let job = wait_terminal(&fx, second.id).await;
    assert_eq!(job.status, JobStatus::Completed);
    assert!(job.stage(StageKind::Diarization).unwrap().from_cache);

    // One real diarization call across both jobs.
    assert_eq!(fx.client.count(StageKind::Diarization), 1);
}

#[tokio::test]
async fn changed_audio_misses_the_cache() {
    let fx = fixture();
    write_audio(&fx, "episode.wav", b"take one");

    let first = fx
        .pipeline
        .submit(legacy_request(sprites_for(&["Alice"])))
        .await
        .unwrap();
    wait_terminal(&fx, first.id).await;

    write_audio(&fx, "episode.wav", b"take two");
    let second = fx
        .pipeline
        .submit(legacy_request(sprites_for(&["Alice"])))
        .await
        .unwrap();
    let job = wait_terminal(&fx, second.id).await;

    assert!(!job.stage(StageKind::Diarization).unwrap().from_cache);
    assert_eq!(fx.client.count(StageKind::Diarization), 2);
}

#[tokio::test]
async fn multitrack_job_skips_the_inference_stages() {
    let fx = fixture();
    write_wav(&fx, "alice.wav", 1);
    write_wav(&fx, "bob.wav", 1);

    let ticket = fx
        .pipeline
        .submit(JobRequest {
            config_ref: "test".to_string(),
            tracks: vec![
                AudioTrack::named("Alice", "alice.wav"),
                AudioTrack::named("Bob", "bob.wav"),
            ],
            sprites: sprites_for(&["Alice", "Bob"]),
        })
        .await
        .unwrap();

    let job = wait_terminal(&fx, ticket.id).await;
    assert_eq!(job.status, JobStatus::Completed, "error: {:?}", job.error);
    for kind in [
        StageKind::Diarization,
        StageKind::SpeakerId,
        StageKind::StemGeneration,
    ] {
        assert_eq!(job.stage(kind).unwrap().status, StageStatus::Skipped);
    }
    assert_eq!(
        fx.client.calls(),
        vec![StageKind::Lipsync, StageKind::Muxing]
    );
}

#[tokio::test]
async fn mismatched_track_durations_fail_the_job() {
    let fx = fixture();
    write_wav(&fx, "alice.wav", 1);
    write_wav(&fx, "bob.wav", 2);

    let ticket = fx
        .pipeline
        .submit(JobRequest {
            config_ref: "test".to_string(),
            tracks: vec![
                AudioTrack::named("Alice", "alice.wav"),
                AudioTrack::named("Bob", "bob.wav"),
            ],
            sprites: sprites_for(&["Alice", "Bob"]),
        })
        .await
        .unwrap();

    let job = wait_terminal(&fx, ticket.id).await;
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.error.unwrap().contains("duration mismatch"));
    assert!(fx.client.calls().is_empty());
}

#[tokio::test]
async fn stage_failure_aborts_everything_downstream() {
    let fx = fixture();
    write_audio(&fx, "episode.wav", b"episode audio bytes");
    fx.client.fail_on(StageKind::StemGeneration);

    let ticket = fx
        .pipeline
        .submit(legacy_request(sprites_for(&["Alice"])))
        .await
        .unwrap();
    let job = wait_terminal(&fx, ticket.id).await;

    assert_eq!(job.status, JobStatus::Failed);
    let error = job.error.clone().unwrap();
    assert!(error.contains("stem_generation"), "error: {error}");

    assert_eq!(
        job.stage(StageKind::StemGeneration).unwrap().status,
        StageStatus::Failed
    );
    // Never-invoked stages stay pending; that is the observable difference
    // from skipped.
    for kind in [StageKind::Lipsync, StageKind::Rendering, StageKind::Muxing] {
        assert_eq!(job.stage(kind).unwrap().status, StageStatus::Pending);
    }
    assert!(!fx.client.calls().contains(&StageKind::Lipsync));
    assert!(!fx.client.calls().contains(&StageKind::Muxing));
}

#[tokio::test]
async fn low_confidence_identification_fails_loudly() {
    let fx = fixture_with(MockStageClient::with_confidence(0.42));
    write_audio(&fx, "episode.wav", b"episode audio bytes");

    let ticket = fx
        .pipeline
        .submit(legacy_request(sprites_for(&["Alice"])))
        .await
        .unwrap();
    let job = wait_terminal(&fx, ticket.id).await;

    assert_eq!(job.status, JobStatus::Failed);
    let error = job.error.unwrap();
    assert!(error.contains("below threshold"), "error: {error}");
    assert!(!fx.client.calls().contains(&StageKind::StemGeneration));
}

#[tokio::test]
async fn retry_creates_a_fresh_job_and_leaves_the_original_failed() {
    let fx = fixture();
    write_audio(&fx, "episode.wav", b"episode audio bytes");
    fx.client.fail_on(StageKind::Diarization);

    let ticket = fx
        .pipeline
        .submit(legacy_request(sprites_for(&["Alice"])))
        .await
        .unwrap();
    let failed = wait_terminal(&fx, ticket.id).await;
    assert_eq!(failed.status, JobStatus::Failed);

    fx.client.recover(StageKind::Diarization);
    let retried = fx.pipeline.retry(ticket.id).await.unwrap();
    assert_ne!(retried.id, ticket.id);

    let job = wait_terminal(&fx, retried.id).await;
    assert_eq!(job.status, JobStatus::Completed);

    // Original record is untouched by the retry.
    let original = fx.pipeline.store().get(ticket.id).await.unwrap();
    assert_eq!(original.status, JobStatus::Failed);
    assert_eq!(fx.pipeline.store().len().await, 2);
}

#[tokio::test]
async fn invalid_requests_are_rejected_before_any_record_exists() {
    let fx = fixture();
    let err = fx
        .pipeline
        .submit(JobRequest {
            config_ref: "test".to_string(),
            tracks: vec![],
            sprites: sprites_for(&["Alice"]),
        })
        .await
        .unwrap_err();
    assert!(err.to_string().contains("validation error"));
    assert!(fx.pipeline.store().is_empty().await);
}
