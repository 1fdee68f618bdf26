use std::{collections::HashMap, sync::Arc};

use tracing::{error, info, instrument, warn};

use crate::{
    compose::compositor::{CompositorInput, RenderThreading, render_frame_sequence},
    compose::timeline::timelines_from_lipsync,
    config::PipelineConfig,
    foundation::error::{SpritecastError, SpritecastResult},
    job::model::{Job, JobId, JobRequest, JobStatus, PipelineMode, StageKind},
    job::store::JobStore,
    stage::cache::ContentCache,
    stage::client::StageClient,
    stage::schema::{
        DiarizationRequest, DiarizationResult, IdentifiedSegment, LipsyncRequest, LipsyncResult,
        MuxRequest, MuxResult, RenderOutput, SpeakerIdRequest, SpeakerIdResult, StageResult,
        StemRequest, StemResult,
    },
};

/// Immediate acknowledgement returned by [`Pipeline::submit`] before any stage
/// runs.
#[derive(Clone, Copy, Debug, serde::Serialize)]
pub struct JobTicket {
    pub id: JobId,
    pub status: JobStatus,
    pub mode: PipelineMode,
}

/// Owns the per-job state machine.
///
/// Each submitted job runs as one spawned task that executes its mode's stage
/// sequence strictly in order; jobs are concurrent with respect to each other.
/// Only a job's own task touches its record, so cross-job synchronization
/// reduces to the store's map lock.
#[derive(Clone)]
pub struct Pipeline {
    store: JobStore,
    cache: ContentCache,
    client: Arc<dyn StageClient>,
    config: Arc<PipelineConfig>,
}

/// Results accumulated along one job's stage sequence; each stage's request is
/// built from the previous stage's output.
#[derive(Default)]
struct StageOutputs {
    diarization: Option<DiarizationResult>,
    speaker_id: Option<SpeakerIdResult>,
    stems: Option<StemResult>,
    lipsync: Option<LipsyncResult>,
    render: Option<RenderOutput>,
    mux: Option<MuxResult>,
}

impl Pipeline {
    pub fn new(config: PipelineConfig, client: Arc<dyn StageClient>) -> Self {
        let cache = ContentCache::new(config.paths.cache_dir.clone());
        Self {
            store: JobStore::new(),
            cache,
            client,
            config: Arc::new(config),
        }
    }

    pub fn store(&self) -> &JobStore {
        &self.store
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Validate, record the PENDING job, and kick off its pipeline task.
    /// Returns before execution begins; status reads reflect the latest
    /// completed transition from then on.
    pub async fn submit(&self, request: JobRequest) -> SpritecastResult<JobTicket> {
        request.validate()?;
        let job = Job::new(request);
        let ticket = JobTicket {
            id: job.id,
            status: job.status,
            mode: job.mode,
        };
        info!(job = %job.id, mode = %job.mode, "job submitted");
        self.store.insert(job).await;

        let pipeline = self.clone();
        tokio::spawn(async move { pipeline.run(ticket.id).await });
        Ok(ticket)
    }

    /// Clone a job's original input into a brand-new job with every stage
    /// record reset. The source job is left untouched and stays queryable.
    pub async fn retry(&self, id: JobId) -> SpritecastResult<JobTicket> {
        let original = self
            .store
            .get(id)
            .await
            .ok_or_else(|| SpritecastError::JobNotFound(id.to_string()))?;
        self.submit(original.request()).await
    }

    /// Drive one job through its stage sequence until COMPLETED or FAILED.
    /// The first stage error aborts everything downstream; nothing is retried
    /// automatically.
    #[instrument(skip(self), fields(job = %id))]
    pub async fn run(&self, id: JobId) {
        let job = match self.store.get(id).await {
            Some(job) => job,
            None => {
                error!("job vanished before execution");
                return;
            }
        };

        let mut outputs = StageOutputs::default();
        for &stage in job.mode.sequence() {
            if let Err(err) = self.execute_stage(&job, stage, &mut outputs).await {
                warn!(%stage, %err, "stage failed, aborting remaining stages");
                if let Err(store_err) = self.store.fail_job(id, stage, err.to_string()).await {
                    error!(%store_err, "could not record job failure");
                }
                return;
            }
        }

        match outputs.mux.take() {
            Some(mux) => {
                if let Err(err) = self.store.complete_job(id, mux.output_video).await {
                    error!(%err, "could not record job completion");
                    return;
                }
                info!("job completed");
            }
            None => {
                let _ = self
                    .store
                    .fail_job(id, StageKind::Muxing, "internal: no mux output at end of sequence")
                    .await;
            }
        }
    }

    async fn execute_stage(
        &self,
        job: &Job,
        stage: StageKind,
        outputs: &mut StageOutputs,
    ) -> SpritecastResult<()> {
        self.store.begin_stage(job.id, stage).await?;
        match stage {
            StageKind::Diarization => self.run_diarization(job, outputs).await,
            StageKind::SpeakerId => self.run_speaker_id(job, outputs).await,
            StageKind::StemGeneration => self.run_stem_generation(job, outputs).await,
            StageKind::Lipsync => self.run_lipsync(job, outputs).await,
            StageKind::Rendering => self.run_rendering(job, outputs).await,
            StageKind::Muxing => self.run_muxing(job, outputs).await,
        }
    }

    /// Diarization is deterministic over the audio bytes and expensive, so it
    /// is keyed by content hash: a hit skips the network call entirely, a miss
    /// is written back for the next byte-identical submission.
    async fn run_diarization(
        &self,
        job: &Job,
        outputs: &mut StageOutputs,
    ) -> SpritecastResult<()> {
        let stage = StageKind::Diarization;
        let audio = job.primary_audio()?.to_string();
        let audio_path = self.config.audio_path(&audio);
        let content_hash = ContentCache::hash_file(&audio_path).await?;

        let (result, from_cache) = match self.cache.get(&content_hash, stage).await? {
            Some(value) => {
                let result: DiarizationResult = serde_json::from_value(value)
                    .map_err(|err| SpritecastError::cache(format!("stale entry shape: {err}")))?;
                (result, true)
            }
            None => {
                let request = DiarizationRequest {
                    job_id: job.id.to_string(),
                    audio_file_id: audio,
                };
                let result: DiarizationResult = self.invoke(stage, &request).await?;
                let value = serde_json::to_value(&result)
                    .map_err(|err| SpritecastError::cache(format!("unserializable result: {err}")))?;
                self.cache.put(&content_hash, stage, &value).await?;
                (result, false)
            }
        };

        self.store
            .complete_stage(job.id, stage, StageResult::Diarization(result.clone()), from_cache)
            .await?;
        outputs.diarization = Some(result);
        Ok(())
    }

    /// Every diarized segment must come back with a named speaker and a
    /// confidence score; anything under the threshold fails the stage rather
    /// than guessing.
    async fn run_speaker_id(&self, job: &Job, outputs: &mut StageOutputs) -> SpritecastResult<()> {
        let stage = StageKind::SpeakerId;
        let diarization = outputs
            .diarization
            .clone()
            .ok_or_else(|| SpritecastError::stage(stage, "internal: diarization output missing"))?;

        let request = SpeakerIdRequest {
            job_id: job.id.to_string(),
            audio_file_id: job.primary_audio()?.to_string(),
            diarization_result: diarization,
        };
        let result: SpeakerIdResult = self.invoke(stage, &request).await?;

        if result.identified_segments.is_empty() {
            return Err(SpritecastError::stage(stage, "no identified segments returned"));
        }
        let threshold = self.config.stages.confidence_threshold;
        if let Some(segment) = result
            .identified_segments
            .iter()
            .find(|s| s.confidence < threshold)
        {
            return Err(SpritecastError::stage(
                stage,
                format!(
                    "confidence {:.3} for '{}' is below threshold {:.2}",
                    segment.confidence, segment.speaker_name, threshold
                ),
            ));
        }

        self.store
            .complete_stage(job.id, stage, StageResult::SpeakerId(result.clone()), false)
            .await?;
        outputs.speaker_id = Some(result);
        Ok(())
    }

    async fn run_stem_generation(
        &self,
        job: &Job,
        outputs: &mut StageOutputs,
    ) -> SpritecastResult<()> {
        let stage = StageKind::StemGeneration;
        let speaker_segments = outputs
            .speaker_id
            .clone()
            .ok_or_else(|| SpritecastError::stage(stage, "internal: speaker-id output missing"))?;

        let request = StemRequest {
            job_id: job.id.to_string(),
            audio_file_id: job.primary_audio()?.to_string(),
            speaker_segments,
        };
        let result: StemResult = self.invoke(stage, &request).await?;

        self.store
            .complete_stage(job.id, stage, StageResult::StemGeneration(result.clone()), false)
            .await?;
        outputs.stems = Some(result);
        Ok(())
    }

    async fn run_lipsync(&self, job: &Job, outputs: &mut StageOutputs) -> SpritecastResult<()> {
        let stage = StageKind::Lipsync;
        let (speaker_segments, stems) = match job.mode {
            PipelineMode::Legacy => {
                let segments = outputs.speaker_id.clone().ok_or_else(|| {
                    SpritecastError::stage(stage, "internal: speaker-id output missing")
                })?;
                let stems = outputs
                    .stems
                    .as_ref()
                    .map(|s| s.stems.clone())
                    .unwrap_or_default();
                (segments, stems)
            }
            PipelineMode::Multitrack => self.multitrack_segments(job).await?,
        };

        let request = LipsyncRequest {
            job_id: job.id.to_string(),
            audio_file_id: job.primary_audio()?.to_string(),
            speaker_segments,
            stems,
        };
        let result: LipsyncResult = self.invoke(stage, &request).await?;
        if result.lipsync_data.is_empty() {
            return Err(SpritecastError::stage(stage, "no lipsync spans returned"));
        }

        self.store
            .complete_stage(job.id, stage, StageResult::Lipsync(result.clone()), false)
            .await?;
        outputs.lipsync = Some(result);
        Ok(())
    }

    /// Multitrack jobs skip the inference stages, so speaker segments are
    /// synthesized here: each named track is active over its full span. All
    /// tracks must describe the same timeline; durations drifting by more than
    /// one frame are an invariant violation and fail the stage.
    async fn multitrack_segments(
        &self,
        job: &Job,
    ) -> SpritecastResult<(SpeakerIdResult, HashMap<String, String>)> {
        let stage = StageKind::Lipsync;
        let tracks = job.tracks.clone();
        let uploads = self.config.paths.uploads_dir.clone();

        let probed = tokio::task::spawn_blocking(move || {
            tracks
                .iter()
                .map(|track| {
                    let speaker = track.speaker.clone().ok_or_else(|| {
                        SpritecastError::validation("multitrack track is missing a speaker name")
                    })?;
                    let path = uploads.join(&track.file_id);
                    let reader = hound::WavReader::open(&path).map_err(|err| {
                        SpritecastError::stage(
                            StageKind::Lipsync,
                            format!("cannot open track '{}': {err}", track.file_id),
                        )
                    })?;
                    let spec = reader.spec();
                    let duration = f64::from(reader.duration()) / f64::from(spec.sample_rate);
                    Ok((speaker, track.file_id.clone(), duration))
                })
                .collect::<SpritecastResult<Vec<(String, String, f64)>>>()
        })
        .await
        .map_err(|err| SpritecastError::stage(stage, format!("duration probe failed: {err}")))??;

        let reference = probed
            .first()
            .map(|(_, _, d)| *d)
            .ok_or_else(|| SpritecastError::stage(stage, "internal: no tracks to probe"))?;
        let tolerance = 1.0 / self.config.fps()?.as_f64();
        if let Some((speaker, file_id, duration)) = probed
            .iter()
            .find(|(_, _, d)| (*d - reference).abs() > tolerance)
        {
            return Err(SpritecastError::stage(
                stage,
                format!(
                    "track duration mismatch: '{file_id}' ({speaker}) is {duration:.3}s, \
                     other tracks are {reference:.3}s"
                ),
            ));
        }

        let identified_segments = probed
            .iter()
            .enumerate()
            .map(|(i, (speaker, _, duration))| IdentifiedSegment {
                speaker_name: speaker.clone(),
                speaker_id: format!("TRACK_{i:02}"),
                start: 0.0,
                end: *duration,
                confidence: 1.0,
            })
            .collect();
        let speaker_mapping = probed
            .iter()
            .enumerate()
            .map(|(i, (speaker, _, _))| (format!("TRACK_{i:02}"), speaker.clone()))
            .collect();
        let stems = probed
            .into_iter()
            .map(|(speaker, file_id, _)| (speaker, file_id))
            .collect();

        Ok((
            SpeakerIdResult {
                identified_segments,
                speaker_mapping,
            },
            stems,
        ))
    }

    /// The frame compositor runs in-process as its own stage. Composition is
    /// CPU-bound, so it moves to a blocking thread; rayon parallelism inside
    /// never reorders the emitted sequence.
    async fn run_rendering(&self, job: &Job, outputs: &mut StageOutputs) -> SpritecastResult<()> {
        let stage = StageKind::Rendering;
        let lipsync = outputs
            .lipsync
            .clone()
            .ok_or_else(|| SpritecastError::stage(stage, "internal: lipsync output missing"))?;

        let fps = self.config.fps()?;
        let resolution = self.config.resolution()?;
        let input = CompositorInput {
            timelines: timelines_from_lipsync(&lipsync),
            sprite_mapping: job.sprites.clone(),
            assets_root: self.config.paths.uploads_dir.clone(),
            fps,
            resolution,
            background_rgb: self.config.render.background_rgb,
        };
        let threading = RenderThreading {
            parallel: self.config.render.parallel,
            chunk_size: self.config.render.chunk_size,
            threads: None,
        };
        let out_dir = self.config.frames_dir(&job.id.to_string());

        let rendered = tokio::task::spawn_blocking(move || {
            render_frame_sequence(&input, &out_dir, &threading)
        })
        .await
        .map_err(|err| SpritecastError::stage(stage, format!("render task failed: {err}")))??;

        let result = RenderOutput {
            frames_dir: rendered.frames_dir.display().to_string(),
            frame_count: rendered.frame_count,
            fps: self.config.render.fps,
            width: resolution.width,
            height: resolution.height,
        };
        self.store
            .complete_stage(job.id, stage, StageResult::Rendering(result.clone()), false)
            .await?;
        outputs.render = Some(result);
        Ok(())
    }

    async fn run_muxing(&self, job: &Job, outputs: &mut StageOutputs) -> SpritecastResult<()> {
        let stage = StageKind::Muxing;
        let render = outputs
            .render
            .clone()
            .ok_or_else(|| SpritecastError::stage(stage, "internal: render output missing"))?;

        let request = MuxRequest {
            job_id: job.id.to_string(),
            video_frames: render.frames_dir,
            frame_pattern: "%06d.png".to_string(),
            audio_file_id: job.primary_audio()?.to_string(),
            fps: render.fps,
            resolution: self.config.resolution()?.to_wire(),
        };
        let result: MuxResult = self.invoke(stage, &request).await?;

        self.store
            .complete_stage(job.id, stage, StageResult::Muxing(result.clone()), false)
            .await?;
        outputs.mux = Some(result);
        Ok(())
    }

    /// Serialize a typed request, call the stage client with the per-stage
    /// timeout, and parse the typed response. A result of the wrong shape is a
    /// stage failure like any other.
    async fn invoke<Req, Res>(&self, stage: StageKind, request: &Req) -> SpritecastResult<Res>
    where
        Req: serde::Serialize,
        Res: serde::de::DeserializeOwned,
    {
        let payload = serde_json::to_value(request).map_err(|err| {
            SpritecastError::stage(stage, format!("unserializable request: {err}"))
        })?;
        let value = self
            .client
            .invoke(stage, payload, self.config.timeout_for(stage))
            .await?;
        serde_json::from_value(value)
            .map_err(|err| SpritecastError::stage(stage, format!("unexpected result shape: {err}")))
    }
}
