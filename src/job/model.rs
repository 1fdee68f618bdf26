use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::{
    foundation::error::{SpritecastError, SpritecastResult},
    stage::schema::StageResult,
};

#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
#[serde(transparent)]
pub struct JobId(pub uuid::Uuid);

impl JobId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineMode {
    Legacy,
    Multitrack,
}

impl PipelineMode {
    /// Pure function of the job input, evaluated once at submission: more than
    /// one audio track means speaker identity and per-speaker audio are already
    /// known and the inference stages are skipped.
    pub fn select(tracks: &[AudioTrack]) -> Self {
        if tracks.len() > 1 {
            Self::Multitrack
        } else {
            Self::Legacy
        }
    }

    /// Stages actually executed in this mode, in order.
    pub fn sequence(self) -> &'static [StageKind] {
        match self {
            Self::Legacy => &[
                StageKind::Diarization,
                StageKind::SpeakerId,
                StageKind::StemGeneration,
                StageKind::Lipsync,
                StageKind::Rendering,
                StageKind::Muxing,
            ],
            Self::Multitrack => &[StageKind::Lipsync, StageKind::Rendering, StageKind::Muxing],
        }
    }
}

impl std::fmt::Display for PipelineMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Legacy => write!(f, "legacy"),
            Self::Multitrack => write!(f, "multitrack"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending,
    Diarizing,
    IdentifyingSpeakers,
    GeneratingStems,
    Rendering,
    Muxing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Diarizing => "DIARIZING",
            Self::IdentifyingSpeakers => "IDENTIFYING_SPEAKERS",
            Self::GeneratingStems => "GENERATING_STEMS",
            Self::Rendering => "RENDERING",
            Self::Muxing => "MUXING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    Diarization,
    SpeakerId,
    StemGeneration,
    Lipsync,
    Rendering,
    Muxing,
}

impl StageKind {
    pub const ALL: [StageKind; 6] = [
        StageKind::Diarization,
        StageKind::SpeakerId,
        StageKind::StemGeneration,
        StageKind::Lipsync,
        StageKind::Rendering,
        StageKind::Muxing,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Diarization => "diarization",
            Self::SpeakerId => "speaker_id",
            Self::StemGeneration => "stem_generation",
            Self::Lipsync => "lipsync",
            Self::Rendering => "rendering",
            Self::Muxing => "muxing",
        }
    }

    /// Job status reported while this stage is in flight. The lipsync call and
    /// the frame compositor together make up the rendering phase.
    pub fn job_status(self) -> JobStatus {
        match self {
            Self::Diarization => JobStatus::Diarizing,
            Self::SpeakerId => JobStatus::IdentifyingSpeakers,
            Self::StemGeneration => JobStatus::GeneratingStems,
            Self::Lipsync | Self::Rendering => JobStatus::Rendering,
            Self::Muxing => JobStatus::Muxing,
        }
    }
}

impl std::fmt::Display for StageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Pending,
    Processing,
    Completed,
    Skipped,
    Failed,
}

/// Per-stage sub-state of a job. A record moves pending -> processing ->
/// {completed | failed} exactly once; skipped records are written at submission
/// and never revisited.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct StageRecord {
    pub kind: StageKind,
    pub status: StageStatus,
    pub result: Option<StageResult>,
    /// True when the result was satisfied from the content cache instead of a
    /// downstream call.
    pub from_cache: bool,
    /// Skip reason or failure message.
    pub detail: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl StageRecord {
    fn pending(kind: StageKind, now: DateTime<Utc>) -> Self {
        Self {
            kind,
            status: StageStatus::Pending,
            result: None,
            from_cache: false,
            detail: None,
            updated_at: now,
        }
    }

    fn skipped(kind: StageKind, reason: &str, now: DateTime<Utc>) -> Self {
        Self {
            kind,
            status: StageStatus::Skipped,
            result: None,
            from_cache: false,
            detail: Some(reason.to_string()),
            updated_at: now,
        }
    }
}

/// One audio input. Legacy jobs carry a single track with no speaker name;
/// multitrack jobs carry one named track per speaker.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct AudioTrack {
    pub speaker: Option<String>,
    pub file_id: String,
}

impl AudioTrack {
    pub fn mixed(file_id: impl Into<String>) -> Self {
        Self {
            speaker: None,
            file_id: file_id.into(),
        }
    }

    pub fn named(speaker: impl Into<String>, file_id: impl Into<String>) -> Self {
        Self {
            speaker: Some(speaker.into()),
            file_id: file_id.into(),
        }
    }
}

/// speaker -> viseme symbol -> sprite image file id.
#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct SpriteMapping(pub HashMap<String, HashMap<String, String>>);

impl SpriteMapping {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Submission input, validated before any job record is created.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct JobRequest {
    pub config_ref: String,
    pub tracks: Vec<AudioTrack>,
    pub sprites: SpriteMapping,
}

impl JobRequest {
    pub fn validate(&self) -> SpritecastResult<()> {
        if self.tracks.is_empty() {
            return Err(SpritecastError::validation(
                "at least one audio reference is required",
            ));
        }
        for track in &self.tracks {
            if track.file_id.trim().is_empty() {
                return Err(SpritecastError::validation(
                    "audio reference must not be empty",
                ));
            }
        }
        if self.tracks.len() > 1 {
            for track in &self.tracks {
                if track.speaker.as_deref().is_none_or(|s| s.trim().is_empty()) {
                    return Err(SpritecastError::validation(format!(
                        "multitrack input requires a speaker name for every track \
                         (missing for '{}')",
                        track.file_id
                    )));
                }
            }
        }
        if self.sprites.is_empty() {
            return Err(SpritecastError::validation(
                "a speaker sprite mapping is required",
            ));
        }
        Ok(())
    }
}

const SKIP_REASON_MULTITRACK: &str = "multitrack input supplies per-speaker tracks";

#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct Job {
    pub id: JobId,
    pub config_ref: String,
    pub mode: PipelineMode,
    pub tracks: Vec<AudioTrack>,
    pub sprites: SpriteMapping,
    pub status: JobStatus,
    pub stages: Vec<StageRecord>,
    pub error: Option<String>,
    pub output_video: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Build a fresh PENDING job from a validated request. Stages outside the
    /// selected mode's sequence are marked skipped up front.
    pub fn new(request: JobRequest) -> Self {
        let now = Utc::now();
        let mode = PipelineMode::select(&request.tracks);
        let executed = mode.sequence();
        let stages = StageKind::ALL
            .into_iter()
            .map(|kind| {
                if executed.contains(&kind) {
                    StageRecord::pending(kind, now)
                } else {
                    StageRecord::skipped(kind, SKIP_REASON_MULTITRACK, now)
                }
            })
            .collect();

        Self {
            id: JobId::generate(),
            config_ref: request.config_ref,
            mode,
            tracks: request.tracks,
            sprites: request.sprites,
            status: JobStatus::Pending,
            stages,
            error: None,
            output_video: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn stage(&self, kind: StageKind) -> Option<&StageRecord> {
        self.stages.iter().find(|s| s.kind == kind)
    }

    pub(crate) fn stage_mut(&mut self, kind: StageKind) -> Option<&mut StageRecord> {
        self.stages.iter_mut().find(|s| s.kind == kind)
    }

    /// The original input, for cloning into a retry submission.
    pub fn request(&self) -> JobRequest {
        JobRequest {
            config_ref: self.config_ref.clone(),
            tracks: self.tracks.clone(),
            sprites: self.sprites.clone(),
        }
    }

    /// First audio reference; present by construction after validation.
    pub fn primary_audio(&self) -> SpritecastResult<&str> {
        self.tracks
            .first()
            .map(|t| t.file_id.as_str())
            .ok_or_else(|| SpritecastError::validation("job has no audio references"))
    }
}
