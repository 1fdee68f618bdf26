use std::{collections::HashMap, path::Path, path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{
    foundation::core::{Fps, Resolution},
    foundation::error::SpritecastResult,
    job::model::StageKind,
};

/// Root pipeline configuration.
///
/// Missing fields fall back to defaults, so a partial TOML file is enough to
/// point the pipeline at a different service topology.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct PipelineConfig {
    pub paths: PathsConfig,
    pub stages: StagesConfig,
    pub render: RenderConfig,
}

/// Shared-volume layout: audio uploads, the persisted content cache and the
/// per-job output tree.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PathsConfig {
    pub uploads_dir: PathBuf,
    pub cache_dir: PathBuf,
    pub output_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            uploads_dir: PathBuf::from("uploads"),
            cache_dir: PathBuf::from("cache"),
            output_dir: PathBuf::from("outputs"),
        }
    }
}

/// Stage endpoints and call policy.
///
/// Muxing gets a materially larger timeout than the inference stages because
/// its cost scales with job duration and frame count rather than input size.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StagesConfig {
    pub diarization_url: String,
    pub speaker_id_url: String,
    pub stem_generation_url: String,
    pub lipsync_url: String,
    pub mux_url: String,
    pub inference_timeout_secs: u64,
    pub mux_timeout_secs: u64,
    /// Minimum speaker-identification confidence. Anything below fails the
    /// stage; ambiguous identity is never silently resolved.
    pub confidence_threshold: f64,
}

impl Default for StagesConfig {
    fn default() -> Self {
        Self {
            diarization_url: "http://localhost:5000".to_string(),
            speaker_id_url: "http://localhost:5001".to_string(),
            stem_generation_url: "http://localhost:5002".to_string(),
            lipsync_url: "http://localhost:5003".to_string(),
            mux_url: "http://localhost:5005".to_string(),
            inference_timeout_secs: 120,
            mux_timeout_secs: 600,
            confidence_threshold: 0.7,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RenderConfig {
    pub fps: u32,
    /// Target resolution as `"WIDTHxHEIGHT"`, the same form the mux boundary
    /// uses.
    pub resolution: String,
    /// Fixed frame background, straight RGB.
    pub background_rgb: [u8; 3],
    pub parallel: bool,
    pub chunk_size: usize,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            fps: 30,
            resolution: "1920x1080".to_string(),
            background_rgb: [24, 24, 32],
            parallel: true,
            chunk_size: 64,
        }
    }
}

impl PipelineConfig {
    /// Load configuration from a TOML file. Missing fields use defaults;
    /// invalid TOML is an error.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Load from a file, or fall back to defaults when the file is absent.
    pub fn load_or_default(path: &Path) -> anyhow::Result<Self> {
        match std::fs::metadata(path) {
            Ok(_) => Self::load(path),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(err) => Err(err.into()),
        }
    }

    pub fn fps(&self) -> SpritecastResult<Fps> {
        Fps::whole(self.render.fps)
    }

    pub fn resolution(&self) -> SpritecastResult<Resolution> {
        Resolution::parse(&self.render.resolution)
    }

    pub fn timeout_for(&self, stage: StageKind) -> Duration {
        match stage {
            StageKind::Muxing | StageKind::Rendering => {
                Duration::from_secs(self.stages.mux_timeout_secs)
            }
            _ => Duration::from_secs(self.stages.inference_timeout_secs),
        }
    }

    /// Endpoint table for the HTTP stage client. Rendering is local and has no
    /// endpoint.
    pub fn endpoints(&self) -> HashMap<StageKind, String> {
        HashMap::from([
            (StageKind::Diarization, self.stages.diarization_url.clone()),
            (StageKind::SpeakerId, self.stages.speaker_id_url.clone()),
            (
                StageKind::StemGeneration,
                self.stages.stem_generation_url.clone(),
            ),
            (StageKind::Lipsync, self.stages.lipsync_url.clone()),
            (StageKind::Muxing, self.stages.mux_url.clone()),
        ])
    }

    pub fn audio_path(&self, file_id: &str) -> PathBuf {
        self.paths.uploads_dir.join(file_id)
    }

    pub fn frames_dir(&self, job_id: &str) -> PathBuf {
        self.paths.output_dir.join(job_id).join("frames")
    }
}
