//! Batch compiler from long-form dialogue audio to sprite-animated video.
//!
//! A submitted job carries audio references and a per-speaker sprite mapping.
//! The pipeline coordinator drives it through diarization, speaker
//! identification, stem generation and lipsync analysis (all remote HTTP
//! stages), composes the frame sequence locally, and hands the frames to the
//! mux stage for final encoding. Single-track submissions run the full
//! inference chain; multitrack submissions skip it, since each track already
//! names its speaker.
//!
//! Frame composition is deterministic: identical stage outputs, sprite assets
//! and render settings reproduce the PNG sequence byte for byte.

#![forbid(unsafe_code)]

pub mod compose;
pub mod config;
pub mod foundation;
pub mod job;
pub mod pipeline;
pub mod stage;

pub use compose::compositor::{
    CompositorInput, RenderThreading, RenderedSequence, render_frame_sequence,
};
pub use config::PipelineConfig;
pub use foundation::core::{Fps, FrameIndex, Resolution};
pub use foundation::error::{SpritecastError, SpritecastResult};
pub use job::model::{
    AudioTrack, Job, JobId, JobRequest, JobStatus, PipelineMode, SpriteMapping, StageKind,
    StageStatus,
};
pub use job::store::JobStore;
pub use pipeline::coordinator::{JobTicket, Pipeline};
pub use stage::cache::ContentCache;
pub use stage::client::{HttpStageClient, StageClient};
