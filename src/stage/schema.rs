//! Wire shapes for the stage boundary.
//!
//! Each collaborator service takes a JSON request carrying the job id plus the
//! minimal upstream data it needs, and answers with a stage-specific result
//! shape that the next stage's request is built from verbatim. One explicit
//! schema per stage kind; nothing untyped crosses a stage boundary.
//!
//! Volatile response fields such as `processedAt` are deliberately not modeled:
//! cached results must be byte-stable for identical inputs.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiarizationRequest {
    pub job_id: String,
    pub audio_file_id: String,
}

/// A diarized turn: anonymous speaker label plus a half-open `[start, end)`
/// window in seconds.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DiarizedSegment {
    pub speaker: String,
    pub start: f64,
    pub end: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiarizationResult {
    pub segments: Vec<DiarizedSegment>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeakerIdRequest {
    pub job_id: String,
    pub audio_file_id: String,
    pub diarization_result: DiarizationResult,
}

/// A diarized segment resolved to a named speaker. `confidence` is the
/// similarity score of the profile match; the coordinator rejects the whole
/// stage when any segment falls under the configured threshold.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentifiedSegment {
    pub speaker_name: String,
    pub speaker_id: String,
    pub start: f64,
    pub end: f64,
    pub confidence: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeakerIdResult {
    pub identified_segments: Vec<IdentifiedSegment>,
    #[serde(default)]
    pub speaker_mapping: HashMap<String, String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StemRequest {
    pub job_id: String,
    pub audio_file_id: String,
    pub speaker_segments: SpeakerIdResult,
}

/// One pseudo-stem per speaker: the mixed recording with silence outside that
/// speaker's segments. All stems share sample rate, start time and duration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StemResult {
    pub stems: HashMap<String, String>,
    pub sample_rate: u32,
    pub duration: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LipsyncRequest {
    pub job_id: String,
    pub audio_file_id: String,
    pub speaker_segments: SpeakerIdResult,
    /// Per-speaker audio, when available: generated stems in legacy mode,
    /// the submitted tracks in multitrack mode.
    #[serde(default)]
    pub stems: HashMap<String, String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LipsyncKeyframe {
    pub time: f64,
    pub mouth_shape: String,
}

/// Keyframed mouth shapes for one speaker over one activity span.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LipsyncSpan {
    pub speaker: String,
    pub start: f64,
    pub end: f64,
    pub keyframes: Vec<LipsyncKeyframe>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LipsyncResult {
    pub lipsync_data: Vec<LipsyncSpan>,
}

/// Result of the local rendering stage: where the frame sequence landed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderOutput {
    pub frames_dir: String,
    pub frame_count: u64,
    pub fps: u32,
    pub width: u32,
    pub height: u32,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MuxRequest {
    pub job_id: String,
    /// Directory holding the zero-padded frame sequence.
    pub video_frames: String,
    pub frame_pattern: String,
    pub audio_file_id: String,
    pub fps: u32,
    pub resolution: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MuxResult {
    pub output_video: String,
    #[serde(default)]
    pub frame_count: Option<u64>,
}

/// Tagged union over every stage's result payload, stored on the stage record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum StageResult {
    Diarization(DiarizationResult),
    SpeakerId(SpeakerIdResult),
    StemGeneration(StemResult),
    Lipsync(LipsyncResult),
    Rendering(RenderOutput),
    Muxing(MuxResult),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requests_serialize_with_camel_case_keys() {
        let req = DiarizationRequest {
            job_id: "j1".into(),
            audio_file_id: "episode.wav".into(),
        };
        let value = serde_json::to_value(&req).unwrap();
        assert_eq!(value["jobId"], "j1");
        assert_eq!(value["audioFileId"], "episode.wav");
    }

    #[test]
    fn diarization_response_ignores_volatile_fields() {
        let body = serde_json::json!({
            "jobId": "j1",
            "segments": [{"speaker": "SPEAKER_00", "start": 0.0, "end": 5.2}],
            "processedAt": 1_700_000_000.5
        });
        let parsed: DiarizationResult = serde_json::from_value(body).unwrap();
        assert_eq!(parsed.segments.len(), 1);
        assert_eq!(parsed.segments[0].speaker, "SPEAKER_00");
    }

    #[test]
    fn lipsync_keyframes_use_snake_case_mouth_shape() {
        let body = serde_json::json!({
            "lipsyncData": [{
                "speaker": "Alice",
                "start": 0.0,
                "end": 1.0,
                "keyframes": [{"time": 0.0, "mouth_shape": "A"}]
            }]
        });
        let parsed: LipsyncResult = serde_json::from_value(body).unwrap();
        assert_eq!(parsed.lipsync_data[0].keyframes[0].mouth_shape, "A");
    }

    #[test]
    fn stage_result_union_is_tagged_by_stage() {
        let result = StageResult::Muxing(MuxResult {
            output_video: "outputs/j1/final_video.mp4".into(),
            frame_count: Some(60),
        });
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["stage"], "muxing");
        assert_eq!(value["outputVideo"], "outputs/j1/final_video.mp4");
    }
}
