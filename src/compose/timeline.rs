use crate::stage::schema::LipsyncResult;

/// The mouth shape drawn when a speaker is silent or has no keyframe data.
pub const REST_VISEME: &str = "rest";

/// Sprite-mapping key consulted as the last step of the fallback chain.
pub const DEFAULT_SPRITE_KEY: &str = "default";

/// One activity window on a speaker's timeline, half-open `[start, end)`
/// seconds. Windows of different speakers may overlap (concurrent speech).
#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SpeakerSegment {
    pub start: f64,
    pub end: f64,
}

impl SpeakerSegment {
    pub fn contains(&self, t: f64) -> bool {
        self.start <= t && t < self.end
    }
}

/// Sparse, piecewise-constant viseme signal for one speaker, keyframes sorted
/// by time ascending.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct VisemeTrack {
    keyframes: Vec<(f64, String)>,
}

impl VisemeTrack {
    pub fn new(mut keyframes: Vec<(f64, String)>) -> Self {
        keyframes.sort_by(|a, b| a.0.total_cmp(&b.0));
        Self { keyframes }
    }

    pub fn is_empty(&self) -> bool {
        self.keyframes.is_empty()
    }

    /// The active viseme at time `t`: the latest keyframe with time <= t, the
    /// first keyframe when `t` precedes all of them, or rest when the track is
    /// empty.
    pub fn viseme_at(&self, t: f64) -> &str {
        if self.keyframes.is_empty() {
            return REST_VISEME;
        }
        let after = self.keyframes.partition_point(|(time, _)| *time <= t);
        if after == 0 {
            &self.keyframes[0].1
        } else {
            &self.keyframes[after - 1].1
        }
    }
}

/// Resolved per-speaker input to the compositor: activity windows plus the
/// viseme keyframe track.
#[derive(Clone, Debug)]
pub struct SpeakerTimeline {
    pub speaker: String,
    pub segments: Vec<SpeakerSegment>,
    pub visemes: VisemeTrack,
}

impl SpeakerTimeline {
    pub fn active_at(&self, t: f64) -> bool {
        self.segments.iter().any(|s| s.contains(t))
    }

    pub fn end_time(&self) -> f64 {
        self.segments.iter().fold(0.0, |acc, s| acc.max(s.end))
    }
}

/// Fold the lipsync stage result into one timeline per speaker, keeping
/// first-seen speaker order (that order also fixes grid cell assignment).
pub fn timelines_from_lipsync(result: &LipsyncResult) -> Vec<SpeakerTimeline> {
    let mut order: Vec<String> = Vec::new();
    for span in &result.lipsync_data {
        if !order.iter().any(|s| s == &span.speaker) {
            order.push(span.speaker.clone());
        }
    }

    order
        .into_iter()
        .map(|speaker| {
            let mut segments = Vec::new();
            let mut keyframes = Vec::new();
            for span in result.lipsync_data.iter().filter(|s| s.speaker == speaker) {
                segments.push(SpeakerSegment {
                    start: span.start,
                    end: span.end,
                });
                for kf in &span.keyframes {
                    keyframes.push((kf.time, kf.mouth_shape.clone()));
                }
            }
            SpeakerTimeline {
                speaker,
                segments,
                visemes: VisemeTrack::new(keyframes),
            }
        })
        .collect()
}

/// Latest segment end across all speakers; the frame count derives from it.
pub fn latest_end_time(timelines: &[SpeakerTimeline]) -> f64 {
    timelines.iter().fold(0.0, |acc, tl| acc.max(tl.end_time()))
}
