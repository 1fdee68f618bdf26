use crate::foundation::error::{SpritecastError, SpritecastResult};

#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
pub struct FrameIndex(pub u64);

impl FrameIndex {
    /// Zero-padded file stem used for the emitted frame sequence. The width is
    /// fixed so the sequence sorts lexically for the downstream mux stage.
    pub fn file_stem(self) -> String {
        format!("{:06}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Fps {
    pub num: u32,
    pub den: u32, // must be > 0
}

impl Fps {
    pub fn new(num: u32, den: u32) -> SpritecastResult<Self> {
        if num == 0 {
            return Err(SpritecastError::validation("Fps num must be > 0"));
        }
        if den == 0 {
            return Err(SpritecastError::validation("Fps den must be > 0"));
        }
        Ok(Self { num, den })
    }

    pub fn whole(fps: u32) -> SpritecastResult<Self> {
        Self::new(fps, 1)
    }

    pub fn as_f64(self) -> f64 {
        f64::from(self.num) / f64::from(self.den)
    }

    /// Timestamp of frame `i` on the continuous audio timeline (t = i / fps).
    pub fn frame_time_secs(self, frame: FrameIndex) -> f64 {
        (frame.0 as f64) * f64::from(self.den) / f64::from(self.num)
    }

    /// Number of frames needed to cover `secs` of timeline: ceil(secs * fps).
    pub fn secs_to_frames_ceil(self, secs: f64) -> u64 {
        if !secs.is_finite() || secs <= 0.0 {
            return 0;
        }
        (secs * self.as_f64()).ceil() as u64
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub fn new(width: u32, height: u32) -> SpritecastResult<Self> {
        if width == 0 || height == 0 {
            return Err(SpritecastError::validation(
                "resolution width/height must be non-zero",
            ));
        }
        Ok(Self { width, height })
    }

    /// `"1920x1080"` form used on the mux stage boundary.
    pub fn to_wire(self) -> String {
        format!("{}x{}", self.width, self.height)
    }

    pub fn parse(text: &str) -> SpritecastResult<Self> {
        let (w, h) = text.split_once('x').ok_or_else(|| {
            SpritecastError::validation(format!("resolution '{text}' must be WIDTHxHEIGHT"))
        })?;
        let width = w.parse::<u32>().map_err(|_| {
            SpritecastError::validation(format!("resolution width '{w}' is not a number"))
        })?;
        let height = h.parse::<u32>().map_err(|_| {
            SpritecastError::validation(format!("resolution height '{h}' is not a number"))
        })?;
        Self::new(width, height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_stem_is_fixed_width() {
        assert_eq!(FrameIndex(0).file_stem(), "000000");
        assert_eq!(FrameIndex(59).file_stem(), "000059");
        assert_eq!(FrameIndex(123_456).file_stem(), "123456");
    }

    #[test]
    fn frame_time_matches_index_over_fps() {
        let fps = Fps::whole(30).unwrap();
        assert_eq!(fps.frame_time_secs(FrameIndex(0)), 0.0);
        assert_eq!(fps.frame_time_secs(FrameIndex(30)), 1.0);
        assert!((fps.frame_time_secs(FrameIndex(1)) - 1.0 / 30.0).abs() < 1e-12);
    }

    #[test]
    fn frame_count_is_ceiling_of_duration_times_fps() {
        let fps = Fps::whole(30).unwrap();
        assert_eq!(fps.secs_to_frames_ceil(2.0), 60);
        assert_eq!(fps.secs_to_frames_ceil(2.001), 61);
        assert_eq!(fps.secs_to_frames_ceil(0.0), 0);
        assert_eq!(fps.secs_to_frames_ceil(-1.0), 0);
    }

    #[test]
    fn resolution_wire_roundtrip() {
        let r = Resolution::parse("640x360").unwrap();
        assert_eq!(r, Resolution::new(640, 360).unwrap());
        assert_eq!(r.to_wire(), "640x360");
        assert!(Resolution::parse("640").is_err());
        assert!(Resolution::parse("0x360").is_err());
    }
}
