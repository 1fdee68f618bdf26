use crate::{
    foundation::core::Resolution,
    foundation::error::{SpritecastError, SpritecastResult},
};

/// Fixed grid placing one panel per speaker.
///
/// Computed once per job and constant across frames: columns = ceil(sqrt(n)),
/// rows = ceil(n / columns), cells assigned in first-seen speaker order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GridLayout {
    pub columns: u32,
    pub rows: u32,
    pub panel_width: u32,
    pub panel_height: u32,
}

impl GridLayout {
    pub fn for_speakers(count: usize, resolution: Resolution) -> SpritecastResult<Self> {
        if count == 0 {
            return Err(SpritecastError::composition(
                "layout requires at least one speaker",
            ));
        }
        let n = count as u32;
        let columns = (f64::from(n)).sqrt().ceil() as u32;
        let rows = n.div_ceil(columns);
        let panel_width = resolution.width / columns;
        let panel_height = resolution.height / rows;
        if panel_width == 0 || panel_height == 0 {
            return Err(SpritecastError::composition(format!(
                "resolution {}x{} too small for {count} panels",
                resolution.width, resolution.height
            )));
        }
        Ok(Self {
            columns,
            rows,
            panel_width,
            panel_height,
        })
    }

    /// Top-left pixel of the panel for the speaker in grid slot `slot`.
    pub fn panel_origin(&self, slot: usize) -> (u32, u32) {
        let slot = slot as u32;
        let col = slot % self.columns;
        let row = slot / self.columns;
        (col * self.panel_width, row * self.panel_height)
    }
}
