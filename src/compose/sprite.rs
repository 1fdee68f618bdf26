use std::{collections::HashMap, path::Path};

use image::{Rgba, RgbaImage, imageops};
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::{
    compose::timeline::{DEFAULT_SPRITE_KEY, REST_VISEME},
    job::model::SpriteMapping,
};

/// Decoded sprite images, pre-scaled once to panel dimensions.
///
/// Asset-resolution problems are absorbed here: a mapping entry whose file is
/// missing or undecodable is dropped with a warning, and lookups fall through
/// the (speaker, viseme) -> (speaker, rest) -> (speaker, default) chain. A
/// missing sprite never fails a job; the compositor draws a deterministic
/// placeholder instead.
pub struct SpriteBank {
    panels: HashMap<(String, String), RgbaImage>,
    panel_width: u32,
    panel_height: u32,
}

impl SpriteBank {
    pub fn load(
        mapping: &SpriteMapping,
        assets_root: &Path,
        panel_width: u32,
        panel_height: u32,
    ) -> Self {
        let mut panels = HashMap::new();
        for (speaker, visemes) in &mapping.0 {
            for (viseme, file_id) in visemes {
                let path = assets_root.join(file_id);
                match image::open(&path) {
                    Ok(img) => {
                        let scaled = imageops::resize(
                            &img.to_rgba8(),
                            panel_width,
                            panel_height,
                            imageops::FilterType::Triangle,
                        );
                        panels.insert((speaker.clone(), viseme.clone()), scaled);
                    }
                    Err(err) => {
                        warn!(
                            speaker,
                            viseme,
                            path = %path.display(),
                            %err,
                            "sprite unavailable, fallback chain will cover it"
                        );
                    }
                }
            }
        }
        Self {
            panels,
            panel_width,
            panel_height,
        }
    }

    /// Exact mapping first, then the speaker's rest sprite, then the speaker's
    /// default sprite.
    pub fn resolve(&self, speaker: &str, viseme: &str) -> Option<&RgbaImage> {
        [viseme, REST_VISEME, DEFAULT_SPRITE_KEY]
            .iter()
            .find_map(|key| self.panels.get(&(speaker.to_string(), key.to_string())))
    }

    /// Panel-sized placeholder derived purely from (speaker, viseme, active):
    /// a flat fill colored by a digest of the label, dimmed when inactive,
    /// with a fixed dark border. Same inputs, same pixels.
    pub fn placeholder(&self, speaker: &str, viseme: &str, active: bool) -> RgbaImage {
        let label = format!("{speaker}|{viseme}|{active}");
        let digest = Sha256::digest(label.as_bytes());
        let shade = |c: u8| -> u8 {
            // Keep fills mid-range so the border stays visible.
            64 + (c % 128)
        };
        let mut fill = [shade(digest[0]), shade(digest[1]), shade(digest[2])];
        if !active {
            for c in &mut fill {
                *c /= 2;
            }
        }

        let border = 2u32.min(self.panel_width / 2).min(self.panel_height / 2);
        let mut img = RgbaImage::from_pixel(
            self.panel_width,
            self.panel_height,
            Rgba([fill[0], fill[1], fill[2], 255]),
        );
        for (x, y, px) in img.enumerate_pixels_mut() {
            if x < border
                || y < border
                || x >= self.panel_width - border
                || y >= self.panel_height - border
            {
                *px = Rgba([16, 16, 16, 255]);
            }
        }
        img
    }

    pub fn panel_size(&self) -> (u32, u32) {
        (self.panel_width, self.panel_height)
    }

    #[cfg(test)]
    pub(crate) fn empty_for_test(panel_width: u32, panel_height: u32) -> Self {
        Self {
            panels: HashMap::new(),
            panel_width,
            panel_height,
        }
    }

    #[cfg(test)]
    pub(crate) fn insert_for_test(&mut self, speaker: &str, viseme: &str, img: RgbaImage) {
        self.panels
            .insert((speaker.to_string(), viseme.to_string()), img);
    }
}
