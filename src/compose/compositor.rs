use std::path::{Path, PathBuf};

use image::{Rgba, RgbaImage, imageops};
use rayon::prelude::*;
use tracing::info;

use crate::{
    compose::layout::GridLayout,
    compose::sprite::SpriteBank,
    compose::timeline::{REST_VISEME, SpeakerTimeline, latest_end_time},
    foundation::core::{FrameIndex, Fps, Resolution},
    foundation::error::{SpritecastError, SpritecastResult},
    job::model::SpriteMapping,
};

/// Everything the compositor needs, resolved up front. No IO happens during
/// per-frame work except writing the finished PNGs; sprite decoding is
/// front-loaded into the [`SpriteBank`].
#[derive(Debug)]
pub struct CompositorInput {
    pub timelines: Vec<SpeakerTimeline>,
    pub sprite_mapping: SpriteMapping,
    pub assets_root: PathBuf,
    pub fps: Fps,
    pub resolution: Resolution,
    pub background_rgb: [u8; 3],
}

/// Internal parallelism knobs. Parallelism never changes what is emitted:
/// frames land on disk in strict index order either way.
#[derive(Clone, Debug)]
pub struct RenderThreading {
    pub parallel: bool,
    pub chunk_size: usize,
    pub threads: Option<usize>,
}

impl Default for RenderThreading {
    fn default() -> Self {
        Self {
            parallel: false,
            chunk_size: 64,
            threads: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RenderedSequence {
    pub frames_dir: PathBuf,
    pub frame_count: u64,
}

/// Map the continuous audio timeline into the discrete frame sequence.
///
/// Produces frames 0..ceil(latest segment end x fps), one PNG per index named
/// by its zero-padded index, visiting every index exactly once in increasing
/// order. Output is bit-reproducible for identical inputs; nothing here reads
/// a clock.
pub fn render_frame_sequence(
    input: &CompositorInput,
    out_dir: &Path,
    threading: &RenderThreading,
) -> SpritecastResult<RenderedSequence> {
    if input.timelines.is_empty() {
        return Err(SpritecastError::composition(
            "no speaker timelines to render",
        ));
    }
    let total = input.fps.secs_to_frames_ceil(latest_end_time(&input.timelines));
    if total == 0 {
        return Err(SpritecastError::composition(
            "speaker timelines have zero duration",
        ));
    }

    let layout = GridLayout::for_speakers(input.timelines.len(), input.resolution)?;
    let bank = SpriteBank::load(
        &input.sprite_mapping,
        &input.assets_root,
        layout.panel_width,
        layout.panel_height,
    );

    std::fs::create_dir_all(out_dir).map_err(|err| {
        SpritecastError::composition(format!(
            "cannot create frames directory '{}': {err}",
            out_dir.display()
        ))
    })?;

    let pool = if threading.parallel {
        Some(build_thread_pool(threading.threads)?)
    } else {
        None
    };
    let chunk_size = threading.chunk_size.max(1) as u64;

    let mut chunk_start = 0u64;
    while chunk_start < total {
        let chunk_end = (chunk_start + chunk_size).min(total);
        let frames: Vec<RgbaImage> = match &pool {
            Some(pool) => pool.install(|| {
                (chunk_start..chunk_end)
                    .into_par_iter()
                    .map(|i| compose_frame(input, &layout, &bank, FrameIndex(i)))
                    .collect()
            }),
            None => (chunk_start..chunk_end)
                .map(|i| compose_frame(input, &layout, &bank, FrameIndex(i)))
                .collect(),
        };

        for (offset, frame) in frames.into_iter().enumerate() {
            let index = FrameIndex(chunk_start + offset as u64);
            let path = out_dir.join(format!("{}.png", index.file_stem()));
            frame.save(&path).map_err(|err| {
                SpritecastError::composition(format!(
                    "cannot write frame '{}': {err}",
                    path.display()
                ))
            })?;
        }
        chunk_start = chunk_end;
    }

    info!(
        frames = total,
        speakers = input.timelines.len(),
        dir = %out_dir.display(),
        "frame sequence rendered"
    );
    Ok(RenderedSequence {
        frames_dir: out_dir.to_path_buf(),
        frame_count: total,
    })
}

/// Composite one frame: per speaker, decide activity from the segment
/// timeline, resolve the viseme (forced to rest while inactive), look the
/// sprite up through the fallback chain, and blit it into the speaker's fixed
/// panel over the background.
fn compose_frame(
    input: &CompositorInput,
    layout: &GridLayout,
    bank: &SpriteBank,
    frame: FrameIndex,
) -> RgbaImage {
    let t = input.fps.frame_time_secs(frame);
    let [r, g, b] = input.background_rgb;
    let mut canvas = RgbaImage::from_pixel(
        input.resolution.width,
        input.resolution.height,
        Rgba([r, g, b, 255]),
    );

    for (slot, timeline) in input.timelines.iter().enumerate() {
        let active = timeline.active_at(t);
        let viseme = if active {
            timeline.visemes.viseme_at(t)
        } else {
            REST_VISEME
        };
        let (x, y) = layout.panel_origin(slot);
        match bank.resolve(&timeline.speaker, viseme) {
            Some(sprite) => imageops::overlay(&mut canvas, sprite, i64::from(x), i64::from(y)),
            None => {
                let placeholder = bank.placeholder(&timeline.speaker, viseme, active);
                imageops::overlay(&mut canvas, &placeholder, i64::from(x), i64::from(y));
            }
        }
    }
    canvas
}

fn build_thread_pool(threads: Option<usize>) -> SpritecastResult<rayon::ThreadPool> {
    if threads == Some(0) {
        return Err(SpritecastError::validation(
            "render threading 'threads' must be >= 1 when set",
        ));
    }
    let mut builder = rayon::ThreadPoolBuilder::new();
    if let Some(n) = threads {
        builder = builder.num_threads(n);
    }
    builder
        .build()
        .map_err(|e| SpritecastError::composition(format!("failed to build thread pool: {e}")))
}
