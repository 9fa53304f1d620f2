// ============================================================================
// SHARPENER — per-image dispatch: upload, record, submit, read back, save
// ============================================================================
//
// One image at a time, fully synchronous.  Each image walks the same fixed
// sequence of stages; the stage tracker turns any out-of-order step into an
// error instead of undefined GPU behaviour.  Per-image GPU objects live in a
// `FrameTextures` scope, so every exit path releases them.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;

use ash::vk;

use crate::config::SharpenConfig;
use crate::error::{Result, SharpenError};
use crate::gpu::buffer::GpuBuffer;
use crate::gpu::{GpuContext, GpuImage, GpuImageView, SharpenPipeline, Submission, TEXTURE_FORMAT};
use crate::io::{self, RgbaPixels};
use crate::{log_err, log_info};

// ============================================================================
// Sharpness
// ============================================================================

/// Sharpening strength as a percentage, always within `0..=100`.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct Sharpness(f32);

impl Sharpness {
    pub const MAX: Sharpness = Sharpness(100.0);

    pub fn new(percent: f32) -> Result<Self> {
        if percent.is_nan() || !(0.0..=100.0).contains(&percent) {
            return Err(SharpenError::InvalidSharpness(percent));
        }
        // Adding zero turns -0.0 into 0.0.
        Ok(Self(percent + 0.0))
    }

    pub fn percent(self) -> f32 {
        self.0
    }

    /// The `0.0..=1.0` value the kernel parameters are computed from.
    pub fn fraction(self) -> f32 {
        self.0 / 100.0
    }

    /// Short label used in output file names (`50`, `33.33`).
    pub fn label(self) -> String {
        io::format_percentage(self.0)
    }
}

impl Default for Sharpness {
    fn default() -> Self {
        Self::MAX
    }
}

impl fmt::Display for Sharpness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}%", self.label())
    }
}

impl FromStr for Sharpness {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let value: f32 = s
            .trim()
            .trim_end_matches('%')
            .parse()
            .map_err(|_| format!("'{}' is not a number", s))?;
        Sharpness::new(value).map_err(|e| e.to_string())
    }
}

// ============================================================================
// Stage tracking
// ============================================================================

/// Where the current image is in the processing sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Stage {
    #[default]
    Idle,
    Loaded,
    TexturesCreated,
    ParamsUpdated,
    Recorded,
    Submitted,
    Awaited,
    ReadBack,
    Saved,
    Freed,
}

impl Stage {
    /// The only stage allowed after `self`.
    pub fn next(self) -> Stage {
        match self {
            Stage::Idle => Stage::Loaded,
            Stage::Loaded => Stage::TexturesCreated,
            Stage::TexturesCreated => Stage::ParamsUpdated,
            Stage::ParamsUpdated => Stage::Recorded,
            Stage::Recorded => Stage::Submitted,
            Stage::Submitted => Stage::Awaited,
            Stage::Awaited => Stage::ReadBack,
            Stage::ReadBack => Stage::Saved,
            Stage::Saved => Stage::Freed,
            Stage::Freed => Stage::Idle,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Stage::Idle => "Idle",
            Stage::Loaded => "Loaded",
            Stage::TexturesCreated => "TexturesCreated",
            Stage::ParamsUpdated => "ParamsUpdated",
            Stage::Recorded => "Recorded",
            Stage::Submitted => "Submitted",
            Stage::Awaited => "Awaited",
            Stage::ReadBack => "ReadBack",
            Stage::Saved => "Saved",
            Stage::Freed => "Freed",
        }
    }
}

/// Rejects any skipped or repeated stage.
#[derive(Debug, Default)]
pub struct StageTracker {
    current: Stage,
}

impl StageTracker {
    pub fn current(&self) -> Stage {
        self.current
    }

    pub fn advance(&mut self, to: Stage) -> Result<()> {
        if self.current.next() != to {
            return Err(SharpenError::Sequence {
                current: self.current.name(),
                attempted: to.name(),
            });
        }
        self.current = to;
        Ok(())
    }

    /// Back to `Idle` after a failed image; its resources are already gone.
    pub fn reset(&mut self) {
        self.current = Stage::Idle;
    }
}

// ============================================================================
// Per-image GPU resources
// ============================================================================

/// Input and output textures for one image.  Views are declared first so
/// they drop before the images they reference.
struct FrameTextures {
    input_view: GpuImageView,
    output_view: GpuImageView,
    input: GpuImage,
    output: GpuImage,
}

impl FrameTextures {
    fn new(ctx: &Arc<GpuContext>, pixels: &RgbaPixels) -> Result<Self> {
        let input = GpuImage::sampled(
            ctx,
            pixels.width,
            pixels.height,
            TEXTURE_FORMAT,
            &pixels.data,
            pixels.row_pitch(),
        )?;
        let input_view = input.create_view()?;
        let output = GpuImage::storage(ctx, pixels.width, pixels.height, TEXTURE_FORMAT)?;
        let output_view = output.create_view()?;
        Ok(Self {
            input_view,
            output_view,
            input,
            output,
        })
    }
}

// ============================================================================
// Sharpener
// ============================================================================

/// Runs the sharpen kernel over images, one at a time.
pub struct Sharpener {
    ctx: Arc<GpuContext>,
    pipeline: SharpenPipeline,
    submission: Submission,
    sharpness: Sharpness,
    stage: StageTracker,
}

impl Sharpener {
    pub fn new(ctx: Arc<GpuContext>, config: &SharpenConfig, sharpness: Sharpness) -> Result<Self> {
        let pipeline = SharpenPipeline::new(&ctx, config)?;
        let submission = Submission::new(&ctx)?;
        log_info!("[Sharpen] ready on {} at {}", ctx.device_name(), sharpness);
        Ok(Self {
            ctx,
            pipeline,
            submission,
            sharpness,
            stage: StageTracker::default(),
        })
    }

    pub fn sharpness(&self) -> Sharpness {
        self.sharpness
    }

    pub fn set_sharpness(&mut self, sharpness: Sharpness) {
        self.sharpness = sharpness;
    }

    pub fn context(&self) -> &Arc<GpuContext> {
        &self.ctx
    }

    pub fn stage(&self) -> Stage {
        self.stage.current()
    }

    /// Sharpen one file and write `{stem}_Sharpened_{pct}%.png` into `output_dir`.
    pub fn process_image(&mut self, input: &Path, output_dir: &Path) -> Result<PathBuf> {
        let started = Instant::now();
        log_info!("[Sharpen] {}", input.display());

        let result = self.load(input).and_then(|pixels| {
            let stem = input
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| "image".to_string());
            let out_path = output_dir.join(io::output_file_name(&stem, self.sharpness.percent()));
            self.run(&pixels, Some(&out_path))?;
            Ok(out_path)
        });

        match &result {
            Ok(path) => {
                log_info!(
                    "[Sharpen] wrote {} ({:.0}ms)",
                    path.display(),
                    started.elapsed().as_secs_f64() * 1000.0
                );
            }
            Err(e) => {
                log_err!("[Sharpen] {} failed ({:?}): {}", input.display(), e.category(), e);
                self.stage.reset();
            }
        }
        result
    }

    /// Sharpen pixels already in memory; no file is read or written.
    pub fn sharpen_pixels(&mut self, pixels: &RgbaPixels) -> Result<RgbaPixels> {
        let result = self
            .stage
            .advance(Stage::Loaded)
            .and_then(|()| self.run(pixels, None));
        if result.is_err() {
            self.stage.reset();
        }
        result
    }

    fn load(&mut self, input: &Path) -> Result<RgbaPixels> {
        let pixels = io::load_rgba(input)?;
        self.stage.advance(Stage::Loaded)?;
        log_info!("[Sharpen] decoded {}x{}", pixels.width, pixels.height);
        Ok(pixels)
    }

    /// Everything after decoding.  `save_to` of `None` keeps the result in memory.
    fn run(&mut self, pixels: &RgbaPixels, save_to: Option<&Path>) -> Result<RgbaPixels> {
        let mut frame = FrameTextures::new(&self.ctx, pixels)?;
        self.stage.advance(Stage::TexturesCreated)?;

        self.pipeline
            .update(self.sharpness.fraction(), pixels.width, pixels.height)?;
        self.stage.advance(Stage::ParamsUpdated)?;

        self.record(&mut frame)?;
        self.stage.advance(Stage::Recorded)?;

        self.submission.submit()?;
        self.stage.advance(Stage::Submitted)?;
        self.submission.wait()?;
        self.stage.advance(Stage::Awaited)?;

        let sharpened = self.read_back(&mut frame)?;
        self.stage.advance(Stage::ReadBack)?;

        if let Some(path) = save_to {
            io::save_png(&sharpened, path)?;
        }
        self.stage.advance(Stage::Saved)?;

        drop(frame);
        self.stage.advance(Stage::Freed)?;
        self.stage.advance(Stage::Idle)?;
        Ok(sharpened)
    }

    fn record(&mut self, frame: &mut FrameTextures) -> Result<()> {
        let device = self.ctx.device();
        let cmd = self.submission.begin()?;
        frame.output.transition(device, cmd, vk::ImageLayout::GENERAL)?;
        // No-op after the upload.
        frame
            .input
            .transition(device, cmd, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)?;
        self.pipeline
            .record_dispatch(cmd, frame.input_view.handle(), frame.output_view.handle())?;
        frame
            .output
            .transition(device, cmd, vk::ImageLayout::TRANSFER_SRC_OPTIMAL)
    }

    fn read_back(&self, frame: &mut FrameTextures) -> Result<RgbaPixels> {
        let mut staging = GpuBuffer::new(
            &self.ctx,
            frame.output.byte_size(),
            1,
            vk::BufferUsageFlags::TRANSFER_DST,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            0,
        )?;

        self.ctx.one_shot(|device, cmd| {
            frame.output.copy_to_buffer(device, cmd, &staging)?;
            frame
                .output
                .transition(device, cmd, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
        })?;

        staging.map_whole()?;
        staging.invalidate(vk::WHOLE_SIZE, 0)?;
        let data = staging.read(0, frame.output.byte_size() as usize)?;
        staging.unmap();
        RgbaPixels::new(frame.output.width(), frame.output.height(), data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sharpness_bounds() {
        assert!(Sharpness::new(0.0).is_ok());
        assert!(Sharpness::new(100.0).is_ok());
        assert!(matches!(
            Sharpness::new(100.5),
            Err(SharpenError::InvalidSharpness(_))
        ));
        assert!(Sharpness::new(-0.1).is_err());
        assert!(Sharpness::new(f32::NAN).is_err());
        assert!(Sharpness::new(f32::INFINITY).is_err());
    }

    #[test]
    fn sharpness_parsing() {
        assert_eq!("50".parse::<Sharpness>().unwrap().fraction(), 0.5);
        assert_eq!("75%".parse::<Sharpness>().unwrap().percent(), 75.0);
        assert!("abc".parse::<Sharpness>().is_err());
        assert!("101".parse::<Sharpness>().is_err());
        assert_eq!(Sharpness::default().percent(), 100.0);
        assert_eq!(Sharpness::new(33.333).unwrap().label(), "33.33");
        assert_eq!(Sharpness::new(50.0).unwrap().to_string(), "50%");
    }

    #[test]
    fn negative_zero_is_plain_zero() {
        let zero = Sharpness::new(-0.0).unwrap();
        assert!(zero.percent().is_sign_positive());
        assert_eq!(zero.label(), "0");
        assert_eq!("-0".parse::<Sharpness>().unwrap().to_string(), "0%");
        assert_eq!(io::output_file_name("x", zero.percent()), "x_Sharpened_0%.png");
    }

    #[test]
    fn full_cycle_returns_to_idle() {
        let mut tracker = StageTracker::default();
        let mut stage = Stage::Idle;
        for _ in 0..10 {
            stage = stage.next();
            tracker.advance(stage).unwrap();
        }
        assert_eq!(tracker.current(), Stage::Idle);
    }

    #[test]
    fn skipping_a_stage_is_rejected() {
        let mut tracker = StageTracker::default();
        tracker.advance(Stage::Loaded).unwrap();
        let err = tracker.advance(Stage::ParamsUpdated).unwrap_err();
        assert!(matches!(
            err,
            SharpenError::Sequence {
                current: "Loaded",
                attempted: "ParamsUpdated"
            }
        ));
        // A rejected step leaves the tracker where it was.
        assert_eq!(tracker.current(), Stage::Loaded);
    }

    #[test]
    fn repeating_or_reordering_is_rejected() {
        let mut tracker = StageTracker::default();
        tracker.advance(Stage::Loaded).unwrap();
        tracker.advance(Stage::TexturesCreated).unwrap();
        assert!(tracker.advance(Stage::TexturesCreated).is_err());
        assert!(tracker.advance(Stage::Loaded).is_err());
        assert!(tracker.advance(Stage::Submitted).is_err());
        tracker.reset();
        assert_eq!(tracker.current(), Stage::Idle);
        assert!(tracker.advance(Stage::Loaded).is_ok());
    }
}
