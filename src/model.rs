use std::{path::PathBuf, time::Duration};

use crate::{
    error::{PipelineError, PipelineResult},
    formats::{self, Codec, ImageFormat, PixelFormat},
};

/// A renderable unit resolved from a packaged artifact.
///
/// Immutable once resolved; the coordinator owns it for the duration of a
/// single run.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct Composition {
    pub id: String,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub duration_in_frames: u64,
}

impl Composition {
    pub fn validate(&self) -> PipelineResult<()> {
        if self.id.is_empty() {
            return Err(PipelineError::config("composition id must be non-empty"));
        }
        if self.width == 0 || self.height == 0 {
            return Err(PipelineError::config(format!(
                "composition '{}' has zero width or height",
                self.id
            )));
        }
        if self.fps == 0 {
            return Err(PipelineError::config(format!(
                "composition '{}' has zero fps",
                self.id
            )));
        }
        if self.duration_in_frames == 0 {
            return Err(PipelineError::config(format!(
                "composition '{}' has zero duration",
                self.id
            )));
        }
        Ok(())
    }
}

/// Validated, immutable configuration for one pipeline run.
///
/// Built once (by the CLI or an embedding caller) and passed through every
/// stage; there is no process-global configuration.
#[derive(Clone, Debug)]
pub struct RenderRequest {
    /// Composition source location handed to the packaging collaborator.
    pub entry_point: PathBuf,
    /// Identifier of the composition to render.
    pub composition_id: String,
    /// Video file path, or the image-sequence directory.
    pub output: PathBuf,
    /// Target codec. Must be absent in image-sequence mode.
    pub codec: Option<Codec>,
    pub pixel_format: PixelFormat,
    pub image_format: ImageFormat,
    /// JPEG quality, 0..=100. Ignored for PNG frames.
    pub quality: u8,
    /// Rate-control factor. Mandatory for video output, forbidden for
    /// image sequences.
    pub crf: Option<u32>,
    /// Effective parallelism, already resolved by the planner.
    pub concurrency: usize,
    pub overwrite: bool,
    pub image_sequence: bool,
    /// Opaque user props forwarded to the frame renderer.
    pub props: serde_json::Value,
}

impl RenderRequest {
    /// Enforce the cross-field invariants before any resource is acquired.
    pub fn validate(&self) -> PipelineResult<()> {
        if self.image_sequence && self.codec.is_some() {
            return Err(PipelineError::config(
                "an explicit codec conflicts with image-sequence output; drop one of the two",
            ));
        }
        if self.quality > 100 {
            return Err(PipelineError::config(format!(
                "quality must be 0..=100, got {}",
                self.quality
            )));
        }
        if self.concurrency == 0 {
            return Err(PipelineError::config("concurrency must be >= 1"));
        }

        if self.image_sequence {
            if self.crf.is_some() {
                return Err(PipelineError::config(
                    "crf does not apply to image-sequence output",
                ));
            }
            return Ok(());
        }

        let codec = self.video_codec()?;
        let crf = self.video_crf()?;
        formats::validate_crf(codec, crf)?;
        formats::validate_pixel_format(codec, self.pixel_format)?;
        formats::validate_image_format(self.pixel_format, self.image_format)?;
        Ok(())
    }

    pub fn video_codec(&self) -> PipelineResult<Codec> {
        self.codec
            .ok_or_else(|| PipelineError::config("a codec is required for video output"))
    }

    pub fn video_crf(&self) -> PipelineResult<u32> {
        self.crf
            .ok_or_else(|| PipelineError::config("crf is required for video output"))
    }
}

/// Coordinator state machine. Linear, with stitching skipped for image
/// sequences.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    Idle,
    Validating,
    Packaging,
    ResolvingComposition,
    RenderingFrames,
    Stitching,
    CleaningUp,
    Done,
    Failed,
}

/// Terminal result of a successful run.
#[derive(Clone, Debug)]
pub struct RenderOutcome {
    pub output: PathBuf,
    pub frames_rendered: u64,
}

/// Per-stage wall-clock timings, emitted when `STITCHRUN_PERF` is set.
#[derive(Clone, Copy, Debug, Default)]
pub struct RunPerf {
    pub packaging: Duration,
    pub resolving: Duration,
    pub rendering: Duration,
    pub stitching: Duration,
    pub cleanup: Duration,
}
