use std::{
    path::Path,
    sync::atomic::{AtomicBool, Ordering},
    time::Instant,
};

use rayon::prelude::*;

use crate::{
    collab::{Bundler, FrameContext, FrameRenderer, FrameStitcher, StitchParams},
    concurrency::build_thread_pool,
    error::{PipelineError, PipelineResult},
    formats::{self, frame_file_name},
    model::{Composition, RenderOutcome, RenderRequest, RunPerf, Stage},
    progress::{MonotonicCounter, ProgressSink, ProgressStage},
    temp::TempRegistry,
};

/// Environment variable enabling per-stage perf counters at run end.
pub const PERF_ENV: &str = "STITCHRUN_PERF";

/// The external collaborators a run is sequenced over.
pub struct Collaborators<'a> {
    pub bundler: &'a dyn Bundler,
    pub renderer: &'a dyn FrameRenderer,
    pub stitcher: &'a dyn FrameStitcher,
}

/// Run-scoped mutable state. Created at pipeline start, dropped after
/// cleanup; terminal once `Done` or `Failed`.
struct PipelineRun {
    stage: Stage,
    perf: RunPerf,
}

impl PipelineRun {
    fn new() -> Self {
        Self {
            stage: Stage::Idle,
            perf: RunPerf::default(),
        }
    }

    fn enter(&mut self, stage: Stage) {
        tracing::debug!(from = ?self.stage, to = ?stage, "stage transition");
        self.stage = stage;
    }
}

/// Drive one render run through the full stage sequence:
/// `Validating → Packaging → ResolvingComposition → RenderingFrames →
/// (Stitching | skip) → CleaningUp → Done | Failed`.
///
/// Validation fails fast before any resource is acquired. Scratch
/// directories are owned by a [`TempRegistry`] and released on every exit
/// path; cleanup failures are logged, never escalated.
pub fn render_media(
    request: &RenderRequest,
    collab: &Collaborators<'_>,
    sink: &dyn ProgressSink,
) -> PipelineResult<RenderOutcome> {
    let mut run = PipelineRun::new();

    run.enter(Stage::Validating);
    request.validate()?;
    if let Some(codec) = request.codec {
        formats::advise_codec_support(&collab.stitcher.capabilities(), codec);
    }
    if request.output.exists() && !request.overwrite {
        run.enter(Stage::Failed);
        return Err(PipelineError::precondition(format!(
            "output '{}' already exists (pass --overwrite to replace it)",
            request.output.display()
        )));
    }

    let temp = TempRegistry::new();
    let result = run_stages(request, collab, sink, &temp, &mut run);

    run.enter(Stage::CleaningUp);
    let cleanup_start = Instant::now();
    temp.dispose();
    run.perf.cleanup = cleanup_start.elapsed();

    run.enter(if result.is_ok() {
        Stage::Done
    } else {
        Stage::Failed
    });
    if std::env::var_os(PERF_ENV).is_some() {
        emit_perf(&run.perf);
    }
    result
}

fn run_stages(
    request: &RenderRequest,
    collab: &Collaborators<'_>,
    sink: &dyn ProgressSink,
    temp: &TempRegistry,
    run: &mut PipelineRun,
) -> PipelineResult<RenderOutcome> {
    run.enter(Stage::Packaging);
    let stage_start = Instant::now();
    let artifact_dir = temp.create_dir("bundle")?;
    collab.bundler.bundle(&request.entry_point, &artifact_dir, &mut |pct| {
        sink.report(ProgressStage::Packaging, pct.clamp(0.0, 100.0) as u64, 100);
    })?;
    run.perf.packaging = stage_start.elapsed();

    run.enter(Stage::ResolvingComposition);
    let stage_start = Instant::now();
    let compositions = crate::collab::resolve_compositions(&artifact_dir)?;
    let composition = compositions
        .iter()
        .find(|c| c.id == request.composition_id)
        .ok_or_else(|| {
            PipelineError::precondition(format!(
                "composition '{}' not found in bundle (available: {})",
                request.composition_id,
                compositions
                    .iter()
                    .map(|c| c.id.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            ))
        })?;
    if !request.image_sequence {
        request
            .pixel_format
            .validate_dimensions(composition.width, composition.height)?;
    }
    run.perf.resolving = stage_start.elapsed();

    // Image-sequence mode writes straight into the final destination; it
    // is the run's product, not scratch space, so it is never registered
    // for cleanup.
    let created_output_dir = request.image_sequence && !request.output.exists();
    let frame_dir = if request.image_sequence {
        std::fs::create_dir_all(&request.output).map_err(|e| {
            PipelineError::render(format!(
                "failed to create output directory '{}': {e}",
                request.output.display()
            ))
        })?;
        request.output.clone()
    } else {
        temp.create_dir("frames")?
    };

    run.enter(Stage::RenderingFrames);
    let stage_start = Instant::now();
    let total = composition.duration_in_frames;
    let rendered = render_all_frames(request, collab.renderer, composition, &frame_dir, total, sink);
    run.perf.rendering = stage_start.elapsed();
    if let Err(e) = rendered {
        // A failed sequence run must not leave a partially populated
        // directory at the output path.
        if request.image_sequence {
            remove_partial_frames(&frame_dir, total, request.image_format, created_output_dir);
        }
        return Err(e);
    }

    if request.image_sequence {
        return Ok(RenderOutcome {
            output: request.output.clone(),
            frames_rendered: total,
        });
    }

    // Stitching only starts once the complete, ordered frame set exists.
    run.enter(Stage::Stitching);
    let stage_start = Instant::now();
    let params = StitchParams {
        frame_dir: &frame_dir,
        image_format: request.image_format,
        width: composition.width,
        height: composition.height,
        fps: composition.fps,
        output: &request.output,
        overwrite: request.overwrite,
        pixel_format: request.pixel_format,
        codec: request.video_codec()?,
        crf: request.video_crf()?,
        total_frames: total,
    };
    let stitched = collab.stitcher.stitch(&params, &mut |frames| {
        sink.report(ProgressStage::Stitching, frames.min(total), total);
    });
    run.perf.stitching = stage_start.elapsed();

    if let Err(e) = stitched {
        // Never leave a half-written container at the output path.
        if request.output.is_file()
            && let Err(rm) = std::fs::remove_file(&request.output)
        {
            tracing::warn!(
                path = %request.output.display(),
                error = %rm,
                "failed to remove partial output after encode failure"
            );
        }
        return Err(e);
    }

    Ok(RenderOutcome {
        output: request.output.clone(),
        frames_rendered: total,
    })
}

/// Fan frame rendering out across the planner's effective concurrency.
///
/// Workers own disjoint frame indices and therefore disjoint output
/// files. After a fatal error no new frame units are dispatched;
/// in-flight workers finish their current unit.
fn render_all_frames(
    request: &RenderRequest,
    renderer: &dyn FrameRenderer,
    composition: &Composition,
    frame_dir: &Path,
    total: u64,
    sink: &dyn ProgressSink,
) -> PipelineResult<()> {
    let pool = build_thread_pool(request.concurrency)?;
    let completed = MonotonicCounter::new();
    let aborted = AtomicBool::new(false);

    pool.install(|| {
        (0..total).into_par_iter().try_for_each(|frame| {
            if aborted.load(Ordering::Relaxed) {
                return Ok(());
            }
            let out_path = frame_dir.join(frame_file_name(frame, request.image_format));
            let ctx = FrameContext {
                composition,
                props: &request.props,
                frame,
                out_path: &out_path,
                image_format: request.image_format,
                quality: request.quality,
            };
            match renderer.render_frame(&ctx) {
                Ok(()) => {
                    completed.tick(sink, ProgressStage::Rendering, total);
                    Ok(())
                }
                Err(e) => {
                    aborted.store(true, Ordering::Relaxed);
                    Err(e)
                }
            }
        })
    })
}

/// Best-effort removal of the frame files an aborted image-sequence run
/// wrote, plus the output directory itself when this run created it.
/// Pre-existing user files in the directory are left alone.
fn remove_partial_frames(
    dir: &Path,
    total: u64,
    image_format: crate::formats::ImageFormat,
    remove_dir: bool,
) {
    for frame in 0..total {
        let path = dir.join(frame_file_name(frame, image_format));
        if path.is_file()
            && let Err(e) = std::fs::remove_file(&path)
        {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to remove partial frame after render failure"
            );
        }
    }
    if remove_dir
        && let Err(e) = std::fs::remove_dir(dir)
    {
        tracing::warn!(
            path = %dir.display(),
            error = %e,
            "failed to remove output directory after render failure"
        );
    }
}

fn emit_perf(perf: &RunPerf) {
    tracing::info!(
        packaging_ms = perf.packaging.as_millis() as u64,
        resolving_ms = perf.resolving.as_millis() as u64,
        rendering_ms = perf.rendering.as_millis() as u64,
        stitching_ms = perf.stitching.as_millis() as u64,
        cleanup_ms = perf.cleanup.as_millis() as u64,
        "pipeline perf counters"
    );
}
