use std::{
    fs::File,
    io::BufReader,
    path::{Path, PathBuf},
};

use anyhow::Context as _;

use crate::{
    error::{PipelineError, PipelineResult},
    formats::{Codec, EncoderCapabilities, ImageFormat, PixelFormat},
    model::Composition,
};

/// Manifest file the packaged artifact must contain. Lists the
/// compositions the bundle exposes.
pub const COMPOSITIONS_MANIFEST: &str = "compositions.json";

/// Packaging collaborator: turns a composition source location into a
/// loadable artifact inside `artifact_dir`.
///
/// Progress is fractional, 0..=100.
pub trait Bundler {
    fn bundle(
        &self,
        entry: &Path,
        artifact_dir: &Path,
        on_progress: &mut dyn FnMut(f64),
    ) -> PipelineResult<()>;
}

/// Everything a frame renderer needs to produce one raster.
pub struct FrameContext<'a> {
    pub composition: &'a Composition,
    pub props: &'a serde_json::Value,
    pub frame: u64,
    pub out_path: &'a Path,
    pub image_format: ImageFormat,
    /// JPEG quality, 0..=100. Ignored for PNG.
    pub quality: u8,
}

/// Frame-rendering collaborator. Invoked concurrently for distinct frame
/// indices; each call owns a disjoint output file.
pub trait FrameRenderer: Sync {
    fn render_frame(&self, ctx: &FrameContext<'_>) -> PipelineResult<()>;
}

/// Inputs for the encoder collaborator.
pub struct StitchParams<'a> {
    pub frame_dir: &'a Path,
    pub image_format: ImageFormat,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub output: &'a Path,
    pub overwrite: bool,
    pub pixel_format: PixelFormat,
    pub codec: Codec,
    pub crf: u32,
    pub total_frames: u64,
}

/// Encoder collaborator: merges the ordered frame directory into a
/// codec-conforming container, reporting frames consumed.
pub trait FrameStitcher {
    fn capabilities(&self) -> EncoderCapabilities;

    fn stitch(
        &self,
        params: &StitchParams<'_>,
        on_progress: &mut dyn FnMut(u64),
    ) -> PipelineResult<()>;
}

/// Composition-resolution collaborator: read the manifest out of a
/// packaged artifact.
pub fn resolve_compositions(artifact_dir: &Path) -> PipelineResult<Vec<Composition>> {
    let manifest = artifact_dir.join(COMPOSITIONS_MANIFEST);
    let f = File::open(&manifest).map_err(|e| {
        PipelineError::packaging(format!(
            "failed to open manifest '{}': {e}",
            manifest.display()
        ))
    })?;
    let comps: Vec<Composition> = serde_json::from_reader(BufReader::new(f)).map_err(|e| {
        PipelineError::packaging(format!(
            "failed to parse manifest '{}': {e}",
            manifest.display()
        ))
    })?;
    for comp in &comps {
        comp.validate()?;
    }
    Ok(comps)
}

/// Bundler that copies the composition source tree verbatim into the
/// artifact directory and verifies the manifest is present.
#[derive(Clone, Copy, Debug, Default)]
pub struct DirBundler;

impl Bundler for DirBundler {
    fn bundle(
        &self,
        entry: &Path,
        artifact_dir: &Path,
        on_progress: &mut dyn FnMut(f64),
    ) -> PipelineResult<()> {
        if !entry.is_dir() {
            return Err(PipelineError::packaging(format!(
                "entry point '{}' is not a directory",
                entry.display()
            )));
        }

        on_progress(0.0);
        let files = collect_files(entry)?;
        let total = files.len().max(1);
        for (i, src) in files.iter().enumerate() {
            let rel = src.strip_prefix(entry).map_err(|_| {
                PipelineError::packaging(format!(
                    "bundled file '{}' escapes the entry point",
                    src.display()
                ))
            })?;
            let dst = artifact_dir.join(rel);
            if let Some(parent) = dst.parent() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("failed to create bundle directory '{}'", parent.display())
                })?;
            }
            std::fs::copy(src, &dst)
                .with_context(|| format!("failed to copy '{}' into bundle", src.display()))?;
            on_progress((i + 1) as f64 / total as f64 * 100.0);
        }

        if !artifact_dir.join(COMPOSITIONS_MANIFEST).is_file() {
            return Err(PipelineError::packaging(format!(
                "bundle is missing '{COMPOSITIONS_MANIFEST}'"
            )));
        }
        on_progress(100.0);
        Ok(())
    }
}

fn collect_files(root: &Path) -> PipelineResult<Vec<PathBuf>> {
    let mut out = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let entries = std::fs::read_dir(&dir)
            .with_context(|| format!("failed to read '{}'", dir.display()))?;
        for entry in entries {
            let entry = entry.with_context(|| format!("failed to read '{}'", dir.display()))?;
            let file_type = entry
                .file_type()
                .with_context(|| format!("failed to stat '{}'", entry.path().display()))?;
            // Symlinks are skipped: following them could cycle forever or
            // pull content from outside the entry tree into the bundle.
            if file_type.is_symlink() {
                tracing::warn!(
                    path = %entry.path().display(),
                    "skipping symlink while bundling"
                );
                continue;
            }
            let path = entry.path();
            if file_type.is_dir() {
                stack.push(path);
            } else {
                out.push(path);
            }
        }
    }
    out.sort();
    Ok(out)
}

/// Built-in deterministic renderer producing one solid-color raster per
/// frame. Keeps the pipeline exercisable end to end without an external
/// frame-rendering engine attached.
#[derive(Clone, Copy, Debug)]
pub struct SolidFrameRenderer {
    pub rgba: [u8; 4],
}

impl Default for SolidFrameRenderer {
    fn default() -> Self {
        Self {
            rgba: [18, 20, 28, 255],
        }
    }
}

impl FrameRenderer for SolidFrameRenderer {
    fn render_frame(&self, ctx: &FrameContext<'_>) -> PipelineResult<()> {
        let width = ctx.composition.width;
        let height = ctx.composition.height;
        let pixels = (width as usize) * (height as usize);

        match ctx.image_format {
            ImageFormat::Png => {
                let mut data = Vec::with_capacity(pixels * 4);
                for _ in 0..pixels {
                    data.extend_from_slice(&self.rgba);
                }
                image::save_buffer_with_format(
                    ctx.out_path,
                    &data,
                    width,
                    height,
                    image::ColorType::Rgba8,
                    image::ImageFormat::Png,
                )
                .map_err(|e| {
                    PipelineError::render(format!(
                        "failed to write png frame '{}': {e}",
                        ctx.out_path.display()
                    ))
                })?;
            }
            ImageFormat::Jpeg => {
                let mut data = Vec::with_capacity(pixels * 3);
                for _ in 0..pixels {
                    data.extend_from_slice(&self.rgba[..3]);
                }
                let f = File::create(ctx.out_path).with_context(|| {
                    format!("failed to create frame '{}'", ctx.out_path.display())
                })?;
                let mut enc = image::codecs::jpeg::JpegEncoder::new_with_quality(
                    std::io::BufWriter::new(f),
                    ctx.quality,
                );
                enc.encode(&data, width, height, image::ExtendedColorType::Rgb8)
                    .map_err(|e| {
                        PipelineError::render(format!(
                            "failed to write jpeg frame '{}': {e}",
                            ctx.out_path.display()
                        ))
                    })?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch(name: &str) -> PathBuf {
        let dir = PathBuf::from("target").join("collab_tests").join(name);
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn write_manifest(dir: &Path) {
        let comps = vec![Composition {
            id: "main".to_string(),
            width: 8,
            height: 8,
            fps: 30,
            duration_in_frames: 2,
        }];
        let f = File::create(dir.join(COMPOSITIONS_MANIFEST)).unwrap();
        serde_json::to_writer_pretty(f, &comps).unwrap();
    }

    #[test]
    fn dir_bundler_copies_tree_and_reports_progress() {
        let root = scratch("bundle_ok");
        let entry = root.join("src");
        std::fs::create_dir_all(entry.join("nested")).unwrap();
        write_manifest(&entry);
        std::fs::write(entry.join("nested").join("a.txt"), b"a").unwrap();

        let artifact = root.join("artifact");
        std::fs::create_dir_all(&artifact).unwrap();

        let mut ticks = Vec::new();
        DirBundler
            .bundle(&entry, &artifact, &mut |p| ticks.push(p))
            .unwrap();

        assert!(artifact.join(COMPOSITIONS_MANIFEST).is_file());
        assert!(artifact.join("nested").join("a.txt").is_file());
        assert_eq!(ticks.first().copied(), Some(0.0));
        assert_eq!(ticks.last().copied(), Some(100.0));
        assert!(ticks.windows(2).all(|w| w[0] <= w[1]));
    }

    #[cfg(unix)]
    #[test]
    fn dir_bundler_skips_symlinks() {
        let root = scratch("bundle_symlinks");
        let entry = root.join("src");
        std::fs::create_dir_all(&entry).unwrap();
        write_manifest(&entry);

        let outside = root.join("outside.txt");
        std::fs::write(&outside, b"outside").unwrap();
        std::os::unix::fs::symlink(&outside, entry.join("link.txt")).unwrap();
        // A directory symlink cycle must not hang the traversal.
        std::os::unix::fs::symlink(&entry, entry.join("loop")).unwrap();

        let artifact = root.join("artifact");
        std::fs::create_dir_all(&artifact).unwrap();
        DirBundler.bundle(&entry, &artifact, &mut |_| {}).unwrap();

        assert!(artifact.join(COMPOSITIONS_MANIFEST).is_file());
        assert!(!artifact.join("link.txt").exists());
        assert!(!artifact.join("loop").exists());
    }

    #[test]
    fn dir_bundler_requires_manifest() {
        let root = scratch("bundle_no_manifest");
        let entry = root.join("src");
        std::fs::create_dir_all(&entry).unwrap();
        std::fs::write(entry.join("a.txt"), b"a").unwrap();
        let artifact = root.join("artifact");
        std::fs::create_dir_all(&artifact).unwrap();

        let err = DirBundler
            .bundle(&entry, &artifact, &mut |_| {})
            .unwrap_err();
        assert!(err.to_string().contains(COMPOSITIONS_MANIFEST));
    }

    #[test]
    fn resolve_compositions_reads_manifest() {
        let dir = scratch("resolve_ok");
        write_manifest(&dir);
        let comps = resolve_compositions(&dir).unwrap();
        assert_eq!(comps.len(), 1);
        assert_eq!(comps[0].id, "main");
    }

    #[test]
    fn resolve_compositions_fails_without_manifest() {
        let dir = scratch("resolve_missing");
        assert!(resolve_compositions(&dir).is_err());
    }

    #[test]
    fn solid_renderer_writes_both_formats() {
        let dir = scratch("solid_frames");
        let comp = Composition {
            id: "main".to_string(),
            width: 8,
            height: 8,
            fps: 30,
            duration_in_frames: 1,
        };
        let props = serde_json::json!({});

        for (format, name) in [(ImageFormat::Png, "f.png"), (ImageFormat::Jpeg, "f.jpeg")] {
            let out = dir.join(name);
            SolidFrameRenderer::default()
                .render_frame(&FrameContext {
                    composition: &comp,
                    props: &props,
                    frame: 0,
                    out_path: &out,
                    image_format: format,
                    quality: 90,
                })
                .unwrap();
            let img = image::open(&out).unwrap();
            assert_eq!(img.width(), 8);
            assert_eq!(img.height(), 8);
        }
    }
}
