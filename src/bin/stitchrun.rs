use std::path::PathBuf;

use clap::{Parser, Subcommand};

use stitchrun::{
    Bundler as _, Codec, Collaborators, DirBundler, FfmpegStitcher, ImageFormat, LogSink,
    PipelineError, PipelineResult, PixelFormat, RenderRequest, SolidFrameRenderer, TempRegistry,
    resolve_compositions, resolve_concurrency,
};

#[derive(Parser, Debug)]
#[command(name = "stitchrun", version)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Render a composition to a video file or an image sequence.
    Render(RenderArgs),
    /// Bundle the entry point and list the compositions it exposes.
    Compositions(CompositionsArgs),
}

#[derive(Parser, Debug)]
struct RenderArgs {
    /// Composition source directory (must contain compositions.json).
    #[arg(long)]
    entry: PathBuf,

    /// Identifier of the composition to render.
    #[arg(long)]
    composition: String,

    /// Output video file, or the image-sequence directory.
    #[arg(long)]
    out: PathBuf,

    /// Target codec (video mode; defaults to h264). Conflicts with
    /// --image-sequence when set explicitly.
    #[arg(long, value_enum)]
    codec: Option<Codec>,

    /// Pixel format of the encoded stream.
    #[arg(long, value_enum, default_value_t = PixelFormat::Yuv420p)]
    pixel_format: PixelFormat,

    /// Raster format of individual frames.
    #[arg(long, value_enum, default_value_t = ImageFormat::Jpeg)]
    image_format: ImageFormat,

    /// JPEG quality (0-100). Ignored for PNG frames.
    #[arg(long, default_value_t = 80)]
    quality: u8,

    /// Rate-control factor. Required for video output; the valid range
    /// depends on the codec.
    #[arg(long)]
    crf: Option<u32>,

    /// Frame-render parallelism. Defaults to half the logical CPUs.
    #[arg(long)]
    concurrency: Option<usize>,

    /// Overwrite the output if it already exists.
    #[arg(long, default_value_t = false)]
    overwrite: bool,

    /// Produce one raster file per frame instead of an encoded video.
    #[arg(long, default_value_t = false)]
    image_sequence: bool,

    /// User props forwarded to the frame renderer: inline JSON, or
    /// @path/to/file.json.
    #[arg(long)]
    props: Option<String>,
}

#[derive(Parser, Debug)]
struct CompositionsArgs {
    /// Composition source directory (must contain compositions.json).
    #[arg(long)]
    entry: PathBuf,
}

fn main() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let result = match cli.cmd {
        Command::Render(args) => cmd_render(args),
        Command::Compositions(args) => cmd_compositions(args),
    };

    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(e.exit_code());
    }
}

fn parse_props(raw: Option<&str>) -> PipelineResult<serde_json::Value> {
    let Some(raw) = raw else {
        return Ok(serde_json::json!({}));
    };
    let text = if let Some(path) = raw.strip_prefix('@') {
        std::fs::read_to_string(path)
            .map_err(|e| PipelineError::config(format!("failed to read props file '{path}': {e}")))?
    } else {
        raw.to_string()
    };
    serde_json::from_str(&text)
        .map_err(|e| PipelineError::config(format!("props are not valid JSON: {e}")))
}

fn cmd_render(args: RenderArgs) -> PipelineResult<()> {
    let concurrency = resolve_concurrency(args.concurrency)?;

    // --codec defaults to h264 for video output only; an explicit codec
    // combined with --image-sequence is a conflict and must reach
    // validation as-is.
    let codec = match (args.image_sequence, args.codec) {
        (false, None) => Some(Codec::H264),
        (_, codec) => codec,
    };

    let request = RenderRequest {
        entry_point: args.entry,
        composition_id: args.composition,
        output: args.out,
        codec,
        pixel_format: args.pixel_format,
        image_format: args.image_format,
        quality: args.quality,
        crf: args.crf,
        concurrency,
        overwrite: args.overwrite,
        image_sequence: args.image_sequence,
        props: parse_props(args.props.as_deref())?,
    };

    let bundler = DirBundler;
    let renderer = SolidFrameRenderer::default();
    let stitcher = FfmpegStitcher;
    let collab = Collaborators {
        bundler: &bundler,
        renderer: &renderer,
        stitcher: &stitcher,
    };

    tracing::info!(concurrency, "starting render");
    let outcome = stitchrun::render_media(&request, &collab, &LogSink)?;
    eprintln!(
        "wrote {} ({} frames)",
        outcome.output.display(),
        outcome.frames_rendered
    );
    Ok(())
}

fn cmd_compositions(args: CompositionsArgs) -> PipelineResult<()> {
    let temp = TempRegistry::new();
    let artifact_dir = temp.create_dir("bundle")?;
    DirBundler.bundle(&args.entry, &artifact_dir, &mut |_| {})?;
    let comps = resolve_compositions(&artifact_dir)?;
    for c in &comps {
        println!(
            "{}\t{}x{}\t{} fps\t{} frames",
            c.id, c.width, c.height, c.fps, c.duration_in_frames
        );
    }
    temp.dispose();
    Ok(())
}
