use std::{
    io::BufRead as _,
    path::Path,
    process::{Command, Stdio},
};

use anyhow::Context as _;

use crate::{
    collab::{FrameStitcher, StitchParams},
    error::{PipelineError, PipelineResult},
    formats::{self, EncoderCapabilities},
};

pub fn is_ffmpeg_on_path() -> bool {
    Command::new("ffmpeg")
        .arg("-version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

pub fn ensure_parent_dir(path: &Path) -> PipelineResult<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create output directory '{}'", parent.display()))?;
    }
    Ok(())
}

/// Encoder collaborator backed by the system `ffmpeg` binary.
///
/// We intentionally shell out rather than link FFmpeg to avoid native dev
/// header/lib requirements. The completed frame directory is consumed via
/// the image2 demuxer; per-frame consumption progress is parsed from
/// `-progress pipe:1` output.
#[derive(Clone, Copy, Debug, Default)]
pub struct FfmpegStitcher;

impl FfmpegStitcher {
    fn build_args(params: &StitchParams<'_>) -> Vec<String> {
        let pattern = params
            .frame_dir
            .join(formats::frame_pattern(params.image_format));

        let mut args: Vec<String> = Vec::new();
        args.push(if params.overwrite { "-y" } else { "-n" }.to_string());
        args.push("-loglevel".to_string());
        args.push("error".to_string());
        args.push("-framerate".to_string());
        args.push(params.fps.to_string());
        args.push("-i".to_string());
        args.push(pattern.to_string_lossy().to_string());
        args.push("-an".to_string());
        args.push("-c:v".to_string());
        args.push(params.codec.ffmpeg_encoder().to_string());
        args.push("-pix_fmt".to_string());
        args.push(params.pixel_format.ffmpeg_name().to_string());
        args.push("-crf".to_string());
        args.push(params.crf.to_string());
        args.push("-s:v".to_string());
        args.push(format!("{}x{}", params.width, params.height));
        if params.codec.is_mp4_family() {
            args.push("-movflags".to_string());
            args.push("+faststart".to_string());
        }
        args.push("-progress".to_string());
        args.push("pipe:1".to_string());
        args.push(params.output.to_string_lossy().to_string());
        args
    }
}

impl FrameStitcher for FfmpegStitcher {
    fn capabilities(&self) -> EncoderCapabilities {
        EncoderCapabilities::probe()
    }

    fn stitch(
        &self,
        params: &StitchParams<'_>,
        on_progress: &mut dyn FnMut(u64),
    ) -> PipelineResult<()> {
        if !is_ffmpeg_on_path() {
            return Err(PipelineError::encode(
                "ffmpeg is required for video output, but was not found on PATH",
            ));
        }
        ensure_parent_dir(params.output)?;

        let mut cmd = Command::new("ffmpeg");
        cmd.args(Self::build_args(params));
        run_encoder(cmd, params.total_frames, on_progress)?;

        on_progress(params.total_frames);
        Ok(())
    }
}

/// Spawn the encoder process and drive its progress stream.
///
/// Both streams are piped, so stderr is drained on its own thread while
/// the progress loop reads stdout; a blocking stdout loop alone would
/// deadlock once the encoder fills the stderr pipe buffer.
fn run_encoder(
    mut cmd: Command,
    total_frames: u64,
    on_progress: &mut dyn FnMut(u64),
) -> PipelineResult<()> {
    let mut child = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| PipelineError::encode(format!("failed to spawn ffmpeg: {e}")))?;

    let stderr_thread = child.stderr.take().map(|mut stderr| {
        std::thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = std::io::Read::read_to_end(&mut stderr, &mut buf);
            buf
        })
    });

    // `-progress pipe:1` emits key=value blocks; `frame=N` counts frames
    // consumed so far.
    if let Some(stdout) = child.stdout.take() {
        let reader = std::io::BufReader::new(stdout);
        for line in reader.lines() {
            let Ok(line) = line else { break };
            if let Some(n) = line.strip_prefix("frame=")
                && let Ok(n) = n.trim().parse::<u64>()
            {
                on_progress(n.min(total_frames));
            }
        }
    }

    let stderr = stderr_thread
        .and_then(|t| t.join().ok())
        .unwrap_or_default();
    let status = child
        .wait()
        .map_err(|e| PipelineError::encode(format!("failed to wait for ffmpeg: {e}")))?;

    if !status.success() {
        let stderr = String::from_utf8_lossy(&stderr);
        return Err(PipelineError::encode(format!(
            "ffmpeg exited with status {status}: {}",
            stderr.trim()
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formats::{Codec, ImageFormat, PixelFormat};
    use std::path::PathBuf;

    fn params<'a>(frame_dir: &'a Path, output: &'a Path, codec: Codec) -> StitchParams<'a> {
        StitchParams {
            frame_dir,
            image_format: ImageFormat::Jpeg,
            width: 640,
            height: 480,
            fps: 30,
            output,
            overwrite: true,
            pixel_format: PixelFormat::Yuv420p,
            codec,
            crf: 18,
            total_frames: 30,
        }
    }

    #[test]
    fn h264_args_include_crf_pattern_and_faststart() {
        let frame_dir = PathBuf::from("frames");
        let output = PathBuf::from("out.mp4");
        let args = FfmpegStitcher::build_args(&params(&frame_dir, &output, Codec::H264));

        assert_eq!(args[0], "-y");
        assert!(args.contains(&"libx264".to_string()));
        assert!(args.contains(&"yuv420p".to_string()));
        assert!(args.contains(&"18".to_string()));
        assert!(args.contains(&"+faststart".to_string()));
        assert!(args.iter().any(|a| a.ends_with("frame-%05d.jpeg")));
        assert_eq!(args.last().map(String::as_str), Some("out.mp4"));
    }

    #[test]
    fn vp9_args_skip_faststart_and_honor_overwrite_flag() {
        let frame_dir = PathBuf::from("frames");
        let output = PathBuf::from("out.webm");
        let mut p = params(&frame_dir, &output, Codec::Vp9);
        p.overwrite = false;
        let args = FfmpegStitcher::build_args(&p);

        assert_eq!(args[0], "-n");
        assert!(args.contains(&"libvpx-vp9".to_string()));
        assert!(!args.contains(&"+faststart".to_string()));
    }

    #[test]
    fn ensure_parent_dir_handles_bare_filenames() {
        assert!(ensure_parent_dir(Path::new("out.mp4")).is_ok());
    }

    #[cfg(unix)]
    fn sh(script: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(script);
        cmd
    }

    #[cfg(unix)]
    #[test]
    fn run_encoder_parses_frame_progress() {
        let mut ticks = Vec::new();
        run_encoder(
            sh("printf 'frame=1\\nbitrate=0\\nframe=2\\nframe=99\\n'"),
            3,
            &mut |n| ticks.push(n),
        )
        .unwrap();
        assert_eq!(ticks, vec![1, 2, 3]);
    }

    #[cfg(unix)]
    #[test]
    fn run_encoder_survives_large_stderr_and_reports_it() {
        // Write well past the OS pipe buffer on stderr while stdout stays
        // open, then exit non-zero. A stdout-first drain would deadlock
        // here instead of returning.
        let script = "i=0; while [ $i -lt 3000 ]; do \
                      echo 'frame 0: decode error, skipping xxxxxxxxxxxxxxxxxxxxxxxx' >&2; \
                      i=$((i+1)); done; echo 'frame=1'; exit 1";
        let err = run_encoder(sh(script), 10, &mut |_| {}).unwrap_err();
        assert!(matches!(err, PipelineError::Encode(_)));
        assert!(err.to_string().contains("decode error"));
    }
}
