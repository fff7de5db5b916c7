use std::{fmt, ops::RangeInclusive};

use crate::error::{PipelineError, PipelineResult};

/// Target video codec for stitched output.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Codec {
    H264,
    H265,
    Vp8,
    Vp9,
}

impl Codec {
    pub fn ffmpeg_encoder(self) -> &'static str {
        match self {
            Self::H264 => "libx264",
            Self::H265 => "libx265",
            Self::Vp8 => "libvpx",
            Self::Vp9 => "libvpx-vp9",
        }
    }

    /// Valid CRF domain for this codec (inclusive on both ends).
    pub fn crf_range(self) -> RangeInclusive<u32> {
        match self {
            Self::H264 | Self::H265 => 0..=51,
            Self::Vp8 => 4..=63,
            Self::Vp9 => 0..=63,
        }
    }

    /// Whether the codec can carry an alpha channel in its container.
    pub fn supports_alpha(self) -> bool {
        matches!(self, Self::Vp8 | Self::Vp9)
    }

    /// MP4-family codecs get `-movflags +faststart` so the moov atom
    /// lands at the front of the file.
    pub fn is_mp4_family(self) -> bool {
        matches!(self, Self::H264 | Self::H265)
    }

    pub fn allowed_pixel_formats(self) -> &'static [PixelFormat] {
        match self {
            Self::H264 | Self::H265 => &[
                PixelFormat::Yuv420p,
                PixelFormat::Yuv422p,
                PixelFormat::Yuv444p,
            ],
            Self::Vp8 => &[PixelFormat::Yuv420p, PixelFormat::Yuva420p],
            Self::Vp9 => &[
                PixelFormat::Yuv420p,
                PixelFormat::Yuv422p,
                PixelFormat::Yuv444p,
                PixelFormat::Yuva420p,
            ],
        }
    }
}

impl fmt::Display for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::H264 => "h264",
            Self::H265 => "h265",
            Self::Vp8 => "vp8",
            Self::Vp9 => "vp9",
        };
        f.write_str(s)
    }
}

/// Pixel format of the encoded video stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    Yuv420p,
    Yuv422p,
    Yuv444p,
    Yuva420p,
}

impl PixelFormat {
    pub fn ffmpeg_name(self) -> &'static str {
        match self {
            Self::Yuv420p => "yuv420p",
            Self::Yuv422p => "yuv422p",
            Self::Yuv444p => "yuv444p",
            Self::Yuva420p => "yuva420p",
        }
    }

    pub fn requires_alpha(self) -> bool {
        matches!(self, Self::Yuva420p)
    }

    /// Chroma subsampling constraints on frame dimensions.
    /// 4:2:0 needs both dimensions even, 4:2:2 an even width.
    pub fn validate_dimensions(self, width: u32, height: u32) -> PipelineResult<()> {
        let even = |n: u32| n.is_multiple_of(2);
        match self {
            Self::Yuv420p | Self::Yuva420p if !even(width) || !even(height) => {
                Err(PipelineError::config(format!(
                    "{} requires even dimensions, got {width}x{height}",
                    self.ffmpeg_name()
                )))
            }
            Self::Yuv422p if !even(width) => Err(PipelineError::config(format!(
                "yuv422p requires an even width, got {width}"
            ))),
            _ => Ok(()),
        }
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.ffmpeg_name())
    }
}

/// Raster format of individual rendered frames.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    Jpeg,
    Png,
}

impl ImageFormat {
    pub fn ext(self) -> &'static str {
        match self {
            Self::Jpeg => "jpeg",
            Self::Png => "png",
        }
    }

    pub fn supports_alpha(self) -> bool {
        matches!(self, Self::Png)
    }
}

impl fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.ext())
    }
}

/// File name for the raster of a single frame. Zero-padded so a
/// lexicographic listing matches frame order and ffmpeg's image2
/// demuxer can consume the directory with [`frame_pattern`].
pub fn frame_file_name(index: u64, format: ImageFormat) -> String {
    format!("frame-{index:05}.{}", format.ext())
}

/// The image2 input pattern matching [`frame_file_name`].
pub fn frame_pattern(format: ImageFormat) -> String {
    format!("frame-%05d.{}", format.ext())
}

pub fn validate_crf(codec: Codec, crf: u32) -> PipelineResult<()> {
    let range = codec.crf_range();
    if !range.contains(&crf) {
        return Err(PipelineError::config(format!(
            "crf {crf} is out of range for {codec} (valid: {}..={})",
            range.start(),
            range.end()
        )));
    }
    Ok(())
}

pub fn validate_pixel_format(codec: Codec, pixel_format: PixelFormat) -> PipelineResult<()> {
    if !codec.allowed_pixel_formats().contains(&pixel_format) {
        return Err(PipelineError::config(format!(
            "pixel format {pixel_format} is not supported by {codec}"
        )));
    }
    if pixel_format.requires_alpha() && !codec.supports_alpha() {
        return Err(PipelineError::config(format!(
            "{pixel_format} carries alpha but {codec} cannot encode an alpha channel"
        )));
    }
    Ok(())
}

pub fn validate_image_format(
    pixel_format: PixelFormat,
    image_format: ImageFormat,
) -> PipelineResult<()> {
    if pixel_format.requires_alpha() && !image_format.supports_alpha() {
        return Err(PipelineError::config(format!(
            "{pixel_format} requires an alpha channel but {image_format} frames cannot carry one"
        )));
    }
    Ok(())
}

/// Optional-encoder availability of the host ffmpeg build.
///
/// Populated by [`EncoderCapabilities::probe`] or constructed directly in
/// tests. A missing capability is advisory only: the encoder invocation is
/// the authoritative failure point.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EncoderCapabilities {
    pub has_libx265: bool,
    pub has_libvpx: bool,
}

impl EncoderCapabilities {
    /// Parse `ffmpeg -encoders` output. If ffmpeg cannot be spawned, all
    /// capabilities read as absent; the pipeline still proceeds and the
    /// encode stage surfaces the real failure.
    pub fn probe() -> Self {
        let output = std::process::Command::new("ffmpeg")
            .args(["-hide_banner", "-encoders"])
            .output();
        match output {
            Ok(out) => Self::from_encoder_list(&String::from_utf8_lossy(&out.stdout)),
            Err(_) => Self::default(),
        }
    }

    pub fn from_encoder_list(listing: &str) -> Self {
        Self {
            has_libx265: listing.contains("libx265"),
            has_libvpx: listing.contains("libvpx"),
        }
    }

    pub fn supports(&self, codec: Codec) -> bool {
        match codec {
            Codec::H264 => true,
            Codec::H265 => self.has_libx265,
            Codec::Vp8 | Codec::Vp9 => self.has_libvpx,
        }
    }
}

/// Warn when the selected codec needs an optional encoder the host build
/// lacks. Never fatal.
pub fn advise_codec_support(caps: &EncoderCapabilities, codec: Codec) {
    if !caps.supports(codec) {
        tracing::warn!(
            %codec,
            encoder = codec.ffmpeg_encoder(),
            "ffmpeg build does not advertise the encoder for the selected codec; \
             encoding may fail"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crf_boundaries_per_codec() {
        assert!(validate_crf(Codec::H264, 0).is_ok());
        assert!(validate_crf(Codec::H264, 51).is_ok());
        assert!(validate_crf(Codec::H264, 52).is_err());

        assert!(validate_crf(Codec::Vp9, 0).is_ok());
        assert!(validate_crf(Codec::Vp9, 63).is_ok());
        assert!(validate_crf(Codec::Vp9, 64).is_err());

        assert!(validate_crf(Codec::Vp8, 3).is_err());
        assert!(validate_crf(Codec::Vp8, 4).is_ok());
        assert!(validate_crf(Codec::Vp8, 63).is_ok());
    }

    #[test]
    fn alpha_pixel_formats_need_alpha_codecs() {
        assert!(validate_pixel_format(Codec::Vp9, PixelFormat::Yuva420p).is_ok());
        assert!(validate_pixel_format(Codec::Vp8, PixelFormat::Yuva420p).is_ok());
        assert!(validate_pixel_format(Codec::H264, PixelFormat::Yuva420p).is_err());
        assert!(validate_pixel_format(Codec::H265, PixelFormat::Yuva420p).is_err());
    }

    #[test]
    fn alpha_pixel_formats_need_alpha_capable_rasters() {
        assert!(validate_image_format(PixelFormat::Yuva420p, ImageFormat::Png).is_ok());
        assert!(validate_image_format(PixelFormat::Yuva420p, ImageFormat::Jpeg).is_err());
        assert!(validate_image_format(PixelFormat::Yuv420p, ImageFormat::Jpeg).is_ok());
    }

    #[test]
    fn subsampled_formats_reject_odd_dimensions() {
        assert!(PixelFormat::Yuv420p.validate_dimensions(640, 480).is_ok());
        assert!(PixelFormat::Yuv420p.validate_dimensions(641, 480).is_err());
        assert!(PixelFormat::Yuv422p.validate_dimensions(640, 481).is_ok());
        assert!(PixelFormat::Yuv422p.validate_dimensions(641, 480).is_err());
        assert!(PixelFormat::Yuv444p.validate_dimensions(641, 481).is_ok());
    }

    #[test]
    fn frame_names_are_zero_padded() {
        assert_eq!(frame_file_name(0, ImageFormat::Png), "frame-00000.png");
        assert_eq!(frame_file_name(7, ImageFormat::Jpeg), "frame-00007.jpeg");
        assert_eq!(frame_pattern(ImageFormat::Png), "frame-%05d.png");
    }

    #[test]
    fn capability_probe_parses_encoder_listing() {
        let caps = EncoderCapabilities::from_encoder_list(
            " V....D libx264    H.264\n V....D libx265    H.265\n",
        );
        assert!(caps.has_libx265);
        assert!(!caps.has_libvpx);
        assert!(caps.supports(Codec::H264));
        assert!(caps.supports(Codec::H265));
        assert!(!caps.supports(Codec::Vp9));
    }
}
