#![forbid(unsafe_code)]

pub mod collab;
pub mod concurrency;
pub mod coordinator;
pub mod error;
pub mod formats;
pub mod model;
pub mod progress;
pub mod stitch;
pub mod temp;

pub use collab::{
    Bundler, COMPOSITIONS_MANIFEST, DirBundler, FrameContext, FrameRenderer, FrameStitcher,
    SolidFrameRenderer, StitchParams, resolve_compositions,
};
pub use concurrency::resolve_concurrency;
pub use coordinator::{Collaborators, PERF_ENV, render_media};
pub use error::{PipelineError, PipelineResult};
pub use formats::{
    Codec, EncoderCapabilities, ImageFormat, PixelFormat, advise_codec_support, frame_file_name,
    frame_pattern, validate_crf, validate_image_format, validate_pixel_format,
};
pub use model::{Composition, RenderOutcome, RenderRequest, RunPerf, Stage};
pub use progress::{LogSink, NullSink, ProgressEvent, ProgressSink, ProgressStage, RecordingSink};
pub use stitch::FfmpegStitcher;
pub use temp::TempRegistry;
