//! Screen capture sources

mod ffmpeg;

pub use ffmpeg::{capture_input_args, FfmpegCapture};
