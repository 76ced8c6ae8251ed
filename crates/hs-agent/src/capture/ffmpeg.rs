//! Screen capture through an `ffmpeg` child process
//!
//! ffmpeg grabs the desktop with the platform's capture device, encodes it
//! with low-latency settings, and writes an Annex-B H.264 elementary stream
//! to stdout.

use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;

use hs_core::config::VideoConfig;
use hs_core::traits::{CaptureSource, VideoStream};
use hs_core::CaptureError;

/// Capture source backed by ffmpeg
pub struct FfmpegCapture {
    config: VideoConfig,
    child: Mutex<Option<Child>>,
}

impl FfmpegCapture {
    pub fn new(config: VideoConfig) -> Self {
        Self {
            config,
            child: Mutex::new(None),
        }
    }

    /// Full ffmpeg argument list for this platform
    pub fn build_args(&self) -> Result<Vec<String>, CaptureError> {
        self.build_args_for(std::env::consts::OS)
    }

    fn build_args_for(&self, os: &str) -> Result<Vec<String>, CaptureError> {
        let fps = self.config.framerate.to_string();

        let mut args = vec![
            "-framerate".to_string(),
            fps.clone(),
            "-probesize".into(),
            "42M".into(),
            "-thread_queue_size".into(),
            "4096".into(),
        ];
        args.extend(capture_input_args(os, self.config.capture_input.as_deref())?);
        args.extend(self.low_latency_args(&fps));
        args.extend(self.encoder_args());
        args.extend(["-f".to_string(), "h264".into(), "-".into()]);
        Ok(args)
    }

    fn low_latency_args(&self, fps: &str) -> Vec<String> {
        [
            "-an",
            "-c:v",
            self.config.encoder.as_str(),
            "-pix_fmt",
            "yuv420p",
            "-bf",
            "0",
            "-sc_threshold",
            "0",
            "-fflags",
            "nobuffer",
            "-flags",
            "low_delay",
            "-g",
            fps,
            "-fps_mode",
            "cfr",
            "-r",
            fps,
        ]
        .iter()
        .map(|s| s.to_string())
        .collect()
    }

    fn encoder_args(&self) -> Vec<String> {
        let fps = self.config.framerate;
        let encoder = self.config.encoder.as_str();

        if encoder.contains("libx264") {
            vec![
                "-preset".into(),
                "veryfast".into(),
                "-tune".into(),
                "zerolatency".into(),
                "-profile:v".into(),
                "baseline".into(),
                "-level:v".into(),
                "3.1".into(),
                "-x264-params".into(),
                format!(
                    "repeat-headers=1:scenecut=0:keyint={fps}:min-keyint={fps}:no-mbtree"
                ),
            ]
        } else if encoder.contains("nvenc") {
            [
                "-preset", "p1", "-tune", "ll", "-rc", "cbr", "-b:v", "8M", "-maxrate", "8M",
                "-bufsize", "2M", "-forced-idr", "1", "-delay", "0",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect()
        } else {
            [
                "-b:v", "8M", "-maxrate", "10M", "-bufsize", "10M",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect()
        }
    }
}

/// ffmpeg input device arguments for `os`
pub fn capture_input_args(os: &str, input: Option<&str>) -> Result<Vec<String>, CaptureError> {
    let (format, default_input) = match os {
        "windows" => ("gdigrab", "desktop".to_string()),
        "linux" => (
            "x11grab",
            std::env::var("DISPLAY").unwrap_or_else(|_| ":0.0".to_string()),
        ),
        "macos" => ("avfoundation", "1:none".to_string()),
        other => return Err(CaptureError::UnsupportedPlatform(other.to_string())),
    };

    let input = input.map(str::to_string).unwrap_or(default_input);
    Ok(vec!["-f".into(), format.into(), "-i".into(), input])
}

#[async_trait]
impl CaptureSource for FfmpegCapture {
    async fn start(&self) -> Result<VideoStream, CaptureError> {
        let mut slot = self.child.lock().await;
        if slot.is_some() {
            return Err(CaptureError::AlreadyRunning);
        }

        let args = self.build_args()?;
        tracing::info!(
            "Starting capture: {} {}",
            self.config.ffmpeg_binary(),
            args.join(" ")
        );

        let mut child = Command::new(self.config.ffmpeg_binary())
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(CaptureError::Spawn)?;

        let stdout = child.stdout.take().ok_or(CaptureError::NoOutput)?;

        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::trace!(target: "ffmpeg", "{}", line);
                }
            });
        }

        *slot = Some(child);
        Ok(Box::new(stdout))
    }

    async fn stop(&self) -> Result<(), CaptureError> {
        let Some(mut child) = self.child.lock().await.take() else {
            return Ok(());
        };

        tracing::info!("Stopping capture (pid {:?})", child.id());
        match child.kill().await {
            Ok(()) => Ok(()),
            // already exited
            Err(e) if e.kind() == std::io::ErrorKind::InvalidInput => Ok(()),
            Err(e) => Err(CaptureError::Stop(e)),
        }
    }

    fn frame_rate(&self) -> u32 {
        self.config.framerate
    }
}
