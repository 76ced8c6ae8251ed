//! Core error types for hoststream

use std::path::PathBuf;
use thiserror::Error;

/// Configuration and state-file errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file not found
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    /// Invalid configuration
    #[error("Invalid config: {0}")]
    Invalid(String),

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialize error
    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// Missing required field
    #[error("Missing required field: {0}")]
    MissingField(String),
}

/// Persisted state errors
#[derive(Error, Debug)]
pub enum StateError {
    /// Reading or writing the state file failed
    #[error("State file I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The state file is not valid TOML for the expected shape
    #[error("Corrupt state file: {0}")]
    Corrupt(#[from] toml::de::Error),

    /// The state could not be serialized
    #[error("Failed to encode state: {0}")]
    Encode(#[from] toml::ser::Error),
}

/// Screen capture errors
#[derive(Error, Debug)]
pub enum CaptureError {
    /// The encoder process could not be started
    #[error("Failed to spawn capture process: {0}")]
    Spawn(#[source] std::io::Error),

    /// The process started without a readable output pipe
    #[error("Capture process has no stdout")]
    NoOutput,

    /// A capture is already running
    #[error("Capture already running")]
    AlreadyRunning,

    /// Capture is not available on this platform
    #[error("Unsupported platform: {0}")]
    UnsupportedPlatform(String),

    /// Stopping the capture failed
    #[error("Failed to stop capture: {0}")]
    Stop(#[source] std::io::Error),
}

/// Program launch errors
#[derive(Error, Debug)]
pub enum LaunchError {
    /// The program entry has no executable path
    #[error("Program '{0}' has no executable path")]
    EmptyPath(String),

    /// The process could not be spawned
    #[error("Failed to launch {path}: {source}")]
    Spawn {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Input injection errors
#[derive(Error, Debug)]
pub enum InjectError {
    /// The platform backend rejected the event
    #[error("Injection backend error: {0}")]
    Backend(String),

    /// No backend is available
    #[error("Injection unavailable: {0}")]
    Unavailable(String),
}
