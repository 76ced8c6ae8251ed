//! Host agent configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use super::serde_utils::duration_secs;
use crate::error::ConfigError;
use crate::types::Program;

/// Configuration for the host agent
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Base URL of the coordinator (e.g. `https://coordinator.example.com`)
    pub server_address: String,

    /// Address the control-plane listener binds to
    pub listen_address: String,

    /// Address advertised to the coordinator at registration.
    /// Detected from the default route when unset.
    pub advertise_ip: Option<String>,

    /// Host display name (optional, defaults to hostname)
    pub host_name: Option<String>,

    /// Override for the persisted state file
    pub state_path: Option<PathBuf>,

    pub video: VideoConfig,

    pub transport: TransportConfig,

    pub status: StatusConfig,

    pub auth: AuthConfig,

    /// Programs a session may launch
    pub programs: Vec<Program>,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            server_address: "http://localhost:8080".to_string(),
            listen_address: "0.0.0.0:8080".to_string(),
            advertise_ip: None,
            host_name: None,
            state_path: None,
            video: VideoConfig::default(),
            transport: TransportConfig::default(),
            status: StatusConfig::default(),
            auth: AuthConfig::default(),
            programs: Vec::new(),
        }
    }
}

impl HostConfig {
    /// Get the host name, falling back to the machine hostname
    pub fn display_name(&self) -> String {
        self.host_name
            .clone()
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| gethostname::gethostname().to_string_lossy().into_owned())
    }

    /// Port of the listen address, used when registering with the coordinator
    pub fn listen_port(&self) -> Result<u16, ConfigError> {
        self.listen_address
            .rsplit_once(':')
            .and_then(|(_, port)| port.parse().ok())
            .ok_or_else(|| {
                ConfigError::Invalid(format!(
                    "listen_address '{}' has no port",
                    self.listen_address
                ))
            })
    }

    /// Resolved state file path
    pub fn state_file(&self) -> PathBuf {
        self.state_path
            .clone()
            .unwrap_or_else(super::default_state_path)
    }

    /// Check the values that cannot be defaulted around
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server_address.trim().is_empty() {
            return Err(ConfigError::MissingField("server_address".into()));
        }
        self.listen_port()?;
        if self.video.framerate == 0 {
            return Err(ConfigError::Invalid("video.framerate must be positive".into()));
        }
        if self.transport.mtu < 100 {
            return Err(ConfigError::Invalid(format!(
                "transport.mtu {} is too small",
                self.transport.mtu
            )));
        }
        for program in &self.programs {
            if program.id.trim().is_empty() {
                return Err(ConfigError::MissingField("programs.id".into()));
            }
        }
        Ok(())
    }
}

/// Screen capture and encoder settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoConfig {
    /// ffmpeg executable; looked up on `PATH` when empty
    pub ffmpeg_path: String,

    /// ffmpeg video encoder name
    pub encoder: String,

    /// Capture and encode rate in frames per second
    pub framerate: u32,

    /// Input device override (`desktop`, `:0.0`, `1:none`, ...)
    pub capture_input: Option<String>,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: String::new(),
            encoder: "libx264".to_string(),
            framerate: 30,
            capture_input: None,
        }
    }
}

impl VideoConfig {
    pub fn ffmpeg_binary(&self) -> &str {
        if self.ffmpeg_path.is_empty() {
            "ffmpeg"
        } else {
            &self.ffmpeg_path
        }
    }
}

/// Peer connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// ICE server URLs
    pub ice_servers: Vec<String>,

    /// Maximum RTP payload size in bytes
    pub mtu: usize,

    /// Upper bound on ICE candidate gathering
    #[serde(with = "duration_secs")]
    pub gather_timeout: Duration,

    /// Upper bound on launch, capture, transport and negotiation together
    #[serde(with = "duration_secs")]
    pub setup_timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            ice_servers: vec!["stun:stun.l.google.com:19302".to_string()],
            mtu: 1200,
            gather_timeout: Duration::from_secs(10),
            setup_timeout: Duration::from_secs(20),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusConfig {
    /// Idle heartbeat period
    #[serde(with = "duration_secs")]
    pub heartbeat_interval: Duration,
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(120),
        }
    }
}

/// Credential lifecycle settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Timeout applied to every outbound coordinator request
    #[serde(with = "duration_secs")]
    pub request_timeout: Duration,

    /// Timeout applied to the refresh call
    #[serde(with = "duration_secs")]
    pub refresh_timeout: Duration,

    /// Refresh when the access token expires within this window
    #[serde(with = "duration_secs")]
    pub refresh_window: Duration,

    /// How often the background refresher checks expiry
    #[serde(with = "duration_secs")]
    pub refresh_check_interval: Duration,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(10),
            refresh_timeout: Duration::from_secs(10),
            refresh_window: Duration::from_secs(300),
            refresh_check_interval: Duration::from_secs(60),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = HostConfig::default();
        assert_eq!(config.transport.mtu, 1200);
        assert_eq!(config.status.heartbeat_interval, Duration::from_secs(120));
        assert_eq!(config.auth.refresh_window, Duration::from_secs(300));
        assert_eq!(config.video.ffmpeg_binary(), "ffmpeg");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let toml = r#"
server_address = "https://coord.test"

[video]
framerate = 60

[transport]
ice_servers = []
gather_timeout = 3

[[programs]]
id = "notepad"
name = "Notepad"
path = "C:/Windows/notepad.exe"
"#;
        let config: HostConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.server_address, "https://coord.test");
        assert_eq!(config.video.framerate, 60);
        assert_eq!(config.video.encoder, "libx264");
        assert!(config.transport.ice_servers.is_empty());
        assert_eq!(config.transport.gather_timeout, Duration::from_secs(3));
        assert_eq!(config.transport.setup_timeout, Duration::from_secs(20));
        assert_eq!(config.programs.len(), 1);
        assert!(config.programs[0].args.is_empty());
    }

    #[test]
    fn test_listen_port() {
        let mut config = HostConfig::default();
        config.listen_address = "127.0.0.1:9443".into();
        assert_eq!(config.listen_port().unwrap(), 9443);

        config.listen_address = "localhost".into();
        assert!(config.listen_port().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_framerate() {
        let mut config = HostConfig::default();
        config.video.framerate = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_display_name_ignores_blank() {
        let mut config = HostConfig::default();
        config.host_name = Some("  ".into());
        assert!(!config.display_name().trim().is_empty());

        config.host_name = Some("living-room".into());
        assert_eq!(config.display_name(), "living-room");
    }
}
