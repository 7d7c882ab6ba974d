//! Configuration for the glowcast daemon.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use glowcast_core::{ExpectedFailurePolicy, SessionConfig, SessionTimings, SinkAddress};

/// Top-level configuration loaded from a TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Where frames are sent.
    pub sink: SinkConfig,
    /// Capture settings.
    pub capture: CaptureConfig,
    /// Session loop tuning.
    pub session: SessionSettings,
    /// Logging settings.
    pub logging: LoggingConfig,
}

/// Sink connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SinkConfig {
    /// Sink host name or IP address.
    pub address: String,
    /// Sink TCP port.
    pub port: u16,
    /// Origin string announced at registration.
    pub origin: String,
}

/// Capture settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Output width in pixels; rounded down to even.
    pub width: u32,
    /// Output height in pixels; rounded down to even.
    pub height: u32,
    /// Frame-rate cap, 0 for unlimited.
    pub max_fps: u32,
    /// Force one backend by name ("vtcapture", "dile_vt", "graphic",
    /// "framebuffer"). Empty selects automatically.
    pub backend: String,
}

/// Session loop tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    /// Start streaming on launch.
    pub enabled: bool,
    /// Let DRM-protected and unsupported-operation failures consume the
    /// consecutive-error budget.
    pub count_expected_failures: bool,
    pub pause_poll_ms: u64,
    pub reconnect_delay_ms: u64,
    pub error_backoff_ms: u64,
    pub stop_timeout_ms: u64,
    pub register_timeout_ms: u64,
    /// Seconds between status log lines.
    pub status_interval_secs: u64,
    /// Frames between performance log lines, 0 to disable.
    pub perf_log_every: u64,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    pub level: String,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1".into(),
            port: 19400,
            origin: glowcast_core::wire::DEFAULT_ORIGIN.into(),
        }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            width: 160,
            height: 90,
            max_fps: 0,
            backend: String::new(),
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            count_expected_failures: false,
            pause_poll_ms: 100,
            reconnect_delay_ms: 2000,
            error_backoff_ms: 100,
            stop_timeout_ms: 5000,
            register_timeout_ms: 5000,
            status_interval_secs: 30,
            perf_log_every: 300,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

// ── Loading ──────────────────────────────────────────────────────

/// Why a configuration file could not be used.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no config at {}", .0.display())]
    Missing(PathBuf),

    #[error("cannot read config {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid config {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

impl DaemonConfig {
    /// Load configuration from a TOML file.
    ///
    /// Callers fall back to [`DaemonConfig::default`] on error and report it
    /// once logging is up.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                ConfigError::Missing(path.to_path_buf())
            } else {
                ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                }
            }
        })?;
        toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Write the default configuration to a file.
    pub fn write_default(path: &Path) -> std::io::Result<()> {
        let text = toml::to_string_pretty(&Self::default()).map_err(std::io::Error::other)?;
        std::fs::write(path, text)
    }

    /// The forced backend name, if one is configured.
    pub fn forced_backend(&self) -> Option<String> {
        let name = self.capture.backend.trim();
        (!name.is_empty()).then(|| name.to_string())
    }

    pub fn status_interval(&self) -> Duration {
        Duration::from_secs(self.session.status_interval_secs.max(1))
    }

    /// Convert into the core session settings, clamping unusable values.
    pub fn to_session_config(&self) -> SessionConfig {
        let even = |v: u32| v.clamp(2, 7680) & !1;
        let s = &self.session;
        SessionConfig {
            sink: SinkAddress::new(self.sink.address.clone(), self.sink.port),
            origin: self.sink.origin.clone(),
            width: even(self.capture.width),
            height: even(self.capture.height),
            max_fps: self.capture.max_fps.min(240),
            expected_failures: if s.count_expected_failures {
                ExpectedFailurePolicy::Count
            } else {
                ExpectedFailurePolicy::Ignore
            },
            timings: SessionTimings {
                pause_poll: Duration::from_millis(s.pause_poll_ms.max(10)),
                reconnect_delay: Duration::from_millis(s.reconnect_delay_ms.max(10)),
                error_backoff: Duration::from_millis(s.error_backoff_ms),
                stop_timeout: Duration::from_millis(s.stop_timeout_ms.max(100)),
                register_timeout: Duration::from_millis(s.register_timeout_ms.max(100)),
            },
            perf_log_every: s.perf_log_every,
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let text = toml::to_string_pretty(&DaemonConfig::default()).unwrap();
        assert!(text.contains("[sink]"));
        assert!(text.contains("reconnect_delay_ms"));
    }

    #[test]
    fn partial_file_fills_defaults() {
        let cfg: DaemonConfig = toml::from_str("[sink]\nport = 20000\n").unwrap();
        assert_eq!(cfg.sink.port, 20000);
        assert_eq!(cfg.sink.address, "127.0.0.1");
        assert_eq!(cfg.capture.width, 160);
        assert!(cfg.session.enabled);
    }

    #[test]
    fn to_session_config_clamps() {
        let mut cfg = DaemonConfig::default();
        cfg.capture.width = 161;
        cfg.capture.height = 0;
        cfg.capture.max_fps = 1000;
        cfg.session.count_expected_failures = true;
        let session = cfg.to_session_config();
        assert_eq!((session.width, session.height), (160, 2));
        assert_eq!(session.max_fps, 240);
        assert_eq!(session.expected_failures, ExpectedFailurePolicy::Count);
        assert_eq!(session.timings.reconnect_delay, Duration::from_secs(2));
    }

    #[test]
    fn forced_backend_ignores_blank() {
        let mut cfg = DaemonConfig::default();
        assert_eq!(cfg.forced_backend(), None);
        cfg.capture.backend = "  framebuffer ".into();
        assert_eq!(cfg.forced_backend().as_deref(), Some("framebuffer"));
    }

    #[test]
    fn write_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("glowcast.toml");
        DaemonConfig::write_default(&path).unwrap();
        let cfg = DaemonConfig::load(&path).unwrap();
        assert_eq!(cfg.sink.port, 19400);
        assert_eq!(cfg.logging.level, "info");
    }

    #[test]
    fn load_reports_why_a_file_was_unusable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.toml");
        std::fs::write(&path, "sink = 5").unwrap();

        let err = DaemonConfig::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains("broken.toml"));

        let missing = DaemonConfig::load(&dir.path().join("missing.toml")).unwrap_err();
        assert!(matches!(missing, ConfigError::Missing(_)));

        let dir_err = DaemonConfig::load(dir.path()).unwrap_err();
        assert!(matches!(dir_err, ConfigError::Read { .. }));
    }
}
