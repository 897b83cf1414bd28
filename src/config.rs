use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::GrabberError;

const ENV_PREFIX: &str = "FRAMEGRAB";

/// Slowest capture rate the timer accepts: one frame a day.
pub const MIN_FRAME_RATE: f64 = 1.0 / 86_400.0;

/// Tick period for a capture rate. Rates the timer cannot represent are rejected.
pub fn frame_period(frame_rate: f64) -> Result<Duration, GrabberError> {
    if !(frame_rate.is_finite() && frame_rate >= MIN_FRAME_RATE) {
        return Err(GrabberError::InvalidConfig(format!(
            "frame rate must be at least {} fps, got {}",
            MIN_FRAME_RATE, frame_rate
        )));
    }
    Duration::try_from_secs_f64(1.0 / frame_rate).map_err(|e| {
        GrabberError::InvalidConfig(format!("frame rate {} has no tick period: {}", frame_rate, e))
    })
}

/// Whole milliseconds, rounded up so a non-zero duration never becomes zero.
pub fn millis_ceil(duration: Duration) -> u64 {
    u64::try_from(duration.as_nanos().div_ceil(1_000_000)).unwrap_or(u64::MAX)
}

/// Tunables for one frame grabber.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct GrabberConfig {
    /// How long a single analysis call may run before its envelope reports a timeout.
    pub analysis_timeout_ms: u64,
    /// Capture rate used when neither the caller nor the source supplies one.
    pub default_frame_rate: f64,
    /// Interval of the trigger policy installed on a fresh grabber.
    pub analysis_interval_ms: u64,
    /// Capacity of the ordered result queue. Triggered frames beyond it are not analyzed.
    pub max_pending_analyses: usize,
    /// Abort the analysis task on timeout instead of letting it finish detached.
    pub cancel_on_timeout: bool,
    pub auto_stop_after_ms: Option<u64>,
    pub camera_probe_limit: usize,
}

impl Default for GrabberConfig {
    fn default() -> Self {
        Self {
            analysis_timeout_ms: 5000,
            default_frame_rate: 30.0,
            analysis_interval_ms: 1000,
            max_pending_analyses: 128,
            cancel_on_timeout: false,
            auto_stop_after_ms: None,
            camera_probe_limit: 100,
        }
    }
}

impl GrabberConfig {
    pub fn analysis_timeout(&self) -> Duration {
        Duration::from_millis(self.analysis_timeout_ms)
    }

    pub fn analysis_interval(&self) -> Duration {
        Duration::from_millis(self.analysis_interval_ms)
    }

    pub fn auto_stop_after(&self) -> Option<Duration> {
        self.auto_stop_after_ms.map(Duration::from_millis)
    }

    pub fn validate(&self) -> Result<(), GrabberError> {
        if self.analysis_timeout_ms == 0 {
            return Err(GrabberError::InvalidConfig(
                "analysis timeout must be greater than 0".to_string(),
            ));
        }
        frame_period(self.default_frame_rate)?;
        if self.max_pending_analyses == 0 {
            return Err(GrabberError::InvalidConfig(
                "max pending analyses must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Which source the binary starts with.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SourceConfig {
    Camera { index: usize, fps: Option<f64> },
    File { path: PathBuf },
}

impl Default for SourceConfig {
    fn default() -> Self {
        SourceConfig::Camera {
            index: 0,
            fps: None,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    pub grabber: GrabberConfig,
    pub logging: LoggingConfig,
    pub source: SourceConfig,
}

impl Settings {
    /// Layers an optional TOML file under `FRAMEGRAB__SECTION__KEY` environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, GrabberError> {
        let mut builder = ::config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(::config::File::from(path));
        }
        let settings: Settings = builder
            .add_source(
                ::config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        settings.grabber.validate()?;
        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_documented_values() {
        let config = GrabberConfig::default();
        assert_eq!(config.analysis_timeout(), Duration::from_millis(5000));
        assert_eq!(config.default_frame_rate, 30.0);
        assert!(!config.cancel_on_timeout);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validate_rejects_nonsense() {
        let zero_timeout = GrabberConfig {
            analysis_timeout_ms: 0,
            ..GrabberConfig::default()
        };
        assert!(zero_timeout.validate().is_err());

        let negative_rate = GrabberConfig {
            default_frame_rate: -1.0,
            ..GrabberConfig::default()
        };
        assert!(negative_rate.validate().is_err());

        let glacial_rate = GrabberConfig {
            default_frame_rate: 1e-30,
            ..GrabberConfig::default()
        };
        assert!(matches!(
            glacial_rate.validate(),
            Err(GrabberError::InvalidConfig(_))
        ));

        let no_queue = GrabberConfig {
            max_pending_analyses: 0,
            ..GrabberConfig::default()
        };
        assert!(no_queue.validate().is_err());
    }

    #[test]
    fn frame_period_rejects_unrepresentable_rates() {
        assert_eq!(frame_period(4.0).unwrap(), Duration::from_millis(250));
        assert!(frame_period(MIN_FRAME_RATE).unwrap() >= Duration::from_secs(86_399));
        for rate in [1e-30, 0.0, -5.0, f64::NAN, f64::INFINITY] {
            assert!(frame_period(rate).is_err(), "accepted {}", rate);
        }
    }

    #[test]
    fn millis_round_up_and_saturate() {
        assert_eq!(millis_ceil(Duration::from_micros(300)), 1);
        assert_eq!(millis_ceil(Duration::from_millis(750)), 750);
        assert_eq!(millis_ceil(Duration::ZERO), 0);
        assert_eq!(millis_ceil(Duration::MAX), u64::MAX);
    }

    #[test]
    fn loads_partial_toml_over_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[grabber]
analysis_timeout_ms = 750
auto_stop_after_ms = 60000

[logging]
level = "debug"

[source]
kind = "file"
path = "/tmp/clip"
"#
        )
        .unwrap();

        let settings = Settings::load(Some(file.path())).unwrap();
        assert_eq!(settings.grabber.analysis_timeout_ms, 750);
        assert_eq!(
            settings.grabber.auto_stop_after(),
            Some(Duration::from_secs(60))
        );
        assert_eq!(settings.grabber.max_pending_analyses, 128);
        assert_eq!(settings.logging.level, "debug");
        assert_eq!(
            settings.source,
            SourceConfig::File {
                path: PathBuf::from("/tmp/clip")
            }
        );
    }

    #[test]
    fn invalid_file_values_fail_validation() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[grabber]\nmax_pending_analyses = 0").unwrap();
        assert!(matches!(
            Settings::load(Some(file.path())),
            Err(GrabberError::InvalidConfig(_))
        ));
    }
}
