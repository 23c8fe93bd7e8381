//! Worker configuration.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use storyreel_core::assembly::{parse_video_resolution, validate_music_gain, DEFAULT_FPS, DEFAULT_MUSIC_GAIN};
use storyreel_core::cost::CostRates;
use storyreel_core::feedback::DEFAULT_FEEDBACK_TIMEOUT_SECS;
use storyreel_core::job::FormFactor;
use storyreel_core::naming::DEFAULT_SLUG_WORDS;
use storyreel_core::outcome::validate_drop_threshold;
use storyreel_pipeline::assembly::AssemblyConfig;
use storyreel_pipeline::command::DEFAULT_COMMAND_TIMEOUT;
use storyreel_pipeline::providers::VisualMode;
use storyreel_pipeline::retry::RetryPolicy;
use storyreel_pipeline::runner::DEFAULT_ARTIFACT_TTL;
use storyreel_pipeline::synchronizer::{Placeholder, SyncConfig, DEFAULT_CONCURRENCY};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{var}={value:?} is invalid: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

/// Everything the worker needs to build and run the production engine.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub database_url: String,
    pub output_root: PathBuf,
    pub max_concurrency: usize,
    pub retry: RetryPolicy,
    pub max_dropped_fraction: f64,
    pub feedback_timeout: Duration,
    pub pause: Duration,
    pub visual_mode: VisualMode,
    pub placeholder: Placeholder,
    pub music_dir: Option<PathBuf>,
    pub music_gain: f64,
    pub resolution: (u32, u32),
    pub fps: u32,
    pub slug_words: usize,
    pub artifact_ttl: Duration,
    pub required_forms: Vec<FormFactor>,
    pub narration_command: Option<String>,
    pub visual_command: Option<String>,
    pub enhance_command: Option<String>,
    pub writer_command: Option<String>,
    pub command_timeout: Duration,
    pub rates: CostRates,
}

impl WorkerConfig {
    /// Load configuration from environment variables.
    ///
    /// | Env Var                    | Default                  |
    /// |----------------------------|--------------------------|
    /// | `DATABASE_URL`             | `sqlite://storyreel.db`  |
    /// | `OUTPUT_ROOT`              | `output`                 |
    /// | `MAX_CONCURRENCY`          | `4`                      |
    /// | `RETRY_MAX_ATTEMPTS`       | `3`                      |
    /// | `RETRY_INITIAL_DELAY_MS`   | `1000`                   |
    /// | `RETRY_MAX_DELAY_MS`       | `30000`                  |
    /// | `MAX_DROPPED_FRACTION`     | required, `[0, 1]`       |
    /// | `FEEDBACK_TIMEOUT_SECS`    | `3`                      |
    /// | `PAUSE_SECS`               | `0.75`                   |
    /// | `VISUAL_MODE`              | `image`                  |
    /// | `PLACEHOLDER`              | `color:black`            |
    /// | `MUSIC_DIR`                | unset                    |
    /// | `MUSIC_GAIN`               | `0.15`                   |
    /// | `VIDEO_RESOLUTION`         | `1080p`                  |
    /// | `VIDEO_FPS`                | `30`                     |
    /// | `SLUG_WORDS`               | `5`                      |
    /// | `ARTIFACT_TTL_HOURS`       | `72`                     |
    /// | `REQUIRED_FORMS`           | `long_form,short_form`   |
    /// | `NARRATION_COMMAND`        | unset                    |
    /// | `VISUAL_COMMAND`           | unset                    |
    /// | `ENHANCE_COMMAND`          | unset                    |
    /// | `WRITER_COMMAND`           | unset                    |
    /// | `COMMAND_TIMEOUT_SECS`     | `300`                    |
    /// | `PRICE_PER_NARRATION_CHAR` | `0`                      |
    /// | `PRICE_PER_IMAGE`          | `0`                      |
    /// | `PRICE_PER_RENDER_SEC`     | `0`                      |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Load configuration through `lookup`, which returns a variable's value
    /// if it is set.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env { lookup };
        let defaults = RetryPolicy::default();

        let retry = RetryPolicy {
            max_attempts: env.parse("RETRY_MAX_ATTEMPTS", defaults.max_attempts)?,
            initial_delay: Duration::from_millis(env.parse(
                "RETRY_INITIAL_DELAY_MS",
                defaults.initial_delay.as_millis() as u64,
            )?),
            max_delay: Duration::from_millis(
                env.parse("RETRY_MAX_DELAY_MS", defaults.max_delay.as_millis() as u64)?,
            ),
            multiplier: defaults.multiplier,
        };

        let max_dropped_fraction = env
            .get("MAX_DROPPED_FRACTION")
            .ok_or(ConfigError::Missing("MAX_DROPPED_FRACTION"))?;
        let max_dropped_fraction = max_dropped_fraction
            .parse::<f64>()
            .map_err(|e| e.to_string())
            .and_then(|v| validate_drop_threshold(v).map_err(|e| e.to_string()))
            .map_err(|reason| invalid("MAX_DROPPED_FRACTION", &max_dropped_fraction, reason))?;

        let pause_secs: f64 = env.parse("PAUSE_SECS", 0.75)?;
        if !pause_secs.is_finite() || pause_secs < 0.0 {
            return Err(invalid("PAUSE_SECS", &pause_secs.to_string(), "must be non-negative"));
        }

        let music_gain: f64 = env.parse("MUSIC_GAIN", DEFAULT_MUSIC_GAIN)?;
        validate_music_gain(music_gain)
            .map_err(|e| invalid("MUSIC_GAIN", &music_gain.to_string(), e))?;

        let resolution_raw = env.get("VIDEO_RESOLUTION").unwrap_or_else(|| "1080p".into());
        let resolution = parse_video_resolution(&resolution_raw)
            .map_err(|e| invalid("VIDEO_RESOLUTION", &resolution_raw, e))?;

        let fps: u32 = env.parse("VIDEO_FPS", DEFAULT_FPS)?;
        if fps == 0 {
            return Err(invalid("VIDEO_FPS", "0", "must be positive"));
        }

        let forms_raw = env
            .get("REQUIRED_FORMS")
            .unwrap_or_else(|| "long_form,short_form".into());
        let required_forms = FormFactor::parse_list(&forms_raw)
            .map_err(|e| invalid("REQUIRED_FORMS", &forms_raw, e))?;

        Ok(Self {
            database_url: env
                .get("DATABASE_URL")
                .unwrap_or_else(|| "sqlite://storyreel.db".into()),
            output_root: env.get("OUTPUT_ROOT").unwrap_or_else(|| "output".into()).into(),
            max_concurrency: env.parse("MAX_CONCURRENCY", DEFAULT_CONCURRENCY)?.max(1),
            retry,
            max_dropped_fraction,
            feedback_timeout: Duration::from_secs(
                env.parse("FEEDBACK_TIMEOUT_SECS", DEFAULT_FEEDBACK_TIMEOUT_SECS)?,
            ),
            pause: Duration::from_secs_f64(pause_secs),
            visual_mode: env.parse("VISUAL_MODE", VisualMode::default())?,
            placeholder: env.parse("PLACEHOLDER", Placeholder::default())?,
            music_dir: env.get("MUSIC_DIR").map(PathBuf::from),
            music_gain,
            resolution,
            fps,
            slug_words: env.parse("SLUG_WORDS", DEFAULT_SLUG_WORDS)?.max(1),
            artifact_ttl: Duration::from_secs(
                env.parse("ARTIFACT_TTL_HOURS", DEFAULT_ARTIFACT_TTL.as_secs() / 3600)? * 3600,
            ),
            required_forms,
            narration_command: env.get("NARRATION_COMMAND"),
            visual_command: env.get("VISUAL_COMMAND"),
            enhance_command: env.get("ENHANCE_COMMAND"),
            writer_command: env.get("WRITER_COMMAND"),
            command_timeout: Duration::from_secs(
                env.parse("COMMAND_TIMEOUT_SECS", DEFAULT_COMMAND_TIMEOUT.as_secs())?,
            ),
            rates: CostRates {
                per_narration_char: env.parse("PRICE_PER_NARRATION_CHAR", 0.0)?,
                per_image: env.parse("PRICE_PER_IMAGE", 0.0)?,
                per_render_sec: env.parse("PRICE_PER_RENDER_SEC", 0.0)?,
            },
        })
    }

    pub fn sync_config(&self) -> SyncConfig {
        SyncConfig {
            concurrency: self.max_concurrency,
            retry: self.retry.clone(),
            max_dropped_fraction: self.max_dropped_fraction,
            visual_mode: self.visual_mode,
            placeholder: self.placeholder.clone(),
            default_pause: self.pause,
            slug_words: self.slug_words,
        }
    }

    pub fn assembly_config(&self) -> AssemblyConfig {
        AssemblyConfig {
            music_dir: self.music_dir.clone(),
            music_gain: self.music_gain,
        }
    }
}

struct Env<F> {
    lookup: F,
}

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    /// Value of `var`, with blank values treated as unset.
    fn get(&self, var: &str) -> Option<String> {
        (self.lookup)(var)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn parse<T>(&self, var: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.get(var) {
            None => Ok(default),
            Some(raw) => raw.parse().map_err(|e| invalid(var, &raw, e)),
        }
    }
}

fn invalid(var: &'static str, value: &str, reason: impl std::fmt::Display) -> ConfigError {
    ConfigError::Invalid {
        var,
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use assert_matches::assert_matches;

    use super::*;

    fn load(vars: &[(&str, &str)]) -> Result<WorkerConfig, ConfigError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        WorkerConfig::from_lookup(|var| map.get(var).cloned())
    }

    // -- defaults --

    #[test]
    fn defaults_with_only_threshold() {
        let config = load(&[("MAX_DROPPED_FRACTION", "0.2")]).unwrap();
        assert_eq!(config.database_url, "sqlite://storyreel.db");
        assert_eq!(config.output_root, PathBuf::from("output"));
        assert_eq!(config.max_concurrency, 4);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.initial_delay, Duration::from_secs(1));
        assert_eq!(config.retry.max_delay, Duration::from_secs(30));
        assert_eq!(config.feedback_timeout, Duration::from_secs(3));
        assert_eq!(config.pause, Duration::from_millis(750));
        assert_eq!(config.visual_mode, VisualMode::Image);
        assert_eq!(config.placeholder, Placeholder::default());
        assert_eq!(config.resolution, (1920, 1080));
        assert_eq!(config.fps, 30);
        assert_eq!(config.artifact_ttl, Duration::from_secs(72 * 3600));
        assert_eq!(
            config.required_forms,
            vec![FormFactor::LongForm, FormFactor::ShortForm]
        );
        assert!(config.narration_command.is_none());
        assert_eq!(config.rates, CostRates::default());
    }

    #[test]
    fn threshold_is_required() {
        assert_eq!(
            load(&[]).unwrap_err(),
            ConfigError::Missing("MAX_DROPPED_FRACTION")
        );
        assert_eq!(
            load(&[("MAX_DROPPED_FRACTION", "  ")]).unwrap_err(),
            ConfigError::Missing("MAX_DROPPED_FRACTION")
        );
    }

    // -- validation --

    #[test]
    fn invalid_values_name_the_variable() {
        let err = load(&[("MAX_DROPPED_FRACTION", "1.5")]).unwrap_err();
        assert_matches!(err, ConfigError::Invalid { var: "MAX_DROPPED_FRACTION", .. });

        let err = load(&[("MAX_DROPPED_FRACTION", "0.2"), ("VISUAL_MODE", "hologram")]).unwrap_err();
        assert_matches!(err, ConfigError::Invalid { var: "VISUAL_MODE", .. });

        let err = load(&[("MAX_DROPPED_FRACTION", "0.2"), ("MUSIC_GAIN", "3")]).unwrap_err();
        assert_matches!(err, ConfigError::Invalid { var: "MUSIC_GAIN", .. });

        let err = load(&[("MAX_DROPPED_FRACTION", "0.2"), ("MAX_CONCURRENCY", "many")]).unwrap_err();
        assert_matches!(err, ConfigError::Invalid { var: "MAX_CONCURRENCY", .. });
    }

    #[test]
    fn overrides_apply() {
        let config = load(&[
            ("MAX_DROPPED_FRACTION", "0"),
            ("VIDEO_RESOLUTION", "720p"),
            ("PLACEHOLDER", "previous_frame"),
            ("REQUIRED_FORMS", "short_form"),
            ("MUSIC_DIR", "/srv/music"),
            ("NARRATION_COMMAND", "tts --voice calm"),
            ("PRICE_PER_IMAGE", "0.04"),
        ])
        .unwrap();
        assert_eq!(config.max_dropped_fraction, 0.0);
        assert_eq!(config.resolution, (1280, 720));
        assert_eq!(config.placeholder, Placeholder::PreviousFrame);
        assert_eq!(config.required_forms, vec![FormFactor::ShortForm]);
        assert_eq!(config.assembly_config().music_dir, Some(PathBuf::from("/srv/music")));
        assert_eq!(config.narration_command.as_deref(), Some("tts --voice calm"));
        assert_eq!(config.rates.per_image, 0.04);
        assert_eq!(config.sync_config().placeholder, Placeholder::PreviousFrame);
    }
}
