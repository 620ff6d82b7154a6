//! Marking surface configuration
//!
//! Values start from defaults, are overridden by a `key = value` config file,
//! then by `MARKING_*` environment variables.

use crate::autosave::DEFAULT_AUTOSAVE_DEBOUNCE;
use crate::coords::DEFAULT_PRECISION;
use crate::history::DEFAULT_HISTORY_CAP;
use crate::layer::LayerSettings;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_RESIZE_DEBOUNCE: Duration = Duration::from_millis(300);

const ENV_AUTOSAVE_MS: &str = "MARKING_AUTOSAVE_MS";
const ENV_RESIZE_DEBOUNCE_MS: &str = "MARKING_RESIZE_DEBOUNCE_MS";
const ENV_HISTORY_CAP: &str = "MARKING_HISTORY_CAP";
const ENV_ERASER_WIDTH: &str = "MARKING_ERASER_WIDTH";
const ENV_API_URL: &str = "MARKING_API_URL";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for configuration key: {0}")]
    InvalidValue(String),
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SurfaceConfig {
    /// Quiet period before annotations are saved
    pub autosave_debounce: Duration,
    /// Quiet period after a resize before pages are re-rendered
    pub resize_debounce: Duration,
    pub history_cap: usize,
    /// Eraser tool width in pixels
    pub eraser_width: f64,
    /// Pencil width on an A4-sized render
    pub pencil_width: f64,
    pub base_font_size: f64,
    /// Decimal places kept on saved percentages
    pub precision: u32,
    /// Root of the assessment REST API; `None` runs against the in-memory backend
    pub api_base_url: Option<String>,
}

impl Default for SurfaceConfig {
    fn default() -> Self {
        Self {
            autosave_debounce: DEFAULT_AUTOSAVE_DEBOUNCE,
            resize_debounce: DEFAULT_RESIZE_DEBOUNCE,
            history_cap: DEFAULT_HISTORY_CAP,
            eraser_width: 20.0,
            pencil_width: 2.0,
            base_font_size: 16.0,
            precision: DEFAULT_PRECISION,
            api_base_url: None,
        }
    }
}

fn parse<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse::<T>()
        .map_err(|_| ConfigError::InvalidValue(key.to_string()))
}

fn positive(key: &str, value: f64) -> Result<f64, ConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(value)
    } else {
        Err(ConfigError::InvalidValue(key.to_string()))
    }
}

impl SurfaceConfig {
    pub fn with_autosave_ms(mut self, ms: u64) -> Self {
        self.autosave_debounce = Duration::from_millis(ms);
        self
    }

    pub fn with_resize_debounce_ms(mut self, ms: u64) -> Self {
        self.resize_debounce = Duration::from_millis(ms);
        self
    }

    pub fn with_history_cap(mut self, cap: usize) -> Self {
        self.history_cap = cap;
        self
    }

    pub fn with_eraser_width(mut self, width: f64) -> Self {
        self.eraser_width = width;
        self
    }

    pub fn with_api_base_url(mut self, url: impl Into<String>) -> Self {
        self.api_base_url = Some(url.into());
        self
    }

    /// `~/.config/marking-desk/config.toml` or the platform equivalent.
    pub fn default_path() -> PathBuf {
        match dirs::config_dir() {
            Some(dir) => dir.join("marking-desk").join("config.toml"),
            None => PathBuf::from("marking-desk.toml"),
        }
    }

    /// Defaults, then `path` if it exists, then the environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config = match path {
            Some(path) if path.exists() => Self::from_file(path)?,
            _ => Self::default(),
        };
        config.apply_env()
    }

    /// Defaults overridden by the environment only.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().apply_env()
    }

    fn apply_env(mut self) -> Result<Self, ConfigError> {
        if let Ok(val) = std::env::var(ENV_AUTOSAVE_MS) {
            self.autosave_debounce = Duration::from_millis(parse(ENV_AUTOSAVE_MS, &val)?);
        }
        if let Ok(val) = std::env::var(ENV_RESIZE_DEBOUNCE_MS) {
            self.resize_debounce = Duration::from_millis(parse(ENV_RESIZE_DEBOUNCE_MS, &val)?);
        }
        if let Ok(val) = std::env::var(ENV_HISTORY_CAP) {
            self.history_cap = parse(ENV_HISTORY_CAP, &val)?;
            if self.history_cap == 0 {
                return Err(ConfigError::InvalidValue(ENV_HISTORY_CAP.to_string()));
            }
        }
        if let Ok(val) = std::env::var(ENV_ERASER_WIDTH) {
            self.eraser_width = positive(ENV_ERASER_WIDTH, parse(ENV_ERASER_WIDTH, &val)?)?;
        }
        if let Ok(val) = std::env::var(ENV_API_URL) {
            let val = val.trim();
            self.api_base_url = (!val.is_empty()).then(|| val.to_string());
        }
        Ok(self)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path.as_ref())?;
        Self::parse_str(&contents)
    }

    /// Parse `key = value` lines; `#` starts a comment line and unknown keys are ignored.
    pub fn parse_str(contents: &str) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        for line in contents.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let key = key.trim();
            let value = value.trim().trim_matches('"');

            match key {
                "autosave_ms" => {
                    config.autosave_debounce = Duration::from_millis(parse(key, value)?);
                }
                "resize_debounce_ms" => {
                    config.resize_debounce = Duration::from_millis(parse(key, value)?);
                }
                "history_cap" => {
                    config.history_cap = parse(key, value)?;
                    if config.history_cap == 0 {
                        return Err(ConfigError::InvalidValue(key.to_string()));
                    }
                }
                "eraser_width" => config.eraser_width = positive(key, parse(key, value)?)?,
                "pencil_width" => config.pencil_width = positive(key, parse(key, value)?)?,
                "base_font_size" => config.base_font_size = positive(key, parse(key, value)?)?,
                "precision" => config.precision = parse(key, value)?,
                "api_base_url" => {
                    config.api_base_url = (!value.is_empty()).then(|| value.to_string());
                }
                _ => {}
            }
        }

        Ok(config)
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path.as_ref(), self.to_config_string())?;
        Ok(())
    }

    pub fn to_config_string(&self) -> String {
        let mut out = format!(
            "# Marking desk configuration\n\
             autosave_ms = {}\n\
             resize_debounce_ms = {}\n\
             history_cap = {}\n\
             eraser_width = {}\n\
             pencil_width = {}\n\
             base_font_size = {}\n\
             precision = {}\n",
            self.autosave_debounce.as_millis(),
            self.resize_debounce.as_millis(),
            self.history_cap,
            self.eraser_width,
            self.pencil_width,
            self.base_font_size,
            self.precision,
        );
        if let Some(url) = &self.api_base_url {
            out.push_str(&format!("api_base_url = \"{url}\"\n"));
        }
        out
    }

    /// Drawing parameters for newly mounted annotation layers.
    pub fn layer_settings(&self) -> LayerSettings {
        LayerSettings {
            pencil_width: self.pencil_width,
            eraser_width: self.eraser_width,
            font_size: self.base_font_size,
            history_cap: self.history_cap,
            ..LayerSettings::default()
        }
    }
}
