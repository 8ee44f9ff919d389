//! Configuration management.
//!
//! Configuration is resolved in layers, later layers winning:
//!
//! 1. Built-in defaults
//! 2. A TOML file: the explicit `--config` path, else `DUPWATCH_CONFIG_PATH`,
//!    else `<platform config dir>/dupwatch/config.toml` if present
//! 3. Environment variable overrides (`DUPWATCH_*`)
//!
//! ```toml
//! [store]
//! backend = "redis"
//! url = "redis://127.0.0.1:6379"
//! scan_batch_size = 1000
//!
//! [detection]
//! similarity_threshold = 0.1
//! max_call_outs = 10
//! cooldown_secs = 180
//!
//! [image]
//! min_width = 512
//! min_height = 512
//! allowed_formats = ["jpg", "png", "bmp", "webp", "tiff"]
//! ```

use crate::services::fingerprint::{DEFAULT_FINGERPRINT_SIZE, SAMPLE_SIZE};
use crate::{Error, Result};
use image::ImageFormat;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable naming an explicit config file.
pub const CONFIG_PATH_ENV: &str = "DUPWATCH_CONFIG_PATH";

/// Main configuration for dupwatch.
#[derive(Debug, Clone, Default)]
pub struct DupwatchConfig {
    /// Duplicate store settings.
    pub store: StoreConfig,
    /// Duplicate detection tuning.
    pub detection: DetectionConfig,
    /// Image acceptance rules.
    pub image: ImageConfig,
    /// Logging settings.
    pub logging: LoggingSettings,
}

/// Available duplicate store backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StoreBackend {
    /// Shared Redis instance.
    #[default]
    Redis,
    /// In-process map; state is lost on exit.
    Memory,
}

impl StoreBackend {
    /// Parses a backend name.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for unknown names.
    pub fn parse(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "redis" => Ok(Self::Redis),
            "memory" | "in-memory" | "inmemory" => Ok(Self::Memory),
            other => Err(Error::InvalidInput(format!(
                "unknown store backend '{other}' (expected 'redis' or 'memory')"
            ))),
        }
    }

    /// Returns the canonical backend name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Redis => "redis",
            Self::Memory => "memory",
        }
    }
}

/// Duplicate store settings.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Which backend to use.
    pub backend: StoreBackend,
    /// Connection URL; may embed credentials.
    pub url: SecretString,
    /// Keys requested per scan page.
    pub scan_batch_size: usize,
    /// Upper bound on any single store call, in milliseconds.
    pub operation_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Redis,
            url: SecretString::from("redis://127.0.0.1:6379"),
            scan_batch_size: 1000,
            operation_timeout_ms: 5_000,
        }
    }
}

impl StoreConfig {
    /// Operation timeout as a [`Duration`].
    #[must_use]
    pub const fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }

    /// Connection URL with any credentials masked, safe for display.
    #[must_use]
    pub fn redacted_url(&self) -> String {
        let url = self.url.expose_secret();
        match (url.find("://"), url.rfind('@')) {
            (Some(scheme_end), Some(at)) if at > scheme_end => {
                format!("{}://***@{}", &url[..scheme_end], &url[at + 1..])
            },
            _ => url.to_string(),
        }
    }

    /// Sets the connection URL.
    #[must_use]
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = SecretString::from(url.into());
        self
    }

    /// Sets the backend.
    #[must_use]
    pub const fn with_backend(mut self, backend: StoreBackend) -> Self {
        self.backend = backend;
        self
    }

    /// Sets the scan batch size.
    #[must_use]
    pub const fn with_scan_batch_size(mut self, size: usize) -> Self {
        self.scan_batch_size = size;
        self
    }

    /// Sets the operation timeout in milliseconds.
    #[must_use]
    pub const fn with_operation_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.operation_timeout_ms = timeout_ms;
        self
    }
}

/// Duplicate detection tuning.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionConfig {
    /// Normalized edit distance strictly below which two fingerprints match.
    pub similarity_threshold: f64,
    /// Call-outs stop once an image has been seen this many times.
    pub max_call_outs: u32,
    /// Quiet period after a call-out, in seconds.
    pub cooldown_secs: u64,
    /// Record expiry, refreshed on every write, in seconds.
    pub record_ttl_secs: u64,
    /// Fingerprint granularity (bits per side).
    pub fingerprint_size: usize,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.1,
            max_call_outs: 10,
            cooldown_secs: 180,
            record_ttl_secs: 864_000,
            fingerprint_size: DEFAULT_FINGERPRINT_SIZE,
        }
    }
}

impl DetectionConfig {
    /// Cooldown window in milliseconds.
    #[must_use]
    pub fn cooldown_ms(&self) -> i64 {
        i64::try_from(self.cooldown_secs.saturating_mul(1000)).unwrap_or(i64::MAX)
    }

    /// Record TTL as a [`Duration`].
    #[must_use]
    pub const fn record_ttl(&self) -> Duration {
        Duration::from_secs(self.record_ttl_secs)
    }

    /// Sets the similarity threshold.
    #[must_use]
    pub const fn with_similarity_threshold(mut self, threshold: f64) -> Self {
        self.similarity_threshold = threshold;
        self
    }

    /// Sets the call-out cap.
    #[must_use]
    pub const fn with_max_call_outs(mut self, cap: u32) -> Self {
        self.max_call_outs = cap;
        self
    }

    /// Sets the cooldown window in seconds.
    #[must_use]
    pub const fn with_cooldown_secs(mut self, secs: u64) -> Self {
        self.cooldown_secs = secs;
        self
    }

    /// Sets the record TTL in seconds.
    #[must_use]
    pub const fn with_record_ttl_secs(mut self, secs: u64) -> Self {
        self.record_ttl_secs = secs;
        self
    }

    /// Sets the fingerprint granularity.
    #[must_use]
    pub const fn with_fingerprint_size(mut self, size: usize) -> Self {
        self.fingerprint_size = size;
        self
    }
}

/// Image acceptance rules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageConfig {
    /// Minimum width; images below both minimums are rejected.
    pub min_width: u32,
    /// Minimum height; images below both minimums are rejected.
    pub min_height: u32,
    /// Accepted formats by file extension (`jpg`, `jpeg`, `tif`, ...), case-insensitive.
    pub allowed_formats: Vec<String>,
    /// Download timeout in seconds.
    pub fetch_timeout_secs: u64,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            min_width: 512,
            min_height: 512,
            allowed_formats: ["jpg", "png", "bmp", "webp", "tiff"]
                .into_iter()
                .map(str::to_string)
                .collect(),
            fetch_timeout_secs: 30,
        }
    }
}

impl ImageConfig {
    /// Fetch timeout as a [`Duration`].
    #[must_use]
    pub const fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }
}

/// Logging settings as written in the config file.
///
/// Parsed into an [`crate::observability::LoggingConfig`] at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingSettings {
    /// `pretty` or `json`.
    pub format: String,
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub filter: String,
    /// Optional log file; stderr when absent.
    pub file: Option<PathBuf>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            format: "pretty".to_string(),
            filter: "info".to_string(),
            file: None,
        }
    }
}

/// Configuration file structure (for TOML parsing).
#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    /// Store section.
    pub store: Option<ConfigFileStore>,
    /// Detection section.
    pub detection: Option<ConfigFileDetection>,
    /// Image section.
    pub image: Option<ConfigFileImage>,
    /// Logging section.
    pub logging: Option<ConfigFileLogging>,
}

/// Store section in config file.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFileStore {
    /// Backend name.
    pub backend: Option<String>,
    /// Connection URL.
    pub url: Option<SecretString>,
    /// Scan page size.
    pub scan_batch_size: Option<usize>,
    /// Operation timeout in milliseconds.
    pub operation_timeout_ms: Option<u64>,
}

/// Detection section in config file.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFileDetection {
    /// Similarity threshold.
    pub similarity_threshold: Option<f64>,
    /// Call-out cap.
    pub max_call_outs: Option<u32>,
    /// Cooldown in seconds.
    pub cooldown_secs: Option<u64>,
    /// Record TTL in seconds.
    pub record_ttl_secs: Option<u64>,
    /// Fingerprint granularity.
    pub fingerprint_size: Option<usize>,
}

/// Image section in config file.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFileImage {
    /// Minimum width.
    pub min_width: Option<u32>,
    /// Minimum height.
    pub min_height: Option<u32>,
    /// Allowed formats.
    pub allowed_formats: Option<Vec<String>>,
    /// Fetch timeout in seconds.
    pub fetch_timeout_secs: Option<u64>,
}

/// Logging section in config file.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFileLogging {
    /// Output format.
    pub format: Option<String>,
    /// Filter directive.
    pub filter: Option<String>,
    /// Log file path.
    pub file: Option<String>,
}

impl DupwatchConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolves the effective configuration.
    ///
    /// Uses `explicit` if given, else `DUPWATCH_CONFIG_PATH`, else the
    /// platform default location; then applies environment overrides and
    /// validates the result.
    ///
    /// # Errors
    ///
    /// Returns an error if an explicitly named file cannot be loaded or the
    /// final values are out of range.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let config = match explicit {
            Some(path) => Self::load_from_file(path)?,
            None => match std::env::var(CONFIG_PATH_ENV) {
                Ok(path) if !path.trim().is_empty() => Self::load_from_file(Path::new(&path))?,
                _ => Self::load_default(),
            },
        };

        let config = config.with_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| Error::OperationFailed {
            operation: "read_config_file".to_string(),
            cause: format!("{}: {e}", path.display()),
        })?;

        let file: ConfigFile = toml::from_str(&contents).map_err(|e| Error::OperationFailed {
            operation: "parse_config_file".to_string(),
            cause: e.to_string(),
        })?;

        Self::from_config_file(file)
    }

    /// Loads configuration from the platform config directory.
    ///
    /// Returns the default configuration if no file exists there or it
    /// cannot be loaded.
    #[must_use]
    pub fn load_default() -> Self {
        let Some(path) = Self::default_path() else {
            return Self::default();
        };
        if !path.exists() {
            return Self::default();
        }

        match Self::load_from_file(&path) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Ignoring unreadable config file");
                Self::default()
            },
        }
    }

    /// Platform-specific default config file location.
    #[must_use]
    pub fn default_path() -> Option<PathBuf> {
        directories::BaseDirs::new()
            .map(|dirs| dirs.config_dir().join("dupwatch").join("config.toml"))
    }

    /// Converts a `ConfigFile` to `DupwatchConfig`.
    fn from_config_file(file: ConfigFile) -> Result<Self> {
        let mut config = Self::default();

        if let Some(store) = file.store {
            if let Some(backend) = store.backend {
                config.store.backend = StoreBackend::parse(&backend)?;
            }
            if let Some(url) = store.url {
                config.store.url = url;
            }
            if let Some(v) = store.scan_batch_size {
                config.store.scan_batch_size = v;
            }
            if let Some(v) = store.operation_timeout_ms {
                config.store.operation_timeout_ms = v;
            }
        }
        if let Some(detection) = file.detection {
            if let Some(v) = detection.similarity_threshold {
                config.detection.similarity_threshold = v;
            }
            if let Some(v) = detection.max_call_outs {
                config.detection.max_call_outs = v;
            }
            if let Some(v) = detection.cooldown_secs {
                config.detection.cooldown_secs = v;
            }
            if let Some(v) = detection.record_ttl_secs {
                config.detection.record_ttl_secs = v;
            }
            if let Some(v) = detection.fingerprint_size {
                config.detection.fingerprint_size = v;
            }
        }
        if let Some(image) = file.image {
            if let Some(v) = image.min_width {
                config.image.min_width = v;
            }
            if let Some(v) = image.min_height {
                config.image.min_height = v;
            }
            if let Some(v) = image.allowed_formats {
                config.image.allowed_formats = v;
            }
            if let Some(v) = image.fetch_timeout_secs {
                config.image.fetch_timeout_secs = v;
            }
        }
        if let Some(logging) = file.logging {
            if let Some(v) = logging.format {
                config.logging.format = v;
            }
            if let Some(v) = logging.filter {
                config.logging.filter = v;
            }
            if let Some(v) = logging.file {
                config.logging.file = Some(PathBuf::from(v));
            }
        }

        Ok(config)
    }

    /// Applies `DUPWATCH_*` environment variable overrides.
    #[must_use]
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    /// Applies overrides from an arbitrary variable lookup.
    ///
    /// Unparseable values are ignored with a warning.
    #[must_use]
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        fn parsed<T: std::str::FromStr>(
            lookup: &impl Fn(&str) -> Option<String>,
            key: &str,
        ) -> Option<T> {
            let raw = lookup(key)?;
            let value = raw.trim().parse().ok();
            if value.is_none() {
                tracing::warn!(variable = key, value = %raw, "Ignoring unparseable override");
            }
            value
        }

        if let Some(raw) = lookup("DUPWATCH_STORE_BACKEND") {
            match StoreBackend::parse(&raw) {
                Ok(backend) => self.store.backend = backend,
                Err(e) => tracing::warn!(error = %e, "Ignoring store backend override"),
            }
        }
        if let Some(url) = lookup("DUPWATCH_REDIS_URL").or_else(|| lookup("REDIS_URL")) {
            self.store.url = SecretString::from(url);
        }
        if let Some(v) = parsed(&lookup, "DUPWATCH_SCAN_BATCH_SIZE") {
            self.store.scan_batch_size = v;
        }
        if let Some(v) = parsed(&lookup, "DUPWATCH_STORE_TIMEOUT_MS") {
            self.store.operation_timeout_ms = v;
        }
        if let Some(v) = parsed(&lookup, "DUPWATCH_SIMILARITY_THRESHOLD") {
            self.detection.similarity_threshold = v;
        }
        if let Some(v) = parsed(&lookup, "DUPWATCH_MAX_CALL_OUTS") {
            self.detection.max_call_outs = v;
        }
        if let Some(v) = parsed(&lookup, "DUPWATCH_COOLDOWN_SECS") {
            self.detection.cooldown_secs = v;
        }
        if let Some(v) = parsed(&lookup, "DUPWATCH_RECORD_TTL_SECS") {
            self.detection.record_ttl_secs = v;
        }
        if let Some(v) = parsed(&lookup, "DUPWATCH_FINGERPRINT_SIZE") {
            self.detection.fingerprint_size = v;
        }
        if let Some(v) = parsed(&lookup, "DUPWATCH_MIN_WIDTH") {
            self.image.min_width = v;
        }
        if let Some(v) = parsed(&lookup, "DUPWATCH_MIN_HEIGHT") {
            self.image.min_height = v;
        }
        if let Some(raw) = lookup("DUPWATCH_ALLOWED_FORMATS") {
            self.image.allowed_formats = raw
                .split(',')
                .map(str::trim)
                .filter(|f| !f.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(v) = parsed(&lookup, "DUPWATCH_FETCH_TIMEOUT_SECS") {
            self.image.fetch_timeout_secs = v;
        }
        if let Some(v) = lookup("DUPWATCH_LOG_FORMAT") {
            self.logging.format = v;
        }
        if let Some(v) = lookup("DUPWATCH_LOG") {
            self.logging.filter = v;
        }
        if let Some(v) = lookup("DUPWATCH_LOG_FILE") {
            self.logging.file = Some(PathBuf::from(v));
        }

        self
    }

    /// Checks value ranges.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] naming the first offending key.
    pub fn validate(&self) -> Result<()> {
        let threshold = self.detection.similarity_threshold;
        if !(threshold > 0.0 && threshold <= 1.0) {
            return Err(Error::InvalidInput(format!(
                "detection.similarity_threshold must be in (0, 1], got {threshold}"
            )));
        }
        let size = self.detection.fingerprint_size;
        if size == 0 || size >= SAMPLE_SIZE {
            return Err(Error::InvalidInput(format!(
                "detection.fingerprint_size must be between 1 and {}, got {size}",
                SAMPLE_SIZE - 1
            )));
        }
        if self.detection.cooldown_secs == 0 {
            return Err(Error::InvalidInput(
                "detection.cooldown_secs must be positive".to_string(),
            ));
        }
        if self.detection.record_ttl_secs == 0 {
            return Err(Error::InvalidInput(
                "detection.record_ttl_secs must be positive".to_string(),
            ));
        }
        if self.store.scan_batch_size == 0 {
            return Err(Error::InvalidInput(
                "store.scan_batch_size must be positive".to_string(),
            ));
        }
        if self.store.operation_timeout_ms == 0 {
            return Err(Error::InvalidInput(
                "store.operation_timeout_ms must be positive".to_string(),
            ));
        }
        if self.image.allowed_formats.is_empty() {
            return Err(Error::InvalidInput(
                "image.allowed_formats must not be empty".to_string(),
            ));
        }
        if let Some(unknown) = self
            .image
            .allowed_formats
            .iter()
            .find(|name| ImageFormat::from_extension(name).is_none())
        {
            return Err(Error::InvalidInput(format!(
                "image.allowed_formats contains unknown format '{unknown}'"
            )));
        }
        Ok(())
    }
}
