//! Tracking Configuration - all tracking tunables as operator-editable TOML values
//!
//! Every struct implements `Default` with the values from
//! [`defaults`](super::defaults), so a missing or partial file behaves exactly
//! like the built-in configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use super::defaults;
use crate::acquisition::SamplingRequest;
use crate::types::ActorRole;

// ============================================================================
// Top-Level Config
// ============================================================================

/// Root configuration for a tracking deployment.
///
/// Load with `TrackingConfig::load()` which searches:
/// 1. `$LIVETRACK_CONFIG` env var
/// 2. `./tracking.toml`
/// 3. Built-in defaults
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TrackingConfig {
    /// Position sampling cadence
    #[serde(default)]
    pub sampling: SamplingConfig,

    /// GPS jitter suppression
    #[serde(default)]
    pub filter: FilterConfig,

    /// Orientation fusion tuning
    #[serde(default)]
    pub heading: HeadingConfig,

    /// Backend delivery
    #[serde(default)]
    pub delivery: DeliveryConfig,

    /// Power-retention resource
    #[serde(default)]
    pub lifecycle: LifecycleConfig,

    /// Per-role endpoint and threshold profiles
    #[serde(default)]
    pub roles: RolesConfig,
}

impl TrackingConfig {
    /// Load configuration using the standard search order:
    /// 1. `$LIVETRACK_CONFIG` environment variable
    /// 2. `./tracking.toml` in the current working directory
    /// 3. Built-in defaults
    pub fn load() -> Self {
        if let Ok(path) = std::env::var("LIVETRACK_CONFIG") {
            let p = PathBuf::from(&path);
            if p.exists() {
                match Self::load_from_file(&p) {
                    Ok(config) => {
                        info!(path = %p.display(), "Loaded tracking config from LIVETRACK_CONFIG");
                        return config;
                    }
                    Err(e) => {
                        warn!(path = %p.display(), error = %e, "Failed to load config from LIVETRACK_CONFIG, falling back");
                    }
                }
            } else {
                warn!(path = %path, "LIVETRACK_CONFIG points to non-existent file, falling back");
            }
        }

        let local = PathBuf::from("tracking.toml");
        if local.exists() {
            match Self::load_from_file(&local) {
                Ok(config) => {
                    info!("Loaded tracking config from ./tracking.toml");
                    return config;
                }
                Err(e) => {
                    warn!(error = %e, "Failed to load ./tracking.toml, using defaults");
                }
            }
        }

        info!("No tracking.toml found, using built-in defaults");
        Self::default()
    }

    /// Load from a specific TOML file path.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        Self::from_toml_str(&contents).map_err(|e| match e {
            ConfigError::Parse(_, inner) => ConfigError::Parse(path.to_path_buf(), inner),
            other => other,
        })
    }

    /// Parse and validate a TOML document, warning on unknown keys.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        for w in super::validation::validate_unknown_keys(contents) {
            warn!("{}", w);
        }

        let config: Self =
            toml::from_str(contents).map_err(|e| ConfigError::Parse(PathBuf::new(), e))?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize the current config to a TOML string.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::Serialize)
    }

    /// Save config to a file.
    pub fn save_to_file(&self, path: &Path) -> Result<(), ConfigError> {
        let contents = self.to_toml()?;
        std::fs::write(path, contents).map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        info!(path = %path.display(), "Tracking config saved");
        Ok(())
    }

    /// Profile for the given actor role.
    pub fn role(&self, role: ActorRole) -> &RoleProfile {
        match role {
            ActorRole::Pickup => &self.roles.pickup,
            ActorRole::Delivery => &self.roles.delivery,
        }
    }

    /// Movement threshold for a role: the role override, else the filter default.
    pub fn min_movement_deg(&self, role: ActorRole) -> f64 {
        self.role(role)
            .min_movement_deg
            .unwrap_or(self.filter.min_movement_deg)
    }

    /// Validate all values for internal consistency.
    ///
    /// Rules:
    /// - Sampling intervals must be positive and `min_interval_ms <= interval_ms`
    /// - Movement thresholds must be finite and positive
    /// - Smoothing factor must be in `(0, 1]`
    /// - Delivery concurrency and timeouts must be non-zero
    /// - Endpoint paths must start with `/`
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors: Vec<String> = Vec::new();

        let s = &self.sampling;
        if s.interval_ms == 0 {
            errors.push("sampling.interval_ms must be > 0".to_string());
        }
        if s.min_interval_ms > s.interval_ms {
            errors.push(format!(
                "sampling.min_interval_ms ({}) must be <= interval_ms ({})",
                s.min_interval_ms, s.interval_ms
            ));
        }

        Self::check_positive(self.filter.min_movement_deg, "filter.min_movement_deg", &mut errors);
        for (name, profile) in [("pickup", &self.roles.pickup), ("delivery", &self.roles.delivery)] {
            if let Some(eps) = profile.min_movement_deg {
                Self::check_positive(eps, &format!("roles.{name}.min_movement_deg"), &mut errors);
            }
            for (field, path) in [("primary_path", &profile.primary_path), ("fallback_path", &profile.fallback_path)] {
                if !path.starts_with('/') {
                    errors.push(format!("roles.{name}.{field} must start with '/' (got '{path}')"));
                }
            }
        }

        let h = &self.heading;
        if !(h.smoothing_factor > 0.0 && h.smoothing_factor <= 1.0) {
            errors.push(format!(
                "heading.smoothing_factor must be in (0, 1] (got {})",
                h.smoothing_factor
            ));
        }
        if !h.emit_threshold_deg.is_finite() || h.emit_threshold_deg < 0.0 {
            errors.push(format!(
                "heading.emit_threshold_deg must be finite and >= 0 (got {})",
                h.emit_threshold_deg
            ));
        }

        let d = &self.delivery;
        if d.max_in_flight == 0 {
            errors.push("delivery.max_in_flight must be > 0".to_string());
        }
        if d.timeout_secs == 0 {
            errors.push("delivery.timeout_secs must be > 0".to_string());
        }
        if !(d.base_url.starts_with("http://") || d.base_url.starts_with("https://")) {
            errors.push(format!("delivery.base_url must be an http(s) URL (got '{}')", d.base_url));
        }

        if self.lifecycle.max_hold_secs == 0 {
            errors.push("lifecycle.max_hold_secs must be > 0".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }

    fn check_positive(value: f64, name: &str, errors: &mut Vec<String>) {
        if !value.is_finite() || value <= 0.0 {
            errors.push(format!("{name} must be finite and > 0 (got {value})"));
        }
    }
}

// ============================================================================
// Error Type
// ============================================================================

#[derive(Debug)]
pub enum ConfigError {
    Io(PathBuf, std::io::Error),
    Parse(PathBuf, toml::de::Error),
    Serialize(toml::ser::Error),
    Validation(Vec<String>),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(path, e) => write!(f, "Config I/O error ({}): {}", path.display(), e),
            ConfigError::Parse(path, e) => {
                write!(f, "Config parse error ({}): {}", path.display(), e)
            }
            ConfigError::Serialize(e) => write!(f, "Config serialization error: {}", e),
            ConfigError::Validation(errors) => {
                writeln!(f, "Config validation failed:")?;
                for e in errors {
                    writeln!(f, "  - {}", e)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ConfigError {}

// ============================================================================
// Sampling
// ============================================================================

/// Position sampling cadence handed to the position source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SamplingConfig {
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    #[serde(default = "default_min_interval_ms")]
    pub min_interval_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Request GNSS-grade accuracy rather than network positioning.
    #[serde(default = "default_true")]
    pub high_accuracy: bool,
}

fn default_interval_ms() -> u64 {
    defaults::SAMPLING_INTERVAL_MS
}
fn default_min_interval_ms() -> u64 {
    defaults::SAMPLING_MIN_INTERVAL_MS
}
fn default_max_delay_ms() -> u64 {
    defaults::SAMPLING_MAX_DELAY_MS
}
fn default_true() -> bool {
    true
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            min_interval_ms: default_min_interval_ms(),
            max_delay_ms: default_max_delay_ms(),
            high_accuracy: true,
        }
    }
}

impl SamplingConfig {
    pub fn request(&self) -> SamplingRequest {
        SamplingRequest {
            interval_ms: self.interval_ms,
            min_interval_ms: self.min_interval_ms,
            max_delay_ms: self.max_delay_ms,
            high_accuracy: self.high_accuracy,
        }
    }
}

// ============================================================================
// Filter
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterConfig {
    /// Per-axis movement threshold in degrees.
    #[serde(default = "default_min_movement_deg")]
    pub min_movement_deg: f64,
}

fn default_min_movement_deg() -> f64 {
    defaults::MIN_MOVEMENT_DEG
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            min_movement_deg: default_min_movement_deg(),
        }
    }
}

// ============================================================================
// Heading
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeadingConfig {
    /// Fraction of the shortest-path delta applied per sample.
    #[serde(default = "default_smoothing_factor")]
    pub smoothing_factor: f64,
    /// Minimum change in degrees before a new heading is emitted.
    #[serde(default = "default_emit_threshold_deg")]
    pub emit_threshold_deg: f64,
}

fn default_smoothing_factor() -> f64 {
    defaults::HEADING_SMOOTHING_FACTOR
}
fn default_emit_threshold_deg() -> f64 {
    defaults::HEADING_EMIT_THRESHOLD_DEG
}

impl Default for HeadingConfig {
    fn default() -> Self {
        Self {
            smoothing_factor: default_smoothing_factor(),
            emit_threshold_deg: default_emit_threshold_deg(),
        }
    }
}

// ============================================================================
// Delivery
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryConfig {
    /// Backend base URL. Can be overridden by `LIVETRACK_BACKEND_URL`.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,
}

fn default_base_url() -> String {
    defaults::DELIVERY_BASE_URL.to_string()
}
fn default_timeout_secs() -> u64 {
    defaults::DELIVERY_HTTP_TIMEOUT_SECS
}
fn default_max_in_flight() -> usize {
    defaults::DELIVERY_MAX_IN_FLIGHT
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_secs: default_timeout_secs(),
            max_in_flight: default_max_in_flight(),
        }
    }
}

impl DeliveryConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

// ============================================================================
// Lifecycle
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleConfig {
    /// Safety ceiling on resource retention (seconds).
    #[serde(default = "default_max_hold_secs")]
    pub max_hold_secs: u64,
    #[serde(default = "default_tag")]
    pub tag: String,
    /// Directory for the file-backed wake lock used by the binary.
    #[serde(default = "default_lock_dir")]
    pub lock_dir: PathBuf,
}

fn default_max_hold_secs() -> u64 {
    defaults::LIFECYCLE_MAX_HOLD_SECS
}
fn default_tag() -> String {
    defaults::LIFECYCLE_TAG.to_string()
}
fn default_lock_dir() -> PathBuf {
    PathBuf::from("./data")
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            max_hold_secs: default_max_hold_secs(),
            tag: default_tag(),
            lock_dir: default_lock_dir(),
        }
    }
}

impl LifecycleConfig {
    pub fn max_hold(&self) -> Duration {
        Duration::from_secs(self.max_hold_secs)
    }
}

// ============================================================================
// Roles
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RolesConfig {
    #[serde(default = "RoleProfile::pickup")]
    pub pickup: RoleProfile,
    #[serde(default = "RoleProfile::delivery")]
    pub delivery: RoleProfile,
}

impl Default for RolesConfig {
    fn default() -> Self {
        Self {
            pickup: RoleProfile::pickup(),
            delivery: RoleProfile::delivery(),
        }
    }
}

/// Endpoint choice and thresholds for one actor role.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleProfile {
    /// Path of the primary location-update endpoint.
    pub primary_path: String,
    /// Path of the fallback endpoint, tried once after a primary failure.
    pub fallback_path: String,
    /// Order-state value sent alongside each update, if the endpoint expects one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    /// Override of `filter.min_movement_deg` for this role.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_movement_deg: Option<f64>,
}

impl RoleProfile {
    pub fn pickup() -> Self {
        Self {
            primary_path: "/api/pickup/location".to_string(),
            fallback_path: "/api/location/update".to_string(),
            status: None,
            min_movement_deg: None,
        }
    }

    pub fn delivery() -> Self {
        Self {
            primary_path: "/api/delivery/location".to_string(),
            fallback_path: "/api/location/update".to_string(),
            status: Some("out_for_delivery".to_string()),
            min_movement_deg: None,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
