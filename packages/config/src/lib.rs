// ABOUTME: Process-wide settings and catalogs for Nimbus
// ABOUTME: Settings load once from the environment with explicit defaults for every field

pub mod constants;
pub mod presets;

pub use presets::{
    available_presets, preset, AcceleratorKind, ResourcePreset, ResourceSpec,
    ACCELERATOR_MODEL_LABEL, ACCELERATOR_RESOURCE, DEFAULT_PRESET_ID,
};

use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::env;
use std::str::FromStr;
use tracing::warn;

/// Docker image catalog: short key -> full image reference.
static IMAGES: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        ("default", "nimbus/runtime:latest"),
        ("pytorch", "nimbus/pytorch:2.7-rocm"),
        ("vllm", "nimbus/vllm:nightly"),
        ("minimal", "nimbus/minimal:latest"),
    ])
});

/// Prebuilt environment archives: env name -> remote tarball URL.
static ENV_ARCHIVES: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        ("python3.10", "https://storage.nimbus.dev/envs/python310.tar.gz"),
        ("python3.11", "https://storage.nimbus.dev/envs/python311.tar.gz"),
        ("python3.12", "https://storage.nimbus.dev/envs/python312.tar.gz"),
    ])
});

/// Resolve a short image key to a full reference. Unknown keys pass
/// through unchanged so callers can supply full references directly.
pub fn image_url(key: &str) -> String {
    IMAGES.get(key).map_or_else(|| key.to_string(), |v| v.to_string())
}

/// The image catalog for display.
pub fn image_catalog() -> &'static HashMap<&'static str, &'static str> {
    &IMAGES
}

/// Download URL for a named environment archive, if known.
pub fn env_archive_url(name: &str) -> Option<&'static str> {
    ENV_ARCHIVES.get(name).copied()
}

/// The environment archive catalog for display.
pub fn env_archive_catalog() -> &'static HashMap<&'static str, &'static str> {
    &ENV_ARCHIVES
}

/// Runtime settings, populated once at startup.
///
/// Every field has an explicit default; there is no runtime probing for
/// optional configuration.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Namespace all sandbox objects live in
    pub namespace: String,
    /// `app` label applied to notebook objects
    pub notebook_label: String,
    /// `app` label applied to space objects
    pub space_label: String,
    /// Image used when a notebook request names none
    pub default_notebook_image: String,
    /// Image used when a space request names none
    pub default_space_image: String,
    /// Shared secret token for notebook servers
    pub notebook_token: String,
    /// Port notebook servers bind
    pub notebook_port: i32,
    /// Port spaces expose when the request names none
    pub space_default_port: i32,
    /// Idle minutes after which a running sandbox is reclaimed
    pub idle_timeout_minutes: i64,
    /// Hard cap on sandbox lifetime in hours
    pub max_lifetime_hours: i64,
    /// Reclamation sweep interval
    pub cleanup_interval_minutes: i64,
    /// Readiness probe connect timeout in seconds
    pub probe_timeout_secs: u64,
    /// Public hostname sandbox URLs are built against
    pub service_host: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            namespace: "default".to_string(),
            notebook_label: "nimbus-notebook".to_string(),
            space_label: "nimbus-space".to_string(),
            default_notebook_image: "nimbus/runtime:latest".to_string(),
            default_space_image: "nimbus/runtime:latest".to_string(),
            notebook_token: "nimbus".to_string(),
            notebook_port: 8888,
            space_default_port: 7860,
            idle_timeout_minutes: 10,
            max_lifetime_hours: 6,
            cleanup_interval_minutes: 10,
            probe_timeout_secs: 2,
            service_host: "sandbox.nimbus.dev".to_string(),
        }
    }
}

impl Settings {
    /// Load settings from the environment, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Settings::default();
        let idle_timeout_minutes =
            env_parse(constants::NIMBUS_IDLE_TIMEOUT_MINUTES, defaults.idle_timeout_minutes);
        Self {
            namespace: env_string(constants::NIMBUS_NAMESPACE, &defaults.namespace),
            notebook_label: env_string(constants::NIMBUS_NOTEBOOK_LABEL, &defaults.notebook_label),
            space_label: env_string(constants::NIMBUS_SPACE_LABEL, &defaults.space_label),
            default_notebook_image: env_string(
                constants::NIMBUS_DEFAULT_NOTEBOOK_IMAGE,
                &defaults.default_notebook_image,
            ),
            default_space_image: env_string(
                constants::NIMBUS_DEFAULT_SPACE_IMAGE,
                &defaults.default_space_image,
            ),
            notebook_token: env_string(constants::NIMBUS_NOTEBOOK_TOKEN, &defaults.notebook_token),
            notebook_port: env_parse(constants::NIMBUS_NOTEBOOK_PORT, defaults.notebook_port),
            space_default_port: env_parse(
                constants::NIMBUS_SPACE_DEFAULT_PORT,
                defaults.space_default_port,
            ),
            idle_timeout_minutes,
            max_lifetime_hours: env_parse(
                constants::NIMBUS_MAX_LIFETIME_HOURS,
                defaults.max_lifetime_hours,
            ),
            // The sweep defaults to the idle timeout so an idle sandbox
            // is caught within one timeout window of becoming eligible.
            cleanup_interval_minutes: env_parse(
                constants::NIMBUS_CLEANUP_INTERVAL_MINUTES,
                idle_timeout_minutes,
            ),
            probe_timeout_secs: env_parse(
                constants::NIMBUS_PROBE_TIMEOUT_SECS,
                defaults.probe_timeout_secs,
            ),
            service_host: env_string(constants::NIMBUS_SERVICE_HOST, &defaults.service_host),
        }
    }
}

fn env_string(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: FromStr + Copy>(name: &str, default: T) -> T {
    match env::var(name) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            warn!("Invalid value for {}: {:?}, using default", name, raw);
            default
        }),
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn defaults_are_complete() {
        let s = Settings::default();
        assert_eq!(s.notebook_port, 8888);
        assert_eq!(s.space_default_port, 7860);
        assert_eq!(s.cleanup_interval_minutes, s.idle_timeout_minutes);
    }

    #[test]
    fn unknown_image_key_passes_through() {
        assert_eq!(image_url("ghcr.io/acme/custom:v1"), "ghcr.io/acme/custom:v1");
        assert_eq!(image_url("pytorch"), "nimbus/pytorch:2.7-rocm");
    }

    #[test]
    fn env_archive_lookup() {
        assert!(env_archive_url("python3.11").is_some());
        assert!(env_archive_url("ruby3").is_none());
    }
}
