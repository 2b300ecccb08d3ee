// ABOUTME: Environment variable name constants
// ABOUTME: Centralized definitions of all environment variable names used across Nimbus

// Cluster Configuration
pub const NIMBUS_NAMESPACE: &str = "NIMBUS_NAMESPACE";

// Instance Labels
pub const NIMBUS_NOTEBOOK_LABEL: &str = "NIMBUS_NOTEBOOK_LABEL";
pub const NIMBUS_SPACE_LABEL: &str = "NIMBUS_SPACE_LABEL";

// Default Images
pub const NIMBUS_DEFAULT_NOTEBOOK_IMAGE: &str = "NIMBUS_DEFAULT_NOTEBOOK_IMAGE";
pub const NIMBUS_DEFAULT_SPACE_IMAGE: &str = "NIMBUS_DEFAULT_SPACE_IMAGE";

// Notebook Configuration
pub const NIMBUS_NOTEBOOK_TOKEN: &str = "NIMBUS_NOTEBOOK_TOKEN";
pub const NIMBUS_NOTEBOOK_PORT: &str = "NIMBUS_NOTEBOOK_PORT";

// Space Configuration
pub const NIMBUS_SPACE_DEFAULT_PORT: &str = "NIMBUS_SPACE_DEFAULT_PORT";

// Reclamation Policy
pub const NIMBUS_IDLE_TIMEOUT_MINUTES: &str = "NIMBUS_IDLE_TIMEOUT_MINUTES";
pub const NIMBUS_MAX_LIFETIME_HOURS: &str = "NIMBUS_MAX_LIFETIME_HOURS";
pub const NIMBUS_CLEANUP_INTERVAL_MINUTES: &str = "NIMBUS_CLEANUP_INTERVAL_MINUTES";

// Readiness Probe
pub const NIMBUS_PROBE_TIMEOUT_SECS: &str = "NIMBUS_PROBE_TIMEOUT_SECS";

// Public Routing
pub const NIMBUS_SERVICE_HOST: &str = "NIMBUS_SERVICE_HOST";
