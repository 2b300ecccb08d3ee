// ABOUTME: Resource preset catalog and accelerator-to-cluster mappings
// ABOUTME: Immutable, process-wide definitions of the hardware tiers users can request

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

/// Resource name requested from the scheduler for accelerator devices.
pub const ACCELERATOR_RESOURCE: &str = "accel.nimbus.dev/gpu";

/// Node label carrying the accelerator model installed on a node.
pub const ACCELERATOR_MODEL_LABEL: &str = "nodes.nimbus.dev/accelerator-model";

/// Preset used whenever a caller supplies an unknown or missing preset id.
pub const DEFAULT_PRESET_ID: &str = "class-b-1";

/// Accelerator hardware class available in the cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AcceleratorKind {
    /// CPU-only, no accelerator scheduled
    None,
    ClassA,
    ClassB,
    ClassC,
}

impl AcceleratorKind {
    /// Label/selector value for this kind
    pub fn as_str(&self) -> &'static str {
        match self {
            AcceleratorKind::None => "none",
            AcceleratorKind::ClassA => "class-a",
            AcceleratorKind::ClassB => "class-b",
            AcceleratorKind::ClassC => "class-c",
        }
    }

    /// Scheduler resource name for this kind, if it consumes devices
    pub fn resource_name(&self) -> Option<&'static str> {
        match self {
            AcceleratorKind::None => None,
            _ => Some(ACCELERATOR_RESOURCE),
        }
    }
}

/// Concrete resource specification a preset resolves to.
///
/// Invariant: `accelerator_count > 0` implies `accelerator != None`.
/// Quantities are cluster quantity strings ("64", "128Gi").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceSpec {
    pub accelerator: AcceleratorKind,
    pub accelerator_count: u32,
    pub cpu_cores: String,
    pub memory: String,
    pub storage: String,
}

impl ResourceSpec {
    fn new(
        accelerator: AcceleratorKind,
        accelerator_count: u32,
        cpu_cores: &str,
        memory: &str,
        storage: &str,
    ) -> Self {
        debug_assert!(accelerator_count == 0 || accelerator != AcceleratorKind::None);
        Self {
            accelerator,
            accelerator_count,
            cpu_cores: cpu_cores.to_string(),
            memory: memory.to_string(),
            storage: storage.to_string(),
        }
    }
}

/// Named, catalog-listed resource specification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourcePreset {
    pub id: String,
    pub display_name: String,
    pub description: String,
    pub spec: ResourceSpec,
    /// Unavailable presets are hidden from user-facing listings but
    /// still resolvable by id for internal use.
    pub available: bool,
}

impl ResourcePreset {
    fn new(
        id: &str,
        display_name: &str,
        description: &str,
        spec: ResourceSpec,
        available: bool,
    ) -> Self {
        Self {
            id: id.to_string(),
            display_name: display_name.to_string(),
            description: description.to_string(),
            spec,
            available,
        }
    }
}

static PRESETS: Lazy<Vec<ResourcePreset>> = Lazy::new(|| {
    vec![
        ResourcePreset::new(
            "cpu-free",
            "Free CPU",
            "CPU-only instance, free tier",
            ResourceSpec::new(AcceleratorKind::None, 0, "4", "8Gi", "20Gi"),
            true,
        ),
        ResourcePreset::new(
            "class-a-1",
            "Class A x1",
            "Single Class A accelerator with 16 CPU cores",
            ResourceSpec::new(AcceleratorKind::ClassA, 1, "16", "32Gi", "50Gi"),
            true,
        ),
        ResourcePreset::new(
            "class-b-1",
            "Class B x1",
            "Single Class B accelerator with 64 CPU cores",
            ResourceSpec::new(AcceleratorKind::ClassB, 1, "64", "128Gi", "100Gi"),
            true,
        ),
        ResourcePreset::new(
            "class-b-2",
            "Class B x2",
            "Dual Class B accelerators with 128 CPU cores",
            ResourceSpec::new(AcceleratorKind::ClassB, 2, "128", "256Gi", "200Gi"),
            true,
        ),
        ResourcePreset::new(
            "class-b-4",
            "Class B x4",
            "4x Class B accelerators with 256 CPU cores",
            ResourceSpec::new(AcceleratorKind::ClassB, 4, "256", "512Gi", "500Gi"),
            true,
        ),
        ResourcePreset::new(
            "class-b-8",
            "Class B x8",
            "8x Class B accelerators with 512 CPU cores",
            ResourceSpec::new(AcceleratorKind::ClassB, 8, "512", "1024Gi", "1000Gi"),
            true,
        ),
        // Class C nodes are not yet in the cluster
        ResourcePreset::new(
            "class-c-1",
            "Class C x1",
            "Single Class C accelerator",
            ResourceSpec::new(AcceleratorKind::ClassC, 1, "64", "128Gi", "100Gi"),
            false,
        ),
        ResourcePreset::new(
            "class-c-2",
            "Class C x2",
            "Dual Class C accelerators",
            ResourceSpec::new(AcceleratorKind::ClassC, 2, "128", "256Gi", "200Gi"),
            false,
        ),
        ResourcePreset::new(
            "class-c-4",
            "Class C x4",
            "4x Class C accelerators",
            ResourceSpec::new(AcceleratorKind::ClassC, 4, "256", "512Gi", "500Gi"),
            false,
        ),
    ]
});

/// Look up a preset by id.
pub fn preset(id: &str) -> Option<&'static ResourcePreset> {
    PRESETS.iter().find(|p| p.id == id)
}

/// All presets visible in user-facing listings.
pub fn available_presets() -> Vec<&'static ResourcePreset> {
    PRESETS.iter().filter(|p| p.available).collect()
}

/// The full catalog, including unavailable presets.
pub fn all_presets() -> &'static [ResourcePreset] {
    &PRESETS
}
