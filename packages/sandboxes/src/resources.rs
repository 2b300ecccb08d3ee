// ABOUTME: Resource preset resolution into concrete scheduler constructs
// ABOUTME: One mapping shared by every sandbox kind so placement stays consistent

use k8s_openapi::api::core::v1::Toleration;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use nimbus_config::{
    preset, AcceleratorKind, ResourceSpec, ACCELERATOR_MODEL_LABEL, DEFAULT_PRESET_ID,
};
use std::collections::BTreeMap;
use tracing::warn;

/// Resolve a preset id to its resource specification.
///
/// Unknown ids fall back to the default preset rather than failing the
/// caller; this leniency is deliberate and documented.
pub fn resolve(preset_id: &str) -> ResourceSpec {
    if let Some(p) = preset(preset_id) {
        return p.spec.clone();
    }
    warn!("Unknown resource preset {:?}, using {}", preset_id, DEFAULT_PRESET_ID);
    preset(DEFAULT_PRESET_ID)
        .map(|p| p.spec.clone())
        .unwrap_or_else(|| ResourceSpec {
            accelerator: AcceleratorKind::ClassB,
            accelerator_count: 1,
            cpu_cores: "64".to_string(),
            memory: "128Gi".to_string(),
            storage: "100Gi".to_string(),
        })
}

/// Requests get half the CPU limit. Non-integer quantity strings keep
/// the full limit rather than failing manifest construction.
fn half_cpu(cpu_limit: &str) -> String {
    match cpu_limit.parse::<u64>() {
        Ok(n) => (n / 2).to_string(),
        Err(_) => cpu_limit.to_string(),
    }
}

/// Limits and requests for a compute unit's primary container.
pub fn to_resource_requirements(
    spec: &ResourceSpec,
) -> (BTreeMap<String, Quantity>, BTreeMap<String, Quantity>) {
    let mut limits = BTreeMap::from([
        ("cpu".to_string(), Quantity(spec.cpu_cores.clone())),
        ("memory".to_string(), Quantity(spec.memory.clone())),
    ]);
    let mut requests = BTreeMap::from([
        ("cpu".to_string(), Quantity(half_cpu(&spec.cpu_cores))),
        ("memory".to_string(), Quantity(spec.memory.clone())),
    ]);

    if spec.accelerator_count > 0 {
        if let Some(resource) = spec.accelerator.resource_name() {
            let count = Quantity(spec.accelerator_count.to_string());
            limits.insert(resource.to_string(), count.clone());
            requests.insert(resource.to_string(), count);
        }
    }

    (limits, requests)
}

/// Node selector pinning accelerator sandboxes to matching hardware.
pub fn to_node_selector(spec: &ResourceSpec) -> BTreeMap<String, String> {
    if spec.accelerator_count == 0 {
        return BTreeMap::new();
    }
    BTreeMap::from([(
        ACCELERATOR_MODEL_LABEL.to_string(),
        spec.accelerator.as_str().to_string(),
    )])
}

/// Tolerations for the accelerator node taint.
pub fn to_tolerations(spec: &ResourceSpec) -> Vec<Toleration> {
    if spec.accelerator_count == 0 {
        return Vec::new();
    }
    let Some(resource) = spec.accelerator.resource_name() else {
        return Vec::new();
    };
    vec![Toleration {
        key: Some(resource.to_string()),
        operator: Some("Exists".to_string()),
        effect: Some("NoSchedule".to_string()),
        ..Default::default()
    }]
}
