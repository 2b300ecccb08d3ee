// ABOUTME: Pure compute-unit status normalization
// ABOUTME: Collapses raw phase + container state into user-facing lifecycle states; probing happens elsewhere

use crate::types::SandboxStatus;
use k8s_openapi::api::core::v1::Pod;

/// Outcome of inspecting a compute unit's reported state.
///
/// `NeedsProbe` means the container is up and ready per the scheduler,
/// but whether the application inside answers yet can only be learned
/// by connecting to it. That check involves I/O, so it lives with the
/// gateway, not here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Final(SandboxStatus),
    NeedsProbe,
}

/// Normalize a compute unit's raw state machine.
///
/// Precedence: missing phase, then phase-only (no container status
/// reported yet), then container ready, then waiting reasons, then
/// running-but-not-ready.
pub fn classify(pod: &Pod) -> Classification {
    let Some(status) = pod.status.as_ref() else {
        return Classification::Final(SandboxStatus::Unknown);
    };
    let Some(phase) = status.phase.as_deref() else {
        return Classification::Final(SandboxStatus::Unknown);
    };

    let Some(container) = status
        .container_statuses
        .as_ref()
        .and_then(|cs| cs.first())
    else {
        return Classification::Final(SandboxStatus::from_phase(phase));
    };

    if container.ready {
        return Classification::NeedsProbe;
    }

    if let Some(waiting) = container.state.as_ref().and_then(|s| s.waiting.as_ref()) {
        let reason = waiting.reason.as_deref().unwrap_or("");
        return Classification::Final(match reason {
            "ContainerCreating" | "PodInitializing" => SandboxStatus::Initializing,
            "ImagePullBackOff" | "ErrImagePull" => SandboxStatus::Failed,
            _ => SandboxStatus::Loading,
        });
    }

    if container
        .state
        .as_ref()
        .and_then(|s| s.running.as_ref())
        .is_some()
    {
        // Up but not passing readiness: the bootstrap is still working.
        return Classification::Final(SandboxStatus::Running);
    }

    Classification::Final(SandboxStatus::from_phase(phase))
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{
        ContainerState, ContainerStateRunning, ContainerStateWaiting, ContainerStatus, PodStatus,
    };
    use pretty_assertions::assert_eq;

    fn pod_with(status: Option<PodStatus>) -> Pod {
        Pod { status, ..Default::default() }
    }

    fn container(ready: bool, state: Option<ContainerState>) -> ContainerStatus {
        ContainerStatus {
            ready,
            state,
            ..Default::default()
        }
    }

    fn waiting(reason: &str) -> ContainerState {
        ContainerState {
            waiting: Some(ContainerStateWaiting {
                reason: Some(reason.to_string()),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn running() -> ContainerState {
        ContainerState {
            running: Some(ContainerStateRunning::default()),
            ..Default::default()
        }
    }

    #[test]
    fn missing_status_is_unknown() {
        assert_eq!(
            classify(&pod_with(None)),
            Classification::Final(SandboxStatus::Unknown)
        );
        assert_eq!(
            classify(&pod_with(Some(PodStatus::default()))),
            Classification::Final(SandboxStatus::Unknown)
        );
    }

    #[test]
    fn phase_only_maps_directly() {
        let pod = pod_with(Some(PodStatus {
            phase: Some("Pending".to_string()),
            ..Default::default()
        }));
        assert_eq!(classify(&pod), Classification::Final(SandboxStatus::Pending));
    }

    #[test]
    fn ready_container_defers_to_probe() {
        let pod = pod_with(Some(PodStatus {
            phase: Some("Running".to_string()),
            container_statuses: Some(vec![container(true, Some(running()))]),
            ..Default::default()
        }));
        assert_eq!(classify(&pod), Classification::NeedsProbe);
    }

    #[test]
    fn waiting_reasons_bucket_correctly() {
        for (reason, expected) in [
            ("ContainerCreating", SandboxStatus::Initializing),
            ("PodInitializing", SandboxStatus::Initializing),
            ("ImagePullBackOff", SandboxStatus::Failed),
            ("ErrImagePull", SandboxStatus::Failed),
            ("CrashLoopBackOff", SandboxStatus::Loading),
            ("CreateContainerConfigError", SandboxStatus::Loading),
        ] {
            let pod = pod_with(Some(PodStatus {
                phase: Some("Pending".to_string()),
                container_statuses: Some(vec![container(false, Some(waiting(reason)))]),
                ..Default::default()
            }));
            assert_eq!(classify(&pod), Classification::Final(expected), "{reason}");
        }
    }

    #[test]
    fn running_but_not_ready_is_running() {
        let pod = pod_with(Some(PodStatus {
            phase: Some("Running".to_string()),
            container_statuses: Some(vec![container(false, Some(running()))]),
            ..Default::default()
        }));
        assert_eq!(classify(&pod), Classification::Final(SandboxStatus::Running));
    }
}
