// ABOUTME: Automatic reclamation of expired and idle sandboxes
// ABOUTME: A pure decision function drives a periodic sweep over both sandbox kinds

use crate::error::Result;
use crate::manager::SandboxManager;
use crate::status::{classify, Classification};
use crate::types::{ReclaimedRecord, Sandbox, SandboxKind, SandboxStatus};
use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::Pod;
use std::fmt;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// Thresholds for the two reclamation rules.
#[derive(Debug, Clone, Copy)]
pub struct ReclaimPolicy {
    pub idle_timeout_minutes: i64,
    pub max_lifetime_hours: i64,
}

/// Why a sandbox was reclaimed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReclaimReason {
    MaxLifetime { hours: i64 },
    Idle { minutes: i64 },
}

impl fmt::Display for ReclaimReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReclaimReason::MaxLifetime { hours } => {
                write!(f, "exceeded max lifetime ({hours}h)")
            }
            ReclaimReason::Idle { minutes } => write!(f, "idle for {minutes} minutes"),
        }
    }
}

/// Decide whether a sandbox should be reclaimed.
///
/// Lifetime wins over idleness and applies in every state, so a
/// sandbox stuck in `Failed` or an image-pull loop still ages out.
/// Idleness only applies while the sandbox is actually serving
/// (`Running`); starting or broken sandboxes are never "idle". Both
/// thresholds are inclusive. A missing activity signal means no idle
/// decision: absence of evidence is not idleness.
pub fn reclaim_decision(
    uptime_minutes: i64,
    status: SandboxStatus,
    last_activity: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    policy: &ReclaimPolicy,
) -> Option<ReclaimReason> {
    if uptime_minutes >= policy.max_lifetime_hours * 60 {
        return Some(ReclaimReason::MaxLifetime {
            hours: policy.max_lifetime_hours,
        });
    }

    if status != SandboxStatus::Running {
        return None;
    }
    let idle_minutes = (now - last_activity?).num_minutes();
    if idle_minutes >= policy.idle_timeout_minutes {
        return Some(ReclaimReason::Idle { minutes: idle_minutes });
    }
    None
}

fn origin_of(sandbox: &Sandbox) -> String {
    match sandbox.kind {
        SandboxKind::Notebook => sandbox.src_email.clone().unwrap_or_default(),
        SandboxKind::Space => sandbox.repo_url.clone().unwrap_or_default(),
    }
}

/// Status resolution for sweeps. A ready container means the sandbox
/// is serving or about to be; neither is idle-eligible, so the sweep
/// never pays for a readiness probe.
fn sweep_status(pod: &Pod) -> SandboxStatus {
    match classify(pod) {
        Classification::Final(status) => status,
        Classification::NeedsProbe => SandboxStatus::Ready,
    }
}

/// Report entry for one reclaimed sandbox. Nothing is recorded when
/// the delete found nothing to remove, e.g. the user's own delete won
/// the race.
fn reclaim_record(
    sandbox: &Sandbox,
    reason: ReclaimReason,
    deleted: bool,
) -> Option<ReclaimedRecord> {
    deleted.then(|| ReclaimedRecord {
        id: sandbox.id.clone(),
        origin: origin_of(sandbox),
        reason: reason.to_string(),
    })
}

impl SandboxManager {
    fn reclaim_policy(&self) -> ReclaimPolicy {
        ReclaimPolicy {
            idle_timeout_minutes: self.settings().idle_timeout_minutes,
            max_lifetime_hours: self.settings().max_lifetime_hours,
        }
    }

    /// One reclamation sweep over every sandbox of one kind. A failure
    /// on one sandbox is logged and does not stop the sweep. The sweep
    /// reads raw compute units and classifies them probe-free: the
    /// reclaim rules never depend on probe-level status.
    pub async fn reclaim_kind(&self, kind: SandboxKind) -> Result<Vec<ReclaimedRecord>> {
        let policy = self.reclaim_policy();
        let pods = self.gateway().list_pods(self.kind_label(kind)).await?;
        let now = Utc::now();
        let mut reclaimed = Vec::new();

        for pod in &pods {
            let sandbox = Sandbox::from_pod(pod, kind, None);
            let status = sweep_status(pod);

            // The activity signal costs a log fetch, so it is only
            // consulted for sandboxes the idle rule could apply to.
            let last_activity = if status == SandboxStatus::Running {
                match self.gateway().last_activity(&sandbox.id).await {
                    Ok(activity) => activity,
                    Err(e) => {
                        error!("Activity check for {} failed: {}", sandbox.id, e);
                        continue;
                    }
                }
            } else {
                None
            };

            let Some(reason) =
                reclaim_decision(sandbox.uptime_minutes, status, last_activity, now, &policy)
            else {
                continue;
            };

            info!("Reclaiming {} {}: {}", kind.as_str(), sandbox.id, reason);
            match self.delete(kind, &sandbox.id).await {
                Ok(deleted) => match reclaim_record(&sandbox, reason, deleted) {
                    Some(record) => reclaimed.push(record),
                    None => debug!("{} was already gone", sandbox.id),
                },
                Err(e) => error!("Failed to reclaim {}: {}", sandbox.id, e),
            }
        }

        Ok(reclaimed)
    }

    /// Sweep both sandbox kinds once.
    pub async fn reclaim_now(&self) -> Result<Vec<ReclaimedRecord>> {
        let mut reclaimed = self.reclaim_kind(SandboxKind::Notebook).await?;
        reclaimed.extend(self.reclaim_kind(SandboxKind::Space).await?);
        Ok(reclaimed)
    }
}

/// Periodic reclamation driver. Starting spawns a background task that
/// sweeps at the configured interval; shutdown stops it without waiting
/// for an in-flight sweep.
pub struct ReclaimScheduler {
    handle: JoinHandle<()>,
}

impl ReclaimScheduler {
    pub fn start(manager: SandboxManager) -> Self {
        let minutes = manager.settings().cleanup_interval_minutes.max(1) as u64;
        info!("Reclaim scheduler running every {} minute(s)", minutes);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(minutes * 60));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick fires immediately; skip it so a restart
            // does not reclaim before operators can look around.
            ticker.tick().await;

            loop {
                ticker.tick().await;
                match manager.reclaim_now().await {
                    Ok(reclaimed) if reclaimed.is_empty() => {
                        debug!("Reclaim sweep: nothing to do")
                    }
                    Ok(reclaimed) => info!("Reclaim sweep removed {} sandbox(es)", reclaimed.len()),
                    Err(e) => error!("Reclaim sweep failed: {}", e),
                }
            }
        });

        Self { handle }
    }

    /// Stop the scheduler immediately.
    pub fn shutdown(self) {
        self.handle.abort();
        info!("Reclaim scheduler stopped");
    }
}
