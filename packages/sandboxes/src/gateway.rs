// ABOUTME: Thin typed facade over the cluster API for sandbox objects
// ABOUTME: Absence is Option/false, never an error; creation races resolve by adoption

use crate::error::{Result, SandboxError};
use crate::types::SandboxKind;
use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::{Pod, Service};
use kube::api::{DeleteParams, ListParams, LogParams, PostParams};
use kube::{Api, Client};
use nimbus_config::Settings;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

/// Swallow 404s: the caller asked about an object that is already gone.
fn ok_if_not_found<T>(result: kube::Result<T>) -> Result<Option<T>> {
    match result {
        Ok(v) => Ok(Some(v)),
        Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn is_conflict(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(ae) if ae.code == 409)
}

/// All cluster access for sandbox compute units and network endpoints
/// goes through this handle. It is cheap to clone and holds no state
/// beyond the API clients.
#[derive(Clone)]
pub struct OrchestratorGateway {
    pods: Api<Pod>,
    services: Api<Service>,
    namespace: String,
    settings: Arc<Settings>,
}

impl OrchestratorGateway {
    /// Connect using the ambient cluster configuration (in-cluster
    /// service account or local kubeconfig).
    pub async fn connect(settings: Arc<Settings>) -> Result<Self> {
        let client = Client::try_default().await?;
        Ok(Self::with_client(client, settings))
    }

    pub fn with_client(client: Client, settings: Arc<Settings>) -> Self {
        let namespace = settings.namespace.clone();
        Self {
            pods: Api::namespaced(client.clone(), &namespace),
            services: Api::namespaced(client, &namespace),
            namespace,
            settings,
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Fetch a sandbox's compute unit, `None` if it does not exist.
    pub async fn get_pod(&self, id: &str) -> Result<Option<Pod>> {
        Ok(self.pods.get_opt(id).await?)
    }

    /// Whether a sandbox's network endpoint exists.
    pub async fn service_exists(&self, kind: SandboxKind, id: &str) -> Result<bool> {
        Ok(self.services.get_opt(&kind.service_name(id)).await?.is_some())
    }

    /// Create a sandbox's compute unit and network endpoint as a pair.
    ///
    /// A creation conflict means another request won the race for the
    /// same identity; the winner's object is fetched and returned as
    /// this request's result. If the endpoint cannot be created the
    /// fresh compute unit is rolled back so no half-built sandbox is
    /// left behind.
    pub async fn create_pair(&self, pod: Pod, service: Service) -> Result<Pod> {
        let id = pod.metadata.name.clone().unwrap_or_default();
        let pp = PostParams::default();

        let created = match self.pods.create(&pp, &pod).await {
            Ok(created) => created,
            Err(e) if is_conflict(&e) => {
                debug!("Compute unit {} already exists, adopting it", id);
                let existing = self.pods.get_opt(&id).await?;
                return existing.ok_or_else(|| SandboxError::CreateFailed {
                    id,
                    reason: "conflict on create but object not found on refetch".to_string(),
                });
            }
            Err(e) => return Err(e.into()),
        };

        match self.services.create(&pp, &service).await {
            Ok(_) => {}
            Err(e) if is_conflict(&e) => {
                debug!("Network endpoint for {} already exists", id);
            }
            Err(e) => {
                warn!("Endpoint creation for {} failed, rolling back: {}", id, e);
                if let Err(rollback) =
                    ok_if_not_found(self.pods.delete(&id, &DeleteParams::default()).await)
                {
                    warn!("Rollback of {} failed: {}", id, rollback);
                }
                return Err(SandboxError::CreateFailed {
                    id,
                    reason: format!("network endpoint creation failed: {e}"),
                });
            }
        }

        info!("Created sandbox {}", id);
        Ok(created)
    }

    /// Delete a sandbox's objects. Returns true if anything existed.
    ///
    /// The endpoint goes first so traffic stops routing before the
    /// compute unit disappears. An older naming scheme suffixed
    /// endpoints with `-svc`; those are cleaned up too.
    pub async fn delete_sandbox(&self, kind: SandboxKind, id: &str) -> Result<bool> {
        let dp = DeleteParams::default();
        let mut deleted_any = false;

        for name in [kind.service_name(id), format!("{id}-svc")] {
            if ok_if_not_found(self.services.delete(&name, &dp).await)?.is_some() {
                debug!("Deleted network endpoint {}", name);
                deleted_any = true;
            }
        }

        if ok_if_not_found(self.pods.delete(id, &dp).await)?.is_some() {
            info!("Deleted sandbox {}", id);
            deleted_any = true;
        }

        Ok(deleted_any)
    }

    /// List all compute units carrying the given `app` label.
    pub async fn list_pods(&self, app_label: &str) -> Result<Vec<Pod>> {
        let lp = ListParams::default().labels(&format!("app={app_label}"));
        Ok(self.pods.list(&lp).await?.items)
    }

    /// Tail of a sandbox's container log, `None` if the sandbox is gone.
    pub async fn logs(&self, id: &str, tail_lines: i64) -> Result<Option<String>> {
        let lp = LogParams {
            tail_lines: Some(tail_lines),
            ..Default::default()
        };
        ok_if_not_found(self.pods.logs(id, &lp).await)
    }

    /// Timestamp of a sandbox's most recent log output, used as its
    /// activity signal. `None` when the sandbox is gone, produced no
    /// output, or the runtime's timestamps cannot be parsed.
    pub async fn last_activity(&self, id: &str) -> Result<Option<DateTime<Utc>>> {
        let lp = LogParams {
            tail_lines: Some(50),
            timestamps: true,
            ..Default::default()
        };
        let logs = ok_if_not_found(self.pods.logs(id, &lp).await)?;
        Ok(logs.as_deref().and_then(last_log_timestamp))
    }

    /// Whether the application inside a ready sandbox answers on its
    /// port yet. A bounded TCP connect against the in-cluster endpoint
    /// DNS name; any failure or timeout reads as "not yet".
    pub async fn probe_ready(&self, kind: SandboxKind, id: &str, port: i32) -> bool {
        let addr = format!(
            "{}.{}.svc.cluster.local:{}",
            kind.service_name(id),
            self.namespace,
            port
        );
        let timeout = Duration::from_secs(self.settings.probe_timeout_secs);
        matches!(
            tokio::time::timeout(timeout, TcpStream::connect(&addr)).await,
            Ok(Ok(_))
        )
    }
}

/// Parse the timestamp of the final line of a `timestamps=true` log
/// tail. The runtime prefixes each line with RFC 3339. Only the last
/// line counts: if it does not parse, there is no activity signal, and
/// the reclaim rules treat "no signal" as "leave it alone" rather than
/// falling back to an older, staler timestamp.
fn last_log_timestamp(logs: &str) -> Option<DateTime<Utc>> {
    let line = logs.trim_end().lines().next_back()?;
    let stamp = line.split_whitespace().next()?;
    DateTime::parse_from_rfc3339(stamp)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}
