// ABOUTME: Sandbox lifecycle operations: create-or-get, fork, status, delete
// ABOUTME: Composes identity derivation, manifest construction, and the orchestrator gateway

use crate::error::Result;
use crate::gateway::OrchestratorGateway;
use crate::manifest::{self, annotation, ManifestBuilder};
use crate::status::{classify, Classification};
use crate::types::{
    GithubSource, NotebookRequest, Sandbox, SandboxKind, SandboxStatus, SpaceRequest, SrcMeta,
};
use crate::{identity, resources};
use k8s_openapi::api::core::v1::Pod;
use nimbus_config::{Settings, DEFAULT_PRESET_ID};
use std::sync::Arc;
use tracing::{debug, info};

/// Extract a Space creation request from an existing compute unit's
/// annotations, rebasing provenance onto the requesting user. `None`
/// when the source carries no repository URL.
pub(crate) fn space_request_from(
    pod: &Pod,
    src_meta: SrcMeta,
    preset: Option<&str>,
) -> Option<SpaceRequest> {
    let annotations = pod.metadata.annotations.as_ref()?;
    let get = |key: &str| annotations.get(key).cloned().filter(|v| !v.is_empty());

    Some(SpaceRequest {
        repo_url: get(annotation::REPO_URL)?,
        start_command: get(annotation::START_COMMAND)?,
        branch: get(annotation::BRANCH).unwrap_or_else(|| "main".to_string()),
        image: None,
        conda_env: None,
        port: None,
        env_vars: None,
        resource_preset: preset.unwrap_or(DEFAULT_PRESET_ID).to_string(),
        src_meta,
    })
}

/// Extract a Notebook creation request from an existing compute unit.
/// `None` when the source has no recorded notebook URL, which is the
/// case for image-baked notebooks from before URLs were annotated.
pub(crate) fn notebook_request_from(pod: &Pod, src_meta: SrcMeta) -> Option<NotebookRequest> {
    let annotations = pod.metadata.annotations.as_ref()?;
    let notebook_url = annotations
        .get(annotation::NOTEBOOK_URL)
        .cloned()
        .filter(|v| !v.is_empty())?;

    Some(NotebookRequest {
        notebook_url,
        image: None,
        conda_env: None,
        resource_preset: DEFAULT_PRESET_ID.to_string(),
        src_meta,
    })
}

/// Manages the full lifecycle of Notebook and Space sandboxes.
///
/// Holds no state of its own: every operation reads and writes cluster
/// objects through the gateway, so concurrent managers (or restarts)
/// observe the same world.
#[derive(Clone)]
pub struct SandboxManager {
    gateway: OrchestratorGateway,
    settings: Arc<Settings>,
    builder: ManifestBuilder,
}

impl SandboxManager {
    pub fn new(gateway: OrchestratorGateway, settings: Arc<Settings>) -> Self {
        let builder = ManifestBuilder::new(settings.clone());
        Self { gateway, settings, builder }
    }

    pub fn gateway(&self) -> &OrchestratorGateway {
        &self.gateway
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    fn url_for(&self, kind: SandboxKind, id: &str, file: Option<&str>) -> String {
        match kind {
            SandboxKind::Notebook => manifest::notebook_url(&self.settings, id, file),
            SandboxKind::Space => manifest::space_url(&self.settings, id),
        }
    }

    pub(crate) fn kind_label(&self, kind: SandboxKind) -> &str {
        match kind {
            SandboxKind::Notebook => &self.settings.notebook_label,
            SandboxKind::Space => &self.settings.space_label,
        }
    }

    /// Build the user-facing view. The URL is only reported while the
    /// network endpoint routing it exists; callers that just created
    /// the pair skip the check.
    async fn view(&self, kind: SandboxKind, pod: &Pod, check_endpoint: bool) -> Result<Sandbox> {
        let mut sandbox = Sandbox::from_pod(pod, kind, None);
        let routable =
            !check_endpoint || self.gateway.service_exists(kind, &sandbox.id).await?;
        sandbox.url = routable.then(|| self.url_for(kind, &sandbox.id, None));
        sandbox.status = self.poll_status(kind, pod).await;
        Ok(sandbox)
    }

    /// Resolve a compute unit's normalized status, probing the
    /// application port when the container reports ready.
    pub async fn poll_status(&self, kind: SandboxKind, pod: &Pod) -> SandboxStatus {
        match classify(pod) {
            Classification::Final(status) => status,
            Classification::NeedsProbe => {
                let id = pod.metadata.name.as_deref().unwrap_or_default();
                let port = exposed_port(pod).unwrap_or(match kind {
                    SandboxKind::Notebook => self.settings.notebook_port,
                    SandboxKind::Space => self.settings.space_default_port,
                });
                if self.gateway.probe_ready(kind, id, port).await {
                    SandboxStatus::Ready
                } else {
                    match kind {
                        SandboxKind::Notebook => SandboxStatus::JupyterStarting,
                        SandboxKind::Space => SandboxStatus::AppStarting,
                    }
                }
            }
        }
    }

    /// The one-per-email Notebook: return the user's existing sandbox
    /// or create it. A GitHub source overrides the notebook payload and
    /// deep-links the returned URL to the notebook file.
    pub async fn create_or_get_notebook(
        &self,
        email: &str,
        mut request: NotebookRequest,
        github: Option<&GithubSource>,
    ) -> Result<Sandbox> {
        let id = identity::stable_notebook_id(email);
        if let Some(gh) = github {
            request.notebook_url = gh.raw_url.clone();
        }
        let file = github.map(|gh| gh.file_name().to_string());

        if let Some(existing) = self.gateway.get_pod(&id).await? {
            debug!("Notebook {} already exists for {}", id, email);
            let mut sandbox = self.view(SandboxKind::Notebook, &existing, true).await?;
            if sandbox.url.is_some() {
                sandbox.url = Some(self.url_for(SandboxKind::Notebook, &id, file.as_deref()));
            }
            return Ok(sandbox);
        }

        self.launch_notebook(&id, &request, github, file.as_deref()).await
    }

    /// A fresh Notebook with a random identity, for callers that want a
    /// new instance per request.
    pub async fn create_notebook(&self, request: NotebookRequest) -> Result<Sandbox> {
        let id = identity::unique_notebook_id();
        self.launch_notebook(&id, &request, None, None).await
    }

    /// A fresh per-request Notebook seeded from a GitHub-hosted file.
    pub async fn create_github_notebook(
        &self,
        github: &GithubSource,
        mut request: NotebookRequest,
    ) -> Result<Sandbox> {
        let id = identity::unique_github_id();
        request.notebook_url = github.raw_url.clone();
        self.launch_notebook(&id, &request, Some(github), Some(github.file_name()))
            .await
    }

    /// The shared Notebook for a GitHub-hosted file: everyone opening
    /// the same file lands in the same sandbox.
    pub async fn create_or_get_github_notebook(
        &self,
        github: &GithubSource,
        mut request: NotebookRequest,
    ) -> Result<Sandbox> {
        let id = identity::stable_github_id(&github.org, &github.repo, &github.path);
        request.notebook_url = github.raw_url.clone();

        if let Some(existing) = self.gateway.get_pod(&id).await? {
            debug!("Shared notebook {} already exists", id);
            let mut sandbox = self.view(SandboxKind::Notebook, &existing, true).await?;
            if sandbox.url.is_some() {
                sandbox.url = Some(self.url_for(
                    SandboxKind::Notebook,
                    &id,
                    Some(github.file_name()),
                ));
            }
            return Ok(sandbox);
        }

        self.launch_notebook(&id, &request, Some(github), Some(github.file_name()))
            .await
    }

    async fn launch_notebook(
        &self,
        id: &str,
        request: &NotebookRequest,
        github: Option<&GithubSource>,
        file: Option<&str>,
    ) -> Result<Sandbox> {
        let spec = resources::resolve(&request.resource_preset);
        let pod = self.builder.notebook_pod(id, request, &spec, github);
        let labels = self
            .builder
            .labels(SandboxKind::Notebook, id, &request.src_meta, &spec);
        let service = self.builder.service(
            SandboxKind::Notebook,
            id,
            labels,
            self.settings.notebook_port,
        );

        info!("Creating notebook {} ({})", id, request.src_meta.src);
        let created = self.gateway.create_pair(pod, service).await?;
        let mut sandbox = self.view(SandboxKind::Notebook, &created, false).await?;
        sandbox.url = Some(self.url_for(SandboxKind::Notebook, id, file));
        Ok(sandbox)
    }

    /// Idempotent Space creation: the identity is derived from the
    /// origin platform, user, and repository, so repeated requests for
    /// the same triple return the same sandbox.
    pub async fn create_or_get_space(&self, request: SpaceRequest) -> Result<Sandbox> {
        let id = identity::stable_space_id(&request.repo_url, &request.src_meta);

        if let Some(existing) = self.gateway.get_pod(&id).await? {
            debug!("Space {} already exists", id);
            return self.view(SandboxKind::Space, &existing, true).await;
        }

        let spec = resources::resolve(&request.resource_preset);
        let exposed_port = request.port.unwrap_or(self.settings.space_default_port);
        let pod = self.builder.space_pod(&id, &request, &spec);
        let labels = self
            .builder
            .labels(SandboxKind::Space, &id, &request.src_meta, &spec);
        let service = self
            .builder
            .service(SandboxKind::Space, &id, labels, exposed_port);

        info!("Creating space {} for {}", id, request.repo_url);
        let created = self.gateway.create_pair(pod, service).await?;
        self.view(SandboxKind::Space, &created, false).await
    }

    /// Fetch one sandbox, `None` if it does not exist. The URL is only
    /// reported while the network endpoint routing it exists.
    pub async fn get(&self, kind: SandboxKind, id: &str) -> Result<Option<Sandbox>> {
        match self.gateway.get_pod(id).await? {
            Some(pod) => Ok(Some(self.view(kind, &pod, true).await?)),
            None => Ok(None),
        }
    }

    /// All sandboxes of one kind, via the `app` label. Each entry's URL
    /// reflects its own endpoint's presence, same as `get`.
    pub async fn list(&self, kind: SandboxKind) -> Result<Vec<Sandbox>> {
        let pods = self.gateway.list_pods(self.kind_label(kind)).await?;
        let mut sandboxes = Vec::with_capacity(pods.len());
        for pod in &pods {
            sandboxes.push(self.view(kind, pod, true).await?);
        }
        Ok(sandboxes)
    }

    /// Delete one sandbox. True if anything was actually removed.
    pub async fn delete(&self, kind: SandboxKind, id: &str) -> Result<bool> {
        self.gateway.delete_sandbox(kind, id).await
    }

    /// Delete every sandbox of one kind, returning the ids removed.
    /// Individual failures abort the pass and propagate.
    pub async fn delete_all(&self, kind: SandboxKind) -> Result<Vec<String>> {
        let sandboxes = self.list(kind).await?;
        let mut deleted = Vec::new();
        for sandbox in sandboxes {
            if self.gateway.delete_sandbox(kind, &sandbox.id).await? {
                deleted.push(sandbox.id);
            }
        }
        info!("Deleted {} {}(s)", deleted.len(), kind.as_str());
        Ok(deleted)
    }

    /// Tail of a sandbox's log, `None` if the sandbox is gone.
    pub async fn logs(&self, id: &str, tail_lines: i64) -> Result<Option<String>> {
        self.gateway.logs(id, tail_lines).await
    }

    /// Fork an existing Space for the requesting user: same repository
    /// and start command, fresh provenance, idempotent identity under
    /// the new user. `None` when the source is gone or carries no
    /// launch parameters.
    pub async fn fork_space(
        &self,
        source_id: &str,
        src_meta: SrcMeta,
        preset: Option<&str>,
    ) -> Result<Option<Sandbox>> {
        let Some(source) = self.gateway.get_pod(source_id).await? else {
            return Ok(None);
        };
        let Some(request) = space_request_from(&source, src_meta, preset) else {
            debug!("Space {} has no recorded launch parameters", source_id);
            return Ok(None);
        };
        info!("Forking space {} -> {}", source_id, request.repo_url);
        Ok(Some(self.create_or_get_space(request).await?))
    }

    /// Fork an existing Notebook: a fresh sandbox seeded with the same
    /// notebook file. `None` when the source is gone or predates
    /// notebook URL recording.
    pub async fn fork_notebook(
        &self,
        source_id: &str,
        src_meta: SrcMeta,
    ) -> Result<Option<Sandbox>> {
        let Some(source) = self.gateway.get_pod(source_id).await? else {
            return Ok(None);
        };
        let Some(request) = notebook_request_from(&source, src_meta) else {
            debug!("Notebook {} has no recorded notebook URL", source_id);
            return Ok(None);
        };
        info!("Forking notebook {}", source_id);
        Ok(Some(self.create_notebook(request).await?))
    }

    /// Presets visible to users when choosing sandbox hardware.
    pub fn presets(&self) -> Vec<&'static nimbus_config::ResourcePreset> {
        nimbus_config::available_presets()
    }

    /// The short-name image catalog.
    pub fn images(&self) -> &'static std::collections::HashMap<&'static str, &'static str> {
        nimbus_config::image_catalog()
    }

    /// The prebuilt environment archive catalog.
    pub fn env_archives(&self) -> &'static std::collections::HashMap<&'static str, &'static str> {
        nimbus_config::env_archive_catalog()
    }
}

/// The first declared container port, which manifests built here always
/// set to the application's exposed port.
pub(crate) fn exposed_port(pod: &Pod) -> Option<i32> {
    pod.spec
        .as_ref()
        .and_then(|s| s.containers.first())
        .and_then(|c| c.ports.as_ref())
        .and_then(|p| p.first())
        .map(|p| p.container_port)
}
