// ABOUTME: Compute-unit and network-endpoint manifest construction
// ABOUTME: Labels/annotations are the sandbox's only durable record; bootstrap scripts are opaque env-driven templates

use crate::resources;
use crate::types::{GithubSource, NotebookRequest, SandboxKind, SpaceRequest, SrcMeta};
use chrono::Utc;
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EmptyDirVolumeSource, EnvVar, Pod, PodSpec, ResourceRequirements,
    Service, ServicePort, ServiceSpec, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use nimbus_config::{env_archive_url, image_url, ResourceSpec, Settings};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Annotation keys carried on every compute unit. The orchestrator
/// object is the only place these facts persist.
pub mod annotation {
    pub const TYPE: &str = "nimbus.dev/type";
    pub const CREATED_AT: &str = "nimbus.dev/created-at";
    pub const SRC: &str = "nimbus.dev/src";
    pub const SRC_EMAIL: &str = "nimbus.dev/src-email";
    pub const SRC_UID: &str = "nimbus.dev/src-uid";
    pub const REPO_URL: &str = "nimbus.dev/repo-url";
    pub const START_COMMAND: &str = "nimbus.dev/start-command";
    pub const BRANCH: &str = "nimbus.dev/branch";
    pub const NOTEBOOK_URL: &str = "nimbus.dev/notebook-url";
    pub const GITHUB_ORG: &str = "nimbus.dev/github-org";
    pub const GITHUB_REPO: &str = "nimbus.dev/github-repo";
    pub const GITHUB_PATH: &str = "nimbus.dev/github-path";
}

/// Notebook bootstrap, v1. Parameterized entirely through container env
/// vars (INSTANCE_ID, NOTEBOOK_URL, NOTEBOOK_TOKEN, JUPYTER_PORT,
/// CONDA_ENV, CONDA_ENV_URL); no request data is interpolated into the
/// script text. Downloads are best-effort: the server still starts if a
/// fetch fails.
const NOTEBOOK_BOOTSTRAP: &str = r#"#!/bin/bash
set -e

echo "=== Nimbus notebook bootstrap ==="
echo "Instance: ${INSTANCE_ID}"

if ! command -v jupyter &> /dev/null; then
    echo "Installing JupyterLab..."
    pip install jupyterlab -q
fi

mkdir -p /workspace/notebooks
cd /workspace/notebooks

if [ -n "${NOTEBOOK_URL}" ]; then
    echo "Downloading notebook..."
    NOTEBOOK_FILENAME=$(basename "${NOTEBOOK_URL}")
    wget -q -O "${NOTEBOOK_FILENAME}" "${NOTEBOOK_URL}" || echo "Warning: failed to download notebook"
fi

if [ -n "${CONDA_ENV_URL}" ]; then
    echo "Downloading environment archive from ${CONDA_ENV_URL}..."
    mkdir -p /opt/conda_envs
    wget -q -O /tmp/conda_env.tar.gz "${CONDA_ENV_URL}" || echo "Warning: failed to download environment archive"
    if [ -f /tmp/conda_env.tar.gz ]; then
        tar -xzf /tmp/conda_env.tar.gz -C /opt/conda_envs
        export PATH="/opt/conda_envs/${CONDA_ENV}/bin:${PATH}"
        echo "Environment ${CONDA_ENV} activated"
    fi
fi

BASE_URL="/instance/${INSTANCE_ID}/"

echo "Starting Jupyter Lab..."
exec jupyter lab \
    --ip=0.0.0.0 \
    --port=${JUPYTER_PORT:-8888} \
    --no-browser \
    --allow-root \
    --ServerApp.token="${NOTEBOOK_TOKEN}" \
    --ServerApp.base_url="${BASE_URL}" \
    --notebook-dir=/workspace/notebooks
"#;

/// Space bootstrap, v1. Clones the repository (falling back to the
/// default branch), installs requirements line by line while skipping
/// accelerator-incompatible packages and tolerating individual install
/// failures, then execs the start command so the container's lifecycle
/// is bound to it.
const SPACE_BOOTSTRAP: &str = r#"#!/bin/bash
set -e

echo "=== Nimbus space bootstrap ==="
echo "Space: ${SPACE_ID}"
echo "Repository: ${REPO_URL} (${REPO_BRANCH})"

mkdir -p /workspace
cd /workspace
if [ -d "app" ]; then
    rm -rf app
fi

echo "Cloning repository..."
git clone --depth 1 -b "${REPO_BRANCH}" "${REPO_URL}" app || {
    echo "Failed to clone branch ${REPO_BRANCH}, trying default branch..."
    git clone --depth 1 "${REPO_URL}" app
}
cd app

if [ -n "${CONDA_ENV_URL}" ]; then
    echo "Downloading environment archive from ${CONDA_ENV_URL}..."
    mkdir -p /opt/conda_envs
    wget -q -O /tmp/conda_env.tar.gz "${CONDA_ENV_URL}" || echo "Warning: failed to download environment archive"
    if [ -f /tmp/conda_env.tar.gz ]; then
        tar -xzf /tmp/conda_env.tar.gz -C /opt/conda_envs
        export PATH="/opt/conda_envs/${CONDA_ENV}/bin:${PATH}"
        echo "Environment ${CONDA_ENV} activated"
    fi
fi

SDK_VERSION=""
if [ -f README.md ]; then
    SDK_VERSION=$(grep '^sdk_version:' README.md | awk -F: '{gsub(/[[:space:]]/,"",$2); print $2}' | head -1)
    if [ -n "${SDK_VERSION}" ]; then
        echo "Found SDK version pin: ${SDK_VERSION}"
    fi
fi

if [ -n "${SDK_VERSION}" ]; then
    pip install "gradio==${SDK_VERSION}" spaces --quiet 2>/dev/null || pip install gradio spaces --quiet 2>/dev/null || true
else
    pip install gradio spaces --quiet 2>/dev/null || true
fi

if [ -f requirements.txt ]; then
    echo "Installing requirements..."
    while IFS= read -r line || [[ -n "$line" ]]; do
        line=$(echo "$line" | xargs)
        [[ -z "$line" || "$line" =~ ^# ]] && continue
        lower=$(echo "$line" | tr '[:upper:]' '[:lower:]')
        if [[ "$lower" == *"cu1"* || "$lower" == *"flash_attn"* || "$lower" == *"flash-attn"* ]]; then
            echo "Skipping incompatible package: $line"
            continue
        fi
        echo "Installing: $line"
        pip install "$line" --quiet 2>/dev/null || echo "Warning: failed to install $line"
    done < requirements.txt
    echo "Requirements installation completed"
fi

echo "Starting application with: ${START_COMMAND}"
exec ${START_COMMAND}
"#;

/// Renders compute-unit and network-endpoint manifests for both
/// sandbox kinds.
#[derive(Clone)]
pub struct ManifestBuilder {
    settings: Arc<Settings>,
}

impl ManifestBuilder {
    pub fn new(settings: Arc<Settings>) -> Self {
        Self { settings }
    }

    fn app_label(&self, kind: SandboxKind) -> &str {
        match kind {
            SandboxKind::Notebook => &self.settings.notebook_label,
            SandboxKind::Space => &self.settings.space_label,
        }
    }

    /// Labels shared by a sandbox's compute unit and network endpoint.
    pub fn labels(
        &self,
        kind: SandboxKind,
        id: &str,
        src_meta: &SrcMeta,
        spec: &ResourceSpec,
    ) -> BTreeMap<String, String> {
        BTreeMap::from([
            ("app".to_string(), self.app_label(kind).to_string()),
            ("instance-kind".to_string(), kind.as_str().to_string()),
            ("instance-id".to_string(), id.to_string()),
            ("src".to_string(), src_meta.src.as_str().to_string()),
            ("accelerator".to_string(), spec.accelerator.as_str().to_string()),
        ])
    }

    fn base_annotations(&self, kind: SandboxKind, src_meta: &SrcMeta) -> BTreeMap<String, String> {
        BTreeMap::from([
            (annotation::TYPE.to_string(), kind.as_str().to_string()),
            (annotation::CREATED_AT.to_string(), Utc::now().to_rfc3339()),
            (annotation::SRC.to_string(), src_meta.src.as_str().to_string()),
            (
                annotation::SRC_EMAIL.to_string(),
                src_meta.outer_email.clone().unwrap_or_default(),
            ),
            (
                annotation::SRC_UID.to_string(),
                src_meta.inner_uid.clone().unwrap_or_default(),
            ),
        ])
    }

    fn env_archive_vars(conda_env: Option<&str>, env: &mut Vec<EnvVar>) {
        if let Some(name) = conda_env {
            let url = env_archive_url(name).unwrap_or_default();
            env.push(env_var("CONDA_ENV", name));
            env.push(env_var("CONDA_ENV_URL", url));
        }
    }

    /// Compute-unit manifest for a Notebook sandbox. `notebook_url` is
    /// absent for legacy image-baked notebooks.
    pub fn notebook_pod(
        &self,
        id: &str,
        request: &NotebookRequest,
        spec: &ResourceSpec,
        github: Option<&GithubSource>,
    ) -> Pod {
        let image = request
            .image
            .as_deref()
            .map(image_url)
            .unwrap_or_else(|| self.settings.default_notebook_image.clone());

        let mut annotations = self.base_annotations(SandboxKind::Notebook, &request.src_meta);
        annotations.insert(annotation::NOTEBOOK_URL.to_string(), request.notebook_url.clone());
        if let Some(gh) = github {
            annotations.insert(annotation::GITHUB_ORG.to_string(), gh.org.clone());
            annotations.insert(annotation::GITHUB_REPO.to_string(), gh.repo.clone());
            annotations.insert(annotation::GITHUB_PATH.to_string(), gh.path.clone());
        }

        let mut env = vec![
            env_var("SHELL", "/bin/bash"),
            env_var("INSTANCE_ID", id),
            env_var("NOTEBOOK_URL", &request.notebook_url),
            env_var("NOTEBOOK_TOKEN", &self.settings.notebook_token),
            env_var("JUPYTER_PORT", &self.settings.notebook_port.to_string()),
        ];
        Self::env_archive_vars(request.conda_env.as_deref(), &mut env);

        self.pod(
            id,
            SandboxKind::Notebook,
            &image,
            spec,
            self.labels(SandboxKind::Notebook, id, &request.src_meta, spec),
            annotations,
            env,
            NOTEBOOK_BOOTSTRAP,
            self.settings.notebook_port,
        )
    }

    /// Compute-unit manifest for a Space sandbox.
    pub fn space_pod(&self, id: &str, request: &SpaceRequest, spec: &ResourceSpec) -> Pod {
        let image = request
            .image
            .as_deref()
            .map(image_url)
            .unwrap_or_else(|| self.settings.default_space_image.clone());
        let exposed_port = request.port.unwrap_or(self.settings.space_default_port);

        let mut annotations = self.base_annotations(SandboxKind::Space, &request.src_meta);
        annotations.insert(annotation::REPO_URL.to_string(), request.repo_url.clone());
        annotations.insert(annotation::START_COMMAND.to_string(), request.start_command.clone());
        annotations.insert(annotation::BRANCH.to_string(), request.branch.clone());

        let mut env = vec![
            env_var("SHELL", "/bin/bash"),
            env_var("SPACE_ID", id),
            env_var("REPO_URL", &request.repo_url),
            env_var("REPO_BRANCH", &request.branch),
            env_var("START_COMMAND", &request.start_command),
            env_var("EXPOSED_PORT", &exposed_port.to_string()),
        ];
        Self::env_archive_vars(request.conda_env.as_deref(), &mut env);
        if let Some(extra) = &request.env_vars {
            for (key, value) in extra {
                env.push(env_var(key, value));
            }
        }

        self.pod(
            id,
            SandboxKind::Space,
            &image,
            spec,
            self.labels(SandboxKind::Space, id, &request.src_meta, spec),
            annotations,
            env,
            SPACE_BOOTSTRAP,
            exposed_port,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn pod(
        &self,
        id: &str,
        kind: SandboxKind,
        image: &str,
        spec: &ResourceSpec,
        labels: BTreeMap<String, String>,
        annotations: BTreeMap<String, String>,
        env: Vec<EnvVar>,
        bootstrap: &str,
        exposed_port: i32,
    ) -> Pod {
        let (limits, requests) = resources::to_resource_requirements(spec);
        let node_selector = resources::to_node_selector(spec);
        let tolerations = resources::to_tolerations(spec);

        Pod {
            metadata: ObjectMeta {
                name: Some(id.to_string()),
                namespace: Some(self.settings.namespace.clone()),
                labels: Some(labels),
                annotations: Some(annotations),
                ..Default::default()
            },
            spec: Some(PodSpec {
                containers: vec![Container {
                    name: kind.as_str().to_string(),
                    image: Some(image.to_string()),
                    image_pull_policy: Some("Always".to_string()),
                    command: Some(vec!["/bin/bash".to_string(), "-c".to_string()]),
                    args: Some(vec![bootstrap.to_string()]),
                    ports: Some(vec![ContainerPort {
                        container_port: exposed_port,
                        name: Some("app".to_string()),
                        ..Default::default()
                    }]),
                    resources: Some(ResourceRequirements {
                        limits: Some(limits),
                        requests: Some(requests),
                        ..Default::default()
                    }),
                    env: Some(env),
                    volume_mounts: Some(vec![
                        volume_mount("shm", "/dev/shm"),
                        volume_mount("workspace", "/workspace"),
                    ]),
                    ..Default::default()
                }],
                volumes: Some(vec![
                    Volume {
                        name: "shm".to_string(),
                        empty_dir: Some(EmptyDirVolumeSource {
                            medium: Some("Memory".to_string()),
                            size_limit: Some(Quantity("64Gi".to_string())),
                        }),
                        ..Default::default()
                    },
                    Volume {
                        name: "workspace".to_string(),
                        empty_dir: Some(EmptyDirVolumeSource {
                            medium: None,
                            size_limit: Some(Quantity(spec.storage.clone())),
                        }),
                        ..Default::default()
                    },
                ]),
                node_selector: (!node_selector.is_empty()).then_some(node_selector),
                tolerations: (!tolerations.is_empty()).then_some(tolerations),
                restart_policy: Some("Always".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    /// Internal-only network endpoint routing a sandbox's exposed port.
    pub fn service(
        &self,
        kind: SandboxKind,
        id: &str,
        selector_labels: BTreeMap<String, String>,
        exposed_port: i32,
    ) -> Service {
        Service {
            metadata: ObjectMeta {
                name: Some(kind.service_name(id)),
                namespace: Some(self.settings.namespace.clone()),
                labels: Some(selector_labels.clone()),
                ..Default::default()
            },
            spec: Some(ServiceSpec {
                selector: Some(selector_labels),
                type_: Some("ClusterIP".to_string()),
                ports: Some(vec![ServicePort {
                    name: Some("app".to_string()),
                    port: exposed_port,
                    target_port: Some(IntOrString::Int(exposed_port)),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        }
    }
}

fn env_var(name: &str, value: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: Some(value.to_string()),
        value_from: None,
    }
}

fn volume_mount(name: &str, path: &str) -> VolumeMount {
    VolumeMount {
        name: name.to_string(),
        mount_path: path.to_string(),
        ..Default::default()
    }
}

fn scheme(host: &str) -> &'static str {
    // Bare IPv4 hosts terminate TLS nowhere useful; everything else is
    // assumed to sit behind the HTTPS reverse proxy.
    if host.parse::<std::net::Ipv4Addr>().is_ok() {
        "http"
    } else {
        "https"
    }
}

/// Proxy-routed URL for a Notebook sandbox, optionally deep-linking to
/// a notebook file.
pub fn notebook_url(settings: &Settings, id: &str, file: Option<&str>) -> String {
    let host = &settings.service_host;
    let token = &settings.notebook_token;
    match file {
        Some(name) => format!(
            "{}://{host}/instance/{id}/lab/tree/{name}?token={token}",
            scheme(host)
        ),
        None => format!("{}://{host}/instance/{id}/lab?token={token}", scheme(host)),
    }
}

/// Proxy-routed URL for a Space sandbox.
pub fn space_url(settings: &Settings, id: &str) -> String {
    let host = &settings.service_host;
    format!("{}://{host}/space/{id}/", scheme(host))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Src;
    use pretty_assertions::assert_eq;

    fn settings() -> Arc<Settings> {
        Arc::new(Settings::default())
    }

    fn space_request() -> SpaceRequest {
        let mut src_meta = SrcMeta::new(Src::PlatformA);
        src_meta.inner_uid = Some("u1".to_string());
        SpaceRequest {
            repo_url: "https://example/repo.git".to_string(),
            start_command: "python app.py".to_string(),
            branch: "main".to_string(),
            image: None,
            conda_env: None,
            port: None,
            env_vars: Some(std::collections::HashMap::from([(
                "MODEL".to_string(),
                "small".to_string(),
            )])),
            resource_preset: "class-b-1".to_string(),
            src_meta,
        }
    }

    #[test]
    fn space_pod_carries_launch_parameters_as_annotations() {
        let builder = ManifestBuilder::new(settings());
        let spec = resources::resolve("class-b-1");
        let pod = builder.space_pod("nimbus-space-ab12cd34", &space_request(), &spec);

        let annotations = pod.metadata.annotations.unwrap();
        assert_eq!(annotations[annotation::REPO_URL], "https://example/repo.git");
        assert_eq!(annotations[annotation::START_COMMAND], "python app.py");
        assert_eq!(annotations[annotation::BRANCH], "main");
        assert_eq!(annotations[annotation::SRC], "platform-a");
        assert_eq!(annotations[annotation::SRC_UID], "u1");

        let labels = pod.metadata.labels.unwrap();
        assert_eq!(labels["instance-kind"], "space");
        assert_eq!(labels["instance-id"], "nimbus-space-ab12cd34");
        assert_eq!(labels["accelerator"], "class-b");
    }

    #[test]
    fn user_data_flows_through_env_not_script_text() {
        let builder = ManifestBuilder::new(settings());
        let spec = resources::resolve("class-b-1");
        let mut request = space_request();
        request.repo_url = "https://example/$(rm -rf /).git".to_string();
        let pod = builder.space_pod("sp-1", &request, &spec);

        let container = &pod.spec.unwrap().containers[0];
        let script = &container.args.as_ref().unwrap()[0];
        assert!(!script.contains("rm -rf"));
        let env = container.env.as_ref().unwrap();
        assert!(env
            .iter()
            .any(|e| e.name == "REPO_URL" && e.value.as_deref() == Some(request.repo_url.as_str())));
        assert!(env.iter().any(|e| e.name == "MODEL"));
    }

    #[test]
    fn gpu_pod_gets_selector_and_toleration() {
        let builder = ManifestBuilder::new(settings());
        let spec = resources::resolve("class-b-1");
        let pod = builder.space_pod("sp-1", &space_request(), &spec);
        let pod_spec = pod.spec.unwrap();
        assert!(pod_spec.node_selector.is_some());
        assert_eq!(pod_spec.tolerations.unwrap().len(), 1);
    }

    #[test]
    fn cpu_pod_is_unconstrained() {
        let builder = ManifestBuilder::new(settings());
        let spec = resources::resolve("cpu-free");
        let pod = builder.space_pod("sp-1", &space_request(), &spec);
        let pod_spec = pod.spec.unwrap();
        assert!(pod_spec.node_selector.is_none());
        assert!(pod_spec.tolerations.is_none());
    }

    #[test]
    fn service_routes_the_exposed_port() {
        let builder = ManifestBuilder::new(settings());
        let spec = resources::resolve("cpu-free");
        let mut request = space_request();
        request.port = Some(3000);
        let labels = builder.labels(SandboxKind::Space, "sp-1", &request.src_meta, &spec);
        let svc = builder.service(SandboxKind::Space, "sp-1", labels, 3000);

        assert_eq!(svc.metadata.name.as_deref(), Some("space-sp-1"));
        let port = &svc.spec.unwrap().ports.unwrap()[0];
        assert_eq!(port.port, 3000);
        assert_eq!(port.target_port, Some(IntOrString::Int(3000)));
    }

    #[test]
    fn urls_downgrade_to_http_for_bare_ipv4() {
        let mut s = Settings::default();
        s.service_host = "10.0.0.5".to_string();
        assert!(space_url(&s, "sp-1").starts_with("http://10.0.0.5/space/sp-1/"));

        s.service_host = "sandbox.nimbus.dev".to_string();
        assert_eq!(space_url(&s, "sp-1"), "https://sandbox.nimbus.dev/space/sp-1/");
        assert_eq!(
            notebook_url(&s, "nb-1", Some("intro.ipynb")),
            "https://sandbox.nimbus.dev/instance/nb-1/lab/tree/intro.ipynb?token=nimbus"
        );
    }
}
