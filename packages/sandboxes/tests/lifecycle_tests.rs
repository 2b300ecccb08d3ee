// ABOUTME: Integration tests for the sandbox lifecycle pipeline
// ABOUTME: Exercises manifest construction, the derived view, fork extraction, and reclaim policy without a cluster

use chrono::{TimeDelta, Utc};
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use nimbus_config::Settings;
use nimbus_sandboxes::manifest::{self, annotation, ManifestBuilder};
use nimbus_sandboxes::reclaim::{reclaim_decision, ReclaimPolicy, ReclaimReason};
use nimbus_sandboxes::status::{classify, Classification};
use nimbus_sandboxes::types::{
    GithubSource, NotebookRequest, Sandbox, SandboxKind, SandboxStatus, SpaceRequest, Src, SrcMeta,
};
use nimbus_sandboxes::identity;
use pretty_assertions::assert_eq;
use std::sync::Arc;

fn builder() -> ManifestBuilder {
    ManifestBuilder::new(Arc::new(Settings::default()))
}

fn src_meta() -> SrcMeta {
    let mut meta = SrcMeta::new(Src::PlatformA);
    meta.outer_email = Some("user@example.com".to_string());
    meta.inner_uid = Some("u-1".to_string());
    meta
}

fn space_request() -> SpaceRequest {
    SpaceRequest {
        repo_url: "https://github.com/acme/demo-app.git".to_string(),
        start_command: "python app.py".to_string(),
        branch: "main".to_string(),
        image: Some("pytorch".to_string()),
        conda_env: Some("python3.11".to_string()),
        port: None,
        env_vars: None,
        resource_preset: "class-b-1".to_string(),
        src_meta: src_meta(),
    }
}

fn notebook_request() -> NotebookRequest {
    NotebookRequest {
        notebook_url: "https://raw.githubusercontent.com/acme/demos/main/intro.ipynb".to_string(),
        image: None,
        conda_env: None,
        resource_preset: "cpu-free".to_string(),
        src_meta: src_meta(),
    }
}

#[test]
fn space_manifest_roundtrips_through_the_derived_view() {
    let request = space_request();
    let id = identity::stable_space_id(&request.repo_url, &request.src_meta);
    let spec = nimbus_sandboxes::resources::resolve(&request.resource_preset);
    let mut pod = builder().space_pod(&id, &request, &spec);
    pod.metadata.creation_timestamp = Some(Time(Utc::now() - TimeDelta::minutes(42)));

    let sandbox = Sandbox::from_pod(&pod, SandboxKind::Space, None);
    assert_eq!(sandbox.id, id);
    assert_eq!(sandbox.kind, SandboxKind::Space);
    assert_eq!(sandbox.src, Some(Src::PlatformA));
    assert_eq!(sandbox.src_uid.as_deref(), Some("u-1"));
    assert_eq!(sandbox.repo_url.as_deref(), Some(request.repo_url.as_str()));
    assert_eq!(sandbox.start_command.as_deref(), Some("python app.py"));
    assert_eq!(sandbox.image, "nimbus/pytorch:2.7-rocm");
    assert_eq!(sandbox.accelerator.as_deref(), Some("class-b"));
    assert_eq!(sandbox.uptime_minutes, 42);
}

#[test]
fn notebook_manifest_records_provenance_for_forking() {
    let github = GithubSource::parse("acme/demos/blob/main/nb/intro.ipynb").unwrap();
    let mut request = notebook_request();
    request.notebook_url = github.raw_url.clone();
    let id = identity::stable_github_id(&github.org, &github.repo, &github.path);
    let spec = nimbus_sandboxes::resources::resolve(&request.resource_preset);
    let pod = builder().notebook_pod(&id, &request, &spec, Some(&github));

    let annotations = pod.metadata.annotations.as_ref().unwrap();
    assert_eq!(annotations[annotation::NOTEBOOK_URL], github.raw_url);
    assert_eq!(annotations[annotation::GITHUB_ORG], "acme");
    assert_eq!(annotations[annotation::GITHUB_PATH], "nb/intro.ipynb");
    assert_eq!(annotations[annotation::TYPE], "notebook");

    let sandbox = Sandbox::from_pod(&pod, SandboxKind::Notebook, None);
    assert_eq!(sandbox.notebook_url.as_deref(), Some(github.raw_url.as_str()));
}

#[test]
fn manifests_serialize_with_expected_shape() {
    let request = space_request();
    let spec = nimbus_sandboxes::resources::resolve(&request.resource_preset);
    let pod = builder().space_pod("sp-1", &request, &spec);
    let value = serde_json::to_value(&pod).unwrap();

    assert_eq!(value["metadata"]["labels"]["app"], "nimbus-space");
    assert_eq!(value["spec"]["restartPolicy"], "Always");
    let container = &value["spec"]["containers"][0];
    assert_eq!(container["imagePullPolicy"], "Always");
    assert_eq!(container["resources"]["limits"]["accel.nimbus.dev/gpu"], "1");
    assert_eq!(container["resources"]["requests"]["cpu"], "32");
    let mounts = container["volumeMounts"].as_array().unwrap();
    assert!(mounts.iter().any(|m| m["mountPath"] == "/dev/shm"));
    assert!(mounts.iter().any(|m| m["mountPath"] == "/workspace"));
}

#[test]
fn service_selector_matches_pod_labels() {
    let request = space_request();
    let spec = nimbus_sandboxes::resources::resolve(&request.resource_preset);
    let b = builder();
    let pod = b.space_pod("sp-1", &request, &spec);
    let labels = b.labels(SandboxKind::Space, "sp-1", &request.src_meta, &spec);
    let service = b.service(SandboxKind::Space, "sp-1", labels, 7860);

    assert_eq!(
        service.spec.as_ref().unwrap().selector,
        pod.metadata.labels
    );
    assert_eq!(service.metadata.name.as_deref(), Some("space-sp-1"));
}

#[test]
fn identical_requests_derive_identical_space_ids() {
    let request = space_request();
    assert_eq!(
        identity::stable_space_id(&request.repo_url, &request.src_meta),
        identity::stable_space_id(&request.repo_url, &request.src_meta)
    );
}

#[test]
fn url_shapes_are_stable() {
    let settings = Settings::default();
    assert_eq!(
        manifest::notebook_url(&settings, "nb-abc", None),
        "https://sandbox.nimbus.dev/instance/nb-abc/lab?token=nimbus"
    );
    assert_eq!(
        manifest::notebook_url(&settings, "nb-abc", Some("intro.ipynb")),
        "https://sandbox.nimbus.dev/instance/nb-abc/lab/tree/intro.ipynb?token=nimbus"
    );
    assert_eq!(
        manifest::space_url(&settings, "sp-abc"),
        "https://sandbox.nimbus.dev/space/sp-abc/"
    );
}

#[test]
fn fresh_manifest_classifies_as_unknown_until_scheduled() {
    let request = space_request();
    let spec = nimbus_sandboxes::resources::resolve(&request.resource_preset);
    let pod = builder().space_pod("sp-1", &request, &spec);
    // No status has been written by the cluster yet.
    assert_eq!(classify(&pod), Classification::Final(SandboxStatus::Unknown));
    assert_eq!(classify(&Pod::default()), Classification::Final(SandboxStatus::Unknown));
}

#[test]
fn reclaim_policy_boundaries() {
    let policy = ReclaimPolicy {
        idle_timeout_minutes: 10,
        max_lifetime_hours: 6,
    };
    let now = Utc::now();

    // A sandbox at exactly its lifetime cap is reclaimed regardless of activity.
    assert_eq!(
        reclaim_decision(360, SandboxStatus::Running, Some(now), now, &policy),
        Some(ReclaimReason::MaxLifetime { hours: 6 })
    );
    // Exactly at the idle threshold is reclaimed.
    assert_eq!(
        reclaim_decision(60, SandboxStatus::Running, Some(now - TimeDelta::minutes(10)), now, &policy),
        Some(ReclaimReason::Idle { minutes: 10 })
    );
    // A pending sandbox never idles out, however stale its logs.
    assert_eq!(
        reclaim_decision(60, SandboxStatus::Pending, Some(now - TimeDelta::hours(2)), now, &policy),
        None
    );
}
