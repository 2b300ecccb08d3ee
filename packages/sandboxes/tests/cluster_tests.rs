// ABOUTME: Cluster-backed integration tests for the sandbox manager
// ABOUTME: Require a reachable cluster and are ignored by default; run with `cargo test -- --ignored`

use nimbus_config::Settings;
use nimbus_sandboxes::types::{NotebookRequest, SandboxKind, Src, SrcMeta};
use nimbus_sandboxes::{OrchestratorGateway, SandboxManager};
use std::sync::Arc;

async fn manager() -> SandboxManager {
    let settings = Arc::new(Settings::from_env());
    let gateway = OrchestratorGateway::connect(settings.clone())
        .await
        .expect("cluster must be reachable");
    SandboxManager::new(gateway, settings)
}

fn request() -> NotebookRequest {
    let mut src_meta = SrcMeta::new(Src::Direct);
    src_meta.outer_email = Some("it-tests@example.com".to_string());
    NotebookRequest {
        notebook_url: String::new(),
        image: Some("minimal".to_string()),
        conda_env: None,
        resource_preset: "cpu-free".to_string(),
        src_meta,
    }
}

#[tokio::test]
#[ignore] // Requires a reachable cluster
async fn notebook_create_is_idempotent_per_email() {
    let manager = manager().await;
    let email = "it-tests@example.com";

    let first = manager
        .create_or_get_notebook(email, request(), None)
        .await
        .expect("create notebook");
    let second = manager
        .create_or_get_notebook(email, request(), None)
        .await
        .expect("get notebook");
    assert_eq!(first.id, second.id);

    let deleted = manager
        .delete(SandboxKind::Notebook, &first.id)
        .await
        .expect("delete notebook");
    assert!(deleted);
}

#[tokio::test]
#[ignore] // Requires a reachable cluster
async fn deleting_a_missing_sandbox_is_not_an_error() {
    let manager = manager().await;
    let deleted = manager
        .delete(SandboxKind::Space, "nimbus-space-00000000")
        .await
        .expect("delete must tolerate absence");
    assert!(!deleted);
}

#[tokio::test]
#[ignore] // Requires a reachable cluster
async fn listing_hides_urls_for_sandboxes_without_endpoints() {
    let settings = Arc::new(Settings::from_env());
    let client = kube::Client::try_default()
        .await
        .expect("cluster must be reachable");
    let gateway = OrchestratorGateway::with_client(client.clone(), settings.clone());
    let manager = SandboxManager::new(gateway, settings.clone());

    let created = manager
        .create_or_get_notebook("it-tests@example.com", request(), None)
        .await
        .expect("create notebook");

    // Remove just the endpoint, as a rollback or out-of-band delete would.
    let services: kube::Api<k8s_openapi::api::core::v1::Service> =
        kube::Api::namespaced(client, &settings.namespace);
    services
        .delete(
            &SandboxKind::Notebook.service_name(&created.id),
            &kube::api::DeleteParams::default(),
        )
        .await
        .expect("delete endpoint");

    let listed = manager
        .list(SandboxKind::Notebook)
        .await
        .expect("list notebooks");
    let entry = listed
        .iter()
        .find(|s| s.id == created.id)
        .expect("created notebook must be listed");
    assert!(entry.url.is_none());

    manager
        .delete(SandboxKind::Notebook, &created.id)
        .await
        .expect("cleanup");
}

#[tokio::test]
#[ignore] // Requires a reachable cluster
async fn listing_returns_only_labeled_sandboxes() {
    let manager = manager().await;
    let sandboxes = manager.list(SandboxKind::Notebook).await.expect("list");
    assert!(sandboxes.iter().all(|s| s.kind == SandboxKind::Notebook));
}
