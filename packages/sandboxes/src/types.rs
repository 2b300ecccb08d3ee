// ABOUTME: Core type definitions for sandbox lifecycle management
// ABOUTME: Requests, provenance metadata, and the cluster-derived Sandbox view

use crate::error::{Result, SandboxError};
use crate::manifest::annotation;
use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::Pod;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// The two sandbox kinds the manager provisions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SandboxKind {
    Notebook,
    Space,
}

impl SandboxKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SandboxKind::Notebook => "notebook",
            SandboxKind::Space => "space",
        }
    }

    /// Name of the paired network endpoint for a sandbox id.
    pub fn service_name(&self, id: &str) -> String {
        format!("{}-{}", self.as_str(), id)
    }
}

/// External platform a sandbox request originated from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Src {
    PlatformA,
    PlatformB,
    Github,
    Direct,
}

impl Src {
    pub fn as_str(&self) -> &'static str {
        match self {
            Src::PlatformA => "platform-a",
            Src::PlatformB => "platform-b",
            Src::Github => "github",
            Src::Direct => "direct",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "platform-a" => Some(Src::PlatformA),
            "platform-b" => Some(Src::PlatformB),
            "github" => Some(Src::Github),
            "direct" => Some(Src::Direct),
            _ => None,
        }
    }
}

impl fmt::Display for Src {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Provenance metadata identifying who triggered a sandbox request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SrcMeta {
    pub src: Src,
    pub outer_email: Option<String>,
    pub inner_uid: Option<String>,
    pub extra: Option<HashMap<String, String>>,
}

impl SrcMeta {
    pub fn new(src: Src) -> Self {
        Self { src, outer_email: None, inner_uid: None, extra: None }
    }

    /// The identifier used in identity derivation: the platform-internal
    /// uid when present, otherwise the external email.
    pub fn origin(&self) -> &str {
        self.inner_uid
            .as_deref()
            .or(self.outer_email.as_deref())
            .unwrap_or("")
    }
}

fn default_branch() -> String {
    "main".to_string()
}

/// Request to create (or fetch) a Space sandbox
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpaceRequest {
    pub repo_url: String,
    pub start_command: String,
    #[serde(default = "default_branch")]
    pub branch: String,
    pub image: Option<String>,
    pub conda_env: Option<String>,
    pub port: Option<i32>,
    pub env_vars: Option<HashMap<String, String>>,
    pub resource_preset: String,
    pub src_meta: SrcMeta,
}

/// Request to create a generic Notebook sandbox
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotebookRequest {
    pub notebook_url: String,
    pub image: Option<String>,
    pub conda_env: Option<String>,
    pub resource_preset: String,
    pub src_meta: SrcMeta,
}

/// A notebook source hosted on GitHub, parsed from a
/// `org/repo/blob/branch/path/to/file.ipynb` path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GithubSource {
    pub org: String,
    pub repo: String,
    pub branch: String,
    pub path: String,
    pub raw_url: String,
}

impl GithubSource {
    pub fn parse(full_path: &str) -> Result<Self> {
        let parts: Vec<&str> = full_path.split('/').collect();
        if parts.len() < 5 || parts[2] != "blob" {
            return Err(SandboxError::InvalidRequest(format!(
                "expected org/repo/blob/branch/path, got {full_path:?}"
            )));
        }
        let (org, repo, branch) = (parts[0], parts[1], parts[3]);
        let path = parts[4..].join("/");
        let raw_url =
            format!("https://raw.githubusercontent.com/{org}/{repo}/{branch}/{path}");
        Ok(Self {
            org: org.to_string(),
            repo: repo.to_string(),
            branch: branch.to_string(),
            path,
            raw_url,
        })
    }

    /// File name of the notebook, used for URL deep links.
    pub fn file_name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }
}

/// Normalized user-facing lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SandboxStatus {
    Pending,
    Initializing,
    Loading,
    Running,
    JupyterStarting,
    AppStarting,
    Ready,
    Succeeded,
    Failed,
    Unknown,
}

impl SandboxStatus {
    /// Map a raw compute-unit phase onto the normalized state.
    pub fn from_phase(phase: &str) -> Self {
        match phase {
            "Pending" => SandboxStatus::Pending,
            "Running" => SandboxStatus::Running,
            "Succeeded" => SandboxStatus::Succeeded,
            "Failed" => SandboxStatus::Failed,
            _ => SandboxStatus::Unknown,
        }
    }
}

impl fmt::Display for SandboxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SandboxStatus::Pending => "pending",
            SandboxStatus::Initializing => "initializing",
            SandboxStatus::Loading => "loading",
            SandboxStatus::Running => "running",
            SandboxStatus::JupyterStarting => "jupyter_starting",
            SandboxStatus::AppStarting => "app_starting",
            SandboxStatus::Ready => "ready",
            SandboxStatus::Succeeded => "succeeded",
            SandboxStatus::Failed => "failed",
            SandboxStatus::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// Runtime view of a sandbox, reconstructed entirely from the cluster
/// object's labels and annotations. There is no other durable record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sandbox {
    pub id: String,
    pub kind: SandboxKind,
    pub src: Option<Src>,
    pub src_email: Option<String>,
    pub src_uid: Option<String>,
    pub image: String,
    pub status: SandboxStatus,
    pub url: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub uptime_minutes: i64,
    pub accelerator: Option<String>,
    // Space launch parameters
    pub repo_url: Option<String>,
    pub start_command: Option<String>,
    pub branch: Option<String>,
    // Notebook launch parameters
    pub notebook_url: Option<String>,
}

impl Sandbox {
    /// Derive the user-facing view from a compute unit. The URL is
    /// supplied by the caller because it is built from deployment
    /// settings, not from the object itself.
    pub fn from_pod(pod: &Pod, kind: SandboxKind, url: Option<String>) -> Self {
        let meta = &pod.metadata;
        let labels = meta.labels.clone().unwrap_or_default();
        let annotations = meta.annotations.clone().unwrap_or_default();
        let get = |key: &str| annotations.get(key).cloned().filter(|v| !v.is_empty());

        let id = labels
            .get("instance-id")
            .cloned()
            .or_else(|| meta.name.clone())
            .unwrap_or_default();
        let image = pod
            .spec
            .as_ref()
            .and_then(|s| s.containers.first())
            .and_then(|c| c.image.clone())
            .unwrap_or_default();
        let created_at = meta.creation_timestamp.as_ref().map(|t| t.0);
        let uptime_minutes = created_at
            .map(|t| (Utc::now() - t).num_minutes().max(0))
            .unwrap_or(0);
        let status = pod
            .status
            .as_ref()
            .and_then(|s| s.phase.as_deref())
            .map_or(SandboxStatus::Unknown, SandboxStatus::from_phase);

        Self {
            id,
            kind,
            src: get(annotation::SRC).as_deref().and_then(Src::parse),
            src_email: get(annotation::SRC_EMAIL),
            src_uid: get(annotation::SRC_UID),
            image,
            status,
            url,
            created_at,
            uptime_minutes,
            accelerator: labels.get("accelerator").cloned(),
            repo_url: get(annotation::REPO_URL),
            start_command: get(annotation::START_COMMAND),
            branch: get(annotation::BRANCH),
            notebook_url: get(annotation::NOTEBOOK_URL),
        }
    }
}

/// Record of one reclaimed sandbox, reported by the scheduler
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReclaimedRecord {
    pub id: String,
    /// Origin identifier: email for notebooks, repository URL for spaces
    pub origin: String,
    pub reason: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn github_path_parses_into_raw_url() {
        let src = GithubSource::parse("acme/demos/blob/main/nb/intro.ipynb").unwrap();
        assert_eq!(src.org, "acme");
        assert_eq!(src.branch, "main");
        assert_eq!(src.path, "nb/intro.ipynb");
        assert_eq!(
            src.raw_url,
            "https://raw.githubusercontent.com/acme/demos/main/nb/intro.ipynb"
        );
        assert_eq!(src.file_name(), "intro.ipynb");
    }

    #[test]
    fn github_path_rejects_short_paths() {
        assert!(GithubSource::parse("acme/demos/intro.ipynb").is_err());
    }

    #[test]
    fn origin_prefers_inner_uid() {
        let mut meta = SrcMeta::new(Src::PlatformA);
        meta.outer_email = Some("user@example.com".to_string());
        assert_eq!(meta.origin(), "user@example.com");
        meta.inner_uid = Some("u-42".to_string());
        assert_eq!(meta.origin(), "u-42");
    }

    #[test]
    fn status_display_matches_wire_format() {
        assert_eq!(SandboxStatus::JupyterStarting.to_string(), "jupyter_starting");
        assert_eq!(SandboxStatus::from_phase("Pending"), SandboxStatus::Pending);
        assert_eq!(SandboxStatus::from_phase("Evicted"), SandboxStatus::Unknown);
    }
}
