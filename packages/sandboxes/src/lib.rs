// ABOUTME: Nimbus sandbox lifecycle library
// ABOUTME: Ephemeral Notebook and Space sandboxes as paired cluster objects, with cluster state as the only store

pub mod error;
pub mod gateway;
pub mod identity;
pub mod manager;
pub mod manifest;
pub mod reclaim;
pub mod resources;
pub mod status;
pub mod types;

pub use error::{Result, SandboxError};
pub use gateway::OrchestratorGateway;
pub use manager::SandboxManager;
pub use manifest::ManifestBuilder;
pub use reclaim::{reclaim_decision, ReclaimPolicy, ReclaimReason, ReclaimScheduler};
pub use status::{classify, Classification};
pub use types::{
    GithubSource, NotebookRequest, ReclaimedRecord, Sandbox, SandboxKind, SandboxStatus,
    SpaceRequest, Src, SrcMeta,
};
