// ABOUTME: Sandbox identity derivation
// ABOUTME: Content-addressed stable ids for idempotent creation, random ids for per-request sandboxes

use crate::types::SrcMeta;
use sha2::{Digest, Sha256};

/// Width of the hash/random suffix in hex characters.
const SUFFIX_LEN: usize = 8;

fn short_digest(seed: &str) -> String {
    let digest = Sha256::digest(seed.as_bytes());
    let mut hex = String::with_capacity(SUFFIX_LEN);
    for byte in digest.iter().take(SUFFIX_LEN / 2) {
        hex.push_str(&format!("{byte:02x}"));
    }
    hex
}

fn short_random() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..SUFFIX_LEN].to_string()
}

/// Stable id for a legacy one-per-email notebook. Case-folded so the
/// same mailbox always maps to the same sandbox.
pub fn stable_notebook_id(email: &str) -> String {
    format!("nb-{}", short_digest(&email.to_lowercase()))
}

/// Stable id for a Space, keyed by origin platform, originating user,
/// and target repository: repeated identical requests resolve to the
/// same sandbox.
pub fn stable_space_id(repo_url: &str, src_meta: &SrcMeta) -> String {
    let key = format!("{}:{}:{}", src_meta.src, src_meta.origin(), repo_url);
    format!("nimbus-space-{}", short_digest(&key))
}

/// Stable id for a shared GitHub-launched notebook, keyed by the
/// notebook's location.
pub fn stable_github_id(org: &str, repo: &str, path: &str) -> String {
    let key = format!("{org}/{repo}/{path}").to_lowercase();
    format!("gh-{}", short_digest(&key))
}

/// Collision-improbable id for sandboxes where every request must get
/// its own instance.
pub fn unique_id(prefix: &str) -> String {
    format!("{}-{}", prefix, short_random())
}

/// Unique id for a generic Notebook sandbox.
pub fn unique_notebook_id() -> String {
    unique_id("nimbus-nb")
}

/// Unique per-user id for a GitHub-launched notebook.
pub fn unique_github_id() -> String {
    unique_id("gh")
}
