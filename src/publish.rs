//! Publishing a workspace to a hosted VCS provider.
//!
//! Two halves: the provider's HTTP API creates the remote repository, and
//! git2 does the local work (init, stage, commit, push). The provider is a
//! trait so the pipeline tests run against a recording mock.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use git2::{IndexAddOption, PushOptions, RemoteCallbacks, Repository, Signature};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};

use crate::errors::PublishError;

/// A freshly created remote repository.
#[derive(Debug, Clone)]
pub struct RemoteRepo {
    pub clone_url: String,
    pub web_url: String,
}

/// Identity used for commits and push credentials.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct OwnerIdentity {
    pub username: String,
    pub email: String,
    pub token: String,
}

/// VCS provider seam: create a repository, get its URLs back.
#[async_trait]
pub trait RepoHost: Send + Sync {
    async fn create_repository(
        &self,
        name: &str,
        private: bool,
        org: Option<&str>,
    ) -> Result<RemoteRepo, PublishError>;
}

/// GitHub's REST API as the provider.
pub struct GithubHost {
    client: reqwest::Client,
    api_base: String,
    token: String,
}

#[derive(Debug, Deserialize)]
struct RepoResponse {
    clone_url: String,
    html_url: String,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    message: String,
}

impl GithubHost {
    pub fn new(token: &str) -> Self {
        Self::with_base("https://api.github.com", token)
    }

    pub fn with_base(api_base: &str, token: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_base: api_base.trim_end_matches('/').to_string(),
            token: token.to_string(),
        }
    }

    fn create_endpoint(&self, org: Option<&str>) -> String {
        match org {
            Some(org) => format!("{}/orgs/{org}/repos", self.api_base),
            None => format!("{}/user/repos", self.api_base),
        }
    }
}

#[async_trait]
impl RepoHost for GithubHost {
    async fn create_repository(
        &self,
        name: &str,
        private: bool,
        org: Option<&str>,
    ) -> Result<RemoteRepo, PublishError> {
        let resp = self
            .client
            .post(self.create_endpoint(org))
            .bearer_auth(&self.token)
            .header("User-Agent", "devsketch")
            .header("Accept", "application/vnd.github+json")
            .json(&json!({ "name": name, "private": private, "auto_init": false }))
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            // 422 means the name already exists; idempotence is the
            // provider's contract, so this surfaces instead of being
            // papered over.
            let detail = match resp.json::<ApiErrorBody>().await {
                Ok(body) if !body.message.is_empty() => body.message,
                _ => "no error detail in response body".to_string(),
            };
            return Err(PublishError::RemoteCreateFailed {
                status: status.as_u16(),
                detail,
            });
        }

        let repo: RepoResponse = resp.json().await?;
        info!(name, html_url = %repo.html_url, "remote repository created");
        Ok(RemoteRepo {
            clone_url: repo.clone_url,
            web_url: repo.html_url,
        })
    }
}

/// Embed push credentials into a clone URL.
pub fn authenticated_url(clone_url: &str, token: &str) -> String {
    match clone_url.strip_prefix("https://") {
        Some(rest) => format!("https://{token}@{rest}"),
        None => clone_url.to_string(),
    }
}

/// Stage everything and commit. Returns `false` without committing when
/// the index matches HEAD (re-publishing an unchanged workspace is a
/// success, not an error).
fn commit_all(repo: &Repository, identity: &OwnerIdentity) -> Result<bool, PublishError> {
    let mut config = repo.config()?;
    config.set_str("user.name", &identity.username)?;
    config.set_str("user.email", &identity.email)?;

    let mut index = repo.index()?;
    index.add_all(["*"].iter(), IndexAddOption::DEFAULT, None)?;
    index.write()?;
    let tree_id = index.write_tree()?;
    let tree = repo.find_tree(tree_id)?;

    let parent = match repo.head() {
        Ok(head) => Some(head.peel_to_commit()?),
        // Unborn branch: first commit in a fresh repository.
        Err(_) => None,
    };

    if let Some(parent) = &parent {
        let diff = repo.diff_tree_to_tree(Some(&parent.tree()?), Some(&tree), None)?;
        if diff.deltas().len() == 0 {
            debug!("nothing to commit");
            return Ok(false);
        }
    }

    let signature = Signature::now(&identity.username, &identity.email)?;
    let parents: Vec<&git2::Commit> = parent.iter().collect();
    repo.commit(
        Some("HEAD"),
        &signature,
        &signature,
        "Initial commit",
        &tree,
        &parents,
    )?;
    Ok(true)
}

/// Make `main` exist at HEAD and check it out.
fn ensure_main(repo: &Repository) -> Result<(), PublishError> {
    let head_commit = repo.head()?.peel_to_commit()?;
    if repo.find_branch("main", git2::BranchType::Local).is_err() {
        repo.branch("main", &head_commit, true)?;
    }
    repo.set_head("refs/heads/main")?;
    Ok(())
}

/// Point `origin` at `url`, creating or re-pointing as needed.
fn set_origin(repo: &Repository, url: &str) -> Result<(), PublishError> {
    match repo.find_remote("origin") {
        Ok(_) => repo.remote_set_url("origin", url)?,
        Err(_) => {
            repo.remote("origin", url)?;
        }
    }
    Ok(())
}

/// Open or init the workspace repository, commit everything, and force-push
/// `main` to `remote_url` with token credentials.
pub fn push_workspace(
    workspace: &Path,
    remote_url: &str,
    identity: &OwnerIdentity,
) -> Result<(), PublishError> {
    let repo = match Repository::open(workspace) {
        Ok(repo) => repo,
        Err(_) => Repository::init(workspace)?,
    };

    commit_all(&repo, identity)?;
    ensure_main(&repo)?;
    set_origin(&repo, remote_url)?;

    let mut callbacks = RemoteCallbacks::new();
    let username = identity.username.clone();
    let token = identity.token.clone();
    callbacks.credentials(move |_url, _username_from_url, _allowed| {
        git2::Cred::userpass_plaintext(&username, &token)
    });
    let mut options = PushOptions::new();
    options.remote_callbacks(callbacks);

    let mut remote = repo.find_remote("origin")?;
    remote
        .push(&["+refs/heads/main:refs/heads/main"], Some(&mut options))
        .map_err(|e| PublishError::PushFailed {
            remote: "origin".to_string(),
            detail: e.message().to_string(),
        })?;

    info!(workspace = %workspace.display(), "pushed main to origin");
    Ok(())
}

/// End-to-end publisher: remote creation plus local push.
pub struct Publisher {
    host: Arc<dyn RepoHost>,
}

impl Publisher {
    pub fn new(host: Arc<dyn RepoHost>) -> Self {
        Self { host }
    }

    /// Create the remote repository and push the workspace to it. Returns
    /// the remote's URLs; the web URL is what gets reported back to the
    /// user, the clone URL is what the sandbox clones.
    pub async fn publish(
        &self,
        workspace: &Path,
        repo_name: &str,
        identity: &OwnerIdentity,
        private: bool,
        org: Option<&str>,
    ) -> Result<RemoteRepo, PublishError> {
        let remote = self.host.create_repository(repo_name, private, org).await?;
        let push_url = authenticated_url(&remote.clone_url, &identity.token);
        push_workspace(workspace, &push_url, identity)?;
        Ok(remote)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn identity() -> OwnerIdentity {
        OwnerIdentity {
            username: "alice".to_string(),
            email: "alice@example.com".to_string(),
            token: "ghp_token".to_string(),
        }
    }

    #[test]
    fn commit_all_creates_initial_commit() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("README.md"), "# demo").unwrap();
        let repo = Repository::init(dir.path()).unwrap();

        assert!(commit_all(&repo, &identity()).unwrap());

        let head = repo.head().unwrap().peel_to_commit().unwrap();
        assert_eq!(head.message().unwrap(), "Initial commit");
        assert_eq!(head.author().name().unwrap(), "alice");
        assert_eq!(head.parent_count(), 0);
    }

    #[test]
    fn unchanged_workspace_commits_nothing_and_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("README.md"), "# demo").unwrap();
        let repo = Repository::init(dir.path()).unwrap();

        assert!(commit_all(&repo, &identity()).unwrap());
        assert!(!commit_all(&repo, &identity()).unwrap());

        let head = repo.head().unwrap().peel_to_commit().unwrap();
        assert_eq!(head.parent_count(), 0);
    }

    #[test]
    fn changed_workspace_gets_second_commit() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), "one").unwrap();
        let repo = Repository::init(dir.path()).unwrap();
        commit_all(&repo, &identity()).unwrap();

        fs::write(dir.path().join("a.txt"), "two").unwrap();
        assert!(commit_all(&repo, &identity()).unwrap());
        let head = repo.head().unwrap().peel_to_commit().unwrap();
        assert_eq!(head.parent_count(), 1);
    }

    #[test]
    fn ensure_main_renames_default_branch() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("f"), "x").unwrap();
        let repo = Repository::init(dir.path()).unwrap();
        commit_all(&repo, &identity()).unwrap();

        ensure_main(&repo).unwrap();
        let head = repo.head().unwrap();
        assert_eq!(head.shorthand(), Some("main"));
    }

    #[test]
    fn set_origin_creates_then_repoints() {
        let dir = tempfile::tempdir().unwrap();
        let repo = Repository::init(dir.path()).unwrap();

        set_origin(&repo, "https://example.com/a.git").unwrap();
        set_origin(&repo, "https://example.com/b.git").unwrap();

        let remote = repo.find_remote("origin").unwrap();
        assert_eq!(remote.url(), Some("https://example.com/b.git"));
    }

    #[test]
    fn authenticated_url_embeds_token() {
        assert_eq!(
            authenticated_url("https://github.com/alice/demo.git", "tok"),
            "https://tok@github.com/alice/demo.git"
        );
        // Non-https URLs pass through untouched.
        assert_eq!(
            authenticated_url("git@github.com:alice/demo.git", "tok"),
            "git@github.com:alice/demo.git"
        );
    }

    #[test]
    fn endpoint_switches_on_organization() {
        let host = GithubHost::with_base("https://api.github.com/", "tok");
        assert_eq!(
            host.create_endpoint(None),
            "https://api.github.com/user/repos"
        );
        assert_eq!(
            host.create_endpoint(Some("acme")),
            "https://api.github.com/orgs/acme/repos"
        );
    }
}
