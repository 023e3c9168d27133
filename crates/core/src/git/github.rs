//! GitHub REST API provider built on the Git data API.

use async_trait::async_trait;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, USER_AGENT};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use super::paths::strip_base;
use super::provider::{
    CommitRequest, CommitResult, GitProvider, RemoteFile, RemoteHead, RetryPolicy,
};
use crate::errors::GitHubError;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct GitRef {
    object: GitObject,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct GitObject {
    sha: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct GitCommit {
    sha: String,
    tree: GitObject,
    committer: GitActor,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct GitActor {
    date: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct GitTree {
    sha: String,
    tree: Vec<TreeEntry>,
    #[serde(default)]
    truncated: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct TreeEntry {
    path: String,
    #[serde(rename = "type")]
    kind: String,
    sha: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct GitBlob {
    content: String,
    encoding: String,
}

/// An entry of a `POST /git/trees` request. `sha: None` deletes the path.
#[derive(Debug, Clone, Serialize)]
struct NewTreeEntry<'a> {
    path: &'a str,
    mode: &'static str,
    #[serde(rename = "type")]
    kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    sha: Option<Option<&'a str>>,
}

/// Asynchronous GitHub client bound to one repository branch.
#[derive(Clone)]
pub struct GitHubClient {
    http: reqwest::Client,
    api_url: String,
    token: String,
    repo: String,
    branch: String,
    retry: RetryPolicy,
}

impl GitHubClient {
    pub fn new(
        api_url: impl Into<String>,
        token: impl Into<String>,
        repo: impl Into<String>,
        branch: impl Into<String>,
    ) -> Result<Self, GitHubError> {
        let api_url = api_url.into().trim_end_matches('/').to_string();
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/vnd.github+json"),
        );
        headers.insert(USER_AGENT, HeaderValue::from_static("contentsync/0.1"));
        headers.insert(
            "X-GitHub-Api-Version",
            HeaderValue::from_static("2022-11-28"),
        );
        let http = reqwest::Client::builder()
            .default_headers(headers)
            .build()?;
        let repo = repo.into();
        let branch = branch.into();
        info!(api_url = %api_url, repo = %repo, branch = %branch, "created GitHubClient");
        Ok(Self {
            http,
            api_url,
            token: token.into(),
            repo,
            branch,
            retry: RetryPolicy::default(),
        })
    }

    /// Replace the backoff used for reads.
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn repo_url(&self, suffix: &str) -> String {
        format!("{}/repos/{}/{}", self.api_url, self.repo, suffix)
    }

    async fn ref_sha(&self) -> Result<String, GitHubError> {
        let url = self.repo_url(&format!("git/ref/heads/{}", self.branch));
        let resp = self.http.get(&url).bearer_auth(&self.token).send().await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Err(GitHubError::BranchNotFound(self.branch.clone()));
        }
        let git_ref: GitRef = check_response(resp).await?.json().await?;
        Ok(git_ref.object.sha)
    }

    async fn get_commit(&self, sha: &str) -> Result<GitCommit, GitHubError> {
        let url = self.repo_url(&format!("git/commits/{sha}"));
        let resp = self.http.get(&url).bearer_auth(&self.token).send().await?;
        Ok(check_response(resp).await?.json().await?)
    }

    async fn get_tree(&self, sha: &str) -> Result<GitTree, GitHubError> {
        let url = self.repo_url(&format!("git/trees/{sha}"));
        let resp = self
            .http
            .get(&url)
            .bearer_auth(&self.token)
            .query(&[("recursive", "1")])
            .send()
            .await?;
        Ok(check_response(resp).await?.json().await?)
    }

    async fn get_blob(&self, sha: &str) -> Result<GitBlob, GitHubError> {
        let url = self.repo_url(&format!("git/blobs/{sha}"));
        let resp = self.http.get(&url).bearer_auth(&self.token).send().await?;
        Ok(check_response(resp).await?.json().await?)
    }

    async fn fetch_head_once(&self) -> Result<RemoteHead, GitHubError> {
        let sha = self.ref_sha().await?;
        let commit = self.get_commit(&sha).await?;
        Ok(RemoteHead {
            commit_id: sha,
            commit_date: parse_date(commit.committer.date.as_deref()),
        })
    }

    async fn fetch_files_once(
        &self,
        commit_id: &str,
        directory: &str,
    ) -> Result<Vec<RemoteFile>, GitHubError> {
        let commit = self.get_commit(commit_id).await?;
        let tree = self.get_tree(&commit.tree.sha).await?;
        if tree.truncated {
            warn!(tree = %tree.sha, "repository tree listing was truncated");
        }

        let mut files = Vec::new();
        for entry in select_blobs(&tree.tree, directory) {
            let blob = self.get_blob(&entry.sha).await?;
            match decode_blob(&blob) {
                Some(text) => files.push(RemoteFile {
                    path: entry.path.clone(),
                    text,
                }),
                None => debug!(path = %entry.path, "skipping non-text blob"),
            }
        }
        Ok(files)
    }
}

#[async_trait]
impl GitProvider for GitHubClient {
    #[instrument(skip(self), fields(repo = %self.repo, branch = %self.branch))]
    async fn head(&self) -> Result<RemoteHead, GitHubError> {
        let head = self.retry.run("head", || self.fetch_head_once()).await?;
        debug!(commit = %head.commit_id, "fetched branch head");
        Ok(head)
    }

    #[instrument(skip(self), fields(repo = %self.repo))]
    async fn fetch_files(
        &self,
        commit_id: &str,
        directory: &str,
    ) -> Result<Vec<RemoteFile>, GitHubError> {
        let files = self
            .retry
            .run("fetch_files", || self.fetch_files_once(commit_id, directory))
            .await?;
        debug!(count = files.len(), "fetched repository files");
        Ok(files)
    }

    #[instrument(skip(self, request), fields(
        repo = %self.repo,
        additions = request.additions.len(),
        deletions = request.deletions.len(),
    ))]
    async fn commit(&self, request: &CommitRequest) -> Result<CommitResult, GitHubError> {
        let head = self.ref_sha().await?;
        if let Some(expected) = &request.expected_head {
            if *expected != head {
                info!(expected = %expected, remote = %head, "branch moved, refusing commit");
                return Ok(CommitResult::Stale { remote_head: head });
            }
        }

        let parent = self.get_commit(&head).await?;
        let entries = tree_entries(request);
        let resp = self
            .http
            .post(self.repo_url("git/trees"))
            .bearer_auth(&self.token)
            .json(&serde_json::json!({ "base_tree": parent.tree.sha, "tree": entries }))
            .send()
            .await?;
        let tree: GitObject = check_response(resp).await?.json().await?;

        let resp = self
            .http
            .post(self.repo_url("git/commits"))
            .bearer_auth(&self.token)
            .json(&serde_json::json!({
                "message": request.message,
                "tree": tree.sha,
                "parents": [head],
            }))
            .send()
            .await?;
        let commit: GitCommit = check_response(resp).await?.json().await?;

        // Fast-forward only: a concurrent push between the head check and
        // here surfaces as 422 and is reported as stale.
        let resp = self
            .http
            .patch(self.repo_url(&format!("git/refs/heads/{}", self.branch)))
            .bearer_auth(&self.token)
            .json(&serde_json::json!({ "sha": commit.sha, "force": false }))
            .send()
            .await?;
        if resp.status() == StatusCode::UNPROCESSABLE_ENTITY {
            warn!(commit = %commit.sha, "ref update rejected as non-fast-forward");
            return Ok(CommitResult::Stale { remote_head: head });
        }
        check_response(resp).await?;

        info!(commit = %commit.sha, "committed to repository");
        Ok(CommitResult::Committed {
            commit_date: parse_date(commit.committer.date.as_deref()),
            commit_id: commit.sha,
        })
    }
}

/// Map a non-success response to a [`GitHubError`], passing successes through.
async fn check_response(resp: reqwest::Response) -> Result<reqwest::Response, GitHubError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    if status.as_u16() == 401 || status.as_u16() == 403 {
        return Err(GitHubError::AuthenticationFailed(format!("HTTP {}", status)));
    }
    if status.as_u16() == 429 {
        let reset = resp
            .headers()
            .get("x-ratelimit-reset")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("unknown")
            .to_string();
        return Err(GitHubError::RateLimited { reset_at: reset });
    }
    let body = resp.text().await.unwrap_or_default();
    Err(GitHubError::ApiError {
        status: status.as_u16(),
        body: if body.is_empty() {
            format!("HTTP {}", status)
        } else {
            body
        },
    })
}

fn parse_date(date: Option<&str>) -> DateTime<Utc> {
    date.and_then(|d| DateTime::parse_from_rfc3339(d).ok())
        .map(|d| d.with_timezone(&Utc))
        .unwrap_or_else(Utc::now)
}

/// Blob entries located under `directory`.
fn select_blobs<'a>(entries: &'a [TreeEntry], directory: &str) -> Vec<&'a TreeEntry> {
    entries
        .iter()
        .filter(|e| e.kind == "blob")
        .filter(|e| strip_base(&e.path, directory).is_some_and(|rest| !rest.is_empty()))
        .collect()
}

/// Decode a base64 blob payload; `None` for binary content.
fn decode_blob(blob: &GitBlob) -> Option<String> {
    let bytes = match blob.encoding.as_str() {
        "base64" => {
            let compact: String = blob.content.split_whitespace().collect();
            base64::engine::general_purpose::STANDARD
                .decode(compact)
                .ok()?
        }
        _ => blob.content.clone().into_bytes(),
    };
    String::from_utf8(bytes).ok()
}

fn tree_entries(request: &CommitRequest) -> Vec<NewTreeEntry<'_>> {
    let additions = request.additions.iter().map(|a| NewTreeEntry {
        path: &a.path,
        mode: "100644",
        kind: "blob",
        content: Some(&a.text),
        sha: None,
    });
    let deletions = request.deletions.iter().map(|path| NewTreeEntry {
        path,
        mode: "100644",
        kind: "blob",
        content: None,
        sha: Some(None),
    });
    additions.chain(deletions).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::git::provider::FileAddition;

    fn entry(path: &str, kind: &str) -> TreeEntry {
        TreeEntry {
            path: path.into(),
            kind: kind.into(),
            sha: format!("sha-{path}"),
        }
    }

    #[test]
    fn test_select_blobs_filters_directory_and_trees() {
        let entries = vec![
            entry("content", "tree"),
            entry("content/a.md", "blob"),
            entry("contents/b.md", "blob"),
            entry("readme.md", "blob"),
        ];
        let selected: Vec<&str> = select_blobs(&entries, "content")
            .into_iter()
            .map(|e| e.path.as_str())
            .collect();
        assert_eq!(selected, vec!["content/a.md"]);
        assert_eq!(select_blobs(&entries, "").len(), 3);
    }

    #[test]
    fn test_decode_blob_handles_wrapped_base64() {
        let blob = GitBlob {
            content: "IyBI\nZWxs\nbw==\n".into(),
            encoding: "base64".into(),
        };
        assert_eq!(decode_blob(&blob).as_deref(), Some("# Hello"));

        let binary = GitBlob {
            content: base64::engine::general_purpose::STANDARD.encode([0xff, 0xfe, 0x00]),
            encoding: "base64".into(),
        };
        assert!(decode_blob(&binary).is_none());
    }

    #[test]
    fn test_tree_entries_mark_deletions_with_null_sha() {
        let request = CommitRequest {
            message: "sync".into(),
            expected_head: Some("abc".into()),
            additions: vec![FileAddition {
                path: "docs/a.md".into(),
                text: "# A\n".into(),
            }],
            deletions: vec!["docs/old.md".into()],
        };
        let json = serde_json::to_value(tree_entries(&request)).unwrap();
        assert_eq!(json[0]["content"], "# A\n");
        assert!(json[0].get("sha").is_none());
        assert_eq!(json[1]["path"], "docs/old.md");
        assert!(json[1]["sha"].is_null());
        assert!(json[1].get("content").is_none());
    }

    #[test]
    fn test_parse_date_falls_back_to_now() {
        let parsed = parse_date(Some("2024-03-01T12:00:00Z"));
        assert_eq!(parsed.to_rfc3339(), "2024-03-01T12:00:00+00:00");
        let before = Utc::now();
        assert!(parse_date(None) >= before);
    }

    #[test]
    fn test_client_urls() {
        let client =
            GitHubClient::new("https://api.github.com/", "t", "acme/content", "main").unwrap();
        assert_eq!(
            client.repo_url("git/trees"),
            "https://api.github.com/repos/acme/content/git/trees"
        );
    }
}
