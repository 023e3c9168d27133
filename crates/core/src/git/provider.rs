//! The external repository seam.
//!
//! [`GitProvider`] is the only way the sync integration talks to a hosted Git
//! repository. Reads are idempotent and may be retried via [`RetryPolicy`];
//! commits are attempted exactly once.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::errors::GitHubError;

/// The tip of the synced branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteHead {
    pub commit_id: String,
    pub commit_date: DateTime<Utc>,
}

/// A text file read from the repository. Paths are repository-relative.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteFile {
    pub path: String,
    pub text: String,
}

/// A file to create or overwrite in a commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileAddition {
    pub path: String,
    pub text: String,
}

/// One atomic change set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitRequest {
    pub message: String,
    /// The branch head the change set was computed against. The provider
    /// must refuse the commit when the branch has moved.
    pub expected_head: Option<String>,
    pub additions: Vec<FileAddition>,
    pub deletions: Vec<String>,
}

impl CommitRequest {
    pub fn is_empty(&self) -> bool {
        self.additions.is_empty() && self.deletions.is_empty()
    }
}

/// Result of a commit attempt that reached the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitResult {
    Committed {
        commit_id: String,
        commit_date: DateTime<Utc>,
    },
    /// The branch moved since `expected_head`; nothing was written.
    Stale { remote_head: String },
}

/// A hosted Git repository.
#[async_trait]
pub trait GitProvider: Send + Sync {
    /// Current head of the configured branch.
    async fn head(&self) -> Result<RemoteHead, GitHubError>;

    /// All text files under `directory` ("" = whole tree) at `commit_id`.
    async fn fetch_files(
        &self,
        commit_id: &str,
        directory: &str,
    ) -> Result<Vec<RemoteFile>, GitHubError>;

    /// Apply `request` as a single commit on the configured branch.
    async fn commit(&self, request: &CommitRequest) -> Result<CommitResult, GitHubError>;
}

/// Exponential backoff for idempotent reads.
///
/// The delay before retry `n` (0-based) is `base * 2^min(n, 6)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
        }
    }

    /// No retries at all.
    pub fn none() -> Self {
        Self::new(0, Duration::ZERO)
    }

    pub fn delay_for(&self, retry: u32) -> Duration {
        self.base_delay.saturating_mul(1 << retry.min(6))
    }

    /// Run `op`, retrying transient failures.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut op: F) -> Result<T, GitHubError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, GitHubError>>,
    {
        let mut retry = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && retry < self.max_retries => {
                    let delay = self.delay_for(retry);
                    warn!(
                        operation,
                        retry = retry + 1,
                        max_retries = self.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "transient repository error, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    retry += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_delay_doubles_and_caps() {
        let policy = RetryPolicy::new(10, Duration::from_millis(100));
        assert_eq!(policy.delay_for(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(400));
        assert_eq!(policy.delay_for(6), Duration::from_millis(6400));
        assert_eq!(policy.delay_for(9), Duration::from_millis(6400));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_retries_transient_errors() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(3, Duration::from_millis(10));
        let result = policy
            .run("head", || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(GitHubError::ApiError {
                            status: 503,
                            body: String::new(),
                        })
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;
        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_does_not_retry_permanent_errors() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = RetryPolicy::default()
            .run("head", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(GitHubError::BranchNotFound("main".into())) }
            })
            .await;
        assert!(matches!(result, Err(GitHubError::BranchNotFound(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_gives_up_after_max_retries() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = RetryPolicy::new(2, Duration::from_millis(1))
            .run("fetch", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async {
                    Err(GitHubError::RateLimited {
                        reset_at: "0".into(),
                    })
                }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_empty_request() {
        let request = CommitRequest {
            message: "noop".into(),
            expected_head: None,
            additions: vec![],
            deletions: vec![],
        };
        assert!(request.is_empty());
    }
}
