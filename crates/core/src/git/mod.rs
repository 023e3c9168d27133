//! External Git repository integration: the provider seam, the GitHub
//! implementation and repository path rules.

pub mod github;
pub mod paths;
pub mod provider;

pub use github::GitHubClient;
pub use provider::{
    CommitRequest, CommitResult, FileAddition, GitProvider, RemoteFile, RemoteHead, RetryPolicy,
};
