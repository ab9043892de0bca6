//! Collaborator seams: where file content, variables and labels come from.

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::SourceError;

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct RepositoryInfo {
    pub id: u64,
    pub name: String,
    pub full_name: String,
    pub default_branch: String,
}

#[async_trait]
pub trait ContentSource: Send + Sync {
    async fn get_repository(&self, owner: &str, repo: &str) -> Result<RepositoryInfo, SourceError>;

    /// Raw bytes of `path`. `git_ref` of `None` means the default branch.
    async fn get_file_content(
        &self,
        owner: &str,
        repo: &str,
        path: &str,
        git_ref: Option<&str>,
    ) -> Result<Vec<u8>, SourceError>;
}

#[async_trait]
pub trait VariableStore: Send + Sync {
    async fn get_repository_variable(
        &self,
        owner: &str,
        repo: &str,
        name: &str,
    ) -> Result<String, SourceError>;

    async fn get_environment_variable(
        &self,
        repo_id: u64,
        environment: &str,
        name: &str,
    ) -> Result<String, SourceError>;
}

#[async_trait]
pub trait IssueLabeler: Send + Sync {
    async fn add_label(
        &self,
        owner: &str,
        repo: &str,
        issue_number: u64,
        label: &str,
    ) -> Result<(), SourceError>;
}

#[cfg(test)]
pub use memory::MemorySource;
