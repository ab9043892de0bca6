//! GitHub REST implementation of the collaborator traits.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header::ACCEPT, Client, Response, StatusCode};
use serde::Deserialize;

use crate::error::SourceError;
use crate::source::{ContentSource, IssueLabeler, RepositoryInfo, VariableStore};

const USER_AGENT: &str = concat!("release-resolver/", env!("CARGO_PKG_VERSION"));
const API_VERSION: &str = "2022-11-28";
const JSON: &str = "application/vnd.github+json";
const RAW: &str = "application/vnd.github.raw+json";

pub struct GitHubClient {
    http: Client,
    api_url: String,
    token: String,
}

#[derive(Deserialize)]
struct Variable {
    value: String,
}

impl GitHubClient {
    pub fn new(
        api_url: impl Into<String>,
        token: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, SourceError> {
        let http = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()?;

        Ok(Self {
            http,
            api_url: api_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        })
    }

    async fn get(&self, path: &str, accept: &str, query: &[(&str, &str)]) -> Result<Response, SourceError> {
        let url = format!("{}{}", self.api_url, path);
        log::debug!("GET {}", url);

        let response = self
            .http
            .get(&url)
            .bearer_auth(&self.token)
            .header(ACCEPT, accept)
            .header("X-GitHub-Api-Version", API_VERSION)
            .query(query)
            .send()
            .await
            .map_err(|e| transport_error(e, &url))?;

        check_status(response, url)
    }
}

fn transport_error(error: reqwest::Error, url: &str) -> SourceError {
    if error.is_timeout() {
        SourceError::Timeout(url.to_string())
    } else {
        SourceError::Transport(error)
    }
}

async fn variable_value(response: Response) -> Result<String, SourceError> {
    let url = response.url().to_string();
    let variable: Variable = response.json().await.map_err(|e| transport_error(e, &url))?;
    Ok(variable.value)
}

fn check_status(response: Response, url: String) -> Result<Response, SourceError> {
    match response.status() {
        status if status.is_success() => Ok(response),
        StatusCode::NOT_FOUND => Err(SourceError::NotFound(url)),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(SourceError::Unauthorized(url)),
        status => Err(SourceError::Http {
            status: status.as_u16(),
            url,
        }),
    }
}

#[async_trait]
impl ContentSource for GitHubClient {
    async fn get_repository(&self, owner: &str, repo: &str) -> Result<RepositoryInfo, SourceError> {
        let response = self.get(&format!("/repos/{}/{}", owner, repo), JSON, &[]).await?;
        let url = response.url().to_string();
        response.json().await.map_err(|e| transport_error(e, &url))
    }

    async fn get_file_content(
        &self,
        owner: &str,
        repo: &str,
        path: &str,
        git_ref: Option<&str>,
    ) -> Result<Vec<u8>, SourceError> {
        let query: Vec<(&str, &str)> = git_ref.map(|r| ("ref", r)).into_iter().collect();
        let response = self
            .get(
                &format!("/repos/{}/{}/contents/{}", owner, repo, path.trim_start_matches('/')),
                RAW,
                &query,
            )
            .await?;
        let url = response.url().to_string();
        let body = response.bytes().await.map_err(|e| transport_error(e, &url))?;
        Ok(body.to_vec())
    }
}

#[async_trait]
impl VariableStore for GitHubClient {
    async fn get_repository_variable(
        &self,
        owner: &str,
        repo: &str,
        name: &str,
    ) -> Result<String, SourceError> {
        let response = self
            .get(&format!("/repos/{}/{}/actions/variables/{}", owner, repo, name), JSON, &[])
            .await?;
        variable_value(response).await
    }

    async fn get_environment_variable(
        &self,
        repo_id: u64,
        environment: &str,
        name: &str,
    ) -> Result<String, SourceError> {
        let response = self
            .get(
                &format!("/repositories/{}/environments/{}/variables/{}", repo_id, environment, name),
                JSON,
                &[],
            )
            .await?;
        variable_value(response).await
    }
}

#[async_trait]
impl IssueLabeler for GitHubClient {
    async fn add_label(
        &self,
        owner: &str,
        repo: &str,
        issue_number: u64,
        label: &str,
    ) -> Result<(), SourceError> {
        let url = format!("{}/repos/{}/{}/issues/{}/labels", self.api_url, owner, repo, issue_number);
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.token)
            .header(ACCEPT, JSON)
            .header("X-GitHub-Api-Version", API_VERSION)
            .json(&serde_json::json!({ "labels": [label] }))
            .send()
            .await
            .map_err(|e| transport_error(e, &url))?;

        check_status(response, url)?;
        Ok(())
    }
}
