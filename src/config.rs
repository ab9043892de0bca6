use std::{path::PathBuf, time::Duration};

use anyhow::{bail, Context, Result};
use regex::Regex;
use serde::Deserialize;

pub const DEFAULT_MANIFEST_FILE: &str = "deploy/manifest.yaml";
pub const DEFAULT_VERSION_MANIFEST_FILE: &str = ".release-please-manifest.json";
pub const DEFAULT_API_URL: &str = "https://api.github.com";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeploymentMode {
    Production,
    Staging { pull_number: u64 },
}

impl DeploymentMode {
    pub fn is_staging(&self) -> bool {
        matches!(self, DeploymentMode::Staging { .. })
    }
}

#[derive(Clone, Debug)]
pub struct Config {
    pub owner: String,
    pub repository: String,
    pub head_ref: Option<String>,
    pub mode: DeploymentMode,
    pub environment: String,
    pub org_domain: String,
    pub manifest_file: String,
    pub version_manifest_file: String,
    pub digest: Option<String>,
    pub github_token: String,
    pub api_url: String,
    pub override_variables: Vec<String>,
    pub staging_group_variable: String,
    pub staging_label: String,
    pub fetch_timeout: Duration,
    pub max_concurrent_fetches: usize,
    pub output_dir: PathBuf,
    pub github_output: Option<PathBuf>,
    pub artifact_dir: Option<PathBuf>,
    pub artifact_name: String,
    pub support_chart_repository: Option<String>,
    pub registry_credentials: Option<String>,
    pub ingress_class: String,
}

#[derive(Deserialize, Default)]
struct Event {
    repository: Option<EventRepository>,
    pull_request: Option<EventPullRequest>,
    number: Option<u64>,
}

#[derive(Deserialize)]
struct EventRepository {
    name: String,
}

#[derive(Deserialize)]
struct EventPullRequest {
    number: u64,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from a key lookup. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let required = |key: &str| get(key).with_context(|| key.to_string());
        let flag = |key: &str| get(key).is_some_and(|v| v.eq_ignore_ascii_case("true"));

        let event = match get("GITHUB_EVENT_PATH") {
            Some(path) => {
                let content = std::fs::read_to_string(&path)
                    .with_context(|| format!("reading event file {}", path))?;
                serde_json::from_str::<Event>(&content)
                    .with_context(|| format!("parsing event file {}", path))?
            }
            None => Event::default(),
        };

        let owner = required("GITHUB_REPOSITORY_OWNER")?;
        let repository = match event.repository {
            Some(repository) => repository.name,
            None => required("GITHUB_REPOSITORY")?
                .rsplit('/')
                .next()
                .unwrap_or_default()
                .to_string(),
        };

        let mode = if flag("CREATE_STAGING") {
            let pull_number = event
                .pull_request
                .map(|pr| pr.number)
                .or(event.number)
                .or_else(|| get("PULL_NUMBER").and_then(|n| n.parse().ok()))
                .context("staging deployments need a pull request number")?;
            DeploymentMode::Staging { pull_number }
        } else if flag("PROMOTE_CANDIDATE") || get("GITHUB_WORKFLOW").as_deref() == Some("configure")
        {
            DeploymentMode::Production
        } else {
            bail!("no deployment mode selected: set CREATE_STAGING or PROMOTE_CANDIDATE");
        };

        let org_domain = match mode {
            DeploymentMode::Staging { .. } => required("ORG_DOMAIN")?,
            DeploymentMode::Production => get("ORG_DOMAIN").unwrap_or_default(),
        };

        let digest = get("INPUT_DIGEST")
            .or_else(|| get("INPUT_CHECKSUM"))
            .map(|d| normalize_digest(&d))
            .transpose()?;

        let fetch_timeout = match get("FETCH_TIMEOUT_SECS") {
            Some(secs) => Duration::from_secs(secs.parse().context("FETCH_TIMEOUT_SECS")?),
            None => Duration::from_secs(30),
        };
        let max_concurrent_fetches = match get("MAX_CONCURRENT_FETCHES") {
            Some(n) => n.parse::<usize>().context("MAX_CONCURRENT_FETCHES")?.max(1),
            None => 4,
        };

        Ok(Config {
            owner,
            repository,
            head_ref: get("GITHUB_HEAD_REF"),
            mode,
            environment: required("ENVIRONMENT")?,
            org_domain,
            manifest_file: get("MANIFEST_FILE").unwrap_or_else(|| DEFAULT_MANIFEST_FILE.into()),
            version_manifest_file: get("VERSION_MANIFEST_FILE")
                .or_else(|| get("RP_MANIFEST_FILE"))
                .unwrap_or_else(|| DEFAULT_VERSION_MANIFEST_FILE.into()),
            digest,
            github_token: get("INPUT_GITHUB_TOKEN")
                .or_else(|| get("GITHUB_TOKEN"))
                .context("INPUT_GITHUB_TOKEN")?,
            api_url: get("GITHUB_API_URL").unwrap_or_else(|| DEFAULT_API_URL.into()),
            override_variables: split_list(
                &get("OVERRIDE_VARIABLES").unwrap_or_else(|| "STAGING_VALUES".into()),
            ),
            staging_group_variable: get("STAGING_GROUP_VARIABLE")
                .unwrap_or_else(|| "STAGING_GROUP".into()),
            staging_label: get("STAGING_LABEL").unwrap_or_else(|| "staging".into()),
            fetch_timeout,
            max_concurrent_fetches,
            output_dir: get("OUTPUT_DIR").map(PathBuf::from).unwrap_or_default(),
            github_output: get("GITHUB_OUTPUT").map(PathBuf::from),
            artifact_dir: get("ARTIFACT_DIR").map(PathBuf::from),
            artifact_name: get("ARTIFACT_NAME").unwrap_or_else(|| "releases".into()),
            support_chart_repository: get("SUPPORT_CHART_REPOSITORY"),
            registry_credentials: get("REGISTRY_CREDENTIALS"),
            ingress_class: get("INGRESS_CLASS").unwrap_or_else(|| "public".into()),
        })
    }

    /// Digest to pin the origin repository to. Only staging deploys use one.
    pub fn origin_digest(&self) -> Option<&str> {
        match self.mode {
            DeploymentMode::Staging { .. } => self.digest.as_deref(),
            DeploymentMode::Production => None,
        }
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

fn normalize_digest(raw: &str) -> Result<String> {
    let re = Regex::new(r"^(sha256:)?([a-f0-9]{64})$")?;
    let raw = raw.trim().to_ascii_lowercase();
    let Some(captures) = re.captures(&raw) else {
        bail!("invalid image digest {:?}, expected sha256:<64 hex>", raw);
    };
    Ok(format!("sha256:{}", &captures[2]))
}

#[cfg(test)]
impl Config {
    pub fn for_tests(mode: DeploymentMode) -> Self {
        Config {
            owner: "acme".into(),
            repository: "app".into(),
            head_ref: Some("feature".into()),
            mode,
            environment: "staging".into(),
            org_domain: "example.com".into(),
            manifest_file: DEFAULT_MANIFEST_FILE.into(),
            version_manifest_file: DEFAULT_VERSION_MANIFEST_FILE.into(),
            digest: None,
            github_token: "token".into(),
            api_url: DEFAULT_API_URL.into(),
            override_variables: vec!["STAGING_VALUES".into()],
            staging_group_variable: "STAGING_GROUP".into(),
            staging_label: "staging".into(),
            fetch_timeout: Duration::from_secs(5),
            max_concurrent_fetches: 2,
            output_dir: PathBuf::new(),
            github_output: None,
            artifact_dir: None,
            artifact_name: "releases".into(),
            support_chart_repository: None,
            registry_credentials: None,
            ingress_class: "public".into(),
        }
    }
}
