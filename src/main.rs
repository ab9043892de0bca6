use anyhow::{Context, Result};
use artifacts::{ArtifactSink, DirectorySink};
use config::{Config, DeploymentMode};
use github::GitHubClient;
use ingress::{synthesize, RouteMessages, RouteScope};
use manifest::{ManifestResolver, ReleaseDescriptor, CREATE_NAMESPACE, NAMESPACE};
use outputs::{write_step_outputs, RunSummary};
use regex::Regex;
use source::{ContentSource, IssueLabeler, RepositoryInfo, VariableStore};
use staging::StagingGroupExpander;
use version::apply_artifact_reference;
use writer::ReleaseArtifactWriter;

mod artifacts;
mod config;
mod error;
mod github;
mod ingress;
mod manifest;
mod outputs;
mod overrides;
mod source;
mod staging;
mod support;
mod version;
mod writer;

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info");
    }
    env_logger::init();

    let config = Config::from_env()?;
    let github = GitHubClient::new(&config.api_url, &config.github_token, config.fetch_timeout)
        .context("building GitHub client")?;
    let sink = config
        .artifact_dir
        .as_ref()
        .map(|dir| DirectorySink::new(dir, &config.output_dir));

    let services = Services {
        source: &github,
        variables: &github,
        labeler: &github,
        sink: sink.as_ref().map(|s| s as &dyn ArtifactSink),
    };

    let summary = run(&config, &services).await?;

    if let Some(path) = &config.github_output {
        write_step_outputs(path, &summary)?;
    }
    log::info!("Resolved releases: {}", summary.releases_line());

    Ok(())
}

/// The external collaborators a run talks to.
pub struct Services<'a> {
    pub source: &'a dyn ContentSource,
    pub variables: &'a dyn VariableStore,
    pub labeler: &'a dyn IssueLabeler,
    pub sink: Option<&'a dyn ArtifactSink>,
}

struct Plan {
    descriptors: Vec<ReleaseDescriptor>,
    messages: RouteMessages,
    hostname: Option<String>,
}

/// Resolves every release of the run, then writes and uploads them. Nothing
/// is written until all resolutions have succeeded. A failure while writing
/// leaves the releases already written in place.
async fn run(config: &Config, services: &Services<'_>) -> Result<RunSummary> {
    let origin = services
        .source
        .get_repository(&config.owner, &config.repository)
        .await
        .with_context(|| format!("looking up {}/{}", config.owner, config.repository))?;

    let plan = match config.mode {
        DeploymentMode::Production => production(config, services, &origin).await?,
        DeploymentMode::Staging { pull_number } => {
            staging(config, services, &origin, pull_number).await?
        }
    };

    let mut writer = ReleaseArtifactWriter::new(&config.output_dir);
    let mut releases = Vec::with_capacity(plan.descriptors.len());
    for descriptor in &plan.descriptors {
        let paths = writer.write(descriptor)?;
        if releases.contains(&paths.directory) {
            log::warn!(
                "Release {} was produced twice, the last one wins",
                paths.directory.display()
            );
            continue;
        }
        releases.push(paths.directory);
    }

    match services.sink {
        Some(sink) => sink.upload(&config.artifact_name, &writer.files())?,
        None => log::info!("No artifact directory configured, skipping upload"),
    }

    Ok(RunSummary {
        releases,
        message: plan.messages.render(),
        hostname: plan.hostname,
    })
}

async fn production(config: &Config, services: &Services<'_>, origin: &RepositoryInfo) -> Result<Plan> {
    let resolver = ManifestResolver::new(config, services.source, services.variables);
    let mut release = resolver.resolve(&config.owner, origin, None).await?;
    apply_artifact_reference(&mut release.descriptor, &release.version, config.origin_digest())?;

    Ok(Plan {
        descriptors: vec![release.descriptor],
        messages: RouteMessages::default(),
        hostname: None,
    })
}

async fn staging(
    config: &Config,
    services: &Services<'_>,
    origin: &RepositoryInfo,
    pull_number: u64,
) -> Result<Plan> {
    if let Err(e) = services
        .labeler
        .add_label(&config.owner, &origin.name, pull_number, &config.staging_label)
        .await
    {
        log::warn!("Could not label pull request #{}: {}", pull_number, e);
    }

    let expander = StagingGroupExpander::new(config, services.source, services.variables);
    let releases = expander.expand(&config.owner, origin).await?;

    let scope = RouteScope {
        namespace: staging_namespace(&origin.name, pull_number)?,
        pull_number,
        environment: config.environment.clone(),
        org_domain: config.org_domain.clone(),
    };
    log::info!("Staging namespace is {}", scope.namespace);

    let mut messages = RouteMessages::default();
    let mut origin_hostname = None;
    let mut first_hostname = None;
    let mut descriptors = Vec::with_capacity(releases.len());

    for release in releases {
        let mut descriptor = release.descriptor;
        let release_name = descriptor
            .release_name()
            .map(str::to_string)
            .with_context(|| format!("release of {} has no name", release.repository))?;

        let hostname = synthesize(&scope, &release_name, &mut descriptor, &mut messages);
        if release.repository == origin.name {
            origin_hostname = hostname;
        } else if first_hostname.is_none() {
            first_hostname = hostname;
        }
        descriptors.push(descriptor);
    }

    let auxiliary = support::auxiliary_releases(config, &scope, &descriptors);
    descriptors.extend(auxiliary);

    for descriptor in &mut descriptors {
        descriptor.set_parameter(NAMESPACE, scope.namespace.as_str());
        descriptor.set_parameter(CREATE_NAMESPACE, "true");
    }

    Ok(Plan {
        descriptors,
        messages,
        hostname: origin_hostname.or(first_hostname),
    })
}

const FALLBACK_NAMESPACE: &str = "staging";

/// `{repo}-{pull}` as a DNS label, `staging-{pull}` when nothing of the name survives.
fn staging_namespace(repository: &str, pull_number: u64) -> Result<String> {
    let invalid = Regex::new(r"[^a-z0-9-]+")?;
    let suffix = format!("-{}", pull_number);

    let mut base = invalid
        .replace_all(&repository.to_lowercase(), "-")
        .trim_matches('-')
        .to_string();
    base.truncate(63 - suffix.len());
    let base = match base.trim_end_matches('-') {
        "" => FALLBACK_NAMESPACE,
        base => base,
    };

    Ok(format!("{}{}", base, suffix))
}
