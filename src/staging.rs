//! Expands a staging deploy to the origin repository plus its declared siblings.

use futures::{stream, StreamExt, TryStreamExt};
use serde_yaml::Value;

use crate::config::Config;
use crate::error::{FormatError, ResolveError, SourceError};
use crate::manifest::{ManifestResolver, ResolvedRelease};
use crate::source::{ContentSource, RepositoryInfo, VariableStore};
use crate::version::apply_artifact_reference;

/// Parses a staging group declaration: a YAML list, or names separated by
/// commas or whitespace. The origin and repeated names are dropped.
pub fn parse_group(raw: &str, origin: &str) -> Result<Vec<String>, FormatError> {
    let names: Vec<String> = match serde_yaml::from_str::<Value>(raw)? {
        Value::Null => Vec::new(),
        Value::Sequence(items) => items
            .into_iter()
            .map(|item| match item {
                Value::String(name) => Ok(name.trim().to_string()),
                _ => Err(FormatError::NotARepositoryList),
            })
            .collect::<Result<_, _>>()?,
        Value::String(list) => list
            .split(|c: char| c == ',' || c.is_whitespace())
            .map(str::to_string)
            .collect(),
        _ => return Err(FormatError::NotARepositoryList),
    };

    let mut group: Vec<String> = Vec::new();
    for name in names {
        if name.is_empty() || name == origin || group.contains(&name) {
            continue;
        }
        group.push(name);
    }
    Ok(group)
}

pub struct StagingGroupExpander<'a> {
    config: &'a Config,
    source: &'a dyn ContentSource,
    variables: &'a dyn VariableStore,
    resolver: ManifestResolver<'a>,
}

impl<'a> StagingGroupExpander<'a> {
    pub fn new(config: &'a Config, source: &'a dyn ContentSource, variables: &'a dyn VariableStore) -> Self {
        Self {
            config,
            source,
            variables,
            resolver: ManifestResolver::new(config, source, variables),
        }
    }

    /// Siblings declared for `origin`. Absent or malformed declarations mean a solo deploy.
    pub async fn declared_group(&self, owner: &str, origin: &str) -> Vec<String> {
        let variable = &self.config.staging_group_variable;
        let raw = match self.variables.get_repository_variable(owner, origin, variable).await {
            Ok(raw) => raw,
            Err(SourceError::NotFound(_)) => {
                log::debug!("No staging group declared for {}", origin);
                return Vec::new();
            }
            Err(e) => {
                log::warn!("Could not read staging group of {}, deploying it alone: {}", origin, e);
                return Vec::new();
            }
        };

        match parse_group(&raw, origin) {
            Ok(group) => group,
            Err(e) => {
                log::warn!("Malformed staging group for {}, deploying it alone: {}", origin, e);
                Vec::new()
            }
        }
    }

    /// Resolves the origin at its in-review ref and every sibling at its
    /// default branch. The result keeps the declared order with the origin
    /// first. Any fatal sibling failure fails the whole expansion.
    pub async fn expand(
        &self,
        owner: &str,
        origin: &RepositoryInfo,
    ) -> Result<Vec<ResolvedRelease>, ResolveError> {
        let group = self.declared_group(owner, &origin.name).await;
        log::info!("Staging group for {}: {:?}", origin.name, group);

        let origin_release = async {
            let mut release = self
                .resolver
                .resolve(owner, origin, self.config.head_ref.as_deref())
                .await?;
            apply_artifact_reference(
                &mut release.descriptor,
                &release.version,
                self.config.origin_digest(),
            )?;
            Ok::<_, ResolveError>(release)
        };

        let siblings = stream::iter(group)
            .map(|name| self.resolve_sibling(owner, name))
            .buffered(self.config.max_concurrent_fetches.max(1))
            .try_collect::<Vec<_>>();

        let (origin_release, siblings) = futures::try_join!(origin_release, siblings)?;

        let mut releases = Vec::with_capacity(siblings.len() + 1);
        releases.push(origin_release);
        releases.extend(siblings);
        Ok(releases)
    }

    async fn resolve_sibling(&self, owner: &str, name: String) -> Result<ResolvedRelease, ResolveError> {
        let repository = self
            .source
            .get_repository(owner, &name)
            .await
            .map_err(|source| ResolveError::RepositoryUnavailable {
                repository: name.clone(),
                source,
            })?;

        let mut release = self.resolver.resolve(owner, &repository, None).await?;
        apply_artifact_reference(&mut release.descriptor, &release.version, None)?;
        Ok(release)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DeploymentMode, DEFAULT_MANIFEST_FILE, DEFAULT_VERSION_MANIFEST_FILE};
    use crate::source::MemorySource;

    fn with_service(source: MemorySource, name: &str, id: u64, git_ref: Option<&str>) -> MemorySource {
        let manifest = format!(
            "release_name: {}\nchart: service\nvalues:\n  image:\n    repository: ghcr.io/acme/{}\n",
            name, name
        );
        source
            .with_repository(name, id)
            .with_file(name, DEFAULT_MANIFEST_FILE, git_ref, &manifest)
            .with_file(name, DEFAULT_VERSION_MANIFEST_FILE, git_ref, &format!(r#"{{".": "{}.0.0"}}"#, id))
    }

    fn origin() -> RepositoryInfo {
        RepositoryInfo {
            id: 1,
            name: "a".into(),
            full_name: "acme/a".into(),
            default_branch: "main".into(),
        }
    }

    fn config() -> Config {
        let mut config = Config::for_tests(DeploymentMode::Staging { pull_number: 7 });
        config.digest = Some(format!("sha256:{}", "f".repeat(64)));
        config
    }

    fn names(releases: &[ResolvedRelease]) -> Vec<&str> {
        releases.iter().map(|r| r.repository.as_str()).collect()
    }

    #[test]
    fn test_parse_group_list() {
        assert_eq!(parse_group("[b, c]", "a").unwrap(), vec!["b", "c"]);
        assert_eq!(parse_group("- b\n- a\n- c\n- b\n", "a").unwrap(), vec!["b", "c"]);
    }

    #[test]
    fn test_parse_group_plain_string() {
        assert_eq!(parse_group("b, c d", "a").unwrap(), vec!["b", "c", "d"]);
        assert!(parse_group("", "a").unwrap().is_empty());
    }

    #[test]
    fn test_parse_group_rejects_nested_entries() {
        assert!(matches!(
            parse_group("- b\n- {c: d}\n", "a"),
            Err(FormatError::NotARepositoryList)
        ));
        assert!(parse_group("x: y", "a").is_err());
    }

    #[tokio::test]
    async fn test_expand_keeps_declared_order_with_origin_first() {
        let config = config();
        let source = MemorySource::new();
        let source = with_service(source, "a", 1, Some("feature"));
        let source = with_service(source, "b", 2, None);
        let source = with_service(source, "c", 3, None).with_repo_variable("a", "STAGING_GROUP", "[b, a, c]");
        let expander = StagingGroupExpander::new(&config, &source, &source);

        let releases = expander.expand("acme", &origin()).await.unwrap();

        assert_eq!(names(&releases), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_slow_sibling_keeps_its_declared_position() {
        use std::time::Duration;

        let mut config = config();
        config.max_concurrent_fetches = 4;
        let source = with_service(MemorySource::new(), "a", 1, Some("feature"));
        let source = with_service(source, "b", 2, None).with_delay("b", Duration::from_millis(200));
        let source = with_service(source, "c", 3, None).with_delay("c", Duration::from_millis(10));
        let source = with_service(source, "d", 4, None).with_repo_variable("a", "STAGING_GROUP", "[b, c, d]");
        let expander = StagingGroupExpander::new(&config, &source, &source);

        let releases = expander.expand("acme", &origin()).await.unwrap();

        assert_eq!(source.answered(), vec!["d", "c", "b"]);
        assert_eq!(names(&releases), vec!["a", "b", "c", "d"]);
    }

    #[tokio::test]
    async fn test_origin_gets_digest_and_siblings_get_tags() {
        let config = config();
        let source = with_service(MemorySource::new(), "a", 1, Some("feature"));
        let source = with_service(source, "b", 2, None).with_repo_variable("a", "STAGING_GROUP", "b");
        let expander = StagingGroupExpander::new(&config, &source, &source);

        let releases = expander.expand("acme", &origin()).await.unwrap();

        let origin_image = &releases[0].descriptor.values["image"];
        assert_eq!(origin_image["digest"], Value::from(config.digest.clone().unwrap()));
        assert!(origin_image.get("tag").is_none());

        let sibling_image = &releases[1].descriptor.values["image"];
        assert_eq!(sibling_image["tag"], Value::from("2.0.0"));
        assert!(sibling_image.get("digest").is_none());
    }

    #[tokio::test]
    async fn test_missing_declaration_is_solo_deploy() {
        let config = config();
        let source = with_service(MemorySource::new(), "a", 1, Some("feature"));
        let expander = StagingGroupExpander::new(&config, &source, &source);

        let releases = expander.expand("acme", &origin()).await.unwrap();
        assert_eq!(names(&releases), vec!["a"]);
    }

    #[tokio::test]
    async fn test_malformed_declaration_is_solo_deploy() {
        let config = config();
        let source = with_service(MemorySource::new(), "a", 1, Some("feature"))
            .with_repo_variable("a", "STAGING_GROUP", "{b: [c");
        let expander = StagingGroupExpander::new(&config, &source, &source);

        assert!(expander.declared_group("acme", "a").await.is_empty());
    }

    #[tokio::test]
    async fn test_failing_sibling_aborts_expansion() {
        let config = config();
        let source = with_service(MemorySource::new(), "a", 1, Some("feature"))
            .with_repository("broken", 9)
            .with_repo_variable("a", "STAGING_GROUP", "[broken]");
        let expander = StagingGroupExpander::new(&config, &source, &source);

        let result = expander.expand("acme", &origin()).await;
        assert!(matches!(
            result,
            Err(ResolveError::ManifestUnavailable { ref repository, .. }) if repository == "broken"
        ));
    }

    #[tokio::test]
    async fn test_unknown_sibling_aborts_expansion() {
        let config = config();
        let source = with_service(MemorySource::new(), "a", 1, Some("feature"))
            .with_repo_variable("a", "STAGING_GROUP", "[ghost]");
        let expander = StagingGroupExpander::new(&config, &source, &source);

        let result = expander.expand("acme", &origin()).await;
        assert!(matches!(result, Err(ResolveError::RepositoryUnavailable { .. })));
    }
}
