//! Chart manifest parsing and per-repository release resolution.

use serde_yaml::{Mapping, Value};

use crate::config::Config;
use crate::error::{FormatError, ResolveError};
use crate::overrides::{load_layer, LayerScope, ValueOverrideLayer};
use crate::source::{ContentSource, RepositoryInfo, VariableStore};

pub const RELEASE_NAME: &str = "release_name";
pub const NAMESPACE: &str = "namespace";
pub const CREATE_NAMESPACE: &str = "create_namespace";

const VALUES: &str = "values";
const ENVIRONMENT_PLACEHOLDER: &str = "%ENVIRONMENT%";

/// Chart input values plus the flat deployment coordinates.
#[derive(Clone, Debug, PartialEq)]
pub struct ReleaseDescriptor {
    pub values: Value,
    pub parameters: Mapping,
}

impl ReleaseDescriptor {
    pub fn new(release_name: &str, values: Value) -> Self {
        let mut parameters = Mapping::new();
        parameters.insert(RELEASE_NAME.into(), release_name.into());
        Self { values, parameters }
    }

    pub fn release_name(&self) -> Option<&str> {
        self.parameters
            .get(RELEASE_NAME)
            .and_then(Value::as_str)
            .filter(|name| !name.trim().is_empty())
    }

    pub fn set_parameter(&mut self, key: &str, value: impl Into<Value>) {
        self.parameters.insert(key.into(), value.into());
    }
}

/// A descriptor together with the version it should deploy.
#[derive(Clone, Debug, PartialEq)]
pub struct ResolvedRelease {
    pub repository: String,
    pub descriptor: ReleaseDescriptor,
    pub version: String,
}

/// Splits a chart manifest into values and parameters.
pub fn parse_chart_descriptor(content: &[u8]) -> Result<ReleaseDescriptor, FormatError> {
    let Value::Mapping(document) = serde_yaml::from_slice::<Value>(content)? else {
        return Err(FormatError::NotAMapping);
    };
    let mut parameters = unwrap_legacy_nesting(document);

    let values = match parameters.remove(VALUES) {
        None | Some(Value::Null) => Value::Mapping(Mapping::new()),
        Some(values @ Value::Mapping(_)) => values,
        Some(_) => return Err(FormatError::ValuesNotAMapping),
    };

    let descriptor = ReleaseDescriptor { values, parameters };
    if descriptor.release_name().is_none() {
        return Err(FormatError::MissingReleaseName);
    }
    Ok(descriptor)
}

// Older manifests put everything under one key such as `helm:`.
fn unwrap_legacy_nesting(document: Mapping) -> Mapping {
    if document.len() != 1 || document.contains_key(VALUES) || document.contains_key(RELEASE_NAME) {
        return document;
    }

    let nested = match document.iter().next() {
        Some((key, Value::Mapping(inner))) => {
            log::debug!("Unwrapping manifest nested under {:?}", key);
            Some(inner.clone())
        }
        _ => None,
    };
    nested.unwrap_or(document)
}

/// Reads the single version string out of a release tracking manifest.
/// Integer versions are accepted unquoted; anything with a dot must be a string
/// since YAML would read `1.10` as the float `1.1`.
pub fn parse_version(content: &[u8]) -> Result<String, FormatError> {
    let document = serde_yaml::from_slice::<Value>(content)?;

    let entry = match &document {
        Value::Mapping(mapping) => mapping
            .get(".")
            .or_else(|| mapping.get("version"))
            .or_else(|| match mapping.len() {
                1 => mapping.values().next(),
                _ => None,
            }),
        scalar => Some(scalar),
    };

    match entry {
        Some(Value::String(version)) if !version.trim().is_empty() => Ok(version.trim().to_string()),
        Some(Value::Number(version)) if version.is_f64() => {
            Err(FormatError::UnquotedVersion(version.to_string()))
        }
        Some(Value::Number(version)) => Ok(version.to_string()),
        _ => Err(FormatError::MissingVersion),
    }
}

/// Replaces the environment placeholder in every string scalar.
pub fn substitute_environment(values: &mut Value, environment: &str) {
    match values {
        Value::String(s) if s.contains(ENVIRONMENT_PLACEHOLDER) => {
            *s = s.replace(ENVIRONMENT_PLACEHOLDER, environment);
        }
        Value::Sequence(items) => items
            .iter_mut()
            .for_each(|item| substitute_environment(item, environment)),
        Value::Mapping(mapping) => mapping
            .values_mut()
            .for_each(|item| substitute_environment(item, environment)),
        Value::Tagged(tagged) => substitute_environment(&mut tagged.value, environment),
        _ => {}
    }
}

pub struct ManifestResolver<'a> {
    config: &'a Config,
    source: &'a dyn ContentSource,
    variables: &'a dyn VariableStore,
}

impl<'a> ManifestResolver<'a> {
    pub fn new(config: &'a Config, source: &'a dyn ContentSource, variables: &'a dyn VariableStore) -> Self {
        Self {
            config,
            source,
            variables,
        }
    }

    pub async fn resolve(
        &self,
        owner: &str,
        repository: &RepositoryInfo,
        git_ref: Option<&str>,
    ) -> Result<ResolvedRelease, ResolveError> {
        let repo = repository.name.as_str();
        let manifest_path = &self.config.manifest_file;
        log::info!(
            "Resolving {} at {}",
            repository.full_name,
            git_ref.unwrap_or(&repository.default_branch)
        );

        let content = self
            .source
            .get_file_content(owner, repo, manifest_path, git_ref)
            .await
            .map_err(|source| ResolveError::ManifestUnavailable {
                repository: repo.to_string(),
                path: manifest_path.clone(),
                source,
            })?;
        let mut descriptor =
            parse_chart_descriptor(&content).map_err(|source| ResolveError::ManifestInvalid {
                repository: repo.to_string(),
                path: manifest_path.clone(),
                source,
            })?;

        if self.config.mode.is_staging() {
            for layer in self.override_layers(owner, repository).await {
                layer.apply(&mut descriptor.values);
            }
        }
        substitute_environment(&mut descriptor.values, &self.config.environment);

        let version_path = &self.config.version_manifest_file;
        let content = self
            .source
            .get_file_content(owner, repo, version_path, git_ref)
            .await
            .map_err(|source| ResolveError::VersionUnavailable {
                repository: repo.to_string(),
                path: version_path.clone(),
                source,
            })?;
        let version = parse_version(&content).map_err(|source| ResolveError::VersionInvalid {
            repository: repo.to_string(),
            path: version_path.clone(),
            source,
        })?;

        Ok(ResolvedRelease {
            repository: repo.to_string(),
            descriptor,
            version,
        })
    }

    /// Repository-scoped layers first, then environment-scoped ones.
    async fn override_layers(&self, owner: &str, repository: &RepositoryInfo) -> Vec<ValueOverrideLayer> {
        let mut layers = Vec::new();

        for name in &self.config.override_variables {
            let fetched = self
                .variables
                .get_repository_variable(owner, &repository.name, name)
                .await;
            layers.extend(load_layer(&repository.name, name, LayerScope::Repository, fetched));
        }

        for name in &self.config.override_variables {
            let fetched = self
                .variables
                .get_environment_variable(repository.id, &self.config.environment, name)
                .await;
            layers.extend(load_layer(&repository.name, name, LayerScope::Environment, fetched));
        }

        layers
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DeploymentMode, DEFAULT_MANIFEST_FILE, DEFAULT_VERSION_MANIFEST_FILE};
    use crate::source::MemorySource;

    const MANIFEST: &str = r#"
release_name: app
chart: service
chart_version: ^3.0.0
repository: https://charts.example.com
namespace: apps
values:
  a: 1
  b: 1
  host: app.%ENVIRONMENT%.example.com
"#;

    fn yaml(s: &str) -> Value {
        serde_yaml::from_str(s).unwrap()
    }

    fn repo() -> RepositoryInfo {
        RepositoryInfo {
            id: 1,
            name: "app".into(),
            full_name: "acme/app".into(),
            default_branch: "main".into(),
        }
    }

    fn source() -> MemorySource {
        MemorySource::new()
            .with_repository("app", 1)
            .with_file("app", DEFAULT_MANIFEST_FILE, None, MANIFEST)
            .with_file("app", DEFAULT_VERSION_MANIFEST_FILE, None, r#"{".": "1.4.2"}"#)
    }

    #[test]
    fn test_parse_separates_values_from_parameters() {
        let descriptor = parse_chart_descriptor(MANIFEST.as_bytes()).unwrap();

        assert_eq!(descriptor.release_name(), Some("app"));
        assert!(descriptor.parameters.get(VALUES).is_none());
        assert_eq!(descriptor.parameters.len(), 5);
        assert_eq!(descriptor.values["a"], Value::from(1));
    }

    #[test]
    fn test_parse_unwraps_legacy_nesting() {
        let nested = "helm:\n  release_name: app\n  chart: service\n  values:\n    a: 1\n";
        let descriptor = parse_chart_descriptor(nested.as_bytes()).unwrap();

        assert_eq!(descriptor.release_name(), Some("app"));
        assert_eq!(descriptor.parameters.get("chart"), Some(&Value::from("service")));
        assert_eq!(descriptor.values, yaml("a: 1"));
    }

    #[test]
    fn test_parse_without_values_gives_empty_mapping() {
        let descriptor = parse_chart_descriptor(b"release_name: app\nchart: service\n").unwrap();
        assert_eq!(descriptor.values, Value::Mapping(Mapping::new()));
    }

    #[test]
    fn test_parse_requires_release_name() {
        let result = parse_chart_descriptor(b"chart: service\nvalues: {}\n");
        assert!(matches!(result, Err(FormatError::MissingReleaseName)));

        let result = parse_chart_descriptor(b"release_name: ''\n");
        assert!(matches!(result, Err(FormatError::MissingReleaseName)));
    }

    #[test]
    fn test_parse_rejects_scalar_values() {
        let result = parse_chart_descriptor(b"release_name: app\nvalues: 3\n");
        assert!(matches!(result, Err(FormatError::ValuesNotAMapping)));
    }

    #[test]
    fn test_parse_version_variants() {
        assert_eq!(parse_version(br#"{".": "1.4.2"}"#).unwrap(), "1.4.2");
        assert_eq!(parse_version(b"version: 2.0.0\n").unwrap(), "2.0.0");
        assert_eq!(parse_version(b"3.1.0\n").unwrap(), "3.1.0");
        assert_eq!(parse_version(br#"{"services/app": "0.9.1"}"#).unwrap(), "0.9.1");
        assert_eq!(parse_version(b"version: 3\n").unwrap(), "3");
        assert_eq!(parse_version(b"version: '1.10'\n").unwrap(), "1.10");
        assert!(matches!(parse_version(b"{}"), Err(FormatError::MissingVersion)));
        assert!(matches!(
            parse_version(br#"{"a": "1", "b": "2"}"#),
            Err(FormatError::MissingVersion)
        ));
    }

    #[test]
    fn test_unquoted_float_version_is_rejected() {
        assert!(matches!(
            parse_version(b"version: 1.10\n"),
            Err(FormatError::UnquotedVersion(ref v)) if v == "1.1"
        ));
        assert!(matches!(parse_version(b"2.5\n"), Err(FormatError::UnquotedVersion(_))));
    }

    #[test]
    fn test_substitute_environment_walks_nested_strings() {
        let mut values = yaml("a: '%ENVIRONMENT%'\nb:\n  - x-%ENVIRONMENT%\n  - 3\n");
        substitute_environment(&mut values, "qa");
        assert_eq!(values, yaml("a: qa\nb:\n  - x-qa\n  - 3\n"));
    }

    #[tokio::test]
    async fn test_resolve_production_ignores_overrides() {
        let config = Config::for_tests(DeploymentMode::Production);
        let source = source().with_repo_variable("app", "STAGING_VALUES", "a: 9");
        let resolver = ManifestResolver::new(&config, &source, &source);

        let release = resolver.resolve("acme", &repo(), None).await.unwrap();

        assert_eq!(release.version, "1.4.2");
        assert_eq!(source.file_fetches(), 2);
        assert_eq!(release.descriptor.values["a"], Value::from(1));
        assert_eq!(
            release.descriptor.values["host"],
            Value::from("app.staging.example.com")
        );
    }

    #[tokio::test]
    async fn test_resolve_staging_applies_layers_in_order() {
        let config = Config::for_tests(DeploymentMode::Staging { pull_number: 42 });
        let source = source()
            .with_repo_variable("app", "STAGING_VALUES", "b: 2\nc: 2\n")
            .with_env_variable(1, "staging", "STAGING_VALUES", "c: 3\n");
        let resolver = ManifestResolver::new(&config, &source, &source);

        let release = resolver.resolve("acme", &repo(), None).await.unwrap();
        let values = release.descriptor.values.as_mapping().unwrap();

        assert_eq!(values.get("a"), Some(&Value::from(1)));
        assert_eq!(values.get("b"), Some(&Value::from(2)));
        assert_eq!(values.get("c"), Some(&Value::from(3)));
    }

    #[tokio::test]
    async fn test_missing_or_denied_layers_leave_base_values() {
        let config = Config::for_tests(DeploymentMode::Staging { pull_number: 42 });
        let plain = source();
        let denied = source().with_unauthorized_variables("app");

        let base = ManifestResolver::new(&config, &plain, &plain)
            .resolve("acme", &repo(), None)
            .await
            .unwrap();
        let with_denied = ManifestResolver::new(&config, &denied, &denied)
            .resolve("acme", &repo(), None)
            .await
            .unwrap();

        assert_eq!(base, with_denied);
        assert_eq!(base.descriptor.values.as_mapping().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_resolve_uses_ref() {
        let config = Config::for_tests(DeploymentMode::Production);
        let source = MemorySource::new()
            .with_file("app", DEFAULT_MANIFEST_FILE, Some("feature"), MANIFEST)
            .with_file("app", DEFAULT_VERSION_MANIFEST_FILE, Some("feature"), "version: 5.0.0");
        let resolver = ManifestResolver::new(&config, &source, &source);

        let release = resolver.resolve("acme", &repo(), Some("feature")).await.unwrap();
        assert_eq!(release.version, "5.0.0");

        let result = resolver.resolve("acme", &repo(), None).await;
        assert!(matches!(result, Err(ResolveError::ManifestUnavailable { .. })));
    }

    #[tokio::test]
    async fn test_missing_version_manifest_is_fatal() {
        let config = Config::for_tests(DeploymentMode::Production);
        let source = MemorySource::new().with_file("app", DEFAULT_MANIFEST_FILE, None, MANIFEST);
        let resolver = ManifestResolver::new(&config, &source, &source);

        let result = resolver.resolve("acme", &repo(), None).await;
        assert!(matches!(result, Err(ResolveError::VersionUnavailable { .. })));
    }

    #[tokio::test]
    async fn test_unparsable_version_manifest_is_fatal() {
        let config = Config::for_tests(DeploymentMode::Production);
        let source = MemorySource::new()
            .with_file("app", DEFAULT_MANIFEST_FILE, None, MANIFEST)
            .with_file("app", DEFAULT_VERSION_MANIFEST_FILE, None, "{}");
        let resolver = ManifestResolver::new(&config, &source, &source);

        let result = resolver.resolve("acme", &repo(), None).await;
        assert!(matches!(result, Err(ResolveError::VersionInvalid { .. })));
    }

    #[tokio::test]
    async fn test_resolving_twice_is_identical() {
        let config = Config::for_tests(DeploymentMode::Staging { pull_number: 1 });
        let source = source().with_repo_variable("app", "STAGING_VALUES", "b: 2");
        let resolver = ManifestResolver::new(&config, &source, &source);

        let first = resolver.resolve("acme", &repo(), None).await.unwrap();
        let second = resolver.resolve("acme", &repo(), None).await.unwrap();
        assert_eq!(first, second);
    }
}
