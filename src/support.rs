//! Auxiliary releases a staging namespace needs next to the services themselves.

use serde_yaml::{Mapping, Value};

use crate::config::Config;
use crate::ingress::RouteScope;
use crate::manifest::ReleaseDescriptor;

/// Comma separated shared ingresses a release wants to be reachable through.
pub const SHARED_INGRESSES_ANNOTATION: &str = "ingress.staging/shared";
pub const MANAGED_INGRESS_ANNOTATION: &str = "ingress.staging/managed";
pub const REGISTRY_CREDENTIALS_RELEASE: &str = "registry-credentials";

const SUPPORT_CHART_VERSION: &str = "^2.0.0";

/// Distinct shared ingress names in first-seen order.
pub fn shared_ingresses<'a>(descriptors: impl IntoIterator<Item = &'a ReleaseDescriptor>) -> Vec<String> {
    let mut ingresses: Vec<String> = Vec::new();
    for descriptor in descriptors {
        let Some(list) = descriptor
            .values
            .get("service")
            .and_then(|service| service.get("annotations"))
            .and_then(|annotations| annotations.get(SHARED_INGRESSES_ANNOTATION))
            .and_then(Value::as_str)
        else {
            continue;
        };

        for name in list.split(',').map(str::trim).filter(|n| !n.is_empty()) {
            if !ingresses.iter().any(|i| i == name) {
                ingresses.push(name.to_string());
            }
        }
    }
    ingresses
}

fn support_descriptor(release_name: &str, chart: &str, repository: &str, values: Mapping) -> ReleaseDescriptor {
    let mut descriptor = ReleaseDescriptor::new(release_name, Value::Mapping(values));
    descriptor.set_parameter("chart", chart);
    descriptor.set_parameter("chart_version", SUPPORT_CHART_VERSION);
    descriptor.set_parameter("repository", repository);
    descriptor
}

pub fn shared_ingress_release(
    name: &str,
    hostname: &str,
    ingress_class: &str,
    repository: &str,
) -> ReleaseDescriptor {
    let mut annotations = Mapping::new();
    annotations.insert(MANAGED_INGRESS_ANNOTATION.into(), "true".into());

    let mut data = Mapping::new();
    data.insert("ingress".into(), name.into());
    data.insert("domain".into(), hostname.into());
    data.insert("ingress_class".into(), ingress_class.into());

    let mut values = Mapping::new();
    values.insert("annotations".into(), Value::Mapping(annotations));
    values.insert("data".into(), Value::Mapping(data));

    support_descriptor(name, "configmap", repository, values)
}

pub fn registry_credentials_release(docker_config: &str, repository: &str) -> ReleaseDescriptor {
    let mut plain_text = Mapping::new();
    plain_text.insert(".dockerconfigjson".into(), docker_config.into());

    let mut values = Mapping::new();
    values.insert("type".into(), "kubernetes.io/dockerconfigjson".into());
    values.insert("plain_text".into(), Value::Mapping(plain_text));

    support_descriptor(REGISTRY_CREDENTIALS_RELEASE, "secret", repository, values)
}

/// Shared ingress config maps followed by the registry credentials secret.
/// Nothing is produced unless a support chart repository is configured.
pub fn auxiliary_releases(
    config: &Config,
    scope: &RouteScope,
    descriptors: &[ReleaseDescriptor],
) -> Vec<ReleaseDescriptor> {
    let Some(repository) = config.support_chart_repository.as_deref() else {
        return Vec::new();
    };

    let mut releases: Vec<ReleaseDescriptor> = shared_ingresses(descriptors)
        .into_iter()
        .map(|name| {
            let hostname = scope.hostname(&name);
            shared_ingress_release(&name, &hostname, &config.ingress_class, repository)
        })
        .collect();

    if let Some(credentials) = &config.registry_credentials {
        releases.push(registry_credentials_release(credentials, repository));
    }
    releases
}
