//! Hostnames for releases that opt into an externally reachable route.

use serde_yaml::{Mapping, Value};

use crate::manifest::ReleaseDescriptor;

/// Label on `values.service.labels` that opts a release into a route.
pub const OPT_IN_LABEL: &str = "ingress.staging/expose";
/// Annotation the synthesized hostname is written to.
pub const HOSTNAME_ANNOTATION: &str = "ingress.staging/hostname";
/// Annotation holding the path the release serves under. Read only.
pub const PATH_ANNOTATION: &str = "ingress.staging/path";

/// Everything a hostname depends on besides the release name.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RouteScope {
    pub namespace: String,
    pub pull_number: u64,
    pub environment: String,
    pub org_domain: String,
}

impl RouteScope {
    pub fn hostname(&self, release_name: &str) -> String {
        format!(
            "{}.{}.{}.{}.{}",
            release_name, self.pull_number, self.namespace, self.environment, self.org_domain
        )
    }
}

/// Human readable `release: url` lines, one per routed release, in call order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RouteMessages(Vec<String>);

impl RouteMessages {
    pub fn push(&mut self, release_name: &str, hostname: &str, path: &str) {
        self.0.push(format!(
            "{}: https://{}/{}",
            release_name,
            hostname,
            path.trim_start_matches('/')
        ));
    }

    pub fn lines(&self) -> &[String] {
        &self.0
    }

    pub fn render(&self) -> String {
        self.lines().join("\n")
    }
}

fn opted_in(service: &Mapping) -> bool {
    match service
        .get("labels")
        .and_then(Value::as_mapping)
        .and_then(|labels| labels.get(OPT_IN_LABEL))
    {
        Some(Value::Bool(enabled)) => *enabled,
        Some(Value::String(enabled)) => enabled.eq_ignore_ascii_case("true"),
        _ => false,
    }
}

/// Writes the route hostname into the release's service annotations when its
/// service opted in. Returns the hostname if it was applied.
pub fn synthesize(
    scope: &RouteScope,
    release_name: &str,
    descriptor: &mut ReleaseDescriptor,
    messages: &mut RouteMessages,
) -> Option<String> {
    let service = descriptor
        .values
        .get_mut("service")
        .and_then(Value::as_mapping_mut)
        .filter(|service| opted_in(service))?;

    let hostname = scope.hostname(release_name);
    let annotations = service
        .entry("annotations".into())
        .or_insert(Value::Mapping(Mapping::new()));
    if !annotations.is_mapping() {
        log::warn!("service.annotations of {} is not a mapping, replacing it", release_name);
        *annotations = Value::Mapping(Mapping::new());
    }
    let Some(annotations) = annotations.as_mapping_mut() else {
        return None;
    };

    annotations.insert(HOSTNAME_ANNOTATION.into(), hostname.as_str().into());
    let path = annotations
        .get(PATH_ANNOTATION)
        .and_then(Value::as_str)
        .unwrap_or_default();
    messages.push(release_name, &hostname, path);

    log::info!("Routing {} through {}", release_name, hostname);
    Some(hostname)
}
