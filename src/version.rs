use serde_yaml::{Mapping, Value};

use crate::error::ResolveError;
use crate::manifest::ReleaseDescriptor;

const IMAGE: &str = "image";
const TAG: &str = "tag";
const DIGEST: &str = "digest";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ArtifactReference {
    Tag(String),
    Digest(String),
}

impl ArtifactReference {
    /// A supplied digest wins over the version tag.
    pub fn select(version: &str, digest: Option<&str>) -> Self {
        match digest.filter(|d| !d.is_empty()) {
            Some(digest) => ArtifactReference::Digest(digest.to_string()),
            None => ArtifactReference::Tag(version.to_string()),
        }
    }
}

/// Points `values.image` at the artifact to deploy.
///
/// Only the origin repository of a staging deploy passes a digest; production
/// releases and staging siblings always get their own version tag.
pub fn apply_artifact_reference(
    descriptor: &mut ReleaseDescriptor,
    version: &str,
    digest: Option<&str>,
) -> Result<ArtifactReference, ResolveError> {
    let reference = ArtifactReference::select(version, digest);
    let release = descriptor.release_name().unwrap_or_default().to_string();

    let Some(values) = descriptor.values.as_mapping_mut() else {
        return Err(ResolveError::ImageNotAMapping { release });
    };
    let image = values
        .entry(IMAGE.into())
        .or_insert(Value::Mapping(Mapping::new()));
    if image.is_null() {
        *image = Value::Mapping(Mapping::new());
    }
    let Some(image) = image.as_mapping_mut() else {
        return Err(ResolveError::ImageNotAMapping { release });
    };

    match &reference {
        ArtifactReference::Tag(tag) => {
            image.insert(TAG.into(), tag.as_str().into());
            image.remove(DIGEST);
        }
        ArtifactReference::Digest(digest) => {
            image.insert(DIGEST.into(), digest.as_str().into());
            image.remove(TAG);
        }
    }

    log::debug!("Release {} deploys {:?}", release, reference);
    Ok(reference)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(values: &str) -> ReleaseDescriptor {
        ReleaseDescriptor::new("app", serde_yaml::from_str(values).unwrap())
    }

    #[test]
    fn test_tag_reference() {
        let mut d = descriptor("image:\n  repository: ghcr.io/acme/app\n  tag: latest\n  digest: sha256:old\n");
        let reference = apply_artifact_reference(&mut d, "1.2.3", None).unwrap();

        assert_eq!(reference, ArtifactReference::Tag("1.2.3".into()));
        assert_eq!(d.values["image"]["tag"], Value::from("1.2.3"));
        assert_eq!(d.values["image"]["repository"], Value::from("ghcr.io/acme/app"));
        assert!(d.values["image"].get("digest").is_none());
    }

    #[test]
    fn test_digest_preferred_over_tag() {
        let mut d = descriptor("image:\n  repository: ghcr.io/acme/app\n  tag: latest\n");
        let reference = apply_artifact_reference(&mut d, "1.2.3", Some("sha256:abc")).unwrap();

        assert_eq!(reference, ArtifactReference::Digest("sha256:abc".into()));
        assert_eq!(d.values["image"]["digest"], Value::from("sha256:abc"));
        assert!(d.values["image"].get("tag").is_none());
    }

    #[test]
    fn test_empty_digest_falls_back_to_tag() {
        assert_eq!(
            ArtifactReference::select("1.0.0", Some("")),
            ArtifactReference::Tag("1.0.0".into())
        );
    }

    #[test]
    fn test_missing_image_is_created() {
        let mut d = descriptor("replicas: 1\n");
        apply_artifact_reference(&mut d, "1.0.0", None).unwrap();
        assert_eq!(d.values["image"]["tag"], Value::from("1.0.0"));
    }

    #[test]
    fn test_scalar_image_is_rejected() {
        let mut d = descriptor("image: ghcr.io/acme/app:1.0\n");
        let result = apply_artifact_reference(&mut d, "1.0.0", None);
        assert!(matches!(result, Err(ResolveError::ImageNotAMapping { .. })));
    }
}
