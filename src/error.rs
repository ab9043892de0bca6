use thiserror::Error;

/// Failures reported by the remote collaborators (content, variables, labels).
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("unexpected HTTP status {status} from {url}")]
    Http { status: u16, url: String },

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
}

/// Shape problems in a fetched document.
#[derive(Debug, Error)]
pub enum FormatError {
    #[error("invalid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("expected a mapping at the top level")]
    NotAMapping,

    #[error("`values` must be a mapping")]
    ValuesNotAMapping,

    #[error("`release_name` is missing or empty")]
    MissingReleaseName,

    #[error("no version entry found")]
    MissingVersion,

    #[error("version {0} is a YAML float, quote it to keep it as written")]
    UnquotedVersion(String),

    #[error("expected a list of repository names")]
    NotARepositoryList,
}

/// Fatal failures while building a release for one repository.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("repository {repository} unavailable: {source}")]
    RepositoryUnavailable {
        repository: String,
        #[source]
        source: SourceError,
    },

    #[error("chart manifest {path} unavailable for {repository}: {source}")]
    ManifestUnavailable {
        repository: String,
        path: String,
        #[source]
        source: SourceError,
    },

    #[error("chart manifest {path} for {repository} is invalid: {source}")]
    ManifestInvalid {
        repository: String,
        path: String,
        #[source]
        source: FormatError,
    },

    #[error("version manifest {path} unavailable for {repository}: {source}")]
    VersionUnavailable {
        repository: String,
        path: String,
        #[source]
        source: SourceError,
    },

    #[error("version manifest {path} for {repository} is invalid: {source}")]
    VersionInvalid {
        repository: String,
        path: String,
        #[source]
        source: FormatError,
    },

    #[error("`image` values of release {release} must be a mapping")]
    ImageNotAMapping { release: String },
}

/// Failures while serializing a release to disk.
#[derive(Debug, Error)]
pub enum WriteError {
    #[error("release descriptor has no release_name")]
    MissingReleaseName,

    #[error("release name {0:?} cannot be used as a directory name")]
    InvalidReleaseName(String),

    #[error("parameter {key} of release {release} is not a scalar")]
    NonScalarParameter { release: String, key: String },

    #[error("release {release} has a parameter with a non-string key")]
    NonStringParameterKey { release: String },

    #[error("parameter key {key:?} of release {release} cannot be written as a KEY=value line")]
    InvalidParameterKey { release: String, key: String },

    #[error("parameter {key} of release {release} spans multiple lines")]
    MultiLineParameter { release: String, key: String },

    #[error("failed to serialize values of release {release}: {source}")]
    Serialize {
        release: String,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("failed to write {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}
