//! Operator error types

use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Kubernetes API error: {source}")]
    KubeApi {
        #[from]
        source: kube::Error,
    },

    #[error("No agent image configured for kind {kind}")]
    ImageResolution { kind: String },

    #[error("Resource {name} is missing {key}")]
    MissingObjectKey { name: String, key: &'static str },

    #[error("Configuration error: {source}")]
    Config {
        #[from]
        source: config::ConfigError,
    },

    #[error("Serialization error: {source}")]
    Serialization {
        #[from]
        source: serde_json::Error,
    },
}

impl Error {
    /// Factory errors are surfaced on the resource as a terminal failure
    /// instead of being retried; everything else goes back to the work queue.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Error::ImageResolution { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_resolution_is_terminal() {
        let err = Error::ImageResolution {
            kind: "CodeRun".to_string(),
        };
        assert!(err.is_terminal());
        assert_eq!(err.to_string(), "No agent image configured for kind CodeRun");
    }

    #[test]
    fn test_missing_object_key_is_retried() {
        let err = Error::MissingObjectKey {
            name: "demo".to_string(),
            key: ".metadata.uid",
        };
        assert!(!err.is_terminal());
    }
}
