//! Error types for Lantern

use thiserror::Error;

/// Result type alias using Lantern's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Lantern error types with helpful messages
#[derive(Error, Debug)]
pub enum Error {
    // Model errors (E100-E199)
    #[error("Invalid model format: {0}. Lantern loads GGUF model files.")]
    InvalidFormat(String),

    #[error("Insufficient resources: {0}")]
    ResourceExhausted(String),

    #[error("Operation requires state '{required}' but '{actual}' is current.")]
    NotReady { required: String, actual: String },

    // Addon errors (E200-E299)
    #[error("Addon '{0}' not found. Run `lantern addons list` to see discovered addons.")]
    AddonNotFound(String),

    #[error("Addon '{0}' is already loaded.")]
    AddonAlreadyLoaded(String),

    #[error("Addon manifest validation failed: {0}")]
    ManifestInvalid(String),

    // Capability errors (E300-E399)
    #[error("Capability '{capability}' denied for addon '{addon}'.")]
    CapabilityDenied { addon: String, capability: String },

    // Timing errors (E400-E499)
    #[error("Operation timed out after {0} ms")]
    Timeout(u64),

    #[error("Operation cancelled")]
    Cancelled,

    // Config errors (E600-E699)
    #[error("Configuration error: {0}")]
    ConfigError(String),

    // Generic errors
    #[error("Internal failure: {0}")]
    InternalFailure(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Get error code for this error type
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidFormat(_) => "E100",
            Self::ResourceExhausted(_) => "E101",
            Self::NotReady { .. } => "E102",
            Self::AddonNotFound(_) => "E200",
            Self::AddonAlreadyLoaded(_) => "E201",
            Self::ManifestInvalid(_) => "E202",
            Self::CapabilityDenied { .. } => "E300",
            Self::Timeout(_) => "E400",
            Self::Cancelled => "E401",
            Self::ConfigError(_) => "E600",
            Self::InternalFailure(_) => "E900",
            Self::Io(_) => "E901",
        }
    }

    /// Short category name shown to the user next to an error message
    pub fn category(&self) -> &'static str {
        match self {
            Self::InvalidFormat(_) => "invalid format",
            Self::ResourceExhausted(_) => "resource exhausted",
            Self::NotReady { .. } => "not ready",
            Self::AddonNotFound(_) | Self::AddonAlreadyLoaded(_) | Self::ManifestInvalid(_) => {
                "addon"
            }
            Self::CapabilityDenied { .. } => "capability denied",
            Self::Timeout(_) => "timeout",
            Self::Cancelled => "cancelled",
            Self::ConfigError(_) => "configuration",
            Self::InternalFailure(_) | Self::Io(_) => "internal failure",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_are_stable() {
        assert_eq!(Error::InvalidFormat("x".into()).code(), "E100");
        assert_eq!(
            Error::ResourceExhausted("model needs 4096 MiB".into()).code(),
            "E101"
        );
        assert_eq!(
            Error::CapabilityDenied { addon: "a".into(), capability: "clipboard".into() }.code(),
            "E300"
        );
        assert_eq!(Error::Timeout(250).code(), "E400");
    }

    #[test]
    fn test_error_messages_name_the_subject() {
        let err = Error::AddonNotFound("weather".into());
        assert!(err.to_string().contains("weather"));

        let err = Error::NotReady { required: "Ready".into(), actual: "Unloaded".into() };
        assert!(err.to_string().contains("Ready"));
        assert!(err.to_string().contains("Unloaded"));
    }
}
