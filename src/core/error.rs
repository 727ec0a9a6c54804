//! Error handling for image publishing
//!
//! Every failure the publisher can hit is a [`PublishError`]. Variants are
//! grouped by [`ErrorKind`]: configuration and artifact errors abort a run
//! before any registry is contacted, auth and push errors stay attached to
//! a single destination, and the aggregate error summarizes a finished run.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Broad classification of a [`PublishError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorKind {
    Configuration,
    Artifact,
    Auth,
    Push,
    Aggregate,
}

/// Main error type for image publishing operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PublishError {
    // Configuration errors
    #[error("invalid revision hash '{revision}': {reason}")]
    InvalidRevision { revision: String, reason: String },

    #[error("no registry destinations configured")]
    NoDestinations,

    #[error("unknown time zone '{zone}'")]
    InvalidTimeZone { zone: String },

    #[error("invalid channel '{channel}': {reason}")]
    InvalidChannel { channel: String, reason: String },

    #[error("[{destination}] invalid destination: {reason}")]
    InvalidDestination { destination: String, reason: String },

    #[error("configuration error: {0}")]
    ConfigError(String),

    // Artifact errors
    #[error("local image '{image}' not found")]
    ArtifactMissing { image: String },

    #[error("image build failed: {message}")]
    BuildFailed { message: String },

    // Authentication errors
    #[error("[{destination}] credential variable {variable} is not set")]
    CredentialMissing {
        destination: String,
        variable: String,
    },

    #[error("[{destination}] authentication failed: {message}")]
    AuthenticationFailed {
        destination: String,
        message: String,
    },

    // Push errors
    #[error("[{destination}] push of '{tag}' failed: {message}")]
    PushFailed {
        destination: String,
        tag: String,
        message: String,
    },

    #[error("[{destination}] command error: {message}")]
    CommandError {
        destination: String,
        message: String,
    },

    // Run summary
    #[error("{failed} of {total} destinations failed")]
    AggregateFailure { failed: usize, total: usize },
}

impl PublishError {
    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidRevision { .. }
            | Self::NoDestinations
            | Self::InvalidTimeZone { .. }
            | Self::InvalidChannel { .. }
            | Self::InvalidDestination { .. }
            | Self::ConfigError(_) => ErrorKind::Configuration,
            Self::ArtifactMissing { .. } | Self::BuildFailed { .. } => ErrorKind::Artifact,
            Self::CredentialMissing { .. } | Self::AuthenticationFailed { .. } => ErrorKind::Auth,
            Self::PushFailed { .. } | Self::CommandError { .. } => ErrorKind::Push,
            Self::AggregateFailure { .. } => ErrorKind::Aggregate,
        }
    }

    /// Get the destination name associated with this error, if any
    pub fn destination(&self) -> Option<&str> {
        match self {
            Self::InvalidDestination { destination, .. }
            | Self::CredentialMissing { destination, .. }
            | Self::AuthenticationFailed { destination, .. }
            | Self::PushFailed { destination, .. }
            | Self::CommandError { destination, .. } => Some(destination),
            _ => None,
        }
    }

    /// Fatal errors abort the run before any destination is attempted
    pub fn is_fatal(&self) -> bool {
        matches!(self.kind(), ErrorKind::Configuration | ErrorKind::Artifact)
    }

    /// Get suggested actions for this error
    pub fn suggested_actions(&self) -> Vec<&'static str> {
        match self {
            Self::InvalidRevision { .. } => vec![
                "Pass the full commit hash with --revision",
                "Check that PUBLISH_REVISION or GITHUB_SHA is exported",
            ],
            Self::NoDestinations => vec![
                "Add at least one entry under 'destinations'",
                "Check the --destination filter for typos",
            ],
            Self::InvalidTimeZone { .. } => {
                vec!["Use an IANA zone name such as Asia/Shanghai or UTC"]
            }
            Self::InvalidChannel { .. } => {
                vec!["Channels may only contain letters, digits, '_', '.' and '-'"]
            }
            Self::InvalidDestination { .. } => {
                vec!["Check host and namespace of the destination"]
            }
            Self::ConfigError(_) => vec!["Check .image-publisher.yaml"],
            Self::ArtifactMissing { .. } => vec![
                "Build the image before publishing",
                "Add an artifact.build section to build it automatically",
            ],
            Self::BuildFailed { .. } => vec![
                "Check the build output above",
                "Verify the Dockerfile path and build context",
            ],
            Self::CredentialMissing { .. } => vec![
                "Export the credential variables named in the destination",
                "Check the CI secret mapping for this registry",
            ],
            Self::AuthenticationFailed { .. } => vec![
                "Check the username and token for this registry",
                "Check whether the token has expired or lacks push scope",
            ],
            Self::PushFailed { .. } => vec![
                "Check network connectivity to the registry",
                "Check that the repository exists and allows pushes",
                "Re-run the publisher; pushing the same tag again is safe",
            ],
            Self::CommandError { .. } => vec![
                "Check that the container engine is installed and on PATH",
                "Check that the engine daemon is running",
            ],
            Self::AggregateFailure { .. } => {
                vec!["Inspect the per-destination results above"]
            }
        }
    }

    /// Get error code for this error
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidRevision { .. } => "INVALID_REVISION",
            Self::NoDestinations => "NO_DESTINATIONS",
            Self::InvalidTimeZone { .. } => "INVALID_TIME_ZONE",
            Self::InvalidChannel { .. } => "INVALID_CHANNEL",
            Self::InvalidDestination { .. } => "INVALID_DESTINATION",
            Self::ConfigError(_) => "CONFIG_ERROR",
            Self::ArtifactMissing { .. } => "ARTIFACT_MISSING",
            Self::BuildFailed { .. } => "BUILD_FAILED",
            Self::CredentialMissing { .. } => "CREDENTIAL_MISSING",
            Self::AuthenticationFailed { .. } => "AUTHENTICATION_FAILED",
            Self::PushFailed { .. } => "PUSH_FAILED",
            Self::CommandError { .. } => "COMMAND_ERROR",
            Self::AggregateFailure { .. } => "AGGREGATE_FAILURE",
        }
    }
}
