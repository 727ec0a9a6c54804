//! Core traits and types for image publishing
//!
//! This module defines the registry-facing abstractions: destinations,
//! credentials, authenticated sessions and per-destination results, plus the
//! [`RegistryClient`] and [`CredentialProvider`] seams the publisher drives.

use crate::core::build_id::Tag;
use crate::core::error::PublishError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use secrecy::SecretString;
use serde::{Deserialize, Serialize, Serializer};
use std::collections::BTreeMap;
use std::path::PathBuf;

lazy_static! {
    // Docker distribution path component grammar
    static ref NAMESPACE_PATTERN: Regex =
        Regex::new(r"^[a-z0-9]+(?:(?:[._]|__|-+)[a-z0-9]+)*(?:/[a-z0-9]+(?:(?:[._]|__|-+)[a-z0-9]+)*)*$")
            .unwrap();
    static ref HOST_PATTERN: Regex = Regex::new(r"^[A-Za-z0-9.-]+(?::[0-9]+)?$").unwrap();
}

// ============================================================================
// Destinations
// ============================================================================

/// Names of the environment variables holding a destination's credential
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialRef {
    pub username_env: String,
    pub password_env: String,
}

/// One registry the artifact is pushed to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryDestination {
    /// Short name used in logs and reports (e.g. "dockerhub")
    pub name: String,
    /// Registry host, optionally with port (e.g. "ghcr.io")
    pub host: String,
    /// Repository path below the host (e.g. "ceresdb/ceresdb-server")
    pub namespace: String,
    pub credential: CredentialRef,
}

impl RegistryDestination {
    /// `host/namespace`
    pub fn repository(&self) -> String {
        format!("{}/{}", self.host, self.namespace)
    }

    /// Fully qualified reference for `tag`
    pub fn image_reference(&self, tag: &Tag) -> String {
        format!("{}:{}", self.repository(), tag)
    }

    /// Check name, host and namespace before any registry is contacted
    pub fn validate(&self) -> Result<(), PublishError> {
        let invalid = |reason: String| PublishError::InvalidDestination {
            destination: self.name.clone(),
            reason,
        };

        if self.name.trim().is_empty() {
            return Err(invalid("name is empty".to_string()));
        }
        if !HOST_PATTERN.is_match(&self.host) {
            return Err(invalid(format!("host '{}' is not a registry host", self.host)));
        }
        if !NAMESPACE_PATTERN.is_match(&self.namespace) {
            return Err(invalid(format!(
                "namespace '{}' is not a valid repository path",
                self.namespace
            )));
        }
        if self.credential.username_env.is_empty() || self.credential.password_env.is_empty() {
            return Err(invalid("credential variable names are empty".to_string()));
        }

        Ok(())
    }
}

// ============================================================================
// Credentials & sessions
// ============================================================================

/// Credential material for one destination
///
/// The password is kept in a [`SecretString`] so it never shows up in
/// `Debug` output.
#[derive(Debug)]
pub struct Credential {
    pub username: String,
    pub password: SecretString,
}

impl Credential {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        let password: String = password.into();
        Self {
            username: username.into(),
            password: SecretString::new(password.into()),
        }
    }
}

/// Proof of a successful login against one destination
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthSession {
    pub destination: String,
    pub host: String,
    pub username: String,
    pub established_at: DateTime<Utc>,
    /// Private credential store holding this login, when the client keeps one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_config: Option<PathBuf>,
}

// ============================================================================
// Artifact
// ============================================================================

/// How to build the artifact before publishing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildSpec {
    pub context: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dockerfile: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub build_args: BTreeMap<String, String>,
}

/// The locally built image that gets published
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Artifact {
    /// Local image reference (e.g. "ceresdb-server:ci")
    pub image: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub build: Option<BuildSpec>,
}

impl Artifact {
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            build: None,
        }
    }
}

// ============================================================================
// Results
// ============================================================================

/// Outcome of publishing to a single destination
#[derive(Debug, Clone, Serialize)]
pub struct PublishResult {
    pub destination: String,
    pub repository: String,
    /// Tags that were meant to be pushed
    pub tags: Vec<Tag>,
    /// Tags that actually reached the registry
    pub pushed: Vec<Tag>,
    pub success: bool,
    #[serde(
        skip_serializing_if = "Option::is_none",
        serialize_with = "serialize_error"
    )]
    pub error: Option<PublishError>,
    pub duration_ms: u64,
}

impl PublishResult {
    pub fn succeeded(destination: &RegistryDestination, tags: Vec<Tag>, duration_ms: u64) -> Self {
        Self {
            destination: destination.name.clone(),
            repository: destination.repository(),
            pushed: tags.clone(),
            tags,
            success: true,
            error: None,
            duration_ms,
        }
    }

    pub fn failed(
        destination: &RegistryDestination,
        tags: Vec<Tag>,
        pushed: Vec<Tag>,
        error: PublishError,
        duration_ms: u64,
    ) -> Self {
        Self {
            destination: destination.name.clone(),
            repository: destination.repository(),
            tags,
            pushed,
            success: false,
            error: Some(error),
            duration_ms,
        }
    }
}

fn serialize_error<S: Serializer>(error: &Option<PublishError>, serializer: S) -> Result<S::Ok, S::Error> {
    #[derive(Serialize)]
    struct ErrorView<'a> {
        code: &'a str,
        message: String,
    }

    match error {
        Some(error) => ErrorView {
            code: error.code(),
            message: error.to_string(),
        }
        .serialize(serializer),
        None => serializer.serialize_none(),
    }
}

// ============================================================================
// Seams
// ============================================================================

/// Registry side of publishing
///
/// Implementations perform a single attempt per call and never retry.
#[async_trait]
pub trait RegistryClient: Send + Sync {
    /// Client name (e.g. "docker")
    fn name(&self) -> &str;

    /// Check that the local artifact exists
    async fn ensure_artifact(&self, artifact: &Artifact) -> Result<(), PublishError>;

    /// Build the artifact from `spec`
    async fn build(&self, artifact: &Artifact, _spec: &BuildSpec) -> Result<(), PublishError> {
        Err(PublishError::BuildFailed {
            message: format!("{} cannot build '{}'", self.name(), artifact.image),
        })
    }

    /// Exchange `credential` for a session with `destination`
    async fn authenticate(
        &self,
        destination: &RegistryDestination,
        credential: &Credential,
    ) -> Result<AuthSession, PublishError>;

    /// Push `artifact` to `destination` under `tag`
    ///
    /// Pushing the same artifact under the same tag again must leave the
    /// registry in the same state.
    async fn push(
        &self,
        session: &AuthSession,
        artifact: &Artifact,
        destination: &RegistryDestination,
        tag: &Tag,
    ) -> Result<(), PublishError>;
}

/// Source of credential material for destinations
pub trait CredentialProvider: Send + Sync {
    /// Resolve the credential for `destination`
    ///
    /// Missing material is reported as [`PublishError::CredentialMissing`].
    fn credential(&self, destination: &RegistryDestination) -> Result<Credential, PublishError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    fn dockerhub() -> RegistryDestination {
        RegistryDestination {
            name: "dockerhub".to_string(),
            host: "docker.io".to_string(),
            namespace: "ceresdb/ceresdb-server".to_string(),
            credential: CredentialRef {
                username_env: "DOCKERHUB_USERNAME".to_string(),
                password_env: "DOCKERHUB_TOKEN".to_string(),
            },
        }
    }

    #[test]
    fn test_repository_and_reference() {
        use crate::core::build_id::derive_build_identifier;
        use chrono::TimeZone;

        let destination = dockerhub();
        let now = Utc.with_ymd_and_hms(2024, 1, 15, 12, 10, 0).unwrap();
        let id = derive_build_identifier(now, chrono_tz::Asia::Shanghai, "a1b2c3d4e5f6").unwrap();
        let tag = Tag::compose("nightly", &id).unwrap();

        assert_eq!(destination.repository(), "docker.io/ceresdb/ceresdb-server");
        assert_eq!(
            destination.image_reference(&tag),
            "docker.io/ceresdb/ceresdb-server:nightly-20240115-a1b2c3d4"
        );
    }

    #[test]
    fn test_valid_destination() {
        assert!(dockerhub().validate().is_ok());

        let mut with_port = dockerhub();
        with_port.host = "localhost:5000".to_string();
        assert!(with_port.validate().is_ok());
    }

    #[test]
    fn test_destination_with_scheme_is_invalid() {
        let mut destination = dockerhub();
        destination.host = "https://ghcr.io".to_string();

        assert!(matches!(
            destination.validate(),
            Err(PublishError::InvalidDestination { .. })
        ));
    }

    #[test]
    fn test_destination_with_uppercase_namespace_is_invalid() {
        let mut destination = dockerhub();
        destination.namespace = "CeresDB/server".to_string();

        assert!(destination.validate().is_err());
    }

    #[test]
    fn test_destination_with_unexpanded_variable_is_invalid() {
        let mut destination = dockerhub();
        destination.namespace = "${OWNER}/server".to_string();

        assert!(destination.validate().is_err());
    }

    #[test]
    fn test_credential_debug_hides_password() {
        let credential = Credential::new("bot", "super-secret-token");

        let debug = format!("{:?}", credential);
        assert!(!debug.contains("super-secret-token"));
        assert_eq!(credential.password.expose_secret(), "super-secret-token");
    }

    #[test]
    fn test_destination_deserialization() {
        let yaml = r#"
name: ghcr
host: ghcr.io
namespace: ceresdb/ceresdb-server
credential:
  usernameEnv: GHCR_USERNAME
  passwordEnv: GHCR_TOKEN
"#;
        let destination: RegistryDestination = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(destination.name, "ghcr");
        assert_eq!(destination.credential.password_env, "GHCR_TOKEN");
    }

    #[test]
    fn test_failed_result_serializes_error_code() {
        let destination = dockerhub();
        let result = PublishResult::failed(
            &destination,
            vec![],
            vec![],
            PublishError::AuthenticationFailed {
                destination: "dockerhub".to_string(),
                message: "unauthorized".to_string(),
            },
            12,
        );

        let json = serde_json::to_string(&result).unwrap();
        assert!(json.contains("\"success\":false"));
        assert!(json.contains("\"code\":\"AUTHENTICATION_FAILED\""));
    }

    #[test]
    fn test_successful_result_omits_error() {
        let result = PublishResult::succeeded(&dockerhub(), vec![], 5);

        let json = serde_json::to_string(&result).unwrap();
        assert!(!json.contains("\"error\""));
    }
}
