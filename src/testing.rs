//! In-memory registry used by the orchestration tests

use crate::core::build_id::Tag;
use crate::core::error::PublishError;
use crate::core::traits::{
    Artifact, AuthSession, BuildSpec, Credential, CredentialRef, RegistryClient,
    RegistryDestination,
};
use async_trait::async_trait;
use chrono::Utc;
use secrecy::ExposeSecret;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;

#[derive(Default)]
struct FakeState {
    /// (repository, tag) -> image
    stored: BTreeMap<(String, String), String>,
    calls: Vec<String>,
    rejected_passwords: HashSet<String>,
    push_failures: HashMap<String, usize>,
    built: Vec<String>,
    local_images: HashSet<String>,
}

/// Registry double that keeps pushed tags in memory
#[derive(Default)]
pub(crate) struct FakeRegistry {
    state: Mutex<FakeState>,
}

impl FakeRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Make `login` fail for this password
    pub(crate) fn reject_password(self, password: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .rejected_passwords
            .insert(password.to_string());
        self
    }

    /// Fail the next `times` pushes to `destination`
    pub(crate) fn fail_pushes(self, destination: &str, times: usize) -> Self {
        self.state
            .lock()
            .unwrap()
            .push_failures
            .insert(destination.to_string(), times);
        self
    }

    pub(crate) fn with_local_image(self, image: &str) -> Self {
        self.state.lock().unwrap().local_images.insert(image.to_string());
        self
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub(crate) fn stored(&self) -> BTreeMap<(String, String), String> {
        self.state.lock().unwrap().stored.clone()
    }

    pub(crate) fn built(&self) -> Vec<String> {
        self.state.lock().unwrap().built.clone()
    }
}

#[async_trait]
impl RegistryClient for FakeRegistry {
    fn name(&self) -> &str {
        "fake"
    }

    async fn ensure_artifact(&self, artifact: &Artifact) -> Result<(), PublishError> {
        let state = self.state.lock().unwrap();
        if state.local_images.contains(&artifact.image) {
            Ok(())
        } else {
            Err(PublishError::ArtifactMissing {
                image: artifact.image.clone(),
            })
        }
    }

    async fn build(&self, artifact: &Artifact, _spec: &BuildSpec) -> Result<(), PublishError> {
        let mut state = self.state.lock().unwrap();
        state.built.push(artifact.image.clone());
        state.local_images.insert(artifact.image.clone());
        Ok(())
    }

    async fn authenticate(
        &self,
        destination: &RegistryDestination,
        credential: &Credential,
    ) -> Result<AuthSession, PublishError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("login {}", destination.name));

        if state
            .rejected_passwords
            .contains(credential.password.expose_secret())
        {
            return Err(PublishError::AuthenticationFailed {
                destination: destination.name.clone(),
                message: "unauthorized: incorrect username or password".to_string(),
            });
        }

        Ok(AuthSession {
            destination: destination.name.clone(),
            host: destination.host.clone(),
            username: credential.username.clone(),
            established_at: Utc::now(),
            auth_config: None,
        })
    }

    async fn push(
        &self,
        session: &AuthSession,
        artifact: &Artifact,
        destination: &RegistryDestination,
        tag: &Tag,
    ) -> Result<(), PublishError> {
        let mut state = self.state.lock().unwrap();
        state
            .calls
            .push(format!("push {} {}", destination.name, tag));

        assert_eq!(session.destination, destination.name);

        if let Some(remaining) = state.push_failures.get_mut(&destination.name) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(PublishError::PushFailed {
                    destination: destination.name.clone(),
                    tag: tag.to_string(),
                    message: "connection reset by peer".to_string(),
                });
            }
        }

        state.stored.insert(
            (destination.repository(), tag.to_string()),
            artifact.image.clone(),
        );
        Ok(())
    }
}

pub(crate) fn destination(name: &str, host: &str) -> RegistryDestination {
    RegistryDestination {
        name: name.to_string(),
        host: host.to_string(),
        namespace: "ceresdb/ceresdb-server".to_string(),
        credential: CredentialRef {
            username_env: format!("{}_USERNAME", name.to_uppercase()),
            password_env: format!("{}_TOKEN", name.to_uppercase()),
        },
    }
}
