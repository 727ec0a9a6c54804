//! Container CLI client - publishes through the `docker` or `podman` CLI
//!
//! Login, tag, push and build are delegated to the engine binary:
//! - `login --username <user> --password-stdin <host>`
//! - `tag <image> <host>/<namespace>:<tag>` followed by `push`
//! - `image inspect` / `build` for the local artifact
//!
//! Every login writes to its own credential store below a per-client
//! temporary directory (`DOCKER_CONFIG` for docker, `REGISTRY_AUTH_FILE`
//! for podman), and pushes read the store recorded in their [`AuthSession`].
//! Two destinations on the same host with different accounts therefore
//! never see each other's login. The stores are removed when the client is
//! dropped.
//!
//! Pushing an unchanged image under an existing tag only re-uploads the
//! manifest, so repeated pushes converge on the same registry state.

use crate::core::build_id::Tag;
use crate::core::config::Engine;
use crate::core::error::PublishError;
use crate::core::traits::{Artifact, AuthSession, BuildSpec, Credential, RegistryClient, RegistryDestination};
use crate::security::command_executor::{CommandError, CommandOutput, SafeCommandExecutor};
use crate::security::credentials::mask_secrets;
use async_trait::async_trait;
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tracing::{debug, info};

/// Registry client backed by a container engine CLI
#[derive(Debug, Clone)]
pub struct ContainerCliClient {
    engine: Engine,
    executor: SafeCommandExecutor,
    /// Parent of the per-login credential stores
    auth_root: Arc<TempDir>,
}

impl ContainerCliClient {
    /// Create a client running `engine` inside `working_dir`
    pub fn new<P: AsRef<Path>>(
        engine: Engine,
        working_dir: P,
        timeout: Duration,
    ) -> Result<Self, PublishError> {
        let mut executor = SafeCommandExecutor::new(working_dir)
            .map_err(|e| PublishError::ConfigError(e.to_string()))?;
        executor.set_timeout(timeout);

        let auth_root = tempfile::Builder::new()
            .prefix("image-publisher-auth-")
            .tempdir()
            .map_err(|e| {
                PublishError::ConfigError(format!("cannot create credential store: {}", e))
            })?;

        Ok(Self {
            engine,
            executor,
            auth_root: Arc::new(auth_root),
        })
    }

    pub fn engine(&self) -> Engine {
        self.engine
    }

    async fn exec(&self, args: &[String]) -> Result<CommandOutput, CommandError> {
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        self.executor.execute(self.engine.as_str(), &args).await
    }

    /// Fresh credential store for one login against `destination`
    fn new_auth_store(&self, destination: &RegistryDestination) -> Result<PathBuf, PublishError> {
        let prefix: String = destination
            .name
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
            .chain(std::iter::once('-'))
            .collect();

        tempfile::Builder::new()
            .prefix(&prefix)
            .tempdir_in(self.auth_root.path())
            .map(TempDir::keep)
            .map_err(|e| PublishError::AuthenticationFailed {
                destination: destination.name.clone(),
                message: format!("cannot create credential store: {}", e),
            })
    }
}

/// Environment variable pointing `engine` at the credential store in `store`
fn auth_env(engine: Engine, store: &Path) -> (&'static str, PathBuf) {
    match engine {
        Engine::Docker => ("DOCKER_CONFIG", store.to_path_buf()),
        Engine::Podman => ("REGISTRY_AUTH_FILE", store.join("auth.json")),
    }
}

fn inspect_args(image: &str) -> Vec<String> {
    ["image", "inspect", "--format", "{{.Id}}", image]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

/// Arguments for `<engine> build`
fn build_args(artifact: &Artifact, spec: &BuildSpec) -> Vec<String> {
    let mut args = vec!["build".to_string(), "--tag".to_string(), artifact.image.clone()];

    if let Some(dockerfile) = &spec.dockerfile {
        args.push("--file".to_string());
        args.push(dockerfile.display().to_string());
    }

    for (key, value) in &spec.build_args {
        args.push("--build-arg".to_string());
        args.push(format!("{}={}", key, value));
    }

    args.push(spec.context.display().to_string());
    args
}

/// Arguments for `<engine> login`; the password is read from stdin
fn login_args(username: &str, host: &str) -> Vec<String> {
    ["login", "--username", username, "--password-stdin", host]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn tag_args(image: &str, reference: &str) -> Vec<String> {
    vec!["tag".to_string(), image.to_string(), reference.to_string()]
}

fn push_args(reference: &str) -> Vec<String> {
    vec!["push".to_string(), reference.to_string()]
}

/// The engine binary could not be started or did not finish in time
fn engine_unavailable(engine: Engine, error: CommandError) -> PublishError {
    PublishError::ConfigError(format!("cannot run {}: {}", engine, error))
}

fn login_failed(
    destination: &RegistryDestination,
    credential: &Credential,
    message: &str,
) -> PublishError {
    PublishError::AuthenticationFailed {
        destination: destination.name.clone(),
        message: mask_secrets(message, &[&credential.password]),
    }
}

/// Map a finished `login` to the session outcome
fn login_outcome(
    output: &CommandOutput,
    destination: &RegistryDestination,
    credential: &Credential,
) -> Result<(), PublishError> {
    if output.success {
        Ok(())
    } else {
        Err(login_failed(destination, credential, &output.summary()))
    }
}

fn push_failed(destination: &RegistryDestination, tag: &Tag, message: String) -> PublishError {
    PublishError::PushFailed {
        destination: destination.name.clone(),
        tag: tag.to_string(),
        message,
    }
}

/// Map a finished `tag` or `push` to the push outcome
fn push_outcome(
    output: &CommandOutput,
    destination: &RegistryDestination,
    tag: &Tag,
) -> Result<(), PublishError> {
    if output.success {
        Ok(())
    } else {
        Err(push_failed(destination, tag, output.summary()))
    }
}

#[async_trait]
impl RegistryClient for ContainerCliClient {
    fn name(&self) -> &str {
        self.engine.as_str()
    }

    async fn ensure_artifact(&self, artifact: &Artifact) -> Result<(), PublishError> {
        let output = self
            .exec(&inspect_args(&artifact.image))
            .await
            .map_err(|e| engine_unavailable(self.engine, e))?;

        if !output.success {
            return Err(PublishError::ArtifactMissing {
                image: artifact.image.clone(),
            });
        }

        debug!(image = %artifact.image, id = %output.stdout.trim(), "Local image found");
        Ok(())
    }

    async fn build(&self, artifact: &Artifact, spec: &BuildSpec) -> Result<(), PublishError> {
        info!(image = %artifact.image, context = %spec.context.display(), "Building image");

        let output = self
            .exec(&build_args(artifact, spec))
            .await
            .map_err(|e| PublishError::BuildFailed {
                message: e.to_string(),
            })?;

        if !output.success {
            return Err(PublishError::BuildFailed {
                message: output.summary(),
            });
        }

        Ok(())
    }

    async fn authenticate(
        &self,
        destination: &RegistryDestination,
        credential: &Credential,
    ) -> Result<AuthSession, PublishError> {
        let store = self.new_auth_store(destination)?;
        let (variable, value) = auth_env(self.engine, &store);

        let args = login_args(&credential.username, &destination.host);
        let args: Vec<&str> = args.iter().map(String::as_str).collect();

        let output = self
            .executor
            .execute_with_stdin(
                self.engine.as_str(),
                &args,
                &[(variable, value.as_os_str())],
                &credential.password,
            )
            .await
            .map_err(|e| login_failed(destination, credential, &e.to_string()))?;
        login_outcome(&output, destination, credential)?;

        Ok(AuthSession {
            destination: destination.name.clone(),
            host: destination.host.clone(),
            username: credential.username.clone(),
            established_at: Utc::now(),
            auth_config: Some(store),
        })
    }

    async fn push(
        &self,
        session: &AuthSession,
        artifact: &Artifact,
        destination: &RegistryDestination,
        tag: &Tag,
    ) -> Result<(), PublishError> {
        if session.destination != destination.name {
            return Err(push_failed(
                destination,
                tag,
                format!("session belongs to '{}'", session.destination),
            ));
        }

        let reference = destination.image_reference(tag);

        let tagged = self
            .exec(&tag_args(&artifact.image, &reference))
            .await
            .map_err(|e| PublishError::CommandError {
                destination: destination.name.clone(),
                message: e.to_string(),
            })?;
        push_outcome(&tagged, destination, tag)?;

        let store = session
            .auth_config
            .as_deref()
            .map(|store| auth_env(self.engine, store));
        let envs: Vec<(&str, &std::ffi::OsStr)> = store
            .iter()
            .map(|(variable, value)| (*variable, value.as_os_str()))
            .collect();

        let args = push_args(&reference);
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        let pushed = self
            .executor
            .execute_with_env(self.engine.as_str(), &args, &envs)
            .await
            .map_err(|e| push_failed(destination, tag, e.to_string()))?;
        push_outcome(&pushed, destination, tag)?;

        debug!(reference = %reference, "Push finished");
        Ok(())
    }
}
