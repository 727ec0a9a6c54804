//! Publisher - main orchestrator for multi-registry image publishing
//!
//! A run goes through three steps:
//! - derive the build identifier and tags (fatal on bad input)
//! - authenticate against every destination
//! - push the artifact under every tag
//!
//! Destinations are isolated from each other: a failed login or push is
//! recorded in that destination's [`PublishResult`] and the run moves on.

use crate::core::build_id::{BuildIdentifier, Tag, compose_tags, derive_build_identifier};
use crate::core::error::PublishError;
use crate::core::traits::{
    Artifact, AuthSession, Credential, CredentialProvider, PublishResult, RegistryClient,
    RegistryDestination,
};
use crate::orchestration::report::{PlannedDestination, PublishPlan, RunReport};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tracing::{info, warn};

/// Inputs shared by every destination of a run
#[derive(Debug, Clone)]
pub struct PublishOptions {
    /// Tag prefixes, one tag per channel
    pub channels: Vec<String>,

    /// Zone for the date part of the build identifier
    pub time_zone: Tz,

    /// Full source revision hash
    pub revision: String,

    /// Publish to destinations one after another
    pub sequential: bool,

    /// Maximum concurrent destinations in parallel mode
    pub max_concurrency: usize,
}

impl Default for PublishOptions {
    fn default() -> Self {
        Self {
            channels: vec!["nightly".to_string()],
            time_zone: chrono_tz::UTC,
            revision: String::new(),
            sequential: false,
            max_concurrency: 3,
        }
    }
}

/// Multi-registry publisher
#[derive(Clone)]
pub struct Publisher {
    client: Arc<dyn RegistryClient>,
    credentials: Arc<dyn CredentialProvider>,
    options: PublishOptions,
}

impl Publisher {
    /// Create a new Publisher
    pub fn new(
        client: Arc<dyn RegistryClient>,
        credentials: Arc<dyn CredentialProvider>,
        options: PublishOptions,
    ) -> Self {
        Self {
            client,
            credentials,
            options,
        }
    }

    pub fn options(&self) -> &PublishOptions {
        &self.options
    }

    /// Derive the build identifier for `now`
    pub fn build_identifier(&self, now: DateTime<Utc>) -> Result<BuildIdentifier, PublishError> {
        derive_build_identifier(now, self.options.time_zone, &self.options.revision)
    }

    /// Validate everything a run needs without touching any registry
    ///
    /// Fails with a configuration error for an empty destination list, an
    /// invalid or duplicate destination, a malformed revision or a channel
    /// that cannot form a tag.
    pub fn plan(
        &self,
        destinations: &[RegistryDestination],
        artifact: &Artifact,
        now: DateTime<Utc>,
    ) -> Result<PublishPlan, PublishError> {
        if destinations.is_empty() {
            return Err(PublishError::NoDestinations);
        }

        let mut names = HashSet::new();
        for destination in destinations {
            destination.validate()?;
            if !names.insert(destination.name.as_str()) {
                return Err(PublishError::InvalidDestination {
                    destination: destination.name.clone(),
                    reason: "duplicate destination name".to_string(),
                });
            }
        }

        let build_id = self.build_identifier(now)?;
        let tags = compose_tags(&self.options.channels, &build_id)?;

        let planned = destinations
            .iter()
            .map(|destination| PlannedDestination {
                destination: destination.name.clone(),
                references: tags
                    .iter()
                    .map(|tag| destination.image_reference(tag))
                    .collect(),
            })
            .collect();

        Ok(PublishPlan {
            build_id,
            tags,
            artifact: artifact.image.clone(),
            destinations: planned,
        })
    }

    /// Build the artifact when it has a build spec, otherwise check that it exists
    pub async fn prepare_artifact(&self, artifact: &Artifact) -> Result<(), PublishError> {
        match &artifact.build {
            Some(spec) => self.client.build(artifact, spec).await,
            None => self.client.ensure_artifact(artifact).await,
        }
    }

    /// Log in to one destination
    pub async fn authenticate(
        &self,
        destination: &RegistryDestination,
        credential: &Credential,
    ) -> Result<AuthSession, PublishError> {
        info!(destination = %destination.name, host = %destination.host, "Authenticating");
        self.client.authenticate(destination, credential).await
    }

    /// Push `artifact` to `destination` once per tag
    ///
    /// Stops at the first rejected tag; tags pushed before it are listed in
    /// the result.
    pub async fn publish(
        &self,
        artifact: &Artifact,
        destination: &RegistryDestination,
        tags: &[Tag],
        session: &AuthSession,
    ) -> PublishResult {
        let start = Instant::now();
        let mut pushed = Vec::with_capacity(tags.len());

        for tag in tags {
            info!(destination = %destination.name, tag = %tag, "Pushing");

            if let Err(error) = self.client.push(session, artifact, destination, tag).await {
                warn!(destination = %destination.name, tag = %tag, error = %error, "Push failed");
                return PublishResult::failed(
                    destination,
                    tags.to_vec(),
                    pushed,
                    error,
                    elapsed_ms(start),
                );
            }

            pushed.push(tag.clone());
        }

        PublishResult::succeeded(destination, pushed, elapsed_ms(start))
    }

    /// Publish `artifact` to every destination
    ///
    /// Returns `Err` only for fatal configuration errors, raised before any
    /// registry is contacted. Auth and push failures end up in the report.
    pub async fn run(
        &self,
        destinations: &[RegistryDestination],
        artifact: &Artifact,
        now: DateTime<Utc>,
    ) -> Result<RunReport, PublishError> {
        let plan = self.plan(destinations, artifact, now)?;

        info!(
            build_id = %plan.build_id,
            destinations = destinations.len(),
            tags = ?plan.tags.iter().map(Tag::as_str).collect::<Vec<_>>(),
            "Publishing"
        );

        let results = if self.options.sequential || destinations.len() == 1 {
            self.run_sequentially(destinations, artifact, &plan.tags).await
        } else {
            self.run_in_parallel(destinations, artifact, &plan.tags).await
        };

        Ok(RunReport::new(plan.build_id, plan.tags, results))
    }

    async fn run_sequentially(
        &self,
        destinations: &[RegistryDestination],
        artifact: &Artifact,
        tags: &[Tag],
    ) -> Vec<PublishResult> {
        let mut results = Vec::with_capacity(destinations.len());
        for destination in destinations {
            results.push(self.publish_to_destination(destination, artifact, tags).await);
        }
        results
    }

    /// Parallel publishing with concurrency control; results keep input order
    async fn run_in_parallel(
        &self,
        destinations: &[RegistryDestination],
        artifact: &Artifact,
        tags: &[Tag],
    ) -> Vec<PublishResult> {
        let permits = concurrency_permits(self.options.max_concurrency, destinations.len());
        let semaphore = Arc::new(Semaphore::new(permits));
        let mut tasks = Vec::with_capacity(destinations.len());

        for destination in destinations {
            let publisher = self.clone();
            let semaphore = Arc::clone(&semaphore);
            let target = destination.clone();
            let artifact = artifact.clone();
            let tags = tags.to_vec();

            let task = tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                publisher
                    .publish_to_destination(&target, &artifact, &tags)
                    .await
            });

            tasks.push((destination, task));
        }

        let mut results = Vec::with_capacity(tasks.len());
        for (destination, task) in tasks {
            let result = match task.await {
                Ok(result) => result,
                Err(e) => PublishResult::failed(
                    destination,
                    tags.to_vec(),
                    Vec::new(),
                    PublishError::CommandError {
                        destination: destination.name.clone(),
                        message: format!("task failed: {}", e),
                    },
                    0,
                ),
            };
            results.push(result);
        }

        results
    }

    /// Resolve credentials, authenticate, then push every tag
    async fn publish_to_destination(
        &self,
        destination: &RegistryDestination,
        artifact: &Artifact,
        tags: &[Tag],
    ) -> PublishResult {
        let start = Instant::now();

        let session = match self.credentials.credential(destination) {
            Ok(credential) => self.authenticate(destination, &credential).await,
            Err(e) => Err(e),
        };

        match session {
            Ok(session) => self.publish(artifact, destination, tags, &session).await,
            Err(error) => {
                warn!(destination = %destination.name, error = %error, "Authentication failed");
                PublishResult::failed(destination, tags.to_vec(), Vec::new(), error, elapsed_ms(start))
            }
        }
    }
}

/// Semaphore size for `destinations` tasks; never zero, never above the task count
fn concurrency_permits(max_concurrency: usize, destinations: usize) -> usize {
    max_concurrency.min(destinations).clamp(1, Semaphore::MAX_PERMITS)
}

fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::ErrorKind;
    use crate::security::credentials::StaticCredentialProvider;
    use crate::testing::{FakeRegistry, destination};
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        // 2024-01-15T20:10:00 in Asia/Shanghai
        Utc.with_ymd_and_hms(2024, 1, 15, 12, 10, 0).unwrap()
    }

    fn options() -> PublishOptions {
        PublishOptions {
            channels: vec!["nightly".to_string()],
            time_zone: chrono_tz::Asia::Shanghai,
            revision: "a1b2c3d4e5f6".to_string(),
            sequential: false,
            max_concurrency: 2,
        }
    }

    fn credentials() -> Arc<StaticCredentialProvider> {
        Arc::new(
            StaticCredentialProvider::new()
                .with_credential("dockerhub", "ceresdb", "dockerhub-token-1234")
                .with_credential("ghcr", "ceresdb-bot", "ghcr-token-5678"),
        )
    }

    fn publisher(registry: Arc<FakeRegistry>, options: PublishOptions) -> Publisher {
        Publisher::new(registry, credentials(), options)
    }

    fn destinations() -> Vec<RegistryDestination> {
        vec![destination("dockerhub", "docker.io"), destination("ghcr", "ghcr.io")]
    }

    #[tokio::test]
    async fn test_run_publishes_to_every_destination() {
        let registry = Arc::new(FakeRegistry::new());
        let publisher = publisher(registry.clone(), options());

        let report = publisher
            .run(&destinations(), &Artifact::new("ceresdb-server:ci"), now())
            .await
            .unwrap();

        assert!(report.is_success());
        assert_eq!(report.build_id.to_string(), "20240115-a1b2c3d4");
        assert_eq!(report.results.len(), 2);
        assert_eq!(report.results[0].destination, "dockerhub");
        assert_eq!(report.results[1].destination, "ghcr");

        let stored = registry.stored();
        assert_eq!(
            stored.get(&(
                "docker.io/ceresdb/ceresdb-server".to_string(),
                "nightly-20240115-a1b2c3d4".to_string()
            )),
            Some(&"ceresdb-server:ci".to_string())
        );
        assert!(stored.contains_key(&(
            "ghcr.io/ceresdb/ceresdb-server".to_string(),
            "nightly-20240115-a1b2c3d4".to_string()
        )));
    }

    #[tokio::test]
    async fn test_auth_failure_is_isolated() {
        let registry = Arc::new(FakeRegistry::new().reject_password("ghcr-token-5678"));
        let publisher = publisher(registry.clone(), options());

        let report = publisher
            .run(&destinations(), &Artifact::new("ceresdb-server:ci"), now())
            .await
            .unwrap();

        assert_eq!(report.results.len(), 2);
        assert!(report.results[0].success);
        assert!(!report.results[1].success);
        assert_eq!(
            report.results[1].error.as_ref().map(|e| e.kind()),
            Some(ErrorKind::Auth)
        );
        assert!(report.results[1].pushed.is_empty());

        assert!(!report.is_success());
        assert_eq!(
            report.aggregate_error(),
            Some(PublishError::AggregateFailure {
                failed: 1,
                total: 2
            })
        );
        assert_eq!(report.exit_code(), 1);

        assert!(!registry.calls().iter().any(|c| c.starts_with("push ghcr")));
    }

    #[tokio::test]
    async fn test_missing_credential_is_auth_error() {
        let registry = Arc::new(FakeRegistry::new());
        let publisher = publisher(registry.clone(), options());
        let targets = vec![destination("dockerhub", "docker.io"), destination("quay", "quay.io")];

        let report = publisher
            .run(&targets, &Artifact::new("ceresdb-server:ci"), now())
            .await
            .unwrap();

        assert!(report.results[0].success);
        assert!(matches!(
            report.results[1].error,
            Some(PublishError::CredentialMissing { .. })
        ));
        assert!(!registry.calls().contains(&"login quay".to_string()));
    }

    #[tokio::test]
    async fn test_push_failure_is_isolated_sequential() {
        let registry = Arc::new(FakeRegistry::new().fail_pushes("dockerhub", 1));
        let publisher = publisher(
            registry.clone(),
            PublishOptions {
                sequential: true,
                ..options()
            },
        );

        let report = publisher
            .run(&destinations(), &Artifact::new("ceresdb-server:ci"), now())
            .await
            .unwrap();

        assert_eq!(
            report.results[0].error.as_ref().map(|e| e.kind()),
            Some(ErrorKind::Push)
        );
        assert!(report.results[1].success);
        assert_eq!(
            registry.calls(),
            vec![
                "login dockerhub",
                "push dockerhub nightly-20240115-a1b2c3d4",
                "login ghcr",
                "push ghcr nightly-20240115-a1b2c3d4",
            ]
        );
    }

    #[tokio::test]
    async fn test_parallel_and_sequential_results_match() {
        let targets = vec![
            destination("dockerhub", "docker.io"),
            destination("ghcr", "ghcr.io"),
            destination("quay", "quay.io"),
        ];
        let artifact = Artifact::new("ceresdb-server:ci");

        let mut outcomes = Vec::new();
        for sequential in [false, true] {
            let registry = Arc::new(FakeRegistry::new().reject_password("ghcr-token-5678"));
            let publisher = publisher(
                registry.clone(),
                PublishOptions {
                    sequential,
                    max_concurrency: 2,
                    ..options()
                },
            );

            let report = publisher.run(&targets, &artifact, now()).await.unwrap();
            let summary: Vec<(String, bool, Option<ErrorKind>)> = report
                .results
                .iter()
                .map(|r| {
                    (
                        r.destination.clone(),
                        r.success,
                        r.error.as_ref().map(|e| e.kind()),
                    )
                })
                .collect();
            outcomes.push((summary, registry.stored()));
        }

        assert_eq!(outcomes[0], outcomes[1]);
        assert_eq!(
            outcomes[0].0,
            vec![
                ("dockerhub".to_string(), true, None),
                ("ghcr".to_string(), false, Some(ErrorKind::Auth)),
                ("quay".to_string(), false, Some(ErrorKind::Auth)),
            ]
        );
    }

    #[tokio::test]
    async fn test_unbounded_concurrency_runs_in_parallel() {
        let registry = Arc::new(FakeRegistry::new());
        let publisher = publisher(
            registry.clone(),
            PublishOptions {
                max_concurrency: usize::MAX,
                ..options()
            },
        );

        let report = publisher
            .run(&destinations(), &Artifact::new("ceresdb-server:ci"), now())
            .await
            .unwrap();

        assert!(report.is_success());
        assert_eq!(registry.stored().len(), 2);
    }

    #[test]
    fn test_concurrency_permits() {
        assert_eq!(concurrency_permits(0, 3), 1);
        assert_eq!(concurrency_permits(2, 3), 2);
        assert_eq!(concurrency_permits(8, 3), 3);
        assert_eq!(concurrency_permits(usize::MAX, 2), 2);
    }

    #[tokio::test]
    async fn test_empty_destinations_is_fatal() {
        let registry = Arc::new(FakeRegistry::new());
        let publisher = publisher(registry.clone(), options());

        let result = publisher
            .run(&[], &Artifact::new("ceresdb-server:ci"), now())
            .await;

        assert!(matches!(result, Err(PublishError::NoDestinations)));
        assert!(registry.calls().is_empty());
    }

    #[tokio::test]
    async fn test_short_revision_is_fatal_without_registry_calls() {
        let registry = Arc::new(FakeRegistry::new());
        let publisher = publisher(
            registry.clone(),
            PublishOptions {
                revision: "a1b2c3".to_string(),
                ..options()
            },
        );

        let result = publisher
            .run(&destinations(), &Artifact::new("ceresdb-server:ci"), now())
            .await;

        match result {
            Err(error) => {
                assert!(error.is_fatal());
                assert!(matches!(error, PublishError::InvalidRevision { .. }));
            }
            Ok(_) => panic!("expected a configuration error"),
        }
        assert!(registry.calls().is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_destination_is_fatal() {
        let registry = Arc::new(FakeRegistry::new());
        let publisher = publisher(registry.clone(), options());
        let targets = vec![destination("ghcr", "ghcr.io"), destination("ghcr", "docker.io")];

        let result = publisher
            .run(&targets, &Artifact::new("ceresdb-server:ci"), now())
            .await;

        assert!(matches!(result, Err(PublishError::InvalidDestination { .. })));
        assert!(registry.calls().is_empty());
    }

    #[tokio::test]
    async fn test_publish_is_idempotent() {
        let registry = Arc::new(FakeRegistry::new());
        let publisher = publisher(registry.clone(), options());
        let target = destination("ghcr", "ghcr.io");
        let artifact = Artifact::new("ceresdb-server:ci");
        let tags = publisher.plan(&[target.clone()], &artifact, now()).unwrap().tags;

        let credential = Credential::new("ceresdb-bot", "ghcr-token-5678");
        let session = publisher.authenticate(&target, &credential).await.unwrap();

        let first = publisher.publish(&artifact, &target, &tags, &session).await;
        let after_first = registry.stored();
        let second = publisher.publish(&artifact, &target, &tags, &session).await;

        assert!(first.success);
        assert!(second.success);
        assert_eq!(registry.stored(), after_first);
        assert_eq!(after_first.len(), 1);
    }

    #[tokio::test]
    async fn test_multiple_channels_share_identifier() {
        let registry = Arc::new(FakeRegistry::new());
        let publisher = publisher(
            registry.clone(),
            PublishOptions {
                channels: vec!["nightly".to_string(), "edge".to_string()],
                ..options()
            },
        );

        let report = publisher
            .run(&destinations(), &Artifact::new("ceresdb-server:ci"), now())
            .await
            .unwrap();

        assert!(report.is_success());
        assert_eq!(report.tags.len(), 2);
        for result in &report.results {
            assert_eq!(result.pushed, report.tags);
        }
        assert_eq!(registry.stored().len(), 4);
    }

    #[tokio::test]
    async fn test_plan_lists_references() {
        let publisher = publisher(Arc::new(FakeRegistry::new()), options());

        let plan = publisher
            .plan(&destinations(), &Artifact::new("ceresdb-server:ci"), now())
            .unwrap();

        assert_eq!(plan.destinations.len(), 2);
        assert_eq!(
            plan.destinations[1].references,
            vec!["ghcr.io/ceresdb/ceresdb-server:nightly-20240115-a1b2c3d4".to_string()]
        );
    }

    #[tokio::test]
    async fn test_prepare_artifact_builds_or_checks() {
        use crate::core::traits::BuildSpec;
        use std::path::PathBuf;

        let registry = Arc::new(FakeRegistry::new());
        let publisher = publisher(registry.clone(), options());

        let missing = publisher
            .prepare_artifact(&Artifact::new("ceresdb-server:ci"))
            .await;
        assert!(matches!(missing, Err(PublishError::ArtifactMissing { .. })));

        let buildable = Artifact {
            image: "ceresdb-server:ci".to_string(),
            build: Some(BuildSpec {
                context: PathBuf::from("."),
                dockerfile: None,
                build_args: Default::default(),
            }),
        };
        publisher.prepare_artifact(&buildable).await.unwrap();

        assert_eq!(registry.built(), vec!["ceresdb-server:ci".to_string()]);
        assert!(publisher
            .prepare_artifact(&Artifact::new("ceresdb-server:ci"))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_local_image_is_accepted() {
        let registry = Arc::new(FakeRegistry::new().with_local_image("ceresdb-server:ci"));
        let publisher = publisher(registry, options());

        assert!(publisher
            .prepare_artifact(&Artifact::new("ceresdb-server:ci"))
            .await
            .is_ok());
    }
}
