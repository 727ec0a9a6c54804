//! Caller-side retry of failed destinations
//!
//! Every attempt reuses the same `now`, so retried destinations receive the
//! same tags as the first attempt even across midnight.

use crate::core::error::PublishError;
use crate::core::retry::RetryPolicy;
use crate::core::traits::{Artifact, RegistryDestination};
use crate::orchestration::publisher::Publisher;
use crate::orchestration::report::RunReport;
use chrono::{DateTime, Utc};
use tracing::{info, warn};

/// Run `publisher` and re-run only the failed destinations until they
/// succeed or `policy` runs out of attempts
pub async fn retry_failed_destinations(
    publisher: &Publisher,
    destinations: &[RegistryDestination],
    artifact: &Artifact,
    now: DateTime<Utc>,
    policy: &RetryPolicy,
) -> Result<RunReport, PublishError> {
    let mut report = publisher.run(destinations, artifact, now).await?;
    let mut attempt = 1;

    while !report.is_success() && policy.allows_another(attempt) {
        let failed = report.failed_destinations();
        let remaining: Vec<RegistryDestination> = destinations
            .iter()
            .filter(|d| failed.contains(&d.name))
            .cloned()
            .collect();

        let delay = policy.delay_after(attempt);
        warn!(
            attempt = attempt,
            failed = ?failed,
            delay_ms = delay.as_millis() as u64,
            "Retrying failed destinations"
        );
        policy.wait(attempt).await;

        let retry = publisher.run(&remaining, artifact, now).await?;
        report.merge_retry(retry);
        attempt += 1;
    }

    if attempt > 1 {
        info!(attempts = attempt, success = report.is_success(), "Retry finished");
    }

    Ok(report)
}
