//! Run report and publish plan

use crate::core::build_id::{BuildIdentifier, Tag};
use crate::core::error::PublishError;
use crate::core::traits::PublishResult;
use serde::Serialize;

/// Exit code for a run where every destination succeeded
pub const EXIT_SUCCESS: i32 = 0;

/// Exit code for a run where at least one destination failed
pub const EXIT_PUBLISH_FAILED: i32 = 1;

/// Exit code for configuration and artifact errors
pub const EXIT_FATAL: i32 = 2;

/// Outcome of a whole run, one result per destination in config order
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub build_id: BuildIdentifier,
    pub tags: Vec<Tag>,
    pub results: Vec<PublishResult>,
}

impl RunReport {
    pub fn new(build_id: BuildIdentifier, tags: Vec<Tag>, results: Vec<PublishResult>) -> Self {
        Self {
            build_id,
            tags,
            results,
        }
    }

    pub fn is_success(&self) -> bool {
        self.results.iter().all(|r| r.success)
    }

    pub fn succeeded(&self) -> impl Iterator<Item = &PublishResult> {
        self.results.iter().filter(|r| r.success)
    }

    pub fn failed(&self) -> impl Iterator<Item = &PublishResult> {
        self.results.iter().filter(|r| !r.success)
    }

    pub fn failed_destinations(&self) -> Vec<String> {
        self.failed().map(|r| r.destination.clone()).collect()
    }

    /// `AggregateFailure` when any destination failed
    pub fn aggregate_error(&self) -> Option<PublishError> {
        let failed = self.failed().count();
        if failed == 0 {
            return None;
        }

        Some(PublishError::AggregateFailure {
            failed,
            total: self.results.len(),
        })
    }

    pub fn exit_code(&self) -> i32 {
        if self.is_success() {
            EXIT_SUCCESS
        } else {
            EXIT_PUBLISH_FAILED
        }
    }

    /// Replace results of destinations that were published again
    ///
    /// `retry` must come from a run with the same build identifier.
    pub fn merge_retry(&mut self, retry: RunReport) {
        for result in retry.results {
            match self
                .results
                .iter_mut()
                .find(|r| r.destination == result.destination)
            {
                Some(existing) => *existing = result,
                None => self.results.push(result),
            }
        }
    }

    /// Human-readable summary
    pub fn summary(&self) -> String {
        let rule = "=".repeat(60);
        let mut out = String::new();

        out.push_str(&format!("\n{}\n", rule));
        out.push_str(&format!("📊 Publish Summary ({})\n", self.build_id));
        out.push_str(&format!("{}\n", rule));

        let succeeded: Vec<_> = self.succeeded().collect();
        out.push_str(&format!("\n✅ Succeeded: {}\n", succeeded.len()));
        for result in succeeded {
            out.push_str(&format!(
                "   - {} → {} ({}ms)\n",
                result.destination,
                join_tags(&result.pushed),
                result.duration_ms
            ));
        }

        let failed: Vec<_> = self.failed().collect();
        out.push_str(&format!("\n❌ Failed: {}\n", failed.len()));
        for result in failed {
            let error = result
                .error
                .as_ref()
                .map(|e| e.to_string())
                .unwrap_or_else(|| "unknown error".to_string());
            out.push_str(&format!(
                "   - {}: {} ({}ms)\n",
                result.destination, error, result.duration_ms
            ));
            if !result.pushed.is_empty() {
                out.push_str(&format!("     pushed before failure: {}\n", join_tags(&result.pushed)));
            }
        }

        out.push_str(&format!("\n{}\n", rule));
        match self.aggregate_error() {
            None => out.push_str("Overall Status: ✅ SUCCESS\n"),
            Some(error) => out.push_str(&format!("Overall Status: ❌ FAILED ({})\n", error)),
        }
        out.push_str(&format!("{}\n", rule));

        out
    }
}

/// References a destination will receive
#[derive(Debug, Clone, Serialize)]
pub struct PlannedDestination {
    pub destination: String,
    pub references: Vec<String>,
}

/// Everything a run would do, computed without contacting a registry
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishPlan {
    pub build_id: BuildIdentifier,
    pub tags: Vec<Tag>,
    pub artifact: String,
    pub destinations: Vec<PlannedDestination>,
}

impl PublishPlan {
    pub fn summary(&self) -> String {
        let mut out = format!(
            "🧪 Dry run: {} would be published as {}\n",
            self.artifact,
            join_tags(&self.tags)
        );

        for planned in &self.destinations {
            out.push_str(&format!("\n📦 {}\n", planned.destination));
            for reference in &planned.references {
                out.push_str(&format!("   - {}\n", reference));
            }
        }

        out
    }
}

fn join_tags(tags: &[Tag]) -> String {
    tags.iter().map(Tag::as_str).collect::<Vec<_>>().join(", ")
}
