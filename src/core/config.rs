//! Configuration structures and types for image-publisher
//!
//! This module provides type-safe configuration management with serde support.

use crate::core::traits::{Artifact, RegistryDestination};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const DEFAULT_CHANNEL: &str = "nightly";
pub const DEFAULT_TIME_ZONE: &str = "UTC";
pub const DEFAULT_MAX_CONCURRENCY: usize = 3;
/// Upper bound for `publish.maxConcurrency`
pub const MAX_CONCURRENCY: usize = 64;
pub const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 900;

/// Root configuration object
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PublisherConfig {
    /// Schema version (required)
    pub version: String,

    /// Extend from base configuration file (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extends: Option<String>,

    /// Tag prefixes, one tag per channel
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channels: Option<Vec<String>>,

    /// IANA zone used for the date part of the build identifier
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_zone: Option<String>,

    /// Cron expression of the external trigger (informational, UTC)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schedule: Option<String>,

    /// Container engine CLI
    #[serde(skip_serializing_if = "Option::is_none")]
    pub engine: Option<Engine>,

    /// Image to publish
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact: Option<Artifact>,

    /// Publish behaviour
    #[serde(skip_serializing_if = "Option::is_none")]
    pub publish: Option<PublishSettings>,

    /// Registries to push to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub destinations: Option<Vec<RegistryDestination>>,
}

/// Supported container engines
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Engine {
    #[default]
    Docker,
    Podman,
}

impl Engine {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Docker => "docker",
            Self::Podman => "podman",
        }
    }
}

impl fmt::Display for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Engine {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "docker" => Ok(Self::Docker),
            "podman" => Ok(Self::Podman),
            other => Err(format!("unsupported engine: {}", other)),
        }
    }
}

/// Publish behaviour
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct PublishSettings {
    /// Push to destinations one after another (default: parallel)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sequential: Option<bool>,

    /// Maximum destinations handled at once (default: 3)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_concurrency: Option<usize>,

    /// Timeout for a single engine command (default: 900)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command_timeout_secs: Option<u64>,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            version: "1.0".to_string(),
            extends: None,
            channels: None,
            time_zone: None,
            schedule: None,
            engine: None,
            artifact: None,
            publish: None,
            destinations: None,
        }
    }
}

impl PublisherConfig {
    /// Override layer with no schema version
    ///
    /// Environment and command-line layers use this so the file's
    /// `version` survives merging.
    pub fn overlay() -> Self {
        Self {
            version: String::new(),
            ..Self::default()
        }
    }

    /// Effective channels
    pub fn channels(&self) -> Vec<String> {
        self.channels
            .clone()
            .filter(|c| !c.is_empty())
            .unwrap_or_else(|| vec![DEFAULT_CHANNEL.to_string()])
    }

    /// Effective time zone name
    pub fn time_zone(&self) -> &str {
        self.time_zone.as_deref().unwrap_or(DEFAULT_TIME_ZONE)
    }

    pub fn engine(&self) -> Engine {
        self.engine.unwrap_or_default()
    }

    pub fn destinations(&self) -> &[RegistryDestination] {
        self.destinations.as_deref().unwrap_or(&[])
    }

    pub fn sequential(&self) -> bool {
        self.publish
            .as_ref()
            .and_then(|p| p.sequential)
            .unwrap_or(false)
    }

    pub fn max_concurrency(&self) -> usize {
        self.publish
            .as_ref()
            .and_then(|p| p.max_concurrency)
            .unwrap_or(DEFAULT_MAX_CONCURRENCY)
    }

    pub fn command_timeout_secs(&self) -> u64 {
        self.publish
            .as_ref()
            .and_then(|p| p.command_timeout_secs)
            .unwrap_or(DEFAULT_COMMAND_TIMEOUT_SECS)
    }
}
