//! Build identifier and tag derivation
//!
//! A build identifier pairs the calendar date of the run, taken in the
//! configured time zone, with a short revision hash. Every tag of a run is
//! derived from the same identifier so that a build can be found under the
//! same name on every registry.

use crate::core::error::PublishError;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of revision characters kept in the identifier
pub const REVISION_LENGTH: usize = 8;

/// Maximum length of an OCI tag
pub const MAX_TAG_LENGTH: usize = 128;

lazy_static! {
    static ref CHANNEL_PATTERN: Regex = Regex::new(r"^[A-Za-z0-9_][A-Za-z0-9_.-]*$").unwrap();
}

/// Date and revision pair shared by every tag of a run
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BuildIdentifier {
    date: String,
    revision: String,
}

impl BuildIdentifier {
    /// `YYYYMMDD` in the configured zone
    pub fn date(&self) -> &str {
        &self.date
    }

    /// Lowercased first eight hex characters of the revision
    pub fn revision(&self) -> &str {
        &self.revision
    }
}

impl fmt::Display for BuildIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.date, self.revision)
    }
}

/// Parse an IANA time zone name
pub fn parse_time_zone(zone: &str) -> Result<Tz, PublishError> {
    zone.trim()
        .parse::<Tz>()
        .map_err(|_| PublishError::InvalidTimeZone {
            zone: zone.to_string(),
        })
}

/// Derive the build identifier for a run
///
/// The date is the calendar day of `now` in `time_zone`, not in UTC, so a
/// run triggered at 16:30 UTC is labelled with the next day in UTC+8.
///
/// # Examples
///
/// ```
/// use chrono::{TimeZone, Utc};
/// use image_publisher::core::derive_build_identifier;
///
/// let now = Utc.with_ymd_and_hms(2024, 1, 15, 12, 10, 0).unwrap();
/// let id = derive_build_identifier(now, chrono_tz::Asia::Shanghai, "a1b2c3d4e5f6").unwrap();
/// assert_eq!(id.to_string(), "20240115-a1b2c3d4");
/// ```
pub fn derive_build_identifier(
    now: DateTime<Utc>,
    time_zone: Tz,
    revision_hash: &str,
) -> Result<BuildIdentifier, PublishError> {
    let revision = revision_hash.trim();

    if revision.chars().count() < REVISION_LENGTH {
        return Err(PublishError::InvalidRevision {
            revision: revision.to_string(),
            reason: format!("shorter than {} characters", REVISION_LENGTH),
        });
    }

    let short: String = revision.chars().take(REVISION_LENGTH).collect();
    if !short.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(PublishError::InvalidRevision {
            revision: revision.to_string(),
            reason: "not a hexadecimal hash".to_string(),
        });
    }

    Ok(BuildIdentifier {
        date: now.with_timezone(&time_zone).format("%Y%m%d").to_string(),
        revision: short.to_ascii_lowercase(),
    })
}

/// Registry tag composed from a channel and a build identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Tag(String);

impl Tag {
    /// Compose `<channel>-<date>-<revision>`
    pub fn compose(channel: &str, build_id: &BuildIdentifier) -> Result<Self, PublishError> {
        validate_channel(channel)?;

        let tag = format!("{}-{}", channel, build_id);
        if tag.len() > MAX_TAG_LENGTH {
            return Err(PublishError::InvalidChannel {
                channel: channel.to_string(),
                reason: format!("resulting tag exceeds {} characters", MAX_TAG_LENGTH),
            });
        }

        Ok(Self(tag))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Check that a channel can start a valid OCI tag
pub fn validate_channel(channel: &str) -> Result<(), PublishError> {
    if channel.is_empty() {
        return Err(PublishError::InvalidChannel {
            channel: channel.to_string(),
            reason: "channel is empty".to_string(),
        });
    }

    if !CHANNEL_PATTERN.is_match(channel) {
        return Err(PublishError::InvalidChannel {
            channel: channel.to_string(),
            reason: "contains characters not allowed in a tag".to_string(),
        });
    }

    Ok(())
}

/// Compose one tag per channel, all sharing `build_id`
///
/// Duplicate channels collapse to a single tag.
pub fn compose_tags(channels: &[String], build_id: &BuildIdentifier) -> Result<Vec<Tag>, PublishError> {
    if channels.is_empty() {
        return Err(PublishError::ConfigError(
            "at least one channel is required".to_string(),
        ));
    }

    let mut tags: Vec<Tag> = Vec::with_capacity(channels.len());
    for channel in channels {
        let tag = Tag::compose(channel, build_id)?;
        if !tags.contains(&tag) {
            tags.push(tag);
        }
    }

    Ok(tags)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use chrono_tz::Asia::Shanghai;

    fn shanghai_evening() -> DateTime<Utc> {
        // 2024-01-15T20:10:00+08:00
        Utc.with_ymd_and_hms(2024, 1, 15, 12, 10, 0).unwrap()
    }

    #[test]
    fn test_nightly_tag_example() {
        let id = derive_build_identifier(shanghai_evening(), Shanghai, "a1b2c3d4e5f6").unwrap();
        let tag = Tag::compose("nightly", &id).unwrap();

        assert_eq!(id.date(), "20240115");
        assert_eq!(id.revision(), "a1b2c3d4");
        assert_eq!(tag.as_str(), "nightly-20240115-a1b2c3d4");
    }

    #[test]
    fn test_derivation_is_deterministic() {
        let first = derive_build_identifier(shanghai_evening(), Shanghai, "0123456789abcdef").unwrap();
        let second = derive_build_identifier(shanghai_evening(), Shanghai, "0123456789abcdef").unwrap();

        assert_eq!(first, second);
    }

    #[test]
    fn test_date_follows_configured_zone_near_midnight() {
        let late_utc = Utc.with_ymd_and_hms(2024, 1, 15, 16, 30, 0).unwrap();

        let shanghai = derive_build_identifier(late_utc, Shanghai, "a1b2c3d4").unwrap();
        let utc = derive_build_identifier(late_utc, chrono_tz::UTC, "a1b2c3d4").unwrap();

        assert_eq!(shanghai.date(), "20240116");
        assert_eq!(utc.date(), "20240115");
    }

    #[test]
    fn test_exactly_eight_characters_is_accepted() {
        let id = derive_build_identifier(shanghai_evening(), Shanghai, "deadbeef").unwrap();
        assert_eq!(id.revision(), "deadbeef");
    }

    #[test]
    fn test_short_revision_is_rejected() {
        let result = derive_build_identifier(shanghai_evening(), Shanghai, "a1b2c3d");

        match result {
            Err(PublishError::InvalidRevision { reason, .. }) => {
                assert!(reason.contains("shorter"));
            }
            other => panic!("expected InvalidRevision, got {:?}", other),
        }
    }

    #[test]
    fn test_empty_revision_is_rejected() {
        let result = derive_build_identifier(shanghai_evening(), Shanghai, "   ");
        assert!(matches!(result, Err(PublishError::InvalidRevision { .. })));
    }

    #[test]
    fn test_non_hex_revision_is_rejected() {
        let result = derive_build_identifier(shanghai_evening(), Shanghai, "main-branch-head");
        assert!(matches!(result, Err(PublishError::InvalidRevision { .. })));
    }

    #[test]
    fn test_uppercase_revision_is_lowercased() {
        let id = derive_build_identifier(shanghai_evening(), Shanghai, "A1B2C3D4E5").unwrap();
        assert_eq!(id.revision(), "a1b2c3d4");
    }

    #[test]
    fn test_parse_time_zone() {
        assert_eq!(parse_time_zone("Asia/Shanghai").unwrap(), Shanghai);
        assert!(matches!(
            parse_time_zone("Mars/Olympus"),
            Err(PublishError::InvalidTimeZone { .. })
        ));
    }

    #[test]
    fn test_invalid_channel() {
        let id = derive_build_identifier(shanghai_evening(), Shanghai, "a1b2c3d4").unwrap();

        assert!(matches!(
            Tag::compose("night ly", &id),
            Err(PublishError::InvalidChannel { .. })
        ));
        assert!(matches!(
            Tag::compose("-nightly", &id),
            Err(PublishError::InvalidChannel { .. })
        ));
        assert!(matches!(
            Tag::compose("", &id),
            Err(PublishError::InvalidChannel { .. })
        ));
    }

    #[test]
    fn test_overlong_channel() {
        let id = derive_build_identifier(shanghai_evening(), Shanghai, "a1b2c3d4").unwrap();
        let channel = "n".repeat(MAX_TAG_LENGTH);

        assert!(Tag::compose(&channel, &id).is_err());
    }

    #[test]
    fn test_compose_tags_shares_identifier() {
        let id = derive_build_identifier(shanghai_evening(), Shanghai, "a1b2c3d4").unwrap();
        let channels = vec![
            "nightly".to_string(),
            "edge".to_string(),
            "nightly".to_string(),
        ];

        let tags = compose_tags(&channels, &id).unwrap();

        assert_eq!(tags.len(), 2);
        assert!(tags.iter().all(|t| t.as_str().ends_with("-20240115-a1b2c3d4")));
    }

    #[test]
    fn test_compose_tags_requires_a_channel() {
        let id = derive_build_identifier(shanghai_evening(), Shanghai, "a1b2c3d4").unwrap();
        assert!(matches!(
            compose_tags(&[], &id),
            Err(PublishError::ConfigError(_))
        ));
    }
}
