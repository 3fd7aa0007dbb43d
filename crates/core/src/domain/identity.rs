use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

const IDENTITY_PREFIX: &str = "steamguard";

/// Identifies this bot process to the dashboard collector.
///
/// Generated once at startup and held for the lifetime of the process; every
/// registration sent by the dashboard link carries the same value.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BotIdentity(String);

impl BotIdentity {
    pub fn generate() -> Self {
        Self::at(Utc::now())
    }

    pub fn at(started_at: DateTime<Utc>) -> Self {
        Self(format!("{IDENTITY_PREFIX}-{}", started_at.timestamp_millis()))
    }

    pub fn from_raw(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BotIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::BotIdentity;

    #[test]
    fn identity_is_derived_from_startup_millis() {
        let started_at = Utc.timestamp_millis_opt(1_730_000_000_123).single().expect("timestamp");
        assert_eq!(BotIdentity::at(started_at).as_str(), "steamguard-1730000000123");
    }

    #[test]
    fn later_startups_produce_distinct_identities() {
        let first = Utc.timestamp_millis_opt(1_000).single().expect("timestamp");
        let second = Utc.timestamp_millis_opt(1_001).single().expect("timestamp");
        assert_ne!(BotIdentity::at(first), BotIdentity::at(second));
    }
}
