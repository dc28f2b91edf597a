//! Executor configuration.
//!
//! Values come from code, from any serde source, or from the environment:
//!
//! | variable                      | field           |
//! |-------------------------------|-----------------|
//! | `REST_MULTI_LIMIT`            | `limit`         |
//! | `REST_MULTI_POLL_INTERVAL_US` | `poll_interval` |
//! | `REST_MULTI_ADMISSION`        | `admission`     |

use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_micros(25_000);

/// How many descriptors the executor admits before the first poll.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdmissionPolicy {
    /// `limit` when `0 < limit < total`, otherwise `total - 1`.
    #[default]
    Legacy,
    /// `min(limit, total)`, or `total` when unbounded.
    Exact,
}

impl AdmissionPolicy {
    pub fn initial_window(self, limit: usize, total: usize) -> usize {
        match self {
            AdmissionPolicy::Legacy if limit > 0 && limit < total => limit,
            AdmissionPolicy::Legacy => total.saturating_sub(1),
            AdmissionPolicy::Exact if limit == 0 => total,
            AdmissionPolicy::Exact => limit.min(total),
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "legacy" => Some(AdmissionPolicy::Legacy),
            "exact" => Some(AdmissionPolicy::Exact),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Maximum in-flight requests; 0 means unbounded.
    pub limit: usize,
    #[serde(rename = "poll_interval_us", with = "micros")]
    pub poll_interval: Duration,
    pub admission: AdmissionPolicy,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            limit: 0,
            poll_interval: DEFAULT_POLL_INTERVAL,
            admission: AdmissionPolicy::Legacy,
        }
    }
}

impl ExecutorConfig {
    /// Defaults overridden by `REST_MULTI_*` variables. Unparsable values are
    /// ignored.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(limit) = lookup("REST_MULTI_LIMIT").and_then(|v| v.trim().parse().ok()) {
            config.limit = limit;
        }
        if let Some(us) = lookup("REST_MULTI_POLL_INTERVAL_US").and_then(|v| v.trim().parse().ok()) {
            config.poll_interval = Duration::from_micros(us);
        }
        if let Some(policy) = lookup("REST_MULTI_ADMISSION").and_then(|v| AdmissionPolicy::parse(&v)) {
            config.admission = policy;
        }
        config
    }
}

mod micros {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(u64::try_from(d.as_micros()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_micros)
    }
}
