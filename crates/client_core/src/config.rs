use std::{fmt, str::FromStr, time::Duration};

use serde::{Deserialize, Serialize};

pub const DEFAULT_EVENT_CAPACITY: usize = 64;

/// What a controller does with a trigger that arrives while a request is outstanding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConcurrencyPolicy {
    #[default]
    RejectWhilePending,
    QueueLatest,
    CancelAndRestart,
}

impl ConcurrencyPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::RejectWhilePending => "reject-while-pending",
            Self::QueueLatest => "queue-latest",
            Self::CancelAndRestart => "cancel-and-restart",
        }
    }
}

impl fmt::Display for ConcurrencyPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConcurrencyPolicy {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "reject-while-pending" | "reject" => Ok(Self::RejectWhilePending),
            "queue-latest" | "queue" => Ok(Self::QueueLatest),
            "cancel-and-restart" | "restart" => Ok(Self::CancelAndRestart),
            other => Err(format!("unknown concurrency policy '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    pub concurrency: ConcurrencyPolicy,
    pub timeout_ms: Option<u64>,
    pub auto_reset: bool,
    /// Abort the spawned request task when its token goes stale.
    pub abort_in_flight: bool,
    pub event_capacity: usize,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            concurrency: ConcurrencyPolicy::default(),
            timeout_ms: None,
            auto_reset: true,
            abort_in_flight: true,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl ControllerConfig {
    pub fn with_concurrency(mut self, concurrency: ConcurrencyPolicy) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = Some(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX));
        self
    }

    pub fn with_auto_reset(mut self, auto_reset: bool) -> Self {
        self.auto_reset = auto_reset;
        self
    }

    pub fn with_abort_in_flight(mut self, abort_in_flight: bool) -> Self {
        self.abort_in_flight = abort_in_flight;
        self
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}
