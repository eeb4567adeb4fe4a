//! Controller state, request tokens and the events observers can subscribe to.

use std::fmt;

use chrono::{DateTime, Utc};

use crate::error::{ActionError, ErrorKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestToken(u64);

impl RequestToken {
    pub(crate) fn first() -> Self {
        Self(1)
    }

    pub(crate) fn next(self) -> Self {
        Self(self.0.wrapping_add(1))
    }

    pub fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RequestToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionPhase {
    Idle,
    Pending,
    Succeeded,
    Failed,
}

impl ActionPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

impl fmt::Display for ActionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Pending => "pending",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone)]
pub enum ActionState<R> {
    Idle,
    Pending {
        token: RequestToken,
        started_at: DateTime<Utc>,
    },
    Succeeded {
        result: R,
        finished_at: DateTime<Utc>,
    },
    Failed {
        error: ActionError,
        finished_at: DateTime<Utc>,
    },
}

impl<R> ActionState<R> {
    pub fn phase(&self) -> ActionPhase {
        match self {
            Self::Idle => ActionPhase::Idle,
            Self::Pending { .. } => ActionPhase::Pending,
            Self::Succeeded { .. } => ActionPhase::Succeeded,
            Self::Failed { .. } => ActionPhase::Failed,
        }
    }

    pub fn active_token(&self) -> Option<RequestToken> {
        match self {
            Self::Pending { token, .. } => Some(*token),
            _ => None,
        }
    }

    pub fn result(&self) -> Option<&R> {
        match self {
            Self::Succeeded { result, .. } => Some(result),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&ActionError> {
        match self {
            Self::Failed { error, .. } => Some(error),
            _ => None,
        }
    }
}

/// How an accepted trigger ended, as seen by the caller that issued it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Settlement {
    Succeeded(RequestToken),
    Failed(RequestToken, ErrorKind),
    /// A restart replaced the request before it settled; its outcome was discarded.
    Superseded(RequestToken),
    /// The request was cancelled, or the trigger was dropped from the queue by `cancel()`.
    Cancelled(Option<RequestToken>),
    /// A newer trigger took this trigger's place in the queue before it started.
    Replaced,
}

impl Settlement {
    pub fn token(&self) -> Option<RequestToken> {
        match self {
            Self::Succeeded(token) | Self::Failed(token, _) | Self::Superseded(token) => {
                Some(*token)
            }
            Self::Cancelled(token) => *token,
            Self::Replaced => None,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControllerEvent {
    PhaseChanged {
        from: ActionPhase,
        to: ActionPhase,
        token: Option<RequestToken>,
    },
    /// The token stopped being active without settling (restart, cancel or timeout).
    Superseded { token: RequestToken },
    /// A settlement arrived for a token that is no longer active.
    StaleDiscarded { token: RequestToken },
    Rejected { phase: ActionPhase },
    Queued,
}
