//! Error taxonomy shared by controllers and backend bindings.

use std::time::Duration;

use thiserror::Error;

use crate::state::ActionPhase;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Busy,
    Transport,
    Application,
    Timeout,
    InvalidTransition,
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ActionError {
    #[error("action is busy with an outstanding request")]
    Busy,
    #[error("transport failure: {message}")]
    Transport {
        message: String,
        status: Option<u16>,
    },
    #[error("backend reported failure: {message}")]
    Application {
        message: String,
        status: Option<u16>,
    },
    #[error("request timed out after {}ms", after.as_millis())]
    Timeout { after: Duration },
    #[error("cannot {operation} while {phase}")]
    InvalidTransition {
        operation: &'static str,
        phase: ActionPhase,
    },
    #[error("action controller has shut down")]
    Closed,
}

impl ActionError {
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            status: None,
        }
    }

    pub fn application(message: impl Into<String>) -> Self {
        Self::Application {
            message: message.into(),
            status: None,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Busy => ErrorKind::Busy,
            Self::Transport { .. } => ErrorKind::Transport,
            Self::Application { .. } => ErrorKind::Application,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::InvalidTransition { .. } => ErrorKind::InvalidTransition,
            Self::Closed => ErrorKind::Closed,
        }
    }

    /// HTTP status attached to the failure, when the backend produced one.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Transport { status, .. } | Self::Application { status, .. } => *status,
            _ => None,
        }
    }

    /// Failures that describe an operation outcome and therefore reach `on_failure`.
    pub fn is_outcome(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Transport | ErrorKind::Application | ErrorKind::Timeout
        )
    }
}

impl From<reqwest::Error> for ActionError {
    fn from(err: reqwest::Error) -> Self {
        let status = err.status().map(|status| status.as_u16());
        let message = if err.is_timeout() {
            format!("request timed out: {err}")
        } else if err.is_connect() {
            format!("failed to connect: {err}")
        } else if err.is_decode() {
            format!("malformed response: {err}")
        } else {
            err.to_string()
        };
        Self::Transport { message, status }
    }
}

impl From<serde_json::Error> for ActionError {
    fn from(err: serde_json::Error) -> Self {
        Self::transport(format!("malformed response: {err}"))
    }
}
