//! Error taxonomy shared by the relay, the sessions and the orchestrator.

use std::fmt;

/// External service an error originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Service {
    /// Downstream analysis API.
    Kamos,
    /// Generative-language model used for directives and synthesis.
    Gemini,
    /// Remote phase loop (the relay's own `/ask` endpoint, seen from the CLI).
    Relay,
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Service::Kamos => write!(f, "Kamos"),
            Service::Gemini => write!(f, "Gemini"),
            Service::Relay => write!(f, "Relay"),
        }
    }
}

/// Why a transport-level call failed. Kept distinct so logs can tell a timeout from a refused connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportCause {
    Timeout,
    Connect,
    Status(u16),
    Body,
    Request,
}

impl fmt::Display for TransportCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportCause::Timeout => write!(f, "timeout"),
            TransportCause::Connect => write!(f, "connect"),
            TransportCause::Status(code) => write!(f, "HTTP {}", code),
            TransportCause::Body => write!(f, "body"),
            TransportCause::Request => write!(f, "request"),
        }
    }
}

impl From<&reqwest::Error> for TransportCause {
    fn from(e: &reqwest::Error) -> Self {
        if e.is_timeout() {
            TransportCause::Timeout
        } else if e.is_connect() {
            TransportCause::Connect
        } else if let Some(status) = e.status() {
            TransportCause::Status(status.as_u16())
        } else if e.is_body() || e.is_decode() {
            TransportCause::Body
        } else {
            TransportCause::Request
        }
    }
}

pub type RelayResult<T> = Result<T, RelayError>;

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// Required credential or setting missing/out of range at startup.
    #[error("configuration: {0}")]
    Configuration(String),

    /// The service answered, but with an application-level error payload.
    #[error("{service} API Error: {message}")]
    Upstream { service: Service, message: String },

    #[error("{service} {cause}: {message}")]
    Transport {
        service: Service,
        cause: TransportCause,
        message: String,
    },

    #[error("parse: {0}")]
    Parse(String),

    /// A local input (file, argument) could not be used.
    #[error("input: {0}")]
    Input(String),

    /// Every session of a batch failed; one `Task n: <error>` line per session.
    #[error("all {} sessions failed: {}", .0.len(), .0.join("; "))]
    AllSessionsFailed(Vec<String>),
}

impl RelayError {
    pub fn upstream(service: Service, message: impl Into<String>) -> Self {
        RelayError::Upstream {
            service,
            message: message.into(),
        }
    }

    pub fn transport(service: Service, err: reqwest::Error) -> Self {
        RelayError::Transport {
            service,
            cause: TransportCause::from(&err),
            message: err.to_string(),
        }
    }

    pub fn timeout(service: Service, message: impl Into<String>) -> Self {
        RelayError::Transport {
            service,
            cause: TransportCause::Timeout,
            message: message.into(),
        }
    }

    pub fn status(service: Service, code: u16, body: impl Into<String>) -> Self {
        RelayError::Transport {
            service,
            cause: TransportCause::Status(code),
            message: body.into(),
        }
    }

    /// True for failures of the wire rather than of the remote application.
    pub fn is_transport(&self) -> bool {
        matches!(self, RelayError::Transport { .. })
    }
}

impl From<config::ConfigError> for RelayError {
    fn from(e: config::ConfigError) -> Self {
        RelayError::Configuration(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upstream_message_names_the_service() {
        let err = RelayError::upstream(Service::Kamos, "quota exceeded");
        assert_eq!(err.to_string(), "Kamos API Error: quota exceeded");
        assert!(!err.is_transport());
    }

    #[test]
    fn timeout_keeps_a_distinct_cause() {
        let err = RelayError::timeout(Service::Relay, "no data for 120s");
        match err {
            RelayError::Transport { cause, .. } => assert_eq!(cause, TransportCause::Timeout),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn total_batch_loss_lists_each_cause() {
        let err = RelayError::AllSessionsFailed(vec![
            "Task 1: Relay connect: refused".into(),
            "Task 2: Relay API Error: quota".into(),
        ]);
        assert_eq!(
            err.to_string(),
            "all 2 sessions failed: Task 1: Relay connect: refused; Task 2: Relay API Error: quota"
        );
    }

    #[test]
    fn status_error_renders_code() {
        let err = RelayError::status(Service::Gemini, 503, "overloaded");
        assert_eq!(err.to_string(), "Gemini HTTP 503: overloaded");
    }
}
