//! Error taxonomy for data generation and the upload protocol.

/// Failure of a seeding step.
///
/// Leaf components return these directly so a caller can tell a transport
/// failure apart from an infeasible sampling request.
#[derive(Debug, thiserror::Error)]
pub enum SeedError {
    /// Non-2xx response or network failure.
    #[error("{op} failed: {message}")]
    Transport {
        op: &'static str,
        status: Option<u16>,
        message: String,
    },

    /// Response arrived but lacked a field the protocol needs.
    #[error("{op} protocol error: {message}")]
    Protocol { op: &'static str, message: String },

    /// Requested statistics cannot be produced within the value bounds.
    #[error("constraint violated: {0}")]
    Constraint(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("template error: {0}")]
    Template(String),

    #[error("config error: {0}")]
    Config(String),
}

impl SeedError {
    pub fn transport(op: &'static str, status: Option<u16>, message: impl Into<String>) -> Self {
        SeedError::Transport {
            op,
            status,
            message: message.into(),
        }
    }

    pub fn protocol(op: &'static str, message: impl Into<String>) -> Self {
        SeedError::Protocol {
            op,
            message: message.into(),
        }
    }

    /// Stable code for log records and callers that branch on failure kind.
    pub fn code(&self) -> &'static str {
        match self {
            SeedError::Transport { .. } => "transport",
            SeedError::Protocol { .. } => "protocol",
            SeedError::Constraint(_) => "constraint",
            SeedError::InvalidInput(_) => "invalid_input",
            SeedError::Template(_) => "template",
            SeedError::Config(_) => "config",
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            SeedError::Transport { status, .. } => *status,
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, SeedError>;
