use serde::{Deserialize, Serialize};

/// Reason recorded for an identifier that has no registry entry.
pub const TARGET_NOT_CONFIGURED: &str = "target not configured";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CoreError {
    /// Malformed or missing statement, parameters, or instance list.
    /// Fatal to the whole run.
    #[error("Invalid input: {0}")]
    Input(String),

    /// The instance identifier has no entry in the registry.
    #[error("{}", TARGET_NOT_CONFIGURED)]
    Resolution,

    /// Establishing the connection failed (network, auth, TLS, timeout).
    #[error("Connection error: {0}")]
    Connection(String),

    /// The instance rejected or failed to run the statement.
    #[error("Execution error: {0}")]
    Execution(String),
}

/// Closed classification of [`CoreError`], carried on failed outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Input,
    Resolution,
    Connection,
    Execution,
}

impl CoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CoreError::Input(_) => ErrorKind::Input,
            CoreError::Resolution => ErrorKind::Resolution,
            CoreError::Connection(_) => ErrorKind::Connection,
            CoreError::Execution(_) => ErrorKind::Execution,
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorKind::Input => "input",
            ErrorKind::Resolution => "resolution",
            ErrorKind::Connection => "connection",
            ErrorKind::Execution => "execution",
        };
        f.write_str(name)
    }
}
