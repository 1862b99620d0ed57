use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// No reachable browser host, and launching one did not succeed.
    #[error("{0}")]
    HostUnavailable(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Timeout after {ms}ms: {operation}")]
    Timeout { ms: u64, operation: String },

    /// Failure raised inside a tool's own logic. Displayed verbatim.
    #[error("{0}")]
    Tool(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("CDP error: {0}")]
    Cdp(String),

    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Not found: {0}")]
    NotFound(String),
}

impl Error {
    pub fn timeout(ms: u64, operation: impl Into<String>) -> Self {
        Self::Timeout {
            ms,
            operation: operation.into(),
        }
    }

    /// Message as it should appear in a JSON-RPC error object.
    ///
    /// Handler failures and remote errors surface their original text, everything
    /// else keeps its category prefix.
    pub fn rpc_message(&self) -> String {
        match self {
            Self::Rpc { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_display() {
        let err = Error::timeout(5000, "fill");
        assert_eq!(err.to_string(), "Timeout after 5000ms: fill");
    }

    #[test]
    fn test_tool_error_is_verbatim() {
        let err = Error::Tool("PDF export requires headless mode".into());
        assert_eq!(err.rpc_message(), "PDF export requires headless mode");
    }

    #[test]
    fn test_rpc_message_strips_code() {
        let err = Error::Rpc {
            code: -32601,
            message: "Unknown method: foo".into(),
        };
        assert_eq!(err.to_string(), "RPC error -32601: Unknown method: foo");
        assert_eq!(err.rpc_message(), "Unknown method: foo");
    }
}
