//! Error types for node access

use thiserror::Error;

/// Result type for node operations
pub type Result<T> = std::result::Result<T, Error>;

/// Node errors
#[derive(Error, Debug)]
pub enum Error {
    /// Resource absent at every queried node
    #[error("Not found: {resource}")]
    NotFound {
        /// Which resource was requested (kind and id)
        resource: String,
    },

    /// Node unreachable or request failed in flight
    #[error("Transport error from node {node}: {message}")]
    Transport {
        /// Node name
        node: String,
        /// Error message
        message: String,
    },

    /// Request exceeded the configured timeout
    #[error("Request to node {node} timed out after {millis}ms")]
    Timeout {
        /// Node name
        node: String,
        /// Timeout in milliseconds
        millis: u64,
    },

    /// Node answered with something unusable
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Malformed identifier
    #[error("Invalid identifier: {0}")]
    InvalidId(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// Pool constructed without nodes
    #[error("No nodes configured")]
    NoNodes,

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Shorthand for a [`Error::NotFound`] on a resource kind and id
    pub fn not_found(kind: &str, id: impl std::fmt::Display) -> Self {
        Error::NotFound {
            resource: format!("{} {}", kind, id),
        }
    }

    /// Transport failures and timeouts may succeed when repeated
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Transport { .. } | Error::Timeout { .. })
    }

    /// Whether the resource was absent
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        let transport = Error::Transport {
            node: "node-a".to_string(),
            message: "connection refused".to_string(),
        };
        assert!(transport.is_transient());

        let timeout = Error::Timeout {
            node: "node-a".to_string(),
            millis: 500,
        };
        assert!(timeout.is_transient());

        let missing = Error::not_found("output", "0x00:1");
        assert!(!missing.is_transient());
        assert!(missing.is_not_found());
        assert_eq!(missing.to_string(), "Not found: output 0x00:1");
    }
}
