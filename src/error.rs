use thiserror::Error;

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Stable classification of broker failures, used by the transport layer to
/// pick a status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidRequest,
    DependencyUnavailable,
    SignatureExpired,
    StagingFailed,
    TransferFailed,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidRequest => "INVALID_REQUEST",
            ErrorKind::DependencyUnavailable => "DEPENDENCY_UNAVAILABLE",
            ErrorKind::SignatureExpired => "SIGNATURE_EXPIRED",
            ErrorKind::StagingFailed => "STAGING_FAILED",
            ErrorKind::TransferFailed => "TRANSFER_FAILED",
        }
    }
}

#[derive(Error, Debug)]
pub enum BrokerError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Dependency unavailable: {message}")]
    DependencyUnavailable {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    #[error("Signature expired: {0}")]
    SignatureExpired(String),

    #[error("Staging failed: {message}")]
    StagingFailed {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    #[error("Transfer failed: {message}")]
    TransferFailed {
        message: String,
        #[source]
        source: Option<BoxError>,
    },
}

impl BrokerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BrokerError::InvalidRequest(_) => ErrorKind::InvalidRequest,
            BrokerError::DependencyUnavailable { .. } => ErrorKind::DependencyUnavailable,
            BrokerError::SignatureExpired(_) => ErrorKind::SignatureExpired,
            BrokerError::StagingFailed { .. } => ErrorKind::StagingFailed,
            BrokerError::TransferFailed { .. } => ErrorKind::TransferFailed,
        }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        BrokerError::InvalidRequest(message.into())
    }

    pub fn expired(message: impl Into<String>) -> Self {
        BrokerError::SignatureExpired(message.into())
    }

    pub fn dependency(message: impl Into<String>, source: impl Into<BoxError>) -> Self {
        BrokerError::DependencyUnavailable {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    pub fn dependency_msg(message: impl Into<String>) -> Self {
        BrokerError::DependencyUnavailable {
            message: message.into(),
            source: None,
        }
    }

    pub fn staging(message: impl Into<String>, source: impl Into<BoxError>) -> Self {
        BrokerError::StagingFailed {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    pub fn transfer(message: impl Into<String>, source: impl Into<BoxError>) -> Self {
        BrokerError::TransferFailed {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    pub fn transfer_msg(message: impl Into<String>) -> Self {
        BrokerError::TransferFailed {
            message: message.into(),
            source: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_kind_is_inspectable() {
        assert_eq!(
            BrokerError::invalid("bad name").kind(),
            ErrorKind::InvalidRequest
        );
        assert_eq!(
            BrokerError::expired("gone").kind(),
            ErrorKind::SignatureExpired
        );
        assert_eq!(
            BrokerError::transfer_msg("cancelled").kind(),
            ErrorKind::TransferFailed
        );
    }

    #[test]
    fn test_transfer_failure_keeps_cause_chain() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "peer reset");
        let err = BrokerError::transfer("part 3 failed", io);

        assert_eq!(err.to_string(), "Transfer failed: part 3 failed");
        let source = err.source().expect("source should be preserved");
        assert_eq!(source.to_string(), "peer reset");
    }

    #[test]
    fn test_anyhow_source_converts() {
        let err = BrokerError::dependency("cache unreachable", anyhow::anyhow!("timeout"));
        assert_eq!(err.kind(), ErrorKind::DependencyUnavailable);
        assert!(err.source().is_some());
    }
}
