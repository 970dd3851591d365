//! Error types for response parsing.

/// Error type for streaming response parsing.
///
/// Incompleteness is not an error here: the reader reports it through its
/// progress result so the connection keeps buffering. These variants are the
/// fatal outcomes.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    /// The server sent a line the client does not recognise. Indicates a
    /// client-side programming error or a non-memcache peer.
    #[error("protocol error: {0}")]
    Protocol(&'static str),

    /// A numeric field failed to parse.
    #[error("invalid number")]
    InvalidNumber,

    /// The server reported `SERVER_ERROR`. Soft: the reply itself is
    /// well-formed and has been recorded as a message result.
    #[error("server error")]
    Server,
}

impl ParseError {
    /// Returns true for errors the pool maps to a dead-with-retry-delay
    /// connection (as opposed to the soft `SERVER_ERROR` path).
    #[inline]
    pub fn is_client_bug(&self) -> bool {
        !matches!(self, ParseError::Server)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        assert!(ParseError::Protocol("x").is_client_bug());
        assert!(ParseError::InvalidNumber.is_client_bug());
        assert!(!ParseError::Server.is_client_bug());
    }

    #[test]
    fn display() {
        assert_eq!(
            format!("{}", ParseError::Protocol("bad token")),
            "protocol error: bad token"
        );
        assert_eq!(format!("{}", ParseError::InvalidNumber), "invalid number");
    }
}
