//! Operation outcome codes.

/// Outcome of one pooled operation, recorded while the wait loop runs.
///
/// Per-connection failures overwrite the code (last writer wins) but leave
/// the rest of the batch running; poll-level failures abort the wait and
/// take priority unconditionally.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ErrorCode {
    #[default]
    Ok,
    /// Nothing was dispatched because every key failed validation.
    InvalidKey,
    /// The server said `SERVER_ERROR`, or no server was selectable.
    McServer,
    /// A socket write failed.
    Send,
    /// A socket read failed or hit EOF.
    Recv,
    /// `POLLERR`/`POLLHUP`/`POLLNVAL` on one descriptor.
    ConnPoll,
    /// The poll call itself failed (non-EINTR).
    Poll,
    /// The poll call timed out.
    PollTimeout,
    /// The response could not be parsed.
    Programming,
}

impl ErrorCode {
    pub fn is_ok(self) -> bool {
        self == ErrorCode::Ok
    }

    /// Project the code into a `Result` for the public client surface.
    pub fn into_result(self) -> Result<(), Error> {
        match self {
            ErrorCode::Ok => Ok(()),
            ErrorCode::InvalidKey => Err(Error::InvalidKey),
            ErrorCode::McServer => Err(Error::Server),
            ErrorCode::Send => Err(Error::Send),
            ErrorCode::Recv => Err(Error::Recv),
            ErrorCode::ConnPoll => Err(Error::ConnPoll),
            ErrorCode::Poll => Err(Error::Poll),
            ErrorCode::PollTimeout => Err(Error::PollTimeout),
            ErrorCode::Programming => Err(Error::Protocol),
        }
    }
}

/// Errors returned by [`Client`](crate::Client) operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// Every key in the batch failed validation, so nothing was sent.
    #[error("no valid key in batch")]
    InvalidKey,

    /// A server replied `SERVER_ERROR`, or no live server was selectable
    /// for any key in the batch.
    #[error("server error or no server available")]
    Server,

    /// A socket write failed; the connection was closed for reconnect.
    #[error("send failed")]
    Send,

    /// A socket read failed or the server closed the connection.
    #[error("receive failed")]
    Recv,

    /// A connection's descriptor reported an error or hangup.
    #[error("connection readiness error")]
    ConnPoll,

    /// The readiness poll failed; every awaited connection was reset.
    #[error("poll failed")]
    Poll,

    /// No awaited connection became ready within the poll timeout; every
    /// awaited connection was reset.
    #[error("poll timed out")]
    PollTimeout,

    /// A reply could not be parsed (client bug or non-memcache peer).
    #[error("unparseable response")]
    Protocol,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ok_projects_to_ok() {
        assert!(ErrorCode::Ok.into_result().is_ok());
        assert!(ErrorCode::Ok.is_ok());
    }

    #[test]
    fn codes_project_to_matching_errors() {
        assert_eq!(ErrorCode::InvalidKey.into_result(), Err(Error::InvalidKey));
        assert_eq!(ErrorCode::McServer.into_result(), Err(Error::Server));
        assert_eq!(ErrorCode::PollTimeout.into_result(), Err(Error::PollTimeout));
        assert_eq!(ErrorCode::Programming.into_result(), Err(Error::Protocol));
    }
}
