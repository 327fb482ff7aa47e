#[derive(Debug, Clone, thiserror::Error)]
pub enum CollabError {
    #[error("invalid identity: {0}")]
    InvalidIdentity(String),

    #[error("transport error: {0}")]
    Transport(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ConsoleError {
    #[error(transparent)]
    Collab(#[from] CollabError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("store error: {0}")]
    Store(String),

    #[error("auth error: {0}")]
    Auth(String),

    #[error("{0}")]
    Other(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collab_error_display() {
        let err = CollabError::InvalidIdentity("missing id".into());
        assert_eq!(err.to_string(), "invalid identity: missing id");

        let err = CollabError::Transport("socket closed".into());
        assert_eq!(err.to_string(), "transport error: socket closed");
    }

    #[test]
    fn console_error_from_collab() {
        let collab_err = CollabError::Transport("socket closed".into());
        let console_err: ConsoleError = collab_err.into();
        assert!(matches!(console_err, ConsoleError::Collab(_)));
        assert_eq!(console_err.to_string(), "transport error: socket closed");
    }

    #[test]
    fn console_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file missing");
        let console_err: ConsoleError = io_err.into();
        assert!(matches!(console_err, ConsoleError::Io(_)));
        assert!(console_err.to_string().contains("file missing"));
    }

    #[test]
    fn console_error_other_variants() {
        let err = ConsoleError::Store("row not found".into());
        assert_eq!(err.to_string(), "store error: row not found");

        let err = ConsoleError::Auth("token expired".into());
        assert_eq!(err.to_string(), "auth error: token expired");

        let err = ConsoleError::Other("something went wrong".into());
        assert_eq!(err.to_string(), "something went wrong");
    }
}
