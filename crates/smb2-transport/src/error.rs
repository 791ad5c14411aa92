use std::sync::Arc;

/// Transport-level failures.
///
/// `Clone` so a single terminal error can be fanned out to every request
/// still waiting on the connection.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    #[error("i/o error: {0}")]
    Io(Arc<std::io::Error>),
    #[error("connection closed")]
    Closed,
    #[error("frame of {0} bytes exceeds the 24-bit frame length space")]
    FrameTooLarge(usize),
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> TransportError {
        TransportError::Io(Arc::new(err))
    }
}
