//! Error taxonomy of the client core.

use smb2_transport::TransportError;

/// Errors surfaced by the connection core.
///
/// `Clone` so a single terminal failure can drain every request still
/// pending on the connection.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// The transport failed. Terminal for the connection.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// The server sent something the client cannot accept: a malformed
    /// frame, an unverifiable signature, an unknown session or message id.
    /// Terminal for the connection.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// The server answered a request with a non-success NT status. Scoped
    /// to the request that caused it.
    #[error("{0}")]
    Response(ResponseError),

    /// A local failure: CSPRNG, key material handling, API misuse.
    #[error("internal error: {0}")]
    Internal(String),
}

/// A non-success NT status, with any error contexts the server attached.
///
/// The two wire shapes are preserved rather than merged: with
/// `context_count == 0` the single `contexts` entry holds the raw remaining
/// error data; a nonzero count yields one entry per ERROR Context structure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseError {
    pub nt_status: u32,
    pub context_count: u8,
    pub contexts: Vec<Vec<u8>>,
}

impl std::fmt::Display for ResponseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.context_count == 0 {
            write!(f, "server responded with status {:#010x}", self.nt_status)
        } else {
            write!(
                f,
                "server responded with status {:#010x} ({} error contexts)",
                self.nt_status, self.context_count
            )
        }
    }
}

impl ResponseError {
    pub fn status(&self) -> u32 {
        self.nt_status
    }
}
