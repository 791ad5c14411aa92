//! SMB2/3 wire messages.
//!
//! Outbound messages are owned structs implementing [`Request`], serialized
//! into caller-provided buffers. Inbound messages are read through borrowing
//! decoders (`PacketCodec`, `NegotiateResponseDecoder`, ...) that never
//! allocate and expose an `is_invalid()` predicate instead of a fallible
//! constructor, so a receive loop can probe a frame against several layouts
//! cheaply.

#![forbid(unsafe_code)]

pub mod cancel;
pub mod echo;
pub mod error;
pub mod header;
pub mod negotiate;
pub mod session_setup;
pub mod transform;
pub mod tree_connect;

pub use cancel::CancelRequest;
pub use echo::EchoRequest;
pub use error::{ErrorContextResponseDecoder, ErrorResponseDecoder};
pub use header::{status, Command, Header, HeaderFlags, PacketCodec};
pub use negotiate::{
    CipherContextDataDecoder, Dialect, EncryptionCapabilities, EncryptionCipher,
    GlobalCapabilities, HashAlgorithm, HashContextDataDecoder, NegotiateContextDecoder,
    NegotiateRequest, NegotiateResponseDecoder, NegotiateSecurityMode,
    PreauthIntegrityCapabilities, ENCRYPTION_CAPABILITIES, PREAUTH_INTEGRITY_CAPABILITIES,
    SMB2_WILDCARD_DIALECT,
};
pub use session_setup::{
    LogoffRequest, SessionFlags, SessionSetupRequest, SessionSetupResponseDecoder,
};
pub use transform::{TransformCodec, TransformHeader};
pub use tree_connect::{
    ShareFlags, TreeConnectRequest, TreeConnectResponseDecoder, TreeDisconnectRequest,
};

/// Errors for typed views over wire values.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SmbMsgError {
    #[error("unknown dialect revision {0:#06x}")]
    UnknownDialect(u16),
    #[error("unknown command code {0:#06x}")]
    UnknownCommand(u16),
    #[error("unknown cipher id {0:#06x}")]
    UnknownCipher(u16),
    #[error("unknown hash algorithm id {0:#06x}")]
    UnknownHashAlgorithm(u16),
}

pub type Result<T> = std::result::Result<T, SmbMsgError>;

/// An outbound SMB2 message: a [`Header`] plus a command body, serializable
/// into a contiguous buffer.
pub trait Request: Send {
    fn header(&self) -> &Header;
    fn header_mut(&mut self) -> &mut Header;
    /// Total serialized size in bytes, header included.
    fn size(&self) -> usize;
    /// Encodes into `buf`, which must be exactly [`Request::size`] bytes.
    fn encode(&self, buf: &mut [u8]);
}

/// Rounds `n` up to the SMB2 8-byte alignment boundary.
pub(crate) fn align8(n: usize) -> usize {
    (n + 7) & !7
}
