//! Negotiated connection parameters.

use smb2_msg::{Dialect, EncryptionCipher, GlobalCapabilities, HashAlgorithm};

/// Parameters settled by a successful NEGOTIATE exchange.
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    pub dialect: Dialect,
    /// Signing demanded by either side of the handshake.
    pub require_signing: bool,
    /// Capabilities supported by both client and server.
    pub capabilities: GlobalCapabilities,
    pub max_transact_size: u32,
    pub max_read_size: u32,
    pub max_write_size: u32,
    pub server_guid: [u8; 16],
    pub client_guid: [u8; 16],
    /// Preauth integrity hash algorithm (3.1.1 only).
    pub preauth_hash_id: Option<HashAlgorithm>,
    /// Negotiated cipher (3.1.1 only).
    pub cipher_id: Option<EncryptionCipher>,
}

impl ConnectionInfo {
    /// The cipher for transform-wrapped traffic: the negotiated one on
    /// 3.1.1, AES-128-CCM on earlier SMB3 dialects.
    pub fn cipher(&self) -> EncryptionCipher {
        self.cipher_id.unwrap_or(EncryptionCipher::Aes128Ccm)
    }
}
