//! NEGOTIATE request/response and negotiate-context TLVs.

use modular_bitfield::prelude::*;

use crate::align8;
use crate::header::{Command, Header};
use crate::Request;

/// SMB2/SMB3 protocol dialect revisions.
///
/// Reference: MS-SMB2 2.2.3
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Copy, Clone)]
#[repr(u16)]
pub enum Dialect {
    Smb0202 = 0x0202,
    Smb0210 = 0x0210,
    Smb0300 = 0x0300,
    Smb0302 = 0x0302,
    Smb0311 = 0x0311,
}

/// Wildcard dialect revision ("SMB 2.???") a server may answer with during
/// multi-protocol negotiation.
pub const SMB2_WILDCARD_DIALECT: u16 = 0x02FF;

impl Dialect {
    pub const ALL: [Dialect; 5] = [
        Dialect::Smb0202,
        Dialect::Smb0210,
        Dialect::Smb0300,
        Dialect::Smb0302,
        Dialect::Smb0311,
    ];

    /// Whether this is an SMB3 dialect.
    #[inline]
    pub fn is_smb3(&self) -> bool {
        self >= &Dialect::Smb0300
    }
}

impl TryFrom<u16> for Dialect {
    type Error = crate::SmbMsgError;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        Ok(match value {
            0x0202 => Dialect::Smb0202,
            0x0210 => Dialect::Smb0210,
            0x0300 => Dialect::Smb0300,
            0x0302 => Dialect::Smb0302,
            0x0311 => Dialect::Smb0311,
            _ => return Err(crate::SmbMsgError::UnknownDialect(value)),
        })
    }
}

/// Flags for SMB2 negotiation security mode.
///
/// Reference: MS-SMB2 2.2.3
#[bitfield]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NegotiateSecurityMode {
    /// Signing is enabled.
    pub signing_enabled: bool,
    /// Signing is required.
    pub signing_required: bool,
    #[skip]
    __: B14,
}

/// Global capabilities flags for SMB2/SMB3.
///
/// Reference: MS-SMB2 2.2.3
#[bitfield]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GlobalCapabilities {
    /// DFS support.
    pub dfs: bool,
    /// File leasing support.
    pub leasing: bool,
    /// Large MTU support (multiple credit operations).
    pub large_mtu: bool,
    /// Multi-channel support.
    pub multi_channel: bool,
    /// Persistent handles support.
    pub persistent_handles: bool,
    /// Directory leasing support.
    pub directory_leasing: bool,
    /// Encryption support.
    pub encryption: bool,
    /// Change notifications support.
    pub notifications: bool,
    #[skip]
    __: B24,
}

/// Negotiate context type identifiers.
///
/// Reference: MS-SMB2 2.2.3.1
pub const PREAUTH_INTEGRITY_CAPABILITIES: u16 = 0x0001;
pub const ENCRYPTION_CAPABILITIES: u16 = 0x0002;

/// Hash algorithms for pre-authentication integrity.
///
/// Reference: MS-SMB2 2.2.3.1.1
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
#[repr(u16)]
pub enum HashAlgorithm {
    Sha512 = 0x0001,
}

impl TryFrom<u16> for HashAlgorithm {
    type Error = crate::SmbMsgError;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            0x0001 => Ok(HashAlgorithm::Sha512),
            _ => Err(crate::SmbMsgError::UnknownHashAlgorithm(value)),
        }
    }
}

/// Encryption cipher identifiers.
///
/// Reference: MS-SMB2 2.2.3.1.2
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
#[repr(u16)]
pub enum EncryptionCipher {
    Aes128Ccm = 0x0001,
    Aes128Gcm = 0x0002,
}

impl TryFrom<u16> for EncryptionCipher {
    type Error = crate::SmbMsgError;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            0x0001 => Ok(EncryptionCipher::Aes128Ccm),
            0x0002 => Ok(EncryptionCipher::Aes128Gcm),
            _ => Err(crate::SmbMsgError::UnknownCipher(value)),
        }
    }
}

/// (Context) Pre-authentication integrity capabilities.
///
/// Reference: MS-SMB2 2.2.3.1.1
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreauthIntegrityCapabilities {
    pub hash_algorithms: Vec<HashAlgorithm>,
    pub salt: Vec<u8>,
}

impl PreauthIntegrityCapabilities {
    fn data_size(&self) -> usize {
        4 + 2 * self.hash_algorithms.len() + self.salt.len()
    }

    fn encode_data(&self, buf: &mut [u8]) {
        buf[0..2].copy_from_slice(&(self.hash_algorithms.len() as u16).to_le_bytes());
        buf[2..4].copy_from_slice(&(self.salt.len() as u16).to_le_bytes());
        let mut off = 4;
        for alg in &self.hash_algorithms {
            buf[off..off + 2].copy_from_slice(&(*alg as u16).to_le_bytes());
            off += 2;
        }
        buf[off..off + self.salt.len()].copy_from_slice(&self.salt);
    }
}

/// (Context) Encryption capabilities.
///
/// Reference: MS-SMB2 2.2.3.1.2
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptionCapabilities {
    pub ciphers: Vec<EncryptionCipher>,
}

impl EncryptionCapabilities {
    fn data_size(&self) -> usize {
        2 + 2 * self.ciphers.len()
    }

    fn encode_data(&self, buf: &mut [u8]) {
        buf[0..2].copy_from_slice(&(self.ciphers.len() as u16).to_le_bytes());
        let mut off = 2;
        for cipher in &self.ciphers {
            buf[off..off + 2].copy_from_slice(&(*cipher as u16).to_le_bytes());
            off += 2;
        }
    }
}

/// SMB2 NEGOTIATE Request.
///
/// Used by the client to announce the dialects it understands and, for
/// 3.1.1, its preauth-integrity and encryption parameters.
///
/// Reference: MS-SMB2 2.2.3
#[derive(Debug, Clone)]
pub struct NegotiateRequest {
    pub header: Header,
    pub security_mode: NegotiateSecurityMode,
    pub capabilities: GlobalCapabilities,
    pub client_guid: [u8; 16],
    pub dialects: Vec<Dialect>,
    /// Preauth-integrity context, attached when 3.1.1 is offered.
    pub preauth_integrity: Option<PreauthIntegrityCapabilities>,
    /// Encryption context, attached when 3.1.1 is offered.
    pub encryption: Option<EncryptionCapabilities>,
}

impl NegotiateRequest {
    const BODY_FIXED_SIZE: usize = 36;

    pub fn new(
        security_mode: NegotiateSecurityMode,
        capabilities: GlobalCapabilities,
        client_guid: [u8; 16],
        dialects: Vec<Dialect>,
    ) -> NegotiateRequest {
        NegotiateRequest {
            header: Header::new(Command::Negotiate),
            security_mode,
            capabilities,
            client_guid,
            dialects,
            preauth_integrity: None,
            encryption: None,
        }
    }

    fn context_sizes(&self) -> [Option<usize>; 2] {
        [
            self.preauth_integrity.as_ref().map(|c| 8 + c.data_size()),
            self.encryption.as_ref().map(|c| 8 + c.data_size()),
        ]
    }

    fn context_count(&self) -> u16 {
        self.context_sizes().iter().flatten().count() as u16
    }
}

impl Request for NegotiateRequest {
    fn header(&self) -> &Header {
        &self.header
    }

    fn header_mut(&mut self) -> &mut Header {
        &mut self.header
    }

    fn size(&self) -> usize {
        let mut size = Header::STRUCT_SIZE + Self::BODY_FIXED_SIZE + 2 * self.dialects.len();
        let contexts: Vec<usize> = self.context_sizes().into_iter().flatten().collect();
        if !contexts.is_empty() {
            size = align8(size);
            for (i, ctx) in contexts.iter().enumerate() {
                size += ctx;
                if i + 1 < contexts.len() {
                    size = align8(size);
                }
            }
        }
        size
    }

    fn encode(&self, buf: &mut [u8]) {
        self.header.encode(buf);
        let body = &mut buf[Header::STRUCT_SIZE..];
        body[0..2].copy_from_slice(&(Self::BODY_FIXED_SIZE as u16).to_le_bytes());
        body[2..4].copy_from_slice(&(self.dialects.len() as u16).to_le_bytes());
        body[4..6].copy_from_slice(&self.security_mode.into_bytes());
        body[6..8].copy_from_slice(&0u16.to_le_bytes());
        body[8..12].copy_from_slice(&self.capabilities.into_bytes());
        body[12..28].copy_from_slice(&self.client_guid);
        // context offset/count are filled below once known
        body[34..36].copy_from_slice(&0u16.to_le_bytes());

        let mut off = Self::BODY_FIXED_SIZE;
        for dialect in &self.dialects {
            body[off..off + 2].copy_from_slice(&(*dialect as u16).to_le_bytes());
            off += 2;
        }

        if self.context_count() == 0 {
            body[28..32].copy_from_slice(&0u32.to_le_bytes());
            body[32..34].copy_from_slice(&0u16.to_le_bytes());
            return;
        }

        // contexts start 8-byte aligned, measured from the packet start
        let mut abs = align8(Header::STRUCT_SIZE + off);
        body[28..32].copy_from_slice(&(abs as u32).to_le_bytes());
        body[32..34].copy_from_slice(&self.context_count().to_le_bytes());
        for pad in &mut body[off..abs - Header::STRUCT_SIZE] {
            *pad = 0;
        }

        let count = self.context_count();
        let mut written = 0u16;
        if let Some(preauth) = &self.preauth_integrity {
            let data_size = preauth.data_size();
            let at = abs - Header::STRUCT_SIZE;
            body[at..at + 2].copy_from_slice(&PREAUTH_INTEGRITY_CAPABILITIES.to_le_bytes());
            body[at + 2..at + 4].copy_from_slice(&(data_size as u16).to_le_bytes());
            body[at + 4..at + 8].copy_from_slice(&0u32.to_le_bytes());
            preauth.encode_data(&mut body[at + 8..at + 8 + data_size]);
            written += 1;
            let end = abs + 8 + data_size;
            let next = if written < count { align8(end) } else { end };
            for pad in &mut body[end - Header::STRUCT_SIZE..next - Header::STRUCT_SIZE] {
                *pad = 0;
            }
            abs = next;
        }
        if let Some(encryption) = &self.encryption {
            let data_size = encryption.data_size();
            let at = abs - Header::STRUCT_SIZE;
            body[at..at + 2].copy_from_slice(&ENCRYPTION_CAPABILITIES.to_le_bytes());
            body[at + 2..at + 4].copy_from_slice(&(data_size as u16).to_le_bytes());
            body[at + 4..at + 8].copy_from_slice(&0u32.to_le_bytes());
            encryption.encode_data(&mut body[at + 8..at + 8 + data_size]);
        }
    }
}

/// Borrowing view over a NEGOTIATE response body (the bytes following the
/// packet header).
///
/// Reference: MS-SMB2 2.2.4
#[derive(Debug, Clone, Copy)]
pub struct NegotiateResponseDecoder<'a>(&'a [u8]);

impl<'a> NegotiateResponseDecoder<'a> {
    const BODY_FIXED_SIZE: usize = 64;
    const STRUCTURE_SIZE: u16 = 65;

    pub fn new(data: &'a [u8]) -> NegotiateResponseDecoder<'a> {
        NegotiateResponseDecoder(data)
    }

    pub fn is_invalid(&self) -> bool {
        if self.0.len() < Self::BODY_FIXED_SIZE {
            return true;
        }
        if self.u16_at(0) != Self::STRUCTURE_SIZE {
            return true;
        }
        // the security buffer and context list offsets are header-relative
        let sec_len = self.u16_at(58) as usize;
        let sec_off = self.u16_at(56) as usize;
        if sec_len > 0
            && (sec_off < Header::STRUCT_SIZE + Self::BODY_FIXED_SIZE
                || sec_off - Header::STRUCT_SIZE + sec_len > self.0.len())
        {
            return true;
        }
        if self.negotiate_context_count() > 0 {
            let ctx_off = self.u32_at(60) as usize;
            if ctx_off < Header::STRUCT_SIZE + Self::BODY_FIXED_SIZE
                || ctx_off - Header::STRUCT_SIZE > self.0.len()
            {
                return true;
            }
        }
        false
    }

    fn u16_at(&self, off: usize) -> u16 {
        u16::from_le_bytes(self.0[off..off + 2].try_into().unwrap())
    }

    fn u32_at(&self, off: usize) -> u32 {
        u32::from_le_bytes(self.0[off..off + 4].try_into().unwrap())
    }

    pub fn security_mode(&self) -> NegotiateSecurityMode {
        NegotiateSecurityMode::from_bytes(self.0[2..4].try_into().unwrap())
    }

    pub fn dialect_revision(&self) -> u16 {
        self.u16_at(4)
    }

    pub fn negotiate_context_count(&self) -> u16 {
        self.u16_at(6)
    }

    pub fn server_guid(&self) -> [u8; 16] {
        self.0[8..24].try_into().unwrap()
    }

    pub fn capabilities(&self) -> GlobalCapabilities {
        GlobalCapabilities::from_bytes(self.0[24..28].try_into().unwrap())
    }

    pub fn max_transact_size(&self) -> u32 {
        self.u32_at(28)
    }

    pub fn max_read_size(&self) -> u32 {
        self.u32_at(32)
    }

    pub fn max_write_size(&self) -> u32 {
        self.u32_at(36)
    }

    pub fn system_time(&self) -> u64 {
        u64::from_le_bytes(self.0[40..48].try_into().unwrap())
    }

    pub fn server_start_time(&self) -> u64 {
        u64::from_le_bytes(self.0[48..56].try_into().unwrap())
    }

    /// The GSS-API token offered by the server.
    pub fn security_buffer(&self) -> &'a [u8] {
        let off = self.u16_at(56) as usize;
        let len = self.u16_at(58) as usize;
        if len == 0 {
            return &[];
        }
        &self.0[off - Header::STRUCT_SIZE..off - Header::STRUCT_SIZE + len]
    }

    /// The raw negotiate-context list; walk it with
    /// [`NegotiateContextDecoder`].
    pub fn negotiate_context_list(&self) -> &'a [u8] {
        if self.negotiate_context_count() == 0 {
            return &[];
        }
        &self.0[self.u32_at(60) as usize - Header::STRUCT_SIZE..]
    }
}

/// Borrowing view over a single negotiate context TLV.
///
/// Reference: MS-SMB2 2.2.3.1
#[derive(Debug, Clone, Copy)]
pub struct NegotiateContextDecoder<'a>(&'a [u8]);

impl<'a> NegotiateContextDecoder<'a> {
    pub fn new(data: &'a [u8]) -> NegotiateContextDecoder<'a> {
        NegotiateContextDecoder(data)
    }

    pub fn is_invalid(&self) -> bool {
        self.0.len() < 8 || 8 + self.data_length() as usize > self.0.len()
    }

    pub fn context_type(&self) -> u16 {
        u16::from_le_bytes(self.0[0..2].try_into().unwrap())
    }

    pub fn data_length(&self) -> u16 {
        u16::from_le_bytes(self.0[2..4].try_into().unwrap())
    }

    pub fn data(&self) -> &'a [u8] {
        &self.0[8..8 + self.data_length() as usize]
    }

    /// Offset of the next context: the TLV length padded to 8-byte
    /// alignment. For the final context this may point past the list end.
    pub fn next(&self) -> usize {
        align8(8 + self.data_length() as usize)
    }
}

/// Borrowing view over PREAUTH_INTEGRITY_CAPABILITIES context data.
#[derive(Debug, Clone, Copy)]
pub struct HashContextDataDecoder<'a>(&'a [u8]);

impl<'a> HashContextDataDecoder<'a> {
    pub fn new(data: &'a [u8]) -> HashContextDataDecoder<'a> {
        HashContextDataDecoder(data)
    }

    pub fn is_invalid(&self) -> bool {
        if self.0.len() < 4 {
            return true;
        }
        let algs = self.hash_algorithm_count() as usize;
        let salt = self.salt_length() as usize;
        4 + 2 * algs + salt > self.0.len()
    }

    pub fn hash_algorithm_count(&self) -> u16 {
        u16::from_le_bytes(self.0[0..2].try_into().unwrap())
    }

    pub fn salt_length(&self) -> u16 {
        u16::from_le_bytes(self.0[2..4].try_into().unwrap())
    }

    pub fn hash_algorithm(&self, i: usize) -> u16 {
        u16::from_le_bytes(self.0[4 + 2 * i..6 + 2 * i].try_into().unwrap())
    }

    pub fn salt(&self) -> &'a [u8] {
        let start = 4 + 2 * self.hash_algorithm_count() as usize;
        &self.0[start..start + self.salt_length() as usize]
    }
}

/// Borrowing view over ENCRYPTION_CAPABILITIES context data.
#[derive(Debug, Clone, Copy)]
pub struct CipherContextDataDecoder<'a>(&'a [u8]);

impl<'a> CipherContextDataDecoder<'a> {
    pub fn new(data: &'a [u8]) -> CipherContextDataDecoder<'a> {
        CipherContextDataDecoder(data)
    }

    pub fn is_invalid(&self) -> bool {
        self.0.len() < 2 || 2 + 2 * self.cipher_count() as usize > self.0.len()
    }

    pub fn cipher_count(&self) -> u16 {
        u16::from_le_bytes(self.0[0..2].try_into().unwrap())
    }

    pub fn cipher(&self, i: usize) -> u16 {
        u16::from_le_bytes(self.0[2 + 2 * i..4 + 2 * i].try_into().unwrap())
    }
}
