//! Transform (encrypted) message header.

/// Outer header wrapping an AEAD-encrypted SMB2 message.
///
/// The nonce field is transmitted as 16 bytes; depending on the cipher only
/// the first 11 (AES-CCM) or 12 (AES-GCM) bytes are significant and the rest
/// are zero.
///
/// Reference: MS-SMB2 2.2.41
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformHeader {
    /// AEAD tag of the encrypted payload.
    pub signature: [u8; 16],
    /// Per-message nonce; must never repeat within a session.
    pub nonce: [u8; 16],
    /// Size, in bytes, of the wrapped plain SMB2 message.
    pub original_message_size: u32,
    /// Session the wrapped message belongs to.
    pub session_id: u64,
}

impl TransformHeader {
    pub const STRUCT_SIZE: usize = 52;
    pub const PROTOCOL_ID: [u8; 4] = [0xFD, b'S', b'M', b'B'];

    /// Flags value for an encrypted transform (the only defined value).
    pub const FLAG_ENCRYPTED: u16 = 0x0001;

    const AEAD_OFFSET: usize = 20;
    const AEAD_SIZE: usize = Self::STRUCT_SIZE - Self::AEAD_OFFSET;

    /// Serializes the header into the first 52 bytes of `buf`.
    pub fn encode(&self, buf: &mut [u8]) {
        buf[0..4].copy_from_slice(&Self::PROTOCOL_ID);
        buf[4..20].copy_from_slice(&self.signature);
        buf[20..36].copy_from_slice(&self.nonce);
        buf[36..40].copy_from_slice(&self.original_message_size.to_le_bytes());
        buf[40..42].copy_from_slice(&0u16.to_le_bytes());
        buf[42..44].copy_from_slice(&Self::FLAG_ENCRYPTED.to_le_bytes());
        buf[44..52].copy_from_slice(&self.session_id.to_le_bytes());
    }

    /// The additional authenticated data for the AEAD: the encoded header
    /// minus protocol id and signature. Call once all fields other than the
    /// signature are final.
    pub fn aead_bytes(&self) -> [u8; Self::AEAD_SIZE] {
        let mut buf = [0u8; Self::STRUCT_SIZE];
        self.encode(&mut buf);
        buf[Self::AEAD_OFFSET..].try_into().unwrap()
    }
}

/// Borrowing view over an encoded transform message.
#[derive(Debug, Clone, Copy)]
pub struct TransformCodec<'a>(&'a [u8]);

impl<'a> TransformCodec<'a> {
    pub fn new(pkt: &'a [u8]) -> TransformCodec<'a> {
        TransformCodec(pkt)
    }

    /// True when the buffer cannot hold a transform message.
    pub fn is_invalid(&self) -> bool {
        self.0.len() < TransformHeader::STRUCT_SIZE
            || self.0[0..4] != TransformHeader::PROTOCOL_ID
    }

    pub fn signature(&self) -> [u8; 16] {
        self.0[4..20].try_into().unwrap()
    }

    pub fn nonce(&self) -> [u8; 16] {
        self.0[20..36].try_into().unwrap()
    }

    pub fn original_message_size(&self) -> u32 {
        u32::from_le_bytes(self.0[36..40].try_into().unwrap())
    }

    pub fn flags(&self) -> u16 {
        u16::from_le_bytes(self.0[42..44].try_into().unwrap())
    }

    pub fn session_id(&self) -> u64 {
        u64::from_le_bytes(self.0[44..52].try_into().unwrap())
    }

    /// The additional authenticated data slice of the encoded header.
    pub fn aead_bytes(&self) -> &'a [u8] {
        &self.0[TransformHeader::AEAD_OFFSET..TransformHeader::STRUCT_SIZE]
    }

    /// The encrypted payload following the header.
    pub fn data(&self) -> &'a [u8] {
        &self.0[TransformHeader::STRUCT_SIZE..]
    }
}
