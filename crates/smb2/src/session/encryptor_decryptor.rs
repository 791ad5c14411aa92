//! Message encryption/decryption implementation.

use rand::rngs::OsRng;
use rand::RngCore;

use smb2_msg::{TransformCodec, TransformHeader};

use crate::crypto::EncryptingAlgo;
use crate::Error;

/// Seals plain messages into transform-wrapped frames.
#[derive(Debug, Clone)]
pub struct MessageEncryptor {
    algo: Box<dyn EncryptingAlgo>,
}

impl MessageEncryptor {
    pub fn new(algo: Box<dyn EncryptingAlgo>) -> MessageEncryptor {
        MessageEncryptor { algo }
    }

    /// Encrypts an encoded message and returns the transform-wrapped frame.
    pub fn encrypt_message(&self, plain: Vec<u8>, session_id: u64) -> crate::Result<Vec<u8>> {
        debug_assert!(session_id != 0);

        let mut header = TransformHeader {
            signature: [0; 16],
            nonce: self.gen_nonce()?,
            original_message_size: plain.len() as u32,
            session_id,
        };

        let mut buffer = plain;
        let tag = self.algo.encrypt(
            &mut buffer,
            &header.aead_bytes(),
            &header.nonce[..self.algo.nonce_size()],
        )?;
        header.signature = tag;

        log::debug!(
            "encrypted {} byte message for session {:#x}",
            header.original_message_size,
            session_id
        );

        let mut out = vec![0u8; TransformHeader::STRUCT_SIZE + buffer.len()];
        header.encode(&mut out);
        out[TransformHeader::STRUCT_SIZE..].copy_from_slice(&buffer);
        Ok(out)
    }

    fn gen_nonce(&self) -> crate::Result<[u8; 16]> {
        let mut nonce = [0u8; 16];
        OsRng
            .try_fill_bytes(&mut nonce[..self.algo.nonce_size()])
            .map_err(|e| Error::Internal(format!("nonce generation failed: {e}")))?;
        Ok(nonce)
    }
}

/// Opens transform-wrapped frames back into plain messages.
#[derive(Debug, Clone)]
pub struct MessageDecryptor {
    algo: Box<dyn EncryptingAlgo>,
}

impl MessageDecryptor {
    pub fn new(algo: Box<dyn EncryptingAlgo>) -> MessageDecryptor {
        MessageDecryptor { algo }
    }

    /// Decrypts a transform-wrapped frame, authenticating the header.
    pub fn decrypt_message(&self, pkt: &[u8]) -> crate::Result<Vec<u8>> {
        let t = TransformCodec::new(pkt);
        if t.is_invalid() {
            return Err(Error::InvalidResponse(
                "broken transform header format".to_string(),
            ));
        }
        let mut buffer = t.data().to_vec();
        if buffer.len() != t.original_message_size() as usize {
            return Err(Error::InvalidResponse(
                "transform message size mismatch".to_string(),
            ));
        }
        let nonce = t.nonce();
        self.algo.decrypt(
            &mut buffer,
            t.aead_bytes(),
            &nonce[..self.algo.nonce_size()],
            &t.signature(),
        )?;
        log::trace!("decrypted {} byte message", buffer.len());
        Ok(buffer)
    }
}
