//! Message signing implementation.

use subtle::ConstantTimeEq;

use smb2_msg::Header;

use crate::crypto::{SigningAlgo, SIGNATURE_SIZE};
use crate::Error;

/// Writes and verifies SMB2 message signatures over encoded packets.
#[derive(Debug, Clone)]
pub struct MessageSigner {
    signing_algo: Box<dyn SigningAlgo>,
}

impl MessageSigner {
    pub fn new(signing_algo: Box<dyn SigningAlgo>) -> MessageSigner {
        MessageSigner { signing_algo }
    }

    /// Signs an encoded message in place: sets the SIGNED flag, computes the
    /// MAC over the whole message with a zeroed signature field, and writes
    /// the result into the header.
    pub fn sign_message(&self, pkt: &mut [u8]) -> crate::Result<()> {
        if pkt.len() < Header::STRUCT_SIZE {
            return Err(Error::Internal(
                "message shorter than a packet header".to_string(),
            ));
        }
        let flags_bytes: [u8; 4] = pkt[Header::FLAGS_OFFSET..Header::FLAGS_OFFSET + 4]
            .try_into()
            .unwrap();
        let flags = u32::from_le_bytes(flags_bytes) | Header::FLAGS_SIGNED;
        pkt[Header::FLAGS_OFFSET..Header::FLAGS_OFFSET + 4]
            .copy_from_slice(&flags.to_le_bytes());

        pkt[Header::SIGNATURE_OFFSET..Header::SIGNATURE_OFFSET + SIGNATURE_SIZE].fill(0);
        let signature = self.signing_algo.signature(pkt);
        pkt[Header::SIGNATURE_OFFSET..Header::SIGNATURE_OFFSET + SIGNATURE_SIZE]
            .copy_from_slice(&signature);
        Ok(())
    }

    /// Recomputes the signature of a received message and compares it to the
    /// presented one in constant time. The buffer is restored either way.
    pub fn verify_signature(&self, pkt: &mut [u8]) -> crate::Result<()> {
        if pkt.len() < Header::STRUCT_SIZE {
            return Err(Error::InvalidResponse(
                "message shorter than a packet header".to_string(),
            ));
        }
        let presented: [u8; SIGNATURE_SIZE] = pkt
            [Header::SIGNATURE_OFFSET..Header::SIGNATURE_OFFSET + SIGNATURE_SIZE]
            .try_into()
            .unwrap();
        pkt[Header::SIGNATURE_OFFSET..Header::SIGNATURE_OFFSET + SIGNATURE_SIZE].fill(0);
        let computed = self.signing_algo.signature(pkt);
        pkt[Header::SIGNATURE_OFFSET..Header::SIGNATURE_OFFSET + SIGNATURE_SIZE]
            .copy_from_slice(&presented);

        if bool::from(computed.ct_eq(&presented)) {
            Ok(())
        } else {
            Err(Error::InvalidResponse(
                "unverified packet returned".to_string(),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::make_signing_algo;
    use smb2_msg::{Command, PacketCodec, Request};

    fn signer() -> MessageSigner {
        MessageSigner::new(make_signing_algo(smb2_msg::Dialect::Smb0311, &[0xD7; 16]).unwrap())
    }

    fn encoded_echo() -> Vec<u8> {
        let mut req = smb2_msg::EchoRequest::default();
        req.header.message_id = 3;
        req.header.session_id = 0x55;
        let mut buf = vec![0u8; req.size()];
        req.encode(&mut buf);
        buf
    }

    #[test]
    fn sign_then_verify() {
        let signer = signer();
        let mut pkt = encoded_echo();
        signer.sign_message(&mut pkt).unwrap();

        let p = PacketCodec::new(&pkt);
        assert!(p.flags().signed());
        assert_ne!(p.signature(), [0; 16]);
        assert_eq!(p.command(), Command::Echo as u16);

        signer.verify_signature(&mut pkt).unwrap();
        // verification restores the buffer
        assert_ne!(PacketCodec::new(&pkt).signature(), [0; 16]);
    }

    #[test]
    fn any_flipped_bit_invalidates() {
        let signer = signer();
        let mut pkt = encoded_echo();
        signer.sign_message(&mut pkt).unwrap();

        for bit in [0usize, 100, 250, pkt.len() * 8 - 1] {
            let mut tampered = pkt.clone();
            tampered[bit / 8] ^= 1 << (bit % 8);
            assert!(
                signer.verify_signature(&mut tampered).is_err(),
                "flipping bit {bit} must invalidate the signature"
            );
        }
    }

    #[test]
    fn wrong_key_does_not_verify() {
        let mut pkt = encoded_echo();
        signer().sign_message(&mut pkt).unwrap();
        let other =
            MessageSigner::new(make_signing_algo(smb2_msg::Dialect::Smb0311, &[1; 16]).unwrap());
        assert!(other.verify_signature(&mut pkt).is_err());
    }
}
