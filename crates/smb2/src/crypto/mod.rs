//! Cryptographic building blocks for session signing and sealing.
//!
//! Algorithms are selected at session establishment and held as trait
//! objects, so the signing and sealing code paths are independent of the
//! negotiated dialect and cipher.

pub mod kdf;

use aes::Aes128;
use aes_gcm::Aes128Gcm;
use ccm::aead::generic_array::GenericArray;
use ccm::aead::{AeadInPlace, KeyInit};
use ccm::consts::{U11, U16};
use ccm::Ccm;
use cmac::Cmac;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use smb2_msg::{Dialect, EncryptionCipher};

use crate::Error;

type Aes128Ccm = Ccm<Aes128, U16, U11>;

/// 128-bit key material, the unit of the SMB3 key schedule.
pub type KeyToDerive = [u8; 16];

pub const SIGNATURE_SIZE: usize = 16;

/// Computes per-message signatures for one session.
pub trait SigningAlgo: std::fmt::Debug + Send + Sync {
    /// One-shot MAC over the full encoded message, truncated to the 16-byte
    /// signature field.
    fn signature(&self, data: &[u8]) -> [u8; SIGNATURE_SIZE];

    fn clone_box(&self) -> Box<dyn SigningAlgo>;
}

impl Clone for Box<dyn SigningAlgo> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

#[derive(Clone)]
struct HmacSha256Signing {
    mac: Hmac<Sha256>,
}

impl std::fmt::Debug for HmacSha256Signing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("HmacSha256Signing")
    }
}

impl SigningAlgo for HmacSha256Signing {
    fn signature(&self, data: &[u8]) -> [u8; SIGNATURE_SIZE] {
        let digest = self.mac.clone().chain_update(data).finalize().into_bytes();
        digest[..SIGNATURE_SIZE].try_into().unwrap()
    }

    fn clone_box(&self) -> Box<dyn SigningAlgo> {
        Box::new(self.clone())
    }
}

#[derive(Clone)]
struct AesCmacSigning {
    mac: Cmac<Aes128>,
}

impl std::fmt::Debug for AesCmacSigning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AesCmacSigning")
    }
}

impl SigningAlgo for AesCmacSigning {
    fn signature(&self, data: &[u8]) -> [u8; SIGNATURE_SIZE] {
        let digest = self.mac.clone().chain_update(data).finalize().into_bytes();
        digest[..SIGNATURE_SIZE].try_into().unwrap()
    }

    fn clone_box(&self) -> Box<dyn SigningAlgo> {
        Box::new(self.clone())
    }
}

/// Builds the signing algorithm for a dialect: HMAC-SHA256 for 2.x,
/// AES-128-CMAC for 3.x.
pub fn make_signing_algo(
    dialect: Dialect,
    signing_key: &KeyToDerive,
) -> crate::Result<Box<dyn SigningAlgo>> {
    if dialect.is_smb3() {
        let mac = KeyInit::new_from_slice(signing_key)
            .map_err(|e| Error::Internal(format!("cmac key setup failed: {e}")))?;
        Ok(Box::new(AesCmacSigning { mac }))
    } else {
        let mac = KeyInit::new_from_slice(signing_key)
            .map_err(|e| Error::Internal(format!("hmac key setup failed: {e}")))?;
        Ok(Box::new(HmacSha256Signing { mac }))
    }
}

/// AEAD used for transform-wrapped messages.
pub trait EncryptingAlgo: std::fmt::Debug + Send + Sync {
    /// Seals `buffer` in place and returns the authentication tag.
    fn encrypt(
        &self,
        buffer: &mut [u8],
        aad: &[u8],
        nonce: &[u8],
    ) -> crate::Result<[u8; SIGNATURE_SIZE]>;

    /// Opens `buffer` in place; fails on tag mismatch.
    fn decrypt(
        &self,
        buffer: &mut [u8],
        aad: &[u8],
        nonce: &[u8],
        signature: &[u8; SIGNATURE_SIZE],
    ) -> crate::Result<()>;

    /// Significant nonce length for this cipher.
    fn nonce_size(&self) -> usize;

    fn clone_box(&self) -> Box<dyn EncryptingAlgo>;
}

impl Clone for Box<dyn EncryptingAlgo> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

#[derive(Clone)]
struct Gcm128Encryption {
    cipher: Aes128Gcm,
}

impl std::fmt::Debug for Gcm128Encryption {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Gcm128Encryption")
    }
}

impl EncryptingAlgo for Gcm128Encryption {
    fn encrypt(
        &self,
        buffer: &mut [u8],
        aad: &[u8],
        nonce: &[u8],
    ) -> crate::Result<[u8; SIGNATURE_SIZE]> {
        let tag = self
            .cipher
            .encrypt_in_place_detached(GenericArray::from_slice(nonce), aad, buffer)
            .map_err(|_| Error::Internal("message encryption failed".to_string()))?;
        Ok(tag.as_slice().try_into().unwrap())
    }

    fn decrypt(
        &self,
        buffer: &mut [u8],
        aad: &[u8],
        nonce: &[u8],
        signature: &[u8; SIGNATURE_SIZE],
    ) -> crate::Result<()> {
        self.cipher
            .decrypt_in_place_detached(
                GenericArray::from_slice(nonce),
                aad,
                buffer,
                GenericArray::from_slice(signature),
            )
            .map_err(|_| Error::InvalidResponse("message decryption failed".to_string()))
    }

    fn nonce_size(&self) -> usize {
        12
    }

    fn clone_box(&self) -> Box<dyn EncryptingAlgo> {
        Box::new(self.clone())
    }
}

#[derive(Clone)]
struct Ccm128Encryption {
    cipher: Aes128Ccm,
}

impl std::fmt::Debug for Ccm128Encryption {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Ccm128Encryption")
    }
}

impl EncryptingAlgo for Ccm128Encryption {
    fn encrypt(
        &self,
        buffer: &mut [u8],
        aad: &[u8],
        nonce: &[u8],
    ) -> crate::Result<[u8; SIGNATURE_SIZE]> {
        let tag = self
            .cipher
            .encrypt_in_place_detached(GenericArray::from_slice(nonce), aad, buffer)
            .map_err(|_| Error::Internal("message encryption failed".to_string()))?;
        Ok(tag.as_slice().try_into().unwrap())
    }

    fn decrypt(
        &self,
        buffer: &mut [u8],
        aad: &[u8],
        nonce: &[u8],
        signature: &[u8; SIGNATURE_SIZE],
    ) -> crate::Result<()> {
        self.cipher
            .decrypt_in_place_detached(
                GenericArray::from_slice(nonce),
                aad,
                buffer,
                GenericArray::from_slice(signature),
            )
            .map_err(|_| Error::InvalidResponse("message decryption failed".to_string()))
    }

    fn nonce_size(&self) -> usize {
        11
    }

    fn clone_box(&self) -> Box<dyn EncryptingAlgo> {
        Box::new(self.clone())
    }
}

/// Builds the AEAD for the negotiated cipher.
pub fn make_encrypting_algo(
    cipher: EncryptionCipher,
    key: &KeyToDerive,
) -> crate::Result<Box<dyn EncryptingAlgo>> {
    match cipher {
        EncryptionCipher::Aes128Gcm => Ok(Box::new(Gcm128Encryption {
            cipher: Aes128Gcm::new(GenericArray::from_slice(key)),
        })),
        EncryptionCipher::Aes128Ccm => Ok(Box::new(Ccm128Encryption {
            cipher: Aes128Ccm::new(GenericArray::from_slice(key)),
        })),
    }
}

/// The session keys derived at establishment.
#[derive(Debug, Clone)]
pub struct DerivedKeys {
    pub signing: KeyToDerive,
    pub application: KeyToDerive,
    /// Client-to-server sealing key; absent below dialect 3.0.
    pub client_cipher: Option<KeyToDerive>,
    /// Server-to-client sealing key; absent below dialect 3.0.
    pub server_cipher: Option<KeyToDerive>,
}

/// Truncates or zero-pads authenticator-supplied key material to the
/// 128-bit schedule input.
pub fn normalize_session_key(material: &[u8]) -> KeyToDerive {
    let mut key = [0u8; 16];
    let n = material.len().min(16);
    key[..n].copy_from_slice(&material[..n]);
    key
}

fn kdf_16(
    session_key: &KeyToDerive,
    label: &[u8],
    context: &[u8],
) -> crate::Result<KeyToDerive> {
    let prf: Hmac<Sha256> = KeyInit::new_from_slice(session_key)
        .map_err(|e| Error::Internal(format!("kdf key setup failed: {e}")))?;
    let out = kdf::derive_key(prf, label, context, 128);
    let mut key = [0u8; 16];
    key.copy_from_slice(&out);
    Ok(key)
}

/// Runs the per-dialect key schedule.
///
/// 2.x signs with the session key directly. 3.0.x binds fixed context
/// strings; 3.1.1 binds the preauth-integrity hash snapshot instead.
pub fn derive_session_keys(
    dialect: Dialect,
    session_key: &KeyToDerive,
    preauth_hash: Option<&[u8]>,
) -> crate::Result<DerivedKeys> {
    match dialect {
        Dialect::Smb0202 | Dialect::Smb0210 => Ok(DerivedKeys {
            signing: *session_key,
            application: *session_key,
            client_cipher: None,
            server_cipher: None,
        }),
        Dialect::Smb0300 | Dialect::Smb0302 => Ok(DerivedKeys {
            signing: kdf_16(session_key, b"SMB2AESCMAC\0", b"SmbSign\0")?,
            application: kdf_16(session_key, b"SMB2APP\0", b"SmbRpc\0")?,
            client_cipher: Some(kdf_16(session_key, b"SMB2AESCCM\0", b"ServerIn \0")?),
            server_cipher: Some(kdf_16(session_key, b"SMB2AESCCM\0", b"ServerOut\0")?),
        }),
        Dialect::Smb0311 => {
            let hash = preauth_hash.ok_or_else(|| {
                Error::Internal("no preauth integrity hash for 3.1.1 key derivation".to_string())
            })?;
            Ok(DerivedKeys {
                signing: kdf_16(session_key, b"SMBSigningKey\0", hash)?,
                application: kdf_16(session_key, b"SMBAppKey\0", hash)?,
                client_cipher: Some(kdf_16(session_key, b"SMBC2SCipherKey\0", hash)?),
                server_cipher: Some(kdf_16(session_key, b"SMBS2CCipherKey\0", hash)?),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signing_round_trip_both_macs() {
        for dialect in [Dialect::Smb0210, Dialect::Smb0311] {
            let algo = make_signing_algo(dialect, &[3; 16]).unwrap();
            let sig = algo.signature(b"some message bytes");
            assert_eq!(sig, algo.signature(b"some message bytes"));
            assert_ne!(sig, algo.signature(b"some message byteS"));
            assert_ne!(sig, [0; 16]);
        }
    }

    #[test]
    fn sealing_round_trip_both_ciphers() {
        for cipher in [EncryptionCipher::Aes128Gcm, EncryptionCipher::Aes128Ccm] {
            let algo = make_encrypting_algo(cipher, &[5; 16]).unwrap();
            let nonce = vec![9u8; algo.nonce_size()];
            let aad = b"header bytes";
            let mut buffer = b"secret payload".to_vec();

            let tag = algo.encrypt(&mut buffer, aad, &nonce).unwrap();
            assert_ne!(&buffer, b"secret payload");
            algo.decrypt(&mut buffer, aad, &nonce, &tag).unwrap();
            assert_eq!(&buffer, b"secret payload");
        }
    }

    #[test]
    fn tampered_ciphertext_fails_open() {
        let algo = make_encrypting_algo(EncryptionCipher::Aes128Gcm, &[5; 16]).unwrap();
        let nonce = vec![9u8; algo.nonce_size()];
        let mut buffer = b"secret payload".to_vec();
        let tag = algo.encrypt(&mut buffer, b"aad", &nonce).unwrap();

        buffer[0] ^= 0x80;
        let err = algo.decrypt(&mut buffer, b"aad", &nonce, &tag).unwrap_err();
        assert!(matches!(err, Error::InvalidResponse(_)));
    }

    #[test]
    fn wrong_aad_fails_open() {
        let algo = make_encrypting_algo(EncryptionCipher::Aes128Ccm, &[5; 16]).unwrap();
        let nonce = vec![9u8; algo.nonce_size()];
        let mut buffer = b"secret payload".to_vec();
        let tag = algo.encrypt(&mut buffer, b"aad", &nonce).unwrap();
        assert!(algo.decrypt(&mut buffer, b"bad", &nonce, &tag).is_err());
    }

    #[test]
    fn key_schedule_depends_on_dialect_and_hash() {
        let key = [7u8; 16];
        let plain = derive_session_keys(Dialect::Smb0210, &key, None).unwrap();
        assert_eq!(plain.signing, key);
        assert!(plain.client_cipher.is_none());

        let smb30 = derive_session_keys(Dialect::Smb0300, &key, None).unwrap();
        assert_ne!(smb30.signing, key);
        assert_ne!(smb30.signing, smb30.application);
        assert_ne!(smb30.client_cipher, smb30.server_cipher);

        let h1 = derive_session_keys(Dialect::Smb0311, &key, Some(&[1; 64])).unwrap();
        let h2 = derive_session_keys(Dialect::Smb0311, &key, Some(&[2; 64])).unwrap();
        assert_ne!(h1.signing, h2.signing);
        assert!(derive_session_keys(Dialect::Smb0311, &key, None).is_err());
    }

    #[test]
    fn session_key_normalization() {
        assert_eq!(normalize_session_key(&[1; 16]), [1; 16]);
        let short = normalize_session_key(&[2; 4]);
        assert_eq!(&short[..4], &[2; 4]);
        assert_eq!(&short[4..], &[0; 12]);
        let long = normalize_session_key(&[3; 32]);
        assert_eq!(long, [3; 16]);
    }
}
