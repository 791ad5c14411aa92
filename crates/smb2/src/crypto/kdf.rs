//! SP800-108 key derivation in counter mode.

use hmac::Mac;

/// Derives `key_len_bits` of key material from `prf`.
///
/// The fixed input data is `counter || label || 0x00 || context || L`, with
/// the 32-bit counter and length in big-endian. String labels and contexts
/// are passed with their terminating NUL; binary contexts (the preauth
/// integrity hash) are passed raw.
pub fn derive_key<M: Mac + Clone>(
    prf: M,
    label: &[u8],
    context: &[u8],
    key_len_bits: u32,
) -> Vec<u8> {
    let mut fixed = Vec::with_capacity(4 + label.len() + 1 + context.len() + 4);
    fixed.extend_from_slice(&[0u8; 4]);
    fixed.extend_from_slice(label);
    fixed.push(0);
    fixed.extend_from_slice(context);
    fixed.extend_from_slice(&key_len_bits.to_be_bytes());

    let key_len = (key_len_bits / 8) as usize;
    let mut output = Vec::with_capacity(key_len);
    let mut counter: u32 = 1;
    while output.len() < key_len {
        fixed[..4].copy_from_slice(&counter.to_be_bytes());
        let block = prf.clone().chain_update(&fixed).finalize().into_bytes();
        let take = (key_len - output.len()).min(block.len());
        output.extend_from_slice(&block[..take]);
        counter += 1;
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use hmac::Hmac;
    use sha2::Sha256;

    fn prf(key: &[u8]) -> Hmac<Sha256> {
        <Hmac<Sha256>>::new_from_slice(key).unwrap()
    }

    #[test]
    fn deterministic_and_sized() {
        let a = derive_key(prf(&[7; 16]), b"SMB2AESCMAC\0", b"SmbSign\0", 128);
        let b = derive_key(prf(&[7; 16]), b"SMB2AESCMAC\0", b"SmbSign\0", 128);
        assert_eq!(a.len(), 16);
        assert_eq!(a, b);
    }

    #[test]
    fn label_context_and_key_all_separate_outputs() {
        let base = derive_key(prf(&[7; 16]), b"SMB2AESCMAC\0", b"SmbSign\0", 128);
        assert_ne!(
            base,
            derive_key(prf(&[7; 16]), b"SMB2APP\0", b"SmbSign\0", 128)
        );
        assert_ne!(
            base,
            derive_key(prf(&[7; 16]), b"SMB2AESCMAC\0", b"ServerIn \0", 128)
        );
        assert_ne!(
            base,
            derive_key(prf(&[8; 16]), b"SMB2AESCMAC\0", b"SmbSign\0", 128)
        );
    }

    #[test]
    fn long_outputs_span_blocks() {
        let out = derive_key(prf(&[1; 16]), b"L\0", b"C\0", 512);
        assert_eq!(out.len(), 64);
        // the second PRF block must differ from the first
        assert_ne!(out[..32], out[32..]);
    }
}
