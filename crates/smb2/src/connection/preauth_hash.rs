//! Pre-authentication integrity hash (dialect 3.1.1).

use sha2::{Digest, Sha512};

/// A snapshot of the rolling hash, bound into the 3.1.1 key schedule.
pub type PreauthHashValue = Vec<u8>;

/// Rolling SHA-512 over the session-setup exchange.
///
/// Seeded with the salt from the server's preauth-integrity negotiate
/// context, then folded over every session-setup request at send time and
/// every continuation response. The connection owns the evolving value;
/// sessions snapshot it at establishment, after the final request and
/// before the final response.
#[derive(Debug, Clone)]
pub struct PreauthHashState {
    value: PreauthHashValue,
}

impl PreauthHashState {
    pub fn new(salt: &[u8]) -> PreauthHashState {
        PreauthHashState {
            value: salt.to_vec(),
        }
    }

    /// Folds one wire message into the rolling hash:
    /// `H := SHA512(H || message)`.
    pub fn update(&mut self, message: &[u8]) {
        let mut hasher = Sha512::new();
        hasher.update(&self.value);
        hasher.update(message);
        self.value = hasher.finalize().to_vec();
    }

    pub fn value(&self) -> &[u8] {
        &self.value
    }

    pub fn snapshot(&self) -> PreauthHashValue {
        self.value.clone()
    }
}
