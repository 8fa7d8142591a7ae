//! the quorum key (root secret)
//!
//! never cloned, serialized or formatted. the ed25519 quorum signing key is
//! derived from it with hkdf, and its verifying key is the public commitment
//! stored in the manifest.

use ed25519_dalek::SigningKey;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::crypto;
use crate::shamir::SECRET_LEN;
use crate::{Error, Result};

const QUORUM_SIGNING_KEY_LABEL: &[u8] = b"qkey:quorum-key:ed25519:v1";

#[derive(Zeroize, ZeroizeOnDrop)]
pub struct RootSecret([u8; SECRET_LEN]);

impl RootSecret {
    /// fresh secret from the os csprng
    pub fn generate() -> Self {
        Self(crypto::random_bytes())
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let arr: [u8; SECRET_LEN] = bytes
            .try_into()
            .map_err(|_| Error::InvalidParameters("quorum key must be 32 bytes".into()))?;
        Ok(Self(arr))
    }

    pub(crate) fn expose(&self) -> &[u8; SECRET_LEN] {
        &self.0
    }

    /// quorum signing key
    pub fn signing_key(&self) -> Result<SigningKey> {
        let seed = crypto::derive_key32(&self.0, QUORUM_SIGNING_KEY_LABEL)?;
        Ok(SigningKey::from_bytes(&seed))
    }

    /// public commitment to this secret
    pub fn public_key(&self) -> Result<[u8; 32]> {
        Ok(self.signing_key()?.verifying_key().to_bytes())
    }

    /// purpose-bound key derived from this secret
    pub fn derive_key(&self, purpose: &[u8], output_len: usize) -> Result<Zeroizing<Vec<u8>>> {
        crypto::derive_key(&self.0, purpose, output_len)
    }

    /// true if this secret matches the committed public key (constant time)
    pub fn matches_commitment(&self, committed: &[u8; 32]) -> Result<bool> {
        Ok(crypto::ct_eq(&self.public_key()?, committed))
    }
}

impl std::fmt::Debug for RootSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("RootSecret(<redacted>)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_key_is_deterministic() {
        let secret = RootSecret::from_bytes(&[3u8; 32]).unwrap();
        let again = RootSecret::from_bytes(&[3u8; 32]).unwrap();
        assert_eq!(secret.public_key().unwrap(), again.public_key().unwrap());

        let other = RootSecret::generate();
        assert_ne!(secret.public_key().unwrap(), other.public_key().unwrap());
    }

    #[test]
    fn test_commitment() {
        let secret = RootSecret::generate();
        let committed = secret.public_key().unwrap();
        assert!(secret.matches_commitment(&committed).unwrap());

        let mut wrong = committed;
        wrong[0] ^= 1;
        assert!(!secret.matches_commitment(&wrong).unwrap());
    }

    #[test]
    fn test_public_key_is_not_the_secret() {
        let secret = RootSecret::from_bytes(&[9u8; 32]).unwrap();
        assert_ne!(&secret.public_key().unwrap(), secret.expose());
    }

    #[test]
    fn test_debug_redacted() {
        let secret = RootSecret::from_bytes(&[0xaa; 32]).unwrap();
        assert_eq!(format!("{:?}", secret), "RootSecret(<redacted>)");
    }

    #[test]
    fn test_wrong_length() {
        assert!(RootSecret::from_bytes(&[1u8; 31]).is_err());
    }
}
