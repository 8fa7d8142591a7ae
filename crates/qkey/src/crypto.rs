//! cryptographic primitives for qkey
//!
//! - x25519 + hkdf + chacha20poly1305 (ecies) for shares and key export
//! - chacha20poly1305 for sealing secrets handed to callers
//! - hkdf-sha256 for purpose-bound key derivation
//! - ed25519 for the quorum key and attestation signatures
//!
//! all intermediate key material is wrapped in `Zeroizing`

use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    ChaCha20Poly1305, Nonce, XChaCha20Poly1305, XNonce,
};
use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use hkdf::Hkdf;
use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use x25519_dalek::{EphemeralSecret, PublicKey, StaticSecret};
use zeroize::Zeroizing;

use crate::{Error, Result};

const NONCE_LEN: usize = 12;
const SEAL_NONCE_LEN: usize = 24;
const TAG_LEN: usize = 16;
const PUBKEY_LEN: usize = 32;

/// bytes added by `asymmetric_encrypt`: ephemeral pubkey, nonce, tag
pub const ECIES_OVERHEAD: usize = PUBKEY_LEN + NONCE_LEN + TAG_LEN;

/// bytes added by `symmetric_seal`: nonce, tag
pub const SEAL_OVERHEAD: usize = SEAL_NONCE_LEN + TAG_LEN;

const ECIES_INFO: &[u8] = b"qkey:ecies:v1";
const DERIVE_SALT: &[u8] = b"qkey:derive:v1";

/// generate random bytes from the os csprng
pub fn random_bytes<const N: usize>() -> [u8; N] {
    let mut bytes = [0u8; N];
    OsRng.fill_bytes(&mut bytes);
    bytes
}

/// sha-256 digest
pub fn hash(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

/// constant-time equality; slices of different length compare unequal
pub fn ct_eq(a: &[u8], b: &[u8]) -> bool {
    a.ct_eq(b).into()
}

/// x25519 keypair that ecies ciphertexts are addressed to
pub struct EncryptionKeypair {
    secret: StaticSecret,
    public: PublicKey,
}

impl EncryptionKeypair {
    pub fn generate() -> Self {
        Self::from_secret(StaticSecret::random_from_rng(OsRng))
    }

    pub fn from_secret_bytes(bytes: [u8; 32]) -> Self {
        Self::from_secret(StaticSecret::from(bytes))
    }

    fn from_secret(secret: StaticSecret) -> Self {
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    pub fn public_key(&self) -> [u8; 32] {
        self.public.to_bytes()
    }

    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
        asymmetric_decrypt(ciphertext, self)
    }
}

impl std::fmt::Debug for EncryptionKeypair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptionKeypair")
            .field("public", &hex::encode(self.public.as_bytes()))
            .finish_non_exhaustive()
    }
}

/// derive the ecies symmetric key, bound to both public keys
fn ecies_key(shared: &[u8], ephemeral_pk: &[u8; 32], recipient_pk: &[u8; 32]) -> Result<Zeroizing<[u8; 32]>> {
    let hk = Hkdf::<Sha256>::new(None, shared);
    let mut key = Zeroizing::new([0u8; 32]);
    hk.expand_multi_info(&[ECIES_INFO, ephemeral_pk, recipient_pk], &mut key[..])
        .map_err(|_| Error::KeyDerivationFailed)?;
    Ok(key)
}

fn aead_encrypt(key: &[u8; 32], nonce: &[u8; NONCE_LEN], msg: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
    let cipher = ChaCha20Poly1305::new_from_slice(key).map_err(|_| Error::EncryptionFailed)?;
    cipher
        .encrypt(Nonce::from_slice(nonce), Payload { msg, aad })
        .map_err(|_| Error::EncryptionFailed)
}

fn aead_decrypt(key: &[u8; 32], nonce: &[u8], msg: &[u8], aad: &[u8]) -> Option<Zeroizing<Vec<u8>>> {
    let cipher = ChaCha20Poly1305::new_from_slice(key).ok()?;
    cipher
        .decrypt(Nonce::from_slice(nonce), Payload { msg, aad })
        .ok()
        .map(Zeroizing::new)
}

/// encrypt to an x25519 public key with a fresh ephemeral keypair
///
/// output: ephemeral_pk (32) || nonce (12) || ciphertext || tag (16)
pub fn asymmetric_encrypt(plaintext: &[u8], recipient_pk: &[u8; 32]) -> Result<Vec<u8>> {
    let ephemeral = EphemeralSecret::random_from_rng(OsRng);
    let ephemeral_pk = PublicKey::from(&ephemeral);
    let shared = ephemeral.diffie_hellman(&PublicKey::from(*recipient_pk));

    // low-order recipient keys would make the shared secret predictable
    if !shared.was_contributory() {
        return Err(Error::InvalidParameters("recipient public key is low order".into()));
    }

    let key = ecies_key(shared.as_bytes(), ephemeral_pk.as_bytes(), recipient_pk)?;
    let nonce: [u8; NONCE_LEN] = random_bytes();
    let ciphertext = aead_encrypt(&key, &nonce, plaintext, &[])?;

    let mut out = Vec::with_capacity(ECIES_OVERHEAD + plaintext.len());
    out.extend_from_slice(ephemeral_pk.as_bytes());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// decrypt an `asymmetric_encrypt` ciphertext
///
/// any malformed input or tag mismatch is `DecryptionFailed`
pub fn asymmetric_decrypt(ciphertext: &[u8], recipient: &EncryptionKeypair) -> Result<Zeroizing<Vec<u8>>> {
    if ciphertext.len() < ECIES_OVERHEAD {
        return Err(Error::DecryptionFailed);
    }
    let (epk, rest) = ciphertext.split_at(PUBKEY_LEN);
    let (nonce, body) = rest.split_at(NONCE_LEN);

    let mut ephemeral_pk = [0u8; 32];
    ephemeral_pk.copy_from_slice(epk);

    let shared = recipient.secret.diffie_hellman(&PublicKey::from(ephemeral_pk));
    if !shared.was_contributory() {
        return Err(Error::DecryptionFailed);
    }

    let key = ecies_key(shared.as_bytes(), &ephemeral_pk, &recipient.public_key())
        .map_err(|_| Error::DecryptionFailed)?;
    aead_decrypt(&key, nonce, body, &[]).ok_or(Error::DecryptionFailed)
}

/// authenticated encryption under a long-lived 256-bit key
///
/// xchacha20-poly1305, so the random 192-bit nonce never needs a counter.
/// output: nonce (24) || ciphertext || tag (16)
pub fn symmetric_seal(plaintext: &[u8], key: &[u8; 32], associated_data: &[u8]) -> Result<Vec<u8>> {
    let nonce: [u8; SEAL_NONCE_LEN] = random_bytes();
    let cipher = XChaCha20Poly1305::new_from_slice(key).map_err(|_| Error::EncryptionFailed)?;
    let ciphertext = cipher
        .encrypt(XNonce::from_slice(&nonce), Payload { msg: plaintext, aad: associated_data })
        .map_err(|_| Error::EncryptionFailed)?;

    let mut out = Vec::with_capacity(SEAL_OVERHEAD + plaintext.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// open a `symmetric_seal` payload; fails closed with `AuthenticationFailed`
pub fn symmetric_open(sealed: &[u8], key: &[u8; 32], associated_data: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
    if sealed.len() < SEAL_OVERHEAD {
        return Err(Error::AuthenticationFailed);
    }
    let (nonce, body) = sealed.split_at(SEAL_NONCE_LEN);
    let cipher = XChaCha20Poly1305::new_from_slice(key).map_err(|_| Error::AuthenticationFailed)?;
    cipher
        .decrypt(XNonce::from_slice(nonce), Payload { msg: body, aad: associated_data })
        .map(Zeroizing::new)
        .map_err(|_| Error::AuthenticationFailed)
}

/// hkdf-sha256 expansion of `root` under `purpose`
///
/// deterministic per (root, purpose); different purposes are independent
pub fn derive_key(root: &[u8], purpose: &[u8], output_len: usize) -> Result<Zeroizing<Vec<u8>>> {
    if output_len == 0 {
        return Err(Error::InvalidParameters("derived key length must be non-zero".into()));
    }
    let hk = Hkdf::<Sha256>::new(Some(DERIVE_SALT), root);
    let mut okm = Zeroizing::new(vec![0u8; output_len]);
    hk.expand(purpose, &mut okm).map_err(|_| {
        Error::InvalidParameters(format!("derived key length {} too large", output_len))
    })?;
    Ok(okm)
}

/// derive a fixed 32-byte key
pub fn derive_key32(root: &[u8], purpose: &[u8]) -> Result<Zeroizing<[u8; 32]>> {
    let okm = derive_key(root, purpose, 32)?;
    let mut key = Zeroizing::new([0u8; 32]);
    key.copy_from_slice(&okm);
    Ok(key)
}

/// ed25519 signature
pub fn sign(message: &[u8], key: &SigningKey) -> [u8; 64] {
    key.sign(message).to_bytes()
}

/// strict ed25519 verification; malformed keys or signatures are `false`
pub fn verify(message: &[u8], signature: &[u8], public_key: &[u8]) -> bool {
    let Ok(pk) = <[u8; 32]>::try_from(public_key) else {
        return false;
    };
    let Ok(vk) = VerifyingKey::from_bytes(&pk) else {
        return false;
    };
    let Ok(sig) = Signature::from_slice(signature) else {
        return false;
    };
    vk.verify_strict(message, &sig).is_ok()
}
