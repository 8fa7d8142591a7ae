//! seed phrase derivation under the quorum key
//!
//! each phrase comes from fresh entropy expanded through the quorum key, is
//! encoded as a bip39 english mnemonic and leaves the instance only sealed.
//! every instance holding the same quorum key (genesis or propagated) can
//! open and validate what any other produced.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::attestation::Attestor;
use crate::crypto;
use crate::enclave::Enclave;
use crate::lifecycle::{InstanceState, Phase};
use crate::secret::RootSecret;
use crate::{Error, Result};

const SEED_PHRASE_PURPOSE: &[u8] = b"qkey:seed-phrase:v1:";
const SEALING_PURPOSE: &[u8] = b"qkey:sealed-secret:v1";

/// entropy sizes bip39 defines, in bits
pub const STRENGTHS: [u32; 5] = [128, 160, 192, 224, 256];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DerivedSecret {
    /// `nonce || ciphertext`, only an instance with the quorum key opens it
    #[serde(with = "crate::hex_serde::bytes")]
    pub sealed_secret: Vec<u8>,
    pub word_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Validation {
    pub is_valid: bool,
    pub word_count: usize,
    /// never contains the words themselves
    pub errors: Vec<String>,
}

/// plaintext inside a sealed secret
#[derive(Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
struct SeedPayload {
    words: String,
    #[serde(default)]
    passphrase: Option<String>,
}

/// quorum key and manifest hash of a ready instance
fn ready(state: &InstanceState) -> Result<(&RootSecret, [u8; 32])> {
    match (state.phase(), state.root_secret(), state.envelope()) {
        (Phase::ApplicationReady, Some(secret), Some(envelope)) => Ok((secret, envelope.manifest_hash())),
        _ => Err(Error::NotProvisioned),
    }
}

fn sealing_key(secret: &RootSecret) -> Result<Zeroizing<[u8; 32]>> {
    crypto::derive_key32(secret.expose(), SEALING_PURPOSE)
}

fn describe(err: &bip39::Error) -> String {
    match err {
        bip39::Error::BadWordCount(n) => format!("unsupported word count: {}", n),
        bip39::Error::UnknownWord(i) => format!("word {} is not in the english wordlist", i + 1),
        bip39::Error::BadEntropyBitCount(n) => format!("unsupported entropy size: {} bits", n),
        bip39::Error::InvalidChecksum => "checksum mismatch".into(),
        _ => "unrecognized mnemonic".into(),
    }
}

impl<A: Attestor> Enclave<A> {
    /// derive a new seed phrase and return it sealed
    pub fn derive_and_seal(&self, strength_bits: u32, passphrase: Option<String>) -> Result<DerivedSecret> {
        if !STRENGTHS.contains(&strength_bits) {
            return Err(Error::InvalidParameters(format!(
                "strength must be one of {:?} bits, got {}",
                STRENGTHS, strength_bits
            )));
        }

        let state = self.lifecycle.read()?;
        let (secret, manifest_hash) = ready(&state)?;

        let mut purpose = SEED_PHRASE_PURPOSE.to_vec();
        purpose.extend_from_slice(&crypto::random_bytes::<32>());
        let entropy = secret.derive_key(&purpose, strength_bits as usize / 8)?;

        // word indices are wiped when the mnemonic drops
        let mnemonic = bip39::Mnemonic::from_entropy(&entropy)
            .map_err(|e| Error::InvalidParameters(describe(&e)))?;
        let word_count = mnemonic.word_count();

        let payload = SeedPayload { words: mnemonic.to_string(), passphrase };
        let plaintext = Zeroizing::new(
            serde_json::to_vec(&payload).map_err(|_| Error::EncryptionFailed)?,
        );
        let key = sealing_key(secret)?;
        let sealed_secret = crypto::symmetric_seal(&plaintext, &key, &manifest_hash)?;

        debug!(word_count, "seed phrase derived and sealed");
        Ok(DerivedSecret { sealed_secret, word_count })
    }

    /// open a sealed secret and check the phrase inside
    ///
    /// a sealed secret that does not open under this quorum key is an
    /// `AuthenticationFailed` error, not a negative validation
    pub fn validate(&self, sealed_secret: &[u8]) -> Result<Validation> {
        let state = self.lifecycle.read()?;
        let (secret, manifest_hash) = ready(&state)?;

        let key = sealing_key(secret)?;
        let plaintext = match crypto::symmetric_open(sealed_secret, &key, &manifest_hash) {
            Ok(p) => p,
            Err(e) => {
                warn!("sealed secret failed authentication");
                return Err(e);
            }
        };

        let payload: SeedPayload = match serde_json::from_slice(&plaintext) {
            Ok(p) => p,
            Err(_) => {
                return Ok(Validation {
                    is_valid: false,
                    word_count: 0,
                    errors: vec!["malformed sealed payload".into()],
                })
            }
        };

        let word_count = payload.words.split_whitespace().count();
        let errors = match bip39::Mnemonic::parse_in_normalized(bip39::Language::English, &payload.words) {
            Ok(_) => vec![],
            Err(e) => vec![describe(&e)],
        };

        Ok(Validation { is_valid: errors.is_empty(), word_count, errors })
    }
}

#[cfg(all(test, feature = "software"))]
mod tests {
    use super::*;
    use crate::testutil::{self, Ceremony};

    fn ready_enclave() -> Ceremony {
        let c = Ceremony::run(3, 2);
        c.enclave.inject_shares(&testutil::namespace(), &c.submitted(&[0, 1])).unwrap();
        c
    }

    fn open(c: &Ceremony, sealed: &[u8]) -> SeedPayload {
        let state = c.enclave.lifecycle.read().unwrap();
        let (secret, hash) = ready(&state).unwrap();
        let key = sealing_key(secret).unwrap();
        let plain = crypto::symmetric_open(sealed, &key, &hash).unwrap();
        serde_json::from_slice(&plain).unwrap()
    }

    fn seal(c: &Ceremony, payload: &[u8]) -> Vec<u8> {
        let state = c.enclave.lifecycle.read().unwrap();
        let (secret, hash) = ready(&state).unwrap();
        let key = sealing_key(secret).unwrap();
        crypto::symmetric_seal(payload, &key, &hash).unwrap()
    }

    #[test]
    fn test_word_counts_per_strength() {
        let c = ready_enclave();
        for (bits, words) in STRENGTHS.iter().zip([12, 15, 18, 21, 24]) {
            let derived = c.enclave.derive_and_seal(*bits, None).unwrap();
            assert_eq!(derived.word_count, words);

            let v = c.enclave.validate(&derived.sealed_secret).unwrap();
            assert!(v.is_valid, "{:?}", v.errors);
            assert_eq!(v.word_count, words);
        }
    }

    #[test]
    fn test_each_derivation_is_fresh() {
        let c = ready_enclave();
        let a = c.enclave.derive_and_seal(256, None).unwrap();
        let b = c.enclave.derive_and_seal(256, None).unwrap();
        assert_ne!(open(&c, &a.sealed_secret).words, open(&c, &b.sealed_secret).words);
    }

    #[test]
    fn test_sealed_output_hides_words() {
        let c = ready_enclave();
        let derived = c.enclave.derive_and_seal(128, Some("hunter2".into())).unwrap();

        let payload = open(&c, &derived.sealed_secret);
        assert_eq!(payload.passphrase.as_deref(), Some("hunter2"));
        assert_eq!(payload.words.split_whitespace().count(), 12);

        let json = serde_json::to_string(&derived).unwrap();
        assert!(!json.contains(payload.words.as_str()));
        assert!(!json.contains("hunter2"));
    }

    #[test]
    fn test_sealed_output_never_contains_root_secret() {
        let c = ready_enclave();
        let root = {
            let state = c.enclave.lifecycle.read().unwrap();
            let (secret, _) = ready(&state).unwrap();
            *secret.expose()
        };

        for bits in STRENGTHS {
            for _ in 0..8 {
                let derived = c.enclave.derive_and_seal(bits, Some("pass".into())).unwrap();
                assert!(!derived.sealed_secret.windows(32).any(|w| w == root.as_slice()));
                let json = serde_json::to_string(&derived).unwrap();
                assert!(!json.contains(&hex::encode(root)));
            }
        }
    }

    #[test]
    fn test_mnemonic_is_wiped_on_drop() {
        fn wiped_on_drop<T: ZeroizeOnDrop>() {}
        wiped_on_drop::<bip39::Mnemonic>();

        let entropy = [0x5au8; 16];
        let mut mnemonic = bip39::Mnemonic::from_entropy(&entropy).unwrap();
        assert_eq!(mnemonic.to_entropy(), entropy.to_vec());

        mnemonic.zeroize();
        assert!(mnemonic.words().all(|w| w == "abandon"));
        assert_ne!(mnemonic.to_entropy(), entropy.to_vec());
    }

    #[test]
    fn test_concurrent_derivation_alongside_writer() {
        let c = ready_enclave();
        let shares = c.submitted(&[0, 1]);

        std::thread::scope(|s| {
            let readers: Vec<_> = (0..4)
                .map(|i| {
                    let enclave = &c.enclave;
                    let bits = STRENGTHS[i % STRENGTHS.len()];
                    s.spawn(move || {
                        for _ in 0..16 {
                            let derived = enclave.derive_and_seal(bits, None).unwrap();
                            assert!(enclave.validate(&derived.sealed_secret).unwrap().is_valid);
                        }
                    })
                })
                .collect();

            // a late share submission takes the write lock and is refused
            let writer = s.spawn(|| {
                for _ in 0..16 {
                    let result = c.enclave.inject_shares(&testutil::namespace(), &shares);
                    assert!(matches!(result, Err(Error::IllegalStateTransition { .. })));
                }
            });

            writer.join().unwrap();
            for reader in readers {
                reader.join().unwrap();
            }
        });

        assert_eq!(c.enclave.status().unwrap().phase, Phase::ApplicationReady);
    }

    #[test]
    fn test_invalid_strength() {
        let c = ready_enclave();
        for bits in [0, 64, 129, 512] {
            assert!(matches!(c.enclave.derive_and_seal(bits, None), Err(Error::InvalidParameters(_))));
        }
    }

    #[test]
    fn test_requires_ready_instance() {
        let c = Ceremony::run(2, 2);
        assert!(matches!(c.enclave.derive_and_seal(128, None), Err(Error::NotProvisioned)));
        assert!(matches!(c.enclave.validate(&[0u8; 64]), Err(Error::NotProvisioned)));
    }

    #[test]
    fn test_foreign_or_tampered_seal_fails_closed() {
        let c = ready_enclave();
        let other = ready_enclave();

        let derived = other.enclave.derive_and_seal(128, None).unwrap();
        assert!(matches!(
            c.enclave.validate(&derived.sealed_secret),
            Err(Error::AuthenticationFailed)
        ));

        let mut sealed = c.enclave.derive_and_seal(128, None).unwrap().sealed_secret;
        let last = sealed.len() - 1;
        sealed[last] ^= 1;
        assert!(matches!(c.enclave.validate(&sealed), Err(Error::AuthenticationFailed)));
        assert!(matches!(c.enclave.validate(&[]), Err(Error::AuthenticationFailed)));
    }

    #[test]
    fn test_malformed_phrase_reported_without_words() {
        let c = ready_enclave();

        let sealed = seal(&c, br#"{"words":"abandon abandon zzzzqq"}"#);
        let v = c.enclave.validate(&sealed).unwrap();
        assert!(!v.is_valid);
        assert_eq!(v.word_count, 3);
        assert!(v.errors.iter().all(|e| !e.contains("abandon") && !e.contains("zzzzqq")));

        // twelve real words with a wrong checksum
        let words = ["abandon"; 12].join(" ");
        let sealed = seal(&c, format!(r#"{{"words":"{}"}}"#, words).as_bytes());
        let v = c.enclave.validate(&sealed).unwrap();
        assert!(!v.is_valid);
        assert_eq!(v.errors, vec!["checksum mismatch".to_string()]);

        let sealed = seal(&c, b"not json");
        let v = c.enclave.validate(&sealed).unwrap();
        assert!(!v.is_valid);
        assert_eq!(v.word_count, 0);
    }
}
