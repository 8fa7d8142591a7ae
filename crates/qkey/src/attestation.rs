//! attestation documents and the verifier gating key export
//!
//! an attestor is a pluggable backend (hardware security module in
//! production, `SoftwareAttestor` for development) that signs an instance's
//! measurements together with caller-chosen user data and an ephemeral
//! encryption public key.
//!
//! verification order:
//! 1. user_data equals the expected manifest hash
//! 2. measurements equal the manifest's, in order
//! 3. signer is a trusted attestor and the signature holds

#[cfg(feature = "software")]
use ed25519_dalek::SigningKey;
#[cfg(feature = "software")]
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};

use crate::crypto;
use crate::manifest::{Canonical, Manifest, Measurement};
use crate::{Error, Result};

const ATTESTATION_DOMAIN: &[u8] = b"qkey:attestation:v1";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttestationDocument {
    pub measurements: Vec<Measurement>,
    /// expected to be the manifest hash
    #[serde(with = "crate::hex_serde::array")]
    pub user_data: [u8; 32],
    /// x25519 key the exported quorum key is encrypted to
    #[serde(with = "crate::hex_serde::array")]
    pub public_key: [u8; 32],
    /// ed25519 key of the attestor that produced the document
    #[serde(with = "crate::hex_serde::array")]
    pub signer: [u8; 32],
    #[serde(with = "crate::hex_serde::array")]
    pub signature: [u8; 64],
}

/// bytes covered by the attestation signature
pub fn signing_payload(measurements: &[Measurement], user_data: &[u8; 32], public_key: &[u8; 32]) -> Vec<u8> {
    let mut enc = Canonical::new(ATTESTATION_DOMAIN);
    enc.u64(measurements.len() as u64);
    for m in measurements {
        enc.bytes(m.as_bytes());
    }
    enc.bytes(user_data).bytes(public_key);
    enc.finish()
}

/// attestor trait - pluggable source of attestation documents
pub trait Attestor: Send + Sync {
    /// ed25519 key peers must trust to accept this attestor's documents
    fn identity(&self) -> [u8; 32];

    /// sign `measurements` bound to `user_data` and `public_key`
    fn attest(
        &self,
        user_data: &[u8; 32],
        public_key: &[u8; 32],
        measurements: &[Measurement],
    ) -> Result<AttestationDocument>;
}

/// in-memory attestor for development and tests
///
/// NOT SECURE - signs whatever measurements it is given
#[cfg(feature = "software")]
pub struct SoftwareAttestor {
    signing_key: SigningKey,
}

#[cfg(feature = "software")]
impl SoftwareAttestor {
    pub fn new() -> Self {
        Self { signing_key: SigningKey::generate(&mut OsRng) }
    }

    pub fn from_bytes(secret: &[u8; 32]) -> Self {
        Self { signing_key: SigningKey::from_bytes(secret) }
    }
}

#[cfg(feature = "software")]
impl Default for SoftwareAttestor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "software")]
impl Attestor for SoftwareAttestor {
    fn identity(&self) -> [u8; 32] {
        self.signing_key.verifying_key().to_bytes()
    }

    fn attest(
        &self,
        user_data: &[u8; 32],
        public_key: &[u8; 32],
        measurements: &[Measurement],
    ) -> Result<AttestationDocument> {
        let payload = signing_payload(measurements, user_data, public_key);
        Ok(AttestationDocument {
            measurements: measurements.to_vec(),
            user_data: *user_data,
            public_key: *public_key,
            signer: self.identity(),
            signature: crypto::sign(&payload, &self.signing_key),
        })
    }
}

/// check `doc` proves an instance runs the code `expected` describes
///
/// the only gate in front of quorum key export
pub fn verify_attestation(
    doc: &AttestationDocument,
    expected: &Manifest,
    trusted_signers: &[[u8; 32]],
) -> Result<()> {
    if !crypto::ct_eq(&doc.user_data, &expected.hash()) {
        return Err(Error::ManifestMismatch("attested user data is not the manifest hash"));
    }

    let expected_measurements = &expected.instance_measurements;
    if doc.measurements.len() != expected_measurements.len() {
        return Err(Error::ManifestMismatch("measurement count"));
    }
    let mut measurements_match = true;
    for (got, want) in doc.measurements.iter().zip(expected_measurements) {
        measurements_match &= crypto::ct_eq(got.as_bytes(), want.as_bytes());
    }
    if !measurements_match {
        return Err(Error::ManifestMismatch("measurements"));
    }

    let mut trusted = false;
    for signer in trusted_signers {
        trusted |= crypto::ct_eq(signer, &doc.signer);
    }
    let payload = signing_payload(&doc.measurements, &doc.user_data, &doc.public_key);
    let valid = crypto::verify(&payload, &doc.signature, &doc.signer);
    if !(trusted & valid) {
        return Err(Error::SignatureInvalid);
    }

    Ok(())
}
