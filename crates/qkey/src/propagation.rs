//! trust propagation: hand the quorum key to a new instance
//!
//! ```text
//!   new instance (B)                         provisioned instance (A)
//!   share_manifest(envelope)
//!   generate_attestation ---- document ---->  export_key
//!                                             verify attestation
//!                                             encrypt to attested key
//!   inject_key <------- ExportedKey --------  sign under quorum key
//! ```
//!
//! A never changes state while exporting. every check B does on the
//! forwarded key is an integrity check and escalates on failure.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::attestation::{verify_attestation, AttestationDocument, Attestor};
use crate::crypto::{self, EncryptionKeypair};
use crate::enclave::{finish_provisioning, Enclave};
use crate::lifecycle::{Event, Phase};
use crate::manifest::{Canonical, ManifestEnvelope, Measurement};
use crate::secret::RootSecret;
use crate::{Error, Result};

const EXPORT_DOMAIN: &[u8] = b"qkey:key-export:v1";

/// quorum key encrypted to an attested instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportedKey {
    #[serde(with = "crate::hex_serde::bytes")]
    pub encrypted_root_secret: Vec<u8>,
    /// ed25519 under the quorum key, see `export_payload`
    #[serde(with = "crate::hex_serde::array")]
    pub signature: [u8; 64],
}

/// bytes covered by the export signature
fn export_payload(manifest_hash: &[u8; 32], ciphertext: &[u8]) -> Vec<u8> {
    let mut enc = Canonical::new(EXPORT_DOMAIN);
    enc.bytes(manifest_hash).bytes(ciphertext);
    enc.finish()
}

impl<A: Attestor> Enclave<A> {
    /// adopt a peer's manifest and wait for its forwarded key
    pub fn share_manifest(&self, envelope: ManifestEnvelope) -> Result<()> {
        let mut state = self.lifecycle.write()?;
        if state.check(Event::ManifestReceived).is_err() {
            return Err(Error::AlreadyInitialized);
        }
        envelope.validate()?;

        info!(
            namespace = %envelope.manifest.namespace.name,
            manifest = %hex::encode(envelope.manifest_hash()),
            "manifest received, waiting for forwarded key"
        );
        state.commit_envelope(Event::ManifestReceived, envelope)?;
        Ok(())
    }

    /// attest to a fresh import key, bound to the stored manifest
    ///
    /// may be called again; the previous import key is replaced
    pub fn generate_attestation(
        &self,
        manifest_hash: &[u8; 32],
        measurements: &[Measurement],
    ) -> Result<AttestationDocument> {
        let mut state = self.lifecycle.write()?;
        if state.phase() != Phase::WaitingForForwardedKey {
            return Err(Error::IllegalStateTransition {
                phase: state.phase(),
                event: Event::ForwardedKeyAccepted,
            });
        }

        let stored = state.envelope().map(|e| e.manifest_hash()).ok_or(Error::NotProvisioned)?;
        if !crypto::ct_eq(&stored, manifest_hash) {
            return Err(Error::ManifestMismatch("attestation requested for another manifest"));
        }

        let import_key = EncryptionKeypair::generate();
        let doc = self
            .attestor
            .attest(manifest_hash, &import_key.public_key(), measurements)?;
        state.set_import_key(import_key);

        info!(public_key = %hex::encode(doc.public_key), "attestation generated");
        Ok(doc)
    }

    /// encrypt the quorum key to an attested peer
    pub fn export_key(&self, envelope: &ManifestEnvelope, doc: &AttestationDocument) -> Result<ExportedKey> {
        let state = self.lifecycle.read()?;
        let secret = match (state.phase(), state.root_secret()) {
            (Phase::ApplicationReady, Some(secret)) => secret,
            _ => return Err(Error::NotProvisioned),
        };
        let local = state.envelope().ok_or(Error::NotProvisioned)?;

        let manifest_hash = local.manifest_hash();
        if !crypto::ct_eq(&envelope.manifest_hash(), &manifest_hash) {
            warn!("export refused, presented manifest differs from ours");
            return Err(Error::ManifestMismatch("presented manifest"));
        }
        if let Err(e) = verify_attestation(doc, &local.manifest, &self.trusted_attestors) {
            warn!(kind = e.kind(), "export refused, attestation rejected");
            return Err(e);
        }

        let encrypted_root_secret = crypto::asymmetric_encrypt(secret.expose(), &doc.public_key)?;
        let signing_key = secret.signing_key()?;
        let signature = crypto::sign(&export_payload(&manifest_hash, &encrypted_root_secret), &signing_key);

        info!(recipient = %hex::encode(doc.public_key), "quorum key exported");
        Ok(ExportedKey { encrypted_root_secret, signature })
    }

    /// accept a forwarded quorum key
    pub fn inject_key(&self, exported: &ExportedKey) -> Result<()> {
        let mut state = self.lifecycle.write()?;
        state.check(Event::ForwardedKeyAccepted)?;
        let envelope = state.envelope().cloned().ok_or(Error::NotProvisioned)?;
        let Some(import_key) = state.import_key() else {
            return Err(Error::IllegalStateTransition {
                phase: state.phase(),
                event: Event::ForwardedKeyAccepted,
            });
        };

        match accept_forwarded(exported, &envelope, import_key) {
            Ok(secret) => finish_provisioning(&mut state, Event::ForwardedKeyAccepted, secret),
            Err(e) => {
                state.escalate(&e);
                Err(e)
            }
        }
    }
}

/// signature, then decryption, then commitment
fn accept_forwarded(
    exported: &ExportedKey,
    envelope: &ManifestEnvelope,
    import_key: &EncryptionKeypair,
) -> Result<RootSecret> {
    let manifest = &envelope.manifest;
    let payload = export_payload(&envelope.manifest_hash(), &exported.encrypted_root_secret);
    if !crypto::verify(&payload, &exported.signature, &manifest.quorum_public_key) {
        return Err(Error::SignatureInvalid);
    }

    let plain = import_key.decrypt(&exported.encrypted_root_secret)?;
    let secret = RootSecret::from_bytes(&plain).map_err(|_| Error::DecryptionFailed)?;
    if !secret.matches_commitment(&manifest.quorum_public_key)? {
        return Err(Error::ManifestMismatch("forwarded key does not match manifest"));
    }
    Ok(secret)
}
