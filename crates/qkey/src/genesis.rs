//! genesis boot: create the quorum key and hand it out as encrypted shares
//!
//! the quorum key exists only for the duration of `genesis_boot`. it is
//! split, each share is encrypted to its member, and the key is dropped
//! (zeroized). the instance gets it back only through share injection.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use zeroize::Zeroizing;

use crate::attestation::Attestor;
use crate::crypto::{self, EncryptionKeypair};
use crate::enclave::Enclave;
use crate::lifecycle::Event;
use crate::manifest::{Manifest, ManifestEnvelope, Namespace, QuorumConfiguration};
use crate::secret::RootSecret;
use crate::shamir;
use crate::{Error, Result};

/// one member's share, encrypted to their public key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedMemberShare {
    pub member_alias: String,
    #[serde(with = "crate::hex_serde::bytes")]
    pub encrypted_quorum_key_share: Vec<u8>,
    /// sha-256 of the plaintext share, lets the member check decryption
    #[serde(with = "crate::hex_serde::array")]
    pub share_hash: [u8; 32],
}

impl EncryptedMemberShare {
    /// member side: decrypt and check against `share_hash`
    pub fn decrypt(&self, member_key: &EncryptionKeypair) -> Result<Zeroizing<Vec<u8>>> {
        let share = member_key.decrypt(&self.encrypted_quorum_key_share)?;
        if !crypto::ct_eq(&crypto::hash(&share), &self.share_hash) {
            return Err(Error::DecryptionFailed);
        }
        Ok(share)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenesisOutput {
    #[serde(rename = "manifest_envelope")]
    pub envelope: ManifestEnvelope,
    /// in quorum member order
    #[serde(rename = "encrypted_shares")]
    pub shares: Vec<EncryptedMemberShare>,
}

impl<A: Attestor> Enclave<A> {
    /// run the genesis ceremony
    ///
    /// only legal in `WaitingForBootInstruction`; anywhere else this is
    /// `AlreadyBooted` and the instance is left untouched
    pub fn genesis_boot(&self, quorum: QuorumConfiguration, namespace: Namespace) -> Result<GenesisOutput> {
        let mut state = self.lifecycle.write()?;
        if state.check(Event::GenesisBooted).is_err() {
            warn!(phase = %state.phase(), "genesis boot rejected, instance already booted");
            return Err(Error::AlreadyBooted);
        }

        quorum.validate()?;
        if namespace.name.is_empty() {
            return Err(Error::InvalidParameters("namespace name must not be empty".into()));
        }

        let secret = RootSecret::generate();
        let manifest = Manifest {
            namespace,
            quorum_configuration_hash: quorum.hash(),
            instance_measurements: self.measurements.clone(),
            quorum_public_key: secret.public_key()?,
        };

        let shares = shamir::split(secret.expose(), quorum.threshold, quorum.member_count())?;
        drop(secret);

        let encrypted = quorum
            .members
            .iter()
            .zip(&shares)
            .map(|(member, share)| {
                let bytes = share.to_bytes();
                Ok(EncryptedMemberShare {
                    member_alias: member.alias.clone(),
                    encrypted_quorum_key_share: crypto::asymmetric_encrypt(bytes.as_slice(), &member.public_key)?,
                    share_hash: crypto::hash(bytes.as_slice()),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let envelope = ManifestEnvelope { manifest, quorum };
        state.commit_envelope(Event::GenesisBooted, envelope.clone())?;

        info!(
            namespace = %envelope.manifest.namespace.name,
            nonce = envelope.manifest.namespace.nonce,
            members = envelope.quorum.members.len(),
            threshold = envelope.quorum.threshold,
            manifest = %hex::encode(envelope.manifest_hash()),
            "genesis boot complete"
        );

        Ok(GenesisOutput { envelope, shares: encrypted })
    }
}
