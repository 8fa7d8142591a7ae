//! provisioning by the quorum: standard boot and share injection
//!
//! members decrypt their shares outside the instance and submit them in
//! plaintext. a submission below the threshold parks the instance in
//! `WaitingForQuorumShards`; a submission that reconstructs a key other
//! than the committed one is an integrity violation.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::attestation::Attestor;
use crate::enclave::{finish_provisioning, Enclave};
use crate::lifecycle::Event;
use crate::manifest::{ManifestEnvelope, Namespace};
use crate::secret::RootSecret;
use crate::shamir::{self, Share};
use crate::{Error, Result};

/// a member's decrypted share
#[derive(Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct SubmittedShare {
    pub member_alias: String,
    #[serde(with = "crate::hex_serde::bytes")]
    pub decrypted_share: Vec<u8>,
}

impl std::fmt::Debug for SubmittedShare {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubmittedShare")
            .field("member_alias", &self.member_alias)
            .finish_non_exhaustive()
    }
}

impl<A: Attestor> Enclave<A> {
    /// boot with an existing manifest and wait for quorum members
    pub fn boot_standard(&self, envelope: ManifestEnvelope) -> Result<()> {
        let mut state = self.lifecycle.write()?;
        if state.check(Event::StandardBooted).is_err() {
            return Err(Error::AlreadyInitialized);
        }
        envelope.validate()?;

        info!(
            namespace = %envelope.manifest.namespace.name,
            manifest = %hex::encode(envelope.manifest_hash()),
            "standard boot, waiting for quorum shares"
        );
        state.commit_envelope(Event::StandardBooted, envelope)?;
        Ok(())
    }

    /// reconstruct the quorum key from member shares
    pub fn inject_shares(&self, namespace: &Namespace, shares: &[SubmittedShare]) -> Result<()> {
        let mut state = self.lifecycle.write()?;
        state.check(Event::QuorumKeyReconstructed)?;

        let envelope = state.envelope().cloned().ok_or(Error::NotProvisioned)?;
        let manifest = &envelope.manifest;
        if manifest.namespace.name != namespace.name || manifest.namespace.nonce != namespace.nonce {
            return Err(Error::ManifestMismatch("namespace"));
        }

        let mut parsed = Vec::with_capacity(shares.len());
        for submitted in shares {
            let alias = &submitted.member_alias;
            let x = envelope
                .quorum
                .share_index(alias)
                .ok_or_else(|| Error::InvalidParameters(format!("unknown quorum member: {}", alias)))?;
            let share = Share::from_bytes(&submitted.decrypted_share)?;
            if share.x != x {
                return Err(Error::InvalidParameters(format!(
                    "share submitted for {} belongs to another member",
                    alias
                )));
            }
            parsed.push(share);
        }

        let key = match shamir::reconstruct(&parsed, envelope.quorum.threshold) {
            Ok(key) => key,
            Err(e @ Error::InsufficientShares { .. }) => {
                state.apply(Event::SharesIncomplete)?;
                warn!(%e, "share submission below threshold");
                return Err(e);
            }
            Err(e) => return Err(e),
        };

        let secret = RootSecret::from_bytes(key.as_slice())?;
        if !secret.matches_commitment(&manifest.quorum_public_key)? {
            let err = Error::ManifestMismatch("reconstructed quorum key does not match manifest");
            state.escalate(&err);
            return Err(err);
        }

        finish_provisioning(&mut state, Event::QuorumKeyReconstructed, secret)
    }
}
