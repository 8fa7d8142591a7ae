//! enclave: the protected boundary around one instance
//!
//! ties together the lifecycle, the attestor and the instance's own
//! identity. the operations live next to their protocol step:
//! - `genesis`: genesis_boot
//! - `provision`: boot_standard, inject_shares
//! - `propagation`: share_manifest, generate_attestation, export_key, inject_key
//! - `derive`: derive_and_seal, validate

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::attestation::Attestor;
use crate::crypto;
use crate::lifecycle::{Event, InstanceState, Lifecycle, Status};
use crate::manifest::{Manifest, Measurement};
use crate::secret::RootSecret;
use crate::{Error, Result};

const READINESS_PROBE: &[u8] = b"qkey:readiness-probe:v1";

/// what an instance knows about itself and whom it trusts
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnclaveConfig {
    /// measurements committed into manifests created by this instance
    #[serde(default)]
    pub measurements: Vec<Measurement>,
    /// attestor identities whose documents this instance accepts
    #[serde(default, with = "crate::hex_serde::array_vec")]
    pub trusted_attestors: Vec<[u8; 32]>,
}

pub struct Enclave<A: Attestor> {
    pub(crate) lifecycle: Lifecycle,
    pub(crate) attestor: A,
    pub(crate) measurements: Vec<Measurement>,
    pub(crate) trusted_attestors: Vec<[u8; 32]>,
}

impl<A: Attestor> Enclave<A> {
    pub fn new(attestor: A, config: EnclaveConfig) -> Self {
        info!(
            attestor = %hex::encode(attestor.identity()),
            measurements = config.measurements.len(),
            trusted_attestors = config.trusted_attestors.len(),
            "enclave created"
        );
        Self {
            lifecycle: Lifecycle::new(),
            attestor,
            measurements: config.measurements,
            trusted_attestors: config.trusted_attestors,
        }
    }

    /// read-only, available in every phase
    pub fn status(&self) -> Result<Status> {
        self.lifecycle.status()
    }

    pub fn attestor(&self) -> &A {
        &self.attestor
    }

    pub fn measurements(&self) -> &[Measurement] {
        &self.measurements
    }

    /// committed manifest, once there is one
    pub fn manifest(&self) -> Result<Option<Manifest>> {
        Ok(self.lifecycle.read()?.envelope().map(|e| e.manifest.clone()))
    }
}

/// sign and verify a probe under the quorum key against the committed key
fn readiness_check(secret: &RootSecret, manifest: &Manifest) -> Result<()> {
    let key = secret.signing_key()?;
    let probe = crypto::sign(READINESS_PROBE, &key);
    if crypto::verify(READINESS_PROBE, &probe, &manifest.quorum_public_key) {
        Ok(())
    } else {
        Err(Error::ManifestMismatch("quorum key failed readiness probe"))
    }
}

/// store a verified quorum key and walk the instance to `ApplicationReady`
///
/// `event` is the provisioning event for the current phase. a failing
/// readiness check escalates.
pub(crate) fn finish_provisioning(state: &mut InstanceState, event: Event, secret: RootSecret) -> Result<()> {
    let manifest = state
        .envelope()
        .map(|e| e.manifest.clone())
        .ok_or(Error::NotProvisioned)?;

    state.provision(event, secret)?;

    let ready = match state.root_secret() {
        Some(secret) => readiness_check(secret, &manifest),
        None => Err(Error::NotProvisioned),
    };
    if let Err(e) = ready {
        state.escalate(&e);
        return Err(e);
    }

    state.apply(Event::ReadinessConfirmed)?;
    info!(namespace = %manifest.namespace.name, "quorum key provisioned, application ready");
    Ok(())
}

#[cfg(all(test, feature = "software"))]
mod tests {
    use super::*;
    use crate::attestation::SoftwareAttestor;
    use crate::manifest::Namespace;

    #[test]
    fn test_readiness_check() {
        let secret = RootSecret::generate();
        let mut manifest = Manifest {
            namespace: Namespace::new("custody", 1),
            quorum_configuration_hash: [0u8; 32],
            instance_measurements: vec![],
            quorum_public_key: secret.public_key().unwrap(),
        };
        assert!(readiness_check(&secret, &manifest).is_ok());

        manifest.quorum_public_key = RootSecret::generate().public_key().unwrap();
        assert!(matches!(readiness_check(&secret, &manifest), Err(Error::ManifestMismatch(_))));
    }

    #[test]
    fn test_config_json() {
        let json = r#"{
            "measurements": ["1111111111111111111111111111111111111111111111111111111111111111"],
            "trusted_attestors": ["2222222222222222222222222222222222222222222222222222222222222222"]
        }"#;
        let config: EnclaveConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.measurements, vec![Measurement([0x11; 32])]);
        assert_eq!(config.trusted_attestors, vec![[0x22; 32]]);

        let empty: EnclaveConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(empty, EnclaveConfig::default());
    }

    #[test]
    fn test_fresh_enclave_status() {
        let enclave = Enclave::new(SoftwareAttestor::new(), EnclaveConfig::default());
        let status = enclave.status().unwrap();
        assert_eq!(status.phase, crate::Phase::WaitingForBootInstruction);
        assert!(!status.has_root_secret);
        assert!(enclave.manifest().unwrap().is_none());
    }
}
