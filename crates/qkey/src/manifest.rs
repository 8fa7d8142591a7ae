//! quorum configuration and manifest
//!
//! the manifest is committed once at genesis and never changes. its hash is
//! what a receiving instance attests over during key forwarding, so it is
//! computed over a canonical length-prefixed encoding rather than json.

use serde::{Deserialize, Serialize};

use crate::crypto;
use crate::{Error, Result};

const QUORUM_DOMAIN: &[u8] = b"qkey:quorum:v1";
const MANIFEST_DOMAIN: &[u8] = b"qkey:manifest:v1";

/// members are addressed by x-coordinate 1..=255
pub const MAX_MEMBERS: usize = u8::MAX as usize;

/// deterministic length-prefixed encoder used for hashing and signing
#[derive(Default)]
pub(crate) struct Canonical(Vec<u8>);

impl Canonical {
    pub fn new(domain: &[u8]) -> Self {
        let mut enc = Self::default();
        enc.bytes(domain);
        enc
    }

    pub fn bytes(&mut self, data: &[u8]) -> &mut Self {
        self.0.extend_from_slice(&(data.len() as u32).to_le_bytes());
        self.0.extend_from_slice(data);
        self
    }

    pub fn u64(&mut self, v: u64) -> &mut Self {
        self.0.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn finish(self) -> Vec<u8> {
        self.0
    }

    pub fn hash(self) -> [u8; 32] {
        crypto::hash(&self.0)
    }
}

/// digest identifying the code or environment an instance runs
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Measurement(#[serde(with = "crate::hex_serde::array")] pub [u8; 32]);

impl Measurement {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl std::fmt::Debug for Measurement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Measurement({})", hex::encode(self.0))
    }
}

impl From<[u8; 32]> for Measurement {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

/// namespace the quorum key belongs to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Namespace {
    pub name: String,
    pub nonce: u64,
}

impl Namespace {
    pub fn new(name: impl Into<String>, nonce: u64) -> Self {
        Self { name: name.into(), nonce }
    }
}

/// quorum member: alias plus the x25519 key its share is encrypted to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuorumMember {
    pub alias: String,
    #[serde(with = "crate::hex_serde::array")]
    pub public_key: [u8; 32],
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuorumConfiguration {
    /// ordered; a member's share sits at x = position + 1
    pub members: Vec<QuorumMember>,
    pub threshold: u8,
}

impl QuorumConfiguration {
    pub fn validate(&self) -> Result<()> {
        let n = self.members.len();
        if n == 0 {
            return Err(Error::InvalidParameters("quorum needs at least one member".into()));
        }
        if n > MAX_MEMBERS {
            return Err(Error::InvalidParameters(format!(
                "quorum has {} members, at most {} supported",
                n, MAX_MEMBERS
            )));
        }
        if self.threshold == 0 || self.threshold as usize > n {
            return Err(Error::InvalidParameters(format!(
                "threshold must be within 1..={}, got {}",
                n, self.threshold
            )));
        }
        for (i, member) in self.members.iter().enumerate() {
            if member.alias.is_empty() {
                return Err(Error::InvalidParameters("member alias must not be empty".into()));
            }
            if self.members[..i].iter().any(|m| m.alias == member.alias) {
                return Err(Error::InvalidParameters(format!(
                    "duplicate member alias: {}",
                    member.alias
                )));
            }
        }
        Ok(())
    }

    /// number of members, checked by `validate` to fit a share x-coordinate
    pub fn member_count(&self) -> u8 {
        self.members.len().min(MAX_MEMBERS) as u8
    }

    /// share x-coordinate for a member alias
    pub fn share_index(&self, alias: &str) -> Option<u8> {
        self.members
            .iter()
            .position(|m| m.alias == alias)
            .map(|i| (i + 1) as u8)
    }

    pub fn hash(&self) -> [u8; 32] {
        let mut enc = Canonical::new(QUORUM_DOMAIN);
        enc.u64(self.threshold as u64).u64(self.members.len() as u64);
        for member in &self.members {
            enc.bytes(member.alias.as_bytes()).bytes(&member.public_key);
        }
        enc.hash()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub namespace: Namespace,
    #[serde(with = "crate::hex_serde::array")]
    pub quorum_configuration_hash: [u8; 32],
    /// ordered; compared exactly against attestation documents
    pub instance_measurements: Vec<Measurement>,
    /// ed25519 verifying key of the quorum signing key
    #[serde(with = "crate::hex_serde::array")]
    pub quorum_public_key: [u8; 32],
}

impl Manifest {
    pub fn hash(&self) -> [u8; 32] {
        let mut enc = Canonical::new(MANIFEST_DOMAIN);
        enc.bytes(self.namespace.name.as_bytes())
            .u64(self.namespace.nonce)
            .bytes(&self.quorum_configuration_hash)
            .u64(self.instance_measurements.len() as u64);
        for m in &self.instance_measurements {
            enc.bytes(m.as_bytes());
        }
        enc.bytes(&self.quorum_public_key);
        enc.hash()
    }
}

/// manifest plus the quorum configuration it commits to, as carried
/// between instances
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEnvelope {
    pub manifest: Manifest,
    pub quorum: QuorumConfiguration,
}

impl ManifestEnvelope {
    /// check the carried quorum is the one the manifest committed to
    pub fn validate(&self) -> Result<()> {
        self.quorum.validate()?;
        if self.manifest.namespace.name.is_empty() {
            return Err(Error::InvalidParameters("namespace name must not be empty".into()));
        }
        if !crypto::ct_eq(&self.quorum.hash(), &self.manifest.quorum_configuration_hash) {
            return Err(Error::ManifestMismatch("quorum configuration hash"));
        }
        Ok(())
    }

    pub fn manifest_hash(&self) -> [u8; 32] {
        self.manifest.hash()
    }
}
