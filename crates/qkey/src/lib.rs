//! # qkey
//!
//! threshold-protected quorum key for a fleet of attested instances.
//!
//! one instance creates the quorum key at genesis and splits it among a
//! quorum of members. the key comes back only when a threshold of members
//! submits shares, and it spreads to new instances only after they prove
//! (by attestation) that they run the same code the manifest commits to.
//!
//! ## architecture
//!
//! ```text
//!            genesis instance
//!    ┌──────────────────────────────┐
//!    │ quorum key ──► shamir split  │──► manifest (public key commitment,
//!    │  (dropped)       │ ecies     │     measurements, quorum hash)
//!    └──────────────────┼───────────┘
//!              ┌────────┼────────┐
//!              ▼        ▼        ▼
//!            ┌───┐    ┌───┐    ┌───┐
//!            │ m1│    │ m2│    │ m3│   (members, 2-of-3 threshold)
//!            └─┬─┘    └─┬─┘    └───┘
//!              └───┬────┘ decrypted shares
//!                  ▼
//!    ┌──────────────────────────────┐
//!    │ reconstruct, check commitment│  instance A: application ready
//!    └──────────────┬───────────────┘
//!                   │ attestation gated export
//!                   ▼
//!    ┌──────────────────────────────┐
//!    │ verify, decrypt, check       │  instance B: application ready
//!    └──────────────────────────────┘
//!                   │ hkdf
//!                   ▼
//!        sealed bip39 seed phrases
//! ```
//!
//! ## security properties
//!
//! - fewer than threshold shares reveal nothing about the quorum key
//! - the genesis instance does not keep the quorum key
//! - any key an instance ends up holding is checked against the manifest
//! - export happens only to a trusted attestor vouching for the manifest's measurements
//! - any failed integrity check leaves the instance unrecoverable and keyless
//!
//! ## usage
//!
//! ```rust,ignore
//! use qkey::{Enclave, EnclaveConfig, SoftwareAttestor, Namespace};
//!
//! let enclave = Enclave::new(SoftwareAttestor::new(), config);
//! let out = enclave.genesis_boot(quorum, Namespace::new("custody", 1))?;
//!
//! // members decrypt out.shares offline, then a threshold of them submit
//! enclave.inject_shares(&Namespace::new("custody", 1), &submitted)?;
//!
//! let derived = enclave.derive_and_seal(256, None)?;
//! assert!(enclave.validate(&derived.sealed_secret)?.is_valid);
//! ```

pub mod attestation;
pub mod crypto;
pub mod derive;
pub mod enclave;
pub mod error;
pub mod genesis;
pub mod hex_serde;
pub mod lifecycle;
pub mod manifest;
pub mod propagation;
pub mod provision;
pub mod secret;
pub mod shamir;

#[cfg(all(test, feature = "software"))]
mod testutil;

pub use attestation::{verify_attestation, AttestationDocument, Attestor};
pub use crypto::EncryptionKeypair;
pub use derive::{DerivedSecret, Validation};
pub use enclave::{Enclave, EnclaveConfig};
pub use error::{Error, Result};
pub use genesis::{EncryptedMemberShare, GenesisOutput};
pub use lifecycle::{Event, Phase, Status};
pub use manifest::{Manifest, ManifestEnvelope, Measurement, Namespace, QuorumConfiguration, QuorumMember};
pub use propagation::ExportedKey;
pub use provision::SubmittedShare;
pub use shamir::Share;

#[cfg(feature = "software")]
pub use attestation::SoftwareAttestor;
