//! error types for qkey
//!
//! messages never carry key material, shares or secret bytes

use thiserror::Error;

use crate::lifecycle::{Event, Phase};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    // === caller errors ===
    #[error("invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("not enough shares: have {have}, need {need}")]
    InsufficientShares { have: usize, need: usize },

    #[error("shares do not lie on a common polynomial")]
    InconsistentShares,

    #[error("illegal state transition: {event:?} not allowed in {phase:?}")]
    IllegalStateTransition { phase: Phase, event: Event },

    // === integrity violations ===
    #[error("manifest mismatch: {0}")]
    ManifestMismatch(&'static str),

    #[error("signature invalid")]
    SignatureInvalid,

    #[error("decryption failed")]
    DecryptionFailed,

    #[error("authentication failed")]
    AuthenticationFailed,

    // === precondition violations ===
    #[error("instance holds no quorum key")]
    NotProvisioned,

    #[error("genesis boot already executed")]
    AlreadyBooted,

    #[error("instance already initialized")]
    AlreadyInitialized,

    // === internal ===
    #[error("encryption failed")]
    EncryptionFailed,

    #[error("key derivation failed")]
    KeyDerivationFailed,

    #[error("attestation failed: {0}")]
    AttestationFailed(String),

    #[error("instance state lock poisoned")]
    StatePoisoned,
}

impl Error {
    /// true for the kinds that indicate tampering or corrupted secret material
    pub fn is_integrity_violation(&self) -> bool {
        matches!(
            self,
            Error::ManifestMismatch(_)
                | Error::SignatureInvalid
                | Error::DecryptionFailed
                | Error::AuthenticationFailed
        )
    }

    /// stable identifier for the error kind, for gateways and metrics labels
    pub fn kind(&self) -> &'static str {
        match self {
            Error::InvalidParameters(_) => "invalid_parameters",
            Error::InsufficientShares { .. } => "insufficient_shares",
            Error::InconsistentShares => "inconsistent_shares",
            Error::IllegalStateTransition { .. } => "illegal_state_transition",
            Error::ManifestMismatch(_) => "manifest_mismatch",
            Error::SignatureInvalid => "signature_invalid",
            Error::DecryptionFailed => "decryption_failed",
            Error::AuthenticationFailed => "authentication_failed",
            Error::NotProvisioned => "not_provisioned",
            Error::AlreadyBooted => "already_booted",
            Error::AlreadyInitialized => "already_initialized",
            Error::EncryptionFailed => "encryption_failed",
            Error::KeyDerivationFailed => "key_derivation_failed",
            Error::AttestationFailed(_) => "attestation_failed",
            Error::StatePoisoned => "state_poisoned",
        }
    }
}
