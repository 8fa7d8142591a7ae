//! instance lifecycle state machine
//!
//! ```text
//!                    WaitingForBootInstruction
//!          genesis /         | standard boot  \ manifest from peer
//!                 v          v                 v
//!        GenesisBooted -> WaitingForQuorumShards   WaitingForForwardedKey
//!                 \          /                       |
//!          shares  \        / shares      forwarded  |
//!                   v      v               key       |
//!               QuorumKeyProvisioned <---------------+
//!                        | readiness check
//!                        v
//!                  ApplicationReady
//!
//!   any phase --integrity violation--> UnrecoverableError (terminal)
//! ```
//!
//! `transition` is the pure table. `Lifecycle` is the single owner of the
//! `InstanceState`; every check-then-act sequence runs under its write
//! guard, read-only work in `ApplicationReady` under its read guard.

use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::crypto::EncryptionKeypair;
use crate::manifest::ManifestEnvelope;
use crate::secret::RootSecret;
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    WaitingForBootInstruction,
    GenesisBooted,
    WaitingForQuorumShards,
    WaitingForForwardedKey,
    QuorumKeyProvisioned,
    ApplicationReady,
    UnrecoverableError,
}

impl Phase {
    pub const ALL: [Phase; 7] = [
        Phase::WaitingForBootInstruction,
        Phase::GenesisBooted,
        Phase::WaitingForQuorumShards,
        Phase::WaitingForForwardedKey,
        Phase::QuorumKeyProvisioned,
        Phase::ApplicationReady,
        Phase::UnrecoverableError,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::WaitingForBootInstruction => "waiting_for_boot_instruction",
            Phase::GenesisBooted => "genesis_booted",
            Phase::WaitingForQuorumShards => "waiting_for_quorum_shards",
            Phase::WaitingForForwardedKey => "waiting_for_forwarded_key",
            Phase::QuorumKeyProvisioned => "quorum_key_provisioned",
            Phase::ApplicationReady => "application_ready",
            Phase::UnrecoverableError => "unrecoverable_error",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Event {
    /// genesis ceremony produced a manifest and encrypted shares
    GenesisBooted,
    /// booted with an existing manifest, waiting for quorum members
    StandardBooted,
    /// manifest received from a provisioned peer
    ManifestReceived,
    /// a share submission did not reach the threshold
    SharesIncomplete,
    /// shares reconstructed a key matching the committed public key
    QuorumKeyReconstructed,
    /// forwarded key verified, decrypted and matched
    ForwardedKeyAccepted,
    /// internal readiness check passed
    ReadinessConfirmed,
    /// any integrity check failed
    IntegrityViolation,
}

impl Event {
    pub const ALL: [Event; 8] = [
        Event::GenesisBooted,
        Event::StandardBooted,
        Event::ManifestReceived,
        Event::SharesIncomplete,
        Event::QuorumKeyReconstructed,
        Event::ForwardedKeyAccepted,
        Event::ReadinessConfirmed,
        Event::IntegrityViolation,
    ];
}

/// the transition table; anything not listed is `IllegalStateTransition`
pub fn transition(from: Phase, event: Event) -> Result<Phase> {
    use Event as E;
    use Phase as P;

    let to = match (from, event) {
        (P::WaitingForBootInstruction, E::GenesisBooted) => P::GenesisBooted,
        (P::WaitingForBootInstruction, E::StandardBooted) => P::WaitingForQuorumShards,
        (P::WaitingForBootInstruction, E::ManifestReceived) => P::WaitingForForwardedKey,
        (P::GenesisBooted | P::WaitingForQuorumShards, E::SharesIncomplete) => P::WaitingForQuorumShards,
        (P::GenesisBooted | P::WaitingForQuorumShards, E::QuorumKeyReconstructed) => P::QuorumKeyProvisioned,
        (P::WaitingForForwardedKey, E::ForwardedKeyAccepted) => P::QuorumKeyProvisioned,
        (P::QuorumKeyProvisioned, E::ReadinessConfirmed) => P::ApplicationReady,
        (P::UnrecoverableError, _) => {
            return Err(Error::IllegalStateTransition { phase: from, event })
        }
        (_, E::IntegrityViolation) => P::UnrecoverableError,
        _ => return Err(Error::IllegalStateTransition { phase: from, event }),
    };
    Ok(to)
}

/// answer to a status query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    pub phase: Phase,
    pub has_root_secret: bool,
}

/// everything an instance knows; only `Lifecycle` creates one
pub struct InstanceState {
    phase: Phase,
    root_secret: Option<RootSecret>,
    envelope: Option<ManifestEnvelope>,
    /// x25519 key a forwarded quorum key is expected under
    import_key: Option<EncryptionKeypair>,
}

impl InstanceState {
    fn new() -> Self {
        Self {
            phase: Phase::WaitingForBootInstruction,
            root_secret: None,
            envelope: None,
            import_key: None,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn status(&self) -> Status {
        Status {
            phase: self.phase,
            has_root_secret: self.root_secret.is_some(),
        }
    }

    pub(crate) fn envelope(&self) -> Option<&ManifestEnvelope> {
        self.envelope.as_ref()
    }

    pub(crate) fn root_secret(&self) -> Option<&RootSecret> {
        self.root_secret.as_ref()
    }

    pub(crate) fn import_key(&self) -> Option<&EncryptionKeypair> {
        self.import_key.as_ref()
    }

    /// fail with `IllegalStateTransition` unless `event` is legal right now
    pub(crate) fn check(&self, event: Event) -> Result<Phase> {
        transition(self.phase, event)
    }

    /// apply `event`; on error nothing changes
    pub(crate) fn apply(&mut self, event: Event) -> Result<Phase> {
        let next = transition(self.phase, event)?;
        if next != self.phase {
            info!(from = %self.phase, to = %next, "phase transition");
        }
        self.phase = next;
        Ok(next)
    }

    /// apply `event` and record the manifest it was triggered by
    pub(crate) fn commit_envelope(&mut self, event: Event, envelope: ManifestEnvelope) -> Result<Phase> {
        let next = self.apply(event)?;
        self.envelope = Some(envelope);
        Ok(next)
    }

    /// apply a provisioning event and take ownership of the quorum key
    pub(crate) fn provision(&mut self, event: Event, secret: RootSecret) -> Result<Phase> {
        let next = self.apply(event)?;
        self.root_secret = Some(secret);
        self.import_key = None;
        Ok(next)
    }

    pub(crate) fn set_import_key(&mut self, key: EncryptionKeypair) {
        self.import_key = Some(key);
    }

    /// move to `UnrecoverableError` and drop every secret held
    pub(crate) fn escalate(&mut self, cause: &Error) {
        error!(phase = %self.phase, kind = cause.kind(), "integrity violation, instance is unrecoverable");
        if let Ok(next) = transition(self.phase, Event::IntegrityViolation) {
            self.phase = next;
        }
        self.root_secret = None;
        self.import_key = None;
    }
}

/// single-writer accessor for the instance state
pub struct Lifecycle {
    state: RwLock<InstanceState>,
}

impl Lifecycle {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(InstanceState::new()),
        }
    }

    /// read-only, available in every phase
    pub fn status(&self) -> Result<Status> {
        Ok(self.read()?.status())
    }

    pub(crate) fn read(&self) -> Result<RwLockReadGuard<'_, InstanceState>> {
        self.state.read().map_err(|_| Error::StatePoisoned)
    }

    pub(crate) fn write(&self) -> Result<RwLockWriteGuard<'_, InstanceState>> {
        self.state.write().map_err(|_| Error::StatePoisoned)
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}
