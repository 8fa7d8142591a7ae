//! shared fixtures for unit tests

use crate::attestation::SoftwareAttestor;
use crate::crypto::EncryptionKeypair;
use crate::enclave::{Enclave, EnclaveConfig};
use crate::genesis::GenesisOutput;
use crate::manifest::{Measurement, Namespace, QuorumConfiguration, QuorumMember};
use crate::provision::SubmittedShare;

pub const MEASUREMENTS: [Measurement; 2] = [Measurement([0x0a; 32]), Measurement([0x0b; 32])];

pub fn namespace() -> Namespace {
    Namespace::new("custody", 1)
}

/// enclave that trusts the given attestor identities
pub fn enclave(trusted: &[[u8; 32]]) -> Enclave<SoftwareAttestor> {
    Enclave::new(
        SoftwareAttestor::new(),
        EnclaveConfig {
            measurements: MEASUREMENTS.to_vec(),
            trusted_attestors: trusted.to_vec(),
        },
    )
}

/// a genesis-booted enclave plus the member keys needed to open its shares
pub struct Ceremony {
    pub enclave: Enclave<SoftwareAttestor>,
    pub keys: Vec<EncryptionKeypair>,
    pub out: GenesisOutput,
}

impl Ceremony {
    pub fn run(n: usize, threshold: u8) -> Self {
        Self::run_on(enclave(&[]), n, threshold)
    }

    pub fn run_on(enclave: Enclave<SoftwareAttestor>, n: usize, threshold: u8) -> Self {
        let keys: Vec<_> = (0..n).map(|_| EncryptionKeypair::generate()).collect();
        let quorum = QuorumConfiguration {
            members: keys
                .iter()
                .enumerate()
                .map(|(i, k)| QuorumMember { alias: format!("member-{}", i), public_key: k.public_key() })
                .collect(),
            threshold,
        };
        let out = enclave.genesis_boot(quorum, namespace()).unwrap();
        Self { enclave, keys, out }
    }

    /// decrypted shares of the members at `indices`
    pub fn submitted(&self, indices: &[usize]) -> Vec<SubmittedShare> {
        indices
            .iter()
            .map(|&i| SubmittedShare {
                member_alias: self.out.shares[i].member_alias.clone(),
                decrypted_share: self.out.shares[i].decrypt(&self.keys[i]).unwrap().to_vec(),
            })
            .collect()
    }
}
