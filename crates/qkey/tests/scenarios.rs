//! end to end ceremonies across instances, through the public api only

use qkey::{
    Attestor, Enclave, EnclaveConfig, EncryptionKeypair, Error, GenesisOutput, Measurement, Namespace,
    Phase, QuorumConfiguration, QuorumMember, SoftwareAttestor, SubmittedShare,
};

const MEASUREMENTS: [Measurement; 3] = [
    Measurement([0x01; 32]),
    Measurement([0x02; 32]),
    Measurement([0x03; 32]),
];

fn namespace() -> Namespace {
    Namespace::new("treasury", 3)
}

fn instance(trusted: Vec<[u8; 32]>) -> Enclave<SoftwareAttestor> {
    Enclave::new(
        SoftwareAttestor::new(),
        EnclaveConfig { measurements: MEASUREMENTS.to_vec(), trusted_attestors: trusted },
    )
}

struct Quorum {
    keys: Vec<EncryptionKeypair>,
    config: QuorumConfiguration,
}

impl Quorum {
    fn new(n: usize, threshold: u8) -> Self {
        let keys: Vec<_> = (0..n).map(|_| EncryptionKeypair::generate()).collect();
        let members = ["alice", "bob", "carol", "dave", "erin", "frank", "grace"]
            .iter()
            .zip(&keys)
            .map(|(alias, key)| QuorumMember { alias: alias.to_string(), public_key: key.public_key() })
            .collect();
        Self { config: QuorumConfiguration { members, threshold }, keys }
    }

    /// what the members at `indices` would submit after decrypting offline
    fn submit(&self, out: &GenesisOutput, indices: &[usize]) -> Vec<SubmittedShare> {
        indices
            .iter()
            .map(|&i| {
                let share = &out.shares[i];
                SubmittedShare {
                    member_alias: share.member_alias.clone(),
                    decrypted_share: share.decrypt(&self.keys[i]).unwrap().to_vec(),
                }
            })
            .collect()
    }
}

/// genesis on a fresh instance, then provision it with `indices`
fn provisioned(instance: &Enclave<SoftwareAttestor>, quorum: &Quorum, indices: &[usize]) -> GenesisOutput {
    let out = instance.genesis_boot(quorum.config.clone(), namespace()).unwrap();
    instance.inject_shares(&namespace(), &quorum.submit(&out, indices)).unwrap();
    out
}

/// B runs the forwarding protocol against A
fn propagate(
    a: &Enclave<SoftwareAttestor>,
    b: &Enclave<SoftwareAttestor>,
    out: &GenesisOutput,
    measurements: &[Measurement],
) -> Result<(), Error> {
    b.share_manifest(out.envelope.clone())?;
    let doc = b.generate_attestation(&out.envelope.manifest_hash(), measurements)?;
    let exported = a.export_key(&out.envelope, &doc)?;
    b.inject_key(&exported)
}

#[test]
fn any_three_of_five_provision() {
    let quorum = Quorum::new(5, 3);
    for indices in [[0, 1, 2], [0, 2, 4], [1, 3, 4], [4, 3, 0]] {
        let a = instance(vec![]);
        provisioned(&a, &quorum, &indices);
        assert_eq!(a.status().unwrap().phase, Phase::ApplicationReady);
    }
}

#[test]
fn two_of_five_wait_for_more() {
    let quorum = Quorum::new(5, 3);
    let a = instance(vec![]);
    let out = a.genesis_boot(quorum.config.clone(), namespace()).unwrap();

    let result = a.inject_shares(&namespace(), &quorum.submit(&out, &[0, 1]));
    assert!(matches!(result, Err(Error::InsufficientShares { have: 2, need: 3 })));

    let status = a.status().unwrap();
    assert_eq!(status.phase, Phase::WaitingForQuorumShards);
    assert!(!status.has_root_secret);
}

#[test]
fn propagated_instances_share_derivations() {
    let b = instance(vec![]);
    let a = instance(vec![b.attestor().identity()]);
    let quorum = Quorum::new(3, 2);
    let out = provisioned(&a, &quorum, &[0, 2]);

    propagate(&a, &b, &out, &MEASUREMENTS).unwrap();
    assert_eq!(b.status().unwrap().phase, Phase::ApplicationReady);
    assert_eq!(a.status().unwrap().phase, Phase::ApplicationReady);

    let from_a = a.derive_and_seal(256, None).unwrap();
    let from_b = b.derive_and_seal(128, Some("correct horse".into())).unwrap();
    assert_eq!(from_a.word_count, 24);
    assert_eq!(from_b.word_count, 12);

    for instance in [&a, &b] {
        assert!(instance.validate(&from_a.sealed_secret).unwrap().is_valid);
        assert!(instance.validate(&from_b.sealed_secret).unwrap().is_valid);
    }
}

#[test]
fn tampered_measurements_block_export() {
    let b = instance(vec![]);
    let a = instance(vec![b.attestor().identity()]);
    let quorum = Quorum::new(3, 2);
    let out = provisioned(&a, &quorum, &[0, 1]);

    let mut tampered = MEASUREMENTS;
    tampered[1] = Measurement([0xee; 32]);
    let result = propagate(&a, &b, &out, &tampered);
    assert!(matches!(result, Err(Error::ManifestMismatch(_))));

    assert_eq!(a.status().unwrap().phase, Phase::ApplicationReady);
    let b_status = b.status().unwrap();
    assert_eq!(b_status.phase, Phase::WaitingForForwardedKey);
    assert!(!b_status.has_root_secret);
}

#[test]
fn unrelated_instance_cannot_validate() {
    let quorum = Quorum::new(3, 2);
    let a = instance(vec![]);
    let other = instance(vec![]);
    provisioned(&a, &quorum, &[0, 1]);
    provisioned(&other, &quorum, &[1, 2]);

    let derived = a.derive_and_seal(192, None).unwrap();
    assert_eq!(derived.word_count, 18);
    assert!(matches!(other.validate(&derived.sealed_secret), Err(Error::AuthenticationFailed)));
}

#[test]
fn operations_out_of_phase() {
    let quorum = Quorum::new(3, 2);
    let a = instance(vec![]);

    assert!(matches!(
        a.inject_shares(&namespace(), &[]),
        Err(Error::IllegalStateTransition { phase: Phase::WaitingForBootInstruction, .. })
    ));
    assert!(matches!(a.derive_and_seal(256, None), Err(Error::NotProvisioned)));

    let out = provisioned(&a, &quorum, &[0, 1]);
    assert!(matches!(
        a.genesis_boot(quorum.config.clone(), namespace()),
        Err(Error::AlreadyBooted)
    ));
    assert!(matches!(a.boot_standard(out.envelope.clone()), Err(Error::AlreadyInitialized)));
    assert!(matches!(a.share_manifest(out.envelope), Err(Error::AlreadyInitialized)));
    assert_eq!(a.status().unwrap().phase, Phase::ApplicationReady);
}

#[test]
fn restarted_instance_recovers_from_quorum() {
    let quorum = Quorum::new(4, 3);
    let first = instance(vec![]);
    let out = provisioned(&first, &quorum, &[0, 1, 2]);
    let derived = first.derive_and_seal(128, None).unwrap();

    let restarted = instance(vec![]);
    restarted.boot_standard(out.envelope.clone()).unwrap();
    restarted.inject_shares(&namespace(), &quorum.submit(&out, &[3, 1, 2])).unwrap();

    assert_eq!(restarted.status().unwrap().phase, Phase::ApplicationReady);
    assert!(restarted.validate(&derived.sealed_secret).unwrap().is_valid);
}

#[test]
fn genesis_output_round_trips_as_json() {
    let quorum = Quorum::new(3, 2);
    let a = instance(vec![]);
    let out = a.genesis_boot(quorum.config.clone(), namespace()).unwrap();

    let json = serde_json::to_string(&out).unwrap();
    assert!(json.contains("\"manifest_envelope\"") && json.contains("\"encrypted_shares\""));
    let parsed: GenesisOutput = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed.envelope, out.envelope);

    a.inject_shares(&namespace(), &quorum.submit(&parsed, &[2, 0])).unwrap();
    assert_eq!(a.status().unwrap().phase, Phase::ApplicationReady);
}
