use std::sync::Arc;

use super::*;
use crate::{
    messages::{SignedState, SyncParams, SyncPayload, TakeActionParams},
    sig::Signer,
    store::MemoryStore,
    testing::{
        channel_between, counter_app, counter_state, network, signer, CounterApp, MockChain,
        COUNTER_APP,
    },
};

/// A channel between signers 1 and 2 with a counter app installed, stored
/// in `store`.
struct Fixture {
    store: MemoryStore,
    chain: MockChain,
    registry: AppRegistry,
    network: NetworkContext,
    a: Signer,
    b: Signer,
    channel: StateChannel,
    app: AppInstance,
}

fn fixture() -> Fixture {
    let (a, b) = (signer(1), signer(2));
    let channel = channel_between(&a, &b);
    let proposal = counter_app(&channel, *a.identifier(), *b.identifier(), 0);
    let hash = proposal.identity_hash;
    let channel = channel
        .add_proposal(proposal)
        .unwrap()
        .install_app(&hash)
        .unwrap();
    let app = channel.app_instance(&hash).unwrap().clone();

    let store = MemoryStore::new();
    store.create_state_channel(&channel).unwrap();
    let mut registry = AppRegistry::new();
    registry.register(COUNTER_APP, Arc::new(CounterApp));

    Fixture {
        store,
        chain: MockChain::default(),
        registry,
        network: network(),
        a,
        b,
        channel,
        app,
    }
}

impl Fixture {
    fn ctx(&self, me: &Signer) -> Context<'_> {
        Context {
            store: &self.store,
            chain: &self.chain,
            registry: &self.registry,
            network: &self.network,
            public_identifier: *me.identifier(),
        }
    }

    fn message(&self, params: ProtocolParams, custom_data: CustomData) -> ProtocolMessage {
        ProtocolMessage {
            process_id: ProcessId([1; 16]),
            protocol: params.protocol(),
            seq: 0,
            params,
            custom_data,
            from: *self.a.identifier(),
            to: *self.b.identifier(),
        }
    }

    fn take_action(&self, increment: u64, custom_data: CustomData) -> ProtocolMessage {
        self.message(
            ProtocolParams::TakeAction(TakeActionParams {
                multisig_address: self.channel.multisig_address,
                initiator_identifier: *self.a.identifier(),
                responder_identifier: *self.b.identifier(),
                app_identity_hash: self.app.identity_hash,
                action: counter_state(increment),
                state_timeout: 10,
            }),
            custom_data,
        )
    }

    fn sync(&self, channel: StateChannel, signed_states: Vec<SignedState>) -> ProtocolMessage {
        self.message(
            ProtocolParams::Sync(SyncParams {
                multisig_address: self.channel.multisig_address,
                initiator_identifier: *self.a.identifier(),
                responder_identifier: *self.b.identifier(),
            }),
            CustomData::Sync(SyncPayload {
                channel,
                signed_states,
            }),
        )
    }

    /// The counter app one version ahead, with both signatures on it.
    fn app_ahead(&self) -> (AppInstance, SignedState) {
        let app = self.app.set_state(counter_state(7), 10);
        let hash = Commitment::set_state(&self.network, &app)
            .hash_to_sign()
            .unwrap();
        let signed = SignedState {
            app_identity_hash: app.identity_hash,
            version_number: app.latest_version_number,
            signatures: [
                self.a.sign_eth(hash).unwrap(),
                self.b.sign_eth(hash).unwrap(),
            ],
        };
        (app, signed)
    }
}

fn expect_yield(step: Result<Step, ProtocolError>) -> Instruction {
    match step.unwrap() {
        Step::Yield(instruction) => instruction,
        Step::Done(_) => panic!("flow finished early"),
    }
}

/// Resume with `input`, then acknowledge until the flow blocks on something
/// other than an acknowledgement.
fn drain(flow: &mut dyn Flow, ctx: &Context<'_>, input: Resume) -> Vec<Instruction> {
    let mut out = vec![expect_yield(flow.resume(ctx, input))];
    while matches!(
        out.last(),
        Some(Instruction::PersistAppInstance { .. } | Instruction::PersistCommitment { .. })
    ) {
        out.push(expect_yield(flow.resume(ctx, Resume::Ack)));
    }
    out
}

fn opcodes(instructions: &[Instruction]) -> Vec<&'static str> {
    instructions.iter().map(Instruction::opcode).collect()
}

#[test]
fn take_action_initiator_persists_before_sending() {
    let f = fixture();
    let ctx = f.ctx(&f.a);
    let mut flow = flow(ProtocolRole::Initiator, f.take_action(4, CustomData::None)).unwrap();
    assert_eq!(flow.protocol(), ProtocolName::TakeAction);

    let validate = expect_yield(flow.resume(&ctx, Resume::Start));
    assert!(matches!(
        validate,
        Instruction::Validate(MiddlewareContext::TakeAction { .. })
    ));
    let Instruction::Sign(hash) = expect_yield(flow.resume(&ctx, Resume::Ack)) else {
        panic!("expected a signing request");
    };

    let sig = f.a.sign_eth(hash).unwrap();
    let batch = drain(flow.as_mut(), &ctx, Resume::Signature(sig));
    assert_eq!(
        opcodes(&batch),
        ["persist_commitment", "persist_app_instance", "send_and_wait"]
    );
    match &batch[0] {
        Instruction::PersistCommitment { op, commitment, .. } => {
            assert_eq!(*op, PersistCommitmentType::CreateSetState);
            assert_eq!(commitment.version_number(), Some(f.app.latest_version_number + 1));
            assert!(!commitment.is_fully_signed());
        }
        other => panic!("unexpected {other:?}"),
    }
    match &batch[2] {
        Instruction::SendAndWait(message) => {
            assert_eq!(message.seq, 0);
            assert_eq!(message.custom_data, CustomData::Signatures(vec![sig]));
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn resuming_mid_batch_with_anything_but_ack_fails() {
    let f = fixture();
    let ctx = f.ctx(&f.a);
    let mut flow = flow(ProtocolRole::Initiator, f.take_action(4, CustomData::None)).unwrap();
    expect_yield(flow.resume(&ctx, Resume::Start));
    let Instruction::Sign(hash) = expect_yield(flow.resume(&ctx, Resume::Ack)) else {
        panic!("expected a signing request");
    };
    let sig = f.a.sign_eth(hash).unwrap();
    expect_yield(flow.resume(&ctx, Resume::Signature(sig)));

    assert!(matches!(
        flow.resume(&ctx, Resume::Start),
        Err(ProtocolError::UnexpectedResume {
            protocol: ProtocolName::TakeAction
        })
    ));
}

#[test]
fn illegal_action_fails_before_anything_is_signed() {
    let f = fixture();
    let ctx = f.ctx(&f.a);
    let mut flow = flow(ProtocolRole::Initiator, f.take_action(0, CustomData::None)).unwrap();
    expect_yield(flow.resume(&ctx, Resume::Start));
    let err = flow.resume(&ctx, Resume::Ack).err().unwrap();
    assert!(matches!(
        err,
        ProtocolError::StateTransitionRejected { app_identity_hash, .. }
            if app_identity_hash == f.app.identity_hash
    ));
}

#[test]
fn take_action_responder_checks_the_initiator_signature_first() {
    let f = fixture();
    let ctx = f.ctx(&f.b);
    let next = f.app.set_state(counter_state(4), 10);
    let hash = Commitment::set_state(&f.network, &next).hash_to_sign().unwrap();
    let forged = signer(3).sign_eth(hash).unwrap();

    let mut flow = flow(
        ProtocolRole::Responder,
        f.take_action(4, CustomData::Signatures(vec![forged])),
    )
    .unwrap();
    expect_yield(flow.resume(&ctx, Resume::Start));
    let err = flow.resume(&ctx, Resume::Ack).err().unwrap();
    assert!(matches!(err, ProtocolError::SignatureMismatch(_)), "{err:?}");
}

#[test]
fn take_action_responder_signs_and_replies() {
    let f = fixture();
    let ctx = f.ctx(&f.b);
    let next = f.app.set_state(counter_state(4), 10);
    let hash = Commitment::set_state(&f.network, &next).hash_to_sign().unwrap();
    let theirs = f.a.sign_eth(hash).unwrap();

    let mut flow = flow(
        ProtocolRole::Responder,
        f.take_action(4, CustomData::Signatures(vec![theirs])),
    )
    .unwrap();
    expect_yield(flow.resume(&ctx, Resume::Start));
    assert_eq!(expect_yield(flow.resume(&ctx, Resume::Ack)), Instruction::Sign(hash));

    let ours = f.b.sign_eth(hash).unwrap();
    let batch = drain(flow.as_mut(), &ctx, Resume::Signature(ours));
    assert_eq!(
        opcodes(&batch),
        ["persist_commitment", "persist_app_instance", "send"]
    );
    let Instruction::Send(reply) = &batch[2] else {
        panic!("expected the reply");
    };
    assert_eq!(reply.seq, 1);
    assert_eq!(reply.to, *f.a.identifier());
    assert_eq!(reply.custom_data, CustomData::Signatures(vec![ours]));

    let Ok(Step::Done(output)) = flow.resume(&ctx, Resume::Ack) else {
        panic!("expected the flow to finish");
    };
    assert_eq!(output.app, Some(next));
}

#[test]
fn params_must_match_the_protocol() {
    let f = fixture();
    let mut message = f.take_action(1, CustomData::None);
    message.protocol = ProtocolName::Sync;
    assert!(matches!(
        flow(ProtocolRole::Initiator, message),
        Err(ProtocolError::UnexpectedMessage(_))
    ));
}

fn synced_channel(batch: &[Instruction]) -> &StateChannel {
    match &batch[0] {
        Instruction::PersistAppInstance {
            op: PersistAppType::SyncChannel,
            channel,
            ..
        } => channel,
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn sync_responder_ignores_unsigned_versions() {
    let f = fixture();
    let ctx = f.ctx(&f.b);
    let (ahead, _) = f.app_ahead();
    let mut remote = f.channel.clone();
    remote.app_instances.insert(ahead.identity_hash, ahead);

    let mut flow = flow(ProtocolRole::Responder, f.sync(remote, Vec::new())).unwrap();
    let batch = drain(flow.as_mut(), &ctx, Resume::Start);

    assert_eq!(opcodes(&batch), ["persist_app_instance", "send"]);
    assert_eq!(synced_channel(&batch), &f.channel);
}

#[test]
fn sync_responder_adopts_signed_versions() {
    let f = fixture();
    let ctx = f.ctx(&f.b);
    let (ahead, signed) = f.app_ahead();
    let mut remote = f.channel.clone();
    remote.app_instances.insert(ahead.identity_hash, ahead.clone());

    let mut flow =
        flow(ProtocolRole::Responder, f.sync(remote.clone(), vec![signed.clone()])).unwrap();
    let batch = drain(flow.as_mut(), &ctx, Resume::Start);

    assert_eq!(
        opcodes(&batch),
        ["persist_app_instance", "persist_commitment", "send"]
    );
    assert_eq!(synced_channel(&batch), &remote);
    let Instruction::Send(reply) = &batch[2] else {
        panic!("expected the reply");
    };
    let CustomData::Sync(payload) = &reply.custom_data else {
        panic!("expected a sync payload");
    };
    assert_eq!(payload.channel, remote);
    assert_eq!(payload.signed_states, vec![signed]);
}

#[test]
fn sync_initiator_rejects_a_stale_reply() {
    let f = fixture();
    let ctx = f.ctx(&f.a);
    let mut flow = flow(ProtocolRole::Initiator, f.sync(f.channel.clone(), Vec::new())).unwrap();
    let Instruction::SendAndWait(sent) = expect_yield(flow.resume(&ctx, Resume::Start)) else {
        panic!("expected the sync request");
    };

    let mut behind = f.channel.clone();
    behind.app_instances.clear();
    let reply = sent.reply(CustomData::Sync(SyncPayload {
        channel: behind,
        signed_states: Vec::new(),
    }));
    assert!(matches!(
        flow.resume(&ctx, Resume::Reply(reply)),
        Err(ProtocolError::SyncMismatch(_))
    ));
}

#[test]
fn process_ids_print_as_hex() {
    let id = ProcessId([0xab; 16]);
    assert_eq!(id.to_string(), "ab".repeat(16));
}
