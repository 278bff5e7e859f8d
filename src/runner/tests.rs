use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use tokio::sync::mpsc;

use super::*;
use crate::{
    abiencode::types::U256,
    apps::{DepositApp, DepositAppState, DepositMiddleware},
    channel::{AppParams, CoinTransfer, OutcomeInterpreterParams},
    commitment::Verification,
    messages::{
        InstallParams, ProposeParams, SetupParams, SyncParams, TakeActionParams, UninstallParams,
    },
    middleware::Phase,
    sig::Signer,
    store::MemoryStore,
    testing::{
        channel_between, counter_params, counter_state, network, signer, CounterApp, MockChain,
        COUNTER_APP,
    },
    wire::{decode_message, BytesBus, ProtoBufEncodingLayer},
};

const DEPOSIT_APP: Address = Address([0xde; 20]);

/// Hands frames to the peer's pump, or swallows them while `drop` is set.
#[derive(Debug)]
struct Loopback {
    tx: mpsc::UnboundedSender<Vec<u8>>,
    drop: Arc<AtomicBool>,
}

impl BytesBus for Loopback {
    fn send_to(&self, _recipient: &Identifier, frame: &[u8]) -> Result<(), TransportError> {
        if self.drop.load(Ordering::SeqCst) {
            return Ok(());
        }
        self.tx.send(frame.to_vec()).map_err(|_| TransportError::Closed)
    }
}

type TestRunner = ProtocolRunner<MemoryStore, ProtoBufEncodingLayer<Loopback>, Signer, MockChain>;

struct Pair {
    a: Arc<TestRunner>,
    b: Arc<TestRunner>,
    a_signer: Signer,
    b_signer: Signer,
    /// Swallow everything `b` sends.
    mute_b: Arc<AtomicBool>,
    multisig: Address,
}

fn runner(signer: Signer, bus: Loopback, config: RunnerConfig) -> TestRunner {
    let mut registry = AppRegistry::new();
    registry
        .register(COUNTER_APP, Arc::new(CounterApp))
        .register(DEPOSIT_APP, Arc::new(DepositApp));
    let mut middleware = MiddlewareChain::new();
    let deposits = Arc::new(DepositMiddleware::new(DEPOSIT_APP));
    middleware
        .register(Phase::Propose, deposits.clone())
        .register(Phase::Install, deposits.clone())
        .register(Phase::Uninstall, deposits);
    ProtocolRunner::new(
        MemoryStore::new(),
        ProtoBufEncodingLayer::new(bus),
        signer,
        MockChain::default(),
        registry,
        middleware,
        network(),
        config,
    )
}

fn pump(runner: Arc<TestRunner>, mut rx: mpsc::UnboundedReceiver<Vec<u8>>) {
    tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            let message = decode_message(&frame).unwrap();
            let _ = runner.handle_message(message).await;
        }
    });
}

fn pair(config: RunnerConfig) -> Pair {
    let (to_a, a_rx) = mpsc::unbounded_channel();
    let (to_b, b_rx) = mpsc::unbounded_channel();
    let mute_b = Arc::new(AtomicBool::new(false));

    let a = Arc::new(runner(
        signer(1),
        Loopback {
            tx: to_b,
            drop: Arc::new(AtomicBool::new(false)),
        },
        config,
    ));
    let b = Arc::new(runner(
        signer(2),
        Loopback {
            tx: to_a,
            drop: mute_b.clone(),
        },
        config,
    ));
    pump(a.clone(), a_rx);
    pump(b.clone(), b_rx);

    let multisig = channel_between(&signer(1), &signer(2)).multisig_address;
    Pair {
        a,
        b,
        a_signer: signer(1),
        b_signer: signer(2),
        mute_b,
        multisig,
    }
}

impl Pair {
    fn ids(&self) -> (Identifier, Identifier) {
        (*self.a.identifier(), *self.b.identifier())
    }

    async fn setup(&self) -> StateChannel {
        let (a, b) = self.ids();
        self.a
            .initiate_protocol(ProtocolParams::Setup(SetupParams {
                multisig_address: self.multisig,
                initiator_identifier: a,
                responder_identifier: b,
            }))
            .await
            .unwrap()
            .channel
    }

    async fn propose(&self, app: AppParams) -> AppInstance {
        let (a, b) = self.ids();
        self.a
            .initiate_protocol(ProtocolParams::Propose(ProposeParams {
                multisig_address: self.multisig,
                initiator_identifier: a,
                responder_identifier: b,
                app,
            }))
            .await
            .unwrap()
            .app
            .unwrap()
    }

    async fn install(&self, proposal: &AppInstance) -> Result<ProtocolOutput, ProtocolError> {
        let (a, b) = self.ids();
        self.a
            .initiate_protocol(ProtocolParams::Install(InstallParams {
                multisig_address: self.multisig,
                initiator_identifier: a,
                responder_identifier: b,
                proposal_identity_hash: proposal.identity_hash,
            }))
            .await
    }

    async fn install_counter(&self) -> AppInstance {
        let (a, b) = self.ids();
        let proposal = self.propose(counter_params(a, b, 0)).await;
        self.install(&proposal).await.unwrap().app.unwrap()
    }

    async fn take_action(
        &self,
        app: &AppInstance,
        increment: u64,
    ) -> Result<ProtocolOutput, ProtocolError> {
        self.take_action_by(&self.a, &self.b, app, increment).await
    }

    async fn take_action_by(
        &self,
        initiator: &TestRunner,
        responder: &TestRunner,
        app: &AppInstance,
        increment: u64,
    ) -> Result<ProtocolOutput, ProtocolError> {
        initiator
            .initiate_protocol(ProtocolParams::TakeAction(TakeActionParams {
                multisig_address: self.multisig,
                initiator_identifier: *initiator.identifier(),
                responder_identifier: *responder.identifier(),
                app_identity_hash: app.identity_hash,
                action: counter_state(increment),
                state_timeout: 10,
            }))
            .await
    }

    async fn uninstall(&self, app: &AppInstance) -> Result<ProtocolOutput, ProtocolError> {
        let (a, b) = self.ids();
        self.a
            .initiate_protocol(ProtocolParams::Uninstall(UninstallParams {
                multisig_address: self.multisig,
                initiator_identifier: a,
                responder_identifier: b,
                app_identity_hash: app.identity_hash,
            }))
            .await
    }

    fn set_multisig_balance(&self, amount: u64) {
        for runner in [&self.a, &self.b] {
            runner
                .chain()
                .set_balance(Address::ZERO, self.multisig, U256::from(amount));
        }
    }

    /// Both owners' signatures on `commitment`, in slot order.
    fn sign_both(&self, commitment: &mut Commitment) {
        let hash = commitment.hash_to_sign().unwrap();
        let sign = |owner: &Address| {
            if *owner == self.a_signer.address() {
                self.a_signer.sign_eth(hash).unwrap()
            } else {
                self.b_signer.sign_eth(hash).unwrap()
            }
        };
        let [first, second] = *commitment.owners();
        let (first, second) = (sign(&first), sign(&second));
        commitment.add_signatures(Some(first), Some(second)).unwrap();
    }
}

fn set_state_rows(runner: &TestRunner, hash: &Hash) -> Vec<Commitment> {
    runner.store().get_set_state_commitments(hash).unwrap()
}

#[tokio::test]
async fn setup_creates_the_same_channel_on_both_sides() {
    let pair = pair(RunnerConfig::default());
    let mut events = pair.b.subscribe();

    let channel = pair.setup().await;

    let stored_a = pair.a.store().get_state_channel(&pair.multisig).unwrap().unwrap();
    let stored_b = pair.b.store().get_state_channel(&pair.multisig).unwrap().unwrap();
    assert_eq!(stored_a, channel);
    assert_eq!(stored_b, channel);
    assert_eq!(
        events.recv().await.unwrap(),
        ProtocolEvent::ChannelCreated {
            multisig_address: pair.multisig
        }
    );

    for runner in [&pair.a, &pair.b] {
        let setup = runner.store().get_setup_commitment(&pair.multisig).unwrap().unwrap();
        setup.assert_signatures(Verification::Full).unwrap();
        let rows = set_state_rows(runner, &channel.free_balance.identity_hash);
        assert_eq!(rows.len(), 1);
        rows[0].assert_signatures(Verification::Full).unwrap();
    }
}

#[tokio::test]
async fn take_action_applies_the_transition_on_both_sides() {
    let pair = pair(RunnerConfig::default());
    pair.setup().await;
    let app = pair.install_counter().await;
    let mut events = pair.a.subscribe();

    let output = pair.take_action(&app, 5).await.unwrap();

    let updated = output.app.unwrap();
    assert_eq!(updated.latest_version_number, app.latest_version_number + 1);
    assert_eq!(updated.latest_state, counter_state(5));
    assert_eq!(
        pair.b.store().get_app_instance(&app.identity_hash).unwrap(),
        Some(updated.clone())
    );
    assert_eq!(
        pair.a.store().get_app_instance(&app.identity_hash).unwrap(),
        Some(updated.clone())
    );
    assert_eq!(
        events.recv().await.unwrap(),
        ProtocolEvent::StateUpdated {
            multisig_address: pair.multisig,
            app_identity_hash: app.identity_hash,
            version_number: updated.latest_version_number,
        }
    );
}

#[tokio::test]
async fn take_action_prunes_the_previous_commitment() {
    let pair = pair(RunnerConfig::default());
    pair.setup().await;
    let app = pair.install_counter().await;
    pair.take_action(&app, 1).await.unwrap();

    for runner in [&pair.a, &pair.b] {
        let rows = set_state_rows(runner, &app.identity_hash);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].version_number(), Some(app.latest_version_number + 1));
        rows[0].assert_signatures(Verification::Full).unwrap();
    }
}

#[tokio::test]
async fn app_responder_can_take_an_action() {
    let pair = pair(RunnerConfig::default());
    pair.setup().await;
    let app = pair.install_counter().await;
    assert_eq!(app.initiator_identifier, *pair.a.identifier());

    let output = pair.take_action_by(&pair.b, &pair.a, &app, 4).await.unwrap();

    let updated = output.app.unwrap();
    assert_eq!(updated.latest_version_number, app.latest_version_number + 1);
    assert_eq!(updated.latest_state, counter_state(4));
    for runner in [&pair.a, &pair.b] {
        assert_eq!(
            runner.store().get_app_instance(&app.identity_hash).unwrap(),
            Some(updated.clone())
        );
        let rows = set_state_rows(runner, &app.identity_hash);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].version_number(), Some(updated.latest_version_number));
        rows[0].assert_signatures(Verification::Full).unwrap();
    }
}

#[tokio::test]
async fn illegal_action_leaves_the_store_unchanged() {
    let pair = pair(RunnerConfig::default());
    pair.setup().await;
    let app = pair.install_counter().await;
    let before = pair.a.store().get_state_channel(&pair.multisig).unwrap();

    let err = pair.take_action(&app, 0).await.unwrap_err();

    assert!(matches!(err, ProtocolError::StateTransitionRejected { .. }));
    assert!(!err.is_retryable());
    assert_eq!(pair.a.store().get_state_channel(&pair.multisig).unwrap(), before);
    assert_eq!(
        pair.a.store().get_app_instance(&app.identity_hash).unwrap(),
        Some(app.clone())
    );
    let rows = set_state_rows(&pair.a, &app.identity_hash);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].version_number(), Some(app.latest_version_number));
}

#[tokio::test]
async fn timeout_keeps_the_singly_signed_commitment() {
    let pair = pair(RunnerConfig::default().with_timeout(Duration::from_millis(200)));
    pair.setup().await;
    let app = pair.install_counter().await;
    pair.mute_b.store(true, Ordering::SeqCst);

    let err = pair.take_action(&app, 3).await.unwrap_err();

    assert!(
        matches!(
            err,
            ProtocolError::ProtocolTimeout {
                protocol: ProtocolName::TakeAction,
                seq: 1,
                ..
            }
        ),
        "{err:?}"
    );
    assert!(err.is_retryable());

    let next = app.latest_version_number + 1;
    let rows = set_state_rows(&pair.a, &app.identity_hash);
    let pending: Vec<_> = rows
        .iter()
        .filter(|c| c.version_number() == Some(next))
        .collect();
    assert_eq!(pending.len(), 1);
    assert!(!pending[0].is_fully_signed());
    pending[0]
        .assert_signatures(Verification::PresenceOnly)
        .unwrap();

    let stored = pair.a.store().get_app_instance(&app.identity_hash).unwrap().unwrap();
    assert_eq!(stored.latest_version_number, app.latest_version_number);
    assert_eq!(stored.latest_action, Some(counter_state(3)));
}

fn deposit_params(
    a: Identifier,
    b: Identifier,
    multisig: Address,
    starting_balance: u64,
) -> AppParams {
    let state = DepositAppState {
        transfers: [
            CoinTransfer::new(a.address(), U256::zero()),
            CoinTransfer::new(b.address(), U256::zero()),
        ],
        multisig_address: multisig,
        asset_id: Address::ZERO,
        starting_total_amount_withdrawn: U256::zero(),
        starting_multisig_balance: U256::from(starting_balance),
    };
    AppParams {
        app_definition: DEPOSIT_APP,
        initial_state: state.encode().unwrap(),
        interpreter_params: OutcomeInterpreterParams {
            limit: U256::MAX,
            token: Address::ZERO,
        },
        ..counter_params(a, b, 0)
    }
}

#[tokio::test]
async fn second_deposit_app_for_an_asset_is_rejected() {
    let pair = pair(RunnerConfig::default());
    pair.setup().await;
    let (a, b) = pair.ids();
    let first = pair.propose(deposit_params(a, b, pair.multisig, 0)).await;
    let second = pair.propose(deposit_params(a, b, pair.multisig, 0)).await;
    pair.install(&first).await.unwrap();

    let before_a = pair.a.store().get_state_channel(&pair.multisig).unwrap();
    let before_b = pair.b.store().get_state_channel(&pair.multisig).unwrap();
    let err = pair.install(&second).await.unwrap_err();

    assert!(matches!(err, ProtocolError::ValidationRejected { phase: Phase::Install, .. }));
    let after = pair.a.store().get_state_channel(&pair.multisig).unwrap();
    assert_eq!(after, before_a);
    assert_eq!(pair.b.store().get_state_channel(&pair.multisig).unwrap(), before_b);
    let after = after.unwrap();
    assert_eq!(after.app_instances.len(), 1);
    assert!(after.proposed_app_instances.contains_key(&second.identity_hash));
    assert!(pair
        .a
        .store()
        .get_conditional_transaction_commitment(&second.identity_hash)
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn uninstall_credits_the_deposit_on_both_sides() {
    let pair = pair(RunnerConfig::default());
    pair.setup().await;
    let (a, b) = pair.ids();
    let proposal = pair.propose(deposit_params(a, b, pair.multisig, 0)).await;
    let app = pair.install(&proposal).await.unwrap().app.unwrap();
    pair.set_multisig_balance(50);
    let mut events = pair.b.subscribe();

    let output = pair.uninstall(&app).await.unwrap();

    let channel = output.channel;
    assert!(!channel.app_instances.contains_key(&app.identity_hash));
    assert_eq!(
        channel.free_balance_state().unwrap().balance_of(Address::ZERO, a.address()),
        U256::from(50)
    );
    assert_eq!(
        channel.free_balance_state().unwrap().balance_of(Address::ZERO, b.address()),
        U256::zero()
    );
    for runner in [&pair.a, &pair.b] {
        assert_eq!(
            runner.store().get_state_channel(&pair.multisig).unwrap(),
            Some(channel.clone())
        );
        assert_eq!(runner.store().get_app_instance(&app.identity_hash).unwrap(), None);
        let rows = set_state_rows(runner, &channel.free_balance.identity_hash);
        assert_eq!(rows.len(), 1);
        assert_eq!(
            rows[0].version_number(),
            Some(channel.free_balance.latest_version_number)
        );
        rows[0].assert_signatures(Verification::Full).unwrap();
    }
    assert_eq!(
        events.recv().await.unwrap(),
        ProtocolEvent::Uninstalled {
            multisig_address: pair.multisig,
            app_identity_hash: app.identity_hash,
        }
    );
}

#[tokio::test]
async fn uninstall_below_the_starting_balance_is_rejected() {
    let pair = pair(RunnerConfig::default());
    pair.setup().await;
    let (a, b) = pair.ids();
    let proposal = pair.propose(deposit_params(a, b, pair.multisig, 100)).await;
    let app = pair.install(&proposal).await.unwrap().app.unwrap();
    pair.set_multisig_balance(10);

    let before_a = pair.a.store().get_state_channel(&pair.multisig).unwrap();
    let before_b = pair.b.store().get_state_channel(&pair.multisig).unwrap();
    let free_balance = before_a.as_ref().unwrap().free_balance.identity_hash;
    let rows_before = set_state_rows(&pair.a, &free_balance);

    let err = pair.uninstall(&app).await.unwrap_err();

    assert!(matches!(
        err,
        ProtocolError::ValidationRejected {
            phase: Phase::Uninstall,
            ..
        }
    ));
    assert_eq!(pair.a.store().get_state_channel(&pair.multisig).unwrap(), before_a);
    assert_eq!(pair.b.store().get_state_channel(&pair.multisig).unwrap(), before_b);
    assert_eq!(set_state_rows(&pair.a, &free_balance), rows_before);
    assert!(pair
        .a
        .store()
        .get_app_instance(&app.identity_hash)
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn sync_adopts_the_newer_free_balance() {
    let pair = pair(RunnerConfig::default());
    let channel = pair.setup().await;

    // Move b's free balance one version ahead, signed by both.
    let fb = channel.free_balance.set_state(
        channel.free_balance.latest_state.clone(),
        channel.free_balance.state_timeout,
    );
    let mut ahead = channel.clone();
    ahead.free_balance = fb.clone();
    let mut commitment = Commitment::set_state(&network(), &fb);
    pair.sign_both(&mut commitment);
    pair.b.store().update_free_balance(&ahead, &fb).unwrap();
    pair.b
        .store()
        .update_set_state_commitment(&fb.identity_hash, &commitment)
        .unwrap();

    let (a, b) = pair.ids();
    let output = pair
        .a
        .initiate_protocol(ProtocolParams::Sync(SyncParams {
            multisig_address: pair.multisig,
            initiator_identifier: a,
            responder_identifier: b,
        }))
        .await
        .unwrap();

    let stored_a = pair.a.store().get_state_channel(&pair.multisig).unwrap();
    let stored_b = pair.b.store().get_state_channel(&pair.multisig).unwrap();
    assert_eq!(stored_a, Some(ahead.clone()));
    assert_eq!(stored_b, Some(ahead.clone()));
    assert_eq!(output.channel, ahead);

    let rows = set_state_rows(&pair.a, &fb.identity_hash);
    assert_eq!(rows, vec![commitment]);
}

#[tokio::test]
async fn sync_keeps_an_installed_app_in_step() {
    let pair = pair(RunnerConfig::default());
    pair.setup().await;
    let app = pair.install_counter().await;

    let output = pair.take_action(&app, 2).await.unwrap();
    // a loses the update.
    let stale = pair.a.store().get_state_channel(&pair.multisig).unwrap().unwrap();
    let mut rolled_back = stale.clone();
    rolled_back.app_instances.insert(app.identity_hash, app.clone());
    pair.a.store().sync_state_channel(&rolled_back).unwrap();

    let (a, b) = pair.ids();
    pair.a
        .initiate_protocol(ProtocolParams::Sync(SyncParams {
            multisig_address: pair.multisig,
            initiator_identifier: a,
            responder_identifier: b,
        }))
        .await
        .unwrap();

    assert_eq!(
        pair.a.store().get_app_instance(&app.identity_hash).unwrap(),
        output.app
    );
    assert_eq!(
        pair.a.store().get_state_channel(&pair.multisig).unwrap(),
        pair.b.store().get_state_channel(&pair.multisig).unwrap()
    );
}

#[tokio::test]
async fn unsolicited_reply_is_rejected() {
    let pair = pair(RunnerConfig::default());
    let (a, b) = pair.ids();
    let message = ProtocolMessage {
        process_id: ProcessId([7; 16]),
        protocol: ProtocolName::Sync,
        seq: 1,
        params: ProtocolParams::Sync(SyncParams {
            multisig_address: pair.multisig,
            initiator_identifier: b,
            responder_identifier: a,
        }),
        custom_data: CustomData::None,
        from: b,
        to: a,
    };
    assert!(matches!(
        pair.a.handle_message(message).await,
        Err(ProtocolError::UnexpectedMessage(_))
    ));
}

#[tokio::test]
async fn cannot_initiate_for_someone_else() {
    let pair = pair(RunnerConfig::default());
    let (a, b) = pair.ids();
    let err = pair
        .a
        .initiate_protocol(ProtocolParams::Setup(SetupParams {
            multisig_address: pair.multisig,
            initiator_identifier: b,
            responder_identifier: a,
        }))
        .await
        .unwrap_err();
    assert!(matches!(err, ProtocolError::UnexpectedMessage(_)));
    assert_eq!(pair.a.store().channel_count().unwrap(), 0);
}

#[tokio::test]
async fn start_message_runs_once_per_process_id() {
    let pair = pair(RunnerConfig::default());
    let (a, b) = pair.ids();
    let message = ProtocolMessage {
        process_id: ProcessId([9; 16]),
        protocol: ProtocolName::Sync,
        seq: 0,
        params: ProtocolParams::Sync(SyncParams {
            multisig_address: pair.multisig,
            initiator_identifier: b,
            responder_identifier: a,
        }),
        custom_data: CustomData::None,
        from: b,
        to: a,
    };
    assert!(matches!(
        pair.a.handle_message(message.clone()).await,
        Err(ProtocolError::ChannelNotFound(_))
    ));
    assert!(matches!(
        pair.a.handle_message(message).await,
        Err(ProtocolError::UnexpectedMessage(_))
    ));
}
