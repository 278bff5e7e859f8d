//! Drives protocol flows against the collaborators of one party.
//!
//! Runs that share a multisig must not overlap. The runner does not enforce
//! this: callers hold a lock per multisig address for the duration of
//! [ProtocolRunner::initiate_protocol].

use std::collections::{HashMap, HashSet};

use rand::Rng;
use tokio::{
    sync::{broadcast, oneshot, Mutex},
    time,
};

use crate::{
    abiencode::types::{Address, Hash},
    apps::AppRegistry,
    chain::ChainReader,
    channel::{AppInstance, StateChannel},
    commitment::Commitment,
    config::{NetworkContext, RunnerConfig},
    error::ProtocolError,
    messages::{CustomData, ProtocolMessage, ProtocolParams},
    middleware::MiddlewareChain,
    protocol::{
        self, Context, Instruction, PersistAppType, PersistCommitmentType, ProcessId,
        ProtocolName, ProtocolOutput, ProtocolRole, Resume, Step,
    },
    sig::{ChannelSigner, Identifier},
    store::{Store, StoreError},
    wire::{Transport, TransportError},
};

#[cfg(test)]
mod tests;

/// Events are dropped for subscribers lagging this far behind.
const EVENT_CAPACITY: usize = 64;

/// Published after a run completed on this side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolEvent {
    ChannelCreated {
        multisig_address: Address,
    },
    Proposed {
        multisig_address: Address,
        app_identity_hash: Hash,
    },
    Installed {
        multisig_address: Address,
        app_identity_hash: Hash,
    },
    StateUpdated {
        multisig_address: Address,
        app_identity_hash: Hash,
        version_number: u64,
    },
    Uninstalled {
        multisig_address: Address,
        app_identity_hash: Hash,
    },
    Synced {
        multisig_address: Address,
    },
}

impl ProtocolEvent {
    fn of(protocol: ProtocolName, output: &ProtocolOutput) -> Option<Self> {
        let multisig_address = output.channel.multisig_address;
        let app = output.app.as_ref();
        Some(match protocol {
            ProtocolName::Setup => ProtocolEvent::ChannelCreated { multisig_address },
            ProtocolName::Sync => ProtocolEvent::Synced { multisig_address },
            ProtocolName::Propose => ProtocolEvent::Proposed {
                multisig_address,
                app_identity_hash: app?.identity_hash,
            },
            ProtocolName::Install => ProtocolEvent::Installed {
                multisig_address,
                app_identity_hash: app?.identity_hash,
            },
            ProtocolName::Uninstall => ProtocolEvent::Uninstalled {
                multisig_address,
                app_identity_hash: app?.identity_hash,
            },
            ProtocolName::TakeAction => ProtocolEvent::StateUpdated {
                multisig_address,
                app_identity_hash: app?.identity_hash,
                version_number: app?.latest_version_number,
            },
        })
    }
}

/// Runs protocols for the party owning `signer`.
///
/// Inbound messages are fed in through [ProtocolRunner::handle_message]; the
/// runner itself never reads from the network.
pub struct ProtocolRunner<S, T, K, C> {
    store: S,
    transport: T,
    signer: K,
    chain: C,
    registry: AppRegistry,
    middleware: MiddlewareChain,
    network: NetworkContext,
    config: RunnerConfig,
    pending: Mutex<HashMap<(ProcessId, u32), oneshot::Sender<ProtocolMessage>>>,
    /// Process ids this side has run, started only once each.
    seen: Mutex<HashSet<ProcessId>>,
    events: broadcast::Sender<ProtocolEvent>,
}

impl<S, T, K, C> core::fmt::Debug for ProtocolRunner<S, T, K, C>
where
    K: ChannelSigner,
{
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ProtocolRunner")
            .field("identifier", self.signer.identifier())
            .field("registry", &self.registry)
            .field("middleware", &self.middleware)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<S, T, K, C> ProtocolRunner<S, T, K, C>
where
    S: Store,
    T: Transport,
    K: ChannelSigner,
    C: ChainReader,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: S,
        transport: T,
        signer: K,
        chain: C,
        registry: AppRegistry,
        middleware: MiddlewareChain,
        network: NetworkContext,
        config: RunnerConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            store,
            transport,
            signer,
            chain,
            registry,
            middleware,
            network,
            config,
            pending: Mutex::new(HashMap::new()),
            seen: Mutex::new(HashSet::new()),
            events,
        }
    }

    pub fn identifier(&self) -> &Identifier {
        self.signer.identifier()
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn chain(&self) -> &C {
        &self.chain
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProtocolEvent> {
        self.events.subscribe()
    }

    /// Run the protocol `params` belong to, with us as the initiator.
    pub async fn initiate_protocol(
        &self,
        params: ProtocolParams,
    ) -> Result<ProtocolOutput, ProtocolError> {
        let me = *self.identifier();
        if params.initiator_identifier() != me {
            return Err(ProtocolError::UnexpectedMessage(format!(
                "{} cannot initiate a run on behalf of {}",
                me,
                params.initiator_identifier()
            )));
        }
        let process_id: ProcessId = rand::thread_rng().gen();
        self.seen.lock().await.insert(process_id);
        let message = ProtocolMessage {
            process_id,
            protocol: params.protocol(),
            seq: 0,
            to: params.responder_identifier(),
            from: me,
            params,
            custom_data: CustomData::None,
        };
        self.run(ProtocolRole::Initiator, message).await
    }

    /// Deliver a message received from the counterparty.
    ///
    /// A reply is handed to the run waiting for it and `None` is returned. A
    /// message starting a run with an unknown process id is answered by
    /// running the responder side to completion.
    pub async fn handle_message(
        &self,
        message: ProtocolMessage,
    ) -> Result<Option<ProtocolOutput>, ProtocolError> {
        let key = (message.process_id, message.seq);
        let waiting = self.pending.lock().await.remove(&key);
        if let Some(waiter) = waiting {
            if waiter.send(message).is_err() {
                tracing::warn!(
                    process_id = %key.0,
                    seq = key.1,
                    "reply arrived after its run ended"
                );
            }
            return Ok(None);
        }

        if message.seq == 0
            && message.to == *self.identifier()
            && message.from == message.params.initiator_identifier()
        {
            if !self.seen.lock().await.insert(message.process_id) {
                tracing::warn!(
                    protocol = %message.protocol,
                    process_id = %message.process_id,
                    from = %message.from,
                    "dropping replayed start message"
                );
                return Err(ProtocolError::UnexpectedMessage(format!(
                    "process {} was already started",
                    message.process_id
                )));
            }
            return self.run(ProtocolRole::Responder, message).await.map(Some);
        }

        tracing::warn!(
            protocol = %message.protocol,
            process_id = %message.process_id,
            seq = message.seq,
            from = %message.from,
            "dropping unsolicited message"
        );
        Err(ProtocolError::UnexpectedMessage(format!(
            "no run waits for message {} of {}",
            message.seq, message.process_id
        )))
    }

    fn context(&self) -> Context<'_> {
        Context {
            store: &self.store,
            chain: &self.chain,
            registry: &self.registry,
            network: &self.network,
            public_identifier: *self.identifier(),
        }
    }

    async fn run(
        &self,
        role: ProtocolRole,
        message: ProtocolMessage,
    ) -> Result<ProtocolOutput, ProtocolError> {
        let process_id = message.process_id;
        let multisig = message.params.multisig_address();
        let mut flow = protocol::flow(role, message)?;
        let protocol = flow.protocol();
        tracing::info!(%protocol, ?role, %process_id, %multisig, "protocol run started");

        let mut input = Resume::Start;
        let result = loop {
            let step = match flow.resume(&self.context(), input) {
                Ok(step) => step,
                Err(err) => break Err(err),
            };
            match step {
                Step::Done(output) => break Ok(output),
                Step::Yield(instruction) => {
                    tracing::debug!(
                        %protocol,
                        ?role,
                        %process_id,
                        opcode = instruction.opcode(),
                        "executing instruction"
                    );
                    match self.execute(protocol, role, instruction).await {
                        Ok(next) => input = next,
                        Err(err) => break Err(err),
                    }
                }
            }
        };

        match &result {
            Ok(output) => {
                tracing::info!(%protocol, ?role, %process_id, %multisig, "protocol run completed");
                if let Some(event) = ProtocolEvent::of(protocol, output) {
                    // No subscribers is fine.
                    let _ = self.events.send(event);
                }
            }
            Err(err) => {
                tracing::warn!(
                    %protocol,
                    ?role,
                    %process_id,
                    %multisig,
                    %err,
                    "protocol run failed"
                )
            }
        }
        result
    }

    async fn execute(
        &self,
        protocol: ProtocolName,
        role: ProtocolRole,
        instruction: Instruction,
    ) -> Result<Resume, ProtocolError> {
        match instruction {
            Instruction::Validate(ctx) => self.middleware.run(role, &ctx, &self.chain)?,
            Instruction::Sign(hash) => return Ok(Resume::Signature(self.signer.sign(hash).await?)),
            Instruction::Send(message) => self.transport.send(message)?,
            Instruction::SendAndWait(message) => {
                return self.send_and_wait(protocol, message).await.map(Resume::Reply)
            }
            Instruction::PersistAppInstance { op, channel, app } => {
                self.persist_app(op, &channel, &app)?
            }
            Instruction::PersistCommitment {
                op,
                commitment,
                app_identity_hash,
            } => self.persist_commitment(op, &commitment, &app_identity_hash)?,
        }
        Ok(Resume::Ack)
    }

    async fn send_and_wait(
        &self,
        protocol: ProtocolName,
        message: ProtocolMessage,
    ) -> Result<ProtocolMessage, ProtocolError> {
        let key = (message.process_id, message.seq + 1);
        let (tx, rx) = oneshot::channel();
        // Registered before sending, the reply may arrive before `send` returns.
        self.pending.lock().await.insert(key, tx);
        if let Err(err) = self.transport.send(message) {
            self.pending.lock().await.remove(&key);
            return Err(err.into());
        }

        match time::timeout(self.config.timeout, rx).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(TransportError::Closed.into()),
            Err(_) => {
                self.pending.lock().await.remove(&key);
                tracing::warn!(
                    %protocol,
                    process_id = %key.0,
                    seq = key.1,
                    "timed out waiting for reply"
                );
                Err(ProtocolError::ProtocolTimeout {
                    protocol,
                    process_id: key.0,
                    seq: key.1,
                })
            }
        }
    }

    fn persist_app(
        &self,
        op: PersistAppType,
        channel: &StateChannel,
        app: &AppInstance,
    ) -> Result<(), StoreError> {
        let store = &self.store;
        match op {
            PersistAppType::CreateChannel => store.create_state_channel(channel),
            PersistAppType::SyncChannel => store.sync_state_channel(channel),
            PersistAppType::CreateProposal => store.create_app_proposal(channel, app),
            PersistAppType::RemoveProposal => {
                store.remove_app_proposal(channel, &app.identity_hash)
            }
            PersistAppType::CreateInstance => store.create_app_instance(channel, app),
            PersistAppType::UpdateInstance => store.update_app_instance(channel, app),
            PersistAppType::RemoveInstance => {
                store.remove_app_instance(channel, &app.identity_hash)
            }
            PersistAppType::UpdateFreeBalance => store.update_free_balance(channel, app),
        }
    }

    fn persist_commitment(
        &self,
        op: PersistCommitmentType,
        commitment: &Commitment,
        app_identity_hash: &Hash,
    ) -> Result<(), StoreError> {
        let store = &self.store;
        match op {
            PersistCommitmentType::CreateSetup => {
                store.create_setup_commitment(&commitment.multisig_address(), commitment)
            }
            PersistCommitmentType::CreateSetState => {
                store.create_set_state_commitment(app_identity_hash, commitment)
            }
            PersistCommitmentType::UpdateSetState => {
                store.update_set_state_commitment(app_identity_hash, commitment)
            }
            PersistCommitmentType::RemoveSetState => match commitment.version_number() {
                Some(version) => store.remove_set_state_commitment(app_identity_hash, version),
                None => Err(StoreError::CommitmentMismatch(app_identity_hash.to_string())),
            },
            PersistCommitmentType::CreateConditional => {
                store.create_conditional_transaction_commitment(app_identity_hash, commitment)
            }
            PersistCommitmentType::UpdateConditional => {
                store.update_conditional_transaction_commitment(app_identity_hash, commitment)
            }
        }
    }
}
