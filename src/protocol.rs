//! Protocol flows as resumable state machines.
//!
//! Each protocol is a pair of step sequences, one per [ProtocolRole]. A step
//! sequence never touches the signer, the transport or the store for writing
//! itself. It emits [Instruction]s that the
//! [runner](crate::runner::ProtocolRunner) carries out, and is resumed with
//! the result. Reading the store and the chain happens directly through the
//! [Context].
//!
//! Instructions are carried out strictly one after the other, so every
//! persist emitted before a send has completed when the message leaves.

use std::collections::VecDeque;

use core::fmt::{Debug, Display};

use rand::{distributions::Standard, prelude::Distribution};

use crate::{
    abiencode::types::{Hash, Signature},
    apps::AppRegistry,
    chain::ChainReader,
    channel::{AppInstance, StateChannel},
    commitment::{Commitment, Verification},
    config::NetworkContext,
    error::ProtocolError,
    messages::{CustomData, ProtocolMessage, ProtocolParams},
    middleware::MiddlewareContext,
    sig::Identifier,
    store::Store,
};

/// The params of `$message`, which must belong to the `$variant` protocol.
macro_rules! params_of {
    ($message:expr, $variant:ident) => {
        match &$message.params {
            crate::messages::ProtocolParams::$variant(p) => Ok(p),
            other => Err(crate::error::ProtocolError::UnexpectedMessage(format!(
                "expected {} params, got {}",
                crate::protocol::ProtocolName::$variant,
                other.protocol()
            ))),
        }
    };
}

mod install;
mod propose;
mod setup;
mod sync;
mod take_action;
mod uninstall;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProtocolRole {
    Initiator = 0,
    Responder = 1,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProtocolName {
    Setup,
    Propose,
    Install,
    Uninstall,
    TakeAction,
    Sync,
}

impl Display for ProtocolName {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(match self {
            ProtocolName::Setup => "setup",
            ProtocolName::Propose => "propose",
            ProtocolName::Install => "install",
            ProtocolName::Uninstall => "uninstall",
            ProtocolName::TakeAction => "takeAction",
            ProtocolName::Sync => "sync",
        })
    }
}

/// Correlates the messages of one protocol run on both sides.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProcessId(pub [u8; 16]);

impl Debug for ProcessId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        for b in self.0 {
            f.write_fmt(format_args!("{:02x}", b))?;
        }
        Ok(())
    }
}

impl Display for ProcessId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        Debug::fmt(self, f)
    }
}

impl Distribution<ProcessId> for Standard {
    fn sample<R: rand::Rng + ?Sized>(&self, rng: &mut R) -> ProcessId {
        ProcessId(rng.gen())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistAppType {
    CreateChannel,
    SyncChannel,
    CreateProposal,
    RemoveProposal,
    CreateInstance,
    UpdateInstance,
    RemoveInstance,
    UpdateFreeBalance,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistCommitmentType {
    CreateSetup,
    CreateSetState,
    UpdateSetState,
    RemoveSetState,
    CreateConditional,
    UpdateConditional,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Instruction {
    /// Run the middleware chain. Does not suspend.
    Validate(MiddlewareContext),
    /// Sign a hash, resumed with [Resume::Signature].
    Sign(Hash),
    /// Hand a message to the transport without waiting for an answer.
    Send(ProtocolMessage),
    /// Send a message and suspend until the correlated reply arrives, resumed
    /// with [Resume::Reply].
    SendAndWait(ProtocolMessage),
    /// Write `channel` with `app` as the app the write is about. Channel
    /// level writes pass the free balance.
    PersistAppInstance {
        op: PersistAppType,
        channel: StateChannel,
        app: AppInstance,
    },
    PersistCommitment {
        op: PersistCommitmentType,
        commitment: Commitment,
        app_identity_hash: Hash,
    },
}

impl Instruction {
    pub fn opcode(&self) -> &'static str {
        match self {
            Instruction::Validate(_) => "validate",
            Instruction::Sign(_) => "sign",
            Instruction::Send(_) => "send",
            Instruction::SendAndWait(_) => "send_and_wait",
            Instruction::PersistAppInstance { .. } => "persist_app_instance",
            Instruction::PersistCommitment { .. } => "persist_commitment",
        }
    }
}

/// What a flow is resumed with: the outcome of the instruction it yielded
/// last.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resume {
    Start,
    Ack,
    Signature(Signature),
    Reply(ProtocolMessage),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolOutput {
    pub channel: StateChannel,
    /// The app the run was about, in its final state.
    pub app: Option<AppInstance>,
}

#[derive(Debug)]
pub enum Step {
    Yield(Instruction),
    Done(ProtocolOutput),
}

/// Read access a flow has while it runs.
pub struct Context<'a> {
    pub store: &'a dyn Store,
    pub chain: &'a dyn ChainReader,
    pub registry: &'a AppRegistry,
    pub network: &'a NetworkContext,
    /// Identifier of the party running this side of the protocol.
    pub public_identifier: Identifier,
}

pub(crate) enum Advance {
    /// Instructions to carry out in order. Every one but the last is resumed
    /// with [Resume::Ack].
    Emit(Vec<Instruction>),
    Done(ProtocolOutput),
}

/// One role of one protocol, as an explicit state machine.
pub(crate) trait Stages: Send {
    const PROTOCOL: ProtocolName;

    fn advance(&mut self, ctx: &Context<'_>, input: Resume) -> Result<Advance, ProtocolError>;
}

/// A protocol run that can be resumed until it is done.
pub trait Flow: Send {
    fn protocol(&self) -> ProtocolName;

    fn resume(&mut self, ctx: &Context<'_>, input: Resume) -> Result<Step, ProtocolError>;
}

/// Hands out the instructions of a [Stages] machine one at a time.
pub(crate) struct Coroutine<S> {
    stages: S,
    queue: VecDeque<Instruction>,
}

impl<S: Stages> Coroutine<S> {
    pub(crate) fn new(stages: S) -> Self {
        Self {
            stages,
            queue: VecDeque::new(),
        }
    }
}

impl<S: Stages> Flow for Coroutine<S> {
    fn protocol(&self) -> ProtocolName {
        S::PROTOCOL
    }

    fn resume(&mut self, ctx: &Context<'_>, input: Resume) -> Result<Step, ProtocolError> {
        if let Some(next) = self.queue.pop_front() {
            if input != Resume::Ack {
                return Err(unexpected::<S>());
            }
            return Ok(Step::Yield(next));
        }

        match self.stages.advance(ctx, input)? {
            Advance::Emit(batch) => {
                self.queue = batch.into();
                self.queue
                    .pop_front()
                    .map(Step::Yield)
                    .ok_or_else(unexpected::<S>)
            }
            Advance::Done(output) => Ok(Step::Done(output)),
        }
    }
}

fn unexpected<S: Stages>() -> ProtocolError {
    ProtocolError::UnexpectedResume {
        protocol: S::PROTOCOL,
    }
}

/// The flow for `role` of the protocol `message` belongs to. For the
/// initiator `message` is the message that starts the run, for the responder
/// the one that was received.
pub fn flow(role: ProtocolRole, message: ProtocolMessage) -> Result<Box<dyn Flow>, ProtocolError> {
    if message.params.protocol() != message.protocol {
        return Err(ProtocolError::UnexpectedMessage(format!(
            "{} message with {} params",
            message.protocol,
            message.params.protocol()
        )));
    }

    use ProtocolRole::{Initiator, Responder};
    Ok(match (role, message.protocol) {
        (Initiator, ProtocolName::Setup) => {
            Box::new(Coroutine::new(setup::Initiator::new(message)))
        }
        (Responder, ProtocolName::Setup) => {
            Box::new(Coroutine::new(setup::Responder::new(message)))
        }
        (Initiator, ProtocolName::Propose) => {
            Box::new(Coroutine::new(propose::Initiator::new(message)))
        }
        (Responder, ProtocolName::Propose) => {
            Box::new(Coroutine::new(propose::Responder::new(message)))
        }
        (Initiator, ProtocolName::Install) => {
            Box::new(Coroutine::new(install::Initiator::new(message)))
        }
        (Responder, ProtocolName::Install) => {
            Box::new(Coroutine::new(install::Responder::new(message)))
        }
        (Initiator, ProtocolName::Uninstall) => {
            Box::new(Coroutine::new(uninstall::Initiator::new(message)))
        }
        (Responder, ProtocolName::Uninstall) => {
            Box::new(Coroutine::new(uninstall::Responder::new(message)))
        }
        (Initiator, ProtocolName::TakeAction) => {
            Box::new(Coroutine::new(take_action::Initiator::new(message)))
        }
        (Responder, ProtocolName::TakeAction) => {
            Box::new(Coroutine::new(take_action::Responder::new(message)))
        }
        (Initiator, ProtocolName::Sync) => Box::new(Coroutine::new(sync::Initiator::new(message))),
        (Responder, ProtocolName::Sync) => Box::new(Coroutine::new(sync::Responder::new(message))),
    })
}

// Helpers shared by the flows.

fn load_channel(
    ctx: &Context<'_>,
    message: &ProtocolMessage,
) -> Result<StateChannel, ProtocolError> {
    let multisig = message.params.multisig_address();
    ctx.store
        .get_state_channel(&multisig)?
        .ok_or(ProtocolError::ChannelNotFound(multisig))
}

/// The counterparty of this side of the run.
fn counterpart(ctx: &Context<'_>, params: &ProtocolParams) -> Result<Identifier, ProtocolError> {
    let initiator = params.initiator_identifier();
    let responder = params.responder_identifier();
    if ctx.public_identifier == initiator {
        Ok(responder)
    } else if ctx.public_identifier == responder {
        Ok(initiator)
    } else {
        Err(ProtocolError::UnexpectedMessage(format!(
            "{} takes no part in this run",
            ctx.public_identifier
        )))
    }
}

fn signatures<const N: usize>(message: &ProtocolMessage) -> Result<[Signature; N], ProtocolError> {
    match &message.custom_data {
        CustomData::Signatures(sigs) => sigs.as_slice().try_into().map_err(|_| {
            ProtocolError::UnexpectedMessage(format!(
                "expected {} signatures, got {}",
                N,
                sigs.len()
            ))
        }),
        _ => Err(ProtocolError::UnexpectedMessage(
            "message carries no signatures".to_string(),
        )),
    }
}

/// Slot of `who` in the commitment's owner list.
fn slot_of(commitment: &Commitment, who: &Identifier) -> Result<usize, ProtocolError> {
    commitment
        .owners()
        .iter()
        .position(|owner| *owner == who.address())
        .ok_or_else(|| {
            ProtocolError::UnexpectedMessage(format!("{} does not own the commitment", who))
        })
}

/// Put `sig` into `slot`, verifying it recovers to the slot owner.
fn add_signature(
    commitment: &mut Commitment,
    slot: usize,
    sig: Signature,
) -> Result<(), ProtocolError> {
    if slot == 0 {
        commitment.add_signatures(Some(sig), None)?;
    } else {
        commitment.add_signatures(None, Some(sig))?;
    }
    Ok(())
}

/// Add our own signature. It has only just been produced, so its presence is
/// all that is checked afterwards.
fn add_own_signature(
    commitment: &mut Commitment,
    me: &Identifier,
    sig: Signature,
) -> Result<(), ProtocolError> {
    add_signature(commitment, slot_of(commitment, me)?, sig)?;
    commitment.assert_signatures(Verification::PresenceOnly)?;
    Ok(())
}

/// Add the counterparty's signature. Fails unless it recovers to the
/// counterparty's slot.
fn add_counterparty_signature(
    commitment: &mut Commitment,
    counterparty: &Identifier,
    sig: Signature,
) -> Result<(), ProtocolError> {
    add_signature(commitment, slot_of(commitment, counterparty)?, sig)
}

fn persist_app(op: PersistAppType, channel: &StateChannel, app: &AppInstance) -> Instruction {
    Instruction::PersistAppInstance {
        op,
        channel: channel.clone(),
        app: app.clone(),
    }
}

fn persist_commitment(
    op: PersistCommitmentType,
    commitment: &Commitment,
    app_identity_hash: Hash,
) -> Instruction {
    Instruction::PersistCommitment {
        op,
        commitment: commitment.clone(),
        app_identity_hash,
    }
}

/// Instruction removing the set-state commitment `app` had before its
/// latest version, if the store still holds one.
fn prune_previous(
    ctx: &Context<'_>,
    app: &AppInstance,
) -> Result<Option<Instruction>, ProtocolError> {
    let previous = app.latest_version_number.checked_sub(1);
    Ok(ctx
        .store
        .get_set_state_commitments(&app.identity_hash)?
        .into_iter()
        .find(|c| c.version_number().is_some() && c.version_number() == previous)
        .map(|c| persist_commitment(PersistCommitmentType::RemoveSetState, &c, app.identity_hash)))
}

#[cfg(test)]
mod tests;
