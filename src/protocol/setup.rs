//! Create a channel: its free balance at version 1, the setup commitment and
//! the first free-balance set-state commitment.

use std::mem;

use super::{
    add_counterparty_signature, add_own_signature, counterpart, persist_app, persist_commitment,
    signatures, Advance, Context, Instruction, PersistAppType, PersistCommitmentType,
    ProtocolName, ProtocolOutput, Resume, Stages,
};
use crate::{
    abiencode::types::Signature,
    channel::{multisig_address, StateChannel},
    commitment::Commitment,
    error::ProtocolError,
    messages::{CustomData, ProtocolMessage},
    sig::Identifier,
};

/// The channel the message asks for, together with its setup and free
/// balance commitments. Fails if the channel exists already.
fn new_channel(
    ctx: &Context<'_>,
    message: &ProtocolMessage,
) -> Result<(StateChannel, Commitment, Commitment), ProtocolError> {
    let p = params_of!(message, Setup)?;
    counterpart(ctx, &message.params)?;
    if ctx.store.get_state_channel(&p.multisig_address)?.is_some() {
        return Err(ProtocolError::ChannelAlreadyExists(p.multisig_address));
    }

    let channel = StateChannel::setup(
        ctx.network,
        p.multisig_address,
        p.initiator_identifier,
        p.responder_identifier,
    )?;
    if multisig_address(ctx.network, &channel.owner_addresses())? != p.multisig_address {
        return Err(ProtocolError::UnexpectedMessage(format!(
            "multisig {} is not owned by {} and {}",
            p.multisig_address, p.initiator_identifier, p.responder_identifier
        )));
    }

    let setup = Commitment::setup(ctx.network, &channel);
    let free_balance = Commitment::set_state(ctx.network, &channel.free_balance);
    Ok((channel, setup, free_balance))
}

pub(crate) enum Initiator {
    Start(ProtocolMessage),
    SigningSetup {
        message: ProtocolMessage,
        channel: StateChannel,
        setup: Commitment,
        free_balance: Commitment,
    },
    SigningFreeBalance {
        message: ProtocolMessage,
        channel: StateChannel,
        setup: Commitment,
        free_balance: Commitment,
        setup_sig: Signature,
    },
    Waiting {
        responder: Identifier,
        channel: StateChannel,
        setup: Commitment,
        free_balance: Commitment,
    },
    Persisted(StateChannel),
    Poisoned,
}

impl Initiator {
    pub(crate) fn new(message: ProtocolMessage) -> Self {
        Self::Start(message)
    }
}

impl Stages for Initiator {
    const PROTOCOL: ProtocolName = ProtocolName::Setup;

    fn advance(&mut self, ctx: &Context<'_>, input: Resume) -> Result<Advance, ProtocolError> {
        let me = ctx.public_identifier;
        match (mem::replace(self, Self::Poisoned), input) {
            (Self::Start(message), Resume::Start) => {
                let (channel, setup, free_balance) = new_channel(ctx, &message)?;
                let hash = setup.hash_to_sign()?;
                *self = Self::SigningSetup {
                    message,
                    channel,
                    setup,
                    free_balance,
                };
                Ok(Advance::Emit(vec![Instruction::Sign(hash)]))
            }
            (
                Self::SigningSetup {
                    message,
                    channel,
                    mut setup,
                    free_balance,
                },
                Resume::Signature(sig),
            ) => {
                add_own_signature(&mut setup, &me, sig)?;
                let hash = free_balance.hash_to_sign()?;
                *self = Self::SigningFreeBalance {
                    message,
                    channel,
                    setup,
                    free_balance,
                    setup_sig: sig,
                };
                Ok(Advance::Emit(vec![Instruction::Sign(hash)]))
            }
            (
                Self::SigningFreeBalance {
                    message,
                    channel,
                    setup,
                    mut free_balance,
                    setup_sig,
                },
                Resume::Signature(sig),
            ) => {
                add_own_signature(&mut free_balance, &me, sig)?;
                let responder = counterpart(ctx, &message.params)?;
                let instructions = vec![
                    persist_commitment(
                        PersistCommitmentType::CreateSetState,
                        &free_balance,
                        channel.free_balance.identity_hash,
                    ),
                    Instruction::SendAndWait(
                        message.with_custom_data(CustomData::Signatures(vec![setup_sig, sig])),
                    ),
                ];
                *self = Self::Waiting {
                    responder,
                    channel,
                    setup,
                    free_balance,
                };
                Ok(Advance::Emit(instructions))
            }
            (
                Self::Waiting {
                    responder,
                    channel,
                    mut setup,
                    mut free_balance,
                },
                Resume::Reply(reply),
            ) => {
                let [setup_sig, free_balance_sig] = signatures::<2>(&reply)?;
                add_counterparty_signature(&mut setup, &responder, setup_sig)?;
                add_counterparty_signature(&mut free_balance, &responder, free_balance_sig)?;

                let fb = channel.free_balance.identity_hash;
                let instructions = vec![
                    persist_app(PersistAppType::CreateChannel, &channel, &channel.free_balance),
                    persist_commitment(PersistCommitmentType::CreateSetup, &setup, fb),
                    persist_commitment(PersistCommitmentType::UpdateSetState, &free_balance, fb),
                ];
                *self = Self::Persisted(channel);
                Ok(Advance::Emit(instructions))
            }
            (Self::Persisted(channel), Resume::Ack) => Ok(Advance::Done(ProtocolOutput {
                channel,
                app: None,
            })),
            _ => Err(ProtocolError::UnexpectedResume {
                protocol: Self::PROTOCOL,
            }),
        }
    }
}

pub(crate) enum Responder {
    Start(ProtocolMessage),
    SigningSetup {
        message: ProtocolMessage,
        channel: StateChannel,
        setup: Commitment,
        free_balance: Commitment,
    },
    SigningFreeBalance {
        message: ProtocolMessage,
        channel: StateChannel,
        setup: Commitment,
        free_balance: Commitment,
        setup_sig: Signature,
    },
    Persisted(StateChannel),
    Poisoned,
}

impl Responder {
    pub(crate) fn new(message: ProtocolMessage) -> Self {
        Self::Start(message)
    }
}

impl Stages for Responder {
    const PROTOCOL: ProtocolName = ProtocolName::Setup;

    fn advance(&mut self, ctx: &Context<'_>, input: Resume) -> Result<Advance, ProtocolError> {
        let me = ctx.public_identifier;
        match (mem::replace(self, Self::Poisoned), input) {
            (Self::Start(message), Resume::Start) => {
                let (channel, mut setup, mut free_balance) = new_channel(ctx, &message)?;
                let initiator = counterpart(ctx, &message.params)?;
                let [setup_sig, free_balance_sig] = signatures::<2>(&message)?;
                add_counterparty_signature(&mut setup, &initiator, setup_sig)?;
                add_counterparty_signature(&mut free_balance, &initiator, free_balance_sig)?;

                let hash = setup.hash_to_sign()?;
                *self = Self::SigningSetup {
                    message,
                    channel,
                    setup,
                    free_balance,
                };
                Ok(Advance::Emit(vec![Instruction::Sign(hash)]))
            }
            (
                Self::SigningSetup {
                    message,
                    channel,
                    mut setup,
                    free_balance,
                },
                Resume::Signature(sig),
            ) => {
                add_own_signature(&mut setup, &me, sig)?;
                let hash = free_balance.hash_to_sign()?;
                *self = Self::SigningFreeBalance {
                    message,
                    channel,
                    setup,
                    free_balance,
                    setup_sig: sig,
                };
                Ok(Advance::Emit(vec![Instruction::Sign(hash)]))
            }
            (
                Self::SigningFreeBalance {
                    message,
                    channel,
                    setup,
                    mut free_balance,
                    setup_sig,
                },
                Resume::Signature(sig),
            ) => {
                add_own_signature(&mut free_balance, &me, sig)?;

                let fb = channel.free_balance.identity_hash;
                let instructions = vec![
                    persist_app(PersistAppType::CreateChannel, &channel, &channel.free_balance),
                    persist_commitment(PersistCommitmentType::CreateSetup, &setup, fb),
                    persist_commitment(PersistCommitmentType::CreateSetState, &free_balance, fb),
                    Instruction::Send(
                        message.reply(CustomData::Signatures(vec![setup_sig, sig])),
                    ),
                ];
                *self = Self::Persisted(channel);
                Ok(Advance::Emit(instructions))
            }
            (Self::Persisted(channel), Resume::Ack) => Ok(Advance::Done(ProtocolOutput {
                channel,
                app: None,
            })),
            _ => Err(ProtocolError::UnexpectedResume {
                protocol: Self::PROTOCOL,
            }),
        }
    }
}
