//! Record an app proposal in the channel. Both parties sign the proposed
//! app's set-state commitment at version 1.

use std::mem;

use super::{
    add_counterparty_signature, add_own_signature, counterpart, load_channel, persist_app,
    persist_commitment, signatures, Advance, Context, Instruction, PersistAppType,
    PersistCommitmentType, ProtocolName, ProtocolOutput, Resume, Stages,
};
use crate::{
    channel::{AppInstance, StateChannel},
    commitment::Commitment,
    error::ProtocolError,
    messages::{CustomData, ProtocolMessage},
    middleware::MiddlewareContext,
    sig::Identifier,
};

/// The channel and the proposal the message describes, and the instruction
/// validating it. The proposal takes the channel's next sequence number.
fn validate(
    ctx: &Context<'_>,
    message: &ProtocolMessage,
) -> Result<(StateChannel, AppInstance, Instruction), ProtocolError> {
    let p = params_of!(message, Propose)?;
    counterpart(ctx, &message.params)?;
    let pre = load_channel(ctx, message)?;
    let proposal = AppInstance::new(pre.multisig_address, pre.next_app_seq_no(), p.app.clone())?;
    let validate = Instruction::Validate(MiddlewareContext::Propose {
        channel: pre.clone(),
        proposal: proposal.clone(),
    });
    Ok((pre, proposal, validate))
}

pub(crate) enum Initiator {
    Start(ProtocolMessage),
    Validated {
        message: ProtocolMessage,
        pre: StateChannel,
        proposal: AppInstance,
    },
    Signing {
        message: ProtocolMessage,
        post: StateChannel,
        proposal: AppInstance,
        commitment: Commitment,
    },
    Waiting {
        responder: Identifier,
        post: StateChannel,
        proposal: AppInstance,
        commitment: Commitment,
    },
    Persisted {
        post: StateChannel,
        proposal: AppInstance,
    },
    Poisoned,
}

impl Initiator {
    pub(crate) fn new(message: ProtocolMessage) -> Self {
        Self::Start(message)
    }
}

impl Stages for Initiator {
    const PROTOCOL: ProtocolName = ProtocolName::Propose;

    fn advance(&mut self, ctx: &Context<'_>, input: Resume) -> Result<Advance, ProtocolError> {
        match (mem::replace(self, Self::Poisoned), input) {
            (Self::Start(message), Resume::Start) => {
                let (pre, proposal, validate) = validate(ctx, &message)?;
                *self = Self::Validated {
                    message,
                    pre,
                    proposal,
                };
                Ok(Advance::Emit(vec![validate]))
            }
            (
                Self::Validated {
                    message,
                    pre,
                    proposal,
                },
                Resume::Ack,
            ) => {
                let post = pre.add_proposal(proposal.clone())?;
                let commitment = Commitment::set_state(ctx.network, &proposal);
                let hash = commitment.hash_to_sign()?;
                *self = Self::Signing {
                    message,
                    post,
                    proposal,
                    commitment,
                };
                Ok(Advance::Emit(vec![Instruction::Sign(hash)]))
            }
            (
                Self::Signing {
                    message,
                    post,
                    proposal,
                    mut commitment,
                },
                Resume::Signature(sig),
            ) => {
                add_own_signature(&mut commitment, &ctx.public_identifier, sig)?;
                let responder = counterpart(ctx, &message.params)?;
                let instructions = vec![
                    persist_commitment(
                        PersistCommitmentType::CreateSetState,
                        &commitment,
                        proposal.identity_hash,
                    ),
                    Instruction::SendAndWait(
                        message.with_custom_data(CustomData::Signatures(vec![sig])),
                    ),
                ];
                *self = Self::Waiting {
                    responder,
                    post,
                    proposal,
                    commitment,
                };
                Ok(Advance::Emit(instructions))
            }
            (
                Self::Waiting {
                    responder,
                    post,
                    proposal,
                    mut commitment,
                },
                Resume::Reply(reply),
            ) => {
                let [sig] = signatures::<1>(&reply)?;
                add_counterparty_signature(&mut commitment, &responder, sig)?;
                let instructions = vec![
                    persist_commitment(
                        PersistCommitmentType::UpdateSetState,
                        &commitment,
                        proposal.identity_hash,
                    ),
                    persist_app(PersistAppType::CreateProposal, &post, &proposal),
                ];
                *self = Self::Persisted { post, proposal };
                Ok(Advance::Emit(instructions))
            }
            (Self::Persisted { post, proposal }, Resume::Ack) => {
                Ok(Advance::Done(ProtocolOutput {
                    channel: post,
                    app: Some(proposal),
                }))
            }
            _ => Err(ProtocolError::UnexpectedResume {
                protocol: Self::PROTOCOL,
            }),
        }
    }
}

pub(crate) enum Responder {
    Start(ProtocolMessage),
    Validated {
        message: ProtocolMessage,
        pre: StateChannel,
        proposal: AppInstance,
    },
    Signing {
        message: ProtocolMessage,
        post: StateChannel,
        proposal: AppInstance,
        commitment: Commitment,
    },
    Persisted {
        post: StateChannel,
        proposal: AppInstance,
    },
    Poisoned,
}

impl Responder {
    pub(crate) fn new(message: ProtocolMessage) -> Self {
        Self::Start(message)
    }
}

impl Stages for Responder {
    const PROTOCOL: ProtocolName = ProtocolName::Propose;

    fn advance(&mut self, ctx: &Context<'_>, input: Resume) -> Result<Advance, ProtocolError> {
        match (mem::replace(self, Self::Poisoned), input) {
            (Self::Start(message), Resume::Start) => {
                let (pre, proposal, validate) = validate(ctx, &message)?;
                *self = Self::Validated {
                    message,
                    pre,
                    proposal,
                };
                Ok(Advance::Emit(vec![validate]))
            }
            (
                Self::Validated {
                    message,
                    pre,
                    proposal,
                },
                Resume::Ack,
            ) => {
                let post = pre.add_proposal(proposal.clone())?;
                let mut commitment = Commitment::set_state(ctx.network, &proposal);
                let initiator = counterpart(ctx, &message.params)?;
                let [sig] = signatures::<1>(&message)?;
                add_counterparty_signature(&mut commitment, &initiator, sig)?;

                let hash = commitment.hash_to_sign()?;
                *self = Self::Signing {
                    message,
                    post,
                    proposal,
                    commitment,
                };
                Ok(Advance::Emit(vec![Instruction::Sign(hash)]))
            }
            (
                Self::Signing {
                    message,
                    post,
                    proposal,
                    mut commitment,
                },
                Resume::Signature(sig),
            ) => {
                add_own_signature(&mut commitment, &ctx.public_identifier, sig)?;
                let instructions = vec![
                    persist_commitment(
                        PersistCommitmentType::CreateSetState,
                        &commitment,
                        proposal.identity_hash,
                    ),
                    persist_app(PersistAppType::CreateProposal, &post, &proposal),
                    Instruction::Send(message.reply(CustomData::Signatures(vec![sig]))),
                ];
                *self = Self::Persisted { post, proposal };
                Ok(Advance::Emit(instructions))
            }
            (Self::Persisted { post, proposal }, Resume::Ack) => {
                Ok(Advance::Done(ProtocolOutput {
                    channel: post,
                    app: Some(proposal),
                }))
            }
            _ => Err(ProtocolError::UnexpectedResume {
                protocol: Self::PROTOCOL,
            }),
        }
    }
}
