//! Install a proposed app: its deposits move out of the free balance, and
//! both parties sign the app's conditional transaction and the new free
//! balance state.

use std::mem;

use super::{
    add_counterparty_signature, add_own_signature, counterpart, load_channel, persist_app,
    persist_commitment, prune_previous, signatures, Advance, Context, Instruction,
    PersistAppType, PersistCommitmentType, ProtocolName, ProtocolOutput, Resume, Stages,
};
use crate::{
    abiencode::types::{Hash, Signature},
    channel::{AppInstance, StateChannel},
    commitment::Commitment,
    error::ProtocolError,
    messages::{CustomData, ProtocolMessage},
    middleware::MiddlewareContext,
    sig::Identifier,
};

fn validate(
    ctx: &Context<'_>,
    message: &ProtocolMessage,
) -> Result<(Hash, StateChannel, Instruction), ProtocolError> {
    let hash = params_of!(message, Install)?.proposal_identity_hash;
    counterpart(ctx, &message.params)?;
    let pre = load_channel(ctx, message)?;
    let validate = Instruction::Validate(MiddlewareContext::Install {
        channel: pre.clone(),
        proposal: pre.proposal(&hash)?.clone(),
    });
    Ok((hash, pre, validate))
}

/// Channel with the app installed, the app, and its conditional transaction
/// and free balance commitments.
fn install(
    ctx: &Context<'_>,
    pre: &StateChannel,
    hash: &Hash,
) -> Result<(StateChannel, AppInstance, Commitment, Commitment), ProtocolError> {
    let post = pre.install_app(hash)?;
    let app = post.app_instance(hash)?.clone();
    let conditional = Commitment::conditional_transaction(ctx.network, &post, &app)?;
    let free_balance = Commitment::set_state(ctx.network, &post.free_balance);
    Ok((post, app, conditional, free_balance))
}

/// The commitments of an install, as they move through a run.
pub(crate) struct Commitments {
    conditional: Commitment,
    free_balance: Commitment,
}

pub(crate) enum Initiator {
    Start(ProtocolMessage),
    Validated {
        message: ProtocolMessage,
        hash: Hash,
        pre: StateChannel,
    },
    SigningConditional {
        message: ProtocolMessage,
        post: StateChannel,
        app: AppInstance,
        commitments: Commitments,
    },
    SigningFreeBalance {
        message: ProtocolMessage,
        post: StateChannel,
        app: AppInstance,
        commitments: Commitments,
        conditional_sig: Signature,
    },
    Waiting {
        responder: Identifier,
        post: StateChannel,
        app: AppInstance,
        commitments: Commitments,
    },
    Persisted {
        post: StateChannel,
        app: AppInstance,
    },
    Poisoned,
}

impl Initiator {
    pub(crate) fn new(message: ProtocolMessage) -> Self {
        Self::Start(message)
    }
}

impl Stages for Initiator {
    const PROTOCOL: ProtocolName = ProtocolName::Install;

    fn advance(&mut self, ctx: &Context<'_>, input: Resume) -> Result<Advance, ProtocolError> {
        let me = ctx.public_identifier;
        match (mem::replace(self, Self::Poisoned), input) {
            (Self::Start(message), Resume::Start) => {
                let (hash, pre, validate) = validate(ctx, &message)?;
                *self = Self::Validated { message, hash, pre };
                Ok(Advance::Emit(vec![validate]))
            }
            (Self::Validated { message, hash, pre }, Resume::Ack) => {
                let (post, app, conditional, free_balance) = install(ctx, &pre, &hash)?;
                let to_sign = conditional.hash_to_sign()?;
                *self = Self::SigningConditional {
                    message,
                    post,
                    app,
                    commitments: Commitments {
                        conditional,
                        free_balance,
                    },
                };
                Ok(Advance::Emit(vec![Instruction::Sign(to_sign)]))
            }
            (
                Self::SigningConditional {
                    message,
                    post,
                    app,
                    mut commitments,
                },
                Resume::Signature(sig),
            ) => {
                add_own_signature(&mut commitments.conditional, &me, sig)?;
                let to_sign = commitments.free_balance.hash_to_sign()?;
                *self = Self::SigningFreeBalance {
                    message,
                    post,
                    app,
                    commitments,
                    conditional_sig: sig,
                };
                Ok(Advance::Emit(vec![Instruction::Sign(to_sign)]))
            }
            (
                Self::SigningFreeBalance {
                    message,
                    post,
                    app,
                    mut commitments,
                    conditional_sig,
                },
                Resume::Signature(sig),
            ) => {
                add_own_signature(&mut commitments.free_balance, &me, sig)?;
                let responder = counterpart(ctx, &message.params)?;
                let instructions = vec![
                    persist_commitment(
                        PersistCommitmentType::CreateConditional,
                        &commitments.conditional,
                        app.identity_hash,
                    ),
                    persist_commitment(
                        PersistCommitmentType::CreateSetState,
                        &commitments.free_balance,
                        post.free_balance.identity_hash,
                    ),
                    Instruction::SendAndWait(message.with_custom_data(CustomData::Signatures(
                        vec![conditional_sig, sig],
                    ))),
                ];
                *self = Self::Waiting {
                    responder,
                    post,
                    app,
                    commitments,
                };
                Ok(Advance::Emit(instructions))
            }
            (
                Self::Waiting {
                    responder,
                    post,
                    app,
                    mut commitments,
                },
                Resume::Reply(reply),
            ) => {
                let [conditional_sig, free_balance_sig] = signatures::<2>(&reply)?;
                add_counterparty_signature(
                    &mut commitments.conditional,
                    &responder,
                    conditional_sig,
                )?;
                add_counterparty_signature(
                    &mut commitments.free_balance,
                    &responder,
                    free_balance_sig,
                )?;

                let mut instructions = vec![
                    persist_commitment(
                        PersistCommitmentType::UpdateConditional,
                        &commitments.conditional,
                        app.identity_hash,
                    ),
                    persist_commitment(
                        PersistCommitmentType::UpdateSetState,
                        &commitments.free_balance,
                        post.free_balance.identity_hash,
                    ),
                ];
                instructions.extend(prune_previous(ctx, &post.free_balance)?);
                instructions.push(persist_app(PersistAppType::CreateInstance, &post, &app));
                *self = Self::Persisted { post, app };
                Ok(Advance::Emit(instructions))
            }
            (Self::Persisted { post, app }, Resume::Ack) => Ok(Advance::Done(ProtocolOutput {
                channel: post,
                app: Some(app),
            })),
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
        hash: Hash,
        pre: StateChannel,
    },
    SigningConditional {
        message: ProtocolMessage,
        post: StateChannel,
        app: AppInstance,
        commitments: Commitments,
    },
    SigningFreeBalance {
        message: ProtocolMessage,
        post: StateChannel,
        app: AppInstance,
        commitments: Commitments,
        conditional_sig: Signature,
    },
    Persisted {
        post: StateChannel,
        app: AppInstance,
    },
    Poisoned,
}

impl Responder {
    pub(crate) fn new(message: ProtocolMessage) -> Self {
        Self::Start(message)
    }
}

impl Stages for Responder {
    const PROTOCOL: ProtocolName = ProtocolName::Install;

    fn advance(&mut self, ctx: &Context<'_>, input: Resume) -> Result<Advance, ProtocolError> {
        let me = ctx.public_identifier;
        match (mem::replace(self, Self::Poisoned), input) {
            (Self::Start(message), Resume::Start) => {
                let (hash, pre, validate) = validate(ctx, &message)?;
                *self = Self::Validated { message, hash, pre };
                Ok(Advance::Emit(vec![validate]))
            }
            (Self::Validated { message, hash, pre }, Resume::Ack) => {
                let (post, app, mut conditional, mut free_balance) = install(ctx, &pre, &hash)?;
                let initiator = counterpart(ctx, &message.params)?;
                let [conditional_sig, free_balance_sig] = signatures::<2>(&message)?;
                add_counterparty_signature(&mut conditional, &initiator, conditional_sig)?;
                add_counterparty_signature(&mut free_balance, &initiator, free_balance_sig)?;

                let to_sign = conditional.hash_to_sign()?;
                *self = Self::SigningConditional {
                    message,
                    post,
                    app,
                    commitments: Commitments {
                        conditional,
                        free_balance,
                    },
                };
                Ok(Advance::Emit(vec![Instruction::Sign(to_sign)]))
            }
            (
                Self::SigningConditional {
                    message,
                    post,
                    app,
                    mut commitments,
                },
                Resume::Signature(sig),
            ) => {
                add_own_signature(&mut commitments.conditional, &me, sig)?;
                let to_sign = commitments.free_balance.hash_to_sign()?;
                *self = Self::SigningFreeBalance {
                    message,
                    post,
                    app,
                    commitments,
                    conditional_sig: sig,
                };
                Ok(Advance::Emit(vec![Instruction::Sign(to_sign)]))
            }
            (
                Self::SigningFreeBalance {
                    message,
                    post,
                    app,
                    mut commitments,
                    conditional_sig,
                },
                Resume::Signature(sig),
            ) => {
                add_own_signature(&mut commitments.free_balance, &me, sig)?;

                let mut instructions = vec![
                    persist_commitment(
                        PersistCommitmentType::CreateConditional,
                        &commitments.conditional,
                        app.identity_hash,
                    ),
                    persist_commitment(
                        PersistCommitmentType::UpdateSetState,
                        &commitments.free_balance,
                        post.free_balance.identity_hash,
                    ),
                ];
                instructions.extend(prune_previous(ctx, &post.free_balance)?);
                instructions.push(persist_app(PersistAppType::CreateInstance, &post, &app));
                instructions.push(Instruction::Send(
                    message.reply(CustomData::Signatures(vec![conditional_sig, sig])),
                ));
                *self = Self::Persisted { post, app };
                Ok(Advance::Emit(instructions))
            }
            (Self::Persisted { post, app }, Resume::Ack) => Ok(Advance::Done(ProtocolOutput {
                channel: post,
                app: Some(app),
            })),
            _ => Err(ProtocolError::UnexpectedResume {
                protocol: Self::PROTOCOL,
            }),
        }
    }
}
