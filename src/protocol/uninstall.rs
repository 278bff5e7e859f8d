//! Uninstall an app: its outcome is credited back to the free balance and
//! both parties sign the new free balance state.

use std::mem;

use super::{
    add_counterparty_signature, add_own_signature, counterpart, load_channel, persist_app,
    persist_commitment, prune_previous, signatures, Advance, Context, Instruction,
    PersistAppType, PersistCommitmentType, ProtocolName, ProtocolOutput, Resume, Stages,
};
use crate::{
    abiencode::types::Hash,
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
    let hash = params_of!(message, Uninstall)?.app_identity_hash;
    counterpart(ctx, &message.params)?;
    let pre = load_channel(ctx, message)?;
    let validate = Instruction::Validate(MiddlewareContext::Uninstall {
        channel: pre.clone(),
        app: pre.app_instance(&hash)?.clone(),
        initiator: message.params.initiator_identifier(),
    });
    Ok((hash, pre, validate))
}

/// Channel without the app, the removed app, and the new free balance
/// commitment.
fn uninstall(
    ctx: &Context<'_>,
    pre: &StateChannel,
    hash: &Hash,
) -> Result<(StateChannel, AppInstance, Commitment), ProtocolError> {
    let app = pre.app_instance(hash)?.clone();
    let outcome = ctx.registry.outcome(&app, ctx.chain)?;
    let post = pre.uninstall_app(hash, &outcome)?;
    let free_balance = Commitment::set_state(ctx.network, &post.free_balance);
    Ok((post, app, free_balance))
}

pub(crate) enum Initiator {
    Start(ProtocolMessage),
    Validated {
        message: ProtocolMessage,
        hash: Hash,
        pre: StateChannel,
    },
    Signing {
        message: ProtocolMessage,
        post: StateChannel,
        app: AppInstance,
        free_balance: Commitment,
    },
    Waiting {
        responder: Identifier,
        post: StateChannel,
        app: AppInstance,
        free_balance: Commitment,
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
    const PROTOCOL: ProtocolName = ProtocolName::Uninstall;

    fn advance(&mut self, ctx: &Context<'_>, input: Resume) -> Result<Advance, ProtocolError> {
        match (mem::replace(self, Self::Poisoned), input) {
            (Self::Start(message), Resume::Start) => {
                let (hash, pre, validate) = validate(ctx, &message)?;
                *self = Self::Validated { message, hash, pre };
                Ok(Advance::Emit(vec![validate]))
            }
            (Self::Validated { message, hash, pre }, Resume::Ack) => {
                let (post, app, free_balance) = uninstall(ctx, &pre, &hash)?;
                let to_sign = free_balance.hash_to_sign()?;
                *self = Self::Signing {
                    message,
                    post,
                    app,
                    free_balance,
                };
                Ok(Advance::Emit(vec![Instruction::Sign(to_sign)]))
            }
            (
                Self::Signing {
                    message,
                    post,
                    app,
                    mut free_balance,
                },
                Resume::Signature(sig),
            ) => {
                add_own_signature(&mut free_balance, &ctx.public_identifier, sig)?;
                let responder = counterpart(ctx, &message.params)?;
                let instructions = vec![
                    persist_commitment(
                        PersistCommitmentType::CreateSetState,
                        &free_balance,
                        post.free_balance.identity_hash,
                    ),
                    Instruction::SendAndWait(
                        message.with_custom_data(CustomData::Signatures(vec![sig])),
                    ),
                ];
                *self = Self::Waiting {
                    responder,
                    post,
                    app,
                    free_balance,
                };
                Ok(Advance::Emit(instructions))
            }
            (
                Self::Waiting {
                    responder,
                    post,
                    app,
                    mut free_balance,
                },
                Resume::Reply(reply),
            ) => {
                let [sig] = signatures::<1>(&reply)?;
                add_counterparty_signature(&mut free_balance, &responder, sig)?;

                let mut instructions = vec![persist_commitment(
                    PersistCommitmentType::UpdateSetState,
                    &free_balance,
                    post.free_balance.identity_hash,
                )];
                instructions.extend(prune_previous(ctx, &post.free_balance)?);
                instructions.push(persist_app(PersistAppType::RemoveInstance, &post, &app));
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
    Signing {
        message: ProtocolMessage,
        post: StateChannel,
        app: AppInstance,
        free_balance: Commitment,
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
    const PROTOCOL: ProtocolName = ProtocolName::Uninstall;

    fn advance(&mut self, ctx: &Context<'_>, input: Resume) -> Result<Advance, ProtocolError> {
        match (mem::replace(self, Self::Poisoned), input) {
            (Self::Start(message), Resume::Start) => {
                let (hash, pre, validate) = validate(ctx, &message)?;
                *self = Self::Validated { message, hash, pre };
                Ok(Advance::Emit(vec![validate]))
            }
            (Self::Validated { message, hash, pre }, Resume::Ack) => {
                let (post, app, mut free_balance) = uninstall(ctx, &pre, &hash)?;
                let initiator = counterpart(ctx, &message.params)?;
                let [sig] = signatures::<1>(&message)?;
                add_counterparty_signature(&mut free_balance, &initiator, sig)?;

                let to_sign = free_balance.hash_to_sign()?;
                *self = Self::Signing {
                    message,
                    post,
                    app,
                    free_balance,
                };
                Ok(Advance::Emit(vec![Instruction::Sign(to_sign)]))
            }
            (
                Self::Signing {
                    message,
                    post,
                    app,
                    mut free_balance,
                },
                Resume::Signature(sig),
            ) => {
                add_own_signature(&mut free_balance, &ctx.public_identifier, sig)?;

                let mut instructions = vec![persist_commitment(
                    PersistCommitmentType::UpdateSetState,
                    &free_balance,
                    post.free_balance.identity_hash,
                )];
                instructions.extend(prune_previous(ctx, &post.free_balance)?);
                instructions.push(persist_app(PersistAppType::RemoveInstance, &post, &app));
                instructions.push(Instruction::Send(
                    message.reply(CustomData::Signatures(vec![sig])),
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
