//! Apply an action to an installed app, advancing it by one version.
//!
//! The signature slots of the app's commitments follow the app's own
//! initiator and responder, fixed when it was proposed. Which party starts a
//! particular round does not change them.

use std::mem;

use super::{
    add_signature, counterpart, load_channel, persist_app, persist_commitment, prune_previous,
    signatures, Advance, Context, Instruction, PersistAppType, PersistCommitmentType,
    ProtocolName, ProtocolOutput, Resume, Stages,
};
use crate::{
    abiencode::types::Hash,
    channel::{AppInstance, StateChannel},
    commitment::{Commitment, Verification},
    error::ProtocolError,
    messages::{CustomData, ProtocolMessage, TakeActionParams},
    middleware::MiddlewareContext,
    sig::Identifier,
};

/// `(own slot, counterparty slot)` in the app's set-state commitment.
fn slots(app: &AppInstance, counterparty: &Identifier) -> (usize, usize) {
    let is_app_initiator = app.initiator_identifier != *counterparty;
    if is_app_initiator {
        (0, 1)
    } else {
        (1, 0)
    }
}

fn validate(
    ctx: &Context<'_>,
    message: &ProtocolMessage,
) -> Result<(TakeActionParams, StateChannel, Instruction), ProtocolError> {
    let p = params_of!(message, TakeAction)?.clone();
    counterpart(ctx, &message.params)?;
    let pre = load_channel(ctx, message)?;
    let app = pre.app_instance(&p.app_identity_hash)?.clone();
    let validate = Instruction::Validate(MiddlewareContext::TakeAction {
        channel: pre.clone(),
        app,
        action: p.action.clone(),
    });
    Ok((p, pre, validate))
}

/// The channel after applying the action, and the app's new set-state
/// commitment.
fn transition(
    ctx: &Context<'_>,
    pre: &StateChannel,
    p: &TakeActionParams,
) -> Result<(StateChannel, Commitment), ProtocolError> {
    let app = pre.app_instance(&p.app_identity_hash)?;
    let new_state = ctx.registry.transition(app, &p.action, ctx.chain)?;
    let post = pre.set_state(&p.app_identity_hash, new_state, p.state_timeout)?;
    let commitment = Commitment::set_state(ctx.network, post.app_instance(&p.app_identity_hash)?);
    Ok((post, commitment))
}

pub(crate) enum Initiator {
    Start(ProtocolMessage),
    Validated {
        message: ProtocolMessage,
        params: TakeActionParams,
        pre: StateChannel,
    },
    Signing {
        message: ProtocolMessage,
        params: TakeActionParams,
        pre: StateChannel,
        post: StateChannel,
        commitment: Commitment,
    },
    Waiting {
        app_identity_hash: Hash,
        post: StateChannel,
        commitment: Commitment,
        their_slot: usize,
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
    const PROTOCOL: ProtocolName = ProtocolName::TakeAction;

    fn advance(&mut self, ctx: &Context<'_>, input: Resume) -> Result<Advance, ProtocolError> {
        match (mem::replace(self, Self::Poisoned), input) {
            (Self::Start(message), Resume::Start) => {
                let (params, pre, validate) = validate(ctx, &message)?;
                *self = Self::Validated {
                    message,
                    params,
                    pre,
                };
                Ok(Advance::Emit(vec![validate]))
            }
            (
                Self::Validated {
                    message,
                    params,
                    pre,
                },
                Resume::Ack,
            ) => {
                let (post, commitment) = transition(ctx, &pre, &params)?;
                let hash = commitment.hash_to_sign()?;
                *self = Self::Signing {
                    message,
                    params,
                    pre,
                    post,
                    commitment,
                };
                Ok(Advance::Emit(vec![Instruction::Sign(hash)]))
            }
            (
                Self::Signing {
                    message,
                    params,
                    pre,
                    post,
                    mut commitment,
                },
                Resume::Signature(sig),
            ) => {
                let hash = params.app_identity_hash;
                let (own_slot, their_slot) =
                    slots(post.app_instance(&hash)?, &params.responder_identifier);
                add_signature(&mut commitment, own_slot, sig)?;
                commitment.assert_signatures(Verification::PresenceOnly)?;

                // Pending action goes next to the singly signed commitment.
                let pending = pre.set_app_action(&hash, params.action.clone())?;
                let instructions = vec![
                    persist_commitment(PersistCommitmentType::CreateSetState, &commitment, hash),
                    persist_app(
                        PersistAppType::UpdateInstance,
                        &pending,
                        pending.app_instance(&hash)?,
                    ),
                    Instruction::SendAndWait(
                        message.with_custom_data(CustomData::Signatures(vec![sig])),
                    ),
                ];
                *self = Self::Waiting {
                    app_identity_hash: hash,
                    post,
                    commitment,
                    their_slot,
                };
                Ok(Advance::Emit(instructions))
            }
            (
                Self::Waiting {
                    app_identity_hash,
                    post,
                    mut commitment,
                    their_slot,
                },
                Resume::Reply(reply),
            ) => {
                let [sig] = signatures::<1>(&reply)?;
                add_signature(&mut commitment, their_slot, sig)?;

                let app = post.app_instance(&app_identity_hash)?.clone();
                let mut instructions = vec![persist_commitment(
                    PersistCommitmentType::UpdateSetState,
                    &commitment,
                    app_identity_hash,
                )];
                instructions.extend(prune_previous(ctx, &app)?);
                instructions.push(persist_app(PersistAppType::UpdateInstance, &post, &app));
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
        params: TakeActionParams,
        pre: StateChannel,
    },
    Signing {
        message: ProtocolMessage,
        app_identity_hash: Hash,
        post: StateChannel,
        commitment: Commitment,
        own_slot: usize,
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
    const PROTOCOL: ProtocolName = ProtocolName::TakeAction;

    fn advance(&mut self, ctx: &Context<'_>, input: Resume) -> Result<Advance, ProtocolError> {
        match (mem::replace(self, Self::Poisoned), input) {
            (Self::Start(message), Resume::Start) => {
                let (params, pre, validate) = validate(ctx, &message)?;
                *self = Self::Validated {
                    message,
                    params,
                    pre,
                };
                Ok(Advance::Emit(vec![validate]))
            }
            (
                Self::Validated {
                    message,
                    params,
                    pre,
                },
                Resume::Ack,
            ) => {
                let (post, mut commitment) = transition(ctx, &pre, &params)?;
                let hash = params.app_identity_hash;
                let (own_slot, their_slot) =
                    slots(post.app_instance(&hash)?, &params.initiator_identifier);

                // Never sign before the initiator has committed to the same
                // state.
                let [sig] = signatures::<1>(&message)?;
                add_signature(&mut commitment, their_slot, sig)?;

                let to_sign = commitment.hash_to_sign()?;
                *self = Self::Signing {
                    message,
                    app_identity_hash: hash,
                    post,
                    commitment,
                    own_slot,
                };
                Ok(Advance::Emit(vec![Instruction::Sign(to_sign)]))
            }
            (
                Self::Signing {
                    message,
                    app_identity_hash,
                    post,
                    mut commitment,
                    own_slot,
                },
                Resume::Signature(sig),
            ) => {
                add_signature(&mut commitment, own_slot, sig)?;
                commitment.assert_signatures(Verification::Full)?;

                let app = post.app_instance(&app_identity_hash)?.clone();
                let mut instructions = vec![persist_commitment(
                    PersistCommitmentType::UpdateSetState,
                    &commitment,
                    app_identity_hash,
                )];
                instructions.extend(prune_previous(ctx, &app)?);
                instructions.push(persist_app(PersistAppType::UpdateInstance, &post, &app));
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
