//! Reconcile two replicas of a channel after one side missed an update.
//!
//! The initiator sends its channel with the signatures on the latest state of
//! every app. The responder merges: a copy of an app from the other side is
//! only taken if both owners signed it, and the newer version wins. The set
//! of installed apps is the one of the replica with the newer free balance.
//! Both sides end up storing the merged channel. Nothing new is signed.

use std::{collections::BTreeMap, mem};

use super::{
    counterpart, load_channel, persist_app, persist_commitment, Advance, Context, Instruction,
    PersistAppType, PersistCommitmentType, ProtocolName, ProtocolOutput, Resume, Stages,
};
use crate::{
    abiencode::types::Hash,
    channel::{AppInstance, StateChannel},
    commitment::{Commitment, Verification},
    error::ProtocolError,
    messages::{CustomData, ProtocolMessage, SignedState, SyncPayload},
};

fn all_apps(channel: &StateChannel) -> impl Iterator<Item = &AppInstance> {
    std::iter::once(&channel.free_balance)
        .chain(channel.app_instances.values())
        .chain(channel.proposed_app_instances.values())
}

fn find_app<'a>(channel: &'a StateChannel, hash: &Hash) -> Option<&'a AppInstance> {
    channel
        .any_app(hash)
        .or_else(|| channel.proposed_app_instances.get(hash))
}

fn signed_state(hash: &Hash, commitment: &Commitment) -> Option<SignedState> {
    let [Some(first), Some(second)] = *commitment.signatures() else {
        return None;
    };
    Some(SignedState {
        app_identity_hash: *hash,
        version_number: commitment.version_number()?,
        signatures: [first, second],
    })
}

/// One side's copy of the channel, with the fully signed set-state
/// commitment of each app's latest version it can show.
pub(crate) struct Replica {
    channel: StateChannel,
    signed: BTreeMap<Hash, Commitment>,
    /// Our own replica is trusted even where it lacks a commitment.
    local: bool,
}

impl Replica {
    fn local(ctx: &Context<'_>, channel: StateChannel) -> Result<Self, ProtocolError> {
        let mut signed = BTreeMap::new();
        for app in all_apps(&channel) {
            let latest = ctx
                .store
                .get_set_state_commitments(&app.identity_hash)?
                .into_iter()
                .find(|c| {
                    c.version_number() == Some(app.latest_version_number)
                        && c.assert_signatures(Verification::Full).is_ok()
                });
            if let Some(commitment) = latest {
                signed.insert(app.identity_hash, commitment);
            }
        }
        Ok(Self {
            channel,
            signed,
            local: true,
        })
    }

    fn remote(ctx: &Context<'_>, payload: &SyncPayload) -> Self {
        let channel = payload.channel.clone();
        let mut signed = BTreeMap::new();
        for state in &payload.signed_states {
            let Some(app) = find_app(&channel, &state.app_identity_hash) else {
                continue;
            };
            if app.latest_version_number != state.version_number {
                continue;
            }
            let mut commitment = Commitment::set_state(ctx.network, app);
            let [first, second] = state.signatures;
            match commitment.add_signatures(Some(first), Some(second)) {
                Ok(()) => {
                    signed.insert(app.identity_hash, commitment);
                }
                Err(err) => tracing::warn!(
                    app = %app.identity_hash,
                    version = app.latest_version_number,
                    %err,
                    "ignoring app state with invalid signatures"
                ),
            }
        }
        Self {
            channel,
            signed,
            local: false,
        }
    }

    fn usable(&self, app: &AppInstance) -> bool {
        self.local
            || self
                .signed
                .get(&app.identity_hash)
                .is_some_and(|c| c.version_number() == Some(app.latest_version_number))
    }

    fn free_balance_version(&self) -> u64 {
        self.channel.free_balance.latest_version_number
    }
}

fn installed(channel: &StateChannel) -> &BTreeMap<Hash, AppInstance> {
    &channel.app_instances
}

fn proposed(channel: &StateChannel) -> &BTreeMap<Hash, AppInstance> {
    &channel.proposed_app_instances
}

fn same_channel(local: &StateChannel, remote: &StateChannel) -> Result<(), ProtocolError> {
    if local.multisig_address != remote.multisig_address || local.owners != remote.owners {
        return Err(ProtocolError::SyncMismatch(format!(
            "replica of {} is not the channel {}",
            remote.multisig_address, local.multisig_address
        )));
    }
    Ok(())
}

/// The newer usable copy of an app, preferring `lead` on equal versions.
fn pick<'a>(
    hash: &Hash,
    lead: &'a Replica,
    other: &'a Replica,
    set: fn(&StateChannel) -> &BTreeMap<Hash, AppInstance>,
) -> Option<&'a AppInstance> {
    let candidate = |r: &'a Replica| set(&r.channel).get(hash).filter(|app| r.usable(app));
    match (candidate(lead), candidate(other)) {
        (Some(a), Some(b)) if b.latest_version_number > a.latest_version_number => Some(b),
        (Some(a), _) => Some(a),
        (None, b) => b,
    }
}

fn merge(local: &Replica, remote: &Replica) -> StateChannel {
    let remote_leads = remote.usable(&remote.channel.free_balance)
        && remote.free_balance_version() > local.free_balance_version();
    let (lead, other) = if remote_leads {
        (remote, local)
    } else {
        (local, remote)
    };

    let mut merged = lead.channel.clone();
    merged.app_instances = lead
        .channel
        .app_instances
        .keys()
        .filter_map(|hash| pick(hash, lead, other, installed))
        .map(|app| (app.identity_hash, app.clone()))
        .collect();

    // Proposals the lead has not handed out a sequence number for yet are new
    // to it, older ones it has either installed or dropped.
    let new_to_lead = other
        .channel
        .proposed_app_instances
        .values()
        .filter(|p| p.app_seq_no > lead.channel.num_proposed_apps)
        .map(|p| &p.identity_hash);
    merged.proposed_app_instances = lead
        .channel
        .proposed_app_instances
        .keys()
        .chain(new_to_lead)
        .filter(|hash| !merged.app_instances.contains_key(hash))
        .filter_map(|hash| pick(hash, lead, other, proposed))
        .map(|app| (app.identity_hash, app.clone()))
        .collect();

    merged.num_proposed_apps = local
        .channel
        .num_proposed_apps
        .max(remote.channel.num_proposed_apps);
    merged
}

/// Instructions storing the commitments of `merged` that only `incoming`
/// has, and the signed commitment of every app of `merged` afterwards.
fn adopt(
    ctx: &Context<'_>,
    local: &Replica,
    incoming: &Replica,
    merged: &StateChannel,
) -> Result<(Vec<Instruction>, BTreeMap<Hash, Commitment>), ProtocolError> {
    let mut instructions = Vec::new();
    let mut signed = BTreeMap::new();
    for app in all_apps(merged) {
        let hash = app.identity_hash;
        let version = Some(app.latest_version_number);
        if let Some(c) = local.signed.get(&hash).filter(|c| c.version_number() == version) {
            signed.insert(hash, c.clone());
            continue;
        }
        let Some(c) = incoming.signed.get(&hash).filter(|c| c.version_number() == version) else {
            continue;
        };
        instructions.push(persist_commitment(PersistCommitmentType::UpdateSetState, c, hash));
        for stale in ctx.store.get_set_state_commitments(&hash)? {
            if stale.version_number() < version {
                instructions.push(persist_commitment(
                    PersistCommitmentType::RemoveSetState,
                    &stale,
                    hash,
                ));
            }
        }
        signed.insert(hash, c.clone());
    }
    Ok((instructions, signed))
}

/// The reply may only move the channel forward, and every app it changes must
/// be signed by both owners.
fn check_reply(local: &Replica, reply: &Replica) -> Result<(), ProtocolError> {
    for app in all_apps(&reply.channel) {
        let known = find_app(&local.channel, &app.identity_hash) == Some(app);
        if !known && !reply.usable(app) {
            return Err(ProtocolError::SyncMismatch(format!(
                "app {} at version {} is not signed by both owners",
                app.identity_hash, app.latest_version_number
            )));
        }
    }

    let (ours, theirs) = (local.free_balance_version(), reply.free_balance_version());
    if theirs < ours {
        return Err(ProtocolError::SyncMismatch(format!(
            "free balance at version {theirs}, ours is at {ours}"
        )));
    }
    for app in local.channel.app_instances.values() {
        match reply.channel.app_instances.get(&app.identity_hash) {
            Some(r) if r.latest_version_number < app.latest_version_number => {
                return Err(ProtocolError::SyncMismatch(format!(
                    "app {} at version {}, ours is at {}",
                    app.identity_hash, r.latest_version_number, app.latest_version_number
                )));
            }
            None if theirs == ours => {
                return Err(ProtocolError::SyncMismatch(format!(
                    "app {} is missing",
                    app.identity_hash
                )));
            }
            _ => {}
        }
    }
    Ok(())
}

fn payload(message: &ProtocolMessage) -> Result<&SyncPayload, ProtocolError> {
    match &message.custom_data {
        CustomData::Sync(payload) => Ok(payload),
        _ => Err(ProtocolError::UnexpectedMessage(
            "sync message without a channel".to_string(),
        )),
    }
}

fn sync_payload(channel: &StateChannel, signed: &BTreeMap<Hash, Commitment>) -> CustomData {
    CustomData::Sync(SyncPayload {
        channel: channel.clone(),
        signed_states: signed
            .iter()
            .filter_map(|(hash, c)| signed_state(hash, c))
            .collect(),
    })
}

pub(crate) enum Initiator {
    Start(ProtocolMessage),
    Waiting(Replica),
    Persisted(StateChannel),
    Poisoned,
}

impl Initiator {
    pub(crate) fn new(message: ProtocolMessage) -> Self {
        Self::Start(message)
    }
}

impl Stages for Initiator {
    const PROTOCOL: ProtocolName = ProtocolName::Sync;

    fn advance(&mut self, ctx: &Context<'_>, input: Resume) -> Result<Advance, ProtocolError> {
        match (mem::replace(self, Self::Poisoned), input) {
            (Self::Start(message), Resume::Start) => {
                params_of!(message, Sync)?;
                counterpart(ctx, &message.params)?;
                let local = Replica::local(ctx, load_channel(ctx, &message)?)?;
                let send = Instruction::SendAndWait(
                    message.with_custom_data(sync_payload(&local.channel, &local.signed)),
                );
                *self = Self::Waiting(local);
                Ok(Advance::Emit(vec![send]))
            }
            (Self::Waiting(local), Resume::Reply(reply)) => {
                let reply = Replica::remote(ctx, payload(&reply)?);
                same_channel(&local.channel, &reply.channel)?;
                check_reply(&local, &reply)?;

                let channel = reply.channel.clone();
                let (adopted, _) = adopt(ctx, &local, &reply, &channel)?;
                let mut instructions = vec![persist_app(
                    PersistAppType::SyncChannel,
                    &channel,
                    &channel.free_balance,
                )];
                instructions.extend(adopted);
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
    Persisted(StateChannel),
    Poisoned,
}

impl Responder {
    pub(crate) fn new(message: ProtocolMessage) -> Self {
        Self::Start(message)
    }
}

impl Stages for Responder {
    const PROTOCOL: ProtocolName = ProtocolName::Sync;

    fn advance(&mut self, ctx: &Context<'_>, input: Resume) -> Result<Advance, ProtocolError> {
        match (mem::replace(self, Self::Poisoned), input) {
            (Self::Start(message), Resume::Start) => {
                params_of!(message, Sync)?;
                counterpart(ctx, &message.params)?;
                let local = Replica::local(ctx, load_channel(ctx, &message)?)?;
                let remote = Replica::remote(ctx, payload(&message)?);
                same_channel(&local.channel, &remote.channel)?;

                let merged = merge(&local, &remote);
                let (adopted, signed) = adopt(ctx, &local, &remote, &merged)?;
                let mut instructions = vec![persist_app(
                    PersistAppType::SyncChannel,
                    &merged,
                    &merged.free_balance,
                )];
                instructions.extend(adopted);
                instructions.push(Instruction::Send(message.reply(sync_payload(&merged, &signed))));
                *self = Self::Persisted(merged);
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
