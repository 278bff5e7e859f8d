use std::collections::BTreeMap;

use prost::{bytes::BufMut, Message};

use super::{proto, BytesBus, DecodeError, Transport, TransportError};
use crate::{
    abiencode::types::{Address, Hash, Signature, U256},
    channel::{AppInstance, AppParams, OutcomeInterpreterParams, StateChannel},
    messages::{
        CustomData, InstallParams, ProposeParams, ProtocolMessage, ProtocolParams, SetupParams,
        SignedState, SyncParams, SyncPayload, TakeActionParams, UninstallParams,
    },
    protocol::{ProcessId, ProtocolName},
    sig::Identifier,
};

const LENGTH_PREFIX: usize = 4;

#[derive(Debug)]
pub struct ProtoBufEncodingLayer<B: BytesBus> {
    pub bus: B,
}

impl<B: BytesBus> ProtoBufEncodingLayer<B> {
    pub fn new(bus: B) -> Self {
        Self { bus }
    }
}

impl<B: BytesBus> Transport for ProtoBufEncodingLayer<B> {
    fn send(&self, msg: ProtocolMessage) -> Result<(), TransportError> {
        let frame = encode_message(&msg)?;
        tracing::debug!(
            protocol = %msg.protocol,
            process_id = %msg.process_id,
            seq = msg.seq,
            len = frame.len(),
            "sending frame"
        );
        self.bus.send_to(&msg.to, &frame)
    }
}

/// Encode `msg` as a protobuf frame with a 4 byte big endian length prefix.
pub fn encode_message(msg: &ProtocolMessage) -> Result<Vec<u8>, TransportError> {
    let wiremsg = proto::ProtocolMessage::from(msg);
    let len = wiremsg.encoded_len();
    let prefix = u32::try_from(len).map_err(|_| TransportError::TooLarge(len))?;

    let mut buf = Vec::with_capacity(LENGTH_PREFIX + len);
    buf.put_slice(&prefix.to_be_bytes());
    wiremsg.encode(&mut buf)?;
    Ok(buf)
}

/// Decode one frame as produced by [encode_message].
pub fn decode_message(frame: &[u8]) -> Result<ProtocolMessage, DecodeError> {
    if frame.len() < LENGTH_PREFIX {
        return Err(DecodeError::FrameLength {
            announced: LENGTH_PREFIX,
            got: frame.len(),
        });
    }
    let (prefix, body) = frame.split_at(LENGTH_PREFIX);
    let mut len = [0u8; LENGTH_PREFIX];
    len.copy_from_slice(prefix);
    let announced = u32::from_be_bytes(len) as usize;
    if announced != body.len() {
        return Err(DecodeError::FrameLength {
            announced,
            got: body.len(),
        });
    }
    proto::ProtocolMessage::decode(body)?.try_into()
}

fn protocol_id(protocol: ProtocolName) -> u32 {
    match protocol {
        ProtocolName::Setup => 0,
        ProtocolName::Propose => 1,
        ProtocolName::Install => 2,
        ProtocolName::Uninstall => 3,
        ProtocolName::TakeAction => 4,
        ProtocolName::Sync => 5,
    }
}

fn protocol_from_id(id: u32) -> Result<ProtocolName, DecodeError> {
    Ok(match id {
        0 => ProtocolName::Setup,
        1 => ProtocolName::Propose,
        2 => ProtocolName::Install,
        3 => ProtocolName::Uninstall,
        4 => ProtocolName::TakeAction,
        5 => ProtocolName::Sync,
        id => return Err(DecodeError::UnknownProtocol(id)),
    })
}

fn address(bytes: &[u8], field: &'static str) -> Result<Address, DecodeError> {
    Address::try_from(bytes).map_err(|_| DecodeError::InvalidField(field))
}

fn hash(bytes: &[u8], field: &'static str) -> Result<Hash, DecodeError> {
    Hash::try_from(bytes).map_err(|_| DecodeError::InvalidField(field))
}

fn signature(bytes: &[u8]) -> Result<Signature, DecodeError> {
    Signature::try_from(bytes).map_err(|_| DecodeError::InvalidField("signature"))
}

fn identifier(bytes: &[u8], field: &'static str) -> Result<Identifier, DecodeError> {
    Identifier::from_bytes(bytes).map_err(|_| DecodeError::InvalidField(field))
}

fn u256(bytes: &[u8], field: &'static str) -> Result<U256, DecodeError> {
    if bytes.len() != 32 {
        return Err(DecodeError::InvalidField(field));
    }
    Ok(U256::from_big_endian(bytes))
}

fn u256_bytes(value: U256) -> Vec<u8> {
    value.to_be_bytes().to_vec()
}

impl From<&ProtocolMessage> for proto::ProtocolMessage {
    fn from(msg: &ProtocolMessage) -> Self {
        use proto::protocol_message::{CustomData as WireData, Params as WireParams};

        let params = match &msg.params {
            ProtocolParams::Setup(p) => WireParams::Setup(proto::SetupParams {
                multisig_address: p.multisig_address.0.to_vec(),
                initiator_identifier: p.initiator_identifier.as_bytes().to_vec(),
                responder_identifier: p.responder_identifier.as_bytes().to_vec(),
            }),
            ProtocolParams::Propose(p) => WireParams::Propose(proto::ProposeParams {
                multisig_address: p.multisig_address.0.to_vec(),
                initiator_identifier: p.initiator_identifier.as_bytes().to_vec(),
                responder_identifier: p.responder_identifier.as_bytes().to_vec(),
                app: Some((&p.app).into()),
            }),
            ProtocolParams::Install(p) => WireParams::Install(proto::InstallParams {
                multisig_address: p.multisig_address.0.to_vec(),
                initiator_identifier: p.initiator_identifier.as_bytes().to_vec(),
                responder_identifier: p.responder_identifier.as_bytes().to_vec(),
                proposal_identity_hash: p.proposal_identity_hash.0.to_vec(),
            }),
            ProtocolParams::Uninstall(p) => WireParams::Uninstall(proto::UninstallParams {
                multisig_address: p.multisig_address.0.to_vec(),
                initiator_identifier: p.initiator_identifier.as_bytes().to_vec(),
                responder_identifier: p.responder_identifier.as_bytes().to_vec(),
                app_identity_hash: p.app_identity_hash.0.to_vec(),
            }),
            ProtocolParams::TakeAction(p) => WireParams::TakeAction(proto::TakeActionParams {
                multisig_address: p.multisig_address.0.to_vec(),
                initiator_identifier: p.initiator_identifier.as_bytes().to_vec(),
                responder_identifier: p.responder_identifier.as_bytes().to_vec(),
                app_identity_hash: p.app_identity_hash.0.to_vec(),
                action: p.action.clone(),
                state_timeout: p.state_timeout,
            }),
            ProtocolParams::Sync(p) => WireParams::Sync(proto::SyncParams {
                multisig_address: p.multisig_address.0.to_vec(),
                initiator_identifier: p.initiator_identifier.as_bytes().to_vec(),
                responder_identifier: p.responder_identifier.as_bytes().to_vec(),
            }),
        };

        let custom_data = match &msg.custom_data {
            CustomData::None => None,
            CustomData::Signatures(sigs) => Some(WireData::Signatures(proto::Signatures {
                signatures: sigs.iter().map(|s| s.0.to_vec()).collect(),
            })),
            CustomData::Sync(payload) => Some(WireData::Sync(proto::SyncPayload {
                channel: Some((&payload.channel).into()),
                signed_states: payload
                    .signed_states
                    .iter()
                    .map(|s| proto::SignedState {
                        app_identity_hash: s.app_identity_hash.0.to_vec(),
                        version_number: s.version_number,
                        signatures: s.signatures.iter().map(|s| s.0.to_vec()).collect(),
                    })
                    .collect(),
            })),
        };

        Self {
            process_id: msg.process_id.0.to_vec(),
            protocol: protocol_id(msg.protocol),
            seq: msg.seq,
            from: msg.from.as_bytes().to_vec(),
            to: msg.to.as_bytes().to_vec(),
            params: Some(params),
            custom_data,
        }
    }
}

impl TryFrom<proto::ProtocolMessage> for ProtocolMessage {
    type Error = DecodeError;

    fn try_from(value: proto::ProtocolMessage) -> Result<Self, Self::Error> {
        use proto::protocol_message::{CustomData as WireData, Params as WireParams};

        let protocol = protocol_from_id(value.protocol)?;
        let params = match value.params.ok_or(DecodeError::MissingField("params"))? {
            WireParams::Setup(p) => ProtocolParams::Setup(SetupParams {
                multisig_address: address(&p.multisig_address, "multisig_address")?,
                initiator_identifier: identifier(&p.initiator_identifier, "initiator_identifier")?,
                responder_identifier: identifier(&p.responder_identifier, "responder_identifier")?,
            }),
            WireParams::Propose(p) => ProtocolParams::Propose(ProposeParams {
                multisig_address: address(&p.multisig_address, "multisig_address")?,
                initiator_identifier: identifier(&p.initiator_identifier, "initiator_identifier")?,
                responder_identifier: identifier(&p.responder_identifier, "responder_identifier")?,
                app: p.app.ok_or(DecodeError::MissingField("app"))?.try_into()?,
            }),
            WireParams::Install(p) => ProtocolParams::Install(InstallParams {
                multisig_address: address(&p.multisig_address, "multisig_address")?,
                initiator_identifier: identifier(&p.initiator_identifier, "initiator_identifier")?,
                responder_identifier: identifier(&p.responder_identifier, "responder_identifier")?,
                proposal_identity_hash: hash(&p.proposal_identity_hash, "proposal_identity_hash")?,
            }),
            WireParams::Uninstall(p) => ProtocolParams::Uninstall(UninstallParams {
                multisig_address: address(&p.multisig_address, "multisig_address")?,
                initiator_identifier: identifier(&p.initiator_identifier, "initiator_identifier")?,
                responder_identifier: identifier(&p.responder_identifier, "responder_identifier")?,
                app_identity_hash: hash(&p.app_identity_hash, "app_identity_hash")?,
            }),
            WireParams::TakeAction(p) => ProtocolParams::TakeAction(TakeActionParams {
                multisig_address: address(&p.multisig_address, "multisig_address")?,
                initiator_identifier: identifier(&p.initiator_identifier, "initiator_identifier")?,
                responder_identifier: identifier(&p.responder_identifier, "responder_identifier")?,
                app_identity_hash: hash(&p.app_identity_hash, "app_identity_hash")?,
                action: p.action,
                state_timeout: p.state_timeout,
            }),
            WireParams::Sync(p) => ProtocolParams::Sync(SyncParams {
                multisig_address: address(&p.multisig_address, "multisig_address")?,
                initiator_identifier: identifier(&p.initiator_identifier, "initiator_identifier")?,
                responder_identifier: identifier(&p.responder_identifier, "responder_identifier")?,
            }),
        };
        if params.protocol() != protocol {
            return Err(DecodeError::ProtocolMismatch(protocol));
        }

        let custom_data = match value.custom_data {
            None => CustomData::None,
            Some(WireData::Signatures(s)) => CustomData::Signatures(
                s.signatures
                    .iter()
                    .map(|s| signature(s))
                    .collect::<Result<_, _>>()?,
            ),
            Some(WireData::Sync(s)) => CustomData::Sync(SyncPayload {
                channel: s.channel.ok_or(DecodeError::MissingField("channel"))?.try_into()?,
                signed_states: s
                    .signed_states
                    .into_iter()
                    .map(SignedState::try_from)
                    .collect::<Result<_, _>>()?,
            }),
        };

        let process_id: [u8; 16] = value
            .process_id
            .as_slice()
            .try_into()
            .map_err(|_| DecodeError::InvalidField("process_id"))?;

        Ok(Self {
            process_id: ProcessId(process_id),
            protocol,
            seq: value.seq,
            params,
            custom_data,
            from: identifier(&value.from, "from")?,
            to: identifier(&value.to, "to")?,
        })
    }
}

impl TryFrom<proto::SignedState> for SignedState {
    type Error = DecodeError;

    fn try_from(value: proto::SignedState) -> Result<Self, Self::Error> {
        let [first, second] = value.signatures.as_slice() else {
            return Err(DecodeError::InvalidField("signatures"));
        };
        Ok(Self {
            app_identity_hash: hash(&value.app_identity_hash, "app_identity_hash")?,
            version_number: value.version_number,
            signatures: [signature(first)?, signature(second)?],
        })
    }
}

impl From<&AppParams> for proto::AppParams {
    fn from(p: &AppParams) -> Self {
        Self {
            app_definition: p.app_definition.0.to_vec(),
            initial_state: p.initial_state.clone(),
            initiator_identifier: p.initiator_identifier.as_bytes().to_vec(),
            responder_identifier: p.responder_identifier.as_bytes().to_vec(),
            initiator_deposit: u256_bytes(p.initiator_deposit),
            initiator_deposit_asset_id: p.initiator_deposit_asset_id.0.to_vec(),
            responder_deposit: u256_bytes(p.responder_deposit),
            responder_deposit_asset_id: p.responder_deposit_asset_id.0.to_vec(),
            default_timeout: p.default_timeout,
            state_timeout: p.state_timeout,
            interpreter_limit: u256_bytes(p.interpreter_params.limit),
            interpreter_token: p.interpreter_params.token.0.to_vec(),
        }
    }
}

impl TryFrom<proto::AppParams> for AppParams {
    type Error = DecodeError;

    fn try_from(p: proto::AppParams) -> Result<Self, Self::Error> {
        Ok(Self {
            app_definition: address(&p.app_definition, "app_definition")?,
            initial_state: p.initial_state,
            initiator_identifier: identifier(&p.initiator_identifier, "initiator_identifier")?,
            responder_identifier: identifier(&p.responder_identifier, "responder_identifier")?,
            initiator_deposit: u256(&p.initiator_deposit, "initiator_deposit")?,
            initiator_deposit_asset_id: address(
                &p.initiator_deposit_asset_id,
                "initiator_deposit_asset_id",
            )?,
            responder_deposit: u256(&p.responder_deposit, "responder_deposit")?,
            responder_deposit_asset_id: address(
                &p.responder_deposit_asset_id,
                "responder_deposit_asset_id",
            )?,
            default_timeout: p.default_timeout,
            state_timeout: p.state_timeout,
            interpreter_params: OutcomeInterpreterParams {
                limit: u256(&p.interpreter_limit, "interpreter_limit")?,
                token: address(&p.interpreter_token, "interpreter_token")?,
            },
        })
    }
}

impl From<&AppInstance> for proto::AppInstance {
    fn from(app: &AppInstance) -> Self {
        Self {
            identity_hash: app.identity_hash.0.to_vec(),
            multisig_address: app.multisig_address.0.to_vec(),
            initiator_identifier: app.initiator_identifier.as_bytes().to_vec(),
            responder_identifier: app.responder_identifier.as_bytes().to_vec(),
            app_definition: app.app_definition.0.to_vec(),
            app_seq_no: app.app_seq_no,
            default_timeout: app.default_timeout,
            state_timeout: app.state_timeout,
            latest_state: app.latest_state.clone(),
            latest_version_number: app.latest_version_number,
            latest_action: app.latest_action.clone(),
            initiator_deposit: u256_bytes(app.initiator_deposit),
            initiator_deposit_asset_id: app.initiator_deposit_asset_id.0.to_vec(),
            responder_deposit: u256_bytes(app.responder_deposit),
            responder_deposit_asset_id: app.responder_deposit_asset_id.0.to_vec(),
            interpreter_limit: u256_bytes(app.interpreter_params.limit),
            interpreter_token: app.interpreter_params.token.0.to_vec(),
        }
    }
}

impl TryFrom<proto::AppInstance> for AppInstance {
    type Error = DecodeError;

    fn try_from(app: proto::AppInstance) -> Result<Self, Self::Error> {
        Ok(Self {
            identity_hash: hash(&app.identity_hash, "identity_hash")?,
            multisig_address: address(&app.multisig_address, "multisig_address")?,
            initiator_identifier: identifier(&app.initiator_identifier, "initiator_identifier")?,
            responder_identifier: identifier(&app.responder_identifier, "responder_identifier")?,
            app_definition: address(&app.app_definition, "app_definition")?,
            app_seq_no: app.app_seq_no,
            default_timeout: app.default_timeout,
            state_timeout: app.state_timeout,
            latest_state: app.latest_state,
            latest_version_number: app.latest_version_number,
            latest_action: app.latest_action,
            initiator_deposit: u256(&app.initiator_deposit, "initiator_deposit")?,
            initiator_deposit_asset_id: address(
                &app.initiator_deposit_asset_id,
                "initiator_deposit_asset_id",
            )?,
            responder_deposit: u256(&app.responder_deposit, "responder_deposit")?,
            responder_deposit_asset_id: address(
                &app.responder_deposit_asset_id,
                "responder_deposit_asset_id",
            )?,
            interpreter_params: OutcomeInterpreterParams {
                limit: u256(&app.interpreter_limit, "interpreter_limit")?,
                token: address(&app.interpreter_token, "interpreter_token")?,
            },
        })
    }
}

impl From<&StateChannel> for proto::StateChannel {
    fn from(channel: &StateChannel) -> Self {
        Self {
            multisig_address: channel.multisig_address.0.to_vec(),
            owners: channel
                .owners
                .iter()
                .map(|o| o.as_bytes().to_vec())
                .collect(),
            initiator_identifier: channel.initiator_identifier.as_bytes().to_vec(),
            responder_identifier: channel.responder_identifier.as_bytes().to_vec(),
            app_instances: channel.app_instances.values().map(Into::into).collect(),
            proposed_app_instances: channel
                .proposed_app_instances
                .values()
                .map(Into::into)
                .collect(),
            free_balance: Some((&channel.free_balance).into()),
            num_proposed_apps: channel.num_proposed_apps,
            schema_version: channel.schema_version,
        }
    }
}

impl TryFrom<proto::StateChannel> for StateChannel {
    type Error = DecodeError;

    fn try_from(channel: proto::StateChannel) -> Result<Self, Self::Error> {
        let [first, second] = channel.owners.as_slice() else {
            return Err(DecodeError::InvalidField("owners"));
        };
        let owners = [identifier(first, "owners")?, identifier(second, "owners")?];

        let apps = |apps: Vec<proto::AppInstance>| {
            apps.into_iter()
                .map(|app| AppInstance::try_from(app).map(|app| (app.identity_hash, app)))
                .collect::<Result<BTreeMap<Hash, AppInstance>, DecodeError>>()
        };

        Ok(Self {
            multisig_address: address(&channel.multisig_address, "multisig_address")?,
            owners,
            initiator_identifier: identifier(
                &channel.initiator_identifier,
                "initiator_identifier",
            )?,
            responder_identifier: identifier(
                &channel.responder_identifier,
                "responder_identifier",
            )?,
            app_instances: apps(channel.app_instances)?,
            proposed_app_instances: apps(channel.proposed_app_instances)?,
            free_balance: channel
                .free_balance
                .ok_or(DecodeError::MissingField("free_balance"))?
                .try_into()?,
            num_proposed_apps: channel.num_proposed_apps,
            schema_version: channel.schema_version,
        })
    }
}
