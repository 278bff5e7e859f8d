//! Messages exchanged by the two parties of a protocol run.

use crate::{
    abiencode::types::{Address, Hash, Signature},
    channel::{AppParams, StateChannel},
    protocol::{ProcessId, ProtocolName},
    sig::Identifier,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolMessage {
    pub process_id: ProcessId,
    pub protocol: ProtocolName,
    /// 0 for the message starting a run, 1 for the reply.
    pub seq: u32,
    pub params: ProtocolParams,
    pub custom_data: CustomData,
    pub from: Identifier,
    pub to: Identifier,
}

impl ProtocolMessage {
    /// The reply to this message, addressed back to its sender.
    pub fn reply(&self, custom_data: CustomData) -> Self {
        Self {
            process_id: self.process_id,
            protocol: self.protocol,
            seq: self.seq + 1,
            params: self.params.clone(),
            custom_data,
            from: self.to,
            to: self.from,
        }
    }

    pub fn with_custom_data(&self, custom_data: CustomData) -> Self {
        Self {
            custom_data,
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetupParams {
    pub multisig_address: Address,
    pub initiator_identifier: Identifier,
    pub responder_identifier: Identifier,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProposeParams {
    pub multisig_address: Address,
    pub initiator_identifier: Identifier,
    pub responder_identifier: Identifier,
    /// The app being proposed. Its sequence number is assigned by the
    /// channel.
    pub app: AppParams,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallParams {
    pub multisig_address: Address,
    pub initiator_identifier: Identifier,
    pub responder_identifier: Identifier,
    pub proposal_identity_hash: Hash,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UninstallParams {
    pub multisig_address: Address,
    pub initiator_identifier: Identifier,
    pub responder_identifier: Identifier,
    pub app_identity_hash: Hash,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TakeActionParams {
    pub multisig_address: Address,
    pub initiator_identifier: Identifier,
    pub responder_identifier: Identifier,
    pub app_identity_hash: Hash,
    /// App specific encoded action.
    pub action: Vec<u8>,
    pub state_timeout: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncParams {
    pub multisig_address: Address,
    pub initiator_identifier: Identifier,
    pub responder_identifier: Identifier,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolParams {
    Setup(SetupParams),
    Propose(ProposeParams),
    Install(InstallParams),
    Uninstall(UninstallParams),
    TakeAction(TakeActionParams),
    Sync(SyncParams),
}

macro_rules! common_field {
    ($self:ident, $field:ident) => {
        match $self {
            ProtocolParams::Setup(p) => p.$field,
            ProtocolParams::Propose(p) => p.$field,
            ProtocolParams::Install(p) => p.$field,
            ProtocolParams::Uninstall(p) => p.$field,
            ProtocolParams::TakeAction(p) => p.$field,
            ProtocolParams::Sync(p) => p.$field,
        }
    };
}

impl ProtocolParams {
    pub fn protocol(&self) -> ProtocolName {
        match self {
            ProtocolParams::Setup(_) => ProtocolName::Setup,
            ProtocolParams::Propose(_) => ProtocolName::Propose,
            ProtocolParams::Install(_) => ProtocolName::Install,
            ProtocolParams::Uninstall(_) => ProtocolName::Uninstall,
            ProtocolParams::TakeAction(_) => ProtocolName::TakeAction,
            ProtocolParams::Sync(_) => ProtocolName::Sync,
        }
    }

    pub fn multisig_address(&self) -> Address {
        common_field!(self, multisig_address)
    }

    pub fn initiator_identifier(&self) -> Identifier {
        common_field!(self, initiator_identifier)
    }

    pub fn responder_identifier(&self) -> Identifier {
        common_field!(self, responder_identifier)
    }
}

/// Both signatures on the latest set-state commitment of one app.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedState {
    pub app_identity_hash: Hash,
    pub version_number: u64,
    pub signatures: [Signature; 2],
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncPayload {
    pub channel: StateChannel,
    pub signed_states: Vec<SignedState>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum CustomData {
    #[default]
    None,
    /// Signatures in the order the protocol signs its commitments.
    Signatures(Vec<Signature>),
    Sync(SyncPayload),
}
