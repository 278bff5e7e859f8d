//! Protobuf representation of [crate::messages::ProtocolMessage].
//!
//! Fixed size values (addresses, hashes, uint256) are big endian byte
//! strings, identifiers are compressed public keys.

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtocolMessage {
    #[prost(bytes = "vec", tag = "1")]
    pub process_id: Vec<u8>,
    #[prost(uint32, tag = "2")]
    pub protocol: u32,
    #[prost(uint32, tag = "3")]
    pub seq: u32,
    #[prost(bytes = "vec", tag = "4")]
    pub from: Vec<u8>,
    #[prost(bytes = "vec", tag = "5")]
    pub to: Vec<u8>,
    #[prost(oneof = "protocol_message::Params", tags = "6, 7, 8, 9, 10, 11")]
    pub params: Option<protocol_message::Params>,
    #[prost(oneof = "protocol_message::CustomData", tags = "12, 13")]
    pub custom_data: Option<protocol_message::CustomData>,
}

pub mod protocol_message {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Params {
        #[prost(message, tag = "6")]
        Setup(super::SetupParams),
        #[prost(message, tag = "7")]
        Propose(super::ProposeParams),
        #[prost(message, tag = "8")]
        Install(super::InstallParams),
        #[prost(message, tag = "9")]
        Uninstall(super::UninstallParams),
        #[prost(message, tag = "10")]
        TakeAction(super::TakeActionParams),
        #[prost(message, tag = "11")]
        Sync(super::SyncParams),
    }

    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum CustomData {
        #[prost(message, tag = "12")]
        Signatures(super::Signatures),
        #[prost(message, tag = "13")]
        Sync(super::SyncPayload),
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SetupParams {
    #[prost(bytes = "vec", tag = "1")]
    pub multisig_address: Vec<u8>,
    #[prost(bytes = "vec", tag = "2")]
    pub initiator_identifier: Vec<u8>,
    #[prost(bytes = "vec", tag = "3")]
    pub responder_identifier: Vec<u8>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProposeParams {
    #[prost(bytes = "vec", tag = "1")]
    pub multisig_address: Vec<u8>,
    #[prost(bytes = "vec", tag = "2")]
    pub initiator_identifier: Vec<u8>,
    #[prost(bytes = "vec", tag = "3")]
    pub responder_identifier: Vec<u8>,
    #[prost(message, optional, tag = "4")]
    pub app: Option<AppParams>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AppParams {
    #[prost(bytes = "vec", tag = "1")]
    pub app_definition: Vec<u8>,
    #[prost(bytes = "vec", tag = "2")]
    pub initial_state: Vec<u8>,
    #[prost(bytes = "vec", tag = "3")]
    pub initiator_identifier: Vec<u8>,
    #[prost(bytes = "vec", tag = "4")]
    pub responder_identifier: Vec<u8>,
    #[prost(bytes = "vec", tag = "5")]
    pub initiator_deposit: Vec<u8>,
    #[prost(bytes = "vec", tag = "6")]
    pub initiator_deposit_asset_id: Vec<u8>,
    #[prost(bytes = "vec", tag = "7")]
    pub responder_deposit: Vec<u8>,
    #[prost(bytes = "vec", tag = "8")]
    pub responder_deposit_asset_id: Vec<u8>,
    #[prost(uint64, tag = "9")]
    pub default_timeout: u64,
    #[prost(uint64, tag = "10")]
    pub state_timeout: u64,
    #[prost(bytes = "vec", tag = "11")]
    pub interpreter_limit: Vec<u8>,
    #[prost(bytes = "vec", tag = "12")]
    pub interpreter_token: Vec<u8>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct InstallParams {
    #[prost(bytes = "vec", tag = "1")]
    pub multisig_address: Vec<u8>,
    #[prost(bytes = "vec", tag = "2")]
    pub initiator_identifier: Vec<u8>,
    #[prost(bytes = "vec", tag = "3")]
    pub responder_identifier: Vec<u8>,
    #[prost(bytes = "vec", tag = "4")]
    pub proposal_identity_hash: Vec<u8>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct UninstallParams {
    #[prost(bytes = "vec", tag = "1")]
    pub multisig_address: Vec<u8>,
    #[prost(bytes = "vec", tag = "2")]
    pub initiator_identifier: Vec<u8>,
    #[prost(bytes = "vec", tag = "3")]
    pub responder_identifier: Vec<u8>,
    #[prost(bytes = "vec", tag = "4")]
    pub app_identity_hash: Vec<u8>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TakeActionParams {
    #[prost(bytes = "vec", tag = "1")]
    pub multisig_address: Vec<u8>,
    #[prost(bytes = "vec", tag = "2")]
    pub initiator_identifier: Vec<u8>,
    #[prost(bytes = "vec", tag = "3")]
    pub responder_identifier: Vec<u8>,
    #[prost(bytes = "vec", tag = "4")]
    pub app_identity_hash: Vec<u8>,
    #[prost(bytes = "vec", tag = "5")]
    pub action: Vec<u8>,
    #[prost(uint64, tag = "6")]
    pub state_timeout: u64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SyncParams {
    #[prost(bytes = "vec", tag = "1")]
    pub multisig_address: Vec<u8>,
    #[prost(bytes = "vec", tag = "2")]
    pub initiator_identifier: Vec<u8>,
    #[prost(bytes = "vec", tag = "3")]
    pub responder_identifier: Vec<u8>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Signatures {
    #[prost(bytes = "vec", repeated, tag = "1")]
    pub signatures: Vec<Vec<u8>>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SyncPayload {
    #[prost(message, optional, tag = "1")]
    pub channel: Option<StateChannel>,
    #[prost(message, repeated, tag = "2")]
    pub signed_states: Vec<SignedState>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SignedState {
    #[prost(bytes = "vec", tag = "1")]
    pub app_identity_hash: Vec<u8>,
    #[prost(uint64, tag = "2")]
    pub version_number: u64,
    #[prost(bytes = "vec", repeated, tag = "3")]
    pub signatures: Vec<Vec<u8>>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct StateChannel {
    #[prost(bytes = "vec", tag = "1")]
    pub multisig_address: Vec<u8>,
    #[prost(bytes = "vec", repeated, tag = "2")]
    pub owners: Vec<Vec<u8>>,
    #[prost(bytes = "vec", tag = "3")]
    pub initiator_identifier: Vec<u8>,
    #[prost(bytes = "vec", tag = "4")]
    pub responder_identifier: Vec<u8>,
    #[prost(message, repeated, tag = "5")]
    pub app_instances: Vec<AppInstance>,
    #[prost(message, repeated, tag = "6")]
    pub proposed_app_instances: Vec<AppInstance>,
    #[prost(message, optional, tag = "7")]
    pub free_balance: Option<AppInstance>,
    #[prost(uint64, tag = "8")]
    pub num_proposed_apps: u64,
    #[prost(uint32, tag = "9")]
    pub schema_version: u32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AppInstance {
    #[prost(bytes = "vec", tag = "1")]
    pub identity_hash: Vec<u8>,
    #[prost(bytes = "vec", tag = "2")]
    pub multisig_address: Vec<u8>,
    #[prost(bytes = "vec", tag = "3")]
    pub initiator_identifier: Vec<u8>,
    #[prost(bytes = "vec", tag = "4")]
    pub responder_identifier: Vec<u8>,
    #[prost(bytes = "vec", tag = "5")]
    pub app_definition: Vec<u8>,
    #[prost(uint64, tag = "6")]
    pub app_seq_no: u64,
    #[prost(uint64, tag = "7")]
    pub default_timeout: u64,
    #[prost(uint64, tag = "8")]
    pub state_timeout: u64,
    #[prost(bytes = "vec", tag = "9")]
    pub latest_state: Vec<u8>,
    #[prost(uint64, tag = "10")]
    pub latest_version_number: u64,
    #[prost(bytes = "vec", optional, tag = "11")]
    pub latest_action: Option<Vec<u8>>,
    #[prost(bytes = "vec", tag = "12")]
    pub initiator_deposit: Vec<u8>,
    #[prost(bytes = "vec", tag = "13")]
    pub initiator_deposit_asset_id: Vec<u8>,
    #[prost(bytes = "vec", tag = "14")]
    pub responder_deposit: Vec<u8>,
    #[prost(bytes = "vec", tag = "15")]
    pub responder_deposit_asset_id: Vec<u8>,
    #[prost(bytes = "vec", tag = "16")]
    pub interpreter_limit: Vec<u8>,
    #[prost(bytes = "vec", tag = "17")]
    pub interpreter_token: Vec<u8>,
}
