use serde::Serialize;

use super::ChannelError;
use crate::{
    abiencode::{
        self, keccak256,
        types::{Address, Hash, U256},
    },
    sig::Identifier,
};

/// Parameters of the single-asset two-party coin transfer interpreter: the
/// total the outcome may distribute and the asset it is paid in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct OutcomeInterpreterParams {
    pub limit: U256,
    pub token: Address,
}

/// Everything needed to instantiate an app in a channel, as agreed on in a
/// proposal.
///
/// "Initiator" and "responder" here are the roles of the app, fixed when it is
/// proposed. They decide the signature slots of the app's commitments for its
/// whole lifetime, independent of which party starts a protocol run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppParams {
    pub app_definition: Address,
    pub initial_state: Vec<u8>,
    pub initiator_identifier: Identifier,
    pub responder_identifier: Identifier,
    pub initiator_deposit: U256,
    pub initiator_deposit_asset_id: Address,
    pub responder_deposit: U256,
    pub responder_deposit_asset_id: Address,
    pub default_timeout: u64,
    pub state_timeout: u64,
    pub interpreter_params: OutcomeInterpreterParams,
}

#[derive(Serialize)]
struct IdentityPreimage<'a>(U256, &'a [Address], Address);

/// `keccak256(abi.encode(uint256 channelNonce, address[] participants, address appDefinition))`
pub fn app_identity_hash(
    channel_nonce: u64,
    participants: &[Address; 2],
    app_definition: Address,
) -> Result<Hash, abiencode::Error> {
    abiencode::args_to_hash(&IdentityPreimage(
        U256::from(channel_nonce),
        participants.as_slice(),
        app_definition,
    ))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppInstance {
    pub identity_hash: Hash,
    pub multisig_address: Address,
    pub initiator_identifier: Identifier,
    pub responder_identifier: Identifier,
    pub app_definition: Address,
    /// Channel nonce of the app, part of its identity.
    pub app_seq_no: u64,
    pub default_timeout: u64,
    pub state_timeout: u64,
    /// ABI encoded app state, opaque to the engine.
    pub latest_state: Vec<u8>,
    pub latest_version_number: u64,
    pub latest_action: Option<Vec<u8>>,
    pub initiator_deposit: U256,
    pub initiator_deposit_asset_id: Address,
    pub responder_deposit: U256,
    pub responder_deposit_asset_id: Address,
    pub interpreter_params: OutcomeInterpreterParams,
}

impl AppInstance {
    /// A fresh app at version 1.
    pub fn new(
        multisig_address: Address,
        app_seq_no: u64,
        params: AppParams,
    ) -> Result<Self, ChannelError> {
        let participants = [
            params.initiator_identifier.address(),
            params.responder_identifier.address(),
        ];
        let identity_hash = app_identity_hash(app_seq_no, &participants, params.app_definition)?;

        Ok(Self {
            identity_hash,
            multisig_address,
            initiator_identifier: params.initiator_identifier,
            responder_identifier: params.responder_identifier,
            app_definition: params.app_definition,
            app_seq_no,
            default_timeout: params.default_timeout,
            state_timeout: params.state_timeout,
            latest_state: params.initial_state,
            latest_version_number: 1,
            latest_action: None,
            initiator_deposit: params.initiator_deposit,
            initiator_deposit_asset_id: params.initiator_deposit_asset_id,
            responder_deposit: params.responder_deposit,
            responder_deposit_asset_id: params.responder_deposit_asset_id,
            interpreter_params: params.interpreter_params,
        })
    }

    /// Signer addresses in signature slot order: `[app initiator, app responder]`.
    pub fn participants(&self) -> [Address; 2] {
        [
            self.initiator_identifier.address(),
            self.responder_identifier.address(),
        ]
    }

    pub fn state_hash(&self) -> Hash {
        keccak256(&self.latest_state)
    }

    pub fn is_participant(&self, identifier: &Identifier) -> bool {
        *identifier == self.initiator_identifier || *identifier == self.responder_identifier
    }

    /// The next version of this app. Clears the latest action, which belonged
    /// to the previous state.
    pub fn set_state(&self, new_state: Vec<u8>, state_timeout: u64) -> Self {
        Self {
            latest_state: new_state,
            latest_version_number: self.latest_version_number + 1,
            latest_action: None,
            state_timeout,
            ..self.clone()
        }
    }

    pub fn set_action(&self, action: Vec<u8>) -> Self {
        Self {
            latest_action: Some(action),
            ..self.clone()
        }
    }
}
