//! Recovery-related peer-peer messaging types.

use crate::server::{Classify, Epoch, View};
use crate::utils::WintersetError;

use get_size::GetSize;

use rmp_serde::decode::from_slice as decode_from_slice;
use rmp_serde::encode::to_vec as encode_to_vec;

use serde::{Deserialize, Serialize};

/// Reply to a `Recovery` probe.
#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize, GetSize)]
pub struct RecoveryAnswer {
    /// Sender's current view.
    pub view: View,

    /// Sender's epoch vector, one slot per replica.
    pub epoch_vec: Vec<Epoch>,

    /// Sender's first not-yet-decided instance id; the recovering replica
    /// must catch up to here before it may vote again.
    pub next_id: u64,
}

/// Peer-peer message type.
#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize, GetSize)]
pub enum PeerMsg {
    /// Probe broadcast by a recovering replica, tagged with its freshly
    /// bumped epoch.
    Recovery { view: View, epoch: Epoch },

    /// Answer to a `Recovery` probe.
    RecoveryAnswer(RecoveryAnswer),

    /// Leader activity heartbeat.
    Alive { view: View, next_id: u64 },
}

/// Routing classes of `PeerMsg`.
#[derive(Debug, PartialEq, Eq, Copy, Clone, Hash)]
pub enum MsgClass {
    Recovery,
    RecoveryAnswer,
    Alive,
}

impl Classify for PeerMsg {
    type Class = MsgClass;

    fn class(&self) -> MsgClass {
        match self {
            PeerMsg::Recovery { .. } => MsgClass::Recovery,
            PeerMsg::RecoveryAnswer(_) => MsgClass::RecoveryAnswer,
            PeerMsg::Alive { .. } => MsgClass::Alive,
        }
    }
}

impl PeerMsg {
    /// Encodes the message for an embedding transport. Framing is the
    /// transport's business.
    pub fn to_wire(&self) -> Result<Vec<u8>, WintersetError> {
        Ok(encode_to_vec(self)?)
    }

    /// Decodes a message off an embedding transport.
    pub fn from_wire(bytes: &[u8]) -> Result<PeerMsg, WintersetError> {
        Ok(decode_from_slice(bytes)?)
    }
}
