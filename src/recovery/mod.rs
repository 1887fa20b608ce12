//! Replica crash recovery: the EpochSS procedure and its collaborators.
//!
//! EpochSS keeps no Paxos log on stable storage; the one durable item is a
//! per-boot incarnation counter (the epoch). Recovery procedures come as a
//! family behind one seam (crash-stop, view-based, epoch-based); this crate
//! implements the epoch-based one.

mod catchup;
mod coordinator;
mod gatherer;
mod messages;
mod retransmit;

use crate::server::VolatileStorage;
use crate::utils::WintersetError;

use async_trait::async_trait;

use tokio::sync::watch;

pub use catchup::{CatchUpCommand, CatchUpEvent};
pub use coordinator::{RecoveryConfig, RecoveryCoordinator, RecoveryState};
pub use messages::{MsgClass, PeerMsg, RecoveryAnswer};

/// Recovery procedure trait implemented by concrete recovery algorithms.
#[async_trait]
pub trait RecoveryAlgorithm {
    /// Drives recovery until this replica may rejoin the protocol.
    async fn recover(&mut self) -> Result<(), WintersetError>;

    /// Volatile Paxos state constructed during bootstrap.
    fn storage(&self) -> &VolatileStorage;

    /// Receiver of the one-shot recovery finished signal.
    fn finished(&self) -> watch::Receiver<bool>;
}
