//! Public interface to the Winterset recovery core library.
//!
//! Winterset implements the epoch-based stable-storage (EpochSS) crash
//! recovery procedure of an S-Paxos-style replicated state machine: the
//! piece that brings a restarted replica back into the ensemble without
//! letting anything its previous incarnation promised break agreement. The
//! Paxos engine itself, the catch-up subsystem, and the network transport
//! are the embedder's, connected through the channel interfaces exposed
//! here.

#![allow(clippy::uninlined_format_args)]

#[macro_use]
mod utils;

mod recovery;
mod server;

pub use recovery::{
    CatchUpCommand, CatchUpEvent, MsgClass, PeerMsg, RecoveryAlgorithm,
    RecoveryAnswer, RecoveryConfig, RecoveryCoordinator, RecoveryState,
};
pub use server::{
    view_leader, Classify, Epoch, EpochFile, FailureDetector,
    FailureDetectorEvent, ReplicaId, Router, Subscription, View,
    VolatileStorage,
};
pub use utils::{Bitmap, Timer, WintersetError};
