//! In-memory volatile Paxos state, reconstructed fresh at every boot.
//!
//! This recovery variant deliberately persists no Paxos log; everything here
//! is volatile and gets rebuilt from peers. The only stable item is the
//! epoch number, bumped through `EpochFile` during bootstrap before any
//! protocol message leaves this replica.

use crate::server::{EpochFile, ReplicaId};
use crate::utils::WintersetError;

/// View number type. Views only ever grow.
pub type View = u64;

/// Replica incarnation epoch number type.
pub type Epoch = u64;

/// Returns the leader replica of the given view.
#[inline]
pub fn view_leader(view: View, population: u8) -> ReplicaId {
    (view % population as u64) as ReplicaId
}

/// Volatile Paxos state shared between the recovery procedure and the Paxos
/// engine proper. All mutations go through the monotonic setters below.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolatileStorage {
    /// My replica ID.
    me: ReplicaId,

    /// Total number of replicas in cluster.
    population: u8,

    /// Current view number.
    view: View,

    /// Most recently observed epoch of each replica. My own slot always
    /// equals my local epoch.
    epoch_vec: Vec<Epoch>,

    /// Index of the first not-yet-decided instance.
    first_uncommitted: u64,
}

impl VolatileStorage {
    /// Creates fresh storage with view 0, an all-zero epoch vector, and an
    /// empty log.
    pub(crate) fn new(me: ReplicaId, population: u8) -> Self {
        debug_assert!(me < population);
        VolatileStorage {
            me,
            population,
            view: 0,
            epoch_vec: vec![0; population as usize],
            first_uncommitted: 0,
        }
    }

    /// Current view number.
    #[inline]
    pub fn view(&self) -> View {
        self.view
    }

    /// Leader replica of the current view.
    #[inline]
    pub fn leader(&self) -> ReplicaId {
        view_leader(self.view, self.population)
    }

    /// Advances the view number. Views never go backwards.
    pub fn set_view(&mut self, view: View) -> Result<(), WintersetError> {
        if view < self.view {
            return logged_err!(self.me; "view going backwards: {} < {}",
                                        view, self.view);
        }
        self.view = view;
        Ok(())
    }

    /// Current epoch vector.
    #[inline]
    pub fn epoch_vec(&self) -> &[Epoch] {
        &self.epoch_vec
    }

    /// My own current epoch number.
    #[inline]
    pub fn local_epoch(&self) -> Epoch {
        self.epoch_vec[self.me as usize]
    }

    /// Installs the boot-time epoch vector: all zeros except my own slot.
    pub(crate) fn seed_epoch_vec(&mut self, epoch: Epoch) {
        self.epoch_vec = vec![0; self.population as usize];
        self.epoch_vec[self.me as usize] = epoch;
    }

    /// Merges a peer's epoch vector into mine, element-wise max. The vector
    /// in storage thus only ever grows.
    pub fn update_epoch_vec(
        &mut self,
        other: &[Epoch],
    ) -> Result<(), WintersetError> {
        if other.len() != self.epoch_vec.len() {
            return logged_err!(self.me; "epoch vector length mismatch: {} != {}",
                                        other.len(), self.epoch_vec.len());
        }
        for (mine, theirs) in self.epoch_vec.iter_mut().zip(other.iter()) {
            if *theirs > *mine {
                *mine = *theirs;
            }
        }
        Ok(())
    }

    /// Index of the first not-yet-decided instance.
    #[inline]
    pub fn first_uncommitted(&self) -> u64 {
        self.first_uncommitted
    }

    /// Folds in a freshly learned decided prefix; never shrinks.
    pub fn observe_first_uncommitted(&mut self, first_uncommitted: u64) {
        if first_uncommitted > self.first_uncommitted {
            self.first_uncommitted = first_uncommitted;
        }
    }
}

/// Constructs the volatile Paxos storage for this boot and bumps the local
/// epoch on stable storage. The epoch write must succeed before anything
/// else happens; a failure here aborts recovery entirely, since any promise
/// made by a previous incarnation would otherwise stay un-invalidated.
pub(crate) async fn bootstrap_storage(
    me: ReplicaId,
    population: u8,
    epoch_file: &EpochFile,
) -> Result<(VolatileStorage, Epoch), WintersetError> {
    let mut storage = VolatileStorage::new(me, population);

    // a freshly restarted replica must never come up as its own leader
    if storage.leader() == me {
        let view = storage.view() + 1;
        storage.set_view(view)?;
    }

    let new_epoch = epoch_file.read().await? + 1;
    epoch_file.write(new_epoch).await?;
    storage.seed_epoch_vec(new_epoch);

    pf_info!(me; "bootstrapped volatile storage: view {} epoch {}",
                 storage.view(), new_epoch);
    Ok((storage, new_epoch))
}
