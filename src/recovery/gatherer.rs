//! Majority bookkeeping over incoming recovery answers.

use crate::recovery::RecoveryAnswer;
use crate::server::{view_leader, ReplicaId};
use crate::utils::{Bitmap, WintersetError};

/// Tracks which peers have answered the recovery probe and whether the
/// apparent leader is among them. The local replica counts towards the
/// majority without ever answering its own probe.
pub(crate) struct QuorumGatherer {
    /// My replica ID.
    me: ReplicaId,

    /// Total number of replicas in cluster.
    population: u8,

    /// Replicas whose answer has been absorbed; my own bit starts set.
    received: Bitmap,

    /// Latest answer received from a replica that leads its own reported
    /// view. The most recent leader reply wins.
    answer_from_leader: Option<RecoveryAnswer>,
}

impl QuorumGatherer {
    /// Creates a new gatherer with only the self bit set.
    pub(crate) fn new(me: ReplicaId, population: u8) -> Self {
        let mut received = Bitmap::new(population, false);
        received
            .set(me, true)
            .expect("setting own received bit should succeed");

        QuorumGatherer {
            me,
            population,
            received,
            answer_from_leader: None,
        }
    }

    /// Absorbs an answer from `sender`. Repeated answers from the same
    /// sender only ever refresh the leader-answer slot.
    pub(crate) fn absorb(
        &mut self,
        sender: ReplicaId,
        answer: RecoveryAnswer,
    ) -> Result<(), WintersetError> {
        if sender == self.me {
            return logged_err!(self.me; "absorbing my own recovery answer");
        }
        self.received.set(sender, true)?;

        if view_leader(answer.view, self.population) == sender {
            self.answer_from_leader = Some(answer);
        }
        Ok(())
    }

    /// True once a strict majority of the cluster (self included) is in.
    #[inline]
    pub(crate) fn is_quorum(&self) -> bool {
        self.received.count() > self.population / 2
    }

    /// The leader's answer, if one has arrived.
    #[inline]
    pub(crate) fn leader_answer(&self) -> Option<&RecoveryAnswer> {
        self.answer_from_leader.as_ref()
    }
}

#[cfg(test)]
mod gatherer_tests {
    use super::*;

    fn answer(view: u64, next_id: u64) -> RecoveryAnswer {
        RecoveryAnswer {
            view,
            epoch_vec: vec![8, 8, 8],
            next_id,
        }
    }

    #[test]
    fn self_counts_towards_majority() -> Result<(), WintersetError> {
        let mut gatherer = QuorumGatherer::new(0, 3);
        assert!(!gatherer.is_quorum());
        gatherer.absorb(2, answer(12, 100))?;
        assert!(gatherer.is_quorum());
        Ok(())
    }

    #[test]
    fn five_replicas_need_two_answers() -> Result<(), WintersetError> {
        let mut gatherer = QuorumGatherer::new(0, 5);
        gatherer.absorb(1, answer(12, 100))?;
        assert!(!gatherer.is_quorum());
        gatherer.absorb(3, answer(12, 100))?;
        assert!(gatherer.is_quorum());
        Ok(())
    }

    #[test]
    fn absorb_is_idempotent() -> Result<(), WintersetError> {
        let mut gatherer = QuorumGatherer::new(0, 5);
        gatherer.absorb(1, answer(12, 100))?;
        gatherer.absorb(1, answer(12, 100))?;
        gatherer.absorb(1, answer(12, 100))?;
        assert!(!gatherer.is_quorum());
        Ok(())
    }

    #[test]
    fn leader_answer_tracked() -> Result<(), WintersetError> {
        let mut gatherer = QuorumGatherer::new(0, 3);
        // replica 2 does not lead view 13
        gatherer.absorb(2, answer(13, 90))?;
        assert!(gatherer.leader_answer().is_none());
        // replica 1 leads view 13
        gatherer.absorb(1, answer(13, 100))?;
        assert_eq!(gatherer.leader_answer(), Some(&answer(13, 100)));
        Ok(())
    }

    #[test]
    fn latest_leader_answer_wins() -> Result<(), WintersetError> {
        let mut gatherer = QuorumGatherer::new(0, 3);
        gatherer.absorb(1, answer(13, 100))?;
        gatherer.absorb(2, answer(14, 120))?; // replica 2 leads view 14
        assert_eq!(gatherer.leader_answer(), Some(&answer(14, 120)));
        Ok(())
    }

    #[test]
    fn own_answer_rejected() {
        let mut gatherer = QuorumGatherer::new(0, 3);
        assert!(gatherer.absorb(0, answer(12, 100)).is_err());
    }
}
