//! Leader-liveness failure detection.
//!
//! Once a replica is live, the view leader broadcasts `Alive` heartbeats on
//! a fixed cadence while every follower runs a suspect timeout against the
//! leader. Any message observed from the current-view leader counts as an
//! Alive; a full broadcast by the leader itself likewise defers its next
//! Alive tick.

use crate::server::{view_leader, ReplicaId, View};
use crate::utils::{Timer, WintersetError};

use tokio::time::{self, Duration, Interval, MissedTickBehavior};

/// Multiplexed failure detector events type.
#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub enum FailureDetectorEvent {
    /// The current-view leader has been silent past the suspect timeout.
    LeaderSuspected { view: View },

    /// Alive sending interval tick (leader role only).
    SendTicked,
}

/// The leader failure detection module.
pub struct FailureDetector {
    /// My replica ID.
    me: ReplicaId,

    /// Total number of replicas in cluster.
    population: u8,

    /// View whose leader is being monitored.
    view: View,

    /// True if I lead the monitored view.
    leading: bool,

    /// True after `start()` has armed the detector.
    started: bool,

    /// Silence duration after which the leader gets suspected.
    suspect_timeout: Duration,

    /// Timer for hearing from the leader.
    suspect_timer: Timer,

    /// Interval for sending Alive messages when leading.
    send_interval: Interval,
}

impl FailureDetector {
    /// Creates a new failure detector.
    pub fn new_and_setup(
        me: ReplicaId,
        population: u8,
        suspect_timeout: Duration,
        send_interval: Duration,
    ) -> Result<FailureDetector, WintersetError> {
        if suspect_timeout < Duration::from_millis(100) {
            return logged_err!(me; "invalid suspect_timeout {:?}",
                                   suspect_timeout);
        }
        if send_interval < Duration::from_millis(1)
            || send_interval > suspect_timeout
        {
            return logged_err!(me; "invalid send_interval {:?}",
                                   send_interval);
        }

        let mut send_interval = time::interval(send_interval);
        send_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        Ok(FailureDetector {
            me,
            population,
            view: 0,
            leading: false,
            started: false,
            suspect_timeout,
            suspect_timer: Timer::new(),
            send_interval,
        })
    }

    /// Arms the detector for the given view. Called once when the replica
    /// goes live.
    pub fn start(&mut self, view: View) -> Result<(), WintersetError> {
        self.view = view;
        self.started = true;
        self.arm()
    }

    /// Re-arms the detector after a leader change.
    pub fn leader_change(&mut self, view: View) -> Result<(), WintersetError> {
        if !self.started {
            return logged_err!(self.me; "leader_change before start");
        }
        if view < self.view {
            return logged_err!(self.me; "view going backwards: {} < {}",
                                        view, self.view);
        }
        self.view = view;
        self.arm()
    }

    /// Arms either the suspect timer or the sending ticks per my role.
    fn arm(&mut self) -> Result<(), WintersetError> {
        self.leading = view_leader(self.view, self.population) == self.me;
        if self.leading {
            self.suspect_timer.cancel()?;
            self.send_interval.reset();
        } else {
            self.suspect_timer.kickoff(self.suspect_timeout)?;
        }
        Ok(())
    }

    /// Called on every message received from a peer; a message from the
    /// current-view leader doubles as an Alive and defers suspicion.
    pub fn observe_peer_msg(
        &mut self,
        sender: ReplicaId,
        view: View,
    ) -> Result<(), WintersetError> {
        if self.started
            && !self.leading
            && view == self.view
            && sender == view_leader(self.view, self.population)
        {
            self.suspect_timer.kickoff(self.suspect_timeout)?;
        }
        Ok(())
    }

    /// Called on every broadcast this replica sends while leading. Full
    /// non-Alive broadcasts already prove liveness, so the next Alive tick
    /// is deferred for them.
    pub fn observe_self_bcast(&mut self, is_alive_msg: bool) {
        if self.started && self.leading && !is_alive_msg {
            self.send_interval.reset();
        }
    }

    /// Waits for a failure detector event.
    pub async fn get_event(
        &mut self,
    ) -> Result<FailureDetectorEvent, WintersetError> {
        tokio::select! {
            // leader has been silent for too long
            () = self.suspect_timer.timeout(), if self.started && !self.leading => {
                pf_warn!(self.me; "suspecting leader {} of view {}",
                                  view_leader(self.view, self.population),
                                  self.view);
                Ok(FailureDetectorEvent::LeaderSuspected { view: self.view })
            },

            // time to send an Alive
            _ = self.send_interval.tick(), if self.started && self.leading => {
                Ok(FailureDetectorEvent::SendTicked)
            },

            else => {
                logged_err!(self.me; "failure detector polled before start")
            }
        }
    }
}

#[cfg(test)]
mod detector_tests {
    use super::*;

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn follower_suspects_silent_leader() -> Result<(), WintersetError> {
        let mut fd = FailureDetector::new_and_setup(
            0,
            3,
            Duration::from_millis(100),
            Duration::from_millis(20),
        )?;
        fd.start(1)?; // replica 1 leads view 1
        assert_eq!(
            fd.get_event().await?,
            FailureDetectorEvent::LeaderSuspected { view: 1 }
        );
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn leader_msg_defers_suspicion() -> Result<(), WintersetError> {
        let mut fd = FailureDetector::new_and_setup(
            0,
            3,
            Duration::from_millis(150),
            Duration::from_millis(20),
        )?;
        fd.start(1)?;
        time::sleep(Duration::from_millis(80)).await;
        fd.observe_peer_msg(1, 1)?;
        // a message from a non-leader peer must not defer anything
        fd.observe_peer_msg(2, 1)?;
        tokio::select! {
            ev = fd.get_event() => panic!("premature event: {:?}", ev),
            () = time::sleep(Duration::from_millis(100)) => {}
        }
        assert_eq!(
            fd.get_event().await?,
            FailureDetectorEvent::LeaderSuspected { view: 1 }
        );
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn leader_send_ticks() -> Result<(), WintersetError> {
        let mut fd = FailureDetector::new_and_setup(
            1,
            3,
            Duration::from_millis(100),
            Duration::from_millis(20),
        )?;
        fd.start(1)?; // I lead view 1
        assert_eq!(fd.get_event().await?, FailureDetectorEvent::SendTicked);
        assert_eq!(fd.get_event().await?, FailureDetectorEvent::SendTicked);
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn leader_change_switches_role() -> Result<(), WintersetError> {
        let mut fd = FailureDetector::new_and_setup(
            1,
            3,
            Duration::from_millis(100),
            Duration::from_millis(20),
        )?;
        fd.start(1)?;
        assert_eq!(fd.get_event().await?, FailureDetectorEvent::SendTicked);
        fd.leader_change(2)?; // replica 2 leads view 2
        assert_eq!(
            fd.get_event().await?,
            FailureDetectorEvent::LeaderSuspected { view: 2 }
        );
        Ok(())
    }
}
