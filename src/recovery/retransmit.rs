//! Periodic retransmission of one message to a shrinking set of peers.
//!
//! The recovery procedure owns exactly one retransmitter and drives its
//! ticks from the single event loop, so "no resend to a peer after
//! `stop_peer` returns" holds by construction.

use crate::recovery::PeerMsg;
use crate::server::ReplicaId;
use crate::utils::{Bitmap, WintersetError};

use tokio::sync::mpsc;
use tokio::time::{self, Duration, Interval, MissedTickBehavior};

/// The message being retransmitted and its remaining targets.
struct Transmission {
    msg: PeerMsg,
    targets: Bitmap,
}

/// Fixed-cadence message retransmission module.
pub(crate) struct Retransmitter {
    /// My replica ID.
    me: ReplicaId,

    /// Total number of replicas in cluster.
    population: u8,

    /// Sender side of the outgoing messages channel; the embedding
    /// transport delivers `msg` to every replica set in the bitmap.
    tx_net: mpsc::UnboundedSender<(Bitmap, PeerMsg)>,

    /// Resend cadence ticker.
    interval: Interval,

    /// Currently active transmission, if any.
    active: Option<Transmission>,
}

impl Retransmitter {
    /// Creates a new retransmitter with the given resend cadence.
    pub(crate) fn new(
        me: ReplicaId,
        population: u8,
        cadence: Duration,
        tx_net: mpsc::UnboundedSender<(Bitmap, PeerMsg)>,
    ) -> Self {
        let mut interval = time::interval(cadence);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        Retransmitter {
            me,
            population,
            tx_net,
            interval,
            active: None,
        }
    }

    /// Starts (or restarts) transmitting `msg`. `None` targets means all
    /// peers except myself. The first round goes out immediately; later
    /// rounds follow the cadence until every target has been stopped.
    pub(crate) fn start_transmitting(
        &mut self,
        msg: PeerMsg,
        targets: Option<Bitmap>,
    ) -> Result<(), WintersetError> {
        let targets = match targets {
            Some(targets) => targets,
            None => {
                let mut all_peers = Bitmap::new(self.population, true);
                all_peers.set(self.me, false)?;
                all_peers
            }
        };

        pf_debug!(self.me; "start transmitting {:?} -> {:?}", msg, targets);
        self.active = Some(Transmission { msg, targets });
        self.interval.reset();
        self.send_round()
    }

    /// Stops resending to one peer, keeping the others active. No-op if the
    /// peer is already stopped or nothing is being transmitted.
    pub(crate) fn stop_peer(
        &mut self,
        peer: ReplicaId,
    ) -> Result<(), WintersetError> {
        if let Some(transmission) = &mut self.active {
            transmission.targets.set(peer, false)?;
            if transmission.targets.count() == 0 {
                self.active = None;
            }
        }
        Ok(())
    }

    /// Stops resending to all peers.
    pub(crate) fn stop_all(&mut self) {
        self.active = None;
    }

    /// True while some transmission is active.
    #[inline]
    pub(crate) fn is_active(&self) -> bool {
        self.active.is_some()
    }

    /// Waits for the next resend tick. Should be used as a `tokio::select!`
    /// branch gated on `is_active()`.
    pub(crate) async fn ticked(&mut self) {
        self.interval.tick().await;
    }

    /// Sends the active message to all remaining targets.
    pub(crate) fn send_round(&mut self) -> Result<(), WintersetError> {
        if let Some(transmission) = &self.active {
            pf_trace!(self.me; "resend {:?} -> {:?}",
                               transmission.msg, transmission.targets);
            self.tx_net.send((
                transmission.targets.clone(),
                transmission.msg.clone(),
            ))?;
        }
        Ok(())
    }
}
