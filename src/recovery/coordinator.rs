//! The epoch-based stable-storage recovery coordinator.
//!
//! A replica that restarts after a crash may have made promises and votes it
//! no longer remembers, since this system keeps no Paxos log on disk. The
//! coordinator makes those stale promises harmless: it bumps the persisted
//! local epoch before anything leaves this machine, probes all peers until a
//! majority (itself included) has answered with the bumped epoch echoed
//! back, and only goes live once the leader's answer is in and catch-up has
//! reached the leader-reported next instance. Peers discard any message
//! tagged with an older epoch, so whatever the previous incarnation said can
//! no longer win anything.

use std::future;
use std::path::Path;

use super::catchup::CatchUpBridge;
use super::gatherer::QuorumGatherer;
use super::retransmit::Retransmitter;

use crate::recovery::{
    CatchUpCommand, CatchUpEvent, MsgClass, PeerMsg, RecoveryAlgorithm,
    RecoveryAnswer,
};
use crate::server::{
    bootstrap_storage, Epoch, EpochFile, ReplicaId, Router, Subscription,
    VolatileStorage,
};
use crate::utils::{Bitmap, WintersetError};

use async_trait::async_trait;

use serde::Deserialize;

use tokio::sync::{mpsc, watch};
use tokio::time::Duration;

/// Configuration parameters struct.
#[derive(Debug, Clone, Deserialize)]
pub struct RecoveryConfig {
    /// Path to the directory holding the epoch file.
    pub log_dir: String,

    /// Interval between recovery probe retransmissions in millisecs.
    pub retransmit_interval_ms: u64,
}

#[allow(clippy::derivable_impls)]
impl Default for RecoveryConfig {
    fn default() -> Self {
        RecoveryConfig {
            log_dir: "/tmp/winterset".into(),
            retransmit_interval_ms: 1000,
        }
    }
}

/// Recovery coordinator state.
#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub enum RecoveryState {
    /// Volatile state being built; nothing has been sent yet.
    Bootstrapping,

    /// Probing all peers for recovery answers.
    Probing,

    /// A majority has answered but the apparent leader has not; probing
    /// just the leader now.
    AwaitingLeader,

    /// Waiting for catch-up to reach the leader-reported next instance.
    CatchingUp,

    /// Recovery done; the Paxos engine may take protocol traffic.
    Live,
}

/// EpochSS recovery coordinator module.
pub struct RecoveryCoordinator {
    /// My replica ID.
    me: ReplicaId,

    /// Total number of replicas in cluster.
    population: u8,

    /// Configuration parameters struct.
    _config: RecoveryConfig,

    /// Current coordinator state.
    state: RecoveryState,

    /// Volatile Paxos storage built during bootstrap.
    storage: VolatileStorage,

    /// My freshly bumped epoch number; equals what sits on disk.
    local_epoch: Epoch,

    /// Inbound message router.
    router: Router<PeerMsg>,

    /// Probe retransmission module.
    retransmitter: Retransmitter,

    /// Majority bookkeeping over recovery answers.
    gatherer: QuorumGatherer,

    /// Receiver side of the recovery answer channel, while listening.
    rx_answer: Option<mpsc::UnboundedReceiver<(ReplicaId, PeerMsg)>>,

    /// Router registration for recovery answers, while listening.
    answer_sub: Option<Subscription<PeerMsg>>,

    /// Bridge to the catch-up subsystem, while catching up.
    bridge: Option<CatchUpBridge>,

    /// Sender side of the catch-up command channel.
    tx_catchup: mpsc::UnboundedSender<CatchUpCommand>,

    /// The embedder's handler for recovery probes from other replicas,
    /// installed once live.
    tx_recovery_req: mpsc::UnboundedSender<(ReplicaId, PeerMsg)>,

    /// Router registration for the recovery request handler; held from the
    /// Live transition onwards.
    _recovery_req_sub: Option<Subscription<PeerMsg>>,

    /// Sender side of the one-shot recovery finished signal.
    tx_finished: watch::Sender<bool>,

    /// Held so the finished signal always has a receiver.
    _rx_finished: watch::Receiver<bool>,
}

impl RecoveryCoordinator {
    /// Creates a new recovery coordinator and bootstraps volatile storage,
    /// bumping the epoch on stable storage. No message is sent and no
    /// listener is installed until `run()`.
    ///
    /// The embedder supplies: `tx_net`, through which messages go out to
    /// the peers set in the bitmap; `tx_catchup`, the command channel of the
    /// catch-up subsystem; and `tx_recovery_req`, its handler for peers'
    /// recovery probes once this replica is live.
    pub async fn new_and_setup(
        me: ReplicaId,
        population: u8,
        config_str: Option<&str>,
        tx_net: mpsc::UnboundedSender<(Bitmap, PeerMsg)>,
        tx_catchup: mpsc::UnboundedSender<CatchUpCommand>,
        tx_recovery_req: mpsc::UnboundedSender<(ReplicaId, PeerMsg)>,
    ) -> Result<Self, WintersetError> {
        if population == 0 || population <= me {
            return logged_err!(me; "invalid population {}", population);
        }

        let config = parsed_config!(config_str => RecoveryConfig;
                                    log_dir, retransmit_interval_ms)?;
        if config.retransmit_interval_ms == 0 {
            return logged_err!(
                me;
                "invalid config.retransmit_interval_ms '{}'",
                config.retransmit_interval_ms
            );
        }

        // bump my epoch on disk before anything else can happen
        let epoch_file = EpochFile::new(me, Path::new(&config.log_dir));
        let (storage, local_epoch) =
            bootstrap_storage(me, population, &epoch_file).await?;

        let router = Router::new(me);
        let retransmitter = Retransmitter::new(
            me,
            population,
            Duration::from_millis(config.retransmit_interval_ms),
            tx_net,
        );
        let (tx_finished, rx_finished) = watch::channel(false);

        Ok(RecoveryCoordinator {
            me,
            population,
            _config: config,
            state: RecoveryState::Bootstrapping,
            storage,
            local_epoch,
            router,
            retransmitter,
            gatherer: QuorumGatherer::new(me, population),
            rx_answer: None,
            answer_sub: None,
            bridge: None,
            tx_catchup,
            tx_recovery_req,
            _recovery_req_sub: None,
            tx_finished,
            _rx_finished: rx_finished,
        })
    }

    /// Current coordinator state.
    #[inline]
    pub fn state(&self) -> RecoveryState {
        self.state
    }

    /// My freshly bumped epoch number.
    #[inline]
    pub fn local_epoch(&self) -> Epoch {
        self.local_epoch
    }

    /// The volatile Paxos storage built during bootstrap. The embedder
    /// constructs its Paxos engine from this once recovery has finished.
    #[inline]
    pub fn storage(&self) -> &VolatileStorage {
        &self.storage
    }

    /// Consumes the coordinator, handing the volatile storage over.
    pub fn into_storage(self) -> VolatileStorage {
        self.storage
    }

    /// Gets a sender handle for the transport side to feed inbound peer
    /// messages into.
    pub fn inbound_sender(&self) -> mpsc::UnboundedSender<(ReplicaId, PeerMsg)> {
        self.router.inbound_sender()
    }

    /// Subscribes to the one-shot recovery finished signal.
    pub fn subscribe_finished(&self) -> watch::Receiver<bool> {
        self.tx_finished.subscribe()
    }

    /// Kicks off recovery. Returns true if the replica went live right away
    /// (first ever boot, or no peers to ask).
    fn start(&mut self) -> Result<bool, WintersetError> {
        debug_assert_eq!(self.state, RecoveryState::Bootstrapping);

        // epoch 1 means the epoch file did not exist: no previous
        // incarnation of me can have promised anything. A singleton
        // ensemble has no peer to ask either way.
        if self.local_epoch == 1 || self.population == 1 {
            self.finish()?;
            return Ok(true);
        }

        let (tx_answer, rx_answer) = mpsc::unbounded_channel();
        self.answer_sub = Some(
            self.router
                .subscribe(MsgClass::RecoveryAnswer, tx_answer)?,
        );
        self.rx_answer = Some(rx_answer);

        pf_info!(self.me; "sending recovery probes, epoch {}", self.local_epoch);
        self.retransmitter.start_transmitting(
            PeerMsg::Recovery {
                view: self.storage.view(),
                epoch: self.local_epoch,
            },
            None,
        )?;
        self.state = RecoveryState::Probing;
        Ok(false)
    }

    /// Handler of RecoveryAnswer messages.
    fn handle_recovery_answer(
        &mut self,
        sender: ReplicaId,
        answer: RecoveryAnswer,
    ) -> Result<(), WintersetError> {
        debug_assert!(matches!(
            self.state,
            RecoveryState::Probing | RecoveryState::AwaitingLeader
        ));

        if sender == self.me || sender >= self.population {
            pf_warn!(self.me; "protocol error: RecoveryAnswer from invalid sender {}",
                              sender);
            return Ok(());
        }
        if answer.epoch_vec.len() != self.population as usize {
            pf_warn!(self.me; "protocol error: RecoveryAnswer <- {} has vector length {}",
                              sender, answer.epoch_vec.len());
            return Ok(());
        }
        // drop answers to probes from a previous recovery attempt
        if answer.epoch_vec[self.me as usize] != self.local_epoch {
            pf_debug!(self.me; "stale RecoveryAnswer <- {} dropped", sender);
            return Ok(());
        }

        pf_info!(self.me; "got RecoveryAnswer <- {} view {} next_id {}",
                          sender, answer.view, answer.next_id);

        self.storage.update_epoch_vec(&answer.epoch_vec)?;
        if answer.view > self.storage.view() {
            self.storage.set_view(answer.view)?;
        }
        self.retransmitter.stop_peer(sender)?;
        self.gatherer.absorb(sender, answer)?;

        if self.gatherer.is_quorum() {
            self.on_quorum()?;
        }
        Ok(())
    }

    /// A majority (self included) has answered with my current epoch.
    fn on_quorum(&mut self) -> Result<(), WintersetError> {
        self.retransmitter.stop_all();

        if let Some(answer) = self.gatherer.leader_answer() {
            let target_next_id = answer.next_id;

            // the answer listener's job is done
            self.rx_answer = None;
            self.answer_sub = None;

            self.bridge = Some(CatchUpBridge::new_and_register(
                self.me,
                target_next_id,
                &self.tx_catchup,
            )?);
            self.state = RecoveryState::CatchingUp;
        } else {
            // a majority without the leader is not enough: only the leader's
            // next_id is authoritative. Probe just the leader of the merged
            // view instead of broadcasting again.
            let leader = self.storage.leader();
            if leader == self.me {
                pf_warn!(self.me; "merged view {} says I lead; probing myself is futile",
                                  self.storage.view());
            }
            pf_info!(self.me; "majority answered without leader {}; probing it alone",
                              leader);
            self.retransmitter.start_transmitting(
                PeerMsg::Recovery {
                    view: self.storage.view(),
                    epoch: self.local_epoch,
                },
                Some(Bitmap::from(self.population, vec![leader])),
            )?;
            self.state = RecoveryState::AwaitingLeader;
        }
        Ok(())
    }

    /// Handler of catch-up success reports. Returns true once recovery has
    /// finished.
    fn handle_catchup_succeeded(
        &mut self,
        first_uncommitted: u64,
    ) -> Result<bool, WintersetError> {
        debug_assert_eq!(self.state, RecoveryState::CatchingUp);
        self.storage.observe_first_uncommitted(first_uncommitted);

        if self.bridge.is_none() {
            return logged_err!(self.me; "catch-up event without an active bridge");
        }
        let target_next_id = self.bridge.as_ref().unwrap().target_next_id();

        if first_uncommitted >= target_next_id {
            let bridge = self.bridge.take().unwrap();
            bridge.unregister()?;
            pf_info!(self.me; "successfully caught up to instance {}",
                              first_uncommitted);
            self.finish()?;
            Ok(true)
        } else {
            // success may still leave holes below the target when gaps got
            // closed by snapshot; go again
            pf_info!(self.me; "catch-up stopped at {} short of target {}",
                              first_uncommitted, target_next_id);
            self.bridge.as_ref().unwrap().force_catchup()?;
            Ok(false)
        }
    }

    /// Goes live: fires the finished signal and installs the embedder's
    /// handler for other replicas' recovery probes.
    fn finish(&mut self) -> Result<(), WintersetError> {
        debug_assert!(self.answer_sub.is_none());
        self.state = RecoveryState::Live;
        self.tx_finished.send(true)?;

        self._recovery_req_sub = Some(
            self.router
                .subscribe(MsgClass::Recovery, self.tx_recovery_req.clone())?,
        );

        pf_info!(self.me; "recovery finished: epoch {} view {} first_uncommitted {}",
                          self.local_epoch, self.storage.view(),
                          self.storage.first_uncommitted());
        Ok(())
    }

    /// Receives the next recovery answer, or parks forever while not
    /// listening for them.
    async fn recv_answer(
        rx_answer: &mut Option<mpsc::UnboundedReceiver<(ReplicaId, PeerMsg)>>,
    ) -> Option<(ReplicaId, PeerMsg)> {
        match rx_answer {
            Some(rx_answer) => rx_answer.recv().await,
            None => future::pending().await,
        }
    }

    /// Receives the next catch-up report, or parks forever while not
    /// catching up.
    async fn recv_catchup(
        bridge: &mut Option<CatchUpBridge>,
    ) -> Result<CatchUpEvent, WintersetError> {
        match bridge {
            Some(bridge) => bridge.succeeded().await,
            None => future::pending().await,
        }
    }

    /// Drives recovery to completion. Returns once the replica is live;
    /// recovery has no deadline, so with a dead majority this waits forever
    /// (by design -- liveness comes from retransmission alone).
    pub async fn run(&mut self) -> Result<(), WintersetError> {
        if self.start()? {
            return Ok(());
        }

        loop {
            tokio::select! {
                // recovery answer from a peer
                msg = Self::recv_answer(&mut self.rx_answer) => {
                    match msg {
                        Some((peer, PeerMsg::RecoveryAnswer(answer))) => {
                            self.handle_recovery_answer(peer, answer)?;
                        }
                        Some((peer, msg)) => {
                            pf_warn!(self.me; "unexpected message {:?} <- {}",
                                              msg, peer);
                        }
                        None => {
                            return logged_err!(self.me; "recovery answer channel closed");
                        }
                    }
                },

                // probe retransmission tick
                () = self.retransmitter.ticked(), if self.retransmitter.is_active() => {
                    self.retransmitter.send_round()?;
                },

                // catch-up progress report
                event = Self::recv_catchup(&mut self.bridge) => {
                    let CatchUpEvent::Succeeded { first_uncommitted } = event?;
                    if self.handle_catchup_succeeded(first_uncommitted)? {
                        return Ok(());
                    }
                },
            }
        }
    }
}

#[async_trait]
impl RecoveryAlgorithm for RecoveryCoordinator {
    async fn recover(&mut self) -> Result<(), WintersetError> {
        self.run().await
    }

    fn storage(&self) -> &VolatileStorage {
        &self.storage
    }

    fn finished(&self) -> watch::Receiver<bool> {
        self.subscribe_finished()
    }
}
