//! Bridge to the external catch-up subsystem.
//!
//! Catch-up itself (fetching decided instances and snapshots from peers) is
//! not this crate's business; the bridge only gates the go-live handoff on
//! the decided prefix having reached the leader-reported point. It is an
//! explicit listener value: registration and deregistration are channel
//! commands, so a leaked listener cannot outlive recovery unnoticed.

use crate::server::ReplicaId;
use crate::utils::WintersetError;

use tokio::sync::mpsc;

/// Commands issued to the external catch-up subsystem.
#[derive(Debug)]
pub enum CatchUpCommand {
    /// Registers the completion listener.
    Subscribe {
        tx_event: mpsc::UnboundedSender<CatchUpEvent>,
    },

    /// Removes the registered completion listener.
    Unsubscribe,

    /// Starts catching up.
    Start,

    /// Requests another round even though the last one reported success.
    ForceCatchup,
}

/// Events reported by the external catch-up subsystem.
#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub enum CatchUpEvent {
    /// A catch-up round finished; `first_uncommitted` is the decided prefix
    /// the subsystem has reached locally. A round may report success while
    /// snapshot-covered gaps still leave holes at the tail, so this may
    /// fall short of the requested target.
    Succeeded { first_uncommitted: u64 },
}

/// One-shot listener gating recovery completion on catch-up progress.
pub(crate) struct CatchUpBridge {
    /// My replica ID.
    me: ReplicaId,

    /// Instance id up to which all must be known locally before rejoining.
    target_next_id: u64,

    /// Sender side of the catch-up command channel.
    tx_catchup: mpsc::UnboundedSender<CatchUpCommand>,

    /// Receiver side of the completion event channel.
    rx_event: mpsc::UnboundedReceiver<CatchUpEvent>,
}

impl CatchUpBridge {
    /// Registers with the catch-up subsystem and starts a round targeting
    /// `target_next_id`.
    pub(crate) fn new_and_register(
        me: ReplicaId,
        target_next_id: u64,
        tx_catchup: &mpsc::UnboundedSender<CatchUpCommand>,
    ) -> Result<Self, WintersetError> {
        let (tx_event, rx_event) = mpsc::unbounded_channel();
        tx_catchup.send(CatchUpCommand::Subscribe { tx_event })?;
        tx_catchup.send(CatchUpCommand::Start)?;

        pf_info!(me; "started catching up, target next_id {}", target_next_id);
        Ok(CatchUpBridge {
            me,
            target_next_id,
            tx_catchup: tx_catchup.clone(),
            rx_event,
        })
    }

    /// Instance id this bridge is gating on.
    #[inline]
    pub(crate) fn target_next_id(&self) -> u64 {
        self.target_next_id
    }

    /// Waits for the next completion event from the subsystem.
    pub(crate) async fn succeeded(
        &mut self,
    ) -> Result<CatchUpEvent, WintersetError> {
        match self.rx_event.recv().await {
            Some(event) => Ok(event),
            None => logged_err!(self.me; "catch-up subsystem has died"),
        }
    }

    /// Asks for another catch-up round.
    pub(crate) fn force_catchup(&self) -> Result<(), WintersetError> {
        self.tx_catchup.send(CatchUpCommand::ForceCatchup)?;
        Ok(())
    }

    /// Deregisters from the subsystem, consuming the bridge. Failure here is
    /// fatal to the caller: a listener left behind could fire again after
    /// recovery has completed.
    pub(crate) fn unregister(self) -> Result<(), WintersetError> {
        self.tx_catchup.send(CatchUpCommand::Unsubscribe)?;
        Ok(())
    }
}
