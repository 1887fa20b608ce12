//! Per-class routing of inbound peer messages.
//!
//! Listeners register for one message class at a time and get an owned
//! `Subscription` guard back; dropping the guard deregisters. There is no
//! process-wide registry: whoever owns the `Router` decides who may listen,
//! and a leaked listener is impossible because the guard is the registration.

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;

use crate::server::ReplicaId;
use crate::utils::WintersetError;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Classification of peer messages into routable classes.
pub trait Classify {
    /// Routing class type.
    type Class: fmt::Debug + Copy + Eq + Hash + Send + 'static;

    /// Returns the routing class of this message.
    fn class(&self) -> Self::Class;
}

/// Control commands to the router task.
enum RouterCtrl<M: Classify> {
    /// Install a subscriber for a class.
    Subscribe {
        class: M::Class,
        token: u64,
        tx: mpsc::UnboundedSender<(ReplicaId, M)>,
    },

    /// Remove the subscriber of a class, if the token still matches.
    Unsubscribe { class: M::Class, token: u64 },
}

/// Inbound message router module.
pub struct Router<M: Classify> {
    /// My replica ID.
    me: ReplicaId,

    /// Sender side of the inbound channel, cloned out to the transport.
    tx_inbound: mpsc::UnboundedSender<(ReplicaId, M)>,

    /// Sender side of the control channel.
    tx_ctrl: mpsc::UnboundedSender<RouterCtrl<M>>,

    /// Monotonic token source distinguishing subscription generations.
    next_token: u64,

    /// Join handle of the router task.
    _router_handle: JoinHandle<()>,
}

impl<M> Router<M>
where
    M: Classify + fmt::Debug + Send + 'static,
{
    /// Creates a new inbound message router and spawns its routing task.
    pub fn new(me: ReplicaId) -> Self {
        let (tx_inbound, rx_inbound) = mpsc::unbounded_channel();
        let (tx_ctrl, rx_ctrl) = mpsc::unbounded_channel();

        let router_handle =
            tokio::spawn(Self::router_task(me, rx_inbound, rx_ctrl));

        Router {
            me,
            tx_inbound,
            tx_ctrl,
            next_token: 0,
            _router_handle: router_handle,
        }
    }

    /// Gets a sender handle for the transport side to feed inbound messages
    /// into.
    pub fn inbound_sender(&self) -> mpsc::UnboundedSender<(ReplicaId, M)> {
        self.tx_inbound.clone()
    }

    /// Installs `tx` as the subscriber of `class`, replacing any previous
    /// subscriber of that class. The returned guard deregisters on drop.
    pub fn subscribe(
        &mut self,
        class: M::Class,
        tx: mpsc::UnboundedSender<(ReplicaId, M)>,
    ) -> Result<Subscription<M>, WintersetError> {
        let token = self.next_token;
        self.next_token += 1;

        pf_debug!(self.me; "subscribing class {:?} token {}", class, token);
        self.tx_ctrl
            .send(RouterCtrl::Subscribe { class, token, tx })
            .map_err(|e| WintersetError(e.to_string()))?;

        Ok(Subscription {
            class,
            token,
            tx_ctrl: self.tx_ctrl.clone(),
        })
    }

    /// Router task function.
    async fn router_task(
        me: ReplicaId,
        mut rx_inbound: mpsc::UnboundedReceiver<(ReplicaId, M)>,
        mut rx_ctrl: mpsc::UnboundedReceiver<RouterCtrl<M>>,
    ) {
        pf_debug!(me; "router task spawned");

        let mut subs: HashMap<
            M::Class,
            (u64, mpsc::UnboundedSender<(ReplicaId, M)>),
        > = HashMap::new();

        loop {
            tokio::select! {
                // control drains first: a subscriber installed before a
                // message was fed in is guaranteed to see that message
                biased;

                ctrl = rx_ctrl.recv() => {
                    match ctrl {
                        Some(RouterCtrl::Subscribe { class, token, tx }) => {
                            if subs.insert(class, (token, tx)).is_some() {
                                pf_warn!(me; "replaced subscriber of class {:?}",
                                             class);
                            }
                        }
                        Some(RouterCtrl::Unsubscribe { class, token }) => {
                            // a stale guard must not evict a newer subscriber
                            if subs.get(&class).map(|(t, _)| *t) == Some(token) {
                                subs.remove(&class);
                            }
                        }
                        None => break,
                    }
                },

                msg = rx_inbound.recv() => {
                    match msg {
                        Some((peer, msg)) => {
                            let class = msg.class();
                            if let Some((_, tx)) = subs.get(&class) {
                                if tx.send((peer, msg)).is_err() {
                                    pf_warn!(me; "subscriber of class {:?} is gone",
                                                 class);
                                    subs.remove(&class);
                                }
                            } else {
                                pf_trace!(me; "dropped {:?} message <- {}",
                                              class, peer);
                            }
                        }
                        None => break,
                    }
                },
            }
        }

        // all sender handles have been dropped
        pf_debug!(me; "router task exitted");
    }
}

/// Registration guard of one subscriber. Dropping it deregisters.
pub struct Subscription<M: Classify> {
    /// Subscribed message class.
    class: M::Class,

    /// Token distinguishing me from later subscribers of the same class.
    token: u64,

    /// Sender side of the control channel.
    tx_ctrl: mpsc::UnboundedSender<RouterCtrl<M>>,
}

impl<M: Classify> Drop for Subscription<M> {
    fn drop(&mut self) {
        // router may already be gone during teardown
        let _ = self.tx_ctrl.send(RouterCtrl::Unsubscribe {
            class: self.class,
            token: self.token,
        });
    }
}
