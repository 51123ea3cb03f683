//! Host side of the rendezvous protocol.
//!
//! [`RendezvousSurface`] is installed as the host's handler. Calls on the
//! reserved code are consumed here; every other call goes to the host's own
//! handler.

use crate::protocol::BridgeAction;
use capbridge_core::{Result, SurfaceSettings, Uid};
use capbridge_transport::{CallContext, DeathSubscription, Handle, Parcel, TransactHandler};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::{Arc, Weak};
use tracing::{debug, info, warn};

#[derive(Default)]
struct Retained {
    broker: Option<Handle>,
    subscription: Option<DeathSubscription>,
    generation: u64,
    finished: bool,
    hidden: HashSet<Uid>,
}

/// Retains the broker handle for clients of the host.
pub struct RendezvousSurface {
    descriptor: String,
    code: u32,
    fallback: Option<Arc<dyn TransactHandler>>,
    broker_uids: Option<HashSet<Uid>>,
    state: Arc<Mutex<Retained>>,
}

impl RendezvousSurface {
    pub fn new(settings: &SurfaceSettings) -> Result<Self> {
        Ok(Self {
            descriptor: settings.descriptor.clone(),
            code: settings.transaction_code()?,
            fallback: None,
            broker_uids: None,
            state: Arc::new(Mutex::new(Retained::default())),
        })
    }

    /// Delegate calls on other codes to `handler`.
    pub fn with_fallback(mut self, handler: Arc<dyn TransactHandler>) -> Self {
        self.fallback = Some(handler);
        self
    }

    /// Only accept broker verbs from these identities. Without this any
    /// caller may publish.
    pub fn with_broker_uids(mut self, uids: impl IntoIterator<Item = Uid>) -> Self {
        self.broker_uids = Some(uids.into_iter().collect());
        self
    }

    pub fn broker_handle(&self) -> Option<Handle> {
        self.state.lock().broker.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.state.lock().finished
    }

    pub fn hidden_set(&self) -> HashSet<Uid> {
        self.state.lock().hidden.clone()
    }

    fn accepts_broker_verb(&self, caller: &CallContext) -> bool {
        self.broker_uids
            .as_ref()
            .map_or(true, |uids| uids.contains(&caller.uid))
    }

    fn retain(&self, broker: Handle) -> std::result::Result<(), String> {
        let generation = {
            let mut state = self.state.lock();
            state.generation += 1;
            state.generation
        };

        let weak: Weak<Mutex<Retained>> = Arc::downgrade(&self.state);
        let subscription = broker
            .link_to_death(Arc::new(move || {
                let Some(state) = weak.upgrade() else { return };
                let stale = {
                    let mut state = state.lock();
                    if state.generation != generation {
                        return;
                    }
                    state.broker = None;
                    state.finished = false;
                    state.subscription.take()
                };
                drop(stale);
                info!("broker handle died, cleared");
            }))
            .map_err(|e| format!("broker handle is not alive: {e}"))?;

        let previous = {
            let mut state = self.state.lock();
            if state.generation != generation {
                // A newer handle arrived while this one was being linked.
                return Ok(());
            }
            state.broker = Some(broker);
            state.finished = false;
            state.subscription.replace(subscription)
        };
        drop(previous);
        info!(generation, "broker handle retained");
        Ok(())
    }

    fn handle_bridge(
        &self,
        data: &mut Parcel,
        reply: &mut Parcel,
        caller: CallContext,
    ) -> Result<bool> {
        data.enforce_interface(&self.descriptor)?;
        let raw = data.read_i32()?;
        let Some(action) = BridgeAction::from_raw(raw) else {
            warn!(action = raw, uid = %caller.uid, "unknown bridge action");
            reply.write_exception(format!("unknown bridge action {raw}"));
            return Ok(true);
        };
        debug!(%action, uid = %caller.uid, "bridge call received");

        if action != BridgeAction::GetHandle && !self.accepts_broker_verb(&caller) {
            warn!(%action, uid = %caller.uid, "refusing broker verb from untrusted caller");
            reply.write_exception(format!("{action} is not permitted for uid {}", caller.uid));
            return Ok(true);
        }

        match action {
            BridgeAction::SendHandle => match data.read_handle()? {
                Some(broker) => match self.retain(broker) {
                    Ok(()) => reply.write_no_exception(),
                    Err(message) => reply.write_exception(message),
                },
                None => reply.write_exception("send-handle without a handle"),
            },
            BridgeAction::GetHandle => {
                let state = self.state.lock();
                reply.write_no_exception();
                if state.hidden.contains(&caller.uid) {
                    debug!(uid = %caller.uid, "hidden caller asked for the broker handle");
                    reply.write_handle(None);
                } else {
                    reply.write_handle(state.broker.as_ref());
                }
            }
            BridgeAction::NotifyFinished => {
                self.state.lock().finished = true;
                info!("broker reported initialization finished");
                reply.write_no_exception();
            }
            BridgeAction::SyncHiddenSet => {
                let hidden: HashSet<Uid> = data.read_i32_array()?.into_iter().map(Uid).collect();
                info!(count = hidden.len(), "hidden identity set replaced");
                self.state.lock().hidden = hidden;
                reply.write_no_exception();
            }
        }
        Ok(true)
    }
}

impl TransactHandler for RendezvousSurface {
    fn on_transact(
        &self,
        code: u32,
        data: &mut Parcel,
        reply: &mut Parcel,
        caller: CallContext,
    ) -> Result<bool> {
        if code == self.code {
            return self.handle_bridge(data, reply, caller);
        }
        match &self.fallback {
            Some(fallback) => fallback.on_transact(code, data, reply, caller),
            None => Ok(false),
        }
    }
}
