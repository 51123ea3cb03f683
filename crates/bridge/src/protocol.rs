//! Client side of the rendezvous protocol.
//!
//! Every bridge call targets the surface registered under the configured
//! service name, uses the reserved call code derived from the bridge tag, and
//! starts with the surface descriptor followed by the verb.

use capbridge_core::{Error, Result, SurfaceSettings, Uid};
use capbridge_transport::{Handle, Parcel, ServiceRegistry};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Verbs multiplexed over the reserved call code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BridgeAction {
    /// Broker to surface: retain the attached broker handle.
    SendHandle = 1,
    /// Client to surface: return the retained handle, if any.
    GetHandle = 2,
    /// Broker to surface: broker initialization completed.
    NotifyFinished = 3,
    /// Broker to surface: replace the hidden identity set.
    SyncHiddenSet = 4,
}

impl BridgeAction {
    pub fn from_raw(raw: i32) -> Option<Self> {
        match raw {
            1 => Some(Self::SendHandle),
            2 => Some(Self::GetHandle),
            3 => Some(Self::NotifyFinished),
            4 => Some(Self::SyncHiddenSet),
            _ => None,
        }
    }

    pub fn as_raw(self) -> i32 {
        self as i32
    }
}

impl fmt::Display for BridgeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::SendHandle => "send-handle",
            Self::GetHandle => "get-handle",
            Self::NotifyFinished => "notify-finished",
            Self::SyncHiddenSet => "sync-hidden-set",
        };
        f.write_str(name)
    }
}

/// Calls the well-known surface with bridge verbs.
#[derive(Clone)]
pub struct RendezvousChannel {
    registry: Arc<dyn ServiceRegistry>,
    service_name: String,
    descriptor: String,
    code: u32,
}

impl fmt::Debug for RendezvousChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RendezvousChannel")
            .field("service_name", &self.service_name)
            .field("descriptor", &self.descriptor)
            .field("code", &format_args!("{:#x}", self.code))
            .finish_non_exhaustive()
    }
}

impl RendezvousChannel {
    pub fn new(registry: Arc<dyn ServiceRegistry>, settings: &SurfaceSettings) -> Result<Self> {
        Ok(Self {
            registry,
            service_name: settings.service_name.clone(),
            descriptor: settings.descriptor.clone(),
            code: settings.transaction_code()?,
        })
    }

    pub fn code(&self) -> u32 {
        self.code
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    /// The surface handle, if registered and answering pings.
    pub fn surface(&self) -> Option<Handle> {
        self.registry
            .get_service(&self.service_name)
            .filter(|handle| handle.ping())
    }

    /// Hand `broker` to `surface`. A call the surface did not handle counts
    /// as a failure.
    pub fn send_handle(&self, surface: &Handle, broker: &Handle) -> Result<()> {
        self.call(surface, BridgeAction::SendHandle, |data| {
            data.write_handle(Some(broker))
        })?;
        Ok(())
    }

    /// Ask the surface for the retained broker handle. No surface, a failed
    /// call and an empty reply are all reported as unavailable.
    pub fn get_handle(&self) -> Result<Handle> {
        let surface = self
            .surface()
            .ok_or_else(|| Error::service_unavailable(&self.service_name))?;
        let mut reply = self.call(&surface, BridgeAction::GetHandle, |_| {})?;
        reply
            .read_handle()?
            .ok_or_else(|| Error::service_unavailable("broker handle"))
    }

    pub fn notify_finished(&self, surface: &Handle) -> Result<()> {
        self.call(surface, BridgeAction::NotifyFinished, |_| {})?;
        Ok(())
    }

    pub fn sync_hidden_set(&self, surface: &Handle, hidden: &[Uid]) -> Result<()> {
        let raw: Vec<i32> = hidden.iter().map(|uid| uid.as_raw()).collect();
        self.call(surface, BridgeAction::SyncHiddenSet, |data| {
            data.write_i32_array(&raw)
        })?;
        Ok(())
    }

    fn call(
        &self,
        surface: &Handle,
        action: BridgeAction,
        write: impl FnOnce(&mut Parcel),
    ) -> Result<Parcel> {
        let mut data = Parcel::new();
        data.write_interface_token(&self.descriptor);
        data.write_i32(action.as_raw());
        write(&mut data);

        let mut reply = Parcel::new();
        debug!(%action, "bridge call");
        if !surface.transact(self.code, &mut data, &mut reply)? {
            return Err(Error::transaction(
                self.code,
                format!("{action} was not handled by the surface"),
            ));
        }
        reply.read_exception()?;
        Ok(reply)
    }
}
