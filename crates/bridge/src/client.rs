//! Typed privileged calls against the located broker handle.

use crate::locator::HandleLocator;
use capbridge_core::{
    AppInfo, Error, Result, OP_BATCH_UPDATE_UNCONFIGURED, OP_GET_APPLICATIONS,
    OP_GET_GLOBAL_SETTINGS, OP_REQUEST_PINNED_SHORTCUT, OP_SET_GLOBAL_SETTINGS,
};
use capbridge_transport::Parcel;
use std::sync::Arc;
use tracing::warn;

pub struct BrokerClient {
    locator: Arc<HandleLocator>,
    descriptor: String,
}

impl BrokerClient {
    pub fn new(locator: Arc<HandleLocator>, descriptor: impl Into<String>) -> Self {
        Self {
            locator,
            descriptor: descriptor.into(),
        }
    }

    pub fn locator(&self) -> &Arc<HandleLocator> {
        &self.locator
    }

    /// Applications for `user_id` (-1 for every user). With `only_filtered`
    /// only applications that request the capability are listed.
    pub fn get_applications(&self, user_id: i32, only_filtered: bool) -> Result<Vec<AppInfo>> {
        self.call(
            OP_GET_APPLICATIONS,
            |data| {
                data.write_i32(user_id);
                data.write_bool(only_filtered);
            },
            |reply| Ok(bincode::deserialize(&reply.read_blob()?)?),
        )
    }

    pub fn request_pinned_shortcut(&self) -> Result<()> {
        self.call(OP_REQUEST_PINNED_SHORTCUT, |_| {}, |_| Ok(()))
    }

    /// Apply `target_mode` to every application without a permission decision.
    pub fn batch_update_unconfigured(&self, target_mode: u32) -> Result<()> {
        self.call(
            OP_BATCH_UPDATE_UNCONFIGURED,
            |data| data.write_u32(target_mode),
            |_| Ok(()),
        )
    }

    pub fn get_global_settings(&self) -> Result<u32> {
        self.call(OP_GET_GLOBAL_SETTINGS, |_| {}, Parcel::read_u32)
    }

    pub fn set_global_settings(&self, flags: u32) -> Result<()> {
        self.call(OP_SET_GLOBAL_SETTINGS, |data| data.write_u32(flags), |_| Ok(()))
    }

    fn call<T>(
        &self,
        code: u32,
        write: impl FnOnce(&mut Parcel),
        read: impl FnOnce(&mut Parcel) -> Result<T>,
    ) -> Result<T> {
        let handle = self.locator.get_service()?;

        let mut data = Parcel::new();
        data.write_interface_token(&self.descriptor);
        write(&mut data);
        let mut reply = Parcel::new();

        match handle.transact(code, &mut data, &mut reply) {
            Ok(true) => {}
            Ok(false) => return Err(Error::transaction(code, "not handled by the broker")),
            Err(e @ Error::DeadObject { .. }) => {
                warn!(code, "broker handle is dead, invalidating");
                self.locator.invalidate();
                return Err(e);
            }
            Err(e) => return Err(e),
        }
        reply.read_exception()?;
        read(&mut reply)
    }
}
