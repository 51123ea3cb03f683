//! The broker's handler for privileged operations.
//!
//! Every call is checked against the authorization store before it runs.
//! Administrative operations need ROOT, SYSTEM or a configured manager
//! identity; reading the global settings only needs an allowed entry.
//! Refusals and failures travel back as a remote exception in the reply.

use capbridge_core::{
    AppInfo, Error, Result, Uid, MASK_PERMISSION, OP_BATCH_UPDATE_UNCONFIGURED,
    OP_GET_APPLICATIONS, OP_GET_GLOBAL_SETTINGS, OP_REQUEST_PINNED_SHORTCUT,
    OP_SET_GLOBAL_SETTINGS,
};
use capbridge_store::AuthorizationStore;
use capbridge_transport::{CallContext, Parcel, TransactHandler};
use capbridge_utils::tracing::dispatch_span;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// An installed application as reported by the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledApp {
    pub package_name: String,
    pub uid: Uid,
    pub user_id: i32,
    pub label: Option<String>,
    /// Whether the application declares that it uses the broker.
    pub requests_capability: bool,
}

/// Application inventory.
pub trait AppSource: Send + Sync {
    /// Applications of `user_id`, or of every user for -1.
    fn installed_apps(&self, user_id: i32) -> Result<Vec<InstalledApp>>;
}

/// Pins the management shortcut on the launcher.
pub trait ShortcutRequester: Send + Sync {
    fn request_pinned_shortcut(&self) -> Result<()>;
}

/// Handler for the broker handle.
pub struct BrokerService {
    store: Arc<AuthorizationStore>,
    apps: Arc<dyn AppSource>,
    shortcuts: Arc<dyn ShortcutRequester>,
    descriptor: String,
    managers: HashSet<Uid>,
}

impl BrokerService {
    pub fn new(
        store: Arc<AuthorizationStore>,
        apps: Arc<dyn AppSource>,
        shortcuts: Arc<dyn ShortcutRequester>,
        descriptor: impl Into<String>,
        managers: impl IntoIterator<Item = Uid>,
    ) -> Self {
        Self {
            store,
            apps,
            shortcuts,
            descriptor: descriptor.into(),
            managers: managers.into_iter().collect(),
        }
    }

    fn is_admin(&self, uid: Uid) -> bool {
        uid.is_implicitly_allowed() || self.managers.contains(&uid)
    }

    fn require_admin(&self, operation: &str, caller: &CallContext) -> Result<()> {
        if self.is_admin(caller.uid) {
            Ok(())
        } else {
            Err(Error::permission_denied(
                operation,
                format!("uid {} is not a manager", caller.uid),
            ))
        }
    }

    fn require_allowed(&self, operation: &str, caller: &CallContext) -> Result<()> {
        if self.is_admin(caller.uid) {
            return Ok(());
        }
        match self.store.resolve(caller.uid) {
            Some(entry) if entry.is_allowed() => Ok(()),
            _ => Err(Error::permission_denied(
                operation,
                format!("uid {} is not allowed", caller.uid),
            )),
        }
    }

    /// Applications merged with their authorization entries.
    pub fn applications(&self, user_id: i32, only_filtered: bool) -> Result<Vec<AppInfo>> {
        let default_flags = self.store.default_permission_flags();
        let apps = self
            .apps
            .installed_apps(user_id)?
            .into_iter()
            .filter(|app| !only_filtered || app.requests_capability)
            .map(|app| AppInfo {
                flags: self
                    .store
                    .resolve_explicit(app.uid)
                    .map_or(0, |entry| entry.flags),
                default_flags,
                package_name: app.package_name,
                uid: app.uid,
                user_id: app.user_id,
                label: app.label,
            })
            .collect();
        Ok(apps)
    }

    /// Give every application without a permission decision `target_mode`.
    /// Returns how many entries changed.
    pub fn batch_update_unconfigured(&self, target_mode: u32) -> Result<usize> {
        let mut seen = HashSet::new();
        let mut changed = 0;
        for app in self.apps.installed_apps(-1)? {
            if !seen.insert(app.uid) {
                continue;
            }
            let explicit = self
                .store
                .resolve_explicit(app.uid)
                .map_or(0, |entry| entry.flags);
            if explicit & MASK_PERMISSION != 0 {
                continue;
            }
            if self
                .store
                .update(app.uid, MASK_PERMISSION, target_mode)
                .changed()
            {
                changed += 1;
            }
        }
        info!(changed, mode = target_mode, "unconfigured applications updated");
        Ok(changed)
    }

    fn dispatch(
        &self,
        code: u32,
        data: &mut Parcel,
        reply: &mut Parcel,
        caller: &CallContext,
    ) -> Result<()> {
        match code {
            OP_GET_APPLICATIONS => {
                self.require_admin("get-applications", caller)?;
                let user_id = data.read_i32()?;
                let only_filtered = data.read_bool()?;
                let apps = self.applications(user_id, only_filtered)?;
                let blob = bincode::serialize(&apps)?;
                reply.write_no_exception();
                reply.write_blob(blob);
            }
            OP_REQUEST_PINNED_SHORTCUT => {
                self.require_admin("request-pinned-shortcut", caller)?;
                self.shortcuts.request_pinned_shortcut()?;
                reply.write_no_exception();
            }
            OP_BATCH_UPDATE_UNCONFIGURED => {
                self.require_admin("batch-update-unconfigured", caller)?;
                let mode = data.read_u32()?;
                self.batch_update_unconfigured(mode)?;
                reply.write_no_exception();
            }
            OP_GET_GLOBAL_SETTINGS => {
                self.require_allowed("get-global-settings", caller)?;
                reply.write_no_exception();
                reply.write_u32(self.store.global_settings());
            }
            OP_SET_GLOBAL_SETTINGS => {
                self.require_admin("set-global-settings", caller)?;
                let flags = data.read_u32()?;
                self.store.set_global_settings(flags);
                reply.write_no_exception();
            }
            other => {
                return Err(Error::protocol(format!("unknown broker operation {other}")));
            }
        }
        Ok(())
    }
}

fn operation_name(code: u32) -> Option<&'static str> {
    match code {
        OP_GET_APPLICATIONS => Some("get-applications"),
        OP_REQUEST_PINNED_SHORTCUT => Some("request-pinned-shortcut"),
        OP_BATCH_UPDATE_UNCONFIGURED => Some("batch-update-unconfigured"),
        OP_GET_GLOBAL_SETTINGS => Some("get-global-settings"),
        OP_SET_GLOBAL_SETTINGS => Some("set-global-settings"),
        _ => None,
    }
}

impl TransactHandler for BrokerService {
    fn on_transact(
        &self,
        code: u32,
        data: &mut Parcel,
        reply: &mut Parcel,
        caller: CallContext,
    ) -> Result<bool> {
        let Some(operation) = operation_name(code) else {
            return Ok(false);
        };
        let span = dispatch_span(operation, caller.uid.as_raw());
        let _enter = span.enter();

        data.enforce_interface(&self.descriptor)?;
        let mut body = Parcel::new();
        match self.dispatch(code, data, &mut body, &caller) {
            Ok(()) => {
                debug!("broker call completed");
                *reply = body;
            }
            Err(e) => {
                warn!("broker call refused: {e}");
                reply.write_exception(e.to_string());
            }
        }
        Ok(true)
    }
}
