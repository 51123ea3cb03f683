//! In-process transport.
//!
//! Objects live in the current process and calls are plain function calls.
//! The caller identity seen by handlers defaults to the current process and
//! can be overridden per thread with [`with_caller`]. Death is simulated with
//! [`LocalObject::kill`].

use crate::binder::{
    Binder, CallContext, DeathCallback, DeathSubscription, Handle, ObjectHost, TransactHandler,
};
use crate::parcel::Parcel;
use crate::registry::ServiceRegistry;
use capbridge_core::{Error, Result};
use parking_lot::{Mutex, RwLock};
use std::cell::Cell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

thread_local! {
    static CALLER: Cell<Option<CallContext>> = const { Cell::new(None) };
}

struct RestoreCaller(Option<CallContext>);

impl Drop for RestoreCaller {
    fn drop(&mut self) {
        CALLER.with(|cell| cell.set(self.0));
    }
}

/// Run `f` with every local call on this thread attributed to `caller`.
pub fn with_caller<R>(caller: CallContext, f: impl FnOnce() -> R) -> R {
    let previous = CALLER.with(|cell| cell.replace(Some(caller)));
    let _restore = RestoreCaller(previous);
    f()
}

fn current_caller() -> CallContext {
    CALLER
        .with(|cell| cell.get())
        .unwrap_or_else(CallContext::current_process)
}

#[derive(Default)]
struct Recipients {
    next_id: u64,
    callbacks: HashMap<u64, DeathCallback>,
}

/// An object served from this process.
pub struct LocalObject {
    handler: Arc<dyn TransactHandler>,
    alive: AtomicBool,
    recipients: Arc<Mutex<Recipients>>,
}

impl LocalObject {
    pub fn new(handler: Arc<dyn TransactHandler>) -> Arc<Self> {
        Arc::new(Self {
            handler,
            alive: AtomicBool::new(true),
            recipients: Arc::new(Mutex::new(Recipients::default())),
        })
    }

    pub fn handle(self: &Arc<Self>) -> Handle {
        Handle::new(Arc::clone(self) as Arc<dyn Binder>)
    }

    /// Mark the object dead and notify every subscriber, outside any lock.
    pub fn kill(&self) {
        let callbacks: Vec<DeathCallback> = {
            let mut recipients = self.recipients.lock();
            if !self.alive.swap(false, Ordering::SeqCst) {
                return;
            }
            recipients.callbacks.drain().map(|(_, callback)| callback).collect()
        };
        tracing::debug!(subscribers = callbacks.len(), "local object died");
        for callback in callbacks {
            callback();
        }
    }

    /// Number of live death subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.recipients.lock().callbacks.len()
    }
}

impl Binder for LocalObject {
    fn transact(&self, code: u32, data: &mut Parcel, reply: &mut Parcel) -> Result<bool> {
        if !self.alive.load(Ordering::SeqCst) {
            return Err(Error::dead_object(format!("transact {code:#x}")));
        }
        self.handler.on_transact(code, data, reply, current_caller())
    }

    fn ping(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    fn link_to_death(&self, callback: DeathCallback) -> Result<DeathSubscription> {
        let id = {
            let mut recipients = self.recipients.lock();
            // Checked under the lock so a concurrent kill either sees this
            // callback or makes the link fail.
            if !self.alive.load(Ordering::SeqCst) {
                return Err(Error::dead_object("link_to_death"));
            }
            let id = recipients.next_id;
            recipients.next_id += 1;
            recipients.callbacks.insert(id, callback);
            id
        };
        let recipients: Weak<Mutex<Recipients>> = Arc::downgrade(&self.recipients);
        Ok(DeathSubscription::new(move || {
            if let Some(recipients) = recipients.upgrade() {
                recipients.lock().callbacks.remove(&id);
            }
        }))
    }
}

/// Exports handlers as [`LocalObject`]s.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalHost;

impl ObjectHost for LocalHost {
    fn export(&self, handler: Arc<dyn TransactHandler>) -> Result<Handle> {
        Ok(LocalObject::new(handler).handle())
    }
}

/// In-process service registry.
#[derive(Default)]
pub struct LocalRegistry {
    services: RwLock<HashMap<String, Handle>>,
}

impl LocalRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_service(&self, name: impl Into<String>, handle: Handle) {
        self.services.write().insert(name.into(), handle);
    }

    pub fn remove_service(&self, name: &str) -> Option<Handle> {
        self.services.write().remove(name)
    }
}

impl ServiceRegistry for LocalRegistry {
    fn get_service(&self, name: &str) -> Option<Handle> {
        self.services.read().get(name).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use capbridge_core::Uid;
    use std::sync::atomic::AtomicUsize;

    struct Echo;

    impl TransactHandler for Echo {
        fn on_transact(
            &self,
            code: u32,
            data: &mut Parcel,
            reply: &mut Parcel,
            caller: CallContext,
        ) -> Result<bool> {
            if code != 1 {
                return Ok(false);
            }
            let value = data.read_i32()?;
            reply.write_no_exception();
            reply.write_i32(value);
            reply.write_i32(caller.uid.as_raw());
            Ok(true)
        }
    }

    #[test]
    fn test_transact_and_caller_override() {
        let object = LocalObject::new(Arc::new(Echo));
        let handle = object.handle();

        let mut data = Parcel::new();
        data.write_i32(42);
        let mut reply = Parcel::new();
        let handled = with_caller(CallContext::new(10_077, 1), || {
            handle.transact(1, &mut data, &mut reply)
        })
        .unwrap();

        assert!(handled);
        reply.read_exception().unwrap();
        assert_eq!(reply.read_i32().unwrap(), 42);
        assert_eq!(reply.read_i32().unwrap(), 10_077);
        assert_ne!(current_caller().uid, Uid(10_077));
    }

    #[test]
    fn test_unknown_code_is_not_handled() {
        let handle = LocalObject::new(Arc::new(Echo)).handle();
        let handled = handle
            .transact(99, &mut Parcel::new(), &mut Parcel::new())
            .unwrap();
        assert!(!handled);
    }

    #[test]
    fn test_kill_notifies_and_blocks_calls() {
        let object = LocalObject::new(Arc::new(Echo));
        let handle = object.handle();
        let deaths = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&deaths);
        let _subscription = handle
            .link_to_death(Arc::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();

        object.kill();
        object.kill();

        assert_eq!(deaths.load(Ordering::SeqCst), 1);
        assert!(!handle.ping());
        assert!(matches!(
            handle.transact(1, &mut Parcel::new(), &mut Parcel::new()),
            Err(Error::DeadObject { .. })
        ));
        assert!(handle.link_to_death(Arc::new(|| {})).is_err());
    }

    #[test]
    fn test_cancelled_subscription_is_not_notified() {
        let object = LocalObject::new(Arc::new(Echo));
        let deaths = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&deaths);
        let subscription = object
            .link_to_death(Arc::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();
        assert_eq!(object.subscriber_count(), 1);

        drop(subscription);
        assert_eq!(object.subscriber_count(), 0);
        object.kill();
        assert_eq!(deaths.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_registry_and_handle_identity() {
        let registry = LocalRegistry::new();
        let object = LocalObject::new(Arc::new(Echo));
        registry.add_service("activity", object.handle());

        let found = registry.get_service("activity").unwrap();
        assert_eq!(found, object.handle());
        assert!(registry.get_service("package").is_none());

        let other = LocalHost.export(Arc::new(Echo)).unwrap();
        assert_ne!(found, other);
        assert!(registry.remove_service("activity").is_some());
        assert!(registry.get_service("activity").is_none());
    }
}
