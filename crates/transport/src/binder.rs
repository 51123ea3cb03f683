//! Remotely callable objects and the references that point at them.

use crate::parcel::Parcel;
use capbridge_core::{Result, Uid};
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

/// Invoked once when the object behind a handle dies.
pub type DeathCallback = Arc<dyn Fn() + Send + Sync>;

/// A remotely callable object.
///
/// Implementations are owned by exactly one process; every other holder has a
/// borrowed reference that stops working when the owner dies.
pub trait Binder: Send + Sync {
    /// Deliver `data` under `code` and let the remote side fill `reply`.
    ///
    /// `Ok(false)` means the remote side did not recognise `code`; `Err` means
    /// the call could not be delivered (dead object, transport failure).
    fn transact(&self, code: u32, data: &mut Parcel, reply: &mut Parcel) -> Result<bool>;

    /// Round-trip liveness probe.
    fn ping(&self) -> bool;

    /// Locally known liveness, without a round trip.
    fn is_alive(&self) -> bool;

    /// Subscribe `callback` to the death of this object. Dropping the returned
    /// subscription cancels it.
    fn link_to_death(&self, callback: DeathCallback) -> Result<DeathSubscription>;
}

/// Shared reference to a [`Binder`]. Two handles are equal when they point
/// at the same object.
#[derive(Clone)]
pub struct Handle(Arc<dyn Binder>);

impl Handle {
    pub fn new(binder: Arc<dyn Binder>) -> Self {
        Self(binder)
    }

    pub fn same_object(&self, other: &Handle) -> bool {
        Arc::as_ptr(&self.0) as *const () == Arc::as_ptr(&other.0) as *const ()
    }
}

impl Deref for Handle {
    type Target = dyn Binder;

    fn deref(&self) -> &Self::Target {
        self.0.as_ref()
    }
}

impl PartialEq for Handle {
    fn eq(&self, other: &Self) -> bool {
        self.same_object(other)
    }
}

impl Eq for Handle {}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handle({:p})", Arc::as_ptr(&self.0) as *const ())
    }
}

/// A cancellable death-notification registration.
pub struct DeathSubscription {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl DeathSubscription {
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// A subscription with nothing to cancel.
    pub fn detached() -> Self {
        Self { cancel: None }
    }

    /// Unregister the callback. Equivalent to dropping the subscription.
    pub fn cancel(mut self) {
        self.run_cancel();
    }

    fn run_cancel(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for DeathSubscription {
    fn drop(&mut self) {
        self.run_cancel();
    }
}

impl fmt::Debug for DeathSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeathSubscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

/// Identity of the process on the other end of an inbound call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallContext {
    pub uid: Uid,
    pub pid: i32,
}

impl CallContext {
    pub fn new(uid: impl Into<Uid>, pid: i32) -> Self {
        Self {
            uid: uid.into(),
            pid,
        }
    }

    /// The identity of the current process.
    #[cfg(unix)]
    pub fn current_process() -> Self {
        // SAFETY: getuid and getpid have no preconditions and cannot fail.
        let (uid, pid) = unsafe { (libc::getuid(), libc::getpid()) };
        Self::new(Uid(uid as i32), pid)
    }

    #[cfg(not(unix))]
    pub fn current_process() -> Self {
        Self::new(Uid::ROOT, std::process::id() as i32)
    }
}

/// Serving side of a [`Binder`].
pub trait TransactHandler: Send + Sync {
    /// Handle one inbound call. Returning `Ok(false)` reports `code` as unknown.
    fn on_transact(
        &self,
        code: u32,
        data: &mut Parcel,
        reply: &mut Parcel,
        caller: CallContext,
    ) -> Result<bool>;
}

/// Turns a local handler into a handle other processes can call.
pub trait ObjectHost: Send + Sync {
    fn export(&self, handler: Arc<dyn TransactHandler>) -> Result<Handle>;
}
