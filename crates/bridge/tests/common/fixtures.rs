use capbridge_bridge::{
    AppSource, BridgeAction, InstalledApp, PublisherObserver, RestartSignal, RendezvousSurface,
    ShortcutRequester,
};
use capbridge_core::{Result, SurfaceSettings, Uid};
use capbridge_transport::local::{LocalObject, LocalRegistry};
use capbridge_transport::{
    CallContext, Handle, ObjectHost, Parcel, ServiceRegistry, TransactHandler,
};
use capbridge_utils::{Clock, ManualClock};
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub const WAIT: Duration = Duration::from_secs(10);

/// Wraps a surface handler and records every bridge verb it receives.
pub struct RecordingSurface {
    pub inner: Arc<RendezvousSurface>,
    code: u32,
    reject_sends: bool,
    verbs: Mutex<Vec<BridgeAction>>,
}

impl RecordingSurface {
    pub fn new() -> Arc<Self> {
        Self::build(false)
    }

    /// A surface that refuses every send-handle call.
    pub fn rejecting() -> Arc<Self> {
        Self::build(true)
    }

    fn build(reject_sends: bool) -> Arc<Self> {
        let settings = SurfaceSettings::default();
        Arc::new(Self {
            inner: Arc::new(RendezvousSurface::new(&settings).unwrap()),
            code: settings.transaction_code().unwrap(),
            reject_sends,
            verbs: Mutex::new(Vec::new()),
        })
    }

    pub fn verbs(&self) -> Vec<BridgeAction> {
        self.verbs.lock().clone()
    }

    pub fn count(&self, action: BridgeAction) -> usize {
        self.verbs.lock().iter().filter(|verb| **verb == action).count()
    }
}

impl TransactHandler for RecordingSurface {
    fn on_transact(
        &self,
        code: u32,
        data: &mut Parcel,
        reply: &mut Parcel,
        caller: CallContext,
    ) -> Result<bool> {
        if code == self.code {
            data.enforce_interface(&SurfaceSettings::default().descriptor)?;
            let action = BridgeAction::from_raw(data.read_i32()?).unwrap();
            data.rewind();
            self.verbs.lock().push(action);
            if self.reject_sends && action == BridgeAction::SendHandle {
                reply.write_exception("publication refused");
                return Ok(true);
            }
        }
        self.inner.on_transact(code, data, reply, caller)
    }
}

/// A registry whose surface only appears once the clock reaches `appear_at`.
pub struct ScriptedRegistry {
    clock: Arc<ManualClock>,
    appear_at: Duration,
    inner: LocalRegistry,
}

impl ScriptedRegistry {
    pub fn new(clock: Arc<ManualClock>, appear_at: Duration) -> Self {
        Self {
            clock,
            appear_at,
            inner: LocalRegistry::new(),
        }
    }

    pub fn add_service(&self, name: &str, handle: Handle) {
        self.inner.add_service(name, handle);
    }
}

impl ServiceRegistry for ScriptedRegistry {
    fn get_service(&self, name: &str) -> Option<Handle> {
        if self.clock.now() < self.appear_at {
            return None;
        }
        self.inner.get_service(name)
    }
}

/// Records publisher callbacks and the simulated time they happened at.
pub struct RecordingObserver {
    clock: Arc<ManualClock>,
    results: Mutex<Vec<(bool, Duration)>>,
    changed: Condvar,
    pub restarts: AtomicUsize,
}

impl RecordingObserver {
    pub fn new(clock: Arc<ManualClock>) -> Arc<Self> {
        Arc::new(Self {
            clock,
            results: Mutex::new(Vec::new()),
            changed: Condvar::new(),
            restarts: AtomicUsize::new(0),
        })
    }

    pub fn results(&self) -> Vec<(bool, Duration)> {
        self.results.lock().clone()
    }

    /// Wait, in real time, until at least `count` results were recorded.
    pub fn wait_for_results(&self, count: usize) -> Vec<(bool, Duration)> {
        let deadline = Instant::now() + WAIT;
        let mut results = self.results.lock();
        while results.len() < count {
            if self.changed.wait_until(&mut results, deadline).timed_out() {
                break;
            }
        }
        results.clone()
    }
}

impl PublisherObserver for RecordingObserver {
    fn on_host_restarted(&self) {
        self.restarts.fetch_add(1, Ordering::SeqCst);
    }

    fn on_publish_result(&self, _surface: &Handle, success: bool) {
        self.results.lock().push((success, self.clock.now()));
        self.changed.notify_all();
    }
}

/// Counts restart requests and runs an optional hook for each.
pub struct CountingRestart {
    pub count: AtomicUsize,
    hook: Mutex<Option<Box<dyn Fn() + Send>>>,
}

impl CountingRestart {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            count: AtomicUsize::new(0),
            hook: Mutex::new(None),
        })
    }

    pub fn on_restart(&self, hook: impl Fn() + Send + 'static) {
        *self.hook.lock() = Some(Box::new(hook));
    }

    pub fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }
}

impl RestartSignal for CountingRestart {
    fn restart_host(&self) -> Result<()> {
        self.count.fetch_add(1, Ordering::SeqCst);
        if let Some(hook) = self.hook.lock().as_ref() {
            hook();
        }
        Ok(())
    }
}

/// Exports local objects and keeps them reachable so tests can kill them.
#[derive(Default)]
pub struct TrackingHost {
    objects: Mutex<Vec<Arc<LocalObject>>>,
}

impl TrackingHost {
    pub fn last(&self) -> Arc<LocalObject> {
        Arc::clone(self.objects.lock().last().unwrap())
    }
}

impl ObjectHost for TrackingHost {
    fn export(&self, handler: Arc<dyn TransactHandler>) -> Result<Handle> {
        let object = LocalObject::new(handler);
        let handle = object.handle();
        self.objects.lock().push(object);
        Ok(handle)
    }
}

pub struct StaticApps(pub Vec<InstalledApp>);

impl AppSource for StaticApps {
    fn installed_apps(&self, user_id: i32) -> Result<Vec<InstalledApp>> {
        Ok(self
            .0
            .iter()
            .filter(|app| user_id == -1 || app.user_id == user_id)
            .cloned()
            .collect())
    }
}

pub struct CountingShortcuts(pub AtomicUsize);

impl ShortcutRequester for CountingShortcuts {
    fn request_pinned_shortcut(&self) -> Result<()> {
        self.0.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub fn installed(package: &str, uid: i32, requests_capability: bool) -> InstalledApp {
    InstalledApp {
        package_name: package.to_string(),
        uid: Uid(uid),
        user_id: uid / 100_000,
        label: Some(package.rsplit('.').next().unwrap_or(package).to_string()),
        requests_capability,
    }
}

/// Serve `surface` under the default surface name.
pub fn install_surface(registry: &LocalRegistry, surface: &Arc<RecordingSurface>) -> Arc<LocalObject> {
    let object = LocalObject::new(Arc::clone(surface) as Arc<dyn TransactHandler>);
    registry.add_service(&SurfaceSettings::default().service_name, object.handle());
    object
}

/// A handler that handles nothing; stands in for a broker object.
pub struct Inert;

impl TransactHandler for Inert {
    fn on_transact(
        &self,
        _code: u32,
        _data: &mut Parcel,
        _reply: &mut Parcel,
        _caller: CallContext,
    ) -> Result<bool> {
        Ok(false)
    }
}

/// Serve a fresh surface in place of the current one, then kill the old one.
pub fn swap_surface(
    registry: &LocalRegistry,
    current: &Mutex<Arc<LocalObject>>,
    surface: &Arc<RecordingSurface>,
) {
    let next = install_surface(registry, surface);
    let previous = std::mem::replace(&mut *current.lock(), next);
    previous.kill();
}
