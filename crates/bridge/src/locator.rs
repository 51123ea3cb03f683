//! Client-side resolution of the broker handle.

use crate::protocol::RendezvousChannel;
use capbridge_core::{Error, LocatorSettings, Result};
use capbridge_transport::{DeathSubscription, Handle};
use capbridge_utils::{retry, Clock, RetryConfig};
use parking_lot::{Mutex, RwLock};
use std::sync::{Arc, Weak};
use tracing::{debug, info, warn};

/// Called after the cached handle was dropped, outside any locator lock.
pub type InvalidationListener = Arc<dyn Fn() + Send + Sync>;

#[derive(Default)]
struct Cache {
    handle: Option<Handle>,
    subscription: Option<DeathSubscription>,
    generation: u64,
}

type Listeners = RwLock<Vec<InvalidationListener>>;

/// Retrieves the broker handle through the surface and caches it until it
/// dies or is invalidated.
///
/// Resolution runs with the cache lock held, so concurrent callers wait for
/// and share a single resolution.
pub struct HandleLocator {
    channel: Arc<RendezvousChannel>,
    clock: Arc<dyn Clock>,
    retry: RetryConfig,
    cache: Arc<Mutex<Cache>>,
    listeners: Arc<Listeners>,
}

impl HandleLocator {
    pub fn new(
        channel: Arc<RendezvousChannel>,
        clock: Arc<dyn Clock>,
        settings: &LocatorSettings,
    ) -> Self {
        Self {
            channel,
            clock,
            retry: RetryConfig::for_locator(settings),
            cache: Arc::new(Mutex::new(Cache::default())),
            listeners: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// The broker handle, resolving it when nothing live is cached.
    pub fn get_service(&self) -> Result<Handle> {
        let mut cache = self.cache.lock();
        if let Some(handle) = cache.handle.as_ref().filter(|handle| handle.is_alive()) {
            return Ok(handle.clone());
        }
        cache.handle = None;
        cache.subscription = None;

        cache.generation += 1;
        let generation = cache.generation;
        let resolved = retry(&self.retry, self.clock.as_ref(), "resolve broker handle", |_| {
            let handle = self.channel.get_handle()?;
            let subscription = handle.link_to_death(self.death_callback(generation))?;
            Ok((handle, subscription))
        });

        match resolved {
            Ok((handle, subscription)) => {
                info!(generation, "broker handle resolved");
                cache.handle = Some(handle.clone());
                cache.subscription = Some(subscription);
                Ok(handle)
            }
            Err(e) => {
                warn!(attempts = self.retry.max_attempts, "broker handle unavailable: {e}");
                Err(Error::service_unavailable("broker"))
            }
        }
    }

    /// The cached handle, without resolving.
    pub fn cached(&self) -> Option<Handle> {
        self.cache.lock().handle.clone()
    }

    /// Drop the cached handle. The next [`get_service`](Self::get_service)
    /// resolves again.
    pub fn invalidate(&self) {
        let subscription = {
            let mut cache = self.cache.lock();
            if cache.handle.is_none() {
                return;
            }
            cache.generation += 1;
            cache.handle = None;
            cache.subscription.take()
        };
        drop(subscription);
        debug!("broker handle invalidated");
        notify(&self.listeners);
    }

    pub fn add_invalidation_listener(&self, listener: InvalidationListener) {
        self.listeners.write().push(listener);
    }

    fn death_callback(&self, generation: u64) -> capbridge_transport::DeathCallback {
        let cache: Weak<Mutex<Cache>> = Arc::downgrade(&self.cache);
        let listeners: Weak<Listeners> = Arc::downgrade(&self.listeners);
        Arc::new(move || {
            let Some(cache) = cache.upgrade() else { return };
            let subscription = {
                let mut cache = cache.lock();
                if cache.generation != generation {
                    return;
                }
                cache.handle = None;
                cache.subscription.take()
            };
            drop(subscription);
            info!(generation, "broker handle died");
            if let Some(listeners) = listeners.upgrade() {
                notify(&listeners);
            }
        })
    }
}

fn notify(listeners: &Listeners) {
    let listeners: Vec<InvalidationListener> = listeners.read().clone();
    for listener in listeners {
        listener();
    }
}
