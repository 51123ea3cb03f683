//! Wiring for a broker process.
//!
//! [`BrokerRuntime::start`] opens the authorization table, exports the
//! broker handler, and starts the publisher. After each successful
//! publication the surface is told that the broker is ready and receives the
//! current hidden identity set.

use crate::dispatch::{AppSource, BrokerService, ShortcutRequester};
use crate::protocol::RendezvousChannel;
use crate::publisher::{
    BrokerPublisher, CommandRestartSignal, PublisherHandle, PublisherObserver, PublisherState,
    PublisherWatch, RestartSignal,
};
use capbridge_core::{BridgeConfig, Error, Result, Uid, FLAG_HIDDEN, MASK_ALL};
use capbridge_store::{AuthorizationStore, PermissionBackend, SqliteBackend, UpdateOutcome};
use capbridge_transport::{Handle, ObjectHost, ServiceRegistry};
use capbridge_utils::{Clock, SystemClock};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// External collaborators of a broker process.
pub struct BrokerEnvironment {
    pub registry: Arc<dyn ServiceRegistry>,
    pub host: Arc<dyn ObjectHost>,
    pub apps: Arc<dyn AppSource>,
    pub shortcuts: Arc<dyn ShortcutRequester>,
    /// Defaults to running the configured restart command.
    pub restart: Option<Arc<dyn RestartSignal>>,
    /// Defaults to the system clock.
    pub clock: Option<Arc<dyn Clock>>,
}

struct ReadyNotifier {
    channel: Arc<RendezvousChannel>,
    store: Arc<AuthorizationStore>,
}

impl ReadyNotifier {
    fn sync_hidden(&self, surface: &Handle) -> Result<()> {
        let hidden = self.store.hidden_identities();
        self.channel.sync_hidden_set(surface, &hidden)?;
        debug!(count = hidden.len(), "hidden identity set synced");
        Ok(())
    }
}

impl PublisherObserver for ReadyNotifier {
    fn on_host_restarted(&self) {
        info!("host restarted, republishing");
    }

    fn on_publish_result(&self, surface: &Handle, success: bool) {
        if !success {
            return;
        }
        if let Err(e) = self.channel.notify_finished(surface) {
            warn!("failed to notify the surface: {e}");
        }
        if let Err(e) = self.sync_hidden(surface) {
            warn!("failed to sync hidden identities: {e}");
        }
    }
}

/// A running broker.
pub struct BrokerRuntime {
    store: Arc<AuthorizationStore>,
    notifier: Arc<ReadyNotifier>,
    broker: Handle,
    publisher: Mutex<Option<PublisherHandle>>,
    watch: PublisherWatch,
}

impl BrokerRuntime {
    /// Validate `config`, load the table at `config.database_path` and start
    /// publishing.
    pub fn start(config: &BridgeConfig, env: BrokerEnvironment) -> Result<Self> {
        let backend: Arc<dyn PermissionBackend> =
            Arc::new(SqliteBackend::new(&config.database_path));
        Self::start_with_backend(config, env, backend)
    }

    pub fn start_with_backend(
        config: &BridgeConfig,
        env: BrokerEnvironment,
        backend: Arc<dyn PermissionBackend>,
    ) -> Result<Self> {
        config.validate()?;
        let store = Arc::new(AuthorizationStore::load(backend));

        let service = BrokerService::new(
            Arc::clone(&store),
            env.apps,
            env.shortcuts,
            config.broker_descriptor.clone(),
            config.manager_uids.iter().copied(),
        );
        let broker = env.host.export(Arc::new(service))?;

        let channel = Arc::new(RendezvousChannel::new(env.registry, &config.surface)?);
        let notifier = Arc::new(ReadyNotifier {
            channel: Arc::clone(&channel),
            store: Arc::clone(&store),
        });
        let restart = env.restart.unwrap_or_else(|| {
            Arc::new(CommandRestartSignal::new(
                config.publisher.restart_command.clone(),
            )) as Arc<dyn RestartSignal>
        });
        let clock = env.clock.unwrap_or_else(SystemClock::shared);

        let publisher = BrokerPublisher::new(
            channel,
            broker.clone(),
            Arc::clone(&notifier) as Arc<dyn PublisherObserver>,
            restart,
            clock,
            &config.publisher,
        )
        .spawn()?;

        info!(
            database = %config.database_path.display(),
            entries = store.len(),
            "broker started"
        );
        Ok(Self {
            store,
            notifier,
            broker,
            watch: publisher.watch(),
            publisher: Mutex::new(Some(publisher)),
        })
    }

    pub fn store(&self) -> &Arc<AuthorizationStore> {
        &self.store
    }

    pub fn broker_handle(&self) -> &Handle {
        &self.broker
    }

    /// Masked update through the administrative surface. A change to the
    /// hidden bit is pushed to the surface right away.
    pub fn update(&self, uid: Uid, mask: u32, values: u32) -> UpdateOutcome {
        let outcome = self.store.update(uid, mask, values);
        let hidden_before = outcome.previous().unwrap_or(0) & FLAG_HIDDEN;
        let hidden_after = outcome.current().unwrap_or(0) & FLAG_HIDDEN;
        if outcome.changed() && hidden_before != hidden_after {
            if let Err(e) = self.sync_hidden_set() {
                warn!(%uid, "hidden identity change not pushed: {e}");
            }
        }
        outcome
    }

    pub fn remove(&self, uid: Uid) -> bool {
        self.update(uid, MASK_ALL, 0).changed()
    }

    /// Push the current hidden identity set to the surface.
    pub fn sync_hidden_set(&self) -> Result<()> {
        let surface = self
            .notifier
            .channel
            .surface()
            .ok_or_else(|| Error::service_unavailable(self.notifier.channel.service_name()))?;
        self.notifier.sync_hidden(&surface)
    }

    pub fn publisher_state(&self) -> PublisherState {
        self.watch.state()
    }

    /// Block until the publisher reaches `state`, for at most `timeout`.
    /// Does not hold up a concurrent [`shutdown`](Self::shutdown).
    pub fn wait_for_state(&self, state: PublisherState, timeout: Duration) -> bool {
        self.watch.wait_for(state, timeout)
    }

    /// Stop publishing. The exported broker handle stays valid for callers
    /// that already hold it.
    pub fn shutdown(&self) {
        let publisher = self.publisher.lock().take();
        if let Some(publisher) = publisher {
            publisher.stop();
        }
    }
}

impl Drop for BrokerRuntime {
    fn drop(&mut self) {
        self.shutdown();
    }
}
