//! Keeps the broker handle published on the rendezvous surface.
//!
//! The publisher owns a single thread that cycles through:
//!
//! 1. **Searching**: poll the registry until the surface is present and
//!    answers a ping.
//! 2. Link a death subscription to the surface. If that fails the surface is
//!    already gone and the cycle starts over.
//! 3. Send the broker handle, retrying with a fixed pause. The observer is
//!    told the outcome either way.
//! 4. **Published** or **Rejected**: wait for the surface to die, then go back
//!    to searching.
//!
//! When publication fails and no publication has ever succeeded, the host is
//! asked to restart, at most `escalation_quota` times per process.

use crate::protocol::RendezvousChannel;
use capbridge_core::{
    Error, PublisherSettings, Result, ABI_LIST_32_PROPERTY, ABI_LIST_64_PROPERTY,
    RESTART_TARGET_PLACEHOLDER, RESTART_TARGET_PRIMARY, RESTART_TARGET_SECONDARY,
};
use capbridge_transport::Handle;
use capbridge_utils::{retry, Clock, RetryConfig};
use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::process::Command;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Publication lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PublisherState {
    Searching,
    Published,
    /// The surface is alive but refused every attempt.
    Rejected,
    Stopped,
}

impl fmt::Display for PublisherState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Searching => "searching",
            Self::Published => "published",
            Self::Rejected => "rejected",
            Self::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Hooks called from the publisher thread.
pub trait PublisherObserver: Send + Sync {
    /// The surface came back after a previous publication.
    fn on_host_restarted(&self) {}

    /// Outcome of one publication cycle against `surface`.
    fn on_publish_result(&self, surface: &Handle, success: bool);
}

/// Asks the host process to restart.
pub trait RestartSignal: Send + Sync {
    fn restart_host(&self) -> Result<()>;
}

/// Runs a command to restart the host.
///
/// Arguments equal to `{host}` are replaced with the host service to restart:
/// the secondary one when the device runs both 64-bit and 32-bit hosts, the
/// primary one otherwise.
#[derive(Debug, Clone)]
pub struct CommandRestartSignal {
    command: Vec<String>,
}

impl CommandRestartSignal {
    pub fn new(command: Vec<String>) -> Self {
        Self { command }
    }

    fn resolved_command(&self, target: &str) -> Vec<String> {
        self.command
            .iter()
            .map(|arg| {
                if arg == RESTART_TARGET_PLACEHOLDER {
                    target.to_string()
                } else {
                    arg.clone()
                }
            })
            .collect()
    }

    fn needs_target(&self) -> bool {
        self.command.iter().any(|arg| arg == RESTART_TARGET_PLACEHOLDER)
    }
}

/// Host service to restart given which ABI families the device supports.
pub fn restart_target(has_64_bit: bool, has_32_bit: bool) -> &'static str {
    if has_64_bit && has_32_bit {
        RESTART_TARGET_SECONDARY
    } else {
        RESTART_TARGET_PRIMARY
    }
}

/// Whether the system property `name` holds a non-empty ABI list. Missing
/// tooling counts as an empty list.
fn has_abis(name: &str) -> bool {
    match Command::new("getprop").arg(name).output() {
        Ok(output) if output.status.success() => {
            !String::from_utf8_lossy(&output.stdout).trim().is_empty()
        }
        Ok(_) => false,
        Err(e) => {
            debug!(property = name, "cannot read property: {e}");
            false
        }
    }
}

impl RestartSignal for CommandRestartSignal {
    fn restart_host(&self) -> Result<()> {
        let command = if self.needs_target() {
            let target = restart_target(
                has_abis(ABI_LIST_64_PROPERTY),
                has_abis(ABI_LIST_32_PROPERTY),
            );
            info!(target, "restarting host");
            self.resolved_command(target)
        } else {
            self.command.clone()
        };
        let Some((program, args)) = command.split_first() else {
            return Err(Error::escalation("no restart command configured"));
        };
        let status = Command::new(program)
            .args(args)
            .status()
            .map_err(|e| Error::escalation(format!("failed to run {program}: {e}")))?;
        if status.success() {
            Ok(())
        } else {
            Err(Error::escalation(format!("{program} exited with {status}")))
        }
    }
}

enum Event {
    SurfaceDied { generation: u64 },
    Shutdown,
}

struct SharedState {
    state: Mutex<PublisherState>,
    changed: Condvar,
}

impl SharedState {
    fn set(&self, next: PublisherState) {
        let mut state = self.state.lock();
        if *state != next {
            debug!(from = %*state, to = %next, "publisher state changed");
            *state = next;
            self.changed.notify_all();
        }
    }
}

/// Publishes a broker handle; see the module docs.
pub struct BrokerPublisher {
    channel: Arc<RendezvousChannel>,
    broker: Handle,
    observer: Arc<dyn PublisherObserver>,
    restart: Arc<dyn RestartSignal>,
    clock: Arc<dyn Clock>,
    retry: RetryConfig,
    poll_interval: Duration,
    escalations_left: u32,
    ever_published: bool,
    shared: Arc<SharedState>,
    events_tx: Sender<Event>,
    events_rx: Receiver<Event>,
}

impl BrokerPublisher {
    pub fn new(
        channel: Arc<RendezvousChannel>,
        broker: Handle,
        observer: Arc<dyn PublisherObserver>,
        restart: Arc<dyn RestartSignal>,
        clock: Arc<dyn Clock>,
        settings: &PublisherSettings,
    ) -> Self {
        let (events_tx, events_rx) = channel::unbounded();
        Self {
            channel,
            broker,
            observer,
            restart,
            clock,
            retry: RetryConfig::for_publisher(settings),
            poll_interval: settings.poll_interval(),
            escalations_left: settings.escalation_quota,
            ever_published: false,
            shared: Arc::new(SharedState {
                state: Mutex::new(PublisherState::Searching),
                changed: Condvar::new(),
            }),
            events_tx,
            events_rx,
        }
    }

    /// Run the publisher on a dedicated thread.
    pub fn spawn(self) -> Result<PublisherHandle> {
        let shared = Arc::clone(&self.shared);
        let events = self.events_tx.clone();
        let thread = thread::Builder::new()
            .name("capbridge-publisher".to_string())
            .spawn(move || self.run())
            .map_err(|e| Error::configuration(format!("failed to spawn publisher thread: {e}")))?;
        Ok(PublisherHandle {
            shared,
            events,
            thread: Some(thread),
        })
    }

    /// Run the publisher on the current thread until stopped.
    pub fn run(mut self) {
        info!("publisher started");
        let mut generation = 0u64;

        'cycle: loop {
            self.shared.set(PublisherState::Searching);
            let Some(surface) = self.wait_for_surface() else {
                break;
            };

            generation += 1;
            let events = self.events_tx.clone();
            let cycle = generation;
            let subscription = match surface.link_to_death(Arc::new(move || {
                // The receiver outlives every cycle; a failed send means the publisher is gone.
                let _ = events.send(Event::SurfaceDied { generation: cycle });
            })) {
                Ok(subscription) => subscription,
                Err(e) => {
                    warn!("surface died before it could be watched: {e}");
                    self.clock.sleep(self.poll_interval);
                    continue;
                }
            };

            if self.ever_published {
                info!("host restarted");
                self.observer.on_host_restarted();
            }

            let success = self.publish(&surface);
            self.observer.on_publish_result(&surface, success);
            if success {
                self.ever_published = true;
                self.shared.set(PublisherState::Published);
            } else {
                self.shared.set(PublisherState::Rejected);
                self.maybe_escalate();
            }

            loop {
                match self.events_rx.recv() {
                    Ok(Event::SurfaceDied { generation: died }) if died == generation => {
                        info!(generation, "surface died, searching again");
                        drop(subscription);
                        continue 'cycle;
                    }
                    Ok(Event::SurfaceDied { generation: died }) => {
                        debug!(died, current = generation, "ignoring stale death notification");
                    }
                    Ok(Event::Shutdown) | Err(_) => break 'cycle,
                }
            }
        }

        self.shared.set(PublisherState::Stopped);
        info!("publisher stopped");
    }

    /// Returns `None` when asked to shut down while searching.
    fn wait_for_surface(&self) -> Option<Handle> {
        loop {
            while let Ok(event) = self.events_rx.try_recv() {
                if matches!(event, Event::Shutdown) {
                    return None;
                }
            }
            if let Some(surface) = self.channel.surface() {
                debug!("surface found");
                return Some(surface);
            }
            self.clock.sleep(self.poll_interval);
        }
    }

    fn publish(&self, surface: &Handle) -> bool {
        let result = retry(&self.retry, self.clock.as_ref(), "send broker handle", |attempt| {
            debug!(attempt = attempt + 1, "sending broker handle");
            self.channel.send_handle(surface, &self.broker)
        });
        match result {
            Ok(()) => {
                info!("broker handle published");
                true
            }
            Err(e) => {
                warn!(attempts = self.retry.max_attempts, "publication failed: {e}");
                false
            }
        }
    }

    fn maybe_escalate(&mut self) {
        if self.ever_published {
            debug!("not escalating, a publication has already succeeded");
            return;
        }
        if self.escalations_left == 0 {
            warn!("escalation quota exhausted, waiting for the host");
            return;
        }
        self.escalations_left -= 1;
        warn!("publication never succeeded, restarting host");
        if let Err(e) = self.restart.restart_host() {
            error!("failed to restart host: {e}");
        }
    }
}

/// Control handle for a publisher running on its own thread. Dropping it
/// stops the publisher.
pub struct PublisherHandle {
    shared: Arc<SharedState>,
    events: Sender<Event>,
    thread: Option<JoinHandle<()>>,
}

impl PublisherHandle {
    pub fn state(&self) -> PublisherState {
        self.watch().state()
    }

    /// See [`PublisherWatch::wait_for`].
    pub fn wait_for(&self, target: PublisherState, timeout: Duration) -> bool {
        self.watch().wait_for(target, timeout)
    }

    /// A detached view of the publisher state that outlives this handle.
    pub fn watch(&self) -> PublisherWatch {
        PublisherWatch {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Stop the publisher and join its thread. A publisher in the middle of a
    /// publication cycle stops once the cycle completes.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };
        let _ = self.events.send(Event::Shutdown);
        if thread.join().is_err() {
            error!("publisher thread panicked");
        }
    }
}

/// Read-only view of a publisher's state.
#[derive(Clone)]
pub struct PublisherWatch {
    shared: Arc<SharedState>,
}

impl PublisherWatch {
    pub fn state(&self) -> PublisherState {
        *self.shared.state.lock()
    }

    /// Block until the publisher reaches `target` or `timeout` of real time
    /// passes. A stopped publisher never moves again, so waiting for any other
    /// state returns `false` as soon as it stops.
    pub fn wait_for(&self, target: PublisherState, timeout: Duration) -> bool {
        let mut state = self.shared.state.lock();
        let deadline = std::time::Instant::now() + timeout;
        while *state != target {
            if *state == PublisherState::Stopped {
                return false;
            }
            if self.shared.changed.wait_until(&mut state, deadline).timed_out() {
                return *state == target;
            }
        }
        true
    }
}

impl Drop for PublisherHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_restart_signal_reports_status() {
        let ok = CommandRestartSignal::new(vec!["true".to_string()]);
        assert!(ok.restart_host().is_ok());

        let failing = CommandRestartSignal::new(vec!["false".to_string()]);
        assert!(matches!(
            failing.restart_host(),
            Err(Error::Escalation { .. })
        ));

        let empty = CommandRestartSignal::new(Vec::new());
        assert!(empty.restart_host().is_err());
    }

    #[test]
    fn test_restart_target_follows_abi_support() {
        assert_eq!(restart_target(true, true), "zygote_secondary");
        assert_eq!(restart_target(true, false), "zygote");
        assert_eq!(restart_target(false, true), "zygote");
        assert_eq!(restart_target(false, false), "zygote");
    }

    #[test]
    fn test_default_command_substitutes_the_target() {
        let signal = CommandRestartSignal::new(PublisherSettings::default().restart_command);
        assert!(signal.needs_target());
        assert_eq!(
            signal.resolved_command("zygote_secondary"),
            vec!["setprop", "ctl.restart", "zygote_secondary"]
        );

        let fixed = CommandRestartSignal::new(vec!["true".to_string()]);
        assert!(!fixed.needs_target());
    }

    #[test]
    fn test_state_display() {
        assert_eq!(PublisherState::Searching.to_string(), "searching");
        assert_eq!(PublisherState::Rejected.to_string(), "rejected");
    }
}
