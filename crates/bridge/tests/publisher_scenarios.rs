mod common;

use capbridge_bridge::{BridgeAction, BrokerPublisher, PublisherHandle, PublisherState, RendezvousChannel};
use capbridge_core::{PublisherSettings, SurfaceSettings};
use capbridge_transport::local::{LocalObject, LocalRegistry};
use capbridge_transport::ServiceRegistry;
use capbridge_utils::{Clock, ManualClock};
use common::*;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

fn start_publisher(
    registry: Arc<dyn ServiceRegistry>,
    clock: &Arc<ManualClock>,
    observer: &Arc<RecordingObserver>,
    restart: &Arc<CountingRestart>,
) -> PublisherHandle {
    let channel = Arc::new(RendezvousChannel::new(registry, &SurfaceSettings::default()).unwrap());
    let broker = LocalObject::new(Arc::new(Inert)).handle();
    BrokerPublisher::new(
        channel,
        broker,
        Arc::clone(observer) as _,
        Arc::clone(restart) as _,
        Arc::clone(clock) as Arc<dyn Clock>,
        &PublisherSettings::default(),
    )
    .spawn()
    .unwrap()
}

#[test]
fn test_publishes_within_one_poll_after_surface_appears() {
    let clock = Arc::new(ManualClock::new());
    let registry = Arc::new(ScriptedRegistry::new(Arc::clone(&clock), Duration::from_secs(10)));
    let surface = RecordingSurface::new();
    let object = LocalObject::new(Arc::clone(&surface) as _);
    registry.add_service(&SurfaceSettings::default().service_name, object.handle());

    let observer = RecordingObserver::new(Arc::clone(&clock));
    let restart = CountingRestart::new();
    let publisher = start_publisher(Arc::clone(&registry) as _, &clock, &observer, &restart);

    assert!(publisher.wait_for(PublisherState::Published, WAIT));
    let results = observer.results();
    assert_eq!(results.len(), 1);
    let (success, at) = results[0];
    assert!(success);
    assert!(at >= Duration::from_secs(10));
    assert!(at <= Duration::from_secs(11));
    assert_eq!(surface.count(BridgeAction::SendHandle), 1);
    assert!(surface.inner.broker_handle().is_some());
    assert_eq!(restart.count(), 0);

    publisher.stop();
}

#[test]
fn test_escalates_once_when_never_published() {
    let clock = Arc::new(ManualClock::new());
    let registry = Arc::new(LocalRegistry::new());
    let first = RecordingSurface::rejecting();
    let current = Arc::new(Mutex::new(install_surface(&registry, &first)));

    let observer = RecordingObserver::new(Arc::clone(&clock));
    let restart = CountingRestart::new();
    {
        let registry = Arc::clone(&registry);
        let current = Arc::clone(&current);
        restart.on_restart(move || {
            swap_surface(&registry, &current, &RecordingSurface::rejecting());
        });
    }
    let publisher = start_publisher(Arc::clone(&registry) as _, &clock, &observer, &restart);

    let results = observer.wait_for_results(2);
    assert_eq!(results.len(), 2);
    assert!(publisher.wait_for(PublisherState::Rejected, WAIT));

    // The host restarts on its own once more; no further escalation.
    swap_surface(&registry, &current, &RecordingSurface::rejecting());
    let results = observer.wait_for_results(3);
    assert_eq!(results.len(), 3);
    assert!(results.iter().all(|(success, _)| !success));

    assert_eq!(restart.count(), 1);
    assert_eq!(first.count(BridgeAction::SendHandle), 3);
    assert_eq!(observer.restarts.load(std::sync::atomic::Ordering::SeqCst), 0);
    publisher.stop();
}

#[test]
fn test_failed_attempts_pause_between_sends() {
    let clock = Arc::new(ManualClock::new());
    let registry = Arc::new(LocalRegistry::new());
    let surface = RecordingSurface::rejecting();
    let _object = install_surface(&registry, &surface);

    let observer = RecordingObserver::new(Arc::clone(&clock));
    let restart = CountingRestart::new();
    let publisher = start_publisher(Arc::clone(&registry) as _, &clock, &observer, &restart);

    assert_eq!(observer.wait_for_results(1).len(), 1);
    assert_eq!(
        clock.sleeps(),
        vec![Duration::from_secs(1), Duration::from_secs(1)]
    );
    assert_eq!(surface.verbs(), vec![BridgeAction::SendHandle; 3]);
    publisher.stop();
}

#[test]
fn test_host_restart_after_success_republishes_without_escalation() {
    let clock = Arc::new(ManualClock::new());
    let registry = Arc::new(LocalRegistry::new());
    let first = RecordingSurface::new();
    let current = Mutex::new(install_surface(&registry, &first));

    let observer = RecordingObserver::new(Arc::clone(&clock));
    let restart = CountingRestart::new();
    let publisher = start_publisher(Arc::clone(&registry) as _, &clock, &observer, &restart);
    assert!(publisher.wait_for(PublisherState::Published, WAIT));

    let second = RecordingSurface::rejecting();
    swap_surface(&registry, &current, &second);
    let results = observer.wait_for_results(2);
    assert_eq!(
        results.iter().map(|(success, _)| *success).collect::<Vec<_>>(),
        vec![true, false]
    );
    assert!(publisher.wait_for(PublisherState::Rejected, WAIT));
    assert_eq!(observer.restarts.load(std::sync::atomic::Ordering::SeqCst), 1);
    assert_eq!(restart.count(), 0);

    let third = RecordingSurface::new();
    swap_surface(&registry, &current, &third);
    assert_eq!(observer.wait_for_results(3).len(), 3);
    assert!(publisher.wait_for(PublisherState::Published, WAIT));
    assert!(third.inner.broker_handle().is_some());
    publisher.stop();
}

#[test]
fn test_stop_while_searching() {
    let clock = Arc::new(ManualClock::new());
    let registry = Arc::new(LocalRegistry::new());
    let observer = RecordingObserver::new(Arc::clone(&clock));
    let restart = CountingRestart::new();
    let publisher = start_publisher(registry as _, &clock, &observer, &restart);

    assert_eq!(publisher.state(), PublisherState::Searching);
    publisher.stop();
    assert!(observer.results().is_empty());
}
