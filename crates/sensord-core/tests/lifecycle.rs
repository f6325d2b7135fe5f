//! Lifecycle properties: resource balance, registration teardown and misuse.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use proptest::prelude::*;

use sensord_core::mock::{MockAdapterProbe, MockNotifier, MockScanDriver, MockWakeLock, RecordingSink};
use sensord_core::{
    Collaborators, Error, EventSink, LifecycleOptions, SinkError, ScanAvailability, ServiceLifecycle, WorkerExit,
    WorkerOptions,
};
use sensord_types::{AdapterUnavailable, BatteryPayload, Event, ServiceState, SourceKind};

const WAIT: Duration = Duration::from_secs(2);

struct Harness {
    lock: Arc<MockWakeLock>,
    sink: Arc<RecordingSink>,
    battery: Arc<MockNotifier>,
    peripheral: Arc<MockNotifier>,
    driver: Arc<MockScanDriver>,
    probe: Arc<MockAdapterProbe>,
}

impl Harness {
    fn new() -> Self {
        let driver = Arc::new(MockScanDriver::new());
        Self {
            lock: Arc::new(MockWakeLock::new()),
            sink: Arc::new(RecordingSink::new()),
            battery: Arc::new(MockNotifier::new(SourceKind::Battery)),
            peripheral: Arc::new(MockNotifier::new(SourceKind::Peripheral)),
            probe: Arc::new(MockAdapterProbe::available(driver.clone())),
            driver,
        }
    }

    fn degraded(reason: AdapterUnavailable) -> Self {
        let harness = Self::new();
        harness
            .probe
            .set_status(sensord_core::AdapterStatus::Unavailable(reason));
        harness
    }

    fn service(&self) -> ServiceLifecycle {
        self.service_with(self.sink.clone(), WAIT, WAIT)
    }

    fn service_with(
        &self,
        sink: Arc<dyn EventSink>,
        startup_timeout: Duration,
        stop_timeout: Duration,
    ) -> ServiceLifecycle {
        let collaborators = Collaborators {
            sink,
            battery: self.battery.clone(),
            peripheral: self.peripheral.clone(),
            adapter: self.probe.clone(),
        };
        let options = LifecycleOptions {
            worker: WorkerOptions {
                scan_window: Duration::from_secs(30),
                ..WorkerOptions::default()
            },
            startup_timeout,
            stop_timeout,
        };
        ServiceLifecycle::with_options(self.lock.clone(), collaborators, options)
    }

    fn active_registrations(&self) -> usize {
        self.battery.active_registrations()
            + self.peripheral.active_registrations()
            + usize::from(self.driver.is_scanning())
    }
}

#[test]
fn test_start_while_running_leaves_state_unchanged() {
    let harness = Harness::new();
    let service = harness.service();

    service.start().unwrap();
    let err = service.start().unwrap_err();
    assert!(matches!(err, Error::AlreadyRunning));
    assert!(err.is_misuse());
    assert_eq!(service.state(), ServiceState::Running);
    assert_eq!(harness.lock.acquire_count(), 1);

    service.stop().unwrap();
}

#[test]
fn test_stop_while_stopped_is_not_running() {
    let harness = Harness::new();
    let service = harness.service();

    assert!(matches!(service.stop(), Err(Error::NotRunning)));
    service.start().unwrap();
    service.stop().unwrap();
    assert!(matches!(service.stop(), Err(Error::NotRunning)));
    assert_eq!(service.state(), ServiceState::Stopped);
}

#[test]
fn test_stop_clears_all_registrations() {
    let harness = Harness::new();
    let service = harness.service();

    let report = service.start().unwrap();
    assert_eq!(report.scan, ScanAvailability::Active);
    assert_eq!(harness.active_registrations(), 3);

    service.stop().unwrap();
    assert_eq!(harness.active_registrations(), 0);
}

#[test]
fn test_stop_clears_registrations_when_degraded() {
    for reason in [
        AdapterUnavailable::BluetoothDisabled,
        AdapterUnavailable::NotSupported,
        AdapterUnavailable::RadioUnavailable,
    ] {
        let harness = Harness::degraded(reason);
        let service = harness.service();

        let report = service.start().unwrap();
        assert_eq!(report.scan, ScanAvailability::Degraded(reason));
        assert!(report.scan.is_degraded());
        assert_eq!(harness.active_registrations(), 2);

        service.stop().unwrap();
        assert_eq!(harness.active_registrations(), 0);
        assert_eq!(harness.driver.start_count(), 0);
    }
}

#[test]
fn test_wake_lock_failure_holds_nothing() {
    let harness = Harness::new();
    harness.lock.set_should_fail(true);
    let service = harness.service();

    assert!(matches!(service.start(), Err(Error::ResourceUnavailable(_))));
    assert_eq!(service.state(), ServiceState::Stopped);
    assert_eq!(harness.active_registrations(), 0);
    assert_eq!(harness.battery.register_count(), 0);
    assert!(!harness.lock.is_held());
}

#[test]
fn test_stop_during_start_is_in_transition() {
    let harness = Harness::new();
    harness.probe.set_delay(Duration::from_millis(300));
    let service = Arc::new(harness.service());

    let starter = {
        let service = Arc::clone(&service);
        thread::spawn(move || service.start())
    };
    // Wait until the starter has moved the service out of Stopped.
    while service.state() == ServiceState::Stopped {
        thread::sleep(Duration::from_millis(1));
    }

    let err = service.stop().unwrap_err();
    assert!(matches!(err, Error::InTransition(ServiceState::Starting)));

    starter.join().unwrap().unwrap();
    assert_eq!(service.state(), ServiceState::Running);
    service.stop().unwrap();
    assert_eq!(harness.lock.acquire_count(), harness.lock.release_count());
}

#[test]
fn test_concurrent_starts_admit_one() {
    let harness = Harness::new();
    let service = Arc::new(harness.service());

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let service = Arc::clone(&service);
            thread::spawn(move || service.start().is_ok())
        })
        .collect();
    let started = handles
        .into_iter()
        .map(|h| h.join().unwrap())
        .filter(|ok| *ok)
        .count();

    assert_eq!(started, 1);
    assert_eq!(harness.lock.acquire_count(), 1);
    assert_eq!(harness.battery.register_count(), 1);
    service.stop().unwrap();
}

#[test]
fn test_stop_report_carries_summary() {
    let harness = Harness::new();
    let service = harness.service();

    service.start().unwrap();
    harness
        .battery
        .fire(BatteryPayload::new(50, 0));
    let report = service.stop().unwrap();

    match report.exit {
        WorkerExit::Clean(summary) => assert_eq!(summary.submitted, 1),
        other => panic!("unexpected exit: {other:?}"),
    }
}

fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = std::time::Instant::now() + timeout;
    while std::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}

#[test]
fn test_stop_timeout_releases_lock_and_blocks_second_worker() {
    let harness = Harness::new();
    harness.probe.set_delay(Duration::from_millis(600));
    let service = harness.service_with(
        harness.sink.clone(),
        Duration::from_millis(20),
        Duration::from_millis(100),
    );

    let report = service.start().unwrap();
    assert_eq!(report.scan, ScanAvailability::Pending);

    let report = service.stop().unwrap();
    assert_eq!(report.exit, WorkerExit::TimedOut(Duration::from_millis(100)));
    assert_eq!(service.state(), ServiceState::Stopped);
    assert!(!harness.lock.is_held());
    assert_eq!(harness.lock.release_count(), 1);

    // The abandoned worker is still probing: no second worker, no lock.
    assert!(matches!(service.start(), Err(Error::WorkerStillRunning)));
    assert_eq!(service.state(), ServiceState::Stopped);
    assert_eq!(harness.lock.acquire_count(), 1);

    harness.probe.set_delay(Duration::ZERO);
    thread::sleep(Duration::from_millis(900));

    service.start().unwrap();
    assert!(wait_until(WAIT, || harness.battery.active_registrations() == 1));
    assert_eq!(harness.battery.fire(BatteryPayload::new(80, 1)), 1);

    let report = service.stop().unwrap();
    match report.exit {
        WorkerExit::Clean(summary) => {
            assert_eq!(summary.submitted, 1);
            assert_eq!(summary.sink_failures, 0);
        }
        other => panic!("unexpected exit: {other:?}"),
    }
    assert_eq!(harness.sink.len(), 1);
    assert_eq!(harness.sink.begin_calls(), vec![false, false]);
    assert_eq!(harness.sink.end_count(), 2);
    // The abandoned worker never opened a scan window.
    assert_eq!(harness.driver.start_count(), 1);
    assert_eq!(harness.lock.acquire_count(), harness.lock.release_count());
}

struct PanickingSink;

impl EventSink for PanickingSink {
    fn submit(&self, _event: Event) -> Result<(), SinkError> {
        panic!("sink exploded");
    }
}

#[test]
fn test_panicked_worker_still_releases_lock() {
    let harness = Harness::new();
    let service = harness.service_with(Arc::new(PanickingSink), WAIT, WAIT);

    service.start().unwrap();
    harness.battery.fire(BatteryPayload::new(50, 0));
    let report = service.stop().unwrap();

    assert_eq!(report.exit, WorkerExit::Panicked);
    assert_eq!(service.state(), ServiceState::Stopped);
    assert!(!harness.lock.is_held());

    // A panicked worker is gone; the next start proceeds normally.
    let service = harness.service();
    service.start().unwrap();
    service.stop().unwrap();
}

#[derive(Debug, Clone, Copy)]
enum Op {
    Start,
    Stop,
    FailNextAcquire,
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => Just(Op::Start),
        4 => Just(Op::Stop),
        1 => Just(Op::FailNextAcquire),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_acquisitions_balance_releases(ops in prop::collection::vec(op(), 1..12), degraded in any::<bool>()) {
        let harness = if degraded {
            Harness::degraded(AdapterUnavailable::BluetoothDisabled)
        } else {
            Harness::new()
        };
        let service = harness.service();
        let mut running = false;

        for op in ops {
            match op {
                Op::Start => {
                    let result = service.start();
                    if running {
                        prop_assert!(matches!(result, Err(Error::AlreadyRunning)));
                    } else {
                        running = result.is_ok();
                    }
                    harness.lock.set_should_fail(false);
                }
                Op::Stop => {
                    let result = service.stop();
                    if running {
                        prop_assert!(result.is_ok());
                        running = false;
                    } else {
                        prop_assert!(matches!(result, Err(Error::NotRunning)));
                    }
                }
                Op::FailNextAcquire => harness.lock.set_should_fail(true),
            }

            prop_assert_eq!(service.is_running(), running);
            prop_assert_eq!(harness.lock.is_held(), running);
            if !running {
                prop_assert_eq!(harness.active_registrations(), 0);
            }
        }

        if running {
            service.stop().unwrap();
        }
        prop_assert_eq!(harness.lock.acquire_count(), harness.lock.release_count());
        prop_assert_eq!(harness.battery.register_count(), harness.battery.unregister_count());
        prop_assert_eq!(harness.peripheral.register_count(), harness.peripheral.unregister_count());
        prop_assert_eq!(harness.active_registrations(), 0);
    }
}
