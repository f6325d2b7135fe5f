//! End-to-end collection scenarios against mock collaborators.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use sensord_core::mock::{MockAdapterProbe, MockNotifier, MockScanDriver, MockWakeLock, RecordingSink};
use sensord_core::{
    AdapterStatus, Collaborators, LifecycleOptions, ScanAvailability, ScanSession,
    ServiceLifecycle, WorkerOptions,
};
use sensord_types::{AdapterUnavailable, BatteryPayload, PeripheralPayload, ScanHit, SourceKind};

const WAIT: Duration = Duration::from_secs(2);

fn triple(sender: &str, name: &str, value: &str) -> (String, String, String) {
    (sender.to_string(), name.to_string(), value.to_string())
}

struct Setup {
    sink: Arc<RecordingSink>,
    battery: Arc<MockNotifier>,
    peripheral: Arc<MockNotifier>,
    driver: Arc<MockScanDriver>,
    service: ServiceLifecycle,
}

fn setup(status: Option<AdapterUnavailable>, scan_window: Duration) -> Setup {
    let sink = Arc::new(RecordingSink::new());
    let battery = Arc::new(MockNotifier::new(SourceKind::Battery));
    let peripheral = Arc::new(MockNotifier::new(SourceKind::Peripheral));
    let driver = Arc::new(MockScanDriver::new());
    let probe = match status {
        Some(reason) => MockAdapterProbe::unavailable(reason),
        None => MockAdapterProbe::available(driver.clone()),
    };

    let service = ServiceLifecycle::with_options(
        Arc::new(MockWakeLock::new()),
        Collaborators {
            sink: sink.clone(),
            battery: battery.clone(),
            peripheral: peripheral.clone(),
            adapter: Arc::new(probe),
        },
        LifecycleOptions {
            worker: WorkerOptions {
                scan_window,
                ..WorkerOptions::default()
            },
            startup_timeout: WAIT,
            stop_timeout: WAIT,
        },
    );

    Setup {
        sink,
        battery,
        peripheral,
        driver,
        service,
    }
}

#[test]
fn test_battery_then_peripheral_then_stop() {
    let s = setup(None, Duration::from_secs(30));
    s.service.start().unwrap();

    s.battery.fire(BatteryPayload::new(80, 1));
    s.peripheral.fire(PeripheralPayload::new(1));
    s.service.stop().unwrap();

    let expected = vec![
        triple("BatteryChanged", "Level;Plugged", "80;1"),
        triple("SensorTag", "Key state", "1"),
    ];
    assert_eq!(s.sink.triples(), expected);

    // Nothing reaches the sink after stop returns.
    assert_eq!(s.battery.fire(BatteryPayload::new(79, 1)), 0);
    assert_eq!(s.peripheral.fire(PeripheralPayload::new(0)), 0);
    s.driver.emit_late(ScanHit::new("AA:BB:CC:DD:EE:FF", -50));
    thread::sleep(Duration::from_millis(50));
    assert_eq!(s.sink.triples(), expected);
}

#[test]
fn test_bluetooth_disabled_collects_without_scan() {
    let s = setup(
        Some(AdapterUnavailable::BluetoothDisabled),
        Duration::from_secs(30),
    );
    let report = s.service.start().unwrap();
    assert_eq!(
        report.scan,
        ScanAvailability::Degraded(AdapterUnavailable::BluetoothDisabled)
    );

    s.battery.fire(BatteryPayload::new(64, 0));
    s.peripheral.fire(PeripheralPayload::new(3));
    s.driver.emit(ScanHit::new("AA:BB:CC:DD:EE:FF", -50));
    s.service.stop().unwrap();

    let events = s.sink.events();
    assert_eq!(events.len(), 2);
    assert!(events.iter().all(|e| e.sender() != "BleDevicesScanner"));
    assert_eq!(s.driver.start_count(), 0);
}

#[test]
fn test_per_source_order_is_preserved() {
    let s = setup(None, Duration::from_secs(30));
    s.service.start().unwrap();

    let battery = {
        let notifier = Arc::clone(&s.battery);
        thread::spawn(move || {
            for level in 0..50 {
                notifier.fire(BatteryPayload::new(level, level % 2));
            }
        })
    };
    let peripheral = {
        let notifier = Arc::clone(&s.peripheral);
        thread::spawn(move || {
            for state in 0..50 {
                notifier.fire(PeripheralPayload::new(state));
            }
        })
    };
    let scanner = {
        let driver = Arc::clone(&s.driver);
        thread::spawn(move || {
            for rssi in 0..50 {
                driver.emit(ScanHit::new("11:22:33:44:55:66", -rssi));
            }
        })
    };
    battery.join().unwrap();
    peripheral.join().unwrap();
    scanner.join().unwrap();
    s.service.stop().unwrap();

    let events = s.sink.events();
    assert_eq!(events.len(), 150);

    let values = |sender: &str| -> Vec<String> {
        events
            .iter()
            .filter(|e| e.sender() == sender)
            .map(|e| e.value().to_string())
            .collect()
    };
    let expected_battery: Vec<String> = (0..50).map(|l| format!("{l};{}", l % 2)).collect();
    let expected_peripheral: Vec<String> = (0..50).map(|k| k.to_string()).collect();
    let expected_scan: Vec<String> = (0..50).map(|r: i32| (-r).to_string()).collect();
    assert_eq!(values("BatteryChanged"), expected_battery);
    assert_eq!(values("SensorTag"), expected_peripheral);
    assert_eq!(values("BleDevicesScanner"), expected_scan);

    // Timestamps never go backwards in submission order.
    assert!(events.windows(2).all(|w| w[0].timestamp() <= w[1].timestamp()));
}

#[test]
fn test_small_queue_loses_nothing() {
    let sink = Arc::new(RecordingSink::new());
    let battery = Arc::new(MockNotifier::new(SourceKind::Battery));
    let service = ServiceLifecycle::with_options(
        Arc::new(MockWakeLock::new()),
        Collaborators {
            sink: sink.clone(),
            battery: battery.clone(),
            peripheral: Arc::new(MockNotifier::new(SourceKind::Peripheral)),
            adapter: Arc::new(MockAdapterProbe::unavailable(AdapterUnavailable::NotSupported)),
        },
        LifecycleOptions {
            worker: WorkerOptions {
                queue_capacity: 1,
                ..WorkerOptions::default()
            },
            startup_timeout: WAIT,
            stop_timeout: WAIT,
        },
    );

    service.start().unwrap();
    for level in 0..200 {
        battery.fire(BatteryPayload::new(level, 1));
    }
    service.stop().unwrap();
    assert_eq!(sink.len(), 200);
}

#[test]
fn test_scan_window_expires_within_running_session() {
    let s = setup(None, Duration::from_millis(50));
    let report = s.service.start().unwrap();
    assert_eq!(report.scan, ScanAvailability::Active);

    s.driver.emit(ScanHit::new("AA:AA:AA:AA:AA:AA", -42));
    assert!(s.sink.wait_for_len(1, WAIT));

    let deadline = Instant::now() + WAIT;
    while s.driver.is_scanning() && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(5));
    }
    assert!(!s.driver.is_scanning());

    s.driver.emit_late(ScanHit::new("BB:BB:BB:BB:BB:BB", -43));
    s.battery.fire(BatteryPayload::new(12, 0));
    s.service.stop().unwrap();

    let senders: Vec<String> = s.sink.events().iter().map(|e| e.sender().to_string()).collect();
    assert_eq!(senders, vec!["BleDevicesScanner", "BatteryChanged"]);
}

#[test]
fn test_scan_session_expiry_without_stop() {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let driver = Arc::new(MockScanDriver::new());
    let hits = Arc::new(std::sync::Mutex::new(Vec::new()));
    let recorded = Arc::clone(&hits);
    let session = ScanSession::new(driver.clone(), runtime.handle().clone(), move |hit| {
        recorded.lock().unwrap().push(hit);
    });

    session.start(Duration::from_millis(40)).unwrap();
    driver.emit(ScanHit::new("CC:CC:CC:CC:CC:CC", -70));
    thread::sleep(Duration::from_millis(200));

    assert!(!session.is_active());
    assert!(!driver.is_scanning());
    driver.emit_late(ScanHit::new("DD:DD:DD:DD:DD:DD", -71));
    assert_eq!(hits.lock().unwrap().len(), 1);
}

#[test]
fn test_repeated_cycles_reregister_sources() {
    let s = setup(None, Duration::from_secs(30));
    for cycle in 0..5 {
        s.service.start().unwrap();
        s.battery.fire(BatteryPayload::new(cycle, 0));
        s.service.stop().unwrap();
    }
    assert_eq!(s.battery.register_count(), 5);
    assert_eq!(s.battery.unregister_count(), 5);
    assert_eq!(s.driver.start_count(), 5);
    assert_eq!(s.sink.len(), 5);
    assert_eq!(s.sink.end_count(), 5);
}

#[test]
fn test_adapter_status_change_between_sessions() {
    let driver = Arc::new(MockScanDriver::new());
    let probe = Arc::new(MockAdapterProbe::unavailable(
        AdapterUnavailable::RadioUnavailable,
    ));
    let service = ServiceLifecycle::with_options(
        Arc::new(MockWakeLock::new()),
        Collaborators {
            sink: Arc::new(RecordingSink::new()),
            battery: Arc::new(MockNotifier::new(SourceKind::Battery)),
            peripheral: Arc::new(MockNotifier::new(SourceKind::Peripheral)),
            adapter: probe.clone(),
        },
        LifecycleOptions {
            startup_timeout: WAIT,
            stop_timeout: WAIT,
            ..LifecycleOptions::default()
        },
    );

    let report = service.start().unwrap();
    assert!(report.scan.is_degraded());
    service.stop().unwrap();

    probe.set_status(AdapterStatus::Available(driver.clone()));
    let report = service.start().unwrap();
    assert_eq!(report.scan, ScanAvailability::Active);
    service.stop().unwrap();
    assert!(!driver.is_scanning());
    assert_eq!(probe.probe_count(), 2);
}
