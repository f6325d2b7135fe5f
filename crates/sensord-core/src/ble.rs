//! Bluetooth LE scanning backed by btleplug.
//!
//! [`BleAdapterProbe`] looks up the first adapter and checks its power
//! state. When the adapter is usable it hands out a [`BleScanDriver`] that
//! forwards every discovered or updated device carrying an RSSI as a
//! [`ScanHit`].
//!
//! btleplug is async; the collector is not. Both types share a small
//! dedicated tokio runtime and bridge into it with `block_on`, so they must
//! not be called from inside another runtime.

use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};

use btleplug::api::{Central, CentralEvent, CentralState, Manager as _, Peripheral as _, ScanFilter};
use btleplug::platform::{Adapter, Manager, PeripheralId};
use futures::{Stream, StreamExt};
use tokio::runtime::Runtime;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use sensord_types::{AdapterUnavailable, ScanHit};

use crate::scan::{AdapterProbe, AdapterStatus, DeviceCallback, ScanDriver, ScanError};

/// Address reported by platforms that hide device MAC addresses.
const HIDDEN_ADDRESS: &str = "00:00:00:00:00:00";

/// Runtime shared by the probe and the drivers it creates.
///
/// Shut down in the background on drop so the last owner may be dropped
/// from async code.
struct BleRuntime(Option<Runtime>);

impl BleRuntime {
    fn new() -> io::Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("ble-scan")
            .enable_all()
            .build()?;
        Ok(Self(Some(runtime)))
    }

    fn runtime(&self) -> Option<&Runtime> {
        self.0.as_ref()
    }
}

impl Drop for BleRuntime {
    fn drop(&mut self) {
        if let Some(runtime) = self.0.take() {
            runtime.shutdown_background();
        }
    }
}

/// Probes the system's first Bluetooth adapter.
pub struct BleAdapterProbe {
    runtime: Arc<BleRuntime>,
}

impl BleAdapterProbe {
    /// Create a probe with its own runtime.
    pub fn new() -> io::Result<Self> {
        Ok(Self {
            runtime: Arc::new(BleRuntime::new()?),
        })
    }
}

impl std::fmt::Debug for BleAdapterProbe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BleAdapterProbe").finish_non_exhaustive()
    }
}

impl AdapterProbe for BleAdapterProbe {
    fn probe(&self) -> AdapterStatus {
        let Some(runtime) = self.runtime.runtime() else {
            return AdapterStatus::Unavailable(AdapterUnavailable::RadioUnavailable);
        };
        match runtime.block_on(find_adapter()) {
            Ok(adapter) => {
                info!("Bluetooth adapter available");
                AdapterStatus::Available(Arc::new(BleScanDriver {
                    runtime: Arc::clone(&self.runtime),
                    adapter,
                    discovery: Mutex::new(None),
                }))
            }
            Err(reason) => AdapterStatus::Unavailable(reason),
        }
    }
}

async fn find_adapter() -> Result<Adapter, AdapterUnavailable> {
    let manager = Manager::new().await.map_err(|e| {
        debug!("No Bluetooth manager: {e}");
        AdapterUnavailable::NotSupported
    })?;
    let adapters = manager.adapters().await.map_err(|e| {
        debug!("Failed to list Bluetooth adapters: {e}");
        AdapterUnavailable::RadioUnavailable
    })?;
    let adapter = adapters
        .into_iter()
        .next()
        .ok_or(AdapterUnavailable::NotSupported)?;

    match adapter.adapter_state().await {
        Ok(CentralState::PoweredOn) => Ok(adapter),
        Ok(CentralState::PoweredOff) => Err(AdapterUnavailable::BluetoothDisabled),
        Ok(state) => {
            debug!(?state, "Adapter reported an unusable state");
            Err(AdapterUnavailable::RadioUnavailable)
        }
        Err(e) => {
            debug!("Failed to query adapter state: {e}");
            Err(AdapterUnavailable::RadioUnavailable)
        }
    }
}

/// Discovery on one btleplug adapter.
pub struct BleScanDriver {
    runtime: Arc<BleRuntime>,
    adapter: Adapter,
    discovery: Mutex<Option<CancellationToken>>,
}

impl std::fmt::Debug for BleScanDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BleScanDriver").finish_non_exhaustive()
    }
}

impl ScanDriver for BleScanDriver {
    fn start_discovery(&self, on_device: DeviceCallback) -> Result<(), ScanError> {
        let runtime = self
            .runtime
            .runtime()
            .ok_or_else(|| ScanError::Adapter("runtime shut down".to_string()))?;

        // Subscribe first so no discovery between start and subscribe is lost.
        let events = runtime
            .block_on(self.adapter.events())
            .map_err(|e| ScanError::Adapter(e.to_string()))?;
        runtime
            .block_on(self.adapter.start_scan(ScanFilter::default()))
            .map_err(|e| ScanError::Driver(e.to_string()))?;

        let cancel = CancellationToken::new();
        runtime.spawn(forward_discoveries(
            self.adapter.clone(),
            events,
            on_device,
            cancel.clone(),
        ));

        let previous = self
            .discovery
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(cancel);
        if let Some(previous) = previous {
            previous.cancel();
        }
        debug!("BLE discovery started");
        Ok(())
    }

    fn stop_discovery(&self) {
        let cancel = self
            .discovery
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(cancel) = cancel else {
            return;
        };
        cancel.cancel();
        if let Some(runtime) = self.runtime.runtime()
            && let Err(e) = runtime.block_on(self.adapter.stop_scan())
        {
            warn!("Failed to stop BLE scan: {e}");
        }
        debug!("BLE discovery stopped");
    }
}

async fn forward_discoveries(
    adapter: Adapter,
    mut events: Pin<Box<dyn Stream<Item = CentralEvent> + Send>>,
    on_device: DeviceCallback,
    cancel: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            () = cancel.cancelled() => break,
            event = events.next() => match event {
                Some(event) => event,
                None => break,
            },
        };

        let id = match event {
            CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => id,
            _ => continue,
        };
        let Ok(peripheral) = adapter.peripheral(&id).await else {
            continue;
        };
        let Ok(Some(props)) = peripheral.properties().await else {
            continue;
        };
        let Some(rssi) = props.rssi else {
            continue;
        };

        let hit = ScanHit::new(
            device_address(&props.address.to_string(), &id),
            i32::from(rssi),
        );
        let callback = Arc::clone(&on_device);
        // The callback may block on a full notification queue.
        tokio::task::block_in_place(move || callback(hit));
    }
}

/// Address to report for a device.
///
/// Platforms that hide MAC addresses report all zeros; the peripheral id is
/// used instead.
fn device_address(address: &str, id: &PeripheralId) -> String {
    if address == HIDDEN_ADDRESS {
        format_peripheral_id(&format!("{id:?}"))
    } else {
        address.to_string()
    }
}

fn format_peripheral_id(debug: &str) -> String {
    debug
        .trim_start_matches("PeripheralId(")
        .trim_end_matches(')')
        .to_string()
}
