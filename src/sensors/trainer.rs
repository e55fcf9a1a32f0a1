//! Trainer link: owns one BLE trainer connection (and optionally one
//! heart-rate sensor) and exposes a stable control surface independent of
//! which wire protocol is active underneath.

use crate::sensors::codec::{
    self, CadenceEstimator, CrankSample, CYCLING_POWER_MEASUREMENT_UUID,
    CYCLING_POWER_SERVICE_UUID, FTMS_CONTROL_POINT_UUID, FTMS_SERVICE_UUID,
    HEART_RATE_MEASUREMENT_UUID, HEART_RATE_SERVICE_UUID, INDOOR_BIKE_DATA_UUID,
    VENDOR_CONTROL_UUID, VENDOR_SERVICE_UUID,
};
use crate::sensors::types::{
    ControlProtocol, DiscoveredTrainer, LinkConfig, LinkState, TrainerCapabilities, TrainerError,
    TrainerEvent, TrainerMetrics,
};
use btleplug::api::{
    Central, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use crossbeam::channel::{Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::Mutex as TokioMutex;

/// State shared with the notification tasks.
///
/// The notification decode path only writes into these cells and returns; it
/// never touches playback state.
struct LinkShared {
    state: Mutex<LinkState>,
    metrics: Mutex<TrainerMetrics>,
    capabilities: Mutex<TrainerCapabilities>,
    cadence: Mutex<CadenceEstimator>,
    event_tx: Mutex<Option<Sender<TrainerEvent>>>,
}

impl LinkShared {
    fn set_state(&self, state: LinkState) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = state;
        self.send_event(TrainerEvent::StateChanged(state));
    }

    fn send_event(&self, event: TrainerEvent) {
        if let Some(tx) = &*self.event_tx.lock().unwrap_or_else(|e| e.into_inner()) {
            let _ = tx.send(event);
        }
    }

    /// Clear everything a new connection must not inherit.
    fn clear_session_state(&self) {
        *self.metrics.lock().unwrap_or_else(|e| e.into_inner()) = TrainerMetrics::default();
        *self.capabilities.lock().unwrap_or_else(|e| e.into_inner()) =
            TrainerCapabilities::default();
        self.cadence
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .reset();
    }
}

/// A live connection: the peripheral plus the characteristics cached from
/// service discovery. Torn down and recreated wholesale on reconnect.
struct ActiveConnection {
    peripheral: Peripheral,
    control: Option<(Characteristic, ControlProtocol)>,
    notify_task: tokio::task::JoinHandle<()>,
}

/// An optional dedicated heart-rate sensor connection.
struct HeartRateConnection {
    peripheral: Peripheral,
    notify_task: tokio::task::JoinHandle<()>,
}

/// Manages exactly one trainer connection.
pub struct TrainerLink {
    config: LinkConfig,
    adapter: Option<Adapter>,
    shared: Arc<LinkShared>,
    active: TokioMutex<Option<ActiveConnection>>,
    heart_rate: TokioMutex<Option<HeartRateConnection>>,
}

impl TrainerLink {
    /// Create a new trainer link.
    pub fn new(config: LinkConfig) -> Self {
        Self {
            config,
            adapter: None,
            shared: Arc::new(LinkShared {
                state: Mutex::new(LinkState::Disconnected),
                metrics: Mutex::new(TrainerMetrics::default()),
                capabilities: Mutex::new(TrainerCapabilities::default()),
                cadence: Mutex::new(CadenceEstimator::new()),
                event_tx: Mutex::new(None),
            }),
            active: TokioMutex::new(None),
            heart_rate: TokioMutex::new(None),
        }
    }

    /// Create a trainer link with default configuration.
    pub fn with_defaults() -> Self {
        Self::new(LinkConfig::default())
    }

    /// Initialize the BLE adapter. Must be called before any other operation.
    pub async fn initialize(&mut self) -> Result<(), TrainerError> {
        tracing::info!("Initializing trainer link");

        let manager = Manager::new()
            .await
            .map_err(|e| TrainerError::BleError(e.to_string()))?;

        let adapters = manager
            .adapters()
            .await
            .map_err(|e| TrainerError::BleError(e.to_string()))?;

        let adapter = adapters
            .into_iter()
            .next()
            .ok_or(TrainerError::AdapterNotFound)?;

        tracing::info!("BLE adapter initialized");
        self.adapter = Some(adapter);
        Ok(())
    }

    /// Get an event receiver for trainer events.
    pub fn event_receiver(&self) -> Receiver<TrainerEvent> {
        let (tx, rx) = crossbeam::channel::unbounded();
        *self
            .shared
            .event_tx
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(tx);
        rx
    }

    /// Scan for candidate trainers and sensors.
    pub async fn discover(&self) -> Result<Vec<DiscoveredTrainer>, TrainerError> {
        let adapter = self.adapter.as_ref().ok_or(TrainerError::AdapterNotFound)?;

        tracing::info!("Scanning for trainers");

        let filter = ScanFilter {
            services: vec![
                FTMS_SERVICE_UUID,
                CYCLING_POWER_SERVICE_UUID,
                HEART_RATE_SERVICE_UUID,
                VENDOR_SERVICE_UUID,
            ],
        };

        adapter
            .start_scan(filter)
            .await
            .map_err(|e| TrainerError::ScanFailed(e.to_string()))?;

        tokio::time::sleep(Duration::from_secs(self.config.discovery_timeout_secs)).await;

        let peripherals = adapter
            .peripherals()
            .await
            .map_err(|e| TrainerError::BleError(e.to_string()))?;

        let mut found = Vec::new();
        for peripheral in peripherals {
            if let Ok(Some(props)) = peripheral.properties().await {
                let controllable = props.services.contains(&FTMS_SERVICE_UUID)
                    || props.services.contains(&VENDOR_SERVICE_UUID);
                let candidate = DiscoveredTrainer {
                    device_id: peripheral.id().to_string(),
                    name: props
                        .local_name
                        .unwrap_or_else(|| "Unknown Trainer".to_string()),
                    signal_strength: props.rssi,
                    controllable,
                };
                self.shared
                    .send_event(TrainerEvent::Discovered(candidate.clone()));
                found.push(candidate);
            }
        }

        let _ = adapter.stop_scan().await;
        Ok(found)
    }

    /// Connect to a trainer by device ID.
    ///
    /// Per-service discovery is best-effort: absence of any one service only
    /// reduces capability, it is never a connection failure. A failed connect
    /// tears the half-open peripheral down and leaves the link in `Error`.
    pub async fn connect(&self, device_id: &str) -> Result<(), TrainerError> {
        let adapter = self.adapter.as_ref().ok_or(TrainerError::AdapterNotFound)?;

        tracing::info!("Connecting to trainer: {}", device_id);
        self.shared.set_state(LinkState::Connecting);

        let peripheral = match Self::find_peripheral(adapter, device_id).await {
            Ok(p) => p,
            Err(e) => {
                self.shared.set_state(LinkState::Error);
                return Err(e);
            }
        };

        match self.establish(&peripheral).await {
            Ok(()) => {
                self.shared.set_state(LinkState::Connected);
                tracing::info!("Connected to trainer: {}", device_id);
                Ok(())
            }
            Err(e) => {
                // Propagate-and-cleanup: never leave a half-initialized link.
                let _ = peripheral.disconnect().await;
                self.shared.clear_session_state();
                self.shared.set_state(LinkState::Error);
                Err(e)
            }
        }
    }

    async fn find_peripheral(
        adapter: &Adapter,
        device_id: &str,
    ) -> Result<Peripheral, TrainerError> {
        let peripherals = adapter
            .peripherals()
            .await
            .map_err(|e| TrainerError::BleError(e.to_string()))?;

        peripherals
            .into_iter()
            .find(|p| p.id().to_string() == device_id)
            .ok_or_else(|| TrainerError::DeviceNotFound(device_id.to_string()))
    }

    async fn establish(&self, peripheral: &Peripheral) -> Result<(), TrainerError> {
        let timeout = Duration::from_secs(self.config.connection_timeout_secs);

        tokio::time::timeout(timeout, peripheral.connect())
            .await
            .map_err(|_| TrainerError::ConnectionFailed("connection timed out".to_string()))?
            .map_err(|e| TrainerError::ConnectionFailed(e.to_string()))?;

        peripheral
            .discover_services()
            .await
            .map_err(|e| TrainerError::ConnectionFailed(e.to_string()))?;

        let characteristics = peripheral.characteristics();
        let find = |uuid: uuid::Uuid| characteristics.iter().find(|c| c.uuid == uuid).cloned();

        let indoor_bike = find(INDOOR_BIKE_DATA_UUID);
        let control_point = find(FTMS_CONTROL_POINT_UUID);
        let vendor_control = find(VENDOR_CONTROL_UUID);
        let power_measurement = find(CYCLING_POWER_MEASUREMENT_UUID);
        let heart_rate = find(HEART_RATE_MEASUREMENT_UUID);

        // Subscribe to whatever data characteristics exist; each one is
        // independently optional.
        for characteristic in [&indoor_bike, &power_measurement, &heart_rate]
            .into_iter()
            .flatten()
        {
            match peripheral.subscribe(characteristic).await {
                Ok(()) => tracing::debug!("Subscribed to {}", characteristic.uuid),
                Err(e) => {
                    tracing::warn!("Subscription to {} failed: {}", characteristic.uuid, e)
                }
            }
        }

        // Control-protocol selection happens here and only here; a write
        // failure later never triggers a mid-session fallback.
        let control = match (&control_point, &vendor_control) {
            (Some(c), _) => Some((c.clone(), ControlProtocol::Standard)),
            (None, Some(c)) => Some((c.clone(), ControlProtocol::Vendor)),
            (None, None) => None,
        };

        let capabilities = TrainerCapabilities {
            has_control_point: control_point.is_some(),
            has_vendor_control: vendor_control.is_some(),
            has_power_meter: power_measurement.is_some(),
            has_heart_rate: heart_rate.is_some(),
            protocol: control
                .as_ref()
                .map(|(_, p)| *p)
                .unwrap_or(ControlProtocol::None),
        };

        tracing::info!(
            "Trainer capabilities: control={} vendor={} power={} hr={} -> protocol {}",
            capabilities.has_control_point,
            capabilities.has_vendor_control,
            capabilities.has_power_meter,
            capabilities.has_heart_rate,
            capabilities.protocol
        );

        // Fresh session state before the first notification arrives; stale
        // crank samples must never bleed into a new connection.
        self.shared.clear_session_state();
        *self
            .shared
            .capabilities
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = capabilities;
        self.shared
            .send_event(TrainerEvent::CapabilitiesResolved(capabilities));

        // Best-effort control handshake. Many trainers default to unlocked
        // control, so failures are logged and ignored.
        if let Some((characteristic, ControlProtocol::Standard)) = &control {
            for cmd in [codec::encode_request_control(), codec::encode_start_resume()] {
                if let Err(e) = peripheral
                    .write(characteristic, &cmd, WriteType::WithResponse)
                    .await
                {
                    tracing::warn!("Control handshake write failed: {}", e);
                }
            }
        }

        let shared = self.shared.clone();
        let notify_peripheral = peripheral.clone();
        let notify_task = tokio::spawn(async move {
            Self::handle_notifications(notify_peripheral, shared).await;
        });

        let mut active = self.active.lock().await;
        if let Some(old) = active.take() {
            old.notify_task.abort();
        }
        *active = Some(ActiveConnection {
            peripheral: peripheral.clone(),
            control,
            notify_task,
        });

        Ok(())
    }

    /// Connect a dedicated heart-rate sensor alongside the trainer.
    pub async fn connect_heart_rate(&self, device_id: &str) -> Result<(), TrainerError> {
        let adapter = self.adapter.as_ref().ok_or(TrainerError::AdapterNotFound)?;

        let peripheral = Self::find_peripheral(adapter, device_id).await?;

        peripheral
            .connect()
            .await
            .map_err(|e| TrainerError::ConnectionFailed(e.to_string()))?;
        peripheral
            .discover_services()
            .await
            .map_err(|e| TrainerError::ConnectionFailed(e.to_string()))?;

        let characteristic = peripheral
            .characteristics()
            .iter()
            .find(|c| c.uuid == HEART_RATE_MEASUREMENT_UUID)
            .cloned()
            .ok_or(TrainerError::Unsupported)?;

        peripheral
            .subscribe(&characteristic)
            .await
            .map_err(|e| TrainerError::SubscriptionFailed(e.to_string()))?;

        let shared = self.shared.clone();
        let notify_peripheral = peripheral.clone();
        let notify_task = tokio::spawn(async move {
            Self::handle_heart_rate_notifications(notify_peripheral, shared).await;
        });

        let mut slot = self.heart_rate.lock().await;
        if let Some(old) = slot.take() {
            old.notify_task.abort();
            let _ = old.peripheral.disconnect().await;
        }
        *slot = Some(HeartRateConnection {
            peripheral,
            notify_task,
        });

        tracing::info!("Heart-rate sensor connected: {}", device_id);
        Ok(())
    }

    /// Handle notifications from the trainer.
    ///
    /// Decode failures drop the single packet and keep the last-known value.
    /// When the stream ends the link drops straight to `Disconnected` with
    /// all session state cleared.
    async fn handle_notifications(peripheral: Peripheral, shared: Arc<LinkShared>) {
        use futures::stream::StreamExt;

        let mut notifications = match peripheral.notifications().await {
            Ok(stream) => stream,
            Err(e) => {
                tracing::error!("Failed to get notification stream: {}", e);
                return;
            }
        };

        while let Some(notification) = notifications.next().await {
            let uuid = notification.uuid;
            let data = notification.value;

            let updated = if uuid == INDOOR_BIKE_DATA_UUID {
                Self::apply_indoor_bike_data(&shared, &data)
            } else if uuid == CYCLING_POWER_MEASUREMENT_UUID {
                Self::apply_power_measurement(&shared, &data)
            } else if uuid == HEART_RATE_MEASUREMENT_UUID {
                Self::apply_heart_rate(&shared, &data)
            } else {
                false
            };

            if updated {
                let snapshot = *shared.metrics.lock().unwrap_or_else(|e| e.into_inner());
                shared.send_event(TrainerEvent::MetricsUpdated(snapshot));
            }
        }

        tracing::warn!("Trainer notification stream ended; link lost");
        shared.clear_session_state();
        shared.set_state(LinkState::Disconnected);
    }

    async fn handle_heart_rate_notifications(peripheral: Peripheral, shared: Arc<LinkShared>) {
        use futures::stream::StreamExt;

        let mut notifications = match peripheral.notifications().await {
            Ok(stream) => stream,
            Err(e) => {
                tracing::error!("Failed to get HR notification stream: {}", e);
                return;
            }
        };

        while let Some(notification) = notifications.next().await {
            if notification.uuid == HEART_RATE_MEASUREMENT_UUID
                && Self::apply_heart_rate(&shared, &notification.value)
            {
                let snapshot = *shared.metrics.lock().unwrap_or_else(|e| e.into_inner());
                shared.send_event(TrainerEvent::MetricsUpdated(snapshot));
            }
        }

        tracing::warn!("Heart-rate notification stream ended");
    }

    fn apply_indoor_bike_data(shared: &LinkShared, data: &[u8]) -> bool {
        let Some(parsed) = codec::decode_indoor_bike_data(data) else {
            tracing::debug!("Dropped malformed indoor bike packet ({} bytes)", data.len());
            return false;
        };

        let mut metrics = shared.metrics.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(speed) = parsed.speed_kmh {
            metrics.speed_kmh = Some(speed);
        }
        if let Some(cadence) = parsed.cadence_rpm {
            metrics.cadence_rpm = Some(cadence.min(u8::MAX as u16) as u8);
        }
        if let Some(power) = parsed.power_watts {
            metrics.power_watts = Some(power.max(0) as u16);
        }
        if let Some(hr) = parsed.heart_rate_bpm {
            metrics.heart_rate_bpm = Some(hr);
        }
        metrics.updated_at = Some(Instant::now());
        true
    }

    fn apply_power_measurement(shared: &LinkShared, data: &[u8]) -> bool {
        let Some(parsed) = codec::decode_power_measurement(data) else {
            tracing::debug!("Dropped malformed power packet ({} bytes)", data.len());
            return false;
        };

        let derived_cadence = parsed.crank.and_then(|crank: CrankSample| {
            shared
                .cadence
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .update(crank)
        });

        let mut metrics = shared.metrics.lock().unwrap_or_else(|e| e.into_inner());
        metrics.power_watts = Some(parsed.power_watts.max(0) as u16);
        if let Some(rpm) = derived_cadence {
            metrics.cadence_rpm = Some(rpm);
        }
        metrics.updated_at = Some(Instant::now());
        true
    }

    fn apply_heart_rate(shared: &LinkShared, data: &[u8]) -> bool {
        let Some(bpm) = codec::decode_heart_rate(data) else {
            tracing::debug!("Dropped malformed heart-rate packet ({} bytes)", data.len());
            return false;
        };

        let mut metrics = shared.metrics.lock().unwrap_or_else(|e| e.into_inner());
        metrics.heart_rate_bpm = Some(bpm.min(u8::MAX as u16) as u8);
        metrics.updated_at = Some(Instant::now());
        true
    }

    /// Set the ERG target power in watts.
    ///
    /// Fails fast when not connected; a write failure means "command not
    /// applied" and the caller may retry at the next tick. No protocol
    /// fallback happens here.
    pub async fn set_target_power(&self, watts: u16) -> Result<(), TrainerError> {
        self.write_control(|protocol| match protocol {
            ControlProtocol::Standard => codec::encode_set_target_power(watts as i16),
            ControlProtocol::Vendor => codec::encode_vendor_set_target_power(watts as i16),
            ControlProtocol::None => Vec::new(),
        })
        .await?;

        tracing::debug!("Set target power to {}W", watts);
        Ok(())
    }

    /// Set a fixed resistance level (0-100 percent), for manual mode.
    pub async fn set_resistance(&self, percent: u8) -> Result<(), TrainerError> {
        self.write_control(|protocol| match protocol {
            ControlProtocol::Standard => codec::encode_set_resistance(percent),
            ControlProtocol::Vendor => codec::encode_vendor_set_resistance(percent),
            ControlProtocol::None => Vec::new(),
        })
        .await?;

        tracing::debug!("Set resistance to {}%", percent);
        Ok(())
    }

    async fn write_control(
        &self,
        encode: impl FnOnce(ControlProtocol) -> Vec<u8>,
    ) -> Result<(), TrainerError> {
        if self.state() != LinkState::Connected {
            return Err(TrainerError::NotConnected);
        }

        let active = self.active.lock().await;
        let active = active.as_ref().ok_or(TrainerError::NotConnected)?;
        let (characteristic, protocol) = active.control.as_ref().ok_or(TrainerError::Unsupported)?;

        let cmd = encode(*protocol);
        if cmd.is_empty() {
            return Err(TrainerError::Unsupported);
        }

        active
            .peripheral
            .write(characteristic, &cmd, WriteType::WithResponse)
            .await
            .map_err(|e| TrainerError::WriteFailed(e.to_string()))
    }

    /// Disconnect and tear down all subscriptions and timers.
    pub async fn disconnect(&self) {
        tracing::info!("Disconnecting trainer link");

        if let Some(active) = self.active.lock().await.take() {
            active.notify_task.abort();
            let _ = active.peripheral.disconnect().await;
        }
        if let Some(hr) = self.heart_rate.lock().await.take() {
            hr.notify_task.abort();
            let _ = hr.peripheral.disconnect().await;
        }

        self.shared.clear_session_state();
        self.shared.set_state(LinkState::Disconnected);
    }

    /// Current link state.
    pub fn state(&self) -> LinkState {
        *self
            .shared
            .state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
    }

    /// Snapshot of the live metrics.
    pub fn metrics(&self) -> TrainerMetrics {
        *self
            .shared
            .metrics
            .lock()
            .unwrap_or_else(|e| e.into_inner())
    }

    /// Capability profile of the current connection.
    pub fn capabilities(&self) -> TrainerCapabilities {
        *self
            .shared
            .capabilities
            .lock()
            .unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shared() -> Arc<LinkShared> {
        Arc::new(LinkShared {
            state: Mutex::new(LinkState::Disconnected),
            metrics: Mutex::new(TrainerMetrics::default()),
            capabilities: Mutex::new(TrainerCapabilities::default()),
            cadence: Mutex::new(CadenceEstimator::new()),
            event_tx: Mutex::new(None),
        })
    }

    #[test]
    fn test_indoor_bike_packet_updates_snapshot() {
        let shared = shared();
        // speed + power
        let data = [0x40, 0x00, 0xB8, 0x0B, 0xFA, 0x00];
        assert!(TrainerLink::apply_indoor_bike_data(&shared, &data));

        let metrics = *shared.metrics.lock().unwrap();
        assert_eq!(metrics.power_watts, Some(250));
        assert!((metrics.speed_kmh.unwrap() - 30.0).abs() < 0.01);
        assert!(metrics.updated_at.is_some());
    }

    #[test]
    fn test_malformed_packet_keeps_last_value() {
        let shared = shared();
        let good = [0x40, 0x00, 0xB8, 0x0B, 0xFA, 0x00];
        assert!(TrainerLink::apply_indoor_bike_data(&shared, &good));

        // Truncated packet: dropped, previous power retained.
        let bad = [0x40, 0x00, 0xB8];
        assert!(!TrainerLink::apply_indoor_bike_data(&shared, &bad));
        assert_eq!(shared.metrics.lock().unwrap().power_watts, Some(250));
    }

    #[test]
    fn test_power_packet_derives_cadence_across_notifications() {
        let shared = shared();
        // Crank flag, revs=10 @ t=0
        let first = [0x20, 0x00, 0xC8, 0x00, 0x0A, 0x00, 0x00, 0x00];
        // revs=11 @ t=683 (~0.667s -> ~90 rpm)
        let second = [0x20, 0x00, 0xC8, 0x00, 0x0B, 0x00, 0xAB, 0x02];

        TrainerLink::apply_power_measurement(&shared, &first);
        assert!(shared.metrics.lock().unwrap().cadence_rpm.is_none());

        TrainerLink::apply_power_measurement(&shared, &second);
        let rpm = shared.metrics.lock().unwrap().cadence_rpm.unwrap();
        assert!((89..=91).contains(&rpm));
    }

    #[test]
    fn test_clear_session_state_resets_crank_history() {
        let shared = shared();
        let first = [0x20, 0x00, 0xC8, 0x00, 0x0A, 0x00, 0x00, 0x00];
        TrainerLink::apply_power_measurement(&shared, &first);

        shared.clear_session_state();

        // After a reset the next sample is treated as the first again.
        let second = [0x20, 0x00, 0xC8, 0x00, 0x0B, 0x00, 0xAB, 0x02];
        TrainerLink::apply_power_measurement(&shared, &second);
        assert!(shared.metrics.lock().unwrap().cadence_rpm.is_none());
    }

    #[test]
    fn test_negative_power_clamped_to_zero() {
        let shared = shared();
        // Power = -5W
        let data = [0x00, 0x00, 0xFB, 0xFF];
        TrainerLink::apply_power_measurement(&shared, &data);
        assert_eq!(shared.metrics.lock().unwrap().power_watts, Some(0));
    }
}
