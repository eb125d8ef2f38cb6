//! Mock sensor device.

use crate::error::{HardwareError, Result};
use crate::traits::SensorDevice;
use crate::types::{DeviceInfo, SensorInterrupt};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

#[derive(Debug, Default)]
struct SensorState {
    enabled: bool,
    enables: u32,
    resets: u32,
}

/// Mock fingerprint sensor.
///
/// Power and reset calls are recorded for inspection through the handle;
/// finger interrupts are injected with [`MockSensorHandle::touch`].
///
/// # Examples
///
/// ```
/// use whorl_hardware::mock::MockSensor;
/// use whorl_hardware::traits::SensorDevice;
///
/// #[tokio::main]
/// async fn main() -> whorl_hardware::Result<()> {
///     let (mut sensor, handle) = MockSensor::new();
///
///     sensor.enable().await?;
///     assert!(handle.is_enabled());
///
///     let mut interrupts = sensor.take_interrupts().expect("first take");
///     handle.touch().await?;
///     assert!(interrupts.recv().await.is_some());
///
///     Ok(())
/// }
/// ```
#[derive(Debug)]
pub struct MockSensor {
    state: Arc<Mutex<SensorState>>,
    interrupt_rx: Option<mpsc::Receiver<SensorInterrupt>>,
    name: String,
}

impl MockSensor {
    /// Create a new mock sensor with the default name.
    pub fn new() -> (Self, MockSensorHandle) {
        Self::with_name("Mock Fingerprint Sensor".to_string())
    }

    /// Create a new mock sensor with a custom name.
    pub fn with_name(name: String) -> (Self, MockSensorHandle) {
        let (interrupt_tx, interrupt_rx) = mpsc::channel(32);
        let state = Arc::new(Mutex::new(SensorState::default()));

        let sensor = Self {
            state: state.clone(),
            interrupt_rx: Some(interrupt_rx),
            name,
        };
        let handle = MockSensorHandle {
            state,
            interrupt_tx,
        };
        (sensor, handle)
    }
}

impl SensorDevice for MockSensor {
    async fn enable(&mut self) -> Result<()> {
        let mut state = self.state.lock().expect("sensor state poisoned");
        state.enabled = true;
        state.enables += 1;
        Ok(())
    }

    async fn disable(&mut self) -> Result<()> {
        self.state.lock().expect("sensor state poisoned").enabled = false;
        Ok(())
    }

    async fn reset(&mut self) -> Result<()> {
        self.state.lock().expect("sensor state poisoned").resets += 1;
        Ok(())
    }

    fn take_interrupts(&mut self) -> Option<mpsc::Receiver<SensorInterrupt>> {
        self.interrupt_rx.take()
    }

    async fn device_info(&self) -> Result<DeviceInfo> {
        Ok(DeviceInfo::new(self.name.clone(), "Mock Sensor v1.0").with_firmware_version("1.0.0"))
    }
}

/// Handle for controlling a [`MockSensor`].
#[derive(Debug, Clone)]
pub struct MockSensorHandle {
    state: Arc<Mutex<SensorState>>,
    interrupt_tx: mpsc::Sender<SensorInterrupt>,
}

impl MockSensorHandle {
    /// Simulate a finger touching the sensor: one hardware interrupt.
    ///
    /// # Errors
    ///
    /// Returns an error if the interrupt receiver has been dropped.
    pub async fn touch(&self) -> Result<()> {
        self.interrupt_tx
            .send(SensorInterrupt::now())
            .await
            .map_err(|_| HardwareError::disconnected("sensor interrupt channel closed"))
    }

    /// Whether the sensor is currently powered.
    pub fn is_enabled(&self) -> bool {
        self.state.lock().expect("sensor state poisoned").enabled
    }

    /// Number of enable calls so far.
    pub fn enable_count(&self) -> u32 {
        self.state.lock().expect("sensor state poisoned").enables
    }

    /// Number of hard resets so far.
    pub fn reset_count(&self) -> u32 {
        self.state.lock().expect("sensor state poisoned").resets
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_power_tracking() {
        let (mut sensor, handle) = MockSensor::new();
        assert!(!handle.is_enabled());

        sensor.enable().await.unwrap();
        assert!(handle.is_enabled());
        assert_eq!(handle.enable_count(), 1);

        sensor.disable().await.unwrap();
        assert!(!handle.is_enabled());
    }

    #[tokio::test]
    async fn test_interrupts_taken_once() {
        let (mut sensor, handle) = MockSensor::new();
        let mut interrupts = sensor.take_interrupts().unwrap();
        assert!(sensor.take_interrupts().is_none());

        handle.touch().await.unwrap();
        handle.touch().await.unwrap();
        assert!(interrupts.recv().await.is_some());
        assert!(interrupts.recv().await.is_some());
    }

    #[tokio::test]
    async fn test_touch_after_receiver_dropped() {
        let (mut sensor, handle) = MockSensor::new();
        drop(sensor.take_interrupts().unwrap());

        let result = handle.touch().await;
        assert!(matches!(result, Err(HardwareError::Disconnected { .. })));
    }

    #[tokio::test]
    async fn test_reset_count() {
        let (mut sensor, handle) = MockSensor::new();
        sensor.reset().await.unwrap();
        sensor.reset().await.unwrap();
        assert_eq!(handle.reset_count(), 2);
    }
}
