//! # Sensor Subsystem Module
//!
//! The wearable's hardware sensors, seen through the `SensorSubsystem` trait:
//! list what is available, register a listener per sensor at a sampling
//! period, unregister everything. Readings flow back through a `ReadingSink`.
//!
//! `SimulatedSensors` runs one producer thread per registered sensor, each
//! with its own stop channel, so the recorder can be driven without hardware.
//! A listener waits out its sampling period on that channel, so a stop wakes
//! it at once and `unregister_all` returns without sleeping a full period.

use crate::error::SensorError;
use crate::reading::{SensorKind, SensorReading};
use crate::recorder::ReadingSink;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use std::sync::{Mutex, PoisonError};
use std::thread;
use std::time::Duration;

pub trait SensorSubsystem: Send + Sync {
    /// Sensor kinds present on this device
    fn available(&self) -> Vec<SensorKind>;

    /// Start delivering readings of `kind` into `sink` every `sampling_period`
    fn register(
        &self,
        kind: SensorKind,
        sampling_period: Duration,
        sink: ReadingSink,
    ) -> Result<(), SensorError>;

    /// Stop every listener registered so far. Safe to call repeatedly.
    fn unregister_all(&self);
}

struct Listener {
    kind: SensorKind,
    stop_tx: Sender<()>,
    handle: thread::JoinHandle<()>,
}

/// Sensor subsystem producing synthetic motion data.
pub struct SimulatedSensors {
    available: Vec<SensorKind>,
    listeners: Mutex<Vec<Listener>>,
}

impl SimulatedSensors {
    pub fn new(available: Vec<SensorKind>) -> Self {
        Self {
            available,
            listeners: Mutex::new(Vec::new()),
        }
    }

    /// A device that has every required sensor
    pub fn full() -> Self {
        Self::new(SensorKind::required())
    }

    fn sample(kind: SensorKind, tick: u64) -> Vec<f32> {
        let phase = tick as f32 * 0.1;
        (0..kind.value_count())
            .map(|axis| (phase + axis as f32).sin())
            .collect()
    }

    fn run_listener(
        kind: SensorKind,
        sampling_period: Duration,
        sink: ReadingSink,
        stop_rx: Receiver<()>,
    ) {
        let mut tick = 0u64;
        loop {
            let reading = SensorReading::now(kind.type_name(), Self::sample(kind, tick), 3);
            if !sink.push(reading) {
                log::debug!("Recorder for {} is gone, stopping listener", kind);
                break;
            }
            tick += 1;
            match stop_rx.recv_timeout(sampling_period) {
                Err(RecvTimeoutError::Timeout) => {}
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            }
        }
    }
}

impl SensorSubsystem for SimulatedSensors {
    fn available(&self) -> Vec<SensorKind> {
        self.available.clone()
    }

    fn register(
        &self,
        kind: SensorKind,
        sampling_period: Duration,
        sink: ReadingSink,
    ) -> Result<(), SensorError> {
        if !self.available.contains(&kind) {
            return Err(SensorError::Unavailable(kind.to_string()));
        }

        let (stop_tx, stop_rx) = bounded(1);
        let handle = thread::Builder::new()
            .name(format!("sensor-{}", kind.type_name()))
            .spawn(move || Self::run_listener(kind, sampling_period, sink, stop_rx))
            .map_err(|e| SensorError::RegistrationFailed {
                sensor: kind.to_string(),
                reason: e.to_string(),
            })?;

        log::debug!("Registered listener for {} every {:?}", kind, sampling_period);
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Listener { kind, stop_tx, handle });
        Ok(())
    }

    fn unregister_all(&self) {
        let listeners: Vec<Listener> = self
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();

        for listener in &listeners {
            let _ = listener.stop_tx.try_send(());
        }
        // Join so nothing is delivered after unregister returns
        for listener in listeners {
            if listener.handle.join().is_err() {
                log::error!("Listener thread for {} panicked", listener.kind);
            }
        }
    }
}

impl Drop for SimulatedSensors {
    fn drop(&mut self) {
        self.unregister_all();
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// Subsystem that never produces readings on its own; tests push them by hand.
    #[derive(Default)]
    pub struct ManualSensors {
        available: Vec<SensorKind>,
        sinks: Mutex<Vec<(SensorKind, ReadingSink)>>,
        pub unregister_calls: Mutex<usize>,
    }

    impl ManualSensors {
        pub fn new(available: Vec<SensorKind>) -> Self {
            Self {
                available,
                ..Default::default()
            }
        }

        pub fn registered(&self) -> Vec<SensorKind> {
            self.sinks.lock().unwrap().iter().map(|(kind, _)| *kind).collect()
        }

        /// Deliver a reading through the first registered sink
        pub fn emit(&self, reading: SensorReading) -> bool {
            match self.sinks.lock().unwrap().first() {
                Some((_, sink)) => sink.push(reading),
                None => false,
            }
        }
    }

    impl SensorSubsystem for ManualSensors {
        fn available(&self) -> Vec<SensorKind> {
            self.available.clone()
        }

        fn register(
            &self,
            kind: SensorKind,
            _sampling_period: Duration,
            sink: ReadingSink,
        ) -> Result<(), SensorError> {
            if !self.available.contains(&kind) {
                return Err(SensorError::Unavailable(kind.to_string()));
            }
            self.sinks.lock().unwrap().push((kind, sink));
            Ok(())
        }

        fn unregister_all(&self) {
            self.sinks.lock().unwrap().clear();
            *self.unregister_calls.lock().unwrap() += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn test_register_unavailable_sensor_fails() {
        let sensors = SimulatedSensors::new(vec![SensorKind::Accelerometer]);
        let (sink, _rx) = ReadingSink::detached();

        let result = sensors.register(SensorKind::Gyroscope, Duration::from_millis(5), sink);
        assert_eq!(result, Err(SensorError::Unavailable("android.sensor.gyroscope".to_string())));
    }

    #[test]
    fn test_simulated_sensor_delivers_until_unregistered() {
        let sensors = SimulatedSensors::new(vec![SensorKind::Accelerometer]);
        let (sink, rx) = ReadingSink::detached();

        sensors
            .register(SensorKind::Accelerometer, Duration::from_millis(1), sink)
            .unwrap();
        let first = rx.recv_timeout(Duration::from_secs(2)).expect("no reading delivered");
        assert_eq!(first.sensor_name, "android.sensor.accelerometer");
        assert_eq!(first.values.len(), 3);

        sensors.unregister_all();
        // Drain what was queued before the stop, then nothing else may arrive
        while rx.try_recv().is_ok() {}
        thread::sleep(Duration::from_millis(20));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_unregister_wakes_listener_mid_period() {
        let sensors = SimulatedSensors::new(vec![SensorKind::Gravity]);
        let (sink, rx) = ReadingSink::detached();

        sensors
            .register(SensorKind::Gravity, Duration::from_secs(30), sink)
            .unwrap();
        rx.recv_timeout(Duration::from_secs(2)).expect("no reading delivered");

        let started = Instant::now();
        sensors.unregister_all();
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_unregister_all_is_idempotent() {
        let sensors = SimulatedSensors::full();
        sensors.unregister_all();
        sensors.unregister_all();
    }
}
