//! Sensor data model shared by the subsystem, the recorder and the CSV export.

use std::fmt;

/// Nominal sampling interval requested for every sensor (50 Hz).
pub const SAMPLING_PERIOD_US: u64 = 20_000;

/// Motion sensors the wearable tries to record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SensorKind {
    Accelerometer,
    AccelerometerUncalibrated,
    Gravity,
    Gyroscope,
    GyroscopeUncalibrated,
    LinearAcceleration,
    RotationVector,
}

impl SensorKind {
    /// Stable type string, as the platform sensor registry names it
    pub fn type_name(&self) -> &'static str {
        match self {
            SensorKind::Accelerometer => "android.sensor.accelerometer",
            SensorKind::AccelerometerUncalibrated => "android.sensor.accelerometer_uncalibrated",
            SensorKind::Gravity => "android.sensor.gravity",
            SensorKind::Gyroscope => "android.sensor.gyroscope",
            SensorKind::GyroscopeUncalibrated => "android.sensor.gyroscope_uncalibrated",
            SensorKind::LinearAcceleration => "android.sensor.linear_acceleration",
            SensorKind::RotationVector => "android.sensor.rotation_vector",
        }
    }

    /// Number of values one event of this sensor carries
    pub fn value_count(&self) -> usize {
        match self {
            SensorKind::AccelerometerUncalibrated | SensorKind::GyroscopeUncalibrated => 6,
            SensorKind::RotationVector => 5,
            _ => 3,
        }
    }

    /// The full set a recording session subscribes to
    pub fn required() -> Vec<SensorKind> {
        vec![
            SensorKind::Accelerometer,
            SensorKind::AccelerometerUncalibrated,
            SensorKind::Gravity,
            SensorKind::Gyroscope,
            SensorKind::GyroscopeUncalibrated,
            SensorKind::LinearAcceleration,
            SensorKind::RotationVector,
        ]
    }
}

impl fmt::Display for SensorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_name())
    }
}

/// One timestamped sample delivered by the sensor subsystem.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorReading {
    /// Milliseconds since the Unix epoch
    pub timestamp_ms: i64,
    pub sensor_name: String,
    pub values: Vec<f32>,
    pub accuracy: i32,
}

impl SensorReading {
    pub fn new(timestamp_ms: i64, sensor_name: impl Into<String>, values: Vec<f32>, accuracy: i32) -> Self {
        Self {
            timestamp_ms,
            sensor_name: sensor_name.into(),
            values,
            accuracy,
        }
    }

    /// Reading stamped with the current wall clock
    pub fn now(sensor_name: impl Into<String>, values: Vec<f32>, accuracy: i32) -> Self {
        Self::new(chrono::Utc::now().timestamp_millis(), sensor_name, values, accuracy)
    }
}
