//! sensor-link: record motion sensors on a wearable, stream the session as
//! CSV to a paired handheld.
//!
//! The wearable side is [`session::WearableService`] around a
//! [`recorder::SensorRecorder`]; the handheld side is
//! [`companion::CompanionController`] plus [`receiver::HandheldService`].
//! Platform capabilities sit behind the traits in [`transport`] and
//! [`sensors`]; [`local_link`] and [`sensors::SimulatedSensors`] implement
//! them in-process.

pub mod companion;
pub mod config;
pub mod error;
pub mod local_link;
pub mod reading;
pub mod receiver;
pub mod recorder;
pub mod sensors;
pub mod session;
pub mod transport;
