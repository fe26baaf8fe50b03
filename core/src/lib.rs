//! Control core of a 12V UPS.
//!
//! Samples the bus, the pack and its lower cell, turns raw ADC sums into
//! millivolts against the internal reference, smooths them, and runs the
//! four-state charge controller that switches the battery, trickle and
//! charge paths. Hardware is reached only through the [`analog::Sampler`],
//! [`power::PowerLines`] and [`supervisor::Watchdog`] traits.
#![no_std]

#[cfg(test)]
extern crate std;

#[macro_use]
mod fmt;

pub mod analog;
pub mod calibration;
pub mod command;
pub mod config;
pub mod control_state;
pub mod lookup;
pub mod power;
pub mod smoothing;
pub mod supervisor;
pub mod thresholds;

pub use analog::{AcquireError, Channel, ChannelValues, RawFrame, Sampler};
pub use config::UpsConfig;
pub use control_state::{ControlState, Cutoffs, StatusSnapshot};
pub use power::{PowerLine, PowerLines, PowerState, Transition};
pub use supervisor::{Supervisor, TickError, Watchdog};
