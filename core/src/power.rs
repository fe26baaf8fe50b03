//! Charge/discharge mode controller.
//!
//! The pack sits behind three switched lines:
//! - **Battery**: connects the pack to the charger/bus node
//! - **Trickle**: low-current maintenance charge path
//! - **Charge**: full-current charge path
//!
//! Discharge into the load happens passively through the ideal diode once
//! the bus drops, so the `Discharge` state drives no lines.
//!
//! # Transitions
//!
//! ```text
//!            bus low                 bus high
//!   Idle ─────────────► Discharge ─────────────► Charge
//!    │  bat < idle cutoff                ▲   │
//!    ├───────────────────────────────────┘   │ bat > cutoff
//!    │  bat < cutoff - hyst                  ▼
//!    └──────────────────────────────────► Trickle ──► Idle (bat > cutoff)
//! ```
//!
//! Within a state, rows are checked in priority order and the first match
//! wins. Bus loss always has the highest priority.

use core::fmt;

/// Operating mode of the pack.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum PowerState {
    /// Pack full, all paths open
    #[default]
    Idle = 0,
    /// Maintenance charge near full
    Trickle = 1,
    /// Bus absent, pack powers the load
    Discharge = 2,
    /// Full-current charge
    Charge = 3,
}

impl PowerState {
    /// Symbol reported to shell and display.
    pub const fn as_str(self) -> &'static str {
        match self {
            PowerState::Idle => "IDLE",
            PowerState::Trickle => "TRICKLE",
            PowerState::Discharge => "DISCHARGE",
            PowerState::Charge => "CHARGE",
        }
    }

    /// Inverse of `state as u8`, for values read back from an atomic.
    pub const fn from_u8(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(PowerState::Idle),
            1 => Some(PowerState::Trickle),
            2 => Some(PowerState::Discharge),
            3 => Some(PowerState::Charge),
            _ => None,
        }
    }
}

impl fmt::Display for PowerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Switched power path.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PowerLine {
    Battery,
    Trickle,
    Charge,
}

/// Output capability the state machine drives.
///
/// Lines are open-loop: nothing reads them back. Setting a line that is
/// already in the requested level must be harmless.
pub trait PowerLines {
    fn enable(&mut self, line: PowerLine);
    fn disable(&mut self, line: PowerLine);
}

/// Everything one evaluation looks at, already smoothed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PowerInputs {
    /// Smoothed bus voltage
    pub bus_mv: u16,
    /// Smoothed pack voltage
    pub battery_mv: u16,
    pub charge_cutoff_mv: u16,
    pub idle_discharge_cutoff_mv: u16,
}

/// Fixed thresholds of the controller.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PowerLimits {
    /// Bus voltage separating "mains present" from "mains lost"
    pub switch_threshold_mv: u16,
    /// Gap below the charge cutoff before an idle pack is topped up again
    pub trickle_hysteresis_mv: u16,
}

/// A state change and the state it left.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Transition {
    pub from: PowerState,
    pub to: PowerState,
}

/// Four-state charge controller.
pub struct PowerStateMachine {
    limits: PowerLimits,
    state: PowerState,
}

impl PowerStateMachine {
    /// Starts in [`PowerState::Idle`].
    pub const fn new(limits: PowerLimits) -> Self {
        Self {
            limits,
            state: PowerState::Idle,
        }
    }

    /// Current mode.
    pub fn state(&self) -> PowerState {
        self.state
    }

    /// Thresholds this controller was built with.
    pub fn limits(&self) -> &PowerLimits {
        &self.limits
    }

    /// Drives every line to the level `Idle` expects. Called once at boot.
    pub fn init_lines(&self, lines: &mut impl PowerLines) {
        lines.disable(PowerLine::Charge);
        lines.disable(PowerLine::Trickle);
        lines.disable(PowerLine::Battery);
    }

    /// Evaluates one tick.
    ///
    /// Returns the transition taken, if any. Lines are only touched when the
    /// state changes.
    pub fn step(&mut self, inputs: &PowerInputs, lines: &mut impl PowerLines) -> Option<Transition> {
        let from = self.state;
        let bus_lost = inputs.bus_mv < self.limits.switch_threshold_mv;
        let bus_present = inputs.bus_mv > self.limits.switch_threshold_mv;
        let battery = inputs.battery_mv;

        let next = match from {
            PowerState::Idle => {
                if bus_lost {
                    Some(PowerState::Discharge)
                } else if battery < inputs.idle_discharge_cutoff_mv {
                    lines.enable(PowerLine::Battery);
                    lines.enable(PowerLine::Charge);
                    Some(PowerState::Charge)
                } else if battery
                    < inputs
                        .charge_cutoff_mv
                        .saturating_sub(self.limits.trickle_hysteresis_mv)
                {
                    lines.enable(PowerLine::Battery);
                    lines.enable(PowerLine::Trickle);
                    Some(PowerState::Trickle)
                } else {
                    None
                }
            }
            PowerState::Trickle => {
                if bus_lost {
                    lines.disable(PowerLine::Battery);
                    lines.disable(PowerLine::Trickle);
                    Some(PowerState::Discharge)
                } else if battery < inputs.idle_discharge_cutoff_mv {
                    lines.disable(PowerLine::Trickle);
                    lines.enable(PowerLine::Charge);
                    Some(PowerState::Charge)
                } else if battery > inputs.charge_cutoff_mv {
                    lines.disable(PowerLine::Trickle);
                    lines.disable(PowerLine::Battery);
                    Some(PowerState::Idle)
                } else {
                    None
                }
            }
            PowerState::Discharge => {
                if bus_present {
                    lines.enable(PowerLine::Battery);
                    lines.enable(PowerLine::Charge);
                    Some(PowerState::Charge)
                } else {
                    None
                }
            }
            PowerState::Charge => {
                if bus_lost {
                    lines.disable(PowerLine::Charge);
                    lines.disable(PowerLine::Battery);
                    Some(PowerState::Discharge)
                } else if battery > inputs.charge_cutoff_mv {
                    lines.disable(PowerLine::Charge);
                    lines.enable(PowerLine::Trickle);
                    Some(PowerState::Trickle)
                } else {
                    None
                }
            }
        };

        next.map(|to| {
            self.state = to;
            Transition { from, to }
        })
    }
}
