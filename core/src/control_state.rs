//! State shared between the supervisor and its observers.
//!
//! The supervisor is the only writer of voltages and mode. Observers (shell,
//! status display) read them; the shell is the only writer of the cutoffs.
//! Every field is a single atomic word so a reader never sees a torn value,
//! though a snapshot taken across fields may straddle a tick.

use core::fmt;

use portable_atomic::{AtomicU8, AtomicU16, AtomicU32, Ordering};

use crate::analog::{Channel, ChannelValues};
use crate::config::{CELLS_IN_SERIES, UpsConfig};
use crate::lookup::{CHARGE_TABLE, DISCHARGE_TABLE};
use crate::power::PowerState;
use crate::thresholds::{ThresholdError, ThresholdKind, ThresholdPolicy, ThresholdRequest};

/// Current pair of cutoffs, in pack millivolts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Cutoffs {
    /// Charging stops above this
    pub charge_mv: u16,
    /// An idle pack below this is topped up
    pub idle_discharge_mv: u16,
}

/// Consistent-enough view of the controller for reporting.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct StatusSnapshot {
    pub voltages: ChannelValues<u16>,
    pub state: PowerState,
}

impl StatusSnapshot {
    /// Smoothed bus voltage.
    pub fn bus_mv(&self) -> u16 {
        self.voltages[Channel::Bus]
    }

    /// Smoothed pack voltage.
    pub fn battery_mv(&self) -> u16 {
        self.voltages[Channel::Battery]
    }

    /// Upper cell minus lower cell. Positive when the upper cell is higher.
    pub fn balance_mv(&self) -> i32 {
        self.voltages[Channel::Battery] as i32
            - CELLS_IN_SERIES as i32 * self.voltages[Channel::Cell] as i32
    }

    /// State of charge, read off the curve that matches the current mode.
    pub fn percent(&self) -> u8 {
        let table = match self.state {
            PowerState::Discharge => &DISCHARGE_TABLE,
            _ => &CHARGE_TABLE,
        };
        table.voltage_to_percent(self.battery_mv())
    }
}

/// `bus  battery  balance  percent%  STATE`, as printed by `poll`.
impl fmt::Display for StatusSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}  {}  {}  {}%  {}",
            self.bus_mv(),
            self.battery_mv(),
            self.balance_mv(),
            self.percent(),
            self.state
        )
    }
}

/// Lock-free cell holding everything the tasks share.
///
/// Lives in a `static`; all methods take `&self`.
pub struct ControlState {
    voltages: [AtomicU16; 3],
    state: AtomicU8,
    charge_cutoff_mv: AtomicU16,
    idle_discharge_cutoff_mv: AtomicU16,
    ticks: AtomicU32,
    skipped: AtomicU32,
}

impl ControlState {
    /// `seeds` is what readers see before the first tick completes.
    pub const fn new(seeds: ChannelValues<u16>, cutoffs: Cutoffs) -> Self {
        Self {
            voltages: [
                AtomicU16::new(seeds.0[0]),
                AtomicU16::new(seeds.0[1]),
                AtomicU16::new(seeds.0[2]),
            ],
            state: AtomicU8::new(PowerState::Idle as u8),
            charge_cutoff_mv: AtomicU16::new(cutoffs.charge_mv),
            idle_discharge_cutoff_mv: AtomicU16::new(cutoffs.idle_discharge_mv),
            ticks: AtomicU32::new(0),
            skipped: AtomicU32::new(0),
        }
    }

    /// Boot state for a configuration: smoothing seeds as voltages, the
    /// configured cutoffs, Idle.
    ///
    /// # Example
    ///
    /// ```
    /// use ups12v_core::{ControlState, UpsConfig};
    ///
    /// static SHARED: ControlState = ControlState::from_config(&UpsConfig::DEFAULT);
    /// assert_eq!(SHARED.cutoffs().charge_mv, UpsConfig::DEFAULT.charge_cutoff_mv);
    /// ```
    pub const fn from_config(config: &UpsConfig) -> Self {
        Self::new(
            config.smoothing_seeds,
            Cutoffs {
                charge_mv: config.charge_cutoff_mv,
                idle_discharge_mv: config.idle_discharge_cutoff_mv,
            },
        )
    }

    /// Stores freshly smoothed readings for all channels.
    ///
    /// # Arguments
    ///
    /// * `voltages` - Per-channel means in millivolts
    pub fn publish_voltages(&self, voltages: &ChannelValues<u16>) {
        for channel in Channel::ALL {
            self.voltages[channel.index()].store(voltages[channel], Ordering::Relaxed);
        }
    }

    /// Records the mode the supervisor just entered.
    pub fn publish_state(&self, state: PowerState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Last published reading of one channel, in millivolts.
    pub fn voltage(&self, channel: Channel) -> u16 {
        self.voltages[channel.index()].load(Ordering::Relaxed)
    }

    /// All channels, each loaded separately.
    pub fn voltages(&self) -> ChannelValues<u16> {
        let mut out = ChannelValues::splat(0);
        for channel in Channel::ALL {
            out[channel] = self.voltage(channel);
        }
        out
    }

    /// Mode as last published by the supervisor.
    pub fn power_state(&self) -> PowerState {
        // Only the supervisor stores here, always from a valid PowerState.
        PowerState::from_u8(self.state.load(Ordering::Acquire)).unwrap_or_default()
    }

    /// Voltages and mode for reporting.
    ///
    /// # Returns
    ///
    /// A copy read field by field; it may mix two adjacent ticks.
    pub fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            voltages: self.voltages(),
            state: self.power_state(),
        }
    }

    /// Cutoffs the next tick will compare against, in pack millivolts.
    pub fn cutoffs(&self) -> Cutoffs {
        Cutoffs {
            charge_mv: self.charge_cutoff_mv.load(Ordering::Acquire),
            idle_discharge_mv: self.idle_discharge_cutoff_mv.load(Ordering::Acquire),
        }
    }

    /// Validates and stores a cutoff.
    ///
    /// On error nothing is stored. The charge cutoff must stay strictly above
    /// the idle-discharge cutoff. Returns the stored pack voltage.
    pub fn set_threshold(
        &self,
        kind: ThresholdKind,
        request: ThresholdRequest,
        policy: &ThresholdPolicy,
    ) -> Result<u16, ThresholdError> {
        let mv = match policy.resolve(kind, request) {
            Ok(mv) => mv,
            Err(err) => {
                warn!("rejected {} cutoff request {}", kind, request);
                return Err(err);
            }
        };

        let current = self.cutoffs();
        let (charge, idle) = match kind {
            ThresholdKind::Charge => (mv, current.idle_discharge_mv),
            ThresholdKind::IdleDischarge => (current.charge_mv, mv),
        };
        if charge <= idle {
            warn!("cutoff {}mV would invert limits ({}mV <= {}mV)", mv, charge, idle);
            return Err(ThresholdError::Inconsistent);
        }

        match kind {
            ThresholdKind::Charge => self.charge_cutoff_mv.store(mv, Ordering::Release),
            ThresholdKind::IdleDischarge => {
                self.idle_discharge_cutoff_mv.store(mv, Ordering::Release)
            }
        }
        info!("{} cutoff set to {}mV", kind, mv);
        Ok(mv)
    }

    /// Counts a tick that ran the whole pipeline.
    pub fn record_tick(&self) {
        self.ticks.fetch_add(1, Ordering::Relaxed);
    }

    /// Counts a tick abandoned before the state machine ran.
    pub fn record_skip(&self) {
        self.skipped.fetch_add(1, Ordering::Relaxed);
    }

    /// Ticks that completed the whole pipeline.
    pub fn ticks(&self) -> u32 {
        self.ticks.load(Ordering::Relaxed)
    }

    /// Ticks abandoned after an acquisition or calibration fault.
    pub fn skipped(&self) -> u32 {
        self.skipped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> ControlState {
        ControlState::new(
            ChannelValues::new([4100, 12_000, 8200]),
            Cutoffs {
                charge_mv: 8200,
                idle_discharge_mv: 7500,
            },
        )
    }

    #[test]
    fn starts_idle_with_seeds() {
        let s = state();
        assert_eq!(s.power_state(), PowerState::Idle);
        assert_eq!(s.voltage(Channel::Bus), 12_000);
        assert_eq!(s.ticks(), 0);
    }

    #[test]
    fn boot_state_follows_config() {
        let mut config = UpsConfig::DEFAULT;
        config.idle_discharge_cutoff_mv = 7400;
        let s = ControlState::from_config(&config);
        assert_eq!(s.voltages(), config.smoothing_seeds);
        assert_eq!(
            s.cutoffs(),
            Cutoffs {
                charge_mv: 8200,
                idle_discharge_mv: 7400,
            }
        );
        assert_eq!(s.power_state(), PowerState::Idle);
    }

    #[test]
    fn accepted_cutoff_is_stored() {
        let s = state();
        let policy = UpsConfig::DEFAULT.thresholds;
        assert_eq!(
            s.set_threshold(ThresholdKind::Charge, ThresholdRequest::Percent(85), &policy),
            Ok(8130)
        );
        assert_eq!(s.cutoffs().charge_mv, 8130);
    }

    #[test]
    fn out_of_range_leaves_cutoff_untouched() {
        let s = state();
        let policy = UpsConfig::DEFAULT.thresholds;
        assert_eq!(
            s.set_threshold(
                ThresholdKind::IdleDischarge,
                ThresholdRequest::Percent(45),
                &policy
            ),
            Err(ThresholdError::PercentOutOfRange)
        );
        assert_eq!(s.cutoffs().idle_discharge_mv, 7500);
    }

    #[test]
    fn inverted_limits_are_rejected() {
        let s = state();
        let policy = UpsConfig::DEFAULT.thresholds;
        // 4100 mV per cell puts idle-discharge level with the charge cutoff.
        assert_eq!(
            s.set_threshold(
                ThresholdKind::IdleDischarge,
                ThresholdRequest::CellMillivolts(4100),
                &policy
            ),
            Err(ThresholdError::Inconsistent)
        );
        assert_eq!(
            s.set_threshold(
                ThresholdKind::Charge,
                ThresholdRequest::CellMillivolts(3800),
                &policy
            ),
            Ok(7600)
        );
        assert_eq!(s.cutoffs().charge_mv, 7600);
    }

    #[test]
    fn balance_and_percent_follow_mode() {
        let mut snapshot = StatusSnapshot {
            voltages: ChannelValues::new([4000, 12_000, 8050]),
            state: PowerState::Charge,
        };
        assert_eq!(snapshot.balance_mv(), 50);
        assert_eq!(snapshot.percent(), 80);
        snapshot.state = PowerState::Discharge;
        assert_eq!(snapshot.percent(), 100);
    }

    #[test]
    fn status_line() {
        let snapshot = StatusSnapshot {
            voltages: ChannelValues::new([4150, 11_500, 8250]),
            state: PowerState::Discharge,
        };
        assert_eq!(std::format!("{snapshot}"), "11500  8250  -50  100%  DISCHARGE");
    }
}
