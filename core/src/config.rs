//! Board constants and tunables.
//!
//! Everything the control loop depends on is fixed at build time and
//! collected in [`UpsConfig::DEFAULT`]. Voltages are pack-level unless the
//! name says otherwise.

use core::ops::RangeInclusive;

use crate::analog::ChannelValues;
use crate::calibration::{CalibrationConfig, ChannelGain};
use crate::power::PowerLimits;
use crate::thresholds::ThresholdPolicy;

/// Cells in series in the pack.
pub const CELLS_IN_SERIES: u16 = 2;

/// Bus voltage below which mains is considered lost.
pub const SWITCH_THRESHOLD_MV: u16 = 11_900;

/// Idle pack is topped up once it falls this far below the charge cutoff.
pub const TRICKLE_HYSTERESIS_MV: u16 = 200;

/// Per-cell charge cutoff at boot (~85% on the charge curve).
pub const DEFAULT_CHARGE_CUTOFF_CELL_MV: u16 = 4100;

/// Per-cell idle-discharge cutoff at boot (~65% on the discharge curve).
pub const DEFAULT_IDLE_DISCHARGE_CUTOFF_CELL_MV: u16 = 3750;

/// Readings kept per channel by the moving average.
pub const SMOOTHING_DEPTH: usize = 8;

/// Nominal readings the moving average starts from: cell, bus, pack.
pub const SMOOTHING_SEEDS: ChannelValues<u16> = ChannelValues::new([
    DEFAULT_CHARGE_CUTOFF_CELL_MV,
    12_000,
    DEFAULT_CHARGE_CUTOFF_CELL_MV * CELLS_IN_SERIES,
]);

/// Hardware conversions summed into one logical sample.
pub const ADC_SUBSAMPLES: u32 = 16;

/// Divider compensation per channel (cell, bus, pack), in thousandths.
pub const CHANNEL_GAINS: ChannelValues<ChannelGain> = ChannelValues::new([
    ChannelGain::per_mille(1384),
    ChannelGain::per_mille(3925),
    ChannelGain::per_mille(2664),
]);

/// `VREFINT_CAL` of a typical part, used when the device word is unavailable.
pub const NOMINAL_VREFINT_CAL: u16 = 1530;

/// Analog supply the part can actually run from. A reference reading that
/// implies anything outside is treated as a channel fault.
pub const SUPPLY_MIN_MV: u32 = 2000;

/// Upper end of the plausible analog supply.
pub const SUPPLY_MAX_MV: u32 = 3600;

/// Accepted percentage for cutoff commands.
pub const CUTOFF_PERCENT_RANGE: RangeInclusive<u16> = 50..=100;

/// Accepted per-cell voltage for cutoff commands.
pub const CUTOFF_CELL_MV_RANGE: RangeInclusive<u16> = 3800..=4200;

/// Supervisor period.
pub const SUPERVISOR_PERIOD_MS: u64 = 200;

/// Independent watchdog deadline; must stay above the supervisor period.
pub const WATCHDOG_TIMEOUT_MS: u32 = 800;

/// Deadline for one full acquisition pass.
pub const ACQUIRE_TIMEOUT_MS: u64 = 50;

/// Period of the status/display observer.
pub const STATUS_PERIOD_MS: u64 = 2000;

/// Period of `poll` reports on the shell.
pub const POLL_PERIOD_MS: u64 = 1000;

/// Aggregate configuration handed to the supervisor and the command layer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UpsConfig {
    /// Switch threshold and trickle hysteresis
    pub limits: PowerLimits,
    /// Reference word, subsampling, dividers and the plausible supply band
    pub calibration: CalibrationConfig,
    /// Readings the moving average and the shared state start from
    pub smoothing_seeds: ChannelValues<u16>,
    /// Pack charge cutoff at boot
    pub charge_cutoff_mv: u16,
    /// Pack idle-discharge cutoff at boot
    pub idle_discharge_cutoff_mv: u16,
    /// Bounds for cutoff commands
    pub thresholds: ThresholdPolicy,
}

impl UpsConfig {
    /// Board defaults with the nominal reference word.
    pub const DEFAULT: UpsConfig = UpsConfig {
        limits: PowerLimits {
            switch_threshold_mv: SWITCH_THRESHOLD_MV,
            trickle_hysteresis_mv: TRICKLE_HYSTERESIS_MV,
        },
        calibration: CalibrationConfig {
            vrefint_cal: NOMINAL_VREFINT_CAL,
            vrefint_cal_offset: 0,
            subsamples: ADC_SUBSAMPLES,
            gains: CHANNEL_GAINS,
            supply_min_mv: SUPPLY_MIN_MV,
            supply_max_mv: SUPPLY_MAX_MV,
        },
        smoothing_seeds: SMOOTHING_SEEDS,
        charge_cutoff_mv: DEFAULT_CHARGE_CUTOFF_CELL_MV * CELLS_IN_SERIES,
        idle_discharge_cutoff_mv: DEFAULT_IDLE_DISCHARGE_CUTOFF_CELL_MV * CELLS_IN_SERIES,
        thresholds: ThresholdPolicy {
            percent: CUTOFF_PERCENT_RANGE,
            cell_mv: CUTOFF_CELL_MV_RANGE,
            cells_in_series: CELLS_IN_SERIES,
        },
    };

    /// Default configuration with the device's factory reference word.
    pub fn with_vrefint_cal(vrefint_cal: u16) -> Self {
        let mut config = Self::DEFAULT;
        config.calibration.vrefint_cal = vrefint_cal;
        config
    }
}

impl Default for UpsConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}
