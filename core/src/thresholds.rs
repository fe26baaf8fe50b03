//! Validation of user-supplied cutoff thresholds.
//!
//! Cutoffs are stored as pack millivolts. A request arrives either as a
//! state-of-charge percentage, translated through the curve that matches
//! the cutoff (charge curve for the charge cutoff, discharge curve for the
//! idle-discharge cutoff), or as a per-cell voltage multiplied by the
//! number of cells in series.

use core::fmt;
use core::ops::RangeInclusive;

use crate::lookup::{CalibrationTable, CHARGE_TABLE, DISCHARGE_TABLE};

/// Which of the two cutoffs a request targets.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ThresholdKind {
    /// Charging stops above this pack voltage
    Charge,
    /// An idle pack is recharged below this pack voltage
    IdleDischarge,
}

impl ThresholdKind {
    /// Curve used to translate a percentage for this cutoff.
    pub fn table(self) -> &'static CalibrationTable {
        match self {
            ThresholdKind::Charge => &CHARGE_TABLE,
            ThresholdKind::IdleDischarge => &DISCHARGE_TABLE,
        }
    }
}

/// Raw request as typed by the user.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ThresholdRequest {
    /// State of charge, `0..=100`
    Percent(u16),
    /// Voltage of one cell; scaled to the pack on resolve
    CellMillivolts(u16),
}

/// Why a cutoff request was refused.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ThresholdError {
    /// Percentage outside the accepted span
    PercentOutOfRange,
    /// Per-cell voltage outside the accepted span
    VoltageOutOfRange,
    /// Would leave the charge cutoff at or below the idle-discharge cutoff
    Inconsistent,
}

impl fmt::Display for ThresholdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ThresholdError::PercentOutOfRange | ThresholdError::VoltageOutOfRange => {
                f.write_str("The value is not in valid range")
            }
            ThresholdError::Inconsistent => {
                f.write_str("Charge limit must stay above idle discharge limit")
            }
        }
    }
}

/// Accepted input spans.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ThresholdPolicy {
    /// Percentages accepted; anything above 100 is refused regardless
    pub percent: RangeInclusive<u16>,
    /// Per-cell millivolts accepted
    pub cell_mv: RangeInclusive<u16>,
    pub cells_in_series: u16,
}

impl ThresholdPolicy {
    /// Translates a request into pack millivolts without storing it.
    ///
    /// # Arguments
    ///
    /// * `kind` - Cutoff the request targets; picks the curve for percentages
    /// * `request` - Value as typed by the user
    ///
    /// # Returns
    ///
    /// Pack millivolts, or the reason the request is out of bounds.
    pub fn resolve(&self, kind: ThresholdKind, request: ThresholdRequest) -> Result<u16, ThresholdError> {
        match request {
            ThresholdRequest::Percent(percent) => {
                if !self.percent.contains(&percent) {
                    return Err(ThresholdError::PercentOutOfRange);
                }
                let percent = u8::try_from(percent)
                    .ok()
                    .filter(|percent| *percent <= 100)
                    .ok_or(ThresholdError::PercentOutOfRange)?;
                Ok(kind.table().percent_to_voltage(percent))
            }
            ThresholdRequest::CellMillivolts(mv) => {
                if !self.cell_mv.contains(&mv) {
                    return Err(ThresholdError::VoltageOutOfRange);
                }
                Ok(mv.saturating_mul(self.cells_in_series))
            }
        }
    }
}
