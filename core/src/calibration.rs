//! Raw ADC sums to millivolts.
//!
//! The analog supply is whatever the regulator happens to deliver, so it is
//! measured on every pass instead of assumed. The factory programs the code
//! the internal reference produced at exactly 3.3 V (`VREFINT_CAL`); comparing
//! it with what the reference reads now yields the actual supply:
//!
//! ```text
//! supply_mv  = 3300 * (VREFINT_CAL - offset) * subsamples / reference_sum
//! channel_mv = sum * supply_mv * gain_num / (4095 * subsamples * gain_den)
//! ```
//!
//! `gain_num / gain_den` undoes the resistor divider in front of each input.
//! All arithmetic is unsigned integer; intermediates are widened to `u64`.

use core::fmt;

use crate::analog::{Channel, ChannelValues, RawFrame};

/// Supply voltage at which `VREFINT_CAL` is measured in production.
pub const FACTORY_CAL_MV: u32 = 3300;

/// Maximum code of the 12-bit converter.
pub const FULL_SCALE: u32 = 4095;

/// Divider compensation ratio for one input.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ChannelGain {
    pub numerator: u32,
    /// Must be non-zero
    pub denominator: u32,
}

impl ChannelGain {
    /// Gain of `numerator / denominator`.
    pub const fn new(numerator: u32, denominator: u32) -> Self {
        Self {
            numerator,
            denominator,
        }
    }

    /// Gain expressed in thousandths, the form the board calibration sheet uses.
    pub const fn per_mille(numerator: u32) -> Self {
        Self::new(numerator, 1000)
    }
}

/// Device and board constants the conversion depends on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CalibrationConfig {
    /// Factory reference code, read from system memory at boot
    pub vrefint_cal: u16,
    /// Per-device trim subtracted from `vrefint_cal`
    pub vrefint_cal_offset: u16,
    /// Hardware conversions accumulated into one logical sample
    pub subsamples: u32,
    /// Divider compensation per channel
    pub gains: ChannelValues<ChannelGain>,
    /// Lowest derived supply accepted as genuine, in millivolts
    pub supply_min_mv: u32,
    /// Highest derived supply accepted as genuine, in millivolts
    pub supply_max_mv: u32,
}

/// Why a frame could not be converted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CalibrationError {
    /// Reference channel reading implies an implausible supply, or the
    /// factory word is unusable
    ReferenceFault,
}

impl fmt::Display for CalibrationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CalibrationError::ReferenceFault => f.write_str("reference channel fault"),
        }
    }
}

/// Stateless converter from [`RawFrame`] to per-channel millivolts.
#[derive(Clone, Copy, Debug)]
pub struct Calibrator {
    config: CalibrationConfig,
}

impl Calibrator {
    /// # Panics
    ///
    /// If `subsamples` or any gain denominator is zero. Both are build-time
    /// board constants.
    pub const fn new(config: CalibrationConfig) -> Self {
        assert!(config.subsamples > 0);
        let mut i = 0;
        while i < config.gains.0.len() {
            assert!(config.gains.0[i].denominator > 0);
            i += 1;
        }
        Self { config }
    }

    /// Board constants this calibrator was built with.
    pub fn config(&self) -> &CalibrationConfig {
        &self.config
    }

    /// Actual analog supply in millivolts derived from the reference sum.
    ///
    /// # Arguments
    ///
    /// * `reference_sum` - Sum of `subsamples` internal reference conversions
    ///
    /// # Returns
    ///
    /// The supply, or `ReferenceFault` when the reference reads zero, the
    /// factory word is unusable, or the result falls outside
    /// `supply_min_mv..=supply_max_mv`.
    pub fn supply_mv(&self, reference_sum: u32) -> Result<u32, CalibrationError> {
        let cal = self
            .config
            .vrefint_cal
            .saturating_sub(self.config.vrefint_cal_offset) as u64;
        if reference_sum == 0 || cal == 0 {
            return Err(CalibrationError::ReferenceFault);
        }

        let numerator = FACTORY_CAL_MV as u64 * cal * self.config.subsamples as u64;
        let supply = numerator / reference_sum as u64;
        let band = self.config.supply_min_mv as u64..=self.config.supply_max_mv as u64;
        if supply == 0 || !band.contains(&supply) {
            return Err(CalibrationError::ReferenceFault);
        }
        Ok(supply as u32)
    }

    /// Converts one channel sum given an already derived supply voltage.
    ///
    /// Saturates at `u16::MAX`; non-decreasing in `sum`.
    pub fn channel_mv(&self, channel: Channel, sum: u32, supply_mv: u32) -> u16 {
        let gain = self.config.gains[channel];
        let numerator = (sum as u64)
            .saturating_mul(supply_mv as u64)
            .saturating_mul(gain.numerator as u64);
        let denominator =
            FULL_SCALE as u64 * self.config.subsamples as u64 * gain.denominator as u64;
        (numerator / denominator).min(u16::MAX as u64) as u16
    }

    /// Converts a whole frame. Fails without producing any reading when the
    /// reference is unusable.
    pub fn calibrate(&self, frame: &RawFrame) -> Result<ChannelValues<u16>, CalibrationError> {
        let supply = self.supply_mv(frame.reference)?;

        let mut readings = ChannelValues::splat(0);
        for channel in Channel::ALL {
            readings[channel] = self.channel_mv(channel, frame.sums[channel], supply);
        }
        Ok(readings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CAL: u16 = 1530;

    fn calibrator() -> Calibrator {
        Calibrator::new(CalibrationConfig {
            vrefint_cal: CAL,
            vrefint_cal_offset: 0,
            subsamples: 16,
            gains: ChannelValues::new([
                ChannelGain::per_mille(1384),
                ChannelGain::per_mille(3925),
                ChannelGain::per_mille(2664),
            ]),
            supply_min_mv: 2000,
            supply_max_mv: 3600,
        })
    }

    #[test]
    fn supply_matches_factory_conditions() {
        // Reference reads its calibration code at 3.3 V.
        assert_eq!(calibrator().supply_mv(CAL as u32 * 16), Ok(3300));
    }

    #[test]
    fn supply_tracks_sagging_rail() {
        // A higher reference code means a lower supply.
        let supply = calibrator().supply_mv(CAL as u32 * 16 * 33 / 30).unwrap();
        assert!((2999..=3001).contains(&supply));
    }

    #[test]
    fn zero_reference_is_a_fault() {
        assert_eq!(
            calibrator().supply_mv(0),
            Err(CalibrationError::ReferenceFault)
        );
        let frame = RawFrame {
            sums: ChannelValues::splat(30_000),
            reference: 0,
        };
        assert_eq!(
            calibrator().calibrate(&frame),
            Err(CalibrationError::ReferenceFault)
        );
    }

    #[test]
    fn near_zero_reference_is_a_fault() {
        // One LSB per subsample implies a ~5 V rail, beyond what the part runs on.
        assert_eq!(
            calibrator().supply_mv(16),
            Err(CalibrationError::ReferenceFault)
        );
        let frame = RawFrame {
            sums: ChannelValues::new([3_676 * 16, 3_793 * 16, 3_820 * 16]),
            reference: 16,
        };
        assert_eq!(
            calibrator().calibrate(&frame),
            Err(CalibrationError::ReferenceFault)
        );
    }

    #[test]
    fn supply_band_edges() {
        let cal = calibrator();
        // 3300 * 1530 * 16 / sum, solved for each edge of the band.
        assert_eq!(cal.supply_mv(22_434), Ok(3600));
        assert_eq!(
            cal.supply_mv(22_433),
            Err(CalibrationError::ReferenceFault)
        );
        assert_eq!(cal.supply_mv(40_392), Ok(2000));
        assert_eq!(
            cal.supply_mv(40_393),
            Err(CalibrationError::ReferenceFault)
        );
    }

    #[test]
    fn offset_consuming_factory_word_is_a_fault() {
        let mut config = *calibrator().config();
        config.vrefint_cal_offset = CAL;
        assert_eq!(
            Calibrator::new(config).supply_mv(1000),
            Err(CalibrationError::ReferenceFault)
        );
    }

    #[test]
    fn bus_reading_through_divider() {
        let cal = calibrator();
        // 12 V through a 3.925:1 divider lands at ~3057 mV on the pin, code 3793.
        let mv = cal.channel_mv(Channel::Bus, 3793 * 16, 3300);
        assert!((11_990..=12_000).contains(&mv), "{mv}");
    }

    #[test]
    fn full_frame() {
        let cal = calibrator();
        let frame = RawFrame {
            sums: ChannelValues::new([3_676 * 16, 3_793 * 16, 3_820 * 16]),
            reference: CAL as u32 * 16,
        };
        let mv = cal.calibrate(&frame).unwrap();
        assert!((4090..=4100).contains(&mv[Channel::Cell]), "{}", mv[Channel::Cell]);
        assert!((11_990..=12_000).contains(&mv[Channel::Bus]));
        assert!((8_200..=8_220).contains(&mv[Channel::Battery]));
    }

    #[test]
    fn monotonic_in_code() {
        let cal = calibrator();
        for channel in Channel::ALL {
            let mut previous = 0;
            for code in (0..=FULL_SCALE * 16).step_by(7) {
                let mv = cal.channel_mv(channel, code, 3300);
                assert!(mv >= previous, "{channel:?} code {code}");
                previous = mv;
            }
        }
    }

    #[test]
    fn saturates_instead_of_wrapping() {
        let cal = calibrator();
        assert_eq!(cal.channel_mv(Channel::Bus, u32::MAX, u32::MAX), u16::MAX);
    }
}
