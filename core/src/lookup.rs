//! Battery voltage to state-of-charge translation.
//!
//! A lithium pack reads noticeably higher while it is being charged than
//! while it is loaded, so there are two curves. Both are measured on the
//! 2S pack and stored as ascending `(millivolts, percent)` breakpoints;
//! values between breakpoints are linearly interpolated with round-half-up
//! integer math.

/// One point of a calibration curve.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Breakpoint {
    pub mv: u16,
    pub percent: u8,
}

const fn bp(mv: u16, percent: u8) -> Breakpoint {
    Breakpoint { mv, percent }
}

/// Immutable, strictly ascending breakpoint table.
#[derive(Clone, Copy, Debug)]
pub struct CalibrationTable {
    points: &'static [Breakpoint],
}

impl CalibrationTable {
    /// # Panics
    ///
    /// At compile time when used in a `const`, if the table has fewer than
    /// two points or is not strictly ascending in both fields.
    pub const fn new(points: &'static [Breakpoint]) -> Self {
        assert!(points.len() >= 2);
        let mut i = 1;
        while i < points.len() {
            assert!(points[i].mv > points[i - 1].mv);
            assert!(points[i].percent > points[i - 1].percent);
            i += 1;
        }
        Self { points }
    }

    /// Breakpoints in ascending order.
    pub fn points(&self) -> &'static [Breakpoint] {
        self.points
    }

    /// Lowest breakpoint; voltages below it clamp here.
    pub fn first(&self) -> Breakpoint {
        self.points[0]
    }

    /// Highest breakpoint.
    pub fn last(&self) -> Breakpoint {
        self.points[self.points.len() - 1]
    }

    /// State of charge for a pack voltage.
    ///
    /// Clamps to 0 at or below the first breakpoint and to 100 at or above
    /// the last one.
    pub fn voltage_to_percent(&self, mv: u16) -> u8 {
        if mv <= self.first().mv {
            return 0;
        }
        if mv >= self.last().mv {
            return 100;
        }

        // The bounds checks above guarantee 0 < upper < len.
        let upper = self.points.partition_point(|p| p.mv <= mv);
        let (lo, hi) = (self.points[upper - 1], self.points[upper]);

        let offset = 10 * (mv - lo.mv) as u32 * (hi.percent - lo.percent) as u32
            / (hi.mv - lo.mv) as u32;
        lo.percent + ((offset + 5) / 10) as u8
    }

    /// Pack voltage for a state of charge.
    ///
    /// The command layer restricts input to 50..=100; anything outside the
    /// table's percent span is clamped to the end breakpoints.
    pub fn percent_to_voltage(&self, percent: u8) -> u16 {
        if percent <= self.first().percent {
            return self.first().mv;
        }
        if percent >= self.last().percent {
            return self.last().mv;
        }

        let upper = self.points.partition_point(|p| p.percent <= percent);
        let (lo, hi) = (self.points[upper - 1], self.points[upper]);

        let offset = 10 * (percent - lo.percent) as u32 * (hi.mv - lo.mv) as u32
            / (hi.percent - lo.percent) as u32;
        lo.mv + ((offset + 5) / 10) as u16
    }
}

const DISCHARGE_POINTS: [Breakpoint; 14] = [
    bp(6250, 0),
    bp(6750, 6),
    bp(6970, 12),
    bp(7100, 18),
    bp(7210, 24),
    bp(7280, 30),
    bp(7335, 36),
    bp(7380, 42),
    bp(7420, 48),
    bp(7460, 54),
    bp(7510, 60),
    bp(7560, 66),
    bp(7630, 72),
    bp(7950, 100),
];

const CHARGE_POINTS: [Breakpoint; 14] = [
    bp(7000, 0),
    bp(7200, 5),
    bp(7400, 10),
    bp(7600, 50),
    bp(7680, 55),
    bp(7740, 60),
    bp(7820, 65),
    bp(7900, 70),
    bp(7970, 75),
    bp(8050, 80),
    bp(8130, 85),
    bp(8220, 90),
    bp(8300, 95),
    bp(8395, 100),
];

/// Pack voltage under load.
pub const DISCHARGE_TABLE: CalibrationTable = CalibrationTable::new(&DISCHARGE_POINTS);

/// Pack voltage while the charger is connected.
pub const CHARGE_TABLE: CalibrationTable = CalibrationTable::new(&CHARGE_POINTS);
