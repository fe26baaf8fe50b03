//! Analog acquisition boundary.
//!
//! The hardware sampler lives in the firmware crate; this module defines what
//! it hands to the control core: one [`RawFrame`] per supervisor tick, or an
//! [`AcquireError`] when the conversion did not complete.
//!
//! # Channels
//!
//! | Channel   | Rail                                      | Nominal  |
//! |-----------|-------------------------------------------|----------|
//! | `Cell`    | lower cell of the 2S pack, to ground      | 4100 mV  |
//! | `Bus`     | external 12V input/output rail            | 12000 mV |
//! | `Battery` | full pack                                 | 8200 mV  |
//!
//! The internal reference (VREFINT) is sampled in the same pass and carried
//! separately in [`RawFrame::reference`].

use core::fmt;
use core::ops::{Index, IndexMut};

/// Number of physical channels converted each pass (reference excluded).
pub const CHANNEL_COUNT: usize = 3;

/// Physical analog inputs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Channel {
    /// Single element of the 2S pack, referenced to ground
    Cell,
    /// External 12V rail, used to detect mains presence
    Bus,
    /// Whole battery pack
    Battery,
}

impl Channel {
    /// All channels in conversion order.
    pub const ALL: [Channel; CHANNEL_COUNT] = [Channel::Cell, Channel::Bus, Channel::Battery];

    /// Position of the channel in a [`ChannelValues`] array.
    #[inline(always)]
    pub const fn index(self) -> usize {
        self as usize
    }
}

/// Fixed-size per-channel container indexed by [`Channel`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ChannelValues<T>(pub [T; CHANNEL_COUNT]);

impl<T: Copy> ChannelValues<T> {
    /// Wraps values given in [`Channel::ALL`] order.
    pub const fn new(values: [T; CHANNEL_COUNT]) -> Self {
        Self(values)
    }

    /// Builds a container with every channel set to `value`.
    pub const fn splat(value: T) -> Self {
        Self([value; CHANNEL_COUNT])
    }

    /// Copy of one channel's value.
    #[inline(always)]
    pub fn get(&self, channel: Channel) -> T {
        self.0[channel.index()]
    }
}

impl<T> Index<Channel> for ChannelValues<T> {
    type Output = T;

    fn index(&self, channel: Channel) -> &T {
        &self.0[channel.index()]
    }
}

impl<T> IndexMut<Channel> for ChannelValues<T> {
    fn index_mut(&mut self, channel: Channel) -> &mut T {
        &mut self.0[channel.index()]
    }
}

/// Output of one acquisition pass.
///
/// Each entry is the sum of `subsamples` raw 12-bit conversions of that
/// channel; the driver accumulates rather than averages so that no
/// resolution is lost before calibration.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RawFrame {
    /// Per-channel accumulated codes
    pub sums: ChannelValues<u32>,
    /// Accumulated codes of the internal reference channel
    pub reference: u32,
}

/// Reasons an acquisition pass produced no usable frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AcquireError {
    /// Conversion did not finish within its deadline
    Timeout,
}

impl fmt::Display for AcquireError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AcquireError::Timeout => f.write_str("ADC conversion timed out"),
        }
    }
}

/// Hardware conversion of all channels in one pass.
///
/// Implementations block (or await) for at most one hardware conversion
/// sequence and either return a complete frame or an error; partial frames
/// are never produced.
#[allow(async_fn_in_trait)]
pub trait Sampler {
    /// Runs one pass over every channel and the reference.
    ///
    /// # Returns
    ///
    /// A complete frame, or `Timeout` if the converter did not finish in time.
    async fn acquire(&mut self) -> Result<RawFrame, AcquireError>;
}
