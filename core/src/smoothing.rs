//! Per-channel moving average.
//!
//! Each channel keeps the last `N` calibrated readings in a ring buffer.
//! The buffer is seeded with a nominal voltage so the mean is defined from
//! the first tick and does not start out dragged toward zero.

use crate::analog::{Channel, ChannelValues, CHANNEL_COUNT};

/// Fixed-depth ring buffer with an arithmetic mean.
#[derive(Clone, Copy, Debug)]
pub struct MovingAverage<const N: usize> {
    buffer: [u16; N],
    idx: usize,
}

impl<const N: usize> MovingAverage<N> {
    /// Creates a buffer with every slot set to `seed`.
    pub const fn new(seed: u16) -> Self {
        assert!(N > 0);
        Self {
            buffer: [seed; N],
            idx: 0,
        }
    }

    /// Overwrites the oldest slot.
    pub fn add(&mut self, value: u16) {
        self.buffer[self.idx] = value;
        self.idx = (self.idx + 1) % N;
    }

    /// Integer mean of all `N` slots, rounded down.
    pub fn mean(&self) -> u16 {
        let sum: u32 = self.buffer.iter().map(|&v| v as u32).sum();
        (sum / N as u32) as u16
    }

    /// Number of readings averaged.
    pub const fn depth(&self) -> usize {
        N
    }
}

/// One independent [`MovingAverage`] per analog channel.
#[derive(Clone, Copy, Debug)]
pub struct Smoother<const N: usize> {
    channels: [MovingAverage<N>; CHANNEL_COUNT],
}

impl<const N: usize> Smoother<N> {
    /// Seeds every channel's buffer with its nominal reading.
    ///
    /// # Arguments
    ///
    /// * `seeds` - Per-channel value the mean reports until real readings
    ///   displace it
    pub const fn new(seeds: ChannelValues<u16>) -> Self {
        Self {
            channels: [
                MovingAverage::new(seeds.0[0]),
                MovingAverage::new(seeds.0[1]),
                MovingAverage::new(seeds.0[2]),
            ],
        }
    }

    /// Pushes one reading into `channel`'s window, evicting the oldest.
    pub fn add(&mut self, channel: Channel, value: u16) {
        self.channels[channel.index()].add(value);
    }

    /// Current mean of `channel`'s window in millivolts.
    pub fn mean(&self, channel: Channel) -> u16 {
        self.channels[channel.index()].mean()
    }

    /// Feeds a full set of readings and returns the updated means.
    pub fn update(&mut self, readings: &ChannelValues<u16>) -> ChannelValues<u16> {
        let mut means = ChannelValues::splat(0);
        for channel in Channel::ALL {
            self.add(channel, readings[channel]);
            means[channel] = self.mean(channel);
        }
        means
    }
}
