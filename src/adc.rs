//! ADC1 sampler.
//!
//! Each pass converts every input channel and the internal reference
//! `ADC_SUBSAMPLES` times, interleaved, and returns the per-channel sums.
//! Interleaving keeps the reference and the inputs exposed to the same
//! supply ripple.

use embassy_stm32::{
    adc::{Adc, AnyAdcChannel, Vref},
    peripherals::ADC1,
};
use embassy_time::{Duration, with_timeout};
use ups12v_core::{
    analog::{AcquireError, CHANNEL_COUNT, Channel, RawFrame, Sampler},
    config::{ACQUIRE_TIMEOUT_MS, ADC_SUBSAMPLES},
};

pub struct AdcSampler {
    adc: Adc<'static, ADC1>,
    /// Indexed by `Channel::index`
    inputs: [AnyAdcChannel<ADC1>; CHANNEL_COUNT],
    reference: Vref,
}

impl AdcSampler {
    pub fn new(
        adc: Adc<'static, ADC1>,
        inputs: [AnyAdcChannel<ADC1>; CHANNEL_COUNT],
        reference: Vref,
    ) -> Self {
        Self {
            adc,
            inputs,
            reference,
        }
    }

    async fn convert(&mut self) -> RawFrame {
        let mut frame = RawFrame::default();
        for _ in 0..ADC_SUBSAMPLES {
            for channel in Channel::ALL {
                let code = self.adc.read(&mut self.inputs[channel.index()]).await;
                frame.sums[channel] += code as u32;
            }
            frame.reference += self.adc.read(&mut self.reference).await as u32;
        }
        frame
    }
}

impl Sampler for AdcSampler {
    async fn acquire(&mut self) -> Result<RawFrame, AcquireError> {
        with_timeout(Duration::from_millis(ACQUIRE_TIMEOUT_MS), self.convert())
            .await
            .map_err(|_| AcquireError::Timeout)
    }
}
