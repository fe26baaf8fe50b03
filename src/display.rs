//! Status observer.
//!
//! Renders the same line `poll` prints and logs it over RTT every
//! `STATUS_PERIOD_MS`. Reads shared state only.

use core::fmt::Write;

use embassy_time::{Duration, Ticker};
use heapless::String;
use ups12v_core::{ControlState, config::STATUS_PERIOD_MS};

#[embassy_executor::task]
pub async fn display_task(shared: &'static ControlState) {
    let mut ticker = Ticker::every(Duration::from_millis(STATUS_PERIOD_MS));
    loop {
        ticker.next().await;

        let mut line: String<64> = String::new();
        if write!(line, "{}", shared.snapshot()).is_ok() {
            defmt::info!("status: {}", line.as_str());
        }
    }
}
