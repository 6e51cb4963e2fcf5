//! Running the driver on an embassy executor

use embassy_time::{Duration, Instant, Timer};
use log::info;

use crate::clock::{Clock, Millis};
use crate::driver::MeterDriver;
use crate::transport::Transport;

/// [`Clock`] backed by the embassy time driver.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmbassyClock;

impl Clock for EmbassyClock {
    fn now(&self) -> Millis {
        // Truncation is intended; all driver arithmetic wraps.
        Millis::new(Instant::now().as_millis() as u32)
    }
}

/// Tick `driver` forever at a fixed `period`.
///
/// The period should be well below the driver's read period so responses
/// are picked up promptly.
pub async fn run<T: Transport, const FINE: usize, const COARSE: usize>(
    driver: &mut MeterDriver<T, FINE, COARSE>,
    period: Duration,
) -> ! {
    info!("Energy meter task started, ticking every {} ms", period.as_millis());
    let clock = EmbassyClock;
    loop {
        driver.tick_with(&clock);
        Timer::after(period).await;
    }
}
