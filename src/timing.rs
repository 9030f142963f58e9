//! Per-phase timing capture.

use std::time::Duration;

use tracing::info;

/// Wall-clock durations for one invocation. Phases that did not run
/// report [`Duration::ZERO`].
#[derive(Clone, Copy, Debug, Default)]
pub struct Timings {
    pub before: Duration,
    pub main: Duration,
    pub after: Duration,
    pub total: Duration,
}

impl Timings {
    /// One structured summary line per completed invocation.
    pub(crate) fn log(&self, pathname: &str) {
        info!(
            pathname,
            before_us = self.before.as_micros() as u64,
            main_us = self.main.as_micros() as u64,
            after_us = self.after.as_micros() as u64,
            total_us = self.total.as_micros() as u64,
            "chain timing"
        );
    }
}
