/// Lightweight pipeline instrumentation: stage timers plus the call
/// counters in `profiling`.
pub mod profiling;

pub use profiling::{CounterSnapshot, FunctionCounters, FUNCTION_COUNTERS};

use std::time::{Duration, Instant};

/// Wall-clock timer for one named pipeline stage. Reports once, either
/// at `finish()` or when dropped at scope end.
pub struct StageTimer {
    label: &'static str,
    started: Instant,
}

impl StageTimer {
    #[inline]
    pub fn start(label: &'static str) -> Self {
        Self {
            label,
            started: Instant::now(),
        }
    }

    #[inline]
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Stop the timer and report now instead of at scope end.
    pub fn finish(self) {}
}

impl Drop for StageTimer {
    fn drop(&mut self) {
        let ms = self.started.elapsed().as_secs_f64() * 1e3;
        println!("[timing] {}: {:.3}ms", self.label, ms);
    }
}

/// Time the rest of the enclosing scope as one stage.
#[macro_export]
macro_rules! time_stage {
    ($label:expr) => {
        let _stage_timer = $crate::perf::StageTimer::start($label);
    };
}
