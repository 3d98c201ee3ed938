/// Instrumentation for the render pipeline hot paths
/// Provides per-stage call counting behind the `profiling` feature
use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe performance counters for pipeline stage tracking
pub struct FunctionCounters {
    // Geometry counters
    pub triangles_submitted: AtomicU64,
    pub triangles_clipped_out: AtomicU64,

    // Rasterization counters
    pub triangles_culled: AtomicU64,
    pub triangles_rasterized: AtomicU64,
    pub fragments_shaded: AtomicU64,
    pub fragments_blended: AtomicU64,

    // Shadow map counters
    pub dsm_points_inserted: AtomicU64,
    pub dsm_samples: AtomicU64,

    // Framebuffer counters
    pub framebuffer_clear_calls: AtomicU64,
}

impl FunctionCounters {
    pub const fn new() -> Self {
        Self {
            triangles_submitted: AtomicU64::new(0),
            triangles_clipped_out: AtomicU64::new(0),
            triangles_culled: AtomicU64::new(0),
            triangles_rasterized: AtomicU64::new(0),
            fragments_shaded: AtomicU64::new(0),
            fragments_blended: AtomicU64::new(0),
            dsm_points_inserted: AtomicU64::new(0),
            dsm_samples: AtomicU64::new(0),
            framebuffer_clear_calls: AtomicU64::new(0),
        }
    }

    /// Reset all counters to zero
    pub fn reset(&self) {
        self.triangles_submitted.store(0, Ordering::Relaxed);
        self.triangles_clipped_out.store(0, Ordering::Relaxed);
        self.triangles_culled.store(0, Ordering::Relaxed);
        self.triangles_rasterized.store(0, Ordering::Relaxed);
        self.fragments_shaded.store(0, Ordering::Relaxed);
        self.fragments_blended.store(0, Ordering::Relaxed);
        self.dsm_points_inserted.store(0, Ordering::Relaxed);
        self.dsm_samples.store(0, Ordering::Relaxed);
        self.framebuffer_clear_calls.store(0, Ordering::Relaxed);
    }

    /// Get snapshot of all counters
    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            triangles_submitted: self.triangles_submitted.load(Ordering::Relaxed),
            triangles_clipped_out: self.triangles_clipped_out.load(Ordering::Relaxed),
            triangles_culled: self.triangles_culled.load(Ordering::Relaxed),
            triangles_rasterized: self.triangles_rasterized.load(Ordering::Relaxed),
            fragments_shaded: self.fragments_shaded.load(Ordering::Relaxed),
            fragments_blended: self.fragments_blended.load(Ordering::Relaxed),
            dsm_points_inserted: self.dsm_points_inserted.load(Ordering::Relaxed),
            dsm_samples: self.dsm_samples.load(Ordering::Relaxed),
            framebuffer_clear_calls: self.framebuffer_clear_calls.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of counter values at a point in time
#[derive(Debug, Clone, Copy)]
pub struct CounterSnapshot {
    pub triangles_submitted: u64,
    pub triangles_clipped_out: u64,
    pub triangles_culled: u64,
    pub triangles_rasterized: u64,
    pub fragments_shaded: u64,
    pub fragments_blended: u64,
    pub dsm_points_inserted: u64,
    pub dsm_samples: u64,
    pub framebuffer_clear_calls: u64,
}

impl CounterSnapshot {
    /// Print formatted report
    pub fn print_report(&self) {
        println!("\n=== Performance Counters Report ===");
        println!("\nGeometry:");
        println!("  triangles submitted:        {:12}", self.triangles_submitted);
        println!("  triangles clipped out:      {:12}", self.triangles_clipped_out);

        println!("\nRasterization:");
        println!("  triangles culled:           {:12}", self.triangles_culled);
        println!("  triangles rasterized:       {:12}", self.triangles_rasterized);
        println!("  fragments shaded:           {:12}", self.fragments_shaded);
        println!("  fragments blended:          {:12}", self.fragments_blended);
        if self.fragments_shaded > 0 {
            let blend_rate =
                (self.fragments_blended as f64 / self.fragments_shaded as f64) * 100.0;
            println!("  blend rate:                 {:11.2}%", blend_rate);
        }

        println!("\nShadow Maps:");
        println!("  visibility points inserted: {:12}", self.dsm_points_inserted);
        println!("  shadow samples:             {:12}", self.dsm_samples);

        println!("\nFramebuffer:");
        println!("  clear calls:                {:12}", self.framebuffer_clear_calls);

        println!();
    }
}

/// Global function counters instance
pub static FUNCTION_COUNTERS: FunctionCounters = FunctionCounters::new();

/// Macro for incrementing a counter (only when profiling feature is enabled)
#[macro_export]
macro_rules! count_call {
    ($counter:expr) => {
        #[cfg(feature = "profiling")]
        {
            $counter.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        }
    };
}

/// Macro for adding to a counter (only when profiling feature is enabled)
#[macro_export]
macro_rules! count_add {
    ($counter:expr, $value:expr) => {
        #[cfg(feature = "profiling")]
        {
            $counter.fetch_add($value, std::sync::atomic::Ordering::Relaxed);
        }
    };
}
