//! Progress-callback trait for per-unit conversion events.
//!
//! Inject an [`Arc<dyn ConversionProgressCallback>`] via
//! [`crate::config::ConversionConfigBuilder::progress_callback`] to receive
//! events as the worker pool processes each unit.
//!
//! Callbacks are invoked from the pool's coordinator, which is the only
//! owner of the run's bookkeeping. They must return quickly: forward to a
//! channel or bump a counter, never await network I/O. Events are advisory;
//! a run is finished when `convert` returns, not when the counter reaches the
//! total.
//!
//! # Example
//!
//! ```rust
//! use edgequake_doc2md::{ConversionProgressCallback, ConversionConfig, UnitResult};
//! use std::sync::Arc;
//!
//! struct Printer;
//!
//! impl ConversionProgressCallback for Printer {
//!     fn on_unit_complete(&self, result: &UnitResult, completed: usize, total: usize) {
//!         eprintln!("unit {} done ({completed}/{total})", result.index);
//!     }
//! }
//!
//! let config = ConversionConfig::builder()
//!     .progress_callback(Arc::new(Printer))
//!     .build()
//!     .unwrap();
//! ```

use crate::error::UnitError;
use crate::output::UnitResult;
use std::sync::Arc;

/// Called by the worker pool as it processes units.
///
/// All methods have default no-op implementations so callers only override
/// what they care about. `index` is the 0-based position of the unit in the
/// run; `attempt` counts from 1.
pub trait ConversionProgressCallback: Send + Sync {
    /// Called once before the first unit is dispatched.
    fn on_conversion_start(&self, total_units: usize) {
        let _ = total_units;
    }

    /// Called when a unit is handed to a worker.
    fn on_unit_start(&self, index: usize, attempt: u32, total_units: usize) {
        let _ = (index, attempt, total_units);
    }

    /// Called when a unit succeeds. `completed` never decreases and reaches
    /// `total_units` on the last success.
    fn on_unit_complete(&self, result: &UnitResult, completed: usize, total_units: usize) {
        let _ = (result, completed, total_units);
    }

    /// Called when an attempt fails. The unit goes back to the queue unless
    /// the retry policy is exhausted.
    fn on_unit_error(&self, error: &UnitError, attempt: u32, total_units: usize) {
        let _ = (error, attempt, total_units);
    }

    /// Called once after the last unit succeeded.
    fn on_conversion_complete(&self, total_units: usize) {
        let _ = total_units;
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl ConversionProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::ConversionConfig`].
pub type ProgressCallback = Arc<dyn ConversionProgressCallback>;
