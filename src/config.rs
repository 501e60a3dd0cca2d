//! # Framework Configuration
//!
//! Compile-time constants governing the scheduler, the parameter store and
//! the framework's reported identity. Per-model settings (base rate, port
//! counts, parameter tables) come from [`crate::metadata::ModelSpec`].

use crate::sync::Timeout;

/// Framework version reported by `Kernel::framework_version()`.
/// Ordered as (major, minor, fix, build).
pub const FRAMEWORK_VERSION: (u32, u32, u32, u32) = (2014, 0, 0, 0);

/// Base rate in seconds used by `ModelSpec::builder` when the caller does
/// not set one. 100 Hz matches the demo models.
pub const DEFAULT_BASE_RATE: f64 = 0.01;

/// How long `schedule()` waits for the flip semaphore before treating the
/// guard as unavailable. A commit holds the semaphore only across the
/// selector toggle, so an unbounded wait is bounded in practice.
pub const STEP_GUARD_TIMEOUT: Timeout = Timeout::Infinite;

/// How long `commit()` waits for the flip semaphore. The real-time path
/// holds it for a whole step, so the configuration side must be prepared
/// to wait at least one base period.
pub const FLIP_TIMEOUT: Timeout = Timeout::Infinite;

/// Largest element count accepted for one parameter, signal or port.
/// Model descriptions asking for more are rejected at load time.
pub const MAX_ELEMENTS: usize = 1 << 24;

/// Reserved leading slots in a signal probe buffer: the bookkeeping index
/// followed by one reserved value.
pub const PROBE_HEADER_LEN: usize = 2;

/// Message reported by `Kernel::model_error()` when execution stopped
/// without a recorded reason.
pub const STOPPED_WITHOUT_REASON: &str =
    "The model simulation was stopped, but no reason was specified. This may be expected behavior.";
