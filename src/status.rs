//! # Error Register
//!
//! A latched error/warning register shared by the parameter store and the
//! step scheduler.
//!
//! ## Latching Rules
//!
//! ```text
//!   report(Fatal)  ── stop flag clear? ──► set stop flag, drop any pending
//!        │                                 warning, record this message
//!        │
//!        └─────────── stop flag set?  ──► keep the first fatal message
//!
//!   report(Warning) ─ no message pending? ─► record it
//!                   └ message pending?    ─► dropped
//! ```
//!
//! Only the *current* message is kept; there is no history. The stop flag
//! is never cleared: `clear_message()` removes the text so a later report
//! can be seen, but a halted run stays halted.

use std::cell::RefCell;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use critical_section::Mutex;
use tracing::{error, warn};

use crate::sync;

/// Severity of a reported condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Surfaced to the operator; execution continues.
    Warning,
    /// Latches the stop flag; scheduling is refused from now on.
    Fatal,
}

#[derive(Default)]
struct Register {
    message: Option<String>,
    stopped: bool,
}

/// Shared error register for one run.
pub struct ErrorSink {
    register: Mutex<RefCell<Register>>,
    /// Mirror of `Register::stopped` so the real-time path can check it
    /// without entering the critical section.
    halted: AtomicBool,
}

impl ErrorSink {
    pub fn new() -> Self {
        Self {
            register: Mutex::new(RefCell::new(Register::default())),
            halted: AtomicBool::new(false),
        }
    }

    /// Record a condition. Returns `true` if `message` became the current
    /// message, `false` if an earlier one was kept.
    pub fn report(&self, severity: Severity, message: impl Into<String>) -> bool {
        let message = message.into();

        let latched = sync::critical_section(|cs| {
            let mut reg = self.register.borrow_ref_mut(cs);
            if severity == Severity::Fatal && !reg.stopped {
                reg.stopped = true;
                reg.message = None;
                self.halted.store(true, Ordering::Release);
            }
            if reg.message.is_none() {
                reg.message = Some(message.clone());
                true
            } else {
                false
            }
        });

        match severity {
            Severity::Fatal => error!(latched, "{}", message),
            Severity::Warning => warn!(latched, "{}", message),
        }
        latched
    }

    /// Report a fatal error.
    pub fn fatal(&self, message: impl Into<String>) -> bool {
        self.report(Severity::Fatal, message)
    }

    /// Report a warning.
    pub fn warning(&self, message: impl Into<String>) -> bool {
        self.report(Severity::Warning, message)
    }

    /// The current message, if any.
    pub fn message(&self) -> Option<String> {
        sync::critical_section(|cs| self.register.borrow_ref(cs).message.clone())
    }

    /// Whether a fatal error has stopped execution.
    #[inline]
    pub fn is_halted(&self) -> bool {
        self.halted.load(Ordering::Acquire)
    }

    /// Remove the current message. The stop flag is left as is.
    pub fn clear_message(&self) {
        sync::critical_section(|cs| {
            self.register.borrow_ref_mut(cs).message = None;
        });
    }
}

impl Default for ErrorSink {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ErrorSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErrorSink")
            .field("halted", &self.is_halted())
            .field("message", &self.message())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
