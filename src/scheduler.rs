//! # Step Scheduler
//!
//! Runs the model's step function once per base period and keeps the
//! simulation clock. Each step is a two-call critical section:
//!
//! ```text
//!            schedule()                         acknowledge()
//!   Idle ─────────────────────► InStep ─────────────────────────► Idle
//!    │    take flip semaphore             ticks += 1
//!    │    mirror inputs                   release flip semaphore
//!    │    step(ctx) at t = ticks·rate
//!    │
//!    └── any fatal error ──► Halted   (absorbing: schedule() always fails)
//! ```
//!
//! ## Protocol
//!
//! 1. **schedule**: refused if execution has halted, or if a step is
//!    already in flight (fatal). Otherwise takes the flip semaphore, runs
//!    the step function and returns the time the step was computed for.
//! 2. **acknowledge**: refused (fatal) unless a step is in flight.
//!    Advances the clock by exactly one base period and releases the
//!    semaphore.
//!
//! The semaphore is held from (1) to (2), so a parameter commit can never
//! flip the read side in the middle of a step.

use std::sync::Arc;

use tracing::trace;

use crate::config::STEP_GUARD_TIMEOUT;
use crate::error::ScheduleError;
use crate::metadata::ModelSpec;
use crate::model::{Model, StepContext};
use crate::params::ParameterStore;
use crate::signals::SignalFrame;
use crate::status::ErrorSink;
use crate::sync::BinarySemaphore;

/// Raised when `schedule()` is called with a step still in flight.
pub const SCHEDULE_WITHOUT_ACK: &str = "Each call to Schedule() MUST be followed by a call to ModelUpdate() before Schedule() is called again.";

/// Raised when `acknowledge()` is called with no step in flight.
pub const ACK_WITHOUT_SCHEDULE: &str = "Model Update Failed";

/// Raised when signals are probed outside a step.
pub const PROBE_OUTSIDE_STEP: &str =
    "SignalProbe should only be called between ScheduleTasks and PostOutputs";

// ---------------------------------------------------------------------------
// Scheduler struct
// ---------------------------------------------------------------------------

/// Clock, in-flight counter and the step-side resources of one run.
pub struct StepScheduler {
    spec: Arc<ModelSpec>,
    model: Box<dyn Model>,
    params: Arc<ParameterStore>,
    signals: SignalFrame,
    flip: Arc<dyn BinarySemaphore>,
    errors: Arc<ErrorSink>,

    /// Acknowledged steps since start.
    ticks: u64,

    /// 1 between a successful `schedule()` and its `acknowledge()`.
    in_critical_section: u32,
}

impl StepScheduler {
    pub fn new(
        spec: Arc<ModelSpec>,
        model: Box<dyn Model>,
        params: Arc<ParameterStore>,
        signals: SignalFrame,
        flip: Arc<dyn BinarySemaphore>,
        errors: Arc<ErrorSink>,
    ) -> Self {
        Self {
            spec,
            model,
            params,
            signals,
            flip,
            errors,
            ticks: 0,
            in_critical_section: 0,
        }
    }

    /// Run one step. Returns the simulation time the outputs belong to,
    /// i.e. the clock value *before* the step is acknowledged.
    pub fn schedule(&mut self, inputs: &[f64], outputs: &mut [f64]) -> Result<f64, ScheduleError> {
        if self.errors.is_halted() {
            return Err(ScheduleError::Halted);
        }
        // The in-flight step holds the semaphore; check before waiting on it
        if self.in_critical_section != 0 {
            self.errors.fatal(SCHEDULE_WITHOUT_ACK);
            return Err(ScheduleError::ProtocolViolation(SCHEDULE_WITHOUT_ACK));
        }
        check_port("input", self.spec.input_width(), inputs.len())?;
        check_port("output", self.spec.output_width(), outputs.len())?;

        if let Err(e) = self.flip.acquire(STEP_GUARD_TIMEOUT) {
            self.errors
                .fatal(format!("Failed to acquire the step guard: {}", e));
            return Err(ScheduleError::ResourceExhaustion(e));
        }

        self.signals.load_inputs(inputs);
        let time = self.time();
        let ctx = StepContext {
            inputs,
            outputs,
            time,
            params: self.params.reader(),
            signals: &mut self.signals,
        };

        if let Err(e) = self.model.step(ctx) {
            self.flip.release();
            self.errors.fatal(e.message.clone());
            return Err(ScheduleError::StepFailed(e));
        }

        self.in_critical_section = 1;
        trace!(tick = self.ticks, time, "step executed");
        Ok(time)
    }

    /// Close the step opened by [`schedule`](Self::schedule) and advance
    /// the clock.
    pub fn acknowledge(&mut self) -> Result<(), ScheduleError> {
        if self.in_critical_section != 1 {
            self.errors.fatal(ACK_WITHOUT_SCHEDULE);
            return Err(ScheduleError::ProtocolViolation(ACK_WITHOUT_SCHEDULE));
        }
        self.in_critical_section = 0;
        self.ticks += 1;
        self.flip.release();
        Ok(())
    }

    /// Stop execution. The first fatal message is kept.
    pub fn halt(&self, message: impl Into<String>) {
        self.errors.fatal(message);
    }

    /// Probe signal values; see [`SignalFrame::probe`]. Meant to be called
    /// between `schedule()` and `acknowledge()`. Called elsewhere it halts
    /// execution but still returns the values.
    pub fn probe_signals(&self, indices: &[i64]) -> Vec<f64> {
        if self.in_critical_section == 0 {
            self.errors.fatal(PROBE_OUTSIDE_STEP);
        }
        self.signals.probe(indices)
    }

    /// Current simulation time in seconds.
    #[inline]
    pub fn time(&self) -> f64 {
        self.ticks as f64 * self.spec.base_rate
    }

    #[inline]
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Whether a step is waiting for `acknowledge()`.
    #[inline]
    pub fn in_step(&self) -> bool {
        self.in_critical_section != 0
    }

    #[inline]
    pub fn is_halted(&self) -> bool {
        self.errors.is_halted()
    }

    pub fn signals(&self) -> &SignalFrame {
        &self.signals
    }

    pub(crate) fn model_mut(&mut self) -> &mut dyn Model {
        self.model.as_mut()
    }
}

impl std::fmt::Debug for StepScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepScheduler")
            .field("model", &self.spec.name)
            .field("ticks", &self.ticks)
            .field("in_critical_section", &self.in_critical_section)
            .field("halted", &self.is_halted())
            .finish()
    }
}

fn check_port(port: &'static str, expected: usize, actual: usize) -> Result<(), ScheduleError> {
    if expected != actual {
        return Err(ScheduleError::PortMismatch {
            port,
            expected,
            actual,
        });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{NativeCodec, TypeTag, ValueCodec};
    use crate::error::{ModelError, SyncError};
    use crate::sync::{HostSemaphore, Timeout};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Fixture {
        scheduler: StepScheduler,
        params: Arc<ParameterStore>,
        flip: Arc<HostSemaphore>,
        errors: Arc<ErrorSink>,
        calls: Arc<AtomicUsize>,
    }

    /// Gain model: Out1 = gain * In1, publishes the gain as signal 0.
    fn fixture() -> Fixture {
        let spec = Arc::new(
            ModelSpec::builder("gain")
                .scalar("gain", TypeTag::Double, 2.0)
                .signal("gain", "gain", TypeTag::Double, 0.0)
                .inport("In1", TypeTag::Double)
                .outport("Out1", TypeTag::Double)
                .build()
                .unwrap(),
        );
        let codec: Arc<dyn ValueCodec> = Arc::new(NativeCodec);
        let flip = Arc::new(HostSemaphore::new());
        let errors = Arc::new(ErrorSink::new());
        let params = Arc::new(
            ParameterStore::new(spec.clone(), codec.clone(), flip.clone(), errors.clone()).unwrap(),
        );
        let signals = SignalFrame::new(spec.clone(), codec).unwrap();

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let model = move |ctx: StepContext<'_>| -> Result<(), ModelError> {
            counter.fetch_add(1, Ordering::SeqCst);
            let gain = ctx.params.get(0, 0).map_err(|e| ModelError::new(e.to_string()))?;
            ctx.signals.publish(0, gain)?;
            ctx.outputs[0] = gain * ctx.inputs[0];
            Ok(())
        };

        let scheduler = StepScheduler::new(
            spec,
            Box::new(model),
            params.clone(),
            signals,
            flip.clone(),
            errors.clone(),
        );
        Fixture {
            scheduler,
            params,
            flip,
            errors,
            calls,
        }
    }

    #[test]
    fn test_step_and_acknowledge() {
        let mut f = fixture();
        let mut out = [0.0];

        let t = f.scheduler.schedule(&[3.0], &mut out).unwrap();
        assert_eq!(t, 0.0);
        assert_eq!(out, [6.0]);
        assert!(f.scheduler.in_step());
        assert!(!f.flip.is_available());

        f.scheduler.acknowledge().unwrap();
        assert!(!f.scheduler.in_step());
        assert!(f.flip.is_available());
        assert_eq!(f.scheduler.ticks(), 1);
        assert_eq!(f.scheduler.time(), 0.01);
    }

    #[test]
    fn test_schedule_twice_is_fatal() {
        let mut f = fixture();
        let mut out = [0.0];
        f.scheduler.schedule(&[1.0], &mut out).unwrap();

        assert_eq!(
            f.scheduler.schedule(&[1.0], &mut out),
            Err(ScheduleError::ProtocolViolation(SCHEDULE_WITHOUT_ACK))
        );
        assert_eq!(f.calls.load(Ordering::SeqCst), 1);
        assert!(f.errors.is_halted());
        assert_eq!(f.errors.message().as_deref(), Some(SCHEDULE_WITHOUT_ACK));

        // The in-flight step can still be closed
        f.scheduler.acknowledge().unwrap();
        assert!(f.flip.is_available());
        assert_eq!(f.scheduler.schedule(&[1.0], &mut out), Err(ScheduleError::Halted));
    }

    #[test]
    fn test_acknowledge_without_schedule_is_fatal() {
        let mut f = fixture();
        assert_eq!(
            f.scheduler.acknowledge(),
            Err(ScheduleError::ProtocolViolation(ACK_WITHOUT_SCHEDULE))
        );
        assert_eq!(f.scheduler.ticks(), 0);
        assert!(f.errors.is_halted());
        assert!(f.flip.is_available());
    }

    #[test]
    fn test_halt_refuses_further_steps() {
        let mut f = fixture();
        let mut out = [0.0];
        f.scheduler.halt("fatal");
        f.scheduler.halt("later");
        for _ in 0..3 {
            assert_eq!(f.scheduler.schedule(&[1.0], &mut out), Err(ScheduleError::Halted));
        }
        assert_eq!(f.calls.load(Ordering::SeqCst), 0);
        assert_eq!(f.errors.message().as_deref(), Some("fatal"));
    }

    #[test]
    fn test_halt_during_step() {
        let mut f = fixture();
        let mut out = [0.0];
        f.scheduler.schedule(&[1.0], &mut out).unwrap();
        f.scheduler.halt("fatal");

        assert_eq!(f.scheduler.schedule(&[1.0], &mut out), Err(ScheduleError::Halted));
        assert_eq!(f.errors.message().as_deref(), Some("fatal"));
        assert_eq!(f.calls.load(Ordering::SeqCst), 1);

        f.scheduler.acknowledge().unwrap();
        assert!(f.flip.is_available());
        assert_eq!(f.scheduler.schedule(&[1.0], &mut out), Err(ScheduleError::Halted));
    }

    #[test]
    fn test_port_mismatch_is_local() {
        let mut f = fixture();
        let mut out = [0.0; 2];
        assert_eq!(
            f.scheduler.schedule(&[1.0], &mut out),
            Err(ScheduleError::PortMismatch {
                port: "output",
                expected: 1,
                actual: 2
            })
        );
        assert!(f.scheduler.schedule(&[], &mut out[..1]).is_err());
        assert!(!f.errors.is_halted());
        assert!(f.flip.is_available());
        assert_eq!(f.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_step_failure_halts() {
        let spec = Arc::new(ModelSpec::builder("bad").build().unwrap());
        let codec: Arc<dyn ValueCodec> = Arc::new(NativeCodec);
        let flip = Arc::new(HostSemaphore::new());
        let errors = Arc::new(ErrorSink::new());
        let params = Arc::new(
            ParameterStore::new(spec.clone(), codec.clone(), flip.clone(), errors.clone()).unwrap(),
        );
        let signals = SignalFrame::new(spec.clone(), codec).unwrap();
        let model = |_ctx: StepContext<'_>| -> Result<(), ModelError> { Err(ModelError::new("diverged")) };
        let mut scheduler =
            StepScheduler::new(spec, Box::new(model), params, signals, flip.clone(), errors.clone());

        assert_eq!(
            scheduler.schedule(&[], &mut []),
            Err(ScheduleError::StepFailed(ModelError::new("diverged")))
        );
        assert!(!scheduler.in_step());
        assert!(flip.is_available());
        assert_eq!(errors.message().as_deref(), Some("diverged"));
        assert_eq!(scheduler.schedule(&[], &mut []), Err(ScheduleError::Halted));
    }

    #[test]
    fn test_guard_failure_is_fatal() {
        let mut f = fixture();
        f.flip.close();
        let mut out = [0.0];
        assert_eq!(
            f.scheduler.schedule(&[1.0], &mut out),
            Err(ScheduleError::ResourceExhaustion(SyncError::Closed))
        );
        assert!(f.errors.is_halted());
        assert_eq!(f.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_commit_waits_for_acknowledge() {
        let mut f = fixture();
        let mut out = [0.0];
        f.params.set_queued(0, 0, 5.0).unwrap();
        f.scheduler.schedule(&[1.0], &mut out).unwrap();

        // The step holds the semaphore, so a flip cannot happen now
        assert_eq!(f.flip.acquire(Timeout::Millis(0)), Err(SyncError::Timeout));
        f.scheduler.acknowledge().unwrap();

        f.params.commit().unwrap();
        f.scheduler.schedule(&[1.0], &mut out).unwrap();
        assert_eq!(out, [5.0]);
        f.scheduler.acknowledge().unwrap();
    }

    #[test]
    fn test_probe_inside_and_outside_step() {
        let mut f = fixture();
        let mut out = [0.0];
        f.scheduler.schedule(&[4.0], &mut out).unwrap();
        // Signal 0 is the gain, signal 1 mirrors In1
        assert_eq!(f.scheduler.probe_signals(&[0, 0, 1]), vec![0.0, 0.0, 2.0, 4.0]);
        assert!(!f.errors.is_halted());
        f.scheduler.acknowledge().unwrap();

        assert_eq!(f.scheduler.probe_signals(&[0, 1]), vec![0.0, 0.0, 4.0]);
        assert_eq!(f.errors.message().as_deref(), Some(PROBE_OUTSIDE_STEP));
        assert!(f.errors.is_halted());
    }
}
