//! # Model Contract
//!
//! The user-supplied part of a run. A model is a step function plus
//! optional lifecycle hooks:
//!
//! ```text
//!   Kernel::initialize ──► Model::initialize(spec)
//!   Kernel::start      ──► Model::start()
//!   Kernel::schedule   ──► Model::step(ctx)      (once per base period)
//!   Kernel::finalize   ──► Model::finalize()
//! ```
//!
//! The step function sees the read side of the parameter store through a
//! [`ParamReader`] pinned for the whole step, so it never observes a flip
//! halfway through.

use crate::error::ModelError;
use crate::metadata::ModelSpec;
use crate::params::ParamReader;
use crate::signals::SignalFrame;

/// Everything one step may read or write.
pub struct StepContext<'a> {
    /// External inputs, laid out per [`ModelSpec::inports`].
    pub inputs: &'a [f64],
    /// External outputs, laid out per [`ModelSpec::outports`].
    pub outputs: &'a mut [f64],
    /// Simulation time of this step in seconds.
    pub time: f64,
    pub params: ParamReader<'a>,
    pub signals: &'a mut SignalFrame,
}

/// A model driven by the step scheduler.
pub trait Model: Send {
    /// Called once, after parameters and signals hold their defaults.
    /// Resolve parameter and signal indices here.
    fn initialize(&mut self, _spec: &ModelSpec) -> Result<(), ModelError> {
        Ok(())
    }

    fn start(&mut self) -> Result<(), ModelError> {
        Ok(())
    }

    /// Compute outputs for the current time from inputs and parameters.
    fn step(&mut self, ctx: StepContext<'_>) -> Result<(), ModelError>;

    fn finalize(&mut self) -> Result<(), ModelError> {
        Ok(())
    }
}

impl<F> Model for F
where
    F: FnMut(StepContext<'_>) -> Result<(), ModelError> + Send,
{
    fn step(&mut self, ctx: StepContext<'_>) -> Result<(), ModelError> {
        self(ctx)
    }
}

/// Resolve a parameter index by its short key, `"<model>/<key>"`.
pub fn parameter_index(spec: &ModelSpec, key: &str) -> Result<usize, ModelError> {
    let name = format!("{}/{}", spec.name, key);
    spec.parameter_index(&name).ok_or_else(|| {
        ModelError::new(format!("parameter '{}' is not defined", name))
    })
}

/// Resolve a scalar signal index by its short key, `"<model>/<key>:1"`.
pub fn signal_index(spec: &ModelSpec, key: &str) -> Result<usize, ModelError> {
    let id = format!("{}/{}:1", spec.name, key);
    spec.signal_index(&id).ok_or_else(|| {
        ModelError::new(format!("signal '{}' is not defined", id))
    })
}
