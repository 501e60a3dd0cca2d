//! # Kernel
//!
//! The single owned run context. A `Kernel` ties one model to its
//! parameter store, signal table, scheduler and error register, and is the
//! public API a driver programs against.
//!
//! ## Lifecycle
//!
//! ```text
//! Kernel::initialize(spec, model)
//!   ├─► both parameter sides ← defaults, signals ← initial values
//!   └─► Model::initialize(spec)
//! Kernel::start()                     ← Model::start(), once
//! loop at the base rate:
//!   Kernel::schedule(inputs)          ← step at t = ticks · rate
//!   Kernel::acknowledge()             ← ticks += 1
//! Kernel::finalize()                  ← close semaphore, Model::finalize()
//! ```
//!
//! Configuration threads do not need the kernel itself: they take a clone
//! of [`Kernel::parameters`] and call the store directly.

use std::sync::Arc;

use tracing::debug;

use crate::codec::{NativeCodec, ValueCodec};
use crate::config::{FRAMEWORK_VERSION, STOPPED_WITHOUT_REASON};
use crate::error::{KernelError, ParamResult, ScheduleError};
use crate::metadata::ModelSpec;
use crate::model::Model;
use crate::params::{CommitOutcome, ParameterStore};
use crate::scheduler::StepScheduler;
use crate::signals::SignalFrame;
use crate::status::ErrorSink;
use crate::sync::{BinarySemaphore, HostSemaphore};

/// Build text used when the model description has none.
const DEFAULT_BUILD_TEXT: &str = concat!(
    "modelframe ",
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("MODELFRAME_TARGET"),
    ", ",
    env!("MODELFRAME_PROFILE"),
    ")"
);

/// One model run.
pub struct Kernel {
    spec: Arc<ModelSpec>,
    scheduler: StepScheduler,
    params: Arc<ParameterStore>,
    errors: Arc<ErrorSink>,
    flip: Arc<dyn BinarySemaphore>,
    started: bool,
}

impl Kernel {
    /// Set up a run with the native codec and a host semaphore.
    pub fn initialize<M: Model + 'static>(spec: ModelSpec, model: M) -> Result<Self, KernelError> {
        Self::with_parts(
            spec,
            Box::new(model),
            Arc::new(NativeCodec),
            Arc::new(HostSemaphore::new()),
        )
    }

    /// Set up a run with caller-provided collaborators.
    pub fn with_parts(
        spec: ModelSpec,
        mut model: Box<dyn Model>,
        codec: Arc<dyn ValueCodec>,
        flip: Arc<dyn BinarySemaphore>,
    ) -> Result<Self, KernelError> {
        let spec = Arc::new(spec);
        let errors = Arc::new(ErrorSink::new());
        let params = Arc::new(ParameterStore::new(
            spec.clone(),
            codec.clone(),
            flip.clone(),
            errors.clone(),
        )?);
        let signals = SignalFrame::new(spec.clone(), codec)?;

        model.initialize(&spec).map_err(KernelError::Initialize)?;
        debug!(
            model = %spec.name,
            parameters = spec.parameter_count(),
            signals = spec.signals.len(),
            base_rate = spec.base_rate,
            "model initialized"
        );

        let scheduler = StepScheduler::new(
            spec.clone(),
            model,
            params.clone(),
            signals,
            flip.clone(),
            errors.clone(),
        );

        Ok(Self {
            spec,
            scheduler,
            params,
            errors,
            flip,
            started: false,
        })
    }

    /// Run the model's start hook. Only the first call is accepted.
    pub fn start(&mut self) -> Result<(), KernelError> {
        if self.started {
            return Err(KernelError::AlreadyStarted);
        }
        self.scheduler
            .model_mut()
            .start()
            .map_err(KernelError::Start)?;
        self.started = true;
        debug!(model = %self.spec.name, "model started");
        Ok(())
    }

    /// Shut the run down: close the flip semaphore and run the model's
    /// finalize hook.
    pub fn finalize(mut self) -> Result<(), KernelError> {
        self.flip.close();
        debug!(model = %self.spec.name, ticks = self.scheduler.ticks(), "model finalized");
        self.scheduler
            .model_mut()
            .finalize()
            .map_err(KernelError::Finalize)
    }

    // -----------------------------------------------------------------------
    // Real-time path
    // -----------------------------------------------------------------------

    /// Run one step and return its outputs with the time they belong to.
    pub fn schedule(&mut self, inputs: &[f64]) -> Result<(Vec<f64>, f64), ScheduleError> {
        let mut outputs = vec![0.0; self.spec.output_width()];
        let time = self.scheduler.schedule(inputs, &mut outputs)?;
        Ok((outputs, time))
    }

    /// Non-allocating form of [`schedule`](Self::schedule).
    pub fn schedule_into(&mut self, inputs: &[f64], outputs: &mut [f64]) -> Result<f64, ScheduleError> {
        self.scheduler.schedule(inputs, outputs)
    }

    pub fn acknowledge(&mut self) -> Result<(), ScheduleError> {
        self.scheduler.acknowledge()
    }

    pub fn probe_signals(&self, indices: &[i64]) -> Vec<f64> {
        self.scheduler.probe_signals(indices)
    }

    /// Stop execution with `message`.
    pub fn halt(&self, message: impl Into<String>) {
        self.scheduler.halt(message);
    }

    pub fn time(&self) -> f64 {
        self.scheduler.time()
    }

    pub fn ticks(&self) -> u64 {
        self.scheduler.ticks()
    }

    pub fn in_step(&self) -> bool {
        self.scheduler.in_step()
    }

    pub fn is_halted(&self) -> bool {
        self.errors.is_halted()
    }

    pub fn signals(&self) -> &SignalFrame {
        self.scheduler.signals()
    }

    // -----------------------------------------------------------------------
    // Parameters
    // -----------------------------------------------------------------------

    /// Shared handle for configuration threads.
    pub fn parameters(&self) -> Arc<ParameterStore> {
        Arc::clone(&self.params)
    }

    pub fn get_parameter(&self, index: usize, subindex: usize) -> ParamResult<f64> {
        self.params.get(index, subindex)
    }

    pub fn get_vector_parameter(&self, index: usize, length: usize) -> ParamResult<Vec<f64>> {
        self.params.get_vector(index, length)
    }

    /// Queue a write; published by the next [`commit_parameters`](Self::commit_parameters).
    pub fn set_parameter(&self, index: usize, subindex: usize, value: f64) -> ParamResult<()> {
        self.params.set_queued(index, subindex, value)
    }

    pub fn set_vector_parameter(&self, index: usize, values: &[f64]) -> ParamResult<()> {
        self.params.set_vector_queued(index, values)
    }

    /// Write straight into the parameters the step reads.
    pub fn set_parameter_inline(&self, index: usize, subindex: usize, value: f64) -> ParamResult<()> {
        self.params.set_inline(index, subindex, value)
    }

    pub fn commit_parameters(&self) -> ParamResult<CommitOutcome> {
        self.params.commit()
    }

    // -----------------------------------------------------------------------
    // Status
    // -----------------------------------------------------------------------

    /// The latched error or warning message, if any.
    pub fn current_error_message(&self) -> Option<String> {
        self.errors.message()
    }

    /// The latched message, or a generic one if execution stopped without
    /// a recorded reason.
    pub fn model_error(&self) -> Option<String> {
        self.errors.message().or_else(|| {
            self.errors
                .is_halted()
                .then(|| STOPPED_WITHOUT_REASON.to_string())
        })
    }

    /// Forget the current message. A halted run stays halted.
    pub fn clear_message(&self) {
        self.errors.clear_message();
    }

    pub fn error_sink(&self) -> &Arc<ErrorSink> {
        &self.errors
    }

    // -----------------------------------------------------------------------
    // Identity
    // -----------------------------------------------------------------------

    pub fn model_spec(&self) -> &ModelSpec {
        &self.spec
    }

    /// `"<build text>\nModel Name: <name>"`.
    pub fn build_info(&self) -> String {
        let text = if self.spec.description.is_empty() {
            DEFAULT_BUILD_TEXT
        } else {
            self.spec.description.as_str()
        };
        format!("{}\nModel Name: {}", text, self.spec.name)
    }

    /// (major, minor, fix, build).
    pub fn framework_version(&self) -> (u32, u32, u32, u32) {
        FRAMEWORK_VERSION
    }
}

impl std::fmt::Debug for Kernel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Kernel")
            .field("scheduler", &self.scheduler)
            .field("params", &self.params)
            .field("started", &self.started)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::TypeTag;
    use crate::error::ModelError;
    use crate::model::StepContext;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Hooks {
        starts: Arc<AtomicUsize>,
        finalizes: Arc<AtomicUsize>,
        fail_init: bool,
    }

    impl Model for Hooks {
        fn initialize(&mut self, _spec: &ModelSpec) -> Result<(), ModelError> {
            if self.fail_init {
                return Err(ModelError::new("no license"));
            }
            Ok(())
        }

        fn start(&mut self) -> Result<(), ModelError> {
            self.starts.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn step(&mut self, _ctx: StepContext<'_>) -> Result<(), ModelError> {
            Ok(())
        }

        fn finalize(&mut self) -> Result<(), ModelError> {
            self.finalizes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn spec() -> ModelSpec {
        ModelSpec::builder("hooks")
            .scalar("k", TypeTag::Double, 1.0)
            .build()
            .unwrap()
    }

    #[test]
    fn test_lifecycle_hooks() {
        let hooks = Hooks::default();
        let starts = hooks.starts.clone();
        let finalizes = hooks.finalizes.clone();

        let mut kernel = Kernel::initialize(spec(), hooks).unwrap();
        kernel.start().unwrap();
        assert!(matches!(kernel.start(), Err(KernelError::AlreadyStarted)));
        assert_eq!(starts.load(Ordering::SeqCst), 1);

        kernel.finalize().unwrap();
        assert_eq!(finalizes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_initialize_failure_is_returned() {
        let hooks = Hooks {
            fail_init: true,
            ..Hooks::default()
        };
        let err = Kernel::initialize(spec(), hooks).unwrap_err();
        assert!(matches!(err, KernelError::Initialize(ref e) if e.message == "no license"));
    }

    #[test]
    fn test_model_error_messages() {
        let kernel = Kernel::initialize(spec(), Hooks::default()).unwrap();
        assert_eq!(kernel.model_error(), None);

        kernel.halt("overheated");
        assert_eq!(kernel.model_error().as_deref(), Some("overheated"));
        kernel.clear_message();
        assert_eq!(kernel.current_error_message(), None);
        assert_eq!(kernel.model_error().as_deref(), Some(STOPPED_WITHOUT_REASON));
    }

    #[test]
    fn test_identity() {
        let kernel = Kernel::initialize(spec(), Hooks::default()).unwrap();
        assert!(kernel.build_info().ends_with("\nModel Name: hooks"));
        assert!(kernel.build_info().starts_with("modelframe "));
        assert_eq!(kernel.framework_version(), FRAMEWORK_VERSION);

        let described = ModelSpec::builder("gain")
            .description("Gain demo")
            .build()
            .unwrap();
        let kernel = Kernel::initialize(described, Hooks::default()).unwrap();
        assert_eq!(kernel.build_info(), "Gain demo\nModel Name: gain");
    }

    #[test]
    fn test_finalize_closes_semaphore() {
        let flip = Arc::new(HostSemaphore::new());
        let kernel = Kernel::with_parts(
            spec(),
            Box::new(Hooks::default()),
            Arc::new(NativeCodec),
            flip.clone(),
        )
        .unwrap();
        let params = kernel.parameters();
        kernel.finalize().unwrap();

        params.set_queued(0, 0, 2.0).unwrap();
        assert!(params.commit().is_err());
        assert!(!flip.is_available());
    }
}
