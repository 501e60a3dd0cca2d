//! # modelframe — Real-Time Model Execution Framework
//!
//! Runs a user-supplied step function at a fixed base rate while an
//! independent configuration thread tunes the model's parameters, without
//! ever blocking, delaying or tearing the real-time step.
//!
//! ## Overview
//!
//! Two mechanisms carry the framework:
//!
//! - **Step scheduler**: every step is a `schedule()`/`acknowledge()` pair.
//!   The pair must strictly alternate; the clock only advances on
//!   acknowledgement; any fatal error halts scheduling for good.
//! - **Double-buffered parameters**: the step reads one complete parameter
//!   set while edits are queued into the other. A commit flips the two
//!   under a binary semaphore that the step also holds, so a step never
//!   sees half of a batch.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────┐        ┌──────────────────────────────┐
//! │     Real-time thread        │        │    Configuration thread      │
//! │  schedule() · acknowledge() │        │  set_* · commit()            │
//! └──────────────┬──────────────┘        └──────────────┬───────────────┘
//!                │                                      │
//! ┌──────────────▼──────────────────────────────────────┼───────────────┐
//! │                   Kernel API (kernel.rs)            │               │
//! ├───────────────────────┬─────────────────────────────▼───────────────┤
//! │  Step Scheduler       │  Parameter Store                            │
//! │  scheduler.rs         │  params.rs                                  │
//! │  ─ clock (ticks)      │  ─ side[0] · side[1] · read_side            │
//! │  ─ in-flight counter  │  ─ read/write dirty flags                   │
//! │  ─ Model::step()      │  ─ flip under the semaphore                 │
//! ├───────────────────────┴─────────────────────────────────────────────┤
//! │  Signals (signals.rs) · Model contract (model.rs)                   │
//! ├─────────────────────────────────────────────────────────────────────┤
//! │  Error register (status.rs) · Codec (codec.rs) · Sync (sync.rs)     │
//! ├─────────────────────────────────────────────────────────────────────┤
//! │  Model metadata (metadata.rs): parameters · signals · ports · rate  │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Error Model
//!
//! Every operation returns a typed `Result`. Conditions the operator must
//! see are also latched in the shared [`ErrorSink`]:
//!
//! - **Local**: bad parameter index, wrong vector or port length. State is
//!   untouched and nothing is latched.
//! - **Warning**: inline and queued edits collided on commit.
//! - **Fatal**: protocol misuse, semaphore failure, step failure, `halt()`.
//!   The first fatal message wins and scheduling stops permanently.
//!
//! ## Memory Model
//!
//! - **Two parameter sides**, allocated once, one atomic cell per element
//! - **Selector**: `AtomicUsize`, stored with `Release` under the semaphore
//! - **No `unsafe`**, no process-wide globals: one [`Kernel`] per run

pub mod codec;
pub mod config;
pub mod demo;
pub mod error;
pub mod kernel;
pub mod metadata;
pub mod model;
pub mod params;
pub mod scheduler;
pub mod signals;
pub mod status;
pub mod sync;

pub use codec::{NativeCodec, TypeTag, ValueCodec};
pub use error::{
    CodecError, KernelError, ModelError, ParamError, ScheduleError, SpecError, SyncError,
};
pub use kernel::Kernel;
pub use metadata::ModelSpec;
pub use model::{Model, StepContext};
pub use params::{CommitOutcome, ParamReader, ParameterStore};
pub use status::{ErrorSink, Severity};
pub use sync::{BinarySemaphore, HostSemaphore, Timeout};
