//! # Double-Buffered Parameter Store
//!
//! Tunable parameters live in two complete parameter sets ("sides"). At any
//! instant one is the *read side*, used by the real-time step, and the
//! other is the *write side*, the target of queued edits.
//!
//! ```text
//!                 set_inline()                      set_queued()
//!                      │                                 │
//!                      ▼                                 ▼
//!   ┌──────────────────────────────┐   ┌──────────────────────────────┐
//!   │  side[read_side]             │   │  side[1 - read_side]         │
//!   │  read by the step function   │   │  pending batch               │
//!   │  read_side_dirty             │   │  write_side_dirty            │
//!   └──────────────────────────────┘   └──────────────────────────────┘
//!                      ▲                                 │
//!                      └──────── commit(): flip ─────────┘
//!                          (under the flip semaphore)
//! ```
//!
//! ## Commit Rules
//!
//! 1. Read side dirtied inline → copy it over the write side. Any queued
//!    edits are lost (a warning is raised); the inline edits win.
//! 2. A queued write failed, or execution stopped → roll the pending batch
//!    back and report failure.
//! 3. Write side dirty → toggle `read_side` under the semaphore, then copy
//!    the new read side back so both sides start the next cycle identical.
//! 4. Otherwise nothing to do.
//!
//! ## Concurrency
//!
//! Reads never lock. Writes never lock. Only the flip takes the semaphore,
//! and only around the selector store, never around a copy. Every element
//! is an atomic cell; the dirty flags are written by a single configuration
//! actor at a time, by protocol rather than by locking.
//!
//! Reads from outside a step ([`ParameterStore::get`] and friends) are
//! sequence-checked against the flip. A commit bumps `generation` to an odd
//! value before the selector store and back to even after the copy-back; a
//! reader that sees it odd or changed retries, so it never returns values
//! from two batches.

use std::hint;
use std::sync::atomic::{fence, AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use tracing::{debug, trace};

use crate::codec::{self, Cell, ValueCodec};
use crate::config::FLIP_TIMEOUT;
use crate::error::{CodecError, KernelError, ParamError, ParamResult};
use crate::metadata::{ModelSpec, ParameterSpec};
use crate::status::ErrorSink;
use crate::sync::BinarySemaphore;

/// Warning raised when a commit discards queued edits.
pub const CONFLICT_MESSAGE: &str = "Parameters have been set inline and from the background loop at the same time. Parameters written from the background loop since the last commit have been lost.";

// ---------------------------------------------------------------------------
// Parameter set
// ---------------------------------------------------------------------------

/// One complete snapshot of all parameter values.
#[derive(Debug)]
struct ParameterSet {
    cells: Box<[Cell]>,
}

impl ParameterSet {
    fn new(len: usize) -> Self {
        Self {
            cells: codec::cells(len),
        }
    }

    /// Cells of one parameter. `spec` comes from the same model, so the
    /// range is always in bounds.
    #[inline]
    fn slice(&self, spec: &ParameterSpec) -> &[Cell] {
        &self.cells[spec.offset..spec.offset + spec.width()]
    }

    fn copy_from(&self, other: &ParameterSet) {
        codec::copy_cells(&self.cells, &other.cells);
    }
}

/// Result of a successful [`ParameterStore::commit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    /// Queued edits were flipped onto the read side.
    Published,
    /// Inline edits were copied onto the write side; no flip happened.
    Reconciled,
    /// Nothing was pending.
    Unchanged,
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// Owner of both parameter sets, the side selector and the dirty flags.
pub struct ParameterStore {
    spec: Arc<ModelSpec>,
    sides: [ParameterSet; 2],
    /// Index of the side the real-time path reads.
    read_side: AtomicUsize,
    /// Inline writes have touched the read side since the last reconciliation.
    read_side_dirty: AtomicBool,
    /// Queued writes have touched the write side since the last commit.
    write_side_dirty: AtomicBool,
    /// A queued write failed since the last commit.
    tx_failed: AtomicBool,
    /// Odd while a flip and its copy-back are in progress.
    generation: AtomicU64,
    codec: Arc<dyn ValueCodec>,
    flip: Arc<dyn BinarySemaphore>,
    errors: Arc<ErrorSink>,
}

impl ParameterStore {
    /// Create a store with both sides holding the model's default values.
    pub fn new(
        spec: Arc<ModelSpec>,
        codec: Arc<dyn ValueCodec>,
        flip: Arc<dyn BinarySemaphore>,
        errors: Arc<ErrorSink>,
    ) -> Result<Self, KernelError> {
        let len = spec.parameter_cells();
        let sides = [ParameterSet::new(len), ParameterSet::new(len)];

        for param in &spec.parameters {
            for (i, value) in param.default.iter().enumerate() {
                codec
                    .encode(sides[0].slice(param), i, param.tag, *value)
                    .map_err(|source| KernelError::InitialValue {
                        name: param.name.clone(),
                        source,
                    })?;
            }
        }
        sides[1].copy_from(&sides[0]);

        Ok(Self {
            spec,
            sides,
            read_side: AtomicUsize::new(0),
            read_side_dirty: AtomicBool::new(false),
            write_side_dirty: AtomicBool::new(false),
            tx_failed: AtomicBool::new(false),
            generation: AtomicU64::new(0),
            codec,
            flip,
            errors,
        })
    }

    // --- Observers ---

    pub fn parameter_count(&self) -> usize {
        self.spec.parameters.len()
    }

    /// Metadata for one parameter.
    pub fn parameter(&self, index: usize) -> Option<&ParameterSpec> {
        self.spec.parameters.get(index)
    }

    /// Index of the side currently read by the real-time path.
    #[inline]
    pub fn read_side(&self) -> usize {
        self.read_side.load(Ordering::Acquire)
    }

    pub fn is_read_side_dirty(&self) -> bool {
        self.read_side_dirty.load(Ordering::Acquire)
    }

    pub fn is_write_side_dirty(&self) -> bool {
        self.write_side_dirty.load(Ordering::Acquire)
    }

    /// Whether a commit would change anything.
    pub fn is_pending(&self) -> bool {
        self.is_read_side_dirty() || self.is_write_side_dirty()
    }

    /// Read-side view pinned to the side selected right now. The step
    /// function receives one of these so a whole step sees one side.
    pub fn reader(&self) -> ParamReader<'_> {
        ParamReader {
            store: self,
            side: self.read_side(),
        }
    }

    // --- Reads (real-time path) ---

    /// Current value of one element. Never blocks.
    pub fn get(&self, index: usize, subindex: usize) -> ParamResult<f64> {
        self.consistent(|reader| reader.get(index, subindex))
    }

    /// Current values of a whole parameter. `length` must equal the width.
    /// All elements come from the same commit.
    pub fn get_vector(&self, index: usize, length: usize) -> ParamResult<Vec<f64>> {
        let mut values = vec![0.0; length];
        self.read_vector(index, &mut values)?;
        Ok(values)
    }

    /// Non-allocating form of [`get_vector`](Self::get_vector).
    pub fn read_vector(&self, index: usize, out: &mut [f64]) -> ParamResult<()> {
        self.consistent(|reader| reader.read_vector(index, out))
    }

    /// Run `read` against the current read side until no flip overlapped it.
    fn consistent<T>(
        &self,
        mut read: impl FnMut(ParamReader<'_>) -> ParamResult<T>,
    ) -> ParamResult<T> {
        loop {
            let before = self.generation.load(Ordering::Acquire);
            if before & 1 == 1 {
                hint::spin_loop();
                continue;
            }
            let result = read(self.reader());
            fence(Ordering::Acquire);
            if self.generation.load(Ordering::Relaxed) == before {
                return result;
            }
            hint::spin_loop();
        }
    }

    // --- Writes (configuration path) ---

    /// Queue one element for the next commit.
    pub fn set_queued(&self, index: usize, subindex: usize, value: f64) -> ParamResult<()> {
        let param = self.element(index, subindex)?;
        self.sync_write_side();

        let write = 1 - self.read_side();
        self.write_side_dirty.store(true, Ordering::Release);
        let result = self
            .codec
            .encode(self.sides[write].slice(param), subindex, param.tag, value);
        trace!(index, subindex, value, "queued parameter write");
        result.map_err(|e| self.fail_transaction(e))
    }

    /// Queue a whole parameter for the next commit. Elements are written in
    /// order; a failed element fails the call but earlier elements stay
    /// written.
    pub fn set_vector_queued(&self, index: usize, values: &[f64]) -> ParamResult<()> {
        let param = self.entry(index)?;
        if values.len() != param.width() {
            return Err(ParamError::LengthMismatch {
                index,
                expected: param.width(),
                actual: values.len(),
            });
        }
        self.sync_write_side();

        let write = 1 - self.read_side();
        let storage = self.sides[write].slice(param);
        let mut first_error = None;
        for (i, value) in values.iter().enumerate() {
            if let Err(e) = self.codec.encode(storage, i, param.tag, *value) {
                first_error.get_or_insert(e);
            }
        }
        self.write_side_dirty.store(true, Ordering::Release);
        trace!(index, len = values.len(), "queued vector parameter write");

        match first_error {
            Some(e) => Err(self.fail_transaction(e)),
            None => Ok(()),
        }
    }

    /// Write one element straight into the read side. Visible to the next
    /// read without a commit.
    pub fn set_inline(&self, index: usize, subindex: usize, value: f64) -> ParamResult<()> {
        let param = self.element(index, subindex)?;
        let read = self.read_side();
        self.codec
            .encode(self.sides[read].slice(param), subindex, param.tag, value)?;
        self.read_side_dirty.store(true, Ordering::Release);
        trace!(index, subindex, value, "inline parameter write");
        Ok(())
    }

    /// Reconcile and publish pending edits. See the module docs for the
    /// rules applied.
    pub fn commit(&self) -> ParamResult<CommitOutcome> {
        let read = self.read_side();
        let write = 1 - read;

        if self.read_side_dirty.swap(false, Ordering::AcqRel) {
            self.sides[write].copy_from(&self.sides[read]);
            if self.write_side_dirty.swap(false, Ordering::AcqRel) {
                self.errors.warning(CONFLICT_MESSAGE);
                return Err(ParamError::ConflictLostEdit);
            }
            debug!(side = read, "inline parameter edits reconciled");
            return Ok(CommitOutcome::Reconciled);
        }

        if self.tx_failed.swap(false, Ordering::AcqRel) || self.errors.is_halted() {
            self.sides[write].copy_from(&self.sides[read]);
            self.write_side_dirty.store(false, Ordering::Release);
            debug!(side = read, "pending parameter edits rolled back");
            return Err(ParamError::TransactionFailed);
        }

        if !self.write_side_dirty.load(Ordering::Acquire) {
            return Ok(CommitOutcome::Unchanged);
        }

        if let Err(e) = self.flip.acquire(FLIP_TIMEOUT) {
            self.errors
                .fatal(format!("Failed to acquire the parameter flip semaphore: {}", e));
            return Err(ParamError::Sync(e));
        }
        self.generation.fetch_add(1, Ordering::Relaxed);
        fence(Ordering::Release);
        self.read_side.store(write, Ordering::Release);
        self.flip.release();

        // Old read side becomes the write side; bring it up to date.
        self.sides[read].copy_from(&self.sides[write]);
        self.generation.fetch_add(1, Ordering::Release);
        self.write_side_dirty.store(false, Ordering::Release);
        debug!(side = write, "parameter edits published");
        Ok(CommitOutcome::Published)
    }

    // --- Internals ---

    fn entry(&self, index: usize) -> ParamResult<&ParameterSpec> {
        self.spec
            .parameters
            .get(index)
            .ok_or(ParamError::UnknownParameter {
                index,
                count: self.spec.parameters.len(),
            })
    }

    fn element(&self, index: usize, subindex: usize) -> ParamResult<&ParameterSpec> {
        let param = self.entry(index)?;
        if subindex >= param.width() {
            return Err(ParamError::OutOfBounds {
                index,
                subindex,
                width: param.width(),
            });
        }
        Ok(param)
    }

    /// Give queued edits a base that includes any inline edits.
    fn sync_write_side(&self) {
        if self.read_side_dirty.swap(false, Ordering::AcqRel) {
            let read = self.read_side();
            self.sides[1 - read].copy_from(&self.sides[read]);
        }
    }

    fn fail_transaction(&self, error: CodecError) -> ParamError {
        self.tx_failed.store(true, Ordering::Release);
        ParamError::Codec(error)
    }
}

impl std::fmt::Debug for ParameterStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParameterStore")
            .field("parameters", &self.parameter_count())
            .field("read_side", &self.read_side())
            .field("read_side_dirty", &self.is_read_side_dirty())
            .field("write_side_dirty", &self.is_write_side_dirty())
            .finish()
    }
}

impl ParamError {
    /// Whether this error is a bad index, subindex or length.
    pub fn is_out_of_bounds(&self) -> bool {
        matches!(
            self,
            ParamError::UnknownParameter { .. }
                | ParamError::OutOfBounds { .. }
                | ParamError::LengthMismatch { .. }
        )
    }
}

// ---------------------------------------------------------------------------
// Read-side view
// ---------------------------------------------------------------------------

/// Read access to one side of a [`ParameterStore`], fixed at creation.
#[derive(Clone, Copy)]
pub struct ParamReader<'a> {
    store: &'a ParameterStore,
    side: usize,
}

impl<'a> ParamReader<'a> {
    pub fn get(&self, index: usize, subindex: usize) -> ParamResult<f64> {
        let param = self.store.element(index, subindex)?;
        let storage = self.store.sides[self.side].slice(param);
        Ok(self.store.codec.decode(storage, subindex, param.tag))
    }

    /// First element of a parameter; NaN if the index is unknown.
    #[inline]
    pub fn scalar(&self, index: usize) -> f64 {
        self.get(index, 0).unwrap_or(f64::NAN)
    }

    pub fn read_vector(&self, index: usize, out: &mut [f64]) -> ParamResult<()> {
        let param = self.store.entry(index)?;
        if out.len() != param.width() {
            return Err(ParamError::LengthMismatch {
                index,
                expected: param.width(),
                actual: out.len(),
            });
        }
        let storage = self.store.sides[self.side].slice(param);
        for (i, slot) in out.iter_mut().enumerate() {
            *slot = self.store.codec.decode(storage, i, param.tag);
        }
        Ok(())
    }

    /// The side this view reads.
    pub fn side(&self) -> usize {
        self.side
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
