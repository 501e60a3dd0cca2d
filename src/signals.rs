//! # Signal Table
//!
//! Values published by the step function for observation from outside the
//! model. Every external inport is mirrored here too, so the last inputs
//! can be probed alongside internal values.
//!
//! ## Probe Layout
//!
//! ```text
//!   indices:  [ k,  i1,  i2, ..., -1 ]
//!   probe  :  [ k, 0.0, v(i1)..., v(i2)... ]
//!               │   │
//!               │   └── reserved
//!               └────── first index, copied through as bookkeeping
//! ```
//!
//! Signals after the first are written in row order, one value per
//! element. A negative index ends the list; unknown indices are skipped.

use std::sync::Arc;

use tracing::debug;

use crate::codec::{self, Cell, ValueCodec};
use crate::config::PROBE_HEADER_LEN;
use crate::error::{KernelError, ModelError};
use crate::metadata::{ModelSpec, SignalSpec};

/// Storage for all signals of one model.
pub struct SignalFrame {
    spec: Arc<ModelSpec>,
    cells: Box<[Cell]>,
    codec: Arc<dyn ValueCodec>,
}

impl SignalFrame {
    /// Allocate the table and fill it with each signal's initial value.
    pub fn new(spec: Arc<ModelSpec>, codec: Arc<dyn ValueCodec>) -> Result<Self, KernelError> {
        let cells = codec::cells(spec.signal_cells());
        for signal in &spec.signals {
            let storage = &cells[signal.offset..signal.offset + signal.width()];
            for (i, value) in signal.initial.iter().enumerate() {
                codec
                    .encode(storage, i, signal.tag, *value)
                    .map_err(|source| KernelError::InitialValue {
                        name: signal.id(),
                        source,
                    })?;
            }
        }
        Ok(Self { spec, cells, codec })
    }

    pub fn count(&self) -> usize {
        self.spec.signals.len()
    }

    /// Write one element of a signal.
    pub fn set(&mut self, index: usize, element: usize, value: f64) -> Result<(), ModelError> {
        let signal = self.spec.signals.get(index).ok_or_else(|| {
            ModelError::new(format!(
                "signal index {} is out of bounds (count {})",
                index,
                self.spec.signals.len()
            ))
        })?;
        if element >= signal.width() {
            return Err(ModelError::new(format!(
                "signal '{}' element {} is out of bounds (width {})",
                signal.name,
                element,
                signal.width()
            )));
        }
        self.codec
            .encode(self.storage(signal), element, signal.tag, value)
            .map_err(|e| ModelError::new(format!("signal '{}': {}", signal.name, e)))
    }

    /// Write a scalar signal.
    #[inline]
    pub fn publish(&mut self, index: usize, value: f64) -> Result<(), ModelError> {
        self.set(index, 0, value)
    }

    /// Read one element of a signal.
    pub fn get(&self, index: usize, element: usize) -> Option<f64> {
        let signal = self.spec.signals.get(index)?;
        if element >= signal.width() {
            return None;
        }
        Some(self.codec.decode(self.storage(signal), element, signal.tag))
    }

    /// Mirror the step inputs into the inport signals. Inport signals are
    /// numbered after the declared ones.
    pub(crate) fn load_inputs(&mut self, inputs: &[f64]) {
        let first = self.spec.signals.len() - self.spec.inports.len();
        for (port, signal) in self.spec.inports.iter().zip(&self.spec.signals[first..]) {
            let Some(values) = inputs.get(port.offset..port.offset + port.width()) else {
                continue;
            };
            let storage = self.storage(signal);
            for (i, value) in values.iter().enumerate() {
                // Unrepresentable inputs keep the previous value
                if let Err(e) = self.codec.encode(storage, i, signal.tag, *value) {
                    debug!(port = %port.name, element = i, "inport value not mirrored: {}", e);
                }
            }
        }
    }

    /// Probe into a caller-provided buffer. Returns the number of values
    /// written; output stops when `out` is full.
    pub fn probe_into(&self, indices: &[i64], out: &mut [f64]) -> usize {
        let Some(first) = indices.first() else {
            return 0;
        };
        if out.len() < PROBE_HEADER_LEN {
            return 0;
        }
        out[0] = *first as f64;
        out[1] = 0.0;
        let mut count = PROBE_HEADER_LEN;

        for &index in &indices[1..] {
            if count >= out.len() || index < 0 {
                break;
            }
            let Some(signal) = self.spec.signals.get(index as usize) else {
                continue;
            };
            let storage = self.storage(signal);
            for element in 0..signal.width() {
                if count >= out.len() {
                    break;
                }
                out[count] = self.codec.decode(storage, element, signal.tag);
                count += 1;
            }
        }
        count
    }

    /// Probe into a freshly sized buffer.
    pub fn probe(&self, indices: &[i64]) -> Vec<f64> {
        let values: usize = indices
            .iter()
            .skip(1)
            .take_while(|i| **i >= 0)
            .filter_map(|i| self.spec.signals.get(*i as usize))
            .map(SignalSpec::width)
            .sum();
        let mut out = vec![0.0; PROBE_HEADER_LEN + values];
        let written = self.probe_into(indices, &mut out);
        out.truncate(written);
        out
    }

    #[inline]
    fn storage(&self, signal: &SignalSpec) -> &[Cell] {
        &self.cells[signal.offset..signal.offset + signal.width()]
    }
}

impl std::fmt::Debug for SignalFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalFrame")
            .field("signals", &self.count())
            .field("cells", &self.cells.len())
            .finish()
    }
}
