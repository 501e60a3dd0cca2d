//! # Model Metadata
//!
//! Static description of one model: base rate, tunable parameters,
//! published signals and external ports. Everything here is immutable for
//! the lifetime of a run; only parameter and signal *values* change.
//!
//! A description is either assembled with [`ModelSpec::builder`] or loaded
//! from a JSON model description:
//!
//! ```json
//! {
//!   "name": "gain",
//!   "desc": "Gain demo",
//!   "baserate": 0.01,
//!   "Parameters": { "gain": { "type": "double", "value": 2.0 } },
//!   "Inports":    { "In1":  { "type": "double" } },
//!   "Outports":   { "Out1": { "type": "double" } },
//!   "Signals":    { "gain": { "type": "double", "desc": "gain signal" } }
//! }
//! ```
//!
//! Key order defines indices. Every inport is also exposed as a signal,
//! numbered after the declared signals.

use std::fs;
use std::path::Path;

use indexmap::IndexMap;
use serde::Deserialize;

use crate::codec::TypeTag;
use crate::config::{DEFAULT_BASE_RATE, MAX_ELEMENTS};
use crate::error::SpecError;

// ---------------------------------------------------------------------------
// Entries
// ---------------------------------------------------------------------------

/// One tunable parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterSpec {
    /// Full name, `"<model>/<name>"`.
    pub name: String,
    /// Element data type.
    pub tag: TypeTag,
    /// Dimensions; their product is the width.
    pub dims: Vec<usize>,
    /// Offset of the first element in a parameter set.
    pub offset: usize,
    /// Initial values, one per element.
    pub default: Vec<f64>,
}

impl ParameterSpec {
    /// Number of elements.
    #[inline]
    pub fn width(&self) -> usize {
        self.default.len()
    }
}

/// One probe-able signal.
#[derive(Debug, Clone, PartialEq)]
pub struct SignalSpec {
    /// Source block, `"<model>/<key>"`.
    pub block: String,
    /// Output port of the source block (0-based).
    pub port: usize,
    /// Human-readable signal name.
    pub name: String,
    pub tag: TypeTag,
    pub dims: Vec<usize>,
    /// Offset of the first element in the signal table.
    pub offset: usize,
    pub initial: Vec<f64>,
}

impl SignalSpec {
    #[inline]
    pub fn width(&self) -> usize {
        self.initial.len()
    }

    /// Lookup id, `"<block>:<port + 1>"`.
    pub fn id(&self) -> String {
        format!("{}:{}", self.block, self.port + 1)
    }
}

/// Direction of an external port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortDirection {
    Input,
    Output,
}

/// One external input or output.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtIo {
    pub name: String,
    pub direction: PortDirection,
    pub tag: TypeTag,
    /// Index among ports of the same direction.
    pub index: usize,
    /// Offset of the first value in the input or output buffer.
    pub offset: usize,
    /// (rows, columns).
    pub dims: (usize, usize),
}

impl ExtIo {
    #[inline]
    pub fn width(&self) -> usize {
        self.dims.0 * self.dims.1
    }
}

// ---------------------------------------------------------------------------
// Model spec
// ---------------------------------------------------------------------------

/// Complete static description of a model.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelSpec {
    pub name: String,
    /// Free-form builder/description text.
    pub description: String,
    /// Seconds per step.
    pub base_rate: f64,
    pub parameters: Vec<ParameterSpec>,
    pub signals: Vec<SignalSpec>,
    pub inports: Vec<ExtIo>,
    pub outports: Vec<ExtIo>,
}

impl ModelSpec {
    pub fn builder(name: impl Into<String>) -> ModelSpecBuilder {
        ModelSpecBuilder::new(name)
    }

    /// Parse a JSON model description.
    pub fn from_json(json: &str) -> Result<Self, SpecError> {
        let desc: ModelDescription = serde_json::from_str(json)?;
        desc.into_spec()
    }

    /// Read and parse a JSON model description file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, SpecError> {
        let json = fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    pub fn parameter_count(&self) -> usize {
        self.parameters.len()
    }

    /// Total number of parameter elements in one parameter set.
    pub fn parameter_cells(&self) -> usize {
        self.parameters.iter().map(ParameterSpec::width).sum()
    }

    /// Total number of signal elements.
    pub fn signal_cells(&self) -> usize {
        self.signals.iter().map(SignalSpec::width).sum()
    }

    /// Number of values in one input buffer.
    pub fn input_width(&self) -> usize {
        self.inports.iter().map(ExtIo::width).sum()
    }

    /// Number of values in one output buffer.
    pub fn output_width(&self) -> usize {
        self.outports.iter().map(ExtIo::width).sum()
    }

    /// Indices of all tunable parameters.
    pub fn parameter_indices(&self) -> Vec<usize> {
        (0..self.parameters.len()).collect()
    }

    /// Look a parameter up by its full name.
    pub fn parameter_index(&self, name: &str) -> Option<usize> {
        self.parameters.iter().position(|p| p.name == name)
    }

    /// Look a signal up by its `"<block>:<port + 1>"` id. Malformed ids
    /// (no `:`, empty block, non-numeric port) match nothing.
    pub fn signal_index(&self, id: &str) -> Option<usize> {
        let (block, port) = id.rsplit_once(':')?;
        if block.is_empty() {
            return None;
        }
        let port: usize = port.trim().parse().ok()?;
        self.signals
            .iter()
            .position(|s| s.block == block && s.port + 1 == port)
    }

    /// External port by combined index: inports first, then outports.
    pub fn ext_io(&self, index: usize) -> Option<&ExtIo> {
        self.inports
            .iter()
            .chain(self.outports.iter())
            .nth(index)
    }

    /// Number of external ports in both directions.
    pub fn ext_io_count(&self) -> usize {
        self.inports.len() + self.outports.len()
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Incremental [`ModelSpec`] construction. Offsets and the inport signals
/// are assigned by [`ModelSpecBuilder::build`].
#[derive(Debug, Clone)]
pub struct ModelSpecBuilder {
    name: String,
    description: String,
    base_rate: f64,
    parameters: Vec<(String, TypeTag, Vec<usize>, Vec<f64>)>,
    signals: Vec<(String, String, TypeTag, Vec<usize>, Vec<f64>)>,
    inports: Vec<(String, TypeTag, (usize, usize))>,
    outports: Vec<(String, TypeTag, (usize, usize))>,
}

impl ModelSpecBuilder {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            base_rate: DEFAULT_BASE_RATE,
            parameters: Vec::new(),
            signals: Vec::new(),
            inports: Vec::new(),
            outports: Vec::new(),
        }
    }

    pub fn description(mut self, text: impl Into<String>) -> Self {
        self.description = text.into();
        self
    }

    pub fn base_rate(mut self, seconds: f64) -> Self {
        self.base_rate = seconds;
        self
    }

    /// Add a scalar parameter.
    pub fn scalar(self, name: impl Into<String>, tag: TypeTag, value: f64) -> Self {
        self.parameter(name, tag, vec![1, 1], vec![value])
    }

    /// Add a parameter with explicit dimensions and one initial value per
    /// element (row order).
    pub fn parameter(
        mut self,
        name: impl Into<String>,
        tag: TypeTag,
        dims: Vec<usize>,
        values: Vec<f64>,
    ) -> Self {
        self.parameters.push((name.into(), tag, dims, values));
        self
    }

    /// Add a scalar signal.
    pub fn signal(
        mut self,
        key: impl Into<String>,
        name: impl Into<String>,
        tag: TypeTag,
        initial: f64,
    ) -> Self {
        self.signals
            .push((key.into(), name.into(), tag, vec![1, 1], vec![initial]));
        self
    }

    /// Add a scalar inport.
    pub fn inport(mut self, name: impl Into<String>, tag: TypeTag) -> Self {
        self.inports.push((name.into(), tag, (1, 1)));
        self
    }

    /// Add a scalar outport.
    pub fn outport(mut self, name: impl Into<String>, tag: TypeTag) -> Self {
        self.outports.push((name.into(), tag, (1, 1)));
        self
    }

    pub fn build(self) -> Result<ModelSpec, SpecError> {
        if self.name.trim().is_empty() {
            return Err(SpecError::Invalid("model name is empty".into()));
        }
        if !(self.base_rate.is_finite() && self.base_rate > 0.0) {
            return Err(SpecError::Invalid(format!(
                "base rate must be a positive number of seconds, got {}",
                self.base_rate
            )));
        }

        let model = self.name;

        for (name, _, (rows, cols)) in self.inports.iter().chain(self.outports.iter()) {
            element_count(&format!("{}/{}", model, name), &[*rows, *cols])?;
        }

        let mut offset = 0;
        let mut parameters = Vec::with_capacity(self.parameters.len());
        for (name, tag, dims, default) in self.parameters {
            let full = format!("{}/{}", model, name);
            check_shape(&full, &dims, default.len())?;
            parameters.push(ParameterSpec {
                name: full,
                tag,
                dims,
                offset,
                default,
            });
            offset += parameters.last().map_or(0, ParameterSpec::width);
        }

        let mut offset = 0;
        let mut signals = Vec::with_capacity(self.signals.len() + self.inports.len());
        let inport_signals = self
            .inports
            .iter()
            .map(|(key, tag, (rows, cols))| {
                (
                    key.clone(),
                    key.clone(),
                    *tag,
                    vec![*rows, *cols],
                    vec![0.0; rows * cols],
                )
            })
            .collect::<Vec<_>>();
        for (key, name, tag, dims, initial) in self.signals.into_iter().chain(inport_signals) {
            let block = format!("{}/{}", model, key);
            check_shape(&block, &dims, initial.len())?;
            let width = initial.len();
            signals.push(SignalSpec {
                block,
                port: 0,
                name,
                tag,
                dims,
                offset,
                initial,
            });
            offset += width;
        }

        let inports = ports(self.inports, PortDirection::Input);
        let outports = ports(self.outports, PortDirection::Output);

        Ok(ModelSpec {
            name: model,
            description: self.description,
            base_rate: self.base_rate,
            parameters,
            signals,
            inports,
            outports,
        })
    }
}

/// Number of elements described by `dims`. Empty, zero, overflowing or
/// oversized shapes are rejected.
fn element_count(name: &str, dims: &[usize]) -> Result<usize, SpecError> {
    if dims.is_empty() {
        return Err(SpecError::Invalid(format!(
            "'{}' has empty dimensions {:?}",
            name, dims
        )));
    }
    let width = dims
        .iter()
        .try_fold(1usize, |acc, d| acc.checked_mul(*d))
        .ok_or_else(|| {
            SpecError::Invalid(format!("'{}' has dimensions {:?} that overflow", name, dims))
        })?;
    if width == 0 {
        return Err(SpecError::Invalid(format!(
            "'{}' has empty dimensions {:?}",
            name, dims
        )));
    }
    if width > MAX_ELEMENTS {
        return Err(SpecError::Invalid(format!(
            "'{}' has {} elements, more than the limit of {}",
            name, width, MAX_ELEMENTS
        )));
    }
    Ok(width)
}

fn check_shape(name: &str, dims: &[usize], values: usize) -> Result<(), SpecError> {
    let width = element_count(name, dims)?;
    if width != values {
        return Err(SpecError::Invalid(format!(
            "'{}' has dimensions {:?} but {} initial values",
            name, dims, values
        )));
    }
    Ok(())
}

fn ports(list: Vec<(String, TypeTag, (usize, usize))>, direction: PortDirection) -> Vec<ExtIo> {
    let mut offset = 0;
    list.into_iter()
        .enumerate()
        .map(|(index, (name, tag, dims))| {
            let port = ExtIo {
                name,
                direction,
                tag,
                index,
                offset,
                dims,
            };
            offset += port.width();
            port
        })
        .collect()
}

// ---------------------------------------------------------------------------
// JSON model description
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ModelDescription {
    name: String,
    #[serde(default)]
    desc: String,
    baserate: f64,
    #[serde(rename = "Parameters", default)]
    parameters: IndexMap<String, Declaration>,
    #[serde(rename = "Inports", default)]
    inports: IndexMap<String, Declaration>,
    #[serde(rename = "Outports", default)]
    outports: IndexMap<String, Declaration>,
    #[serde(rename = "Signals", default)]
    signals: IndexMap<String, Declaration>,
}

#[derive(Debug, Deserialize)]
struct Declaration {
    #[serde(rename = "type", default = "default_type")]
    ty: String,
    #[serde(default)]
    value: Option<InitialValue>,
    #[serde(default)]
    desc: Option<String>,
    #[serde(default)]
    dims: Option<Vec<usize>>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum InitialValue {
    Scalar(f64),
    Array(Vec<f64>),
}

fn default_type() -> String {
    "double".to_string()
}

impl Declaration {
    /// Resolve dimensions and one value per element. A scalar value is
    /// broadcast over explicit dimensions.
    fn shape(&self, key: &str) -> Result<(Vec<usize>, Vec<f64>), SpecError> {
        let shape = match (&self.value, &self.dims) {
            (Some(InitialValue::Array(values)), Some(dims)) => (dims.clone(), values.clone()),
            (Some(InitialValue::Array(values)), None) => (vec![1, values.len()], values.clone()),
            (Some(InitialValue::Scalar(v)), Some(dims)) => {
                (dims.clone(), vec![*v; element_count(key, dims)?])
            }
            (Some(InitialValue::Scalar(v)), None) => (vec![1, 1], vec![*v]),
            (None, Some(dims)) => (dims.clone(), vec![0.0; element_count(key, dims)?]),
            (None, None) => (vec![1, 1], vec![0.0]),
        };
        Ok(shape)
    }

    /// Ports are at most two-dimensional.
    fn port_dims(&self, key: &str) -> Result<(usize, usize), SpecError> {
        match self.dims.as_deref() {
            None => Ok((1, 1)),
            Some([rows, cols]) => Ok((*rows, *cols)),
            Some([n]) => Ok((1, *n)),
            Some(dims) => Err(SpecError::Invalid(format!(
                "port '{}' has dimensions {:?}; ports take one or two",
                key, dims
            ))),
        }
    }
}

impl ModelDescription {
    fn into_spec(self) -> Result<ModelSpec, SpecError> {
        let mut builder = ModelSpec::builder(self.name)
            .description(self.desc)
            .base_rate(self.baserate);

        for (key, decl) in &self.parameters {
            let tag: TypeTag = decl.ty.parse()?;
            let (dims, values) = decl.shape(key)?;
            let name = decl.desc.clone().unwrap_or_else(|| key.clone());
            builder = builder.parameter(name, tag, dims, values);
        }
        for (key, decl) in &self.signals {
            let tag: TypeTag = decl.ty.parse()?;
            let (dims, values) = decl.shape(key)?;
            let name = decl.desc.clone().unwrap_or_else(|| key.clone());
            builder.signals.push((key.clone(), name, tag, dims, values));
        }
        for (key, decl) in &self.inports {
            let tag: TypeTag = decl.ty.parse()?;
            builder.inports.push((key.clone(), tag, decl.port_dims(key)?));
        }
        for (key, decl) in &self.outports {
            let tag: TypeTag = decl.ty.parse()?;
            builder.outports.push((key.clone(), tag, decl.port_dims(key)?));
        }

        builder.build()
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
