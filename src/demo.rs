//! # Demo Models
//!
//! Small models used by the `modelframe` binary and the integration tests.
//! Each resolves its parameter and signal indices from the [`ModelSpec`]
//! at initialization, so the matching JSON description under `demos/` (or
//! the built-in one from [`spec_for`]) must define them.
//!
//! | Model    | Inputs                          | Outputs                 |
//! |----------|---------------------------------|-------------------------|
//! | `engine` | command_RPM, command_EngineOn   | RPM, engineTemperature  |
//! | `gain`   | In1                             | Out1 = gain · In1       |
//! | `delay`  | In1                             | In1 delayed by `delay`  |
//! | `power`  | power_on, voltage, current      | voltage, current        |

use std::collections::VecDeque;

use crate::codec::TypeTag;
use crate::error::{ModelError, SpecError};
use crate::metadata::ModelSpec;
use crate::model::{parameter_index, signal_index, Model, StepContext};

/// Names accepted by [`spec_for`] and [`model_for`].
pub const DEMO_NAMES: [&str; 4] = ["engine", "gain", "delay", "power"];

/// Longest supported delay, in steps.
pub const MAX_DELAY: usize = 10_000;

/// The step functions index their ports directly, so the description
/// must provide at least this many input and output values.
fn require_ports(spec: &ModelSpec, inputs: usize, outputs: usize) -> Result<(), ModelError> {
    if spec.input_width() < inputs || spec.output_width() < outputs {
        return Err(ModelError::new(format!(
            "model '{}' needs {} inputs and {} outputs, the description has {} and {}",
            spec.name,
            inputs,
            outputs,
            spec.input_width(),
            spec.output_width()
        )));
    }
    Ok(())
}

fn param(ctx: &StepContext<'_>, index: usize) -> Result<f64, ModelError> {
    ctx.params
        .get(index, 0)
        .map_err(|e| ModelError::new(e.to_string()))
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Clone, Copy)]
struct EngineParams {
    a11: usize,
    a12: usize,
    a21: usize,
    b11: usize,
    c12: usize,
    idle_rpm: usize,
    redline_rpm: usize,
    time_constant: usize,
    room_temp: usize,
    operating_delta: usize,
    redline_delta: usize,
}

#[derive(Debug, Default, Clone, Copy)]
struct EngineSignals {
    rpm: usize,
    temperature: usize,
    engine_on: usize,
}

/// Engine speed and temperature, both integrated with a fixed-step Euler
/// solver at the base rate.
#[derive(Debug, Default)]
pub struct Engine {
    params: EngineParams,
    signals: EngineSignals,
    /// RPM transfer function state.
    x: [f64; 2],
    temperature: f64,
    rpm: f64,
    dt: f64,
}

impl Engine {
    fn rpm_step(&mut self, ctx: &StepContext<'_>, command: f64, engine_on: bool) -> Result<f64, ModelError> {
        let p = self.params;
        let (a11, a12, a21) = (param(ctx, p.a11)?, param(ctx, p.a12)?, param(ctx, p.a21)?);
        let (b11, c12) = (param(ctx, p.b11)?, param(ctx, p.c12)?);

        self.x[0] += self.dt * (a11 * self.x[0] + a12 * self.x[1] + b11 * command);
        self.x[1] += self.dt * a21 * self.x[0];
        let out = c12 * self.x[1];

        // Engine off and spun down: stop instead of oscillating around zero
        if !engine_on && out <= 0.0 {
            self.x = [0.0; 2];
        }
        Ok(out.max(0.0))
    }

    fn temperature_step(&mut self, ctx: &StepContext<'_>, set_point: f64) -> Result<f64, ModelError> {
        let tau = param(ctx, self.params.time_constant)?;
        let t1 = if tau > 0.0 { 1.0 / tau } else { 0.0 };
        self.temperature += self.dt * (-t1 * self.temperature + set_point);
        Ok(t1 * self.temperature)
    }
}

impl Model for Engine {
    fn initialize(&mut self, spec: &ModelSpec) -> Result<(), ModelError> {
        self.params = EngineParams {
            a11: parameter_index(spec, "a11")?,
            a12: parameter_index(spec, "a12")?,
            a21: parameter_index(spec, "a21")?,
            b11: parameter_index(spec, "b11")?,
            c12: parameter_index(spec, "c12")?,
            idle_rpm: parameter_index(spec, "idleRPM")?,
            redline_rpm: parameter_index(spec, "redlineRPM")?,
            time_constant: parameter_index(spec, "temperature_timeConstant")?,
            room_temp: parameter_index(spec, "temperature_roomTemp")?,
            operating_delta: parameter_index(spec, "temperature_operatingTempDelta")?,
            redline_delta: parameter_index(spec, "temperature_redlineTempDelta")?,
        };
        self.signals = EngineSignals {
            rpm: signal_index(spec, "RPM")?,
            temperature: signal_index(spec, "engineTemperature")?,
            engine_on: signal_index(spec, "engineOn")?,
        };
        require_ports(spec, 2, 2)?;
        self.dt = spec.base_rate;
        Ok(())
    }

    fn step(&mut self, ctx: StepContext<'_>) -> Result<(), ModelError> {
        let command_rpm = ctx.inputs[0];
        let engine_on = ctx.inputs[1] as i32 != 0;

        let p = self.params;
        let mut temperature_command = param(&ctx, p.room_temp)?;
        let rpm_command = if engine_on {
            if self.rpm < param(&ctx, p.redline_rpm)? {
                temperature_command += param(&ctx, p.operating_delta)?;
            } else {
                temperature_command += param(&ctx, p.redline_delta)?;
            }
            command_rpm.max(param(&ctx, p.idle_rpm)?)
        } else {
            0.0
        };

        self.rpm = self.rpm_step(&ctx, rpm_command, engine_on)?;
        let temperature = self.temperature_step(&ctx, temperature_command)?;

        ctx.signals.publish(self.signals.rpm, self.rpm)?;
        ctx.signals.publish(self.signals.temperature, self.temperature)?;
        ctx.signals
            .publish(self.signals.engine_on, engine_on as u8 as f64)?;
        ctx.outputs[0] = self.rpm;
        ctx.outputs[1] = temperature;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Gain
// ---------------------------------------------------------------------------

/// `Out1 = gain * In1`.
#[derive(Debug, Default)]
pub struct Gain {
    gain: usize,
    signal: usize,
}

impl Model for Gain {
    fn initialize(&mut self, spec: &ModelSpec) -> Result<(), ModelError> {
        self.gain = parameter_index(spec, "gain")?;
        self.signal = signal_index(spec, "gain")?;
        require_ports(spec, 1, 1)
    }

    fn step(&mut self, ctx: StepContext<'_>) -> Result<(), ModelError> {
        let gain = param(&ctx, self.gain)?;
        ctx.signals.publish(self.signal, gain)?;
        ctx.outputs[0] = gain * ctx.inputs[0];
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Delay
// ---------------------------------------------------------------------------

/// Delay line of up to [`MAX_DELAY`] steps. A delay of 0 passes the
/// current input straight through.
#[derive(Debug)]
pub struct Delay {
    delay: usize,
    history: VecDeque<f64>,
}

impl Default for Delay {
    fn default() -> Self {
        Self {
            delay: 0,
            history: VecDeque::from(vec![0.0; MAX_DELAY]),
        }
    }
}

impl Model for Delay {
    fn initialize(&mut self, spec: &ModelSpec) -> Result<(), ModelError> {
        self.delay = parameter_index(spec, "delay")?;
        require_ports(spec, 1, 1)
    }

    fn step(&mut self, ctx: StepContext<'_>) -> Result<(), ModelError> {
        self.history.pop_back();
        self.history.push_front(ctx.inputs[0]);

        let steps = param(&ctx, self.delay)?.max(0.0) as usize;
        ctx.outputs[0] = self.history[steps.min(MAX_DELAY - 1)];
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Power supply
// ---------------------------------------------------------------------------

/// Echoes the commanded voltage and current with a fixed ripple added.
#[derive(Debug, Default)]
pub struct PowerSupply {
    ripple: usize,
}

impl Model for PowerSupply {
    fn initialize(&mut self, spec: &ModelSpec) -> Result<(), ModelError> {
        self.ripple = parameter_index(spec, "ripple")?;
        require_ports(spec, 3, 2)
    }

    fn step(&mut self, ctx: StepContext<'_>) -> Result<(), ModelError> {
        let ripple = param(&ctx, self.ripple)?;
        ctx.outputs[0] = ctx.inputs[1] + ripple;
        ctx.outputs[1] = ctx.inputs[2] + ripple;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Built-in description of a demo model. Matches `demos/<name>.json`.
pub fn spec_for(name: &str) -> Result<ModelSpec, SpecError> {
    let builder = match name {
        "engine" => ModelSpec::builder("engine")
            .description("Engine RPM and temperature demo")
            .scalar("a11", TypeTag::Double, -2.0)
            .scalar("a12", TypeTag::Double, -1.0)
            .scalar("a21", TypeTag::Double, 1.0)
            .scalar("b11", TypeTag::Double, 1.0)
            .scalar("c12", TypeTag::Double, 1.0)
            .scalar("idleRPM", TypeTag::Double, 800.0)
            .scalar("redlineRPM", TypeTag::Double, 6000.0)
            .scalar("temperature_timeConstant", TypeTag::Double, 10.0)
            .scalar("temperature_roomTemp", TypeTag::Double, 20.0)
            .scalar("temperature_operatingTempDelta", TypeTag::Double, 70.0)
            .scalar("temperature_redlineTempDelta", TypeTag::Double, 110.0)
            .signal("RPM", "engine speed", TypeTag::Double, 0.0)
            .signal("engineTemperature", "engine temperature", TypeTag::Double, 0.0)
            .signal("engineOn", "engine on", TypeTag::Int32, 0.0)
            .inport("command_RPM", TypeTag::Double)
            .inport("command_EngineOn", TypeTag::Int32)
            .outport("RPM", TypeTag::Double)
            .outport("engineTemperature", TypeTag::Double),
        "gain" => ModelSpec::builder("gain")
            .description("Gain demo")
            .scalar("gain", TypeTag::Double, 2.0)
            .signal("gain", "gain", TypeTag::Double, 0.0)
            .inport("In1", TypeTag::Double)
            .outport("Out1", TypeTag::Double),
        "delay" => ModelSpec::builder("delay")
            .description("Delay line demo")
            .scalar("delay", TypeTag::Int32, 10.0)
            .inport("In1", TypeTag::Double)
            .outport("Out1", TypeTag::Double),
        "power" => ModelSpec::builder("power")
            .description("Power supply demo")
            .scalar("ripple", TypeTag::Double, 0.1)
            .inport("power_on", TypeTag::Int32)
            .inport("output_voltage", TypeTag::Double)
            .inport("output_current", TypeTag::Double)
            .outport("output_voltage", TypeTag::Double)
            .outport("output_current", TypeTag::Double),
        other => {
            return Err(SpecError::Invalid(format!("no demo model named '{}'", other)));
        }
    };
    builder.build()
}

/// A fresh instance of a demo model.
pub fn model_for(name: &str) -> Option<Box<dyn Model>> {
    match name {
        "engine" => Some(Box::new(Engine::default())),
        "gain" => Some(Box::new(Gain::default())),
        "delay" => Some(Box::new(Delay::default())),
        "power" => Some(Box::new(PowerSupply::default())),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_demo_has_spec_and_model() {
        for name in DEMO_NAMES {
            let spec = spec_for(name).unwrap();
            let mut model = model_for(name).unwrap();
            model.initialize(&spec).unwrap();
        }
        assert!(spec_for("turbine").is_err());
        assert!(model_for("turbine").is_none());
    }

    #[test]
    fn test_missing_parameter_fails_initialize() {
        let spec = ModelSpec::builder("gain").build().unwrap();
        let err = Gain::default().initialize(&spec).unwrap_err();
        assert_eq!(err.message, "parameter 'gain/gain' is not defined");
    }

    #[test]
    fn test_missing_ports_fail_initialize() {
        let json = r#"{ "name": "gain", "baserate": 0.01,
                        "Parameters": { "gain": { "value": 2 } },
                        "Signals": { "gain": { "value": 0 } } }"#;
        let spec = ModelSpec::from_json(json).unwrap();
        let err = Gain::default().initialize(&spec).unwrap_err();
        assert_eq!(
            err.message,
            "model 'gain' needs 1 inputs and 1 outputs, the description has 0 and 0"
        );

        // The kernel refuses the model before any step can run
        let result = crate::Kernel::with_parts(
            spec,
            model_for("gain").unwrap(),
            std::sync::Arc::new(crate::NativeCodec),
            std::sync::Arc::new(crate::HostSemaphore::new()),
        );
        assert!(matches!(result, Err(crate::KernelError::Initialize(_))));

        let spec = spec_for("power").unwrap();
        assert!(PowerSupply::default().initialize(&spec).is_ok());
        let spec = ModelSpec::builder("power")
            .scalar("ripple", TypeTag::Double, 0.1)
            .inport("power_on", TypeTag::Int32)
            .outport("output_voltage", TypeTag::Double)
            .build()
            .unwrap();
        assert!(PowerSupply::default().initialize(&spec).is_err());
    }
}
