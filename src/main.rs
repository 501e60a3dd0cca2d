//! # modelframe Demo Driver
//!
//! Runs one of the demo models the way a real-time host would: a
//! real-time loop calls `schedule()`/`acknowledge()` once per base period
//! while a configuration thread queues parameter edits and commits them
//! in the background.
//!
//! ```text
//!   real-time thread                  configuration thread
//!   ────────────────                  ────────────────────
//!   schedule(inputs) ──► outputs      set_queued(p, 0, v) ×N
//!   acknowledge()                     commit()  ── flip ──┐
//!   (sleep one base period)           set_inline(...)     │
//!          ▲                                              │
//!          └───── next step reads the new side ◄──────────┘
//! ```
//!
//! # Example
//!
//! ```bash
//! # Engine demo, 5 s of simulated time, commit every 50 steps
//! modelframe --model engine --steps 500 --commit-every 50
//!
//! # Gain demo from its JSON description, paced at the base rate
//! modelframe --spec demos/gain.json --input 3 --realtime -v
//! ```

use std::error::Error;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use modelframe::{demo, HostSemaphore, Kernel, ModelSpec, NativeCodec, ParamError, ParameterStore};

/// Run a demo model with a background parameter tuner.
#[derive(Parser, Debug)]
#[command(name = "modelframe")]
#[command(version, about, long_about = None)]
struct Args {
    /// Built-in demo model (engine, gain, delay, power)
    #[arg(short = 'm', long, default_value = "engine", conflicts_with = "spec")]
    model: String,

    /// JSON model description; its "name" selects the demo implementation
    #[arg(long)]
    spec: Option<PathBuf>,

    /// Number of steps to run
    #[arg(short = 'n', long, default_value = "500")]
    steps: u64,

    /// Base periods between parameter commits
    #[arg(short = 'c', long, default_value = "50")]
    commit_every: u64,

    /// Input values, comma separated. Defaults depend on the model.
    #[arg(short = 'i', long, value_delimiter = ',')]
    input: Vec<f64>,

    /// Sleep one base period between steps
    #[arg(long)]
    realtime: bool,

    /// Log framework debug events
    #[arg(short = 'v', long)]
    verbose: bool,
}

fn main() -> ExitCode {
    let args = Args::parse();

    let default_filter = if args.verbose {
        "info,modelframe=debug"
    } else {
        "warn,modelframe=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> Result<(), Box<dyn Error>> {
    let spec = match &args.spec {
        Some(path) => ModelSpec::from_path(path)?,
        None => demo::spec_for(&args.model)?,
    };
    let model = demo::model_for(&spec.name)
        .ok_or_else(|| format!("no model implementation named '{}'", spec.name))?;

    let inputs = if args.input.is_empty() {
        default_inputs(&spec)
    } else {
        args.input.clone()
    };
    if inputs.len() != spec.input_width() {
        return Err(format!(
            "model '{}' takes {} inputs, got {}",
            spec.name,
            spec.input_width(),
            inputs.len()
        )
        .into());
    }

    let mut kernel = Kernel::with_parts(
        spec,
        model,
        Arc::new(NativeCodec),
        Arc::new(HostSemaphore::new()),
    )?;
    kernel.start()?;

    let base_rate = kernel.model_spec().base_rate;
    info!(
        model = %kernel.model_spec().name,
        steps = args.steps,
        base_rate,
        commit_every = args.commit_every,
        "Starting run"
    );

    let params = kernel.parameters();
    let stop = AtomicBool::new(false);
    let period = Duration::from_secs_f64(base_rate * args.commit_every.max(1) as f64);

    let mut outputs = vec![0.0; kernel.model_spec().output_width()];
    thread::scope(|s| {
        let tuner = s.spawn(|| tune(&params, &stop, period));

        for _ in 0..args.steps {
            if let Err(e) = kernel.schedule_into(&inputs, &mut outputs) {
                warn!("step refused: {}", e);
                break;
            }
            if let Err(e) = kernel.acknowledge() {
                warn!("acknowledge refused: {}", e);
                break;
            }
            if args.realtime {
                thread::sleep(Duration::from_secs_f64(base_rate));
            }
        }

        stop.store(true, Ordering::Release);
        let commits = tuner.join().unwrap_or(0);
        info!(commits, "configuration thread finished");
    });

    println!("{}", kernel.build_info());
    println!("time     : {:.3} s ({} steps)", kernel.time(), kernel.ticks());
    for (port, value) in kernel.model_spec().outports.iter().zip(&outputs) {
        println!("{:<9}: {:.6}", port.name, value);
    }
    for (i, param) in kernel.model_spec().parameters.iter().enumerate() {
        let width = param.width();
        let values = kernel.get_vector_parameter(i, width)?;
        println!("{:<9}: {} = {:?}", "param", param.name, values);
    }
    if let Some(message) = kernel.model_error() {
        println!("status   : {}", message);
    }

    kernel.finalize()?;
    Ok(())
}

/// Inputs used when none are given on the command line.
fn default_inputs(spec: &ModelSpec) -> Vec<f64> {
    match spec.name.as_str() {
        // 2500 RPM, engine on
        "engine" => vec![2500.0, 1.0],
        // Power on, 12 V, 1.5 A
        "power" => vec![1.0, 12.0, 1.5],
        _ => vec![1.0; spec.input_width()],
    }
}

/// Background tuner: sweeps the first parameter through a few values with
/// queued writes and commits, touching it inline every fourth round.
/// Returns the number of successful commits.
fn tune(params: &ParameterStore, stop: &AtomicBool, period: Duration) -> usize {
    let Some(first) = params.parameter(0) else {
        return 0;
    };
    let base = first.default.first().copied().unwrap_or(0.0);
    let mut commits = 0;
    let mut round = 0u32;

    while !stop.load(Ordering::Acquire) {
        thread::sleep(period);
        round += 1;
        let value = base * (1.0 + 0.05 * (round % 5) as f64);

        let result = if round % 4 == 0 {
            params.set_inline(0, 0, value)
        } else {
            params.set_queued(0, 0, value)
        };
        if let Err(e) = result {
            warn!(round, "parameter write rejected: {}", e);
        }

        match params.commit() {
            Ok(_) => commits += 1,
            Err(ParamError::ConflictLostEdit) => {}
            Err(e) => {
                warn!(round, "commit failed: {}", e);
                break;
            }
        }
    }
    commits
}
