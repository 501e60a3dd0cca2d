//! A real-time thread and a configuration thread running against the same
//! kernel. Every committed batch must be seen whole by the step function.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use modelframe::{CommitOutcome, Kernel, ModelError, ModelSpec, StepContext, TypeTag};

const WIDTH: usize = 16;

/// The step reads the whole vector and flags any mix of values.
fn uniform_vector_kernel(torn: Arc<AtomicBool>, last_seen: Arc<AtomicU64>) -> Kernel {
    let spec = ModelSpec::builder("batch")
        .parameter("v", TypeTag::Double, vec![1, WIDTH], vec![0.0; WIDTH])
        .outport("Out1", TypeTag::Double)
        .build()
        .unwrap();

    let model = move |ctx: StepContext<'_>| -> Result<(), ModelError> {
        let mut v = [0.0; WIDTH];
        ctx.params
            .read_vector(0, &mut v)
            .map_err(|e| ModelError::new(e.to_string()))?;
        if v.iter().any(|x| *x != v[0]) {
            torn.store(true, Ordering::SeqCst);
        }
        // Batches are committed in increasing order
        let seen = v[0] as u64;
        if seen < last_seen.swap(seen, Ordering::SeqCst) {
            torn.store(true, Ordering::SeqCst);
        }
        ctx.outputs[0] = v[0];
        Ok(())
    };
    Kernel::initialize(spec, model).unwrap()
}

#[test]
fn test_no_torn_batches_under_concurrent_commits() {
    let torn = Arc::new(AtomicBool::new(false));
    let last_seen = Arc::new(AtomicU64::new(0));
    let mut kernel = uniform_vector_kernel(torn.clone(), last_seen.clone());
    let params = kernel.parameters();
    let done = AtomicBool::new(false);

    let published = thread::scope(|s| {
        let tuner = s.spawn(|| {
            let mut published = 0u64;
            let mut batch = 1u64;
            while !done.load(Ordering::Acquire) {
                for i in 0..WIDTH {
                    params.set_queued(0, i, batch as f64).unwrap();
                }
                if params.commit().unwrap() == CommitOutcome::Published {
                    published += 1;
                }
                batch += 1;
            }
            published
        });

        for _ in 0..5_000 {
            kernel.schedule(&[]).unwrap();
            kernel.acknowledge().unwrap();
        }
        done.store(true, Ordering::Release);
        tuner.join().unwrap()
    });

    assert!(!torn.load(Ordering::SeqCst), "step observed a partial batch");
    assert!(published > 0);
    assert_eq!(kernel.ticks(), 5_000);
    assert!(!kernel.is_halted());
}

#[test]
fn test_reads_outside_a_step_never_mix_batches() {
    let kernel = uniform_vector_kernel(
        Arc::new(AtomicBool::new(false)),
        Arc::new(AtomicU64::new(0)),
    );
    let params = kernel.parameters();
    let done = AtomicBool::new(false);

    let mixed = thread::scope(|s| {
        s.spawn(|| {
            for batch in 1..=20_000u32 {
                params.set_vector_queued(0, &[batch as f64; WIDTH]).unwrap();
                params.commit().unwrap();
            }
            done.store(true, Ordering::Release);
        });

        let mut mixed = 0;
        while !done.load(Ordering::Acquire) {
            let v = kernel.get_vector_parameter(0, WIDTH).unwrap();
            if v.iter().any(|x| *x != v[0]) {
                mixed += 1;
            }
        }
        mixed
    });

    assert_eq!(mixed, 0, "read returned elements from two batches");
    assert_eq!(kernel.get_parameter(0, WIDTH - 1).unwrap(), 20_000.0);
}

#[test]
fn test_commit_blocks_until_step_acknowledged() {
    let torn = Arc::new(AtomicBool::new(false));
    let mut kernel = uniform_vector_kernel(torn, Arc::new(AtomicU64::new(0)));
    let params = kernel.parameters();
    params.set_vector_queued(0, &[7.0; WIDTH]).unwrap();

    kernel.schedule(&[]).unwrap();
    let committed = AtomicBool::new(false);

    thread::scope(|s| {
        s.spawn(|| {
            params.commit().unwrap();
            committed.store(true, Ordering::Release);
        });

        thread::sleep(Duration::from_millis(50));
        assert!(!committed.load(Ordering::Acquire));
        // Reads never block, even while the flip is pending
        assert_eq!(kernel.get_parameter(0, 0).unwrap(), 0.0);

        kernel.acknowledge().unwrap();
    });

    assert!(committed.load(Ordering::Acquire));
    let (out, _) = kernel.schedule(&[]).unwrap();
    assert_eq!(out, vec![7.0]);
    kernel.acknowledge().unwrap();
}

#[test]
fn test_inline_writes_from_another_thread() {
    let spec = ModelSpec::builder("inline")
        .scalar("k", TypeTag::Double, 0.0)
        .outport("Out1", TypeTag::Double)
        .build()
        .unwrap();
    let model = |ctx: StepContext<'_>| -> Result<(), ModelError> {
        ctx.outputs[0] = ctx.params.scalar(0);
        Ok(())
    };
    let mut kernel = Kernel::initialize(spec, model).unwrap();
    let params = kernel.parameters();

    thread::spawn(move || params.set_inline(0, 0, 9.0).unwrap())
        .join()
        .unwrap();

    let (out, _) = kernel.schedule(&[]).unwrap();
    assert_eq!(out, vec![9.0]);
    kernel.acknowledge().unwrap();
}
