use std::{sync::Arc, thread};

use gpu_binder::{ArgumentValue, BindError, BufferAdapter, Module, SharedKernel, driver::host::{Host, spirv}};
use rand::{Rng, SeedableRng, rngs::StdRng};

#[test]
fn distinct_buffers_from_many_threads() -> Result<(), BindError> {
    let host = Arc::new(Host::default());
    let adapter = BufferAdapter::new(host.clone());

    thread::scope(|s| {
        let handles: Vec<_> = (0..8u64)
            .map(|seed| {
                let adapter = adapter.clone();

                s.spawn(move || -> Result<(), BindError> {
                    let mut rng = StdRng::seed_from_u64(seed);

                    for _ in 0..32 {
                        let len = rng.gen_range(1..256);
                        let values: Vec<i64> = (0..len).map(|_| rng.gen()).collect();
                        let fill: i32 = rng.gen();

                        let a = adapter.allocate::<i64>(len)?;
                        a.write(&values)?;

                        let b = adapter.allocate::<i32>(len)?;
                        b.fill(fill)?;

                        assert_eq!(a.read()?, values);
                        assert_eq!(b.read()?, vec![fill; len]);
                    }

                    Ok(())
                })
            })
            .collect();

        handles.into_iter().try_for_each(|handle| handle.join().expect("worker panicked"))
    })?;

    assert_eq!(host.live_allocations(), 0);
    assert_eq!(host.bytes_in_use(), 0);

    Ok(())
}

#[test]
fn shared_kernel_keeps_driver_and_record_in_sync() -> Result<(), BindError> {
    let host = Arc::new(Host::default());
    let module = Module::load(host.clone(), &spirv::assemble(&[("k", 4)]))?;
    let kernel = SharedKernel::new(module.kernel("k")?);

    thread::scope(|s| {
        for seed in 0..8u64 {
            let kernel = kernel.clone();

            s.spawn(move || {
                let mut rng = StdRng::seed_from_u64(seed);

                for _ in 0..64 {
                    let index = rng.gen_range(0..4);
                    let value = ArgumentValue::RawPointer(rng.gen());
                    kernel.set_argument(index, value).expect("index is in range");
                }
            });
        }
    });

    let kernel = kernel.lock();

    for index in 0..4 {
        let bound = kernel.argument(index).map(|value| value.bytes().into_owned());
        assert_eq!(bound, host.recorded_argument(kernel.handle(), index));
    }

    Ok(())
}
