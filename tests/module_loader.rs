use std::sync::Arc;

use gpu_binder::{
    BindError, DynamicSharedMem, HostLimits, Module,
    driver::{DriverBindings, host::{Host, spirv}, ze},
};

#[test]
fn sixty_four_byte_stub_loads() -> Result<(), BindError> {
    let image = spirv::assemble(&[("fill", 0)]);
    assert_eq!(image.len(), 64);

    let module = Module::load(Arc::new(Host::default()), &image)?;
    assert!(!module.handle().is_null());

    Ok(())
}

#[test]
fn empty_blob_is_load_error() {
    let err = Module::load(Arc::new(Host::default()), &[]).unwrap_err();

    assert!(matches!(err, BindError::Load { .. }));
    assert_eq!(err.status().map(|s| s.name()), Some("ZE_RESULT_ERROR_INVALID_SIZE"));
}

#[test]
fn garbage_blob_is_load_error() {
    let err = Module::load(Arc::new(Host::default()), b"definitely not spir-v...").unwrap_err();
    assert_eq!(err.code_or(0), ze::ERROR_INVALID_NATIVE_BINARY);
}

#[test]
fn kernels_resolve_by_name() -> Result<(), BindError> {
    let module = Module::load(Arc::new(Host::default()), &spirv::assemble(&[("add", 3), ("scale", 2)]))?;

    assert_eq!(module.kernel("add")?.parameter_count(), 3);
    assert_eq!(module.kernel("scale")?.parameter_count(), 2);
    assert!(matches!(module.kernel("mul"), Err(BindError::Query { .. })));

    Ok(())
}

#[test]
fn occupancy_respects_limits_and_shared_memory() -> Result<(), BindError> {
    extern "C" fn kib_per_thread(block_size: std::ffi::c_int) -> usize {
        block_size as usize * 1024
    }

    let limits = HostLimits { max_total_group_size: 256, ..Default::default() };
    let module = Module::load(Arc::new(Host::new(limits)), &spirv::assemble(&[("k", 1)]))?;

    assert_eq!(module.suggest_max_block_size("k", DynamicSharedMem::None)?, 256);
    assert_eq!(module.suggest_max_block_size("k", DynamicSharedMem::PerBlock(kib_per_thread))?, 64);

    let err = module.suggest_max_block_size("k", DynamicSharedMem::Fixed(usize::MAX)).unwrap_err();
    assert!(matches!(err, BindError::Query { .. }));

    Ok(())
}

#[test]
fn failed_load_leaves_driver_usable() -> Result<(), BindError> {
    let host = Arc::new(Host::default());

    assert!(Module::load(host.clone(), &[0; 8]).is_err());
    assert_eq!(host.loaded_modules(), 0);

    let module = Module::load(host.clone(), &spirv::assemble(&[("k", 1)]))?;
    assert_eq!(host.loaded_modules(), 1);
    assert_eq!(Host::NAME, "host");

    drop(module);
    assert_eq!(host.loaded_modules(), 0);

    Ok(())
}
