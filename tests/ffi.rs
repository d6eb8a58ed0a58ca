//! The C entry points, driven the way a managed caller would

#![cfg(not(any(feature = "cuda", feature = "level-zero")))]

use std::ptr;

use gpu_binder::{
    ActiveDriver, DriverBindings,
    driver::{host::spirv, ze},
    ffi::*,
};

fn init() {
    assert_eq!(gpu_binder_init(), 0);
    assert_eq!(gpu_binder_init(), 0);
}

unsafe fn load(kernels: &[(&str, u32)]) -> u64 {
    let image = spirv::assemble(kernels);
    let mut module = 0;
    assert_eq!(unsafe { gpu_binder_module_load(image.as_ptr(), image.len(), &mut module) }, 0);
    module
}

#[test]
fn module_round_trip() {
    init();

    unsafe {
        let module = load(&[("axpy", 4)]);
        assert_ne!(module, 0);

        let mut kernel = 0;
        assert_eq!(gpu_binder_module_get_kernel(module, c"axpy".as_ptr(), &mut kernel), 0);
        assert_eq!(gpu_binder_module_get_kernel(module, c"nope".as_ptr(), &mut kernel), ze::ERROR_INVALID_KERNEL_NAME);

        let mut block = 0;
        assert_eq!(gpu_binder_occupancy_max_potential_block_size(module, c"axpy".as_ptr(), &mut block), 0);
        assert_eq!(block, 1024);

        assert_eq!(gpu_binder_module_unload(module), ze::ERROR_HANDLE_OBJECT_IN_USE);
        assert_eq!(gpu_binder_kernel_release(kernel), 0);
        assert_eq!(gpu_binder_module_unload(module), 0);
    }
}

#[test]
fn empty_module_reports_driver_status() {
    init();

    let mut module = 0;
    let status = unsafe { gpu_binder_module_load(ptr::null(), 0, &mut module) };

    assert_eq!(status, ze::ERROR_INVALID_SIZE);
    assert_eq!(module, 0);
}

#[test]
fn buffer_round_trip() {
    init();

    unsafe {
        let mut ptr = 0;
        assert_eq!(gpu_binder_alloc(16 * 4, &mut ptr), 0);
        assert_eq!(gpu_binder_memset_i32(ptr, 16, 7, 16), 0);

        let mut values = ptr::null_mut();
        assert_eq!(gpu_binder_read_back_i32(ptr, 16, &mut values), 0);
        assert_eq!(std::slice::from_raw_parts(values, 16), &[7; 16]);
        assert_eq!(gpu_binder_release_i32(values, 16), 0);

        let source: Vec<i32> = (0..16).collect();
        assert_eq!(gpu_binder_copy_i32(ptr, source.as_ptr(), 16), 0);

        let mut equal = false;
        assert_eq!(gpu_binder_is_equal_i32(ptr, ptr, 16, &mut equal), 0);
        assert!(equal);

        assert_eq!(gpu_binder_read_back_i32(ptr, 16, &mut values), 0);
        assert_eq!(std::slice::from_raw_parts(values, 16), source.as_slice());
        assert_eq!(gpu_binder_release_i32(values, 16), 0);

        assert_eq!(gpu_binder_read_back_i32(ptr, 17, &mut values), ze::ERROR_INVALID_ARGUMENT);

        assert_eq!(gpu_binder_free(ptr), 0);
        assert_eq!(gpu_binder_free(ptr), ze::ERROR_INVALID_ARGUMENT);
    }
}

#[test]
fn memset_length_is_not_a_bound() {
    init();

    unsafe {
        let mut ptr = 0;
        assert_eq!(gpu_binder_alloc(8 * 8, &mut ptr), 0);

        assert_eq!(gpu_binder_memset_i64(ptr, 1, -5, 8), 0);
        assert_eq!(gpu_binder_memset_i64(ptr, -1, 0, 8), ActiveDriver::INVALID_VALUE);

        let mut values = ptr::null_mut();
        assert_eq!(gpu_binder_read_back_i64(ptr, 8, &mut values), 0);
        assert_eq!(std::slice::from_raw_parts(values, 8), &[-5; 8]);
        assert_eq!(gpu_binder_release_i64(values, 8), 0);

        assert_eq!(gpu_binder_free(ptr), 0);
    }
}

#[test]
fn null_outputs_and_negative_counts_are_invalid() {
    init();

    unsafe {
        assert_eq!(gpu_binder_module_load(ptr::null(), 0, ptr::null_mut()), ActiveDriver::INVALID_VALUE);
        assert_eq!(gpu_binder_memset_i32(0x1000, 4, 1, -1), ActiveDriver::INVALID_VALUE);
        assert_eq!(gpu_binder_is_equal_i8(0, 0, 1, ptr::null_mut()), ActiveDriver::INVALID_VALUE);
        assert_eq!(gpu_binder_copy_i64(0x1000, ptr::null(), 2), ActiveDriver::INVALID_VALUE);
        assert_eq!(gpu_binder_read_back_f32(0x1000, 2, ptr::null_mut()), ActiveDriver::INVALID_VALUE);
        assert_eq!(gpu_binder_kernel_set_argument_bytes(0, 0, 8, [0u8; 4].as_ptr(), 4), ActiveDriver::INVALID_VALUE);
        assert_eq!(gpu_binder_kernel_set_argument_pointer(0, 0, 16, 0), ActiveDriver::INVALID_VALUE);
    }
}

#[test]
fn zero_counts_succeed_without_memory() {
    init();

    unsafe {
        let mut equal = false;
        assert_eq!(gpu_binder_is_equal_f64(0, 8, 0, &mut equal), 0);
        assert!(equal);

        assert_eq!(gpu_binder_memset_i8(0, 0, 1, 0), 0);
        assert_eq!(gpu_binder_copy_i32(0, ptr::null(), 0), 0);

        let mut values = ptr::null_mut();
        assert_eq!(gpu_binder_read_back_i64(0, 0, &mut values), 0);
        assert_eq!(gpu_binder_release_i64(values, 0), 0);
        assert_eq!(gpu_binder_release_i64(ptr::null_mut(), 3), 0);
    }
}

#[test]
fn kernel_configuration() {
    init();

    unsafe {
        let module = load(&[("k", 3)]);
        let mut kernel = 0;
        assert_eq!(gpu_binder_module_get_kernel(module, c"k".as_ptr(), &mut kernel), 0);

        let (mut x, mut y, mut z) = (0, 0, 0);
        assert_eq!(gpu_binder_kernel_suggest_group_size(kernel, 4096, 1, 1, &mut x, &mut y, &mut z), 0);
        assert_eq!((x, y, z), (1024, 1, 1));

        assert_eq!(gpu_binder_kernel_set_group_size(kernel, x, y, z), 0);
        assert_eq!(gpu_binder_kernel_set_group_size(kernel, 2048, 1, 1), ze::ERROR_INVALID_GROUP_SIZE_DIMENSION);

        assert_eq!(gpu_binder_kernel_set_argument_buffer(kernel, 0, 8, 0x7f00_0000_0000), 0);
        assert_eq!(gpu_binder_kernel_set_argument_bytes(kernel, 1, 4, 5i32.to_ne_bytes().as_ptr(), 4), 0);
        assert_eq!(gpu_binder_kernel_set_argument_pointer(kernel, 2, 8, 0xdead), 0);
        assert_eq!(gpu_binder_kernel_set_argument_pointer(kernel, 5, 8, 0xdead), ze::ERROR_INVALID_KERNEL_ARGUMENT_INDEX);

        assert_eq!(gpu_binder_kernel_release(kernel), 0);
        assert_eq!(gpu_binder_module_unload(module), 0);
    }
}

#[test]
fn host_driver_is_active_by_default() {
    assert_eq!(<ActiveDriver as DriverBindings>::NAME, "host");
}
