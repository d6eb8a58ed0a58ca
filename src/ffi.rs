//! C ABI entry points for managed callers
//!
//! Every function returns the driver's status code, `0` on success, and
//! writes results through out-pointers. Handles and device pointers are
//! passed as `u64`. Requests rejected before reaching the driver (null
//! out-pointers, negative counts, calling before [`gpu_binder_init`])
//! return the driver's invalid-value code, and a panic returns its
//! unknown-error code instead of unwinding into the caller.

use std::{
    ffi::{CStr, c_char},
    panic::{self, AssertUnwindSafe},
    sync::{Arc, OnceLock},
};

use crate::{
    buffer::BufferAdapter,
    config::BinderConfig,
    driver::{self, ActiveDriver, DriverBindings},
    error::{BindError, Result},
    handle::{DeviceBuffer, DevicePtr, Dim3, KernelHandle, ModuleHandle},
    kernel,
};

static DRIVER: OnceLock<Arc<ActiveDriver>> = OnceLock::new();

fn guard(name: &str, f: impl FnOnce() -> Result<()>) -> i32 {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(())) => 0,
        Ok(Err(err)) => {
            tracing::debug!(entry = name, %err, "request failed");
            err.code_or(ActiveDriver::INVALID_VALUE)
        }
        Err(_) => {
            tracing::warn!(entry = name, "panic caught at the C boundary");
            ActiveDriver::UNKNOWN
        }
    }
}

fn active() -> Result<&'static Arc<ActiveDriver>> {
    DRIVER.get().ok_or_else(|| "gpu_binder_init has not been called".into())
}

fn count(value: i32) -> Result<usize> {
    usize::try_from(value).map_err(|_| format!("negative count {value}").into())
}

unsafe fn out<'a, T>(ptr: *mut T) -> Result<&'a mut T> {
    unsafe { ptr.as_mut() }.ok_or_else(|| "null output pointer".into())
}

unsafe fn host_slice<'a, T>(ptr: *const T, len: usize) -> Result<&'a [T]> {
    match (ptr.is_null(), len) {
        (_, 0) => Ok(&[]),
        (true, _) => Err("null host pointer".into()),
        (false, _) => Ok(unsafe { std::slice::from_raw_parts(ptr, len) }),
    }
}

unsafe fn kernel_name<'a>(name: *const c_char) -> Result<&'a CStr> {
    if name.is_null() {
        return Err("null kernel name".into());
    }

    Ok(unsafe { CStr::from_ptr(name) })
}

/// First `size` bytes of a pointer-sized argument value
fn pointer_argument(raw: u64, size: usize) -> Result<Vec<u8>> {
    let bytes = raw.to_ne_bytes();

    match bytes.get(..size) {
        Some(bytes) => Ok(bytes.to_vec()),
        None => Err(format!("argument size {size} exceeds a pointer").into()),
    }
}

/// Open the driver selected at build time, configured from the
/// environment. Calling it again once it has succeeded does nothing.
#[unsafe(no_mangle)]
pub extern "C" fn gpu_binder_init() -> i32 {
    guard("init", || {
        if DRIVER.get().is_some() {
            return Ok(());
        }

        let config = BinderConfig::from_env()?;
        let driver = driver::open_active(&config)?;
        let _ = DRIVER.set(driver);

        Ok(())
    })
}

/// ### Safety
///
/// `image` must point to `len` readable bytes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn gpu_binder_module_load(image: *const u8, len: usize, out_handle: *mut u64) -> i32 {
    guard("module_load", || {
        let driver = active()?;
        let out_handle = unsafe { out(out_handle)? };
        let image = unsafe { host_slice(image, len)? };

        let module = unsafe { driver.module_load(image) }.map_err(|status| BindError::Load { status })?;
        tracing::debug!(%module, bytes = len, "module loaded");
        *out_handle = module.raw();

        Ok(())
    })
}

/// ### Safety
///
/// `module` must have come from [`gpu_binder_module_load`] and every
/// kernel resolved from it must have been released.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn gpu_binder_module_unload(module: u64) -> i32 {
    guard("module_unload", || {
        let module = ModuleHandle::from_raw(module);
        unsafe { active()?.module_unload(module) }.map_err(|status| BindError::Query { status })?;
        tracing::debug!(%module, "module unloaded");
        Ok(())
    })
}

/// ### Safety
///
/// `name` must be a NUL-terminated string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn gpu_binder_module_get_kernel(module: u64, name: *const c_char, out_kernel: *mut u64) -> i32 {
    guard("module_get_kernel", || {
        let driver = active()?;
        let out_kernel = unsafe { out(out_kernel)? };
        let name = unsafe { kernel_name(name)? };

        let kernel = unsafe { driver.module_get_kernel(ModuleHandle::from_raw(module), name) }
            .map_err(|status| BindError::Query { status })?;
        *out_kernel = kernel.raw();

        Ok(())
    })
}

/// ### Safety
///
/// `kernel` must have come from [`gpu_binder_module_get_kernel`] and
/// must not be used afterwards.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn gpu_binder_kernel_release(kernel: u64) -> i32 {
    guard("kernel_release", || {
        unsafe { active()?.kernel_destroy(KernelHandle::from_raw(kernel)) }
            .map_err(|status| BindError::Query { status })
    })
}

/// Block size giving maximum occupancy for kernel `name` of `module`
///
/// ### Safety
///
/// `name` must be a NUL-terminated string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn gpu_binder_occupancy_max_potential_block_size(
    module: u64,
    name: *const c_char,
    out_block_size: *mut i32,
) -> i32 {
    guard("occupancy_max_potential_block_size", || {
        let driver = active()?;
        let out_block_size = unsafe { out(out_block_size)? };
        let name = unsafe { kernel_name(name)? };

        let block = kernel::max_block_size_raw(driver.as_ref(), ModuleHandle::from_raw(module), name)?;
        *out_block_size = i32::try_from(block).unwrap_or(i32::MAX);

        Ok(())
    })
}

/// Allocate `bytes` bytes of device memory
///
/// ### Safety
///
/// The allocation must be released with [`gpu_binder_free`] exactly once.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn gpu_binder_alloc(bytes: usize, out_ptr: *mut u64) -> i32 {
    guard("alloc", || {
        let out_ptr = unsafe { out(out_ptr)? };
        let ptr = unsafe { active()?.mem_alloc(bytes) }.map_err(|status| BindError::DeviceMemory { status })?;
        *out_ptr = ptr.raw();
        Ok(())
    })
}

/// ### Safety
///
/// `ptr` must have come from [`gpu_binder_alloc`] and must not be used
/// afterwards.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn gpu_binder_free(ptr: u64) -> i32 {
    guard("free", || {
        unsafe { active()?.mem_free(DevicePtr::from_raw(ptr)) }.map_err(|status| BindError::DeviceMemory { status })
    })
}

macro_rules! buffer_entry_points {
    ($($t:ty => $memset:ident, $is_equal:ident, $copy:ident, $read_back:ident, $release:ident;)*) => {
        $(
            /// Fill `count` elements at `ptr` with `value`
            ///
            /// `len` is the element length of the caller's buffer object. It
            /// must not be negative but does not bound `count`; filling past
            /// the caller's own buffer is the caller's concern.
            ///
            /// ### Safety
            ///
            /// `count` elements at `ptr` must lie inside a live device allocation.
            #[unsafe(no_mangle)]
            pub unsafe extern "C" fn $memset(ptr: u64, len: i32, value: $t, count: i32) -> i32 {
                guard(stringify!($memset), || {
                    let buffer = DeviceBuffer::<$t>::new(DevicePtr::from_raw(ptr), self::count(len)?);
                    let adapter = BufferAdapter::new(active()?.clone());
                    unsafe { adapter.memset(buffer, value, self::count(count)?) }
                })
            }

            /// ### Safety
            ///
            /// `count` elements at both `a` and `b` must lie inside live
            /// device allocations.
            #[unsafe(no_mangle)]
            pub unsafe extern "C" fn $is_equal(a: u64, b: u64, count: i32, out_equal: *mut bool) -> i32 {
                guard(stringify!($is_equal), || {
                    let out_equal = unsafe { out(out_equal)? };
                    let adapter = BufferAdapter::new(active()?.clone());
                    let (a, b) = (DevicePtr::from_raw(a), DevicePtr::from_raw(b));
                    *out_equal = unsafe { adapter.is_equal::<$t>(a, b, self::count(count)?)? };
                    Ok(())
                })
            }

            /// ### Safety
            ///
            /// `src` must point to `len` readable elements, and `len`
            /// elements at `dest` must lie inside a live device allocation.
            #[unsafe(no_mangle)]
            pub unsafe extern "C" fn $copy(dest: u64, src: *const $t, len: i32) -> i32 {
                guard(stringify!($copy), || {
                    let source = unsafe { host_slice(src, self::count(len)?)? };
                    let adapter = BufferAdapter::new(active()?.clone());
                    unsafe { adapter.copy(DevicePtr::from_raw(dest), source) }
                })
            }

            /// Read `count` elements into a new host array, which the
            /// caller owns and must hand back through the matching release
            ///
            /// ### Safety
            ///
            /// `count` elements at `src` must lie inside a live device allocation.
            #[unsafe(no_mangle)]
            pub unsafe extern "C" fn $read_back(src: u64, count: i32, out_values: *mut *mut $t) -> i32 {
                guard(stringify!($read_back), || {
                    let out_values = unsafe { out(out_values)? };
                    let adapter = BufferAdapter::new(active()?.clone());
                    let values = unsafe { adapter.read_back::<$t>(DevicePtr::from_raw(src), self::count(count)?)? };
                    *out_values = Box::into_raw(values.into_boxed_slice()).cast::<$t>();
                    Ok(())
                })
            }

            /// ### Safety
            ///
            /// `values` must be null or an array returned by the matching
            /// read-back with the same `count`, not yet released.
            #[unsafe(no_mangle)]
            pub unsafe extern "C" fn $release(values: *mut $t, count: i32) -> i32 {
                guard(stringify!($release), || {
                    let count = self::count(count)?;

                    if !values.is_null() {
                        drop(unsafe { Box::from_raw(std::ptr::slice_from_raw_parts_mut(values, count)) });
                    }

                    Ok(())
                })
            }
        )*
    };
}

buffer_entry_points! {
    i8 => gpu_binder_memset_i8, gpu_binder_is_equal_i8, gpu_binder_copy_i8, gpu_binder_read_back_i8, gpu_binder_release_i8;
    i32 => gpu_binder_memset_i32, gpu_binder_is_equal_i32, gpu_binder_copy_i32, gpu_binder_read_back_i32, gpu_binder_release_i32;
    i64 => gpu_binder_memset_i64, gpu_binder_is_equal_i64, gpu_binder_copy_i64, gpu_binder_read_back_i64, gpu_binder_release_i64;
    f32 => gpu_binder_memset_f32, gpu_binder_is_equal_f32, gpu_binder_copy_f32, gpu_binder_read_back_f32, gpu_binder_release_f32;
    f64 => gpu_binder_memset_f64, gpu_binder_is_equal_f64, gpu_binder_copy_f64, gpu_binder_read_back_f64, gpu_binder_release_f64;
}

/// ### Safety
///
/// `kernel` must be a live kernel handle.
#[unsafe(no_mangle)]
#[allow(clippy::too_many_arguments)]
pub unsafe extern "C" fn gpu_binder_kernel_suggest_group_size(
    kernel: u64,
    global_x: u32,
    global_y: u32,
    global_z: u32,
    out_x: *mut u32,
    out_y: *mut u32,
    out_z: *mut u32,
) -> i32 {
    guard("kernel_suggest_group_size", || {
        let (out_x, out_y, out_z) = unsafe { (out(out_x)?, out(out_y)?, out(out_z)?) };

        let global = Dim3::new(global_x, global_y, global_z);
        let group = kernel::suggest_raw(active()?.as_ref(), KernelHandle::from_raw(kernel), global)?;

        (*out_x, *out_y, *out_z) = (group.x, group.y, group.z);

        Ok(())
    })
}

/// ### Safety
///
/// `kernel` must be a live kernel handle not being configured by
/// another thread.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn gpu_binder_kernel_set_group_size(kernel: u64, x: u32, y: u32, z: u32) -> i32 {
    guard("kernel_set_group_size", || {
        kernel::configure_raw(active()?.as_ref(), KernelHandle::from_raw(kernel), Dim3::new(x, y, z))
    })
}

/// Bind a device buffer address to parameter `index`
///
/// ### Safety
///
/// `kernel` must be a live kernel handle not being configured by
/// another thread.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn gpu_binder_kernel_set_argument_buffer(kernel: u64, index: u32, size: usize, buffer: u64) -> i32 {
    guard("kernel_set_argument_buffer", || {
        let value = pointer_argument(buffer, size)?;
        kernel::bind_raw(active()?.as_ref(), KernelHandle::from_raw(kernel), index, &value)
    })
}

/// Bind the first `size` of `len` bytes to parameter `index`
///
/// ### Safety
///
/// `kernel` must be a live kernel handle not being configured by
/// another thread, and `bytes` must point to `len` readable bytes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn gpu_binder_kernel_set_argument_bytes(
    kernel: u64,
    index: u32,
    size: usize,
    bytes: *const u8,
    len: usize,
) -> i32 {
    guard("kernel_set_argument_bytes", || {
        let bytes = unsafe { host_slice(bytes, len)? };
        let value = bytes.get(..size).ok_or_else(|| format!("argument size {size} exceeds {len} bytes"))?;
        kernel::bind_raw(active()?.as_ref(), KernelHandle::from_raw(kernel), index, value)
    })
}

/// Bind an opaque address to parameter `index`
///
/// ### Safety
///
/// `kernel` must be a live kernel handle not being configured by
/// another thread.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn gpu_binder_kernel_set_argument_pointer(kernel: u64, index: u32, size: usize, raw: u64) -> i32 {
    guard("kernel_set_argument_pointer", || {
        let value = pointer_argument(raw, size)?;
        kernel::bind_raw(active()?.as_ref(), KernelHandle::from_raw(kernel), index, &value)
    })
}
