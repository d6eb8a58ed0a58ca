//! Raw driver surface shared by the CUDA, Level Zero and host drivers
//!
//! The binding layer (`module`, `buffer`, `kernel`) only ever talks to
//! a driver through [`DriverBindings`], so it behaves identically on
//! every backend and passes each driver's own status codes through.

#[cfg(feature = "cuda")]
pub mod cuda;
pub mod host;
#[cfg(feature = "level-zero")]
pub mod level_zero;
pub mod ze;

use std::{
    ffi::{CStr, c_int, c_void},
    sync::Arc,
};

use crate::{
    config::BinderConfig,
    error::{BindError, Status},
    handle::{DevicePtr, Dim3, KernelHandle, ModuleHandle},
};

/// Callback mapping a block size to the dynamic shared memory it needs,
/// matching the driver's occupancy callback ABI
pub type SharedMemFn = extern "C" fn(block_size: c_int) -> usize;

/// Dynamic shared memory requirement passed to occupancy queries
#[derive(Copy, Clone, Debug, Default)]
pub enum DynamicSharedMem {
    #[default]
    None,
    Fixed(usize),
    PerBlock(SharedMemFn),
}

impl DynamicSharedMem {
    pub fn bytes_for(&self, block_size: u32) -> usize {
        match *self {
            Self::None => 0,
            Self::Fixed(bytes) => bytes,
            Self::PerBlock(func) => func(block_size.min(c_int::MAX as u32) as c_int),
        }
    }
}

/// Calls into a vendor driver, one method per native entry point
///
/// Implementations do no caching, retrying or locking of caller
/// handles; every non-success status is returned as-is.
#[allow(clippy::missing_safety_doc)]
pub trait DriverBindings: Send + Sync + Sized + 'static {
    /// Short backend name used in logs
    const NAME: &'static str;

    /// Status code reported at the C boundary for malformed requests
    const INVALID_VALUE: i32;

    /// Status code reported at the C boundary for unexpected failures
    const UNKNOWN: i32;

    fn open(config: &BinderConfig) -> Result<Self, Status>;

    unsafe fn module_load(&self, image: &[u8]) -> Result<ModuleHandle, Status>;

    unsafe fn module_unload(&self, module: ModuleHandle) -> Result<(), Status>;

    unsafe fn module_get_kernel(&self, module: ModuleHandle, name: &CStr) -> Result<KernelHandle, Status>;

    unsafe fn kernel_destroy(&self, kernel: KernelHandle) -> Result<(), Status>;

    /// Number of parameters the kernel declares
    unsafe fn kernel_param_count(&self, kernel: KernelHandle) -> Result<u32, Status>;

    /// Block size achieving maximum occupancy for `kernel`
    unsafe fn kernel_max_block_size(&self, kernel: KernelHandle, smem: DynamicSharedMem) -> Result<u32, Status>;

    unsafe fn kernel_suggest_group_size(&self, kernel: KernelHandle, global: Dim3) -> Result<Dim3, Status>;

    unsafe fn kernel_set_group_size(&self, kernel: KernelHandle, group: Dim3) -> Result<(), Status>;

    /// Bind `size` bytes read from `value` to parameter `index`
    unsafe fn kernel_set_argument(
        &self,
        kernel: KernelHandle,
        index: u32,
        size: usize,
        value: *const c_void,
    ) -> Result<(), Status>;

    unsafe fn mem_alloc(&self, bytes: usize) -> Result<DevicePtr, Status>;

    unsafe fn mem_free(&self, ptr: DevicePtr) -> Result<(), Status>;

    /// Fill `bytes` bytes at `dst` by repeating `pattern`, where
    /// `bytes` is a multiple of the pattern length
    unsafe fn mem_fill(&self, dst: DevicePtr, pattern: &[u8], bytes: usize) -> Result<(), Status>;

    unsafe fn memcpy_h2d(&self, dst: DevicePtr, src: *const c_void, bytes: usize) -> Result<(), Status>;

    unsafe fn memcpy_d2h(&self, dst: *mut c_void, src: DevicePtr, bytes: usize) -> Result<(), Status>;
}

#[cfg(feature = "cuda")]
pub type ActiveDriver = cuda::Cuda;

#[cfg(all(feature = "level-zero", not(feature = "cuda")))]
pub type ActiveDriver = level_zero::LevelZero;

#[cfg(not(any(feature = "cuda", feature = "level-zero")))]
pub type ActiveDriver = host::Host;

/// Open the driver selected at build time
pub fn open_active(config: &BinderConfig) -> Result<Arc<ActiveDriver>, BindError> {
    let driver = ActiveDriver::open(config).map_err(|status| BindError::Query { status })?;
    tracing::debug!(driver = ActiveDriver::NAME, ordinal = config.ordinal, "driver opened");
    Ok(Arc::new(driver))
}

#[cfg(test)]
mod tests {
    use super::*;

    extern "C" fn quarter_kib_per_thread(block_size: c_int) -> usize {
        block_size as usize * 256
    }

    #[test]
    fn dynamic_shared_memory() {
        assert_eq!(DynamicSharedMem::None.bytes_for(128), 0);
        assert_eq!(DynamicSharedMem::Fixed(4096).bytes_for(128), 4096);
        assert_eq!(DynamicSharedMem::PerBlock(quarter_kib_per_thread).bytes_for(128), 32768);
    }
}
