//! CUDA driver API

use std::{
    borrow::Cow,
    ffi::{CStr, c_int, c_void},
    mem::MaybeUninit,
};

use super::{DriverBindings, DynamicSharedMem};
use crate::{
    config::BinderConfig,
    error::Status,
    handle::{DevicePtr, Dim3, KernelHandle, ModuleHandle},
    schedule,
};

use raw::*;

const ELF_MAGIC: &[u8] = b"\x7fELF";
const FATBIN_MAGIC: &[u8] = &0xba55_ed50u32.to_le_bytes();

type CudaResult<T = ()> = Result<T, Status>;

/// Primary context of one CUDA device
pub struct Cuda {
    device: CUdevice,
    ctx: CUcontext,
}

// The primary context may be made current on any thread
unsafe impl Send for Cuda {}
unsafe impl Sync for Cuda {}

impl Drop for Cuda {
    fn drop(&mut self) {
        if let Err(status) = unsafe { error::driver(cuDevicePrimaryCtxRelease_v2(self.device)) } {
            tracing::warn!(device = self.device, %status, "failed to release primary context");
        }
    }
}

#[allow(unsafe_op_in_unsafe_fn)]
impl Cuda {
    /// Make the primary context current on the calling thread
    unsafe fn enter(&self) -> CudaResult {
        let mut curr = MaybeUninit::uninit();
        error::driver(cuCtxGetCurrent(curr.as_mut_ptr()))?;
        let curr = curr.assume_init();

        if curr.is_null() || curr != self.ctx {
            error::driver(cuCtxSetCurrent(self.ctx))?;
        }

        Ok(())
    }

    unsafe fn function_attribute(&self, kernel: KernelHandle, attrib: CUfunction_attribute) -> CudaResult<c_int> {
        let mut value = MaybeUninit::uninit();
        error::driver(cuFuncGetAttribute(value.as_mut_ptr(), attrib, function(kernel)))?;
        Ok(value.assume_init())
    }

    unsafe fn device_attribute(&self, attrib: CUdevice_attribute) -> CudaResult<c_int> {
        let mut value = MaybeUninit::uninit();
        error::driver(cuDeviceGetAttribute(value.as_mut_ptr(), attrib, self.device))?;
        Ok(value.assume_init())
    }

    /// Byte size of parameter `index`, `None` past the last parameter
    unsafe fn param_size(&self, kernel: KernelHandle, index: usize) -> CudaResult<Option<usize>> {
        let mut offset = 0usize;
        let mut size = 0usize;

        match cuFuncGetParamInfo(function(kernel), index, &mut offset, &mut size) {
            CUDA_SUCCESS => Ok(Some(size)),
            CUDA_ERROR_INVALID_VALUE => Ok(None),
            code => Err(error::status(code)),
        }
    }
}

fn function(kernel: KernelHandle) -> CUfunction {
    kernel.raw() as usize as CUfunction
}

fn module(module: ModuleHandle) -> CUmodule {
    module.raw() as usize as CUmodule
}

fn invalid_value<T>() -> CudaResult<T> {
    Err(unsafe { error::status(CUDA_ERROR_INVALID_VALUE) })
}

#[allow(unsafe_op_in_unsafe_fn)]
impl DriverBindings for Cuda {
    const NAME: &'static str = "cuda";
    const INVALID_VALUE: i32 = CUDA_ERROR_INVALID_VALUE;
    const UNKNOWN: i32 = CUDA_ERROR_UNKNOWN;

    fn open(config: &BinderConfig) -> CudaResult<Self> {
        unsafe {
            error::driver(cuInit(0))?;

            let mut device = MaybeUninit::uninit();
            error::driver(cuDeviceGet(device.as_mut_ptr(), config.ordinal))?;
            let device = device.assume_init();

            let mut ctx = MaybeUninit::uninit();
            error::driver(cuDevicePrimaryCtxRetain(ctx.as_mut_ptr(), device))?;

            let cuda = Self { device, ctx: ctx.assume_init() };
            cuda.enter()?;

            Ok(cuda)
        }
    }

    unsafe fn module_load(&self, image: &[u8]) -> CudaResult<ModuleHandle> {
        self.enter()?;

        // PTX is passed as a NUL-terminated string, binaries as they are
        let image: Cow<'_, [u8]> = if image.starts_with(ELF_MAGIC) || image.starts_with(FATBIN_MAGIC) || image.ends_with(&[0]) {
            Cow::Borrowed(image)
        } else {
            let mut owned = image.to_vec();
            owned.push(0);
            Cow::Owned(owned)
        };

        let mut module = MaybeUninit::uninit();
        error::driver(cuModuleLoadData(module.as_mut_ptr(), image.as_ptr().cast()))?;
        Ok(ModuleHandle::from_raw(module.assume_init() as usize as u64))
    }

    unsafe fn module_unload(&self, handle: ModuleHandle) -> CudaResult {
        self.enter()?;
        error::driver(cuModuleUnload(module(handle)))
    }

    unsafe fn module_get_kernel(&self, handle: ModuleHandle, name: &CStr) -> CudaResult<KernelHandle> {
        self.enter()?;
        let mut func = MaybeUninit::uninit();
        error::driver(cuModuleGetFunction(func.as_mut_ptr(), module(handle), name.as_ptr()))?;
        Ok(KernelHandle::from_raw(func.assume_init() as usize as u64))
    }

    /// Functions belong to their module, so there is nothing to release
    unsafe fn kernel_destroy(&self, kernel: KernelHandle) -> CudaResult {
        if kernel.is_null() { invalid_value() } else { Ok(()) }
    }

    unsafe fn kernel_param_count(&self, kernel: KernelHandle) -> CudaResult<u32> {
        self.enter()?;

        let mut count = 0;
        while self.param_size(kernel, count as usize)?.is_some() {
            count += 1;
        }

        Ok(count)
    }

    unsafe fn kernel_max_block_size(&self, kernel: KernelHandle, smem: DynamicSharedMem) -> CudaResult<u32> {
        self.enter()?;

        let (callback, fixed) = match smem {
            DynamicSharedMem::None => (None, 0),
            DynamicSharedMem::Fixed(bytes) => (None, bytes),
            DynamicSharedMem::PerBlock(func) => (Some(func), 0),
        };

        let mut min_grid_size = 0;
        let mut block_size = 0;
        error::driver(cuOccupancyMaxPotentialBlockSize(
            &mut min_grid_size,
            &mut block_size,
            function(kernel),
            callback,
            fixed,
            0,
        ))?;

        Ok(block_size as u32)
    }

    /// CUDA has no group-size recommendation of its own, so the
    /// occupancy limit is distributed over `global`
    unsafe fn kernel_suggest_group_size(&self, kernel: KernelHandle, global: Dim3) -> CudaResult<Dim3> {
        if global.has_zero() {
            return invalid_value();
        }

        let max = self.kernel_max_block_size(kernel, DynamicSharedMem::None)?;
        Ok(schedule::block_dims(global, max))
    }

    unsafe fn kernel_set_group_size(&self, kernel: KernelHandle, group: Dim3) -> CudaResult {
        self.enter()?;

        let max_threads = self.function_attribute(kernel, CU_FUNC_ATTRIBUTE_MAX_THREADS_PER_BLOCK)?;
        let max_x = self.device_attribute(CU_DEVICE_ATTRIBUTE_MAX_BLOCK_DIM_X)?;
        let max_y = self.device_attribute(CU_DEVICE_ATTRIBUTE_MAX_BLOCK_DIM_Y)?;
        let max_z = self.device_attribute(CU_DEVICE_ATTRIBUTE_MAX_BLOCK_DIM_Z)?;

        let fits = !group.has_zero()
            && i64::from(group.x) <= i64::from(max_x)
            && i64::from(group.y) <= i64::from(max_y)
            && i64::from(group.z) <= i64::from(max_z)
            && group.volume() <= max_threads.max(0) as u64;

        if fits { Ok(()) } else { invalid_value() }
    }

    unsafe fn kernel_set_argument(
        &self,
        kernel: KernelHandle,
        index: u32,
        size: usize,
        value: *const c_void,
    ) -> CudaResult {
        self.enter()?;

        if value.is_null() {
            return invalid_value();
        }

        match self.param_size(kernel, index as usize)? {
            Some(expected) if expected == size => Ok(()),
            _ => invalid_value(),
        }
    }

    unsafe fn mem_alloc(&self, bytes: usize) -> CudaResult<DevicePtr> {
        self.enter()?;
        let mut ptr = MaybeUninit::uninit();
        error::driver(cuMemAlloc_v2(ptr.as_mut_ptr(), bytes))?;
        Ok(DevicePtr::from_raw(ptr.assume_init()))
    }

    unsafe fn mem_free(&self, ptr: DevicePtr) -> CudaResult {
        self.enter()?;
        error::driver(cuMemFree_v2(ptr.raw()))
    }

    unsafe fn mem_fill(&self, dst: DevicePtr, pattern: &[u8], bytes: usize) -> CudaResult {
        self.enter()?;

        if pattern.is_empty() || bytes % pattern.len() != 0 {
            return invalid_value();
        }

        let count = bytes / pattern.len();

        match *pattern {
            [b] => error::driver(cuMemsetD8_v2(dst.raw(), b, count)),
            [b0, b1] => error::driver(cuMemsetD16_v2(dst.raw(), u16::from_ne_bytes([b0, b1]), count)),
            [b0, b1, b2, b3] => error::driver(cuMemsetD32_v2(dst.raw(), u32::from_ne_bytes([b0, b1, b2, b3]), count)),
            // no native fill wider than 32 bits
            _ => {
                let host = pattern.repeat(count);
                self.memcpy_h2d(dst, host.as_ptr().cast(), bytes)
            }
        }
    }

    unsafe fn memcpy_h2d(&self, dst: DevicePtr, src: *const c_void, bytes: usize) -> CudaResult {
        self.enter()?;
        error::driver(cuMemcpyHtoD_v2(dst.raw(), src, bytes))
    }

    unsafe fn memcpy_d2h(&self, dst: *mut c_void, src: DevicePtr, bytes: usize) -> CudaResult {
        self.enter()?;
        error::driver(cuMemcpyDtoH_v2(dst, src.raw(), bytes))
    }
}

mod error {
    use std::{ffi::CStr, mem::MaybeUninit};

    use super::raw::*;
    use crate::error::Status;

    pub unsafe fn driver(value: CUresult) -> Result<(), Status> {
        if value == CUDA_SUCCESS { Ok(()) } else { Err(unsafe { status(value) }) }
    }

    /// Status named by `cuGetErrorName`
    pub unsafe fn status(value: CUresult) -> Status {
        let mut name = MaybeUninit::uninit();

        unsafe {
            if cuGetErrorName(value, name.as_mut_ptr()) != CUDA_SUCCESS || name.assume_init().is_null() {
                return Status::new(value, format!("CUresult {value}"));
            }

            Status::new(value, CStr::from_ptr(name.assume_init()).to_string_lossy().into_owned())
        }
    }
}

#[allow(non_upper_case_globals)]
#[allow(non_camel_case_types)]
#[allow(non_snake_case)]
mod raw {
    use std::ffi::{c_char, c_int, c_uchar, c_uint, c_ulonglong, c_ushort, c_void};

    use crate::driver::SharedMemFn;

    #[repr(C)]
    #[derive(Debug, Copy, Clone)]
    pub struct Opaque {
        _unused: [u8; 0],
    }

    pub type CUdevice = c_int;
    pub type CUresult = c_int;
    pub type CUcontext = *mut Opaque;
    pub type CUdeviceptr = c_ulonglong;
    pub type CUfunction = *mut Opaque;
    pub type CUmodule = *mut Opaque;
    pub type CUfunction_attribute = c_int;
    pub type CUdevice_attribute = c_int;

    pub const CUDA_SUCCESS: CUresult = 0;
    pub const CUDA_ERROR_INVALID_VALUE: CUresult = 1;
    pub const CUDA_ERROR_UNKNOWN: CUresult = 999;

    pub const CU_FUNC_ATTRIBUTE_MAX_THREADS_PER_BLOCK: CUfunction_attribute = 0;

    pub const CU_DEVICE_ATTRIBUTE_MAX_BLOCK_DIM_X: CUdevice_attribute = 2;
    pub const CU_DEVICE_ATTRIBUTE_MAX_BLOCK_DIM_Y: CUdevice_attribute = 3;
    pub const CU_DEVICE_ATTRIBUTE_MAX_BLOCK_DIM_Z: CUdevice_attribute = 4;

    unsafe extern "C" {
        // Errors
        pub fn cuGetErrorName(error: CUresult, pStr: *mut *const c_char) -> CUresult;

        // Device
        pub fn cuInit(flags: c_uint) -> CUresult;
        pub fn cuDeviceGet(device: *mut CUdevice, ordinal: c_int) -> CUresult;
        pub fn cuDeviceGetAttribute(pi: *mut c_int, attrib: CUdevice_attribute, dev: CUdevice) -> CUresult;
        pub fn cuDevicePrimaryCtxRetain(pctx: *mut CUcontext, dev: CUdevice) -> CUresult;
        pub fn cuDevicePrimaryCtxRelease_v2(dev: CUdevice) -> CUresult;
        pub fn cuCtxSetCurrent(ctx: CUcontext) -> CUresult;
        pub fn cuCtxGetCurrent(pctx: *mut CUcontext) -> CUresult;

        // Memory
        pub fn cuMemAlloc_v2(dptr: *mut CUdeviceptr, bytesize: usize) -> CUresult;
        pub fn cuMemFree_v2(dptr: CUdeviceptr) -> CUresult;
        pub fn cuMemsetD8_v2(dstDevice: CUdeviceptr, uc: c_uchar, N: usize) -> CUresult;
        pub fn cuMemsetD16_v2(dstDevice: CUdeviceptr, us: c_ushort, N: usize) -> CUresult;
        pub fn cuMemsetD32_v2(dstDevice: CUdeviceptr, ui: c_uint, N: usize) -> CUresult;
        pub fn cuMemcpyHtoD_v2(dstDevice: CUdeviceptr, srcHost: *const c_void, ByteCount: usize) -> CUresult;
        pub fn cuMemcpyDtoH_v2(dstHost: *mut c_void, srcDevice: CUdeviceptr, ByteCount: usize) -> CUresult;

        // Module
        pub fn cuModuleLoadData(module: *mut CUmodule, image: *const c_void) -> CUresult;
        pub fn cuModuleUnload(hmod: CUmodule) -> CUresult;
        pub fn cuModuleGetFunction(hfunc: *mut CUfunction, hmod: CUmodule, name: *const c_char) -> CUresult;

        // Kernel
        pub fn cuFuncGetAttribute(pi: *mut c_int, attrib: CUfunction_attribute, hfunc: CUfunction) -> CUresult;
        pub fn cuFuncGetParamInfo(
            func: CUfunction,
            paramIndex: usize,
            paramOffset: *mut usize,
            paramSize: *mut usize,
        ) -> CUresult;
        pub fn cuOccupancyMaxPotentialBlockSize(
            minGridSize: *mut c_int,
            blockSize: *mut c_int,
            func: CUfunction,
            blockSizeToDynamicSMemSize: Option<SharedMemFn>,
            dynamicSMemSize: usize,
            blockSizeLimit: c_int,
        ) -> CUresult;
    }
}
