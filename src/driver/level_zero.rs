//! Level Zero driver API
//!
//! Memory operations go through one immediate, synchronous command list
//! per device, so every call has completed by the time it returns.

use std::{
    ffi::{CStr, c_void},
    mem::MaybeUninit,
    ptr,
};

use parking_lot::Mutex;

use super::{DriverBindings, DynamicSharedMem, ze};
use crate::{
    config::BinderConfig,
    error::Status,
    handle::{DevicePtr, Dim3, KernelHandle, ModuleHandle},
};

use raw::*;

type ZeResult<T = ()> = Result<T, Status>;

/// Context and immediate command list on one Level Zero device
pub struct LevelZero {
    device: ze_device_handle_t,
    context: ze_context_handle_t,
    list: Mutex<ze_command_list_handle_t>,
    max_total_group_size: u32,
    max_shared_local_memory: usize,
}

// Handles are plain driver objects; the command list is behind a mutex
unsafe impl Send for LevelZero {}
unsafe impl Sync for LevelZero {}

impl Drop for LevelZero {
    fn drop(&mut self) {
        unsafe {
            if let Err(status) = ze::check(zeCommandListDestroy(*self.list.get_mut())) {
                tracing::warn!(%status, "failed to destroy command list");
            }

            if let Err(status) = ze::check(zeContextDestroy(self.context)) {
                tracing::warn!(%status, "failed to destroy context");
            }
        }
    }
}

fn kernel_handle(kernel: KernelHandle) -> ze_kernel_handle_t {
    kernel.raw() as usize as ze_kernel_handle_t
}

fn module_handle(module: ModuleHandle) -> ze_module_handle_t {
    module.raw() as usize as ze_module_handle_t
}

fn device_ptr(ptr: DevicePtr) -> *mut c_void {
    ptr.raw() as usize as *mut c_void
}

/// Enumerate handles through the usual count-then-fill call pair
unsafe fn enumerate<T>(get: impl Fn(*mut u32, *mut T) -> ze_result_t) -> ZeResult<Vec<T>> {
    let mut count = 0;
    ze::check(get(&mut count, ptr::null_mut()))?;

    let mut handles = Vec::with_capacity(count as usize);
    ze::check(get(&mut count, handles.as_mut_ptr()))?;
    unsafe { handles.set_len(count as usize) };

    Ok(handles)
}

unsafe fn kernel_properties(kernel: KernelHandle) -> ZeResult<ze_kernel_properties_t> {
    let mut props = MaybeUninit::<ze_kernel_properties_t>::zeroed();
    unsafe {
        (*props.as_mut_ptr()).stype = ZE_STRUCTURE_TYPE_KERNEL_PROPERTIES;
        ze::check(zeKernelGetProperties(kernel_handle(kernel), props.as_mut_ptr()))?;
        Ok(props.assume_init())
    }
}

/// Largest group size whose dynamic shared memory fits beside the
/// kernel's static local memory
///
/// A kernel compiled with a required group size allows exactly that
/// many work items, or nothing if they do not fit.
fn occupancy_limit(
    max_total: u32,
    max_shared: usize,
    static_local: usize,
    required: [u32; 3],
    smem: DynamicSharedMem,
) -> Option<u32> {
    let available = max_shared.checked_sub(static_local)?;
    let fits = |block: u32| smem.bytes_for(block) <= available;

    if required.iter().all(|&r| r > 0) {
        let block = required.iter().try_fold(1u32, |acc, &r| acc.checked_mul(r))?;
        return (block <= max_total && fits(block)).then_some(block);
    }

    let mut block = max_total;
    while block > 0 && !fits(block) {
        block /= 2;
    }

    (block > 0).then_some(block)
}

impl LevelZero {
    unsafe fn append(&self, append: impl FnOnce(ze_command_list_handle_t) -> ze_result_t) -> ZeResult {
        let list = self.list.lock();
        ze::check(append(*list))
    }
}

#[allow(unsafe_op_in_unsafe_fn)]
impl DriverBindings for LevelZero {
    const NAME: &'static str = "level-zero";
    const INVALID_VALUE: i32 = ze::ERROR_INVALID_ARGUMENT;
    const UNKNOWN: i32 = ze::ERROR_UNKNOWN;

    fn open(config: &BinderConfig) -> ZeResult<Self> {
        unsafe {
            ze::check(zeInit(0))?;

            let drivers = enumerate(|count, out| zeDriverGet(count, out))?;
            let driver = *drivers.get(config.driver_index as usize).ok_or_else(|| ze::status(ze::ERROR_INVALID_ARGUMENT))?;

            let devices = enumerate(|count, out| zeDeviceGet(driver, count, out))?;
            let ordinal = usize::try_from(config.ordinal).map_err(|_| ze::status(ze::ERROR_INVALID_ARGUMENT))?;
            let device = *devices.get(ordinal).ok_or_else(|| ze::status(ze::ERROR_INVALID_ARGUMENT))?;

            let mut props = MaybeUninit::<ze_device_compute_properties_t>::zeroed();
            (*props.as_mut_ptr()).stype = ZE_STRUCTURE_TYPE_DEVICE_COMPUTE_PROPERTIES;
            ze::check(zeDeviceGetComputeProperties(device, props.as_mut_ptr()))?;
            let props = props.assume_init();

            let context_desc = ze_context_desc_t { stype: ZE_STRUCTURE_TYPE_CONTEXT_DESC, pNext: ptr::null(), flags: 0 };
            let mut context = MaybeUninit::uninit();
            ze::check(zeContextCreate(driver, &context_desc, context.as_mut_ptr()))?;
            let context = context.assume_init();

            let queue_desc = ze_command_queue_desc_t {
                stype: ZE_STRUCTURE_TYPE_COMMAND_QUEUE_DESC,
                pNext: ptr::null(),
                ordinal: 0,
                index: 0,
                flags: 0,
                mode: ZE_COMMAND_QUEUE_MODE_SYNCHRONOUS,
                priority: 0,
            };

            let mut list = MaybeUninit::uninit();
            if let Err(status) = ze::check(zeCommandListCreateImmediate(context, device, &queue_desc, list.as_mut_ptr())) {
                zeContextDestroy(context);
                return Err(status);
            }

            Ok(Self {
                device,
                context,
                list: Mutex::new(list.assume_init()),
                max_total_group_size: props.maxTotalGroupSize,
                max_shared_local_memory: props.maxSharedLocalMemory as usize,
            })
        }
    }

    unsafe fn module_load(&self, image: &[u8]) -> ZeResult<ModuleHandle> {
        let desc = ze_module_desc_t {
            stype: ZE_STRUCTURE_TYPE_MODULE_DESC,
            pNext: ptr::null(),
            format: ZE_MODULE_FORMAT_IL_SPIRV,
            inputSize: image.len(),
            pInputModule: image.as_ptr(),
            pBuildFlags: ptr::null(),
            pConstants: ptr::null(),
        };

        let mut module = MaybeUninit::uninit();
        ze::check(zeModuleCreate(self.context, self.device, &desc, module.as_mut_ptr(), ptr::null_mut()))?;
        Ok(ModuleHandle::from_raw(module.assume_init() as usize as u64))
    }

    unsafe fn module_unload(&self, module: ModuleHandle) -> ZeResult {
        ze::check(zeModuleDestroy(module_handle(module)))
    }

    unsafe fn module_get_kernel(&self, module: ModuleHandle, name: &CStr) -> ZeResult<KernelHandle> {
        let desc = ze_kernel_desc_t { stype: ZE_STRUCTURE_TYPE_KERNEL_DESC, pNext: ptr::null(), flags: 0, pKernelName: name.as_ptr() };

        let mut kernel = MaybeUninit::uninit();
        ze::check(zeKernelCreate(module_handle(module), &desc, kernel.as_mut_ptr()))?;
        Ok(KernelHandle::from_raw(kernel.assume_init() as usize as u64))
    }

    unsafe fn kernel_destroy(&self, kernel: KernelHandle) -> ZeResult {
        ze::check(zeKernelDestroy(kernel_handle(kernel)))
    }

    unsafe fn kernel_param_count(&self, kernel: KernelHandle) -> ZeResult<u32> {
        Ok(kernel_properties(kernel)?.numKernelArgs)
    }

    unsafe fn kernel_max_block_size(&self, kernel: KernelHandle, smem: DynamicSharedMem) -> ZeResult<u32> {
        if kernel.is_null() {
            return Err(ze::status(ze::ERROR_INVALID_NULL_HANDLE));
        }

        let props = kernel_properties(kernel)?;
        let required = [props.requiredGroupSizeX, props.requiredGroupSizeY, props.requiredGroupSizeZ];

        occupancy_limit(self.max_total_group_size, self.max_shared_local_memory, props.localMemSize as usize, required, smem)
            .ok_or_else(|| ze::status(ze::ERROR_UNSUPPORTED_SIZE))
    }

    unsafe fn kernel_suggest_group_size(&self, kernel: KernelHandle, global: Dim3) -> ZeResult<Dim3> {
        let mut group = [0u32; 3];
        let [x, y, z] = &mut group;
        ze::check(zeKernelSuggestGroupSize(kernel_handle(kernel), global.x, global.y, global.z, x, y, z))?;
        Ok(Dim3::from(group))
    }

    unsafe fn kernel_set_group_size(&self, kernel: KernelHandle, group: Dim3) -> ZeResult {
        ze::check(zeKernelSetGroupSize(kernel_handle(kernel), group.x, group.y, group.z))
    }

    unsafe fn kernel_set_argument(
        &self,
        kernel: KernelHandle,
        index: u32,
        size: usize,
        value: *const c_void,
    ) -> ZeResult {
        ze::check(zeKernelSetArgumentValue(kernel_handle(kernel), index, size, value))
    }

    unsafe fn mem_alloc(&self, bytes: usize) -> ZeResult<DevicePtr> {
        let desc = ze_device_mem_alloc_desc_t { stype: ZE_STRUCTURE_TYPE_DEVICE_MEM_ALLOC_DESC, pNext: ptr::null(), flags: 0, ordinal: 0 };

        let mut ptr = MaybeUninit::uninit();
        ze::check(zeMemAllocDevice(self.context, &desc, bytes, 0, self.device, ptr.as_mut_ptr()))?;
        Ok(DevicePtr::from_raw(ptr.assume_init() as usize as u64))
    }

    unsafe fn mem_free(&self, ptr: DevicePtr) -> ZeResult {
        ze::check(zeMemFree(self.context, device_ptr(ptr)))
    }

    unsafe fn mem_fill(&self, dst: DevicePtr, pattern: &[u8], bytes: usize) -> ZeResult {
        self.append(|list| {
            zeCommandListAppendMemoryFill(
                list,
                device_ptr(dst),
                pattern.as_ptr().cast(),
                pattern.len(),
                bytes,
                ptr::null_mut(),
                0,
                ptr::null_mut(),
            )
        })
    }

    unsafe fn memcpy_h2d(&self, dst: DevicePtr, src: *const c_void, bytes: usize) -> ZeResult {
        self.append(|list| {
            zeCommandListAppendMemoryCopy(list, device_ptr(dst), src, bytes, ptr::null_mut(), 0, ptr::null_mut())
        })
    }

    unsafe fn memcpy_d2h(&self, dst: *mut c_void, src: DevicePtr, bytes: usize) -> ZeResult {
        self.append(|list| {
            zeCommandListAppendMemoryCopy(list, dst, device_ptr(src), bytes, ptr::null_mut(), 0, ptr::null_mut())
        })
    }
}

#[allow(non_upper_case_globals)]
#[allow(non_camel_case_types)]
#[allow(non_snake_case)]
mod raw {
    use std::ffi::{c_char, c_void};

    #[repr(C)]
    #[derive(Debug, Copy, Clone)]
    pub struct Opaque {
        _unused: [u8; 0],
    }

    pub type ze_result_t = i32;
    pub type ze_structure_type_t = u32;
    pub type ze_driver_handle_t = *mut Opaque;
    pub type ze_device_handle_t = *mut Opaque;
    pub type ze_context_handle_t = *mut Opaque;
    pub type ze_command_list_handle_t = *mut Opaque;
    pub type ze_module_handle_t = *mut Opaque;
    pub type ze_module_build_log_handle_t = *mut Opaque;
    pub type ze_kernel_handle_t = *mut Opaque;
    pub type ze_event_handle_t = *mut Opaque;

    pub const ZE_STRUCTURE_TYPE_DEVICE_COMPUTE_PROPERTIES: ze_structure_type_t = 0x4;
    pub const ZE_STRUCTURE_TYPE_CONTEXT_DESC: ze_structure_type_t = 0xd;
    pub const ZE_STRUCTURE_TYPE_COMMAND_QUEUE_DESC: ze_structure_type_t = 0xe;
    pub const ZE_STRUCTURE_TYPE_DEVICE_MEM_ALLOC_DESC: ze_structure_type_t = 0x15;
    pub const ZE_STRUCTURE_TYPE_MODULE_DESC: ze_structure_type_t = 0x1b;
    pub const ZE_STRUCTURE_TYPE_KERNEL_DESC: ze_structure_type_t = 0x1d;
    pub const ZE_STRUCTURE_TYPE_KERNEL_PROPERTIES: ze_structure_type_t = 0x1e;

    pub const ZE_COMMAND_QUEUE_MODE_SYNCHRONOUS: u32 = 1;
    pub const ZE_MODULE_FORMAT_IL_SPIRV: u32 = 0;

    #[repr(C)]
    pub struct ze_context_desc_t {
        pub stype: ze_structure_type_t,
        pub pNext: *const c_void,
        pub flags: u32,
    }

    #[repr(C)]
    pub struct ze_command_queue_desc_t {
        pub stype: ze_structure_type_t,
        pub pNext: *const c_void,
        pub ordinal: u32,
        pub index: u32,
        pub flags: u32,
        pub mode: u32,
        pub priority: u32,
    }

    #[repr(C)]
    pub struct ze_device_mem_alloc_desc_t {
        pub stype: ze_structure_type_t,
        pub pNext: *const c_void,
        pub flags: u32,
        pub ordinal: u32,
    }

    #[repr(C)]
    pub struct ze_module_desc_t {
        pub stype: ze_structure_type_t,
        pub pNext: *const c_void,
        pub format: u32,
        pub inputSize: usize,
        pub pInputModule: *const u8,
        pub pBuildFlags: *const c_char,
        pub pConstants: *const c_void,
    }

    #[repr(C)]
    pub struct ze_kernel_desc_t {
        pub stype: ze_structure_type_t,
        pub pNext: *const c_void,
        pub flags: u32,
        pub pKernelName: *const c_char,
    }

    #[repr(C)]
    pub struct ze_kernel_uuid_t {
        pub kid: [u8; 16],
        pub mid: [u8; 16],
    }

    #[repr(C)]
    pub struct ze_kernel_properties_t {
        pub stype: ze_structure_type_t,
        pub pNext: *mut c_void,
        pub numKernelArgs: u32,
        pub requiredGroupSizeX: u32,
        pub requiredGroupSizeY: u32,
        pub requiredGroupSizeZ: u32,
        pub requiredNumSubGroups: u32,
        pub requiredSubgroupSize: u32,
        pub maxSubgroupSize: u32,
        pub maxNumSubgroups: u32,
        pub localMemSize: u32,
        pub privateMemSize: u32,
        pub spillMemSize: u32,
        pub uuid: ze_kernel_uuid_t,
    }

    #[repr(C)]
    pub struct ze_device_compute_properties_t {
        pub stype: ze_structure_type_t,
        pub pNext: *mut c_void,
        pub maxTotalGroupSize: u32,
        pub maxGroupSizeX: u32,
        pub maxGroupSizeY: u32,
        pub maxGroupSizeZ: u32,
        pub maxGroupCountX: u32,
        pub maxGroupCountY: u32,
        pub maxGroupCountZ: u32,
        pub maxSharedLocalMemory: u32,
        pub numSubGroupSizes: u32,
        pub subGroupSizes: [u32; 8],
    }

    unsafe extern "C" {
        // Driver and device
        pub fn zeInit(flags: u32) -> ze_result_t;
        pub fn zeDriverGet(pCount: *mut u32, phDrivers: *mut ze_driver_handle_t) -> ze_result_t;
        pub fn zeDeviceGet(hDriver: ze_driver_handle_t, pCount: *mut u32, phDevices: *mut ze_device_handle_t)
        -> ze_result_t;
        pub fn zeDeviceGetComputeProperties(
            hDevice: ze_device_handle_t,
            pComputeProperties: *mut ze_device_compute_properties_t,
        ) -> ze_result_t;

        // Context and command lists
        pub fn zeContextCreate(
            hDriver: ze_driver_handle_t,
            desc: *const ze_context_desc_t,
            phContext: *mut ze_context_handle_t,
        ) -> ze_result_t;
        pub fn zeContextDestroy(hContext: ze_context_handle_t) -> ze_result_t;
        pub fn zeCommandListCreateImmediate(
            hContext: ze_context_handle_t,
            hDevice: ze_device_handle_t,
            altdesc: *const ze_command_queue_desc_t,
            phCommandList: *mut ze_command_list_handle_t,
        ) -> ze_result_t;
        pub fn zeCommandListDestroy(hCommandList: ze_command_list_handle_t) -> ze_result_t;

        // Memory
        pub fn zeMemAllocDevice(
            hContext: ze_context_handle_t,
            device_desc: *const ze_device_mem_alloc_desc_t,
            size: usize,
            alignment: usize,
            hDevice: ze_device_handle_t,
            pptr: *mut *mut c_void,
        ) -> ze_result_t;
        pub fn zeMemFree(hContext: ze_context_handle_t, ptr: *mut c_void) -> ze_result_t;
        pub fn zeCommandListAppendMemoryFill(
            hCommandList: ze_command_list_handle_t,
            ptr: *mut c_void,
            pattern: *const c_void,
            pattern_size: usize,
            size: usize,
            hSignalEvent: ze_event_handle_t,
            numWaitEvents: u32,
            phWaitEvents: *mut ze_event_handle_t,
        ) -> ze_result_t;
        pub fn zeCommandListAppendMemoryCopy(
            hCommandList: ze_command_list_handle_t,
            dstptr: *mut c_void,
            srcptr: *const c_void,
            size: usize,
            hSignalEvent: ze_event_handle_t,
            numWaitEvents: u32,
            phWaitEvents: *mut ze_event_handle_t,
        ) -> ze_result_t;

        // Module
        pub fn zeModuleCreate(
            hContext: ze_context_handle_t,
            hDevice: ze_device_handle_t,
            desc: *const ze_module_desc_t,
            phModule: *mut ze_module_handle_t,
            phBuildLog: *mut ze_module_build_log_handle_t,
        ) -> ze_result_t;
        pub fn zeModuleDestroy(hModule: ze_module_handle_t) -> ze_result_t;

        // Kernel
        pub fn zeKernelCreate(
            hModule: ze_module_handle_t,
            desc: *const ze_kernel_desc_t,
            phKernel: *mut ze_kernel_handle_t,
        ) -> ze_result_t;
        pub fn zeKernelDestroy(hKernel: ze_kernel_handle_t) -> ze_result_t;
        pub fn zeKernelGetProperties(hKernel: ze_kernel_handle_t, pKernelProperties: *mut ze_kernel_properties_t)
        -> ze_result_t;
        pub fn zeKernelSuggestGroupSize(
            hKernel: ze_kernel_handle_t,
            globalSizeX: u32,
            globalSizeY: u32,
            globalSizeZ: u32,
            groupSizeX: *mut u32,
            groupSizeY: *mut u32,
            groupSizeZ: *mut u32,
        ) -> ze_result_t;
        pub fn zeKernelSetGroupSize(hKernel: ze_kernel_handle_t, groupSizeX: u32, groupSizeY: u32, groupSizeZ: u32)
        -> ze_result_t;
        pub fn zeKernelSetArgumentValue(
            hKernel: ze_kernel_handle_t,
            argIndex: u32,
            argSize: usize,
            pArgValue: *const c_void,
        ) -> ze_result_t;
    }
}
