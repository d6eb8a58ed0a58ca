//! Reference driver running entirely in host memory
//!
//! Emulates the Level Zero surface (status codes, SPIR-V modules,
//! explicit group sizes) and validates every access against live
//! allocations, so it doubles as a checking driver for tests.

pub mod spirv;

use std::{
    collections::{BTreeMap, HashMap},
    ffi::{CStr, c_void},
};

use parking_lot::{Mutex, RwLock};

use super::{DriverBindings, DynamicSharedMem, ze};
use crate::{
    config::{BinderConfig, HostLimits},
    error::Status,
    handle::{DevicePtr, Dim3, KernelHandle, ModuleHandle},
};

const BASE_ADDRESS: u64 = 0x7f00_0000_0000;
const ALIGNMENT: u64 = 256;

pub struct Host {
    limits: HostLimits,
    memory: RwLock<Memory>,
    programs: Mutex<Programs>,
}

#[derive(Default)]
struct Memory {
    next_address: u64,
    used: usize,
    allocations: BTreeMap<u64, Vec<u8>>,
}

#[derive(Default)]
struct Programs {
    next_handle: u64,
    modules: HashMap<ModuleHandle, HashMap<String, u32>>,
    kernels: HashMap<KernelHandle, HostKernel>,
}

struct HostKernel {
    module: ModuleHandle,
    params: u32,
    group_size: Dim3,
    arguments: HashMap<u32, Vec<u8>>,
}

fn fail<T>(code: i32) -> Result<T, Status> {
    Err(ze::status(code))
}

impl Memory {
    /// Locate `bytes` bytes at `ptr` inside a single live allocation
    fn locate(&self, ptr: DevicePtr, bytes: usize) -> Result<(u64, usize), Status> {
        let (&base, data) = match self.allocations.range(..=ptr.raw()).next_back() {
            Some(entry) => entry,
            None => return fail(ze::ERROR_INVALID_ARGUMENT),
        };

        let offset = (ptr.raw() - base) as usize;
        match offset.checked_add(bytes) {
            Some(end) if end <= data.len() => Ok((base, offset)),
            _ => fail(ze::ERROR_INVALID_ARGUMENT),
        }
    }

    fn region(&self, ptr: DevicePtr, bytes: usize) -> Result<&[u8], Status> {
        let (base, offset) = self.locate(ptr, bytes)?;
        match self.allocations.get(&base) {
            Some(data) => Ok(&data[offset..offset + bytes]),
            None => fail(ze::ERROR_INVALID_ARGUMENT),
        }
    }

    fn region_mut(&mut self, ptr: DevicePtr, bytes: usize) -> Result<&mut [u8], Status> {
        let (base, offset) = self.locate(ptr, bytes)?;
        match self.allocations.get_mut(&base) {
            Some(data) => Ok(&mut data[offset..offset + bytes]),
            None => fail(ze::ERROR_INVALID_ARGUMENT),
        }
    }
}

impl Programs {
    fn handle(&mut self) -> u64 {
        self.next_handle += 1;
        self.next_handle << 4
    }

    fn kernel(&mut self, kernel: KernelHandle) -> Result<&mut HostKernel, Status> {
        if kernel.is_null() {
            return fail(ze::ERROR_INVALID_NULL_HANDLE);
        }

        self.kernels.get_mut(&kernel).ok_or_else(|| ze::status(ze::ERROR_INVALID_ARGUMENT))
    }
}

impl Host {
    pub fn new(limits: HostLimits) -> Self {
        let memory = Memory { next_address: BASE_ADDRESS, ..Default::default() };
        Self { limits, memory: RwLock::new(memory), programs: Mutex::new(Programs::default()) }
    }

    pub fn limits(&self) -> &HostLimits {
        &self.limits
    }

    /// Bytes of the most recent binding of parameter `index`, which is
    /// what a launch of `kernel` would observe
    pub fn recorded_argument(&self, kernel: KernelHandle, index: u32) -> Option<Vec<u8>> {
        self.programs.lock().kernels.get(&kernel)?.arguments.get(&index).cloned()
    }

    pub fn recorded_group_size(&self, kernel: KernelHandle) -> Option<Dim3> {
        self.programs.lock().kernels.get(&kernel).map(|k| k.group_size)
    }

    pub fn live_allocations(&self) -> usize {
        self.memory.read().allocations.len()
    }

    pub fn bytes_in_use(&self) -> usize {
        self.memory.read().used
    }

    pub fn loaded_modules(&self) -> usize {
        self.programs.lock().modules.len()
    }

    fn best_divisor(n: u32, cap: u32) -> u32 {
        (1..=n.min(cap)).rev().find(|d| n % d == 0).unwrap_or(1)
    }
}

impl Default for Host {
    fn default() -> Self {
        Self::new(HostLimits::default())
    }
}

impl DriverBindings for Host {
    const NAME: &'static str = "host";
    const INVALID_VALUE: i32 = ze::ERROR_INVALID_ARGUMENT;
    const UNKNOWN: i32 = ze::ERROR_UNKNOWN;

    fn open(config: &BinderConfig) -> Result<Self, Status> {
        if config.ordinal != 0 {
            return fail(ze::ERROR_INVALID_ARGUMENT);
        }

        Ok(Self::new(config.host.clone()))
    }

    unsafe fn module_load(&self, image: &[u8]) -> Result<ModuleHandle, Status> {
        let entries = spirv::entry_points(image)?;

        let mut programs = self.programs.lock();
        let module = ModuleHandle::from_raw(programs.handle());
        programs.modules.insert(module, entries);

        Ok(module)
    }

    unsafe fn module_unload(&self, module: ModuleHandle) -> Result<(), Status> {
        let mut programs = self.programs.lock();

        if !programs.modules.contains_key(&module) {
            return fail(ze::ERROR_INVALID_ARGUMENT);
        }

        if programs.kernels.values().any(|k| k.module == module) {
            return fail(ze::ERROR_HANDLE_OBJECT_IN_USE);
        }

        programs.modules.remove(&module);
        Ok(())
    }

    unsafe fn module_get_kernel(&self, module: ModuleHandle, name: &CStr) -> Result<KernelHandle, Status> {
        let mut programs = self.programs.lock();

        let entries = programs.modules.get(&module).ok_or_else(|| ze::status(ze::ERROR_INVALID_ARGUMENT))?;
        let name = name.to_str().map_err(|_| ze::status(ze::ERROR_INVALID_KERNEL_NAME))?;
        let params = *entries.get(name).ok_or_else(|| ze::status(ze::ERROR_INVALID_KERNEL_NAME))?;

        let kernel = KernelHandle::from_raw(programs.handle());
        let state = HostKernel { module, params, group_size: Dim3::ONE, arguments: HashMap::new() };
        programs.kernels.insert(kernel, state);

        Ok(kernel)
    }

    unsafe fn kernel_destroy(&self, kernel: KernelHandle) -> Result<(), Status> {
        let mut programs = self.programs.lock();
        programs.kernel(kernel)?;
        programs.kernels.remove(&kernel);
        Ok(())
    }

    unsafe fn kernel_param_count(&self, kernel: KernelHandle) -> Result<u32, Status> {
        Ok(self.programs.lock().kernel(kernel)?.params)
    }

    unsafe fn kernel_max_block_size(&self, kernel: KernelHandle, smem: DynamicSharedMem) -> Result<u32, Status> {
        self.programs.lock().kernel(kernel)?;

        let mut block = self.limits.max_total_group_size;
        while block > 0 && smem.bytes_for(block) > self.limits.shared_memory_per_group {
            block /= 2;
        }

        if block == 0 { fail(ze::ERROR_UNSUPPORTED_SIZE) } else { Ok(block) }
    }

    unsafe fn kernel_suggest_group_size(&self, kernel: KernelHandle, global: Dim3) -> Result<Dim3, Status> {
        self.programs.lock().kernel(kernel)?;

        if global.has_zero() {
            return fail(ze::ERROR_INVALID_GLOBAL_WIDTH_DIMENSION);
        }

        let max = self.limits.max_group_size;
        let total = self.limits.max_total_group_size.max(1);

        let x = Self::best_divisor(global.x, max.x.min(total));
        let y = Self::best_divisor(global.y, max.y.min(total / x));
        let z = Self::best_divisor(global.z, max.z.min(total / (x * y)));

        Ok(Dim3::new(x, y, z))
    }

    unsafe fn kernel_set_group_size(&self, kernel: KernelHandle, group: Dim3) -> Result<(), Status> {
        let max = self.limits.max_group_size;

        let exceeds = group.x > max.x
            || group.y > max.y
            || group.z > max.z
            || group.volume() > u64::from(self.limits.max_total_group_size);

        let mut programs = self.programs.lock();
        let state = programs.kernel(kernel)?;

        if group.has_zero() || exceeds {
            return fail(ze::ERROR_INVALID_GROUP_SIZE_DIMENSION);
        }

        state.group_size = group;
        Ok(())
    }

    unsafe fn kernel_set_argument(
        &self,
        kernel: KernelHandle,
        index: u32,
        size: usize,
        value: *const c_void,
    ) -> Result<(), Status> {
        let mut programs = self.programs.lock();
        let state = programs.kernel(kernel)?;

        if index >= state.params {
            return fail(ze::ERROR_INVALID_KERNEL_ARGUMENT_INDEX);
        }

        if size == 0 {
            return fail(ze::ERROR_INVALID_KERNEL_ARGUMENT_SIZE);
        }

        if value.is_null() {
            return fail(ze::ERROR_INVALID_NULL_POINTER);
        }

        let bytes = unsafe { std::slice::from_raw_parts(value.cast::<u8>(), size) };
        state.arguments.insert(index, bytes.to_vec());

        Ok(())
    }

    unsafe fn mem_alloc(&self, bytes: usize) -> Result<DevicePtr, Status> {
        if bytes == 0 {
            return fail(ze::ERROR_UNSUPPORTED_SIZE);
        }

        let mut memory = self.memory.write();

        if memory.used.checked_add(bytes).is_none_or(|used| used > self.limits.memory_capacity) {
            return fail(ze::ERROR_OUT_OF_DEVICE_MEMORY);
        }

        let base = memory.next_address;
        // leave an unmapped gap so neighbouring allocations never touch
        memory.next_address += (bytes as u64).next_multiple_of(ALIGNMENT) + ALIGNMENT;
        memory.used += bytes;
        memory.allocations.insert(base, vec![0; bytes]);

        Ok(DevicePtr::from_raw(base))
    }

    unsafe fn mem_free(&self, ptr: DevicePtr) -> Result<(), Status> {
        let mut memory = self.memory.write();

        match memory.allocations.remove(&ptr.raw()) {
            Some(data) => {
                memory.used -= data.len();
                Ok(())
            }
            None => fail(ze::ERROR_INVALID_ARGUMENT),
        }
    }

    unsafe fn mem_fill(&self, dst: DevicePtr, pattern: &[u8], bytes: usize) -> Result<(), Status> {
        if pattern.is_empty() || bytes % pattern.len() != 0 {
            return fail(ze::ERROR_INVALID_SIZE);
        }

        let mut memory = self.memory.write();
        let region = memory.region_mut(dst, bytes)?;

        for chunk in region.chunks_exact_mut(pattern.len()) {
            chunk.copy_from_slice(pattern);
        }

        Ok(())
    }

    unsafe fn memcpy_h2d(&self, dst: DevicePtr, src: *const c_void, bytes: usize) -> Result<(), Status> {
        if src.is_null() {
            return fail(ze::ERROR_INVALID_NULL_POINTER);
        }

        let mut memory = self.memory.write();
        let region = memory.region_mut(dst, bytes)?;
        let src = unsafe { std::slice::from_raw_parts(src.cast::<u8>(), bytes) };
        region.copy_from_slice(src);

        Ok(())
    }

    unsafe fn memcpy_d2h(&self, dst: *mut c_void, src: DevicePtr, bytes: usize) -> Result<(), Status> {
        if dst.is_null() {
            return fail(ze::ERROR_INVALID_NULL_POINTER);
        }

        let memory = self.memory.read();
        let region = memory.region(src, bytes)?;
        let dst = unsafe { std::slice::from_raw_parts_mut(dst.cast::<u8>(), bytes) };
        dst.copy_from_slice(region);

        Ok(())
    }
}
