use std::{borrow::Cow, collections::BTreeMap, ffi::CStr, sync::Arc};

use parking_lot::{Mutex, MutexGuard};

use crate::{
    driver::{DriverBindings, DynamicSharedMem},
    error::{BindError, Result},
    handle::{DevicePtr, Dim3, KernelHandle, ModuleHandle},
    module::Module,
    schedule::{self, LaunchDims},
};

/// A value bound to one kernel parameter
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ArgumentValue {
    /// Device address of a buffer
    Buffer(DevicePtr),
    /// Bytes copied verbatim into the parameter slot
    Inline(Vec<u8>),
    /// An address the driver should treat as opaque
    RawPointer(u64),
}

impl ArgumentValue {
    pub fn scalar<T: crate::element::Element>(value: T) -> Self {
        Self::Inline(value.pattern())
    }

    /// Bytes the driver reads for this argument
    pub fn bytes(&self) -> Cow<'_, [u8]> {
        match self {
            Self::Buffer(ptr) => Cow::Owned(ptr.raw().to_ne_bytes().to_vec()),
            Self::Inline(bytes) => Cow::Borrowed(bytes),
            Self::RawPointer(raw) => Cow::Owned(raw.to_ne_bytes().to_vec()),
        }
    }
}

impl From<DevicePtr> for ArgumentValue {
    fn from(ptr: DevicePtr) -> Self {
        Self::Buffer(ptr)
    }
}

/// Binding progress of a kernel
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum KernelState {
    /// Nothing configured or bound yet
    Loaded,
    /// Group size set, no arguments bound
    Configured,
    /// Some arguments bound, but not ready to launch
    ArgumentsBound,
    /// Group size set and every declared parameter bound
    ReadyToLaunch,
}

/// Bind `value` to parameter `index` of a raw kernel handle
pub(crate) fn bind_raw<D: DriverBindings>(driver: &D, kernel: KernelHandle, index: u32, value: &[u8]) -> Result<()> {
    unsafe { driver.kernel_set_argument(kernel, index, value.len(), value.as_ptr().cast()) }
        .map_err(|status| BindError::Bind { index, status })
}

pub(crate) fn configure_raw<D: DriverBindings>(driver: &D, kernel: KernelHandle, group: Dim3) -> Result<()> {
    unsafe { driver.kernel_set_group_size(kernel, group) }.map_err(|status| BindError::Config { group, status })
}

pub(crate) fn suggest_raw<D: DriverBindings>(driver: &D, kernel: KernelHandle, global: Dim3) -> Result<Dim3> {
    unsafe { driver.kernel_suggest_group_size(kernel, global) }.map_err(|status| BindError::Query { status })
}

/// Occupancy limit of kernel `name` in a raw module, through a kernel
/// handle that is destroyed before returning
pub(crate) fn max_block_size_raw<D: DriverBindings>(driver: &D, module: ModuleHandle, name: &CStr) -> Result<u32> {
    let query = |status| BindError::Query { status };

    let kernel = unsafe { driver.module_get_kernel(module, name) }.map_err(query)?;
    let block = unsafe { driver.kernel_max_block_size(kernel, DynamicSharedMem::None) };
    let destroyed = unsafe { driver.kernel_destroy(kernel) };

    match (block, destroyed) {
        (Ok(block), Ok(())) => Ok(block),
        (Ok(_), Err(status)) => Err(query(status)),
        (Err(status), destroyed) => {
            if let Err(secondary) = destroyed {
                tracing::warn!(%kernel, status = %secondary, "failed to destroy kernel");
            }
            Err(query(status))
        }
    }
}

/// A kernel function resolved from a [`Module`], together with the
/// group size and arguments bound to it so far
///
/// Mutators take `&mut self`; wrap in a [`SharedKernel`] to configure
/// one kernel from several threads. A call that fails leaves the
/// recorded state exactly as it was.
pub struct Kernel<D: DriverBindings> {
    module: Arc<Module<D>>,
    name: String,
    handle: KernelHandle,
    params: u32,
    group_size: Option<Dim3>,
    arguments: BTreeMap<u32, ArgumentValue>,
}

impl<D: DriverBindings> std::fmt::Debug for Kernel<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Kernel")
            .field("name", &self.name)
            .field("handle", &self.handle)
            .field("params", &self.params)
            .field("group_size", &self.group_size)
            .field("arguments", &self.arguments)
            .finish()
    }
}

impl<D: DriverBindings> Drop for Kernel<D> {
    fn drop(&mut self) {
        if let Err(status) = unsafe { self.module.driver().kernel_destroy(self.handle) } {
            tracing::warn!(kernel = %self.name, handle = %self.handle, %status, "failed to destroy kernel");
        }
    }
}

impl<D: DriverBindings> Kernel<D> {
    pub(crate) fn resolved(module: Arc<Module<D>>, name: &str, handle: KernelHandle) -> Result<Self> {
        let driver = module.driver();

        let params = match unsafe { driver.kernel_param_count(handle) } {
            Ok(params) => params,
            Err(status) => {
                if let Err(secondary) = unsafe { driver.kernel_destroy(handle) } {
                    tracing::warn!(kernel = name, %handle, status = %secondary, "failed to destroy kernel");
                }
                return Err(BindError::Query { status });
            }
        };

        tracing::debug!(module = %module.handle(), kernel = name, %handle, params, "kernel resolved");

        Ok(Self { module, name: name.to_string(), handle, params, group_size: None, arguments: BTreeMap::new() })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn handle(&self) -> KernelHandle {
        self.handle
    }

    pub fn module(&self) -> &Arc<Module<D>> {
        &self.module
    }

    /// Number of parameters the kernel declares
    pub fn parameter_count(&self) -> u32 {
        self.params
    }

    pub fn group_size(&self) -> Option<Dim3> {
        self.group_size
    }

    /// The value most recently bound to `index`
    pub fn argument(&self, index: u32) -> Option<&ArgumentValue> {
        self.arguments.get(&index)
    }

    pub fn state(&self) -> KernelState {
        let all_bound = (0..self.params).all(|i| self.arguments.contains_key(&i));

        match (self.group_size.is_some(), self.arguments.is_empty()) {
            (true, _) if all_bound => KernelState::ReadyToLaunch,
            (true, true) => KernelState::Configured,
            (_, false) => KernelState::ArgumentsBound,
            (false, true) => KernelState::Loaded,
        }
    }

    pub fn suggest_max_block_size(&self, smem: DynamicSharedMem) -> Result<u32> {
        unsafe { self.module.driver().kernel_max_block_size(self.handle, smem) }
            .map_err(|status| BindError::Query { status })
    }

    /// Group size the driver recommends for a launch over `global`
    pub fn suggest_group_size(&self, global: Dim3) -> Result<Dim3> {
        suggest_raw(self.module.driver().as_ref(), self.handle, global)
    }

    /// Set the group size used by subsequent launches
    pub fn set_group_size(&mut self, group: Dim3) -> Result<()> {
        configure_raw(self.module.driver().as_ref(), self.handle, group)?;

        tracing::debug!(kernel = %self.name, %group, "group size set");
        self.group_size = Some(group);

        Ok(())
    }

    /// Bind `value` to parameter `index`, replacing any earlier binding
    ///
    /// The index is not checked against [`Self::parameter_count`]; the
    /// driver rejects out-of-range indices itself.
    pub fn set_argument(&mut self, index: u32, value: impl Into<ArgumentValue>) -> Result<()> {
        let value = value.into();
        bind_raw(self.module.driver().as_ref(), self.handle, index, &value.bytes())?;

        tracing::trace!(kernel = %self.name, index, ?value, "argument bound");
        self.arguments.insert(index, value);

        Ok(())
    }

    /// Grid and block dimensions covering `global`, bounded by the
    /// kernel's occupancy limit
    pub fn launch_dims(&self, global: Dim3) -> Result<LaunchDims> {
        if global.has_zero() {
            return Err(format!("global size {global} has a zero dimension").into());
        }

        let max_threads = self.suggest_max_block_size(DynamicSharedMem::None)?;
        Ok(schedule::launch_dims(global, max_threads))
    }
}

/// A [`Kernel`] behind a mutex, for configuring one kernel from
/// several threads
pub struct SharedKernel<D: DriverBindings>(Arc<Mutex<Kernel<D>>>);

impl<D: DriverBindings> Clone for SharedKernel<D> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<D: DriverBindings> From<Kernel<D>> for SharedKernel<D> {
    fn from(kernel: Kernel<D>) -> Self {
        Self::new(kernel)
    }
}

impl<D: DriverBindings> SharedKernel<D> {
    pub fn new(kernel: Kernel<D>) -> Self {
        Self(Arc::new(Mutex::new(kernel)))
    }

    pub fn lock(&self) -> MutexGuard<'_, Kernel<D>> {
        self.0.lock()
    }

    pub fn set_group_size(&self, group: Dim3) -> Result<()> {
        self.lock().set_group_size(group)
    }

    pub fn set_argument(&self, index: u32, value: impl Into<ArgumentValue>) -> Result<()> {
        self.lock().set_argument(index, value)
    }
}

#[cfg(test)]
mod tests {
    use std::ffi::c_void;

    use super::*;
    use crate::{
        config::BinderConfig,
        driver::{
            host::{Host, spirv},
            ze,
        },
        error::Status,
    };

    /// Host driver whose kernel destruction always fails
    #[derive(Default)]
    struct StuckKernels(Host);

    impl DriverBindings for StuckKernels {
        const NAME: &'static str = "stuck-kernels";
        const INVALID_VALUE: i32 = Host::INVALID_VALUE;
        const UNKNOWN: i32 = Host::UNKNOWN;

        fn open(config: &BinderConfig) -> std::result::Result<Self, Status> {
            Host::open(config).map(Self)
        }

        unsafe fn module_load(&self, image: &[u8]) -> std::result::Result<ModuleHandle, Status> {
            unsafe { self.0.module_load(image) }
        }

        unsafe fn module_unload(&self, module: ModuleHandle) -> std::result::Result<(), Status> {
            unsafe { self.0.module_unload(module) }
        }

        unsafe fn module_get_kernel(&self, module: ModuleHandle, name: &CStr) -> std::result::Result<KernelHandle, Status> {
            unsafe { self.0.module_get_kernel(module, name) }
        }

        unsafe fn kernel_destroy(&self, _: KernelHandle) -> std::result::Result<(), Status> {
            Err(ze::status(ze::ERROR_HANDLE_OBJECT_IN_USE))
        }

        unsafe fn kernel_param_count(&self, kernel: KernelHandle) -> std::result::Result<u32, Status> {
            unsafe { self.0.kernel_param_count(kernel) }
        }

        unsafe fn kernel_max_block_size(&self, kernel: KernelHandle, smem: DynamicSharedMem) -> std::result::Result<u32, Status> {
            unsafe { self.0.kernel_max_block_size(kernel, smem) }
        }

        unsafe fn kernel_suggest_group_size(&self, kernel: KernelHandle, global: Dim3) -> std::result::Result<Dim3, Status> {
            unsafe { self.0.kernel_suggest_group_size(kernel, global) }
        }

        unsafe fn kernel_set_group_size(&self, kernel: KernelHandle, group: Dim3) -> std::result::Result<(), Status> {
            unsafe { self.0.kernel_set_group_size(kernel, group) }
        }

        unsafe fn kernel_set_argument(
            &self,
            kernel: KernelHandle,
            index: u32,
            size: usize,
            value: *const c_void,
        ) -> std::result::Result<(), Status> {
            unsafe { self.0.kernel_set_argument(kernel, index, size, value) }
        }

        unsafe fn mem_alloc(&self, bytes: usize) -> std::result::Result<DevicePtr, Status> {
            unsafe { self.0.mem_alloc(bytes) }
        }

        unsafe fn mem_free(&self, ptr: DevicePtr) -> std::result::Result<(), Status> {
            unsafe { self.0.mem_free(ptr) }
        }

        unsafe fn mem_fill(&self, dst: DevicePtr, pattern: &[u8], bytes: usize) -> std::result::Result<(), Status> {
            unsafe { self.0.mem_fill(dst, pattern, bytes) }
        }

        unsafe fn memcpy_h2d(&self, dst: DevicePtr, src: *const c_void, bytes: usize) -> std::result::Result<(), Status> {
            unsafe { self.0.memcpy_h2d(dst, src, bytes) }
        }

        unsafe fn memcpy_d2h(&self, dst: *mut c_void, src: DevicePtr, bytes: usize) -> std::result::Result<(), Status> {
            unsafe { self.0.memcpy_d2h(dst, src, bytes) }
        }
    }

    fn kernel(params: u32) -> Result<(Arc<Host>, Kernel<Host>)> {
        let host = Arc::new(Host::default());
        let module = Module::load(host.clone(), &spirv::assemble(&[("k", params)]))?;
        Ok((host, module.kernel("k")?))
    }

    #[test]
    fn state_progression() -> Result<()> {
        let (_, mut k) = kernel(2)?;
        assert_eq!(k.state(), KernelState::Loaded);

        k.set_group_size(Dim3::linear(64))?;
        assert_eq!(k.state(), KernelState::Configured);

        k.set_argument(0, DevicePtr::from_raw(0x1000))?;
        assert_eq!(k.state(), KernelState::ArgumentsBound);

        k.set_argument(1, ArgumentValue::scalar(3i32))?;
        assert_eq!(k.state(), KernelState::ReadyToLaunch);

        Ok(())
    }

    #[test]
    fn arguments_before_group_size() -> Result<()> {
        let (_, mut k) = kernel(1)?;
        k.set_argument(0, ArgumentValue::RawPointer(0xabc))?;
        assert_eq!(k.state(), KernelState::ArgumentsBound);

        let (_, mut k) = kernel(0)?;
        k.set_group_size(Dim3::ONE)?;
        assert_eq!(k.state(), KernelState::ReadyToLaunch);

        Ok(())
    }

    #[test]
    fn failed_calls_keep_previous_state() -> Result<()> {
        let (host, mut k) = kernel(3)?;

        k.set_group_size(Dim3::linear(128))?;
        let err = k.set_group_size(Dim3::linear(4096)).unwrap_err();
        assert!(matches!(err, BindError::Config { group, .. } if group == Dim3::linear(4096)));
        assert_eq!(k.group_size(), Some(Dim3::linear(128)));
        assert_eq!(host.recorded_group_size(k.handle()), Some(Dim3::linear(128)));

        k.set_argument(2, ArgumentValue::Inline(vec![1, 2]))?;
        assert!(k.set_argument(2, ArgumentValue::Inline(vec![])).is_err());
        assert_eq!(k.argument(2), Some(&ArgumentValue::Inline(vec![1, 2])));

        Ok(())
    }

    #[test]
    fn out_of_range_index_is_driver_detected() -> Result<()> {
        let (_, mut k) = kernel(3)?;

        let err = k.set_argument(5, ArgumentValue::RawPointer(0)).unwrap_err();
        assert!(matches!(err, BindError::Bind { index: 5, .. }));
        assert_eq!(err.code_or(0), ze::ERROR_INVALID_KERNEL_ARGUMENT_INDEX);
        assert!(k.argument(5).is_none());

        Ok(())
    }

    #[test]
    fn launch_dims_cover_global_size() -> Result<()> {
        let (_, k) = kernel(0)?;

        let dims = k.launch_dims(Dim3::new(1000, 10, 1))?;
        assert!(dims.block.volume() <= 1024);
        assert!(u64::from(dims.grid.x * dims.block.x) >= 1000);
        assert!(k.launch_dims(Dim3::new(0, 1, 1)).is_err());

        Ok(())
    }

    #[test]
    fn shared_kernel_serialises_access() -> Result<()> {
        let (host, k) = kernel(1)?;
        let shared = SharedKernel::from(k);

        std::thread::scope(|s| {
            let handles: Vec<_> = (0..4u64)
                .map(|i| {
                    let shared = shared.clone();
                    s.spawn(move || shared.set_argument(0, ArgumentValue::RawPointer(i)))
                })
                .collect();

            for handle in handles {
                assert!(handle.join().expect("binding thread panicked").is_ok());
            }
        });

        let kernel = shared.lock();
        let bound = kernel.argument(0).cloned();
        let recorded = host.recorded_argument(kernel.handle(), 0);
        assert_eq!(bound.map(|v| v.bytes().to_vec()), recorded);

        Ok(())
    }

    #[test]
    fn occupancy_query_reports_failed_cleanup() -> Result<()> {
        let driver = StuckKernels::default();
        let module = unsafe { driver.module_load(&spirv::assemble(&[("k", 1)])) }.map_err(|status| BindError::Load { status })?;

        let err = max_block_size_raw(&driver, module, c"k").unwrap_err();
        assert!(matches!(err, BindError::Query { .. }));
        assert_eq!(err.code_or(0), ze::ERROR_HANDLE_OBJECT_IN_USE);

        let err = max_block_size_raw(&driver, module, c"missing").unwrap_err();
        assert_eq!(err.code_or(0), ze::ERROR_INVALID_KERNEL_NAME);

        Ok(())
    }

    #[test]
    fn occupancy_query_releases_its_kernel() -> Result<()> {
        let host = Host::default();
        let module = unsafe { host.module_load(&spirv::assemble(&[("k", 1)])) }.map_err(|status| BindError::Load { status })?;

        assert_eq!(max_block_size_raw(&host, module, c"k")?, 1024);
        assert!(unsafe { host.module_unload(module) }.is_ok());
        assert_eq!(host.loaded_modules(), 0);

        Ok(())
    }
}
