use std::{ffi::CString, sync::Arc};

use crate::{
    driver::{DriverBindings, DynamicSharedMem},
    error::{BindError, Result},
    handle::ModuleHandle,
    kernel::Kernel,
};

/// A device binary loaded into the driver
///
/// Unloaded when the last `Arc` is dropped. Every [`Kernel`] resolved
/// from a module holds a reference to it, so a module always outlives
/// its kernels.
pub struct Module<D: DriverBindings> {
    handle: ModuleHandle,
    driver: Arc<D>,
}

impl<D: DriverBindings> std::fmt::Debug for Module<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Module<{}>({})", D::NAME, self.handle)
    }
}

impl<D: DriverBindings> Drop for Module<D> {
    fn drop(&mut self) {
        if let Err(status) = unsafe { self.driver.module_unload(self.handle) } {
            tracing::warn!(module = %self.handle, %status, "failed to unload module");
        } else {
            tracing::debug!(module = %self.handle, "module unloaded");
        }
    }
}

impl<D: DriverBindings> Module<D> {
    /// Load a PTX or SPIR-V image
    ///
    /// The image is handed to the driver untouched, including when it is
    /// empty, so the status in [`BindError::Load`] is always the driver's.
    pub fn load(driver: Arc<D>, image: &[u8]) -> Result<Arc<Self>> {
        let handle = unsafe { driver.module_load(image) }.map_err(|status| BindError::Load { status })?;

        tracing::debug!(driver = D::NAME, module = %handle, bytes = image.len(), "module loaded");

        Ok(Arc::new(Self { handle, driver }))
    }

    pub fn handle(&self) -> ModuleHandle {
        self.handle
    }

    pub fn driver(&self) -> &Arc<D> {
        &self.driver
    }

    /// Resolve the kernel with entry point `name`
    pub fn kernel(self: &Arc<Self>, name: &str) -> Result<Kernel<D>> {
        let cname = kernel_name(name)?;

        let handle = unsafe { self.driver.module_get_kernel(self.handle, &cname) }
            .map_err(|status| BindError::Query { status })?;

        Kernel::resolved(self.clone(), name, handle)
    }

    /// Block size giving maximum occupancy for the kernel `name`
    pub fn suggest_max_block_size(self: &Arc<Self>, name: &str, smem: DynamicSharedMem) -> Result<u32> {
        self.kernel(name)?.suggest_max_block_size(smem)
    }
}

fn kernel_name(name: &str) -> Result<CString> {
    CString::new(name).map_err(|_| format!("kernel name {name:?} contains an interior NUL").into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{
        host::{Host, spirv},
        ze,
    };

    #[test]
    fn load_and_unload() -> Result<()> {
        let host = Arc::new(Host::default());

        let module = Module::load(host.clone(), &spirv::assemble(&[("fill", 2)]))?;
        assert!(!module.handle().is_null());
        assert_eq!(host.loaded_modules(), 1);

        drop(module);
        assert_eq!(host.loaded_modules(), 0);

        Ok(())
    }

    #[test]
    fn empty_image_reports_driver_status() {
        let err = Module::load(Arc::new(Host::default()), &[]).unwrap_err();
        assert!(matches!(err, BindError::Load { .. }));
        assert_eq!(err.code_or(0), ze::ERROR_INVALID_SIZE);
    }

    #[test]
    fn kernels_keep_module_alive() -> Result<()> {
        let host = Arc::new(Host::default());
        let module = Module::load(host.clone(), &spirv::assemble(&[("fill", 2)]))?;

        let kernel = module.kernel("fill")?;
        drop(module);
        assert_eq!(host.loaded_modules(), 1);

        drop(kernel);
        assert_eq!(host.loaded_modules(), 0);

        Ok(())
    }

    #[test]
    fn unknown_kernel_is_query_error() -> Result<()> {
        let module = Module::load(Arc::new(Host::default()), &spirv::assemble(&[("fill", 2)]))?;

        let err = module.kernel("missing").unwrap_err();
        assert!(matches!(err, BindError::Query { .. }));
        assert_eq!(err.code_or(0), ze::ERROR_INVALID_KERNEL_NAME);

        assert!(matches!(module.kernel("fi\0ll"), Err(BindError::InvalidRequest(_))));
        assert!(module.suggest_max_block_size("missing", DynamicSharedMem::None).is_err());

        Ok(())
    }

    #[test]
    fn max_block_size_by_name() -> Result<()> {
        let module = Module::load(Arc::new(Host::default()), &spirv::assemble(&[("fill", 2)]))?;
        assert_eq!(module.suggest_max_block_size("fill", DynamicSharedMem::None)?, 1024);
        Ok(())
    }
}
